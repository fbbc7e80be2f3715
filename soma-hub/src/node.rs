/**
 * NODE SERVICE - Façade du nœud auto-adaptatif
 *
 * RÔLE :
 * Point d'entrée unique vers l'état du nœud : registre des composants,
 * buffers de mesures, schémas et dispatcher d'adaptations. HTTP et
 * ingestion bus ne parlent qu'à ce service, jamais aux structures
 * internes. Tout est injecté, rien de global.
 *
 * FONCTIONNEMENT :
 * - Les mouvements de membership (register/deregister/upsert) sont
 *   sérialisés par un verrou de churn, pour que registre et buffers
 *   restent alignés. Les push de mesures ne prennent pas ce verrou.
 * - Le balayage liveness évince les composants muets et vérifie au
 *   passage les invariants internes (compteurs, alignement des anneaux).
 */

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::buffer::{BufferPool, MetricSample};
use crate::config::{HubConfig, LivenessConf};
use crate::dispatch::{ComponentLink, Dispatcher};
use crate::error::{HubError, HubResult};
use crate::registry::{Component, ComponentRegistry, ComponentSpec};
use crate::schema::{self, Schema, SchemaCache};

/// Ce qu'un announce a déclenché côté registre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Registered,
    Refreshed,
    Replaced,
}

pub struct NodeService {
    registry: ComponentRegistry,
    buffers: BufferPool,
    dispatcher: Dispatcher,
    monitor_cache: SchemaCache,
    execute_schema: Schema,
    options_schema: Schema,
    /// Sérialise les mouvements de membership, jamais les push
    churn: Mutex<()>,
}

impl NodeService {
    pub fn new(cfg: &HubConfig, link: Arc<dyn ComponentLink>) -> Self {
        Self::with_dispatcher(cfg, Dispatcher::with_defaults(link))
    }

    /// Variante à dispatcher fourni, pour composer d'autres kinds.
    pub fn with_dispatcher(cfg: &HubConfig, dispatcher: Dispatcher) -> Self {
        let execute_schema = schema::execute_schema(&dispatcher.param_shapes());
        let options_schema = schema::adaptation_options_schema(&dispatcher.kinds());
        Self {
            registry: ComponentRegistry::new(cfg.registry.max_components),
            buffers: BufferPool::new(cfg.buffer.capacity),
            dispatcher,
            monitor_cache: SchemaCache::new(),
            execute_schema,
            options_schema,
            churn: Mutex::new(()),
        }
    }

    // ---- Membership ----

    pub fn register_component(&self, spec: ComponentSpec) -> HubResult<()> {
        let _churn = self.churn.lock();
        self.register_unlocked(spec)
    }

    pub fn deregister_component(&self, name: &str) -> HubResult<()> {
        let _churn = self.churn.lock();
        self.deregister_unlocked(name)
    }

    /// Politique d'ingestion des announce : inconnu on enregistre,
    /// identique on rafraîchit, différent on remplace (l'historique de
    /// mesures repart de zéro).
    pub fn upsert_component(&self, spec: ComponentSpec) -> HubResult<UpsertOutcome> {
        let _churn = self.churn.lock();
        match self.registry.lookup(&spec.name) {
            Err(_) => {
                self.register_unlocked(spec)?;
                Ok(UpsertOutcome::Registered)
            }
            Ok(existing)
                if existing.metrics == spec.normalized_metrics()
                    && existing.adaptable == spec.adaptable =>
            {
                self.registry.touch(&spec.name);
                Ok(UpsertOutcome::Refreshed)
            }
            Ok(_) => {
                self.deregister_unlocked(&spec.name)?;
                self.register_unlocked(spec)?;
                Ok(UpsertOutcome::Replaced)
            }
        }
    }

    fn register_unlocked(&self, spec: ComponentSpec) -> HubResult<()> {
        let name = spec.name.clone();
        self.registry.register(spec)?;
        self.buffers.attach(&name);
        Ok(())
    }

    fn deregister_unlocked(&self, name: &str) -> HubResult<()> {
        self.registry.deregister(name)?;
        let dropped = self.buffers.detach(name);
        if dropped > 0 {
            println!("[node] dropped {} buffered samples of {}", dropped, name);
        }
        Ok(())
    }

    // ---- Mesures ----

    /// Accepte une mesure d'un composant enregistré, pour une métrique
    /// qu'il a déclarée. Rafraîchit sa vivacité au passage.
    pub fn push_sample(
        &self,
        component: &str,
        metric: &str,
        value: f64,
        timestamp: OffsetDateTime,
    ) -> HubResult<()> {
        let known = self.registry.lookup(component)?;
        if !known.declares_metric(metric) {
            return Err(HubError::UnknownComponent(format!(
                "{component} does not declare metric {metric}"
            )));
        }
        self.buffers.push(
            component,
            MetricSample {
                metric: metric.to_string(),
                value,
                timestamp,
            },
        )?;
        self.registry.touch(component);
        Ok(())
    }

    pub fn snapshot(&self, component: &str) -> HubResult<Vec<MetricSample>> {
        self.registry.lookup(component)?;
        self.buffers.snapshot(component)
    }

    /// Corps de /monitor : composant -> métrique -> valeurs, du plus
    /// ancien au plus récent. Les métriques déclarées sans mesure
    /// sortent avec un tableau vide.
    pub fn monitor(&self) -> BTreeMap<String, BTreeMap<String, Vec<f64>>> {
        let mut body = BTreeMap::new();
        for component in self.registry.list() {
            let mut metrics: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for metric in &component.metrics {
                metrics.insert(metric.clone(), Vec::new());
            }
            if let Ok(samples) = self.buffers.snapshot(&component.name) {
                for sample in samples {
                    metrics.entry(sample.metric).or_default().push(sample.value);
                }
            }
            body.insert(component.name, metrics);
        }
        body
    }

    // ---- Schémas ----

    pub fn monitor_schema(&self) -> Schema {
        self.monitor_cache.monitor(&self.registry)
    }

    pub fn execute_schema(&self) -> &Schema {
        &self.execute_schema
    }

    pub fn options_schema(&self) -> &Schema {
        &self.options_schema
    }

    /// Corps de /adaptation_options : chaque kind pointe sur lui-même,
    /// c'est la forme que les planificateurs externes attendent.
    pub fn adaptation_options(&self) -> BTreeMap<String, String> {
        self.dispatcher
            .kinds()
            .into_iter()
            .map(|kind| (kind.clone(), kind))
            .collect()
    }

    // ---- Adaptations ----

    /// Cycle complet d'une adaptation, jusqu'à l'ack du composant.
    pub async fn execute(&self, payload: &Value) -> HubResult<()> {
        self.dispatcher
            .execute(&self.registry, &self.execute_schema, payload)
            .await
    }

    // ---- Consultation ----

    pub fn components(&self) -> Vec<Component> {
        self.registry.list()
    }

    pub fn component(&self, name: &str) -> HubResult<Component> {
        self.registry.lookup(name)
    }

    pub fn generation(&self) -> u64 {
        self.registry.generation()
    }

    pub fn cached_schema_generation(&self) -> Option<u64> {
        self.monitor_cache.cached_generation()
    }

    pub fn buffered_total(&self) -> usize {
        self.buffers.total()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffers.capacity()
    }

    // ---- Liveness ----

    /// Une passe de balayage : marque les silencieux, évince les muets,
    /// puis vérifie les invariants internes. Rend (inactifs, évincés).
    pub fn sweep_liveness(
        &self,
        inactive_after: Duration,
        evict_after: Duration,
    ) -> (usize, usize) {
        let report = self.registry.sweep(inactive_after, evict_after);
        let evicted = self.evict_expired(&report.expired, evict_after);
        self.verify_integrity();
        (report.newly_inactive.len(), evicted)
    }

    /// Évince les candidats du balayage encore silencieux. Le registre
    /// revérifie et retire sous un même verrou : un composant ranimé par
    /// un announce ou une mesure entre le balayage et cette passe est
    /// épargné, buffers intacts.
    fn evict_expired(&self, names: &[String], evict_after: Duration) -> usize {
        let mut evicted = 0;
        for name in names {
            let _churn = self.churn.lock();
            if !self.registry.evict_if_silent(name, evict_after) {
                continue;
            }
            let dropped = self.buffers.detach(name);
            if dropped > 0 {
                println!("[node] dropped {} buffered samples of {}", dropped, name);
            }
            evicted += 1;
        }
        evicted
    }

    /// Compteurs et alignement registre/buffers. Une divergence est un
    /// bug interne, fatal en build de test, jamais corrigé en silence.
    fn verify_integrity(&self) {
        let _churn = self.churn.lock();
        debug_assert_eq!(
            self.buffers.ring_count(),
            self.registry.len(),
            "buffer rings diverged from registered components"
        );
        self.buffers.checked_total();
    }
}

/// Tâche périodique de liveness sur le registre.
pub fn spawn_liveness_sweeper(service: Arc<NodeService>, conf: LivenessConf) {
    println!(
        "[node] liveness sweeper on (inactive after {}s, evict after {}s)",
        conf.inactive_after_secs, conf.evict_after_secs
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let inactive_after = Duration::seconds(conf.inactive_after_secs as i64);
            let evict_after = Duration::seconds(conf.evict_after_secs as i64);
            let (marked, evicted) = service.sweep_liveness(inactive_after, evict_after);
            if marked > 0 || evicted > 0 {
                println!(
                    "[node] liveness sweep: {} marked inactive, {} evicted",
                    marked, evicted
                );
            }
        }
    });
}
