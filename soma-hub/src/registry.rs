/**
 * COMPONENT REGISTRY - Inventaire des composants capteurs du nœud
 *
 * RÔLE : Enregistrement, consultation et éviction des composants qui
 * publient des métriques sur le bus. Source de vérité pour la forme des
 * schémas (quels composants existent, quelles métriques ils déclarent).
 *
 * ARCHITECTURE : HashMap + vecteur d'ordre d'insertion + génération,
 * sous un seul RwLock. La génération n'avance que sur register et
 * deregister, jamais sur les rafraîchissements d'activité.
 * UTILITÉ : Énumération reproductible pour /monitor et pour le cache de schémas.
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

use crate::error::{HubError, HubResult};

/// Déclaration d'un composant au moment de son enregistrement.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub metrics: Vec<String>,
    pub adaptable: bool,
}

impl ComponentSpec {
    /// Métriques déclarées, réduites à leur première occurrence.
    pub fn normalized_metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            if !metrics.contains(metric) {
                metrics.push(metric.clone());
            }
        }
        metrics
    }
}

/// Composant enregistré, tel que le registre le connaît.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub metrics: Vec<String>,       // ordre de déclaration, dédupliqué
    pub adaptable: bool,
    pub active: bool,
    pub last_seen: OffsetDateTime,
    pub registered_at: OffsetDateTime,
}

impl Component {
    pub fn declares_metric(&self, metric: &str) -> bool {
        self.metrics.iter().any(|m| m == metric)
    }
}

/// Résultat d'une passe de balayage liveness.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub newly_inactive: Vec<String>,
    pub expired: Vec<String>,
}

struct RegistryInner {
    components: HashMap<String, Component>,
    order: Vec<String>,             // aligné sur components, jamais de doublon
    generation: u64,
}

pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
    max_components: usize,
}

impl ComponentRegistry {
    pub fn new(max_components: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                components: HashMap::new(),
                order: Vec::new(),
                generation: 0,
            }),
            max_components,
        }
    }

    /// Enregistre un composant. Refuse les doublons de nom et le
    /// dépassement de capacité. Les métriques dupliquées dans la
    /// déclaration sont réduites à leur première occurrence.
    pub fn register(&self, spec: ComponentSpec) -> HubResult<()> {
        let mut inner = self.inner.write();

        if inner.components.contains_key(&spec.name) {
            return Err(HubError::DuplicateName(spec.name));
        }
        if inner.components.len() >= self.max_components {
            return Err(HubError::RegistryFull {
                capacity: self.max_components,
            });
        }

        let metrics = spec.normalized_metrics();
        let now = OffsetDateTime::now_utc();
        let name = spec.name;
        inner.order.push(name.clone());
        inner.components.insert(
            name.clone(),
            Component {
                name: name.clone(),
                metrics,
                adaptable: spec.adaptable,
                active: true,
                last_seen: now,
                registered_at: now,
            },
        );
        inner.generation += 1;

        println!(
            "[registry] registered component {} ({} metrics, generation {})",
            name,
            inner.components[&name].metrics.len(),
            inner.generation
        );
        Ok(())
    }

    /// Retire un composant et rend son enregistrement au moment du retrait.
    pub fn deregister(&self, name: &str) -> HubResult<Component> {
        let mut inner = self.inner.write();
        match inner.components.remove(name) {
            Some(component) => {
                inner.order.retain(|n| n != name);
                inner.generation += 1;
                println!(
                    "[registry] deregistered component {} (generation {})",
                    name, inner.generation
                );
                Ok(component)
            }
            None => Err(HubError::UnknownComponent(name.to_string())),
        }
    }

    pub fn lookup(&self, name: &str) -> HubResult<Component> {
        self.inner
            .read()
            .components
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::UnknownComponent(name.to_string()))
    }

    /// Snapshot des composants dans l'ordre d'insertion.
    pub fn list(&self) -> Vec<Component> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.components.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().components.len()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Génération + forme (composant, métriques) lus sous le même verrou,
    /// pour que le cache de schémas ne voie jamais un couple incohérent.
    pub fn schema_snapshot(&self) -> (u64, Vec<(String, Vec<String>)>) {
        let inner = self.inner.read();
        let shapes = inner
            .order
            .iter()
            .filter_map(|name| {
                inner
                    .components
                    .get(name)
                    .map(|c| (c.name.clone(), c.metrics.clone()))
            })
            .collect();
        (inner.generation, shapes)
    }

    /// Rafraîchit last_seen et réactive le composant. Ne touche pas à la
    /// génération : l'activité ne change pas la forme des schémas.
    pub fn touch(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.components.get_mut(name) {
            Some(component) => {
                component.last_seen = OffsetDateTime::now_utc();
                if !component.active {
                    component.active = true;
                    println!("[registry] component {} is active again", name);
                }
                true
            }
            None => false,
        }
    }

    /// Passe de liveness : marque inactifs les composants silencieux depuis
    /// `inactive_after`, et liste ceux silencieux depuis `evict_after`.
    /// L'éviction elle-même revient à l'appelant, qui doit aussi libérer
    /// les buffers associés.
    pub fn sweep(&self, inactive_after: Duration, evict_after: Duration) -> SweepReport {
        let now = OffsetDateTime::now_utc();
        let mut report = SweepReport::default();

        {
            let mut inner = self.inner.write();
            let RegistryInner {
                components, order, ..
            } = &mut *inner;
            for name in order.iter() {
                if let Some(component) = components.get_mut(name) {
                    let age = now - component.last_seen;
                    if component.active && age > inactive_after {
                        component.active = false;
                        report.newly_inactive.push(name.clone());
                    }
                    if age > evict_after {
                        report.expired.push(name.clone());
                    }
                }
            }
        }

        for name in &report.newly_inactive {
            println!("[registry] component {} went silent, marked inactive", name);
        }
        report
    }

    /// Retire un composant seulement s'il est toujours silencieux depuis
    /// plus de `evict_after`. Revérification et retrait sous le même
    /// verrou : un composant ranimé entre le balayage et l'éviction est
    /// épargné. Rend true si le composant a été retiré.
    pub fn evict_if_silent(&self, name: &str, evict_after: Duration) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.write();

        match inner.components.get(name) {
            Some(component) if now - component.last_seen > evict_after => {}
            _ => return false,
        }

        inner.components.remove(name);
        inner.order.retain(|n| n != name);
        inner.generation += 1;
        println!(
            "[registry] evicted silent component {} (generation {})",
            name, inner.generation
        );
        true
    }

    /// Vieillit artificiellement un composant (tests du balayage).
    #[cfg(test)]
    pub fn backdate(&self, name: &str, age: Duration) {
        let mut inner = self.inner.write();
        if let Some(component) = inner.components.get_mut(name) {
            component.last_seen = OffsetDateTime::now_utc() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, metrics: &[&str]) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            adaptable: true,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature", "pulse"])).unwrap();

        let component = registry.lookup("g4t1").unwrap();
        assert_eq!(component.metrics, vec!["temperature", "pulse"]);
        assert!(component.active);
        assert!(component.adaptable);
        assert!(component.declares_metric("pulse"));
        assert!(!component.declares_metric("oxygenation"));
    }

    #[test]
    fn test_duplicate_name_is_refused() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature"])).unwrap();
        let err = registry.register(spec("g4t1", &["pulse"])).unwrap_err();
        assert!(matches!(err, HubError::DuplicateName(name) if name == "g4t1"));
        // L'enregistrement d'origine reste intact
        assert_eq!(registry.lookup("g4t1").unwrap().metrics, vec!["temperature"]);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let registry = ComponentRegistry::new(2);
        registry.register(spec("a", &[])).unwrap();
        registry.register(spec("b", &[])).unwrap();
        let err = registry.register(spec("c", &[])).unwrap_err();
        assert!(matches!(err, HubError::RegistryFull { capacity: 2 }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let registry = ComponentRegistry::new(20);
        for name in ["g4t1", "g3t1", "g4t2"] {
            registry.register(spec(name, &["x"])).unwrap();
        }
        let names: Vec<String> = registry.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["g4t1", "g3t1", "g4t2"]);

        // Un retour après désenregistrement repart en fin d'ordre
        registry.deregister("g3t1").unwrap();
        registry.register(spec("g3t1", &["x"])).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["g4t1", "g4t2", "g3t1"]);
    }

    #[test]
    fn test_duplicate_metrics_collapse_to_first_occurrence() {
        let registry = ComponentRegistry::new(20);
        registry
            .register(spec("g4t1", &["temperature", "pulse", "temperature"]))
            .unwrap();
        assert_eq!(
            registry.lookup("g4t1").unwrap().metrics,
            vec!["temperature", "pulse"]
        );
    }

    #[test]
    fn test_generation_moves_only_on_membership_changes() {
        let registry = ComponentRegistry::new(20);
        let g0 = registry.generation();

        registry.register(spec("g4t1", &["temperature"])).unwrap();
        let g1 = registry.generation();
        assert!(g1 > g0);

        registry.touch("g4t1");
        assert_eq!(registry.generation(), g1);

        registry.deregister("g4t1").unwrap();
        assert!(registry.generation() > g1);
    }

    #[test]
    fn test_deregister_unknown_component() {
        let registry = ComponentRegistry::new(20);
        let err = registry.deregister("ghost").unwrap_err();
        assert!(matches!(err, HubError::UnknownComponent(_)));
    }

    #[test]
    fn test_schema_snapshot_is_ordered_and_tagged() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature"])).unwrap();
        registry.register(spec("g3t1", &["oxygenation"])).unwrap();

        let (generation, shapes) = registry.schema_snapshot();
        assert_eq!(generation, registry.generation());
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].0, "g4t1");
        assert_eq!(shapes[1].1, vec!["oxygenation"]);
    }

    #[test]
    fn test_sweep_marks_inactive_then_expires() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature"])).unwrap();
        registry.register(spec("g3t1", &["oxygenation"])).unwrap();
        registry.backdate("g4t1", Duration::seconds(300));

        let report = registry.sweep(Duration::seconds(120), Duration::seconds(3600));
        assert_eq!(report.newly_inactive, vec!["g4t1"]);
        assert!(report.expired.is_empty());
        assert!(!registry.lookup("g4t1").unwrap().active);
        assert!(registry.lookup("g3t1").unwrap().active);

        // Une deuxième passe ne le signale plus (déjà inactif)
        let report = registry.sweep(Duration::seconds(120), Duration::seconds(3600));
        assert!(report.newly_inactive.is_empty());

        registry.backdate("g4t1", Duration::seconds(7200));
        let report = registry.sweep(Duration::seconds(120), Duration::seconds(3600));
        assert_eq!(report.expired, vec!["g4t1"]);
        // Toujours présent : l'éviction appartient à l'appelant
        assert!(registry.lookup("g4t1").is_ok());
    }

    #[test]
    fn test_evict_if_silent_spares_a_revived_component() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature"])).unwrap();
        registry.backdate("g4t1", Duration::seconds(7200));
        let report = registry.sweep(Duration::seconds(120), Duration::seconds(3600));
        assert_eq!(report.expired, vec!["g4t1"]);

        // Ranimé entre le balayage et l'éviction : épargné
        registry.touch("g4t1");
        assert!(!registry.evict_if_silent("g4t1", Duration::seconds(3600)));
        assert!(registry.lookup("g4t1").is_ok());

        // Toujours silencieux : retiré, génération avancée
        registry.backdate("g4t1", Duration::seconds(7200));
        let generation = registry.generation();
        assert!(registry.evict_if_silent("g4t1", Duration::seconds(3600)));
        assert!(registry.lookup("g4t1").is_err());
        assert_eq!(registry.generation(), generation + 1);

        // Déjà parti : sans effet
        assert!(!registry.evict_if_silent("g4t1", Duration::seconds(3600)));
    }

    #[test]
    fn test_touch_reactivates() {
        let registry = ComponentRegistry::new(20);
        registry.register(spec("g4t1", &["temperature"])).unwrap();
        registry.backdate("g4t1", Duration::seconds(300));
        registry.sweep(Duration::seconds(120), Duration::seconds(3600));
        assert!(!registry.lookup("g4t1").unwrap().active);

        assert!(registry.touch("g4t1"));
        assert!(registry.lookup("g4t1").unwrap().active);
        assert!(!registry.touch("ghost"));
    }
}
