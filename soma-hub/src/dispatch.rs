/**
 * ADAPTATION DISPATCHER - Routage des commandes d'adaptation
 *
 * RÔLE : Recevoir un ordre d'adaptation validé, trouver le composant
 * cible et le handler du kind demandé, puis pousser la commande vers le
 * composant à travers le lien bus.
 *
 * ARCHITECTURE : Table de handlers (un par kind d'adaptation) derrière
 * un trait, lien composant derrière un trait. Ajouter un kind =
 * enregistrer un handler, aucun branchement en dur sur les noms.
 * La validation est sans effet de bord ; aucun verrou n'est tenu
 * pendant l'attente du composant.
 */

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HubError, HubResult};
use crate::registry::{Component, ComponentRegistry};
use crate::schema::{Schema, SchemaType};

/// Étapes du cycle de vie d'une commande, pour les traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Validated,
    Dispatched,
    Completed,
    Rejected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Received => "received",
            Phase::Validated => "validated",
            Phase::Dispatched => "dispatched",
            Phase::Completed => "completed",
            Phase::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

/// Canal sortant vers un composant. L'implémentation de production
/// passe par le bus MQTT, les tests branchent un enregistreur.
#[async_trait]
pub trait ComponentLink: Send + Sync {
    /// Pousse une commande et attend l'acquittement du composant.
    async fn apply(&self, component: &str, adaptation: &str, params: &Value) -> HubResult<()>;
}

/// Un kind d'adaptation supporté par le nœud.
#[async_trait]
pub trait AdaptationHandler: Send + Sync {
    /// Nom du kind, tel qu'annoncé dans /adaptation_options.
    fn kind(&self) -> &'static str;

    /// Paramètres requis par ce kind, avec leur type attendu.
    fn params(&self) -> Vec<(&'static str, SchemaType)>;

    /// Applique l'adaptation au composant via le lien.
    async fn apply(
        &self,
        component: &Component,
        payload: &Value,
        link: &dyn ComponentLink,
    ) -> HubResult<()>;
}

/// Kind historique du nœud : changer la fréquence d'échantillonnage
/// d'un capteur.
pub struct ChangeFrequency;

#[async_trait]
impl AdaptationHandler for ChangeFrequency {
    fn kind(&self) -> &'static str {
        "change_frequency"
    }

    fn params(&self) -> Vec<(&'static str, SchemaType)> {
        vec![("frequency", SchemaType::Number)]
    }

    async fn apply(
        &self,
        component: &Component,
        payload: &Value,
        link: &dyn ComponentLink,
    ) -> HubResult<()> {
        let frequency = payload
            .get("frequency")
            .and_then(Value::as_f64)
            .ok_or_else(|| HubError::missing_field("frequency"))?;
        if frequency <= 0.0 {
            return Err(HubError::SchemaViolation {
                field: "frequency".to_string(),
                detail: "must be strictly positive".to_string(),
            });
        }
        link.apply(
            &component.name,
            self.kind(),
            &json!({ "frequency": frequency }),
        )
        .await
    }
}

/// Requête d'adaptation après validation.
#[derive(Debug, Clone)]
pub struct AdaptationRequest {
    pub kind: String,
    pub component: String,
}

pub struct Dispatcher {
    handlers: HashMap<String, Box<dyn AdaptationHandler>>,
    link: Arc<dyn ComponentLink>,
}

impl Dispatcher {
    pub fn new(link: Arc<dyn ComponentLink>) -> Self {
        Self {
            handlers: HashMap::new(),
            link,
        }
    }

    /// Dispatcher avec les kinds de série du nœud.
    pub fn with_defaults(link: Arc<dyn ComponentLink>) -> Self {
        let mut dispatcher = Self::new(link);
        dispatcher.register(Box::new(ChangeFrequency));
        dispatcher
    }

    pub fn register(&mut self, handler: Box<dyn AdaptationHandler>) {
        println!("[dispatch] registered adaptation kind {}", handler.kind());
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Kinds supportés, triés pour une énumération stable.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// (kind, paramètres déclarés) pour la construction du schéma execute.
    pub fn param_shapes(&self) -> Vec<(String, Vec<(&'static str, SchemaType)>)> {
        self.kinds()
            .into_iter()
            .map(|kind| {
                let params = self.handlers[&kind].params();
                (kind, params)
            })
            .collect()
    }

    /// Valide un payload sans rien modifier ni contacter personne.
    /// Vérifie la forme de base, puis la présence et le type des
    /// paramètres du kind demandé quand ce kind est connu.
    pub fn validate(&self, schema: &Schema, payload: &Value) -> HubResult<AdaptationRequest> {
        schema.validate(payload)?;

        let kind = payload
            .get("adaptation")
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::missing_field("adaptation"))?;
        let component = payload
            .get("component")
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::missing_field("component"))?;

        if let Some(handler) = self.handlers.get(kind) {
            for (name, ty) in handler.params() {
                match payload.get(name) {
                    None => return Err(HubError::missing_field(name)),
                    Some(value) if !ty.matches(value) => {
                        return Err(HubError::mistyped_field(name, ty.as_str()))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(AdaptationRequest {
            kind: kind.to_string(),
            component: component.to_string(),
        })
    }

    /// Cycle complet : validation, résolution du composant, handler,
    /// envoi. Chaque refus est tracé avec sa cause avant de remonter.
    pub async fn execute(
        &self,
        registry: &ComponentRegistry,
        schema: &Schema,
        payload: &Value,
    ) -> HubResult<()> {
        println!("[dispatch] adaptation request {}", Phase::Received);

        let request = self.validate(schema, payload).map_err(log_rejection)?;
        println!(
            "[dispatch] {} on {}: {}",
            request.kind,
            request.component,
            Phase::Validated
        );

        let component = registry
            .lookup(&request.component)
            .map_err(log_rejection)?;
        // Un kind inconnu prime sur le refus d'adaptation du composant
        let handler = self
            .handlers
            .get(&request.kind)
            .ok_or_else(|| HubError::UnsupportedAdaptation(request.kind.clone()))
            .map_err(log_rejection)?;
        if !component.adaptable {
            // Refus local, sans contacter le composant
            return Err(log_rejection(HubError::ComponentRejected(format!(
                "component {} does not accept adaptations",
                component.name
            ))));
        }

        println!(
            "[dispatch] {} on {}: {}",
            request.kind,
            request.component,
            Phase::Dispatched
        );
        handler
            .apply(&component, payload, self.link.as_ref())
            .await
            .map_err(log_rejection)?;

        println!(
            "[dispatch] {} on {}: {}",
            request.kind,
            request.component,
            Phase::Completed
        );
        Ok(())
    }
}

fn log_rejection(err: HubError) -> HubError {
    eprintln!("[dispatch] {}: {}", Phase::Rejected, err);
    err
}
