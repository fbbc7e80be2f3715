use serde::{Deserialize, Serialize};

fn default_adaptable() -> bool {
    true
}

/// Contrat `soma/components/announce@v1` : un composant se déclare
/// avec la liste des métriques qu'il publiera.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnounceIn {
    pub component: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default = "default_adaptable")]
    pub adaptable: bool,
}

/// Contrat `soma/components/bye@v1` : départ volontaire.
#[derive(Debug, Clone, Deserialize)]
pub struct ByeIn {
    pub component: String,
}

/// Contrat `soma/components/sample@v1` : une mesure horodatée.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleIn {
    pub component: String,
    pub metric: String,
    pub value: f64,
    pub ts: String,
}

/// Contrat `soma/components/ack@v1` : réponse d'un composant à une
/// commande d'adaptation. `status` vaut "success" ou "error".
#[derive(Debug, Clone, Deserialize)]
pub struct AckIn {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Contrat `soma/components/adapt@v1` : commande envoyée par le hub.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptCommand {
    pub request_id: String,
    pub component: String,
    pub adaptation: String,
    pub params: serde_json::Value,
    pub ts: String,
}

/// Vue HTTP d'un composant enregistré (GET /components).
#[derive(Debug, Clone, Serialize)]
pub struct ComponentView {
    pub name: String,
    pub metrics: Vec<String>,
    pub adaptable: bool,
    pub active: bool,
    pub registered_at: String,
    pub last_seen: String,
    pub age_seconds: i64,
}

/// Une mesure telle qu'exposée dans la vue détail.
#[derive(Debug, Clone, Serialize)]
pub struct SampleView {
    pub metric: String,
    pub value: f64,
    pub ts: String,
}

/// Vue HTTP détaillée (GET /components/{name}) : l'inventaire plus les
/// mesures encore en buffer, dans l'ordre d'arrivée.
#[derive(Debug, Serialize)]
pub struct ComponentDetail {
    pub component: ComponentView,
    pub samples: Vec<SampleView>,
}
