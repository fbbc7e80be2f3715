/*!
Builders pour les messages du bus Soma.

Chaque builder produit le JSON exact attendu par le hub, versionné
dans le nom (`*_v1`). Les topics sont dupliqués ici volontairement :
le devkit ne dépend pas du hub, il parle le même contrat.
*/

use chrono::Utc;
use serde_json::{json, Value};

/// Topics du bus (identiques à ceux du hub).
pub const TOPIC_ANNOUNCE: &str = "soma/components/announce@v1";
pub const TOPIC_BYE: &str = "soma/components/bye@v1";
pub const TOPIC_SAMPLE: &str = "soma/components/sample@v1";
pub const TOPIC_ACK: &str = "soma/components/ack@v1";
pub const TOPIC_ADAPT: &str = "soma/components/adapt@v1";
pub const TOPIC_HEALTH: &str = "soma/hub/health@v1";

/// Construit les messages que publie (ou reçoit) un composant.
pub struct SomaMessageBuilder;

impl SomaMessageBuilder {
    /// Annonce d'un composant : nom, métriques déclarées, adaptable ou non.
    pub fn announce_v1(component: &str, metrics: &[&str], adaptable: bool) -> Value {
        json!({
            "component": component,
            "metrics": metrics,
            "adaptable": adaptable
        })
    }

    /// Départ propre d'un composant.
    pub fn bye_v1(component: &str) -> Value {
        json!({ "component": component })
    }

    /// Échantillon horodaté à maintenant.
    pub fn sample_v1(component: &str, metric: &str, value: f64) -> Value {
        Self::sample_v1_at(component, metric, value, &Utc::now().to_rfc3339())
    }

    /// Échantillon avec un horodatage fourni (tests de tri, de rejet...).
    pub fn sample_v1_at(component: &str, metric: &str, value: f64, ts: &str) -> Value {
        json!({
            "component": component,
            "metric": metric,
            "value": value,
            "ts": ts
        })
    }

    /// Accusé de réception positif d'une commande d'adaptation.
    pub fn ack_v1_success(request_id: &str) -> Value {
        json!({
            "request_id": request_id,
            "status": "success"
        })
    }

    /// Accusé négatif, avec le motif du refus.
    pub fn ack_v1_error(request_id: &str, message: &str) -> Value {
        json!({
            "request_id": request_id,
            "status": "error",
            "error": message
        })
    }

    /// Commande d'adaptation telle que le hub l'émet. Utile pour pousser
    /// une commande dans son propre composant sans hub.
    pub fn adapt_v1(request_id: &str, component: &str, adaptation: &str, params: Value) -> Value {
        json!({
            "request_id": request_id,
            "component": component,
            "adaptation": adaptation,
            "params": params,
            "ts": Utc::now().to_rfc3339()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_announce_carries_declared_metrics() {
        let msg = SomaMessageBuilder::announce_v1("g4t1", &["temperature", "pulse"], true);
        assert_eq!(msg["component"], "g4t1");
        assert_eq!(msg["metrics"][1], "pulse");
        assert_eq!(msg["adaptable"], true);
    }

    #[test]
    fn test_sample_timestamp_is_rfc3339() {
        let msg = SomaMessageBuilder::sample_v1("g4t1", "temperature", 36.5);
        let ts = msg["ts"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(msg["value"], 36.5);
    }

    #[test]
    fn test_ack_error_keeps_the_message() {
        let msg = SomaMessageBuilder::ack_v1_error("req-1", "sensor saturated");
        assert_eq!(msg["status"], "error");
        assert_eq!(msg["error"], "sensor saturated");
    }

    #[test]
    fn test_success_ack_has_no_error_field() {
        let msg = SomaMessageBuilder::ack_v1_success("req-1");
        assert_eq!(msg["status"], "success");
        assert!(msg.get("error").is_none());
    }

    #[test]
    fn test_adapt_command_embeds_params() {
        let msg = SomaMessageBuilder::adapt_v1("req-2", "g4t1", "change_frequency", json!({"frequency": 2.0}));
        assert_eq!(msg["adaptation"], "change_frequency");
        assert_eq!(msg["params"]["frequency"], 2.0);
    }
}
