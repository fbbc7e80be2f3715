/*!
Capteur simulé scriptable.

Joue le rôle d'un composant BSN complet côté bus : il s'annonce,
émet des échantillons, et répond aux commandes d'adaptation par un
ack. En mode `rejecting`, il refuse toute commande avec un motif
fixe, pour éprouver le chemin d'erreur de la boucle.
*/

use crate::messages::SomaMessageBuilder;
use serde_json::Value;

pub struct SensorSim {
    name: String,
    metrics: Vec<String>,
    frequency: f64, // Hz, modifiée par change_frequency
    refusal: Option<String>,
    received: Vec<(String, Value)>,
}

impl SensorSim {
    pub fn new(name: &str, metrics: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            frequency: 1.0,
            refusal: None,
            received: Vec::new(),
        }
    }

    /// Variante qui refuse toute commande avec ce motif.
    pub fn rejecting(name: &str, metrics: &[&str], message: &str) -> Self {
        let mut sim = Self::new(name, metrics);
        sim.refusal = Some(message.to_string());
        sim
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fréquence d'échantillonnage courante.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Commandes acceptées jusqu'ici : (adaptation, params).
    pub fn received(&self) -> &[(String, Value)] {
        &self.received
    }

    pub fn announce(&self) -> Value {
        let metrics: Vec<&str> = self.metrics.iter().map(String::as_str).collect();
        SomaMessageBuilder::announce_v1(&self.name, &metrics, true)
    }

    pub fn bye(&self) -> Value {
        SomaMessageBuilder::bye_v1(&self.name)
    }

    pub fn sample(&self, metric: &str, value: f64) -> Value {
        SomaMessageBuilder::sample_v1(&self.name, metric, value)
    }

    /// Traite une commande d'adaptation et rend l'ack à publier.
    ///
    /// Le simulateur accepte n'importe quel type d'adaptation et
    /// l'enregistre ; seule `change_frequency` a un effet visible
    /// (la fréquence change).
    pub fn handle_adapt(&mut self, command: &Value) -> Value {
        let request_id = command["request_id"].as_str().unwrap_or_default().to_string();

        let adaptation = match command["adaptation"].as_str() {
            Some(a) => a.to_string(),
            None => {
                return SomaMessageBuilder::ack_v1_error(&request_id, "commande sans adaptation");
            }
        };

        if let Some(addressee) = command["component"].as_str() {
            if addressee != self.name {
                log::info!("🙈 [SIM {}] commande pour '{}', ignorée", self.name, addressee);
                return SomaMessageBuilder::ack_v1_error(
                    &request_id,
                    &format!("command addressed to '{addressee}'"),
                );
            }
        }

        if let Some(message) = &self.refusal {
            log::info!("🛑 [SIM {}] refuse {}: {}", self.name, adaptation, message);
            return SomaMessageBuilder::ack_v1_error(&request_id, message);
        }

        let params = command.get("params").cloned().unwrap_or(Value::Null);
        if adaptation == "change_frequency" {
            if let Some(frequency) = params["frequency"].as_f64() {
                self.frequency = frequency;
            }
        }
        log::info!("⚙️ [SIM {}] applique {}", self.name, adaptation);
        self.received.push((adaptation, params));
        SomaMessageBuilder::ack_v1_success(&request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_change_frequency_takes_effect() {
        init_logs();
        let mut sim = SensorSim::new("g4t1", &["temperature"]);
        assert_eq!(sim.frequency(), 1.0);

        let command =
            SomaMessageBuilder::adapt_v1("req-1", "g4t1", "change_frequency", json!({"frequency": 2.5}));
        let ack = sim.handle_adapt(&command);

        assert_eq!(ack["status"], "success");
        assert_eq!(ack["request_id"], "req-1");
        assert_eq!(sim.frequency(), 2.5);
        assert_eq!(sim.received().len(), 1);
        assert_eq!(sim.received()[0].0, "change_frequency");
    }

    #[test]
    fn test_rejecting_sim_refuses_with_its_motive() {
        init_logs();
        let mut sim = SensorSim::rejecting("g4t1", &["temperature"], "sensor saturated");
        let command =
            SomaMessageBuilder::adapt_v1("req-2", "g4t1", "change_frequency", json!({"frequency": 2.0}));
        let ack = sim.handle_adapt(&command);

        assert_eq!(ack["status"], "error");
        assert_eq!(ack["error"], "sensor saturated");
        assert!(sim.received().is_empty());
        assert_eq!(sim.frequency(), 1.0);
    }

    #[test]
    fn test_command_for_another_component_is_refused() {
        init_logs();
        let mut sim = SensorSim::new("g4t1", &["temperature"]);
        let command = SomaMessageBuilder::adapt_v1("req-3", "g9x9", "change_frequency", json!({}));
        let ack = sim.handle_adapt(&command);

        assert_eq!(ack["status"], "error");
        assert!(sim.received().is_empty());
    }

    #[test]
    fn test_command_without_adaptation_gets_an_error_ack() {
        init_logs();
        let mut sim = SensorSim::new("g4t1", &["temperature"]);
        let ack = sim.handle_adapt(&json!({"request_id": "req-4", "component": "g4t1"}));

        assert_eq!(ack["status"], "error");
        assert_eq!(ack["request_id"], "req-4");
    }

    #[test]
    fn test_unknown_adaptation_kind_is_still_recorded() {
        init_logs();
        let mut sim = SensorSim::new("g4t1", &["temperature"]);
        let command = SomaMessageBuilder::adapt_v1("req-5", "g4t1", "recalibrate", json!({"offset": 0.3}));
        let ack = sim.handle_adapt(&command);

        assert_eq!(ack["status"], "success");
        assert_eq!(sim.received()[0].0, "recalibrate");
        assert_eq!(sim.received()[0].1["offset"], 0.3);
        assert_eq!(sim.frequency(), 1.0);
    }

    #[test]
    fn test_session_messages_delegate_to_the_builders() {
        let sim = SensorSim::new("g4t1", &["temperature", "pulse"]);
        assert_eq!(sim.announce()["metrics"][1], "pulse");
        assert_eq!(sim.bye()["component"], "g4t1");
        assert_eq!(sim.sample("pulse", 72.0)["value"], 72.0);
    }
}
