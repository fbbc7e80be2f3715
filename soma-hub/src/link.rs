/**
 * MQTT LINK - Canal de commande hub → composants via le bus
 *
 * RÔLE :
 * Implémentation de production du trait ComponentLink. Publie les
 * commandes d'adaptation sur le bus et corrèle les acquittements qui
 * reviennent, par request_id.
 *
 * FONCTIONNEMENT :
 * - Chaque commande part avec un request_id unique (uuid v4)
 * - Un canal oneshot attend l'ack correspondant
 * - L'ingestion bus route les acks vers handle_ack
 * - Sans ack dans le délai, la commande est un refus
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::dispatch::ComponentLink;
use crate::error::{HubError, HubResult};
use crate::models::{AckIn, AdaptCommand};
use crate::mqtt::TOPIC_ADAPT;

pub struct MqttLink {
    mqtt_client: AsyncClient,
    /// request_id -> canal de l'appelant en attente d'ack
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<AckIn>>>>,
    ack_timeout: Duration,
}

impl MqttLink {
    pub fn new(mqtt_client: AsyncClient, ack_timeout: Duration) -> Self {
        Self {
            mqtt_client,
            pending: Arc::new(Mutex::new(HashMap::new())),
            ack_timeout,
        }
    }

    /// Route un acquittement vers l'appelant qui l'attend. Les acks
    /// orphelins (timeout déjà parti, ou doublon) sont juste signalés.
    pub fn handle_ack(&self, ack: AckIn) {
        let mut pending = self.pending.lock();
        match pending.remove(&ack.request_id) {
            Some(sender) => {
                let request_id = ack.request_id.clone();
                if sender.send(ack).is_err() {
                    eprintln!("[link] ack receiver already gone for request {}", request_id);
                }
            }
            None => {
                eprintln!("[link] ack for unknown request {}", ack.request_id);
            }
        }
    }

    #[cfg(test)]
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl ComponentLink for MqttLink {
    async fn apply(&self, component: &str, adaptation: &str, params: &Value) -> HubResult<()> {
        let request_id = Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let command = AdaptCommand {
            request_id: request_id.clone(),
            component: component.to_string(),
            adaptation: adaptation.to_string(),
            params: params.clone(),
            ts: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        let payload = match serde_json::to_string(&command) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.lock().remove(&request_id);
                return Err(HubError::ComponentRejected(format!(
                    "failed to encode command: {e}"
                )));
            }
        };

        if let Err(e) = self
            .mqtt_client
            .publish(TOPIC_ADAPT, QoS::AtLeastOnce, false, payload)
            .await
        {
            self.pending.lock().remove(&request_id);
            return Err(HubError::ComponentRejected(format!(
                "bus publish failed: {e}"
            )));
        }
        println!(
            "[link] sent {} to {} (request {})",
            adaptation, component, request_id
        );

        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) if ack.status == "success" => Ok(()),
            Ok(Ok(ack)) => Err(HubError::ComponentRejected(
                ack.error
                    .unwrap_or_else(|| "rejected without detail".to_string()),
            )),
            Ok(Err(_)) => {
                // Canal fermé sans envoi
                self.pending.lock().remove(&request_id);
                Err(HubError::ComponentRejected(
                    "ack channel closed".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(HubError::ComponentRejected(format!(
                    "no acknowledgement from {} within {:?}",
                    component, self.ack_timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;
    use serde_json::json;

    fn test_link(ack_timeout: Duration) -> (Arc<MqttLink>, rumqttc::EventLoop) {
        let opts = MqttOptions::new("soma-hub-test", "localhost", 1883);
        let (client, eventloop) = AsyncClient::new(opts, 16);
        (Arc::new(MqttLink::new(client, ack_timeout)), eventloop)
    }

    #[tokio::test]
    async fn test_success_ack_completes_the_command() {
        // L'eventloop n'est pas pollée : publish s'empile, c'est suffisant
        let (link, _eventloop) = test_link(Duration::from_secs(2));

        let apply = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                link.apply("g4t1", "change_frequency", &json!({"frequency": 10.0}))
                    .await
            })
        };

        let request_id = loop {
            let ids = link.pending_ids();
            match ids.first() {
                Some(id) => break id.clone(),
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };

        link.handle_ack(AckIn {
            request_id,
            status: "success".to_string(),
            error: None,
        });

        apply.await.unwrap().unwrap();
        assert!(link.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_error_ack_surfaces_the_component_message() {
        let (link, _eventloop) = test_link(Duration::from_secs(2));

        let apply = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                link.apply("g4t1", "change_frequency", &json!({"frequency": 10.0}))
                    .await
            })
        };

        let request_id = loop {
            match link.pending_ids().first() {
                Some(id) => break id.clone(),
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };

        link.handle_ack(AckIn {
            request_id,
            status: "error".to_string(),
            error: Some("device busy".to_string()),
        });

        let err = apply.await.unwrap().unwrap_err();
        match err {
            HubError::ComponentRejected(message) => assert_eq!(message, "device busy"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_ack_times_out_and_cleans_up() {
        let (link, _eventloop) = test_link(Duration::from_millis(50));

        let err = link
            .apply("g4t1", "change_frequency", &json!({"frequency": 10.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ComponentRejected(_)));
        assert!(link.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_short_circuits() {
        let (link, eventloop) = test_link(Duration::from_secs(5));
        drop(eventloop);

        let started = std::time::Instant::now();
        let err = link
            .apply("g4t1", "change_frequency", &json!({"frequency": 10.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ComponentRejected(_)));
        // Pas d'attente d'ack quand l'envoi lui-même a échoué
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(link.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_orphan_ack_is_ignored() {
        let (link, _eventloop) = test_link(Duration::from_secs(2));
        link.handle_ack(AckIn {
            request_id: "nobody-waits-for-me".to_string(),
            status: "success".to_string(),
            error: None,
        });
        assert!(link.pending_ids().is_empty());
    }
}
