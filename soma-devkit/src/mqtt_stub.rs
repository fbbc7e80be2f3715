/*!
Client MQTT simulé pour développer un composant sans broker.

Enregistre tout ce que le composant publie, et ne délivre un message
injecté que si un abonnement le couvre (wildcards `+` et `#` compris),
comme le ferait un vrai broker.
*/

use anyhow::Result;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl BusMessage {
    /// Payload décodé en JSON, si c'en est.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Teste si un topic concret tombe sous un filtre MQTT.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut fp = filter.split('/');
    let mut tp = topic.split('/');
    loop {
        match (fp.next(), tp.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Client simulé, clonable comme `rumqttc::AsyncClient`.
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<BusMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    incoming_sender: Arc<Mutex<Option<mpsc::UnboundedSender<BusMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            incoming_sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Ouvre le canal sur lequel arrivent les messages injectés.
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<BusMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.incoming_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Signature alignée sur `AsyncClient::publish`.
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        self.published_messages.lock().unwrap().push(message.clone());
        log::info!("📤 [MOCK] publish {} ({} octets)", message.topic, message.payload.len());
        Ok(())
    }

    /// Signature alignée sur `AsyncClient::subscribe`.
    pub async fn subscribe<S: Into<String>>(&self, filter: S, _qos: QoS) -> Result<()> {
        let filter = filter.into();
        self.subscriptions.lock().unwrap().push(filter.clone());
        log::info!("📥 [MOCK] subscribe {}", filter);
        Ok(())
    }

    /// Injecte un message entrant. Délivré seulement si un abonnement
    /// couvre le topic, sinon il tombe au sol comme chez un broker.
    pub fn inject<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        let covered = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|filter| topic_matches(filter, &message.topic));
        if !covered {
            log::info!("📭 [MOCK] {} sans abonnement, message ignoré", message.topic);
            return Ok(());
        }

        if let Some(sender) = self.incoming_sender.lock().unwrap().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("canal fermé: {}", e))?;
        }
        log::info!("📨 [MOCK] incoming {}", message.topic);
        Ok(())
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Messages publiés sur un topic exact.
    pub fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Dernier message JSON publié sur un topic, désérialisé.
    pub fn last_json_on<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.published_on(topic);
        match messages.last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }

    /// Oublie messages et abonnements enregistrés.
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}
