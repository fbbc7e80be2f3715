/**
 * COMPONENT BUS - Ingestion MQTT des composants capteurs
 *
 * RÔLE : Écouter les contrats components.* du bus et les traduire en
 * opérations sur le NodeService : announce → upsert, bye → départ,
 * sample → buffer, ack → corrélation de commande.
 *
 * FONCTIONNEMENT : Une task tokio polle l'eventloop rumqttc. Le
 * décodage et l'aiguillage sont dans handle_publish, synchrone et
 * testable sans broker. Un payload invalide est signalé puis ignoré,
 * jamais fatal.
 */

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task;

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::link::MqttLink;
use crate::models::{AckIn, AnnounceIn, ByeIn, SampleIn};
use crate::node::{NodeService, UpsertOutcome};
use crate::registry::ComponentSpec;

// Contrats du bus, versionnés
pub const TOPIC_ANNOUNCE: &str = "soma/components/announce@v1";
pub const TOPIC_BYE: &str = "soma/components/bye@v1";
pub const TOPIC_SAMPLE: &str = "soma/components/sample@v1";
pub const TOPIC_ACK: &str = "soma/components/ack@v1";
pub const TOPIC_ADAPT: &str = "soma/components/adapt@v1";
pub const TOPIC_HEALTH: &str = "soma/hub/health@v1";

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new("soma-hub", &conf.host, conf.port);
    opts.set_keep_alive(std::time::Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

pub fn spawn_component_bus(
    service: Arc<NodeService>,
    link: Arc<MqttLink>,
    health: HealthTracker,
    client: AsyncClient,
    mut eventloop: EventLoop,
) {
    task::spawn(async move {
        for topic in [TOPIC_ANNOUNCE, TOPIC_BYE, TOPIC_SAMPLE, TOPIC_ACK] {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                eprintln!("[bus] subscribe {topic} failed: {e:?}");
                return;
            }
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handle_publish(&service, &link, &p.topic, &p.payload);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    println!("[bus] connected to broker");
                }
                Ok(_) => {}
                Err(e) => {
                    health.mark_mqtt_disconnected();
                    eprintln!("[bus] MQTT erreur: {e:?}");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Aiguille un message du bus vers le service.
pub fn handle_publish(service: &NodeService, link: &MqttLink, topic: &str, payload: &[u8]) {
    let txt = match std::str::from_utf8(payload) {
        Ok(txt) => txt,
        Err(_) => {
            eprintln!("[bus] payload non UTF-8 sur {topic}");
            return;
        }
    };

    match topic {
        TOPIC_ANNOUNCE => match serde_json::from_str::<AnnounceIn>(txt) {
            Ok(msg) => {
                let name = msg.component.clone();
                let spec = ComponentSpec {
                    name: msg.component,
                    metrics: msg.metrics,
                    adaptable: msg.adaptable,
                };
                match service.upsert_component(spec) {
                    Ok(UpsertOutcome::Registered) => {
                        println!("[bus] component {name} joined");
                    }
                    Ok(UpsertOutcome::Replaced) => {
                        println!("[bus] component {name} re-announced with a new shape");
                    }
                    Ok(UpsertOutcome::Refreshed) => {}
                    Err(e) => eprintln!("[bus] announce of {name} refused: {e}"),
                }
            }
            Err(_) => eprintln!("[bus] announce JSON invalide: {txt}"),
        },
        TOPIC_BYE => match serde_json::from_str::<ByeIn>(txt) {
            Ok(msg) => match service.deregister_component(&msg.component) {
                Ok(()) => println!("[bus] component {} left", msg.component),
                Err(e) => eprintln!("[bus] bye from {} refused: {e}", msg.component),
            },
            Err(_) => eprintln!("[bus] bye JSON invalide: {txt}"),
        },
        TOPIC_SAMPLE => match serde_json::from_str::<SampleIn>(txt) {
            Ok(msg) => {
                let timestamp = match OffsetDateTime::parse(&msg.ts, &Rfc3339) {
                    Ok(timestamp) => timestamp,
                    Err(_) => {
                        eprintln!("[bus] sample ts invalide: {}", msg.ts);
                        return;
                    }
                };
                if let Err(e) = service.push_sample(&msg.component, &msg.metric, msg.value, timestamp)
                {
                    eprintln!("[bus] sample refused: {e}");
                }
            }
            Err(_) => eprintln!("[bus] sample JSON invalide: {txt}"),
        },
        TOPIC_ACK => match serde_json::from_str::<AckIn>(txt) {
            Ok(ack) => link.handle_ack(ack),
            Err(_) => eprintln!("[bus] ack JSON invalide: {txt}"),
        },
        _ => {}
    }
}
