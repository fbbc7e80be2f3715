/**
 * SOMA HUB - Point d'entrée du nœud capteurs auto-adaptatif
 *
 * RÔLE : Orchestration de tous les modules : config, bus MQTT, service
 * du nœud, API REST, liveness et health.
 *
 * ARCHITECTURE : Event-driven via MQTT (composants) + API REST de
 * contrôle (boucle d'adaptation externe).
 * UTILITÉ : Un binaire par nœud, point d'administration unique.
 */

mod buffer;
mod config;
mod dispatch;
mod error;
mod health;
mod http;
mod link;
mod models;
mod mqtt;
mod node;
mod registry;
mod schema;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::link::MqttLink;
use crate::node::NodeService;
use crate::registry::ComponentSpec;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let cfg = load_config().await;

    // Client MQTT partagé entre l'ingestion et le lien de commande
    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);
    let command_link = Arc::new(MqttLink::new(
        mqtt_client.clone(),
        std::time::Duration::from_secs(5),
    ));

    let health_tracker = HealthTracker::new();
    let service = Arc::new(NodeService::new(&cfg, command_link.clone()));

    // Composants déclarés dans la config, inscrits avant le premier announce
    for declared in &cfg.components {
        let spec = ComponentSpec {
            name: declared.name.clone(),
            metrics: declared.metrics.clone(),
            adaptable: declared.adaptable,
        };
        match service.register_component(spec) {
            Ok(()) => println!("[hub] composant déclaré: {}", declared.name),
            Err(e) => eprintln!("[hub] composant {} refusé: {e}", declared.name),
        }
    }

    // Le bus remplit le service et route les acks vers le lien
    mqtt::spawn_component_bus(
        service.clone(),
        command_link.clone(),
        health_tracker.clone(),
        mqtt_client,
        eventloop,
    );

    // Balayage liveness du registre
    node::spawn_liveness_sweeper(service.clone(), cfg.liveness.clone());

    // Publication périodique du health sur le bus
    health_tracker.spawn_health_publisher(cfg.mqtt.clone(), service.clone());

    // Fabrique l'état unique pour Axum
    let app_state = AppState {
        service,
        health_tracker,
    };
    let app = http::build_router(app_state);

    let addr = cfg.bind_addr();
    println!("[hub] listening on http://{addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("serve http")?;
    Ok(())
}
