use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

use crate::config::MqttConf;
use crate::mqtt::TOPIC_HEALTH;
use crate::node::NodeService;

/// Contrat `soma/hub/health@v1`, publié périodiquement sur le bus et
/// servi sur /system/health.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeHealth {
    pub uptime_seconds: u64,
    pub components_registered: u32,
    pub components_active: u32,
    pub samples_buffered: u32,
    pub buffer_capacity: u32,
    pub schema_generation: u64,
    pub schema_cache_generation: Option<u64>,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, service: &NodeService) -> NodeHealth {
        let components = service.components();
        let active = components.iter().filter(|c| c.active).count() as u32;

        NodeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            components_registered: components.len() as u32,
            components_active: active,
            samples_buffered: service.buffered_total() as u32,
            buffer_capacity: service.buffer_capacity() as u32,
            schema_generation: service.generation(),
            schema_cache_generation: service.cached_schema_generation(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Démarre la publication auto du health sur le bus.
    pub fn spawn_health_publisher(&self, conf: MqttConf, service: Arc<NodeService>) {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut opts = MqttOptions::new("soma-hub-health", &conf.host, conf.port);
            opts.set_keep_alive(Duration::from_secs(15));
            let (client, mut eventloop) = AsyncClient::new(opts, 10);

            let mut interval = tokio::time::interval(Duration::from_secs(30));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let health = health_tracker.get_health(&service);
                        if let Ok(payload) = serde_json::to_string(&health) {
                            if let Err(e) = client.publish(TOPIC_HEALTH, QoS::AtLeastOnce, false, payload).await {
                                eprintln!("[health] failed to publish: {e:?}");
                            } else {
                                println!(
                                    "[health] published node health (uptime: {}s, components: {})",
                                    health.uptime_seconds, health.components_registered
                                );
                            }
                        }
                    },
                    event = eventloop.poll() => {
                        match event {
                            Ok(_) => {}
                            Err(e) => {
                                eprintln!("[health] MQTT error: {e:?}");
                                health_tracker.increment_reconnects();
                                tokio::time::sleep(Duration::from_secs(2)).await;
                            }
                        }
                    }
                }
            }
        });
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return (kb as f32) / 1024.0;
                        }
                    }
                }
            }
        }
    }

    // Approximation hors Linux
    12.0
}
