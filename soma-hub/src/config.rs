use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Configuration du hub, chargée depuis `hub.yaml` (ou le chemin donné
/// par `SOMA_HUB_CONFIG`). Chaque section a des défauts utilisables :
/// un hub sans fichier de config démarre quand même.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub http: HttpConf,
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default)]
    pub buffer: BufferConf,
    #[serde(default)]
    pub registry: RegistryConf,
    #[serde(default)]
    pub liveness: LivenessConf,
    /// Composants connus d'avance, enregistrés au démarrage sans
    /// attendre leur announce.
    #[serde(default)]
    pub components: Vec<ComponentConf>,
}

fn default_adaptable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConf {
    pub name: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default = "default_adaptable")]
    pub adaptable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConf {
    /// Taille d'anneau par composant (slots).
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConf {
    pub max_components: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConf {
    /// Au-delà, un composant silencieux passe inactif.
    pub inactive_after_secs: u64,
    /// Au-delà, il est désenregistré et son buffer libéré.
    pub evict_after_secs: u64,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7070,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
        }
    }
}

impl Default for BufferConf {
    fn default() -> Self {
        Self { capacity: 6 }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self { max_components: 20 }
    }
}

impl Default for LivenessConf {
    fn default() -> Self {
        Self {
            inactive_after_secs: 120,
            evict_after_secs: 3600,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            mqtt: MqttConf::default(),
            buffer: BufferConf::default(),
            registry: RegistryConf::default(),
            liveness: LivenessConf::default(),
            components: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

/// Charge la config YAML, avec repli silencieux sur les défauts.
pub async fn load_config() -> HubConfig {
    let path = std::env::var("SOMA_HUB_CONFIG").unwrap_or_else(|_| "hub.yaml".to_string());

    if !Path::new(&path).exists() {
        eprintln!("[config] pas de {path}, config par défaut");
        return HubConfig::default();
    }

    let cfg = match fs::read_to_string(&path).await {
        Ok(raw) => match serde_yaml::from_str::<HubConfig>(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("[config] config invalide ({path}): {e}");
                HubConfig::default()
            }
        },
        Err(e) => {
            eprintln!("[config] lecture {path} impossible: {e}");
            HubConfig::default()
        }
    };

    sanitize(cfg)
}

/// Un anneau de taille nulle ou un registre vide ne sont pas exploitables.
fn sanitize(mut cfg: HubConfig) -> HubConfig {
    if cfg.buffer.capacity == 0 {
        eprintln!("[config] buffer.capacity=0 ignoré, retour à 6");
        cfg.buffer.capacity = BufferConf::default().capacity;
    }
    if cfg.registry.max_components == 0 {
        eprintln!("[config] registry.max_components=0 ignoré, retour à 20");
        cfg.registry.max_components = RegistryConf::default().max_components;
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.http.port, 7070);
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.buffer.capacity, 6);
        assert_eq!(cfg.registry.max_components, 20);
        assert_eq!(cfg.liveness.inactive_after_secs, 120);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:7070");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults_elsewhere() {
        let raw = "buffer:\n  capacity: 12\nhttp:\n  host: 127.0.0.1\n  port: 8080\n";
        let cfg: HubConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.buffer.capacity, 12);
        assert_eq!(cfg.http.port, 8080);
        // Les sections absentes retombent sur les défauts
        assert_eq!(cfg.registry.max_components, 20);
        assert_eq!(cfg.mqtt.host, "localhost");
    }

    #[test]
    fn test_declared_components_parse() {
        let raw = "components:\n  - name: g4t1\n    metrics: [temperature, oxygenation]\n  - name: g3t1\n    adaptable: false\n";
        let cfg: HubConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.components.len(), 2);
        assert_eq!(cfg.components[0].metrics.len(), 2);
        assert!(cfg.components[0].adaptable);
        assert!(!cfg.components[1].adaptable);
        assert!(cfg.components[1].metrics.is_empty());
    }

    #[test]
    fn test_sanitize_rejects_zero_capacity() {
        let mut cfg = HubConfig::default();
        cfg.buffer.capacity = 0;
        cfg.registry.max_components = 0;
        let cfg = sanitize(cfg);
        assert_eq!(cfg.buffer.capacity, 6);
        assert_eq!(cfg.registry.max_components, 20);
    }
}
