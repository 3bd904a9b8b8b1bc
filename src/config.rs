use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Préfixes de plages IP à scanner (ex: "192.168.1." -> hôtes .1 à .254)
    pub scan_ranges: Vec<String>,
    /// Credentials shell, essayés dans l'ordre
    pub credentials: Vec<Credential>,
    pub snmp: SnmpConf,
    /// Port TCP du CLI d'administration des OLT
    pub shell_port: u16,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Largeur du pool de tâches d'identification, par plage
    pub pool_width: usize,
    pub refresh_interval_secs: u64,
    pub liveness_interval_secs: u64,
    /// Seuil de signal faible en dBm (rx_power strictement inférieur)
    pub low_signal_dbm: f64,
    pub database_path: String,
    pub http_port: u16,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnmpConf {
    /// Community strings, essayées dans l'ordre
    pub communities: Vec<String>,
    pub port: u16,
    pub timeout_secs: u64,
    pub retries: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_ranges: vec![
                "10.0.0.".into(),
                "172.16.0.".into(),
                "192.168.0.".into(),
                "192.168.1.".into(),
                "192.168.100.".into(),
            ],
            credentials: vec![
                Credential { username: "admin".into(), password: "admin".into() },
                Credential { username: "admin".into(), password: "Admin123!".into() },
                Credential { username: "admin".into(), password: "vsol123".into() },
                Credential { username: "support".into(), password: "support".into() },
                Credential { username: "root".into(), password: "root".into() },
            ],
            snmp: SnmpConf {
                communities: vec!["public".into(), "private".into()],
                port: 161,
                timeout_secs: 2,
                retries: 1,
            },
            shell_port: 23,
            connect_timeout_secs: 10,
            read_timeout_secs: 5,
            pool_width: 20,
            refresh_interval_secs: 300,
            liveness_interval_secs: 30,
            low_signal_dbm: -27.0,
            database_path: "./data/ponwatch.db".into(),
            http_port: 8080,
            mqtt: Some(MqttConf { host: "localhost".into(), port: 1883 }),
        }
    }
}

pub async fn load_config() -> MonitorConfig {
    let path = std::env::var("PONWATCH_CONFIG").unwrap_or_else(|_| "ponwatch.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return MonitorConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            tracing::error!("config invalide ({path}): {e}");
            MonitorConfig::default()
        })
    } else {
        tracing::warn!("pas de {path}, usage config par défaut");
        MonitorConfig::default()
    }
}
