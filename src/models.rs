use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Noms de champs en espagnol : compatibilité avec le schéma BD et les
/// payloads consommés par le dashboard existant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnuInfo {
    pub serial: String,
    pub interfaz: String,
    pub slot: String,
    pub puerto: String,
    pub rx_power: f64,
    pub tx_power: f64,
    pub estado: String,
    pub ultima_actualizacion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OltInfo {
    pub ip: String,
    pub nombre: String,
    pub modelo: String,
    pub temperatura: Option<f64>,
    pub consumo_cpu: Option<f64>,
    pub consumo_memoria: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descubrimiento: Option<DiscoveryAuth>,
    pub total_onus: usize,
    pub onus_por_puerto: HashMap<String, usize>,
    pub onus_detalladas: Vec<OnuInfo>,
}

/// Méthode de découverte et jeton d'authentification associé.
/// Champ explicite : jamais une community SNMP et un index de credential
/// en même temps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "metodo", rename_all = "snake_case")]
pub enum DiscoveryAuth {
    Snmp { community: String },
    Shell { credential_index: usize },
}

impl OltInfo {
    pub fn new(ip: impl Into<String>, nombre: impl Into<String>, modelo: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            nombre: nombre.into(),
            modelo: modelo.into(),
            temperatura: None,
            consumo_cpu: None,
            consumo_memoria: None,
            descubrimiento: None,
            total_onus: 0,
            onus_por_puerto: HashMap::new(),
            onus_detalladas: vec![],
        }
    }

    /// Recalcule total_onus et le comptage par interface à partir de la
    /// liste détaillée, après une passe complète de relevé.
    pub fn recompute_port_counts(&mut self) {
        let mut conteo: HashMap<String, usize> = HashMap::new();
        for onu in &self.onus_detalladas {
            *conteo.entry(onu.interfaz.clone()).or_insert(0) += 1;
        }
        self.onus_por_puerto = conteo;
        self.total_onus = self.onus_detalladas.len();
    }
}

/// Cible de scan éphémère : une adresse + la plage d'origine.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub ip: String,
    pub rango: String,
}

#[derive(Debug, Clone, Copy)]
pub enum MetricKind {
    Temperatura,
    Cpu,
    Memoria,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Temperatura => "temperatura",
            MetricKind::Cpu => "cpu",
            MetricKind::Memoria => "memoria",
        }
    }
}

/// Vue agrégée servie au dashboard (GET /stats).
#[derive(Debug, Serialize)]
pub struct AggregateStats {
    pub total_olts: usize,
    pub total_onus: usize,
    pub olts_online: usize,
    #[serde(rename = "onus_señal_baja")]
    pub onus_senal_baja: usize,
    pub ultima_actualizacion: String,
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
