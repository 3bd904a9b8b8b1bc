/**
 * INVENTAIRE - Map autoritaire des OLT découvertes
 *
 * RÔLE : Unique propriétaire de l'état partagé muté par les tâches de
 * scan concurrentes. Toute lecture-modification-écriture de la map passe
 * par le Mutex interne ; les probers et l'orchestrateur ne reçoivent
 * jamais de référence dans la map, seulement des valeurs.
 *
 * Chaque upsert est miroité de façon synchrone vers la persistance ;
 * un échec de persistance est loggé au niveau error et la vue mémoire
 * est mise à jour quand même (cohérence au-moins-en-mémoire).
 */

use crate::models::{now_rfc3339, AggregateStats, MetricKind, OltInfo, OnuInfo};
use crate::state::{new_state, Shared};
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub type OltsMap = HashMap<String, OltInfo>;

pub struct InventoryStore {
    olts: Shared<OltsMap>,
    storage: Arc<dyn Storage>,
    low_signal_dbm: f64,
}

impl InventoryStore {
    pub fn new(storage: Arc<dyn Storage>, low_signal_dbm: f64) -> Self {
        Self {
            olts: new_state(HashMap::new()),
            storage,
            low_signal_dbm,
        }
    }

    /// Recharge au démarrage les OLT déjà persistées, avec leurs ONU.
    pub fn hydrate(&self) {
        match self.storage.list_olts() {
            Ok(olts) => {
                let mut map = self.olts.lock();
                for mut olt in olts {
                    match self.storage.list_onus(&olt.ip) {
                        Ok(onus) => {
                            olt.onus_detalladas = onus;
                            olt.recompute_port_counts();
                        }
                        Err(e) => warn!("rechargement ONU de {}: {e}", olt.ip),
                    }
                    map.insert(olt.ip.clone(), olt);
                }
                info!("{} OLT rechargées depuis la base", map.len());
            }
            Err(e) => error!("rechargement de l'inventaire impossible: {e}"),
        }
    }

    pub fn upsert_olt(&self, olt: OltInfo) {
        if let Err(e) = self.storage.upsert_olt(&olt) {
            error!("persistance OLT {}: {e}", olt.ip);
        }
        self.olts.lock().insert(olt.ip.clone(), olt);
    }

    /// Upsert par serial ; si l'OLT parente est déjà en inventaire, sa
    /// liste détaillée est mise à jour au fil de l'eau (progrès partiel
    /// conservé même si une ligne ultérieure du relevé échoue).
    pub fn upsert_onu(&self, onu: OnuInfo, olt_ip: &str) {
        if let Err(e) = self.storage.upsert_onu(&onu, olt_ip) {
            error!("persistance ONU {}: {e}", onu.serial);
        }
        let mut map = self.olts.lock();
        if let Some(olt) = map.get_mut(olt_ip) {
            match olt.onus_detalladas.iter_mut().find(|o| o.serial == onu.serial) {
                Some(existing) => *existing = onu,
                None => olt.onus_detalladas.push(onu),
            }
            olt.recompute_port_counts();
        }
    }

    pub fn record_metric(&self, olt_ip: &str, kind: MetricKind, value: f64) {
        if let Err(e) = self.storage.insert_metric(olt_ip, kind.as_str(), value) {
            error!("persistance métrique {} {}: {e}", olt_ip, kind.as_str());
        }
    }

    pub fn record_traffic(&self, olt_ip: &str, onu_serial: &str, bytes_rx: i64, bytes_tx: i64) {
        if let Err(e) = self
            .storage
            .insert_traffic(olt_ip, onu_serial, bytes_rx, bytes_tx)
        {
            error!("persistance trafic {onu_serial}: {e}");
        }
    }

    pub fn list_olts(&self) -> Vec<OltInfo> {
        self.olts.lock().values().cloned().collect()
    }

    pub fn get_olt(&self, ip: &str) -> Option<OltInfo> {
        self.olts.lock().get(ip).cloned()
    }

    pub fn list_onus(&self, ip: &str) -> Vec<OnuInfo> {
        self.olts
            .lock()
            .get(ip)
            .map(|olt| olt.onus_detalladas.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.olts.lock().len()
    }

    /// Vue agrégée : signal faible = rx_power strictement sous le seuil.
    pub fn stats(&self) -> AggregateStats {
        let map = self.olts.lock();
        let total_onus: usize = map.values().map(|o| o.total_onus).sum();
        let onus_senal_baja = map
            .values()
            .flat_map(|o| &o.onus_detalladas)
            .filter(|onu| onu.rx_power < self.low_signal_dbm)
            .count();
        AggregateStats {
            total_olts: map.len(),
            total_onus,
            olts_online: map.len(),
            onus_senal_baja,
            ultima_actualizacion: now_rfc3339(),
        }
    }

    /// Détail d'une OLT enrichi des séries récentes pour le dashboard.
    pub fn olt_for_web(&self, ip: &str) -> Option<serde_json::Value> {
        let olt = self.get_olt(ip)?;
        let mut value = serde_json::to_value(&olt).ok()?;
        let obj = value.as_object_mut()?;

        let temp = self
            .storage
            .recent_metrics(ip, MetricKind::Temperatura.as_str(), 10)
            .unwrap_or_else(|e| {
                warn!("métriques température {ip}: {e}");
                vec![]
            });
        let cpu = self
            .storage
            .recent_metrics(ip, MetricKind::Cpu.as_str(), 10)
            .unwrap_or_else(|e| {
                warn!("métriques cpu {ip}: {e}");
                vec![]
            });
        let trafico = self.storage.recent_traffic(ip, 20).unwrap_or_else(|e| {
            warn!("trafic récent {ip}: {e}");
            vec![]
        });

        obj.insert(
            "metricas_temperatura".into(),
            serde_json::to_value(temp).unwrap_or_default(),
        );
        obj.insert(
            "metricas_cpu".into(),
            serde_json::to_value(cpu).unwrap_or_default(),
        );
        obj.insert(
            "trafico_reciente".into(),
            serde_json::to_value(trafico).unwrap_or_default(),
        );
        Some(value)
    }
}
