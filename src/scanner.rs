/**
 * ORCHESTRATEUR DE DÉCOUVERTE - Passes de scan et de rafraîchissement
 *
 * RÔLE : Éventail sur les plages configurées, hôtes .1 à .254, une tâche
 * par plage et un pool borné (sémaphore, largeur configurée) par plage.
 * Les plages tournent en parallèle entre elles. Chaque OLT identifiée est
 * commitée à l'inventaire dès que sa tâche termine — pas de barrière
 * globale avant visibilité des résultats partiels.
 *
 * Le superviseur est l'unique écrivain déclencheur : il consomme les
 * commandes (scan à la demande via l'API) et le tick périodique de
 * rafraîchissement sur un seul canal mpsc.
 */

use crate::config::MonitorConfig;
use crate::identify::Identifier;
use crate::inventory::InventoryStore;
use crate::liveness::ScanNotice;
use crate::models::{DiscoveryAuth, ScanTarget};
use crate::shell::ShellConnector;
use crate::snmp::SnmpTransport;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub enum ScanCommand {
    Scan,
    Refresh,
}

pub struct Scanner<S: SnmpTransport + 'static, C: ShellConnector + 'static> {
    identifier: Arc<Identifier<S, C>>,
    store: Arc<InventoryStore>,
    cfg: MonitorConfig,
}

impl<S: SnmpTransport + 'static, C: ShellConnector + 'static> Scanner<S, C> {
    pub fn new(
        identifier: Arc<Identifier<S, C>>,
        store: Arc<InventoryStore>,
        cfg: MonitorConfig,
    ) -> Self {
        Self {
            identifier,
            store,
            cfg,
        }
    }

    /// Une passe de découverte complète ; retourne la taille de
    /// l'inventaire une fois toutes les plages drainées.
    pub async fn scan_pass(&self) -> usize {
        info!(
            "démarrage d'une passe de scan ({} plages)",
            self.cfg.scan_ranges.len()
        );
        let mut ranges = Vec::new();
        for rango in self.cfg.scan_ranges.clone() {
            let identifier = self.identifier.clone();
            let store = self.store.clone();
            let width = self.cfg.pool_width.max(1);
            ranges.push(tokio::spawn(async move {
                debug!("scan de la plage {rango}*");
                let pool = Arc::new(Semaphore::new(width));
                let mut tasks = Vec::new();
                for host in 1u16..=254 {
                    let target = ScanTarget {
                        ip: format!("{rango}{host}"),
                        rango: rango.clone(),
                    };
                    let Ok(permit) = pool.clone().acquire_owned().await else {
                        break;
                    };
                    let identifier = identifier.clone();
                    let store = store.clone();
                    tasks.push(tokio::spawn(async move {
                        let _permit = permit;
                        let Ok(ip) = target.ip.parse::<IpAddr>() else {
                            return;
                        };
                        if let Some(olt) = identifier.identify(ip, &store).await {
                            info!("OLT détectée: {} (plage {}*)", olt.ip, target.rango);
                            store.upsert_olt(olt);
                        }
                    }));
                }
                for t in tasks {
                    let _ = t.await;
                }
            }));
        }
        for r in ranges {
            let _ = r.await;
        }
        let total = self.store.len();
        info!("passe de scan terminée, {total} OLT en inventaire");
        total
    }

    /// Rafraîchit toutes les OLT inventoriées via le même pool borné.
    /// Protocole de la découverte d'abord ; en cas d'échec SNMP, repli
    /// sur le premier credential shell configuré. Une OLT muette garde
    /// son dernier état connu, elle n'est jamais retirée.
    pub async fn refresh_pass(&self) -> usize {
        let olts = self.store.list_olts();
        let pool = Arc::new(Semaphore::new(self.cfg.pool_width.max(1)));
        let mut tasks = Vec::new();
        for mut olt in olts {
            let Ok(permit) = pool.clone().acquire_owned().await else {
                break;
            };
            let identifier = self.identifier.clone();
            let store = self.store.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let refreshed = match olt.descubrimiento {
                    Some(DiscoveryAuth::Snmp { .. }) => {
                        identifier.snmp.refresh(&mut olt).await
                            || identifier.shell.refresh_with(&mut olt, &store, 0).await
                    }
                    _ => identifier.shell.refresh(&mut olt, &store).await,
                };
                if refreshed {
                    store.upsert_olt(olt);
                }
                refreshed
            }));
        }
        let mut refreshed = 0;
        for t in tasks {
            if let Ok(true) = t.await {
                refreshed += 1;
            }
        }
        info!("{refreshed} OLT rafraîchies");
        refreshed
    }
}

/// Tâche superviseur : scans à la demande + refresh périodique.
pub fn spawn_supervisor<S, C>(
    scanner: Arc<Scanner<S, C>>,
    mut commands: mpsc::Receiver<ScanCommand>,
    notices: mpsc::Sender<ScanNotice>,
    refresh_interval: Duration,
) where
    S: SnmpTransport + 'static,
    C: ShellConnector + 'static,
{
    tokio::task::spawn(async move {
        let mut tick = tokio::time::interval(refresh_interval);
        tick.tick().await; // le premier tick part immédiatement
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ScanCommand::Scan) => {
                        let pass_id = Uuid::new_v4().to_string();
                        let _ = notices
                            .send(ScanNotice::ScanStarted { pass_id: pass_id.clone() })
                            .await;
                        let total_olts = scanner.scan_pass().await;
                        let _ = notices
                            .send(ScanNotice::ScanCompleted { pass_id, total_olts })
                            .await;
                    }
                    Some(ScanCommand::Refresh) => {
                        let refreshed = scanner.refresh_pass().await;
                        let _ = notices
                            .send(ScanNotice::RefreshCompleted { refreshed })
                            .await;
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    let refreshed = scanner.refresh_pass().await;
                    debug!("refresh périodique: {refreshed} OLT");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credential;
    use crate::prober::tests::{test_store, ScriptedConnector, ScriptedSnmp};
    use crate::prober::{ShellProber, SnmpProber};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Réseau simulé : SNMP répond pour .5 et .9 de la boucle locale,
    /// le port shell ne répond nulle part (connexions refusées).
    fn scripted_network() -> ScriptedSnmp {
        let mut answers = HashMap::new();
        for suffix in [5u8, 9] {
            answers.insert(
                (format!("127.0.0.{suffix}/public"), "descr".to_string()),
                "V-SOL V1600G GPON OLT".to_string(),
            );
            answers.insert(
                (format!("127.0.0.{suffix}/public"), "name".to_string()),
                format!("OLT-{suffix}"),
            );
        }
        ScriptedSnmp { answers }
    }

    fn test_scanner() -> Scanner<ScriptedSnmp, ScriptedConnector> {
        let cfg = MonitorConfig {
            scan_ranges: vec!["127.0.0.".into()],
            pool_width: 20,
            ..MonitorConfig::default()
        };
        let snmp = SnmpProber::new(scripted_network(), vec!["public".into()]);
        let shell = ShellProber::new(
            ScriptedConnector {
                accepted_password: "jamais".into(),
                replies: Arc::new(HashMap::new()),
                attempts: Arc::new(Mutex::new(Vec::new())),
            },
            vec![Credential {
                username: "admin".into(),
                password: "admin".into(),
            }],
        );
        // port 1 : refusé immédiatement sur la boucle locale
        let identifier = Arc::new(Identifier::new(snmp, shell, 1));
        Scanner::new(identifier, Arc::new(test_store()), cfg)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_passes_on_unchanged_network_are_idempotent() {
        let scanner = test_scanner();
        let first = scanner.scan_pass().await;
        assert_eq!(first, 2);
        let second = scanner.scan_pass().await;
        assert_eq!(second, 2);

        let olt = scanner.store.get_olt("127.0.0.5").unwrap();
        assert_eq!(olt.nombre, "OLT-5");
        assert!(scanner.store.get_olt("127.0.0.9").is_some());
        assert!(scanner.store.get_olt("127.0.0.6").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snmp_refresh_updates_record() {
        let scanner = test_scanner();
        scanner.scan_pass().await;
        let refreshed = scanner.refresh_pass().await;
        // les deux OLT SNMP répondent encore
        assert_eq!(refreshed, 2);
        assert_eq!(scanner.store.len(), 2);
    }

    #[tokio::test]
    async fn silent_device_keeps_last_known_record() {
        let scanner = test_scanner();
        // OLT connue dont plus rien ne répond (ni SNMP ni shell)
        scanner.store.upsert_olt(crate::models::OltInfo::new(
            "127.0.0.200",
            "OLT-MUETTE",
            "V1600G",
        ));
        let refreshed = scanner.refresh_pass().await;
        assert_eq!(refreshed, 0);
        assert_eq!(
            scanner.store.get_olt("127.0.0.200").unwrap().nombre,
            "OLT-MUETTE"
        );
    }
}
