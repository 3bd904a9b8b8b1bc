/**
 * CANAL PUSH - Avis de vie et statut de scan sur MQTT
 *
 * RÔLE : Publier à chaque tick (30 s par défaut) un avis de vie par OLT
 * connue sur ponwatch/olts/liveness@v1, et relayer les avis de début et
 * fin de passe sur ponwatch/scan/status@v1. Purement consultatif : ne
 * redéclenche jamais de découverte par lui-même.
 */

use crate::config::MonitorConfig;
use crate::inventory::InventoryStore;
use crate::models::now_rfc3339;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{info, warn};

const TOPIC_LIVENESS: &str = "ponwatch/olts/liveness@v1";
const TOPIC_SCAN_STATUS: &str = "ponwatch/scan/status@v1";

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanNotice {
    ScanStarted { pass_id: String },
    ScanCompleted { pass_id: String, total_olts: usize },
    RefreshCompleted { refreshed: usize },
}

pub fn spawn_liveness_publisher(
    cfg: &MonitorConfig,
    store: Arc<InventoryStore>,
    mut notices: mpsc::Receiver<ScanNotice>,
) {
    let Some(mqtt) = cfg.mqtt.clone() else {
        info!("MQTT désactivé, pas de canal push");
        return;
    };
    let tick_secs = cfg.liveness_interval_secs;

    task::spawn(async move {
        let mut opts = MqttOptions::new("ponwatch", &mqtt.host, mqtt.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        let mut tick = tokio::time::interval(Duration::from_secs(tick_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for olt in store.list_olts() {
                        let notice = serde_json::json!({
                            "ip": olt.ip,
                            "nombre": olt.nombre,
                            "total_onus": olt.total_onus,
                            "timestamp": now_rfc3339(),
                        });
                        if let Err(e) = client
                            .publish(TOPIC_LIVENESS, QoS::AtLeastOnce, false, notice.to_string())
                            .await
                        {
                            warn!("publication liveness: {e:?}");
                        }
                    }
                }
                notice = notices.recv() => match notice {
                    Some(n) => {
                        if let Ok(payload) = serde_json::to_string(&n) {
                            if let Err(e) = client
                                .publish(TOPIC_SCAN_STATUS, QoS::AtLeastOnce, false, payload)
                                .await
                            {
                                warn!("publication statut scan: {e:?}");
                            }
                        }
                    }
                    None => break,
                },
                event = eventloop.poll() => {
                    if let Err(e) = event {
                        warn!("MQTT erreur: {e:?}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
    });
}
