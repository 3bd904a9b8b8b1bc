/**
 * PONWATCH - Point d'entrée du moniteur d'accès réseau optique
 *
 * RÔLE : Bootstrap complet : env, logging, config, persistance (fatale
 * si indisponible), inventaire, probers, superviseur de scan, canal
 * push MQTT et API REST.
 *
 * ARCHITECTURE : Scan concurrent par plages -> identification SNMP/shell
 * -> inventaire partagé -> miroir SQLite + lectures web + avis MQTT.
 */

mod config;
mod extract;
mod http;
mod identify;
mod inventory;
mod liveness;
mod models;
mod prober;
mod scanner;
mod shell;
mod snmp;
mod state;
mod storage;

use crate::config::load_config;
use crate::identify::Identifier;
use crate::inventory::InventoryStore;
use crate::prober::{ShellProber, SnmpProber};
use crate::scanner::{spawn_supervisor, Scanner};
use crate::shell::TcpShellConnector;
use crate::snmp::UdpSnmp;
use crate::storage::SqliteStorage;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ponwatch=info")),
        )
        .init();

    let cfg = load_config().await;

    // Persistance : la seule condition fatale du démarrage
    let storage = match SqliteStorage::open(&cfg.database_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("base de données indisponible ({}): {e}", cfg.database_path);
            std::process::exit(1);
        }
    };

    let store = Arc::new(InventoryStore::new(storage, cfg.low_signal_dbm));
    store.hydrate();

    let identifier = Arc::new(Identifier::new(
        SnmpProber::new(UdpSnmp::new(cfg.snmp.clone()), cfg.snmp.communities.clone()),
        ShellProber::new(
            TcpShellConnector {
                port: cfg.shell_port,
                connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
                read_timeout: Duration::from_secs(cfg.read_timeout_secs),
            },
            cfg.credentials.clone(),
        ),
        cfg.shell_port,
    ));
    let scanner = Arc::new(Scanner::new(identifier, store.clone(), cfg.clone()));

    // Superviseur : scans à la demande + refresh périodique
    let (scan_tx, scan_rx) = mpsc::channel(4);
    let (notice_tx, notice_rx) = mpsc::channel(16);
    spawn_supervisor(
        scanner,
        scan_rx,
        notice_tx,
        Duration::from_secs(cfg.refresh_interval_secs),
    );

    // Canal push consultatif
    liveness::spawn_liveness_publisher(&cfg, store.clone(), notice_rx);

    // HTTP
    let app = http::build_router(http::AppState { store, scan_tx });
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    info!("ponwatch à l'écoute sur http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("serveur HTTP")?;
    Ok(())
}
