/**
 * IDENTIFICATION - Décision par adresse candidate
 *
 * RÔLE : Pour une adresse, tenter SNMP d'abord (un seul aller-retour,
 * le moins cher), puis sonder le port CLI en TCP et déléguer au prober
 * shell si le port répond. Aucune des deux voies ne matche : l'adresse
 * ne produit rien — ni enregistrement, ni log d'erreur, ni retry dans
 * la même passe.
 */

use crate::inventory::InventoryStore;
use crate::models::OltInfo;
use crate::prober::{ShellProber, SnmpProber};
use crate::shell::ShellConnector;
use crate::snmp::SnmpTransport;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Identifier<S: SnmpTransport, C: ShellConnector> {
    pub snmp: SnmpProber<S>,
    pub shell: ShellProber<C>,
    shell_port: u16,
}

impl<S: SnmpTransport, C: ShellConnector> Identifier<S, C> {
    pub fn new(snmp: SnmpProber<S>, shell: ShellProber<C>, shell_port: u16) -> Self {
        Self {
            snmp,
            shell,
            shell_port,
        }
    }

    pub async fn identify(&self, ip: IpAddr, store: &InventoryStore) -> Option<OltInfo> {
        if let Some(olt) = self.snmp.probe(ip).await {
            return Some(olt);
        }
        if !port_open(ip, self.shell_port, PORT_PROBE_TIMEOUT).await {
            debug!("{ip}: aucun protocole ne répond");
            return None;
        }
        self.shell.probe(ip, store).await
    }
}

/// Sonde TCP bornée : seul un connect accepté compte comme port ouvert.
pub async fn port_open(ip: IpAddr, port: u16, wait: Duration) -> bool {
    matches!(
        timeout(wait, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn port_open_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(port_open(ip, port, Duration::from_secs(1)).await);
        drop(listener);
        assert!(!port_open(ip, port, Duration::from_secs(1)).await);
    }
}
