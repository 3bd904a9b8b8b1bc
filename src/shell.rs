/**
 * TRANSPORT SHELL - Session CLI d'administration sur TCP
 *
 * RÔLE : Ouvrir une session authentifiée sur le CLI telnet-like des OLT,
 * dérouler le dialogue login/password, puis exécuter des commandes et
 * capturer leur sortie jusqu'au prompt.
 *
 * COUTURES : Le prober shell est générique sur ShellConnector/CommandRunner,
 * les tests injectent des sessions scriptées sans réseau.
 *
 * La session est la propriété exclusive de la tâche qui l'a ouverte et
 * doit être fermée sur tous ses chemins de sortie, échec compris.
 */

use crate::config::Credential;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("erreur réseau: {0}")]
    Io(#[from] std::io::Error),
    #[error("délai de lecture dépassé")]
    Timeout,
    #[error("authentification refusée")]
    AuthRejected,
    #[error("réponse inattendue: {0}")]
    Protocol(String),
}

/// Exécution de commandes sur une session ouverte.
pub trait CommandRunner: Send {
    fn run(&mut self, cmd: &str) -> impl Future<Output = Result<String, ProbeError>> + Send;
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Ouverture d'une session authentifiée vers une adresse.
pub trait ShellConnector: Send + Sync {
    type Session: CommandRunner + Send;
    fn connect(
        &self,
        ip: IpAddr,
        cred: &Credential,
    ) -> impl Future<Output = Result<Self::Session, ProbeError>> + Send;
}

/// Connecteur réel : TCP brut vers le port CLI configuré.
pub struct TcpShellConnector {
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ShellConnector for TcpShellConnector {
    type Session = ShellSession;

    async fn connect(&self, ip: IpAddr, cred: &Credential) -> Result<ShellSession, ProbeError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect((ip, self.port)))
            .await
            .map_err(|_| ProbeError::Timeout)??;
        let mut session = ShellSession {
            stream,
            read_timeout: self.read_timeout,
        };
        session.login(cred).await?;
        Ok(session)
    }
}

pub struct ShellSession {
    stream: TcpStream,
    read_timeout: Duration,
}

fn ends_with_prompt(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('>') | Some('#'))
}

impl ShellSession {
    async fn read_until<F>(&mut self, stop: F) -> Result<String, ProbeError>
    where
        F: Fn(&str) -> bool,
    {
        let mut acc: Vec<u8> = Vec::new();
        loop {
            let mut buf = [0u8; 4096];
            let n = timeout(self.read_timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| ProbeError::Timeout)??;
            if n == 0 {
                return Err(ProbeError::Protocol("connexion fermée par le pair".into()));
            }
            acc.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&acc).to_string();
            if stop(&text) {
                return Ok(text);
            }
        }
    }

    async fn login(&mut self, cred: &Credential) -> Result<(), ProbeError> {
        self.read_until(|t| {
            let l = t.to_lowercase();
            l.contains("login:") || l.contains("username:")
        })
        .await?;
        self.stream
            .write_all(format!("{}\n", cred.username).as_bytes())
            .await?;

        self.read_until(|t| t.to_lowercase().contains("password:")).await?;
        self.stream
            .write_all(format!("{}\n", cred.password).as_bytes())
            .await?;

        let resp = self
            .read_until(|t| {
                let l = t.to_lowercase();
                ends_with_prompt(t)
                    || l.contains("incorrect")
                    || l.contains("failed")
                    || l.contains("denied")
            })
            .await?;
        let lower = resp.to_lowercase();
        if lower.contains("incorrect") || lower.contains("failed") || lower.contains("denied") {
            return Err(ProbeError::AuthRejected);
        }
        Ok(())
    }
}

/// Retire l'écho de la commande et la ligne de prompt finale.
fn clean_output(cmd: &str, raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.first().is_some_and(|l| l.contains(cmd)) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| ends_with_prompt(l)) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

impl CommandRunner for ShellSession {
    async fn run(&mut self, cmd: &str) -> Result<String, ProbeError> {
        self.stream
            .write_all(format!("{cmd}\n").as_bytes())
            .await?;
        let mut acc: Vec<u8> = Vec::new();
        loop {
            let mut buf = [0u8; 4096];
            match timeout(self.read_timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    acc.extend_from_slice(&buf[..n]);
                    if ends_with_prompt(&String::from_utf8_lossy(&acc)) {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                // certains firmwares n'affichent pas de prompt propre :
                // sortie partielle acceptée si on a déjà reçu des octets
                Err(_) if !acc.is_empty() => break,
                Err(_) => return Err(ProbeError::Timeout),
            }
        }
        Ok(clean_output(cmd, &String::from_utf8_lossy(&acc)))
    }

    async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn prompt_detection() {
        assert!(ends_with_prompt("OLT> "));
        assert!(ends_with_prompt("V1600G#\r\n"));
        assert!(!ends_with_prompt("Password:"));
    }

    #[test]
    fn clean_output_strips_echo_and_prompt() {
        let raw = "show version\r\nV-SOL V1600G firmware 2.1\r\nOLT> ";
        assert_eq!(clean_output("show version", raw), "V-SOL V1600G firmware 2.1");
    }

    /// Serveur scripté qui joue le dialogue login/prompt d'une OLT.
    async fn fake_olt(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"Login: ").await.unwrap();
        let user = lines.next_line().await.unwrap().unwrap();
        write_half.write_all(b"Password: ").await.unwrap();
        let pass = lines.next_line().await.unwrap().unwrap();

        if user != "admin" || pass != "admin" {
            write_half.write_all(b"Login incorrect\n").await.unwrap();
            return;
        }
        write_half.write_all(b"OLT> ").await.unwrap();

        while let Ok(Some(cmd)) = lines.next_line().await {
            let reply = match cmd.as_str() {
                "show version" => "V-SOL V1600G GPON OLT\n",
                _ => "Invalid command\n",
            };
            write_half
                .write_all(format!("{cmd}\r\n{reply}OLT> ").as_bytes())
                .await
                .unwrap();
        }
    }

    fn connector(port: u16) -> TcpShellConnector {
        TcpShellConnector {
            port,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn login_and_run_against_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(fake_olt(listener));

        let cred = Credential {
            username: "admin".into(),
            password: "admin".into(),
        };
        let mut session = connector(port)
            .connect("127.0.0.1".parse().unwrap(), &cred)
            .await
            .unwrap();
        let out = session.run("show version").await.unwrap();
        assert!(out.contains("V1600G"));
        session.close().await;
    }

    #[tokio::test]
    async fn bad_password_is_auth_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(fake_olt(listener));

        let cred = Credential {
            username: "admin".into(),
            password: "mauvais".into(),
        };
        let err = connector(port)
            .connect("127.0.0.1".parse().unwrap(), &cred)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProbeError::AuthRejected));
    }
}
