/**
 * PERSISTANCE - Miroir SQLite de l'inventaire
 *
 * RÔLE : Collaborateur de durabilité consommé par l'inventaire à travers
 * le trait Storage (upsert/append uniquement, aucun delete). Le schéma
 * reprend les quatre tables historiques : olts, onus, metricas, trafico.
 *
 * La connexion est protégée par un Mutex : rusqlite est synchrone et les
 * écritures restent courtes.
 */

use crate::models::{now_rfc3339, OltInfo, OnuInfo};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub valor: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficSample {
    pub onu_serial: String,
    pub bytes_rx: i64,
    pub bytes_tx: i64,
    pub timestamp: String,
}

/// Contrat consommé par l'inventaire ; sémantique upsert/append partout.
pub trait Storage: Send + Sync {
    fn upsert_olt(&self, olt: &OltInfo) -> Result<(), StorageError>;
    fn upsert_onu(&self, onu: &OnuInfo, olt_ip: &str) -> Result<(), StorageError>;
    fn insert_metric(&self, olt_ip: &str, kind: &str, value: f64) -> Result<(), StorageError>;
    fn insert_traffic(
        &self,
        olt_ip: &str,
        onu_serial: &str,
        bytes_rx: i64,
        bytes_tx: i64,
    ) -> Result<(), StorageError>;
    fn list_olts(&self) -> Result<Vec<OltInfo>, StorageError>;
    fn list_onus(&self, olt_ip: &str) -> Result<Vec<OnuInfo>, StorageError>;
    fn recent_metrics(
        &self,
        olt_ip: &str,
        kind: &str,
        limit: u32,
    ) -> Result<Vec<MetricSample>, StorageError>;
    fn recent_traffic(&self, olt_ip: &str, limit: u32) -> Result<Vec<TrafficSample>, StorageError>;
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS olts (
                ip TEXT PRIMARY KEY,
                nombre TEXT,
                modelo TEXT,
                ultima_actualizacion TIMESTAMP,
                creado_en TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS onus (
                serial TEXT PRIMARY KEY,
                olt_ip TEXT,
                interfaz TEXT,
                slot TEXT,
                puerto TEXT,
                rx_power REAL,
                tx_power REAL,
                estado TEXT,
                ultima_actualizacion TIMESTAMP,
                creado_en TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (olt_ip) REFERENCES olts (ip) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS metricas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                olt_ip TEXT,
                tipo_metrica TEXT,
                valor REAL,
                timestamp TIMESTAMP,
                FOREIGN KEY (olt_ip) REFERENCES olts (ip) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS trafico (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                olt_ip TEXT,
                onu_serial TEXT,
                bytes_rx INTEGER,
                bytes_tx INTEGER,
                timestamp TIMESTAMP,
                FOREIGN KEY (olt_ip) REFERENCES olts (ip) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Storage for SqliteStorage {
    fn upsert_olt(&self, olt: &OltInfo) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO olts (ip, nombre, modelo, ultima_actualizacion)
             VALUES (?1, ?2, ?3, ?4)",
            params![olt.ip, olt.nombre, olt.modelo, now_rfc3339()],
        )?;
        Ok(())
    }

    fn upsert_onu(&self, onu: &OnuInfo, olt_ip: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO onus
             (serial, olt_ip, interfaz, slot, puerto, rx_power, tx_power, estado, ultima_actualizacion)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                onu.serial,
                olt_ip,
                onu.interfaz,
                onu.slot,
                onu.puerto,
                onu.rx_power,
                onu.tx_power,
                onu.estado,
                onu.ultima_actualizacion,
            ],
        )?;
        Ok(())
    }

    fn insert_metric(&self, olt_ip: &str, kind: &str, value: f64) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO metricas (olt_ip, tipo_metrica, valor, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![olt_ip, kind, value, now_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_traffic(
        &self,
        olt_ip: &str,
        onu_serial: &str,
        bytes_rx: i64,
        bytes_tx: i64,
    ) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO trafico (olt_ip, onu_serial, bytes_rx, bytes_tx, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![olt_ip, onu_serial, bytes_rx, bytes_tx, now_rfc3339()],
        )?;
        Ok(())
    }

    fn list_olts(&self) -> Result<Vec<OltInfo>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT ip, nombre, modelo FROM olts ORDER BY creado_en DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(OltInfo::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_onus(&self, olt_ip: &str) -> Result<Vec<OnuInfo>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT serial, interfaz, slot, puerto, rx_power, tx_power, estado, ultima_actualizacion
             FROM onus WHERE olt_ip = ?1 ORDER BY interfaz, puerto",
        )?;
        let rows = stmt.query_map(params![olt_ip], |row| {
            Ok(OnuInfo {
                serial: row.get(0)?,
                interfaz: row.get(1)?,
                slot: row.get(2)?,
                puerto: row.get(3)?,
                rx_power: row.get(4)?,
                tx_power: row.get(5)?,
                estado: row.get(6)?,
                ultima_actualizacion: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn recent_metrics(
        &self,
        olt_ip: &str,
        kind: &str,
        limit: u32,
    ) -> Result<Vec<MetricSample>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT valor, timestamp FROM metricas
             WHERE olt_ip = ?1 AND tipo_metrica = ?2
             ORDER BY timestamp DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![olt_ip, kind, limit], |row| {
            Ok(MetricSample {
                valor: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn recent_traffic(&self, olt_ip: &str, limit: u32) -> Result<Vec<TrafficSample>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT onu_serial, bytes_rx, bytes_tx, timestamp FROM trafico
             WHERE olt_ip = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![olt_ip, limit], |row| {
            Ok(TrafficSample {
                onu_serial: row.get(0)?,
                bytes_rx: row.get(1)?,
                bytes_tx: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NO_SIGNAL_DBM;

    fn open_temp() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ponwatch.db");
        let storage = SqliteStorage::open(path.to_str().unwrap()).unwrap();
        (dir, storage)
    }

    #[test]
    fn olt_upsert_overwrites_by_ip() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-5", "V1600G"))
            .unwrap();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-CENTRO", "V1600G8"))
            .unwrap();
        let olts = storage.list_olts().unwrap();
        assert_eq!(olts.len(), 1);
        assert_eq!(olts[0].nombre, "OLT-CENTRO");
    }

    #[test]
    fn onu_round_trip() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-5", "V1600G"))
            .unwrap();
        let onu = OnuInfo {
            serial: "GPON00A1B2C3".into(),
            interfaz: "gpon0/1".into(),
            slot: "0".into(),
            puerto: "1".into(),
            rx_power: -21.4,
            tx_power: 2.3,
            estado: "online".into(),
            ultima_actualizacion: now_rfc3339(),
        };
        storage.upsert_onu(&onu, "10.0.0.5").unwrap();
        storage.upsert_onu(&onu, "10.0.0.5").unwrap();
        let onus = storage.list_onus("10.0.0.5").unwrap();
        assert_eq!(onus.len(), 1);
        assert_eq!(onus[0].rx_power, -21.4);
        assert!(storage.list_onus("10.0.0.99").unwrap().is_empty());
    }

    #[test]
    fn recent_metrics_respects_limit() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-5", "V1600G"))
            .unwrap();
        for i in 0..5 {
            storage
                .insert_metric("10.0.0.5", "temperatura", 40.0 + i as f64)
                .unwrap();
        }
        let samples = storage.recent_metrics("10.0.0.5", "temperatura", 3).unwrap();
        assert_eq!(samples.len(), 3);
        assert!(storage
            .recent_metrics("10.0.0.5", "cpu", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn traffic_appends() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-5", "V1600G"))
            .unwrap();
        storage
            .insert_traffic("10.0.0.5", "GPON00A1B2C3", 1000, 500)
            .unwrap();
        storage
            .insert_traffic("10.0.0.5", "GPON00A1B2C3", 2000, 700)
            .unwrap();
        let rows = storage.recent_traffic("10.0.0.5", 20).unwrap();
        assert_eq!(rows.len(), 2);
    }

    // le SQLite embarqué est compilé avec les clés étrangères actives :
    // aucune ligne fille ne doit précéder son OLT
    #[test]
    fn child_rows_require_parent_olt() {
        let (_dir, storage) = open_temp();
        assert!(storage.insert_metric("10.0.0.9", "cpu", 12.0).is_err());
        assert!(storage
            .insert_traffic("10.0.0.9", "GPON0001", 10, 10)
            .is_err());
    }

    #[test]
    fn sentinel_power_survives_round_trip() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_olt(&OltInfo::new("10.0.0.5", "OLT-5", "V1600G"))
            .unwrap();
        let onu = OnuInfo {
            serial: "UNKNOWN-gpon0/1-3".into(),
            interfaz: "gpon0/1".into(),
            slot: "0".into(),
            puerto: "1".into(),
            rx_power: NO_SIGNAL_DBM,
            tx_power: NO_SIGNAL_DBM,
            estado: "unknown".into(),
            ultima_actualizacion: now_rfc3339(),
        };
        storage.upsert_onu(&onu, "10.0.0.5").unwrap();
        let onus = storage.list_onus("10.0.0.5").unwrap();
        assert_eq!(onus[0].rx_power, NO_SIGNAL_DBM);
    }
}
