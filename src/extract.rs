/**
 * EXTRACTEUR DE TÉLÉMÉTRIE - Heuristiques texte -> valeurs
 *
 * RÔLE : Transformer la sortie libre des commandes CLI des OLT en champs
 * structurés (température, pourcentages, serial, puissance optique).
 *
 * FONCTIONNEMENT : Scan ligne par ligne, premier match gagnant, détection
 * par sous-chaîne insensible à la casse. L'absence de match renvoie une
 * sentinelle documentée, jamais une erreur.
 *
 * LIMITE ASSUMÉE : Les firmwares OLT produisent des formats variables et
 * non machine-readable ; on privilégie la résilience à la précision.
 * Plafond de justesse connu, pas un bug à corriger en durcissant les matchs.
 */

use time::macros::format_description;
use time::OffsetDateTime;

/// Sentinelle "pas de lecture" pour la puissance optique (dBm).
/// Distincte de None : une puissance est toujours rapportée.
pub const NO_SIGNAL_DBM: f64 = -999.0;

/// Vocabulaire fixe identifiant un équipement cible dans du texte libre
/// (sortie "show version" ou sysDescr SNMP).
pub const DEVICE_MARKERS: &[&str] = &["VSOL", "V-SOL", "GPON", "OLT"];

pub fn matches_device_marker(text: &str) -> bool {
    let up = text.to_uppercase();
    DEVICE_MARKERS.iter().any(|m| up.contains(m))
}

/// Un token "numérique" : non vide une fois '.' et '-' retirés, et
/// uniquement des chiffres ASCII ensuite.
fn looks_numeric(token: &str) -> bool {
    let bare: String = token.chars().filter(|c| *c != '.' && *c != '-').collect();
    !bare.is_empty() && bare.chars().all(|c| c.is_ascii_digit())
}

fn first_numeric_token(line: &str) -> Option<f64> {
    line.split_whitespace()
        .filter(|t| looks_numeric(t))
        .find_map(|t| t.parse::<f64>().ok())
}

/// Température en °C : première ligne contenant "temperature",
/// premier token numérique signé.
pub fn temperature(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.to_lowercase().contains("temperature") {
            if let Some(v) = first_numeric_token(line) {
                return Some(v);
            }
        }
    }
    None
}

/// Pourcentage (CPU ou mémoire) : premier token contenant '%',
/// le '%' retiré puis parsé en décimal.
pub fn percentage(output: &str) -> Option<f64> {
    for line in output.lines() {
        if !line.contains('%') {
            continue;
        }
        for token in line.split_whitespace() {
            if token.contains('%') {
                if let Ok(v) = token.replace('%', "").parse::<f64>() {
                    return Some(v);
                }
            }
        }
    }
    None
}

/// Serial d'ONU : première ligne contenant "serial" ou "sn",
/// dernier token de la ligne.
pub fn serial(output: &str) -> Option<String> {
    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("serial") || lower.contains("sn") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 1 {
                return Some(parts[parts.len() - 1].to_string());
            }
        }
    }
    None
}

fn optical_power(output: &str, direction: &str) -> f64 {
    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains(direction) && lower.contains("power") {
            if let Some(v) = first_numeric_token(line) {
                return v;
            }
        }
    }
    NO_SIGNAL_DBM
}

/// Puissance optique reçue (dBm), sentinelle NO_SIGNAL_DBM si absente.
pub fn rx_power(output: &str) -> f64 {
    optical_power(output, "rx")
}

/// Puissance optique émise (dBm), sentinelle NO_SIGNAL_DBM si absente.
pub fn tx_power(output: &str) -> f64 {
    optical_power(output, "tx")
}

/// Nom système : dernier token de la première ligne "hostname"/"nombre" ;
/// repli synthétique "OLT-<HHMM>" sinon.
pub fn system_name(output: &str) -> String {
    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("hostname") || lower.contains("nombre") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 1 {
                return parts[parts.len() - 1].to_string();
            }
        }
    }
    let fmt = format_description!("[hour][minute]");
    let hhmm = OffsetDateTime::now_utc().format(&fmt).unwrap_or_default();
    format!("OLT-{hhmm}")
}

/// Modèle : première ligne "model"/"hardware" tronquée à 50 caractères ;
/// repli "VSOL-OLT".
pub fn model(output: &str) -> String {
    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("model") || lower.contains("hardware") {
            return clip(line.trim(), 50);
        }
    }
    "VSOL-OLT".to_string()
}

pub fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
