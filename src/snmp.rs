/**
 * CLIENT SNMP - Transport UDP + codec BER minimal
 *
 * RÔLE : Une seule opération, le GET communautaire (SNMPv1, mpModel 0)
 * utilisé pour interroger sysDescr/sysName pendant la découverte.
 *
 * FONCTIONNEMENT : Encodage BER de la trame GetRequest, envoi UDP avec
 * timeout et retries fixés par la config, décodage de la GetResponse.
 * Tout échec (timeout, trame invalide, error-status non nul) est avalé
 * et rendu comme None : l'absence de réponse SNMP est un résultat
 * attendu du scan, pas une erreur.
 */

use crate::config::SnmpConf;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

pub const OID_SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const OID_SYS_NAME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_GET_REQUEST: u8 = 0xA0;
const TAG_GET_RESPONSE: u8 = 0xA2;

/// Couture de test : le prober SNMP est générique sur ce transport.
pub trait SnmpTransport: Send + Sync {
    fn get(
        &self,
        ip: IpAddr,
        community: &str,
        oid: &[u32],
    ) -> impl Future<Output = Option<String>> + Send;
}

/// Transport réel sur socket UDP, un datagramme aller-retour par requête.
pub struct UdpSnmp {
    conf: SnmpConf,
}

impl UdpSnmp {
    pub fn new(conf: SnmpConf) -> Self {
        Self { conf }
    }
}

impl SnmpTransport for UdpSnmp {
    async fn get(&self, ip: IpAddr, community: &str, oid: &[u32]) -> Option<String> {
        let request_id = rand::random::<u16>() as i32;
        let frame = encode_get_request(community, oid, request_id);
        let wait = Duration::from_secs(self.conf.timeout_secs);

        // retries + 1 tentatives au total, timeouts avalés
        for attempt in 0..=self.conf.retries {
            let sock = UdpSocket::bind("0.0.0.0:0").await.ok()?;
            sock.send_to(&frame, (ip, self.conf.port)).await.ok()?;
            let mut buf = [0u8; 1500];
            match timeout(wait, sock.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => return decode_get_response(&buf[..n], request_id),
                Ok(Err(e)) => {
                    debug!("SNMP recv {ip}: {e}");
                    return None;
                }
                Err(_) => {
                    debug!("SNMP timeout {ip} (tentative {})", attempt + 1);
                    continue;
                }
            }
        }
        None
    }
}

fn push_len(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
    } else if len < 256 {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    push_len(out, content.len());
    out.extend_from_slice(content);
}

/// Entier signé en complément à deux, forme minimale.
fn int_bytes(v: i64) -> Vec<u8> {
    let mut bytes = v.to_be_bytes().to_vec();
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    bytes
}

fn oid_bytes(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if oid.len() >= 2 {
        out.push((oid[0] * 40 + oid[1]) as u8);
    }
    for &arc in &oid[2.min(oid.len())..] {
        let mut stack = [0u8; 5];
        let mut n = 0;
        let mut v = arc;
        loop {
            stack[n] = (v & 0x7F) as u8;
            n += 1;
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            let mut b = stack[i];
            if i != 0 {
                b |= 0x80;
            }
            out.push(b);
        }
    }
    out
}

pub fn encode_get_request(community: &str, oid: &[u32], request_id: i32) -> Vec<u8> {
    let mut varbind = Vec::new();
    push_tlv(&mut varbind, TAG_OID, &oid_bytes(oid));
    push_tlv(&mut varbind, TAG_NULL, &[]);

    let mut vb_list = Vec::new();
    push_tlv(&mut vb_list, TAG_SEQUENCE, &varbind);

    let mut pdu = Vec::new();
    push_tlv(&mut pdu, TAG_INTEGER, &int_bytes(request_id as i64));
    push_tlv(&mut pdu, TAG_INTEGER, &int_bytes(0)); // error-status
    push_tlv(&mut pdu, TAG_INTEGER, &int_bytes(0)); // error-index
    push_tlv(&mut pdu, TAG_SEQUENCE, &vb_list);

    let mut msg = Vec::new();
    push_tlv(&mut msg, TAG_INTEGER, &int_bytes(0)); // version SNMPv1
    push_tlv(&mut msg, TAG_OCTET_STRING, community.as_bytes());
    push_tlv(&mut msg, TAG_GET_REQUEST, &pdu);

    let mut frame = Vec::new();
    push_tlv(&mut frame, TAG_SEQUENCE, &msg);
    frame
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn length(&mut self) -> Option<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Some(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 2 {
            return None;
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.byte()? as usize;
        }
        Some(len)
    }

    /// Lit un TLV complet, retourne (tag, contenu).
    fn tlv(&mut self) -> Option<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let len = self.length()?;
        let start = self.pos;
        let end = start.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        self.pos = end;
        Some((tag, &self.buf[start..end]))
    }
}

fn decode_int(content: &[u8]) -> Option<i64> {
    if content.is_empty() || content.len() > 8 {
        return None;
    }
    let mut v: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        v = (v << 8) | b as i64;
    }
    Some(v)
}

/// Décode une GetResponse et retourne la valeur du premier varbind,
/// rendue en chaîne. None si la trame ne correspond pas à la requête,
/// porte un error-status, ou une valeur d'exception (noSuchObject...).
pub fn decode_get_response(frame: &[u8], expected_request_id: i32) -> Option<String> {
    let mut outer = Reader::new(frame);
    let (tag, msg) = outer.tlv()?;
    if tag != TAG_SEQUENCE {
        return None;
    }

    let mut msg = Reader::new(msg);
    let (_, _version) = msg.tlv()?;
    let (_, _community) = msg.tlv()?;
    let (tag, pdu) = msg.tlv()?;
    if tag != TAG_GET_RESPONSE {
        return None;
    }

    let mut pdu = Reader::new(pdu);
    let (_, request_id) = pdu.tlv()?;
    if decode_int(request_id)? != expected_request_id as i64 {
        return None;
    }
    let (_, error_status) = pdu.tlv()?;
    if decode_int(error_status)? != 0 {
        return None;
    }
    let (_, _error_index) = pdu.tlv()?;
    let (tag, vb_list) = pdu.tlv()?;
    if tag != TAG_SEQUENCE {
        return None;
    }

    let mut vb_list = Reader::new(vb_list);
    let (tag, varbind) = vb_list.tlv()?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let mut varbind = Reader::new(varbind);
    let (_, _oid) = varbind.tlv()?;
    let (tag, value) = varbind.tlv()?;

    match tag {
        TAG_OCTET_STRING => Some(String::from_utf8_lossy(value).to_string()),
        TAG_INTEGER => decode_int(value).map(|v| v.to_string()),
        // IpAddress
        0x40 if value.len() == 4 => {
            Some(format!("{}.{}.{}.{}", value[0], value[1], value[2], value[3]))
        }
        // Counter32 / Gauge32 / TimeTicks : non signés
        0x41..=0x43 => {
            let mut v: u64 = 0;
            for &b in value {
                v = (v << 8) | b as u64;
            }
            Some(v.to_string())
        }
        // NULL et exceptions v2 (noSuchObject, noSuchInstance, endOfMibView)
        _ => None,
    }
}
