// ─── DNS captive ───
//
// Mientras el dispositivo es Access Point, cualquier nombre resuelve a su
// propia IP. Así el sistema operativo del teléfono abre el portal de setup
// solo. Solo armamos la respuesta; el socket UDP lo maneja el firmware.

use std::net::Ipv4Addr;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_SECS: u32 = 60;

fn be16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(at)?, *buf.get(at + 1)?]))
}

/// Respuesta para una query estándar, o `None` si no hay que contestar.
///
/// Solo se responde la primera pregunta. Queries que no son A/ANY reciben
/// una respuesta vacía (NOERROR sin answers).
pub fn answer(query: &[u8], ip: Ipv4Addr) -> Option<Vec<u8>> {
    let flags = be16(query, 2)?;
    let is_response = flags & 0x8000 != 0;
    let opcode = (flags >> 11) & 0x0f;
    if is_response || opcode != 0 || be16(query, 4)? == 0 {
        return None;
    }

    // Nombre de la pregunta: etiquetas hasta el byte 0 (sin compresión)
    let mut pos = HEADER_LEN;
    loop {
        let len = *query.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1 + len;
    }
    let qtype = be16(query, pos)?;
    let qclass = be16(query, pos + 2)?;
    let question_end = pos + 4;

    let resolves = (qtype == TYPE_A || qtype == TYPE_ANY) && qclass == CLASS_IN;

    let mut out = Vec::with_capacity(question_end + 16);
    out.extend_from_slice(&query[0..2]);
    // QR=1, AA=1, RD copiado, RA=1, RCODE=0
    let rd = flags & 0x0100;
    out.extend_from_slice(&(0x8400 | rd | 0x0080).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&u16::from(resolves).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&query[HEADER_LEN..question_end]);

    if resolves {
        out.extend_from_slice(&[0xC0, 0x0C]);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&ip.octets());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(name: &str, qtype: u16) -> Vec<u8> {
        let mut q = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        for label in name.split('.') {
            q.push(label.len() as u8);
            q.extend_from_slice(label.as_bytes());
        }
        q.push(0);
        q.extend_from_slice(&qtype.to_be_bytes());
        q.extend_from_slice(&CLASS_IN.to_be_bytes());
        q
    }

    #[test]
    fn a_query_resolves_to_access_point() {
        let q = query("connectivitycheck.gstatic.com", TYPE_A);
        let r = answer(&q, Ipv4Addr::new(192, 168, 4, 1)).unwrap();
        assert_eq!(&r[0..2], &[0x12, 0x34]);
        assert_eq!(r[2] & 0x80, 0x80);
        assert_eq!(&r[6..8], &[0, 1]);
        assert_eq!(&r[12..q.len()], &q[12..]);
        assert_eq!(&r[r.len() - 4..], &[192, 168, 4, 1]);
    }

    #[test]
    fn aaaa_query_gets_empty_answer() {
        let q = query("example.com", 28);
        let r = answer(&q, Ipv4Addr::new(192, 168, 4, 1)).unwrap();
        assert_eq!(&r[6..8], &[0, 0]);
        assert_eq!(r.len(), q.len());
    }

    #[test]
    fn responses_and_truncated_packets_are_ignored() {
        let mut q = query("a.b", TYPE_A);
        assert!(answer(&q[..14], Ipv4Addr::LOCALHOST).is_none());
        q[2] |= 0x80;
        assert!(answer(&q, Ipv4Addr::LOCALHOST).is_none());
    }
}
