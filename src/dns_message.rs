//! Minimal DNS message wire framing.
//!
//! Hand-rolled rather than pulled from a full resolver-grade library: the
//! wire shape this crate needs is narrow (one question, zero-or-one TXT
//! answer, no compression), and the rest of the crate never looks at raw
//! DNS bytes directly — only at the `qname`/`rdata` strings this module
//! hands it.

use crate::errors::{Result, TunnelError};

/// TXT record type.
pub const QTYPE_TXT: u16 = 16;
/// Internet class.
pub const QCLASS_IN: u16 = 1;

/// RCODE: no error.
pub const RCODE_NOERROR: u8 = 0;
/// RCODE: format error — malformed query.
pub const RCODE_FORMERR: u8 = 1;
/// RCODE: server failure — upstream fetch failed.
pub const RCODE_SERVFAIL: u8 = 2;

const HEADER_LEN: usize = 12;
const ANSWER_TTL: u32 = 300;

/// A parsed DNS query's question, plus the header fields the server must echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub transaction_id: u16,
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
    pub rd: bool,
}

/// A parsed DNS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub transaction_id: u16,
    pub rcode: u8,
    /// Decoded TXT character-strings from the answer section, one per answer.
    pub answers: Vec<String>,
}

fn encode_labels(name: &str, out: &mut Vec<u8>) -> Result<()> {
    for label in name.split('.') {
        if label.len() > 63 {
            return Err(TunnelError::NameTooLong(format!(
                "label {label:?} exceeds 63 octets"
            )));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Decode dot-separated labels starting at `pos`; returns `(name, pos_after_terminator)`.
fn decode_labels(buf: &[u8], mut pos: usize) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    loop {
        let len = *buf
            .get(pos)
            .ok_or_else(|| TunnelError::InvalidQuery("truncated qname".to_string()))? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        // A compression pointer (top two bits set) has no place in messages
        // this crate emits; reject rather than chase an offset.
        if len & 0xC0 != 0 {
            return Err(TunnelError::InvalidQuery(
                "unsupported compressed qname".to_string(),
            ));
        }
        pos += 1;
        let end = pos
            .checked_add(len)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| TunnelError::InvalidQuery("label overruns packet".to_string()))?;
        let label = std::str::from_utf8(&buf[pos..end])
            .map_err(|e| TunnelError::InvalidQuery(format!("non-utf8 label: {e}")))?;
        labels.push(label.to_string());
        pos = end;
    }
    Ok((labels.join("."), pos))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    let b = buf
        .get(pos..pos + 2)
        .ok_or_else(|| TunnelError::InvalidQuery("truncated packet".to_string()))?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    let b = buf
        .get(pos..pos + 4)
        .ok_or_else(|| TunnelError::InvalidQuery("truncated packet".to_string()))?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Build a standard query: `RD=1`, one question, `QTYPE=TXT`, `QCLASS=IN`.
pub fn build_query(qname: &str, transaction_id: u16) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(HEADER_LEN + qname.len() + 8);
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // RD=1, everything else 0
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    encode_labels(qname, &mut packet)?;
    packet.extend_from_slice(&QTYPE_TXT.to_be_bytes());
    packet.extend_from_slice(&QCLASS_IN.to_be_bytes());
    Ok(packet)
}

/// Parse an inbound query packet.
pub fn parse_query(packet: &[u8]) -> Result<ParsedQuery> {
    if packet.len() < HEADER_LEN {
        return Err(TunnelError::InvalidQuery("packet shorter than header".to_string()));
    }
    let transaction_id = read_u16(packet, 0)?;
    let flags = read_u16(packet, 2)?;
    let rd = flags & 0x0100 != 0;
    let qdcount = read_u16(packet, 4)?;
    if qdcount != 1 {
        return Err(TunnelError::InvalidQuery(format!(
            "expected exactly one question, got QDCOUNT={qdcount}"
        )));
    }

    let (qname, pos) = decode_labels(packet, HEADER_LEN)?;
    let qtype = read_u16(packet, pos)?;
    let qclass = read_u16(packet, pos + 2)?;

    Ok(ParsedQuery {
        transaction_id,
        qname,
        qtype,
        qclass,
        rd,
    })
}

/// Best-effort transaction id and RD bit from a packet's fixed-size header,
/// for replying to a query too malformed for [`parse_query`] to make sense
/// of a question from.
pub fn peek_header(packet: &[u8]) -> Option<(u16, bool)> {
    let transaction_id = read_u16(packet, 0).ok()?;
    let flags = read_u16(packet, 2).ok()?;
    Some((transaction_id, flags & 0x0100 != 0))
}

/// An answer-less `FORMERR` response built from only a transaction id and RD
/// bit, for queries too malformed to echo a question section back.
pub fn build_formerr_header_only(transaction_id: u16, rd: bool) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN);
    packet.extend_from_slice(&transaction_id.to_be_bytes());

    let rd_bit: u16 = if rd { 0x0100 } else { 0 };
    let flags: u16 = 0x8000 // QR
        | 0x0400 // AA
        | rd_bit
        | (u16::from(RCODE_FORMERR) & 0x000F);
    packet.extend_from_slice(&flags.to_be_bytes());

    packet.extend_from_slice(&0u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    packet
}

/// Build a response echoing `query`'s transaction id, question, and RD bit.
///
/// `answer` is `Some(txt)` for a successful reply (one TXT answer, TTL 300)
/// or `None` for an answer-less error reply (`rcode` should then be
/// [`RCODE_FORMERR`] or [`RCODE_SERVFAIL`]).
pub fn build_response(query: &ParsedQuery, rcode: u8, answer: Option<&str>) -> Result<Vec<u8>> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&query.transaction_id.to_be_bytes());

    let rd_bit: u16 = if query.rd { 0x0100 } else { 0 };
    let flags: u16 = 0x8000 // QR
        | 0x0400 // AA
        | rd_bit
        | (u16::from(rcode) & 0x000F);
    packet.extend_from_slice(&flags.to_be_bytes());

    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    let ancount: u16 = if answer.is_some() { 1 } else { 0 };
    packet.extend_from_slice(&ancount.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    encode_labels(&query.qname, &mut packet)?;
    packet.extend_from_slice(&query.qtype.to_be_bytes());
    packet.extend_from_slice(&query.qclass.to_be_bytes());

    if let Some(txt) = answer {
        encode_labels(&query.qname, &mut packet)?;
        packet.extend_from_slice(&QTYPE_TXT.to_be_bytes());
        packet.extend_from_slice(&QCLASS_IN.to_be_bytes());
        packet.extend_from_slice(&ANSWER_TTL.to_be_bytes());

        let txt_bytes = txt.as_bytes();
        if txt_bytes.len() > 255 {
            return Err(TunnelError::NameTooLong(
                "TXT character-string exceeds 255 octets".to_string(),
            ));
        }
        let mut rdata = Vec::with_capacity(txt_bytes.len() + 1);
        rdata.push(txt_bytes.len() as u8);
        rdata.extend_from_slice(txt_bytes);

        packet.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        packet.extend_from_slice(&rdata);
    }

    Ok(packet)
}

/// Parse a response packet, decoding every TXT answer's character-strings.
pub fn parse_response(packet: &[u8]) -> Result<ParsedResponse> {
    if packet.len() < HEADER_LEN {
        return Err(TunnelError::InvalidQuery("packet shorter than header".to_string()));
    }
    let transaction_id = read_u16(packet, 0)?;
    let flags = read_u16(packet, 2)?;
    let rcode = (flags & 0x000F) as u8;
    let qdcount = read_u16(packet, 4)?;
    let ancount = read_u16(packet, 6)?;

    let mut pos = HEADER_LEN;
    if qdcount > 0 {
        let (_, next) = decode_labels(packet, pos)?;
        pos = next + 4; // QTYPE + QCLASS
    }

    let mut answers = Vec::new();
    for _ in 0..ancount {
        // Echo format never uses pointers, but tolerate one for robustness.
        if packet.get(pos) == Some(&0xC0) {
            pos += 2;
        } else {
            let (_, next) = decode_labels(packet, pos)?;
            pos = next;
        }
        let rtype = read_u16(packet, pos)?;
        pos += 2;
        let _rclass = read_u16(packet, pos)?;
        pos += 2;
        let _ttl = read_u32(packet, pos)?;
        pos += 4;
        let rdlength = read_u16(packet, pos)? as usize;
        pos += 2;
        let rdata = packet
            .get(pos..pos + rdlength)
            .ok_or_else(|| TunnelError::InvalidQuery("rdata overruns packet".to_string()))?;
        pos += rdlength;

        if rtype == QTYPE_TXT {
            let mut text = String::new();
            let mut i = 0;
            while i < rdata.len() {
                let len = rdata[i] as usize;
                i += 1;
                let end = i
                    .checked_add(len)
                    .filter(|&e| e <= rdata.len())
                    .ok_or_else(|| TunnelError::InvalidQuery("txt string overruns rdata".to_string()))?;
                text.push_str(
                    std::str::from_utf8(&rdata[i..end])
                        .map_err(|e| TunnelError::InvalidQuery(format!("non-utf8 txt: {e}")))?,
                );
                i = end;
            }
            answers.push(text);
        }
    }

    Ok(ParsedResponse {
        transaction_id,
        rcode,
        answers,
    })
}
