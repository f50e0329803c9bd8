//! Wire codec: QNAME/TXT grammar and the Internet checksum.
//!
//! Pure, total functions with no I/O — the only module shared by both the
//! client and server binaries.
//!
//! ```text
//! qname := command "." session "." "tunnel" "." "local"
//! command := "GET-" filename_labels | "ACK-" bit
//! txt := seq "|" base64payload "|" checksum
//! ```

use crate::errors::{Result, TunnelError};
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// Maximum octets in a single DNS label (RFC 1035).
pub const MAX_LABEL_LEN: usize = 63;
/// Maximum total QNAME length.
pub const MAX_NAME_LEN: usize = 255;
/// Maximum raw (pre-base64) octets per chunk.
pub const MAX_CHUNK_LEN: usize = 150;
/// Maximum octets of a single DNS TXT character-string.
pub const MAX_TXT_LEN: usize = 255;
/// Fixed QNAME suffix all tunnel queries share.
pub const TUNNEL_SUFFIX: &str = "tunnel.local";
/// Length of a session id.
pub const SESSION_ID_LEN: usize = 6;

const B64: base64::engine::general_purpose::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// The alternating-bit sequence tag carried on a TXT chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqTag {
    /// Non-terminal chunk, alternating `0`/`1`.
    Bit(u8),
    /// Final chunk of a session's resource.
    Done,
}

impl SeqTag {
    /// The bit this tag would advance to next, if it is not `Done`.
    pub fn as_bit(self) -> Option<u8> {
        match self {
            SeqTag::Bit(b) => Some(b),
            SeqTag::Done => None,
        }
    }
}

impl fmt::Display for SeqTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqTag::Bit(b) => write!(f, "{}", b),
            SeqTag::Done => write!(f, "DONE"),
        }
    }
}

impl FromStr for SeqTag {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "DONE" {
            return Ok(SeqTag::Done);
        }
        match s.parse::<u8>() {
            Ok(0) => Ok(SeqTag::Bit(0)),
            Ok(1) => Ok(SeqTag::Bit(1)),
            _ => Err(TunnelError::InvalidQuery(format!("bad sequence tag: {s}"))),
        }
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { filename: String, session: String },
    Ack { bit: u8, session: String },
}

fn validate_session(session: &str) -> Result<()> {
    let ok = session.len() == SESSION_ID_LEN
        && session
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(TunnelError::InvalidQuery(format!(
            "session id must be {SESSION_ID_LEN} chars from [a-z0-9], got {session:?}"
        )))
    }
}

/// Encode a `GET` request QNAME.
///
/// `filename` must not contain a literal `-` — it would be indistinguishable
/// from the `.`→`-` substitution on decode. Such names are rejected with
/// `InvalidName` rather than silently mangled.
pub fn encode_get(filename: &str, session: &str) -> Result<String> {
    if filename.contains('-') {
        return Err(TunnelError::InvalidName(format!(
            "filename {filename:?} contains '-', which is ambiguous with the '.' substitution"
        )));
    }
    validate_session(session)?;

    let command = format!("GET-{}", filename.replace('.', "-"));
    if command.len() > MAX_LABEL_LEN {
        return Err(TunnelError::NameTooLong(format!(
            "GET command label is {} octets, max {MAX_LABEL_LEN}",
            command.len()
        )));
    }

    let qname = format!("{command}.{session}.{TUNNEL_SUFFIX}");
    if qname.len() > MAX_NAME_LEN {
        return Err(TunnelError::NameTooLong(format!(
            "qname is {} octets, max {MAX_NAME_LEN}",
            qname.len()
        )));
    }
    Ok(qname)
}

/// Encode an `ACK` request QNAME.
pub fn encode_ack(bit: u8, session: &str) -> Result<String> {
    if bit > 1 {
        return Err(TunnelError::InvalidQuery(format!(
            "ack bit must be 0 or 1, got {bit}"
        )));
    }
    validate_session(session)?;

    let qname = format!("ACK-{bit}.{session}.{TUNNEL_SUFFIX}");
    if qname.len() > MAX_NAME_LEN {
        return Err(TunnelError::NameTooLong(format!(
            "qname is {} octets, max {MAX_NAME_LEN}",
            qname.len()
        )));
    }
    Ok(qname)
}

/// Decode a QNAME produced by [`encode_get`] or [`encode_ack`].
pub fn decode_request(qname: &str) -> Result<Request> {
    let stripped = qname.strip_suffix(&format!(".{TUNNEL_SUFFIX}")).ok_or_else(|| {
        TunnelError::InvalidQuery(format!("missing .{TUNNEL_SUFFIX} suffix in {qname:?}"))
    })?;

    let parts: Vec<&str> = stripped.split('.').collect();
    if parts.len() != 2 {
        return Err(TunnelError::InvalidQuery(format!(
            "expected 2 dot-separated fields before .{TUNNEL_SUFFIX}, got {} in {qname:?}",
            parts.len()
        )));
    }
    let (command, session) = (parts[0], parts[1]);
    validate_session(session)?;

    let mut tokens = command.split('-');
    let verb = tokens
        .next()
        .ok_or_else(|| TunnelError::InvalidQuery(format!("empty command in {qname:?}")))?;
    let args: Vec<&str> = tokens.collect();
    if args.is_empty() {
        return Err(TunnelError::InvalidQuery(format!(
            "command {command:?} has no arguments"
        )));
    }

    match verb {
        "GET" => {
            let filename = args.join(".");
            Ok(Request::Get {
                filename,
                session: session.to_string(),
            })
        }
        "ACK" => {
            if args.len() != 1 {
                return Err(TunnelError::InvalidQuery(format!(
                    "ACK command takes exactly one argument, got {}",
                    args.len()
                )));
            }
            let bit: u8 = args[0]
                .parse()
                .map_err(|_| TunnelError::InvalidQuery(format!("bad ack bit: {:?}", args[0])))?;
            if bit > 1 {
                return Err(TunnelError::InvalidQuery(format!("ack bit out of range: {bit}")));
            }
            Ok(Request::Ack {
                bit,
                session: session.to_string(),
            })
        }
        other => Err(TunnelError::InvalidQuery(format!("unknown verb {other:?}"))),
    }
}

/// Encode one chunk as a DNS TXT character-string.
pub fn encode_chunk(octets: &[u8], seq: SeqTag, checksum: &str) -> Result<String> {
    let payload = B64.encode(octets);
    let txt = format!("{seq}|{payload}|{checksum}");
    if txt.len() > MAX_TXT_LEN {
        return Err(TunnelError::NameTooLong(format!(
            "txt record is {} octets, max {MAX_TXT_LEN}",
            txt.len()
        )));
    }
    Ok(txt)
}

/// Decode a DNS TXT character-string produced by [`encode_chunk`].
pub fn decode_chunk(txt: &str) -> Result<(SeqTag, Vec<u8>, String)> {
    let fields: Vec<&str> = txt.split('|').collect();
    if fields.len() != 3 {
        return Err(TunnelError::InvalidQuery(format!(
            "expected 3 pipe-separated fields, got {} in {txt:?}",
            fields.len()
        )));
    }
    let (seq_str, payload_str, checksum) = (fields[0], fields[1], fields[2]);

    let seq = SeqTag::from_str(seq_str)?;
    let octets = B64
        .decode(payload_str)
        .map_err(|e| TunnelError::InvalidQuery(format!("bad base64 payload: {e}")))?;

    let checksum_ok = checksum.len() == 4
        && checksum
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if !checksum_ok {
        return Err(TunnelError::InvalidQuery(format!(
            "checksum must be 4 lowercase hex digits, got {checksum:?}"
        )));
    }

    Ok((seq, octets, checksum.to_string()))
}

/// RFC 1071 16-bit one's-complement Internet checksum over raw octets.
///
/// Pads with a trailing zero octet if `data` has odd length, sums 16-bit
/// big-endian words, folds carries until the sum fits in 16 bits, takes the
/// one's complement, and formats as four lowercase hex digits.
pub fn calculate_checksum(data: &[u8]) -> String {
    let mut padded;
    let words: &[u8] = if data.len() % 2 != 0 {
        padded = data.to_vec();
        padded.push(0);
        &padded
    } else {
        data
    };

    let mut sum: u32 = 0;
    for word in words.chunks_exact(2) {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    let checksum = !(sum as u16);
    format!("{checksum:04x}")
}

/// Split a resource into `ceil(N/150)`-octet chunks; only the last may be shorter.
pub fn chunk_resource(data: &[u8]) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return vec![Vec::new()];
    }
    data.chunks(MAX_CHUNK_LEN).map(|c| c.to_vec()).collect()
}
