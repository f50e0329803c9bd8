//! Server state machine, fetch+chunk collaborator, and UDP listener.
//!
//! A `GET` always (re)starts a session at cursor 0 and answers with chunk 0;
//! an `ACK` whose bit matches the session's expected bit advances the cursor
//! and answers with the next chunk (or `DONE` once the cursor reaches the
//! end); any other `ACK` is idempotent retransmission of the current chunk.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::codec::{self, Request, SeqTag};
use crate::config::TunnelConfig;
use crate::dns_message::{self, ParsedQuery, RCODE_FORMERR, RCODE_NOERROR, RCODE_SERVFAIL};
use crate::errors::{Result, TunnelError};
use crate::logging::SessionLog;
use crate::session::{SessionRecord, SessionTable};

const MAX_DATAGRAM: usize = 512;

/// The out-of-scope HTTP fetch: treats `filename` (already `.`-restored) as
/// an `http://` URL path and splits the body into ≤150-octet chunks.
pub async fn fetch_and_chunk(filename: &str) -> Result<Vec<Vec<u8>>> {
    let url = format!("http://{filename}");
    let response = reqwest::get(&url)
        .await
        .map_err(|e| TunnelError::UpstreamFetchFailed(format!("request to {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(TunnelError::UpstreamFetchFailed(format!(
            "{url} returned status {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| TunnelError::UpstreamFetchFailed(format!("failed to read body of {url}: {e}")))?;

    Ok(codec::chunk_resource(&body))
}

fn seq_tag_for(cursor: usize, chunk_count: usize) -> SeqTag {
    if cursor + 1 >= chunk_count {
        SeqTag::Done
    } else {
        SeqTag::Bit((cursor % 2) as u8)
    }
}

fn chunk_answer(record: &SessionRecord) -> Result<String> {
    let chunk = record
        .current_chunk()
        .expect("chunks is non-empty and cursor stays within bounds");
    let checksum = codec::calculate_checksum(chunk);
    let seq = seq_tag_for(record.cursor, record.chunks.len());
    codec::encode_chunk(chunk, seq, &checksum)
}

/// `RD=1`, `QTYPE=TXT`, `QCLASS=IN` — the only question shape this server answers.
fn is_well_formed_question(query: &ParsedQuery) -> bool {
    query.rd && query.qtype == dns_message::QTYPE_TXT && query.qclass == dns_message::QCLASS_IN
}

/// One server, owning its session table and UDP socket.
pub struct Server {
    socket: UdpSocket,
    sessions: Arc<SessionTable>,
    idle_timeout: Duration,
}

impl Server {
    pub async fn bind(config: &TunnelConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind).await?;
        log::info!("tunnel server listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            sessions: Arc::new(SessionTable::new()),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    /// The address actually bound, useful when `config.bind` used port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the listener loop forever, alongside a background idle-session sweep.
    pub async fn run(self) -> Result<()> {
        let sessions = self.sessions.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            Self::reap_loop(sessions, idle_timeout).await;
        });

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    log::error!("recv_from failed: {e}");
                    continue;
                }
            };

            if let Err(e) = self.handle_datagram(&buf[..len], peer).await {
                log::warn!("error handling datagram from {peer}: {e}");
            }
        }
    }

    async fn reap_loop(sessions: Arc<SessionTable>, idle_timeout: Duration) {
        let sweep_interval = (idle_timeout / 2).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(sweep_interval).await;
            let reaped = sessions.reap_idle(idle_timeout).await;
            for (addr, session_id) in reaped {
                SessionLog::reaped(&session_id, addr);
                log::info!("reaped idle session {session_id} for {addr}");
            }
        }
    }

    async fn handle_datagram(&self, packet: &[u8], peer: SocketAddr) -> Result<()> {
        let query = match dns_message::parse_query(packet) {
            Ok(q) => q,
            Err(e) => {
                log::warn!("malformed DNS query from {peer}: {e}");
                if let Some((transaction_id, rd)) = dns_message::peek_header(packet) {
                    let response = dns_message::build_formerr_header_only(transaction_id, rd);
                    self.socket.send_to(&response, peer).await?;
                }
                return Ok(());
            }
        };

        if !is_well_formed_question(&query) {
            log::warn!(
                "rejecting query from {peer} with rd={} qtype={} qclass={}",
                query.rd, query.qtype, query.qclass
            );
            let response = dns_message::build_response(&query, RCODE_FORMERR, None)?;
            self.socket.send_to(&response, peer).await?;
            return Ok(());
        }

        let (rcode, answer) = match self.handle_query(&query, peer).await {
            Ok(txt) => (RCODE_NOERROR, Some(txt)),
            Err(TunnelError::InvalidQuery(msg)) => {
                log::warn!("rejecting query from {peer}: {msg}");
                (RCODE_FORMERR, None)
            }
            Err(TunnelError::UpstreamFetchFailed(msg)) => {
                log::warn!("upstream fetch failed for {peer}: {msg}");
                (RCODE_SERVFAIL, None)
            }
            Err(e) => {
                log::warn!("unexpected error handling {peer}: {e}");
                (RCODE_SERVFAIL, None)
            }
        };

        let response = dns_message::build_response(&query, rcode, answer.as_deref())?;
        self.socket.send_to(&response, peer).await?;
        Ok(())
    }

    async fn handle_query(&self, query: &ParsedQuery, peer: SocketAddr) -> Result<String> {
        match codec::decode_request(&query.qname)? {
            Request::Get { filename, session } => {
                let chunks = fetch_and_chunk(&filename).await?;
                let chunk_count = chunks.len();
                self.sessions
                    .insert_or_replace(peer, session.clone(), chunks)
                    .await;
                SessionLog::created(&session, peer, &filename, chunk_count);
                let record = self
                    .sessions
                    .get(peer)
                    .await
                    .expect("just inserted this session");
                chunk_answer(&record)
            }
            Request::Ack { bit, session } => {
                let current = self.sessions.get(peer).await.ok_or_else(|| {
                    TunnelError::InvalidQuery(format!("ACK for unknown session from {peer}"))
                })?;
                if current.session_id != session {
                    return Err(TunnelError::InvalidQuery(format!(
                        "ACK session id {session} does not match active session {}",
                        current.session_id
                    )));
                }

                let expected_bit = (current.cursor % 2) as u8;
                let record = if bit == expected_bit {
                    let advanced = self
                        .sessions
                        .advance(peer, &session)
                        .await
                        .ok_or_else(|| TunnelError::InvalidQuery("session vanished mid-ACK".to_string()))?;
                    if advanced.is_complete() {
                        SessionLog::completed(&session, peer);
                    }
                    advanced
                } else {
                    // Duplicate ACK: retransmit the current chunk unchanged.
                    current
                };

                chunk_answer(&record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_tag_alternates_then_terminates() {
        assert_eq!(seq_tag_for(0, 3), SeqTag::Bit(0));
        assert_eq!(seq_tag_for(1, 3), SeqTag::Bit(1));
        assert_eq!(seq_tag_for(2, 3), SeqTag::Done);
    }

    #[test]
    fn single_chunk_resource_is_immediately_done() {
        assert_eq!(seq_tag_for(0, 1), SeqTag::Done);
    }

    #[tokio::test]
    async fn chunk_answer_reflects_current_cursor() {
        let record = SessionRecord {
            session_id: "abc123".to_string(),
            chunks: vec![b"hi".to_vec(), b"A".to_vec()],
            cursor: 0,
            last_active: std::time::Instant::now(),
        };
        let txt = chunk_answer(&record).unwrap();
        let (seq, data, checksum) = codec::decode_chunk(&txt).unwrap();
        assert_eq!(seq, SeqTag::Bit(0));
        assert_eq!(data, b"hi");
        assert_eq!(checksum, codec::calculate_checksum(b"hi"));
    }

    async fn test_server() -> Server {
        let config = TunnelConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            idle_timeout_secs: 300,
        };
        Server::bind(&config).await.unwrap()
    }

    fn ack_query(bit: u8, session: &str) -> ParsedQuery {
        ParsedQuery {
            transaction_id: 1,
            qname: codec::encode_ack(bit, session).unwrap(),
            qtype: dns_message::QTYPE_TXT,
            qclass: dns_message::QCLASS_IN,
            rd: true,
        }
    }

    /// Property 7: an ACK whose bit doesn't match `cursor mod 2` leaves
    /// `cursor` unchanged and retransmits the chunk already at the cursor.
    #[tokio::test]
    async fn ack_with_wrong_bit_does_not_advance_cursor() {
        let server = test_server().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        server
            .sessions
            .insert_or_replace(peer, "abc123".to_string(), vec![b"hi".to_vec(), b"A".to_vec()])
            .await;

        let query = ack_query(1, "abc123");
        let txt = server.handle_query(&query, peer).await.unwrap();
        let (seq, data, _) = codec::decode_chunk(&txt).unwrap();
        assert_eq!(seq, SeqTag::Bit(0));
        assert_eq!(data, b"hi");

        let record = server.sessions.get(peer).await.unwrap();
        assert_eq!(record.cursor, 0);
    }

    /// Property 5: resending the same (wrong-bit) ACK against an unchanged
    /// cursor produces a byte-identical TXT answer every time.
    #[tokio::test]
    async fn idempotent_retransmit_is_byte_identical() {
        let server = test_server().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        server
            .sessions
            .insert_or_replace(peer, "abc123".to_string(), vec![b"hi".to_vec(), b"A".to_vec()])
            .await;

        let query = ack_query(1, "abc123");
        let first = server.handle_query(&query, peer).await.unwrap();
        let second = server.handle_query(&query, peer).await.unwrap();
        assert_eq!(first, second);
    }

    /// Property 8: a matching-bit ACK advances the cursor by exactly one and
    /// never past `len(chunks) - 1`, tagging the last chunk `DONE`.
    #[tokio::test]
    async fn matching_bit_ack_advances_cursor_and_terminates_with_done() {
        let server = test_server().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        server
            .sessions
            .insert_or_replace(peer, "abc123".to_string(), vec![b"hi".to_vec(), b"A".to_vec()])
            .await;

        let txt = server.handle_query(&ack_query(0, "abc123"), peer).await.unwrap();
        let (seq, data, _) = codec::decode_chunk(&txt).unwrap();
        assert_eq!(seq, SeqTag::Done);
        assert_eq!(data, b"A");

        let record = server.sessions.get(peer).await.unwrap();
        assert_eq!(record.cursor, 1);
        assert!(record.is_complete());
    }

    /// An ACK for a session id that doesn't match the address's active
    /// session is rejected rather than silently accepted.
    #[tokio::test]
    async fn ack_with_mismatched_session_id_is_rejected() {
        let server = test_server().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        server
            .sessions
            .insert_or_replace(peer, "abc123".to_string(), vec![b"hi".to_vec()])
            .await;

        let err = server
            .handle_query(&ack_query(0, "zzz999"), peer)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidQuery(_)));
    }

    /// Hand-built query packet with an arbitrary qtype/qclass/rd, bypassing
    /// `dns_message::build_query`'s hardcoded `QTYPE=TXT`/`RD=1`.
    fn raw_query(transaction_id: u16, rd: bool, qname: &str, qtype: u16, qclass: u16) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&transaction_id.to_be_bytes());
        let flags: u16 = if rd { 0x0100 } else { 0 };
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
        packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
        packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
        for label in qname.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&qclass.to_be_bytes());
        packet
    }

    async fn recv_one(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        buf.truncate(len);
        buf
    }

    #[tokio::test]
    async fn non_txt_qtype_is_rejected_with_formerr() {
        let server = test_server().await;
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = peer_socket.local_addr().unwrap();

        let packet = raw_query(
            42,
            true,
            "GET-index-html.abc123.tunnel.local",
            1, // QTYPE=A
            dns_message::QCLASS_IN,
        );
        server.handle_datagram(&packet, peer).await.unwrap();

        let response = recv_one(&peer_socket).await;
        let parsed = dns_message::parse_response(&response).unwrap();
        assert_eq!(parsed.transaction_id, 42);
        assert_eq!(parsed.rcode, dns_message::RCODE_FORMERR);
        assert!(parsed.answers.is_empty());
    }

    #[tokio::test]
    async fn rd_zero_is_rejected_with_formerr() {
        let server = test_server().await;
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = peer_socket.local_addr().unwrap();

        let packet = raw_query(
            7,
            false,
            "GET-index-html.abc123.tunnel.local",
            dns_message::QTYPE_TXT,
            dns_message::QCLASS_IN,
        );
        server.handle_datagram(&packet, peer).await.unwrap();

        let response = recv_one(&peer_socket).await;
        let parsed = dns_message::parse_response(&response).unwrap();
        assert_eq!(parsed.rcode, dns_message::RCODE_FORMERR);
        assert!(parsed.answers.is_empty());
    }

    #[tokio::test]
    async fn truncated_packet_gets_header_only_formerr_reply() {
        let server = test_server().await;
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = peer_socket.local_addr().unwrap();

        let mut packet = 0xabcdu16.to_be_bytes().to_vec();
        packet.extend_from_slice(&0x0100u16.to_be_bytes()); // RD=1, header otherwise truncated
        server.handle_datagram(&packet, peer).await.unwrap();

        let response = recv_one(&peer_socket).await;
        let parsed = dns_message::parse_response(&response).unwrap();
        assert_eq!(parsed.transaction_id, 0xabcd);
        assert_eq!(parsed.rcode, dns_message::RCODE_FORMERR);
        assert!(parsed.answers.is_empty());
    }

    #[tokio::test]
    async fn packet_with_no_recoverable_header_gets_no_reply() {
        let server = test_server().await;
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = peer_socket.local_addr().unwrap();

        server.handle_datagram(&[0u8; 1], peer).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(200), recv_one(&peer_socket)).await;
        assert!(result.is_err(), "expected no reply for an unparseable header");
    }
}
