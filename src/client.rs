//! Client state machine: `Init` / `Awaiting{bit}` / `Done`.
//!
//! One retry/timeout helper (`query_with_retry`) backs every send-and-wait
//! step of the handshake, instead of inlining a timeout loop at each call
//! site.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;

use crate::codec::{self, SeqTag};
use crate::dns_message::{self, RCODE_NOERROR};
use crate::errors::{Result, TunnelError};
use crate::fault::FaultInjector;

const MAX_DATAGRAM: usize = 512;

/// Where a single transfer is in the stop-and-wait handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Awaiting { bit: u8 },
    Done,
}

/// Counters accumulated over one transfer, printed at the end of the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStats {
    pub total_bytes: u64,
    pub duplicate_count: u64,
}

/// A client bound to one server and driving one session end-to-end.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: String,
    retries: u32,
    timeout: Duration,
    fault: FaultInjector,
}

impl Client {
    pub async fn connect(
        server_addr: SocketAddr,
        local_bind: SocketAddr,
        session_id: String,
        retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local_bind).await?;
        socket.connect(server_addr).await?;
        Ok(Self {
            socket,
            server_addr,
            session_id,
            retries,
            timeout,
            fault: FaultInjector::from_env(),
        })
    }

    /// Send `qname` and return the first TXT answer, retrying on timeout up
    /// to `self.retries` times and applying the test-only fault injector to
    /// whatever arrives before it's handed back for decoding.
    async fn query_with_retry(&self, qname: &str) -> Result<String> {
        let mut last_err = TunnelError::Timeout;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                log::debug!("retrying query (attempt {attempt}/{})", self.retries);
            }
            match self.query_once(qname).await {
                Ok(txt) => return Ok(txt),
                Err(e) => last_err = e,
            }
        }
        Err(TunnelError::TransferFailed(format!(
            "exhausted {} retries: {last_err}",
            self.retries
        )))
    }

    async fn query_once(&self, qname: &str) -> Result<String> {
        let transaction_id: u16 = rand::thread_rng().gen();
        let packet = dns_message::build_query(qname, transaction_id)?;
        self.socket.send(&packet).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
                .await
                .map_err(|_| TunnelError::Timeout)??;

            let mut datagram = buf[..len].to_vec();
            match self.fault.apply(datagram.clone()) {
                None => {
                    log::debug!("fault injector dropped response, waiting for timeout");
                    continue;
                }
                Some(mutated) => datagram = mutated,
            }

            let response = dns_message::parse_response(&datagram)?;
            if response.rcode != RCODE_NOERROR {
                return Err(TunnelError::InvalidQuery(format!(
                    "server returned rcode {}",
                    response.rcode
                )));
            }
            let txt = response
                .answers
                .into_iter()
                .next()
                .ok_or_else(|| TunnelError::InvalidQuery("no TXT answer in response".to_string()))?;
            return Ok(txt);
        }
    }

    /// Run the full `Init` → `Awaiting{bit}` → `Done` transfer for `filename`.
    ///
    /// On a checksum mismatch, or a TXT record that doesn't even decode,
    /// this client NACKs `1 - expected_bit` rather than re-ACKing
    /// `expected_bit`: re-sending the same bit the server already saw for
    /// the chunk it just sent cannot be told apart from "I never got a
    /// reply", so it risks the server silently treating the NACK as
    /// acceptance and advancing past a chunk that was never verified.
    pub async fn run(&self, filename: &str) -> Result<(Vec<u8>, TransferStats)> {
        let mut stats = TransferStats::default();
        let mut chunks = Vec::new();

        let get_qname = codec::encode_get(filename, &self.session_id)?;
        let mut txt = self.query_with_retry(&get_qname).await?;

        let mut state = ClientState::Init;
        loop {
            let expected_bit = match state {
                ClientState::Init => 0,
                ClientState::Awaiting { bit } => bit,
                ClientState::Done => unreachable!("no further chunks requested once done"),
            };

            let (seq, data) = match codec::decode_chunk(&txt) {
                Ok((seq, data, checksum)) => {
                    let computed = codec::calculate_checksum(&data);
                    if computed != checksum {
                        log::warn!("checksum mismatch: expected {checksum}, computed {computed}");
                        let nack_qname = codec::encode_ack(1 - expected_bit, &self.session_id)?;
                        txt = self.query_with_retry(&nack_qname).await?;
                        continue;
                    }
                    (seq, data)
                }
                Err(e) => {
                    log::warn!("undecodable chunk: {e}");
                    let nack_qname = codec::encode_ack(1 - expected_bit, &self.session_id)?;
                    txt = self.query_with_retry(&nack_qname).await?;
                    continue;
                }
            };

            match seq {
                SeqTag::Done => {
                    chunks.push(data.clone());
                    stats.total_bytes += data.len() as u64;
                    let ack_qname = codec::encode_ack(expected_bit, &self.session_id)?;
                    // Final ACK: best-effort, the server has nothing left to
                    // retransmit if this is lost.
                    let _ = self.query_with_retry(&ack_qname).await;
                    state = ClientState::Done;
                    break;
                }
                SeqTag::Bit(received_bit) => {
                    let ack_bit = if received_bit == expected_bit {
                        chunks.push(data.clone());
                        stats.total_bytes += data.len() as u64;
                        state = ClientState::Awaiting {
                            bit: 1 - expected_bit,
                        };
                        received_bit
                    } else {
                        stats.duplicate_count += 1;
                        received_bit
                    };

                    let ack_qname = codec::encode_ack(ack_bit, &self.session_id)?;
                    txt = self.query_with_retry(&ack_qname).await?;
                }
            }
        }

        Ok((chunks.into_iter().flatten().collect(), stats))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Override the fault injector, bypassing `TEST_MODE`/`TEST_DROP_RATE`/
    /// `TEST_CORRUPT_RATE`. Useful for tests that want deterministic fault
    /// rates without mutating process-global environment state.
    pub fn set_fault_injector(&mut self, injector: FaultInjector) {
        self.fault = injector;
    }
}

/// Generate a session id: 6 lowercase-alphanumeric characters.
pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..codec::SESSION_ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Elapsed-time/throughput summary line printed after a transfer completes.
pub fn format_summary(filename: &str, bytes: usize, stats: &TransferStats, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    format!(
        "File saved to: received_{filename}\nFile size: {bytes} bytes\nDuplicate packets: {}\nTransfer time: {:.2} seconds\nThroughput: {:.2} bytes/sec",
        stats.duplicate_count,
        secs,
        bytes as f64 / secs,
    )
}
