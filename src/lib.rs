//! A covert file-transfer channel tunneled through DNS query/TXT exchanges.
//!
//! A client requests a file by encoding a `GET` command into a DNS QNAME; a
//! server resolves the request (fetching the underlying resource over HTTP,
//! out of scope for the protocol itself) and streams it back as a sequence
//! of base64-encoded chunks carried in TXT records, one chunk per query/
//! response round trip under a stop-and-wait protocol with alternating-bit
//! sequencing and an RFC 1071 Internet checksum over each chunk's raw bytes.
//!
//! ## Quick start
//!
//! ```bash
//! tunnel-server --bind 127.0.0.1:5353
//! tunnel-client index.html --server 127.0.0.1:5353
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   GET-<file>.<session>.tunnel.local    ┌────────────┐
//! │   client   │ ──────────────────────────────────────▶│   server   │
//! │            │◀────────────── TXT: seq|payload|cksum ─│            │
//! │            │   ACK-<bit>.<session>.tunnel.local      │            │
//! │            │ ──────────────────────────────────────▶│            │
//! └────────────┘                                         └────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod dns_message;
pub mod errors;
pub mod fault;
pub mod logging;
pub mod server;
pub mod session;

pub use client::{Client, ClientState, TransferStats};
pub use codec::{Request, SeqTag};
pub use config::TunnelConfig;
pub use errors::{Result, TunnelError};
pub use server::Server;
pub use session::{SessionRecord, SessionTable};
