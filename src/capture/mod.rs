//! Packet capture and HTTP exchange reconstruction.
//!
//! # Data Flow
//! ```text
//! source.rs (pcap file | live interface | memory)
//!     → packet.rs (link/IP/TCP decode)
//!     → stream.rs (per 4-tuple reassembly, completion detection)
//!     → http.rs (request/status line and header parsing)
//!     → session.rs (record into corpus | compare and report)
//! ```
//!
//! # Design Decisions
//! - Only HTTP/1.x over TCP on one configured port is observed
//! - Malformed input degrades to placeholders; capture never aborts on it

pub mod http;
pub mod packet;
pub mod session;
pub mod source;
pub mod stream;

pub use packet::{LinkType, RawPacket, StreamKey};
pub use session::CaptureSession;
pub use source::{open_source, MemorySource, NextPacket, PacketSource, PcapFileSource, SourceError};
pub use stream::{CompletedExchange, StreamReconstructor};
