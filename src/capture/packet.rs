//! Packet decoding and synthesis.
//!
//! # Responsibilities
//! - Decode link/IP/TCP layers of a captured frame into a [`TcpSegment`]
//! - Build synthetic Ethernet/IP/TCP frames for trace files
//!
//! # Design Decisions
//! - Undecodable frames are skipped, never fatal
//! - IPv4 and IPv6 are both supported; mixed-family synthetic packets use
//!   IPv4-mapped IPv6 addresses

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use etherparse::{NetHeaders, PacketBuilder, PacketHeaders, TransportHeader};
use pcap_file::DataLink;

/// Largest payload placed into one synthetic segment.
pub const SEGMENT_PAYLOAD: usize = 1460;

/// Length of a Linux cooked-capture (SLL) header.
const LINUX_SLL_HEADER_LEN: usize = 16;

const CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

/// Link layer of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkType {
    pub fn from_datalink(datalink: DataLink) -> Option<Self> {
        match datalink {
            DataLink::ETHERNET => Some(LinkType::Ethernet),
            DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => Some(LinkType::RawIp),
            DataLink::LINUX_SLL => Some(LinkType::LinuxSll),
            _ => None,
        }
    }

    pub fn datalink(self) -> DataLink {
        match self {
            LinkType::Ethernet => DataLink::ETHERNET,
            LinkType::RawIp => DataLink::RAW,
            LinkType::LinuxSll => DataLink::LINUX_SLL,
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

impl RawPacket {
    pub fn ethernet(timestamp: Duration, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            link_type: LinkType::Ethernet,
            data,
        }
    }
}

/// Addressing of one direction of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl StreamKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src_ip: src.ip(),
            src_port: src.port(),
            dst_ip: dst.ip(),
            dst_port: dst.port(),
        }
    }

    /// The opposite direction of the same connection.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }

    pub fn involves_port(&self, port: u16) -> bool {
        self.src_port == port || self.dst_port == port
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            SocketAddr::new(self.src_ip, self.src_port),
            SocketAddr::new(self.dst_ip, self.dst_port)
        )
    }
}

/// TCP segment extracted from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub key: StreamKey,
    pub seq: u32,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

/// Decode a captured frame down to its TCP segment.
///
/// Returns `None` for anything that is not TCP over IPv4/IPv6.
pub fn decode_segment(packet: &RawPacket) -> Option<TcpSegment> {
    let headers = match packet.link_type {
        LinkType::Ethernet => PacketHeaders::from_ethernet_slice(&packet.data).ok()?,
        LinkType::RawIp => PacketHeaders::from_ip_slice(&packet.data).ok()?,
        LinkType::LinuxSll => {
            let ip = packet.data.get(LINUX_SLL_HEADER_LEN..)?;
            PacketHeaders::from_ip_slice(ip).ok()?
        }
    };

    let (src_ip, dst_ip) = match headers.net? {
        NetHeaders::Ipv4(ip, _) => (
            IpAddr::V4(Ipv4Addr::from(ip.source)),
            IpAddr::V4(Ipv4Addr::from(ip.destination)),
        ),
        NetHeaders::Ipv6(ip, _) => (
            IpAddr::V6(Ipv6Addr::from(ip.source)),
            IpAddr::V6(Ipv6Addr::from(ip.destination)),
        ),
        #[allow(unreachable_patterns)]
        _ => return None,
    };

    let tcp = match headers.transport? {
        TransportHeader::Tcp(tcp) => tcp,
        _ => return None,
    };

    Some(TcpSegment {
        key: StreamKey {
            src_ip,
            src_port: tcp.source_port,
            dst_ip,
            dst_port: tcp.destination_port,
        },
        seq: tcp.sequence_number,
        fin: tcp.fin,
        rst: tcp.rst,
        payload: headers.payload.slice().to_vec(),
    })
}

/// Build Ethernet frames carrying `payload` from `src` to `dst`.
///
/// The payload is split into [`SEGMENT_PAYLOAD`]-sized segments starting at
/// sequence number `seq`; the last segment carries FIN when `fin` is set.
/// Returns the frames and the next sequence number.
pub fn build_segments(
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    payload: &[u8],
    fin: bool,
) -> (Vec<Vec<u8>>, u32) {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(SEGMENT_PAYLOAD).collect()
    };
    let last = chunks.len() - 1;

    let mut frames = Vec::with_capacity(chunks.len());
    let mut seq = seq;
    for (i, chunk) in chunks.into_iter().enumerate() {
        match build_frame(src, dst, seq, chunk, fin && i == last) {
            Some(frame) => frames.push(frame),
            None => tracing::warn!(%src, %dst, len = chunk.len(), "Failed to build synthetic frame"),
        }
        seq = seq.wrapping_add(chunk.len() as u32);
    }
    (frames, seq)
}

fn build_frame(src: SocketAddr, dst: SocketAddr, seq: u32, payload: &[u8], fin: bool) -> Option<Vec<u8>> {
    let (src_mac, dst_mac) = if src.port() > dst.port() {
        (CLIENT_MAC, SERVER_MAC)
    } else {
        (SERVER_MAC, CLIENT_MAC)
    };
    let ethernet = PacketBuilder::ethernet2(src_mac, dst_mac);
    let ip = match (src.ip(), dst.ip()) {
        (IpAddr::V4(s), IpAddr::V4(d)) => ethernet.ipv4(s.octets(), d.octets(), 64),
        (s, d) => ethernet.ipv6(to_v6(s).octets(), to_v6(d).octets(), 64),
    };
    let mut tcp = ip.tcp(src.port(), dst.port(), seq, 65535).ack(1).psh();
    if fin {
        tcp = tcp.fin();
    }

    let mut frame = Vec::with_capacity(tcp.size(payload.len()));
    tcp.write(&mut frame, payload).ok()?;
    Some(frame)
}

fn to_v6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}
