//! Packet sources feeding the stream reconstructor.
//!
//! A source yields captured frames in capture order. Two are always
//! available: a pcap file reader and an in-memory list; live interface
//! capture is compiled in with the `live-capture` feature.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use pcap_file::pcap::PcapReader;

use crate::capture::packet::{LinkType, RawPacket};
use crate::config::CaptureConfig;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open capture file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid capture file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error("unsupported link type {0:?}")]
    UnsupportedLinkType(pcap_file::DataLink),

    #[error("no capture input configured: set capture.pcap_file or capture.interface")]
    NotConfigured,

    #[error("live capture requires building with the `live-capture` feature")]
    LiveCaptureUnavailable,

    #[cfg(feature = "live-capture")]
    #[error("live capture failed: {0}")]
    Live(#[from] pcap::Error),
}

/// Outcome of one read from a [`PacketSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPacket {
    Packet(RawPacket),
    /// Nothing arrived within the source's poll interval; more may follow.
    Idle,
    /// The source has no more frames.
    Drained,
}

impl NextPacket {
    pub fn into_packet(self) -> Option<RawPacket> {
        match self {
            NextPacket::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

/// An ordered sequence of captured frames.
///
/// Reads may block, but only for a bounded interval: a source waiting on
/// live traffic returns [`NextPacket::Idle`] so callers can notice that the
/// session has ended.
pub trait PacketSource: Send {
    fn link_type(&self) -> LinkType;

    fn next_packet(&mut self) -> Result<NextPacket, SourceError>;
}

/// Reads frames from a classic pcap file.
pub struct PcapFileSource {
    path: PathBuf,
    reader: PcapReader<BufReader<File>>,
    link_type: LinkType,
}

impl PcapFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        let reader = PcapReader::new(BufReader::new(file)).map_err(|source| SourceError::Format {
            path: path.clone(),
            source,
        })?;
        let datalink = reader.header().datalink;
        let link_type = LinkType::from_datalink(datalink).ok_or(SourceError::UnsupportedLinkType(datalink))?;

        tracing::info!(path = %path.display(), ?link_type, "Opened capture file");
        Ok(Self {
            path,
            reader,
            link_type,
        })
    }
}

impl PacketSource for PcapFileSource {
    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn next_packet(&mut self) -> Result<NextPacket, SourceError> {
        match self.reader.next_packet() {
            None => Ok(NextPacket::Drained),
            Some(Ok(packet)) => Ok(NextPacket::Packet(RawPacket {
                timestamp: packet.timestamp,
                link_type: self.link_type,
                data: packet.data.into_owned(),
            })),
            Some(Err(source)) => Err(SourceError::Format {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Serves frames from memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    link_type: Option<LinkType>,
    packets: VecDeque<RawPacket>,
}

impl MemorySource {
    pub fn new(packets: impl IntoIterator<Item = RawPacket>) -> Self {
        let packets: VecDeque<RawPacket> = packets.into_iter().collect();
        Self {
            link_type: packets.front().map(|p| p.link_type),
            packets,
        }
    }
}

impl PacketSource for MemorySource {
    fn link_type(&self) -> LinkType {
        self.link_type.unwrap_or(LinkType::Ethernet)
    }

    fn next_packet(&mut self) -> Result<NextPacket, SourceError> {
        Ok(self.packets.pop_front().map_or(NextPacket::Drained, NextPacket::Packet))
    }
}

#[cfg(feature = "live-capture")]
pub use live::LiveSource;

#[cfg(feature = "live-capture")]
mod live {
    use std::time::Duration;

    use super::{LinkType, NextPacket, PacketSource, RawPacket, SourceError};

    /// Poll interval of the live capture handle.
    const READ_TIMEOUT_MS: i32 = 500;

    /// Captures from a network interface through libpcap.
    pub struct LiveSource {
        capture: pcap::Capture<pcap::Active>,
        link_type: LinkType,
    }

    impl LiveSource {
        pub fn open(interface: &str, port: u16, snaplen: i32) -> Result<Self, SourceError> {
            let mut capture = pcap::Capture::from_device(interface)?
                .promisc(true)
                .snaplen(snaplen)
                .timeout(READ_TIMEOUT_MS)
                .open()?;
            capture.filter(&format!("tcp port {port}"), true)?;

            let datalink = pcap_file::DataLink::from(capture.get_datalink().0 as u32);
            let link_type = LinkType::from_datalink(datalink).ok_or(SourceError::UnsupportedLinkType(datalink))?;

            tracing::info!(interface, port, ?link_type, "Live capture started");
            Ok(Self { capture, link_type })
        }
    }

    impl PacketSource for LiveSource {
        fn link_type(&self) -> LinkType {
            self.link_type
        }

        fn next_packet(&mut self) -> Result<NextPacket, SourceError> {
            match self.capture.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts;
                    let timestamp = Duration::from_secs(ts.tv_sec as u64) + Duration::from_micros(ts.tv_usec as u64);
                    Ok(NextPacket::Packet(RawPacket {
                        timestamp,
                        link_type: self.link_type,
                        data: packet.data.to_vec(),
                    }))
                }
                Err(pcap::Error::TimeoutExpired) => Ok(NextPacket::Idle),
                Err(pcap::Error::NoMorePackets) => Ok(NextPacket::Drained),
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Open the source selected by the capture configuration.
///
/// A pcap file takes precedence over a live interface.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn PacketSource>, SourceError> {
    if let Some(path) = &config.pcap_file {
        return Ok(Box::new(PcapFileSource::open(path)?));
    }

    match &config.interface {
        #[cfg(feature = "live-capture")]
        Some(interface) => Ok(Box::new(LiveSource::open(interface, config.port, config.snaplen)?)),
        #[cfg(not(feature = "live-capture"))]
        Some(_) => Err(SourceError::LiveCaptureUnavailable),
        None => Err(SourceError::NotConfigured),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use pcap_file::DataLink;
    use std::time::Duration;

    #[test]
    fn test_pcap_file_source_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.pcap");
        {
            let file = File::create(&path).unwrap();
            let header = PcapHeader {
                datalink: DataLink::ETHERNET,
                ..Default::default()
            };
            let mut writer = PcapWriter::with_header(file, header).unwrap();
            for (i, data) in [vec![1u8, 2, 3], vec![4u8, 5]].iter().enumerate() {
                let packet = PcapPacket::new(Duration::from_secs(i as u64 + 1), data.len() as u32, data);
                writer.write_packet(&packet).unwrap();
            }
        }

        let mut source = PcapFileSource::open(&path).unwrap();
        assert_eq!(source.link_type(), LinkType::Ethernet);
        let first = source.next_packet().unwrap().into_packet().unwrap();
        assert_eq!(first.data, vec![1, 2, 3]);
        assert_eq!(first.timestamp, Duration::from_secs(1));
        assert_eq!(source.next_packet().unwrap().into_packet().unwrap().data, vec![4, 5]);
        assert_eq!(source.next_packet().unwrap(), NextPacket::Drained);
    }

    #[test]
    fn test_missing_file_is_an_open_error() {
        let err = PcapFileSource::open("/nonexistent/trace.pcap").err().unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[test]
    fn test_unconfigured_source() {
        let config = CaptureConfig {
            pcap_file: None,
            interface: None,
            ..Default::default()
        };
        assert!(matches!(open_source(&config), Err(SourceError::NotConfigured)));
    }
}
