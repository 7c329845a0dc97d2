//! Append-only pcap trace files.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::PcapError;

use crate::capture::packet::{LinkType, RawPacket};

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trace file {path}: {source}")]
    Pcap {
        path: PathBuf,
        #[source]
        source: PcapError,
    },
}

/// Open handle on a trace file that packets are appended to.
///
/// A pcap stream cannot be reopened for appending without rewriting its
/// header, so opening an existing trace reads it back and rewrites it once;
/// afterwards every append goes straight to the open file.
pub struct TraceWriter {
    path: PathBuf,
    link_type: LinkType,
    writer: PcapWriter<File>,
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("path", &self.path)
            .field("link_type", &self.link_type)
            .finish_non_exhaustive()
    }
}

impl TraceWriter {
    /// Open `path`, creating it with `link_type` when it does not exist yet.
    ///
    /// An existing file keeps its own link type.
    pub fn open(path: &Path, link_type: LinkType) -> Result<Self, TraceError> {
        let (header, existing) = if path.exists() {
            read_existing(path)?
        } else {
            let header = PcapHeader {
                datalink: link_type.datalink(),
                ..Default::default()
            };
            (header, Vec::new())
        };

        let link_type = LinkType::from_datalink(header.datalink).unwrap_or(link_type);
        let file = File::create(path).map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = PcapWriter::with_header(file, header).map_err(|source| TraceError::Pcap {
            path: path.to_path_buf(),
            source,
        })?;

        for (timestamp, data) in &existing {
            let packet = PcapPacket::new(*timestamp, data.len() as u32, data);
            writer.write_packet(&packet).map_err(|source| TraceError::Pcap {
                path: path.to_path_buf(),
                source,
            })?;
        }

        tracing::debug!(path = %path.display(), existing = existing.len(), "Opened trace file");
        Ok(Self {
            path: path.to_path_buf(),
            link_type,
            writer,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Append packets; frames of a different link type are skipped.
    pub fn append(&mut self, packets: &[RawPacket]) -> Result<usize, TraceError> {
        let mut written = 0;
        for packet in packets {
            if packet.link_type != self.link_type {
                tracing::warn!(
                    path = %self.path.display(),
                    expected = ?self.link_type,
                    got = ?packet.link_type,
                    "Skipping packet with mismatched link type"
                );
                continue;
            }
            let record = PcapPacket {
                timestamp: packet.timestamp,
                orig_len: packet.data.len() as u32,
                data: Cow::Borrowed(&packet.data),
            };
            self.writer.write_packet(&record).map_err(|source| TraceError::Pcap {
                path: self.path.clone(),
                source,
            })?;
            written += 1;
        }
        Ok(written)
    }
}

fn read_existing(path: &Path) -> Result<(PcapHeader, Vec<(Duration, Vec<u8>)>), TraceError> {
    let file = File::open(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = PcapReader::new(file).map_err(|source| TraceError::Pcap {
        path: path.to_path_buf(),
        source,
    })?;
    let header = reader.header();

    let mut packets = Vec::new();
    while let Some(packet) = reader.next_packet() {
        match packet {
            Ok(packet) => packets.push((packet.timestamp, packet.data.into_owned())),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Trace file is truncated, keeping readable packets");
                break;
            }
        }
    }
    Ok((header, packets))
}

/// Read every frame of a trace file.
pub fn read_trace(path: &Path) -> Result<Vec<RawPacket>, TraceError> {
    let (header, packets) = read_existing(path)?;
    let link_type = LinkType::from_datalink(header.datalink).unwrap_or(LinkType::Ethernet);
    Ok(packets
        .into_iter()
        .map(|(timestamp, data)| RawPacket {
            timestamp,
            link_type,
            data,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u8) -> RawPacket {
        RawPacket::ethernet(Duration::from_millis(n as u64), vec![n; 60])
    }

    #[test]
    fn test_append_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("http.pcap");

        let mut writer = TraceWriter::open(&path, LinkType::Ethernet).unwrap();
        assert_eq!(writer.append(&[packet(1), packet(2)]).unwrap(), 2);
        drop(writer);

        let mut writer = TraceWriter::open(&path, LinkType::Ethernet).unwrap();
        writer.append(&[packet(3)]).unwrap();
        drop(writer);

        let packets = read_trace(&path).unwrap();
        let firsts: Vec<u8> = packets.iter().map(|p| p.data[0]).collect();
        assert_eq!(firsts, vec![1, 2, 3]);
        assert_eq!(packets[2].timestamp, Duration::from_millis(3));
    }

    #[test]
    fn test_mismatched_link_type_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("http.pcap");
        let mut writer = TraceWriter::open(&path, LinkType::Ethernet).unwrap();

        let mut raw = packet(9);
        raw.link_type = LinkType::RawIp;
        assert_eq!(writer.append(&[raw, packet(1)]).unwrap(), 1);
    }
}
