//! TCP stream reassembly into HTTP exchanges.
//!
//! # Responsibilities
//! - Demultiplex segments by 4-tuple into per-connection state
//! - Pair each request with the response on the reversed 4-tuple
//! - Decide when a response body is complete
//! - Hand off completed exchanges together with their raw packets
//!
//! # Design Decisions
//! - State is keyed by the request direction (client -> observed port);
//!   response-direction segments look up the reversed key
//! - Completion: declared `Content-Length` reached, terminating chunk seen,
//!   bodiless status, or FIN from the server side
//! - Per-key updates go through a `DashMap` shard lock, so independent streams
//!   can be fed from several workers while one stream stays ordered
//! - Response heads split over several segments are buffered until the blank
//!   line arrives
//! - A payload segment whose sequence number was already taken on its
//!   direction is a retransmission and is ignored
//! - Incomplete streams are dropped at the end of capture, never persisted

use std::collections::HashSet;

use dashmap::DashMap;

use crate::capture::http::{self, PayloadKind};
use crate::capture::packet::{self, RawPacket, StreamKey, TcpSegment};
use crate::exchange::headers;
use crate::exchange::{Body, Exchange, HttpRequestRecord, HttpResponseRecord};
use crate::observability::metrics;

/// An exchange whose response has been fully received.
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub exchange: Exchange,
    /// Every frame that contributed to the exchange, in arrival order.
    pub packets: Vec<RawPacket>,
}

/// How the end of a response body is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

#[derive(Debug)]
struct PendingRequest {
    record: HttpRequestRecord,
    body: Vec<u8>,
    content_length: Option<usize>,
}

impl PendingRequest {
    fn wants_body(&self) -> bool {
        self.content_length.is_some_and(|n| self.body.len() < n)
    }
}

#[derive(Debug)]
struct PendingResponse {
    record: HttpResponseRecord,
    body: Vec<u8>,
    framing: Framing,
}

impl PendingResponse {
    fn is_complete(&self) -> bool {
        match self.framing {
            Framing::Empty => true,
            Framing::Length(n) => self.body.len() >= n,
            Framing::Chunked => self.body.ends_with(b"\r\n") && http::dechunk(&self.body).is_some(),
            Framing::UntilClose => false,
        }
    }

    fn into_record(self) -> HttpResponseRecord {
        let mut record = self.record;
        let bytes = match self.framing {
            Framing::Empty => Vec::new(),
            Framing::Length(n) => {
                let mut body = self.body;
                body.truncate(n);
                body
            }
            Framing::Chunked => http::dechunk(&self.body).unwrap_or(self.body),
            Framing::UntilClose => self.body,
        };
        if !bytes.is_empty() {
            let content_type = headers::content_type(&record.headers).map(str::to_string);
            record.body = Some(Body::from_bytes(bytes, content_type.as_deref()));
        }
        record
    }
}

#[derive(Debug, Default)]
struct StreamState {
    request: Option<PendingRequest>,
    response: Option<PendingResponse>,
    /// Response head bytes received before the blank line.
    response_head: Vec<u8>,
    /// Sequence numbers of payload-bearing segments already taken, per direction.
    client_seqs: HashSet<u32>,
    server_seqs: HashSet<u32>,
    packets: Vec<RawPacket>,
}

impl StreamState {
    fn into_completed(self) -> Option<CompletedExchange> {
        let pending = self.request?;
        let response = self.response?;

        let mut request = pending.record;
        if !pending.body.is_empty() {
            let mut body = pending.body;
            if let Some(n) = pending.content_length {
                body.truncate(n);
            }
            request.body = Some(Body::from_bytes(body, None));
        }

        Some(CompletedExchange {
            exchange: Exchange {
                request,
                response: Some(response.into_record()),
            },
            packets: self.packets,
        })
    }
}

/// Reassembles HTTP exchanges from packets to or from one TCP port.
pub struct StreamReconstructor {
    port: u16,
    streams: DashMap<StreamKey, StreamState>,
}

impl StreamReconstructor {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            streams: DashMap::new(),
        }
    }

    /// Number of streams with an exchange in flight.
    pub fn in_flight(&self) -> usize {
        self.streams.len()
    }

    /// Feed one captured packet; returns an exchange when it completes one.
    pub fn process(&self, packet: RawPacket) -> Option<CompletedExchange> {
        let segment = packet::decode_segment(&packet)?;
        if !segment.key.involves_port(self.port) {
            return None;
        }

        if segment.key.dst_port == self.port {
            self.on_client_segment(segment, packet)
        } else {
            self.on_server_segment(segment, packet)
        }
    }

    /// Drop every stream still in flight; returns how many were discarded.
    pub fn finish(&self) -> usize {
        let discarded = self.streams.len();
        for entry in self.streams.iter() {
            tracing::debug!(
                stream = %entry.key(),
                has_request = entry.value().request.is_some(),
                has_response = entry.value().response.is_some(),
                "Discarding incomplete exchange"
            );
            metrics::record_stream_discarded("incomplete");
        }
        self.streams.clear();
        discarded
    }

    fn on_client_segment(&self, segment: TcpSegment, packet: RawPacket) -> Option<CompletedExchange> {
        let key = segment.key;

        match http::classify(&segment.payload) {
            PayloadKind::Request => {
                let retransmitted = self
                    .streams
                    .get(&key)
                    .is_some_and(|s| s.client_seqs.contains(&segment.seq));
                if retransmitted {
                    tracing::debug!(stream = %key, seq = segment.seq, "Retransmitted request segment, ignoring");
                    return None;
                }

                let head = http::parse_request_head(&segment.payload);
                let record = HttpRequestRecord {
                    source_ip: key.src_ip.to_string(),
                    destination_ip: key.dst_ip.to_string(),
                    source_port: key.src_port,
                    destination_port: key.dst_port,
                    method: head.method,
                    path: head.path,
                    headers: head.headers,
                    body: None,
                };
                let content_length = headers::content_length(&record.headers);
                let body = segment.payload.get(head.body_offset..).unwrap_or_default().to_vec();

                let mut state = self.streams.entry(key).or_default();
                if state.request.is_some() {
                    tracing::debug!(stream = %key, "New request replaces an unanswered one");
                    metrics::record_stream_discarded("superseded");
                }
                tracing::trace!(stream = %key, method = %record.method, path = %record.path, "Request observed");
                *state = StreamState {
                    request: Some(PendingRequest {
                        record,
                        body,
                        content_length,
                    }),
                    client_seqs: HashSet::from([segment.seq]),
                    packets: vec![packet],
                    ..Default::default()
                };
            }
            PayloadKind::Continuation | PayloadKind::Response => {
                if let Some(mut state) = self.streams.get_mut(&key) {
                    if !segment.payload.is_empty() && !state.client_seqs.insert(segment.seq) {
                        tracing::debug!(stream = %key, seq = segment.seq, "Retransmitted segment, ignoring");
                        return None;
                    }
                    let awaiting_response = state.response.is_none();
                    if let Some(request) = state.request.as_mut() {
                        if awaiting_response && request.wants_body() && !segment.payload.is_empty() {
                            request.body.extend_from_slice(&segment.payload);
                        }
                    }
                    state.packets.push(packet);
                }
            }
        }

        if segment.fin || segment.rst {
            let has_request = self
                .streams
                .get(&key)
                .map(|s| s.request.is_some())
                .unwrap_or(false);
            if !has_request {
                self.streams.remove(&key);
                tracing::info!(stream = %key, "Connection closed before any request, discarding stream");
                metrics::record_stream_discarded("no_request");
            }
        }
        None
    }

    fn on_server_segment(&self, segment: TcpSegment, packet: RawPacket) -> Option<CompletedExchange> {
        let key = segment.key.reversed();
        let complete = {
            let Some(mut state) = self.streams.get_mut(&key) else {
                if segment.fin {
                    tracing::info!(stream = %key, "Connection closed before any request, discarding stream");
                    metrics::record_stream_discarded("no_request");
                } else if http::classify(&segment.payload) == PayloadKind::Response {
                    tracing::debug!(stream = %key, "Response without an observed request, ignoring");
                }
                return None;
            };

            let state = &mut *state;
            if !segment.payload.is_empty() && !state.server_seqs.insert(segment.seq) {
                tracing::debug!(stream = %key, seq = segment.seq, "Retransmitted segment, ignoring");
                return None;
            }

            if state.response.is_none() {
                if http::classify(&segment.payload) == PayloadKind::Response {
                    state.response_head = segment.payload.clone();
                } else if !state.response_head.is_empty() {
                    state.response_head.extend_from_slice(&segment.payload);
                }

                let closing = segment.fin || segment.rst;
                if !state.response_head.is_empty() && (http::head_complete(&state.response_head) || closing) {
                    let Some(request) = state.request.as_ref() else {
                        return None;
                    };
                    let buffered = std::mem::take(&mut state.response_head);
                    let head = http::parse_response_head(&buffered);
                    let framing = response_framing(&request.record.method, head.status_code, &head.headers);
                    let body = buffered.get(head.body_offset..).unwrap_or_default().to_vec();
                    tracing::trace!(stream = %key, status = head.status_code, ?framing, "Response observed");
                    state.response = Some(PendingResponse {
                        record: HttpResponseRecord {
                            source_ip: segment.key.src_ip.to_string(),
                            destination_ip: segment.key.dst_ip.to_string(),
                            source_port: segment.key.src_port,
                            destination_port: segment.key.dst_port,
                            status_code: head.status_code,
                            reason_phrase: head.reason_phrase,
                            headers: head.headers,
                            body: None,
                        },
                        body,
                        framing,
                    });
                }
            } else if let Some(response) = state.response.as_mut() {
                response.body.extend_from_slice(&segment.payload);
            }
            state.packets.push(packet);

            match state.response.as_ref() {
                Some(response) => response.is_complete() || segment.fin || segment.rst,
                None => {
                    if segment.fin || segment.rst {
                        tracing::info!(stream = %key, "Connection closed before a response, discarding stream");
                    }
                    false
                }
            }
        };

        if complete {
            let (_, state) = self.streams.remove(&key)?;
            let completed = state.into_completed()?;
            metrics::record_exchange_captured();
            tracing::debug!(
                stream = %key,
                method = %completed.exchange.request.method,
                path = %completed.exchange.request.path,
                packets = completed.packets.len(),
                "Exchange complete"
            );
            return Some(completed);
        }

        if segment.fin || segment.rst {
            let unanswered = self
                .streams
                .get(&key)
                .map(|s| s.response.is_none())
                .unwrap_or(false);
            if unanswered {
                self.streams.remove(&key);
                metrics::record_stream_discarded("no_response");
            }
        }
        None
    }
}

fn response_framing(method: &str, status: u16, response_headers: &headers::Headers) -> Framing {
    if method.eq_ignore_ascii_case("HEAD") || (100..200).contains(&status) || status == 204 || status == 304 {
        Framing::Empty
    } else if headers::is_chunked(response_headers) {
        Framing::Chunked
    } else if let Some(n) = headers::content_length(response_headers) {
        Framing::Length(n)
    } else {
        Framing::UntilClose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::packet::build_segments;
    use crate::exchange::Body;
    use std::net::SocketAddr;
    use std::time::Duration;

    const CLIENT: &str = "10.0.2.15:50000";
    const SERVER: &str = "93.184.216.34:80";

    fn frames(src: &str, dst: &str, payload: &[u8], fin: bool) -> Vec<RawPacket> {
        frames_at(src, dst, 1, payload, fin)
    }

    fn frames_at(src: &str, dst: &str, seq: u32, payload: &[u8], fin: bool) -> Vec<RawPacket> {
        let src: SocketAddr = src.parse().unwrap();
        let dst: SocketAddr = dst.parse().unwrap();
        build_segments(src, dst, seq, payload, fin)
            .0
            .into_iter()
            .map(|f| RawPacket::ethernet(Duration::from_secs(1), f))
            .collect()
    }

    fn feed(reconstructor: &StreamReconstructor, packets: Vec<RawPacket>) -> Vec<CompletedExchange> {
        packets.into_iter().filter_map(|p| reconstructor.process(p)).collect()
    }

    #[test]
    fn test_content_length_completes_exchange() {
        let r = StreamReconstructor::new(80);
        assert!(feed(&r, frames(CLIENT, SERVER, b"GET /status HTTP/1.1\r\nHost: a\r\n\r\n", false)).is_empty());

        let done = feed(
            &r,
            frames(SERVER, CLIENT, b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nRunning", false),
        );
        assert_eq!(done.len(), 1);
        let exchange = &done[0].exchange;
        assert_eq!(exchange.request.path, "/status");
        assert_eq!(exchange.request.source_port, 50000);
        let response = exchange.response.as_ref().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.source_port, 80);
        assert_eq!(response.body, Some(Body::Text("Running".into())));
        assert_eq!(done[0].packets.len(), 2);
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn test_body_spanning_segments() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /big HTTP/1.1\r\n\r\n", false));

        let body = vec![b'x'; 4000];
        let mut response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        response.extend_from_slice(&body);
        let packets = frames(SERVER, CLIENT, &response, false);
        assert!(packets.len() > 1);

        let done = feed(&r, packets);
        assert_eq!(done.len(), 1);
        let stored = done[0].exchange.response.as_ref().unwrap().body.clone().unwrap();
        assert_eq!(stored.to_bytes().unwrap(), body);
    }

    #[test]
    fn test_fin_closes_unframed_response() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /stream HTTP/1.0\r\n\r\n", false));
        let head = b"HTTP/1.0 200 OK\r\n\r\npart one ";
        assert!(feed(&r, frames(SERVER, CLIENT, head, false)).is_empty());

        let done = feed(&r, frames_at(SERVER, CLIENT, 1 + head.len() as u32, b"part two", true));
        assert_eq!(done.len(), 1);
        let body = done[0].exchange.response.as_ref().unwrap().body.clone();
        assert_eq!(body, Some(Body::Text("part one part two".into())));
    }

    #[test]
    fn test_chunked_response() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /chunked HTTP/1.1\r\n\r\n", false));
        let done = feed(
            &r,
            frames(
                SERVER,
                CLIENT,
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
                false,
            ),
        );
        assert_eq!(done.len(), 1);
        let body = done[0].exchange.response.as_ref().unwrap().body.clone();
        assert_eq!(body, Some(Body::Text("Wikipedia".into())));
    }

    #[test]
    fn test_bodiless_status_completes_immediately() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"DELETE /item/1 HTTP/1.1\r\n\r\n", false));
        let done = feed(&r, frames(SERVER, CLIENT, b"HTTP/1.1 204 No Content\r\n\r\n", false));
        assert_eq!(done.len(), 1);
        assert!(done[0].exchange.response.as_ref().unwrap().body.is_none());
    }

    #[test]
    fn test_request_body_continuation() {
        let r = StreamReconstructor::new(80);
        let head = b"POST /items HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello";
        feed(&r, frames(CLIENT, SERVER, head, false));
        feed(&r, frames_at(CLIENT, SERVER, 1 + head.len() as u32, b" world", false));
        let done = feed(&r, frames(SERVER, CLIENT, b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n", false));
        assert_eq!(done[0].exchange.request.body, Some(Body::Text("hello world".into())));
    }

    #[test]
    fn test_fin_before_request_discards_stream() {
        let r = StreamReconstructor::new(80);
        assert!(feed(&r, frames(SERVER, CLIENT, b"", true)).is_empty());
        assert!(feed(&r, frames(CLIENT, SERVER, b"", true)).is_empty());
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn test_incomplete_exchange_discarded_on_finish() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /slow HTTP/1.1\r\n\r\n", false));
        feed(&r, frames(SERVER, CLIENT, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort", false));
        assert_eq!(r.in_flight(), 1);
        assert_eq!(r.finish(), 1);
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn test_other_ports_ignored() {
        let r = StreamReconstructor::new(80);
        let packets = frames("10.0.0.1:40000", "10.0.0.2:443", b"GET / HTTP/1.1\r\n\r\n", false);
        assert!(feed(&r, packets).is_empty());
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn test_keep_alive_connection_yields_two_exchanges() {
        let r = StreamReconstructor::new(80);
        let mut completed = Vec::new();
        for path in ["/one", "/two"] {
            feed(&r, frames(CLIENT, SERVER, format!("GET {path} HTTP/1.1\r\n\r\n").as_bytes(), false));
            completed.extend(feed(
                &r,
                frames(SERVER, CLIENT, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok", false),
            ));
        }
        let paths: Vec<_> = completed.iter().map(|c| c.exchange.request.path.as_str()).collect();
        assert_eq!(paths, vec!["/one", "/two"]);
    }

    #[test]
    fn test_response_head_split_across_segments() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /s HTTP/1.1\r\n\r\n", false));

        let first = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\n";
        assert!(feed(&r, frames(SERVER, CLIENT, first, false)).is_empty());
        let done = feed(
            &r,
            frames_at(SERVER, CLIENT, 1 + first.len() as u32, b"Content-Length: 7\r\n\r\nRunning", false),
        );

        assert_eq!(done.len(), 1);
        let response = done[0].exchange.response.as_ref().unwrap();
        assert_eq!(response.headers["set-cookie"], "a=1");
        assert_eq!(response.headers["content-length"], "7");
        assert_eq!(response.body, Some(Body::Text("Running".into())));
        assert_eq!(done[0].packets.len(), 3);
    }

    #[test]
    fn test_truncated_head_closed_by_fin() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /cut HTTP/1.1\r\n\r\n", false));
        let done = feed(&r, frames(SERVER, CLIENT, b"HTTP/1.1 502 Bad Gateway\r\nX-Partial: 1", true));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].exchange.response.as_ref().unwrap().status_code, 502);
    }

    #[test]
    fn test_retransmitted_segments_ignored() {
        let r = StreamReconstructor::new(80);
        feed(&r, frames(CLIENT, SERVER, b"GET /big HTTP/1.1\r\n\r\n", false));
        // Request retransmission must not reset the stream.
        feed(&r, frames(CLIENT, SERVER, b"GET /big HTTP/1.1\r\n\r\n", false));

        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello";
        assert!(feed(&r, frames(SERVER, CLIENT, head, false)).is_empty());
        let rest = frames_at(SERVER, CLIENT, 1 + head.len() as u32, b"world", false);
        let mut packets = rest.clone();
        packets.insert(0, rest[0].clone());
        packets.insert(0, frames(SERVER, CLIENT, head, false).remove(0));

        let done = feed(&r, packets);
        assert_eq!(done.len(), 1);
        let response = done[0].exchange.response.as_ref().unwrap();
        assert_eq!(response.body, Some(Body::Text("helloworld".into())));
        assert_eq!(done[0].packets.len(), 3);
    }
}
