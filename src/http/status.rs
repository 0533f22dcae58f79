//! Minimal status responder.
//!
//! # Responsibilities
//! - Frame HTTP/1.x request heads out of the inbound byte stream (httparse)
//! - Answer every request with an empty status response
//! - Honour `Connection: close` / keep-alive and skip `Content-Length` bodies
//! - Count partially received requests on a [`LoadGauge`]
//!
//! This is the protocol the binary serves; it exists to exercise the
//! controller end to end, not to implement HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use httparse::Status;

use crate::header::{EncodingError, HeaderReader, HeaderWriter};
use crate::net::admission::{LoadGauge, LoadGuard};
use crate::net::connection::{Progress, Protocol, ProtocolFactory};

/// Largest request head accepted before answering 431.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Headers beyond this count are answered with 431.
const MAX_HEADERS: usize = 64;

/// Header lines shared by every response.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    common: String,
}

impl ResponseTemplate {
    pub fn new() -> Result<Self, EncodingError> {
        let mut server = HeaderWriter::new();
        server
            .append_token(env!("CARGO_PKG_NAME"))?
            .append_char('/')
            .append(env!("CARGO_PKG_VERSION"))
            .append_space()
            .append_comment(std::env::consts::OS);

        let mut cache_control = HeaderWriter::new();
        cache_control
            .append_parameter("no-store", None)?
            .append_parameter("max-age", Some("0"))?;

        Ok(Self {
            common: format!("Server: {server}\r\nCache-Control: {cache_control}\r\n"),
        })
    }

    fn write(&self, outbound: &mut Vec<u8>, status: u16, close: bool) {
        let head = format!(
            "HTTP/1.1 {} {}\r\n{}Connection: {}\r\n{}\r\n",
            status,
            reason(status),
            self.common,
            if close { "close" } else { "keep-alive" },
            // A 204 must not carry a Content-Length.
            if status == 204 { "" } else { "Content-Length: 0\r\n" },
        );
        outbound.extend_from_slice(head.as_bytes());
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        204 => "No Content",
        400 => "Bad Request",
        431 => "Request Header Fields Too Large",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Build a factory producing one [`StatusProtocol`] per connection.
pub fn status_factory(gauge: Option<LoadGauge>) -> Result<ProtocolFactory, EncodingError> {
    let template = Arc::new(ResponseTemplate::new()?);
    Ok(Arc::new(move |peer: SocketAddr| {
        Box::new(StatusProtocol::new(peer, Arc::clone(&template), gauge.clone())) as Box<dyn Protocol>
    }))
}

/// Answers each request head with `204 No Content`.
pub struct StatusProtocol {
    peer: SocketAddr,
    template: Arc<ResponseTemplate>,
    gauge: Option<LoadGauge>,
    in_flight: Option<LoadGuard>,
    body_remaining: usize,
}

/// What was learned from one request head.
#[derive(Debug, PartialEq, Eq)]
enum Head {
    Request { keep_alive: bool, content_length: usize },
    Invalid(u16),
}

impl StatusProtocol {
    pub fn new(peer: SocketAddr, template: Arc<ResponseTemplate>, gauge: Option<LoadGauge>) -> Self {
        Self {
            peer,
            template,
            gauge,
            in_flight: None,
            body_remaining: 0,
        }
    }

    fn respond(&mut self, inbound: &mut Vec<u8>, outbound: &mut Vec<u8>) -> Progress {
        loop {
            if self.body_remaining > 0 {
                let skipped = self.body_remaining.min(inbound.len());
                inbound.drain(..skipped);
                self.body_remaining -= skipped;
                if self.body_remaining > 0 {
                    return Progress::Continue;
                }
            }

            if inbound.is_empty() {
                return Progress::Continue;
            }

            let head = match parse_head(inbound) {
                Ok(Status::Complete((len, _))) if len > MAX_HEAD_SIZE => Head::Invalid(431),
                Ok(Status::Complete((len, head))) => {
                    inbound.drain(..len);
                    head
                }
                Ok(Status::Partial) if inbound.len() > MAX_HEAD_SIZE => Head::Invalid(431),
                Ok(Status::Partial) => return Progress::Continue,
                Err(httparse::Error::TooManyHeaders) => Head::Invalid(431),
                Err(e) => {
                    tracing::debug!(peer_addr = %self.peer, error = %e, "Unparseable request head");
                    Head::Invalid(400)
                }
            };

            match head {
                Head::Request {
                    keep_alive,
                    content_length,
                } => {
                    self.body_remaining = content_length;
                    self.template.write(outbound, 204, !keep_alive);
                    if !keep_alive {
                        return Progress::CloseAfterFlush;
                    }
                }
                Head::Invalid(status) => {
                    tracing::debug!(peer_addr = %self.peer, status, "Rejecting request");
                    inbound.clear();
                    self.template.write(outbound, status, true);
                    return Progress::CloseAfterFlush;
                }
            }
        }
    }
}

impl Protocol for StatusProtocol {
    fn on_inbound(&mut self, inbound: &mut Vec<u8>, outbound: &mut Vec<u8>) -> Progress {
        let progress = self.respond(inbound, outbound);

        let partial = progress == Progress::Continue && (!inbound.is_empty() || self.body_remaining > 0);
        if !partial {
            self.in_flight = None;
        } else if self.in_flight.is_none() {
            self.in_flight = self.gauge.as_ref().map(LoadGauge::enter);
        }

        progress
    }

    fn on_closed(&mut self) {
        self.in_flight = None;
    }
}

/// Frame one request head at the start of `buf`.
///
/// `Complete` carries the head length in bytes and what the head asks for.
fn parse_head(buf: &[u8]) -> Result<Status<(usize, Head)>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let len = match request.parse(buf)? {
        Status::Complete(len) => len,
        Status::Partial => return Ok(Status::Partial),
    };
    Ok(Status::Complete((len, interpret(&request))))
}

fn interpret(request: &httparse::Request<'_, '_>) -> Head {
    let mut keep_alive = match request.version {
        Some(1) => true,
        Some(0) => false,
        _ => return Head::Invalid(400),
    };
    let mut content_length = None;

    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("connection") {
            let Ok(value) = std::str::from_utf8(header.value) else {
                return Head::Invalid(400);
            };
            for option in connection_options(value) {
                if option.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if option.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("content-length") {
            // A second Content-Length is ambiguous framing, even when equal.
            match (content_length, parse_content_length(header.value)) {
                (None, Some(length)) => content_length = Some(length),
                _ => return Head::Invalid(400),
            }
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            return Head::Invalid(501);
        }
    }

    Head::Request {
        keep_alive,
        content_length: content_length.unwrap_or(0),
    }
}

/// Digits only: no sign, no list, no surrounding garbage.
fn parse_content_length(value: &[u8]) -> Option<usize> {
    let digits = value.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Option names of a `Connection` header value; unparseable values yield none.
fn connection_options(value: &str) -> Vec<String> {
    HeaderReader::new(value)
        .read_parameters()
        .map(|params| params.into_iter().map(|p| p.name).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(gauge: Option<LoadGauge>) -> StatusProtocol {
        StatusProtocol::new(
            "127.0.0.1:4000".parse().unwrap(),
            Arc::new(ResponseTemplate::new().unwrap()),
            gauge,
        )
    }

    fn run(protocol: &mut StatusProtocol, input: &[u8]) -> (Progress, String, Vec<u8>) {
        let mut inbound = input.to_vec();
        let mut outbound = Vec::new();
        let progress = protocol.on_inbound(&mut inbound, &mut outbound);
        (progress, String::from_utf8(outbound).unwrap(), inbound)
    }

    #[test]
    fn template_headers() {
        let mut out = Vec::new();
        ResponseTemplate::new().unwrap().write(&mut out, 204, false);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(text.contains(&format!(
            "Server: http-connector/{} ({})\r\n",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS
        )));
        assert!(text.contains("Cache-Control: no-store, max-age=0\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn answers_pipelined_requests() {
        let mut p = protocol(None);
        let (progress, out, rest) = run(
            &mut p,
            b"GET / HTTP/1.1\r\nHost: a\r\n\r\nGET /b HTTP/1.1\r\nHost: a\r\n\r\nGET /c",
        );
        assert_eq!(progress, Progress::Continue);
        assert_eq!(out.matches("HTTP/1.1 204 No Content").count(), 2);
        assert_eq!(rest, b"GET /c");
    }

    #[test]
    fn connection_close_drains() {
        let mut p = protocol(None);
        let (progress, out, _) = run(&mut p, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert_eq!(progress, Progress::CloseAfterFlush);
        assert!(out.contains("Connection: close\r\n"));
    }

    #[test]
    fn http10_closes_unless_keep_alive() {
        let mut p = protocol(None);
        let (progress, _, _) = run(&mut p, b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(progress, Progress::CloseAfterFlush);

        let mut p = protocol(None);
        let (progress, out, _) = run(&mut p, b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n");
        assert_eq!(progress, Progress::Continue);
        assert!(out.contains("Connection: keep-alive"));
    }

    #[test]
    fn skips_request_body() {
        let mut p = protocol(None);
        let (progress, out, rest) = run(
            &mut p,
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel",
        );
        assert_eq!(progress, Progress::Continue);
        assert_eq!(out.matches("204").count(), 1);
        assert!(rest.is_empty());

        let (_, out, rest) = run(&mut p, b"loGET / HTTP/1.1\r\n\r\n");
        assert_eq!(out.matches("204").count(), 1);
        assert!(rest.is_empty());
    }

    #[test]
    fn malformed_requests_are_rejected() {
        for (input, status) in [
            (&b"NONSENSE\r\n\r\n"[..], "400"),
            (b"GET / HTTP/2.0\r\n\r\n", "400"),
            (b"GET / HTTP/1.1\r\nno colon\r\n\r\n", "400"),
            (b"GET / HTTP/1.1\r\nContent-Length: x\r\n\r\n", "400"),
            (b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n", "501"),
        ] {
            let mut p = protocol(None);
            let (progress, out, _) = run(&mut p, input);
            assert_eq!(progress, Progress::CloseAfterFlush);
            assert!(out.starts_with(&format!("HTTP/1.1 {status} ")), "{out}");
            assert!(out.contains("Content-Length: 0\r\n"));
        }
    }

    #[test]
    fn ambiguous_framing_is_rejected() {
        for input in [
            &b"POST / HTTP/1.1\r\nContent-Length: +5\r\n\r\nhello"[..],
            b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: 5, 5\r\n\r\nhello",
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 0\r\n\r\nhello",
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\nhello",
            b"GET / HTTP/1.1\r\nHost : a\r\n\r\n",
            b"GET / HTTP/1.1\r\n: a\r\n\r\n",
        ] {
            let mut p = protocol(None);
            let (progress, out, _) = run(&mut p, input);
            assert_eq!(progress, Progress::CloseAfterFlush, "{:?}", String::from_utf8_lossy(input));
            assert!(out.starts_with("HTTP/1.1 400 "), "{out}");
        }
    }

    #[test]
    fn content_length_allows_surrounding_spaces() {
        assert_eq!(parse_content_length(b" 12 "), Some(12));
        assert_eq!(parse_content_length(b"0"), Some(0));
        assert_eq!(parse_content_length(b""), None);
        assert_eq!(parse_content_length(b"+1"), None);
        assert_eq!(parse_content_length(b"1x"), None);
    }

    #[test]
    fn bare_lf_line_endings_are_answered() {
        let mut p = protocol(None);
        let (progress, out, rest) = run(&mut p, b"GET / HTTP/1.1\nHost: a\n\n");
        assert_eq!(progress, Progress::Continue);
        assert!(out.starts_with("HTTP/1.1 204 "), "{out}");
        assert!(rest.is_empty());
    }

    #[test]
    fn too_many_headers_is_rejected() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            input.extend_from_slice(format!("X-Filler-{i}: v\r\n").as_bytes());
        }
        input.extend_from_slice(b"\r\n");

        let mut p = protocol(None);
        let (progress, out, _) = run(&mut p, &input);
        assert_eq!(progress, Progress::CloseAfterFlush);
        assert!(out.starts_with("HTTP/1.1 431 "), "{out}");
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut p = protocol(None);
        let input = vec![b'a'; MAX_HEAD_SIZE + 1];
        let (progress, out, rest) = run(&mut p, &input);
        assert_eq!(progress, Progress::CloseAfterFlush);
        assert!(out.starts_with("HTTP/1.1 431 "));
        assert!(rest.is_empty());
    }

    #[test]
    fn partial_requests_count_as_pending() {
        let gauge = LoadGauge::new();
        let mut p = protocol(Some(gauge.clone()));

        let mut inbound = b"GET / HTTP/1.1\r\n".to_vec();
        let mut outbound = Vec::new();
        p.on_inbound(&mut inbound, &mut outbound);
        assert_eq!(gauge.current(), 1);

        // More bytes of the same request do not count twice.
        inbound.extend_from_slice(b"Host: a\r\n");
        p.on_inbound(&mut inbound, &mut outbound);
        assert_eq!(gauge.current(), 1);

        inbound.extend_from_slice(b"\r\n");
        p.on_inbound(&mut inbound, &mut outbound);
        assert_eq!(gauge.current(), 0);

        inbound.extend_from_slice(b"GET");
        p.on_inbound(&mut inbound, &mut outbound);
        assert_eq!(gauge.current(), 1);
        p.on_closed();
        assert_eq!(gauge.current(), 0);
    }

    #[test]
    fn connection_options_parse_lists() {
        assert_eq!(connection_options("close"), vec!["close"]);
        assert_eq!(connection_options("Upgrade, keep-alive"), vec!["Upgrade", "keep-alive"]);
        assert!(connection_options("\"bad").is_empty());
    }
}
