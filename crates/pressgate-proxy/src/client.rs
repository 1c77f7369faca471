// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP-over-HTTP session.
//
// IPP is transported as an HTTP/1.1 POST with an `application/ipp` body
// (RFC 8010 §3).  The session keeps one connection per peer, pipelining
// nothing: request, response, optional payload, repeat.  Request bodies are
// chunk-encoded so document payloads of unknown size can stream straight
// through; response bodies honour Content-Length, chunked framing, or
// close-delimited bodies.
//
// TLS (`ipps://`, or anything on port 443) uses rustls with certificate
// verification disabled: network printers overwhelmingly present
// self-signed certificates, and the infrastructure side is trusted by
// configuration, not by CA.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use pressgate_core::error::{PressgateError, Result};

use crate::backoff::Backoff;
use crate::proto::{status_is_error, IppMessage, Operation};
use crate::shutdown::Shutdown;
use crate::source::DocumentSource;
use crate::uri::PrinterUri;

/// Per-attempt connect timeout (TCP and TLS each).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming copy chunk size.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Callback handing out the HTTP password for (authority, resource).
/// Called once per request; the session never caches the result.
pub type PasswordSupplier = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

type IoStream = BufStream<Box<dyn RawStream>>;

// ---------------------------------------------------------------------------
// TLS setup
// ---------------------------------------------------------------------------

/// Accepts whatever certificate the peer presents; signatures are still
/// checked so the handshake itself stays honest.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = rustls::ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()
                .expect("ring provider supports the default TLS versions")
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

async fn open_stream(uri: &PrinterUri) -> Result<IoStream> {
    let tcp = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((uri.host.as_str(), uri.port)),
    )
    .await
    .map_err(|_| {
        PressgateError::Connect(format!(
            "'{}' did not answer within {}s",
            uri.authority(),
            CONNECT_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| PressgateError::Connect(format!("'{}': {e}", uri.authority())))?;

    let _ = tcp.set_nodelay(true);

    let raw: Box<dyn RawStream> = if uri.requires_tls() {
        let server_name = ServerName::try_from(uri.host.clone())
            .map_err(|e| PressgateError::Tls(format!("'{}': {e}", uri.host)))?;
        let connector = TlsConnector::from(tls_config());
        let tls = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| PressgateError::Tls(format!("handshake with '{}' timed out", uri.host)))?
            .map_err(|e| PressgateError::Tls(format!("handshake with '{}': {e}", uri.host)))?;
        Box::new(tls)
    } else {
        Box::new(tcp)
    };

    Ok(BufStream::new(raw))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One HTTP connection to an IPP peer, reconnected on demand.
pub struct IppSession {
    uri: PrinterUri,
    username: String,
    password: Option<PasswordSupplier>,
    stream: Option<IoStream>,
    drop_after_response: bool,
    next_request_id: u32,
}

impl IppSession {
    /// Single connection attempt with the 30-second timeout.
    pub async fn connect(
        uri: PrinterUri,
        username: &str,
        password: Option<PasswordSupplier>,
    ) -> Result<Self> {
        let stream = open_stream(&uri).await?;
        debug!(peer = %uri.authority(), "connected");
        Ok(Self {
            uri,
            username: username.to_string(),
            password,
            stream: Some(stream),
            drop_after_response: false,
            next_request_id: 1,
        })
    }

    /// Retry the connection with Fibonacci back-off until it succeeds or
    /// shutdown is triggered.  Never gives up on its own.
    pub async fn connect_with_backoff(
        uri: PrinterUri,
        username: &str,
        password: Option<PasswordSupplier>,
        shutdown: &Shutdown,
    ) -> Result<Self> {
        let mut backoff = Backoff::new();
        loop {
            if shutdown.is_set() {
                return Err(PressgateError::Shutdown);
            }
            match Self::connect(uri.clone(), username, password.clone()).await {
                Ok(session) => return Ok(session),
                Err(err) => {
                    let delay = backoff.next_delay();
                    info!(
                        peer = %uri.authority(),
                        retry_in = delay.as_secs(),
                        error = %err,
                        "peer is not responding, retrying"
                    );
                    if shutdown.sleep(delay).await {
                        return Err(PressgateError::Shutdown);
                    }
                }
            }
        }
    }

    pub fn uri(&self) -> &PrinterUri {
        &self.uri
    }

    /// Drop the current connection; the next request opens a fresh one.
    /// The peer may have idle-closed the socket between polls.
    pub fn reset(&mut self) {
        self.stream = None;
    }

    /// Send a request with no payload and read the full response.
    pub async fn send(&mut self, request: IppMessage) -> Result<IppMessage> {
        let mut response = self.send_with_payload(request, None).await?;
        let message = response.message.clone();
        response.drain().await?;
        Ok(message)
    }

    /// Send a request, check the IPP status against the hard-error
    /// threshold, and surface failures as `IppStatus` errors.
    pub async fn send_checked(
        &mut self,
        operation: Operation,
        request: IppMessage,
    ) -> Result<IppMessage> {
        let response = self.send(request).await?;
        let status = response.status();
        if status_is_error(status) {
            let status_hex = format!("0x{status:04x}");
            warn!(
                operation = operation.name(),
                status = %status_hex,
                message = response.find("status-message").and_then(|a| a.as_str()).unwrap_or(""),
                "request failed"
            );
            return Err(PressgateError::IppStatus { operation: operation.name(), status });
        }
        Ok(response)
    }

    /// Send a request whose body continues with a streamed document payload,
    /// and return the response with its own (possibly streaming) body.
    pub async fn send_with_payload(
        &mut self,
        mut request: IppMessage,
        mut payload: Option<&mut (dyn DocumentSource + '_)>,
    ) -> Result<IppResponse<'_>> {
        request.request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        if self.drop_after_response {
            self.stream = None;
            self.drop_after_response = false;
        }
        if self.stream.is_none() {
            self.stream = Some(open_stream(&self.uri).await?);
            debug!(peer = %self.uri.authority(), "reconnected");
        }

        log_wire(true, &request);

        // Credentials are fetched per request and dropped with it.
        let authorization = self.password.as_ref().and_then(|supplier| {
            supplier(&self.uri.authority(), &self.uri.resource)
                .map(|password| BASE64.encode(format!("{}:{password}", self.username)))
        });

        let mut stream = self.stream.take().expect("stream was just opened");

        let write_result = async {
            let stream = &mut stream;
            let mut head = format!(
                "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/ipp\r\nTransfer-Encoding: chunked\r\nUser-Agent: pressgate/0.1\r\n",
                self.uri.resource,
                self.uri.authority()
            );
            if let Some(token) = &authorization {
                head.push_str(&format!("Authorization: Basic {token}\r\n"));
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).await?;

            write_chunk(stream, &request.to_bytes()).await?;

            if let Some(source) = &mut payload {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let n = source.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    write_chunk(stream, &buf[..n]).await?;
                }
            }

            stream.write_all(b"0\r\n\r\n").await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = write_result {
            return Err(PressgateError::Http(format!("sending request: {err}")));
        }

        // Response head, skipping any interim 100 Continue.  A failure here
        // leaves the connection desynced, so it is dropped.
        let (status, headers) = loop {
            match read_response_head(&mut stream).await {
                Ok((status, headers)) if status != 100 => break (status, headers),
                Ok(_) => continue,
                Err(err) => {
                    return Err(err);
                }
            }
        };

        if status != 200 {
            return Err(PressgateError::Http(format!(
                "'{}' answered HTTP {status}{}",
                self.uri.authority(),
                if status == 401 { " (authentication required)" } else { "" }
            )));
        }

        let framing = response_framing(&headers)?;
        // A close-delimited (or explicitly closed) connection cannot carry
        // another request; the next send opens a fresh one.
        let reusable = !header_contains(&headers, "connection", "close")
            && !matches!(framing, Framing::UntilClose);
        self.drop_after_response = !reusable;

        // Read the message through the still-owned stream first; it is
        // handed back to `self` only once reading succeeds, so the response
        // body returned below can borrow it with the right lifetime.
        let mut body = Body { stream: &mut stream, framing };
        let message = match IppMessage::read_from(&mut body).await {
            Ok(message) => message,
            Err(err) => return Err(err),
        };
        let Body { framing, .. } = body;
        log_wire(false, &message);

        self.stream = Some(stream);
        let stream = self.stream.as_mut().expect("stream was just put back");
        let body = Body { stream, framing };

        Ok(IppResponse { message, body, session_reusable: reusable })
    }
}

// ---------------------------------------------------------------------------
// Response body
// ---------------------------------------------------------------------------

enum Framing {
    /// Content-Length body: bytes remaining.
    Length(u64),
    /// Chunked transfer coding.
    Chunked(ChunkState),
    /// Body runs to connection close (HTTP/1.0 style).
    UntilClose,
    /// Fully consumed.
    Done,
}

enum ChunkState {
    NeedSize,
    InChunk(u64),
}

struct Body<'a> {
    stream: &'a mut IoStream,
    framing: Framing,
}

impl Body<'_> {
    async fn read_inner(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match &mut self.framing {
                Framing::Done => return Ok(0),
                Framing::UntilClose => {
                    let n = self.stream.read(buf).await?;
                    if n == 0 {
                        self.framing = Framing::Done;
                    }
                    return Ok(n);
                }
                Framing::Length(remaining) => {
                    if *remaining == 0 {
                        self.framing = Framing::Done;
                        return Ok(0);
                    }
                    let want = buf.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                    let n = self.stream.read(&mut buf[..want]).await?;
                    if n == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "body truncated",
                        ));
                    }
                    *remaining -= n as u64;
                    return Ok(n);
                }
                Framing::Chunked(state) => match state {
                    ChunkState::NeedSize => {
                        let size = read_chunk_size(self.stream).await?;
                        if size == 0 {
                            read_chunk_trailers(self.stream).await?;
                            self.framing = Framing::Done;
                            return Ok(0);
                        }
                        *state = ChunkState::InChunk(size);
                    }
                    ChunkState::InChunk(remaining) => {
                        let want = buf.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                        let n = self.stream.read(&mut buf[..want]).await?;
                        if n == 0 {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "chunk truncated",
                            ));
                        }
                        *remaining -= n as u64;
                        if *remaining == 0 {
                            read_crlf(self.stream).await?;
                            self.framing = Framing::Chunked(ChunkState::NeedSize);
                        }
                        return Ok(n);
                    }
                },
            }
        }
    }
}

#[async_trait]
impl DocumentSource for Body<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_inner(buf).await
    }
}

/// A response whose document payload is still on the wire.
pub struct IppResponse<'a> {
    pub message: IppMessage,
    body: Body<'a>,
    session_reusable: bool,
}

impl IppResponse<'_> {
    /// Consume and discard the rest of the body so the connection can be
    /// reused for the next request.
    pub async fn drain(&mut self) -> Result<()> {
        crate::source::drain(&mut self.body).await?;
        Ok(())
    }

    /// Whether the connection survives past this response.
    pub fn keeps_connection(&self) -> bool {
        self.session_reusable
    }
}

#[async_trait]
impl DocumentSource for IppResponse<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.body.read_inner(buf).await
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

async fn write_chunk(stream: &mut IoStream, data: &[u8]) -> std::io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    stream.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    stream.write_all(data).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

async fn read_line(stream: &mut IoStream) -> Result<String> {
    let mut line = Vec::with_capacity(80);
    let n = stream.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(PressgateError::Http("connection closed mid-response".into()));
    }
    while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| PressgateError::Http("non-UTF-8 response header".into()))
}

async fn read_response_head(stream: &mut IoStream) -> Result<(u16, Vec<(String, String)>)> {
    let status_line = read_line(stream).await?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(PressgateError::Http(format!("unexpected status line '{status_line}'")));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PressgateError::Http(format!("unexpected status line '{status_line}'")))?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(stream).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    Ok((status, headers))
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

fn header_contains(headers: &[(String, String)], name: &str, token: &str) -> bool {
    header(headers, name)
        .map(|v| v.to_ascii_lowercase().split(',').any(|t| t.trim() == token))
        .unwrap_or(false)
}

fn response_framing(headers: &[(String, String)]) -> Result<Framing> {
    if header_contains(headers, "transfer-encoding", "chunked") {
        return Ok(Framing::Chunked(ChunkState::NeedSize));
    }
    if let Some(length) = header(headers, "content-length") {
        let length: u64 = length
            .parse()
            .map_err(|_| PressgateError::Http(format!("bad Content-Length '{length}'")))?;
        return Ok(if length == 0 { Framing::Done } else { Framing::Length(length) });
    }
    Ok(Framing::UntilClose)
}

async fn read_chunk_size(stream: &mut IoStream) -> std::io::Result<u64> {
    let mut line = Vec::with_capacity(16);
    let n = stream.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "missing chunk size"));
    }
    let text = std::str::from_utf8(&line)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad chunk size"))?;
    let size_part = text.trim_end().split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_part, 16)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad chunk size"))
}

/// Consume the CRLF that terminates a chunk's data.
async fn read_crlf(stream: &mut IoStream) -> std::io::Result<()> {
    let mut line = Vec::with_capacity(2);
    stream.read_until(b'\n', &mut line).await?;
    Ok(())
}

/// Consume optional trailers and the blank line after the last chunk.
async fn read_chunk_trailers(stream: &mut IoStream) -> std::io::Result<()> {
    loop {
        let mut line = Vec::with_capacity(16);
        let n = stream.read_until(b'\n', &mut line).await?;
        if n == 0 {
            // Peers that close right after the last chunk are tolerated.
            return Ok(());
        }
        while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            line.pop();
        }
        if line.is_empty() {
            return Ok(());
        }
    }
}

// ---------------------------------------------------------------------------
// Wire log
// ---------------------------------------------------------------------------

/// Full request/response dump, one attribute per line, grouped by tag
/// boundaries.  Only materializes when debug logging is enabled.
fn log_wire(is_request: bool, message: &IppMessage) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let what = if is_request {
        Operation::from_u16(message.code).map_or("unknown-operation", Operation::name).to_string()
    } else {
        format!("status 0x{:04x}", message.code)
    };
    debug!(
        target: "pressgate::wire",
        "{} {} request-id {} IPP/{}.{}",
        if is_request { ">" } else { "<" },
        what,
        message.request_id,
        message.version.0,
        message.version.1
    );
    for line in message.dump() {
        debug!(target: "pressgate::wire", "  {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_prefers_chunked() {
        let headers = vec![
            ("transfer-encoding".to_string(), "chunked".to_string()),
            ("content-length".to_string(), "12".to_string()),
        ];
        assert!(matches!(response_framing(&headers), Ok(Framing::Chunked(_))));
    }

    #[test]
    fn framing_uses_content_length() {
        let headers = vec![("content-length".to_string(), "42".to_string())];
        assert!(matches!(response_framing(&headers), Ok(Framing::Length(42))));

        let empty = vec![("content-length".to_string(), "0".to_string())];
        assert!(matches!(response_framing(&empty), Ok(Framing::Done)));
    }

    #[test]
    fn framing_falls_back_to_close_delimited() {
        assert!(matches!(response_framing(&[]), Ok(Framing::UntilClose)));
    }

    #[test]
    fn header_lookup_is_token_aware() {
        let headers = vec![("connection".to_string(), "Keep-Alive, Close".to_string())];
        assert!(header_contains(&headers, "connection", "close"));
        assert!(header_contains(&headers, "connection", "keep-alive"));
        assert!(!header_contains(&headers, "connection", "upgrade"));
    }
}
