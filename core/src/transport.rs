//! One-connection-per-call HTTP/1.1 transport.
//!
//! # Design
//! `execute` opens a fresh TCP connection (wrapped in rustls when the client
//! is configured for `https`), writes the request line, headers and body,
//! then parses the response head and hands back a body reader that owns the
//! connection. The caller decides whether to drain that reader immediately
//! or stream from it. No connection is reused across calls.
//!
//! Response bodies may be framed by `Content-Length`, by chunked transfer
//! encoding, or by the server closing the connection.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use rustls::pki_types::ServerName;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::IdsError;
use crate::http::{HttpRequest, HttpResponse, RequestBody, ResponseBody};
use crate::upload::{self, UploadSummary};

/// Longest status or header line accepted from a server.
const MAX_LINE: u64 = 64 * 1024;

enum Stream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Send `request` and return the response head with a live body handle.
///
/// For `RequestBody::Chunked` the bytes come from `upload`, which must be
/// present; the returned summary describes what was sent.
pub(crate) fn execute(
    config: &ClientConfig,
    request: &HttpRequest,
    upload: Option<&mut dyn Read>,
) -> Result<(HttpResponse, Option<UploadSummary>), IdsError> {
    if request.body == RequestBody::Chunked && upload.is_none() {
        return Err(IdsError::bad_request("Input stream is null"));
    }
    let mut stream = connect(config)?;

    let summary = {
        let mut out = BufWriter::new(&mut stream);
        out.write_all(&encode_head(request))?;
        let summary = match (&request.body, upload) {
            (RequestBody::Form(form), _) => {
                out.write_all(form.as_bytes())?;
                None
            }
            (RequestBody::Chunked, Some(source)) => {
                let (_, summary) = upload::stream_body(source, &mut out, upload::BLOCK_SIZE)?;
                Some(summary)
            }
            (RequestBody::Chunked, None) | (RequestBody::Empty, _) => None,
        };
        out.flush()?;
        summary
    };

    let mut reader = BufReader::new(stream);
    let (status, headers) = read_head(&mut reader)?;
    debug!(status, target = %request.target, "response received");

    let body = body_reader(reader, status, &headers)?;
    Ok((HttpResponse { status, headers, body }, summary))
}

fn connect(config: &ClientConfig) -> Result<Stream, IdsError> {
    let addr = (config.host(), config.port());
    let timeout = config.timeout();

    let tcp = match timeout {
        None => TcpStream::connect(addr),
        Some(timeout) => {
            let mut last = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
            let mut connected = None;
            for candidate in addr.to_socket_addrs()? {
                match TcpStream::connect_timeout(&candidate, timeout) {
                    Ok(s) => {
                        connected = Some(s);
                        break;
                    }
                    Err(e) => last = e,
                }
            }
            connected.ok_or(last)
        }
    }
    .map_err(|e| {
        IdsError::internal(format!("cannot connect to {}: {e}", config.authority()))
    })?;

    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)?;
    tcp.set_nodelay(true)?;
    debug!(authority = config.authority(), tls = config.use_tls(), "connected");

    match config.tls() {
        None => Ok(Stream::Plain(tcp)),
        Some(tls) => {
            let name = ServerName::try_from(config.host().to_string())
                .map_err(|e| IdsError::bad_request(format!("invalid TLS server name: {e}")))?;
            let conn = rustls::ClientConnection::new(tls.clone(), name)
                .map_err(|e| IdsError::internal(format!("TLS setup failed: {e}")))?;
            Ok(Stream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
        }
    }
}

fn encode_head(request: &HttpRequest) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.target);
    for (name, value) in &request.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let n = reader.by_ref().take(MAX_LINE).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-response"));
    }
    if !line.ends_with(b"\n") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "response line too long"));
    }
    let text = String::from_utf8_lossy(&line);
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

/// Parse the status line and headers, skipping interim `1xx` responses.
fn read_head<R: BufRead>(reader: &mut R) -> io::Result<(u16, Vec<(String, String)>)> {
    loop {
        let status_line = read_line(reader)?;
        let status = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("malformed header line: {line}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        if (100..200).contains(&status) && status != 101 {
            continue;
        }
        return Ok((status, headers));
    }
}

fn parse_status_line(line: &str) -> io::Result<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("malformed status line: {line}")));
    }
    code.parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("malformed status line: {line}")))
}

fn body_reader<R>(reader: R, status: u16, headers: &[(String, String)]) -> io::Result<ResponseBody>
where
    R: BufRead + Send + 'static,
{
    if status == 204 || status == 304 {
        return Ok(ResponseBody::empty());
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    let chunked = header("Transfer-Encoding")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    if chunked {
        return Ok(ResponseBody::new(Box::new(ChunkedReader::new(reader)), None));
    }

    match header("Content-Length") {
        Some(len) => {
            let len: u64 = len.parse().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, format!("bad Content-Length: {len}"))
            })?;
            Ok(ResponseBody::new(Box::new(reader.take(len)), Some(len)))
        }
        None => Ok(ResponseBody::new(Box::new(reader), None)),
    }
}

/// Decodes a chunked-transfer response body.
pub(crate) struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let line = read_line(&mut self.inner)?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad chunk size: {line}")))?;
        if size == 0 {
            // Trailer section ends with an empty line.
            while !read_line(&mut self.inner)?.is_empty() {}
            self.done = true;
        }
        self.remaining = size;
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.next_chunk()?;
            if self.done {
                return Ok(0);
            }
        }

        let max = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunked body truncated"));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 && !read_line(&mut self.inner)?.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing CRLF after chunk"));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, RequestBuilder};
    use crate::params::CallParameters;
    use std::io::Cursor;

    fn read_all(mut r: impl Read) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn head_encoding_matches_request() {
        let config = ClientConfig::from_url("http://localhost:8181").unwrap();
        let mut params = CallParameters::new();
        params.insert("preparedId", "abc");
        let req = RequestBuilder::new(&config, "isPrepared", HttpMethod::Get)
            .params(params)
            .build()
            .unwrap();
        let head = String::from_utf8(encode_head(&req)).unwrap();
        assert!(head.starts_with("GET /ids/isPrepared?preparedId=abc HTTP/1.1\r\nHost: localhost:8181\r\n"));
        assert!(head.ends_with("Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn reads_status_and_headers() {
        let mut wire = Cursor::new(b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}".to_vec());
        let (status, headers) = read_head(&mut wire).unwrap();
        assert_eq!(status, 404);
        assert_eq!(headers[0], ("Content-Type".to_string(), "application/json".to_string()));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn skips_continue_responses() {
        let mut wire = Cursor::new(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n".to_vec());
        let (status, _) = read_head(&mut wire).unwrap();
        assert_eq!(status, 201);
    }

    #[test]
    fn rejects_garbage_status_line() {
        let mut wire = Cursor::new(b"SMTP ready\r\n\r\n".to_vec());
        let err = read_head(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn content_length_bounds_the_body() {
        let reader = Cursor::new(b"hello world".to_vec());
        let headers = vec![("content-length".to_string(), "5".to_string())];
        let mut body = body_reader(reader, 200, &headers).unwrap();
        assert_eq!(body.content_length(), Some(5));
        assert_eq!(body.read_to_text().unwrap(), "hello");
    }

    #[test]
    fn unframed_body_reads_to_close() {
        let reader = Cursor::new(b"until close".to_vec());
        let body = body_reader(reader, 200, &[]).unwrap();
        assert_eq!(read_all(body).unwrap(), b"until close");
    }

    #[test]
    fn no_content_is_empty() {
        let reader = Cursor::new(b"ignored".to_vec());
        let body = body_reader(reader, 204, &[]).unwrap();
        assert!(read_all(body).unwrap().is_empty());
    }

    #[test]
    fn decodes_chunked_body_with_extensions_and_trailers() {
        let wire = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\nX-Trailer: y\r\n\r\n".to_vec();
        let reader = ChunkedReader::new(Cursor::new(wire));
        assert_eq!(read_all(reader).unwrap(), b"Wikipedia in\r\n\r\nchunks.");
    }

    #[test]
    fn chunked_header_selects_decoder() {
        let reader = Cursor::new(b"3\r\nabc\r\n0\r\n\r\n".to_vec());
        let headers = vec![("Transfer-Encoding".to_string(), "gzip, chunked".to_string())];
        let body = body_reader(reader, 200, &headers).unwrap();
        assert_eq!(read_all(body).unwrap(), b"abc");
    }

    #[test]
    fn truncated_chunk_is_an_error() {
        let reader = ChunkedReader::new(Cursor::new(b"a\r\nabc".to_vec()));
        let err = read_all(reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn upload_framing_round_trips_through_decoder() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
        let (wire, _) = upload::stream_body(&mut Cursor::new(data.clone()), Vec::new(), 777).unwrap();
        let decoded = read_all(ChunkedReader::new(Cursor::new(wire))).unwrap();
        assert_eq!(decoded, data);
    }
}
