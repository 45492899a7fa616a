//! Chunked upload framing with a running CRC-32.
//!
//! # Design
//! `ChunkedWriter` owns the only byte-exact protocol detail of the client:
//! each block becomes `<hex length>\r\n<bytes>\r\n`, the body ends with
//! `0\r\n\r\n`, and the checksum folds exactly the bytes written, in the
//! order they were written. The server checksums what it receives, so the
//! two values agree only if nothing was lost or altered in transit.

use std::io::{self, ErrorKind, Read, Write};

use tracing::trace;

/// Reference block size for reading the upload source.
pub const BLOCK_SIZE: usize = 8192;

/// Content bytes sent and their CRC-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub bytes: u64,
    pub crc32: u32,
}

/// Writes chunked-transfer framing to `inner` while checksumming the payload.
pub struct ChunkedWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            bytes: 0,
        }
    }

    /// Frame and send one block. Empty blocks are skipped, since a
    /// zero-length chunk would end the body.
    pub fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        write!(self.inner, "{:x}\r\n", block.len())?;
        self.inner.write_all(block)?;
        self.inner.write_all(b"\r\n")?;
        self.hasher.update(block);
        self.bytes += block.len() as u64;
        trace!(len = block.len(), total = self.bytes, "chunk written");
        Ok(())
    }

    /// Content bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Write the terminal chunk, flush, and hand back the sink with the summary.
    pub fn finish(mut self) -> io::Result<(W, UploadSummary)> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()?;
        let summary = UploadSummary {
            bytes: self.bytes,
            crc32: self.hasher.finalize(),
        };
        Ok((self.inner, summary))
    }
}

/// Copy `source` into `sink` as a chunked body, reading `block_size` bytes at
/// a time, until the source reports end of data.
pub fn stream_body<R, W>(source: &mut R, sink: W, block_size: usize) -> io::Result<(W, UploadSummary)>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut buf = vec![0u8; block_size.max(1)];
    let mut writer = ChunkedWriter::new(sink);
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_block(&buf[..n])?;
    }
    writer.finish()
}
