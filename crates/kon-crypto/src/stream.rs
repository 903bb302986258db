//! Chunked streaming shared by both pipelines.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sequoia_openpgp as openpgp;
use openpgp::types::{CompressionAlgorithm, SymmetricAlgorithm};

/// Default chunk size for streaming.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 12;

/// Cooperative cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Algorithm and buffering choices for the pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub buffer_size: usize,
    pub cipher: SymmetricAlgorithm,
    pub compression: CompressionAlgorithm,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            cipher: SymmetricAlgorithm::AES256,
            compression: CompressionAlgorithm::Zip,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Copy `input` to `output` in chunks of `buffer_size`, passing every chunk
/// to `tap` as well. Returns the number of bytes copied.
pub fn pump<R, W, F>(
    input: &mut R,
    output: &mut W,
    buffer_size: usize,
    cancel: &CancelToken,
    mut tap: F,
) -> Result<u64, PumpError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(PumpError::Cancelled);
        }
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PumpError::Read(e)),
        };
        tap(&buf[..n]);
        output.write_all(&buf[..n]).map_err(PumpError::Write)?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_copies_in_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut out = Vec::new();
        let mut chunks = 0;
        let n = pump(&mut data.as_slice(), &mut out, 256, &CancelToken::new(), |c| {
            assert!(c.len() <= 256);
            chunks += 1;
        })
        .unwrap();
        assert_eq!(n, 10_000);
        assert_eq!(out, data);
        assert_eq!(chunks, 40);
    }

    #[test]
    fn pump_honours_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let err = pump(&mut &b"data"[..], &mut out, 16, &cancel, |_| {}).unwrap_err();
        assert!(matches!(err, PumpError::Cancelled));
        assert!(out.is_empty());
    }
}
