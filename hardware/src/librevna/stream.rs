//! Buffered, timeout-aware reader over a non-blocking byte stream.
//!
//! The LibreVNA-GUI answers every request with a single newline-terminated line,
//! but a TCP receive can return any fragment of that line, several lines at once,
//! or nothing at all. [`StreamReader`] accumulates received bytes in an internal
//! buffer so callers can ask for "exactly N bytes" or "everything up to the next
//! delimiter" without caring how the bytes were chunked on the wire.
//!
//! # Buffering
//!
//! Bytes that arrive past the requested delimiter (or past the requested length)
//! stay at the front of the buffer and are handed out by the next call. Bytes are
//! never reordered or duplicated, and a call that fails with a timeout leaves
//! everything received so far in place for the next call.
//!
//! # Polling
//!
//! The source is expected to be in non-blocking mode: a receive that has no data
//! yet returns [`std::io::ErrorKind::WouldBlock`]. The reader polls with a short
//! sleep until data arrives or the wall-clock deadline (computed on entry) passes.
//! Only "would block" and "interrupted" are treated as "no data yet"; every other
//! I/O failure propagates to the caller.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use tracing::trace;

use super::scpi::{ScpiError, ScpiResult};

/// Default wait for a delimiter before giving up.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Size of the scratch chunk used for each receive attempt.
const CHUNK_SIZE: usize = 4096;

/// Sleep between receive attempts that returned no data.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Buffered reader over a non-blocking byte source.
///
/// # Example
///
/// ```
/// use spectrum_hardware::librevna::StreamReader;
///
/// let source: &[u8] = b"AB\nCD\n";
/// let mut reader = StreamReader::new(source);
/// assert_eq!(reader.read_line()?, b"AB\n");
/// assert_eq!(reader.read_line()?, b"CD\n");
/// # Ok::<(), spectrum_hardware::librevna::ScpiError>(())
/// ```
pub struct StreamReader<R> {
    inner: R,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl<R: Read> StreamReader<R> {
    /// Wrap a source using the default one second timeout.
    pub fn new(inner: R) -> Self {
        Self::with_timeout(inner, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeout(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Bytes received but not yet handed to a caller.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// - [`ScpiError::ShortRead`] if the peer closes the stream before `n` bytes
    ///   are available. The partial data is reported in the error and dropped.
    /// - [`ScpiError::Timeout`] if `n` bytes do not arrive before the deadline.
    ///   Received bytes stay buffered.
    pub fn read_exact(&mut self, n: usize) -> ScpiResult<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;

        while self.buffer.len() < n {
            self.check_deadline(deadline)?;
            match self.receive()? {
                Received::Data => {}
                Received::Pending => std::thread::sleep(POLL_INTERVAL),
                Received::Closed => {
                    let partial = std::mem::take(&mut self.buffer);
                    return Err(ScpiError::ShortRead {
                        partial,
                        expected: n,
                    });
                }
            }
        }

        Ok(self.buffer.drain(..n).collect())
    }

    /// Consume one newline-terminated line, delimiter included.
    pub fn read_line(&mut self) -> ScpiResult<Vec<u8>> {
        self.read_until(b"\n")
    }

    /// Consume bytes up to and including `delimiter`.
    ///
    /// Only single-byte delimiters are supported.
    ///
    /// # Errors
    ///
    /// - [`ScpiError::InvalidArgument`] if `delimiter` is not exactly one byte.
    /// - [`ScpiError::Timeout`] if the delimiter does not arrive before the
    ///   deadline. Bytes received so far stay buffered for the next call.
    /// - [`ScpiError::ConnectionClosed`] if the peer closes the stream first.
    pub fn read_until(&mut self, delimiter: &[u8]) -> ScpiResult<Vec<u8>> {
        let &[delim] = delimiter else {
            return Err(ScpiError::InvalidArgument(format!(
                "only single-byte delimiters are supported, got {} bytes",
                delimiter.len()
            )));
        };

        let deadline = Instant::now() + self.timeout;
        let mut scanned = 0;

        loop {
            if let Some(pos) = self.buffer[scanned..].iter().position(|&b| b == delim) {
                let end = scanned + pos + 1;
                return Ok(self.buffer.drain(..end).collect());
            }
            scanned = self.buffer.len();

            // A peer that keeps sending without the delimiter must still time out.
            self.check_deadline(deadline)?;
            match self.receive()? {
                Received::Data => {}
                Received::Pending => std::thread::sleep(POLL_INTERVAL),
                Received::Closed => {
                    return Err(ScpiError::ConnectionClosed {
                        partial: std::mem::take(&mut self.buffer),
                    });
                }
            }
        }
    }

    /// Drop everything currently buffered and return it.
    pub fn discard_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// One receive attempt into a scratch chunk, appended to the buffer.
    fn receive(&mut self) -> ScpiResult<Received> {
        let mut chunk = [0u8; CHUNK_SIZE];
        match self.inner.read(&mut chunk) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => {
                trace!("recv {} bytes: {:?}", n, String::from_utf8_lossy(&chunk[..n]));
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(Received::Data)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(Received::Pending)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_deadline(&self, deadline: Instant) -> ScpiResult<()> {
        if Instant::now() > deadline {
            return Err(ScpiError::Timeout {
                waited: self.timeout,
            });
        }
        Ok(())
    }
}

enum Received {
    Data,
    Pending,
    Closed,
}
