//! LibreVNA-GUI SCPI command/query transport.
//!
//! The LibreVNA-GUI exposes a text protocol on a local TCP port (19542 by default,
//! enabled under *Preferences → General → SCPI server*). Requests are SCPI-like
//! hierarchical names terminated with LF:
//!
//! ```text
//! :SA:FREQ:START 1000000\n      -> \n            (command: empty acknowledgement)
//! :SA:FREQ:START?\n             -> 1000000\n     (query: one response line)
//! :SA:TRAC:DATA? PORT1\n        -> [1000000,-80.1,1100000,-79.8,...]\n
//! ```
//!
//! The protocol is strictly synchronous: one request, one response line, no
//! pipelining. A command that receives a non-empty acknowledgement means host and
//! GUI have fallen out of step; [`ScpiDevice::cmd`] reports that as
//! [`ScpiError::Protocol`] instead of guessing a recovery.
//!
//! # Example
//!
//! ```no_run
//! use spectrum_hardware::librevna::ScpiDevice;
//!
//! let mut device = ScpiDevice::connect("localhost", 19542)?;
//! println!("GUI: {}", device.query("*IDN?")?);
//! device.cmd(":DEV:MODE SA")?;
//! # Ok::<(), spectrum_hardware::librevna::ScpiError>(())
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use super::stream::{StreamReader, DEFAULT_READ_TIMEOUT, POLL_INTERVAL};

/// Default TCP port of the LibreVNA-GUI SCPI server.
pub const DEFAULT_PORT: u16 = 19542;

/// Default host; the GUI only listens locally.
pub const DEFAULT_HOST: &str = "localhost";

/// Errors raised while talking to the LibreVNA-GUI.
#[derive(Error, Debug)]
pub enum ScpiError {
    /// Socket read/write failure other than "no data yet".
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The GUI's socket could not be reached.
    #[error("Unable to connect to LibreVNA-GUI ({0}). Make sure it is running and the TCP server is enabled")]
    ConnectionFailed(String),

    /// No complete response arrived within the wait window.
    #[error("Timed out after {waited:?} waiting for response from GUI")]
    Timeout { waited: Duration },

    /// Peer closed the stream before an exact-length read completed.
    #[error("Short read: got {} of {expected} bytes", partial.len())]
    ShortRead { partial: Vec<u8>, expected: usize },

    /// Peer closed the stream in the middle of a line.
    #[error("Connection closed by GUI ({} unterminated bytes pending)", partial.len())]
    ConnectionClosed { partial: Vec<u8> },

    /// A command was answered with something other than an empty line.
    #[error("Expected empty response but got {response:?}")]
    Protocol { response: String },

    /// Trace data whose value count is not a multiple of the tuple arity.
    #[error("Invalid trace data: {count} values is not a multiple of {arity}")]
    MalformedTrace { count: usize, arity: usize },

    /// Caller-supplied argument outside its allowed domain. No request was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A response that could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The GUI is running but has no instrument attached.
    #[error("GUI is not connected to any device")]
    DeviceNotConnected,
}

impl ScpiError {
    /// Whether the session can continue after this error.
    ///
    /// Timeouts, malformed traces, unparsable responses and rejected arguments leave
    /// the connection usable. Everything else means the connection is gone or out
    /// of step with the GUI.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ScpiError::Timeout { .. }
                | ScpiError::MalformedTrace { .. }
                | ScpiError::InvalidArgument(_)
                | ScpiError::InvalidResponse(_)
        )
    }
}

/// Result type for LibreVNA-GUI operations.
pub type ScpiResult<T> = Result<T, ScpiError>;

/// Synchronous command/query dispatcher over one connection to the GUI.
///
/// Owns the transport and its receive buffer. At most one request is in flight
/// at a time; callers that need shared access must serialize through a single
/// `ScpiDevice` (e.g. behind a mutex) rather than opening more connections.
///
/// The transport is generic so tests can drive the dispatcher with an in-memory
/// stream; real connections use [`TcpStream`] in non-blocking mode.
pub struct ScpiDevice<T = TcpStream> {
    reader: StreamReader<T>,
}

impl ScpiDevice<TcpStream> {
    /// Connect to the GUI at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::ConnectionFailed`] if the socket cannot be established.
    /// There is no retry.
    pub fn connect(host: &str, port: u16) -> ScpiResult<Self> {
        Self::connect_addr((host, port))
    }

    /// Connect to the GUI on localhost at the default port.
    pub fn connect_default() -> ScpiResult<Self> {
        Self::connect(DEFAULT_HOST, DEFAULT_PORT)
    }

    pub fn connect_addr<A: ToSocketAddrs>(addr: A) -> ScpiResult<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|e| ScpiError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        debug!("Connected to LibreVNA-GUI at {:?}", stream.peer_addr().ok());

        Ok(Self::from_transport(stream))
    }
}

impl<T: Read + Write> ScpiDevice<T> {
    /// Wrap an already-connected transport.
    ///
    /// The transport should report [`ErrorKind::WouldBlock`] when no data is
    /// available rather than blocking.
    pub fn from_transport(transport: T) -> Self {
        Self {
            reader: StreamReader::with_timeout(transport, DEFAULT_READ_TIMEOUT),
        }
    }

    /// Set the wait window for each response.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.reader.set_timeout(timeout);
    }

    pub fn timeout(&self) -> Duration {
        self.reader.timeout()
    }

    pub fn transport(&self) -> &T {
        self.reader.get_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.reader.get_mut()
    }

    /// Write one request line. A trailing newline is appended.
    pub fn send(&mut self, text: &str) -> ScpiResult<()> {
        debug!("SCPI send: {:?}", text);

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        let timeout = self.reader.timeout();
        let deadline = Instant::now() + timeout;
        let transport = self.reader.get_mut();
        let mut written = 0;
        while written < line.len() {
            match transport.write(&line[written..]) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                    if Instant::now() > deadline {
                        return Err(ScpiError::Timeout { waited: timeout });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
        transport.flush()?;
        Ok(())
    }

    /// Read one response line with the trailing line terminator removed.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::InvalidResponse`] if the line is not valid UTF-8.
    pub fn read_response(&mut self) -> ScpiResult<String> {
        let line = self.reader.read_line()?;
        let response = String::from_utf8(line)
            .map_err(|e| {
                ScpiError::InvalidResponse(format!(
                    "response is not valid UTF-8: {:?}",
                    String::from_utf8_lossy(e.as_bytes())
                ))
            })?
            .trim_end()
            .to_string();
        debug!("SCPI recv: {:?}", response);
        Ok(response)
    }

    /// Send a command and require an empty acknowledgement line.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::Protocol`] if the acknowledgement is not empty.
    pub fn cmd(&mut self, text: &str) -> ScpiResult<()> {
        self.send(text)?;
        let response = self.read_response()?;
        if !response.is_empty() {
            return Err(ScpiError::Protocol { response });
        }
        Ok(())
    }

    /// Send a query and return its response line verbatim (terminator removed).
    pub fn query(&mut self, text: &str) -> ScpiResult<String> {
        self.send(text)?;
        self.read_response()
    }

    /// Drop any bytes received but not yet consumed.
    ///
    /// Returns the discarded bytes. Useful after a timeout when a late reply
    /// would otherwise be read as the answer to the next request.
    pub fn discard_pending(&mut self) -> Vec<u8> {
        self.reader.discard_buffered()
    }
}

/// Parse a scalar response as `f64`.
pub fn parse_f64(response: &str) -> ScpiResult<f64> {
    response
        .trim()
        .parse()
        .map_err(|_| ScpiError::InvalidResponse(format!("expected a number, got {response:?}")))
}

/// Parse an integer response, accepting float formatting such as `"3.0"`.
pub fn parse_i64(response: &str) -> ScpiResult<i64> {
    let trimmed = response.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    let value = parse_f64(trimmed)?;
    if value.fract() != 0.0 {
        return Err(ScpiError::InvalidResponse(format!(
            "expected an integer, got {response:?}"
        )));
    }
    Ok(value as i64)
}

/// Parse a boolean response (`TRUE`/`FALSE`, `1`/`0`).
pub fn parse_bool(response: &str) -> ScpiResult<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "1" | "ON" => Ok(true),
        "FALSE" | "0" | "OFF" => Ok(false),
        other => Err(ScpiError::InvalidResponse(format!(
            "expected a boolean, got {other:?}"
        ))),
    }
}
