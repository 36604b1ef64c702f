//! Scripted in-memory transport for driver tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

/// One step of a scripted receive sequence.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    /// A receive that would block (no data yet).
    Pending,
    /// Peer closed the stream.
    Eof,
    Error(ErrorKind),
}

impl Chunk {
    pub fn data(bytes: &[u8]) -> Self {
        Chunk::Data(bytes.to_vec())
    }

    pub fn line(text: &str) -> Self {
        Chunk::Data(format!("{text}\n").into_bytes())
    }
}

/// Transport that replays scripted receive chunks and records every write.
///
/// Once the script is exhausted every read reports `WouldBlock`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    chunks: VecDeque<Chunk>,
    written: Vec<u8>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into(),
            written: Vec::new(),
        }
    }

    /// Transport answering with one line per entry.
    pub fn with_lines(lines: &[&str]) -> Self {
        Self::new(lines.iter().map(|l| Chunk::line(l)).collect())
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.chunks.push_back(chunk);
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// Written bytes split into lines without terminators.
    pub fn written_lines(&self) -> Vec<String> {
        self.written().lines().map(str::to_string).collect()
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            None | Some(Chunk::Pending) => Err(ErrorKind::WouldBlock.into()),
            Some(Chunk::Eof) => Ok(0),
            Some(Chunk::Error(kind)) => Err(kind.into()),
            Some(Chunk::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.chunks.push_front(Chunk::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
