//! In-process stand-in for the LibreVNA-GUI SCPI server.
//!
//! Accepts one connection on an ephemeral localhost port and answers requests
//! line by line. Settings are echoed back as last written. The averaging level
//! advances by one sweep per `:SA:ACQ:AVGLEV?` poll and is reset by
//! `:SA:ACQ:AVG`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub const TRACE_PORT1: &str = "[1000000,-80.5,2000000,-79.5,3000000,-81]";
pub const TRACE_PORT2: &str = "[1000000,-90.5,2000000,-89.5,3000000,-91]";

/// A localhost port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[derive(Default)]
pub struct FakeGuiOptions {
    /// Raise `stop` once this many port 2 traces have been served
    pub stop_after_blocks: Option<(usize, Arc<AtomicBool>)>,
    /// Command headers whose value is ignored, so verification fails
    pub reject: Vec<&'static str>,
    /// Send each response in two writes with a pause between them
    pub split_writes: bool,
    /// Header that makes the server send half a line and hang up
    pub close_on: Option<&'static str>,
}

pub struct FakeGui {
    pub addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeGui {
    pub fn start(options: FakeGuiOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let server_log = log.clone();

        let handle = std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let _ = serve(stream, options, server_log);
            }
        });

        Self {
            addr,
            log,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every request line received so far
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, request: &str) -> usize {
        self.requests().iter().filter(|r| *r == request).count()
    }
}

impl Drop for FakeGui {
    fn drop(&mut self) {
        // The server thread ends when the client hangs up.
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

struct GuiState {
    settings: HashMap<String, String>,
    average_level: u32,
    average_target: u32,
    port2_served: usize,
}

impl GuiState {
    fn new() -> Self {
        let mut settings = HashMap::new();
        settings.insert(":DEV:MODE".to_string(), "VNA".to_string());
        settings.insert(":SA:ACQ:AVG".to_string(), "1".to_string());
        Self {
            settings,
            average_level: 0,
            average_target: 1,
            port2_served: 0,
        }
    }

    fn handle(&mut self, request: &str, options: &FakeGuiOptions) -> String {
        let (header, arg) = request.split_once(' ').unwrap_or((request, ""));

        if let Some(setting) = header.strip_suffix('?') {
            return match header {
                "*IDN?" => "LibreVNA-GUI".to_string(),
                ":DEV:CONN?" => "206830535532".to_string(),
                ":DEV:INF:TEMP?" => "30.5/41.25/52".to_string(),
                ":SA:ACQ:AVGLEV?" => {
                    self.average_level = (self.average_level + 1).min(self.average_target);
                    self.average_level.to_string()
                }
                ":SA:TRAC:DATA?" => {
                    if arg == "PORT2" {
                        self.port2_served += 1;
                        if let Some((blocks, stop)) = &options.stop_after_blocks {
                            if self.port2_served >= *blocks {
                                stop.store(true, Ordering::SeqCst);
                            }
                        }
                        TRACE_PORT2.to_string()
                    } else {
                        TRACE_PORT1.to_string()
                    }
                }
                _ => self.settings.get(setting).cloned().unwrap_or_default(),
            };
        }

        if !options.reject.contains(&header) {
            self.settings.insert(header.to_string(), arg.to_string());
        }
        if header == ":SA:ACQ:AVG" {
            self.average_level = 0;
            self.average_target = arg.parse().unwrap_or(1);
        }
        String::new()
    }
}

fn serve(
    stream: TcpStream,
    options: FakeGuiOptions,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut state = GuiState::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let request = line.trim_end().to_string();
        log.lock().unwrap().push(request.clone());

        if options.close_on.is_some_and(|h| request.starts_with(h)) {
            writer.write_all(b"12")?;
            return Ok(());
        }

        let response = format!("{}\n", state.handle(&request, &options));
        if options.split_writes && response.len() > 1 {
            let (head, tail) = response.split_at(response.len() / 2);
            writer.write_all(head.as_bytes())?;
            writer.flush()?;
            std::thread::sleep(Duration::from_millis(20));
            writer.write_all(tail.as_bytes())?;
        } else {
            writer.write_all(response.as_bytes())?;
        }
        writer.flush()?;
    }
}
