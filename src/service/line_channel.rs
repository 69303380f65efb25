//! Half-duplex JSON Lines channel to the model service.
//!
//! One request line out, one JSON object back. Output lines are pumped into a
//! crossbeam channel by a reader thread so reads can time out without
//! blocking on the pipe itself.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};
use serde::Serialize;

use super::ipc_types::{parse_json_line, JsonObject};

/// Why a request produced no usable reply. Only that request fails; the
/// service itself stays Ready.
#[derive(Debug, thiserror::Error)]
pub enum NoResponse {
    #[error("model service is not ready")]
    NotReady,
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write request: {0}")]
    Write(#[source] std::io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("model service output closed")]
    Closed,
}

/// Request/response framing over a writer and a stream of output lines.
///
/// Not `Sync` by itself: the owner serializes calls (see `ProcessSupervisor`).
pub struct LineProtocolChannel {
    writer: Box<dyn Write + Send>,
    lines: Receiver<String>,
    timeout: Duration,
}

impl LineProtocolChannel {
    pub fn new<W>(writer: W, lines: Receiver<String>, timeout: Duration) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Box::new(writer),
            lines,
            timeout,
        }
    }

    /// Send one request and wait for the first JSON object in reply.
    pub fn send<R: Serialize>(&mut self, request: &R) -> Result<JsonObject, NoResponse> {
        let json = serde_json::to_string(request).map_err(NoResponse::Encode)?;

        self.discard_stale();

        writeln!(self.writer, "{json}")
            .and_then(|()| self.writer.flush())
            .map_err(NoResponse::Write)?;

        self.read_reply()
    }

    /// Drop lines that arrived since the last reply (late answers to a
    /// request that already timed out).
    fn discard_stale(&mut self) {
        for line in self.lines.try_iter() {
            debug!("[CHANNEL] Discarding stale line: {}", preview(&line));
        }
    }

    fn read_reply(&mut self) -> Result<JsonObject, NoResponse> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => match parse_json_line(&line) {
                    Some(object) => return Ok(object),
                    None => debug!("[CHANNEL] Skipping non-protocol line: {}", preview(&line)),
                },
                Err(RecvTimeoutError::Timeout) => return Err(NoResponse::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(NoResponse::Closed),
            }
        }
    }
}

/// Pump lines from a child's output stream into a channel on a dedicated
/// thread. Bytes are decoded lossily, so a line that is not valid UTF-8 is
/// passed on as noise instead of ending the stream. The receiver disconnects
/// at EOF or on a read error.
pub fn spawn_line_reader<R>(stream: R) -> Receiver<String>
where
    R: Read + Send + 'static,
{
    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();

    let spawned = thread::Builder::new()
        .name("model-service-output".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                        if line.trim().is_empty() {
                            continue;
                        }
                        if line_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!("[CHANNEL] Model service output read error: {e}");
                        break;
                    }
                }
            }
            debug!("[CHANNEL] Output reader thread exiting");
        });

    if let Err(e) = spawned {
        // line_tx was moved into the failed closure and dropped, so the
        // receiver reports Disconnected and the handshake fails fast.
        warn!("[CHANNEL] Failed to spawn output reader: {e}");
    }

    line_rx
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() > MAX {
        let head: String = line.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}
