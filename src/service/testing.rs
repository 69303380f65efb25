//! In-memory model service for unit tests.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;

use super::process_supervisor::{ProcessSupervisor, ServiceTimeouts};

/// Writer half of a fake model service. Every complete request line is
/// recorded and answered with whatever `respond` returns.
pub(crate) struct ScriptedPeer<F> {
    inner: Arc<Mutex<PeerInner<F>>>,
}

struct PeerInner<F> {
    pending: Vec<u8>,
    replies: Sender<String>,
    respond: F,
    requests: Vec<String>,
}

impl<F> Clone for ScriptedPeer<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F> ScriptedPeer<F>
where
    F: FnMut(&str) -> Vec<String>,
{
    pub(crate) fn new(replies: Sender<String>, respond: F) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PeerInner {
                pending: Vec::new(),
                replies,
                respond,
                requests: Vec::new(),
            })),
        }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Emit an unsolicited output line.
    pub(crate) fn inject(&self, line: &str) {
        let _ = self.inner.lock().unwrap().replies.send(line.to_string());
    }
}

impl<F> Write for ScriptedPeer<F>
where
    F: FnMut(&str) -> Vec<String> + Send,
{
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pending.extend_from_slice(data);
        while let Some(pos) = inner.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = inner.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            inner.requests.push(line.clone());
            for reply in (inner.respond)(&line) {
                let _ = inner.replies.send(reply);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that forwards each complete line to a channel, for peers that
/// answer from their own thread.
pub(crate) struct LineSink {
    pending: Vec<u8>,
    lines: Sender<String>,
}

impl LineSink {
    pub(crate) fn new(lines: Sender<String>) -> Self {
        Self {
            pending: Vec::new(),
            lines,
        }
    }
}

impl Write for LineSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            self.lines
                .send(line)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn fast_timeouts() -> ServiceTimeouts {
    ServiceTimeouts {
        handshake: Duration::from_millis(300),
        request: Duration::from_millis(300),
        shutdown_grace: Duration::from_millis(100),
    }
}

/// A supervisor attached to a scripted peer. `startup` lines are emitted
/// before any request is written.
pub(crate) fn scripted_service<F>(
    startup: &[&str],
    respond: F,
    timeouts: ServiceTimeouts,
) -> (ProcessSupervisor, ScriptedPeer<F>)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    for line in startup {
        tx.send((*line).to_string()).unwrap();
    }
    let peer = ScriptedPeer::new(tx, respond);
    let supervisor = ProcessSupervisor::from_streams(peer.clone(), rx, timeouts);
    supervisor.wait_until_settled(timeouts.handshake + Duration::from_secs(2));
    (supervisor, peer)
}
