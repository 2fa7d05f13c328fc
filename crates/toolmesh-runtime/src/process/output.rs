//! Output capture for upstream sessions.
//!
//! Every line a session produces is logged at debug, appended to a bounded
//! recent-lines buffer (used in failure diagnostics), and offered to the
//! session's event channel. The channel is best-effort: when nobody drains
//! it and it fills up, further events are dropped. One slot is held back
//! for the final [`SessionEvent::Closed`], so a full channel still ends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Buffered events per session before new ones are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something a transport session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Line on the process's stdout that was not a protocol response
    Stdout(String),
    /// Line on the process's stderr
    Stderr(String),
    /// Event received on an event stream
    Message { event: String, data: String },
    /// The session ended; no further events follow
    Closed,
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Shared sink for one session's output.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    server: Arc<str>,
    capacity: usize,
    recent: Arc<Mutex<VecDeque<String>>>,
    events: mpsc::Sender<SessionEvent>,
    /// Slot reserved for `Closed`; taken once the session has ended
    closing: Arc<Mutex<Option<mpsc::OwnedPermit<SessionEvent>>>>,
}

impl OutputCapture {
    /// Create a capture keeping the last `capacity` lines, plus the
    /// receiving end of its event channel.
    pub fn new(server: &str, capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let closing = tx.clone().try_reserve_owned().ok();
        let capture = Self {
            server: Arc::from(server),
            capacity,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            events: tx,
            closing: Arc::new(Mutex::new(closing)),
        };
        (capture, rx)
    }

    /// Record one output line.
    pub fn record(&self, stream: OutputStream, line: String) {
        debug!(server = %self.server, stream = stream.label(), "{line}");

        if self.capacity > 0 {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(format!("[{}] {line}", stream.label()));
        }

        let event = match stream {
            OutputStream::Stdout => SessionEvent::Stdout(line),
            OutputStream::Stderr => SessionEvent::Stderr(line),
        };
        self.emit(event);
    }

    /// Offer an event to the channel without waiting.
    ///
    /// `Closed` is always delivered, once. Nothing is delivered after it.
    pub fn emit(&self, event: SessionEvent) {
        let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
        if event == SessionEvent::Closed {
            if let Some(permit) = closing.take() {
                permit.send(SessionEvent::Closed);
            }
        } else if closing.is_some() {
            let _ = self.events.try_send(event);
        }
    }

    /// Snapshot of the most recent lines, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<String> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Read `reader` line by line into this capture until EOF.
    pub fn spawn_reader<R>(&self, stream: OutputStream, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                capture.record(stream, line);
            }
        })
    }

    /// Forward lines from a channel (e.g. unrouted pipe output) into this capture.
    pub fn spawn_forwarder(
        &self,
        stream: OutputStream,
        mut lines: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let capture = self.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                capture.record(stream, line);
            }
        })
    }
}
