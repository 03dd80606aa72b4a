//! Follow an event JSONL file from another thread.
//!
//! The tailer polls the file on a fixed interval, decodes every complete new
//! line and hands the event to a callback. A partially written trailing line is
//! kept until its newline arrives.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::core::event::AgentEvent;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct EventTailer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl EventTailer {
    /// Start following `path` from its beginning. The file may not exist yet.
    pub fn spawn<F>(path: PathBuf, interval: Duration, mut on_event: F) -> Self
    where
        F: FnMut(AgentEvent) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut cursor = TailCursor::default();
            loop {
                // Read once more after a stop request so nothing written before it is lost.
                let stopping = flag.load(Ordering::SeqCst);
                match cursor.poll(&path) {
                    Ok(events) => events.into_iter().for_each(&mut on_event),
                    Err(e) => debug!(err = %e, path = %path.display(), "tail poll failed"),
                }
                if stopping {
                    break;
                }
                thread::sleep(interval);
            }
            cursor.offset
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop polling and return the number of bytes consumed.
    pub fn stop(mut self) -> Result<u64> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| anyhow!("tailer thread panicked")),
            None => Ok(0),
        }
    }
}

impl Drop for EventTailer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct TailCursor {
    offset: u64,
    partial: Vec<u8>,
}

impl TailCursor {
    fn poll(&mut self, path: &std::path::Path) -> Result<Vec<AgentEvent>> {
        let Ok(mut file) = File::open(path) else {
            return Ok(Vec::new());
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(path = %path.display(), "event file shrank, restarting from the top");
            self.offset = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = Vec::new();
        let read = file.read_to_end(&mut chunk)?;
        self.offset += read as u64;
        self.partial.extend_from_slice(&chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&text) {
                Ok(event) => events.push(event),
                Err(e) => debug!(err = %e, "skipping undecodable tailed line"),
            }
        }
        Ok(events)
    }
}
