//! Append-only JSONL sink for [`AgentEvent`] records.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::event::AgentEvent;

/// Shared writer; each record is one line, flushed before the lock drops.
#[derive(Debug)]
pub struct EventWriter {
    path: PathBuf,
    inner: Mutex<BufWriter<File>>,
}

impl EventWriter {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create event dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        debug!(path = %path.display(), "opened event log");
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, event: &AgentEvent) -> Result<()> {
        self.write_all(std::slice::from_ref(event))
    }

    /// Write a batch under one lock so records from one iteration stay contiguous.
    pub fn write_all(&self, events: &[AgentEvent]) -> Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        for event in events {
            let line = serde_json::to_string(event).context("encode event")?;
            writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .with_context(|| format!("write {}", self.path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}

/// Decode a JSONL event file, skipping lines that do not decode.
pub fn read_events(path: &Path) -> Result<Vec<AgentEvent>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = idx + 1, err = %e, "skipping undecodable event"),
        }
    }
    Ok(events)
}
