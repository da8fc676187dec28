//! Durable conversation buffer
//!
//! Raw dialogue accumulates here until it is large enough to flush into
//! long-term memory. Every append reaches an append-only JSONL log (one
//! `{role, content, timestamp}` record per line) and is synced before the
//! call returns, so an unclean shutdown loses nothing: the log is replayed
//! when the buffer is reopened.
//!
//! The buffer is the only writer of its log file.

pub mod flush;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{EternalError, Result};

pub use flush::{BufferFlusher, FlushReport, parse_enduring_facts};

/// One turn of dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl BufferEntry {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of the buffer's fill level
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferStatus {
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub threshold_tokens: usize,
    /// 0-100, may exceed 100 when a flush is overdue
    pub fill_percent: f32,
}

/// Render entries as `ROLE: content` lines
pub fn transcript(entries: &[BufferEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.role.to_uppercase(), e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rough token estimate: two characters per token
pub fn estimate_tokens(entries: &[BufferEntry]) -> usize {
    entries.iter().map(|e| e.content.chars().count()).sum::<usize>() / 2
}

pub struct ConversationBuffer {
    entries: Vec<BufferEntry>,
    log_path: PathBuf,
    threshold_tokens: usize,
}

impl ConversationBuffer {
    /// Open the buffer, replaying any entries left in the log.
    ///
    /// Unparseable lines (a torn final write) are skipped with a warning and
    /// the log is rewritten from what was recovered, so later appends start
    /// on a clean line.
    pub async fn open(log_path: &Path, threshold_tokens: usize) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EternalError::Buffer(format!(
                    "Failed to create buffer directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut entries = Vec::new();
        let mut needs_rewrite = false;
        match fs::read_to_string(log_path).await {
            Ok(text) => {
                needs_rewrite = !text.is_empty() && !text.ends_with('\n');
                for (number, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<BufferEntry>(line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!("Skipping corrupt buffer record {}: {}", number + 1, e);
                            needs_rewrite = true;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EternalError::Buffer(format!(
                    "Failed to read buffer log {}: {e}",
                    log_path.display()
                )));
            }
        }

        if !entries.is_empty() {
            info!("Recovered {} buffered messages from {}", entries.len(), log_path.display());
        }

        let buffer = Self {
            entries,
            log_path: log_path.to_path_buf(),
            threshold_tokens,
        };
        if needs_rewrite {
            buffer.rewrite_log().await?;
        }
        Ok(buffer)
    }

    /// Append a turn. The record is on disk before this returns; a failed
    /// write leaves the in-memory buffer unchanged and is returned as an
    /// error.
    pub async fn append(&mut self, role: &str, content: &str) -> Result<BufferEntry> {
        let entry = BufferEntry::new(role, content);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        self.write_durable(&line).await.map_err(|e| {
            EternalError::Buffer(format!(
                "Failed to append to buffer log {}: {e}",
                self.log_path.display()
            ))
        })?;

        self.entries.push(entry.clone());
        debug!(messages = self.entries.len(), "Buffered message");
        Ok(entry)
    }

    async fn write_durable(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await
    }

    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.entries)
    }

    pub fn should_flush(&self) -> bool {
        !self.entries.is_empty() && self.estimated_tokens() >= self.threshold_tokens
    }

    pub fn status(&self) -> BufferStatus {
        let estimated_tokens = self.estimated_tokens();
        let fill_percent = if self.threshold_tokens == 0 {
            100.0
        } else {
            estimated_tokens as f32 / self.threshold_tokens as f32 * 100.0
        };
        BufferStatus {
            message_count: self.entries.len(),
            estimated_tokens,
            threshold_tokens: self.threshold_tokens,
            fill_percent,
        }
    }

    /// The last `turns` entries as a transcript
    pub fn recent_context(&self, turns: usize) -> String {
        let start = self.entries.len().saturating_sub(turns);
        transcript(&self.entries[start..])
    }

    /// Drop the first `count` entries after they were committed.
    ///
    /// With nothing left the log is deleted; a failed delete only warns,
    /// since the entries are already in long-term memory. Otherwise the log
    /// is rewritten with the remaining entries through a synced temp file.
    pub async fn drain_front(&mut self, count: usize) -> Result<()> {
        let count = count.min(self.entries.len());
        let remaining = self.entries[count..].to_vec();

        if remaining.is_empty() {
            self.entries.clear();
            if let Err(e) = fs::remove_file(&self.log_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Flushed buffer but could not delete log {}: {}",
                        self.log_path.display(),
                        e
                    );
                }
            }
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.entries, remaining);
        if let Err(e) = self.rewrite_log().await {
            self.entries = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Rewrite the log so it holds exactly the in-memory entries.
    async fn rewrite_log(&self) -> Result<()> {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&serde_json::to_string(entry)?);
            text.push('\n');
        }
        self.replace_log(&text).await.map_err(|e| {
            EternalError::Buffer(format!(
                "Failed to rewrite buffer log {}: {e}",
                self.log_path.display()
            ))
        })
    }

    async fn replace_log(&self, text: &str) -> std::io::Result<()> {
        let tmp = self.log_path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.log_path).await
    }
}
