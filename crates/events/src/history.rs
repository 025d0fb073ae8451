//! Append-only local alert history.
//!
//! [`AlertHistory`] keeps every dispatched [`AlertEvent`] in memory, keyed by
//! the event id, and optionally mirrors each entry as one JSON line in a
//! file so the alerts screen survives restarts. Entries are never edited or
//! removed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use geoguard_core::{AlertEvent, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for history persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Reading or appending the backing file failed.
    #[error("History file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be encoded as JSON.
    #[error("History entry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// One persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Opaque key; equal to the event id.
    pub id: Uuid,
    /// When the entry was appended (may differ from the sample timestamp).
    pub recorded_at: Timestamp,
    pub event: AlertEvent,
}

// ---------------------------------------------------------------------------
// AlertHistory
// ---------------------------------------------------------------------------

/// Append-only alert log, safe to share via `Arc<AlertHistory>`.
#[derive(Debug, Default)]
pub struct AlertHistory {
    entries: RwLock<Vec<HistoryEntry>>,
    path: Option<PathBuf>,
}

impl AlertHistory {
    /// Purely in-memory history.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed history, loading any entries already present.
    ///
    /// A missing file is treated as an empty history. Lines that fail to
    /// parse are skipped with a warning rather than failing the load.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_lines(&path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            count = entries.len(),
            "Alert history loaded"
        );

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Append `event`.
    ///
    /// The in-memory entry is always recorded. If mirroring to disk fails
    /// the error is returned, but the entry stays readable for this session.
    pub async fn append(&self, event: AlertEvent) -> Result<HistoryEntry, HistoryError> {
        let entry = HistoryEntry {
            id: event.id,
            recorded_at: Utc::now(),
            event,
        };

        // Hold the write lock across the file append so on-disk order
        // matches in-memory order.
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());

        if let Some(path) = &self.path {
            append_line(path, &entry).await?;
        }

        Ok(entry)
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.entries.read().await.clone()
    }

    /// The `limit` most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<HistoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn parse_lines(path: &Path, contents: &str) -> Vec<HistoryEntry> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping unreadable history line"
                );
                None
            }
        })
        .collect()
}

async fn append_line(path: &Path, entry: &HistoryEntry) -> Result<(), HistoryError> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geoguard_core::{AlertKind, Coordinate, Observation};

    fn event(kind: AlertKind, zone: &str) -> AlertEvent {
        let obs = Observation::position(Coordinate::new(45.0, 5.0), Utc::now());
        AlertEvent::new(kind, zone, obs, format!("{kind} {zone}"))
    }

    #[tokio::test]
    async fn in_memory_append_and_lookup() {
        let history = AlertHistory::in_memory();
        let first = history
            .append(event(AlertKind::Entered, "home"))
            .await
            .expect("in-memory append cannot fail");
        history
            .append(event(AlertKind::Left, "home"))
            .await
            .expect("in-memory append cannot fail");

        assert_eq!(history.len().await, 2);
        assert_eq!(
            history.get(first.id).await.map(|e| e.event.kind),
            Some(AlertKind::Entered)
        );

        let recent = history.recent(1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event.kind, AlertKind::Left);
    }

    #[tokio::test]
    async fn file_backed_history_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts.jsonl");

        {
            let history = AlertHistory::open(&path).await.expect("open new file");
            assert!(history.is_empty().await);
            history
                .append(event(AlertKind::Entered, "school"))
                .await
                .expect("append");
            history
                .append(event(AlertKind::Left, "school"))
                .await
                .expect("append");
        }

        let reopened = AlertHistory::open(&path).await.expect("reopen");
        let entries = reopened.list().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.kind, AlertKind::Entered);
        assert_eq!(entries[1].event.kind, AlertKind::Left);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts.jsonl");

        let good = HistoryEntry {
            id: Uuid::now_v7(),
            recorded_at: Utc::now(),
            event: event(AlertKind::AnomalyDetected, "magnetic"),
        };
        let contents = format!(
            "{}\nnot json at all\n\n",
            serde_json::to_string(&good).expect("serializable")
        );
        tokio::fs::write(&path, contents).await.expect("write fixture");

        let history = AlertHistory::open(&path).await.expect("open");
        assert_eq!(history.list().await, vec![good]);
    }

    #[tokio::test]
    async fn failed_mirror_keeps_in_memory_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory path cannot be opened for appending.
        let history = AlertHistory {
            entries: RwLock::new(Vec::new()),
            path: Some(dir.path().to_path_buf()),
        };

        let result = history.append(event(AlertKind::Entered, "home")).await;
        assert!(matches!(result, Err(HistoryError::Io(_))));
        assert_eq!(history.len().await, 1);
    }
}
