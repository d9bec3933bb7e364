//! JSON Lines journal writer and reader.
//!
//! Append mode only, one segment per UTC date (`trades_YYYY-MM-DD.jsonl`).
//! `append` assigns the record id, writes the line, and fsyncs before
//! returning, so the executor's success path implies a durable record.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::JournalResult;
use crate::record::JournalEntry;

/// Journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Directory holding the daily segments.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Whether to fsync after every append. Disabled only in tests that
    /// measure throughput; durability requires it.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./data/journal")
}

fn default_fsync() -> bool {
    true
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            fsync: default_fsync(),
        }
    }
}

struct Segment {
    file: File,
    date: NaiveDate,
    lines_written: usize,
}

struct Inner {
    segment: Option<Segment>,
    next_id: u64,
}

/// Append-only durable trade ledger.
pub struct TradeJournal {
    config: JournalConfig,
    inner: Mutex<Inner>,
}

impl TradeJournal {
    /// Open (or create) the journal directory and resume the id
    /// sequence from existing segments.
    pub fn open(config: JournalConfig) -> JournalResult<Self> {
        std::fs::create_dir_all(&config.dir)?;

        let mut max_id = 0u64;
        for path in segment_paths(&config.dir)? {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(&line) {
                    Ok(entry) => max_id = max_id.max(entry.id()),
                    Err(e) => warn!(?path, ?e, "skipping unparseable journal line"),
                }
            }
        }

        info!(dir = %config.dir.display(), resume_from = max_id + 1, "journal opened");
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                segment: None,
                next_id: max_id + 1,
            }),
        })
    }

    /// Append one entry durably. Returns the assigned record id only
    /// after the bytes are synced to disk.
    pub fn append(&self, mut entry: JournalEntry) -> JournalResult<u64> {
        let date = entry.wall_time().date_naive();
        let mut inner = self.inner.lock();

        let id = inner.next_id;
        entry.set_id(id);
        let line = serde_json::to_string(&entry)?;

        // Rotate on date change.
        let needs_rotation = inner
            .segment
            .as_ref()
            .map(|s| s.date != date)
            .unwrap_or(true);
        if needs_rotation {
            self.open_segment(&mut inner, date)?;
        }

        let segment = inner.segment.as_mut().expect("segment opened above");
        writeln!(segment.file, "{line}")?;
        segment.file.flush()?;
        if self.config.fsync {
            segment.file.sync_all()?;
        }
        segment.lines_written += 1;
        inner.next_id = id + 1;

        debug!(id, date = %date, "journal entry appended");
        Ok(id)
    }

    /// All entries with `wall_time >= since`, across segments in date
    /// order. Unparseable lines are skipped, not fatal: a torn final
    /// line from a crash must not poison replay.
    pub fn iter_since(&self, since: DateTime<Utc>) -> JournalResult<Vec<JournalEntry>> {
        // Hold the lock so a concurrent append cannot interleave a
        // half-written segment view.
        let _inner = self.inner.lock();

        let mut entries = Vec::new();
        for path in segment_paths(&self.config.dir)? {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(&line) {
                    Ok(entry) => {
                        if entry.wall_time() >= since {
                            entries.push(entry);
                        }
                    }
                    Err(e) => warn!(?path, ?e, "skipping unparseable journal line"),
                }
            }
        }
        entries.sort_by_key(JournalEntry::id);
        Ok(entries)
    }

    /// Close the segment for `date`. The next append opens a fresh
    /// segment; appends dated `date` after this call reopen the old file
    /// in append mode, so no data is lost either way.
    pub fn close_day(&self, date: NaiveDate) -> JournalResult<()> {
        let mut inner = self.inner.lock();
        if let Some(segment) = inner.segment.take() {
            if segment.date == date {
                info!(date = %date, lines = segment.lines_written, "journal day closed");
            } else {
                // Not the active day; put it back.
                inner.segment = Some(segment);
            }
        }
        Ok(())
    }

    /// Path of the segment for a given date.
    #[must_use]
    pub fn segment_path(&self, date: NaiveDate) -> PathBuf {
        self.config
            .dir
            .join(format!("trades_{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn open_segment(&self, inner: &mut Inner, date: NaiveDate) -> JournalResult<()> {
        if let Some(old) = inner.segment.take() {
            info!(date = %old.date, lines = old.lines_written, "journal segment rotated");
        }
        let path = self.segment_path(date);
        info!(path = %path.display(), "opening journal segment (append mode)");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        inner.segment = Some(Segment {
            file,
            date,
            lines_written: 0,
        });
        Ok(())
    }
}

/// Segment files under `dir`, sorted by name (dates sort correctly).
fn segment_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|x| x == "jsonl").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("trades_"))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}
