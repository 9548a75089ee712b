//! Audit Logs - Append-only JSONL and In-Memory Repositories
//!
//! `JsonlAuditLog` persists entries to daily files in the format
//! `audit/YYYY-MM-DD.jsonl`, one self-contained JSON entry per line.
//! Only per-user entry times inside the trailing velocity window stay in
//! memory; history and report reads go to the files, newest day first.
//!
//! `MemoryAuditLog` keeps every entry in a vector, for tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::audit::AuditEntry;
use crate::domain::money::UserId;
use crate::ports::audit::AuditRepository;

/// Appends between full sweeps of idle users.
const SWEEP_EVERY: u64 = 1024;

fn count_since(entries: &[AuditEntry], user: &str, since: DateTime<Utc>) -> usize {
    entries
        .iter()
        .filter(|e| e.user_id == user && e.created_at >= since)
        .count()
}

fn history(entries: &[AuditEntry], user: &str, limit: usize) -> Vec<AuditEntry> {
    entries
        .iter()
        .rev()
        .filter(|e| e.user_id == user)
        .take(limit)
        .cloned()
        .collect()
}

fn entries_since(entries: &[AuditEntry], since: DateTime<Utc>) -> Vec<AuditEntry> {
    entries.iter().filter(|e| e.created_at >= since).cloned().collect()
}

/// Entry times per user, each queue sorted and pruned to the window.
#[derive(Debug)]
struct RecentIndex {
    window: Duration,
    by_user: HashMap<UserId, VecDeque<DateTime<Utc>>>,
    appends: u64,
}

impl RecentIndex {
    fn new(window: Duration) -> Self {
        Self {
            window,
            by_user: HashMap::new(),
            appends: 0,
        }
    }

    /// Oldest instant still guaranteed to be in the index.
    fn floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    fn insert(&mut self, user: &str, at: DateTime<Utc>, now: DateTime<Utc>) {
        let floor = self.floor(now);
        if at < floor {
            return;
        }
        let queue = self.by_user.entry(user.to_string()).or_default();
        let pos = queue.partition_point(|t| *t <= at);
        queue.insert(pos, at);
        while queue.front().is_some_and(|t| *t < floor) {
            queue.pop_front();
        }

        self.appends += 1;
        if self.appends % SWEEP_EVERY == 0 {
            self.sweep(floor);
        }
    }

    fn sweep(&mut self, floor: DateTime<Utc>) {
        self.by_user.retain(|_, queue| {
            while queue.front().is_some_and(|t| *t < floor) {
                queue.pop_front();
            }
            !queue.is_empty()
        });
    }

    fn count(&self, user: &str, since: DateTime<Utc>) -> usize {
        self.by_user
            .get(user)
            .map_or(0, |queue| queue.iter().rev().take_while(|t| **t >= since).count())
    }

    fn tracked(&self) -> usize {
        self.by_user.values().map(VecDeque::len).sum()
    }
}

/// Append-only JSONL audit log with daily file rotation.
pub struct JsonlAuditLog {
    audit_dir: PathBuf,
    /// Held by appends for writing and by file reads for reading, so a
    /// read never sees a half-written line.
    files: RwLock<()>,
    recent: Mutex<RecentIndex>,
}

impl JsonlAuditLog {
    /// Open the log under `data_dir/audit`. Entries newer than `window`
    /// are indexed for [`AuditRepository::count_since`].
    pub async fn open(data_dir: &str, window: Duration) -> Result<Self> {
        let audit_dir = Path::new(data_dir).join("audit");
        fs::create_dir_all(&audit_dir)
            .await
            .context("Failed to create audit directory")?;

        let now = Utc::now();
        let mut recent = RecentIndex::new(window);
        let floor = recent.floor(now);
        for entry in read_since(&audit_dir, floor).await? {
            recent.insert(&entry.user_id, entry.created_at, now);
        }
        info!(indexed = recent.tracked(), window_secs = window.num_seconds(), "Audit log opened");

        Ok(Self {
            audit_dir,
            files: RwLock::new(()),
            recent: Mutex::new(recent),
        })
    }

    fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.audit_dir.join(format!("{}.jsonl", at.format("%Y-%m-%d")))
    }
}

/// Daily files in the directory, oldest day first.
async fn daily_files(audit_dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let mut files = Vec::new();
    let mut dir = fs::read_dir(audit_dir)
        .await
        .context("Failed to read audit directory")?;

    while let Some(item) = dir.next_entry().await? {
        let path = item.path();
        if path.extension().is_none_or(|ext| ext != "jsonl") {
            continue;
        }
        let day = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok());
        match day {
            Some(day) => files.push((day, path)),
            None => debug!(file = %path.display(), "Ignoring file without a date name"),
        }
    }

    files.sort();
    Ok(files)
}

/// Entries of one file in write order. Malformed lines are skipped.
async fn read_file(path: &Path) -> Result<Vec<AuditEntry>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping malformed audit entry");
            }
        }
    }
    Ok(entries)
}

/// Entries created at or after `since`, oldest first. Older days are not opened.
async fn read_since(audit_dir: &Path, since: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
    let first_day = since.date_naive();
    let mut found = Vec::new();
    for (day, path) in daily_files(audit_dir).await? {
        if day < first_day {
            continue;
        }
        found.extend(
            read_file(&path)
                .await?
                .into_iter()
                .filter(|e| e.created_at >= since),
        );
    }
    found.sort_by_key(|e| e.created_at);
    Ok(found)
}

#[async_trait]
impl AuditRepository for JsonlAuditLog {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        json.push('\n');

        let _files = self.files.write().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(entry.created_at))
            .await
            .context("Failed to open audit log file")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write audit entry")?;
        file.flush().await.context("Failed to flush audit log")?;

        self.recent
            .lock()
            .await
            .insert(&entry.user_id, entry.created_at, Utc::now());
        Ok(())
    }

    async fn count_since(&self, user: &str, since: DateTime<Utc>) -> Result<usize> {
        {
            let recent = self.recent.lock().await;
            if since >= recent.floor(Utc::now()) {
                return Ok(recent.count(user, since));
            }
        }
        let entries = self.entries_since(since).await?;
        Ok(entries.iter().filter(|e| e.user_id == user).count())
    }

    async fn history(&self, user: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        let _files = self.files.read().await;
        let mut found = Vec::new();
        for (_, path) in daily_files(&self.audit_dir).await?.into_iter().rev() {
            if found.len() >= limit {
                break;
            }
            let mut day: Vec<AuditEntry> = read_file(&path)
                .await?
                .into_iter()
                .filter(|e| e.user_id == user)
                .collect();
            day.sort_by_key(|e| e.created_at);
            found.extend(day.into_iter().rev().take(limit - found.len()));
        }
        Ok(found)
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        let _files = self.files.read().await;
        read_since(&self.audit_dir, since).await
    }

    async fn is_healthy(&self) -> bool {
        let marker = self.audit_dir.join(".health_check");
        let result = fs::write(&marker, b"ok").await;
        let _ = fs::remove_file(&marker).await;
        result.is_ok()
    }
}

/// Audit log kept only in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditRepository for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn count_since(&self, user: &str, since: DateTime<Utc>) -> Result<usize> {
        Ok(count_since(&self.entries.read().await, user, since))
    }

    async fn history(&self, user: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(history(&self.entries.read().await, user, limit))
    }

    async fn entries_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        Ok(entries_since(&self.entries.read().await, since))
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
