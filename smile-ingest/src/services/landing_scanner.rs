//! Landing store access
//!
//! A landing store is where upstream systems drop raw request and sample
//! files. The pipeline only needs two things from it: "what is new since
//! last time" and "this file is done". [`DirectoryLandingStore`] answers both
//! for a local (or mounted) directory, remembering what it has delivered in a
//! ledger of file size, mtime and content hash. [`MemoryLandingStore`] is an
//! in-process store for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use smile_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::raw_reader::IngestError;
use crate::db;
use crate::db::ledger::LedgerEntry;

/// One file as delivered by a landing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandedFile {
    /// Root of the landing store the file came from
    pub source_path: String,
    /// Full path (or object key) of the file
    pub path: String,
    pub bytes: Vec<u8>,
    /// When the store handed the file to the pipeline
    pub arrived_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Hex-encoded SHA-256 of `bytes`
    pub content_hash: String,
}

impl LandedFile {
    pub fn new(
        source_path: impl Into<String>,
        path: impl Into<String>,
        bytes: Vec<u8>,
        arrived_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            source_path: source_path.into(),
            path: path.into(),
            bytes,
            arrived_at,
            modified_at: None,
            content_hash,
        }
    }
}

/// Hex-encoded SHA-256 of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A file that is new, or whose content changed, or a file that could not be read
pub type Delivery = std::result::Result<LandedFile, IngestError>;

/// Source of raw files
///
/// Delivery is at-least-once: a file returned by [`poll`](Self::poll) keeps
/// being returned until it is [`acknowledge`](Self::acknowledge)d.
/// An `Err` from either method means the store itself is unreachable.
#[async_trait]
pub trait LandingStore: Send + Sync {
    /// Landing root, recorded as the source of every file
    fn source_path(&self) -> &str;

    /// Files not yet acknowledged in their current content
    async fn poll(&self) -> Result<Vec<Delivery>>;

    /// Mark a delivered file as fully processed
    async fn acknowledge(&self, file: &LandedFile) -> Result<()>;
}

// ============================================================================
// Directory landing store
// ============================================================================

/// Landing store backed by a directory tree
///
/// The ledger holds the size, mtime and content hash each path was last seen
/// with. A file whose size and mtime match its entry is skipped without being
/// read; otherwise it is hashed and delivered if the content changed.
/// A file that cannot be read is reported once and recorded without a hash,
/// so it is retried only after it changes on disk. With a database attached
/// the ledger survives restarts.
pub struct DirectoryLandingStore {
    root: PathBuf,
    source_path: String,
    ignore_patterns: Arc<Vec<String>>,
    ledger: Arc<RwLock<HashMap<String, LedgerEntry>>>,
    db: Option<SqlitePool>,
}

impl DirectoryLandingStore {
    /// Directory store with an in-memory ledger only
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            source_path: root.to_string_lossy().into_owned(),
            root,
            ignore_patterns: Arc::new(vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ]),
            ledger: Arc::new(RwLock::new(HashMap::new())),
            db: None,
        }
    }

    /// Directory store whose ledger is loaded from and written to `db`
    pub async fn with_ledger(root: impl Into<PathBuf>, db: SqlitePool) -> Result<Self> {
        let mut store = Self::new(root);
        let entries = db::ledger::load_ledger(&db).await?;
        info!(
            path = %store.root.display(),
            files = entries.len(),
            "Loaded processed-file ledger"
        );
        *store.ledger.write() = entries;
        store.db = Some(db);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of paths recorded in the ledger
    pub fn ledger_len(&self) -> usize {
        self.ledger.read().len()
    }

    /// Ledger entry for one path
    pub fn ledger_entry(&self, path: &str) -> Option<LedgerEntry> {
        self.ledger.read().get(path).cloned()
    }

    async fn record(&self, path: &str, entry: LedgerEntry, at: DateTime<Utc>) -> Result<()> {
        if let Some(db) = &self.db {
            db::ledger::record_ingested(db, path, &entry, at).await?;
        }
        self.ledger.write().insert(path.to_string(), entry);
        Ok(())
    }
}

#[async_trait]
impl LandingStore for DirectoryLandingStore {
    fn source_path(&self) -> &str {
        &self.source_path
    }

    async fn poll(&self) -> Result<Vec<Delivery>> {
        let root = self.root.clone();
        let source_path = self.source_path.clone();
        let ignore_patterns = Arc::clone(&self.ignore_patterns);
        let ledger = Arc::clone(&self.ledger);

        let scan = tokio::task::spawn_blocking(move || {
            scan_directory(&root, &source_path, &ignore_patterns, &ledger)
        })
        .await
        .map_err(|e| Error::Internal(format!("Landing scan task failed: {}", e)))??;

        let now = Utc::now();
        for (path, entry) in scan.updates {
            self.record(&path, entry, now).await?;
        }
        Ok(scan.deliveries)
    }

    async fn acknowledge(&self, file: &LandedFile) -> Result<()> {
        let entry = LedgerEntry {
            content_hash: Some(file.content_hash.clone()),
            file_size: file.bytes.len() as u64,
            modified_at: file.modified_at,
        };
        self.record(&file.path, entry, file.arrived_at).await
    }
}

/// Outcome of one directory scan
#[derive(Debug, Default)]
struct Scan {
    deliveries: Vec<Delivery>,
    /// Ledger entries to record without waiting for an acknowledgement
    updates: Vec<(String, LedgerEntry)>,
}

/// What one file on disk amounts to, given its ledger entry
#[derive(Debug)]
enum Examined {
    /// Size and mtime match the ledger; not read
    Unchanged,
    /// Same content under a new mtime
    Touched(LedgerEntry),
    Unreadable(IngestError, LedgerEntry),
    Landed(LandedFile),
}

fn examine(
    source_path: &str,
    path_text: String,
    file_size: u64,
    modified_at: Option<DateTime<Utc>>,
    known: Option<&LedgerEntry>,
    read: impl FnOnce() -> std::io::Result<Vec<u8>>,
) -> Examined {
    if known.is_some_and(|k| k.matches_metadata(file_size, modified_at)) {
        return Examined::Unchanged;
    }

    let bytes = match read() {
        Ok(bytes) => bytes,
        Err(e) => {
            let entry = LedgerEntry {
                content_hash: None,
                file_size,
                modified_at,
            };
            let err = IngestError::Unreadable {
                path: path_text,
                reason: e.to_string(),
            };
            return Examined::Unreadable(err, entry);
        }
    };

    let hash = content_hash(&bytes);
    if known.and_then(|k| k.content_hash.as_deref()) == Some(hash.as_str()) {
        return Examined::Touched(LedgerEntry {
            content_hash: Some(hash),
            file_size: bytes.len() as u64,
            modified_at,
        });
    }

    let mut file = LandedFile::new(source_path, path_text, bytes, Utc::now());
    file.modified_at = modified_at;
    Examined::Landed(file)
}

fn scan_directory(
    root: &Path,
    source_path: &str,
    ignore_patterns: &[String],
    ledger: &RwLock<HashMap<String, LedgerEntry>>,
) -> Result<Scan> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "Landing path is not a readable directory: {}",
            root.display()
        )));
    }

    let mut candidates: Vec<(Option<DateTime<Utc>>, PathBuf, u64)> = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e, ignore_patterns));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let metadata = entry.metadata().ok();
                let modified_at = metadata
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                let file_size = metadata.map(|m| m.len()).unwrap_or(0);
                candidates.push((modified_at, entry.into_path(), file_size));
            }
            Ok(_) => {}
            Err(e) => {
                // One unreadable directory must not hide the rest of the tree
                warn!(error = %e, "Error accessing landing entry");
            }
        }
    }

    // Oldest first approximates arrival order; path breaks ties
    candidates.sort();

    let mut scan = Scan::default();
    for (modified_at, path, file_size) in candidates {
        let path_text = path.to_string_lossy().into_owned();
        let known = ledger.read().get(&path_text).cloned();

        match examine(
            source_path,
            path_text.clone(),
            file_size,
            modified_at,
            known.as_ref(),
            || std::fs::read(&path),
        ) {
            Examined::Unchanged => {}
            Examined::Touched(entry) => {
                debug!(path = %path_text, "Landing file touched without content change");
                scan.updates.push((path_text, entry));
            }
            Examined::Unreadable(err, entry) => {
                scan.updates.push((path_text, entry));
                scan.deliveries.push(Err(err));
            }
            Examined::Landed(file) => {
                debug!(path = %path_text, "New or changed landing file");
                scan.deliveries.push(Ok(file));
            }
        }
    }

    Ok(scan)
}

/// Hidden files and well-known system files are never delivered
fn is_ignored(entry: &DirEntry, ignore_patterns: &[String]) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || ignore_patterns.iter().any(|p| name == p.as_str())
}

// ============================================================================
// In-memory landing store
// ============================================================================

/// Landing store held in memory
///
/// Files stay pending until acknowledged with the same content hash.
pub struct MemoryLandingStore {
    source_path: String,
    pending: Mutex<Vec<Delivery>>,
    acknowledged: Mutex<Vec<LandedFile>>,
}

impl MemoryLandingStore {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            pending: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
        }
    }

    /// Land a file with an explicit arrival time
    pub fn land(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>, arrived_at: DateTime<Utc>) {
        let file = LandedFile::new(self.source_path.clone(), path, bytes.into(), arrived_at);
        self.pending.lock().push(Ok(file));
    }

    /// Land a file that the store fails to read
    pub fn land_unreadable(&self, path: impl Into<String>, reason: impl Into<String>) {
        self.pending.lock().push(Err(IngestError::Unreadable {
            path: path.into(),
            reason: reason.into(),
        }));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Files acknowledged so far, in acknowledgement order
    pub fn acknowledged(&self) -> Vec<LandedFile> {
        self.acknowledged.lock().clone()
    }
}

#[async_trait]
impl LandingStore for MemoryLandingStore {
    fn source_path(&self) -> &str {
        &self.source_path
    }

    async fn poll(&self) -> Result<Vec<Delivery>> {
        let mut pending = self.pending.lock();
        let batch = pending.clone();
        // Read failures are reported once, like a transient error on one poll
        pending.retain(|d| d.is_ok());
        Ok(batch)
    }

    async fn acknowledge(&self, file: &LandedFile) -> Result<()> {
        self.pending.lock().retain(|d| match d {
            Ok(f) => !(f.path == file.path && f.content_hash == file.content_hash),
            Err(_) => true,
        });
        self.acknowledged.lock().push(file.clone());
        Ok(())
    }
}
