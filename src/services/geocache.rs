//! Persistent geocoding cache.
//!
//! The cache is an append-only CSV log: `record` only ever appends, and the
//! authoritative state is materialized at open time by folding every row
//! last-write-wins. A crash right after resolving address N therefore loses
//! nothing for addresses 1..N, and the next run resumes from a larger cache.
//! Malformed trailing rows (truncated writes) are skipped with a warning
//! instead of failing the load.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::Precision;

/// One resolved address: coordinates, the tier that produced them, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub precision: Precision,
    pub resolved_at: DateTime<Utc>,
}

const HEADER: &str = "address,lat,lon,precision,resolved_at";

/// Append-only address cache with an in-memory last-write-wins view.
pub struct AddressCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl AddressCache {
    /// Open the cache, folding all appended rows into memory. A missing file
    /// is an empty cache; unreadable rows are skipped, not fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = HashMap::new();

        if path.exists() {
            let mut skipped = 0usize;
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_path(&path)?;
            for row in reader.records() {
                let record = match row {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable cache row");
                        skipped += 1;
                        continue;
                    }
                };
                match parse_row(&record) {
                    Some((address, entry)) => {
                        // Later rows win over earlier duplicates.
                        entries.insert(address, entry);
                    }
                    None => {
                        warn!(row = ?record, "skipping malformed cache row");
                        skipped += 1;
                    }
                }
            }
            if skipped > 0 {
                warn!(skipped, loaded = entries.len(), "cache loaded with corrupt rows skipped");
            } else {
                info!(loaded = entries.len(), "geocache loaded");
            }
        }

        Ok(Self { path, entries })
    }

    /// Back up the existing cache file and delete it. Explicit and separate
    /// from normal runs; returns the backup path when a file existed.
    pub fn reset(path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let backup = path.with_extension("backup.csv");
        std::fs::copy(path, &backup)?;
        std::fs::remove_file(path)?;
        warn!(backup = %backup.display(), "geocache reset — backup written");
        Ok(Some(backup))
    }

    pub fn lookup(&self, address: &str) -> Option<&CacheEntry> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry and sync it to disk before returning. The in-memory
    /// view is updated afterwards so a lookup in the same run hits.
    pub fn record(&mut self, address: &str, entry: CacheEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let new_file = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if new_file {
            writeln!(file, "{HEADER}")?;
        }
        writeln!(
            file,
            "{},{},{},{},{}",
            escape_field(address),
            entry.latitude,
            entry.longitude,
            entry.precision,
            entry.resolved_at.to_rfc3339(),
        )?;
        file.sync_data()?;
        self.entries.insert(address.to_string(), entry);
        Ok(())
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<(String, CacheEntry)> {
    let address = record.get(0)?.trim();
    if address.is_empty() {
        return None;
    }
    let latitude: f64 = record.get(1)?.trim().parse().ok()?;
    let longitude: f64 = record.get(2)?.trim().parse().ok()?;
    // Legacy caches predate the precision column; treat them as
    // address-level results.
    let precision = match record.get(3) {
        Some(raw) if !raw.trim().is_empty() => raw.parse().ok()?,
        _ => Precision::Address,
    };
    let resolved_at = record
        .get(4)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Some((
        address.to_string(),
        CacheEntry {
            latitude,
            longitude,
            precision,
            resolved_at,
        },
    ))
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
