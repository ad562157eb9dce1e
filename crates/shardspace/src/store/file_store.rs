use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{check_dimension, Result, SpaceError};
use super::row_codec::{self, RowOp, RowRecord};
use super::RowStore;

/// Dead records tolerated before a compaction is considered.
const COMPACT_MIN_DEAD: usize = 1024;

/// Write `bytes` to `path` via a temp file and rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.flush()?;
        f.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Table persisted as an append-only record log (`<dir>/<name>.rows`).
///
/// The full row set is kept in memory and rebuilt by replaying the log on
/// open. Updates and deletes leave dead records behind; once they outnumber
/// live rows the log is rewritten with one `Put` per live row.
pub struct FileRowStore {
    name: String,
    dimensions: usize,
    path: PathBuf,
    /// Append handle; reopened lazily after a compaction swapped the file.
    file: Option<File>,
    dropped: bool,
    rows: BTreeMap<u64, Vec<f32>>,
    dead_records: usize,
    sync_writes: bool,
}

impl FileRowStore {
    pub fn open(dir: &Path, name: &str, dimensions: usize, sync_writes: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.rows"));
        let mut rows = BTreeMap::new();
        let mut dead_records = 0;

        if path.exists() {
            let data = fs::read(&path)?;
            let (good_len, dead) = replay(&data, name, dimensions, &mut rows)?;
            dead_records = dead;
            if good_len < data.len() as u64 {
                warn!(
                    table = name,
                    offset = good_len,
                    dropped_bytes = data.len() as u64 - good_len,
                    "truncating torn tail of row log"
                );
                let f = OpenOptions::new().write(true).open(&path)?;
                f.set_len(good_len)?;
                f.sync_all()?;
            }
        } else {
            let mut buf = Vec::new();
            row_codec::write_header(&mut buf, dimensions)?;
            atomic_write(&path, &buf)?;
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        debug!(table = name, rows = rows.len(), "opened row log");
        Ok(Self {
            name: name.to_string(),
            dimensions,
            path,
            file: Some(file),
            dropped: false,
            rows,
            dead_records,
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: RowRecord) -> Result<()> {
        self.ensure_open()?;
        if self.file.is_none() {
            self.file = Some(OpenOptions::new().append(true).open(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(SpaceError::Destroyed(self.name.clone()));
        };
        let mut buf = Vec::with_capacity(9 + record.vector.len() * 4);
        row_codec::write_record(&mut buf, &record)?;
        file.write_all(&buf)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Rewrite the log with one `Put` per live row once dead records
    /// dominate. Runs after the triggering record is already durable, so a
    /// failure only leaves the longer log in place.
    fn maybe_compact(&mut self) {
        if self.dead_records < COMPACT_MIN_DEAD || self.dead_records <= self.rows.len() {
            return;
        }
        let mut buf = Vec::new();
        let encoded = row_codec::write_header(&mut buf, self.dimensions).and_then(|_| {
            self.rows.iter().try_for_each(|(&key, vector)| {
                row_codec::write_record(&mut buf, &RowRecord { op: RowOp::Put, key, vector: vector.clone() })
            })
        });
        if let Err(e) = encoded {
            warn!(table = %self.name, error = %e, "failed to encode compacted row log");
            return;
        }
        // Close the append handle before the rename replaces the file; the
        // next append reopens whichever log is current.
        self.file = None;
        match atomic_write(&self.path, &buf) {
            Ok(()) => {
                debug!(table = %self.name, dropped = self.dead_records, "compacted row log");
                self.dead_records = 0;
            }
            Err(e) => {
                warn!(table = %self.name, error = %e, "row log compaction failed, keeping the full log");
                // Retry only after another full batch of dead records.
                self.dead_records = 0;
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.dropped {
            return Err(SpaceError::Destroyed(self.name.clone()));
        }
        Ok(())
    }
}

/// Replay a log into `rows`; returns the length of the valid prefix and the
/// number of dead records seen.
fn replay(data: &[u8], name: &str, dimensions: usize, rows: &mut BTreeMap<u64, Vec<f32>>) -> Result<(u64, usize)> {
    let mut cursor = Cursor::new(data);
    let stored_dims = row_codec::read_header(&mut cursor)
        .map_err(|e| SpaceError::Storage(format!("table {name}: {e}")))?;
    if stored_dims != dimensions {
        return Err(SpaceError::InvalidConfig(format!(
            "table {name} holds {stored_dims}-dimensional rows, expected {dimensions}"
        )));
    }

    let mut good_len = row_codec::HEADER_LEN;
    let mut dead = 0;
    loop {
        match row_codec::read_record(&mut cursor, dimensions) {
            Ok(Some(record)) => {
                match record.op {
                    RowOp::Put | RowOp::Update => {
                        if rows.insert(record.key, record.vector).is_some() {
                            dead += 1;
                        }
                    }
                    RowOp::Delete => {
                        if rows.remove(&record.key).is_some() {
                            dead += 1;
                        }
                        dead += 1;
                    }
                }
                good_len = cursor.position();
            }
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(SpaceError::Storage(format!("table {name}: {e}"))),
        }
    }
    Ok((good_len, dead))
}

impl RowStore for FileRowStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn create(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimensions, vector)?;
        self.ensure_open()?;
        if self.rows.contains_key(&key) {
            return Err(SpaceError::DuplicateKey(key));
        }
        self.append(RowRecord { op: RowOp::Put, key, vector: vector.to_vec() })?;
        self.rows.insert(key, vector.to_vec());
        Ok(())
    }

    fn update(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimensions, vector)?;
        self.ensure_open()?;
        if !self.rows.contains_key(&key) {
            return Err(SpaceError::NotFound(key));
        }
        self.append(RowRecord { op: RowOp::Update, key, vector: vector.to_vec() })?;
        self.rows.insert(key, vector.to_vec());
        self.dead_records += 1;
        self.maybe_compact();
        Ok(())
    }

    fn delete(&mut self, key: u64) -> Result<bool> {
        self.ensure_open()?;
        if !self.rows.contains_key(&key) {
            return Ok(false);
        }
        self.append(RowRecord { op: RowOp::Delete, key, vector: Vec::new() })?;
        self.rows.remove(&key);
        self.dead_records += 2;
        self.maybe_compact();
        Ok(true)
    }

    fn get(&self, key: u64) -> Result<Vec<f32>> {
        self.ensure_open()?;
        self.rows.get(&key).cloned().ok_or(SpaceError::NotFound(key))
    }

    fn contains(&self, key: u64) -> bool {
        self.rows.contains_key(&key)
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn dump(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        self.ensure_open()?;
        Ok(self.rows.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn drop_table(&mut self) -> Result<()> {
        self.dropped = true;
        self.file = None;
        self.rows.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
