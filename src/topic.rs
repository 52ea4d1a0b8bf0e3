//! The durable log backing a single topic.
//!
//! Each topic owns a directory containing three files:
//!
//! - `data.log`: the records themselves, concatenated. Each record is
//!   `offset (u64)`, `payload_len (u32)`, then the payload bytes, with the
//!   structural integers in native byte order (see [`crate::codec`]).
//! - `index.idx`: `(offset, byte_position)` pairs locating each record's
//!   first byte in the data log. The index may lag the data log after a
//!   crash; it is reconciled when the topic is opened.
//! - `metadata.meta`: a single `u64` holding the topic's next offset,
//!   rewritten after every successful append.
//!
//! # Durability
//!
//! An append flushes the data log, then the index, then the metadata. A crash
//! between any two of those steps leaves on-disk state that the recovery
//! procedure in [`TopicLog::open`] re-aligns: records present in the data log
//! but missing from the index are re-indexed, a record truncated mid-write is
//! excluded, and the next offset is recomputed from what actually survived.
//!
//! # Locking
//!
//! A `TopicLog` performs no locking of its own. The topic registry wraps each
//! instance in its per-topic mutex; callers hold that lock across `append`
//! and `read`.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::{read_disk_u32, read_disk_u64, write_disk_u32, write_disk_u64};
use crate::error::Result;
use crate::model::{Offset, Record};

pub(crate) const DATA_FILE: &str = "data.log";
pub(crate) const INDEX_FILE: &str = "index.idx";
pub(crate) const METADATA_FILE: &str = "metadata.meta";

/// Bytes occupied by a record header (offset + payload length).
const RECORD_HEADER_LEN: u64 = 8 + 4;

/// Bytes occupied by one index entry (offset + byte position).
const INDEX_ENTRY_LEN: u64 = 8 + 8;

/// Upper bound on a payload length parsed during a recovery scan. A length
/// beyond this means the header bytes are garbage, not a record.
const SCAN_PAYLOAD_SANITY_LIMIT: u32 = 100 * 1024 * 1024;

/// Append-only storage for one topic: data log, offset index, and metadata.
pub struct TopicLog {
    name: String,
    data_path: PathBuf,
    index_path: PathBuf,
    metadata_path: PathBuf,
    data_writer: BufWriter<File>,
    index_writer: BufWriter<File>,
    /// Offset to starting byte position in the data log. Monotonic in both
    /// keys and values.
    index: BTreeMap<Offset, u64>,
    next_offset: Offset,
    /// Current length of the data log; the byte position of the next append.
    data_len: u64,
}

impl TopicLog {
    /// Opens a topic log, running recovery against whatever is on disk.
    ///
    /// With `create` set, the topic directory and its files are created when
    /// absent. Without it, a missing directory is an error; this is the path
    /// the registry takes when enumerating existing topics at startup.
    pub fn open(name: &str, dir: impl Into<PathBuf>, create: bool) -> Result<Self> {
        let dir = dir.into();
        if create {
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("topic directory does not exist: {}", dir.display()),
            )
            .into());
        }

        let data_path = dir.join(DATA_FILE);
        let index_path = dir.join(INDEX_FILE);
        let metadata_path = dir.join(METADATA_FILE);

        let stored_next = load_metadata(name, &metadata_path)?;
        let mut index = load_index(name, &index_path);
        let data_len = fs::metadata(&data_path).map(|m| m.len()).unwrap_or(0);

        reconcile(name, &data_path, &index_path, data_len, stored_next, &mut index)?;

        // The index is authoritative after reconciliation.
        let next_offset = index.keys().next_back().map(|o| o + 1).unwrap_or(0);
        if next_offset != stored_next {
            tracing::info!(
                "topic {name}: adjusting next offset from {stored_next} to {next_offset} after recovery"
            );
            write_metadata(&metadata_path, next_offset)?;
        }

        let data_writer = BufWriter::new(open_append(&data_path)?);
        let index_writer = BufWriter::new(open_append(&index_path)?);

        Ok(Self {
            name: name.to_string(),
            data_path,
            index_path,
            metadata_path,
            data_writer,
            index_writer,
            index,
            next_offset,
            data_len,
        })
    }

    /// The topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The offset the next successful append will be assigned.
    pub fn next_offset(&self) -> Offset {
        self.next_offset
    }

    /// Appends a payload, returning its assigned offset.
    ///
    /// The record is committed once the data log, the index, and the metadata
    /// have all been written and flushed, in that order. On any I/O failure
    /// nothing is committed: the next offset is unchanged and a subsequent
    /// append starts over at the current end of the data log.
    pub fn append(&mut self, payload: &[u8]) -> Result<Offset> {
        let offset = self.next_offset;
        let position = self.data_len;

        if let Err(e) = self.commit_record(offset, position, payload) {
            self.resync_after_failed_append();
            return Err(e.into());
        }

        self.index.insert(offset, position);
        self.next_offset = offset + 1;
        self.data_len = position + RECORD_HEADER_LEN + payload.len() as u64;
        Ok(offset)
    }

    /// Reads up to `max_records` records starting at `start_offset`.
    ///
    /// Returns an empty vector when the offset is at or past the tail, and a
    /// short vector when a record fails to read: a per-record error or an
    /// index/data mismatch halts the read and whatever accumulated so far is
    /// returned. Reads open their own handle on the data log, so they do not
    /// contend with the writer's handle.
    pub fn read(&self, start_offset: Offset, max_records: u32) -> Vec<Record> {
        let mut records = Vec::new();
        if start_offset >= self.next_offset || max_records == 0 {
            return records;
        }

        let Some((&first_offset, &first_position)) = self.index.range(start_offset..).next()
        else {
            return records;
        };

        let file = match File::open(&self.data_path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("topic {}: failed to open data log for read: {e}", self.name);
                return records;
            }
        };
        let mut reader = BufReader::new(file);
        if let Err(e) = reader.seek(SeekFrom::Start(first_position)) {
            tracing::error!("topic {}: failed to seek data log: {e}", self.name);
            return records;
        }

        let mut expected = first_offset;
        let mut position = first_position;
        while (records.len() as u32) < max_records && expected < self.next_offset {
            // A crash can leave dead bytes between live records; if the index
            // places the expected record elsewhere, follow the index.
            if let Some(&indexed) = self.index.get(&expected) {
                if indexed != position {
                    if reader.seek(SeekFrom::Start(indexed)).is_err() {
                        break;
                    }
                    position = indexed;
                }
            }

            let (offset, payload) = match read_record(&mut reader) {
                Ok(parsed) => parsed,
                Err(e) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        tracing::error!(
                            "topic {}: error reading record at offset {expected}: {e}",
                            self.name
                        );
                    }
                    break;
                }
            };
            if offset != expected {
                tracing::error!(
                    "topic {}: data corruption: expected offset {expected}, found {offset} in data log",
                    self.name
                );
                break;
            }

            position += RECORD_HEADER_LEN + payload.len() as u64;
            records.push(Record {
                offset,
                topic: self.name.clone(),
                payload,
            });
            expected += 1;
        }
        records
    }

    /// The durable part of an append: data log, then index, then metadata,
    /// each flushed before the next.
    fn commit_record(&mut self, offset: Offset, position: u64, payload: &[u8]) -> io::Result<()> {
        self.write_record(offset, payload)?;
        self.write_index_entry(offset, position)?;
        write_metadata(&self.metadata_path, offset + 1)
    }

    fn write_record(&mut self, offset: Offset, payload: &[u8]) -> io::Result<()> {
        write_disk_u64(&mut self.data_writer, offset)?;
        write_disk_u32(&mut self.data_writer, payload.len() as u32)?;
        self.data_writer.write_all(payload)?;
        self.data_writer.flush()
    }

    fn write_index_entry(&mut self, offset: Offset, position: u64) -> io::Result<()> {
        write_disk_u64(&mut self.index_writer, offset)?;
        write_disk_u64(&mut self.index_writer, position)?;
        self.index_writer.flush()
    }

    /// A failed append may have left bytes in the data log. Re-anchor the
    /// append position on the file's actual length so the next append lands
    /// after whatever made it to disk; recovery handles the rest on restart.
    fn resync_after_failed_append(&mut self) {
        let _ = self.data_writer.flush();
        let _ = self.index_writer.flush();
        if let Ok(meta) = fs::metadata(&self.data_path) {
            self.data_len = meta.len();
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// Reads one record (header + payload) at the reader's current position.
fn read_record<R: Read>(reader: &mut R) -> io::Result<(Offset, Bytes)> {
    let offset = read_disk_u64(reader)?;
    let len = read_disk_u32(reader)?;
    if len > SCAN_PAYLOAD_SANITY_LIMIT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unreasonable payload length {len}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok((offset, Bytes::from(payload)))
}

/// Loads the stored next offset, rewriting the metadata file when it is
/// missing or unreadable.
fn load_metadata(name: &str, path: &Path) -> Result<Offset> {
    match File::open(path) {
        Ok(mut file) => match read_disk_u64(&mut file) {
            Ok(next) => Ok(next),
            Err(e) => {
                tracing::warn!("topic {name}: unreadable metadata ({e}); assuming a new topic");
                write_metadata(path, 0)?;
                Ok(0)
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            write_metadata(path, 0)?;
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_metadata(path: &Path, next_offset: Offset) -> io::Result<()> {
    let mut file = File::create(path)?;
    write_disk_u64(&mut file, next_offset)?;
    file.flush()
}

/// Sequentially loads index entries, stopping at the first short or failed
/// read. Bytes past that point are treated as lost; the data-log scan
/// rebuilds whatever they covered.
fn load_index(name: &str, path: &Path) -> BTreeMap<Offset, u64> {
    let mut index = BTreeMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return index,
    };
    let mut reader = BufReader::new(file);
    loop {
        let offset = match read_disk_u64(&mut reader) {
            Ok(offset) => offset,
            Err(_) => break,
        };
        match read_disk_u64(&mut reader) {
            Ok(position) => index.insert(offset, position),
            Err(e) => {
                tracing::warn!("topic {name}: index file truncated mid-entry ({e})");
                break;
            }
        };
    }
    index
}

/// Re-aligns the index with the data log.
///
/// A scan of the data log is needed when the index is missing entries
/// (`data.log` non-empty with an empty or lagging index) or when its tail
/// entry points at a record the data log no longer fully contains. The scan
/// walks the data log from byte zero, keeps every fully-readable record whose
/// offset precedes the stored next offset, and rewrites the index file from
/// the result. Partial rebuilds are acceptable: the scan stops at the first
/// unreadable record.
fn reconcile(
    name: &str,
    data_path: &Path,
    index_path: &Path,
    data_len: u64,
    stored_next: Offset,
    index: &mut BTreeMap<Offset, u64>,
) -> Result<()> {
    if data_len == 0 {
        if !index.is_empty() {
            tracing::warn!("topic {name}: index refers to an empty data log; discarding it");
            index.clear();
            rewrite_index_file(index_path, index)?;
        }
        return Ok(());
    }

    let scan_needed = match index.keys().next_back() {
        None => true,
        Some(&max) => {
            (stored_next > 0 && max < stored_next - 1)
                || !tail_entry_is_valid(index, data_path, data_len)
        }
    };
    if !scan_needed {
        return Ok(());
    }

    tracing::warn!(
        "topic {name}: index out of sync with data log (stored next offset {stored_next}); scanning"
    );
    let rebuilt = scan_data_log(name, data_path, data_len, stored_next)?;
    let recovered = rebuilt.len() as i64 - index.len() as i64;
    *index = rebuilt;
    rewrite_index_file(index_path, index)?;
    if recovered > 0 {
        tracing::info!("topic {name}: recovered {recovered} missing index entries");
    }
    Ok(())
}

/// Checks that the highest index entry still points at a complete record.
/// Catches a data log that lost its tail after the index was written.
fn tail_entry_is_valid(index: &BTreeMap<Offset, u64>, data_path: &Path, data_len: u64) -> bool {
    let Some((&offset, &position)) = index.iter().next_back() else {
        return true;
    };
    if position + RECORD_HEADER_LEN > data_len {
        return false;
    }
    let Ok(mut file) = File::open(data_path) else {
        return false;
    };
    if file.seek(SeekFrom::Start(position)).is_err() {
        return false;
    }
    let Ok(stored_offset) = read_disk_u64(&mut file) else {
        return false;
    };
    let Ok(payload_len) = read_disk_u32(&mut file) else {
        return false;
    };
    stored_offset == offset && position + RECORD_HEADER_LEN + payload_len as u64 <= data_len
}

/// Walks the data log from byte zero collecting `(offset, position)` for
/// every fully-readable record with `offset < stored_next`. Stops at the
/// first record that is truncated or implausible.
fn scan_data_log(
    name: &str,
    data_path: &Path,
    data_len: u64,
    stored_next: Offset,
) -> Result<BTreeMap<Offset, u64>> {
    let mut recovered = BTreeMap::new();
    let file = File::open(data_path)?;
    let mut reader = BufReader::new(file);
    let mut position: u64 = 0;

    while position + RECORD_HEADER_LEN <= data_len {
        let offset = match read_disk_u64(&mut reader) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!("topic {name}: scan stopped at byte {position}: {e}");
                break;
            }
        };
        let payload_len = match read_disk_u32(&mut reader) {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!("topic {name}: scan stopped at byte {position}: {e}");
                break;
            }
        };
        if payload_len > SCAN_PAYLOAD_SANITY_LIMIT {
            tracing::warn!(
                "topic {name}: scan aborted: payload length {payload_len} at byte {position} is implausible"
            );
            break;
        }
        let end = position + RECORD_HEADER_LEN + payload_len as u64;
        if end > data_len {
            tracing::warn!(
                "topic {name}: truncated record at byte {position} (offset {offset}); excluding it"
            );
            break;
        }
        if reader.seek_relative(payload_len as i64).is_err() {
            break;
        }
        if offset < stored_next {
            recovered.insert(offset, position);
        }
        position = end;
    }
    if position < data_len && recovered.is_empty() {
        tracing::warn!("topic {name}: no records recoverable from non-empty data log");
    }
    Ok(recovered)
}

/// Rewrites the index file to exactly mirror the in-memory index.
fn rewrite_index_file(path: &Path, index: &BTreeMap<Offset, u64>) -> Result<()> {
    let mut writer = BufWriter::with_capacity(
        (index.len().max(1) as u64 * INDEX_ENTRY_LEN).min(1 << 20) as usize,
        File::create(path)?,
    );
    for (&offset, &position) in index {
        write_disk_u64(&mut writer, offset)?;
        write_disk_u64(&mut writer, position)?;
    }
    writer.flush()?;
    Ok(())
}
