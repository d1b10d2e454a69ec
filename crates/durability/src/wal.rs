//! Write-ahead log
//!
//! Append-only segments of framed records under `<data_dir>/wal/`. Every
//! commit appends its full change set (one record per put/delete) followed by
//! one commit-marker record carrying the target commit id, then fsyncs once.
//! The branch ref never moves before its records are durable.
//!
//! ## Record framing (little-endian)
//!
//! ```text
//! u32 body_len | body | u32 crc32(body)
//! body = u64 seq | u128 tx_id | u8 op
//!      | u32 branch_len | branch | u32 id_len | id
//!      | u32 payload_len | payload
//! ```
//!
//! `op` is put (0), delete (1), commit (2), or abort (3). For puts the
//! payload is the canonical document bytes; for deletes it is empty; for
//! commit markers the id field holds the commit id hex and the payload
//! carries commit metadata JSON; abort markers fence off a transaction whose
//! ref CAS never succeeded. A torn record at the tail of the last segment
//! (crash mid-append) is detected by length/crc and cleanly ends the scan.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrondb_core::{ChronError, ChronResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Size at which the active segment is rotated.
pub const SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Operation recorded in a WAL record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    /// Document write; payload holds canonical document bytes
    Put,
    /// Document tombstone; payload is empty
    Delete,
    /// Commit marker; id holds the commit id, payload holds metadata JSON
    Commit,
    /// Abort marker; the transaction's earlier records must not be replayed
    Abort,
}

impl WalOp {
    fn as_u8(self) -> u8 {
        match self {
            WalOp::Put => 0,
            WalOp::Delete => 1,
            WalOp::Commit => 2,
            WalOp::Abort => 3,
        }
    }

    fn parse(byte: u8) -> ChronResult<Self> {
        match byte {
            0 => Ok(WalOp::Put),
            1 => Ok(WalOp::Delete),
            2 => Ok(WalOp::Commit),
            3 => Ok(WalOp::Abort),
            other => Err(ChronError::corrupt(format!("unknown WAL op {}", other))),
        }
    }
}

/// One durable WAL record
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    /// Monotone sequence number, assigned at append
    pub seq: u64,
    /// Transaction the record belongs to
    pub tx_id: Uuid,
    /// Operation kind
    pub op: WalOp,
    /// Target branch
    pub branch: String,
    /// Document id, or commit id hex for commit markers
    pub doc_id: String,
    /// Document bytes (puts), metadata JSON (commit markers), empty (deletes)
    pub payload: Vec<u8>,
}

impl WalRecord {
    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.payload.len());
        body.write_u64::<LittleEndian>(self.seq).expect("vec write");
        body.write_u128::<LittleEndian>(self.tx_id.as_u128())
            .expect("vec write");
        body.write_u8(self.op.as_u8()).expect("vec write");
        body.write_u32::<LittleEndian>(self.branch.len() as u32)
            .expect("vec write");
        body.extend_from_slice(self.branch.as_bytes());
        body.write_u32::<LittleEndian>(self.doc_id.len() as u32)
            .expect("vec write");
        body.extend_from_slice(self.doc_id.as_bytes());
        body.write_u32::<LittleEndian>(self.payload.len() as u32)
            .expect("vec write");
        body.extend_from_slice(&self.payload);
        body
    }

    fn decode_body(body: &[u8]) -> ChronResult<WalRecord> {
        let mut r = body;
        let seq = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let tx_id = Uuid::from_u128(r.read_u128::<LittleEndian>().map_err(truncated)?);
        let op = WalOp::parse(r.read_u8().map_err(truncated)?)?;
        let branch = read_lp_string(&mut r)?;
        let doc_id = read_lp_string(&mut r)?;
        let payload_len = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        if r.len() != payload_len {
            return Err(ChronError::corrupt(format!(
                "WAL payload length mismatch: header says {}, got {}",
                payload_len,
                r.len()
            )));
        }
        Ok(WalRecord {
            seq,
            tx_id,
            op,
            branch,
            doc_id,
            payload: r.to_vec(),
        })
    }
}

fn read_lp_string(r: &mut &[u8]) -> ChronResult<String> {
    let len = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    if r.len() < len {
        return Err(ChronError::corrupt("WAL string runs past record end"));
    }
    let (s, rest) = r.split_at(len);
    *r = rest;
    String::from_utf8(s.to_vec()).map_err(|_| ChronError::corrupt("WAL string is not UTF-8"))
}

fn truncated<E>(_: E) -> ChronError {
    ChronError::corrupt("truncated WAL record body")
}

/// Record content handed to [`Wal::append_commit`]; seq is assigned inside.
#[derive(Debug, Clone)]
pub struct WalEntry {
    /// Operation kind
    pub op: WalOp,
    /// Document id, or commit id hex for commit markers
    pub doc_id: String,
    /// Payload bytes
    pub payload: Vec<u8>,
}

struct ActiveSegment {
    writer: BufWriter<File>,
    path: PathBuf,
    index: u64,
    bytes: u64,
}

/// The write-ahead log
pub struct Wal {
    dir: PathBuf,
    active: Mutex<ActiveSegment>,
    next_seq: AtomicU64,
    fsync: bool,
}

impl Wal {
    /// Open (and create if needed) the log under `<data_dir>/wal`.
    ///
    /// Scans existing segments for the highest sequence number so appends
    /// continue the series after a restart, and truncates a torn tail off
    /// the last segment so new frames are never written behind unreadable
    /// bytes.
    pub fn open(data_dir: &Path, fsync: bool) -> ChronResult<Self> {
        let dir = data_dir.join("wal");
        std::fs::create_dir_all(&dir)?;

        let segments = Self::segment_paths(&dir)?;
        let mut next_seq = 1;
        for (_, path) in &segments {
            let (records, valid_len) = Self::scan_segment(path)?;
            for record in records {
                next_seq = next_seq.max(record.seq + 1);
            }
            let file_len = std::fs::metadata(path)?.len();
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    valid_len,
                    file_len,
                    "truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_data()?;
            }
        }
        let active_index = segments.last().map(|(i, _)| *i).unwrap_or(1);
        let path = Self::segment_path(&dir, active_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata()?.len();

        Ok(Wal {
            dir,
            active: Mutex::new(ActiveSegment {
                writer: BufWriter::new(file),
                path,
                index: active_index,
                bytes,
            }),
            next_seq: AtomicU64::new(next_seq),
            fsync,
        })
    }

    fn segment_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("{:06}.log", index))
    }

    fn segment_paths(dir: &Path) -> ChronResult<Vec<(u64, PathBuf)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".log") {
                if let Ok(index) = stem.parse::<u64>() {
                    out.push((index, entry.path()));
                }
            }
        }
        out.sort_by_key(|(i, _)| *i);
        Ok(out)
    }

    /// Next sequence number that will be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire)
    }

    /// Append a commit's entries as one durable unit.
    ///
    /// Assigns consecutive sequence numbers, writes every frame, then flushes
    /// and (when configured) fsyncs once before returning. Returns the
    /// highest sequence number written. The caller orders this before any
    /// object write or ref move.
    pub fn append_commit(
        &self,
        tx_id: Uuid,
        branch: &str,
        entries: &[WalEntry],
    ) -> ChronResult<u64> {
        if entries.is_empty() {
            return Err(ChronError::internal("empty WAL batch"));
        }
        let mut active = self.active.lock();
        self.rotate_if_needed(&mut active)?;

        let first_seq = self
            .next_seq
            .fetch_add(entries.len() as u64, Ordering::AcqRel);
        let mut last_seq = first_seq;
        for (i, entry) in entries.iter().enumerate() {
            let record = WalRecord {
                seq: first_seq + i as u64,
                tx_id,
                op: entry.op,
                branch: branch.to_string(),
                doc_id: entry.doc_id.clone(),
                payload: entry.payload.clone(),
            };
            last_seq = record.seq;
            let body = record.encode_body();
            let crc = crc32fast::hash(&body);
            active
                .writer
                .write_u32::<LittleEndian>(body.len() as u32)?;
            active.writer.write_all(&body)?;
            active.writer.write_u32::<LittleEndian>(crc)?;
            active.bytes += 8 + body.len() as u64;
        }
        active.writer.flush()?;
        if self.fsync {
            active.writer.get_ref().sync_data()?;
        }
        debug!(tx = %tx_id, branch, records = entries.len(), last_seq, "WAL batch appended");
        Ok(last_seq)
    }

    fn rotate_if_needed(&self, active: &mut ActiveSegment) -> ChronResult<()> {
        if active.bytes < SEGMENT_MAX_BYTES {
            return Ok(());
        }
        active.writer.flush()?;
        if self.fsync {
            active.writer.get_ref().sync_data()?;
        }
        let index = active.index + 1;
        let path = Self::segment_path(&self.dir, index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        *active = ActiveSegment {
            writer: BufWriter::new(file),
            path,
            index,
            bytes: 0,
        };
        Ok(())
    }

    /// Force buffered frames to disk.
    pub fn sync(&self) -> ChronResult<()> {
        let mut active = self.active.lock();
        active.writer.flush()?;
        active.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Read every record with `seq > after_seq`, in order.
    pub fn read_from(&self, after_seq: u64) -> ChronResult<Vec<WalRecord>> {
        // Flush so a same-process reader sees its own appends.
        {
            let mut active = self.active.lock();
            active.writer.flush()?;
        }
        let mut out = Vec::new();
        for (_, path) in Self::segment_paths(&self.dir)? {
            for record in Self::read_segment(&path)? {
                if record.seq > after_seq {
                    out.push(record);
                }
            }
        }
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }

    /// Read all records.
    pub fn read_all(&self) -> ChronResult<Vec<WalRecord>> {
        self.read_from(0)
    }

    fn read_segment(path: &Path) -> ChronResult<Vec<WalRecord>> {
        Self::scan_segment(path).map(|(records, _)| records)
    }

    // Returns the decoded records plus the byte length of the valid prefix;
    // anything past it is a torn tail.
    fn scan_segment(path: &Path) -> ChronResult<(Vec<WalRecord>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut out = Vec::new();
        let mut valid_len = 0u64;
        loop {
            let body_len = match reader.read_u32::<LittleEndian>() {
                Ok(len) => len as usize,
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let mut body = vec![0u8; body_len];
            if reader.read_exact(&mut body).is_err() {
                warn!(path = %path.display(), "torn WAL record at tail, stopping scan");
                break;
            }
            let crc = match reader.read_u32::<LittleEndian>() {
                Ok(c) => c,
                Err(_) => {
                    warn!(path = %path.display(), "torn WAL checksum at tail, stopping scan");
                    break;
                }
            };
            if crc32fast::hash(&body) != crc {
                warn!(path = %path.display(), "WAL checksum mismatch at tail, stopping scan");
                break;
            }
            out.push(WalRecord::decode_body(&body)?);
            valid_len += 8 + body.len() as u64;
        }
        Ok((out, valid_len))
    }

    /// Path of the active segment (primarily for tests).
    pub fn active_segment_path(&self) -> PathBuf {
        self.active.lock().path.clone()
    }
}
