pub mod record;
pub mod recovery;

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    context::OpContext,
    error::{Error, Result},
};

use record::{LogRecord, Lsn, TxId};

/// Line layout: the record's fields plus a crc32 of the record's own JSON.
#[derive(Serialize)]
struct WalLine<'a> {
    #[serde(flatten)]
    record: &'a LogRecord,
    crc: u32,
}

#[derive(Deserialize)]
struct StoredLine {
    #[serde(flatten)]
    record: LogRecord,
    crc: Option<u32>,
}

struct WalInner {
    file: BufWriter<File>,
    next_lsn: Lsn,
    records: Vec<LogRecord>,
}

/// Append-only log of newline-delimited JSON records.
///
/// A record is durable only once `flush` has returned. LSNs are assigned under
/// the writer lock so their order is the file order, and numbering resumes one
/// past the highest LSN found on open.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;

        let records = Self::build_buf(&path)?;
        let mut file = BufWriter::new(file);
        if !ends_with_newline(&path)? {
            // Keep the next record off the torn line
            file.write_all(b"\n")?;
            file.flush()?;
        }

        let next_lsn = records.iter().map(|r| r.lsn).max().unwrap_or(0) + 1;
        info!(
            path = %path.display(),
            records = records.len(),
            next_lsn,
            "opened WAL"
        );

        Ok(Self {
            path,
            inner: Mutex::new(WalInner {
                file,
                next_lsn,
                records,
            }),
        })
    }

    // Scans the log once. Unparseable lines (a torn tail write) are skipped;
    // a checksum mismatch means the log cannot be trusted and fails the open.
    fn build_buf(path: &Path) -> Result<Vec<LogRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let stored: StoredLine = match serde_json::from_str(&line) {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(line = line_no + 1, error = %err, "skipping unreadable WAL line");
                    continue;
                }
            };

            if let Some(crc) = stored.crc {
                if checksum(&stored.record)? != crc {
                    return Err(Error::CorruptedWal(format!(
                        "checksum mismatch at line {} (lsn {})",
                        line_no + 1,
                        stored.record.lsn
                    )));
                }
            }

            records.push(stored.record);
        }

        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assigns the next LSN and buffers the record for writing.
    pub fn append(&self, ctx: &OpContext, mut record: LogRecord) -> Result<Lsn> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;

        let lsn = inner.next_lsn;
        record.lsn = lsn;

        let mut buf = serde_json::to_vec(&WalLine {
            record: &record,
            crc: checksum(&record)?,
        })?;
        buf.push(b'\n');
        inner.file.write_all(&buf)?;

        inner.next_lsn += 1;
        debug!(lsn, tx_id = record.tx_id, log_type = ?record.log_type, "appended WAL record");
        inner.records.push(record);
        Ok(lsn)
    }

    /// Writes every buffered record and syncs the file.
    pub fn flush(&self, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        let mut inner = self.inner.lock()?;
        inner.file.flush()?;
        inner.file.get_mut().sync_all()?;
        Ok(())
    }

    pub fn checkpoint(&self, ctx: &OpContext) -> Result<()> {
        self.flush(ctx)
    }

    /// All records with an LSN greater than or equal to `lsn`, ascending.
    pub fn read_from(&self, ctx: &OpContext, lsn: Lsn) -> Result<Vec<LogRecord>> {
        ctx.check()?;
        let inner = self.inner.lock()?;
        Ok(inner
            .records
            .iter()
            .filter(|record| record.lsn >= lsn)
            .cloned()
            .collect())
    }

    /// The LSN the next append will receive.
    pub fn next_lsn(&self) -> Result<Lsn> {
        Ok(self.inner.lock()?.next_lsn)
    }

    /// Highest transaction id present in the log.
    pub fn last_tx_id(&self) -> Result<Option<TxId>> {
        Ok(self.inner.lock()?.records.iter().map(|r| r.tx_id).max())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn checksum(record: &LogRecord) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&serde_json::to_vec(record)?);
    Ok(hasher.finalize())
}
