use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log.
///
/// Framing per record: `[u32: len][bincode: Event][u32: crc32]` where `len`
/// covers the bincode payload only. One record is one commit unit; a torn or
/// corrupt trailing record is dropped whole at replay, so a crash can never
/// surface half of a scheduling commit.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_snapshot: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_snapshot: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_snapshot(&self) -> u64 {
        self.appends_since_snapshot
    }

    /// Stage one record in the write buffer. Nothing is durable until
    /// [`Wal::commit`] runs; the group-commit loop batches several buffers
    /// per sync.
    pub fn buffer(&mut self, record: &Event) -> io::Result<()> {
        write_record(&mut self.writer, record)?;
        self.appends_since_snapshot += 1;
        Ok(())
    }

    /// Flush buffered records and fsync the file.
    pub fn commit(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Buffer + commit in one step. Test convenience; production code goes
    /// through the group-commit loop.
    #[cfg(test)]
    pub fn append(&mut self, record: &Event) -> io::Result<()> {
        self.buffer(record)?;
        self.commit()
    }

    /// Write a snapshot (minimal record set recreating current state) to a
    /// temp file and fsync it. This is the slow I/O phase — run it before
    /// [`Wal::install_snapshot`], which does the fast swap.
    pub fn write_snapshot(path: &Path, records: &[Event]) -> io::Result<()> {
        let tmp_path = snapshot_tmp_path(path);
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            write_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomic swap: rename the snapshot over the WAL and reopen for append.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        fs::rename(snapshot_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_snapshot = 0;
        Ok(())
    }

    /// Replay all intact records from disk. A missing file is an empty log;
    /// a torn or corrupt tail ends the replay silently.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        while let Some(record) = read_record(&mut reader)? {
            records.push(record);
        }
        Ok(records)
    }
}

fn snapshot_tmp_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

fn write_record(writer: &mut impl Write, record: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())
}

/// Read the next record, or None at a clean end of log. Truncation and CRC
/// mismatch both read as end-of-log: everything after the last intact record
/// was never acknowledged to a caller.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize(&payload).ok())
}
