use super::{Sink, StoreError};
use hdmint::Record;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Appends records to a file as JSON lines:
/// `{"mnemonic":"...","address":"0x..."}`.
///
/// Each batch is encoded up front, written with one call and synced to disk.
/// If the write or sync fails the file is truncated back to its previous
/// length, so a batch is never left half-written.
pub struct JsonLinesSink {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| classify(&path, &e))?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for JsonLinesSink {
    fn store(&self, batch: &[Record]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let buf = encode(batch)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::permanent("JSON lines file mutex poisoned"))?;
        append_synced(&mut *file, &self.path, &buf)
    }
}

/// Appends `records` to the JSON lines file at `path`.
///
/// Used to keep records a failing sink could not take.
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be opened or written; nothing
/// from `records` is left in the file in that case.
pub fn write_recovery(path: impl AsRef<Path>, records: &[Record]) -> Result<(), StoreError> {
    let dump = JsonLinesSink::open(path)?;
    dump.store(records)?;
    tracing::info!(
        "Wrote {} unflushed records to {}",
        records.len(),
        dump.path().display()
    );
    Ok(())
}

fn encode(batch: &[Record]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::with_capacity(batch.len() * 160);
    for record in batch {
        serde_json::to_writer(&mut buf, record)
            .map_err(|e| StoreError::permanent(format!("encoding record: {e}")))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// A file that can be appended to, synced and cut back.
trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes `buf` and syncs it, truncating back to the previous length if
/// either step fails.
fn append_synced<T: AppendTarget>(
    target: &mut T,
    path: &Path,
    buf: &[u8],
) -> Result<(), StoreError> {
    let start = target.current_len().map_err(|e| classify(path, &e))?;

    if let Err(e) = target.write_all(buf).and_then(|()| target.sync()) {
        if let Err(truncate) = target.truncate(start) {
            tracing::error!(
                "Failed to truncate {} after a failed write: {truncate}",
                path.display()
            );
            return Err(StoreError::permanent(format!(
                "{}: {e}; file may hold a partial batch",
                path.display()
            )));
        }
        return Err(classify(path, &e));
    }

    Ok(())
}

fn classify(path: &Path, err: &io::Error) -> StoreError {
    let message = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::StorageFull => StoreError::transient(message),
        _ => StoreError::permanent(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StoreErrorKind;
    use hdmint::Deriver;
    use std::io::{BufRead, BufReader};

    fn records(n: usize) -> Vec<Record> {
        let deriver = Deriver::new();
        (0..n).map(|_| deriver.derive().unwrap()).collect()
    }

    fn read_back(path: &Path) -> Vec<Record> {
        BufReader::new(File::open(path).unwrap())
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect()
    }

    /// Accepts `budget` bytes, then reports a full disk.
    struct ShortFile {
        file: File,
        budget: usize,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::StorageFull.into());
            }
            let n = self.file.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl AppendTarget for ShortFile {
        fn current_len(&self) -> io::Result<u64> {
            self.file.current_len()
        }

        fn sync(&mut self) -> io::Result<()> {
            self.file.sync()
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.file.truncate(len)
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let batch = records(3);

        let sink = JsonLinesSink::open(&path).unwrap();
        assert_eq!(sink.path(), path);
        sink.store(&batch[..2]).unwrap();
        sink.store(&batch[2..]).unwrap();
        drop(sink);

        assert_eq!(read_back(&path), batch);

        let first = BufReader::new(File::open(&path).unwrap())
            .lines()
            .next()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(value["mnemonic"], batch[0].mnemonic());
        assert_eq!(value["address"], batch[0].address().to_string());
    }

    #[test]
    fn failed_write_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let kept = records(2);
        JsonLinesSink::open(&path).unwrap().store(&kept).unwrap();
        let len_before = std::fs::metadata(&path).unwrap().len();

        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let mut short = ShortFile { file, budget: 40 };
        let buf = encode(&records(3)).unwrap();

        let err = append_synced(&mut short, &path, &buf).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Transient);
        drop(short);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
        assert_eq!(read_back(&path), kept);
    }

    #[test]
    fn recovery_appends_to_existing_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unflushed.jsonl");
        let first = records(2);
        let second = records(3);

        write_recovery(&path, &first).unwrap();
        write_recovery(&path, &second).unwrap();

        assert_eq!(read_back(&path), [first, second].concat());
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonLinesSink::open(dir.path().join("missing").join("out.jsonl"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), StoreErrorKind::Permanent);
    }
}
