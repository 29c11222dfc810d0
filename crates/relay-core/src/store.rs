//! Append-only record log with a separately persisted lookup index.
//!
//! Layout inside the store directory:
//!   `<name>.jsonl`      : one JSON record per line, never rewritten
//!   `<name>.index.json` : the whole index, replaced via write-temp + rename
//!
//! The index is a derived view of the log. Every operation runs under the
//! store's single mutex; callers that need append-then-index to be atomic
//! with respect to other callers hold one [`StoreGuard`] across both steps.

use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

const LOG_SUFFIX: &str = "jsonl";
const INDEX_SUFFIX: &str = "index.json";

pub struct AppendStore<I> {
    log_path: PathBuf,
    index_path: PathBuf,
    lock: Mutex<()>,
    _index: PhantomData<fn() -> I>,
}

/// Outcome of walking the log from the start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub records: usize,
    pub skipped: usize,
}

impl<I> AppendStore<I>
where
    I: Serialize + DeserializeOwned + Default,
{
    /// Open (or create) the store `name` under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        if name.is_empty() {
            return Err(RelayError::invalid("store name"));
        }
        fs::create_dir_all(dir)?;
        restrict_permissions(dir, 0o750);

        let store = Self {
            log_path: dir.join(format!("{name}.{LOG_SUFFIX}")),
            index_path: dir.join(format!("{name}.{INDEX_SUFFIX}")),
            lock: Mutex::new(()),
            _index: PhantomData,
        };
        if !store.log_path.exists() {
            create_private_file(&store.log_path)?;
        }
        if !store.index_path.exists() {
            store.lock().write_index(&I::default())?;
        }
        debug!(log = %store.log_path.display(), "append store opened");
        Ok(store)
    }

    pub fn lock(&self) -> StoreGuard<'_, I> {
        StoreGuard {
            store: self,
            _guard: self.lock.lock(),
        }
    }

    pub fn append_record<T: Serialize>(&self, value: &T) -> Result<u64> {
        self.lock().append_record(value)
    }

    pub fn read_record_at<T: DeserializeOwned>(&self, offset: u64) -> Result<T> {
        self.lock().read_record_at(offset)
    }

    pub fn read_index(&self) -> Result<I> {
        self.lock().read_index()
    }

    /// Load the index, let `f` mutate it, and persist it atomically.
    pub fn update_index<R>(&self, f: impl FnOnce(&mut I) -> R) -> Result<R> {
        let guard = self.lock();
        let mut index = guard.read_index()?;
        let out = f(&mut index);
        guard.write_index(&index)?;
        Ok(out)
    }

    pub fn log_len(&self) -> Result<u64> {
        let _guard = self.lock.lock();
        Ok(fs::metadata(&self.log_path)?.len())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

/// Exclusive access to one store for the guard's lifetime.
pub struct StoreGuard<'a, I> {
    store: &'a AppendStore<I>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, I> StoreGuard<'a, I>
where
    I: Serialize + DeserializeOwned + Default,
{
    /// Append one newline-terminated record; returns its starting offset.
    pub fn append_record<T: Serialize>(&self, value: &T) -> Result<u64> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.store.log_path)?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        if offset > 0 {
            // A torn tail from an interrupted append gets its own line so the
            // next record stays decodable on replay.
            file.seek(SeekFrom::Start(offset - 1))?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(offset, "terminating torn record before append");
                file.write_all(b"\n")?;
                offset += 1;
            }
        }
        file.write_all(&line)?;
        file.flush()?;
        Ok(offset)
    }

    /// Decode exactly one record starting at `offset`.
    pub fn read_record_at<T: DeserializeOwned>(&self, offset: u64) -> Result<T> {
        let mut file = File::open(&self.store.log_path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            return Err(RelayError::Corrupt(format!(
                "no complete record at offset {offset}"
            )));
        }
        Ok(serde_json::from_slice(&line)?)
    }

    pub fn read_index(&self) -> Result<I> {
        let bytes = fs::read(&self.store.index_path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(I::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::Corrupt(format!("index {}: {e}", self.store.index_path.display())))
    }

    /// Replace the index file as a whole; readers never see a partial write.
    pub fn write_index(&self, index: &I) -> Result<()> {
        let bytes = serde_json::to_vec(index)?;
        let tmp = tmp_path(&self.store.index_path);
        {
            let mut file = create_private_file(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.store.index_path)?;
        Ok(())
    }

    /// Walk every complete record in log order.
    ///
    /// Lines that fail to decode are skipped and counted. A final line with
    /// no terminating newline is a torn append and ends the walk.
    pub fn replay<T, F>(&self, mut visit: F) -> Result<ReplayReport>
    where
        T: DeserializeOwned,
        F: FnMut(u64, T),
    {
        let file = File::open(&self.store.log_path)?;
        let mut reader = BufReader::new(file);
        let mut report = ReplayReport::default();
        let mut offset = 0u64;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                warn!(offset, bytes = read, "torn record at end of log; ignoring");
                report.skipped += 1;
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                offset += read as u64;
                continue;
            }
            match serde_json::from_slice::<T>(&line) {
                Ok(record) => {
                    visit(offset, record);
                    report.records += 1;
                }
                Err(err) => {
                    warn!(offset, error = %err, "undecodable log record; skipping");
                    report.skipped += 1;
                }
            }
            offset += read as u64;
        }
        Ok(report)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn create_private_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    Ok(options.open(path)?)
}

fn restrict_permissions(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
}
