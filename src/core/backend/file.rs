use crate::core::backend::{Backend, BackendReader, BackendWriter, Cursor};
use crate::core::constants::*;
use crate::core::errors::*;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Anything longer is treated as a garbage length field during recovery.
const MAX_KEY_LEN: u32 = 1024;

/// Where a value sits in the file.
#[derive(Debug, Clone, Copy)]
struct Location {
    offset: u64,
    len: u32,
}

struct FileBackendInner {
    file: File,
    index: BTreeMap<Vec<u8>, Location>,
    end: u64,
}

/// Append-only record file with an in-memory ordered index.
///
/// File layout: a 16 byte header (`magic`, `version`, reserved) followed by
/// records `[key_len u32][value_len u32][crc32 u32][key][value]`. The
/// checksum covers both lengths, the key and the value. Rewriting a key
/// appends a new record; the index points at the newest one.
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Option<FileBackendInner>>,
}

impl FileBackend {
    #[cfg_attr(not(unix), allow(unused_variables))]
    pub fn open(dir: &Path, file_name: &str, permissions: u32) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::init(dir, e))?;
        let path = dir.join(file_name);

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options.mode(permissions);
        let file = options.open(&path).map_err(|e| Error::init(&path, e))?;

        let inner = FileBackendInner::load(file, &path)?;
        debug!(
            "opened backend {} with {} keys ({} bytes)",
            path.display(),
            inner.index.len(),
            inner.end
        );

        Ok(Self {
            path,
            inner: Mutex::new(Some(inner)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .recover_poison()
            .as_ref()
            .map(|inner| inner.index.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the file and deletes it.
    pub fn destroy(&self) -> Result<()> {
        self.close()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_at(&self, location: Location) -> Result<Vec<u8>> {
        let mut guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "backend.inner".to_string(),
        })?;
        let inner = guard.as_mut().ok_or(Error::StoreClosed)?;
        inner.read_value(location)
    }
}

impl FileBackendInner {
    fn load(mut file: File, path: &Path) -> Result<Self> {
        let file_len = file.metadata()?.len();

        if file_len < BACKEND_HEADER_SIZE as u64 {
            if file_len != 0 {
                warn!("{} has a torn header, reinitializing", path.display());
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header_bytes())?;
            file.sync_all()?;
            return Ok(Self {
                file,
                index: BTreeMap::new(),
                end: BACKEND_HEADER_SIZE as u64,
            });
        }

        let mut header = [0u8; BACKEND_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        if header[0..4] != BACKEND_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = u32::from_le_bytes(header[4..8].try_into()?);
        if version != VERSION {
            return Err(Error::InvalidVersion {
                details: format!("backend file version {} (expected {})", version, VERSION),
            });
        }

        let mut index = BTreeMap::new();
        let mut end = BACKEND_HEADER_SIZE as u64;
        {
            let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, &mut file);
            loop {
                match read_record(&mut reader, end, file_len)? {
                    RecordRead::Record { key, value_len, len } => {
                        let offset = end + RECORD_HEADER_SIZE as u64 + key.len() as u64;
                        index.insert(key, Location { offset, len: value_len });
                        end += len;
                    }
                    RecordRead::Tail => break,
                    RecordRead::Corrupt(details) => {
                        return Err(Error::DataCorruption {
                            details: format!("{} at offset {}: {}", path.display(), end, details),
                        })
                    }
                }
            }
        }

        if end < file_len {
            warn!(
                "truncating {} bytes of an incomplete record at the end of {}",
                file_len - end,
                path.display()
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok(Self { file, index, end })
    }

    fn read_value(&mut self, location: Location) -> Result<Vec<u8>> {
        let mut value = vec![0u8; location.len as usize];
        self.file.seek(SeekFrom::Start(location.offset))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }
}

fn header_bytes() -> [u8; BACKEND_HEADER_SIZE] {
    let mut header = [0u8; BACKEND_HEADER_SIZE];
    header[0..4].copy_from_slice(&BACKEND_MAGIC);
    header[4..8].copy_from_slice(&VERSION.to_le_bytes());
    header
}

fn record_checksum(lengths: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(lengths);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn encode_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + key.len() + value.len());
    record.extend_from_slice(&(key.len() as u32).to_le_bytes());
    record.extend_from_slice(&(value.len() as u32).to_le_bytes());
    let crc = record_checksum(&record[0..8], key, value);
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(key);
    record.extend_from_slice(value);
    record
}

enum RecordRead {
    Record { key: Vec<u8>, value_len: u32, len: u64 },
    /// Clean EOF, or a last record cut short by a crash.
    Tail,
    /// A damaged record with more data behind it.
    Corrupt(String),
}

/// Reads the record starting at `offset` during recovery. Only the last
/// record of the file may be incomplete; a bad record followed by further
/// bytes is corruption, never a torn write.
fn read_record<R: Read>(reader: &mut R, offset: u64, file_len: u64) -> Result<RecordRead> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    if reader.read_exact(&mut header).is_err() {
        return Ok(RecordRead::Tail);
    }
    let key_len = u32::from_le_bytes(header[0..4].try_into()?);
    let value_len = u32::from_le_bytes(header[4..8].try_into()?);
    let stored_crc = u32::from_le_bytes(header[8..12].try_into()?);

    let record_len = RECORD_HEADER_SIZE as u64 + key_len as u64 + value_len as u64;
    let reaches_eof = offset + record_len >= file_len;
    if offset + record_len > file_len {
        return Ok(RecordRead::Tail);
    }
    if key_len > MAX_KEY_LEN {
        return Ok(if reaches_eof {
            RecordRead::Tail
        } else {
            RecordRead::Corrupt(format!("key length {} out of range", key_len))
        });
    }

    let mut key = vec![0u8; key_len as usize];
    let mut value = Vec::new();
    if reader.read_exact(&mut key).is_err() {
        return Ok(RecordRead::Tail);
    }
    let read = reader.by_ref().take(value_len as u64).read_to_end(&mut value)?;
    if read != value_len as usize {
        return Ok(RecordRead::Tail);
    }
    if record_checksum(&header[0..8], &key, &value) != stored_crc {
        return Ok(if reaches_eof {
            RecordRead::Tail
        } else {
            RecordRead::Corrupt("record checksum mismatch".to_string())
        });
    }

    Ok(RecordRead::Record {
        key,
        value_len,
        len: record_len,
    })
}

impl BackendReader for FileBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "backend.inner".to_string(),
        })?;
        let inner = guard.as_mut().ok_or(Error::StoreClosed)?;
        match inner.index.get(key).copied() {
            Some(location) => inner.read_value(location).map(Some),
            None => Ok(None),
        }
    }

    fn cursor(&self) -> Result<Cursor<'_>> {
        let entries: Vec<(Vec<u8>, Location)> = {
            let guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
                lock_name: "backend.inner".to_string(),
            })?;
            let inner = guard.as_ref().ok_or(Error::StoreClosed)?;
            inner.index.iter().map(|(k, loc)| (k.clone(), *loc)).collect()
        };

        Ok(Box::new(
            entries
                .into_iter()
                .map(move |(key, location)| self.read_at(location).map(|value| (key, value))),
        ))
    }
}

impl BackendWriter for FileBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = encode_record(key, value);

        let mut guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "backend.inner".to_string(),
        })?;
        let inner = guard.as_mut().ok_or(Error::StoreClosed)?;

        inner.file.seek(SeekFrom::Start(inner.end))?;
        inner.file.write_all(&record)?;

        let location = Location {
            offset: inner.end + RECORD_HEADER_SIZE as u64 + key.len() as u64,
            len: value.len() as u32,
        };
        inner.end += record.len() as u64;
        inner.index.insert(key.to_vec(), location);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "backend.inner".to_string(),
        })?;
        let inner = guard.as_ref().ok_or(Error::StoreClosed)?;
        inner.file.sync_all()?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().recover_poison();
        if guard.take().is_some() {
            debug!("closed backend {}", self.path.display());
        }
        Ok(())
    }
}
