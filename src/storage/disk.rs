use std::{
    collections::{BTreeMap, btree_map},
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{error::Result, storage::engine::{Engine, EngineIterator}};

/// Key directory: key -> (value offset, value length) in the log file
type KeyDir = BTreeMap<Vec<u8>, (u64, u32)>;

/// Entry header: key length (u32) + value length (i32, -1 marks a tombstone)
const HEADER_SIZE: u64 = 8;

/// Append-only log engine
///
/// Every write appends `[key len][value len][key][value]` to a single file,
/// deletes append a tombstone. An in-memory key directory maps live keys to the
/// position of their latest value; it is rebuilt by replaying the log on open.
/// `compact` rewrites the log with live entries only.
pub struct DiskEngine {
    keydir: KeyDir,
    log: Log,
}

impl DiskEngine {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let mut log = Log::new(path.into())?;
        let keydir = log.build_keydir()?;
        info!(path = %log.path.display(), keys = keydir.len(), "opened disk engine");
        Ok(Self { keydir, log })
    }

    /// Rewrites the log so that it only holds live entries
    pub fn compact(&mut self) -> Result<()> {
        let mut compact_path = self.log.path.clone();
        compact_path.set_extension("compact");

        let mut new_log = Log::new(compact_path)?;
        new_log.file.set_len(0)?;
        let mut new_keydir = KeyDir::new();
        {
            let mut writer = BufWriter::new(&mut new_log.file);
            let mut pos = 0u64;
            for (key, (offset, len)) in self.keydir.iter() {
                let value = self.log.read_value(*offset, *len)?;
                let (value_offset, written) = Log::encode_entry(&mut writer, pos, key, Some(&value))?;
                new_keydir.insert(key.clone(), (value_offset, value.len() as u32));
                pos += written;
            }
            writer.flush()?;
        }
        new_log.file.sync_all()?;

        std::fs::rename(&new_log.path, &self.log.path)?;
        new_log.path = self.log.path.clone();
        debug!(path = %new_log.path.display(), keys = new_keydir.len(), "compacted log");

        self.log = new_log;
        self.keydir = new_keydir;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }
}

impl Engine for DiskEngine {
    type EngineIterator<'a> = DiskEngineIterator<'a>;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let (offset, len) = self.log.write_entry(&key, Some(&value))?;
        self.keydir.insert(key, (offset, len));
        Ok(())
    }

    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.keydir.get(&key) {
            Some((offset, len)) => Ok(Some(self.log.read_value(*offset, *len)?)),
            None => Ok(None),
        }
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        if self.keydir.remove(&key).is_some() {
            self.log.write_entry(&key, None)?;
        }
        Ok(())
    }

    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_> {
        DiskEngineIterator {
            inner: self.keydir.range(range),
            log: &mut self.log,
        }
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.log.file.sync_all()?)
    }
}

/// Iterator over a key range of a [`DiskEngine`]
pub struct DiskEngineIterator<'a> {
    inner: btree_map::Range<'a, Vec<u8>, (u64, u32)>,
    log: &'a mut Log,
}

impl<'a> DiskEngineIterator<'a> {
    fn map(&mut self, item: (&Vec<u8>, &(u64, u32))) -> <Self as Iterator>::Item {
        let (key, (offset, len)) = item;
        Ok((key.clone(), self.log.read_value(*offset, *len)?))
    }
}

impl<'a> EngineIterator for DiskEngineIterator<'a> {}

impl<'a> Iterator for DiskEngineIterator<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(self.map(item))
    }
}

impl<'a> DoubleEndedIterator for DiskEngineIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let item = self.inner.next_back()?;
        Some(self.map(item))
    }
}

struct Log {
    path: PathBuf,
    file: File,
}

impl Log {
    fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Replays the log into a key directory, dropping a torn trailing entry
    fn build_keydir(&mut self) -> Result<KeyDir> {
        let mut keydir = KeyDir::new();
        let file_len = self.file.metadata()?.len();
        let mut reader = BufReader::new(&mut self.file);
        let mut pos = reader.seek(SeekFrom::Start(0))?;
        let mut torn_at = None;

        while pos < file_len {
            match Self::read_entry(&mut reader, pos, file_len) {
                Ok((key, value_offset, Some(value_len))) => {
                    keydir.insert(key, (value_offset, value_len));
                    pos = value_offset + value_len as u64;
                }
                Ok((key, value_offset, None)) => {
                    keydir.remove(&key);
                    pos = value_offset;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    torn_at = Some(pos);
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        drop(reader);

        if let Some(pos) = torn_at {
            debug!(offset = pos, "truncating incomplete log entry");
            self.file.set_len(pos)?;
        }
        Ok(keydir)
    }

    /// Reads the entry at `pos`: key, value offset and value length (None for tombstones)
    fn read_entry(
        reader: &mut BufReader<&mut File>,
        pos: u64,
        file_len: u64,
    ) -> std::io::Result<(Vec<u8>, u64, Option<u32>)> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let key_len = u32::from_be_bytes(len_buf);
        reader.read_exact(&mut len_buf)?;
        let value_len = match i32::from_be_bytes(len_buf) {
            l if l >= 0 => Some(l as u32),
            _ => None,
        };
        let value_offset = pos + HEADER_SIZE + key_len as u64;

        let mut key = vec![0; key_len as usize];
        reader.read_exact(&mut key)?;
        if let Some(value_len) = value_len {
            if value_offset + value_len as u64 > file_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "value extends beyond end of file",
                ));
            }
            reader.seek_relative(value_len as i64)?;
        }
        Ok((key, value_offset, value_len))
    }

    fn read_value(&mut self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut value = vec![0; len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends an entry, returning the value offset and length
    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(u64, u32)> {
        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::new(&mut self.file);
        let (value_offset, _) = Self::encode_entry(&mut writer, pos, key, value)?;
        writer.flush()?;
        Ok((value_offset, value.map_or(0, |v| v.len() as u32)))
    }

    /// Writes one entry at `pos`, returning the value offset and total bytes written
    fn encode_entry(
        writer: &mut impl Write,
        pos: u64,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(u64, u64)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(-1, |v| v.len() as i32);
        writer.write_all(&key_len.to_be_bytes())?;
        writer.write_all(&value_len.to_be_bytes())?;
        writer.write_all(key)?;
        if let Some(value) = value {
            writer.write_all(value)?;
        }
        let value_offset = pos + HEADER_SIZE + key_len as u64;
        Ok((value_offset, HEADER_SIZE + key_len as u64 + value.map_or(0, |v| v.len() as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::DiskEngine;
    use crate::{error::Result, storage::engine::Engine};

    #[test]
    fn test_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docdb.log");

        let mut eng = DiskEngine::new(path.clone())?;
        eng.set(b"a".to_vec(), b"1".to_vec())?;
        eng.set(b"b".to_vec(), b"2".to_vec())?;
        eng.set(b"a".to_vec(), b"3".to_vec())?;
        eng.delete(b"b".to_vec())?;
        eng.set(b"c".to_vec(), vec![])?;
        drop(eng);

        let mut eng = DiskEngine::new(path)?;
        assert_eq!(eng.get(b"a".to_vec())?, Some(b"3".to_vec()));
        assert_eq!(eng.get(b"b".to_vec())?, None);
        assert_eq!(eng.get(b"c".to_vec())?, Some(vec![]));
        Ok(())
    }

    #[test]
    fn test_compact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docdb.log");

        let mut eng = DiskEngine::new(path.clone())?;
        for i in 0..10u8 {
            eng.set(vec![i % 3], vec![i; 16])?;
        }
        eng.delete(vec![2])?;
        let before = std::fs::metadata(&path)?.len();
        eng.compact()?;
        let after = std::fs::metadata(&path)?.len();
        assert!(after < before);
        drop(eng);

        let mut eng = DiskEngine::new(path)?;
        assert_eq!(eng.get(vec![0])?, Some(vec![9; 16]));
        assert_eq!(eng.get(vec![1])?, Some(vec![7; 16]));
        assert_eq!(eng.get(vec![2])?, None);
        Ok(())
    }

    #[test]
    fn test_torn_tail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docdb.log");

        let mut eng = DiskEngine::new(path.clone())?;
        eng.set(b"key".to_vec(), b"value".to_vec())?;
        drop(eng);

        let len = std::fs::metadata(&path)?.len();
        let file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.set_len(len + 5)?;
        drop(file);

        let mut eng = DiskEngine::new(path.clone())?;
        assert_eq!(eng.get(b"key".to_vec())?, Some(b"value".to_vec()));
        assert_eq!(std::fs::metadata(&path)?.len(), len);
        Ok(())
    }
}
