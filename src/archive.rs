//! Streaming access to compressed log archives.
//!
//! A partition key is a prefix: the store may hold zero, one or several
//! archives under it (multi-part delivery). Archives are opened one at a time
//! and decompressed incrementally, so memory stays bounded by the decoder
//! window plus the longest line regardless of archive size.

use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::StreamError;
use crate::window::PartitionKey;

/// One object in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    pub bucket: String,
    pub key: String,
    pub size: Option<u64>,
}

/// Read-only object storage holding the log archives.
pub trait ArchiveStore: Send + Sync {
    /// All objects whose key starts with `prefix`, in key order.
    fn list_objects(&self, bucket: &str, prefix: &str) -> io::Result<Vec<ObjectHandle>>;

    /// Raw (still compressed) bytes of one object.
    fn open_stream(&self, object: &ObjectHandle) -> io::Result<Box<dyn Read + Send>>;
}

/// Directory tree laid out like the object store: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    root: PathBuf,
}

impl LocalArchiveStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> io::Result<PathBuf> {
        ensure_relative("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }
}

/// Reject keys that would escape the bucket directory.
fn ensure_relative(what: &str, value: &str) -> io::Result<()> {
    let escapes = Path::new(value)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes && !value.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} '{}' must be a plain relative path", what, value),
        ));
    }
    Ok(())
}

fn collect_files(
    dir: &Path,
    bucket: &str,
    key_prefix: &str,
    out: &mut Vec<ObjectHandle>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{}{}", key_prefix, name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), bucket, &format!("{}/", key), out)?;
        } else if file_type.is_file() {
            out.push(ObjectHandle {
                bucket: bucket.to_string(),
                key,
                size: entry.metadata().ok().map(|m| m.len()),
            });
        }
    }
    Ok(())
}

impl ArchiveStore for LocalArchiveStore {
    fn list_objects(&self, bucket: &str, prefix: &str) -> io::Result<Vec<ObjectHandle>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        if !bucket_dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("bucket directory {:?} does not exist", bucket_dir),
            ));
        }

        // Only the directory holding the prefix's last segment needs walking
        let (dir_part, leaf) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        ensure_relative("prefix", dir_part)?;

        let dir = bucket_dir.join(dir_part);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut all = Vec::new();
        collect_files(&dir, bucket, dir_part, &mut all)?;

        let mut objects: Vec<ObjectHandle> = all
            .into_iter()
            .filter(|o| o.key[dir_part.len()..].starts_with(leaf))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn open_stream(&self, object: &ObjectHandle) -> io::Result<Box<dyn Read + Send>> {
        ensure_relative("key", &object.key)?;
        let path = self.bucket_dir(&object.bucket)?.join(&object.key);
        Ok(Box::new(File::open(path)?))
    }
}

/// Opens the archives of one partition from a store.
#[derive(Clone)]
pub struct ArchiveReader {
    store: Arc<dyn ArchiveStore>,
    bucket: String,
}

impl ArchiveReader {
    pub fn new(store: Arc<dyn ArchiveStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// List the partition and return a lazy sequence of its archives.
    pub fn open_partition(&self, key: &PartitionKey) -> Result<PartitionArchives, StreamError> {
        let objects = self
            .store
            .list_objects(&self.bucket, key.as_str())
            .map_err(|source| StreamError::List {
                prefix: key.to_string(),
                source,
            })?;
        debug!("{} archive(s) under {}", objects.len(), key);
        Ok(PartitionArchives {
            store: Arc::clone(&self.store),
            objects: objects.into_iter(),
        })
    }
}

/// Archives of one partition, opened on demand.
pub struct PartitionArchives {
    store: Arc<dyn ArchiveStore>,
    objects: std::vec::IntoIter<ObjectHandle>,
}

impl PartitionArchives {
    /// Archives not yet opened.
    pub fn remaining(&self) -> usize {
        self.objects.len()
    }
}

impl Iterator for PartitionArchives {
    type Item = Result<ArchiveLines, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        let object = self.objects.next()?;
        Some(
            self.store
                .open_stream(&object)
                .map(|raw| ArchiveLines::new(object.key.clone(), raw))
                .map_err(|source| StreamError::Open {
                    key: object.key,
                    source,
                }),
        )
    }
}

/// Decompressed lines of one archive. Single pass; reopen to read again.
pub struct ArchiveLines {
    key: String,
    reader: BufReader<MultiGzDecoder<Box<dyn Read + Send>>>,
    buf: Vec<u8>,
    lines: u64,
    done: bool,
}

impl ArchiveLines {
    pub fn new(key: impl Into<String>, raw: Box<dyn Read + Send>) -> Self {
        Self {
            key: key.into(),
            reader: BufReader::new(MultiGzDecoder::new(raw)),
            buf: Vec::with_capacity(1024),
            lines: 0,
            done: false,
        }
    }

    /// Open a gzip archive from the local filesystem.
    pub fn open_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(path.display().to_string(), Box::new(file)))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lines produced so far.
    pub fn lines_read(&self) -> u64 {
        self.lines
    }
}

impl Iterator for ArchiveLines {
    type Item = Result<String, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                self.lines += 1;
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(source) => {
                // A broken gzip stream cannot be resynchronised
                self.done = true;
                Some(Err(StreamError::Decode {
                    key: self.key.clone(),
                    lines: self.lines,
                    source,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    fn write_object(root: &Path, bucket: &str, key: &str, bytes: &[u8]) {
        let path = root.join(bucket).join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_lines_from_gzip() {
        let raw = gzip("first\nsecond\r\nthird");
        let lines: Vec<String> = ArchiveLines::new("k", Box::new(io::Cursor::new(raw)))
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_multi_member_gzip() {
        let mut raw = gzip("a\nb\n");
        raw.extend(gzip("c\n"));
        let lines: Vec<String> = ArchiveLines::new("k", Box::new(io::Cursor::new(raw)))
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"ok\n\xff\xfebad\n").unwrap();
        let raw = enc.finish().unwrap();
        let lines: Vec<String> = ArchiveLines::new("k", Box::new(io::Cursor::new(raw)))
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("bad"));
    }

    #[test]
    fn test_corrupt_archive_yields_one_error_then_stops() {
        let raw = b"definitely not gzip".to_vec();
        let mut lines = ArchiveLines::new("broken.gz", Box::new(io::Cursor::new(raw)));
        match lines.next() {
            Some(Err(StreamError::Decode { key, lines, .. })) => {
                assert_eq!(key, "broken.gz");
                assert_eq!(lines, 0);
            }
            other => panic!("expected decode error, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_truncated_archive_keeps_lines_read_before_error() {
        let text: String = (0..20_000u64)
            .map(|i| format!("{} {}\n", i, i * 7919 % 10_007))
            .collect();
        let raw = gzip(&text);
        let cut = raw[..raw.len() / 2].to_vec();
        let results: Vec<_> = ArchiveLines::new("cut.gz", Box::new(io::Cursor::new(cut))).collect();
        assert!(results.last().unwrap().is_err());
        assert!(results.iter().filter(|r| r.is_ok()).count() > 0);
    }

    #[test]
    fn test_local_store_prefix_listing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_object(root, "logs", "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0905Z_a.log.gz", b"x");
        write_object(root, "logs", "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0905Z_b.log.gz", b"x");
        write_object(root, "logs", "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0910Z_a.log.gz", b"x");

        let store = LocalArchiveStore::new(root);
        let objects = store
            .list_objects("logs", "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0905Z")
            .unwrap();
        let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0905Z_a.log.gz",
                "AWSLogs/1/elb/r/2024/03/07/1_elb_r_lb_20240307T0905Z_b.log.gz",
            ]
        );
        assert_eq!(objects[0].size, Some(1));
    }

    #[test]
    fn test_local_store_missing_partition_is_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let objects = store.list_objects("logs", "AWSLogs/none/2024/01/01/x").unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_local_store_missing_bucket_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let err = store.list_objects("absent", "x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_local_store_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        let store = LocalArchiveStore::new(dir.path());
        assert!(store.list_objects("logs", "../../etc/pass").is_err());
        assert!(store.list_objects("../logs", "x").is_err());
    }

    #[test]
    fn test_open_partition_streams_each_archive() {
        let dir = TempDir::new().unwrap();
        write_object(dir.path(), "logs", "p/k_1.gz", &gzip("a\nb\n"));
        write_object(dir.path(), "logs", "p/k_2.gz", &gzip("c\n"));

        let reader = ArchiveReader::new(Arc::new(LocalArchiveStore::new(dir.path())), "logs");
        let archives = reader.open_partition(&PartitionKey::from("p/k_")).unwrap();
        assert_eq!(archives.remaining(), 2);

        let lines: Vec<String> = archives
            .flat_map(|archive| archive.unwrap().map(|l| l.unwrap()))
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_open_partition_listing_failure() {
        let dir = TempDir::new().unwrap();
        let reader = ArchiveReader::new(Arc::new(LocalArchiveStore::new(dir.path())), "missing");
        let err = reader.open_partition(&PartitionKey::from("p/")).err().unwrap();
        assert!(matches!(err, StreamError::List { .. }));
    }
}
