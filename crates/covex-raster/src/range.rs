//! Byte-range access to raster files.
//!
//! GeoTIFFs are read through a [`RangeReader`] so that a point sample only
//! pulls the header, the IFD and the one strip or tile holding the pixel.
//! Local files seek and read, HTTP(S) URLs use `Range` requests and
//! credentialed S3 objects use `object_store` ranged GETs.
//!
//! [`RangeCursor`] adapts a reader to `Read + Seek` for the TIFF decoder and
//! caches fixed-size blocks so the many small reads the decoder makes while
//! walking an IFD turn into a handful of requests.

use crate::{RasterError, Result};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Cache block size for [`RangeCursor`].
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Upper bound on a single coalesced request.
const MAX_REQUEST: u64 = 8 * 1024 * 1024;

/// Reads byte ranges from a local or remote object.
pub trait RangeReader: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Total size of the object in bytes.
    fn size(&self) -> u64;

    /// Path or URL, for logging and errors.
    fn identifier(&self) -> &str;
}

/// Range reads from a file on disk.
pub struct LocalRangeReader {
    path: String,
    file: Mutex<File>,
    size: u64,
}

impl LocalRangeReader {
    /// Open a file; fails with [`RasterError::Io`] if it cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.display().to_string(),
            file: Mutex::new(file),
            size,
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other(format!("file handle for {} poisoned", self.path)))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.path
    }
}

/// Range reads over HTTP(S), sized with a HEAD request.
pub struct HttpRangeReader {
    url: String,
    size: u64,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    /// Issue the HEAD request; a non-success status is a failed read.
    pub fn open(client: reqwest::blocking::Client, url: &str) -> Result<Self> {
        let response = client.head(url).send()?;
        if !response.status().is_success() {
            return Err(RasterError::RemoteReadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RasterError::RemoteReadFailed {
                url: url.to_string(),
                reason: "no Content-Length in HEAD response".to_string(),
            })?;

        Ok(Self {
            url: url.to_string(),
            size,
            client,
        })
    }

    fn failed(&self, reason: impl Into<String>) -> RasterError {
        RasterError::RemoteReadFailed {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let response = self.client.get(&self.url).header(RANGE, range).send()?;

        let bytes = match response.status() {
            StatusCode::PARTIAL_CONTENT => response.bytes()?.to_vec(),
            // Server ignored the range and sent the whole object
            StatusCode::OK => {
                let body = response.bytes()?;
                let start = (offset as usize).min(body.len());
                let end = ((offset + length) as usize).min(body.len());
                body[start..end].to_vec()
            }
            status => return Err(self.failed(format!("HTTP {status}"))),
        };

        if bytes.len() as u64 != length {
            return Err(self.failed(format!(
                "expected {length} bytes at offset {offset}, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// Signed range reads through `object_store`, driven on a shared runtime.
pub struct S3RangeReader {
    url: String,
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    size: u64,
    runtime: tokio::runtime::Handle,
}

impl S3RangeReader {
    /// Look up the object size with a HEAD request.
    pub fn open(
        store: Arc<dyn ObjectStore>,
        key: &str,
        url: &str,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self> {
        let path = ObjectPath::from(key);
        let meta = runtime.block_on(store.head(&path))?;
        Ok(Self {
            url: url.to_string(),
            store,
            path,
            size: meta.size,
            runtime,
        })
    }
}

impl RangeReader for S3RangeReader {
    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let bytes = self
            .runtime
            .block_on(self.store.get_range(&self.path, offset..offset + length))?;
        Ok(bytes.to_vec())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// Byte and request counters shared between a source and its cursors.
#[derive(Debug, Default)]
pub struct ReadCounters {
    bytes: AtomicU64,
    requests: AtomicU64,
}

impl ReadCounters {
    /// Bytes fetched so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Range requests issued so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
}

/// `Read + Seek` view of a [`RangeReader`] with a block cache.
///
/// A read that misses the cache fetches every missing block it spans in one
/// request. Reader errors surface as `io::Error`s wrapping the
/// [`RasterError`], so they can be recovered after the decoder returns.
pub struct RangeCursor {
    reader: Box<dyn RangeReader>,
    position: u64,
    blocks: HashMap<u64, Vec<u8>>,
    counters: Arc<ReadCounters>,
}

impl RangeCursor {
    /// Wrap a reader, recording fetches in `counters`.
    pub fn new(reader: Box<dyn RangeReader>, counters: Arc<ReadCounters>) -> Self {
        Self {
            reader,
            position: 0,
            blocks: HashMap::new(),
            counters,
        }
    }

    /// Make sure every block overlapping `[start, end)` is cached.
    fn fill(&mut self, start: u64, end: u64) -> Result<()> {
        let first = start / BLOCK_SIZE;
        let last = (end - 1) / BLOCK_SIZE;

        let mut block = first;
        while block <= last {
            if self.blocks.contains_key(&block) {
                block += 1;
                continue;
            }
            // Coalesce a run of missing blocks into one request
            let mut run_end = block + 1;
            while run_end <= last
                && !self.blocks.contains_key(&run_end)
                && (run_end + 1 - block) * BLOCK_SIZE <= MAX_REQUEST
            {
                run_end += 1;
            }

            let offset = block * BLOCK_SIZE;
            let length = (run_end * BLOCK_SIZE).min(self.reader.size()) - offset;
            trace!(source = self.reader.identifier(), offset, length, "range read");
            let data = self.reader.read_range(offset, length)?;
            self.counters.record(length);

            for (i, chunk) in data.chunks(BLOCK_SIZE as usize).enumerate() {
                self.blocks.insert(block + i as u64, chunk.to_vec());
            }
            block = run_end;
        }
        Ok(())
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.size();
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }
        let end = (self.position + buf.len() as u64).min(size);
        self.fill(self.position, end).map_err(io::Error::other)?;

        let mut written = 0;
        while self.position < end {
            let block = self.position / BLOCK_SIZE;
            let within = (self.position - block * BLOCK_SIZE) as usize;
            let Some(data) = self.blocks.get(&block) else {
                break;
            };
            let take = data
                .len()
                .saturating_sub(within)
                .min((end - self.position) as usize);
            if take == 0 {
                break;
            }
            buf[written..written + take].copy_from_slice(&data[within..within + take]);
            written += take;
            self.position += take as u64;
        }
        Ok(written)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.reader.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of object")
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// In-memory reader that records every requested range.
    struct MemoryReader {
        data: Vec<u8>,
        calls: Mutex<Vec<(u64, u64)>>,
    }

    impl RangeReader for MemoryReader {
        fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((offset, length));
            let start = offset as usize;
            Ok(self.data[start..start + length as usize].to_vec())
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "memory"
        }
    }

    fn memory(len: usize) -> (Arc<MemoryReader>, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let reader = Arc::new(MemoryReader {
            data: data.clone(),
            calls: Mutex::new(Vec::new()),
        });
        (reader, data)
    }

    impl RangeReader for Arc<MemoryReader> {
        fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
            self.as_ref().read_range(offset, length)
        }

        fn size(&self) -> u64 {
            self.as_ref().size()
        }

        fn identifier(&self) -> &str {
            "memory"
        }
    }

    #[test]
    fn test_local_range_reader() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"Hello, World!").expect("write");

        let reader = LocalRangeReader::open(file.path()).expect("open");
        assert_eq!(reader.size(), 13);
        assert_eq!(reader.read_range(0, 5).expect("read"), b"Hello");
        assert_eq!(reader.read_range(7, 5).expect("read"), b"World");
        assert!(reader.read_range(10, 5).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LocalRangeReader::open(Path::new("/nonexistent/covex/a.tif"))
            .err()
            .expect("should fail");
        assert!(matches!(err, RasterError::Io(_)));
    }

    #[test]
    fn test_cursor_reads_across_blocks() {
        let len = (BLOCK_SIZE * 3 + 100) as usize;
        let (reader, data) = memory(len);
        let counters = Arc::new(ReadCounters::default());
        let mut cursor = RangeCursor::new(Box::new(Arc::clone(&reader)), Arc::clone(&counters));

        let start = BLOCK_SIZE - 10;
        cursor.seek(SeekFrom::Start(start)).expect("seek");
        let mut buf = vec![0u8; 20];
        cursor.read_exact(&mut buf).expect("read");
        assert_eq!(buf, &data[start as usize..start as usize + 20]);

        // Two missing blocks, one request
        assert_eq!(counters.requests(), 1);
        assert_eq!(counters.bytes(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_cursor_caches_blocks() {
        let (reader, data) = memory(1000);
        let counters = Arc::new(ReadCounters::default());
        let mut cursor = RangeCursor::new(Box::new(Arc::clone(&reader)), Arc::clone(&counters));

        let mut head = [0u8; 8];
        cursor.read_exact(&mut head).expect("read");
        cursor.seek(SeekFrom::End(-8)).expect("seek");
        let mut tail = [0u8; 8];
        cursor.read_exact(&mut tail).expect("read");

        assert_eq!(head, data[..8]);
        assert_eq!(tail, data[992..]);
        // The object fits in one block, clamped to its size
        assert_eq!(*reader.calls.lock().expect("calls"), vec![(0, 1000)]);
        assert_eq!(counters.bytes(), 1000);
    }

    #[test]
    fn test_cursor_eof_and_seek() {
        let (reader, _) = memory(10);
        let mut cursor = RangeCursor::new(Box::new(reader), Arc::new(ReadCounters::default()));

        cursor.seek(SeekFrom::Start(8)).expect("seek");
        let mut buf = [0u8; 4];
        assert_eq!(cursor.read(&mut buf).expect("read"), 2);
        assert_eq!(cursor.read(&mut buf).expect("read"), 0);
        assert_eq!(cursor.seek(SeekFrom::Current(-5)).expect("seek"), 5);
        assert!(cursor.seek(SeekFrom::Current(-6)).is_err());
    }
}
