//! # File Readers and Buffer Handles
//!
//! One `JsonFileReader` per input file. A reader hands out refcounted
//! `JsonBufferHandle`s of decoded bytes; a handle stays registered with its
//! reader until every consumer has released it, which keeps buffer `k` alive
//! while the record straddling into buffer `k+1` is reconstructed.
//!
//! ## Read Strategies
//!
//! - **No-seek**: the reader's stream is consumed serially under the
//!   reader's lock. Used for compressed input, array framing, and format
//!   auto-detection. Parallelism comes from scanning multiple files.
//! - **Seek**: for seekable, uncompressed, newline-delimited files the
//!   reader hands out `(offset, length)` chunks under the lock and workers
//!   read them through their own file handles, parallelizing a single large
//!   file.
//!
//! ## Compression
//!
//! gzip and zstd streams are decoded on the fly; `auto` resolves from the
//! file extension. Compressed readers are never seekable.

use crate::scan::options::{JsonCompression, JsonFormat, JsonScanOptions};
use eyre::{bail, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A refcounted slice of decoded bytes belonging to one reader.
#[derive(Debug)]
pub struct JsonBufferHandle {
    buffer_index: u64,
    /// Number of local states still reading from this buffer.
    readers: AtomicU32,
    is_last: bool,
    data: Box<[u8]>,
    len: usize,
    /// Number of records preceding this buffer in the file, when known
    /// (serial reads only). Used for error locators.
    record_base: Option<u64>,
}

impl JsonBufferHandle {
    fn new(
        buffer_index: u64,
        data: Vec<u8>,
        len: usize,
        is_last: bool,
        record_base: Option<u64>,
    ) -> Self {
        Self {
            buffer_index,
            readers: AtomicU32::new(1),
            is_last,
            data: data.into_boxed_slice(),
            len,
            record_base,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn buffer_index(&self) -> u64 {
        self.buffer_index
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn record_base(&self) -> Option<u64> {
        self.record_base
    }

    pub fn register_reader(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one consumer; returns true when this was the last one.
    pub fn release(&self) -> bool {
        let prev = self.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "buffer handle released more times than registered");
        prev == 1
    }
}

enum ReadStream {
    Plain(File),
    Gzip(flate2::read::MultiGzDecoder<File>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadStream::Plain(f) => f.read(buf),
            ReadStream::Gzip(d) => d.read(buf),
            ReadStream::Zstd(d) => d.read(buf),
        }
    }
}

struct ReaderInner {
    stream: Option<ReadStream>,
    /// Resolved framing; `Auto` until the first buffer is sniffed.
    format: JsonFormat,
    next_buffer_index: u64,
    next_seek_offset: u64,
    file_size: u64,
    bytes_read: u64,
    records_emitted: u64,
    pending_byte: Option<u8>,
    finished: bool,
    exclusive: bool,
    buffers: HashMap<u64, Arc<JsonBufferHandle>>,
}

/// Chunk assignment for the seek strategy.
#[derive(Debug, Clone, Copy)]
pub struct SeekChunk {
    pub offset: u64,
    pub len: usize,
    pub buffer_index: u64,
    pub is_last: bool,
}

pub struct JsonFileReader {
    path: PathBuf,
    compression: JsonCompression,
    seekable: bool,
    inner: Mutex<ReaderInner>,
}

impl JsonFileReader {
    pub fn new(path: PathBuf, options: &JsonScanOptions) -> Self {
        let compression = options.compression.resolve(&path);
        let seekable = compression == JsonCompression::None
            && options.format == JsonFormat::NewlineDelimited;
        Self {
            path,
            compression,
            seekable,
            inner: Mutex::new(ReaderInner {
                stream: None,
                format: options.format,
                next_buffer_index: 0,
                next_seek_offset: 0,
                file_size: 0,
                bytes_read: 0,
                records_emitted: 0,
                pending_byte: None,
                finished: false,
                exclusive: false,
                buffers: HashMap::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Probe the file and set up the decoding stream. Idempotent.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.stream.is_some() {
            return Ok(());
        }
        let file_size = std::fs::metadata(&self.path)
            .wrap_err_with(|| format!("cannot stat file '{}'", self.path.display()))?
            .len();
        let file = File::open(&self.path)
            .wrap_err_with(|| format!("cannot open file '{}'", self.path.display()))?;
        inner.file_size = file_size;
        inner.stream = Some(match self.compression {
            JsonCompression::None | JsonCompression::Auto => ReadStream::Plain(file),
            JsonCompression::Gzip => ReadStream::Gzip(flate2::read::MultiGzDecoder::new(file)),
            JsonCompression::Zstd => ReadStream::Zstd(
                zstd::stream::read::Decoder::new(file)
                    .wrap_err_with(|| format!("cannot open zstd file '{}'", self.path.display()))?,
            ),
        });
        Ok(())
    }

    /// Resolve the framing from the first buffer when the format is `auto`.
    pub fn resolve_format(&self, first_buffer: &[u8]) -> JsonFormat {
        let mut inner = self.inner.lock();
        if inner.format == JsonFormat::Auto {
            inner.format = JsonFormat::sniff(first_buffer);
        }
        inner.format
    }

    pub fn format(&self) -> JsonFormat {
        self.inner.lock().format
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Claim this reader for one local state (serial strategy).
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.exclusive {
            false
        } else {
            inner.exclusive = true;
            true
        }
    }

    pub fn release_exclusive(&self) {
        self.inner.lock().exclusive = false;
    }

    pub fn is_exclusive(&self) -> bool {
        self.inner.lock().exclusive
    }

    /// Serial strategy: read the next buffer of up to `capacity` bytes.
    pub fn next_buffer(&self, capacity: usize) -> Result<Option<Arc<JsonBufferHandle>>> {
        self.open()?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.finished {
            return Ok(None);
        }
        let mut data = vec![0u8; capacity];
        let mut len = 0;
        if let Some(byte) = inner.pending_byte.take() {
            data[0] = byte;
            len = 1;
        }
        let mut eof = false;
        let stream = inner.stream.as_mut().expect("reader is open");
        while len < capacity {
            let n = stream
                .read(&mut data[len..])
                .wrap_err("read from json file failed")?;
            if n == 0 {
                eof = true;
                break;
            }
            len += n;
        }
        if !eof {
            let mut lookahead = [0u8; 1];
            let n = stream
                .read(&mut lookahead)
                .wrap_err("read from json file failed")?;
            if n == 0 {
                eof = true;
            }
            if n > 0 {
                inner.pending_byte = Some(lookahead[0]);
            }
        }
        if eof {
            inner.finished = true;
        }
        if len == 0 {
            return Ok(None);
        }
        inner.bytes_read += len as u64;
        let buffer_index = inner.next_buffer_index;
        inner.next_buffer_index += 1;
        let handle = Arc::new(JsonBufferHandle::new(
            buffer_index,
            data,
            len,
            eof,
            Some(inner.records_emitted),
        ));
        inner.buffers.insert(buffer_index, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Seek strategy: claim the next `(offset, length)` chunk.
    pub fn next_chunk(&self, capacity: usize) -> Result<Option<SeekChunk>> {
        self.open()?;
        let mut inner = self.inner.lock();
        if inner.next_seek_offset >= inner.file_size {
            inner.finished = true;
            return Ok(None);
        }
        let offset = inner.next_seek_offset;
        let len = (inner.file_size - offset).min(capacity as u64) as usize;
        inner.next_seek_offset += len as u64;
        let buffer_index = inner.next_buffer_index;
        inner.next_buffer_index += 1;
        inner.bytes_read += len as u64;
        Ok(Some(SeekChunk {
            offset,
            len,
            buffer_index,
            is_last: offset + len as u64 >= inner.file_size,
        }))
    }

    /// Seek strategy: read a claimed chunk through a private file handle,
    /// outside any lock.
    pub fn read_chunk(&self, chunk: SeekChunk) -> Result<Arc<JsonBufferHandle>> {
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("cannot open file '{}'", self.path.display()))?;
        file.seek(SeekFrom::Start(chunk.offset))?;
        let mut data = vec![0u8; chunk.len];
        file.read_exact(&mut data)
            .wrap_err_with(|| format!("cannot read file '{}'", self.path.display()))?;
        let handle = Arc::new(JsonBufferHandle::new(
            chunk.buffer_index,
            data,
            chunk.len,
            chunk.is_last,
            None,
        ));
        self.inner
            .lock()
            .buffers
            .insert(chunk.buffer_index, Arc::clone(&handle));
        Ok(handle)
    }

    /// Complete a record that runs past a seek chunk: append bytes starting
    /// at `from_offset` up to (excluding) the next newline. The record so
    /// far lives in `scratch` and may not grow beyond `max_size`.
    pub fn read_overflow(
        &self,
        from_offset: u64,
        scratch: &mut Vec<u8>,
        max_size: usize,
    ) -> Result<()> {
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("cannot open file '{}'", self.path.display()))?;
        file.seek(SeekFrom::Start(from_offset))?;
        let mut chunk = [0u8; 4096];
        loop {
            let n = file.read(&mut chunk).wrap_err("read from json file failed")?;
            if n == 0 {
                return Ok(());
            }
            match chunk[..n].iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    scratch.extend_from_slice(&chunk[..newline]);
                    ensure_object_size(scratch.len(), max_size)?;
                    return Ok(());
                }
                None => {
                    scratch.extend_from_slice(&chunk[..n]);
                    ensure_object_size(scratch.len(), max_size)?;
                }
            }
        }
    }

    /// Read the single byte at `offset`, for the seek strategy's
    /// chunk-boundary probe.
    pub fn read_byte_at(&self, offset: u64) -> Result<Option<u8>> {
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("cannot open file '{}'", self.path.display()))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut byte = [0u8; 1];
        match file.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Release one consumer of a handle, unregistering it from the reader
    /// when the count reaches zero.
    pub fn release_buffer(&self, handle: &JsonBufferHandle) {
        if handle.release() {
            self.inner.lock().buffers.remove(&handle.buffer_index());
        }
    }

    pub fn live_buffer_count(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    /// Account records scanned from the current buffer so the next buffer's
    /// record base is correct (serial strategy only).
    pub fn add_records(&self, count: u64) {
        self.inner.lock().records_emitted += count;
    }

    pub fn file_size(&self) -> u64 {
        self.inner.lock().file_size
    }

    /// Raw progress counter, capped at the file size for decompressed
    /// streams that inflate past it.
    pub fn bytes_read(&self) -> u64 {
        let inner = self.inner.lock();
        if inner.file_size > 0 {
            inner.bytes_read.min(inner.file_size)
        } else {
            inner.bytes_read
        }
    }
}

pub(crate) fn ensure_object_size(size: usize, max_size: usize) -> Result<()> {
    if size > max_size {
        bail!(
            "json object size {} exceeds maximum object size {}; increase maximum_object_size",
            size,
            max_size
        );
    }
    Ok(())
}
