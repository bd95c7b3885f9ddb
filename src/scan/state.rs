//! # Scan States
//!
//! The shared coordinator and per-worker state of the parallel JSON scan.
//!
//! ## Division of Labor
//!
//! - [`JsonGlobalScanState`]: owns the reader pool, assigns monotonically
//!   increasing batch indices, runs schema detection at most once before any
//!   non-sampling worker sees its first buffer, and tracks the active worker
//!   count. The engine does not spawn threads; workers drive their local
//!   state against the shared global state.
//! - [`JsonLocalScanState`]: pulls buffers, locates record boundaries,
//!   parses records into arena-backed DOM handles, and reconstructs records
//!   that straddle buffer boundaries.
//!
//! ## Ordering
//!
//! Every batch carries the `batch_index` assigned when its buffer was handed
//! out. Downstream consumers interleave batches by ascending index; within a
//! batch the record order matches input order.
//!
//! ## Split Records
//!
//! A record can straddle two consecutive buffers of one file. The worker
//! that finds the unterminated tail keeps the buffer handle alive, claims
//! the file's next buffer (the reader stays exclusively assigned to it), and
//! splices tail and head in its reconstruct scratch buffer. The worker
//! holding the later batch index therefore materializes the record exactly
//! once. In seek mode the leading partial of a chunk is discarded instead
//! (it belongs to the predecessor chunk) and a trailing partial is completed
//! with a bounded positioned read past the chunk end.

use crate::scan::dateformat::DateFormatMap;
use crate::scan::detect::{self, skip_over_array_start};
use crate::scan::dom::{self, JsonValue};
use crate::scan::framing::{self, BoundaryState, ElementBoundary};
use crate::scan::options::{JsonFormat, JsonScanBindData, JsonScanOptions};
use crate::scan::reader::{ensure_object_size, JsonBufferHandle, JsonFileReader};
use crate::scan::VECTOR_SIZE;
use crate::types::DataType;
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, Result};
use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// The column layout a scan produces, fixed once detection has run.
#[derive(Debug, Clone)]
pub struct ScanColumns {
    pub names: Vec<String>,
    pub types: Vec<DataType>,
    pub date_format_map: DateFormatMap,
    /// Projected column subset (indices into `names`); `None` scans all.
    pub projection: Option<Vec<usize>>,
}

impl ScanColumns {
    /// Output column indices in projection order.
    pub fn output_columns(&self) -> Vec<usize> {
        match &self.projection {
            Some(projection) => projection.clone(),
            None => (0..self.names.len()).collect(),
        }
    }
}

struct GlobalScanProgress {
    readers: Vec<Arc<JsonFileReader>>,
    file_index: usize,
    detection_done: bool,
    columns: Option<Arc<ScanColumns>>,
    active_threads: usize,
}

pub struct JsonGlobalScanState {
    bind: Arc<JsonScanBindData>,
    buffer_capacity: usize,
    projection: Option<Vec<usize>>,
    file_sizes: Vec<u64>,
    batch_index: AtomicU64,
    progress: Mutex<GlobalScanProgress>,
}

impl JsonGlobalScanState {
    pub fn new(bind: Arc<JsonScanBindData>, projection: Option<Vec<usize>>) -> Self {
        let readers: Vec<Arc<JsonFileReader>> = bind
            .files
            .iter()
            .map(|file| Arc::new(JsonFileReader::new(file.clone(), &bind.options)))
            .collect();
        let file_sizes: Vec<u64> = bind
            .files
            .iter()
            .map(|file| std::fs::metadata(file).map(|m| m.len()).unwrap_or(0))
            .collect();
        let columns = if bind.names.is_empty() {
            None
        } else {
            Some(Arc::new(ScanColumns {
                names: bind.names.clone(),
                types: bind.types.clone(),
                date_format_map: bind.date_format_map.clone(),
                projection: projection.clone(),
            }))
        };
        let detection_done = columns.is_some();
        Self {
            buffer_capacity: bind.options.buffer_capacity(),
            projection,
            file_sizes,
            batch_index: AtomicU64::new(0),
            progress: Mutex::new(GlobalScanProgress {
                readers,
                file_index: 0,
                detection_done,
                columns,
                active_threads: 0,
            }),
            bind,
        }
    }

    pub fn bind_data(&self) -> &Arc<JsonScanBindData> {
        &self.bind
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn columns(&self) -> Option<Arc<ScanColumns>> {
        self.progress.lock().columns.clone()
    }

    pub fn active_threads(&self) -> usize {
        self.progress.lock().active_threads
    }

    /// The maximum useful worker count: one per file, plus the chunk split
    /// factor for seekable newline-delimited files.
    pub fn max_threads(&self) -> usize {
        let progress = self.progress.lock();
        progress
            .readers
            .iter()
            .zip(self.file_sizes.iter())
            .map(|(reader, size)| {
                if reader.is_seekable() {
                    ((*size as usize).div_ceil(self.buffer_capacity)).max(1)
                } else {
                    1
                }
            })
            .sum()
    }

    /// Fraction of input bytes consumed so far.
    pub fn progress(&self) -> f64 {
        let total: u64 = self.file_sizes.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let read: u64 = {
            let progress = self.progress.lock();
            progress.readers.iter().map(|r| r.bytes_read()).sum()
        };
        (read as f64 / total as f64).min(1.0)
    }
}

/// A record's source text: a bytewise view over externally owned bytes,
/// valid while the producing batch is alive.
#[derive(Clone, Copy)]
pub struct JsonSlice<'a> {
    bytes: &'a [u8],
}

impl<'a> JsonSlice<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for JsonSlice<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for JsonSlice<'_> {}

impl Hash for JsonSlice<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl std::fmt::Debug for JsonSlice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonSlice({:?})", String::from_utf8_lossy(self.bytes))
    }
}

/// Up to `VECTOR_SIZE` records produced by one `read_next` call. `units[i]`
/// is the source text whose parse is `values[i]`.
pub struct JsonRecordBatch<'a> {
    pub batch_index: u64,
    pub units: &'a [JsonSlice<'a>],
    pub values: &'a [&'a JsonValue<'a>],
    /// File the batch came from, for error locators.
    pub file: String,
    /// Record number preceding this batch within its file, when known.
    pub record_base: Option<u64>,
}

impl JsonRecordBatch<'_> {
    pub fn scan_count(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordSource {
    Buffer,
    Scratch,
}

#[derive(Debug, Clone, Copy)]
struct RecordRange {
    source: RecordSource,
    start: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct TailInfo {
    start: usize,
    state: BoundaryState,
}

pub struct JsonLocalScanState {
    options: JsonScanOptions,
    arena: Bump,
    columns: Option<Arc<ScanColumns>>,
    current_reader: Option<Arc<JsonFileReader>>,
    current_handle: Option<Arc<JsonBufferHandle>>,
    /// Buffer holding the unterminated tail of the previous buffer, kept
    /// alive until the record is reconstructed.
    prev: Option<(Arc<JsonBufferHandle>, TailInfo)>,
    pending_tail: Option<TailInfo>,
    reconstruct: Vec<u8>,
    ranges: Vec<RecordRange>,
    resolved_format: JsonFormat,
    seek_mode: bool,
    chunk_end_offset: u64,
    file_done: bool,
    buffer_offset: usize,
    batch_index: u64,
    record_base: Option<u64>,
    records_in_buffer: u64,
    batch_record_base: Option<u64>,
    total_read_size: u64,
    total_tuple_count: u64,
}

impl JsonLocalScanState {
    pub fn new(gstate: &JsonGlobalScanState) -> Self {
        Self {
            options: gstate.bind.options.clone(),
            arena: Bump::new(),
            columns: gstate.columns(),
            current_reader: None,
            current_handle: None,
            prev: None,
            pending_tail: None,
            reconstruct: Vec::new(),
            ranges: Vec::new(),
            resolved_format: JsonFormat::Auto,
            seek_mode: false,
            chunk_end_offset: 0,
            file_done: false,
            buffer_offset: 0,
            batch_index: 0,
            record_base: None,
            records_in_buffer: 0,
            batch_record_base: None,
            total_read_size: 0,
            total_tuple_count: 0,
        }
    }

    /// Batch index of the most recent batch, for order-preserving
    /// downstream reassembly.
    pub fn batch_index(&self) -> u64 {
        self.batch_index
    }

    pub fn columns(&self) -> Option<&Arc<ScanColumns>> {
        self.columns.as_ref()
    }

    pub fn total_read_size(&self) -> u64 {
        self.total_read_size
    }

    pub fn total_tuple_count(&self) -> u64 {
        self.total_tuple_count
    }

    pub fn file_name(&self) -> String {
        self.current_reader
            .as_ref()
            .map(|r| r.file_name())
            .unwrap_or_default()
    }

    /// Record number of the batch's first record within its file (1-based
    /// numbering starts from this + 1), when the read strategy tracks it.
    pub fn batch_record_base(&self) -> Option<u64> {
        self.batch_record_base
    }

    /// Produce the next record batch, or `None` when no work remains for
    /// this worker. Other workers may still have work.
    pub fn read_next<'a>(
        &'a mut self,
        gstate: &JsonGlobalScanState,
    ) -> Result<Option<JsonRecordBatch<'a>>> {
        self.arena.reset();
        self.ranges.clear();
        self.batch_record_base = self.record_base.map(|b| b + self.records_in_buffer);
        loop {
            let need_buffer = match &self.current_handle {
                Some(handle) => self.buffer_offset >= handle.bytes().len(),
                None => true,
            };
            if need_buffer {
                // Buffer installation resets the locator base; a
                // reconstructed first record keeps the base of its buffer.
                if !self.read_next_buffer(gstate)? {
                    if self.ranges.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
            }
            self.parse_chunk()?;
            if !self.ranges.is_empty() {
                break;
            }
        }

        self.total_tuple_count += self.ranges.len() as u64;
        self.total_read_size += self.ranges.iter().map(|r| r.len as u64).sum::<u64>();

        let batch_index = self.batch_index;
        let max_depth = self.options.maximum_depth;
        let ignore_errors = self.options.ignore_errors;
        let locator_base = self.batch_record_base;
        let file = self.file_name();

        let this: &Self = &*self;
        let buffer_bytes: &[u8] = this
            .current_handle
            .as_ref()
            .map(|h| h.bytes())
            .unwrap_or(&[]);
        let mut units = BumpVec::with_capacity_in(this.ranges.len(), &this.arena);
        let mut values = BumpVec::with_capacity_in(this.ranges.len(), &this.arena);
        for (idx, range) in this.ranges.iter().enumerate() {
            let bytes = match range.source {
                RecordSource::Buffer => &buffer_bytes[range.start..range.start + range.len],
                RecordSource::Scratch => &this.reconstruct[range.start..range.start + range.len],
            };
            match dom::parse_record(&this.arena, bytes, max_depth) {
                Ok(value) => {
                    units.push(JsonSlice::new(bytes));
                    values.push(value);
                }
                Err(err) => {
                    if ignore_errors {
                        continue;
                    }
                    return Err(match locator_base {
                        Some(base) => err.wrap_err(format!(
                            "malformed JSON in file '{}' at record/line {}",
                            file,
                            base + idx as u64 + 1
                        )),
                        None => err.wrap_err(format!(
                            "malformed JSON in file '{}' (record {} of batch {})",
                            file,
                            idx + 1,
                            batch_index
                        )),
                    });
                }
            }
        }
        Ok(Some(JsonRecordBatch {
            batch_index,
            units: units.into_bump_slice(),
            values: values.into_bump_slice(),
            file,
            record_base: locator_base,
        }))
    }

    /// Move to the next unit of work: release or park the current buffer,
    /// claim the next one, and reconstruct a split record if one is pending.
    fn read_next_buffer(&mut self, gstate: &JsonGlobalScanState) -> Result<bool> {
        let pending = self.pending_tail.take();
        if let Some(old) = self.current_handle.take() {
            match pending {
                Some(tail) => self.prev = Some((old, tail)),
                None => self.release_handle(&old),
            }
        }
        if !self.acquire_buffer(gstate)? {
            if let Some((handle, _)) = self.prev.take() {
                self.release_handle(&handle);
                bail!(
                    "unexpected end of file in '{}': unterminated record",
                    self.file_name()
                );
            }
            return Ok(false);
        }
        if let Some((prev_handle, tail)) = self.prev.take() {
            let result = self.reconstruct_first_object(&prev_handle, tail);
            self.release_handle(&prev_handle);
            result?;
        }
        Ok(true)
    }

    /// Claim the next buffer, preferring the currently assigned reader, and
    /// otherwise selecting the next file under the global lock. Runs schema
    /// detection on the very first buffer of the first file when needed.
    fn acquire_buffer(&mut self, gstate: &JsonGlobalScanState) -> Result<bool> {
        loop {
            if let Some(reader) = self.current_reader.clone() {
                if self.seek_mode {
                    if let Some(chunk) = reader.next_chunk(gstate.buffer_capacity())? {
                        let handle = reader.read_chunk(chunk)?;
                        self.install_seek_chunk(handle, chunk.offset, gstate)?;
                        return Ok(true);
                    }
                } else if let Some(handle) = reader.next_buffer(gstate.buffer_capacity())? {
                    self.install_buffer(handle, gstate)?;
                    return Ok(true);
                }
                // File exhausted: hand the reader back.
                if !self.seek_mode {
                    reader.release_exclusive();
                }
                self.current_reader = None;
                self.file_done = false;
                gstate.progress.lock().active_threads -= 1;
            }

            let picked = {
                let mut progress = gstate.progress.lock();
                if !progress.detection_done {
                    return self.detect_and_claim(gstate, &mut progress);
                }
                if self.columns.is_none() {
                    self.columns = progress.columns.clone();
                }
                let mut picked = None;
                while progress.file_index < progress.readers.len() {
                    let reader = progress.readers[progress.file_index].clone();
                    if reader.is_finished() {
                        progress.file_index += 1;
                        continue;
                    }
                    if reader.is_seekable() && !reader.is_exclusive() {
                        // Seekable files are shared: many workers take chunks.
                        picked = Some((reader, true));
                        break;
                    }
                    if !reader.is_seekable() && reader.try_acquire() {
                        picked = Some((reader, false));
                        break;
                    }
                    // Serially held by another worker; move on.
                    progress.file_index += 1;
                }
                if picked.is_some() {
                    progress.active_threads += 1;
                }
                picked
            };
            match picked {
                Some((reader, seek)) => {
                    trace!(file = %reader.file_name(), seek, "json scan claims reader");
                    self.current_reader = Some(reader);
                    self.seek_mode = seek;
                }
                None => return Ok(false),
            }
        }
    }

    /// Run format/schema detection under the global lock, then keep the
    /// detection buffer as this worker's first unit of work.
    fn detect_and_claim(
        &mut self,
        gstate: &JsonGlobalScanState,
        progress: &mut GlobalScanProgress,
    ) -> Result<bool> {
        progress.detection_done = true;
        let reader = progress.readers[0].clone();
        let handle = match reader.next_buffer(gstate.buffer_capacity())? {
            Some(handle) => handle,
            None => bail!(
                "could not detect a schema: file '{}' is empty",
                reader.file_name()
            ),
        };
        let format = reader.resolve_format(handle.bytes());
        let mut offset = 0;
        if format == JsonFormat::Array {
            offset = skip_over_array_start(handle.bytes(), 0)?;
        }
        let mut map = gstate.bind.date_format_map.clone();
        let detected = detect::detect_schema(
            &handle.bytes()[offset..],
            format,
            &gstate.bind.options,
            &mut map,
        )?;
        let columns = Arc::new(ScanColumns {
            names: detected.names,
            types: detected.types,
            date_format_map: map,
            projection: gstate.projection.clone(),
        });
        progress.columns = Some(Arc::clone(&columns));
        self.columns = Some(columns);

        reader.try_acquire();
        progress.active_threads += 1;
        self.current_reader = Some(reader);
        self.seek_mode = false;
        self.install_buffer(handle, gstate)?;
        Ok(true)
    }

    fn install_buffer(
        &mut self,
        handle: Arc<JsonBufferHandle>,
        gstate: &JsonGlobalScanState,
    ) -> Result<()> {
        let reader = self.current_reader.clone().expect("reader assigned");
        self.batch_index = gstate.batch_index.fetch_add(1, Ordering::Relaxed);
        let mut offset = 0;
        if handle.buffer_index() == 0 {
            let format = reader.resolve_format(handle.bytes());
            self.resolved_format = format;
            self.file_done = false;
            if format == JsonFormat::Array {
                offset = skip_over_array_start(handle.bytes(), 0)?;
            }
        } else if self.resolved_format == JsonFormat::Auto {
            self.resolved_format = reader.format();
        }
        self.record_base = handle.record_base();
        self.batch_record_base = handle.record_base();
        self.records_in_buffer = 0;
        self.buffer_offset = offset;
        self.current_handle = Some(handle);
        Ok(())
    }

    fn install_seek_chunk(
        &mut self,
        handle: Arc<JsonBufferHandle>,
        chunk_offset: u64,
        gstate: &JsonGlobalScanState,
    ) -> Result<()> {
        let reader = self.current_reader.clone().expect("reader assigned");
        self.batch_index = gstate.batch_index.fetch_add(1, Ordering::Relaxed);
        self.resolved_format = JsonFormat::NewlineDelimited;
        self.file_done = false;
        self.record_base = None;
        self.batch_record_base = None;
        self.records_in_buffer = 0;
        self.chunk_end_offset = chunk_offset + handle.bytes().len() as u64;
        let bytes = handle.bytes();
        // A leading partial record belongs to the predecessor chunk. The
        // chunk starts mid-record exactly when the preceding byte is not a
        // newline.
        self.buffer_offset = if chunk_offset > 0
            && reader.read_byte_at(chunk_offset - 1)? != Some(b'\n')
        {
            match bytes.iter().position(|&b| b == b'\n') {
                Some(newline) => newline + 1,
                None => bytes.len(),
            }
        } else {
            0
        };
        self.current_handle = Some(handle);
        Ok(())
    }

    /// Splice the unterminated tail of the previous buffer with the head of
    /// the current one. The scratch buffer may not grow beyond the maximum
    /// object size.
    fn reconstruct_first_object(
        &mut self,
        prev_handle: &Arc<JsonBufferHandle>,
        tail: TailInfo,
    ) -> Result<()> {
        let max = self.options.maximum_object_size;
        self.reconstruct.clear();
        let tail_bytes = &prev_handle.bytes()[tail.start..];
        ensure_object_size(tail_bytes.len(), max)?;
        self.reconstruct.extend_from_slice(tail_bytes);

        let handle = self.current_handle.clone().expect("buffer installed");
        let bytes = handle.bytes();
        let off = self.buffer_offset;
        let mut state = tail.state;
        let (head_end, consumed, complete) = match self.resolved_format {
            JsonFormat::NewlineDelimited => {
                match framing::scan_for_newline(bytes, off, &mut state) {
                    Some(newline) => {
                        let mut end = newline;
                        if end > off && bytes[end - 1] == b'\r' {
                            end -= 1;
                        }
                        (end, newline + 1, true)
                    }
                    None => (bytes.len(), bytes.len(), handle.is_last()),
                }
            }
            JsonFormat::Array => match framing::scan_array_element(bytes, off, &mut state) {
                ElementBoundary::Delimiter { end, .. } => (end, end, true),
                ElementBoundary::NeedMore => (bytes.len(), bytes.len(), false),
            },
            JsonFormat::Auto => unreachable!("format resolved at buffer installation"),
        };
        ensure_object_size(self.reconstruct.len() + (head_end - off), max)?;
        self.reconstruct.extend_from_slice(&bytes[off..head_end]);
        self.buffer_offset = consumed;
        if !complete {
            if handle.is_last() && self.options.ignore_errors {
                // EOF mid-record; the unterminated record is dropped.
                return Ok(());
            }
            bail!(
                "unexpected end of file in '{}': unterminated record",
                self.file_name()
            );
        }
        self.ranges.push(RecordRange {
            source: RecordSource::Scratch,
            start: 0,
            len: self.reconstruct.len(),
        });
        self.records_in_buffer += 1;
        if let Some(reader) = &self.current_reader {
            reader.add_records(1);
        }
        Ok(())
    }

    /// Locate record boundaries in the current buffer, filling `ranges` up
    /// to the vector size.
    fn parse_chunk(&mut self) -> Result<()> {
        let handle = match &self.current_handle {
            Some(handle) => Arc::clone(handle),
            None => return Ok(()),
        };
        let bytes = handle.bytes();
        let is_last = handle.is_last();
        let max = self.options.maximum_object_size;
        let mut off = self.buffer_offset;
        let mut added = 0u64;

        while self.ranges.len() < VECTOR_SIZE && off < bytes.len() {
            match self.resolved_format {
                JsonFormat::NewlineDelimited => {
                    off = framing::skip_whitespace(bytes, off);
                    if off >= bytes.len() {
                        break;
                    }
                    let start = off;
                    let mut state = BoundaryState::default();
                    match framing::scan_for_newline(bytes, off, &mut state) {
                        Some(newline) => {
                            let mut end = newline;
                            if end > start && bytes[end - 1] == b'\r' {
                                end -= 1;
                            }
                            ensure_object_size(end - start, max)?;
                            self.ranges.push(RecordRange {
                                source: RecordSource::Buffer,
                                start,
                                len: end - start,
                            });
                            added += 1;
                            off = newline + 1;
                        }
                        None => {
                            ensure_object_size(bytes.len() - start, max)?;
                            if is_last {
                                // A trailing record without a newline is
                                // valid on the terminal buffer.
                                self.ranges.push(RecordRange {
                                    source: RecordSource::Buffer,
                                    start,
                                    len: bytes.len() - start,
                                });
                                added += 1;
                            } else if self.seek_mode {
                                self.complete_seek_tail(start, bytes, max)?;
                                added += 1;
                            } else {
                                self.pending_tail = Some(TailInfo { start, state });
                            }
                            off = bytes.len();
                        }
                    }
                }
                JsonFormat::Array => {
                    if self.file_done {
                        if !framing::is_all_whitespace(&bytes[off..]) {
                            bail!(
                                "trailing characters after the top-level array in file '{}'",
                                self.file_name()
                            );
                        }
                        off = bytes.len();
                        break;
                    }
                    off = framing::skip_whitespace(bytes, off);
                    if off >= bytes.len() {
                        break;
                    }
                    match bytes[off] {
                        b',' => {
                            off += 1;
                            continue;
                        }
                        b']' => {
                            self.file_done = true;
                            off += 1;
                            continue;
                        }
                        _ => {}
                    }
                    let start = off;
                    let mut state = BoundaryState::default();
                    match framing::scan_array_element(bytes, off, &mut state) {
                        ElementBoundary::Delimiter { end, .. } => {
                            ensure_object_size(end - start, max)?;
                            self.ranges.push(RecordRange {
                                source: RecordSource::Buffer,
                                start,
                                len: end - start,
                            });
                            added += 1;
                            off = end;
                        }
                        ElementBoundary::NeedMore => {
                            ensure_object_size(bytes.len() - start, max)?;
                            if is_last {
                                if !self.options.ignore_errors {
                                    bail!(
                                        "unexpected end of file in '{}': unterminated record",
                                        self.file_name()
                                    );
                                }
                            } else {
                                self.pending_tail = Some(TailInfo { start, state });
                            }
                            off = bytes.len();
                        }
                    }
                }
                JsonFormat::Auto => unreachable!("format resolved at buffer installation"),
            }
        }

        self.buffer_offset = off;
        self.records_in_buffer += added;
        if added > 0 && !self.seek_mode {
            if let Some(reader) = &self.current_reader {
                reader.add_records(added);
            }
        }
        Ok(())
    }

    /// Seek strategy: the record starting at `start` runs past the chunk.
    /// Complete it with a bounded positioned read after the chunk end.
    fn complete_seek_tail(&mut self, start: usize, bytes: &[u8], max: usize) -> Result<()> {
        let reader = self.current_reader.clone().expect("reader assigned");
        self.reconstruct.clear();
        self.reconstruct.extend_from_slice(&bytes[start..]);
        reader.read_overflow(self.chunk_end_offset, &mut self.reconstruct, max)?;
        if self.reconstruct.last() == Some(&b'\r') {
            self.reconstruct.pop();
        }
        self.ranges.push(RecordRange {
            source: RecordSource::Scratch,
            start: 0,
            len: self.reconstruct.len(),
        });
        Ok(())
    }

    fn release_handle(&self, handle: &Arc<JsonBufferHandle>) {
        if let Some(reader) = &self.current_reader {
            reader.release_buffer(handle);
        }
    }
}
