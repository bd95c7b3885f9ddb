//! # Parallel JSON Table Scan
//!
//! Ingests newline-delimited or array-framed JSON from one or more files and
//! produces column-oriented record batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ JsonScanBindData (immutable: files, options, cols) │
//! ├────────────────────────────────────────────────────┤
//! │ JsonGlobalScanState                                │
//! │   reader pool · batch indices · schema detection   │
//! ├──────────────┬──────────────┬──────────────────────┤
//! │ LocalState   │ LocalState   │ ... one per worker   │
//! │ buffers,     │ buffers,     │                      │
//! │ DOM arena,   │ DOM arena,   │                      │
//! │ reconstruct  │ reconstruct  │                      │
//! ├──────────────┴──────────────┴──────────────────────┤
//! │ Transform: DOM handles -> typed column vectors     │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! Workers call [`JsonLocalScanState::read_next`] until it returns `None`;
//! every batch carries a globally unique, strictly increasing batch index
//! that downstream consumers use to restore input order.
//!
//! ## Modules
//!
//! - `options`: table-function parameters and serializable bind data
//! - `glob`: filename pattern expansion
//! - `reader`: per-file readers, buffer handles, gzip/zstd decoding
//! - `framing`: newline/array record boundary scanning
//! - `dom`: arena-backed JSON document model
//! - `dateformat`: strftime-style candidate formats
//! - `detect`: schema detection from a bounded sample
//! - `state`: global coordinator and per-worker scan state
//! - `transform`: DOM handles to typed column vectors

pub mod dateformat;
pub mod detect;
pub mod dom;
pub mod framing;
pub mod glob;
pub mod options;
pub mod reader;
pub mod state;
pub mod transform;

pub use options::{
    JsonBindInput, JsonCompression, JsonFormat, JsonScanBindData, JsonScanOptions, JsonScanType,
};
pub use reader::{JsonBufferHandle, JsonFileReader};
pub use state::{JsonGlobalScanState, JsonLocalScanState, JsonRecordBatch, JsonSlice, ScanColumns};
pub use transform::{ColumnVector, DataChunk};

use eyre::{bail, Result};
use std::sync::Arc;

/// Records per batch.
pub const VECTOR_SIZE: usize = 2048;

/// Read and transform the next batch for one worker.
pub fn scan_next_chunk(
    local: &mut JsonLocalScanState,
    gstate: &JsonGlobalScanState,
) -> Result<Option<DataChunk>> {
    let scan_type = gstate.bind_data().scan_type;
    let ignore_errors = gstate.bind_data().options.ignore_errors;
    let batch = match local.read_next(gstate)? {
        Some(batch) => batch,
        None => return Ok(None),
    };
    let columns = match gstate.columns() {
        Some(columns) => columns,
        None => bail!("json scan produced a batch before schema detection"),
    };
    let chunk = transform::transform_batch(
        &batch,
        &columns,
        scan_type,
        ignore_errors,
        &batch.file,
        batch.record_base,
    )?;
    Ok(Some(chunk))
}

/// Single-worker convenience: scan everything and return the chunks in
/// batch-index order.
pub fn scan_to_chunks(bind: &Arc<JsonScanBindData>) -> Result<Vec<DataChunk>> {
    let gstate = JsonGlobalScanState::new(Arc::clone(bind), None);
    let mut local = JsonLocalScanState::new(&gstate);
    let mut chunks = Vec::new();
    while let Some(chunk) = scan_next_chunk(&mut local, &gstate)? {
        chunks.push(chunk);
    }
    chunks.sort_by_key(|chunk| chunk.batch_index);
    Ok(chunks)
}
