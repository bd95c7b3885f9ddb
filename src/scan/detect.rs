//! # Schema Detection
//!
//! Samples the first records of the first file to infer per-column logical
//! types and candidate date/timestamp formats.
//!
//! ## Contract
//!
//! - Runs at most once per scan, before any non-sampling worker sees its
//!   first buffer, over the first file only.
//! - Field names union in first-seen order into the column name list.
//! - Each column narrows a running type through the widening lattice; any
//!   unresolvable conflict widens to varchar.
//! - Varchar columns whose every non-null sample matches a retained
//!   date/timestamp candidate are promoted to `date`/`timestamp`; failing
//!   candidates are dropped from the preferred end of the list, never
//!   reordered. User-forced formats replace the candidate list outright, so
//!   no format inference runs for that type.
//! - The average tuple size estimate is total bytes consumed over records
//!   parsed, clamped to at least one.

use crate::scan::dateformat::{refine_candidates, CandidateList, DateFormatMap, FormatTarget};
use crate::scan::dom::{self, JsonValue};
use crate::scan::framing::{self, BoundaryState, ElementBoundary};
use crate::scan::options::{JsonFormat, JsonScanBindData, JsonScanOptions};
use crate::scan::reader::JsonFileReader;
use crate::types::DataType;
use bumpalo::Bump;
use eyre::{bail, Result};
use hashbrown::HashMap;
use tracing::debug;

#[derive(Debug)]
pub struct DetectedSchema {
    pub names: Vec<String>,
    pub types: Vec<DataType>,
    pub avg_tuple_size: usize,
}

struct ColumnDetect {
    name: String,
    ty: DataType,
    /// Every non-null value seen so far was a string.
    only_strings: bool,
    saw_string: bool,
    date_candidates: CandidateList,
    timestamp_candidates: CandidateList,
    all_match_date: bool,
    all_match_timestamp: bool,
}

/// Infer the schema from the leading records of a buffer. `format` must be
/// resolved (not `auto`); for array framing the leading `[` must already be
/// consumed.
pub fn detect_schema(
    buffer: &[u8],
    format: JsonFormat,
    options: &JsonScanOptions,
    map: &mut DateFormatMap,
) -> Result<DetectedSchema> {
    let mut columns: Vec<ColumnDetect> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut arena = Bump::new();

    let mut records = 0usize;
    let mut bytes_consumed = 0usize;
    let mut pos = 0usize;
    while records < options.sample_size {
        let (record, next) = match next_record(buffer, pos, format) {
            Some(found) => found,
            None => break,
        };
        pos = next;

        arena.reset();
        let value = match dom::parse_record(&arena, record, options.maximum_depth) {
            Ok(value) => value,
            Err(err) => {
                if pos >= buffer.len() {
                    // A record cut off by the end of the buffer ends the
                    // sample; the scan proper will reconstruct it.
                    break;
                }
                if options.ignore_errors {
                    continue;
                }
                return Err(err.wrap_err("malformed JSON while sampling for schema detection"));
            }
        };
        bytes_consumed = pos.min(buffer.len());
        let entries = match value {
            JsonValue::Object(entries) => entries,
            other => {
                if options.ignore_errors {
                    continue;
                }
                bail!(
                    "expected a JSON object at the top level, got {}",
                    other.type_name()
                );
            }
        };

        records += 1;
        for (key, value) in entries.iter() {
            let slot = match slots.get(*key) {
                Some(slot) => *slot,
                None => {
                    let slot = columns.len();
                    slots.insert((*key).to_string(), slot);
                    columns.push(ColumnDetect {
                        name: (*key).to_string(),
                        ty: DataType::Null,
                        only_strings: true,
                        saw_string: false,
                        date_candidates: map.candidate_list(FormatTarget::Date),
                        timestamp_candidates: map.candidate_list(FormatTarget::Timestamp),
                        all_match_date: true,
                        all_match_timestamp: true,
                    });
                    slot
                }
            };
            observe(&mut columns[slot], value);
        }
    }

    if records == 0 {
        bail!("could not detect a schema: no records in the sample");
    }

    let mut names = Vec::with_capacity(columns.len());
    let mut types = Vec::with_capacity(columns.len());
    for column in columns {
        let ty = finalize_column(column, map);
        names.push(ty.0);
        types.push(ty.1);
    }
    let avg_tuple_size = (bytes_consumed / records).max(1);
    debug!(
        columns = names.len(),
        records, avg_tuple_size, "json schema detection complete"
    );
    Ok(DetectedSchema {
        names,
        types,
        avg_tuple_size,
    })
}

/// Locate the next record in the buffer. Returns the record bytes and the
/// scan position after it. Incomplete trailing records end the sample.
fn next_record(buffer: &[u8], start: usize, format: JsonFormat) -> Option<(&[u8], usize)> {
    let mut pos = framing::skip_whitespace(buffer, start);
    if pos >= buffer.len() {
        return None;
    }
    match format {
        JsonFormat::NewlineDelimited => {
            let mut state = BoundaryState::default();
            match framing::scan_for_newline(buffer, pos, &mut state) {
                Some(newline) => {
                    let mut end = newline;
                    if end > pos && buffer[end - 1] == b'\r' {
                        end -= 1;
                    }
                    Some((&buffer[pos..end], newline + 1))
                }
                None => Some((&buffer[pos..], buffer.len())),
            }
        }
        JsonFormat::Array => {
            while pos < buffer.len() && (buffer[pos] == b',' || buffer[pos].is_ascii_whitespace())
            {
                pos += 1;
            }
            if pos >= buffer.len() || buffer[pos] == b']' {
                return None;
            }
            let mut state = BoundaryState::default();
            match framing::scan_array_element(buffer, pos, &mut state) {
                ElementBoundary::Delimiter { end, .. } => Some((&buffer[pos..end], end)),
                ElementBoundary::NeedMore => None,
            }
        }
        JsonFormat::Auto => None,
    }
}

fn observe(column: &mut ColumnDetect, value: &JsonValue<'_>) {
    if value.is_null() {
        return;
    }
    if let JsonValue::Str(text) = value {
        column.saw_string = true;
        if column.all_match_date {
            column.all_match_date = refine_candidates(&mut column.date_candidates, text);
        }
        if column.all_match_timestamp {
            column.all_match_timestamp =
                refine_candidates(&mut column.timestamp_candidates, text);
        }
    } else {
        column.only_strings = false;
    }
    let observed = infer_type(value);
    column.ty = column.ty.widen(&observed);
}

/// The logical type of a single DOM value, inferred recursively.
pub fn infer_type(value: &JsonValue<'_>) -> DataType {
    match value {
        JsonValue::Null => DataType::Null,
        JsonValue::Bool(_) => DataType::Bool,
        JsonValue::Int(_) => DataType::BigInt,
        JsonValue::Double(_) => DataType::Double,
        JsonValue::Str(_) => DataType::Varchar,
        JsonValue::Array(items) => {
            let mut element = DataType::Null;
            for item in items.iter() {
                element = element.widen(&infer_type(item));
            }
            DataType::List(Box::new(element))
        }
        JsonValue::Object(entries) => DataType::Struct(
            entries
                .iter()
                .map(|(key, value)| ((*key).to_string(), infer_type(value)))
                .collect(),
        ),
    }
}

fn finalize_column(column: ColumnDetect, map: &mut DateFormatMap) -> (String, DataType) {
    let promotable = column.ty == DataType::Varchar && column.only_strings && column.saw_string;
    if promotable && column.all_match_date && !column.date_candidates.is_empty() {
        map.replace(FormatTarget::Date, column.date_candidates);
        return (column.name, DataType::Date);
    }
    if promotable && column.all_match_timestamp && !column.timestamp_candidates.is_empty() {
        map.replace(FormatTarget::Timestamp, column.timestamp_candidates);
        return (column.name, DataType::Timestamp);
    }
    let ty = match column.ty {
        // A column that was null in every sample scans as varchar.
        DataType::Null => DataType::Varchar,
        ty => ty,
    };
    (column.name, ty)
}

/// Bind-time auto-detection: a sample run over the first file that fills the
/// bind data's names, types, format candidates, and tuple-size estimate.
pub fn bind_time_detection(bind: &mut JsonScanBindData) -> Result<()> {
    let first = match bind.files.first() {
        Some(first) => first.clone(),
        None => bail!("no files to detect a schema from"),
    };
    let reader = JsonFileReader::new(first, &bind.options);
    let handle = match reader.next_buffer(bind.options.buffer_capacity())? {
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
    let mut map = bind.date_format_map.clone();
    let detected = detect_schema(&handle.bytes()[offset..], format, &bind.options, &mut map)?;
    reader.release_buffer(&handle);

    bind.names = detected.names;
    bind.types = detected.types;
    bind.avg_tuple_size = detected.avg_tuple_size;
    bind.date_format_map = map;
    Ok(())
}

/// Advance past leading whitespace and the `[` opening a top-level array.
pub fn skip_over_array_start(bytes: &[u8], pos: usize) -> Result<usize> {
    let pos = framing::skip_whitespace(bytes, pos);
    match bytes.get(pos) {
        Some(b'[') => Ok(pos + 1),
        Some(other) => bail!(
            "expected top-level array to start with '[', got '{}'",
            *other as char
        ),
        None => bail!("expected top-level array to start with '[', got end of input"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> JsonScanOptions {
        JsonScanOptions::default()
    }

    fn detect(input: &str, format: JsonFormat) -> DetectedSchema {
        let opts = options();
        let mut map = opts.initial_date_format_map().unwrap();
        detect_schema(input.as_bytes(), format, &opts, &mut map).unwrap()
    }

    #[test]
    fn detects_scalar_types_in_first_seen_order() {
        let schema = detect(
            "{\"i\": 1, \"s\": \"x\", \"b\": true}\n{\"i\": 2, \"d\": 0.5}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(schema.names, vec!["i", "s", "b", "d"]);
        assert_eq!(
            schema.types,
            vec![
                DataType::BigInt,
                DataType::Varchar,
                DataType::Bool,
                DataType::Double
            ]
        );
    }

    #[test]
    fn conflicting_types_widen_to_varchar() {
        let schema = detect(
            "{\"x\": 1}\n{\"x\": true}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(schema.types, vec![DataType::Varchar]);
    }

    #[test]
    fn int_and_double_widen_to_double() {
        let schema = detect(
            "{\"x\": 1}\n{\"x\": 1.5}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(schema.types, vec![DataType::Double]);
    }

    #[test]
    fn date_column_is_promoted() {
        let mut input = String::new();
        for day in 1..=28 {
            input.push_str(&format!("{{\"d\": \"2024-01-{:02}\"}}\n", day));
        }
        let opts = options();
        let mut map = opts.initial_date_format_map().unwrap();
        let schema =
            detect_schema(input.as_bytes(), JsonFormat::NewlineDelimited, &opts, &mut map)
                .unwrap();
        assert_eq!(schema.types, vec![DataType::Date]);
        assert_eq!(
            map.preferred(FormatTarget::Date).unwrap().specifier(),
            "%Y-%m-%d"
        );
    }

    #[test]
    fn timestamp_column_is_promoted() {
        let schema = detect(
            "{\"t\": \"2024-01-01 10:30:00\"}\n{\"t\": \"2024-01-02 11:00:00\"}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(schema.types, vec![DataType::Timestamp]);
    }

    #[test]
    fn mixed_strings_stay_varchar() {
        let schema = detect(
            "{\"d\": \"2024-01-01\"}\n{\"d\": \"not a date\"}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(schema.types, vec![DataType::Varchar]);
    }

    #[test]
    fn nested_values_detect_as_list_and_struct() {
        let schema = detect(
            "{\"xs\": [1, 2], \"o\": {\"a\": 1, \"b\": \"x\"}}\n{\"xs\": [3.5], \"o\": {\"a\": 2}}\n",
            JsonFormat::NewlineDelimited,
        );
        assert_eq!(
            schema.types[0],
            DataType::List(Box::new(DataType::Double))
        );
        assert_eq!(
            schema.types[1],
            DataType::Struct(vec![
                ("a".to_string(), DataType::BigInt),
                ("b".to_string(), DataType::Varchar),
            ])
        );
    }

    #[test]
    fn array_framing_samples_elements() {
        let input = "{\"x\": 1}, {\"x\": 2}]";
        let schema = detect(input, JsonFormat::Array);
        assert_eq!(schema.names, vec!["x"]);
        assert_eq!(schema.types, vec![DataType::BigInt]);
    }

    #[test]
    fn sample_size_bounds_the_sample() {
        let mut input = String::new();
        for i in 0..100 {
            input.push_str(&format!("{{\"x\": {}}}\n", i));
        }
        // The conflicting record appears after the sample window.
        input.push_str("{\"x\": \"conflict\"}\n");
        let opts = JsonScanOptions {
            sample_size: 50,
            ..Default::default()
        };
        let mut map = opts.initial_date_format_map().unwrap();
        let schema =
            detect_schema(input.as_bytes(), JsonFormat::NewlineDelimited, &opts, &mut map)
                .unwrap();
        assert_eq!(schema.types, vec![DataType::BigInt]);
        assert!(schema.avg_tuple_size >= 1);
    }

    #[test]
    fn empty_sample_errors() {
        let opts = options();
        let mut map = opts.initial_date_format_map().unwrap();
        let err = detect_schema(b"   \n", JsonFormat::NewlineDelimited, &opts, &mut map)
            .unwrap_err();
        assert!(err.to_string().contains("could not detect a schema"));
    }
}
