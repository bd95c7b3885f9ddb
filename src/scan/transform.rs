//! # JSON to Column Transform
//!
//! Converts a record batch of DOM handles into typed column vectors,
//! honoring the detected date/timestamp format candidates and the
//! `ignore_errors` policy: a value that does not fit its declared column
//! type either fails the scan with a file and record locator, or nulls the
//! offending tuple when errors are ignored.

use crate::scan::dateformat::{DateFormatMap, FormatTarget};
use crate::scan::dom::JsonValue;
use crate::scan::options::JsonScanType;
use crate::scan::state::{JsonRecordBatch, ScanColumns};
use crate::types::DataType;
use eyre::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVector {
    Bool {
        validity: Vec<bool>,
        data: Vec<bool>,
    },
    BigInt {
        validity: Vec<bool>,
        data: Vec<i64>,
    },
    Double {
        validity: Vec<bool>,
        data: Vec<f64>,
    },
    Varchar {
        validity: Vec<bool>,
        data: Vec<String>,
    },
    Date {
        validity: Vec<bool>,
        data: Vec<i32>,
    },
    Timestamp {
        validity: Vec<bool>,
        data: Vec<i64>,
    },
    List {
        validity: Vec<bool>,
        /// Exclusive end offset of each row's elements in `child`.
        offsets: Vec<usize>,
        child: Box<ColumnVector>,
    },
    Struct {
        validity: Vec<bool>,
        fields: Vec<(String, ColumnVector)>,
    },
}

impl ColumnVector {
    pub fn new(ty: &DataType) -> Result<Self> {
        Ok(match ty {
            DataType::Bool => ColumnVector::Bool {
                validity: Vec::new(),
                data: Vec::new(),
            },
            DataType::BigInt => ColumnVector::BigInt {
                validity: Vec::new(),
                data: Vec::new(),
            },
            DataType::Double => ColumnVector::Double {
                validity: Vec::new(),
                data: Vec::new(),
            },
            // A column that was null in every sample still scans: as text.
            DataType::Null | DataType::Varchar => ColumnVector::Varchar {
                validity: Vec::new(),
                data: Vec::new(),
            },
            DataType::Date => ColumnVector::Date {
                validity: Vec::new(),
                data: Vec::new(),
            },
            DataType::Timestamp => ColumnVector::Timestamp {
                validity: Vec::new(),
                data: Vec::new(),
            },
            DataType::List(element) => ColumnVector::List {
                validity: Vec::new(),
                offsets: Vec::new(),
                child: Box::new(ColumnVector::new(element)?),
            },
            DataType::Struct(members) => ColumnVector::Struct {
                validity: Vec::new(),
                fields: members
                    .iter()
                    .map(|(name, ty)| Ok((name.clone(), ColumnVector::new(ty)?)))
                    .collect::<Result<Vec<_>>>()?,
            },
            DataType::Map(_, _) | DataType::Union(_) => {
                bail!("the JSON transform does not support {} columns", ty)
            }
        })
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnVector::Bool { validity, .. }
            | ColumnVector::BigInt { validity, .. }
            | ColumnVector::Double { validity, .. }
            | ColumnVector::Varchar { validity, .. }
            | ColumnVector::Date { validity, .. }
            | ColumnVector::Timestamp { validity, .. }
            | ColumnVector::List { validity, .. }
            | ColumnVector::Struct { validity, .. } => validity.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validity(&self) -> &[bool] {
        match self {
            ColumnVector::Bool { validity, .. }
            | ColumnVector::BigInt { validity, .. }
            | ColumnVector::Double { validity, .. }
            | ColumnVector::Varchar { validity, .. }
            | ColumnVector::Date { validity, .. }
            | ColumnVector::Timestamp { validity, .. }
            | ColumnVector::List { validity, .. }
            | ColumnVector::Struct { validity, .. } => validity,
        }
    }

    pub fn push_null(&mut self) {
        match self {
            ColumnVector::Bool { validity, data } => {
                validity.push(false);
                data.push(false);
            }
            ColumnVector::BigInt { validity, data } => {
                validity.push(false);
                data.push(0);
            }
            ColumnVector::Double { validity, data } => {
                validity.push(false);
                data.push(0.0);
            }
            ColumnVector::Varchar { validity, data } => {
                validity.push(false);
                data.push(String::new());
            }
            ColumnVector::Date { validity, data } => {
                validity.push(false);
                data.push(0);
            }
            ColumnVector::Timestamp { validity, data } => {
                validity.push(false);
                data.push(0);
            }
            ColumnVector::List {
                validity, offsets, ..
            } => {
                validity.push(false);
                offsets.push(offsets.last().copied().unwrap_or(0));
            }
            ColumnVector::Struct { validity, fields } => {
                validity.push(false);
                for (_, field) in fields.iter_mut() {
                    field.push_null();
                }
            }
        }
    }

    /// Roll the vector back to `n` rows. Used to null out a tuple whose
    /// conversion failed part-way.
    pub fn truncate(&mut self, n: usize) {
        match self {
            ColumnVector::Bool { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::BigInt { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::Double { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::Varchar { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::Date { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::Timestamp { validity, data } => {
                validity.truncate(n);
                data.truncate(n);
            }
            ColumnVector::List {
                validity,
                offsets,
                child,
            } => {
                validity.truncate(n);
                offsets.truncate(n);
                child.truncate(offsets.last().copied().unwrap_or(0));
            }
            ColumnVector::Struct { validity, fields } => {
                validity.truncate(n);
                for (_, field) in fields.iter_mut() {
                    field.truncate(n);
                }
            }
        }
    }
}

/// One transformed record batch: column vectors plus the batch index used
/// for order-preserving reassembly.
#[derive(Debug, Clone)]
pub struct DataChunk {
    pub names: Vec<String>,
    pub columns: Vec<ColumnVector>,
    pub count: usize,
    pub batch_index: u64,
}

/// Convert a record batch into column vectors. `record_base` feeds the
/// 1-based record locator in error messages when the read strategy tracks
/// it.
pub fn transform_batch(
    batch: &JsonRecordBatch<'_>,
    columns: &ScanColumns,
    scan_type: JsonScanType,
    ignore_errors: bool,
    file: &str,
    record_base: Option<u64>,
) -> Result<DataChunk> {
    if scan_type == JsonScanType::ReadJsonObjects {
        let mut validity = Vec::with_capacity(batch.scan_count());
        let mut data = Vec::with_capacity(batch.scan_count());
        for unit in batch.units.iter() {
            validity.push(true);
            data.push(String::from_utf8_lossy(unit.as_bytes()).into_owned());
        }
        return Ok(DataChunk {
            names: vec!["json".to_string()],
            columns: vec![ColumnVector::Varchar { validity, data }],
            count: batch.scan_count(),
            batch_index: batch.batch_index,
        });
    }

    let output = columns.output_columns();
    let mut names = Vec::with_capacity(output.len());
    let mut vectors = Vec::with_capacity(output.len());
    for &col in &output {
        names.push(columns.names[col].clone());
        vectors.push(ColumnVector::new(&columns.types[col])?);
    }
    let map = &columns.date_format_map;

    let mut row = 0usize;
    for (idx, value) in batch.values.iter().enumerate() {
        let result = convert_record(value, &output, columns, &mut vectors, map);
        if let Err(err) = result {
            // Roll the partially written tuple back.
            for vector in vectors.iter_mut() {
                vector.truncate(row);
            }
            if ignore_errors {
                for vector in vectors.iter_mut() {
                    vector.push_null();
                }
                row += 1;
                continue;
            }
            return Err(match record_base {
                Some(base) => err.wrap_err(format!(
                    "failed to transform JSON in file '{}' at record/line {}",
                    file,
                    base + idx as u64 + 1
                )),
                None => err.wrap_err(format!(
                    "failed to transform JSON in file '{}' (record {} of batch {})",
                    file,
                    idx + 1,
                    batch.batch_index
                )),
            });
        }
        row += 1;
    }

    Ok(DataChunk {
        names,
        columns: vectors,
        count: row,
        batch_index: batch.batch_index,
    })
}

fn convert_record(
    value: &JsonValue<'_>,
    output: &[usize],
    columns: &ScanColumns,
    vectors: &mut [ColumnVector],
    map: &DateFormatMap,
) -> Result<()> {
    if !matches!(value, JsonValue::Object(_)) && !value.is_null() {
        bail!(
            "expected a JSON object at the top level, got {}",
            value.type_name()
        );
    }
    for (out_idx, &col) in output.iter().enumerate() {
        let member = value.member(&columns.names[col]);
        convert_value(member, &mut vectors[out_idx], map)?;
    }
    Ok(())
}

fn convert_value(
    value: Option<&JsonValue<'_>>,
    vector: &mut ColumnVector,
    map: &DateFormatMap,
) -> Result<()> {
    let value = match value {
        None | Some(JsonValue::Null) => {
            vector.push_null();
            return Ok(());
        }
        Some(value) => value,
    };
    match vector {
        ColumnVector::Bool { validity, data } => match value {
            JsonValue::Bool(b) => {
                validity.push(true);
                data.push(*b);
            }
            other => bail!("cannot convert {} to boolean", other.type_name()),
        },
        ColumnVector::BigInt { validity, data } => match value {
            JsonValue::Int(v) => {
                validity.push(true);
                data.push(*v);
            }
            other => bail!("cannot convert {} to bigint", other.type_name()),
        },
        ColumnVector::Double { validity, data } => match value {
            JsonValue::Int(v) => {
                validity.push(true);
                data.push(*v as f64);
            }
            JsonValue::Double(v) => {
                validity.push(true);
                data.push(*v);
            }
            other => bail!("cannot convert {} to double", other.type_name()),
        },
        ColumnVector::Varchar { validity, data } => {
            validity.push(true);
            match value {
                JsonValue::Str(s) => data.push((*s).to_string()),
                other => data.push(other.render()),
            }
        }
        ColumnVector::Date { validity, data } => match value {
            JsonValue::Str(s) => {
                // Most preferred candidate first (the last retained one).
                for format in map.candidates(FormatTarget::Date).iter().rev() {
                    if let Some(days) = format.parse_date(s) {
                        validity.push(true);
                        data.push(days);
                        return Ok(());
                    }
                }
                bail!("'{}' does not match any date format candidate", s);
            }
            other => bail!("cannot convert {} to date", other.type_name()),
        },
        ColumnVector::Timestamp { validity, data } => match value {
            JsonValue::Str(s) => {
                for format in map.candidates(FormatTarget::Timestamp).iter().rev() {
                    if let Some(micros) = format.parse_timestamp(s) {
                        validity.push(true);
                        data.push(micros);
                        return Ok(());
                    }
                }
                bail!("'{}' does not match any timestamp format candidate", s);
            }
            other => bail!("cannot convert {} to timestamp", other.type_name()),
        },
        ColumnVector::List {
            validity,
            offsets,
            child,
        } => match value {
            JsonValue::Array(items) => {
                for item in items.iter() {
                    convert_value(Some(item), child, map)?;
                }
                validity.push(true);
                offsets.push(child.len());
            }
            other => bail!("cannot convert {} to list", other.type_name()),
        },
        ColumnVector::Struct { validity, fields } => match value {
            JsonValue::Object(_) => {
                for (name, field) in fields.iter_mut() {
                    convert_value(value.member(name), field, map)?;
                }
                validity.push(true);
            }
            other => bail!("cannot convert {} to struct", other.type_name()),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_vector_tracks_offsets() {
        let ty = DataType::List(Box::new(DataType::BigInt));
        let mut vector = ColumnVector::new(&ty).unwrap();
        let map = DateFormatMap::new();

        let arena = bumpalo::Bump::new();
        let value = crate::scan::dom::parse_record(&arena, b"[1, 2, 3]", None).unwrap();
        convert_value(Some(value), &mut vector, &map).unwrap();
        convert_value(None, &mut vector, &map).unwrap();

        match &vector {
            ColumnVector::List {
                validity,
                offsets,
                child,
            } => {
                assert_eq!(validity.as_slice(), &[true, false]);
                assert_eq!(offsets.as_slice(), &[3, 3]);
                assert_eq!(child.len(), 3);
            }
            other => panic!("unexpected vector {:?}", other),
        }
    }

    #[test]
    fn truncate_rolls_back_nested_rows() {
        let ty = DataType::List(Box::new(DataType::BigInt));
        let mut vector = ColumnVector::new(&ty).unwrap();
        let map = DateFormatMap::new();
        let arena = bumpalo::Bump::new();
        for input in [&b"[1]"[..], &b"[2, 3]"[..]] {
            let value = crate::scan::dom::parse_record(&arena, input, None).unwrap();
            convert_value(Some(value), &mut vector, &map).unwrap();
        }
        vector.truncate(1);
        match &vector {
            ColumnVector::List { offsets, child, .. } => {
                assert_eq!(offsets.as_slice(), &[1]);
                assert_eq!(child.len(), 1);
            }
            other => panic!("unexpected vector {:?}", other),
        }
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let mut vector = ColumnVector::new(&DataType::BigInt).unwrap();
        let map = DateFormatMap::new();
        let arena = bumpalo::Bump::new();
        let value = crate::scan::dom::parse_record(&arena, b"\"text\"", None).unwrap();
        let err = convert_value(Some(value), &mut vector, &map).unwrap_err();
        assert!(err.to_string().contains("cannot convert string to bigint"));
    }
}
