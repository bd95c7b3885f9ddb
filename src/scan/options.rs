//! # Scan Options and Bind Data
//!
//! The table-function surface of the JSON scan: recognized parameters, their
//! defaults and clamps, and the immutable bind data produced from them.
//!
//! ## Parameters
//!
//! | Parameter | Type | Default |
//! |-----------|------|---------|
//! | `filename` | varchar or varchar[] | required, glob-expanded |
//! | `format` | 'auto' / 'newline_delimited' / 'array' | 'auto' |
//! | `compression` | 'auto' / 'none' / 'gzip' / 'zstd' | 'auto' (extension) |
//! | `columns` | struct of name/type pairs | none (enables auto-detect) |
//! | `auto_detect` | bool | true when `columns` absent |
//! | `sample_size` | int | 10 x vector size |
//! | `maximum_object_size` | int | 16 MiB, clamped to at least 16 MiB |
//! | `ignore_errors` | bool | false |
//! | `dateformat` / `timestampformat` | varchar | detection candidates |
//! | `maximum_depth` | int | unlimited |
//!
//! ## Bind Data Serialization
//!
//! The bind data round-trips through a compact binary form for plan caching:
//!
//! ```text
//! Offset  Size  Description
//! 0       8     Magic: "PKJSCAN1"
//! 8       1     Scan type (1=read_json, 2=read_json_objects, 3=sample)
//! 9       4     File count (u32 little-endian), then file paths
//! ...           Options: format, compression, flags, sizes, depth
//! ...           Forced date/timestamp format strings (optional)
//! ...           Column names, then column types (tag-encoded)
//! ...           Date format candidate map
//! ...           Average tuple size (u64 little-endian)
//! ```

use crate::scan::dateformat::{DateFormatMap, FormatTarget};
use crate::scan::{detect, glob, VECTOR_SIZE};
use crate::types::{self, DataType};
use eyre::{bail, ensure, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAXIMUM_OBJECT_SIZE: usize = 16 * 1024 * 1024;
/// Seed for the cardinality estimate before any sampling has happened.
pub const INITIAL_AVG_TUPLE_SIZE: usize = 420;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFormat {
    Auto,
    NewlineDelimited,
    Array,
}

impl JsonFormat {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(match text.to_ascii_lowercase().as_str() {
            "auto" => JsonFormat::Auto,
            "newline_delimited" | "nd" => JsonFormat::NewlineDelimited,
            "array" => JsonFormat::Array,
            other => bail!(
                "format must be one of ['auto', 'newline_delimited', 'array'], got '{}'",
                other
            ),
        })
    }

    /// Sniff the framing from the first non-whitespace byte of a buffer.
    pub fn sniff(bytes: &[u8]) -> JsonFormat {
        let pos = crate::scan::framing::skip_whitespace(bytes, 0);
        match bytes.get(pos) {
            Some(b'[') => JsonFormat::Array,
            _ => JsonFormat::NewlineDelimited,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonCompression {
    Auto,
    None,
    Gzip,
    Zstd,
}

impl JsonCompression {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(match text.to_ascii_lowercase().as_str() {
            "auto" => JsonCompression::Auto,
            "none" => JsonCompression::None,
            "gzip" => JsonCompression::Gzip,
            "zstd" => JsonCompression::Zstd,
            other => bail!(
                "compression must be one of ['auto', 'none', 'gzip', 'zstd'], got '{}'",
                other
            ),
        })
    }

    /// Resolve `auto` from the file extension.
    pub fn resolve(self, path: &Path) -> JsonCompression {
        if self != JsonCompression::Auto {
            return self;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => JsonCompression::Gzip,
            Some("zst") => JsonCompression::Zstd,
            _ => JsonCompression::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonScanType {
    /// Read JSON straight to columnar data.
    ReadJson,
    /// Read whole JSON records as strings.
    ReadJsonObjects,
    /// Sample run for schema detection.
    Sample,
}

#[derive(Debug, Clone)]
pub struct JsonScanOptions {
    pub format: JsonFormat,
    pub compression: JsonCompression,
    pub ignore_errors: bool,
    pub maximum_object_size: usize,
    pub auto_detect: bool,
    pub sample_size: usize,
    pub maximum_depth: Option<usize>,
    pub date_format: Option<String>,
    pub timestamp_format: Option<String>,
    /// Requested buffer size; the effective capacity is at least
    /// `maximum_object_size` so any single record fits in one buffer.
    pub buffer_size: usize,
}

impl Default for JsonScanOptions {
    fn default() -> Self {
        Self {
            format: JsonFormat::Auto,
            compression: JsonCompression::Auto,
            ignore_errors: false,
            maximum_object_size: DEFAULT_MAXIMUM_OBJECT_SIZE,
            auto_detect: false,
            sample_size: VECTOR_SIZE * 10,
            maximum_depth: None,
            date_format: None,
            timestamp_format: None,
            buffer_size: DEFAULT_MAXIMUM_OBJECT_SIZE,
        }
    }
}

impl JsonScanOptions {
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_size.max(self.maximum_object_size)
    }

    /// Build the candidate map: forced formats replace the default candidate
    /// lists and skip detection for their type.
    pub fn initial_date_format_map(&self) -> Result<DateFormatMap> {
        let mut map = DateFormatMap::new();
        match &self.date_format {
            Some(format) => map.set_forced(FormatTarget::Date, format)?,
            None => map.initialize_defaults(FormatTarget::Date),
        }
        match &self.timestamp_format {
            Some(format) => map.set_forced(FormatTarget::Timestamp, format)?,
            None => map.initialize_defaults(FormatTarget::Timestamp),
        }
        Ok(map)
    }
}

/// Raw named parameters of the table-function surface.
#[derive(Debug, Clone, Default)]
pub struct JsonBindInput {
    pub filename: Vec<String>,
    pub format: Option<String>,
    pub compression: Option<String>,
    pub columns: Option<Vec<(String, DataType)>>,
    pub auto_detect: Option<bool>,
    pub sample_size: Option<i64>,
    pub maximum_object_size: Option<i64>,
    pub ignore_errors: Option<bool>,
    pub dateformat: Option<String>,
    pub timestampformat: Option<String>,
    pub maximum_depth: Option<i64>,
}

/// Immutable scan description produced at bind time.
#[derive(Debug, Clone)]
pub struct JsonScanBindData {
    pub scan_type: JsonScanType,
    pub files: Vec<PathBuf>,
    pub options: JsonScanOptions,
    /// All column names, in order. Empty until detection has run when
    /// auto-detecting lazily.
    pub names: Vec<String>,
    pub types: Vec<DataType>,
    pub date_format_map: DateFormatMap,
    /// The inferred average tuple size, feeding cardinality estimation.
    pub avg_tuple_size: usize,
}

impl JsonScanBindData {
    /// Bind the `read_json` table function: validate parameters, expand
    /// globs, and auto-detect the schema unless columns were supplied.
    pub fn bind(input: JsonBindInput) -> Result<Self> {
        let mut bind = Self::bind_without_detection(input, JsonScanType::ReadJson)?;
        if bind.options.auto_detect {
            detect::bind_time_detection(&mut bind)?;
        }
        Ok(bind)
    }

    /// Bind the `read_json_objects` table function: whole records come back
    /// as a single varchar column named `json`.
    pub fn bind_objects(input: JsonBindInput) -> Result<Self> {
        ensure!(
            input.columns.is_none(),
            "reading json objects as strings does not take a columns parameter"
        );
        let mut bind = Self::bind_without_detection(input, JsonScanType::ReadJsonObjects)?;
        bind.options.auto_detect = false;
        bind.names = vec!["json".to_string()];
        bind.types = vec![DataType::Varchar];
        Ok(bind)
    }

    fn bind_without_detection(input: JsonBindInput, scan_type: JsonScanType) -> Result<Self> {
        ensure!(!input.filename.is_empty(), "filename parameter is required");
        let files = glob::expand_patterns(&input.filename)?;

        let mut options = JsonScanOptions::default();
        if let Some(format) = &input.format {
            options.format = JsonFormat::parse(format)?;
        }
        if let Some(compression) = &input.compression {
            options.compression = JsonCompression::parse(compression)?;
        }
        if let Some(ignore_errors) = input.ignore_errors {
            options.ignore_errors = ignore_errors;
        }
        if let Some(size) = input.maximum_object_size {
            ensure!(size > 0, "maximum_object_size must be positive");
            options.maximum_object_size = (size as usize).max(DEFAULT_MAXIMUM_OBJECT_SIZE);
            options.buffer_size = options.buffer_size.max(options.maximum_object_size);
        }
        if let Some(sample_size) = input.sample_size {
            ensure!(sample_size > 0, "sample_size must be positive");
            options.sample_size = sample_size as usize;
        }
        if let Some(depth) = input.maximum_depth {
            ensure!(depth >= 0, "maximum_depth cannot be negative");
            options.maximum_depth = Some(depth as usize);
        }
        options.date_format = input.dateformat;
        options.timestamp_format = input.timestampformat;

        let (names, types) = match &input.columns {
            Some(columns) => {
                ensure!(!columns.is_empty(), "columns parameter cannot be empty");
                options.auto_detect = false;
                (
                    columns.iter().map(|(name, _)| name.clone()).collect(),
                    columns.iter().map(|(_, ty)| ty.clone()).collect(),
                )
            }
            None => {
                options.auto_detect = input.auto_detect.unwrap_or(true);
                if scan_type == JsonScanType::ReadJson {
                    ensure!(
                        options.auto_detect,
                        "either specify a columns parameter or enable auto_detect"
                    );
                }
                (Vec::new(), Vec::new())
            }
        };

        let date_format_map = options.initial_date_format_map()?;
        Ok(Self {
            scan_type,
            files,
            options,
            names,
            types,
            date_format_map,
            avg_tuple_size: INITIAL_AVG_TUPLE_SIZE,
        })
    }

    /// Cardinality estimate: total input bytes over the average tuple size.
    pub fn cardinality(&self) -> Option<u64> {
        let mut total: u64 = 0;
        for file in &self.files {
            total += std::fs::metadata(file).ok()?.len();
        }
        Some(total / self.avg_tuple_size.max(1) as u64)
    }

    /// Drop files rejected by a pushed-down filename predicate.
    pub fn prune_files(&mut self, keep: impl Fn(&Path) -> bool) {
        self.files.retain(|file| keep(file));
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"PKJSCAN1");
        buf.push(match self.scan_type {
            JsonScanType::ReadJson => 1,
            JsonScanType::ReadJsonObjects => 2,
            JsonScanType::Sample => 3,
        });
        buf.extend_from_slice(&(self.files.len() as u32).to_le_bytes());
        for file in &self.files {
            types::write_str(&file.to_string_lossy(), buf);
        }
        buf.push(match self.options.format {
            JsonFormat::Auto => 0,
            JsonFormat::NewlineDelimited => 1,
            JsonFormat::Array => 2,
        });
        buf.push(match self.options.compression {
            JsonCompression::Auto => 0,
            JsonCompression::None => 1,
            JsonCompression::Gzip => 2,
            JsonCompression::Zstd => 3,
        });
        buf.push(self.options.ignore_errors as u8);
        buf.push(self.options.auto_detect as u8);
        buf.extend_from_slice(&(self.options.maximum_object_size as u64).to_le_bytes());
        buf.extend_from_slice(&(self.options.sample_size as u64).to_le_bytes());
        buf.extend_from_slice(&(self.options.buffer_size as u64).to_le_bytes());
        match self.options.maximum_depth {
            Some(depth) => {
                buf.push(1);
                buf.extend_from_slice(&(depth as u64).to_le_bytes());
            }
            None => buf.push(0),
        }
        write_opt_str(&self.options.date_format, buf);
        write_opt_str(&self.options.timestamp_format, buf);
        buf.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        for (name, ty) in self.names.iter().zip(self.types.iter()) {
            types::write_str(name, buf);
            ty.serialize(buf);
        }
        self.date_format_map.serialize(buf);
        buf.extend_from_slice(&(self.avg_tuple_size as u64).to_le_bytes());
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= 8 && &bytes[..8] == b"PKJSCAN1",
            "invalid json scan bind data header"
        );
        let mut pos = 8;
        let scan_type = match types::read_u8(bytes, &mut pos)? {
            1 => JsonScanType::ReadJson,
            2 => JsonScanType::ReadJsonObjects,
            3 => JsonScanType::Sample,
            other => bail!("unknown scan type tag {}", other),
        };
        let file_count = types::read_u32(bytes, &mut pos)? as usize;
        let mut files = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            files.push(PathBuf::from(types::read_str(bytes, &mut pos)?));
        }
        let format = match types::read_u8(bytes, &mut pos)? {
            0 => JsonFormat::Auto,
            1 => JsonFormat::NewlineDelimited,
            2 => JsonFormat::Array,
            other => bail!("unknown format tag {}", other),
        };
        let compression = match types::read_u8(bytes, &mut pos)? {
            0 => JsonCompression::Auto,
            1 => JsonCompression::None,
            2 => JsonCompression::Gzip,
            3 => JsonCompression::Zstd,
            other => bail!("unknown compression tag {}", other),
        };
        let ignore_errors = types::read_u8(bytes, &mut pos)? != 0;
        let auto_detect = types::read_u8(bytes, &mut pos)? != 0;
        let maximum_object_size = types::read_u64(bytes, &mut pos)? as usize;
        let sample_size = types::read_u64(bytes, &mut pos)? as usize;
        let buffer_size = types::read_u64(bytes, &mut pos)? as usize;
        let maximum_depth = match types::read_u8(bytes, &mut pos)? {
            0 => None,
            _ => Some(types::read_u64(bytes, &mut pos)? as usize),
        };
        let date_format = read_opt_str(bytes, &mut pos)?;
        let timestamp_format = read_opt_str(bytes, &mut pos)?;
        let column_count = types::read_u32(bytes, &mut pos)? as usize;
        let mut names = Vec::with_capacity(column_count);
        let mut column_types = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            names.push(types::read_str(bytes, &mut pos)?);
            column_types.push(DataType::deserialize(bytes, &mut pos)?);
        }
        let date_format_map = DateFormatMap::deserialize(bytes, &mut pos)?;
        let avg_tuple_size = types::read_u64(bytes, &mut pos)? as usize;
        ensure!(pos == bytes.len(), "trailing bytes in json scan bind data");

        Ok(Self {
            scan_type,
            files,
            options: JsonScanOptions {
                format,
                compression,
                ignore_errors,
                maximum_object_size,
                auto_detect,
                sample_size,
                maximum_depth,
                date_format,
                timestamp_format,
                buffer_size,
            },
            names,
            types: column_types,
            date_format_map,
            avg_tuple_size,
        })
    }
}

fn write_opt_str(value: &Option<String>, buf: &mut Vec<u8>) {
    match value {
        Some(s) => {
            buf.push(1);
            types::write_str(s, buf);
        }
        None => buf.push(0),
    }
}

fn read_opt_str(bytes: &[u8], pos: &mut usize) -> Result<Option<String>> {
    match types::read_u8(bytes, pos)? {
        0 => Ok(None),
        _ => Ok(Some(types::read_str(bytes, pos)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::dateformat::FormatTarget;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_file() -> NamedTempFile {
        let mut tmp = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(tmp, "{{\"a\": 1}}").unwrap();
        tmp
    }

    #[test]
    fn compression_resolves_from_extension() {
        assert_eq!(
            JsonCompression::Auto.resolve(Path::new("x.json.gz")),
            JsonCompression::Gzip
        );
        assert_eq!(
            JsonCompression::Auto.resolve(Path::new("x.json.zst")),
            JsonCompression::Zstd
        );
        assert_eq!(
            JsonCompression::Auto.resolve(Path::new("x.json")),
            JsonCompression::None
        );
        assert_eq!(
            JsonCompression::Gzip.resolve(Path::new("x.json")),
            JsonCompression::Gzip
        );
    }

    #[test]
    fn format_sniffing() {
        assert_eq!(JsonFormat::sniff(b"  [1, 2]"), JsonFormat::Array);
        assert_eq!(JsonFormat::sniff(b"{\"a\":1}\n"), JsonFormat::NewlineDelimited);
    }

    #[test]
    fn maximum_object_size_is_clamped_at_bind() {
        let tmp = sample_file();
        let bind = JsonScanBindData::bind(JsonBindInput {
            filename: vec![tmp.path().to_string_lossy().into_owned()],
            maximum_object_size: Some(1024),
            columns: Some(vec![("a".to_string(), DataType::BigInt)]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            bind.options.maximum_object_size,
            DEFAULT_MAXIMUM_OBJECT_SIZE
        );
    }

    #[test]
    fn explicit_columns_disable_auto_detect() {
        let tmp = sample_file();
        let bind = JsonScanBindData::bind(JsonBindInput {
            filename: vec![tmp.path().to_string_lossy().into_owned()],
            columns: Some(vec![("a".to_string(), DataType::BigInt)]),
            auto_detect: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert!(!bind.options.auto_detect);
        assert_eq!(bind.names, vec!["a"]);
    }

    #[test]
    fn bind_data_serialization_round_trip() {
        let tmp = sample_file();
        let mut bind = JsonScanBindData::bind(JsonBindInput {
            filename: vec![tmp.path().to_string_lossy().into_owned()],
            columns: Some(vec![
                ("a".to_string(), DataType::BigInt),
                ("d".to_string(), DataType::Date),
            ]),
            dateformat: Some("%Y-%m-%d".to_string()),
            ..Default::default()
        })
        .unwrap();
        bind.avg_tuple_size = 37;

        let mut buf = Vec::new();
        bind.serialize(&mut buf);
        let back = JsonScanBindData::deserialize(&buf).unwrap();
        assert_eq!(back.avg_tuple_size, 37);
        assert_eq!(back.names, bind.names);
        assert_eq!(back.types, bind.types);
        assert_eq!(
            back.date_format_map
                .preferred(FormatTarget::Date)
                .unwrap()
                .specifier(),
            "%Y-%m-%d"
        );
        assert_eq!(back.files, bind.files);
    }
}
