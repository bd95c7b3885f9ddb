//! # Date and Timestamp Format Candidates
//!
//! Strftime-style format parsing and matching used by schema detection and
//! the JSON-to-column transform.
//!
//! ## Candidate Ordering
//!
//! Candidate lists are insertion-ordered with the *most preferred format
//! last*. When the preferred format fails to match a sampled value, it is
//! dropped by truncating the list, promoting the previous candidate. A
//! candidate is never reordered, only dropped; an empty list means the
//! column cannot be a date/timestamp.
//!
//! ## Supported Specifiers
//!
//! | Specifier | Meaning |
//! |-----------|---------|
//! | `%Y` | four-digit year |
//! | `%y` | two-digit year (< 70 maps to 20xx) |
//! | `%m` | month (1-2 digits) |
//! | `%d` | day (1-2 digits) |
//! | `%H` | hour (1-2 digits) |
//! | `%M` | minute (1-2 digits) |
//! | `%S` | second (1-2 digits) |
//! | `%f` | fractional seconds (1-6 digits) |
//! | `%%` | literal percent |

use crate::types::{read_str, read_u32, read_u8, write_str};
use eyre::{bail, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Which logical type a candidate list parses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTarget {
    Date,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
enum FormatPart {
    Literal(String),
    Year,
    ShortYear,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Micros,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrpFormat {
    specifier: String,
    parts: Vec<FormatPart>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CivilTime {
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
}

impl StrpFormat {
    pub fn parse(specifier: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = specifier.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let spec = match chars.next() {
                Some(spec) => spec,
                None => bail!("format string '{}' ends with a dangling '%'", specifier),
            };
            if spec == '%' {
                literal.push('%');
                continue;
            }
            if !literal.is_empty() {
                parts.push(FormatPart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(match spec {
                'Y' => FormatPart::Year,
                'y' => FormatPart::ShortYear,
                'm' => FormatPart::Month,
                'd' => FormatPart::Day,
                'H' => FormatPart::Hour,
                'M' => FormatPart::Minute,
                'S' => FormatPart::Second,
                'f' => FormatPart::Micros,
                other => bail!("unsupported format specifier '%{}'", other),
            });
        }
        if !literal.is_empty() {
            parts.push(FormatPart::Literal(literal));
        }
        Ok(Self {
            specifier: specifier.to_string(),
            parts,
        })
    }

    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    pub fn matches(&self, value: &str) -> bool {
        self.apply(value).is_some()
    }

    /// Days since the Unix epoch, or None when the value does not match.
    pub fn parse_date(&self, value: &str) -> Option<i32> {
        let civil = self.apply(value)?;
        Some(days_since_epoch(civil.year, civil.month, civil.day) as i32)
    }

    /// Microseconds since the Unix epoch, or None when the value does not
    /// match.
    pub fn parse_timestamp(&self, value: &str) -> Option<i64> {
        let civil = self.apply(value)?;
        let days = days_since_epoch(civil.year, civil.month, civil.day);
        let seconds = days * SECONDS_PER_DAY
            + civil.hour as i64 * 3600
            + civil.minute as i64 * 60
            + civil.second as i64;
        Some(seconds * MICROS_PER_SECOND + civil.micros as i64)
    }

    fn apply(&self, value: &str) -> Option<CivilTime> {
        let bytes = value.as_bytes();
        let mut pos = 0;
        let mut civil = CivilTime {
            year: 1970,
            month: 1,
            day: 1,
            ..CivilTime::default()
        };
        for part in &self.parts {
            match part {
                FormatPart::Literal(text) => {
                    let text = text.as_bytes();
                    if bytes.len() < pos + text.len() || &bytes[pos..pos + text.len()] != text {
                        return None;
                    }
                    pos += text.len();
                }
                FormatPart::Year => civil.year = read_digits(bytes, &mut pos, 4, 4)? as i64,
                FormatPart::ShortYear => {
                    let y = read_digits(bytes, &mut pos, 2, 2)?;
                    civil.year = if y < 70 { 2000 + y as i64 } else { 1900 + y as i64 };
                }
                FormatPart::Month => civil.month = read_digits(bytes, &mut pos, 1, 2)?,
                FormatPart::Day => civil.day = read_digits(bytes, &mut pos, 1, 2)?,
                FormatPart::Hour => civil.hour = read_digits(bytes, &mut pos, 1, 2)?,
                FormatPart::Minute => civil.minute = read_digits(bytes, &mut pos, 1, 2)?,
                FormatPart::Second => civil.second = read_digits(bytes, &mut pos, 1, 2)?,
                FormatPart::Micros => {
                    let start = pos;
                    let raw = read_digits(bytes, &mut pos, 1, 6)?;
                    let digits = pos - start;
                    civil.micros = raw * 10u32.pow(6 - digits as u32);
                }
            }
        }
        if pos != bytes.len() {
            return None;
        }
        if civil.month < 1
            || civil.month > 12
            || civil.day < 1
            || civil.day > days_in_month(civil.year, civil.month)
            || civil.hour > 23
            || civil.minute > 59
            || civil.second > 59
        {
            return None;
        }
        Some(civil)
    }
}

fn read_digits(bytes: &[u8], pos: &mut usize, min: usize, max: usize) -> Option<u32> {
    let start = *pos;
    let mut value: u32 = 0;
    while *pos < bytes.len() && *pos - start < max && bytes[*pos].is_ascii_digit() {
        value = value * 10 + (bytes[*pos] - b'0') as u32;
        *pos += 1;
    }
    if *pos - start < min {
        return None;
    }
    Some(value)
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

fn date_to_days(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let m = if month <= 2 { month + 12 } else { month };
    365 * y + y / 4 - y / 100 + y / 400 + (153 * (m as i64 - 3) + 2) / 5 + day as i64 - 306
}

fn days_since_epoch(year: i64, month: u32, day: u32) -> i64 {
    date_to_days(year, month, day) - date_to_days(1970, 1, 1)
}

pub type CandidateList = SmallVec<[StrpFormat; 4]>;

/// Try the candidates from most preferred (last) backwards, dropping every
/// candidate that fails on the value. Returns whether any candidate matched.
pub fn refine_candidates(candidates: &mut CandidateList, value: &str) -> bool {
    while let Some(preferred) = candidates.last() {
        if preferred.matches(value) {
            return true;
        }
        candidates.pop();
    }
    false
}

const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%m-%d-%Y",
    "%m-%d-%y",
    "%d-%m-%Y",
    "%d-%m-%y",
    "%y-%m-%d",
    "%Y-%m-%d",
];

const DEFAULT_TIMESTAMP_FORMATS: &[&str] = &[
    "%m-%d-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S.%f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S.%f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Candidate date/timestamp formats per target type, most preferred last.
#[derive(Debug, Clone, Default)]
pub struct DateFormatMap {
    candidates: HashMap<FormatTarget, CandidateList>,
}

impl DateFormatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the default candidate list for a target.
    pub fn initialize_defaults(&mut self, target: FormatTarget) {
        let defaults = match target {
            FormatTarget::Date => DEFAULT_DATE_FORMATS,
            FormatTarget::Timestamp => DEFAULT_TIMESTAMP_FORMATS,
        };
        let list = self.candidates.entry(target).or_default();
        for specifier in defaults {
            list.push(StrpFormat::parse(specifier).expect("default format parses"));
        }
    }

    pub fn add_format(&mut self, target: FormatTarget, specifier: &str) -> Result<()> {
        let format = StrpFormat::parse(specifier)?;
        self.candidates.entry(target).or_default().push(format);
        Ok(())
    }

    /// Replace the candidate list with a single user-forced format.
    pub fn set_forced(&mut self, target: FormatTarget, specifier: &str) -> Result<()> {
        let format = StrpFormat::parse(specifier)?;
        let mut list = CandidateList::new();
        list.push(format);
        self.candidates.insert(target, list);
        Ok(())
    }

    pub fn has_formats(&self, target: FormatTarget) -> bool {
        self.candidates
            .get(&target)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn candidates(&self, target: FormatTarget) -> &[StrpFormat] {
        self.candidates
            .get(&target)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn candidate_list(&self, target: FormatTarget) -> CandidateList {
        self.candidates.get(&target).cloned().unwrap_or_default()
    }

    pub fn replace(&mut self, target: FormatTarget, list: CandidateList) {
        self.candidates.insert(target, list);
    }

    /// The currently preferred format: the last retained candidate.
    pub fn preferred(&self, target: FormatTarget) -> Option<&StrpFormat> {
        self.candidates.get(&target).and_then(|list| list.last())
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        let mut targets: Vec<FormatTarget> = self.candidates.keys().copied().collect();
        targets.sort_by_key(|t| matches!(t, FormatTarget::Timestamp) as u8);
        buf.push(targets.len() as u8);
        for target in targets {
            buf.push(matches!(target, FormatTarget::Timestamp) as u8);
            let list = &self.candidates[&target];
            buf.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for format in list {
                write_str(format.specifier(), buf);
            }
        }
    }

    pub fn deserialize(bytes: &[u8], pos: &mut usize) -> Result<Self> {
        let mut map = DateFormatMap::new();
        let target_count = read_u8(bytes, pos)?;
        for _ in 0..target_count {
            let target = match read_u8(bytes, pos)? {
                0 => FormatTarget::Date,
                1 => FormatTarget::Timestamp,
                other => bail!("unknown date format target tag {}", other),
            };
            let count = read_u32(bytes, pos)? as usize;
            for _ in 0..count {
                let specifier = read_str(bytes, pos)?;
                map.add_format(target, &specifier)?;
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_date_parses() {
        let format = StrpFormat::parse("%Y-%m-%d").unwrap();
        assert_eq!(format.parse_date("1970-01-01"), Some(0));
        assert_eq!(format.parse_date("1970-01-02"), Some(1));
        assert_eq!(format.parse_date("2024-01-15"), Some(19737));
        assert_eq!(format.parse_date("2024-13-01"), None);
        assert_eq!(format.parse_date("2024-02-30"), None);
        assert_eq!(format.parse_date("not a date"), None);
    }

    #[test]
    fn timestamp_with_fraction_parses() {
        let format = StrpFormat::parse("%Y-%m-%dT%H:%M:%S.%f").unwrap();
        let micros = format.parse_timestamp("1970-01-01T00:00:01.5").unwrap();
        assert_eq!(micros, 1_500_000);
        let format = StrpFormat::parse("%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            format.parse_timestamp("1970-01-02 00:00:00"),
            Some(SECONDS_PER_DAY * MICROS_PER_SECOND)
        );
    }

    #[test]
    fn leap_year_is_honored() {
        let format = StrpFormat::parse("%Y-%m-%d").unwrap();
        assert!(format.parse_date("2024-02-29").is_some());
        assert!(format.parse_date("2023-02-29").is_none());
    }

    #[test]
    fn refinement_truncates_from_preferred_end() {
        let mut map = DateFormatMap::new();
        map.initialize_defaults(FormatTarget::Date);
        let mut candidates = map.candidate_list(FormatTarget::Date);
        let initial = candidates.len();

        // "15-01-2024" fails %Y-%m-%d and %y-%m-%d but matches %d-%m-%Y after
        // two truncations from the preferred end.
        assert!(refine_candidates(&mut candidates, "15-01-2024"));
        assert!(candidates.len() < initial);
        assert_eq!(candidates.last().unwrap().specifier(), "%d-%m-%Y");

        assert!(!refine_candidates(&mut candidates, "garbage"));
        assert!(candidates.is_empty());
    }

    #[test]
    fn forced_format_replaces_candidates() {
        let mut map = DateFormatMap::new();
        map.initialize_defaults(FormatTarget::Date);
        map.set_forced(FormatTarget::Date, "%d/%m/%Y").unwrap();
        assert_eq!(map.candidates(FormatTarget::Date).len(), 1);
        assert_eq!(
            map.preferred(FormatTarget::Date).unwrap().specifier(),
            "%d/%m/%Y"
        );
    }

    #[test]
    fn map_serialization_round_trip() {
        let mut map = DateFormatMap::new();
        map.initialize_defaults(FormatTarget::Date);
        map.set_forced(FormatTarget::Timestamp, "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let mut buf = Vec::new();
        map.serialize(&mut buf);
        let mut pos = 0;
        let back = DateFormatMap::deserialize(&buf, &mut pos).unwrap();
        assert_eq!(pos, buf.len());
        assert_eq!(
            back.candidates(FormatTarget::Date).len(),
            map.candidates(FormatTarget::Date).len()
        );
        assert_eq!(
            back.preferred(FormatTarget::Timestamp).unwrap().specifier(),
            "%Y-%m-%d %H:%M:%S"
        );
    }
}
