//! # JSON DOM
//!
//! An arena-backed JSON document model. Parsed values live in a per-worker
//! bump allocator that is reset between record batches, so a full batch of
//! DOM trees costs one arena and no individual frees.
//!
//! ## Value Model
//!
//! `JsonValue` is a tagged union over the JSON data model with integers and
//! doubles distinguished: a number without fraction or exponent that fits an
//! `i64` stays an integer, which lets schema detection infer `bigint`
//! columns.
//!
//! ## Errors
//!
//! All parse errors carry the byte position within the record, so the scan
//! can combine them with a file name and record number.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JsonValue<'b> {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(&'b str),
    Array(&'b [&'b JsonValue<'b>]),
    Object(&'b [(&'b str, &'b JsonValue<'b>)]),
}

impl<'b> JsonValue<'b> {
    /// First member with the given key, for object values.
    pub fn member(&self, key: &str) -> Option<&'b JsonValue<'b>> {
        match self {
            JsonValue::Object(entries) => entries
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "boolean",
            JsonValue::Int(_) => "integer",
            JsonValue::Double(_) => "double",
            JsonValue::Str(_) => "string",
            JsonValue::Array(_) => "array",
            JsonValue::Object(_) => "object",
        }
    }

    /// Render the value back to JSON text. Used when a value is coerced into
    /// a varchar column.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            JsonValue::Null => out.push_str("null"),
            JsonValue::Bool(true) => out.push_str("true"),
            JsonValue::Bool(false) => out.push_str("false"),
            JsonValue::Int(v) => out.push_str(&v.to_string()),
            JsonValue::Double(v) => out.push_str(&v.to_string()),
            JsonValue::Str(s) => render_string(s, out),
            JsonValue::Array(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.render_into(out);
                }
                out.push(']');
            }
            JsonValue::Object(entries) => {
                out.push('{');
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    render_string(key, out);
                    out.push(':');
                    value.render_into(out);
                }
                out.push('}');
            }
        }
    }
}

fn render_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Parse one complete JSON record into the arena. Trailing whitespace is
/// allowed; any other trailing bytes are an error.
pub fn parse_record<'b>(
    arena: &'b Bump,
    input: &[u8],
    max_depth: Option<usize>,
) -> Result<&'b JsonValue<'b>> {
    let mut parser = DomParser {
        arena,
        bytes: input,
        pos: 0,
        max_depth,
    };
    parser.skip_whitespace();
    let value = parser.parse_value(0)?;
    parser.skip_whitespace();
    if parser.pos != input.len() {
        bail!(
            "trailing characters after JSON value at position {}",
            parser.pos
        );
    }
    Ok(value)
}

struct DomParser<'b, 'i> {
    arena: &'b Bump,
    bytes: &'i [u8],
    pos: usize,
    max_depth: Option<usize>,
}

impl<'b> DomParser<'b, '_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if let Some(max) = self.max_depth {
            if depth > max {
                bail!("maximum nesting depth of {} exceeded", max);
            }
        }
        Ok(())
    }

    fn parse_value(&mut self, depth: usize) -> Result<&'b JsonValue<'b>> {
        self.check_depth(depth)?;
        self.skip_whitespace();
        if self.pos >= self.bytes.len() {
            bail!("unexpected end of input at position {}", self.pos);
        }
        let value = match self.bytes[self.pos] {
            b'{' => return self.parse_object(depth),
            b'[' => return self.parse_array(depth),
            b'"' => JsonValue::Str(self.parse_string()?),
            b't' => {
                self.expect_keyword(b"true")?;
                JsonValue::Bool(true)
            }
            b'f' => {
                self.expect_keyword(b"false")?;
                JsonValue::Bool(false)
            }
            b'n' => {
                self.expect_keyword(b"null")?;
                JsonValue::Null
            }
            b'-' | b'0'..=b'9' => self.parse_number()?,
            other => bail!(
                "unexpected character '{}' at position {}",
                other as char,
                self.pos
            ),
        };
        Ok(self.arena.alloc(value))
    }

    fn parse_object(&mut self, depth: usize) -> Result<&'b JsonValue<'b>> {
        self.pos += 1;
        let mut entries: BumpVec<'b, (&'b str, &'b JsonValue<'b>)> = BumpVec::new_in(self.arena);
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(self
                .arena
                .alloc(JsonValue::Object(entries.into_bump_slice())));
        }
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'"') {
                bail!(
                    "expected string key or '}}' at position {} in object",
                    self.pos
                );
            }
            let key = self.parse_string()?;
            self.skip_whitespace();
            if self.peek() != Some(b':') {
                bail!("expected ':' after object key at position {}", self.pos);
            }
            self.pos += 1;
            let value = self.parse_value(depth + 1)?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => bail!("expected ',' or '}}' at position {} in object", self.pos),
            }
        }
        Ok(self
            .arena
            .alloc(JsonValue::Object(entries.into_bump_slice())))
    }

    fn parse_array(&mut self, depth: usize) -> Result<&'b JsonValue<'b>> {
        self.pos += 1;
        let mut items: BumpVec<'b, &'b JsonValue<'b>> = BumpVec::new_in(self.arena);
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(self.arena.alloc(JsonValue::Array(items.into_bump_slice())));
        }
        loop {
            let value = self.parse_value(depth + 1)?;
            items.push(value);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => bail!("expected ',' or ']' at position {} in array", self.pos),
            }
        }
        Ok(self.arena.alloc(JsonValue::Array(items.into_bump_slice())))
    }

    fn parse_string(&mut self) -> Result<&'b str> {
        let start = self.pos + 1;
        self.pos += 1;
        let mut has_escapes = false;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'"' => {
                    let raw = &self.bytes[start..self.pos];
                    self.pos += 1;
                    let raw = std::str::from_utf8(raw).map_err(|_| {
                        eyre::eyre!("invalid utf-8 in string starting at position {}", start - 1)
                    })?;
                    return if has_escapes {
                        let unescaped = unescape_string(raw, start - 1)?;
                        Ok(self.arena.alloc_str(&unescaped))
                    } else {
                        Ok(self.arena.alloc_str(raw))
                    };
                }
                b'\\' => {
                    has_escapes = true;
                    self.pos += 2;
                }
                _ => self.pos += 1,
            }
        }
        bail!("unterminated string starting at position {}", start - 1)
    }

    fn parse_number(&mut self) -> Result<JsonValue<'b>> {
        let start = self.pos;
        if self.bytes[self.pos] == b'-' {
            self.pos += 1;
        }
        let mut is_double = false;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'0'..=b'9' => self.pos += 1,
                b'.' | b'e' | b'E' | b'+' | b'-' => {
                    is_double = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .expect("number bytes are ascii");
        if !is_double {
            if let Ok(v) = text.parse::<i64>() {
                return Ok(JsonValue::Int(v));
            }
        }
        match text.parse::<f64>() {
            Ok(v) => Ok(JsonValue::Double(v)),
            Err(_) => bail!("invalid number '{}' at position {}", text, start),
        }
    }

    fn expect_keyword(&mut self, keyword: &[u8]) -> Result<()> {
        if self.bytes.len() >= self.pos + keyword.len()
            && &self.bytes[self.pos..self.pos + keyword.len()] == keyword
        {
            self.pos += keyword.len();
            Ok(())
        } else {
            bail!(
                "expected '{}' at position {}",
                String::from_utf8_lossy(keyword),
                self.pos
            )
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
}

fn unescape_string(s: &str, position: usize) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('/') => result.push('/'),
            Some('b') => result.push('\x08'),
            Some('f') => result.push('\x0C'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    bail!("incomplete unicode escape in string at position {}", position);
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| {
                    eyre::eyre!("invalid unicode escape '\\u{}' in string at position {}", hex, position)
                })?;
                match char::from_u32(cp) {
                    Some(ch) => result.push(ch),
                    None => bail!("invalid unicode codepoint U+{:04X} at position {}", cp, position),
                }
            }
            Some(other) => bail!("invalid escape sequence '\\{}' at position {}", other, position),
            None => bail!("unexpected end of string after backslash at position {}", position),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<'b>(arena: &'b Bump, input: &str) -> &'b JsonValue<'b> {
        parse_record(arena, input.as_bytes(), None).unwrap()
    }

    #[test]
    fn parse_scalars() {
        let arena = Bump::new();
        assert_eq!(parse(&arena, "null"), &JsonValue::Null);
        assert_eq!(parse(&arena, "true"), &JsonValue::Bool(true));
        assert_eq!(parse(&arena, "42"), &JsonValue::Int(42));
        assert_eq!(parse(&arena, "-3.25"), &JsonValue::Double(-3.25));
        assert_eq!(parse(&arena, "1e10"), &JsonValue::Double(1e10));
        assert_eq!(parse(&arena, r#""hello""#), &JsonValue::Str("hello"));
    }

    #[test]
    fn integer_overflow_falls_back_to_double() {
        let arena = Bump::new();
        match parse(&arena, "99999999999999999999") {
            JsonValue::Double(_) => {}
            other => panic!("expected double, got {:?}", other),
        }
    }

    #[test]
    fn parse_object_preserves_member_order() {
        let arena = Bump::new();
        let value = parse(&arena, r#"{"b": 1, "a": 2}"#);
        match value {
            JsonValue::Object(entries) => {
                assert_eq!(entries[0].0, "b");
                assert_eq!(entries[1].0, "a");
            }
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(value.member("a"), Some(&JsonValue::Int(2)));
        assert_eq!(value.member("missing"), None);
    }

    #[test]
    fn parse_nested_array() {
        let arena = Bump::new();
        let value = parse(&arena, r#"[1, [2, 3], {"x": null}]"#);
        match value {
            JsonValue::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn escapes_are_decoded() {
        let arena = Bump::new();
        assert_eq!(
            parse(&arena, r#""line\nbreak A""#),
            &JsonValue::Str("line\nbreak A")
        );
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let arena = Bump::new();
        let err = parse_record(&arena, b"{} xyz", None).unwrap_err();
        assert!(err.to_string().contains("trailing characters"));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let arena = Bump::new();
        let input = "[[[[1]]]]";
        assert!(parse_record(&arena, input.as_bytes(), Some(10)).is_ok());
        let err = parse_record(&arena, input.as_bytes(), Some(2)).unwrap_err();
        assert!(err.to_string().contains("maximum nesting depth"));
    }

    #[test]
    fn render_round_trips_structure() {
        let arena = Bump::new();
        let value = parse(&arena, r#"{"a":[1,2.5,"x\"y"],"b":null}"#);
        assert_eq!(value.render(), r#"{"a":[1,2.5,"x\"y"],"b":null}"#);
    }
}
