//! # Logical Type System
//!
//! This module defines the logical column types shared by the planner and the
//! JSON scan engine, together with the widening lattice used during schema
//! detection.
//!
//! ## Type Categories
//!
//! | Category | Types |
//! |----------|-------|
//! | **Scalar** | bool, bigint, double, varchar, date, timestamp |
//! | **Nested** | list, struct, map, union |
//!
//! Date values are days since the Unix epoch (i32); timestamps are
//! microseconds since the Unix epoch (i64).
//!
//! ## Widening Lattice
//!
//! Schema detection narrows a running type per column by unioning the types
//! of observed values:
//!
//! ```text
//! null ≺ bool | bigint | varchar
//! bigint ≺ double
//! list/struct union element-wise / field-wise
//! any other conflict widens to varchar
//! ```
//!
//! ## Serialization
//!
//! Types serialize to a compact tag-prefixed binary form so that scan bind
//! data can round-trip through plan caching.

use eyre::{bail, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Null,
    Bool,
    BigInt,
    Double,
    Varchar,
    Date,
    Timestamp,
    List(Box<DataType>),
    Struct(Vec<(String, DataType)>),
    Map(Box<DataType>, Box<DataType>),
    Union(Vec<(String, DataType)>),
}

impl DataType {
    /// Whether a column of this type can be updated in place. Lists, maps,
    /// unions, and structs transitively containing one require rewriting the
    /// row as a delete followed by an insert.
    pub fn supports_regular_update(&self) -> bool {
        match self {
            DataType::List(_) | DataType::Map(_, _) | DataType::Union(_) => false,
            DataType::Struct(fields) => fields
                .iter()
                .all(|(_, child)| child.supports_regular_update()),
            _ => true,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            DataType::List(_) | DataType::Struct(_) | DataType::Map(_, _) | DataType::Union(_)
        )
    }

    /// Union two observed types into the narrowest type that can represent
    /// both. Used by schema detection to narrow a running column type.
    pub fn widen(&self, other: &DataType) -> DataType {
        use DataType::*;
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (Null, t) | (t, Null) => t.clone(),
            (BigInt, Double) | (Double, BigInt) => Double,
            (List(a), List(b)) => List(Box::new(a.widen(b))),
            (Struct(a), Struct(b)) => {
                let mut fields: Vec<(String, DataType)> = a.clone();
                for (name, ty) in b {
                    match fields.iter_mut().find(|(n, _)| n == name) {
                        Some((_, existing)) => *existing = existing.widen(ty),
                        None => fields.push((name.clone(), ty.clone())),
                    }
                }
                Struct(fields)
            }
            _ => Varchar,
        }
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            DataType::Null => buf.push(0),
            DataType::Bool => buf.push(1),
            DataType::BigInt => buf.push(2),
            DataType::Double => buf.push(3),
            DataType::Varchar => buf.push(4),
            DataType::Date => buf.push(5),
            DataType::Timestamp => buf.push(6),
            DataType::List(child) => {
                buf.push(7);
                child.serialize(buf);
            }
            DataType::Struct(fields) => {
                buf.push(8);
                serialize_fields(fields, buf);
            }
            DataType::Map(key, value) => {
                buf.push(9);
                key.serialize(buf);
                value.serialize(buf);
            }
            DataType::Union(members) => {
                buf.push(10);
                serialize_fields(members, buf);
            }
        }
    }

    pub fn deserialize(bytes: &[u8], pos: &mut usize) -> Result<DataType> {
        let tag = read_u8(bytes, pos)?;
        Ok(match tag {
            0 => DataType::Null,
            1 => DataType::Bool,
            2 => DataType::BigInt,
            3 => DataType::Double,
            4 => DataType::Varchar,
            5 => DataType::Date,
            6 => DataType::Timestamp,
            7 => DataType::List(Box::new(DataType::deserialize(bytes, pos)?)),
            8 => DataType::Struct(deserialize_fields(bytes, pos)?),
            9 => {
                let key = DataType::deserialize(bytes, pos)?;
                let value = DataType::deserialize(bytes, pos)?;
                DataType::Map(Box::new(key), Box::new(value))
            }
            10 => DataType::Union(deserialize_fields(bytes, pos)?),
            other => bail!("unknown data type tag {} at offset {}", other, *pos - 1),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "null"),
            DataType::Bool => write!(f, "boolean"),
            DataType::BigInt => write!(f, "bigint"),
            DataType::Double => write!(f, "double"),
            DataType::Varchar => write!(f, "varchar"),
            DataType::Date => write!(f, "date"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::List(child) => write!(f, "list<{}>", child),
            DataType::Struct(fields) => {
                write!(f, "struct<")?;
                for (idx, (name, ty)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, ">")
            }
            DataType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            DataType::Union(members) => {
                write!(f, "union<")?;
                for (idx, (name, ty)) in members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// An owned scalar used by bound literal expressions in the planner.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Varchar(String),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Bool(_) => DataType::Bool,
            ScalarValue::Int(_) => DataType::BigInt,
            ScalarValue::Double(_) => DataType::Double,
            ScalarValue::Varchar(_) => DataType::Varchar,
        }
    }
}

fn serialize_fields(fields: &[(String, DataType)], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for (name, ty) in fields {
        write_str(name, buf);
        ty.serialize(buf);
    }
}

fn deserialize_fields(bytes: &[u8], pos: &mut usize) -> Result<Vec<(String, DataType)>> {
    let count = read_u32(bytes, pos)? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_str(bytes, pos)?;
        let ty = DataType::deserialize(bytes, pos)?;
        fields.push((name, ty));
    }
    Ok(fields)
}

pub(crate) fn write_str(s: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn read_str(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_u32(bytes, pos)? as usize;
    if *pos + len > bytes.len() {
        bail!("truncated string at offset {}", *pos);
    }
    let s = std::str::from_utf8(&bytes[*pos..*pos + len])
        .map_err(|_| eyre::eyre!("invalid utf-8 string at offset {}", *pos))?
        .to_string();
    *pos += len;
    Ok(s)
}

pub(crate) fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    if *pos >= bytes.len() {
        bail!("unexpected end of input at offset {}", *pos);
    }
    let v = bytes[*pos];
    *pos += 1;
    Ok(v)
}

pub(crate) fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > bytes.len() {
        bail!("unexpected end of input at offset {}", *pos);
    }
    let v = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

pub(crate) fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    if *pos + 8 > bytes.len() {
        bail!("unexpected end of input at offset {}", *pos);
    }
    let v = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}
