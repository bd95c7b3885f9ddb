//! # Parsed Expression AST
//!
//! Arena-allocated parse-tree types consumed by the planner. All nodes are
//! allocated in a `bumpalo` arena; identifiers and literals borrow from the
//! arena for zero-copy handling.
//!
//! ## Expression Types
//!
//! - **Literals**: NULL, booleans, integers, doubles, strings
//! - **References**: optionally table-qualified column references
//! - **Operations**: binary and unary operators
//! - **Between**: the three-child range predicate `input BETWEEN lower AND
//!   upper`, with string formatting, binary serialization, and structural
//!   equality
//! - **Function calls** and **casts**
//! - **Default**: the DEFAULT sentinel valid only as an UPDATE assignment
//!
//! ## Serialization
//!
//! Expressions serialize to a compact tag-prefixed binary form and
//! deserialize back into a caller-provided arena, so parse trees can travel
//! with cached plans.

use crate::types::{self, DataType};
use bumpalo::Bump;
use eyre::{bail, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef<'a> {
    pub table: Option<&'a str>,
    pub column: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<'a> {
    Literal(Literal<'a>),
    Column(ColumnRef<'a>),
    BinaryOp {
        left: &'a Expr<'a>,
        op: BinaryOperator,
        right: &'a Expr<'a>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: &'a Expr<'a>,
    },
    Between {
        input: &'a Expr<'a>,
        lower: &'a Expr<'a>,
        upper: &'a Expr<'a>,
        negated: bool,
    },
    Function {
        name: &'a str,
        args: &'a [&'a Expr<'a>],
    },
    Cast {
        expr: &'a Expr<'a>,
        target: DataType,
    },
    /// The DEFAULT sentinel, valid only as an UPDATE assignment value.
    Default,
}

impl<'a> Expr<'a> {
    pub fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            Expr::Literal(Literal::Null) => buf.push(0),
            Expr::Literal(Literal::Bool(b)) => {
                buf.push(1);
                buf.push(*b as u8);
            }
            Expr::Literal(Literal::Int(v)) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Expr::Literal(Literal::Double(v)) => {
                buf.push(3);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Expr::Literal(Literal::String(s)) => {
                buf.push(4);
                types::write_str(s, buf);
            }
            Expr::Column(col) => {
                buf.push(5);
                match col.table {
                    Some(table) => {
                        buf.push(1);
                        types::write_str(table, buf);
                    }
                    None => buf.push(0),
                }
                types::write_str(col.column, buf);
            }
            Expr::BinaryOp { left, op, right } => {
                buf.push(6);
                buf.push(*op as u8);
                left.serialize(buf);
                right.serialize(buf);
            }
            Expr::UnaryOp { op, expr } => {
                buf.push(7);
                buf.push(*op as u8);
                expr.serialize(buf);
            }
            Expr::Between {
                input,
                lower,
                upper,
                negated,
            } => {
                buf.push(8);
                buf.push(*negated as u8);
                input.serialize(buf);
                lower.serialize(buf);
                upper.serialize(buf);
            }
            Expr::Function { name, args } => {
                buf.push(9);
                types::write_str(name, buf);
                buf.extend_from_slice(&(args.len() as u32).to_le_bytes());
                for arg in args.iter() {
                    arg.serialize(buf);
                }
            }
            Expr::Cast { expr, target } => {
                buf.push(10);
                target.serialize(buf);
                expr.serialize(buf);
            }
            Expr::Default => buf.push(11),
        }
    }

    /// Deserialize an expression into the given arena.
    pub fn deserialize(arena: &'a Bump, bytes: &[u8], pos: &mut usize) -> Result<&'a Expr<'a>> {
        let tag = types::read_u8(bytes, pos)?;
        let expr = match tag {
            0 => Expr::Literal(Literal::Null),
            1 => Expr::Literal(Literal::Bool(types::read_u8(bytes, pos)? != 0)),
            2 => {
                let mut raw = [0u8; 8];
                read_exact(bytes, pos, &mut raw)?;
                Expr::Literal(Literal::Int(i64::from_le_bytes(raw)))
            }
            3 => {
                let mut raw = [0u8; 8];
                read_exact(bytes, pos, &mut raw)?;
                Expr::Literal(Literal::Double(f64::from_le_bytes(raw)))
            }
            4 => {
                let s = types::read_str(bytes, pos)?;
                Expr::Literal(Literal::String(arena.alloc_str(&s)))
            }
            5 => {
                let has_table = types::read_u8(bytes, pos)? != 0;
                let table = if has_table {
                    let t = types::read_str(bytes, pos)?;
                    Some(&*arena.alloc_str(&t))
                } else {
                    None
                };
                let column = types::read_str(bytes, pos)?;
                Expr::Column(ColumnRef {
                    table,
                    column: arena.alloc_str(&column),
                })
            }
            6 => {
                let op = binary_operator_from_u8(types::read_u8(bytes, pos)?)?;
                let left = Expr::deserialize(arena, bytes, pos)?;
                let right = Expr::deserialize(arena, bytes, pos)?;
                Expr::BinaryOp { left, op, right }
            }
            7 => {
                let op = match types::read_u8(bytes, pos)? {
                    0 => UnaryOperator::Negate,
                    1 => UnaryOperator::Not,
                    other => bail!("unknown unary operator tag {}", other),
                };
                let expr = Expr::deserialize(arena, bytes, pos)?;
                Expr::UnaryOp { op, expr }
            }
            8 => {
                let negated = types::read_u8(bytes, pos)? != 0;
                let input = Expr::deserialize(arena, bytes, pos)?;
                let lower = Expr::deserialize(arena, bytes, pos)?;
                let upper = Expr::deserialize(arena, bytes, pos)?;
                Expr::Between {
                    input,
                    lower,
                    upper,
                    negated,
                }
            }
            9 => {
                let name = types::read_str(bytes, pos)?;
                let count = types::read_u32(bytes, pos)? as usize;
                let mut args = bumpalo::collections::Vec::with_capacity_in(count, arena);
                for _ in 0..count {
                    args.push(Expr::deserialize(arena, bytes, pos)?);
                }
                Expr::Function {
                    name: arena.alloc_str(&name),
                    args: args.into_bump_slice(),
                }
            }
            10 => {
                let target = DataType::deserialize(bytes, pos)?;
                let expr = Expr::deserialize(arena, bytes, pos)?;
                Expr::Cast { expr, target }
            }
            11 => Expr::Default,
            other => bail!("unknown expression tag {} at offset {}", other, *pos - 1),
        };
        Ok(arena.alloc(expr))
    }
}

fn binary_operator_from_u8(tag: u8) -> Result<BinaryOperator> {
    use BinaryOperator::*;
    Ok(match tag {
        0 => Add,
        1 => Subtract,
        2 => Multiply,
        3 => Divide,
        4 => Modulo,
        5 => Eq,
        6 => NotEq,
        7 => Lt,
        8 => LtEq,
        9 => Gt,
        10 => GtEq,
        11 => And,
        12 => Or,
        13 => Concat,
        other => bail!("unknown binary operator tag {}", other),
    })
}

fn read_exact(bytes: &[u8], pos: &mut usize, out: &mut [u8]) -> Result<()> {
    if *pos + out.len() > bytes.len() {
        bail!("unexpected end of input at offset {}", *pos);
    }
    out.copy_from_slice(&bytes[*pos..*pos + out.len()]);
    *pos += out.len();
    Ok(())
}

impl fmt::Display for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::Null) => write!(f, "NULL"),
            Expr::Literal(Literal::Bool(b)) => {
                write!(f, "{}", if *b { "TRUE" } else { "FALSE" })
            }
            Expr::Literal(Literal::Int(v)) => write!(f, "{}", v),
            Expr::Literal(Literal::Double(v)) => write!(f, "{}", v),
            Expr::Literal(Literal::String(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Column(col) => match col.table {
                Some(table) => write!(f, "{}.{}", table, col.column),
                None => write!(f, "{}", col.column),
            },
            Expr::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::UnaryOp {
                op: UnaryOperator::Negate,
                expr,
            } => write!(f, "(-{})", expr),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => write!(f, "(NOT {})", expr),
            Expr::Between {
                input,
                lower,
                upper,
                negated,
            } => {
                if *negated {
                    write!(f, "({} NOT BETWEEN {} AND {})", input, lower, upper)
                } else {
                    write!(f, "({} BETWEEN {} AND {})", input, lower, upper)
                }
            }
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Cast { expr, target } => write!(f, "CAST({} AS {})", expr, target),
            Expr::Default => write!(f, "DEFAULT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef<'a> {
    pub name: &'a str,
    pub alias: Option<&'a str>,
}

/// The SET clause of an UPDATE: parallel column-name and expression lists.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSetInfo<'a> {
    pub columns: &'a [&'a str],
    pub expressions: &'a [&'a Expr<'a>],
}

#[derive(Debug, Clone, Copy)]
pub enum ReturningItem<'a> {
    Wildcard,
    Expr {
        expr: &'a Expr<'a>,
        alias: Option<&'a str>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateStatement<'a> {
    pub table: TableRef<'a>,
    pub from: Option<TableRef<'a>>,
    pub where_clause: Option<&'a Expr<'a>>,
    pub set_info: UpdateSetInfo<'a>,
    pub returning: Option<&'a [ReturningItem<'a>]>,
}
