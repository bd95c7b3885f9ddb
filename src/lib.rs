//! # PikeDB - Embedded Analytical Database Engine
//!
//! PikeDB is an embedded analytical engine built around two subsystems:
//!
//! - A **parallel JSON table scan** that ingests newline-delimited or
//!   array-framed JSON from one or more files (optionally gzip/zstd
//!   compressed), auto-detects a schema from a bounded sample, and produces
//!   column-oriented record batches in a stable order under parallel
//!   dispatch.
//! - The **UPDATE binding pass** of the planner, which rewrites an UPDATE
//!   statement into a scan/projection/update pipeline while honoring CHECK
//!   constraints, indexes, RETURNING, and non-updatable column types.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   SQL Layer (AST / UPDATE Binder)   │
//! ├─────────────────────────────────────┤
//! │        Schema & Catalog             │
//! ├─────────────────────────────────────┤
//! │   JSON Scan (readers / detection /  │
//! │    parallel states / transform)     │
//! ├─────────────────────────────────────┤
//! │      Logical Type System            │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use pikedb::scan::{JsonBindInput, JsonScanBindData, scan_to_chunks};
//! use std::sync::Arc;
//!
//! let bind = Arc::new(JsonScanBindData::bind(JsonBindInput {
//!     filename: vec!["data/*.json".to_string()],
//!     ..Default::default()
//! })?);
//! for chunk in scan_to_chunks(&bind)? {
//!     println!("{} rows in batch {}", chunk.count, chunk.batch_index);
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`scan`]: the parallel JSON table scan
//! - [`sql`]: expression AST and the UPDATE binder
//! - [`schema`]: tables, constraints, indexes, catalog
//! - [`types`]: logical types and the detection lattice

pub mod scan;
pub mod schema;
pub mod sql;
pub mod types;

pub use types::DataType;
