//! Semantic analysis core for High Level Assembler (HLASM) programs.
//!
//! Given already-parsed statements, this crate resolves ordinary symbols,
//! evaluates machine expressions, lays sections out (including ORG and
//! multiple location counters), maintains the USING base-register map, and
//! reports diagnostics. The hard parts of HLASM live here: forward
//! references with attribute dependencies, location counters with
//! unresolved layout spaces, and displacement resolution.
//!
//! The main entry point is [`processing::Analyzer`]: feed it statements,
//! drive it with [`processing::Analyzer::idle`], then inspect the symbol
//! table, diagnostics, and front-end queries.
//!
//! Lexing/parsing, the LSP transport, and macro expansion are out of
//! scope; the companion `hlasm-reader` crate provides a statement reader
//! for tests and tools.

#![warn(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub use hlasm_entity as entity;

pub mod checking;
pub mod context;
pub mod diagnostic;
pub mod expr;
pub mod ids;
pub mod inst;
pub mod processing;

mod fx;
mod queries;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
