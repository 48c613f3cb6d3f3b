//! Textual statement reader for the HLASM semantic core.
//!
//! This is the crate the integration tests and command-line tools drive
//! the analyzer with. It reads the free-form statement subset the core's
//! test programs use — label / opcode / operands / remarks, expressions
//! with self-defining terms, attribute references and literals, and DC/DS
//! data definitions. It is intentionally not the production parser: no
//! continuation lines, no macro definition bodies, no conditional
//! assembly evaluation.

#![warn(missing_docs, trivial_numeric_casts, unused_extern_crates)]

mod expr;
mod stmt;

use hlasm_semantics::ids::IdStorage;
use hlasm_semantics::processing::{Analyzer, Statement};
use std::fmt;

/// The line an error was found on (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// 1-based source line number.
    pub line_number: usize,
}

/// A parse error with its location.
#[derive(Debug)]
pub struct ParseError {
    /// Location of the error.
    pub location: Location,
    /// Error message.
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location.line_number, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Result of a reader operation.
pub type ParseResult<T> = Result<T, ParseError>;

// Create an `Err` variant of `ParseResult<X>` from a location and
// `format!` arguments.
macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::ParseError {
            location: $loc,
            message: $msg.to_string(),
        })
    };
    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::ParseError {
            location: $loc,
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}
pub(crate) use err;

/// Parse a whole source text into statements, interning names into `ids`.
pub fn parse_program(source: &str, ids: &mut IdStorage) -> ParseResult<Vec<Statement>> {
    let mut statements = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        if let Some(stmt) = stmt::parse_line(line, idx as u32, ids)? {
            statements.push(stmt);
        }
    }
    Ok(statements)
}

/// Parse and fully analyze a source text; the common test entry point.
pub fn analyze(source: &str) -> ParseResult<Analyzer> {
    let mut analyzer = Analyzer::new();
    let statements = parse_program(source, &mut analyzer.ctx.ord.ids)?;
    analyzer.append(statements);
    analyzer.analyze();
    Ok(analyzer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let a = analyze(
            "\
TEST  CSECT
      LR    1,2
",
        )
        .unwrap();
        assert!(a.diags.is_empty(), "{:?}", a.diags.codes());
        let test = a.ctx.ord.ids.find("TEST").unwrap();
        assert!(a.ctx.ord.get_symbol(test).is_some());
    }
}
