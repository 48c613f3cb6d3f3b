//! Diagnostics and source positions.
//!
//! The core never aborts on an error; every problem becomes a
//! [`Diagnostic`] pushed into a [`DiagnosticConsumer`]. The factory
//! functions below carry the code families described in the project
//! documentation: `ME*` expression errors, `E*` symbol errors, `M*`
//! operand-shape errors, `D*` data-definition errors, `U*` USING errors
//! and `A*` assembler-statement errors.

use std::fmt;

/// A zero-based line/column position.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open source range `[start, end)`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A range spanning `[start_col, end_col)` on a single line.
    pub fn on_line(line: u32, start_col: u32, end_col: u32) -> Self {
        Self {
            start: Position::new(line, start_col),
            end: Position::new(line, end_col),
        }
    }

    /// Does this range contain the position?
    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }

    /// The smallest range covering both `self` and `other`.
    pub fn union(&self, other: Range) -> Range {
        Range {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// Diagnostic severity, in decreasing order of importance.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// Additional location/text pairs attached to a diagnostic.
#[derive(Clone, Debug)]
pub struct RelatedInfo {
    pub range: Range,
    pub message: String,
}

/// A single reported problem.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub code: &'static str,
    pub severity: Severity,
    pub range: Range,
    pub message: String,
    pub related: Vec<RelatedInfo>,
}

impl Diagnostic {
    pub fn error(code: &'static str, range: Range, message: String) -> Self {
        Self {
            code,
            severity: Severity::Error,
            range,
            message,
            related: Vec::new(),
        }
    }

    pub fn warning(code: &'static str, range: Range, message: String) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            range,
            message,
            related: Vec::new(),
        }
    }

    /// Attach a related location to this diagnostic.
    pub fn with_related(mut self, range: Range, message: impl Into<String>) -> Self {
        self.related.push(RelatedInfo {
            range,
            message: message.into(),
        });
        self
    }
}

/// Sink for diagnostics produced during analysis.
pub trait DiagnosticConsumer {
    fn add(&mut self, diagnostic: Diagnostic);
}

/// The standard collecting sink.
#[derive(Default)]
pub struct CollectedDiagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.diagnostics.iter().map(|d| d.code).collect()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl DiagnosticConsumer for CollectedDiagnostics {
    fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// A sink that drops everything; used where the caller only cares about
/// the returned value.
pub struct DropDiagnostics;

impl DiagnosticConsumer for DropDiagnostics {
    fn add(&mut self, diagnostic: Diagnostic) {
        log::trace!("dropped diagnostic {}: {}", diagnostic.code, diagnostic.message);
    }
}

// ---------------------------------------------------------------------
// Expression errors (ME family).

pub fn error_me001(range: Range) -> Diagnostic {
    Diagnostic::error("ME001", range, "Constant out of range".into())
}

pub fn error_me002(range: Range) -> Diagnostic {
    Diagnostic::error(
        "ME002",
        range,
        "Relocatable value used in multiplication or division".into(),
    )
}

pub fn error_me003(range: Range) -> Diagnostic {
    Diagnostic::error(
        "ME003",
        range,
        "Relative immediate target is not halfword aligned".into(),
    )
}

pub fn error_me004(range: Range) -> Diagnostic {
    Diagnostic::error(
        "ME004",
        range,
        "USING label cannot qualify an absolute value".into(),
    )
}

pub fn error_me005(range: Range, label: &str) -> Diagnostic {
    Diagnostic::error(
        "ME005",
        range,
        format!("There is no USING active with the label {label}"),
    )
}

pub fn error_me007(range: Range) -> Diagnostic {
    Diagnostic::error(
        "ME007",
        range,
        "Relocatable address with no active USING covering it".into(),
    )
}

pub fn error_me008(range: Range, distance: i32) -> Diagnostic {
    Diagnostic::error(
        "ME008",
        range,
        format!("Displacement out of range by {distance} bytes"),
    )
}

pub fn error_me010(range: Range) -> Diagnostic {
    Diagnostic::error("ME010", range, "Absolute value expected".into())
}

pub fn error_me011(range: Range) -> Diagnostic {
    Diagnostic::error(
        "ME011",
        range,
        "Relocatable displacement cannot be combined with an explicit base register".into(),
    )
}

// ---------------------------------------------------------------------
// Symbol errors (E family).

pub fn error_e010(kind: &str, name: &str, range: Range) -> Diagnostic {
    Diagnostic::error("E010", range, format!("Undefined {kind}: {name}"))
}

pub fn error_e016(range: Range) -> Diagnostic {
    Diagnostic::error("E016", range, "Unresolved dependencies".into())
}

pub fn error_e031(name: &str, range: Range) -> Diagnostic {
    Diagnostic::error("E031", range, format!("Symbol {name} is already defined"))
}

pub fn error_e033(range: Range) -> Diagnostic {
    Diagnostic::error("E033", range, "Cyclic symbol definition".into())
}

// ---------------------------------------------------------------------
// Operand shape errors (M family) and the internal fallback.

pub fn error_m003(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M003",
        range,
        format!("Operand of {instr} is missing or malformed"),
    )
}

pub fn error_m104(instr: &str, min: usize, max: usize, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M104",
        range,
        format!("{instr} expects between {min} and {max} operands"),
    )
}

pub fn error_m110(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error("M110", range, format!("{instr}: register operand expected"))
}

pub fn error_m111(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error("M111", range, format!("{instr}: mask operand expected"))
}

pub fn error_m112(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M112",
        range,
        format!("{instr}: immediate operand expected"),
    )
}

pub fn error_m113(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M113",
        range,
        format!("{instr}: relocatable or absolute expression expected"),
    )
}

pub fn error_m114(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M114",
        range,
        format!("{instr}: vector register operand expected"),
    )
}

pub fn error_m120(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M120",
        range,
        format!("{instr}: base or index register must be an absolute value in 0 through 15"),
    )
}

pub fn error_m131(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M131",
        range,
        format!("{instr}: register value violates the required even-odd parity"),
    )
}

pub fn error_m135(instr: &str, low: i64, high: i64, range: Range) -> Diagnostic {
    Diagnostic::error(
        "M135",
        range,
        format!("{instr}: operand value must be between {low} and {high}"),
    )
}

pub fn error_i999(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "I999",
        range,
        format!("Unexpected operand configuration for {instr}"),
    )
}

// ---------------------------------------------------------------------
// Data-definition errors (D family).

pub fn error_d007(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D007",
        range,
        format!("Bit-length modifier not allowed with type {type_str}"),
    )
}

pub fn error_d008(range: Range, type_str: &str, min: u32, max: u32) -> Diagnostic {
    Diagnostic::error(
        "D008",
        range,
        format!("Length of type {type_str} must be between {min} and {max}"),
    )
}

pub fn error_d009(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D009",
        range,
        format!("Scale modifier not allowed with type {type_str}"),
    )
}

pub fn error_d011(range: Range) -> Diagnostic {
    Diagnostic::error(
        "D011",
        range,
        "Duplication factor must be non-negative".into(),
    )
}

pub fn error_d012(range: Range, type_char: char) -> Diagnostic {
    Diagnostic::error("D012", range, format!("Unknown data definition type {type_char}"))
}

pub fn error_d013(range: Range, type_char: char, extension: char) -> Diagnostic {
    Diagnostic::error(
        "D013",
        range,
        format!("Unknown type extension {extension} for type {type_char}"),
    )
}

pub fn error_d014(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D014",
        range,
        format!("Length of type {type_str} must be even"),
    )
}

pub fn error_d016(range: Range) -> Diagnostic {
    Diagnostic::error("D016", range, "DC operand requires a nominal value".into())
}

pub fn error_d017(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D017",
        range,
        format!("Type {type_str} requires an expression nominal value, not a string"),
    )
}

pub fn error_d018(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D018",
        range,
        format!("Type {type_str} requires a string nominal value, not expressions"),
    )
}

pub fn error_d020(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D020",
        range,
        format!("Address nominal D(B) not allowed with type {type_str}"),
    )
}

pub fn error_d021(range: Range) -> Diagnostic {
    Diagnostic::error(
        "D021",
        range,
        "Length of an R-type constant must be 3 or 4".into(),
    )
}

pub fn error_d022(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D022",
        range,
        format!("Displacement of type {type_str} nominal out of range"),
    )
}

pub fn error_d023(range: Range) -> Diagnostic {
    Diagnostic::error(
        "D023",
        range,
        "Base register of an S-type nominal must be between 0 and 15".into(),
    )
}

pub fn error_d024(range: Range) -> Diagnostic {
    Diagnostic::error(
        "D024",
        range,
        "Length of a J-type constant must be 2, 4, 8 or 16".into(),
    )
}

pub fn warn_d025(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::warning(
        "D025",
        range,
        format!("Scale modifier of type {type_str} is ignored"),
    )
}

pub fn error_d026(range: Range, type_str: &str) -> Diagnostic {
    Diagnostic::error(
        "D026",
        range,
        format!("Invalid rounding mode for type {type_str}"),
    )
}

pub fn error_d030(range: Range) -> Diagnostic {
    Diagnostic::error(
        "D030",
        range,
        "Nominal value of a V-type constant must be a single symbol".into(),
    )
}

pub fn warn_d031(range: Range, value: &str) -> Diagnostic {
    Diagnostic::warning(
        "D031",
        range,
        format!("Absolute value {value} used as a relative immediate target"),
    )
}

// ---------------------------------------------------------------------
// USING / DROP errors (U family).

pub fn warn_u001(range: Range, what: &str) -> Diagnostic {
    Diagnostic::warning("U001", range, format!("DROP of {what} had no effect"))
}

pub fn error_u002(range: Range) -> Diagnostic {
    Diagnostic::error("U002", range, "Qualified label not allowed here".into())
}

pub fn error_u003(range: Range) -> Diagnostic {
    Diagnostic::error(
        "U003",
        range,
        "DROP operand must be a register or a USING label".into(),
    )
}

pub fn error_u004(range: Range) -> Diagnostic {
    Diagnostic::error("U004", range, "No active USING covers the base address".into())
}

pub fn error_u005(begin: Range, end: Range) -> Diagnostic {
    Diagnostic::error(
        "U005",
        begin,
        "Invalid USING range; end must follow begin within the same section".into(),
    )
    .with_related(end, "end of range specified here")
}

pub fn error_u006(range: Range) -> Diagnostic {
    Diagnostic::error("U006", range, "Duplicate base register specified".into())
}

// ---------------------------------------------------------------------
// Assembler-statement errors (A family).

pub fn error_a012(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "A012",
        range,
        format!("Wrong number of operands for {instr}"),
    )
}

pub fn error_a104(instr: &str, range: Range) -> Diagnostic {
    Diagnostic::error("A104", range, format!("Invalid operand of {instr}"))
}

pub fn error_a164(range: Range) -> Diagnostic {
    Diagnostic::error(
        "A164",
        range,
        "EQU attribute operand must be an absolute value".into(),
    )
}

pub fn error_a165(name: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        "A165",
        range,
        format!("Section {name} already exists with a different kind"),
    )
}

pub fn error_a251(range: Range) -> Diagnostic {
    Diagnostic::error(
        "A251",
        range,
        "ORG target is not a valid location in the current location counter".into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_contains() {
        let r = Range::on_line(2, 4, 9);
        assert!(r.contains(Position::new(2, 4)));
        assert!(r.contains(Position::new(2, 8)));
        assert!(!r.contains(Position::new(2, 9)));
        assert!(!r.contains(Position::new(1, 5)));
    }

    #[test]
    fn collect_and_query() {
        let mut sink = CollectedDiagnostics::new();
        sink.add(error_me008(Range::default(), 16));
        sink.add(warn_u001(Range::default(), "12"));
        assert_eq!(sink.codes(), ["ME008", "U001"]);
        assert!(sink.has_errors());
    }
}
