//! Line splitting: label / opcode / operand field / remarks, and operand
//! shaping according to the opcode form.

use crate::expr::{ExprParser, Cursor};
use crate::{err, Location, ParseResult};
use hlasm_semantics::diagnostic::{Position, Range};
use hlasm_semantics::ids::IdStorage;
use hlasm_semantics::inst::{self, OpcodeEntry};
use hlasm_semantics::processing::{Label, MachOperand, OpCode, Operand, Statement};

/// Parse one source line. Returns `None` for blank and comment lines.
pub fn parse_line(
    line: &str,
    line_no: u32,
    ids: &mut IdStorage,
) -> ParseResult<Option<Statement>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    if line.starts_with('*') || line.starts_with(".*") {
        return Ok(None);
    }
    let loc = Location {
        line_number: line_no as usize + 1,
    };

    let chars: Vec<char> = line.chars().collect();
    let mut col = 0usize;

    // Label: anything starting in column 1.
    let label = if !chars[0].is_whitespace() {
        let start = col;
        while col < chars.len() && !chars[col].is_whitespace() {
            col += 1;
        }
        let text: String = chars[start..col].iter().collect();
        if text.starts_with('.') {
            // Sequence symbols have no place in the ordinary symbol table.
            None
        } else {
            Some((ids.add(&text), Range::on_line(line_no, start as u32, col as u32)))
        }
    } else {
        None
    };

    while col < chars.len() && chars[col].is_whitespace() {
        col += 1;
    }
    if col == chars.len() {
        // A label with no opcode is not a statement this reader accepts.
        return match label {
            Some(_) => err!(loc, "label without an operation code"),
            None => Ok(None),
        };
    }

    // Opcode.
    let opcode_start = col;
    while col < chars.len() && !chars[col].is_whitespace() {
        col += 1;
    }
    let opcode_text: String = chars[opcode_start..col].iter().collect();
    let opcode_range = Range::on_line(line_no, opcode_start as u32, col as u32);
    let opcode = resolve_opcode(&opcode_text, ids);

    while col < chars.len() && chars[col].is_whitespace() {
        col += 1;
    }

    // Operand field: up to the first blank outside quotes and parens.
    let operand_start = col;
    let mut depth = 0i32;
    while col < chars.len() {
        let c = chars[col];
        if c == '\'' && !is_attribute_quote(&chars, col) {
            col += 1;
            while col < chars.len() {
                if chars[col] == '\'' {
                    if col + 1 < chars.len() && chars[col + 1] == '\'' {
                        col += 2;
                        continue;
                    }
                    break;
                }
                col += 1;
            }
            if col == chars.len() {
                return err!(loc, "unterminated string");
            }
        } else if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth -= 1;
        } else if c.is_whitespace() && depth == 0 {
            break;
        }
        col += 1;
    }
    let operand_end = col;

    while col < chars.len() && chars[col].is_whitespace() {
        col += 1;
    }
    let remark = if col < chars.len() {
        Some(Range::on_line(line_no, col as u32, chars.len() as u32))
    } else {
        None
    };

    let operand_text = &chars[operand_start..operand_end];
    let operands = shape_operands(
        operand_text,
        line_no,
        operand_start as u32,
        &opcode,
        ids,
        loc,
    )?;

    let statement_range = Range::new(
        Position::new(line_no, 0),
        Position::new(line_no, chars.len() as u32),
    );

    Ok(Some(Statement {
        label: label.map(|(name, range)| Label { name, range }),
        opcode: Some((opcode, opcode_range)),
        operands,
        remark,
        range: statement_range,
    }))
}

fn resolve_opcode(text: &str, ids: &mut IdStorage) -> OpCode {
    let folded = text.to_ascii_uppercase();
    match inst::find_opcode(&folded) {
        Some(OpcodeEntry::Machine(m)) => OpCode::Machine(m),
        Some(OpcodeEntry::Mnemonic(m)) => OpCode::Mnemonic(m),
        Some(OpcodeEntry::Assembler(a)) => OpCode::Assembler(a),
        Some(OpcodeEntry::Ca(c)) => OpCode::Ca(c),
        None => OpCode::Unknown(ids.add(&folded)),
    }
}

/// Is the quote at `pos` the apostrophe of an attribute reference such as
/// `L'SYMBOL`? True when preceded by a lone attribute letter.
fn is_attribute_quote(chars: &[char], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    let prev = chars[pos - 1].to_ascii_uppercase();
    if !"LTSIKNDO".contains(prev) {
        return false;
    }
    // The letter must not be the tail of a longer name.
    if pos >= 2 {
        let before = chars[pos - 2];
        if before.is_alphanumeric() || before == '_' || before == '@' || before == '#' || before == '$'
        {
            return false;
        }
    }
    // ...and something must follow the quote (else it opens a string).
    pos + 1 < chars.len() && chars[pos + 1] != ','
}

/// Split the operand field on top-level commas, respecting quotes and
/// parentheses. Returns (start, end) spans.
fn split_operands(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' && !is_attribute_quote(chars, i) {
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if i + 1 < chars.len() && chars[i + 1] == '\'' {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
        } else if c == '\'' {
            // Attribute quote: consume it and continue with the operand.
        } else if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth -= 1;
        } else if c == ',' && depth == 0 {
            spans.push((start, i));
            start = i + 1;
        }
        i += 1;
    }
    spans.push((start, chars.len()));
    spans
}

fn shape_operands(
    chars: &[char],
    line_no: u32,
    field_col: u32,
    opcode: &OpCode,
    ids: &mut IdStorage,
    loc: Location,
) -> ParseResult<Vec<Operand>> {
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let mut operands = Vec::new();
    for (start, end) in split_operands(chars) {
        let text = &chars[start..end];
        let range = Range::on_line(line_no, field_col + start as u32, field_col + end as u32);
        if text.is_empty() {
            operands.push(Operand::Empty { range });
            continue;
        }
        let abs_col = field_col + start as u32;

        let operand = match opcode {
            OpCode::Machine(_) | OpCode::Mnemonic(_) => {
                parse_mach_operand(text, line_no, abs_col, ids, loc)?
            }
            OpCode::Assembler(asm) => match asm.name {
                "DC" | "DS" => {
                    let mut cursor = Cursor::new(text, line_no, abs_col, loc);
                    let mut parser = ExprParser::new(ids);
                    let dd = parser.parse_data_definition(&mut cursor)?;
                    cursor.expect_end()?;
                    Operand::Data { dd, range }
                }
                "USING" if text.first() == Some(&'(') && has_top_level_comma(text) => {
                    parse_pair(text, line_no, abs_col, ids, loc)?
                }
                _ => {
                    let mut cursor = Cursor::new(text, line_no, abs_col, loc);
                    let mut parser = ExprParser::new(ids);
                    let expr = parser.parse_expr(&mut cursor)?;
                    cursor.expect_end()?;
                    Operand::Expr { expr, range }
                }
            },
            OpCode::Ca(_) | OpCode::Macro(_) | OpCode::Unknown(_) => Operand::Empty { range },
        };
        operands.push(operand);
    }

    // A single empty operand is the same as no operands at all (e.g. a
    // plain `END`).
    if operands.len() == 1 {
        if let Operand::Empty { .. } = operands[0] {
            if chars.iter().all(|c| c.is_whitespace()) {
                return Ok(Vec::new());
            }
        }
    }

    Ok(operands)
}

fn has_top_level_comma(chars: &[char]) -> bool {
    debug_assert_eq!(chars.first(), Some(&'('));
    let mut depth = 0i32;
    for &c in chars {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 1 => return true,
            _ => {}
        }
    }
    false
}

/// `(begin,end)` of a USING range.
fn parse_pair(
    chars: &[char],
    line_no: u32,
    col: u32,
    ids: &mut IdStorage,
    loc: Location,
) -> ParseResult<Operand> {
    debug_assert_eq!(chars.first(), Some(&'('));
    let inner = &chars[1..chars.len().saturating_sub(1)];
    if chars.last() != Some(&')') {
        return err!(loc, "unbalanced parentheses in operand");
    }

    let mut depth = 0i32;
    let mut split = None;
    for (i, &c) in inner.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let Some(split) = split else {
        return err!(loc, "expected (begin,end) pair");
    };

    let mut parser = ExprParser::new(ids);
    let mut first_cursor = Cursor::new(&inner[..split], line_no, col + 1, loc);
    let first = parser.parse_expr(&mut first_cursor)?;
    first_cursor.expect_end()?;

    let second_col = col + 1 + split as u32 + 1;
    let mut second_cursor = Cursor::new(&inner[split + 1..], line_no, second_col, loc);
    let second = parser.parse_expr(&mut second_cursor)?;
    second_cursor.expect_end()?;

    Ok(Operand::Pair {
        first,
        second,
        range: Range::on_line(line_no, col, col + chars.len() as u32),
    })
}

/// `D`, `D(B)`, or `D(X,B)`.
fn parse_mach_operand(
    chars: &[char],
    line_no: u32,
    col: u32,
    ids: &mut IdStorage,
    loc: Location,
) -> ParseResult<Operand> {
    let range = Range::on_line(line_no, col, col + chars.len() as u32);
    let mut cursor = Cursor::new(chars, line_no, col, loc);
    let mut parser = ExprParser::new(ids);
    let displacement = parser.parse_expr(&mut cursor)?;

    let mut index = None;
    let mut base = None;
    if cursor.peek() == Some('(') {
        cursor.bump();
        let first = if cursor.peek() == Some(',') {
            None
        } else {
            Some(parser.parse_expr(&mut cursor)?)
        };
        if cursor.peek() == Some(',') {
            cursor.bump();
            index = first;
            base = Some(parser.parse_expr(&mut cursor)?);
        } else {
            base = first;
        }
        if cursor.peek() != Some(')') {
            return err!(loc, "expected ')' in machine operand");
        }
        cursor.bump();
    }
    cursor.expect_end()?;

    Ok(Operand::Mach(MachOperand {
        displacement,
        index,
        base,
        range,
    }))
}
