//! Expression and data-definition parsing.

use crate::{err, Location, ParseResult};
use hlasm_semantics::context::symbol::DataAttrKind;
use hlasm_semantics::diagnostic::{Position, Range};
use hlasm_semantics::expr::data_def::{DataDefinition, Nominal, NominalItem};
use hlasm_semantics::expr::{
    BinaryOp, DataAttrTarget, LiteralExpr, MachExpr, MachExprKind, UnaryOp,
};
use hlasm_semantics::ids::IdStorage;

/// Character cursor with source positions.
pub struct Cursor<'a> {
    chars: &'a [char],
    pub(crate) pos: usize,
    line: u32,
    col0: u32,
    pub loc: Location,
}

impl<'a> Cursor<'a> {
    pub fn new(chars: &'a [char], line: u32, col0: u32, loc: Location) -> Self {
        Self {
            chars,
            pos: 0,
            line,
            col0,
            loc,
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col0 + self.pos as u32)
    }

    fn range_from(&self, start: Position) -> Range {
        Range::new(start, self.position())
    }

    fn slice_from(&self, start_pos: usize) -> String {
        self.chars[start_pos..self.pos].iter().collect()
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    pub fn expect_end(&self) -> ParseResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            err!(self.loc, "unexpected text in operand: {}", self.rest())
        }
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '@' | '#' | '$' | '_')
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$' | '_')
}

/// Recursive-descent parser over a [`Cursor`].
pub struct ExprParser<'i> {
    ids: &'i mut IdStorage,
}

impl<'i> ExprParser<'i> {
    pub fn new(ids: &'i mut IdStorage) -> Self {
        Self { ids }
    }

    /// `expr := term (('+'|'-') term)*`
    pub fn parse_expr(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let mut lhs = self.parse_term(cursor)?;
        while let Some(op) = cursor.peek() {
            let op = match op {
                '+' => BinaryOp::Add,
                '-' => BinaryOp::Sub,
                _ => break,
            };
            cursor.bump();
            let rhs = self.parse_term(cursor)?;
            let range = cursor.range_from(start);
            lhs = MachExpr::binary(op, lhs, rhs, range);
        }
        Ok(lhs)
    }

    /// `term := unary (('*'|'/') unary)*` — note that `*` is the location
    /// counter when no left operand precedes it, which `parse_unary`
    /// already consumed.
    fn parse_term(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let mut lhs = self.parse_unary(cursor)?;
        while let Some(op) = cursor.peek() {
            let op = match op {
                '*' => BinaryOp::Mul,
                '/' => BinaryOp::Div,
                _ => break,
            };
            cursor.bump();
            let rhs = self.parse_unary(cursor)?;
            let range = cursor.range_from(start);
            lhs = MachExpr::binary(op, lhs, rhs, range);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        match cursor.peek() {
            Some('+') => {
                cursor.bump();
                let child = self.parse_unary(cursor)?;
                Ok(MachExpr::new(
                    MachExprKind::Unary {
                        op: UnaryOp::Plus,
                        child: Box::new(child),
                    },
                    cursor.range_from(start),
                ))
            }
            Some('-') => {
                cursor.bump();
                let child = self.parse_unary(cursor)?;
                Ok(MachExpr::new(
                    MachExprKind::Unary {
                        op: UnaryOp::Minus,
                        child: Box::new(child),
                    },
                    cursor.range_from(start),
                ))
            }
            _ => self.parse_primary(cursor),
        }
    }

    fn parse_primary(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        match cursor.peek() {
            None => err!(cursor.loc, "expression expected"),
            Some('*') => {
                cursor.bump();
                Ok(MachExpr::new(
                    MachExprKind::LocCounter,
                    cursor.range_from(start),
                ))
            }
            Some('(') => {
                cursor.bump();
                let inner = self.parse_expr(cursor)?;
                if cursor.peek() != Some(')') {
                    return err!(cursor.loc, "expected ')'");
                }
                cursor.bump();
                Ok(MachExpr::new(
                    MachExprKind::Unary {
                        op: UnaryOp::Paren,
                        child: Box::new(inner),
                    },
                    cursor.range_from(start),
                ))
            }
            Some('=') => self.parse_literal(cursor),
            Some(c) if c.is_ascii_digit() => self.parse_number(cursor),
            Some(c) if is_symbol_start(c) => self.parse_name_led(cursor),
            Some(c) => err!(cursor.loc, "unexpected character {c:?} in expression"),
        }
    }

    fn parse_number(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let start_pos = cursor.pos;
        while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
            cursor.bump();
        }
        let text = cursor.slice_from(start_pos);
        match text.parse::<i32>() {
            Ok(v) => Ok(MachExpr::constant(v, cursor.range_from(start))),
            Err(_) => err!(cursor.loc, "constant out of range: {text}"),
        }
    }

    /// A name-led term: symbol, qualified symbol, attribute reference, or
    /// self-defining term.
    fn parse_name_led(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let start_pos = cursor.pos;

        // Attribute or self-defining term: a single letter followed by a
        // quote.
        if cursor.peek_at(1) == Some('\'') {
            let letter = cursor.peek().unwrap().to_ascii_uppercase();
            if matches!(letter, 'X' | 'C' | 'B') {
                return self.parse_self_def(cursor);
            }
            if let Some(attr) = DataAttrKind::from_char(letter) {
                return self.parse_data_attr(cursor, attr);
            }
        }

        while matches!(cursor.peek(), Some(c) if is_symbol_char(c)) {
            cursor.bump();
        }
        let name_text = cursor.slice_from(start_pos);
        let name = self.ids.add(&name_text);

        // Qualified reference `label.symbol`.
        if cursor.peek() == Some('.')
            && matches!(cursor.peek_at(1), Some(c) if is_symbol_start(c))
        {
            cursor.bump();
            let sym_start = cursor.pos;
            while matches!(cursor.peek(), Some(c) if is_symbol_char(c)) {
                cursor.bump();
            }
            let sym_text = cursor.slice_from(sym_start);
            let sym = self.ids.add(&sym_text);
            return Ok(MachExpr::new(
                MachExprKind::Symbol {
                    name: sym,
                    qualifier: name,
                },
                cursor.range_from(start),
            ));
        }

        Ok(MachExpr::symbol(name, cursor.range_from(start)))
    }

    /// `X'1F'`, `C'A'`, `B'101'` and plain decimal self-defining terms are
    /// handled in `parse_number`.
    fn parse_self_def(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let base = cursor.bump().unwrap().to_ascii_uppercase();
        debug_assert_eq!(cursor.peek(), Some('\''));
        cursor.bump();

        let body_start = cursor.pos;
        while let Some(c) = cursor.peek() {
            if c == '\'' {
                break;
            }
            cursor.bump();
        }
        if cursor.peek() != Some('\'') {
            return err!(cursor.loc, "unterminated self-defining term");
        }
        let body = cursor.slice_from(body_start);
        cursor.bump();

        let value = match base {
            'X' => i64::from_str_radix(&body, 16).ok(),
            'B' => i64::from_str_radix(&body, 2).ok(),
            'C' => {
                // EBCDIC value of up to four characters.
                let mut v: i64 = 0;
                for c in body.chars() {
                    v = (v << 8) | hlasm_semantics::context::symbol::ebcdic(c) as i64;
                }
                (body.chars().count() <= 4).then_some(v)
            }
            _ => None,
        };
        match value {
            Some(v) if i32::try_from(v).is_ok() || (base != 'C' && v <= u32::MAX as i64) => Ok(
                MachExpr::new(MachExprKind::SelfDef(v as i32), cursor.range_from(start)),
            ),
            _ => err!(cursor.loc, "invalid self-defining term {base}'{body}'"),
        }
    }

    fn parse_data_attr(
        &mut self,
        cursor: &mut Cursor,
        attr: DataAttrKind,
    ) -> ParseResult<MachExpr> {
        let start = cursor.position();
        cursor.bump(); // the attribute letter
        cursor.bump(); // the quote

        let sym_start_pos = cursor.pos;
        let sym_start = cursor.position();
        let target = match cursor.peek() {
            Some('=') => {
                let lit = self.parse_literal(cursor)?;
                let MachExprKind::Literal(lit) = lit.kind else {
                    unreachable!("parse_literal yields literal nodes");
                };
                DataAttrTarget::Literal(Box::new(lit))
            }
            Some(c) if is_symbol_start(c) => {
                while matches!(cursor.peek(), Some(c) if is_symbol_char(c)) {
                    cursor.bump();
                }
                let text = cursor.slice_from(sym_start_pos);
                DataAttrTarget::Symbol {
                    name: self.ids.add(&text),
                }
            }
            _ => return err!(cursor.loc, "attribute operand expected"),
        };

        let symbol_range = Range::new(sym_start, cursor.position());
        Ok(MachExpr::new(
            MachExprKind::DataAttr {
                target,
                attr,
                symbol_range,
            },
            cursor.range_from(start),
        ))
    }

    /// `=` data-definition.
    fn parse_literal(&mut self, cursor: &mut Cursor) -> ParseResult<MachExpr> {
        let start = cursor.position();
        let start_pos = cursor.pos;
        debug_assert_eq!(cursor.peek(), Some('='));
        cursor.bump();

        let dd = self.parse_data_definition(cursor)?;
        let text = cursor.slice_from(start_pos).to_ascii_uppercase();
        Ok(MachExpr::new(
            MachExprKind::Literal(LiteralExpr { text, dd }),
            cursor.range_from(start),
        ))
    }

    /// `[dup]T[x][L[.]n][Ss][Ee]['nominal'|(nominal,…)]`
    pub fn parse_data_definition(&mut self, cursor: &mut Cursor) -> ParseResult<DataDefinition> {
        let dd_start = cursor.position();

        // Duplication factor: digits or a parenthesized expression.
        let mut dup_factor = None;
        if matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
            dup_factor = Some(Box::new(self.parse_number(cursor)?));
        } else if cursor.peek() == Some('(') {
            cursor.bump();
            let expr = self.parse_expr(cursor)?;
            if cursor.peek() != Some(')') {
                return err!(cursor.loc, "expected ')' after duplication factor");
            }
            cursor.bump();
            dup_factor = Some(Box::new(expr));
        }

        let Some(type_) = cursor.peek().filter(|c| c.is_ascii_alphabetic()) else {
            return err!(cursor.loc, "data definition type expected");
        };
        cursor.bump();
        let type_ = type_.to_ascii_uppercase();

        // Type extension, unless the letter reads as a modifier (`CE3'…'`
        // is an exponent, `CE'…'` the EBCDIC extension).
        let mut extension = None;
        if let Some(c) = cursor.peek() {
            let candidate = c.to_ascii_uppercase();
            let modifier_like =
                matches!(candidate, 'L' | 'S' | 'E') && self.modifier_follows(cursor);
            if DataDefinition::known_extension(type_, candidate) && !modifier_like {
                extension = Some(candidate);
                cursor.bump();
            }
        }

        let mut length = None;
        let mut length_in_bits = false;
        let mut scale = None;
        let mut exponent = None;
        loop {
            match cursor.peek().map(|c| c.to_ascii_uppercase()) {
                Some('L') if length.is_none() => {
                    cursor.bump();
                    if cursor.peek() == Some('.') {
                        cursor.bump();
                        length_in_bits = true;
                    }
                    if cursor.peek() == Some('(') {
                        cursor.bump();
                        let expr = self.parse_expr(cursor)?;
                        if cursor.peek() != Some(')') {
                            return err!(cursor.loc, "expected ')' after length modifier");
                        }
                        cursor.bump();
                        length = Some(Box::new(expr));
                    } else if matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
                        length = Some(Box::new(self.parse_number(cursor)?));
                    } else {
                        return err!(cursor.loc, "length modifier value expected");
                    }
                }
                Some('S') if scale.is_none() && self.modifier_follows(cursor) => {
                    cursor.bump();
                    scale = Some(self.parse_signed_number(cursor)? as i16);
                }
                Some('E') if exponent.is_none() && self.modifier_follows(cursor) => {
                    cursor.bump();
                    exponent = Some(self.parse_signed_number(cursor)?);
                }
                _ => break,
            }
        }

        // Nominal value.
        let nominal = match cursor.peek() {
            Some('\'') => {
                cursor.bump();
                let body_start = cursor.pos;
                while let Some(c) = cursor.peek() {
                    if c == '\'' {
                        if cursor.peek_at(1) == Some('\'') {
                            cursor.bump();
                            cursor.bump();
                            continue;
                        }
                        break;
                    }
                    cursor.bump();
                }
                if cursor.peek() != Some('\'') {
                    return err!(cursor.loc, "unterminated nominal value");
                }
                let body = cursor.slice_from(body_start).replace("''", "'");
                cursor.bump();
                Some(Nominal::String(body))
            }
            Some('(') => {
                cursor.bump();
                let mut items = Vec::new();
                loop {
                    items.push(self.parse_nominal_item(cursor)?);
                    match cursor.peek() {
                        Some(',') => {
                            cursor.bump();
                        }
                        Some(')') => break,
                        _ => return err!(cursor.loc, "expected ',' or ')' in nominal value"),
                    }
                }
                cursor.bump();
                Some(Nominal::Exprs(items))
            }
            _ => None,
        };

        Ok(DataDefinition {
            dup_factor,
            type_,
            extension,
            length,
            length_in_bits,
            scale,
            exponent,
            nominal,
            range: cursor.range_from(dd_start),
        })
    }

    /// One item of a parenthesized nominal list: `expr` or the S-type
    /// address form `expr(base)`.
    fn parse_nominal_item(&mut self, cursor: &mut Cursor) -> ParseResult<NominalItem> {
        let expr = self.parse_expr(cursor)?;
        let mut base = None;
        if cursor.peek() == Some('(') {
            cursor.bump();
            base = Some(self.parse_expr(cursor)?);
            if cursor.peek() != Some(')') {
                return err!(cursor.loc, "expected ')' after nominal base");
            }
            cursor.bump();
        }
        Ok(NominalItem { expr, base })
    }

    /// Does a scale/exponent modifier value follow (digits or a sign)?
    /// Distinguishes the `S` modifier from an `S`-type nominal start.
    fn modifier_follows(&self, cursor: &Cursor) -> bool {
        matches!(
            cursor.peek_at(1),
            Some(c) if c.is_ascii_digit() || c == '+' || c == '-'
        )
    }

    fn parse_signed_number(&mut self, cursor: &mut Cursor) -> ParseResult<i32> {
        let negative = match cursor.peek() {
            Some('-') => {
                cursor.bump();
                true
            }
            Some('+') => {
                cursor.bump();
                false
            }
            _ => false,
        };
        let start_pos = cursor.pos;
        while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
            cursor.bump();
        }
        let text = cursor.slice_from(start_pos);
        match text.parse::<i32>() {
            Ok(v) => Ok(if negative { -v } else { v }),
            Err(_) => err!(cursor.loc, "modifier value expected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> MachExpr {
        let chars: Vec<char> = text.chars().collect();
        let mut ids = IdStorage::new();
        let mut cursor = Cursor::new(&chars, 0, 0, Location::default());
        let mut parser = ExprParser::new(&mut ids);
        let expr = parser.parse_expr(&mut cursor).unwrap();
        cursor.expect_end().unwrap();
        expr
    }

    #[test]
    fn precedence() {
        let e = parse("1+2*3");
        let MachExprKind::Binary { op, rhs, .. } = &e.kind else {
            panic!("expected binary node");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            MachExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn loctr_vs_multiplication() {
        let e = parse("*-2");
        let MachExprKind::Binary { op, lhs, .. } = &e.kind else {
            panic!("expected binary node");
        };
        assert_eq!(*op, BinaryOp::Sub);
        assert!(matches!(lhs.kind, MachExprKind::LocCounter));

        let e = parse("2**");
        let MachExprKind::Binary { op, rhs, .. } = &e.kind else {
            panic!("expected binary node");
        };
        assert_eq!(*op, BinaryOp::Mul);
        assert!(matches!(rhs.kind, MachExprKind::LocCounter));
    }

    #[test]
    fn self_defining_terms() {
        assert!(matches!(parse("X'1F'").kind, MachExprKind::SelfDef(0x1F)));
        assert!(matches!(parse("B'101'").kind, MachExprKind::SelfDef(5)));
        assert!(matches!(parse("C'A'").kind, MachExprKind::SelfDef(0xC1)));
    }

    #[test]
    fn attribute_reference() {
        let e = parse("L'FOO+1");
        let MachExprKind::Binary { lhs, .. } = &e.kind else {
            panic!("expected binary node");
        };
        assert!(matches!(
            lhs.kind,
            MachExprKind::DataAttr {
                attr: DataAttrKind::L,
                ..
            }
        ));
    }

    #[test]
    fn qualified_symbol() {
        let e = parse("LBL.SYM");
        let MachExprKind::Symbol { name, qualifier } = e.kind else {
            panic!("expected symbol node");
        };
        assert!(!qualifier.is_empty());
        assert_ne!(name, qualifier);
    }

    #[test]
    fn literal_with_loctr() {
        let e = parse("=A(*)");
        let MachExprKind::Literal(lit) = &e.kind else {
            panic!("expected literal node");
        };
        assert_eq!(lit.text, "=A(*)");
        assert!(lit.dd.references_loctr());
    }

    #[test]
    fn data_definition_modifiers() {
        let chars: Vec<char> = "3FL2'7'".chars().collect();
        let mut ids = IdStorage::new();
        let mut cursor = Cursor::new(&chars, 0, 0, Location::default());
        let mut parser = ExprParser::new(&mut ids);
        let dd = parser.parse_data_definition(&mut cursor).unwrap();
        cursor.expect_end().unwrap();
        assert_eq!(dd.type_, 'F');
        assert!(dd.dup_factor.is_some());
        assert!(dd.length.is_some());
        assert!(!dd.length_in_bits);
        assert!(matches!(dd.nominal, Some(Nominal::String(ref s)) if s == "7"));
    }

    fn parse_dd(text: &str) -> DataDefinition {
        let chars: Vec<char> = text.chars().collect();
        let mut ids = IdStorage::new();
        let mut cursor = Cursor::new(&chars, 0, 0, Location::default());
        let mut parser = ExprParser::new(&mut ids);
        let dd = parser.parse_data_definition(&mut cursor).unwrap();
        cursor.expect_end().unwrap();
        dd
    }

    #[test]
    fn data_definition_extensions() {
        let cu = parse_dd("CU'UTF16'");
        assert_eq!((cu.type_, cu.extension), ('C', Some('U')));

        let sy = parse_dd("SY(40)");
        assert_eq!((sy.type_, sy.extension), ('S', Some('Y')));

        let ld = parse_dd("LD'456E7R8'");
        assert_eq!((ld.type_, ld.extension), ('L', Some('D')));

        // An exponent modifier is not an extension.
        let ce = parse_dd("CE3'X'");
        assert_eq!((ce.type_, ce.extension), ('C', None));
        assert_eq!(ce.exponent, Some(3));

        // Nor is a length modifier.
        let cl = parse_dd("CL10'AB'");
        assert_eq!((cl.type_, cl.extension), ('C', None));
        assert!(cl.length.is_some());
    }

    #[test]
    fn data_definition_bit_length() {
        let dd = parse_dd("CL.20'A'");
        assert!(dd.length_in_bits);
        assert!(dd.length.is_some());
    }

    #[test]
    fn data_definition_address_nominal() {
        let dd = parse_dd("S(40(5))");
        let Some(Nominal::Exprs(items)) = &dd.nominal else {
            panic!("expected expression nominal");
        };
        assert_eq!(items.len(), 1);
        assert!(items[0].base.is_some());
    }
}
