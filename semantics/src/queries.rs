//! Front-end queries: definition, references, hover, semantic tokens.
//!
//! All of them run over the state the [`Analyzer`] accumulated; nothing
//! here mutates the analysis.

use crate::context::symbol::{Symbol, SymbolValue};
use crate::diagnostic::{Position, Range};
use crate::ids::IdIndex;
use crate::processing::{Analyzer, SemanticToken};

impl Analyzer {
    fn occurrence_at(&self, pos: Position) -> Option<&crate::processing::Occurrence> {
        self.occurrences().iter().find(|o| o.range.contains(pos))
    }

    /// The definition site of the symbol referenced at `pos`.
    pub fn definition(&self, pos: Position) -> Option<Range> {
        let occ = self.occurrence_at(pos)?;
        self.ctx.ord.get_symbol(occ.name).map(|s| s.location)
    }

    /// All recorded occurrences of the symbol named `name`.
    pub fn references(&self, name: IdIndex) -> Vec<Range> {
        self.occurrences()
            .iter()
            .filter(|o| o.name == name)
            .map(|o| o.range)
            .collect()
    }

    /// Textual rendering of the symbol under `pos`: its value and
    /// attributes.
    pub fn hover(&self, pos: Position) -> Option<String> {
        let occ = self.occurrence_at(pos)?;
        let sym = self.ctx.ord.get_symbol(occ.name)?;
        Some(self.render_symbol(sym))
    }

    fn render_symbol(&self, sym: &Symbol) -> String {
        use std::fmt::Write;

        let mut text = String::new();
        match sym.value() {
            SymbolValue::Undef => text.push_str("(undefined)"),
            SymbolValue::Abs(v) => {
                let _ = write!(text, "X'{:X}' ({v})", v);
            }
            SymbolValue::Reloc(addr) => {
                let offset = addr.offset(&self.ctx.ord.spaces);
                let _ = write!(text, "X'{offset:X}' ({offset})");
                if let Some(&(base, _)) = addr.bases().first() {
                    let name = self.ctx.ord.ids.resolve(
                        self.ctx.ord.sections[base.section].name,
                    );
                    if name.is_empty() {
                        text.push_str(", relocatable (private section)");
                    } else {
                        let _ = write!(text, ", relocatable in {name}");
                    }
                }
            }
        }

        let attrs = sym.attributes();
        let _ = write!(
            text,
            "\nL: {}\nT: {}",
            attrs.length(),
            ebcdic_display(attrs.type_attr()),
        );
        if attrs.is_defined(crate::context::symbol::DataAttrKind::S) {
            let _ = write!(text, "\nS: {}", attrs.scale());
        }
        if attrs.is_defined(crate::context::symbol::DataAttrKind::I) {
            let _ = write!(text, "\nI: {}", attrs.integer());
        }
        text
    }

    /// All semantic tokens of the analyzed input, sorted by position.
    pub fn semantic_tokens_sorted(&self) -> Vec<SemanticToken> {
        let mut tokens = self.semantic_tokens().to_vec();
        tokens.sort_by_key(|t| (t.range.start, t.range.end));
        tokens
    }
}

fn ebcdic_display(code: u16) -> char {
    for c in 'A'..='Z' {
        if crate::context::symbol::ebcdic(c) == code {
            return c;
        }
    }
    for c in '0'..='9' {
        if crate::context::symbol::ebcdic(c) == code {
            return c;
        }
    }
    '?'
}
