//! End-to-end scenarios driven through the textual reader.

use hlasm_semantics::context::symbol::{SymbolValue, SymbolValueKind};
use hlasm_semantics::diagnostic::Position;
use hlasm_semantics::processing::Analyzer;

/// Parse and analyze, with `RUST_LOG`-controlled logging available.
fn analyze(source: &str) -> hlasm_reader::ParseResult<Analyzer> {
    let _ = env_logger::builder().is_test(true).try_init();
    hlasm_reader::analyze(source)
}

fn abs_value(a: &Analyzer, name: &str) -> Option<i32> {
    let id = a.ctx.ord.ids.find(name)?;
    a.ctx.ord.get_symbol(id)?.value().as_abs()
}

fn reloc_offset(a: &mut Analyzer, name: &str) -> Option<i32> {
    let id = a.ctx.ord.ids.find(name)?;
    let spaces = &a.ctx.ord.spaces;
    match a.ctx.ord.get_symbol(id)?.value() {
        SymbolValue::Reloc(addr) => Some(addr.offset(spaces)),
        _ => None,
    }
}

#[test]
fn basic_using_and_la() {
    let a = analyze(
        "\
TEST  CSECT
      USING *,12
      LA    0,TEST
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
}

#[test]
fn forward_symbol_with_attribute() {
    let a = analyze(
        "\
A     EQU   L'B
B     DS    CL10
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    assert_eq!(abs_value(&a, "A"), Some(10));
}

#[test]
fn literal_pool_dedup_with_loctr_references() {
    let mut a = analyze(
        "\
      LARL  0,=A(*)
      LARL  0,=A(*)
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    // Two 6-byte instructions, pool aligned to a doubleword, two distinct
    // fullword literals.
    assert_eq!(a.ctx.ord.current_address().offset(&a.ctx.ord.spaces), 24);
}

#[test]
fn literal_pool_dedup_without_loctr_references() {
    let mut a = analyze(
        "\
      LARL  0,=A(0)
      LARL  0,=A(0)
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    assert_eq!(a.ctx.ord.current_address().offset(&a.ctx.ord.spaces), 20);
}

#[test]
fn org_rewind_and_available_value() {
    let a = analyze(
        "\
A     DS    0H
      USING A,1
B     DS    F
      ORG   A
      DS    H
      ORG   ,
END_OFFSET EQU *-A
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    assert_eq!(abs_value(&a, "END_OFFSET"), Some(4));
}

#[test]
fn equ_cycle_detected_once() {
    let a = analyze(
        "\
A     EQU   B
B     EQU   A
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["E033"]);
    // Both symbols resolve to the default so downstream users see no
    // further errors.
    assert_eq!(abs_value(&a, "A"), Some(0));
    assert_eq!(abs_value(&a, "B"), Some(0));
}

#[test]
fn displacement_out_of_range() {
    let a = analyze(
        "\
A     DS    A
      USING A,1
      LA    0,A+4096
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME008"]);
}

#[test]
fn long_displacement_reaches_further() {
    let a = analyze(
        "\
A     DS    A
      USING A,1
      LAY   0,A+4096
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
}

#[test]
fn labeled_using_out_of_range() {
    let a = analyze(
        "\
A     CSECT
L     USING A,1
      LA    0,L.A+4096
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME008"]);
}

#[test]
fn labeled_using_second_register_in_range() {
    let a = analyze(
        "\
A     CSECT
L     USING A,1,2
      LA    0,L.A+4096
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
}

#[test]
fn using_without_label_required_by_reference() {
    let a = analyze(
        "\
A     CSECT
      LA    0,L.A
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME005"]);
}

#[test]
fn mnemonic_branch_in_range() {
    let a = analyze(
        "\
A     CSECT
      USING *,1
      B     *
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
}

#[test]
fn mnemonic_branch_out_of_range() {
    let a = analyze(
        "\
A     CSECT
      USING *,1
      B     *+4096
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME008"]);
}

#[test]
fn relative_branch_parity() {
    let a = analyze(
        "\
A     CSECT
B     DS    0H
      DS    X
      J     B+1
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME003"]);
}

#[test]
fn undefined_symbol_reported_at_end() {
    let a = analyze(
        "\
A     CSECT
      USING *,12
      LA    0,NOWHERE
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["E010"]);
}

#[test]
fn drop_without_effect_warns() {
    let a = analyze(
        "\
A     CSECT
      USING *,12
      DROP  11
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["U001"]);
}

#[test]
fn drop_register_removes_mapping() {
    let a = analyze(
        "\
A     CSECT
      USING *,12
      DROP  12
      LA    0,A
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["ME007"]);
}

#[test]
fn duplicate_base_register_diagnosed() {
    let a = analyze(
        "\
A     CSECT
      USING *,12,12
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["U006"]);
}

#[test]
fn multiple_location_counters_chain() {
    let mut a = analyze(
        "\
SECT  CSECT
      DS    F
PART  LOCTR
      DS    H
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    // The named counter starts where the first one ended.
    assert_eq!(reloc_offset(&mut a, "PART"), Some(4));
}

#[test]
fn equ_forward_reference_through_storage() {
    let a = analyze(
        "\
      DS    (N)C
END   EQU   *
N     EQU   6
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    assert_eq!(abs_value(&a, "N"), Some(6));
}

#[test]
fn section_symbols_and_redefinition() {
    let a = analyze(
        "\
A     CSECT
A     CSECT
B     DSECT
B     CSECT
",
    )
    .unwrap();
    // Continuing a section is fine; reusing its name with another kind is
    // not.
    assert_eq!(a.diags.codes(), ["A165"]);
}

#[test]
fn definition_and_hover_queries() {
    let a = analyze(
        "\
TEST  CSECT
LOOP  DS    F
      LA    0,LOOP
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());

    // The reference on line 2 leads back to the definition on line 1.
    let def = a.definition(Position::new(2, 15)).expect("definition");
    assert_eq!(def.start.line, 1);

    let hover = a.hover(Position::new(2, 15)).expect("hover text");
    assert!(hover.contains("relocatable"), "{hover}");
    assert!(hover.contains("L: 4"), "{hover}");

    let loop_id = a.ctx.ord.ids.find("LOOP").unwrap();
    assert_eq!(a.references(loop_id).len(), 2);
}

#[test]
fn semantic_tokens_cover_statement_parts() {
    use hlasm_semantics::processing::TokenScope;

    let a = analyze(
        "\
TEST  CSECT
      LA    0,TEST      load base
",
    )
    .unwrap();
    let tokens = a.semantic_tokens_sorted();
    assert!(tokens.iter().any(|t| t.scope == TokenScope::Label));
    assert!(tokens.iter().any(|t| t.scope == TokenScope::Instruction));
    assert!(tokens.iter().any(|t| t.scope == TokenScope::OrdinarySymbol));
    assert!(tokens.iter().any(|t| t.scope == TokenScope::Remark));
}

#[test]
fn idle_yields_and_resumes() {
    use std::sync::atomic::{AtomicU8, Ordering};

    let mut analyzer = Analyzer::new();
    let statements = hlasm_reader::parse_program(
        "\
A     CSECT
      DS    F
      DS    H
",
        &mut analyzer.ctx.ord.ids,
    )
    .unwrap();
    analyzer.append(statements);

    let flag = AtomicU8::new(1);
    assert!(!analyzer.idle(Some(&flag)));

    flag.store(0, Ordering::Relaxed);
    assert!(analyzer.idle(Some(&flag)));
    assert!(analyzer.diags.is_empty());
    assert_eq!(
        analyzer.ctx.ord.current_address().offset(&analyzer.ctx.ord.spaces),
        6
    );
}

#[test]
fn unknown_data_definition_type() {
    let a = analyze(
        "\
      DC    W'1'
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["D012"]);
}

#[test]
fn data_definition_length_out_of_range() {
    let a = analyze(
        "\
      DC    CL30000'ASCII'
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["D008"]);
}

#[test]
fn unicode_length_must_be_even() {
    let a = analyze(
        "\
      DC    CUL35'UTF16'
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["D014"]);
}

#[test]
fn s_type_displacement_checked() {
    let a = analyze(
        "\
DISP  EQU   4097
      DC    S(DISP)
",
    )
    .unwrap();
    assert_eq!(a.diags.codes(), ["D022"]);

    let ok = analyze(
        "\
DISP  EQU   4095
      DC    S(DISP)
",
    )
    .unwrap();
    assert!(ok.diags.is_empty(), "unexpected: {:?}", ok.diags.codes());
}

#[test]
fn defined_attribute_evaluates_inline() {
    // D'SYM on an already defined symbol must not postpone the statement.
    let a = analyze(
        "\
SYM   EQU   7
FLAG  EQU   D'SYM
NOT   EQU   D'OTHER
",
    )
    .unwrap();
    assert!(a.diags.is_empty(), "unexpected: {:?}", a.diags.codes());
    assert_eq!(abs_value(&a, "FLAG"), Some(1));
    assert_eq!(abs_value(&a, "NOT"), Some(0));
}

#[test]
fn symbol_values_are_stable() {
    let a = analyze(
        "\
A     EQU   4
B     EQU   A+1
",
    )
    .unwrap();
    assert!(a.diags.is_empty());
    assert_eq!(abs_value(&a, "A"), Some(4));
    assert_eq!(abs_value(&a, "B"), Some(5));
    assert_eq!(
        a.ctx
            .ord
            .get_symbol(a.ctx.ord.ids.find("A").unwrap())
            .unwrap()
            .kind(),
        SymbolValueKind::Abs
    );
}
