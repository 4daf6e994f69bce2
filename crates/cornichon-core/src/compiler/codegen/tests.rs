//! Tests for the stream code generator.
//!
//! Expected streams are written out as byte literals; each was checked
//! against `pickletools.dis` and `pickle.loads` behavior for the same
//! program.

use pretty_assertions::assert_eq;

use super::*;
use crate::compiler::{LambdaMode, Options};
use crate::error::CompileError;
use crate::parser::Parser;

fn compile_with(source: &str, options: &Options) -> Result<Vec<u8>, CompileError> {
    let module = Parser::new(source)?.parse_module()?;
    Codegen::new(options).compile(&module)
}

fn compile_at(source: &str, protocol: u8) -> Vec<u8> {
    let options = Options {
        protocol,
        ..Options::default()
    };
    compile_with(source, &options).unwrap()
}

fn compile_default(source: &str) -> Vec<u8> {
    compile_with(source, &Options::default()).unwrap()
}

fn compile_extended(source: &str) -> Vec<u8> {
    let options = Options {
        extended: true,
        ..Options::default()
    };
    compile_with(source, &options).unwrap()
}

fn compile_err(source: &str) -> CompileError {
    compile_with(source, &Options::default()).unwrap_err()
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

// ============================================================================
// Program shape
// ============================================================================

#[test]
fn test_empty_program_evaluates_to_none() {
    assert_eq!(compile_default(""), b"\x80\x04N.");
    assert_eq!(compile_at("", 0), b"N.");
}

#[test]
fn test_final_result_assignment_seals_the_stream() {
    assert_eq!(compile_default("RESULT = 42"), b"\x80\x04K*.");
}

#[test]
fn test_expression_statement_is_discarded() {
    assert_eq!(compile_default("42"), b"\x80\x04K*0N.");
}

#[test]
fn test_constant_literals() {
    assert_eq!(compile_default("RESULT = True"), b"\x80\x04\x88.");
    assert_eq!(compile_default("RESULT = None"), b"\x80\x04N.");
    assert_eq!(compile_at("RESULT = False", 0), b"I00\n.");
    assert_eq!(
        compile_default("RESULT = 1.5"),
        b"\x80\x04G\x3f\xf8\x00\x00\x00\x00\x00\x00."
    );
    assert_eq!(compile_default("RESULT = 'hi'"), b"\x80\x04\x8c\x02hi.");
    assert_eq!(
        compile_at("RESULT = 'hi'", 2),
        b"\x80\x02X\x02\x00\x00\x00hi."
    );
    assert_eq!(compile_default("RESULT = b'hi'"), b"\x80\x04C\x02hi.");
}

#[test]
fn test_integer_widths() {
    assert_eq!(compile_default("RESULT = 300"), b"\x80\x04M\x2c\x01.");
    assert_eq!(compile_default("RESULT = -1"), b"\x80\x04J\xff\xff\xff\xff.");
    assert_eq!(
        compile_default("RESULT = 1099511627776"),
        b"\x80\x04I1099511627776\n."
    );
}

#[test]
fn test_ellipsis_is_a_builtins_lookup() {
    assert_eq!(
        compile_default("RESULT = ..."),
        b"\x80\x04\x8c\x08builtins\x8c\x08Ellipsis\x93\x94."
    );
}

// ============================================================================
// Assignment and names
// ============================================================================

#[test]
fn test_assignment_binds_through_a_scratch_slot() {
    assert_eq!(
        compile_default("x = 1"),
        b"\x80\x04K\x01\x940h\x00\x940N."
    );
    assert_eq!(compile_at("x = 1", 0), b"I1\np0\n0g0\np1\n0N.");
}

#[test]
fn test_chained_assignment_shares_one_value() {
    assert_eq!(
        compile_default("a = b = 5"),
        b"\x80\x04K\x05\x940h\x00\x940h\x00\x940N."
    );
}

#[test]
fn test_name_reads_come_from_the_memo() {
    assert_eq!(
        compile_default("x = 1\ny = x"),
        b"\x80\x04K\x01\x940h\x00\x940h\x01\x940h\x02\x940N."
    );
}

#[test]
fn test_unknown_name_errors() {
    assert_eq!(
        compile_err("x = y").to_string(),
        "name error: name 'y' is not defined"
    );
    // Built-ins only resolve in extended mode.
    assert_eq!(
        compile_err("RESULT = len").to_string(),
        "name error: name 'len' is not defined"
    );
}

#[test]
fn test_extended_mode_resolves_builtins() {
    assert_eq!(
        compile_extended("RESULT = len"),
        b"\x80\x04\x8c\x08builtins\x8c\x03len\x93\x94."
    );
}

#[test]
fn test_subscript_assignment() {
    assert_eq!(
        compile_default("x = [1]\nx[0] = 2"),
        b"\x80\x04]K\x01a\x940h\x00\x940K\x02\x940h\x01K\x00h\x02s0N."
    );
}

#[test]
fn test_attribute_assignment_uses_build() {
    assert_eq!(
        compile_default("x = 1\nx.a = 2"),
        b"\x80\x04K\x01\x940h\x00\x940K\x02\x940h\x01}\x8c\x01ah\x02sb0N."
    );
}

#[test]
fn test_unpacking_assignment_is_rejected() {
    assert_eq!(
        compile_err("a, b = 1, 2").to_string(),
        "unsupported construct: unpacking assignment is not supported"
    );
}

#[test]
fn test_result_misuse() {
    let misuse = "reserved name: \
        'RESULT' is only allowed as the sole target of the final statement";
    assert_eq!(compile_err("RESULT = 1\nx = 2").to_string(), misuse);
    assert_eq!(compile_err("x = RESULT").to_string(), misuse);
    assert_eq!(compile_err("RESULT = x = 1").to_string(), misuse);
    assert_eq!(compile_err("import os as RESULT").to_string(), misuse);
}

// ============================================================================
// Displays
// ============================================================================

#[test]
fn test_tuple_displays() {
    assert_eq!(compile_default("RESULT = ()"), b"\x80\x04).");
    assert_eq!(compile_default("RESULT = (1, 2)"), b"\x80\x04K\x01K\x02\x86.");
    assert_eq!(compile_at("RESULT = (1, 2)", 0), b"(I1\nI2\nt.");
    assert_eq!(
        compile_default("RESULT = (1, 2, 3, 4)"),
        b"\x80\x04(K\x01K\x02K\x03K\x04t."
    );
}

#[test]
fn test_list_appends_one_element_at_a_time() {
    assert_eq!(compile_default("RESULT = [1, 2]"), b"\x80\x04]K\x01aK\x02a.");
}

#[test]
fn test_dict_sets_one_pair_at_a_time() {
    assert_eq!(compile_default("RESULT = {1: 2}"), b"\x80\x04}K\x01K\x02s.");
}

#[test]
fn test_set_display() {
    assert_eq!(
        compile_default("RESULT = {1, 2}"),
        b"\x80\x04\x8f(K\x01K\x02\x91."
    );
}

#[test]
fn test_set_needs_protocol_four() {
    let options = Options {
        protocol: 3,
        ..Options::default()
    };
    assert_eq!(
        compile_with("RESULT = {1}", &options).unwrap_err().to_string(),
        "protocol error: set literals require protocol 4 but current protocol is 3"
    );
}

#[test]
fn test_bytes_need_protocol_three() {
    let options = Options {
        protocol: 2,
        ..Options::default()
    };
    assert_eq!(
        compile_with("RESULT = b'x'", &options)
            .unwrap_err()
            .to_string(),
        "protocol error: bytes literals require protocol 3 but current protocol is 2"
    );
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_binop_reduces_an_operator_function() {
    assert_eq!(
        compile_default("RESULT = 1 + 2"),
        b"\x80\x04\x8c\x08operator\x8c\x03add\x93\x94K\x01K\x02\x86R."
    );
}

#[test]
fn test_operator_functions_memoize_once() {
    let stream = compile_default("x = 1 + 2\nRESULT = x + 3");
    assert_eq!(count(&stream, b"operator"), 1);
    assert_eq!(
        stream,
        b"\x80\x04\x8c\x08operator\x8c\x03add\x93\x94K\x01K\x02\x86R\x940h\x01\x940h\x00h\x02K\x03\x86R."
    );
}

#[test]
fn test_unaryop() {
    assert_eq!(
        compile_default("RESULT = not 1"),
        b"\x80\x04\x8c\x08operator\x8c\x04not_\x93\x94K\x01\x85R."
    );
    assert_eq!(
        compile_default("x = 5\nRESULT = -x"),
        b"\x80\x04K\x05\x940h\x00\x940\x8c\x08operator\x8c\x03neg\x93\x94h\x01\x85R."
    );
}

#[test]
fn test_single_comparison() {
    assert_eq!(
        compile_default("RESULT = 1 < 2"),
        b"\x80\x04\x8c\x08operator\x8c\x02lt\x93\x94K\x01K\x02\x86R."
    );
    assert_eq!(
        compile_default("RESULT = None is None"),
        b"\x80\x04\x8c\x08operator\x8c\x03is_\x93\x94NN\x86R."
    );
}

#[test]
fn test_membership_builds_the_container_first() {
    // contains(container, item) reverses the written operand order.
    assert_eq!(
        compile_default("l = [1, 2]\nRESULT = 1 in l"),
        b"\x80\x04]K\x01aK\x02a\x940h\x00\x940\x8c\x08operator\x8c\x08contains\x93\x94h\x01K\x01\x86R."
    );
}

#[test]
fn test_not_in_wraps_contains_in_not() {
    assert_eq!(
        compile_default("l = [1]\nRESULT = 2 not in l"),
        b"\x80\x04]K\x01a\x940h\x00\x940\x8c\x08operator\x8c\x04not_\x93\x94\x8c\x08operator\x8c\x08contains\x93\x94h\x01K\x02\x86R\x85R."
    );
}

#[test]
fn test_chained_comparison_caches_middle_operands() {
    // all((lt(1, 2), lt(<cached 2>, 3))): 2 is built once, PUT into a
    // scratch slot inside the first pair, fetched for the second.
    assert_eq!(
        compile_default("RESULT = 1 < 2 < 3"),
        b"\x80\x04\x8c\x08builtins\x8c\x03all\x93\x94\x8c\x08operator\x8c\x02lt\x93\x94K\x01K\x02\x94\x86Rh\x01h\x02K\x03\x86R\x86\x85R."
    );
}

#[test]
fn test_boolop_or() {
    // next(filter(bool, [1, 2]), <cached 2>)
    assert_eq!(
        compile_default("RESULT = 1 or 2"),
        b"\x80\x04\x8c\x08builtins\x8c\x04next\x93\x94\x8c\x08builtins\x8c\x06filter\x93\x94\x8c\x08builtins\x8c\x04bool\x93\x94]K\x01aK\x02\x94a\x86Rh\x03\x86R."
    );
}

#[test]
fn test_boolop_and_filters_on_falsiness() {
    assert_eq!(
        compile_default("RESULT = 1 and 2"),
        b"\x80\x04\x8c\x08builtins\x8c\x04next\x93\x94\x8c\x08builtins\x8c\x06filter\x93\x94\x8c\x08operator\x8c\x04not_\x93\x94]K\x01aK\x02\x94a\x86Rh\x03\x86R."
    );
}

// ============================================================================
// Calls and accessors
// ============================================================================

#[test]
fn test_call_builds_an_argument_tuple() {
    assert_eq!(
        compile_extended("RESULT = print(1)"),
        b"\x80\x04\x8c\x08builtins\x8c\x05print\x93\x94K\x01\x85R."
    );
}

#[test]
fn test_keyword_arguments_are_rejected() {
    assert_eq!(
        compile_err("RESULT = f(x=1)").to_string(),
        "unsupported construct: keyword arguments are not supported"
    );
}

#[test]
fn test_subscript_read_is_getitem() {
    assert_eq!(
        compile_default("x = [1]\nRESULT = x[0]"),
        b"\x80\x04]K\x01a\x940h\x00\x940\x8c\x08operator\x8c\x07getitem\x93\x94h\x01K\x00\x86R."
    );
}

#[test]
fn test_slice_fills_missing_bounds_with_none() {
    assert_eq!(
        compile_default("x = [1]\nRESULT = x[1:]"),
        b"\x80\x04]K\x01a\x940h\x00\x940\x8c\x08operator\x8c\x07getitem\x93\x94h\x01\x8c\x08builtins\x8c\x05slice\x93\x94K\x01NN\x87R\x86R."
    );
}

#[test]
fn test_attribute_read_is_getattr() {
    assert_eq!(
        compile_default("x = 1\nRESULT = x.real"),
        b"\x80\x04K\x01\x940h\x00\x940\x8c\x08builtins\x8c\x07getattr\x93\x94h\x01\x8c\x04real\x86R."
    );
}

// ============================================================================
// Imports
// ============================================================================

#[test]
fn test_import_calls_dunder_import() {
    assert_eq!(
        compile_default("import os"),
        b"\x80\x04\x8c\x08builtins\x8c\n__import__\x93\x94\x8c\x02os\x85R\x940N."
    );
}

#[test]
fn test_import_as_binds_the_alias() {
    assert_eq!(
        compile_default("import os as o\nRESULT = o"),
        b"\x80\x04\x8c\x08builtins\x8c\n__import__\x93\x94\x8c\x02os\x85R\x940h\x01."
    );
}

#[test]
fn test_dotted_import_binds_the_dotted_name() {
    // `__import__("os.path")` returns the top-level module, so the
    // binding for "os.path" holds `os`; the bare name stays unbound.
    assert_eq!(
        compile_default("import os.path"),
        b"\x80\x04\x8c\x08builtins\x8c\n__import__\x93\x94\x8c\x07os.path\x85R\x940N."
    );
    assert_eq!(
        compile_err("import os.path\nRESULT = os").to_string(),
        "name error: name 'os' is not defined"
    );
}

#[test]
fn test_import_from_is_a_direct_global() {
    assert_eq!(
        compile_default("from os import system"),
        b"\x80\x04\x8c\x02os\x8c\x06system\x93\x940N."
    );
    assert_eq!(compile_at("from os import system", 0), b"cos\nsystem\np0\n0N.");
}

// ============================================================================
// Macros
// ============================================================================

#[test]
fn test_global_macro_always_emits_the_text_form() {
    assert_eq!(
        compile_default("RESULT = GLOBAL('os', 'system')"),
        b"\x80\x04cos\nsystem\n."
    );
}

#[test]
fn test_stack_global_macro_takes_runtime_strings() {
    assert_eq!(
        compile_default("RESULT = STACK_GLOBAL('os', 'system')"),
        b"\x80\x04\x8c\x02os\x8c\x06system\x93."
    );
}

#[test]
fn test_inst_macro() {
    assert_eq!(
        compile_default("RESULT = INST('os', 'system', ('ls',))"),
        b"\x80\x04(\x8c\x02lsios\nsystem\n."
    );
}

#[test]
fn test_build_macro() {
    assert_eq!(
        compile_default("x = GLOBAL('a', 'b')\nRESULT = BUILD(x, {'k': 1}, None)"),
        b"\x80\x04ca\nb\n\x940h\x00\x940h\x01}\x8c\x01kK\x01sN\x86b."
    );
}

#[test]
fn test_macro_arity_error() {
    assert_eq!(
        compile_err("RESULT = GLOBAL('os')").to_string(),
        "macro error: GLOBAL expected 2 arguments but only got 1"
    );
}

#[test]
fn test_macro_protocol_floor() {
    let options = Options {
        protocol: 2,
        ..Options::default()
    };
    assert_eq!(
        compile_with("RESULT = STACK_GLOBAL('a', 'b')", &options)
            .unwrap_err()
            .to_string(),
        "protocol error: Macro STACK_GLOBAL requires protocol 4 but current protocol is 2"
    );
}

// ============================================================================
// Lambdas
// ============================================================================

fn lambda_options() -> Options {
    Options {
        lambdas: LambdaMode::Python,
        ..Options::default()
    }
}

#[test]
fn test_lambda_disabled_by_default() {
    assert_eq!(
        compile_err("RESULT = lambda x: x").to_string(),
        "unsupported construct: lambda compilation is not enabled"
    );
}

#[test]
fn test_lambda_needs_protocol_three() {
    let options = Options {
        protocol: 2,
        lambdas: LambdaMode::Python,
        ..Options::default()
    };
    assert_eq!(
        compile_with("RESULT = lambda x: x", &options)
            .unwrap_err()
            .to_string(),
        "protocol error: lambda lowering requires protocol 3 but current protocol is 2"
    );
}

#[test]
fn test_lambda_rebuilds_a_function_at_load_time() {
    assert_eq!(
        compile_with("RESULT = lambda x: x", &lambda_options()).unwrap(),
        b"\x80\x04\x8c\x05types\x8c\x0cFunctionType\x93\x94\x8c\x05types\x8c\x08CodeType\x93\x94(K\x01K\x00K\x00K\x01K\x01KCC\x04|\x00S\x00))\x8c\x01x\x85\x8c\x08<pickle>\x8c\x08<lambda>K\x01C\x00tR}\x8c\x08<lambda>\x87R."
            .to_vec()
    );
}

#[test]
fn test_lambda_captures_memoized_names_by_value() {
    let stream = compile_with("y = 5\nRESULT = lambda: y", &lambda_options()).unwrap();
    // The captures dict copies y from its memo slot.
    assert_eq!(count(&stream, b"}\x8c\x01yh\x01s"), 1);
    // The body reads it back as a global.
    assert_eq!(count(&stream, b"C\x04\x74\x00\x53\x00"), 1);
}

#[test]
fn test_lambda_defaults_ride_as_a_fourth_argument() {
    assert_eq!(
        compile_with("RESULT = lambda x=1: x", &lambda_options()).unwrap(),
        b"\x80\x04\x8c\x05types\x8c\x0cFunctionType\x93\x94(\x8c\x05types\x8c\x08CodeType\x93\x94(K\x01K\x00K\x00K\x01K\x01KCC\x04|\x00S\x00))\x8c\x01x\x85\x8c\x08<pickle>\x8c\x08<lambda>K\x01C\x00tR}\x8c\x08<lambda>K\x01\x85tR."
            .to_vec()
    );
}

#[test]
fn test_lambda_reserved_names() {
    let misuse = "reserved name: \
        'RESULT' is only allowed as the sole target of the final statement";
    let err = compile_with("RESULT = lambda RESULT: 1", &lambda_options()).unwrap_err();
    assert_eq!(err.to_string(), misuse);
    let err = compile_with("RESULT = lambda: RESULT", &lambda_options()).unwrap_err();
    assert_eq!(err.to_string(), misuse);
}

// ============================================================================
// Limits
// ============================================================================

#[test]
fn test_node_depth_ceiling_guards_external_trees() {
    use crate::lexer::Span;

    // The parser has its own lower ceiling; an externally built tree
    // arrives here unchecked.
    let span = Span::new(0, 1);
    let mut expr = Expr::new(ExprKind::Constant(Constant::Int(1.into())), span);
    for _ in 0..1_100 {
        expr = Expr::new(
            ExprKind::UnaryOp {
                op: UnaryOpKind::Neg,
                operand: Box::new(expr),
            },
            span,
        );
    }
    let module = Module {
        body: vec![Stmt::new(StmtKind::Expr { value: expr }, span)],
    };
    let err = Codegen::new(&Options::default())
        .compile(&module)
        .unwrap_err();
    assert_eq!(err.to_string(), "nesting error: node nesting is too deep");
}
