//! Compile-and-load integration tests
//!
//! Each test compiles a small source program and executes the resulting
//! stream on the reference loader, asserting on the Python repr of the
//! final value.

use cornichon_core::vm::Machine;
use cornichon_core::{Options, compile_source};

/// Compile a program with default options and load it
fn eval(source: &str) -> String {
    load(source, &Options::default())
}

/// Compile a program in extended mode (unbound names resolve as built-ins)
fn eval_ext(source: &str) -> String {
    let options = Options {
        extended: true,
        ..Options::default()
    };
    load(source, &options)
}

fn load(source: &str, options: &Options) -> String {
    let stream = compile_source(source, options).unwrap();
    let mut machine = Machine::new();
    machine.run(&stream).unwrap().to_string()
}

#[test]
fn test_arithmetic() {
    assert_eq!(eval("RESULT = 5 + 3"), "8");
    assert_eq!(eval("RESULT = 10 - 4"), "6");
    assert_eq!(eval("RESULT = 6 * 7"), "42");
    assert_eq!(eval("RESULT = 17 % 5"), "2");
    assert_eq!(eval("RESULT = 2 ** 10"), "1024");
}

#[test]
fn test_division_follows_python() {
    // `/` always produces a float, `//` rounds toward negative infinity
    assert_eq!(eval("RESULT = 15 / 3"), "5.0");
    assert_eq!(eval("RESULT = 7 // 2"), "3");
    assert_eq!(eval("RESULT = -7 // 2"), "-4");
    assert_eq!(eval("RESULT = -7 % 2"), "1");
}

#[test]
fn test_bit_operations() {
    assert_eq!(eval("RESULT = 6 & 3"), "2");
    assert_eq!(eval("RESULT = 6 | 3"), "7");
    assert_eq!(eval("RESULT = 6 ^ 3"), "5");
    assert_eq!(eval("RESULT = 1 << 10"), "1024");
    assert_eq!(eval("RESULT = ~5"), "-6");
}

#[test]
fn test_comparison_chains() {
    assert_eq!(eval("RESULT = 3 > 2 < 8 == 8 >= 8 <= 11"), "True");
    assert_eq!(eval("RESULT = 1 < 2 > 3"), "False");
    assert_eq!(eval("RESULT = 1 < 1.5"), "True");
    assert_eq!(eval("RESULT = 'a' < 'b'"), "True");
}

#[test]
fn test_bool_operators_yield_the_deciding_operand() {
    // Every operand is evaluated, but the value semantics match the
    // source language: `or` gives the first truthy operand, `and` the
    // first falsy one, the last operand either way.
    assert_eq!(eval("RESULT = 0 or 5"), "5");
    assert_eq!(eval("RESULT = 3 or 5"), "3");
    assert_eq!(eval("RESULT = 1 and 2"), "2");
    assert_eq!(eval("RESULT = 0 and 2"), "0");
    assert_eq!(eval("RESULT = '' or []"), "[]");
    assert_eq!(eval("RESULT = not []"), "True");
}

#[test]
fn test_membership_and_identity() {
    assert_eq!(eval("RESULT = 2 in [1, 2, 3]"), "True");
    assert_eq!(eval("RESULT = 4 not in (1, 2, 3)"), "True");
    assert_eq!(eval("RESULT = 'pa' in 'spam'"), "True");
    assert_eq!(eval("x = []\ny = []\nRESULT = (x is x, x is y)"), "(True, False)");
}

#[test]
fn test_container_displays() {
    assert_eq!(eval("RESULT = (1, 'two', 3.5)"), "(1, 'two', 3.5)");
    assert_eq!(eval("RESULT = (1,)"), "(1,)");
    assert_eq!(eval("RESULT = [1, [2, 3], None]"), "[1, [2, 3], None]");
    assert_eq!(eval("RESULT = {'a': 1, 'b': [2]}"), "{'a': 1, 'b': [2]}");
    assert_eq!(eval("RESULT = {3}"), "{3}");
}

#[test]
fn test_subscripts_and_slices() {
    assert_eq!(eval("x = [1, 2, 3, 4, 5]\nRESULT = x[1:4]"), "[2, 3, 4]");
    assert_eq!(eval("RESULT = [10, 20, 30][-1]"), "30");
    assert_eq!(eval("RESULT = 'hello'[::-1]"), "'olleh'");
    assert_eq!(eval("RESULT = {'k': 9}['k']"), "9");
}

#[test]
fn test_subscript_assignment_mutates_one_index() {
    assert_eq!(eval("x = [1, 2, 3]\nx[1] = 9\nRESULT = x"), "[1, 9, 3]");
    assert_eq!(
        eval("d = {'a': 1}\nd['b'] = 2\nRESULT = d"),
        "{'a': 1, 'b': 2}"
    );
    // Replacing an existing key keeps its position
    assert_eq!(
        eval("d = {'a': 1, 'b': 2}\nd['a'] = 9\nRESULT = d"),
        "{'a': 9, 'b': 2}"
    );
}

#[test]
fn test_chained_assignment_shares_one_object() {
    assert_eq!(eval("x = y = []\nRESULT = x is y"), "True");
    assert_eq!(eval("x = y = [0]\nx[0] = 7\nRESULT = y"), "[7]");
}

#[test]
fn test_rebound_names_share_identity() {
    // The memo hands back the same object for every read of a name
    assert_eq!(
        eval("x = [0]\npair = [x, x]\npair[0][0] = 5\nRESULT = pair"),
        "[[5], [5]]"
    );
}

#[test]
fn test_imports() {
    assert_eq!(eval("import operator\nRESULT = operator.add(2, 3)"), "5");
    assert_eq!(eval("from operator import mul\nRESULT = mul(6, 7)"), "42");
    assert_eq!(
        eval("from operator import neg as negate\nRESULT = negate(5)"),
        "-5"
    );
}

#[test]
fn test_attribute_assignment() {
    assert_eq!(
        eval("import argparse\nns = argparse.Namespace()\nns.x = 5\nRESULT = ns"),
        "<argparse.Namespace object x=5>"
    );
    assert_eq!(
        eval("import argparse\nns = argparse.Namespace()\nns.x = 5\nRESULT = ns.x"),
        "5"
    );
}

#[test]
fn test_extended_mode_builtins() {
    assert_eq!(eval_ext("RESULT = len('hello')"), "5");
    assert_eq!(eval_ext("RESULT = bool([])"), "False");
    assert_eq!(eval_ext("RESULT = all((True, 1, 'x'))"), "True");
    assert_eq!(eval_ext("RESULT = any((0, '', None))"), "False");
    assert_eq!(eval_ext("RESULT = ..."), "Ellipsis");
}

#[test]
fn test_print_output_is_captured() {
    let options = Options {
        extended: true,
        ..Options::default()
    };
    let stream = compile_source("print(1, 'two')\nprint([3])\nRESULT = None", &options).unwrap();
    let mut machine = Machine::new();
    let value = machine.run(&stream).unwrap();
    assert_eq!(machine.take_output(), "1 two\n[3]\n");
    assert_eq!(value.to_string(), "None");
}

#[test]
fn test_opcode_macros() {
    assert_eq!(eval("RESULT = GLOBAL('operator', 'neg')(7)"), "-7");
    // STACK_GLOBAL takes its module and name from the stack
    assert_eq!(eval("RESULT = STACK_GLOBAL('oper' + 'ator', 'neg')(7)"), "-7");
    assert_eq!(
        eval("RESULT = INST('collections', 'OrderedDict', ())"),
        "<collections.OrderedDict object>"
    );
    assert_eq!(
        eval("RESULT = BUILD(INST('argparse', 'Namespace', ()), {'x': 5}, None)"),
        "<argparse.Namespace object x=5>"
    );
}

#[test]
fn test_every_protocol_loads_the_same_value() {
    let source = "x = {'k': [1, 2]}\nRESULT = (x, x, 250, 70000, 2 ** 40, -1)";
    let expected = eval(source);
    for protocol in 0..=5 {
        let options = Options {
            protocol,
            ..Options::default()
        };
        assert_eq!(load(source, &options), expected, "protocol {protocol}");
    }
}

#[test]
fn test_optimized_streams_load_the_same_value() {
    let source = "x = [1, 2]\ny = x[0] + x[1]\nRESULT = [x, y, 'done']";
    let plain = compile_source(source, &Options::default()).unwrap();
    let optimized = compile_source(
        source,
        &Options {
            optimize: true,
            ..Options::default()
        },
    )
    .unwrap();

    let mut machine = Machine::new();
    let a = machine.run(&plain).unwrap().to_string();
    let b = machine.run(&optimized).unwrap().to_string();
    assert_eq!(a, b);
}

#[test]
fn test_optimizer_strips_unread_slots() {
    // `x` is never read again, so its memo write goes away. Protocol 2
    // keeps FRAME records out of the comparison.
    let source = "x = 1\ny = 2\nRESULT = (y, y)";
    let options = Options {
        protocol: 2,
        ..Options::default()
    };
    let plain = compile_source(source, &options).unwrap();
    let optimized = compile_source(
        source,
        &Options {
            optimize: true,
            ..options
        },
    )
    .unwrap();

    assert!(optimized.len() < plain.len());
    let mut machine = Machine::new();
    assert_eq!(machine.run(&optimized).unwrap().to_string(), "(2, 2)");
}

#[test]
fn test_unbound_names_are_rejected_with_a_position() {
    let source = "x = 1\ny = missing_name";
    let err = compile_source(source, &Options::default()).unwrap_err();
    assert_eq!(err.line(source), 2);
    assert!(err.to_string().contains("'missing_name' is not defined"));
}

#[test]
fn test_result_misuse_is_rejected() {
    // RESULT anywhere but a final assignment target
    assert!(compile_source("RESULT = 1\nx = 2", &Options::default()).is_err());
    assert!(compile_source("x = RESULT", &Options::default()).is_err());
    // A program without a final RESULT is fine; it loads as None
    assert_eq!(eval("x = 1"), "None");
}

#[test]
fn test_unsupported_targets_are_rejected() {
    let err = compile_source("a, b = (1, 2)", &Options::default()).unwrap_err();
    assert!(err.to_string().contains("unpacking"));
}

#[test]
fn test_lambdas_are_rejected_unless_enabled() {
    assert!(compile_source("RESULT = lambda x: x", &Options::default()).is_err());
}

#[test]
fn test_bytes_need_protocol_3() {
    let options = Options {
        protocol: 2,
        ..Options::default()
    };
    let err = compile_source("RESULT = b'ab'", &options).unwrap_err();
    assert!(err.to_string().contains("protocol 3"));

    let options = Options {
        protocol: 3,
        ..Options::default()
    };
    assert_eq!(load("RESULT = b'ab'", &options), "b'ab'");
}

#[test]
fn test_expression_statements_leave_the_stack_balanced() {
    assert_eq!(eval_ext("len('xx')\n1 + 1\nRESULT = 'ok'"), "'ok'");
}
