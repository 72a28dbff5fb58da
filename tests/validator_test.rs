// ABOUTME: Compile-error taxonomy coverage through the public pipeline

use plang::error::{CompileError, ErrorKind, PlangError};
use plang::interpreter::Interpreter;

fn compile_errors(source: &str) -> Vec<CompileError> {
    match Interpreter::new().interpret(source) {
        Err(PlangError::Compile(errors)) => errors,
        other => panic!("expected compile errors for {source:?}, got {other:?}"),
    }
}

fn expect_kind(source: &str, kind: ErrorKind) {
    let errors = compile_errors(source);
    assert!(
        errors.iter().any(|e| e.kind == kind),
        "expected {kind:?} for {source:?}, got {errors:?}"
    );
}

#[test]
fn test_syntax_errors_carry_positions() {
    let errors = compile_errors("var = 3");
    assert_eq!(errors[0].kind, ErrorKind::Syntax);
    assert_eq!(errors[0].pos.line, 1);
    assert!(errors[0].pos.col > 1);
}

#[test]
fn test_error_accumulation_stops_at_limit() {
    let errors = compile_errors("@ 1\n@ 2\n@ 3\n@ 4\n@ 5");
    assert_eq!(errors.len(), 3);
}

#[test]
fn test_undeclared() {
    expect_kind("nope + 1", ErrorKind::Undeclared);
}

#[test]
fn test_redeclaration() {
    expect_kind("var x = 1; var x = 2", ErrorKind::Redeclaration);
    expect_kind("var length = 1", ErrorKind::Redeclaration);
    expect_kind("fn print(x) x", ErrorKind::Redeclaration);
}

#[test]
fn test_type_mismatches() {
    expect_kind("var x: String = 3", ErrorKind::TypeMismatch);
    expect_kind("var x: [Integer] = [1]; x = [\"s\"]", ErrorKind::TypeMismatch);
    expect_kind("fn f() -> Integer \"s\"", ErrorKind::TypeMismatch);
    expect_kind("fn f() -> Integer { return \"s\" }", ErrorKind::TypeMismatch);
    expect_kind("fn f(n: Integer) n\nf(\"s\")", ErrorKind::TypeMismatch);
    expect_kind("var a: [Integer] = [1]; a[0] = \"s\"", ErrorKind::TypeMismatch);
    expect_kind("throw 42", ErrorKind::TypeMismatch);
}

#[test]
fn test_bad_operator_operands() {
    expect_kind(r#"var a = "45"; a * 2"#, ErrorKind::BadOperatorOperand);
    expect_kind("[1] + [2]", ErrorKind::BadOperatorOperand);
    expect_kind("var m = {\"a\": 1}; m ~ \"x\"", ErrorKind::BadOperatorOperand);
    expect_kind("3 = 4", ErrorKind::BadOperatorOperand);
    expect_kind("++3", ErrorKind::BadOperatorOperand);
}

#[test]
fn test_invalid_contexts() {
    expect_kind("next", ErrorKind::InvalidContext);
    expect_kind("last", ErrorKind::InvalidContext);
    expect_kind("return 1", ErrorKind::InvalidContext);
    expect_kind("else 1", ErrorKind::InvalidContext);
    expect_kind("catch 1", ErrorKind::InvalidContext);
    expect_kind("1..3", ErrorKind::InvalidContext);
}

#[test]
fn test_bad_calls() {
    expect_kind("fn f(a, b) a\nf(1)", ErrorKind::BadCall);
    expect_kind("fn f(a) a\nf(1, 2)", ErrorKind::BadCall);
    expect_kind("fn f(a) a\nf(b = 1)", ErrorKind::BadCall);
    expect_kind("print(\"x\", \"y\", \"z\")", ErrorKind::BadCall);
    expect_kind("var n = 3; n(1)", ErrorKind::BadCall);
    expect_kind("fn f(a = 1, b) a", ErrorKind::BadCall);
}

#[test]
fn test_catch_shape() {
    expect_kind("try throw \"x\" catch (\"a\") 1", ErrorKind::MissingDefaultCatch);
    expect_kind(
        "try throw \"x\" catch (\"a\") 1 catch (\"a\") 2 catch 3",
        ErrorKind::DuplicateCatch,
    );
    expect_kind("try throw \"x\" catch 1 catch 2", ErrorKind::DuplicateCatch);
}

#[test]
fn test_unknown_type_name() {
    expect_kind("var x: Wibble = 1", ErrorKind::UnknownKeyword);
}

#[test]
fn test_truthy_context_restrictions() {
    expect_kind("if null then 1 else 2", ErrorKind::TypeMismatch);
    expect_kind("var a = [1]; while a { 1 }", ErrorKind::TypeMismatch);
    expect_kind("var m = {\"k\": 1}; !m", ErrorKind::TypeMismatch);
    expect_kind("fn f() 1\nf && true", ErrorKind::TypeMismatch);
}

#[test]
fn test_messages_name_the_variable() {
    let errors = compile_errors("var total: Integer = \"x\"");
    assert!(errors[0].message.contains("`total`"));
    let errors = compile_errors("mystery");
    assert!(errors[0].message.contains("`mystery`"));
}

#[test]
fn test_valid_programs_have_no_errors() {
    for source in [
        "var x: Integer | Null = null",
        "var xs: [Integer] = [1, 2]",
        "var m: {a: Integer} = {\"a\": 1}",
        "fn apply(f: Function(Integer) -> Integer, n: Integer) f(n)\napply(fn(x) x + 1, 3)",
        "var f: Builtin = print",
        "while 1 { if true then next else last }",
        "try 1 catch 2",
    ] {
        Interpreter::new()
            .interpret(source)
            .unwrap_or_else(|e| panic!("{source:?} should be valid: {e}"));
    }
}
