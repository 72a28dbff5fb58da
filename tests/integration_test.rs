// ABOUTME: Integration tests running whole programs through the pipeline

use plang::eval::Output;
use plang::interpreter::Interpreter;
use plang::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Run a program and return its final value.
fn run(source: &str) -> Value {
    Interpreter::new()
        .interpret(source)
        .expect("program should run")
}

/// Run a program capturing everything `print` writes.
fn run_with_output(source: &str) -> (Value, String) {
    let buf = Rc::new(RefCell::new(String::new()));
    let mut interp = Interpreter::new();
    interp.set_output(Output::Buffer(buf.clone()));
    let value = interp.interpret(source).expect("program should run");
    let out = buf.borrow().clone();
    (value, out)
}

#[test]
fn test_print_and_final_value() {
    let (value, out) = run_with_output(r#"print("hello", " ") print("world")  42"#);
    assert_eq!(out, "hello world\n");
    assert_eq!(value, Value::Integer(42));
    assert_eq!(value.type_of().to_string(), "Integer");
}

#[test]
fn test_recursive_fibonacci() {
    let value = run("fn fib(n) n == 1 ? 1 : n == 2 ? 1 : fib(n-1) + fib(n-2); fib(12)");
    assert_eq!(value, Value::Integer(144));
}

#[test]
fn test_closures_share_their_defining_scope() {
    let value = run(
        r#"
        fn counter { var i = 0; fn ++i }
        var a = counter()
        var b = counter()
        $"{a()} {a()} {a()} {b()} {a()} {b()}"
        "#,
    );
    assert_eq!(value, Value::Str("1 2 3 1 4 2".into()));
    assert_eq!(value.type_of().to_string(), "String");
}

#[test]
fn test_nested_map_access() {
    let value = run(r#"var m = {"x": {"y": 42}}; m["x"]["y"]"#);
    assert_eq!(value, Value::Integer(42));
}

#[test]
fn test_string_range_assignment() {
    let value = run(r#""Good-bye!"[5..7] = "night""#);
    assert_eq!(value, Value::Str("Good-night!".into()));
}

#[test]
fn test_string_plus_integer_is_a_compile_error() {
    let err = Interpreter::new()
        .interpret(r#"var a = "45"; a + 1"#)
        .expect_err("should not compile");
    assert!(err
        .to_string()
        .contains("cannot apply binary operator ADD (have types String and Integer)"));
}

#[test]
fn test_function_values_defer_evaluation() {
    let (value, out) = run_with_output(
        r#"fn force(f) f(); fn a(x){print("a");x}; var lazy = fn 1 + a(2); print("b"); force(lazy)"#,
    );
    assert_eq!(out, "b\na\n");
    assert_eq!(value, Value::Integer(3));
}

#[test]
fn test_filter_keeps_matching_elements() {
    let value = run("filter([1,2,3,4,5], fn(x) x<4)");
    assert_eq!(
        value,
        Value::array_from([Value::Integer(1), Value::Integer(2), Value::Integer(3)])
    );
    assert_eq!(value.type_of().to_string(), "[Integer]");
}

#[test]
fn test_map_over_array() {
    let value = run("map(fn(x) x * 2, [1, 2, 3])");
    assert_eq!(
        value,
        Value::array_from([Value::Integer(2), Value::Integer(4), Value::Integer(6)])
    );
}

#[test]
fn test_uniform_call_syntax() {
    assert_eq!(run("[1,2,3].length()"), Value::Integer(3));
    assert_eq!(run(r#""abc".length()"#), Value::Integer(3));
    assert_eq!(
        run("[1,2,3].map(fn(x) x + 1)"),
        Value::array_from([Value::Integer(2), Value::Integer(3), Value::Integer(4)])
    );
    assert_eq!(run(r#""45".Integer() + 1"#), Value::Integer(46));
}

#[test]
fn test_ufcs_matches_plain_call() {
    let direct = run("fn double(x) x * 2\ndouble(7)");
    let ufcs = run("fn double(x) x * 2\nvar n = 7\nn.double()");
    assert_eq!(direct, ufcs);
}

#[test]
fn test_conversions() {
    assert_eq!(run(r#"Integer("45abc")"#), Value::Integer(45));
    assert_eq!(run(r#"Integer(2.9)"#), Value::Integer(2));
    assert_eq!(run(r#"Boolean("")"#), Value::Boolean(false));
    assert_eq!(run(r#"Boolean("x")"#), Value::Boolean(true));
    assert_eq!(run(r#"Real("2.5rest")"#), Value::Real(2.5));
    assert_eq!(run(r#"Number("2.5")"#), Value::Real(2.5));
    assert_eq!(run(r#"Number("42")"#), Value::Integer(42));
    assert_eq!(run(r#"String(42)"#), Value::Str("42".into()));
    assert_eq!(run(r#"String([1,2])"#), Value::Str("[1,2]".into()));
    assert_eq!(run(r#"Null(99)"#), Value::Null);
    assert_eq!(
        run(r#"Array("[1, 2]")"#),
        Value::array_from([Value::Integer(1), Value::Integer(2)])
    );
    assert_eq!(
        run(r#"Map("{\"k\": 1}")["k"]"#),
        Value::Integer(1)
    );
}

#[test]
fn test_failed_conversion_is_catchable() {
    let value = run(r#"try Integer([1]) catch "nope""#);
    assert_eq!(value, Value::Str("nope".into()));
}

#[test]
fn test_try_catch_dispatch() {
    let value = run(
        r#"
        fn risky(n) {
            if n == 1 then throw "first"
            if n == 2 then throw "second"
            "fine"
        }
        var got = ""
        got = got . (try risky(1) catch ("first") "F" catch "D")
        got = got . (try risky(2) catch ("first") "F" catch "D")
        got = got . (try risky(3) catch ("first") "F" catch "D")
        got
        "#,
    );
    assert_eq!(value, Value::Str("FDfine".into()));
}

#[test]
fn test_uncaught_throw_reaches_the_host() {
    let err = Interpreter::new()
        .interpret(r#"try throw "inner" catch ("other") 1 catch throw "outer""#)
        .expect_err("uncaught");
    assert!(err.to_string().contains("outer"));
}

#[test]
fn test_while_with_next_and_last() {
    let value = run(
        r#"
        var i = 0
        var sum = 0
        while i < 10 {
            ++i
            if i % 2 == 0 then next
            if i > 7 then last
            sum += i
        }
        sum
        "#,
    );
    assert_eq!(value, Value::Integer(16));
}

#[test]
fn test_type_declaration_with_default() {
    let value = run("type Celsius: Real = 20.0\nvar t: Celsius\nt");
    assert_eq!(value, Value::Real(20.0));
}

#[test]
fn test_exists_delete_keys_values() {
    assert_eq!(run(r#"var m = {"a": 1}; exists m["a"]"#), Value::Boolean(true));
    assert_eq!(run(r#"var m = {"a": 1}; exists m["b"]"#), Value::Boolean(false));
    assert_eq!(run(r#"var m = {"a": 1}; delete m["a"]"#), Value::Integer(1));
    assert_eq!(run(r#"var m = {"a": 1}; delete m["zz"]"#), Value::Null);
    assert_eq!(
        run(r#"var m = {"b": 1, "a": 2}; keys m"#),
        Value::array_from([Value::Str("b".into()), Value::Str("a".into())])
    );
    assert_eq!(
        run(r#"var m = {"b": 1, "a": 2}; values m"#),
        Value::array_from([Value::Integer(1), Value::Integer(2)])
    );
    // Deleting the whole map empties it in place.
    assert_eq!(run(r#"var m = {"a": 1}; delete m; length(m)"#), Value::Integer(0));
}

#[test]
fn test_map_extension_through_assignment() {
    let value = run(r#"var m = {"a": 1}; m["b"] = 2; length(m)"#);
    assert_eq!(value, Value::Integer(2));
}

#[test]
fn test_operators() {
    assert_eq!(run("0xFF"), Value::Integer(255));
    assert_eq!(run("2 ** 10"), Value::Integer(1024));
    assert_eq!(run("2 ^ 10"), Value::Integer(1024));
    assert_eq!(run("7 % 4"), Value::Integer(3));
    assert_eq!(run("true ^^ false"), Value::Boolean(true));
    assert_eq!(run("true ^^ true"), Value::Boolean(false));
    assert_eq!(run(r#""hello world" ~ "world""#), Value::Integer(6));
    assert_eq!(run(r#""hello" ~ "zzz""#), Value::Integer(-1));
    assert_eq!(run("1 + 2.5"), Value::Real(3.5));
    assert_eq!(run("var x = 2; x ^= 3; x"), Value::Integer(8));
    assert_eq!(run("var x = 10; x /= 2; x"), Value::Integer(5));
    assert_eq!(run("not (1 == 2) and 3 > 2 or false"), Value::Boolean(true));
}

#[test]
fn test_increments() {
    assert_eq!(run("var i = 5; ++i"), Value::Integer(6));
    assert_eq!(run("var i = 5; i++"), Value::Integer(5));
    assert_eq!(run("var i = 5; i++; i"), Value::Integer(6));
    assert_eq!(run("var i = 5; --i; i--; i"), Value::Integer(3));
    assert_eq!(run(r#"var m = {"n": 1}; ++m["n"]; m["n"]"#), Value::Integer(2));
}

#[test]
fn test_negative_indices() {
    assert_eq!(run("[1,2,3][-1]"), Value::Integer(3));
    assert_eq!(run(r#""hello"[-1]"#), Value::Str("o".into()));
    assert_eq!(run(r#""hello"[1..3]"#), Value::Str("ell".into()));
    assert_eq!(
        run("[1,2,3,4][1..2]"),
        Value::array_from([Value::Integer(2), Value::Integer(3)])
    );
}

#[test]
fn test_missing_map_key_reads_null() {
    assert_eq!(run(r#"var m = {"a": 1}; m["missing"]"#), Value::Null);
}

#[test]
fn test_interpolation() {
    assert_eq!(
        run(r#"$"sum is {1 + 2}""#),
        Value::Str("sum is 3".into())
    );
    assert_eq!(
        run(r#"var who = "world"; $"hello {who}\n""#),
        Value::Str("hello world\n".into())
    );
    // Escaped braces stay literal.
    assert_eq!(run(r#"$"\{not a span}""#), Value::Str("{not a span}".into()));
}

#[test]
fn test_recursion_limit_is_catchable() {
    let mut interp = Interpreter::new();
    interp.set_max_depth(64);
    let value = interp
        .interpret(r#"fn boom() boom(); try boom() catch ("maximum call depth exceeded") "caught" catch "other""#)
        .expect("limit should be catchable");
    assert_eq!(value, Value::Str("caught".into()));
}

#[test]
fn test_named_arguments_and_defaults() {
    let (_, out) = run_with_output(r#"print("x", end = "") print("y")"#);
    assert_eq!(out, "xy\n");
    let value = run("fn join(a: String, sep: String = \"-\", b: String = \"z\") a . sep . b\njoin(\"q\")");
    assert_eq!(value, Value::Str("q-z".into()));
}

#[test]
fn test_truthiness_law() {
    for (source, expected) in [
        ("!!1", true),
        ("!!0", false),
        ("!!0.0", false),
        ("!!\"\"", false),
        ("!!\"x\"", true),
        ("!!true", true),
        ("!!false", false),
    ] {
        assert_eq!(run(source), Value::Boolean(expected), "{source}");
    }
}

#[test]
fn test_type_and_whatis() {
    assert_eq!(run("type([1,2,3])"), Value::Str("Array".into()));
    assert_eq!(run("whatis([1,2,3])"), Value::Str("[Integer]".into()));
    assert_eq!(run(r#"type({"a": 1})"#), Value::Str("Map".into()));
    assert_eq!(run("type(1)"), Value::Str("Integer".into()));
    assert_eq!(run("whatis(print)"), Value::Str("Builtin(Any, String) -> Null".into()));
}

#[test]
fn test_return_coercion_to_real() {
    // The parameter is Any, so the check lands at runtime and the integer
    // widens into the declared Real return type.
    let value = run("fn f(x) -> Real x\nf(1)");
    assert_eq!(value, Value::Real(1.0));
}

#[test]
fn test_group_value_is_last_expression() {
    assert_eq!(run("{ 1; 2; 3 }"), Value::Integer(3));
    assert_eq!(run("var x = { var y = 4; y * 2 }; x"), Value::Integer(8));
}
