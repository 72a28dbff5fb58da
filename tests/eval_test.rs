// ABOUTME: Evaluator semantics: scoping, closures, signals, slots

use plang::eval::Output;
use plang::interpreter::Interpreter;
use plang::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

fn run(source: &str) -> Value {
    Interpreter::new()
        .interpret(source)
        .expect("program should run")
}

fn run_with_output(source: &str) -> (Value, String) {
    let buf = Rc::new(RefCell::new(String::new()));
    let mut interp = Interpreter::new();
    interp.set_output(Output::Buffer(buf.clone()));
    let value = interp.interpret(source).expect("program should run");
    let out = buf.borrow().clone();
    (value, out)
}

#[test]
fn test_sibling_closures_do_not_share_state() {
    let value = run(
        r#"
        fn counter { var i = 0; fn ++i }
        var a = counter()
        var b = counter()
        a() a() b()
        "#,
    );
    // b has its own i; a advanced its own twice.
    assert_eq!(value, Value::Integer(1));
}

#[test]
fn test_closure_observes_and_mutates_the_same_slot() {
    let value = run(
        r#"
        fn box {
            var x = 10
            var bump = fn x = x + 5
            var read = fn x
            bump()
            read()
        }
        box()
        "#,
    );
    assert_eq!(value, Value::Integer(15));
}

#[test]
fn test_group_scopes_shadow_and_release() {
    let value = run(
        r#"
        var x = 1
        { var x = 2; x = 3 }
        x
        "#,
    );
    assert_eq!(value, Value::Integer(1));
}

#[test]
fn test_short_circuit_evaluation() {
    let (_, out) = run_with_output(
        r#"
        fn touch(tag) { print(tag); true }
        false && touch("and")
        true || touch("or")
        true && touch("ran")
        "#,
    );
    assert_eq!(out, "ran\n");
}

#[test]
fn test_signals_cross_group_boundaries() {
    let value = run(
        r#"
        fn find(limit) {
            var i = 0
            while true {
                ++i
                { if i > limit then return i }
            }
            0
        }
        find(3)
        "#,
    );
    assert_eq!(value, Value::Integer(4));
}

#[test]
fn test_throw_unwinds_nested_calls() {
    let value = run(
        r#"
        fn inner { throw "deep" }
        fn middle { inner(); "unreached" }
        try middle() catch ("deep") "caught deep" catch "caught other"
        "#,
    );
    assert_eq!(value, Value::Str("caught deep".into()));
}

#[test]
fn test_arrays_are_shared_handles() {
    let value = run(
        r#"
        var a = [1, 2]
        var b = a
        b[0] = 99
        a[0]
        "#,
    );
    assert_eq!(value, Value::Integer(99));
}

#[test]
fn test_array_element_assignment_and_append() {
    let value = run("var a = [1, 2, 3]; a[1] = 20; a[3] = 4; a");
    assert_eq!(
        value,
        Value::array_from([
            Value::Integer(1),
            Value::Integer(20),
            Value::Integer(3),
            Value::Integer(4),
        ])
    );
}

#[test]
fn test_string_slot_assignment_writes_back() {
    let value = run(r#"var s = "Good-bye!"; s[5..7] = "night"; s"#);
    assert_eq!(value, Value::Str("Good-night!".into()));
    let value = run(r#"var s = "cat"; s[0] = "b"; s"#);
    assert_eq!(value, Value::Str("bat".into()));
}

#[test]
fn test_map_insertion_order_vs_sorted_print() {
    let value = run(r#"var m = {"b": 1}; m["a"] = 2; m"#);
    // Stringification sorts by key...
    assert_eq!(value.to_string(), r#"{"a" = 2, "b" = 1}"#);
    // ...while keys keep insertion order.
    let keys = run(r#"var m = {"b": 1}; m["a"] = 2; keys m"#);
    assert_eq!(
        keys,
        Value::array_from([Value::Str("b".into()), Value::Str("a".into())])
    );
}

#[test]
fn test_delete_variable_binding() {
    let value = run("var x = 7; delete x");
    assert_eq!(value, Value::Integer(7));
}

#[test]
fn test_equality_promotes_numbers() {
    assert_eq!(run("1 == 1.0"), Value::Boolean(true));
    assert_eq!(run("1 != 2.0"), Value::Boolean(true));
    assert_eq!(run(r#""a" == "a""#), Value::Boolean(true));
    assert_eq!(run("[1,2] == [1,2]"), Value::Boolean(true));
    assert_eq!(run(r#"{"a": 1} == {"a": 1}"#), Value::Boolean(true));
}

#[test]
fn test_division_semantics() {
    assert_eq!(run("7 / 2"), Value::Integer(3));
    assert_eq!(run("7.0 / 2"), Value::Real(3.5));
    let value = run(r#"try 1 / 0 catch ("division by zero") "caught" catch "other""#);
    assert_eq!(value, Value::Str("caught".into()));
}

#[test]
fn test_interpolation_runs_in_current_scope() {
    let value = run(
        r#"
        fn describe(n) {
            var squared = n * n
            $"{n} squared is {squared}"
        }
        describe(7)
        "#,
    );
    assert_eq!(value, Value::Str("7 squared is 49".into()));
}

#[test]
fn test_interpolation_error_is_catchable() {
    let value = run(r#"try $"{missing_name}" catch "bad span""#);
    assert_eq!(value, Value::Str("bad span".into()));
}

#[test]
fn test_while_value_is_null() {
    assert_eq!(run("var i = 0; while i < 3 { ++i }"), Value::Null);
}

#[test]
fn test_conditional_branches_lazily() {
    let (_, out) = run_with_output(
        r#"
        fn loud(tag) { print(tag); tag }
        true ? loud("yes") : loud("no")
        "#,
    );
    assert_eq!(out, "yes\n");
}

#[test]
fn test_compound_assignment_on_slots() {
    let value = run(r#"var m = {"n": 10}; m["n"] += 5; m["n"]"#);
    assert_eq!(value, Value::Integer(15));
    let value = run("var a = [1, 2]; a[1] *= 10; a[1]");
    assert_eq!(value, Value::Integer(20));
}

#[test]
fn test_functions_are_first_class() {
    let value = run(
        r#"
        fn twice(f, x) f(f(x))
        twice(fn(n) n + 3, 10)
        "#,
    );
    assert_eq!(value, Value::Integer(16));
}

#[test]
fn test_parameter_defaults_evaluate_in_call_scope() {
    let value = run(
        r#"
        fn tail(list, n = length(list) - 1) list[n]
        tail([10, 20, 30])
        "#,
    );
    assert_eq!(value, Value::Integer(30));
}
