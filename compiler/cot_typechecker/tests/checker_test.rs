//! Integration tests for the type checker

use cot_lexer::Lexer;
use cot_parser::Parser;
use cot_typechecker::{TypeChecker, TypeDesc};

fn check(source: &str) -> (cot_typechecker::CheckedModule, cot_common::Diagnostics) {
    let tokens = Lexer::new(source, 0).tokenize();
    let mut parser = Parser::new(tokens);
    let module = parser.parse_module();
    assert!(!parser.diagnostics().has_errors(), "parse errors in test source");
    TypeChecker::new().check_module(&module)
}

fn check_ok(source: &str) -> cot_typechecker::CheckedModule {
    let (checked, diags) = check(source);
    assert!(
        !diags.has_errors(),
        "unexpected type errors: {:?}",
        diags.errors().collect::<Vec<_>>()
    );
    checked
}

fn error_messages(source: &str) -> Vec<String> {
    let (_, diags) = check(source);
    diags.errors().map(|d| d.message.clone()).collect()
}

#[test]
fn literals_get_primitive_types() {
    let checked = check_ok(r#"fn f() { var a = 1; var b = 1.5; var c = "s"; var d = true }"#);
    assert!(!checked.expr_types.is_empty());
}

#[test]
fn undefined_identifier_is_reported_once() {
    let errors = error_messages("fn f() { var x = missing + 1 }");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("undefined identifier"));
}

#[test]
fn arithmetic_widens_per_promotion_table() {
    check_ok("fn f(a: i32, b: i64, c: f64) { var x = a + b; var y = b + c }");
}

#[test]
fn string_concat_is_allowed() {
    check_ok(r#"fn f() { var s = "a" + "b" }"#);
}

#[test]
fn comparison_yields_bool() {
    check_ok("fn f(a: i64) { if (a < 10) { } }");
    let errors = error_messages(r#"fn f(a: i64) { if (a < "x") { } }"#);
    assert!(errors.iter().any(|e| e.contains("cannot compare")));
}

#[test]
fn logical_operators_need_bool() {
    let errors = error_messages("fn f(a: i64) { if (a && true) { } }");
    assert!(errors.iter().any(|e| e.contains("expected bool")));
}

#[test]
fn call_arity_is_checked() {
    let errors = error_messages(
        "fn add(a: i64, b: i64) i64 { return a + b } fn f() { add(1) }",
    );
    assert!(errors.iter().any(|e| e.contains("expects 2 argument")));
}

#[test]
fn forward_references_resolve() {
    check_ok("fn f() i64 { return g() } fn g() i64 { return 1 }");
}

#[test]
fn struct_field_access_and_missing_field() {
    check_ok(
        r#"struct Foo { name: string }
           fn f() { var x = Foo{ .name = "n" } println(x.name) }"#,
    );
    let errors = error_messages(
        r#"struct Foo { name: string }
           fn f() { var x = Foo{ .name = "n" } println(x.nam) }"#,
    );
    assert!(errors.iter().any(|e| e.contains("no field 'nam'")));
}

#[test]
fn struct_init_requires_all_fields() {
    let errors = error_messages(
        r#"struct Foo { a: i64, b: i64 }
           fn f() { var x = Foo{ .a = 1 } }"#,
    );
    assert!(errors.iter().any(|e| e.contains("missing field 'b'")));
}

#[test]
fn field_access_auto_derefs_pointers() {
    check_ok(
        r#"struct Item { value: i64 }
           fn f() { var p = new Item{ .value = 1 } var v = p.value }"#,
    );
}

#[test]
fn null_coerces_to_optional() {
    check_ok("struct Foo { a: i64 } fn f() { var p: ?*Foo = null }");
    let errors = error_messages("fn f() { var x: i64 = null }");
    assert!(errors.iter().any(|e| e.contains("type mismatch")));
}

#[test]
fn generic_list_methods_substitute_element_type() {
    let checked = check_ok(
        r#"struct Item { value: i64 }
           fn f() i64 {
               var items = new List<*Item>
               items.push(new Item{ .value = 1 })
               var r = items.get(0)
               return r.value
           }"#,
    );
    // r.value resolved through *Item, so the method return type must have
    // been substituted to *Item.
    assert!(!checked.expr_types.is_empty());
}

#[test]
fn generic_instances_are_deduplicated() {
    let checked = check_ok(
        "fn f() { var a = new List<i64> var b = new List<i64> var c = new List<string> }",
    );
    let mut instance_ids = std::collections::HashSet::new();
    for ty in checked.expr_types.values() {
        if matches!(checked.registry.get(*ty), TypeDesc::GenericInstance { .. }) {
            instance_ids.insert(*ty);
        }
    }
    assert_eq!(instance_ids.len(), 2, "List<i64> must share one id");
}

#[test]
fn map_methods_use_key_and_value_types() {
    check_ok(
        r#"fn f() {
               var m = new Map<string, i64>
               m.set("a", 1)
               var v = m.get("a")
               var has = m.has("a")
               if (has) { m.delete("a") }
           }"#,
    );
}

#[test]
fn switch_on_enum_requires_exhaustiveness() {
    let errors = error_messages(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) {
               switch s { Circle(r) => { } }
           }"#,
    );
    assert!(errors.iter().any(|e| e.contains("non-exhaustive switch")));

    check_ok(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) {
               switch s { Circle(r) => { }, Point => { } }
           }"#,
    );
    check_ok(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) {
               switch s { Circle(r) => { }, _ => { } }
           }"#,
    );
}

#[test]
fn switch_payload_bindings_have_payload_types() {
    check_ok(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) f64 {
               switch s {
                   Circle(r) => { return r * 2.0 },
                   Point => { return 0.0 }
               }
               return 0.0
           }"#,
    );
}

#[test]
fn method_calls_resolve_through_impl_blocks() {
    let checked = check_ok(
        r#"struct Circle { radius: f64 }
           impl Circle {
               fn area(self_: *Circle) f64 { return self_.radius * self_.radius * 3.14 }
           }
           fn f(c: *Circle) f64 { return c.area() }"#,
    );
    assert_eq!(checked.method_targets.len(), 1);
    assert!(checked.functions.contains_key("Circle::area"));
}

#[test]
fn trait_conformance_is_verified() {
    let errors = error_messages(
        r#"struct Foo { a: i64 }
           trait Printable { fn describe() string }
           impl Printable for Foo { }"#,
    );
    assert!(errors.iter().any(|e| e.contains("missing method 'describe'")));

    check_ok(
        r#"struct Foo { a: i64 }
           trait Printable { fn describe() string }
           impl Printable for Foo {
               fn describe(self_: *Foo) string { return "foo" }
           }"#,
    );
}

#[test]
fn poisoned_expressions_do_not_cascade() {
    // One undefined identifier used many times: exactly one diagnostic.
    let errors = error_messages("fn f() { var x = oops; var y = x + 1; var z = y * 2 }");
    assert_eq!(errors.len(), 1);
}

#[test]
fn string_indexing_yields_byte_value() {
    let checked = check_ok(r#"fn f() i64 { var s = "abc" return s[0] }"#);
    let _ = checked;
}

#[test]
fn cast_rules() {
    check_ok("fn f(a: i64) f64 { return a as f64 }");
    let errors = error_messages(r#"fn f(s: string) i64 { return s as i64 }"#);
    assert!(errors.iter().any(|e| e.contains("invalid cast")));
}

#[test]
fn range_bounds_must_be_integers() {
    check_ok("fn f() { for i in 0..10 { } }");
    let errors = error_messages(r#"fn f() { for i in "a".."b" { } }"#);
    assert!(!errors.is_empty());
}

#[test]
fn const_cannot_be_reassigned() {
    let errors = error_messages("fn f() { const X = 1; X = 2 }");
    assert!(errors.iter().any(|e| e.contains("cannot assign to constant")));
}

#[test]
fn duplicate_definitions_are_reported() {
    let errors = error_messages("struct Foo { a: i64 } struct Foo { b: i64 }");
    assert!(errors.iter().any(|e| e.contains("duplicate definition")));
}

#[test]
fn lambda_gets_function_type() {
    check_ok(
        "fn f() i64 { var add = |a: i64, b: i64| a + b return add(1, 2) }",
    );
}

#[test]
fn nested_declarations_in_function_bodies() {
    check_ok(
        r#"fn main() i64 {
               struct Pair { a: i64, b: i64 }
               type Num = i64
               fn double(x: i64) i64 { return x * 2 }
               var p = Pair{ .a = 1, .b = 2 }
               var n: Num = p.a
               return double(n + p.b)
           }"#,
    );
}

#[test]
fn local_enums_construct_and_switch() {
    check_ok(
        r#"fn f() i64 {
               enum Sign { Neg, Zero, Pos(i64) }
               var s = Sign::Pos(3)
               switch s {
                   Pos(v) => { return v },
                   _ => { return 0 }
               }
               return 0
           }"#,
    );
}

#[test]
fn local_functions_can_recurse() {
    check_ok(
        r#"fn main() i64 {
               fn fact(n: i64) i64 {
                   if (n <= 1) { return 1 }
                   return n * fact(n - 1)
               }
               return fact(5)
           }"#,
    );
}

#[test]
fn local_functions_do_not_see_enclosing_locals() {
    let errors = error_messages(
        r#"fn main() i64 {
               var captured = 1
               fn f() i64 { return captured }
               return f()
           }"#,
    );
    assert!(errors.iter().any(|e| e.contains("undefined identifier 'captured'")));
}

#[test]
fn local_types_go_out_of_scope() {
    let errors = error_messages(
        r#"fn f() {
               { struct P { a: i64 } }
               var x: P
           }"#,
    );
    assert!(errors.iter().any(|e| e.contains("unknown type 'P'")));
}

#[test]
fn nested_impl_blocks_are_rejected() {
    let errors = error_messages(
        r#"struct Foo { a: i64 }
           fn f() {
               impl Foo { fn get(self_: *Foo) i64 { return self_.a } }
           }"#,
    );
    assert!(errors.iter().any(|e| e.contains("module scope")));
}
