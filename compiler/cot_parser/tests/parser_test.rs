//! Integration tests for the parser

use cot_lexer::Lexer;
use cot_parser::*;

fn parse(source: &str) -> (Module, bool) {
    let tokens = Lexer::new(source, 0).tokenize();
    let mut parser = Parser::new(tokens);
    let module = parser.parse_module();
    let had_errors = parser.diagnostics().has_errors();
    (module, had_errors)
}

fn parse_ok(source: &str) -> Module {
    let (module, had_errors) = parse(source);
    assert!(!had_errors, "unexpected parse errors for: {}", source);
    module
}

fn first_fn(module: &Module) -> &Function {
    match &module.decls[0].kind {
        DeclKind::Function(f) => f,
        other => panic!("expected function, got {:?}", other),
    }
}

#[test]
fn parses_function_with_return() {
    let module = parse_ok("fn main() i64 { return 42 }");
    let f = first_fn(&module);
    assert_eq!(f.name.value, "main");
    assert!(f.params.is_empty());
    assert!(f.return_type.is_some());
    assert_eq!(f.body.statements.len(), 1);
    assert!(matches!(f.body.statements[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn precedence_mul_binds_tighter_than_add() {
    let module = parse_ok("fn main() i64 { return 1 + 2 * 3 }");
    let f = first_fn(&module);
    let StmtKind::Return(Some(expr)) = &f.body.statements[0].kind else {
        panic!("expected return");
    };
    let ExprKind::Binary { op: BinaryOp::Add, right, .. } = expr.kind.as_ref() else {
        panic!("expected top-level add, got {:?}", expr.kind);
    };
    assert!(matches!(
        right.kind.as_ref(),
        ExprKind::Binary { op: BinaryOp::Mul, .. }
    ));
}

#[test]
fn assignment_is_a_statement() {
    let module = parse_ok("fn f() { x = 1 y.z = 2 }");
    let f = first_fn(&module);
    assert!(matches!(&f.body.statements[0].kind, StmtKind::Assign { .. }));
    let StmtKind::Assign { target, .. } = &f.body.statements[1].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(target.kind.as_ref(), ExprKind::Field { .. }));
}

#[test]
fn struct_decl_and_init() {
    let module = parse_ok(
        r#"struct Foo { name: string, field_name: string }
           fn main() i64 { var f = Foo{ .name = "n", .field_name = "fn" } return 0 }"#,
    );
    assert!(matches!(&module.decls[0].kind, DeclKind::Struct(s) if s.fields.len() == 2));
    let f = match &module.decls[1].kind {
        DeclKind::Function(f) => f,
        _ => panic!(),
    };
    let StmtKind::Let(let_stmt) = &f.body.statements[0].kind else { panic!() };
    let init = let_stmt.initializer.as_ref().unwrap();
    let ExprKind::StructInit { fields, heap, .. } = init.kind.as_ref() else {
        panic!("expected struct init, got {:?}", init.kind);
    };
    assert!(!heap);
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].name.value, "name");
}

#[test]
fn new_struct_and_new_collection() {
    let module = parse_ok(
        r#"fn main() i64 {
               var items = new List<*Item>
               items.push(new Item{ .name = "first", .value = 1 })
               return 0
           }"#,
    );
    let f = first_fn(&module);
    let StmtKind::Let(let_stmt) = &f.body.statements[0].kind else { panic!() };
    let ExprKind::CollectionInit { ty } = let_stmt.initializer.as_ref().unwrap().kind.as_ref()
    else {
        panic!("expected collection init");
    };
    let TypeRefKind::Named { name, generic_args } = ty.kind.as_ref() else { panic!() };
    assert_eq!(name, "List");
    assert!(matches!(generic_args[0].kind.as_ref(), TypeRefKind::Pointer(_)));

    let StmtKind::Expr(push) = &f.body.statements[1].kind else { panic!() };
    let ExprKind::MethodCall { method, args, .. } = push.kind.as_ref() else { panic!() };
    assert_eq!(method.value, "push");
    assert!(matches!(
        args[0].kind.as_ref(),
        ExprKind::StructInit { heap: true, .. }
    ));
}

#[test]
fn slice_expression() {
    let module = parse_ok("fn main() { println(s[0..1]) }");
    let f = first_fn(&module);
    let StmtKind::Expr(call) = &f.body.statements[0].kind else { panic!() };
    let ExprKind::Call { args, .. } = call.kind.as_ref() else { panic!() };
    assert!(matches!(args[0].kind.as_ref(), ExprKind::Slice { .. }));
}

#[test]
fn for_over_range_and_collection() {
    let module = parse_ok("fn f() { for i in 0..10 { } for x in items { } }");
    let f = first_fn(&module);
    let StmtKind::For(range_loop) = &f.body.statements[0].kind else { panic!() };
    assert!(matches!(
        range_loop.iterable.kind.as_ref(),
        ExprKind::Range { inclusive: false, .. }
    ));
    let StmtKind::For(coll_loop) = &f.body.statements[1].kind else { panic!() };
    assert!(matches!(coll_loop.iterable.kind.as_ref(), ExprKind::Identifier(_)));
}

#[test]
fn switch_with_payload_bindings_and_wildcard() {
    let module = parse_ok(
        r#"fn f(e: Shape) {
               switch e {
                   Circle(r) => { println("c") },
                   Rect(w, h) => { println("r") },
                   _ => { println("other") }
               }
           }"#,
    );
    let f = first_fn(&module);
    let StmtKind::Switch(sw) = &f.body.statements[0].kind else { panic!() };
    assert_eq!(sw.arms.len(), 3);
    assert!(matches!(&sw.arms[0].pattern, Pattern::Variant { bindings, .. } if bindings.len() == 1));
    assert!(matches!(&sw.arms[1].pattern, Pattern::Variant { bindings, .. } if bindings.len() == 2));
    assert!(matches!(&sw.arms[2].pattern, Pattern::Wildcard));
}

#[test]
fn enum_with_payload_variants() {
    let module = parse_ok("enum Shape { Circle(f64), Rect { w: f64, h: f64 }, Point }");
    let DeclKind::Enum(e) = &module.decls[0].kind else { panic!() };
    assert!(matches!(&e.variants[0].payload, VariantPayload::Tuple(t) if t.len() == 1));
    assert!(matches!(&e.variants[1].payload, VariantPayload::Struct(f) if f.len() == 2));
    assert!(matches!(&e.variants[2].payload, VariantPayload::Unit));
}

#[test]
fn impl_trait_for_type() {
    let module = parse_ok(
        "trait Printable { fn print(self_: *Foo) }
         impl Printable for Foo { fn print(self_: *Foo) { } }",
    );
    assert!(matches!(&module.decls[0].kind, DeclKind::Trait(_)));
    let DeclKind::Impl(imp) = &module.decls[1].kind else { panic!() };
    assert_eq!(imp.trait_name.as_ref().unwrap().value, "Printable");
    assert_eq!(imp.methods.len(), 1);
}

#[test]
fn defer_try_catch_throw() {
    let module = parse_ok(
        r#"fn f() {
               defer close(h)
               try { risky() } catch (e) { println("caught") }
               throw 1
           }"#,
    );
    let f = first_fn(&module);
    assert!(matches!(&f.body.statements[0].kind, StmtKind::Defer(_)));
    assert!(matches!(&f.body.statements[1].kind, StmtKind::TryCatch(_)));
    assert!(matches!(&f.body.statements[2].kind, StmtKind::Throw(_)));
}

#[test]
fn interpolated_string_expression() {
    let module = parse_ok(r#"fn f() { println("x=${x} done") }"#);
    let f = first_fn(&module);
    let StmtKind::Expr(call) = &f.body.statements[0].kind else { panic!() };
    let ExprKind::Call { args, .. } = call.kind.as_ref() else { panic!() };
    let ExprKind::InterpolatedString { segments, exprs } = args[0].kind.as_ref() else {
        panic!("expected interpolated string");
    };
    assert_eq!(segments.len(), 2);
    assert_eq!(exprs.len(), 1);
}

#[test]
fn ternary_and_null_coalesce() {
    let module = parse_ok("fn f() { var a = c ? x : y; var b = p ?: q }");
    let f = first_fn(&module);
    let StmtKind::Let(l0) = &f.body.statements[0].kind else { panic!() };
    assert!(matches!(
        l0.initializer.as_ref().unwrap().kind.as_ref(),
        ExprKind::Ternary { .. }
    ));
    let StmtKind::Let(l1) = &f.body.statements[1].kind else { panic!() };
    assert!(matches!(
        l1.initializer.as_ref().unwrap().kind.as_ref(),
        ExprKind::NullCoalesce { .. }
    ));
}

#[test]
fn cast_binds_looser_than_additive() {
    let module = parse_ok("fn f() { var x = a + b as i64 }");
    let f = first_fn(&module);
    let StmtKind::Let(l) = &f.body.statements[0].kind else { panic!() };
    // (a + b) as i64
    assert!(matches!(
        l.initializer.as_ref().unwrap().kind.as_ref(),
        ExprKind::Cast { .. }
    ));
}

#[test]
fn optional_chaining() {
    let module = parse_ok("fn f() { var a = p?.name; var b = xs?[0] }");
    let f = first_fn(&module);
    let StmtKind::Let(l0) = &f.body.statements[0].kind else { panic!() };
    assert!(matches!(
        l0.initializer.as_ref().unwrap().kind.as_ref(),
        ExprKind::OptionalField { .. }
    ));
    let StmtKind::Let(l1) = &f.body.statements[1].kind else { panic!() };
    assert!(matches!(
        l1.initializer.as_ref().unwrap().kind.as_ref(),
        ExprKind::OptionalIndex { .. }
    ));
}

#[test]
fn lambda_expression() {
    let module = parse_ok("fn f() { var add = |a: i64, b: i64| a + b }");
    let f = first_fn(&module);
    let StmtKind::Let(l) = &f.body.statements[0].kind else { panic!() };
    let ExprKind::Lambda { params, body } = l.initializer.as_ref().unwrap().kind.as_ref() else {
        panic!("expected lambda");
    };
    assert_eq!(params.len(), 2);
    assert_eq!(body.statements.len(), 1);
}

#[test]
fn nested_generic_args_with_right_shift() {
    let module = parse_ok("fn f() { var m = new Map<string, List<i64>> }");
    let f = first_fn(&module);
    let StmtKind::Let(l) = &f.body.statements[0].kind else { panic!() };
    let ExprKind::CollectionInit { ty } = l.initializer.as_ref().unwrap().kind.as_ref() else {
        panic!()
    };
    let TypeRefKind::Named { name, generic_args } = ty.kind.as_ref() else { panic!() };
    assert_eq!(name, "Map");
    assert_eq!(generic_args.len(), 2);
}

#[test]
fn import_test_and_comptime_decls() {
    let module = parse_ok(
        r#"import "std/io" as io
           test "adds numbers" { assert(1 + 1 == 2) }
           comptime { var x = 1 }"#,
    );
    assert!(matches!(&module.decls[0].kind, DeclKind::Import(i) if i.alias.is_some()));
    assert!(matches!(&module.decls[1].kind, DeclKind::Test(_)));
    assert!(matches!(&module.decls[2].kind, DeclKind::Comptime(_)));
}

#[test]
fn error_recovery_reports_and_continues() {
    let (module, had_errors) = parse("fn f( { } fn g() { return 1 }");
    assert!(had_errors);
    // The second function must still be parsed.
    assert!(module
        .decls
        .iter()
        .any(|d| matches!(&d.kind, DeclKind::Function(f) if f.name.value == "g")));
}

#[test]
fn all_child_references_are_materialized() {
    // Reference integrity: walk a representative program; no panics means
    // every non-optional child was stored.
    let module = parse_ok(
        r#"fn fib(n: i64) i64 {
               if (n <= 1) { return n }
               return fib(n - 1) + fib(n - 2)
           }
           fn main() i64 { return fib(10) }"#,
    );
    fn walk_block(b: &Block) {
        for s in &b.statements {
            walk_stmt(s);
        }
    }
    fn walk_stmt(s: &Stmt) {
        match &s.kind {
            StmtKind::Return(Some(e)) | StmtKind::Expr(e) | StmtKind::Defer(e)
            | StmtKind::Throw(e) => walk_expr(e),
            StmtKind::If(i) => {
                walk_expr(&i.condition);
                walk_block(&i.then_branch);
                if let Some(e) = &i.else_branch {
                    walk_stmt(e);
                }
            }
            _ => {}
        }
    }
    fn walk_expr(e: &Expr) {
        match e.kind.as_ref() {
            ExprKind::Binary { left, right, .. } => {
                walk_expr(left);
                walk_expr(right);
            }
            ExprKind::Call { callee, args } => {
                walk_expr(callee);
                args.iter().for_each(walk_expr);
            }
            _ => {}
        }
    }
    for decl in &module.decls {
        if let DeclKind::Function(f) = &decl.kind {
            walk_block(&f.body);
        }
    }
}
