//! Integration tests for AST-to-SSA lowering

use cot_ir::{lower_module, verify_function, Inst, Lowered};
use cot_lexer::Lexer;
use cot_parser::Parser;
use cot_typechecker::TypeChecker;

fn lower(source: &str) -> Lowered {
    let tokens = Lexer::new(source, 0).tokenize();
    let mut parser = Parser::new(tokens);
    let module = parser.parse_module();
    assert!(!parser.diagnostics().has_errors(), "parse errors in test source");
    let (checked, diags) = TypeChecker::new().check_module(&module);
    assert!(
        !diags.has_errors(),
        "type errors in test source: {:?}",
        diags.errors().collect::<Vec<_>>()
    );
    let lowered = lower_module(&module, checked);
    assert!(
        !lowered.diagnostics.has_errors(),
        "lowering errors: {:?}",
        lowered.diagnostics.errors().collect::<Vec<_>>()
    );
    lowered
}

fn all_insts(func: &cot_ir::Function) -> Vec<&Inst> {
    func.blocks.iter().flat_map(|b| b.insts.iter()).collect()
}

#[test]
fn every_block_is_terminated_and_verifies() {
    let lowered = lower(
        r#"fn fib(n: i64) i64 {
               if (n <= 1) { return n }
               return fib(n - 1) + fib(n - 2)
           }
           fn main() i64 { return fib(10) }"#,
    );
    for func in &lowered.module.functions {
        verify_function(func).expect("function must verify");
        for block in &func.blocks {
            assert!(block.is_terminated(), "{} bb{} unterminated", func.name, block.id);
        }
    }
}

#[test]
fn constant_folding_collapses_literal_arithmetic() {
    let lowered = lower("fn main() i64 { return 1 + 2 * 3 }");
    let func = lowered.module.function("main").unwrap();
    let insts = all_insts(func);
    // 2 * 3 folds to 6, then 1 + 6 folds to 7: a single constant reaches ret.
    assert!(insts.iter().any(|i| matches!(i, Inst::IConst { value: 7, .. })));
    assert!(!insts.iter().any(|i| matches!(i, Inst::IAdd { .. } | Inst::IMul { .. })));
}

#[test]
fn for_range_introduces_induction_phi() {
    let lowered = lower("fn main() i64 { var s = 0 for i in 0..10 { s = s + i } return s }");
    let func = lowered.module.function("main").unwrap();
    verify_function(func).unwrap();
    let phi_count = all_insts(func)
        .iter()
        .filter(|i| matches!(i, Inst::Phi { .. }))
        .count();
    // Induction variable plus the self-referencing loop bound.
    assert_eq!(phi_count, 2);
}

#[test]
fn short_circuit_lowers_to_diamond_with_phi() {
    let lowered = lower("fn f(a: bool, b: bool) bool { return a && b }");
    let func = lowered.module.function("f").unwrap();
    verify_function(func).unwrap();
    let insts = all_insts(func);
    assert!(insts.iter().any(|i| matches!(i, Inst::Phi { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::BrIf { .. })));
}

#[test]
fn defer_runs_on_normal_exit_in_lifo_order() {
    let lowered = lower(
        r#"fn f() {
               defer println("first")
               defer println("second")
               println("body")
           }"#,
    );
    let func = lowered.module.function("f").unwrap();
    // Defers are not lowered where declared, so "body" interns first (id 0).
    // At scope exit LIFO order lowers "second" (id 1) before "first" (id 2).
    let consts: Vec<u32> = all_insts(func)
        .iter()
        .filter_map(|i| match i {
            Inst::SConst { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(consts, vec![0, 1, 2]);
}

#[test]
fn defer_runs_before_return() {
    let lowered = lower(
        r#"fn f() i64 {
               defer println("cleanup")
               return 1
           }"#,
    );
    let func = lowered.module.function("f").unwrap();
    let entry = &func.blocks[0];
    let native_pos = entry
        .insts
        .iter()
        .position(|i| matches!(i, Inst::NativeCall { .. }))
        .expect("deferred println missing");
    let ret_pos = entry
        .insts
        .iter()
        .position(|i| matches!(i, Inst::Ret { .. }))
        .expect("ret missing");
    assert!(native_pos < ret_pos);
}

#[test]
fn try_catch_emits_handler_instructions() {
    let lowered = lower(
        r#"fn f() i64 {
               try { throw 3 } catch (e) { return e }
               return 0
           }"#,
    );
    let func = lowered.module.function("f").unwrap();
    let insts = all_insts(func);
    assert!(insts.iter().any(|i| matches!(i, Inst::SetHandler { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::Throw { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::CatchPayload { .. })));
}

#[test]
fn enum_switch_lowers_to_tag_branch_table() {
    let lowered = lower(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) f64 {
               switch s {
                   Circle(r) => { return r },
                   Point => { return 0.0 }
               }
               return 0.0
           }"#,
    );
    let func = lowered.module.function("f").unwrap();
    verify_function(func).unwrap();
    let insts = all_insts(func);
    assert!(insts.iter().any(|i| matches!(i, Inst::VariantGetTag { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::BrTable { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::VariantGetPayload { .. })));
}

#[test]
fn lambda_produces_closure_and_nested_function() {
    let lowered = lower(
        r#"fn main() i64 {
               var base = 10
               var add = |x: i64| x + base
               return add(5)
           }"#,
    );
    assert!(lowered.module.functions.iter().any(|f| f.name.contains("lambda$")));
    let main = lowered.module.function("main").unwrap();
    let insts = all_insts(main);
    let captured = insts.iter().find_map(|i| match i {
        Inst::MakeClosure { captures, .. } => Some(captures.len()),
        _ => None,
    });
    assert_eq!(captured, Some(1), "base must be captured");
    assert!(insts.iter().any(|i| matches!(i, Inst::CallClosure { .. })));
}

#[test]
fn struct_literal_and_field_access() {
    let lowered = lower(
        r#"struct Foo { name: string, field_name: string }
           fn main() i64 {
               var f = Foo{ .name = "n", .field_name = "fn" }
               println(f.name)
               println(f.field_name)
               return 0
           }"#,
    );
    let func = lowered.module.function("main").unwrap();
    let insts = all_insts(func);
    assert!(insts.iter().any(|i| matches!(i, Inst::StructNew { fields, .. } if fields.len() == 2)));
    // The two prints read distinct field slots.
    let indices: Vec<u32> = insts
        .iter()
        .filter_map(|i| match i {
            Inst::StructGet { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(indices, vec![0, 1]);
}

#[test]
fn interpolated_string_concatenates_stringified_parts() {
    let lowered = lower(r#"fn f(x: i64) string { return "x=${x}!" }"#);
    let func = lowered.module.function("f").unwrap();
    let insts = all_insts(func);
    assert!(insts
        .iter()
        .any(|i| matches!(i, Inst::NativeCall { func: cot_ir::NativeFn::IntToString, .. })));
    let concats = insts.iter().filter(|i| matches!(i, Inst::StrConcat { .. })).count();
    assert_eq!(concats, 2);
}

#[test]
fn dead_blocks_are_swept() {
    let lowered = lower(
        r#"fn f() i64 {
               return 1
           }"#,
    );
    let func = lowered.module.function("f").unwrap();
    assert_eq!(func.blocks.len(), 1);
}

#[test]
fn local_function_lowers_to_routine_and_closure() {
    let lowered = lower(
        r#"fn main() i64 {
               fn double(x: i64) i64 { return x * 2 }
               return double(21)
           }"#,
    );
    let nested = lowered.module.function("main::double").expect("nested routine");
    verify_function(nested).unwrap();
    let main = lowered.module.function("main").unwrap();
    let insts = all_insts(main);
    assert!(insts
        .iter()
        .any(|i| matches!(i, Inst::MakeClosure { function, .. } if function == "main::double")));
    assert!(insts.iter().any(|i| matches!(i, Inst::CallClosure { .. })));
}

#[test]
fn local_type_declarations_leave_no_code() {
    let lowered = lower(
        r#"fn f() i64 {
               struct Pair { a: i64, b: i64 }
               var p = Pair{ .a = 1, .b = 2 }
               return p.a
           }"#,
    );
    assert_eq!(lowered.module.functions.len(), 1);
    let func = lowered.module.function("f").unwrap();
    verify_function(func).unwrap();
    assert!(all_insts(func).iter().any(|i| matches!(i, Inst::StructNew { .. })));
}

#[test]
fn string_slice_uses_str_slice() {
    let lowered = lower(r#"fn main() i64 { var s = "hello" println(s[0..1]) return 0 }"#);
    let func = lowered.module.function("main").unwrap();
    assert!(all_insts(func).iter().any(|i| matches!(i, Inst::StrSlice { .. })));
}

#[test]
fn list_of_struct_pointers_scenario_lowers() {
    let lowered = lower(
        r#"struct Item { name: string, value: i64 }
           fn main() i64 {
               var items = new List<*Item>
               items.push(new Item{ .name = "first", .value = 1 })
               var r = items.get(0)
               println(r.name)
               println(string(r.value))
               return 0
           }"#,
    );
    let func = lowered.module.function("main").unwrap();
    verify_function(func).unwrap();
    let insts = all_insts(func);
    assert!(insts.iter().any(|i| matches!(i, Inst::ListNew { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::ListPush { .. })));
    assert!(insts.iter().any(|i| matches!(i, Inst::ListGet { .. })));
    assert!(insts
        .iter()
        .any(|i| matches!(i, Inst::NativeCall { func: cot_ir::NativeFn::IntToString, .. })));
}
