//! Integration tests for bytecode emission

use cot_bytecode::{emit_module, Constant, Image, Opcode, RoutineFlags};
use cot_ir::lower_module;
use cot_lexer::Lexer;
use cot_parser::Parser;
use cot_typechecker::TypeChecker;

fn compile(source: &str) -> Image {
    let tokens = Lexer::new(source, 0).tokenize();
    let mut parser = Parser::new(tokens);
    let module = parser.parse_module();
    assert!(!parser.diagnostics().has_errors(), "parse errors in test source");
    let (checked, diags) = TypeChecker::new().check_module(&module);
    assert!(
        !diags.has_errors(),
        "type errors: {:?}",
        diags.errors().collect::<Vec<_>>()
    );
    let lowered = lower_module(&module, checked);
    assert!(!lowered.diagnostics.has_errors(), "lowering errors");
    emit_module(&lowered.module, &lowered.registry).expect("emission must succeed")
}

fn routine_name<'a>(image: &'a Image, idx: usize) -> &'a str {
    match &image.constants[image.routines[idx].name_const as usize] {
        Constant::Ident(s) => s,
        other => panic!("routine name constant is {:?}", other),
    }
}

fn routine_code<'a>(image: &'a Image, name: &str) -> &'a [u8] {
    for (i, routine) in image.routines.iter().enumerate() {
        if routine_name(image, i) == name {
            let start = routine.code_offset as usize;
            return &image.code[start..start + routine.code_length as usize];
        }
    }
    panic!("no routine named {}", name);
}

#[test]
fn constant_return_emits_and_round_trips() {
    // S1: fn main() i64 { return 42 }
    let image = compile("fn main() i64 { return 42 }");
    assert_eq!(image.routines.len(), 1);
    assert_eq!(routine_name(&image, 0), "main");

    let code = routine_code(&image, "main");
    assert_eq!(code[0], u8::from(Opcode::ConstInt));
    assert_eq!(&code[2..6], &42i32.to_le_bytes());
    assert_eq!(*code.last().unwrap() & !0x0F, 0, "ret operand nibble");
    assert_eq!(code[code.len() - 2], u8::from(Opcode::Ret));

    let decoded = Image::from_bytes(&image.to_bytes()).unwrap();
    assert_eq!(decoded.routines, image.routines);
    assert_eq!(decoded.code, image.code);
    assert_eq!(decoded.constants, image.constants);
}

#[test]
fn precedence_arithmetic_folds_to_seven() {
    // S2: constant folding leaves a single const_int 7.
    let image = compile("fn main() i64 { return 1 + 2 * 3 }");
    let code = routine_code(&image, "main");
    assert_eq!(code[0], u8::from(Opcode::ConstInt));
    assert_eq!(&code[2..6], &7i32.to_le_bytes());
}

#[test]
fn recursion_spills_result_across_calls() {
    // S3: fib's first call result must survive the second call, which means
    // a store_local between the two call opcodes.
    let image = compile(
        r#"fn fib(n: i64) i64 {
               if (n <= 1) { return n }
               return fib(n - 1) + fib(n - 2)
           }
           fn main() i64 { return fib(10) }"#,
    );
    let code = routine_code(&image, "fib");
    let call = u8::from(Opcode::Call);
    let store = u8::from(Opcode::StoreLocal);
    let first_call = code.iter().position(|&b| b == call).unwrap();
    let after = &code[first_call + 1..];
    let second_call = after.iter().position(|&b| b == call).unwrap();
    assert!(
        after[..second_call].contains(&store),
        "first call result must be spilled before the second call"
    );
}

#[test]
fn empty_source_emits_header_only_image() {
    let image = compile("");
    assert!(image.routines.is_empty());
    assert!(image.code.is_empty());
    let bytes = image.to_bytes();
    assert_eq!(&bytes[0..4], b"CBO1");
    let decoded = Image::from_bytes(&bytes).unwrap();
    assert!(decoded.routines.is_empty());
}

#[test]
fn bytecode_is_deterministic() {
    let source = r#"
        struct Item { name: string, value: i64 }
        fn main() i64 {
            var items = new List<*Item>
            items.push(new Item{ .name = "first", .value = 1 })
            var r = items.get(0)
            println(r.name)
            println(string(r.value))
            return 0
        }
    "#;
    let a = compile(source).to_bytes();
    let b = compile(source).to_bytes();
    assert_eq!(a, b, "same source must produce byte-identical output");
}

#[test]
fn register_pressure_forces_farthest_next_use_spills() {
    // 17 computed arguments are all live until the call, so the allocator
    // runs out of registers while evaluating the later ones and must spill.
    let params: Vec<String> = (0..17).map(|i| format!("p{}: i64", i)).collect();
    let args: Vec<String> = (0..17).map(|i| format!("a + {}", i)).collect();
    let source = format!(
        "fn wide({}) i64 {{ return p0 }} fn f(a: i64) i64 {{ return wide({}) }}",
        params.join(", "),
        args.join(", ")
    );
    let image = compile(&source);
    let code = routine_code(&image, "f");
    let store = u8::from(Opcode::StoreLocal);
    let spills = code.iter().filter(|&&b| b == store).count();
    assert!(spills >= 2, "expected eviction spills under pressure, saw {}", spills);
}

#[test]
fn more_than_fifteen_arguments_use_stack_args() {
    let params: Vec<String> = (0..17).map(|i| format!("p{}: i64", i)).collect();
    let args: Vec<String> = (0..17).map(|i| i.to_string()).collect();
    let source = format!(
        "fn wide({}) i64 {{ return p0 }} fn main() i64 {{ return wide({}) }}",
        params.join(", "),
        args.join(", ")
    );
    let image = compile(&source);
    let code = routine_code(&image, "main");
    assert!(code.contains(&u8::from(Opcode::PushArg)));
    assert!(code.contains(&u8::from(Opcode::PopArgs)));

    let wide = image
        .routines
        .iter()
        .enumerate()
        .find(|(i, _)| routine_name(&image, *i) == "wide")
        .map(|(_, r)| r)
        .unwrap();
    assert_eq!(wide.arg_count, 17);
}

#[test]
fn string_slice_emits_str_slice_opcode() {
    // S5
    let image = compile(r#"fn main() i64 { var s = "hello" println(s[0..1]) return 0 }"#);
    let code = routine_code(&image, "main");
    assert!(code.contains(&u8::from(Opcode::StrSlice)));
    assert!(image
        .constants
        .iter()
        .any(|c| matches!(c, Constant::Str(s) if s == "hello")));
}

#[test]
fn struct_fields_emit_record_ops_and_arc() {
    // S4: two string fields, both retained when stored into the record.
    let image = compile(
        r#"struct Foo { name: string, field_name: string }
           fn main() i64 {
               var f = Foo{ .name = "n", .field_name = "fn" }
               println(f.name)
               println(f.field_name)
               return 0
           }"#,
    );
    let code = routine_code(&image, "main");
    assert!(code.contains(&u8::from(Opcode::RecordNew)));
    assert!(code.contains(&u8::from(Opcode::RecordGet)));
    let retains = code.iter().filter(|&&b| b == u8::from(Opcode::Retain)).count();
    assert!(retains >= 2, "both string fields must be retained");
    assert!(code.contains(&u8::from(Opcode::ReleaseLocal)));
}

#[test]
fn list_of_struct_pointers_uses_plain_list_ops() {
    // S6: pointers to structs keep the non-boxing list entry points.
    let image = compile(
        r#"struct Item { name: string, value: i64 }
           fn main() i64 {
               var items = new List<*Item>
               items.push(new Item{ .name = "first", .value = 1 })
               var r = items.get(0)
               println(r.name)
               return 0
           }"#,
    );
    let code = routine_code(&image, "main");
    assert!(code.contains(&u8::from(Opcode::ListPush)));
    assert!(code.contains(&u8::from(Opcode::ListGet)));
    assert!(!code.contains(&u8::from(Opcode::ListPushStruct)));
}

#[test]
fn struct_values_in_lists_use_struct_boxing_ops() {
    let image = compile(
        r#"struct Point { x: i64, y: i64 }
           fn main() i64 {
               var points = new List<Point>
               points.push(Point{ .x = 1, .y = 2 })
               var p = points.get(0)
               return p.x
           }"#,
    );
    let code = routine_code(&image, "main");
    assert!(code.contains(&u8::from(Opcode::ListPushStruct)));
    assert!(code.contains(&u8::from(Opcode::ListGetStruct)));
}

#[test]
fn exports_cover_public_functions_and_main() {
    let image = compile(
        "pub fn api() i64 { return 1 } fn helper() i64 { return 2 } fn main() i64 { return 0 }",
    );
    let exported: Vec<&str> = image
        .exports
        .iter()
        .map(|e| match &image.constants[e.name_const as usize] {
            Constant::Ident(s) => s.as_str(),
            _ => panic!(),
        })
        .collect();
    assert!(exported.contains(&"api"));
    assert!(exported.contains(&"main"));
    assert!(!exported.contains(&"helper"));

    let api = image
        .routines
        .iter()
        .enumerate()
        .find(|(i, _)| routine_name(&image, *i) == "api")
        .map(|(_, r)| r)
        .unwrap();
    assert!(RoutineFlags::from_bits_truncate(api.flags).contains(RoutineFlags::PUBLIC));
}

#[test]
fn debug_lines_map_code_offsets_to_source_lines() {
    let image = compile("fn main() i64 {\n    var x = 1\n    return x\n}");
    assert!(!image.debug_lines.is_empty());
    let lines: Vec<u32> = image.debug_lines.iter().map(|d| d.line).collect();
    assert!(lines.contains(&2));
    assert!(lines.contains(&3));
    // Offsets ascend with the code stream.
    let offsets: Vec<u32> = image.debug_lines.iter().map(|d| d.code_offset).collect();
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted);
}

#[test]
fn try_catch_emits_handler_opcodes() {
    let image = compile(
        r#"fn f() i64 {
               try { throw 7 } catch (e) { return e }
               return 0
           }"#,
    );
    let code = routine_code(&image, "f");
    assert!(code.contains(&u8::from(Opcode::SetHandler)));
    assert!(code.contains(&u8::from(Opcode::Throw)));
    assert!(code.contains(&u8::from(Opcode::CatchPayload)));
}

#[test]
fn switch_on_enum_emits_jump_table() {
    let image = compile(
        r#"enum Shape { Circle(f64), Point }
           fn f(s: Shape) i64 {
               switch s {
                   Circle(r) => { return 1 },
                   Point => { return 2 }
               }
               return 0
           }"#,
    );
    let code = routine_code(&image, "f");
    assert!(code.contains(&u8::from(Opcode::VariantTag)));
    assert!(code.contains(&u8::from(Opcode::JmpTable)));
}

#[test]
fn division_is_not_rejected_at_compile_time() {
    // Division by a non-constant zero traps at run time; the compiler
    // happily emits sdiv.
    let image = compile("fn f(a: i64, b: i64) i64 { return a / b }");
    let code = routine_code(&image, "f");
    assert!(code.contains(&u8::from(Opcode::SDiv)));
}
