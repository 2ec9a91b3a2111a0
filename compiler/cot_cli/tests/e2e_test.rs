//! End-to-end pipeline tests over the driver library

use cot_bytecode::Image;
use cot_cli::{compile_source, EmitKind};
use cot_common::Compilation;

fn compile(source: &str) -> cot_cli::CompileOutcome {
    let mut compilation = Compilation::new();
    compile_source(&mut compilation, "test.cot", source, EmitKind::Bytecode)
        .expect("pipeline must not fail internally")
}

#[test]
fn clean_program_produces_an_image() {
    let outcome = compile("fn main() i64 { return 42 }");
    assert!(outcome.succeeded());
    let image = outcome.image.expect("image expected");
    assert_eq!(image.routines.len(), 1);
}

#[test]
fn empty_source_produces_header_only_image() {
    let outcome = compile("");
    assert!(outcome.succeeded());
    let image = outcome.image.unwrap();
    assert!(image.routines.is_empty());
    let bytes = image.to_bytes();
    assert_eq!(&bytes[0..4], b"CBO1");
}

#[test]
fn diagnostics_render_in_driver_format() {
    let mut compilation = Compilation::new();
    let outcome = compile_source(
        &mut compilation,
        "bad.cot",
        "fn f() { return missing }",
        EmitKind::Bytecode,
    )
    .unwrap();
    assert!(!outcome.succeeded());
    assert!(outcome.image.is_none(), "no bytecode on errors");
    let rendered = outcome.diagnostics.messages[0].render(&compilation.sources);
    assert!(rendered.starts_with("bad.cot:1:"), "got: {}", rendered);
    assert!(rendered.contains("error:"));
}

#[test]
fn all_front_end_errors_surface_in_one_run() {
    // A lexical error, a parse error and a type error in one file: the
    // driver reports all of them before halting.
    let source = "fn f() { var a = @ }\nfn g( { }\nfn h() { return missing }";
    let outcome = compile(source);
    assert!(!outcome.succeeded());
    assert!(outcome.diagnostics.error_count() >= 3);
}

#[test]
fn downstream_phases_are_skipped_after_errors() {
    let outcome = compile("fn f() i64 { return undefined_thing }");
    assert!(!outcome.succeeded());
    assert!(outcome.image.is_none());
}

#[test]
fn ir_dump_is_textual_ssa() {
    let mut compilation = Compilation::new();
    let outcome = compile_source(
        &mut compilation,
        "test.cot",
        "fn main() i64 { return 1 + 2 * 3 }",
        EmitKind::Ir,
    )
    .unwrap();
    let dump = outcome.dump.expect("ir dump");
    assert!(dump.contains("fn main"));
    assert!(dump.contains("iconst 7"));
    assert!(dump.contains("ret"));
}

#[test]
fn ast_dump_is_json() {
    let mut compilation = Compilation::new();
    let outcome = compile_source(
        &mut compilation,
        "test.cot",
        "fn main() i64 { return 0 }",
        EmitKind::Ast,
    )
    .unwrap();
    let dump = outcome.dump.expect("ast dump");
    let parsed: serde_json::Value = serde_json::from_str(&dump).expect("valid JSON");
    assert!(parsed.get("decls").is_some());
}

#[test]
fn nested_declarations_compile_end_to_end() {
    let outcome = compile(
        r#"fn main() i64 {
               struct Pair { a: i64, b: i64 }
               fn double(x: i64) i64 { return x * 2 }
               var p = Pair{ .a = 1, .b = 2 }
               return double(p.a + p.b)
           }"#,
    );
    assert!(
        outcome.succeeded(),
        "diagnostics: {:?}",
        outcome.diagnostics.messages
    );
    let image = outcome.image.unwrap();
    assert_eq!(image.routines.len(), 2, "local function becomes its own routine");
}

#[test]
fn compiling_twice_is_bit_identical() {
    let source = r#"
        struct Foo { name: string, field_name: string }
        fn main() i64 {
            var f = Foo{ .name = "n", .field_name = "fn" }
            println(f.name)
            println(f.field_name)
            return 0
        }
    "#;
    let a = compile(source).image.unwrap().to_bytes();
    let b = compile(source).image.unwrap().to_bytes();
    assert_eq!(a, b);
}

#[test]
fn image_written_to_disk_round_trips() {
    let outcome = compile(
        r#"fn fib(n: i64) i64 {
               if (n <= 1) { return n }
               return fib(n - 1) + fib(n - 2)
           }
           fn main() i64 { return fib(10) }"#,
    );
    let image = outcome.image.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.cbo");
    std::fs::write(&path, image.to_bytes()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let decoded = Image::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.routines.len(), 2);
    assert_eq!(decoded.code, image.code);
}

#[test]
fn full_language_program_compiles() {
    // One program touching most statement and expression forms.
    let source = r#"
        import "std/io"

        struct Item { name: string, value: i64 }
        enum Shape { Circle(f64), Rect(f64, f64), Point }

        trait Describable { fn describe() string }
        impl Describable for Item {
            fn describe(self_: *Item) string { return self_.name }
        }

        fn area(s: Shape) f64 {
            switch s {
                Circle(r) => { return r * r * 3.14 },
                Rect(w, h) => { return w * h },
                Point => { return 0.0 }
            }
            return 0.0
        }

        fn sum_to(n: i64) i64 {
            var total = 0
            for i in 0..n {
                total = total + i
            }
            return total
        }

        fn main() i64 {
            var items = new List<*Item>
            items.push(new Item{ .name = "first", .value = 1 })
            var r = items.get(0)
            println(r.name)
            println(string(r.value))
            println("sum=${sum_to(10)}")

            var m = new Map<string, i64>
            m.set("answer", 42)

            defer println("done")
            try {
                if (m.has("answer") && m.get("answer") == 42) {
                    throw 1
                }
            } catch (e) {
                println(string(e))
            }

            var total = 0
            while (total < 5) {
                total = total + 1
                if (total == 3) { continue }
            }

            return sum_to(10) + area(Shape::Circle(1.0)) as i64
        }
    "#;
    let outcome = compile(source);
    assert!(
        outcome.succeeded(),
        "diagnostics: {:?}",
        outcome.diagnostics.messages
    );
    let image = outcome.image.unwrap();
    assert!(image.routines.len() >= 4);
    let bytes = image.to_bytes();
    assert_eq!(Image::from_bytes(&bytes).unwrap().code, image.code);
}
