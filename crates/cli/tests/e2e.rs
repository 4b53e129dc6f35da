//! End-to-end scenarios through the full pipeline: source -> assembly ->
//! bytecode -> execution, with the compile session's record layouts
//! registered in the VM.

use spyre_vm::{Spyre, assemble_source};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Shared output sink for capturing what the program prints.
#[derive(Clone)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Run {
    vm: Spyre,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Run {
    fn stdout(&self) -> String {
        String::from_utf8(self.output.lock().unwrap().clone()).unwrap()
    }
}

/// Compile and execute a program the way the driver's end-to-end mode
/// does, capturing printed output.
fn run_program(source: &str) -> Run {
    let compiled = spyrec::compile_source(source, "test.spy").expect("compile");
    let image = assemble_source(&compiled.assembly, "test.spy").expect("assemble");

    let mut vm = Spyre::new();
    let output = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(Box::new(Sink(output.clone())));
    spyre_vm::io::register_io(&mut vm);
    for record in &compiled.records {
        let members = record
            .members
            .iter()
            .map(|m| (m.type_name.clone(), m.offset))
            .collect();
        vm.register_record_type(&record.name, members);
    }

    vm.execute(image).expect("execute");
    Run { vm, output }
}

#[test]
fn test_arithmetic_smoke() {
    // main's return value is the top of stack on HALT.
    let run = run_program("func main() -> int { return 1 + 2 * 3; }");
    assert_eq!(run.vm.stack_top_int(), Some(7));
}

#[test]
fn test_while_loop_sum() {
    let run = run_program(
        "cfunc print(v: int) -> void;\n\
         func main() -> void {\n\
           i: int;\n\
           total: int;\n\
           i = 1;\n\
           while (i <= 10) {\n\
             total = total + i;\n\
             i = i + 1;\n\
           }\n\
           print(total);\n\
         }",
    );
    assert_eq!(run.stdout(), "55\n");
}

#[test]
fn test_if_else_selection() {
    let run = run_program(
        "func main() -> int {\n\
           x: int;\n\
           x = 10;\n\
           if (x > 3) return 1;\n\
           return 0;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(1));
}

#[test]
fn test_if_not_taken() {
    let run = run_program(
        "func main() -> int {\n\
           x: int;\n\
           x = 2;\n\
           if (x > 3) return 1;\n\
           return 0;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(0));
}

#[test]
fn test_struct_allocation_and_member_access() {
    let mut run = run_program(
        "Point: struct { x: int; y: int; }\n\
         func main() -> int {\n\
           p: Point;\n\
           p = new Point;\n\
           p.x = 5;\n\
           p.y = 7;\n\
           return p.x + p.y;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(12));

    // main's frame untagged its roots on return, so the Point is garbage:
    // a collection frees exactly one segment.
    assert_eq!(run.vm.root_count(), 0);
    assert_eq!(run.vm.collect(), 1);
    assert_eq!(run.vm.live_segments(), 0);
}

#[test]
fn test_cyclic_nodes_die_after_frame_exit() {
    // Two nodes pointing at each other. Inside main they are rooted via
    // the locals; after main returns (roots untagged) the cycle is
    // unreachable and both segments die in one collection.
    let mut run = run_program(
        "Node: struct { next: Node; }\n\
         func main() -> int {\n\
           a: Node;\n\
           b: Node;\n\
           a = new Node;\n\
           b = new Node;\n\
           a.next = b;\n\
           b.next = a;\n\
           return 0;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(0));
    assert_eq!(run.vm.live_segments(), 2);
    assert_eq!(run.vm.collect(), 2);
    assert_eq!(run.vm.live_segments(), 0);
}

#[test]
fn test_function_call_with_arguments() {
    let run = run_program(
        "func add(a: int, b: int) -> int = a + b;\n\
         func main() -> int { return add(40, 2); }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(42));
}

#[test]
fn test_recursive_function() {
    let run = run_program(
        "func fact(n: int) -> int {\n\
           if (n <= 1) return 1;\n\
           return n * fact(n - 1);\n\
         }\n\
         func main() -> int { return fact(6); }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(720));
}

#[test]
fn test_for_loop() {
    let run = run_program(
        "cfunc print(v: int) -> void;\n\
         func main() -> void {\n\
           i: int;\n\
           total: int;\n\
           for (i = 0; i < 5; i = i + 1) {\n\
             total = total + i;\n\
           }\n\
           print(total);\n\
         }",
    );
    assert_eq!(run.stdout(), "10\n");
}

#[test]
fn test_struct_passed_between_functions() {
    let run = run_program(
        "Point: struct { x: int; y: int; }\n\
         func total(p: Point) -> int = p.x + p.y;\n\
         func main() -> int {\n\
           p: Point;\n\
           p = new Point;\n\
           p.x = 30;\n\
           p.y = 12;\n\
           return total(p);\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(42));
}

#[test]
fn test_multiple_prints() {
    let run = run_program(
        "cfunc print(v: int) -> void;\n\
         func main() -> void {\n\
           i: int;\n\
           i = 1;\n\
           while (i <= 3) {\n\
             print(i);\n\
             i = i + 1;\n\
           }\n\
         }",
    );
    assert_eq!(run.stdout(), "1\n2\n3\n");
}

#[test]
fn test_nested_struct_graph_survives_while_rooted() {
    let mut run = run_program(
        "Inner: struct { v: int; }\n\
         Outer: struct { inner: Inner; }\n\
         func main() -> int {\n\
           o: Outer;\n\
           o = new Outer;\n\
           o.inner = new Inner;\n\
           o.inner.v = 9;\n\
           return o.inner.v;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(9));
    // Both segments are garbage after the frame exits.
    assert_eq!(run.vm.live_segments(), 2);
    assert_eq!(run.vm.collect(), 2);
}

#[test]
fn test_compile_error_stops_pipeline() {
    let err = spyrec::compile_source("func main() -> int { return nope; }", "t").unwrap_err();
    assert!(err.contains("type error"));
}

#[test]
fn test_logical_operators_end_to_end() {
    let run = run_program(
        "func main() -> int {\n\
           x: int;\n\
           x = 5;\n\
           if (x > 1 && x < 10) return 1;\n\
           return 0;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(1));
}

#[test]
fn test_not_equal_end_to_end() {
    let run = run_program(
        "func main() -> int {\n\
           x: int;\n\
           x = 4;\n\
           if (x != 4) return 1;\n\
           if (x != 5) return 2;\n\
           return 0;\n\
         }",
    );
    assert_eq!(run.vm.stack_top_int(), Some(2));
}
