//! End-to-end: compile a source program and run it on the VM with an
//! in-memory host.

use microc_compiler::compile;
use microc_vm::{CaptureHost, Vm};

fn run_hosted(source: &str, host: CaptureHost) -> (i64, String) {
    let image = compile(source).expect("program should compile");
    let mut vm = Vm::new(&image, host, &["prog".to_string()]).expect("vm should start");
    let status = vm.run().expect("program should run to EXIT");
    let output = vm.host().output_str();
    (status, output)
}

fn run(source: &str) -> i64 {
    run_hosted(source, CaptureHost::new()).0
}

#[test]
fn test_addition() {
    assert_eq!(run("int main() { return 10 + 20; }"), 30);
}

#[test]
fn test_precedence() {
    assert_eq!(run("int main() { return 1 + 2 * 3; }"), 7);
    assert_eq!(run("int main() { return (1 + 2) * 3; }"), 9);
}

#[test]
fn test_while_loop_counts_to_ten() {
    assert_eq!(
        run("int main() { int i; i = 0; while (i < 10) i = i + 1; return i; }"),
        10
    );
}

#[test]
fn test_post_and_pre_increment() {
    assert_eq!(run("int main() { int i; i = 5; return i++ + ++i; }"), 12);
    assert_eq!(run("int main() { int i; i = 5; return i--; }"), 5);
    assert_eq!(run("int main() { int i; i = 5; return --i; }"), 4);
    assert_eq!(run("int main() { int i; i = 5; i++; return i; }"), 6);
}

#[test]
fn test_enum_constants() {
    assert_eq!(
        run("enum { A = 2, B, C = 10 }; int main() { return A + B + C; }"),
        15
    );
    assert_eq!(
        run("enum State { Idle, Busy, Done }; int main() { return Done; }"),
        2
    );
}

#[test]
fn test_malloc_and_pointer_arithmetic() {
    assert_eq!(
        run("int main() { int *p; p = malloc(8); *p = 42; *(p+1) = 7; return *p + *(p+1); }"),
        49
    );
}

#[test]
fn test_printf_formats_to_stdout() {
    let (status, output) = run_hosted(
        "int main() { printf(\"%d-%d\\n\", 1, 2); return 0; }",
        CaptureHost::new(),
    );
    assert_eq!(status, 0);
    assert_eq!(output, "1-2\n");
}

#[test]
fn test_printf_string_char_hex() {
    let (_, output) = run_hosted(
        "int main() { printf(\"%s %c %x%%\\n\", \"hi\", 'y', 255); return 0; }",
        CaptureHost::new(),
    );
    assert_eq!(output, "hi y ff%\n");
}

#[test]
fn test_recursion() {
    let source = "int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\n\
                  int main() { return fib(10); }";
    assert_eq!(run(source), 55);
}

#[test]
fn test_multiple_arguments_push_left_to_right() {
    let source = "int weigh(int a, int b, int c) { return a * 100 + b * 10 + c; }\n\
                  int main() { return weigh(1, 2, 3); }";
    assert_eq!(run(source), 123);
}

#[test]
fn test_pointer_out_parameter() {
    let source = "int set(int *p) { *p = 9; return 0; }\n\
                  int main() { int x; x = 1; set(&x); return x; }";
    assert_eq!(run(source), 9);
}

#[test]
fn test_global_variables() {
    let source = "int counter;\n\
                  int bump() { counter = counter + 1; return counter; }\n\
                  int main() { bump(); bump(); return counter; }";
    assert_eq!(run(source), 2);
}

#[test]
fn test_global_shadowed_by_local() {
    let source = "int x;\n\
                  int f() { int x; x = 5; return x; }\n\
                  int main() { x = 3; f(); return x; }";
    assert_eq!(run(source), 3);
}

#[test]
fn test_string_subscript_and_char_type() {
    assert_eq!(
        run("int main() { char *s; s = \"hi\"; return s[1]; }"),
        'i' as i64
    );
    // Stores through a char lvalue keep only the low byte.
    assert_eq!(run("int main() { char c; c = 0x141; return c; }"), 0x41);
}

#[test]
fn test_adjacent_string_literals_concatenate() {
    let (_, output) = run_hosted(
        "int main() { printf(\"ab\" \"cd\\n\"); return 0; }",
        CaptureHost::new(),
    );
    assert_eq!(output, "abcd\n");
}

#[test]
fn test_sizeof() {
    assert_eq!(
        run("int main() { return sizeof(int) + sizeof(char) + sizeof(int*); }"),
        17
    );
}

#[test]
fn test_ternary_and_logic() {
    assert_eq!(run("int main() { return 1 ? 5 : 6; }"), 5);
    assert_eq!(run("int main() { return 0 ? 5 : 6; }"), 6);
    assert_eq!(run("int main() { return 2 > 1 ? 2 > 1 ? 7 : 8 : 9; }"), 7);
}

#[test]
fn test_short_circuit_evaluation() {
    let source = "int main() { int x; x = 0; 0 && (x = 1); 1 || (x = 2); return x; }";
    assert_eq!(run(source), 0);
    assert_eq!(run("int main() { return 1 && 2; }"), 2);
    assert_eq!(run("int main() { return 0 || 3; }"), 3);
}

#[test]
fn test_unary_operators() {
    assert_eq!(run("int main() { return -5 + 10; }"), 5);
    assert_eq!(run("int main() { int x; x = 3; return -x; }"), -3);
    assert_eq!(run("int main() { return !0 + !7; }"), 1);
    assert_eq!(run("int main() { return ~0; }"), -1);
    assert_eq!(run("int main() { return +4; }"), 4);
}

#[test]
fn test_bit_operations_and_shifts() {
    assert_eq!(run("int main() { return (3 | 4) ^ 2; }"), 5);
    assert_eq!(run("int main() { return 1 << 4 >> 2; }"), 4);
    assert_eq!(run("int main() { return 12 & 10; }"), 8);
}

#[test]
fn test_division_and_modulo() {
    assert_eq!(run("int main() { return 17 / 5 * 10 + 17 % 5; }"), 32);
}

#[test]
fn test_number_bases() {
    assert_eq!(run("int main() { return 0x10 + 010 + 9; }"), 33);
}

#[test]
fn test_array_subscript_assignment() {
    let source = "int main() { int *p; p = malloc(16); p[0] = 3; p[1] = 4; return p[0] * p[1]; }";
    assert_eq!(run(source), 12);
}

#[test]
fn test_char_pointer_walk() {
    let source = "int main() { char *s; int n; s = \"abc\"; n = 0;\n\
                  while (*s) { n = n + 1; s = s + 1; }\n\
                  return n; }";
    assert_eq!(run(source), 3);
}

#[test]
fn test_memset_and_memcmp() {
    let source = "int main() { char *a; char *b;\n\
                  a = malloc(4); b = malloc(4);\n\
                  memset(a, 7, 4); memset(b, 7, 4);\n\
                  return memcmp(a, b, 4); }";
    assert_eq!(run(source), 0);
}

#[test]
fn test_exit_intrinsic_stops_execution() {
    assert_eq!(run("int main() { exit(3); return 0; }"), 3);
}

#[test]
fn test_open_read_close() {
    let source = "int main() { int fd; char *buf; int n;\n\
                  buf = malloc(16);\n\
                  fd = open(\"input.txt\", 0);\n\
                  if (fd < 0) return 1;\n\
                  n = read(fd, buf, 16);\n\
                  close(fd);\n\
                  if (n != 5) return 2;\n\
                  return buf[0]; }";
    let host = CaptureHost::new().with_file("input.txt", b"hello");
    let (status, _) = run_hosted(source, host);
    assert_eq!(status, 'h' as i64);
}

#[test]
fn test_argc_argv() {
    let image = compile("int main(int argc, char **argv) { return argc + argv[1][0]; }").unwrap();
    let args = vec!["prog".to_string(), "x".to_string()];
    let mut vm = Vm::new(&image, CaptureHost::new(), &args).unwrap();
    assert_eq!(vm.run().unwrap(), 2 + 'x' as i64);
}

#[test]
fn test_comments_and_preprocessor_lines_ignored() {
    let source = "#include <stdio.h>\n\
                  // a comment\n\
                  int main() { return 4; } // trailing";
    assert_eq!(run(source), 4);
}

#[test]
fn test_void_is_accepted_in_declarations() {
    assert_eq!(run("void main() { return 7; }"), 7);
}

#[test]
fn test_cast_changes_pointer_arithmetic() {
    // Viewed as char*, the +3 is unscaled and the difference is in bytes.
    let source = "int main() { int *p; p = malloc(16); return (char*)p + 3 - (char*)p; }";
    assert_eq!(run(source), 3);
    // The same offset through the int* view is three whole words.
    let source = "int main() { int *p; int *q; p = malloc(32); q = p + 3; return q - p; }";
    assert_eq!(run(source), 3);
}

#[test]
fn test_nested_blocks_and_empty_statements() {
    let source = "int main() { int i; ; { i = 1; { i = i + 1; } ; } return i; }";
    assert_eq!(run(source), 2);
}

#[test]
fn test_identical_runs_produce_identical_traces() {
    let source = "int main() { int i; i = 0; while (i < 5) i = i + 1; return i; }";
    let image = compile(source).unwrap();

    let trace = |image: &microc_vm::Image| {
        let mut vm = Vm::new(image, CaptureHost::new(), &[]).unwrap();
        vm.enable_tracing();
        let status = vm.run().unwrap();
        (status, vm.tracer().ax_trajectory())
    };

    let (status_a, ax_a) = trace(&image);
    let (status_b, ax_b) = trace(&image);
    assert_eq!(status_a, 5);
    assert_eq!(status_a, status_b);
    assert_eq!(ax_a, ax_b);
}
