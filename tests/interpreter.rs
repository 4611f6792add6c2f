use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use treelox as lox;

use lox::error::LoxError;
use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;
use lox::value::Value;

/// Clonable in-memory sink so tests can read back what the program printed.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

/// Runs a program through the full pipeline, returning captured stdout.
fn run(source: &str) -> Result<String, LoxError> {
    let tokens: Vec<_> = Scanner::new(source.as_bytes())
        .filter_map(Result::ok)
        .collect();

    let mut parser = Parser::new(tokens);
    let program = parser.parse_program()?;

    let buf = SharedBuf::default();
    let mut interpreter = Interpreter::with_output(Box::new(buf.clone()));

    let mut resolver = Resolver::new(&mut interpreter);
    resolver.resolve(&program)?;

    interpreter.interpret(&program)?;

    Ok(buf.contents())
}

fn run_ok(source: &str) -> String {
    run(source).expect("program should run")
}

fn run_err(source: &str) -> LoxError {
    run(source).expect_err("expected a runtime error")
}

/// Evaluates a single expression, as the `evaluate` command does.
fn eval(source: &str) -> Result<Value, LoxError> {
    let tokens: Vec<_> = Scanner::new(source.as_bytes())
        .filter_map(Result::ok)
        .collect();

    let mut parser = Parser::new(tokens);
    let expr = parser.parse()?;

    let mut interpreter = Interpreter::with_output(Box::new(std::io::sink()));
    interpreter.evaluate(&expr)
}

// ─────────────────────────────────────────────────────────────────────────
// Expressions and printing
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn string_concatenation() {
    assert_eq!(
        run_ok("var a = \"foo\"; var b = \"bar\"; print a + b;"),
        "foobar\n"
    );
}

#[test]
fn number_formatting() {
    // Integral values print without a fractional part.
    assert_eq!(run_ok("print 3.5; print 4 / 2; print 10.40;"), "3.5\n2\n10.4\n");
}

#[test]
fn literal_values() {
    assert_eq!(run_ok("print nil; print true; print false;"), "nil\ntrue\nfalse\n");
}

#[test]
fn division_by_zero_is_infinite() {
    assert_eq!(run_ok("print 1 / 0;"), "inf\n");
}

#[test]
fn truthiness() {
    // Only nil and false are falsy; 0 and "" are truthy.
    assert_eq!(
        run_ok(
            "if (0) print \"zero\"; \
             if (\"\") print \"empty\"; \
             if (nil) print \"nil\"; else print \"not nil\"; \
             if (false) print \"false\"; else print \"not false\";"
        ),
        "zero\nempty\nnot nil\nnot false\n"
    );
}

#[test]
fn logical_operators_return_operand_values() {
    assert_eq!(
        run_ok("print nil or \"yes\"; print false and 3; print 1 and 2;"),
        "yes\nfalse\n2\n"
    );
}

#[test]
fn logical_operators_short_circuit() {
    // The right side must not run when the left decides.
    assert_eq!(
        run_ok(
            "fun boom() { print \"boom\"; return true; } \
             var _ = false and boom(); \
             var __ = true or boom(); \
             print \"quiet\";"
        ),
        "quiet\n"
    );
}

#[test]
fn equality_rules() {
    assert_eq!(
        run_ok(
            "print 1 == 1; print \"a\" == \"a\"; print nil == nil; \
             print 1 == \"1\"; print nil == false;"
        ),
        "true\ntrue\ntrue\nfalse\nfalse\n"
    );
}

#[test]
fn evaluate_expression_directly() {
    let value = eval("(8 * 2) / 4").expect("expression should evaluate");
    assert_eq!(value.to_string(), "4");

    let value = eval("\"con\" + \"cat\"").expect("expression should evaluate");
    assert_eq!(value.to_string(), "concat");
}

// ─────────────────────────────────────────────────────────────────────────
// Statements, scoping, control flow
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn block_scoping_and_shadowing() {
    assert_eq!(
        run_ok(
            "var a = \"outer\"; \
             { var a = \"inner\"; print a; } \
             print a;"
        ),
        "inner\nouter\n"
    );
}

#[test]
fn assignment_mutates_enclosing_scope() {
    assert_eq!(
        run_ok("var a = 1; { a = 2; } print a;"),
        "2\n"
    );
}

#[test]
fn while_loop() {
    assert_eq!(
        run_ok("var i = 0; while (i < 3) { print i; i = i + 1; }"),
        "0\n1\n2\n"
    );
}

#[test]
fn for_loop_desugaring_runs_clauses_in_order() {
    assert_eq!(
        run_ok("for (var i = 0; i < 3; i = i + 1) print i;"),
        "0\n1\n2\n"
    );
}

#[test]
fn resolution_is_static_not_dynamic() {
    // The closure captured `a` before the block declared its own; both calls
    // must see the global.
    assert_eq!(
        run_ok(
            "var a = \"global\"; \
             { \
               fun show() { print a; } \
               show(); \
               var a = \"block\"; \
               show(); \
             }"
        ),
        "global\nglobal\n"
    );
}

#[test]
fn undefined_variable_read() {
    let error = run_err("print q;");

    assert_eq!(error.to_string(), "Undefined variable 'q'.");
    assert_eq!(error.exit_code(), 70);
}

#[test]
fn undefined_variable_assignment() {
    let error = run_err("q = 1;");

    assert_eq!(error.to_string(), "Undefined variable 'q'.");
}

// ─────────────────────────────────────────────────────────────────────────
// Functions and closures
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn function_values_print_their_name() {
    assert_eq!(run_ok("fun add(a, b) { return a + b; } print add;"), "<fn add>\n");
}

#[test]
fn function_call_and_return() {
    assert_eq!(
        run_ok("fun add(a, b) { return a + b; } print add(3, 4);"),
        "7\n"
    );
}

#[test]
fn function_without_return_yields_nil() {
    assert_eq!(run_ok("fun f() {} print f();"), "nil\n");
}

#[test]
fn bare_return_yields_nil() {
    assert_eq!(run_ok("fun f() { return; } print f();"), "nil\n");
}

#[test]
fn return_exits_early_through_nested_blocks() {
    assert_eq!(
        run_ok(
            "fun f() { \
               while (true) { \
                 { return \"early\"; } \
               } \
             } \
             print f();"
        ),
        "early\n"
    );
}

#[test]
fn conditional_return() {
    assert_eq!(
        run_ok(
            "fun mk(m) { \
               fun f(n) { if (n < m) return false; return true; } \
               return f; \
             } \
             var g = mk(10); \
             print g(5); \
             print g(10);"
        ),
        "false\ntrue\n"
    );
}

#[test]
fn counters_keep_independent_state() {
    assert_eq!(
        run_ok(
            "fun makeCounter() { \
               var count = 0; \
               fun increment() { count = count + 1; return count; } \
               return increment; \
             } \
             var a = makeCounter(); \
             var b = makeCounter(); \
             print a(); print a(); print b();"
        ),
        "1\n2\n1\n"
    );
}

#[test]
fn recursion() {
    assert_eq!(
        run_ok(
            "fun fib(n) { \
               if (n < 2) return n; \
               return fib(n - 1) + fib(n - 2); \
             } \
             print fib(10);"
        ),
        "55\n"
    );
}

#[test]
fn arity_mismatch() {
    let error = run_err("fun f(a, b) {} f(1);");

    assert_eq!(error.to_string(), "Expected 2 arguments but got 1.");
}

#[test]
fn calling_a_non_callable() {
    let error = run_err("\"not a function\"(1);");

    assert_eq!(error.to_string(), "Can only call functions and classes.");
}

#[test]
fn clock_returns_a_number() {
    assert_eq!(run_ok("print clock() >= 0;"), "true\n");
}

#[test]
fn clock_takes_no_arguments() {
    let error = run_err("clock(1);");

    assert_eq!(error.to_string(), "Expected 0 arguments but got 1.");
}

// ─────────────────────────────────────────────────────────────────────────
// Classes, instances, inheritance
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn class_and_instance_printing() {
    assert_eq!(run_ok("class A {} print A; print A();"), "A\nA instance\n");
}

#[test]
fn fields_are_per_instance() {
    assert_eq!(
        run_ok(
            "class Box {} \
             var a = Box(); \
             var b = Box(); \
             a.v = 1; \
             b.v = 2; \
             print a.v; print b.v;"
        ),
        "1\n2\n"
    );
}

#[test]
fn set_expression_yields_the_value() {
    assert_eq!(run_ok("class C {} var c = C(); print c.x = 5;"), "5\n");
}

#[test]
fn methods_bind_this() {
    assert_eq!(
        run_ok(
            "class Cake { taste() { print this.flavor; } } \
             var cake = Cake(); \
             cake.flavor = \"chocolate\"; \
             cake.taste();"
        ),
        "chocolate\n"
    );
}

#[test]
fn detached_methods_remember_their_receiver() {
    assert_eq!(
        run_ok(
            "class Cake { taste() { print this.flavor; } } \
             var cake = Cake(); \
             cake.flavor = \"lemon\"; \
             var taste = cake.taste; \
             taste();"
        ),
        "lemon\n"
    );
}

#[test]
fn initializer_sets_fields() {
    assert_eq!(
        run_ok("class C { init(x) { this.x = x; } } print C(7).x;"),
        "7\n"
    );
}

#[test]
fn class_arity_comes_from_init() {
    let error = run_err("class C { init(x) {} } C();");

    assert_eq!(error.to_string(), "Expected 1 arguments but got 0.");
}

#[test]
fn init_always_returns_the_instance() {
    // Early bare return inside init still yields the instance, and
    // re-invoking init on an existing instance does too.
    assert_eq!(
        run_ok(
            "class C { \
               init() { \
                 this.x = 1; \
                 return; \
               } \
             } \
             var c = C(); \
             print c.x; \
             print c.init();"
        ),
        "1\nC instance\n"
    );
}

#[test]
fn methods_inherit_from_superclass() {
    assert_eq!(
        run_ok(
            "class A { m() { return \"A\"; } } \
             class B < A {} \
             print B().m();"
        ),
        "A\n"
    );
}

#[test]
fn subclass_overrides_win() {
    assert_eq!(
        run_ok(
            "class A { m() { return \"A\"; } } \
             class B < A { m() { return \"B\"; } } \
             print B().m();"
        ),
        "B\n"
    );
}

#[test]
fn super_calls_skip_the_current_class() {
    assert_eq!(
        run_ok(
            "class A { greet() { print \"hi\"; } } \
             class B < A { greet() { super.greet(); print \"bye\"; } } \
             B().greet();"
        ),
        "hi\nbye\n"
    );
}

#[test]
fn super_method_sees_subclass_receiver() {
    assert_eq!(
        run_ok(
            "class A { name() { return \"A\"; } describe() { print this.name(); } } \
             class B < A { name() { return \"B\"; } describe() { super.describe(); } } \
             B().describe();"
        ),
        "B\n"
    );
}

#[test]
fn inherited_init_constructs_subclass_instances() {
    assert_eq!(
        run_ok(
            "class A { init(x) { this.x = x; } } \
             class B < A {} \
             print B(9).x;"
        ),
        "9\n"
    );
}

#[test]
fn superclass_must_be_a_class() {
    let error = run_err("var NotAClass = 10; class B < NotAClass {}");

    assert_eq!(error.to_string(), "Superclass must be a class.");
    assert_eq!(error.exit_code(), 70);
}

#[test]
fn undefined_property() {
    let error = run_err("class C {} C().missing;");

    assert_eq!(error.to_string(), "Undefined property 'missing'.");
}

#[test]
fn property_read_on_non_instance() {
    let error = run_err("var a = 1; a.b;");

    assert_eq!(error.to_string(), "Only instances have properties.");
}

#[test]
fn property_write_on_non_instance() {
    let error = run_err("var a = 1; a.b = 2;");

    assert_eq!(error.to_string(), "Only instances have fields.");
}

// ─────────────────────────────────────────────────────────────────────────
// Runtime type errors
// ─────────────────────────────────────────────────────────────────────────

#[test]
fn negating_a_string() {
    let error = run_err("var x = \"s\"; -x;");

    assert_eq!(error.to_string(), "Operand must be a number.");
    assert_eq!(error.exit_code(), 70);
}

#[test]
fn adding_mixed_operands() {
    let error = run_err("print 1 + \"a\";");

    assert_eq!(
        error.to_string(),
        "Operands must be two numbers or two strings."
    );
}

#[test]
fn comparing_non_numbers() {
    let error = run_err("print \"a\" < \"b\";");

    assert_eq!(error.to_string(), "Operands must be numbers.");
}

#[test]
fn bang_applies_truthiness() {
    assert_eq!(
        run_ok("print !nil; print !0; print !true;"),
        "true\nfalse\nfalse\n"
    );
}
