use treelox as lox;

use lox::error::{LoxError, Result};
use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;

fn resolve(source: &str) -> Result<()> {
    let tokens: Vec<_> = Scanner::new(source.as_bytes())
        .filter_map(std::result::Result::ok)
        .collect();

    let mut parser = Parser::new(tokens);
    let program = parser.parse_program()?;

    let mut interpreter = Interpreter::with_output(Box::new(std::io::sink()));
    let mut resolver = Resolver::new(&mut interpreter);
    resolver.resolve(&program)
}

fn resolve_error(source: &str) -> LoxError {
    resolve(source).expect_err("expected a resolution error")
}

#[test]
fn reading_local_in_its_own_initializer() {
    let error = resolve_error("fun f() { var a = a; }");

    assert!(error
        .to_string()
        .contains("Can't read local variable in its own initializer."));
    assert_eq!(error.exit_code(), 65);
}

#[test]
fn global_self_reference_is_allowed() {
    // Globals are not tracked in the scope stack.
    assert!(resolve("var a = a;").is_ok());
}

#[test]
fn duplicate_declaration_in_same_scope() {
    let error = resolve_error("fun f() { var a = 1; var a = 2; }");

    assert!(error
        .to_string()
        .contains("Already a variable with this name in this scope."));
}

#[test]
fn shadowing_in_nested_scope_is_allowed() {
    assert!(resolve("fun f() { var a = 1; { var a = 2; } }").is_ok());
}

#[test]
fn return_at_top_level() {
    let error = resolve_error("return 1;");

    assert!(error.to_string().contains("Can't return from top-level code."));
}

#[test]
fn return_value_inside_initializer() {
    let error = resolve_error("class C { init() { return 1; } }");

    assert!(error
        .to_string()
        .contains("Can't return a value from an initializer."));
}

#[test]
fn bare_return_inside_initializer_is_allowed() {
    assert!(resolve("class C { init() { return; } }").is_ok());
}

#[test]
fn return_inside_method_is_allowed() {
    assert!(resolve("class C { m() { return 1; } }").is_ok());
}

#[test]
fn this_outside_class() {
    let error = resolve_error("print this;");

    assert!(error
        .to_string()
        .contains("Can't use 'this' outside of a class."));
}

#[test]
fn this_inside_standalone_function() {
    let error = resolve_error("fun f() { return this; }");

    assert!(error
        .to_string()
        .contains("Can't use 'this' outside of a class."));
}

#[test]
fn super_outside_class() {
    let error = resolve_error("print super.m;");

    assert!(error
        .to_string()
        .contains("Can't use 'super' outside of a class."));
}

#[test]
fn super_without_superclass() {
    let error = resolve_error("class C { m() { return super.m(); } }");

    assert!(error
        .to_string()
        .contains("Can't use 'super' in a class with no superclass."));
}

#[test]
fn super_inside_subclass_is_allowed() {
    assert!(resolve("class A {} class B < A { m() { return super.m; } }").is_ok());
}

#[test]
fn class_inheriting_from_itself() {
    let error = resolve_error("class A < A {}");

    assert!(error
        .to_string()
        .contains("A class can't inherit from itself."));
}

#[test]
fn resolution_halts_on_first_error() {
    // Both statements are bad; only the first is reported.
    let error = resolve_error("return 1; print this;");

    assert!(error.to_string().contains("Can't return from top-level code."));
}
