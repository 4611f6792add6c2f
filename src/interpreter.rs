use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::expr::{Expr, ExprId};
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::{LoxCallable, LoxClass, LoxFunction, NativeFunction, Value};

/// Tree-walking evaluator. Holds the global and current environments, the
/// resolver's binding-distance table, and the sink program output is written
/// to (stdout in the binary, a capture buffer in tests).
///
/// Statement execution returns `Result<Option<Value>>`: `Some` means a
/// `return` is propagating upward and carries its value. Callers forward it
/// until a call frame consumes it, so no unwinding machinery is needed.
pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<ExprId, usize>,
    out: Box<dyn Write>,
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter::with_output(Box::new(io::stdout()))
    }

    /// Builds an interpreter writing program output to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));

        globals.borrow_mut().define(
            "clock",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "clock".to_string(),
                arity: 0,
                func: clock_native,
            })),
        );

        Interpreter {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
        }
    }

    /// Records a binding distance for a variable occurrence; called by the
    /// resolver. Occurrences never recorded here are globals.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        self.locals.insert(id, depth);
    }

    /// Runs a resolved program.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        info!("Interpreting {} top-level statement(s)", statements.len());

        for statement in statements {
            // A propagating return cannot reach here; the resolver rejects
            // top-level `return`.
            self.execute(statement)?;
        }

        Ok(())
    }

    pub fn execute(&mut self, stmt: &Stmt) -> Result<Option<Value>> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;

                Ok(None)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;

                writeln!(self.out, "{}", value)?;

                Ok(None)
            }

            Stmt::Var { name, initializer } => {
                let value: Value = if let Some(expr) = initializer {
                    self.evaluate(expr)?
                } else {
                    Value::Nil
                };

                self.environment.borrow_mut().define(&name.lexeme, value);

                Ok(None)
            }

            Stmt::Block(statements) => {
                let environment = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
                    &self.environment,
                ))));

                self.execute_block(statements, environment)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(None)
                }
            }

            Stmt::While { condition, body } => {
                while is_truthy(&self.evaluate(condition)?) {
                    if let Some(returned) = self.execute(body)? {
                        return Ok(Some(returned));
                    }
                }

                Ok(None)
            }

            Stmt::Function(declaration) => {
                let function = LoxFunction::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                );

                self.environment
                    .borrow_mut()
                    .define(&declaration.name.lexeme, Value::Function(Rc::new(function)));

                Ok(None)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                Ok(Some(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    /// Runs `statements` inside `environment`, restoring the previous
    /// environment on every exit path, including error and early-return
    /// propagation.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> Result<Option<Value>> {
        let previous = std::mem::replace(&mut self.environment, environment);

        let mut result = Ok(None);
        for statement in statements {
            match self.execute(statement) {
                Ok(None) => continue,
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;
        result
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<Option<Value>> {
        let superclass_value = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => return Err(LoxError::runtime("Superclass must be a class.")),
            },
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // With a superclass, methods close over an extra scope binding
        // `super`, mirroring the scope the resolver pushed.
        let enclosing = if let Some(superclass) = &superclass_value {
            let enclosing = Rc::clone(&self.environment);

            let environment = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
                &self.environment,
            ))));
            environment
                .borrow_mut()
                .define("super", Value::Class(Rc::clone(superclass)));
            self.environment = environment;

            Some(enclosing)
        } else {
            None
        };

        let mut method_map = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";

            let function = LoxFunction::new(
                Rc::clone(method),
                Rc::clone(&self.environment),
                is_initializer,
            );

            method_map.insert(method.name.lexeme.clone(), Rc::new(function));
        }

        let class = LoxClass {
            name: name.lexeme.clone(),
            superclass: superclass_value,
            methods: method_map,
        };

        if let Some(enclosing) = enclosing {
            self.environment = enclosing;
        }

        self.environment
            .borrow_mut()
            .assign(&name.lexeme, Value::Class(Rc::new(class)))?;

        Ok(None)
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(token) => evaluate_literal(token),

            Expr::Grouping(expr) => self.evaluate(expr),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_value = self.evaluate(left)?;

                // Short-circuit: yield an operand value, never a coerced bool.
                match operator.token_type {
                    TokenType::OR if is_truthy(&left_value) => Ok(left_value),
                    TokenType::OR => self.evaluate(right),
                    _ if !is_truthy(&left_value) => Ok(left_value),
                    _ => self.evaluate(right),
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(distance) => Environment::assign_at(
                        &self.environment,
                        *distance,
                        &name.lexeme,
                        value.clone(),
                    )?,

                    None => self
                        .globals
                        .borrow_mut()
                        .assign(&name.lexeme, value.clone())?,
                }

                Ok(value)
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                let callee_value = self.evaluate(callee)?;

                let mut argument_values = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    argument_values.push(self.evaluate(argument)?);
                }

                self.call_value(callee_value, argument_values)
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => {
                        let field = instance.borrow().fields.get(&name.lexeme).cloned();
                        if let Some(value) = field {
                            return Ok(value);
                        }

                        let method = instance.borrow().class.find_method(&name.lexeme);
                        match method {
                            Some(method) => Ok(Value::Function(Rc::new(method.bind(&instance)))),
                            None => Err(LoxError::runtime(format!(
                                "Undefined property '{}'.",
                                name.lexeme
                            ))),
                        }
                    }

                    _ => Err(LoxError::runtime("Only instances have properties.")),
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;

                        instance
                            .borrow_mut()
                            .fields
                            .insert(name.lexeme.clone(), value.clone());

                        Ok(value)
                    }

                    _ => Err(LoxError::runtime("Only instances have fields.")),
                }
            }

            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),

            Expr::Super { id, method, .. } => self.evaluate_super(*id, method),
        }
    }

    /// `super.NAME` skips the current class: the superclass sits at the
    /// statically recorded distance, the receiver one scope closer.
    fn evaluate_super(&mut self, id: ExprId, method: &Token) -> Result<Value> {
        let distance = self.locals.get(&id).copied().ok_or_else(|| {
            LoxError::runtime("Unresolved 'super' expression.")
        })?;

        let superclass = match Environment::get_at(&self.environment, distance, "super")? {
            Value::Class(class) => class,
            _ => return Err(LoxError::runtime("Superclass must be a class.")),
        };

        let object = match Environment::get_at(&self.environment, distance - 1, "this")? {
            Value::Instance(instance) => instance,
            _ => return Err(LoxError::runtime("Unresolved 'this' binding.")),
        };

        let method = superclass.find_method(&method.lexeme).ok_or_else(|| {
            LoxError::runtime(format!("Undefined property '{}'.", method.lexeme))
        })?;

        Ok(Value::Function(Rc::new(method.bind(&object))))
    }

    fn call_value(&mut self, callee: Value, arguments: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(function) => {
                self.check_arity(function.arity(), arguments.len())?;
                function.call(self, arguments)
            }

            Value::Class(class) => {
                self.check_arity(class.arity(), arguments.len())?;
                class.call(self, arguments)
            }

            Value::NativeFunction(native) => {
                self.check_arity(native.arity(), arguments.len())?;
                native.call(self, arguments)
            }

            _ => Err(LoxError::runtime("Can only call functions and classes.")),
        }
    }

    fn check_arity(&self, expected: usize, got: usize) -> Result<()> {
        if expected != got {
            return Err(LoxError::runtime(format!(
                "Expected {} arguments but got {}.",
                expected, got
            )));
        }
        Ok(())
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value> {
        match self.locals.get(&id) {
            Some(distance) => {
                debug!("Reading '{}' at distance {}", name.lexeme, distance);
                Environment::get_at(&self.environment, *distance, &name.lexeme)
            }

            None => self.globals.borrow().get(&name.lexeme),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value> {
        let value: Value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::MINUS => match value {
                Value::Number(n) => Ok(Value::Number(-n)),

                _ => Err(LoxError::runtime("Operand must be a number.")),
            },

            TokenType::BANG => Ok(Value::Bool(!is_truthy(&value))),

            _ => Err(LoxError::runtime(format!(
                "Invalid unary operator '{}'.",
                operator.lexeme
            ))),
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value> {
        let left_value: Value = self.evaluate(left)?;
        let right_value: Value = self.evaluate(right)?;

        match operator.token_type {
            TokenType::PLUS => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),

                _ => Err(LoxError::runtime(
                    "Operands must be two numbers or two strings.",
                )),
            },

            TokenType::MINUS => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::STAR => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            // Division by zero follows IEEE-754, as in the reference.
            TokenType::SLASH => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::LESS => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::LESS_EQUAL => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::GREATER => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::GREATER_EQUAL => match (left_value, right_value) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),

                _ => Err(LoxError::runtime("Operands must be numbers.")),
            },

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(is_equal(&left_value, &right_value))),

            TokenType::BANG_EQUAL => Ok(Value::Bool(!is_equal(&left_value, &right_value))),

            _ => Err(LoxError::runtime(format!(
                "Invalid binary operator '{}'.",
                operator.lexeme
            ))),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

fn evaluate_literal(token: &Token) -> Result<Value> {
    match &token.token_type {
        TokenType::NUMBER(n) => Ok(Value::Number(*n)),

        TokenType::STRING(s) => Ok(Value::String(s.clone())),

        TokenType::TRUE => Ok(Value::Bool(true)),

        TokenType::FALSE => Ok(Value::Bool(false)),

        TokenType::NIL => Ok(Value::Nil),

        _ => Err(LoxError::runtime(format!(
            "Invalid literal '{}'.",
            token.lexeme
        ))),
    }
}

/// Only nil and false are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,

        Value::Bool(b) => *b,

        _ => true,
    }
}

/// Primitives compare by value; functions, classes, and instances by
/// identity. Different kinds never compare equal, except nil with nil.
fn is_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,

        (Value::Number(a), Value::Number(b)) => a == b,

        (Value::String(a), Value::String(b)) => a == b,

        (Value::Bool(a), Value::Bool(b)) => a == b,

        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),

        (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),

        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),

        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),

        _ => false,
    }
}

/// Wall-clock seconds since the Unix epoch, whole seconds only.
fn clock_native(_args: &[Value]) -> Result<Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LoxError::runtime(format!("Clock error: {}", e)))?
        .as_secs();

    Ok(Value::Number(timestamp as f64))
}
