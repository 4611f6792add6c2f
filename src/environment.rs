use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{LoxError, Result};
use crate::value::Value;

/// One link in the scope chain: a name → value slot map plus an optional
/// parent. Blocks, function activations, and class scopes each add a child.
/// The chain is shared (`Rc`) because closures and bound methods keep
/// ancestor scopes alive past their block's exit.
#[derive(Debug)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Defines or overwrites `name` in this scope.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Reads `name`, searching outward through the chain.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(LoxError::runtime(format!(
                "Undefined variable '{}'.",
                name
            )))
        }
    }

    /// Writes `name`, searching outward; assigning a never-defined name is a
    /// runtime error.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        if self.values.contains_key(name) {
            self.values.insert(name.to_string(), value);
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(LoxError::runtime(format!(
                "Undefined variable '{}'.",
                name
            )))
        }
    }

    /// Walks exactly `distance` parents up from `this`. The resolver
    /// guarantees the chain is deep enough for every distance it records.
    fn ancestor(this: &Rc<RefCell<Environment>>, distance: usize) -> Result<Rc<RefCell<Environment>>> {
        let mut environment = Rc::clone(this);

        for _ in 0..distance {
            let parent = environment.borrow().enclosing.clone();
            match parent {
                Some(parent) => environment = parent,
                None => {
                    return Err(LoxError::runtime(
                        "Resolved scope distance exceeds environment depth.",
                    ))
                }
            }
        }

        Ok(environment)
    }

    /// Reads the slot `name` exactly `distance` scopes up.
    pub fn get_at(this: &Rc<RefCell<Environment>>, distance: usize, name: &str) -> Result<Value> {
        let environment = Environment::ancestor(this, distance)?;
        let value = environment.borrow().values.get(name).cloned();

        value.ok_or_else(|| LoxError::runtime(format!("Undefined variable '{}'.", name)))
    }

    /// Writes the slot `name` exactly `distance` scopes up.
    pub fn assign_at(
        this: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let environment = Environment::ancestor(this, distance)?;
        environment.borrow_mut().values.insert(name.to_string(), value);

        Ok(())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}
