//! Centralised error hierarchy for the interpreter.
//!
//! All subsystems (scanner, parser, resolver, runtime, CLI) convert their
//! internal failure modes into one of the variants defined here. This enables
//! a uniform `Result<T>` alias throughout the crate and ergonomic
//! inter-operation with `anyhow`, while still preserving rich diagnostic
//! detail.
//!
//! The module does not print diagnostics itself; drivers format errors and
//! pick the process exit code via [`LoxError::exit_code`].

use std::io;
use thiserror::Error;

use log::info;

/// Canonical error type used throughout the interpreter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoxError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] Error: {message}")]
    Lex {
        /// Human-readable description.
        message: String,

        /// 1-based line where the error occurred.
        line: usize,
    },

    /// Syntactic (parser) error, reported at the offending token.
    #[error("[line {line}] Error at '{lexeme}': {message}")]
    Parse {
        message: String,
        lexeme: String,
        line: usize,
    },

    /// Static-analysis failure (scope rules, `this`/`super`/`return` misuse).
    #[error("[line {line}] Error at '{lexeme}': {message}")]
    Resolve {
        message: String,
        lexeme: String,
        line: usize,
    },

    /// Runtime evaluation error; printed as a bare message on its own line.
    #[error("{0}")]
    Runtime(String),

    /// Wrapper around `std::io::Error` (transparent). Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoxError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Lex error: line={}, msg={}", line, message);

        LoxError::Lex { message, line }
    }

    /// Helper constructor for the **parser**.
    pub fn parse<S: Into<String>>(line: usize, lexeme: &str, msg: S) -> Self {
        let message: String = msg.into();

        info!(
            "Creating Parse error: line={}, at='{}', msg={}",
            line, lexeme, message
        );

        LoxError::Parse {
            message,
            lexeme: lexeme.to_string(),
            line,
        }
    }

    /// Helper constructor for the **resolver**.
    pub fn resolve<S: Into<String>>(line: usize, lexeme: &str, msg: S) -> Self {
        let message: String = msg.into();

        info!(
            "Creating Resolve error: line={}, at='{}', msg={}",
            line, lexeme, message
        );

        LoxError::Resolve {
            message,
            lexeme: lexeme.to_string(),
            line,
        }
    }

    /// Helper constructor for the **evaluator**.
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        LoxError::Runtime(msg.into())
    }

    /// Process exit code mandated for this error kind: 65 for anything
    /// diagnosed before execution starts, 70 for runtime failures, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoxError::Lex { .. } | LoxError::Parse { .. } | LoxError::Resolve { .. } => 65,
            LoxError::Runtime(_) => 70,
            LoxError::Io(_) => 1,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoxError>;
