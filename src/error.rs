// ABOUTME: Error types for the Plang compile and runtime error domains

use crate::token::Pos;
use std::fmt;
use thiserror::Error;

/// Classification of a compile-time diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Undeclared,
    Redeclaration,
    TypeMismatch,
    UnknownKeyword,
    BadOperatorOperand,
    InvalidContext,
    BadCall,
    DuplicateCatch,
    MissingDefaultCatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Undeclared => "undeclared",
            ErrorKind::Redeclaration => "redeclaration",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::UnknownKeyword => "unknown-keyword",
            ErrorKind::BadOperatorOperand => "bad-operator-operand",
            ErrorKind::InvalidContext => "invalid-context",
            ErrorKind::BadCall => "bad-call",
            ErrorKind::DuplicateCatch => "duplicate-catch",
            ErrorKind::MissingDefaultCatch => "missing-default-catch",
        };
        f.write_str(name)
    }
}

/// A single structured compile-time diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Pos,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: Pos) -> Self {
        CompileError {
            kind,
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

/// Top-level failure of an interpreter run.
#[derive(Error, Debug)]
pub enum PlangError {
    #[error("{}", format_compile_errors(.0))]
    Compile(Vec<CompileError>),

    #[error("{pos}: {message}")]
    Runtime { message: String, pos: Pos },
}

fn format_compile_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
