use std::fmt::Display;
use std::io;
use std::num::{ParseFloatError, ParseIntError};

use miette::{Diagnostic, NamedSource, Report};
use thiserror::Error;

use crate::lex::{IllegalTokenError, TokenKind};
use crate::parse::UnexpectedTokenError;

/// Failure reported by a host object. Opaque to the evaluator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lexical(#[from] IllegalTokenError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] UnexpectedTokenError),

    #[error("no object with identifier `{receiver}` (binding `{target}`)")]
    #[diagnostic(
        code(callchain::receiver_not_found),
        help("register `{receiver}` in the symbol table before evaluating")
    )]
    ReceiverNotFound { target: String, receiver: String },

    #[error("`{target}`: dispatching `{method}` failed: {source}")]
    #[diagnostic(code(callchain::dispatch))]
    Dispatch {
        target: String,
        method: String,
        #[source]
        source: BoxError,
    },

    #[error("`{target}`: marshalling failed: {source}")]
    #[diagnostic(code(callchain::marshal))]
    Marshal {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    #[diagnostic(code(callchain::io))]
    Io(#[from] io::Error),
}

impl Error {
    /// Attaches the program text so lexical and syntax labels render against it.
    pub fn with_source_code(self, name: impl AsRef<str>, source: impl Into<String>) -> Report {
        Report::new(self).with_source_code(NamedSource::new(name, source.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Int,
    Float,
    Bool,
    Text,
    Json,
}

impl Display for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Conversion::Int => "to_int",
            Conversion::Float => "to_float",
            Conversion::Bool => "to_bool",
            Conversion::Text => "to_text",
            Conversion::Json => "to_json",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum LiteralError {
    #[error("{conversion}(): cannot convert {found} literal `{literal}`")]
    #[diagnostic(code(callchain::type_mismatch))]
    TypeMismatch {
        conversion: Conversion,
        found: TokenKind,
        literal: String,
    },

    #[error("integer literal `{literal}` does not fit in 64 bits")]
    #[diagnostic(code(callchain::int_range))]
    Int {
        literal: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid float literal `{literal}`")]
    #[diagnostic(code(callchain::float))]
    Float {
        literal: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("literal `{literal}` is not valid JSON for the requested type")]
    #[diagnostic(code(callchain::json))]
    Json {
        literal: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Diagnostic)]
#[error("`{method}` expects {expected} argument(s), got {found}")]
#[diagnostic(code(callchain::arity))]
pub struct ArityError {
    pub method: String,
    pub expected: usize,
    pub found: usize,
}
