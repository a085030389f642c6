pub mod error;
pub mod eval;
pub mod host;
pub mod lex;
pub mod parse;

pub use error::{BoxError, Error};
pub use eval::{Dispatch, Evaluator, Next, Strategy, SymbolTable, dispatch, evaluate, evaluate_str};
pub use lex::{Scanner, Token, TokenKind, Tokens, tokenize};
pub use parse::{ArgumentLiteral, Definition, MethodCall, Parser, Program, parse};
