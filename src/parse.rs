use std::fmt::Display;
use std::io::BufRead;

use log::trace;
use miette::{Diagnostic, SourceSpan};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    Error,
    error::{ArityError, Conversion, LiteralError},
    lex::{ReaderStream, RuneStream, Scanner, StrStream, TokenKind},
};

#[derive(Error, Debug, Diagnostic)]
#[error("expected {expected}, got {found} (`{literal}`) at rune {rune_offset}")]
#[diagnostic(
    code(callchain::syntax),
    help("definitions read `target := receiver.method(arg, ...);`")
)]
pub struct UnexpectedTokenError {
    pub expected: &'static str,
    pub found: TokenKind,
    pub literal: String,

    #[label("expected {expected}")]
    pub span: SourceSpan,

    pub rune_offset: usize,
}

/// A call argument kept as scanned. Conversions happen when the receiver asks
/// for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentLiteral {
    kind: TokenKind,
    literal: String,
}

impl ArgumentLiteral {
    pub fn new(kind: TokenKind, literal: impl Into<String>) -> Self {
        ArgumentLiteral {
            kind,
            literal: literal.into(),
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    fn mismatch(&self, conversion: Conversion) -> LiteralError {
        LiteralError::TypeMismatch {
            conversion,
            found: self.kind,
            literal: self.literal.clone(),
        }
    }

    pub fn to_int(&self) -> Result<i64, LiteralError> {
        if self.kind != TokenKind::Int {
            return Err(self.mismatch(Conversion::Int));
        }
        self.literal.parse().map_err(|source| LiteralError::Int {
            literal: self.literal.clone(),
            source,
        })
    }

    pub fn to_float(&self) -> Result<f64, LiteralError> {
        if self.kind != TokenKind::Float {
            return Err(self.mismatch(Conversion::Float));
        }
        self.literal.parse().map_err(|source| LiteralError::Float {
            literal: self.literal.clone(),
            source,
        })
    }

    pub fn to_bool(&self) -> Result<bool, LiteralError> {
        match self.kind {
            TokenKind::True => Ok(true),
            TokenKind::False => Ok(false),
            _ => Err(self.mismatch(Conversion::Bool)),
        }
    }

    /// The string contents with quotes stripped and escapes resolved.
    pub fn to_text(&self) -> Result<String, LiteralError> {
        if self.kind != TokenKind::String {
            return Err(self.mismatch(Conversion::Text));
        }
        serde_json::from_str(&self.literal).map_err(|source| LiteralError::Json {
            literal: self.literal.clone(),
            source,
        })
    }

    /// Decodes a JSON blob argument. This is the only place its contents are
    /// validated.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, LiteralError> {
        if self.kind != TokenKind::JsonBlob {
            return Err(self.mismatch(Conversion::Json));
        }
        serde_json::from_str(&self.literal).map_err(|source| LiteralError::Json {
            literal: self.literal.clone(),
            source,
        })
    }
}

impl Display for ArgumentLiteral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.literal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub name: String,
    pub arguments: Vec<ArgumentLiteral>,
}

impl MethodCall {
    pub fn new(name: impl Into<String>, arguments: Vec<ArgumentLiteral>) -> Self {
        MethodCall {
            name: name.into(),
            arguments,
        }
    }

    pub fn argument(&self, index: usize) -> Result<&ArgumentLiteral, ArityError> {
        self.arguments.get(index).ok_or_else(|| ArityError {
            method: self.name.clone(),
            expected: index + 1,
            found: self.arguments.len(),
        })
    }
}

impl Display for MethodCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{argument}")?;
        }
        f.write_str(")")
    }
}

/// `target := receiver.call(...).call(...);` with at least one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub target: String,
    pub receiver: String,
    pub calls: Vec<MethodCall>,
}

impl Display for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} := {}", self.target, self.receiver)?;
        for call in &self.calls {
            write!(f, ".{call}")?;
        }
        f.write_str(";")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub definitions: Vec<Definition>,
}

impl Program {
    pub fn iter(&self) -> std::slice::Iter<'_, Definition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Definition;
    type IntoIter = std::slice::Iter<'a, Definition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.iter()
    }
}

impl FromIterator<Definition> for Program {
    fn from_iter<I: IntoIterator<Item = Definition>>(iter: I) -> Self {
        Program {
            definitions: iter.into_iter().collect(),
        }
    }
}

pub struct Parser<S> {
    scanner: Scanner<S>,
    done: bool,
}

impl<'de> Parser<StrStream<'de>> {
    pub fn new(input: &'de str) -> Self {
        Parser::with_scanner(Scanner::new(input))
    }
}

impl<R: BufRead> Parser<ReaderStream<R>> {
    pub fn from_reader(reader: R) -> Self {
        Parser::with_scanner(Scanner::from_reader(reader))
    }
}

impl<S: RuneStream> Parser<S> {
    pub fn with_scanner(scanner: Scanner<S>) -> Self {
        Parser {
            scanner,
            done: false,
        }
    }

    fn next_token(&mut self) -> TokenKind {
        self.scanner.scan(true)
    }

    fn unexpected(&mut self, expected: &'static str, found: TokenKind) -> Error {
        match found {
            TokenKind::Illegal => return self.scanner.lexical_error(),
            TokenKind::Eof => {
                if let Some(e) = self.scanner.take_error() {
                    return Error::Io(e);
                }
            }
            _ => {}
        }
        UnexpectedTokenError {
            expected,
            found,
            literal: self.scanner.literal().to_owned(),
            span: self.scanner.span(),
            rune_offset: self.scanner.rune_offset(),
        }
        .into()
    }

    fn expect(&mut self, expected: TokenKind, description: &'static str) -> Result<(), Error> {
        match self.next_token() {
            found if found == expected => Ok(()),
            found => Err(self.unexpected(description, found)),
        }
    }

    /// Reads `target :=`. Returns `None` at a clean end of input.
    pub fn parse_target(&mut self) -> Result<Option<String>, Error> {
        match self.next_token() {
            TokenKind::Eof => match self.scanner.take_error() {
                Some(e) => Err(Error::Io(e)),
                None => Ok(None),
            },
            TokenKind::Ident => {
                let target = self.scanner.literal().to_owned();
                self.expect(TokenKind::Define, "`:=`")?;
                Ok(Some(target))
            }
            found => Err(self.unexpected("binding name", found)),
        }
    }

    pub fn parse_receiver(&mut self) -> Result<String, Error> {
        self.expect(TokenKind::Ident, "receiver name")?;
        Ok(self.scanner.literal().to_owned())
    }

    /// Reads `.name(args)`, or the closing `;` once at least one call has
    /// been read (`first == false`), in which case `None` is returned.
    pub fn parse_call(&mut self, first: bool) -> Result<Option<MethodCall>, Error> {
        match self.next_token() {
            TokenKind::Dot => {}
            TokenKind::Semi if !first => return Ok(None),
            found if first => return Err(self.unexpected("`.`", found)),
            found => return Err(self.unexpected("`.` or `;`", found)),
        }

        self.expect(TokenKind::Ident, "method name")?;
        let name = self.scanner.literal().to_owned();
        self.expect(TokenKind::OpenParen, "`(`")?;
        let arguments = self.parse_argument_list()?;
        Ok(Some(MethodCall { name, arguments }))
    }

    /// Reads the arguments after `(` up to and including `)`.
    pub fn parse_argument_list(&mut self) -> Result<Vec<ArgumentLiteral>, Error> {
        let mut arguments = Vec::new();
        let mut token = self.next_token();
        if token == TokenKind::CloseParen {
            return Ok(arguments);
        }

        loop {
            match token {
                TokenKind::Int
                | TokenKind::Float
                | TokenKind::String
                | TokenKind::True
                | TokenKind::False
                | TokenKind::JsonBlob => {
                    arguments.push(ArgumentLiteral::new(token, self.scanner.literal()));
                }
                found => return Err(self.unexpected("argument literal", found)),
            }

            match self.next_token() {
                TokenKind::Comma => token = self.next_token(),
                TokenKind::CloseParen => return Ok(arguments),
                found => return Err(self.unexpected("`,` or `)`", found)),
            }
        }
    }

    pub fn parse_definition(&mut self) -> Result<Option<Definition>, Error> {
        let Some(target) = self.parse_target()? else {
            return Ok(None);
        };
        let receiver = self.parse_receiver()?;

        let mut calls = Vec::new();
        while let Some(call) = self.parse_call(calls.is_empty())? {
            calls.push(call);
        }

        let definition = Definition {
            target,
            receiver,
            calls,
        };
        trace!("parsed `{definition}`");
        Ok(Some(definition))
    }

    pub fn parse_program(&mut self) -> Result<Program, Error> {
        self.collect()
    }
}

impl<S: RuneStream> Iterator for Parser<S> {
    type Item = Result<Definition, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parse_definition() {
            Ok(Some(definition)) => Some(Ok(definition)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub fn parse(input: &str) -> Result<Program, Error> {
    Parser::new(input).parse_program()
}
