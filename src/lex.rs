use std::fmt::Display;
use std::io::{self, BufRead};

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::Error;

#[derive(Error, Debug, Diagnostic)]
#[error("illegal token `{literal}` at rune {rune_offset}")]
#[diagnostic(
    code(callchain::lexical),
    help("check number syntax, string escapes and the `:=` operator")
)]
pub struct IllegalTokenError {
    pub literal: String,

    #[label("this token")]
    pub span: SourceSpan,

    pub rune_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Illegal,
    Eof,
    Whitespace,
    Ident,
    Define,
    String,
    Float,
    Int,
    Semi,
    Dot,
    Comma,
    OpenParen,
    CloseParen,
    True,
    False,
    Null,
    JsonBlob,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Whitespace => "WHITESPACE",
            TokenKind::Ident => "IDENT",
            TokenKind::Define => "DEFINE",
            TokenKind::String => "STRING",
            TokenKind::Float => "FLOAT",
            TokenKind::Int => "INT",
            TokenKind::Semi => "SEMI",
            TokenKind::Dot => "DOT",
            TokenKind::Comma => "COMMA",
            TokenKind::OpenParen => "OPEN_PAREN",
            TokenKind::CloseParen => "CLOSE_PAREN",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
            TokenKind::Null => "NULL",
            TokenKind::JsonBlob => "JSON_BLOB",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.literal)
    }
}

/// A character source with single-rune pushback that remembers the text of
/// the token currently being scanned.
pub trait RuneStream {
    /// Returns `None` at the end of input.
    fn read(&mut self) -> Option<char>;

    /// Pushes back the last character read. A second call before the next
    /// `read` is a no-op, as is a call after `read` returned `None`.
    fn unread(&mut self);

    fn start_token(&mut self);

    fn current_token(&self) -> &str;

    /// Byte offset of the start of the current token.
    fn token_offset(&self) -> usize;

    /// Rune offset of the start of the current token.
    fn rune_offset(&self) -> usize;

    /// Failure that cut the input short, if any. Reported once.
    fn take_error(&mut self) -> Option<io::Error> {
        None
    }
}

/// Fast path over a fully buffered program: tokens are slices of the input.
pub struct StrStream<'de> {
    whole: &'de str,
    start: usize,
    off: usize,
    last_size: usize,
    start_runes: usize,
    runes: usize,
}

impl<'de> StrStream<'de> {
    pub fn new(input: &'de str) -> Self {
        StrStream {
            whole: input,
            start: 0,
            off: 0,
            last_size: 0,
            start_runes: 0,
            runes: 0,
        }
    }
}

impl RuneStream for StrStream<'_> {
    fn read(&mut self) -> Option<char> {
        let c = self.whole[self.off..].chars().next();
        self.last_size = c.map_or(0, char::len_utf8);
        self.off += self.last_size;
        if c.is_some() {
            self.runes += 1;
        }
        c
    }

    fn unread(&mut self) {
        if self.last_size > 0 {
            self.off -= self.last_size;
            self.runes -= 1;
            self.last_size = 0;
        }
    }

    fn start_token(&mut self) {
        self.start = self.off;
        self.start_runes = self.runes;
    }

    fn current_token(&self) -> &str {
        &self.whole[self.start..self.off]
    }

    fn token_offset(&self) -> usize {
        self.start
    }

    fn rune_offset(&self) -> usize {
        self.start_runes
    }
}

/// Decodes UTF-8 from arbitrary incremental input, keeping only the current
/// token in memory.
pub struct ReaderStream<R> {
    reader: R,
    token: String,
    pushed_back: Option<char>,
    last: Option<char>,
    start: usize,
    bytes: usize,
    start_runes: usize,
    runes: usize,
    failed: bool,
    error: Option<io::Error>,
}

impl<R: BufRead> ReaderStream<R> {
    pub fn new(reader: R) -> Self {
        ReaderStream {
            reader,
            token: String::new(),
            pushed_back: None,
            last: None,
            start: 0,
            bytes: 0,
            start_runes: 0,
            runes: 0,
            failed: false,
            error: None,
        }
    }

    fn decode(&mut self) -> io::Result<Option<char>> {
        let Some(lead) = self.reader.fill_buf()?.first().copied() else {
            return Ok(None);
        };
        let width = match lead {
            0x00..=0x7f => 1,
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid UTF-8 lead byte {lead:#04x} at byte {}", self.bytes),
                ));
            }
        };
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf[..width])?;
        let decoded = std::str::from_utf8(&buf[..width])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(decoded.chars().next())
    }
}

impl<R: BufRead> RuneStream for ReaderStream<R> {
    fn read(&mut self) -> Option<char> {
        let c = match self.pushed_back.take() {
            Some(c) => Some(c),
            None if self.failed => None,
            None => self.decode().unwrap_or_else(|e| {
                self.failed = true;
                self.error = Some(e);
                None
            }),
        };
        self.last = c;
        if let Some(c) = c {
            self.token.push(c);
            self.bytes += c.len_utf8();
            self.runes += 1;
        }
        c
    }

    fn unread(&mut self) {
        if let Some(c) = self.last.take() {
            self.token.pop();
            self.bytes -= c.len_utf8();
            self.runes -= 1;
            self.pushed_back = Some(c);
        }
    }

    fn start_token(&mut self) {
        self.token.clear();
        self.start = self.bytes;
        self.start_runes = self.runes;
    }

    fn current_token(&self) -> &str {
        &self.token
    }

    fn token_offset(&self) -> usize {
        self.start
    }

    fn rune_offset(&self) -> usize {
        self.start_runes
    }

    fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }
}

pub struct Scanner<S> {
    stream: S,
}

impl<'de> Scanner<StrStream<'de>> {
    pub fn new(input: &'de str) -> Self {
        Scanner::with_stream(StrStream::new(input))
    }
}

impl<R: BufRead> Scanner<ReaderStream<R>> {
    pub fn from_reader(reader: R) -> Self {
        Scanner::with_stream(ReaderStream::new(reader))
    }
}

impl<S: RuneStream> Scanner<S> {
    pub fn with_stream(stream: S) -> Self {
        Scanner { stream }
    }

    pub fn tokens(&mut self) -> Tokens<'_, S> {
        Tokens { scanner: self }
    }

    /// Text of the token produced by the last `scan`.
    pub fn literal(&self) -> &str {
        self.stream.current_token()
    }

    pub fn rune_offset(&self) -> usize {
        self.stream.rune_offset()
    }

    pub fn span(&self) -> SourceSpan {
        (self.stream.token_offset(), self.literal().len()).into()
    }

    pub fn illegal(&self) -> IllegalTokenError {
        IllegalTokenError {
            literal: self.literal().to_owned(),
            span: self.span(),
            rune_offset: self.rune_offset(),
        }
    }

    /// Error for an `Illegal` or premature `Eof` token: a failed input stream
    /// takes precedence over the token text it cut short.
    pub fn lexical_error(&mut self) -> Error {
        match self.stream.take_error() {
            Some(e) => Error::Io(e),
            None => Error::Lexical(self.illegal()),
        }
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.stream.take_error()
    }

    pub fn scan(&mut self, ignore_whitespace: bool) -> TokenKind {
        loop {
            self.stream.start_token();
            let Some(c) = self.stream.read() else {
                return TokenKind::Eof;
            };

            let kind = match c {
                c if c.is_whitespace() => self.scan_whitespace(),
                'a'..='z' | 'A'..='Z' | '_' => self.scan_ident(),
                '0'..='9' | '-' => self.scan_number(c),
                '"' => self.scan_string(),
                '{' => self.scan_json_blob(),
                '.' => TokenKind::Dot,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semi,
                '(' => TokenKind::OpenParen,
                ')' => TokenKind::CloseParen,
                ':' => match self.stream.read() {
                    Some('=') => TokenKind::Define,
                    _ => TokenKind::Illegal,
                },
                _ => TokenKind::Illegal,
            };

            if kind == TokenKind::Whitespace && ignore_whitespace {
                continue;
            }
            return kind;
        }
    }

    fn scan_whitespace(&mut self) -> TokenKind {
        while self.stream.read().is_some_and(char::is_whitespace) {}
        self.stream.unread();
        TokenKind::Whitespace
    }

    fn scan_ident(&mut self) -> TokenKind {
        while self
            .stream
            .read()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {}
        self.stream.unread();

        match self.literal() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident,
        }
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        enum Number {
            Start,
            SignificantStart,
            Significant,
            Fractional,
            ExponentSign,
            ExponentFirstDigit,
            ExponentDigit,
            End,
            Error,
        }

        let mut kind = TokenKind::Int;
        let mut state = Number::Start;
        let mut c = Some(first);
        loop {
            let digit = c.is_some_and(|c| c.is_ascii_digit());
            state = match state {
                Number::Start => match c {
                    Some('-') => Number::SignificantStart,
                    _ if digit => Number::Significant,
                    _ => Number::Error,
                },
                Number::SignificantStart if digit => Number::Significant,
                Number::SignificantStart => Number::Error,
                Number::Significant => match c {
                    _ if digit => Number::Significant,
                    Some('.') => {
                        kind = TokenKind::Float;
                        Number::Fractional
                    }
                    Some('e' | 'E') => {
                        kind = TokenKind::Float;
                        Number::ExponentSign
                    }
                    _ => Number::End,
                },
                Number::Fractional => match c {
                    _ if digit => Number::Fractional,
                    Some('e' | 'E') => Number::ExponentSign,
                    _ => Number::End,
                },
                Number::ExponentSign => match c {
                    _ if digit => Number::ExponentDigit,
                    Some('-' | '+') => Number::ExponentFirstDigit,
                    _ => Number::Error,
                },
                Number::ExponentFirstDigit if digit => Number::ExponentDigit,
                Number::ExponentFirstDigit => Number::Error,
                Number::ExponentDigit if digit => Number::ExponentDigit,
                Number::ExponentDigit => Number::End,
                done @ (Number::End | Number::Error) => done,
            };

            match state {
                Number::End => {
                    // only the character that ended a valid run goes back
                    if c.is_some() {
                        self.stream.unread();
                    }
                    return kind;
                }
                Number::Error => return TokenKind::Illegal,
                _ => c = self.stream.read(),
            }
        }
    }

    /// Called after the opening quote has been read.
    fn scan_string(&mut self) -> TokenKind {
        enum Quoted {
            InString,
            Escape,
            Unicode(u8),
            End,
            Error,
        }

        let mut state = Quoted::InString;
        while let Some(c) = self.stream.read() {
            state = match state {
                Quoted::InString => match c {
                    '"' => Quoted::End,
                    '\\' => Quoted::Escape,
                    c if (c as u32) < 0x20 => Quoted::Error,
                    _ => Quoted::InString,
                },
                Quoted::Escape => match c {
                    'b' | 'f' | 'n' | 'r' | 't' | '\\' | '/' | '"' => Quoted::InString,
                    'u' => Quoted::Unicode(0),
                    _ => Quoted::Error,
                },
                Quoted::Unicode(3) if c.is_ascii_hexdigit() => Quoted::InString,
                Quoted::Unicode(seen) if c.is_ascii_hexdigit() => Quoted::Unicode(seen + 1),
                Quoted::Unicode(_) => Quoted::Error,
                done @ (Quoted::End | Quoted::Error) => done,
            };

            match state {
                Quoted::End => return TokenKind::String,
                Quoted::Error => return TokenKind::Illegal,
                _ => {}
            }
        }
        TokenKind::Illegal
    }

    /// Called after the opening brace has been read. Only brace and quote
    /// balance is checked; the span is handed to a JSON decoder later.
    fn scan_json_blob(&mut self) -> TokenKind {
        let mut depth = 0usize;
        while let Some(c) = self.stream.read() {
            match c {
                '"' => {
                    if self.scan_string() == TokenKind::Illegal {
                        return TokenKind::Illegal;
                    }
                }
                '{' => depth += 1,
                '}' if depth == 0 => return TokenKind::JsonBlob,
                '}' => depth -= 1,
                _ => {}
            }
        }
        TokenKind::Illegal
    }
}

/// Iterator over the non-whitespace tokens of a [`Scanner`]. Illegal tokens
/// become lexical errors; iteration ends at EOF.
pub struct Tokens<'a, S> {
    scanner: &'a mut Scanner<S>,
}

impl<S: RuneStream> Iterator for Tokens<'_, S> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let scanner = &mut *self.scanner;
        match scanner.scan(true) {
            TokenKind::Eof => scanner.take_error().map(|e| Err(Error::Io(e))),
            TokenKind::Illegal => Some(Err(scanner.lexical_error())),
            kind => Some(Ok(Token {
                kind,
                literal: scanner.literal().to_owned(),
            })),
        }
    }
}

/// Collects every non-whitespace token of `input`, stopping at the first
/// illegal one.
pub fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    Scanner::new(input).tokens().collect()
}
