//! Scanning of program text into a terminated sequence of [`Token`]s.
//!
//! Scanning happens in two layers: [`RawToken`] is a [`logos`] lexer that only
//! knows the shape of lexemes, and [`scan`] turns those into [`Token`]s,
//! resolving keywords case-insensitively and joining multi-word keywords such
//! as `END IF` into one token.
use core::fmt;

use icu_casemap::CaseMapper;
pub use logos::Span;
use logos::{Lexer, Logos};

use crate::value::{Integer, Value};

fn read_number(lexer: &mut Lexer<RawToken>) -> Result<Integer, LexerError> {
    lexer
        .slice()
        .parse()
        .map_err(|_| LexerError::NumberTooBig)
}

fn read_quoted(lexer: &mut Lexer<RawToken>) -> Box<str> {
    let slice = lexer.slice();
    // drop the quotes on both ends
    Box::from(&slice[1..slice.len() - 1])
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("number literal too big")]
    NumberTooBig,
    #[error("expected {expected} after '{stem}'")]
    IncompleteKeyword {
        stem: &'static str,
        expected: &'static str,
    },
}

/// Lexemes as they appear in the source, before keyword resolution.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum RawToken {
    #[token("+")]
    Plus,
    #[token("*")]
    Star,
    #[token("=")]
    Equal,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<-")]
    LeftArrow,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,

    #[regex("[0-9]+", read_number)]
    Number(Integer),
    /// Identifiers and keywords alike. An identifier may end in `?`.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*\??")]
    Word,
    /// Procedure labels such as `"MINUS"`
    #[regex(r#""[^"]*""#, read_quoted)]
    Quoted(Box<str>),
}

impl RawToken {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // operators
    Plus,
    Star,
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Not,
    And,
    Or,
    LeftArrow,

    // grouping
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,

    // structure
    DefineProcedure,
    EndProcedure,
    QuitProcedure,
    If,
    Then,
    Else,
    EndIf,
    Loop,
    AbortLoop,
    EndLoop,
    Times,

    Output,
    Identifier,
    /// Quoted procedure name, never a variable
    Label,
    Constant,
    Eof,
}

impl TokenKind {
    /// Keywords at which a statement block stops.
    pub fn closes_block(self) -> bool {
        matches!(
            self,
            Self::Else | Self::EndIf | Self::EndLoop | Self::EndProcedure
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Number(Integer),
    Boolean(bool),
    Name(Box<str>),
    Label(Box<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Exact source text, except for keywords which are upper-cased
    pub lexeme: Box<str>,
    pub literal: Option<Literal>,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// The variable name carried by an identifier.
    pub fn name(&self) -> Option<&str> {
        match &self.literal {
            Some(Literal::Name(name)) => Some(name),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.literal {
            Some(Literal::Label(label)) => Some(label),
            _ => None,
        }
    }

    /// The value carried by a constant.
    pub fn value(&self) -> Option<Value> {
        match self.literal {
            Some(Literal::Number(n)) => Some(Value::Number(n)),
            Some(Literal::Boolean(b)) => Some(Value::Boolean(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of input"),
            _ => write!(f, "{}", self.lexeme),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Clone)]
#[error("line {line} column {column}: {error}")]
pub struct LexError {
    pub error: LexerError,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

/// Maps byte offsets to 1-based line and column numbers.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    pub fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let start = self.line_starts[line - 1];
        let column = self
            .source
            .get(start..offset)
            .map_or(0, |s| s.chars().count());
        (line, column + 1)
    }
}

/// First words of the keywords spelled with two words.
#[derive(Debug, Clone, Copy)]
enum Stem {
    Define,
    End,
    Quit,
    Abort,
}

impl Stem {
    fn name(self) -> &'static str {
        match self {
            Self::Define => "DEFINE",
            Self::End => "END",
            Self::Quit => "QUIT",
            Self::Abort => "ABORT",
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::Define | Self::Quit => "PROCEDURE",
            Self::End => "IF, LOOP or PROCEDURE",
            Self::Abort => "LOOP",
        }
    }

    fn complete(self, folded: &str) -> Option<TokenKind> {
        match (self, folded) {
            (Self::Define, "procedure") => Some(TokenKind::DefineProcedure),
            (Self::End, "if") => Some(TokenKind::EndIf),
            (Self::End, "loop") => Some(TokenKind::EndLoop),
            (Self::End, "procedure") => Some(TokenKind::EndProcedure),
            (Self::Quit, "procedure") => Some(TokenKind::QuitProcedure),
            (Self::Abort, "loop") => Some(TokenKind::AbortLoop),
            _ => None,
        }
    }
}

enum Keyword {
    Simple(TokenKind),
    Boolean(bool),
    Stem(Stem),
}

fn keyword(folded: &str) -> Option<Keyword> {
    let keyword = match folded {
        "if" => Keyword::Simple(TokenKind::If),
        "then" => Keyword::Simple(TokenKind::Then),
        "else" => Keyword::Simple(TokenKind::Else),
        "loop" => Keyword::Simple(TokenKind::Loop),
        "times" => Keyword::Simple(TokenKind::Times),
        "not" => Keyword::Simple(TokenKind::Not),
        "and" => Keyword::Simple(TokenKind::And),
        "or" => Keyword::Simple(TokenKind::Or),
        "output" => Keyword::Simple(TokenKind::Output),
        "yes" => Keyword::Boolean(true),
        "no" => Keyword::Boolean(false),
        "define" => Keyword::Stem(Stem::Define),
        "end" => Keyword::Stem(Stem::End),
        "quit" => Keyword::Stem(Stem::Quit),
        "abort" => Keyword::Stem(Stem::Abort),
        _ => return None,
    };
    Some(keyword)
}

/// Scans the whole of `source`. The result always ends with a
/// [`TokenKind::Eof`] token; the first lexical error aborts scanning.
pub fn scan(source: &str) -> Result<Vec<Token>, LexError> {
    let index = LineIndex::new(source);
    let case_mapper = CaseMapper::new();

    let error_at = |error: LexerError, span: Span| {
        let (line, column) = index.position(span.start);
        LexError {
            error,
            span,
            line,
            column,
        }
    };
    let token_at = |kind: TokenKind, lexeme: Box<str>, literal: Option<Literal>, span: Span| {
        let (line, column) = index.position(span.start);
        Token {
            kind,
            lexeme,
            literal,
            span,
            line,
            column,
        }
    };

    let mut raw = RawToken::lexer(source).spanned().peekable();
    let mut tokens = Vec::new();
    while let Some((result, span)) = raw.next() {
        let raw_token = result.map_err(|error| error_at(error, span.clone()))?;
        let slice = &source[span.clone()];
        let simple = |kind| token_at(kind, slice.into(), None, span.clone());
        let token = match raw_token {
            RawToken::Plus => simple(TokenKind::Plus),
            RawToken::Star => simple(TokenKind::Star),
            RawToken::Equal => simple(TokenKind::Equal),
            RawToken::Less => simple(TokenKind::Less),
            RawToken::LessEqual => simple(TokenKind::LessEqual),
            RawToken::Greater => simple(TokenKind::Greater),
            RawToken::GreaterEqual => simple(TokenKind::GreaterEqual),
            RawToken::LeftArrow => simple(TokenKind::LeftArrow),
            RawToken::LeftParen => simple(TokenKind::LeftParen),
            RawToken::RightParen => simple(TokenKind::RightParen),
            RawToken::LeftBracket => simple(TokenKind::LeftBracket),
            RawToken::RightBracket => simple(TokenKind::RightBracket),
            RawToken::Comma => simple(TokenKind::Comma),
            RawToken::Number(n) => token_at(
                TokenKind::Constant,
                slice.into(),
                Some(Literal::Number(n)),
                span,
            ),
            RawToken::Quoted(label) => token_at(
                TokenKind::Label,
                slice.into(),
                Some(Literal::Label(label)),
                span,
            ),
            RawToken::Word => match keyword(&case_mapper.fold_string(slice)) {
                None => token_at(
                    TokenKind::Identifier,
                    slice.into(),
                    Some(Literal::Name(slice.into())),
                    span,
                ),
                Some(Keyword::Simple(kind)) => {
                    token_at(kind, slice.to_ascii_uppercase().into(), None, span)
                }
                Some(Keyword::Boolean(b)) => token_at(
                    TokenKind::Constant,
                    slice.to_ascii_uppercase().into(),
                    Some(Literal::Boolean(b)),
                    span,
                ),
                Some(Keyword::Stem(stem)) => {
                    let completion = match raw.peek() {
                        Some((Ok(RawToken::Word), next)) => stem
                            .complete(&case_mapper.fold_string(&source[next.clone()]))
                            .map(|kind| (kind, next.clone())),
                        _ => None,
                    };
                    let Some((kind, next)) = completion else {
                        return Err(error_at(
                            LexerError::IncompleteKeyword {
                                stem: stem.name(),
                                expected: stem.expected(),
                            },
                            span,
                        ));
                    };
                    _ = raw.next(); // consume the second word
                    let lexeme = format!(
                        "{} {}",
                        stem.name(),
                        source[next.clone()].to_ascii_uppercase()
                    );
                    token_at(kind, lexeme.into(), None, span.start..next.end)
                }
            },
        };
        tokens.push(token);
    }

    let end = source.len();
    tokens.push(token_at(TokenKind::Eof, Box::from(""), None, end..end));
    Ok(tokens)
}
