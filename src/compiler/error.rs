use core::fmt;

use crate::lexer::{Span, Token};

/// Stable identifiers for every kind of compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnexpectedEOF,
    ExpectedAssignmentOperator,
    InvalidType,
    UnexpectedToken,
    ExpectedExpression,
    ExpectedRightParen,
    ExpectedThen,
    ExpectedEndIf,
    ExpectedTimes,
    ExpectedEndLoop,
    UndefinedVariable,
    BlockIsTooLarge,
    BooleanExpressionNeeded,
    NumberExpressionNeeded,
    TooManyVariables,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnexpectedEOF => "UnexpectedEOF",
            Self::ExpectedAssignmentOperator => "ExpectedAssignmentOperator",
            Self::InvalidType => "InvalidType",
            Self::UnexpectedToken => "UnexpectedToken",
            Self::ExpectedExpression => "ExpectedExpression",
            Self::ExpectedRightParen => "ExpectedRightParen",
            Self::ExpectedThen => "ExpectedThen",
            Self::ExpectedEndIf => "ExpectedEndIf",
            Self::ExpectedTimes => "ExpectedTimes",
            Self::ExpectedEndLoop => "ExpectedEndLoop",
            Self::UndefinedVariable => "UndefinedVariable",
            Self::BlockIsTooLarge => "BlockIsTooLarge",
            Self::BooleanExpressionNeeded => "BooleanExpressionNeeded",
            Self::NumberExpressionNeeded => "NumberExpressionNeeded",
            Self::TooManyVariables => "TooManyVariables",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line} column {column}: [{code}] {message}")]
pub struct CompileError {
    pub code: ErrorCode,
    pub line: usize,
    pub column: usize,
    pub span: Span,
    pub message: String,
}

impl CompileError {
    /// An error located at `token`.
    pub fn new(code: ErrorCode, token: &Token, message: impl Into<String>) -> Self {
        Self {
            code,
            line: token.line,
            column: token.column,
            span: token.span.clone(),
            message: message.into(),
        }
    }
}
