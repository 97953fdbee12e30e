//! Binding powers and the parse rule table driving expression compilation.
use super::{error::CompileError, Compiler};
use crate::{
    lexer::{Token, TokenKind},
    value::Type,
};

/// Operator binding power, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    None,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Primary,
}

impl Precedence {
    /// The level just above this one, used for the right operand of a
    /// left-associative operator.
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary | Self::Primary => Self::Primary,
        }
    }
}

pub type PrefixFn<'t> = fn(&mut Compiler<'t>, &'t Token) -> Result<Type, CompileError>;
pub type InfixFn<'t> = fn(&mut Compiler<'t>, &'t Token, Type) -> Result<Type, CompileError>;

pub struct ParseRule<'t> {
    pub prefix: Option<PrefixFn<'t>>,
    pub infix: Option<InfixFn<'t>>,
    pub precedence: Precedence,
}

impl<'t> ParseRule<'t> {
    fn prefix(prefix: PrefixFn<'t>) -> Self {
        Self {
            prefix: Some(prefix),
            infix: None,
            precedence: Precedence::None,
        }
    }

    fn infix(infix: InfixFn<'t>, precedence: Precedence) -> Self {
        Self {
            prefix: None,
            infix: Some(infix),
            precedence,
        }
    }
}

pub fn rule<'t>(kind: TokenKind) -> ParseRule<'t> {
    use TokenKind as K;
    match kind {
        K::LeftParen => ParseRule::prefix(Compiler::grouping),
        K::Not => ParseRule::prefix(Compiler::unary),
        K::Constant => ParseRule::prefix(Compiler::constant),
        // labels are rejected by `variable`
        K::Identifier | K::Output | K::Label => ParseRule::prefix(Compiler::variable),

        K::Or => ParseRule::infix(Compiler::or, Precedence::Or),
        K::And => ParseRule::infix(Compiler::and, Precedence::And),
        K::Equal => ParseRule::infix(Compiler::binary, Precedence::Equality),
        K::Less | K::LessEqual | K::Greater | K::GreaterEqual => {
            ParseRule::infix(Compiler::binary, Precedence::Comparison)
        }
        K::Plus => ParseRule::infix(Compiler::binary, Precedence::Term),
        K::Star => ParseRule::infix(Compiler::binary, Precedence::Factor),

        _ => ParseRule {
            prefix: None,
            infix: None,
            precedence: Precedence::None,
        },
    }
}
