//! Representation of runtime values and their static types
use core::fmt;

use arbitrary::Arbitrary;

pub type Integer = i64;

/// The only values a program can hold. Both variants are plain scalars, so
/// pushing, popping and storing always copies.
#[derive(Arbitrary, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Number(Integer),
    Boolean(bool),
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Self::Number(_) => Type::Number,
            Self::Boolean(_) => Type::Boolean,
        }
    }

    pub fn as_number(&self) -> Option<Integer> {
        match self {
            Self::Number(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(true) => write!(f, "YES"),
            Value::Boolean(false) => write!(f, "NO"),
        }
    }
}

/// The static type of an expression, tracked by the compiler for every
/// variable and every sub-expression it emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Number,
    Boolean,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number => write!(f, "number"),
            Type::Boolean => write!(f, "boolean"),
        }
    }
}
