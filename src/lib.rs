pub mod compiler;
pub mod lexer;
pub mod runtime;
pub mod value;

pub use compiler::{
    bytecode::Chunk,
    compile_tokens,
    error::{CompileError, ErrorCode},
};
pub use lexer::{scan, LexError};
pub use runtime::{run, Executor, FaultKind, Fuel, RuntimeFault};
pub use value::{Type, Value};

/// Everything that can stop a program from producing its output.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{} compile error(s)", .0.len())]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeFault),
}

impl From<Vec<CompileError>> for Error {
    fn from(errors: Vec<CompileError>) -> Self {
        Self::Compile(errors)
    }
}

/// Scan and compile `source`.
pub fn compile(source: &str) -> Result<Chunk, Error> {
    let tokens = scan(source)?;
    Ok(compile_tokens(&tokens)?)
}

/// Scan, compile and run `source`, giving the final value of `OUTPUT`.
pub fn run_source(source: &str) -> Result<Value, Error> {
    let chunk = compile(source)?;
    Ok(run(&chunk)?)
}
