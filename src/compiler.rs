//! Compile a token stream straight into bytecode, in one pass.
//!
//! Statements are handled by recursive descent, expressions by precedence
//! climbing. No tree is built: every construct emits its instructions as soon
//! as it is recognised, and forward jumps are patched once their target is
//! known.
//!
//! For example:
//!
//! N <- 1
//! IF N < 2 THEN
//!     N <- N + 1
//! END IF
//! OUTPUT <- N
//!
//! compiles to
//!
//! PUSH 1
//! STORE 1
//! POP
//! LOAD 1
//! PUSH 2
//! LESS
//! JUMP_IF_FALSE +20 ; peeks the condition
//! POP
//! LOAD 1
//! PUSH 1
//! ADD
//! STORE 1
//! POP
//! JUMP +1
//! POP
//! LOAD 1
//! STORE 0
//! POP
//!
//! where slot 0 always holds `OUTPUT`.

pub mod bytecode;
pub mod error;
pub mod precedence;
pub mod variables;

use log::debug;

use self::{
    bytecode::{Chunk, JumpLabel, OpCode},
    error::{CompileError, ErrorCode},
    precedence::{rule, Precedence},
    variables::VariableTable,
};
use crate::{
    lexer::{Token, TokenKind},
    value::{Type, Value},
};

/// Slot of the implicit result variable.
pub const OUTPUT_SLOT: u8 = 0;
const OUTPUT: &str = "OUTPUT";

/// Jumps out of the loop being compiled.
#[derive(Debug, Default)]
struct LoopContext {
    aborts: Vec<JumpLabel>,
}

pub struct Compiler<'t> {
    /// Always ends with an [`TokenKind::Eof`] token
    tokens: &'t [Token],
    current: usize,
    chunk: Chunk,
    variables: VariableTable,
    loops: Vec<LoopContext>,
    /// IF and LOOP statements entered but not yet closed
    depth: usize,
    errors: Vec<CompileError>,
}

/// Compile a token sequence as produced by [`crate::lexer::scan`].
///
/// A chunk is only returned if no error at all was found.
pub fn compile_tokens(tokens: &[Token]) -> Result<Chunk, Vec<CompileError>> {
    if tokens.last().is_some_and(|t| t.kind == TokenKind::Eof) {
        return Compiler::new(tokens).compile();
    }

    let (span, line, column) = match tokens.last() {
        Some(last) => (
            last.span.end..last.span.end,
            last.line,
            last.column + last.lexeme.chars().count(),
        ),
        None => (0..0, 1, 1),
    };
    let mut terminated = tokens.to_vec();
    terminated.push(Token {
        kind: TokenKind::Eof,
        lexeme: Box::from(""),
        literal: None,
        span,
        line,
        column,
    });
    Compiler::new(&terminated).compile()
}

fn variable_name(token: &Token) -> Option<&str> {
    match token.kind {
        TokenKind::Output => Some(OUTPUT),
        _ => token.name(),
    }
}

impl<'t> Compiler<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        let mut chunk = Chunk::new();
        let mut variables = VariableTable::new();
        let output = chunk.allocate_slot();
        debug_assert_eq!(output, Some(OUTPUT_SLOT));
        variables.declare(OUTPUT, OUTPUT_SLOT);

        Self {
            tokens,
            current: 0,
            chunk,
            variables,
            loops: vec![],
            depth: 0,
            errors: vec![],
        }
    }

    pub fn compile(mut self) -> Result<Chunk, Vec<CompileError>> {
        debug!("compiling {} tokens", self.tokens.len());
        while !self.check(TokenKind::Eof) {
            if let Err(error) = self.statement() {
                self.record(error);
                self.synchronize(0);
                self.loops.clear();
            }
        }

        if self.errors.is_empty() {
            debug!(
                "compiled {} bytes using {} slots",
                self.chunk.len(),
                self.chunk.slot_count()
            );
            Ok(self.chunk)
        } else {
            debug!("compilation failed with {} errors", self.errors.len());
            Err(self.errors)
        }
    }

    fn peek(&self) -> &'t Token {
        let tokens: &'t [Token] = self.tokens;
        &tokens[self.current]
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        let matched = self.check(kind);
        if matched {
            self.advance();
        }
        matched
    }

    fn consume(
        &mut self,
        kind: TokenKind,
        code: ErrorCode,
        message: &str,
    ) -> Result<&'t Token, CompileError> {
        let token = self.peek();
        if token.kind == kind {
            return Ok(self.advance());
        }
        Err(match token.kind {
            TokenKind::Eof => CompileError::new(
                ErrorCode::UnexpectedEOF,
                token,
                format!("{message}, found end of input"),
            ),
            _ => CompileError::new(code, token, format!("{message}, found '{token}'")),
        })
    }

    fn record(&mut self, error: CompileError) {
        // there is only one end of input to complain about
        let repeated_eof = error.code == ErrorCode::UnexpectedEOF
            && self.errors.iter().any(|e| e.code == ErrorCode::UnexpectedEOF);
        if !repeated_eof {
            debug!("compile error: {error}");
            self.errors.push(error);
        }
    }

    /// Skip the rest of a failed statement, so that compilation can resume in
    /// the block whose statements are nested `base` levels deep.
    ///
    /// Statements left open by the failure are skipped up to and including
    /// their closers. Once back at `base`, skipping stops after an ABORT LOOP,
    /// or in front of a closer of the enclosing block. At the top level there
    /// is no enclosing block, so that closer is skipped too.
    fn synchronize(&mut self, base: usize) {
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::If | TokenKind::Loop => self.depth += 1,
                TokenKind::Else if self.depth > base => {
                    // ELSE IF continues the open statement
                    self.advance();
                    self.matches(TokenKind::If);
                    continue;
                }
                TokenKind::EndIf | TokenKind::EndLoop if self.depth > base => {
                    self.advance();
                    self.depth -= 1;
                    if self.depth == base {
                        break;
                    }
                    continue;
                }
                kind if kind.closes_block() && base > 0 => break,
                kind if kind.closes_block() => {
                    self.advance();
                    break;
                }
                TokenKind::AbortLoop if self.depth == base => {
                    self.advance();
                    break;
                }
                _ => {}
            }
            self.advance();
        }
        self.depth = base;
    }

    fn patch(&mut self, label: JumpLabel, token: &Token) -> Result<(), CompileError> {
        self.chunk.patch_jump(label).map_err(|err| {
            CompileError::new(
                ErrorCode::BlockIsTooLarge,
                token,
                format!("block is too large to jump over ({err})"),
            )
        })
    }

    fn allocate_slot(&mut self, token: &Token) -> Result<u8, CompileError> {
        self.chunk.allocate_slot().ok_or_else(|| {
            CompileError::new(
                ErrorCode::TooManyVariables,
                token,
                format!("more than {} variables in one program", Chunk::MAX_SLOTS),
            )
        })
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let token = self.peek();
        match token.kind {
            TokenKind::Identifier | TokenKind::Output => {
                self.advance();
                self.assignment(token)
            }
            TokenKind::If => {
                self.advance();
                self.if_statement(token)
            }
            TokenKind::Loop => {
                self.advance();
                self.loop_statement(token)
            }
            TokenKind::AbortLoop if !self.loops.is_empty() => {
                self.advance();
                self.abort_loop(token);
                Ok(())
            }
            TokenKind::AbortLoop => Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token,
                "ABORT LOOP outside of a loop",
            )),
            TokenKind::Label => Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token,
                format!("procedure label {token} cannot be assigned to"),
            )),
            TokenKind::Eof => Err(CompileError::new(
                ErrorCode::UnexpectedEOF,
                token,
                "expected a statement, found end of input",
            )),
            _ => Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token,
                format!("expected a statement, found '{token}'"),
            )),
        }
    }

    /// Compile statements up to, but not including, a block closing keyword.
    ///
    /// A failed statement is recorded and skipped, and the block carries on
    /// with the next one.
    fn block(&mut self) -> Result<(), CompileError> {
        let base = self.depth;
        let loops = self.loops.len();
        loop {
            let token = self.peek();
            if token.kind.closes_block() {
                return Ok(());
            }
            if token.kind == TokenKind::Eof {
                return Err(CompileError::new(
                    ErrorCode::UnexpectedEOF,
                    token,
                    "block is never closed",
                ));
            }
            if let Err(error) = self.statement() {
                self.record(error);
                self.synchronize(base);
                self.loops.truncate(loops);
            }
        }
    }

    fn assignment(&mut self, target: &'t Token) -> Result<(), CompileError> {
        let Some(name) = variable_name(target) else {
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                target,
                format!("'{target}' cannot be assigned to"),
            ));
        };
        self.consume(
            TokenKind::LeftArrow,
            ErrorCode::ExpectedAssignmentOperator,
            &format!("expected '<-' after '{name}'"),
        )?;

        let existing = self.variables.get(name).map(|variable| variable.slot());
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = self.allocate_slot(target)?;
                self.variables.declare(name, slot).slot()
            }
        };

        let ty = self.expression()?;
        self.variables.assign(name, ty).map_err(|conflict| {
            CompileError::new(
                ErrorCode::InvalidType,
                target,
                format!("{conflict} for '{name}'"),
            )
        })?;
        self.chunk.emit_slot(OpCode::Store, slot, target.line);
        self.chunk.write_op(OpCode::Pop, target.line);
        Ok(())
    }

    fn condition(&mut self, keyword: &Token) -> Result<(), CompileError> {
        let start = self.peek();
        let ty = self.expression()?;
        if ty != Type::Boolean {
            return Err(CompileError::new(
                ErrorCode::BooleanExpressionNeeded,
                start,
                format!("condition of {keyword} must be boolean, found '{ty}'"),
            ));
        }
        self.consume(
            TokenKind::Then,
            ErrorCode::ExpectedThen,
            "expected THEN after condition",
        )?;
        Ok(())
    }

    fn if_statement(&mut self, keyword: &'t Token) -> Result<(), CompileError> {
        self.depth += 1;
        let mut exits = vec![];
        let mut branch = keyword;
        loop {
            self.condition(branch)?;
            let skip = self.chunk.emit_jump(OpCode::JumpIfFalse, branch.line);
            self.chunk.write_op(OpCode::Pop, branch.line);
            self.block()?;
            exits.push(self.chunk.emit_jump(OpCode::Jump, branch.line));
            self.patch(skip, branch)?;
            self.chunk.write_op(OpCode::Pop, branch.line);

            if !self.matches(TokenKind::Else) {
                break;
            }
            let next = self.peek();
            if self.matches(TokenKind::If) {
                branch = next;
                continue;
            }
            self.block()?;
            break;
        }
        self.consume(
            TokenKind::EndIf,
            ErrorCode::ExpectedEndIf,
            "expected END IF to close IF",
        )?;
        self.depth -= 1;

        for exit in exits {
            self.patch(exit, keyword)?;
        }
        Ok(())
    }

    /// `LOOP n TIMES` evaluates `n` once and runs the body that many times,
    /// counting in two hidden slots.
    fn loop_statement(&mut self, keyword: &'t Token) -> Result<(), CompileError> {
        self.depth += 1;
        let line = keyword.line;
        let start = self.peek();
        let ty = self.expression()?;
        if ty != Type::Number {
            return Err(CompileError::new(
                ErrorCode::NumberExpressionNeeded,
                start,
                format!("iteration count of LOOP must be a number, found '{ty}'"),
            ));
        }
        self.consume(
            TokenKind::Times,
            ErrorCode::ExpectedTimes,
            "expected TIMES after iteration count",
        )?;

        let bound = self.allocate_slot(keyword)?;
        let counter = self.allocate_slot(keyword)?;
        self.chunk.emit_slot(OpCode::Store, bound, line);
        self.chunk.write_op(OpCode::Pop, line);
        self.chunk.emit_push(Value::Number(0), line);
        self.chunk.emit_slot(OpCode::Store, counter, line);
        self.chunk.write_op(OpCode::Pop, line);

        let reentry = self.chunk.current_offset();
        self.chunk.emit_slot(OpCode::Load, counter, line);
        self.chunk.emit_slot(OpCode::Load, bound, line);
        self.chunk.write_op(OpCode::Less, line);
        let exit = self.chunk.emit_jump(OpCode::JumpIfFalse, line);
        self.chunk.write_op(OpCode::Pop, line);

        self.loops.push(LoopContext::default());
        self.block()?;
        let end = self.consume(
            TokenKind::EndLoop,
            ErrorCode::ExpectedEndLoop,
            "expected END LOOP to close LOOP",
        )?;
        self.depth -= 1;
        let line = end.line;

        self.chunk.emit_slot(OpCode::Load, counter, line);
        self.chunk.emit_push(Value::Number(1), line);
        self.chunk.write_op(OpCode::Add, line);
        self.chunk.emit_slot(OpCode::Store, counter, line);
        self.chunk.write_op(OpCode::Pop, line);
        self.chunk
            .emit_jump_to(OpCode::Jump, reentry, line)
            .map_err(|err| {
                CompileError::new(
                    ErrorCode::BlockIsTooLarge,
                    keyword,
                    format!("loop body is too large to jump back over ({err})"),
                )
            })?;
        self.patch(exit, keyword)?;
        self.chunk.write_op(OpCode::Pop, line);

        let context = self.loops.pop().unwrap_or_default();
        for abort in context.aborts {
            self.patch(abort, keyword)?;
        }
        Ok(())
    }

    fn abort_loop(&mut self, token: &Token) {
        let label = self.chunk.emit_jump(OpCode::Jump, token.line);
        if let Some(context) = self.loops.last_mut() {
            context.aborts.push(label);
        }
    }

    fn expression(&mut self) -> Result<Type, CompileError> {
        self.parse_precedence(Precedence::Or)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<Type, CompileError> {
        let token = self.peek();
        let Some(prefix) = rule(token.kind).prefix else {
            return Err(match token.kind {
                TokenKind::Eof => CompileError::new(
                    ErrorCode::UnexpectedEOF,
                    token,
                    "expected an expression, found end of input",
                ),
                _ => CompileError::new(
                    ErrorCode::ExpectedExpression,
                    token,
                    format!("expected an expression, found '{token}'"),
                ),
            });
        };
        self.advance();
        let mut ty = prefix(self, token)?;

        loop {
            let operator = self.peek();
            let next = rule(operator.kind);
            let Some(infix) = next.infix.filter(|_| precedence <= next.precedence) else {
                break;
            };
            self.advance();
            ty = infix(self, operator, ty)?;
        }
        Ok(ty)
    }

    fn constant(&mut self, token: &'t Token) -> Result<Type, CompileError> {
        let Some(value) = token.value() else {
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token,
                format!("'{token}' carries no value"),
            ));
        };
        self.chunk.emit_push(value, token.line);
        Ok(value.ty())
    }

    fn variable(&mut self, token: &'t Token) -> Result<Type, CompileError> {
        let Some(name) = variable_name(token) else {
            return Err(CompileError::new(
                ErrorCode::UnexpectedToken,
                token,
                format!("'{token}' is not a variable"),
            ));
        };
        let found = self
            .variables
            .get(name)
            .and_then(|variable| Some((variable.slot(), variable.ty()?)));
        let Some((slot, ty)) = found else {
            return Err(CompileError::new(
                ErrorCode::UndefinedVariable,
                token,
                format!("undefined variable '{name}', assign it first with '{name} <- ...'"),
            ));
        };
        self.chunk.emit_slot(OpCode::Load, slot, token.line);
        Ok(ty)
    }

    fn grouping(&mut self, _: &'t Token) -> Result<Type, CompileError> {
        let ty = self.expression()?;
        self.consume(
            TokenKind::RightParen,
            ErrorCode::ExpectedRightParen,
            "expected ')' after expression",
        )?;
        Ok(ty)
    }

    fn unary(&mut self, operator: &'t Token) -> Result<Type, CompileError> {
        let ty = self.parse_precedence(Precedence::Unary)?;
        if ty != Type::Boolean {
            return Err(CompileError::new(
                ErrorCode::InvalidType,
                operator,
                format!("'{operator}' expects a boolean operand, found '{ty}'"),
            ));
        }
        self.chunk.write_op(OpCode::Not, operator.line);
        Ok(Type::Boolean)
    }

    fn binary(&mut self, operator: &'t Token, left: Type) -> Result<Type, CompileError> {
        let right = self.parse_precedence(rule(operator.kind).precedence.next())?;

        if operator.kind == TokenKind::Equal {
            if left != right {
                return Err(CompileError::new(
                    ErrorCode::InvalidType,
                    operator,
                    format!("cannot compare '{left}' with '{right}'"),
                ));
            }
            self.chunk.write_op(OpCode::Equal, operator.line);
            return Ok(Type::Boolean);
        }

        if (left, right) != (Type::Number, Type::Number) {
            return Err(CompileError::new(
                ErrorCode::InvalidType,
                operator,
                format!("'{operator}' expects number operands, found '{left}' and '{right}'"),
            ));
        }
        let (ops, ty) = match operator.kind {
            TokenKind::Plus => (&[OpCode::Add][..], Type::Number),
            TokenKind::Star => (&[OpCode::Multiply][..], Type::Number),
            TokenKind::Less => (&[OpCode::Less][..], Type::Boolean),
            TokenKind::Greater => (&[OpCode::Greater][..], Type::Boolean),
            TokenKind::LessEqual => (&[OpCode::Greater, OpCode::Not][..], Type::Boolean),
            TokenKind::GreaterEqual => (&[OpCode::Less, OpCode::Not][..], Type::Boolean),
            _ => {
                return Err(CompileError::new(
                    ErrorCode::UnexpectedToken,
                    operator,
                    format!("'{operator}' is not a binary operator"),
                ))
            }
        };
        for &op in ops {
            self.chunk.write_op(op, operator.line);
        }
        Ok(ty)
    }

    fn logical_operand(&mut self, operator: &'t Token, left: Type) -> Result<(), CompileError> {
        let right = self.parse_precedence(rule(operator.kind).precedence.next())?;
        if (left, right) != (Type::Boolean, Type::Boolean) {
            return Err(CompileError::new(
                ErrorCode::InvalidType,
                operator,
                format!("'{operator}' expects boolean operands, found '{left}' and '{right}'"),
            ));
        }
        Ok(())
    }

    /// Leaves the left operand if it is `NO`, otherwise replaces it with the
    /// right one.
    fn and(&mut self, operator: &'t Token, left: Type) -> Result<Type, CompileError> {
        let end = self.chunk.emit_jump(OpCode::JumpIfFalse, operator.line);
        self.chunk.write_op(OpCode::Pop, operator.line);
        self.logical_operand(operator, left)?;
        self.patch(end, operator)?;
        Ok(Type::Boolean)
    }

    /// Leaves the left operand if it is `YES`, otherwise replaces it with the
    /// right one.
    fn or(&mut self, operator: &'t Token, left: Type) -> Result<Type, CompileError> {
        let otherwise = self.chunk.emit_jump(OpCode::JumpIfFalse, operator.line);
        let end = self.chunk.emit_jump(OpCode::Jump, operator.line);
        self.patch(otherwise, operator)?;
        self.chunk.write_op(OpCode::Pop, operator.line);
        self.logical_operand(operator, left)?;
        self.patch(end, operator)?;
        Ok(Type::Boolean)
    }
}

#[cfg(test)]
mod tests {
    use super::{bytecode::Instruction, compile_tokens, error::ErrorCode, OUTPUT_SLOT};
    use crate::{
        compiler::bytecode::{Chunk, OpCode},
        lexer::scan,
        value::Value,
    };

    use arbtest::arbtest;
    use assert2::{check, let_assert};

    fn compile(source: &str) -> Result<Chunk, Vec<super::CompileError>> {
        let_assert!(Ok(tokens) = scan(source));
        compile_tokens(&tokens)
    }

    fn codes(source: &str) -> Vec<ErrorCode> {
        match compile(source) {
            Ok(_) => vec![],
            Err(errors) => errors.into_iter().map(|e| e.code).collect(),
        }
    }

    fn instructions(chunk: &Chunk) -> Vec<Instruction> {
        chunk
            .instructions()
            .map(|(_, decoded)| {
                let_assert!(Ok(instruction) = decoded);
                instruction
            })
            .collect()
    }

    #[test]
    fn conditional_increment() {
        use Instruction::*;
        let_assert!(Ok(chunk) = compile("N <- 1\nIF N < 2 THEN\n    N <- N + 1\nEND IF\nOUTPUT <- N"));
        check!(
            instructions(&chunk)
                == [
                    Push(Value::Number(1)),
                    Store(1),
                    Pop,
                    Load(1),
                    Push(Value::Number(2)),
                    Less,
                    JumpIfFalse(20),
                    Pop,
                    Load(1),
                    Push(Value::Number(1)),
                    Add,
                    Store(1),
                    Pop,
                    Jump(1),
                    Pop,
                    Load(1),
                    Store(OUTPUT_SLOT),
                    Pop,
                ]
        );
        check!(chunk.slot_count() == 2);
        check!(chunk.line_at(0) == Some(1));
        check!(chunk.line_at(30) == Some(3));
    }

    #[test]
    fn comparisons_desugar() {
        let_assert!(Ok(chunk) = compile("OUTPUT <- 1 <= 2"));
        check!(
            chunk.opcodes()
                == [
                    OpCode::Push,
                    OpCode::Push,
                    OpCode::Greater,
                    OpCode::Not,
                    OpCode::Store,
                    OpCode::Pop
                ]
        );
        let_assert!(Ok(chunk) = compile("OUTPUT <- 1 >= 2"));
        check!(chunk.opcodes()[2..4] == [OpCode::Less, OpCode::Not]);
    }

    #[test]
    fn precedence_climbing() {
        use Instruction::*;
        let_assert!(Ok(chunk) = compile("OUTPUT <- 1 + 2 * (3 + 4)"));
        check!(
            instructions(&chunk)
                == [
                    Push(Value::Number(1)),
                    Push(Value::Number(2)),
                    Push(Value::Number(3)),
                    Push(Value::Number(4)),
                    Add,
                    Multiply,
                    Add,
                    Store(0),
                    Pop,
                ]
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        use Instruction::*;
        let_assert!(Ok(chunk) = compile("B <- YES and NO"));
        check!(
            instructions(&chunk)
                == [
                    Push(Value::Boolean(true)),
                    JumpIfFalse(11),
                    Pop,
                    Push(Value::Boolean(false)),
                    Store(1),
                    Pop,
                ]
        );

        let_assert!(Ok(chunk) = compile("B <- NO or YES"));
        check!(
            instructions(&chunk)
                == [
                    Push(Value::Boolean(false)),
                    JumpIfFalse(3),
                    Jump(11),
                    Pop,
                    Push(Value::Boolean(true)),
                    Store(1),
                    Pop,
                ]
        );

        // `and` binds tighter than `or`
        let_assert!(Ok(chunk) = compile("B <- NO or YES and not NO = YES"));
        check!(chunk.opcodes().iter().filter(|&&op| op == OpCode::Jump).count() == 1);
    }

    #[test]
    fn loop_uses_hidden_slots() {
        let_assert!(Ok(chunk) = compile("OUTPUT <- 0\nLOOP 3 TIMES\n    OUTPUT <- OUTPUT + 2\nEND LOOP"));
        // OUTPUT, then the bound and the counter
        check!(chunk.slot_count() == 3);
        let jumps = chunk
            .instructions()
            .filter_map(|(offset, decoded)| match decoded {
                Ok(Instruction::Jump(offset_by)) => Some(offset as isize + 3 + offset_by as isize),
                _ => None,
            })
            .collect::<Vec<_>>();
        // the back-edge returns to the counter comparison right after the
        // bound and counter are initialised
        let_assert!([target] = jumps.as_slice());
        check!(chunk.decode(*target as usize) == Ok(Instruction::Load(2)));
    }

    #[test]
    fn aborts_jump_past_the_loop() {
        let_assert!(Ok(chunk) = compile("LOOP 5 TIMES\n    OUTPUT <- 1\n    ABORT LOOP\nEND LOOP\nOUTPUT <- 2"));
        let end = chunk.len() as isize;
        let targets = chunk
            .instructions()
            .filter_map(|(offset, decoded)| match decoded {
                Ok(Instruction::Jump(by)) if by > 0 => Some(offset as isize + 3 + by as isize),
                _ => None,
            })
            .collect::<Vec<_>>();
        // `OUTPUT <- 2` is the last 13 bytes
        check!(targets == [end - 13]);
    }

    #[test]
    fn scenario_invalid_type() {
        check!(codes("OUTPUT <- YES\nOUTPUT <- 1") == [ErrorCode::InvalidType]);
        let_assert!(Err(errors) = compile("OUTPUT <- YES\nOUTPUT <- 1"));
        check!(errors[0].line == 2);
        check!(
            errors[0].message == "cannot assign 'number' value to variable of type 'boolean' for 'OUTPUT'"
        );
    }

    #[test]
    fn scenario_undefined_variable() {
        check!(codes("OUTPUT <- N") == [ErrorCode::UndefinedVariable]);
        let_assert!(Err(errors) = compile("OUTPUT <- N"));
        check!(errors[0].message == "undefined variable 'N', assign it first with 'N <- ...'");
        check!(errors[0].column == 11);
    }

    #[test]
    fn self_reference_is_undefined() {
        check!(codes("N <- N + 1") == [ErrorCode::UndefinedVariable]);
        check!(codes("OUTPUT <- OUTPUT") == [ErrorCode::UndefinedVariable]);
        check!(codes("N <- 1\nN <- N + 1").is_empty());
    }

    #[test]
    fn names_are_case_sensitive() {
        check!(codes("count <- 1\nOUTPUT <- Count") == [ErrorCode::UndefinedVariable]);
        check!(codes("count <- 1\noutput <- count").is_empty());
    }

    #[test]
    fn operand_types() {
        check!(codes("OUTPUT <- 1 + YES") == [ErrorCode::InvalidType]);
        check!(codes("OUTPUT <- YES = 1") == [ErrorCode::InvalidType]);
        check!(codes("OUTPUT <- not 1") == [ErrorCode::InvalidType]);
        check!(codes("OUTPUT <- 1 and YES") == [ErrorCode::InvalidType]);
        check!(codes("OUTPUT <- 1 < 2 < 3") == [ErrorCode::InvalidType]);
        check!(codes("OUTPUT <- YES = NO").is_empty());
        check!(codes("OUTPUT <- (1 = 1) = not NO").is_empty());
    }

    #[test]
    fn guard_types() {
        check!(codes("IF 1 THEN OUTPUT <- 1 END IF") == [ErrorCode::BooleanExpressionNeeded]);
        check!(
            codes("IF YES THEN OUTPUT <- 1 ELSE IF 2 THEN OUTPUT <- 2 END IF")
                == [ErrorCode::BooleanExpressionNeeded]
        );
        check!(codes("LOOP YES TIMES OUTPUT <- 1 END LOOP") == [ErrorCode::NumberExpressionNeeded]);
    }

    #[test]
    fn missing_pieces() {
        check!(codes("N 1") == [ErrorCode::ExpectedAssignmentOperator]);
        check!(codes("OUTPUT <- THEN") == [ErrorCode::ExpectedExpression]);
        check!(codes("OUTPUT <- (1 + 2\nN <- 1") == [ErrorCode::ExpectedRightParen]);
        check!(codes("IF YES OUTPUT <- 1 END IF") == [ErrorCode::ExpectedThen]);
        check!(codes("IF YES THEN OUTPUT <- 1 END LOOP") == [ErrorCode::ExpectedEndIf]);
        check!(codes("LOOP 3 OUTPUT <- 1 END LOOP") == [ErrorCode::ExpectedTimes]);
        check!(codes("LOOP 3 TIMES OUTPUT <- 1 END IF") == [ErrorCode::ExpectedEndLoop]);
    }

    #[test]
    fn unexpected_end_of_input() {
        check!(codes("OUTPUT <-") == [ErrorCode::UnexpectedEOF]);
        check!(codes("OUTPUT") == [ErrorCode::UnexpectedEOF]);
        check!(codes("IF YES THEN OUTPUT <- 1") == [ErrorCode::UnexpectedEOF]);
        check!(codes("LOOP 2 TIMES") == [ErrorCode::UnexpectedEOF]);
        check!(codes("OUTPUT <- (1") == [ErrorCode::UnexpectedEOF]);
    }

    #[test]
    fn unsupported_statements() {
        check!(
            codes("DEFINE PROCEDURE \"F\" [A]\nEND PROCEDURE\nOUTPUT <- 1")
                == [ErrorCode::UnexpectedToken]
        );
        check!(codes("ABORT LOOP\nOUTPUT <- 1") == [ErrorCode::UnexpectedToken]);
        check!(codes("END IF") == [ErrorCode::UnexpectedToken]);
        check!(codes("1 <- 2") == [ErrorCode::UnexpectedToken]);
    }

    #[test]
    fn recovers_after_errors() {
        let_assert!(Err(errors) = compile("N <- 1\nIF N THEN OUTPUT <- 1 END IF\nOUTPUT <- M"));
        let found = errors.iter().map(|e| (e.code, e.line)).collect::<Vec<_>>();
        check!(
            found
                == [
                    (ErrorCode::BooleanExpressionNeeded, 2),
                    (ErrorCode::UndefinedVariable, 3)
                ]
        );

        // the loop itself still closes, so the ABORT LOOP after it is outside
        check!(
            codes("LOOP 2 TIMES\nOUTPUT <- YES + 1\nEND LOOP\nABORT LOOP")
                == [ErrorCode::InvalidType, ErrorCode::UnexpectedToken]
        );
    }

    #[test]
    fn recovery_stays_inside_the_enclosing_block() {
        let_assert!(
            Err(errors) =
                compile("LOOP 2 TIMES\n IF 1 THEN X <- 1 END IF\n Y <- 2\nEND LOOP\nOUTPUT <- 1")
        );
        let found = errors.iter().map(|e| (e.code, e.line)).collect::<Vec<_>>();
        check!(found == [(ErrorCode::BooleanExpressionNeeded, 2)]);

        let_assert!(
            Err(errors) = compile(
                "LOOP 2 TIMES\n X <- YES + 1\n ABORT LOOP\n Y <- 2\nEND LOOP\nOUTPUT <- 1"
            )
        );
        let found = errors.iter().map(|e| (e.code, e.line)).collect::<Vec<_>>();
        check!(found == [(ErrorCode::InvalidType, 2)]);

        // ABORT LOOP still belongs to the outer loop after a failed inner one
        check!(
            codes("LOOP 2 TIMES\n LOOP YES TIMES\n  ABORT LOOP\n END LOOP\n ABORT LOOP\nEND LOOP")
                == [ErrorCode::NumberExpressionNeeded]
        );

        // independent errors in sibling statements are all reported
        check!(
            codes("IF YES THEN\n A <- 1 + NO\nELSE\n B <- C\nEND IF\nOUTPUT <- D")
                == [
                    ErrorCode::InvalidType,
                    ErrorCode::UndefinedVariable,
                    ErrorCode::UndefinedVariable
                ]
        );
        check!(codes("IF YES THEN\n IF YES THEN\n  OUTPUT <- 1") == [ErrorCode::UnexpectedEOF]);
    }

    #[test]
    fn else_followed_by_if_continues_the_chain() {
        // with nothing in between, ELSE IF is another branch of the same IF
        check!(
            codes("IF NO THEN\nOUTPUT <- 1\nELSE\nIF YES THEN\nOUTPUT <- 2\nEND IF\nEND IF")
                == [ErrorCode::UnexpectedToken]
        );
        let_assert!(
            Ok(_) = compile("IF NO THEN\nOUTPUT <- 1\nELSE\nIF YES THEN\nOUTPUT <- 2\nEND IF")
        );

        // an IF nested in an ELSE needs a statement before it
        let_assert!(
            Ok(chunk) = compile(
                "IF NO THEN\nOUTPUT <- 1\nELSE\nOUTPUT <- 2\nIF YES THEN\nOUTPUT <- 3\nEND IF\nEND IF"
            )
        );
        check!(chunk.opcodes().iter().filter(|&&op| op == OpCode::JumpIfFalse).count() == 2);
    }

    #[test]
    fn labels_are_not_variables() {
        check!(codes("\"OUTPUT\" <- 5") == [ErrorCode::UnexpectedToken]);
        check!(codes("\"\" <- 1\nOUTPUT <- 1") == [ErrorCode::UnexpectedToken]);
        check!(codes("OUTPUT <- 1\nOUTPUT <- \"OUTPUT\"") == [ErrorCode::UnexpectedToken]);
        check!(codes("N <- 1\nOUTPUT <- N + \"N\"") == [ErrorCode::UnexpectedToken]);
    }

    #[test]
    fn else_if_chain() {
        let source = "N <- 3\nIF N = 1 THEN\n  OUTPUT <- 10\nELSE IF N = 2 THEN\n  OUTPUT <- 20\nELSE\n  OUTPUT <- 30\nEND IF";
        let_assert!(Ok(chunk) = compile(source));
        let ops = chunk.opcodes();
        check!(ops.iter().filter(|&&op| op == OpCode::JumpIfFalse).count() == 2);
        check!(ops.iter().filter(|&&op| op == OpCode::Jump).count() == 2);

        // every forward jump lands inside the chunk, on an instruction boundary
        let boundaries = chunk.instructions().map(|(offset, _)| offset).collect::<Vec<_>>();
        for (offset, decoded) in chunk.instructions() {
            if let Ok(Instruction::Jump(by) | Instruction::JumpIfFalse(by)) = decoded {
                let target = (offset as isize + 3 + by as isize) as usize;
                check!(target <= chunk.len());
                check!(target == chunk.len() || boundaries.contains(&target));
            }
        }
    }

    #[test]
    fn block_is_too_large() {
        let body = "X <- 1\n".repeat(2600);
        let source = format!("IF YES THEN\n{body}END IF\nOUTPUT <- 1");
        check!(codes(&source) == [ErrorCode::BlockIsTooLarge]);

        let source = format!("LOOP 1 TIMES\n{body}END LOOP");
        check!(codes(&source) == [ErrorCode::BlockIsTooLarge]);

        let body = "X <- 1\n".repeat(2400);
        let source = format!("IF YES THEN\n{body}END IF");
        check!(codes(&source).is_empty());
    }

    #[test]
    fn too_many_variables() {
        let source = (0..255).map(|i| format!("V{i} <- {i}\n")).collect::<String>();
        check!(codes(&source).is_empty());
        check!(codes(&format!("{source}W <- 1")) == [ErrorCode::TooManyVariables]);
        check!(codes(&format!("{source}LOOP 1 TIMES END LOOP")) == [ErrorCode::TooManyVariables]);
    }

    #[test]
    fn unterminated_tokens() {
        let_assert!(Ok(mut tokens) = scan("OUTPUT <- 1"));
        tokens.pop();
        let_assert!(Ok(chunk) = compile_tokens(&tokens));
        check!(chunk.opcodes() == [OpCode::Push, OpCode::Store, OpCode::Pop]);

        tokens.pop();
        let_assert!(Err(errors) = compile_tokens(&tokens));
        check!(errors[0].code == ErrorCode::UnexpectedEOF);
        check!(errors[0].column == 10);

        let_assert!(Ok(chunk) = compile_tokens(&[]));
        check!(chunk.is_empty());
    }

    #[test]
    fn consistent_types_compile() {
        arbtest(|u| {
            let names = ["A", "B", "C", "D"];
            let mut source = String::new();
            let types = names
                .iter()
                .map(|_| u.arbitrary::<bool>())
                .collect::<Result<Vec<_>, _>>()?;
            for _ in 0..u.int_in_range(1..=12)? {
                let index = u.choose_index(names.len())?;
                let value = match types[index] {
                    true => Value::Boolean(u.arbitrary()?),
                    false => Value::Number(u.int_in_range(0..=1000)?),
                };
                source += &format!("{} <- {value}\n", names[index]);
            }
            let_assert!(Ok(_) = compile(&source), "{source}");
            Ok(())
        });
    }

    #[test]
    fn conflicting_types_fail() {
        arbtest(|u| {
            let name = ["N", "flag", "x_1", "ok?"][u.choose_index(4)?];
            let first = Value::Number(u.int_in_range(0..=99)?);
            let second = Value::Boolean(u.arbitrary()?);
            let (first, second) = if u.arbitrary()? { (first, second) } else { (second, first) };
            let source = format!("{name} <- {first}\nOUTPUT <- 1\n{name} <- {second}");
            check!(codes(&source) == [ErrorCode::InvalidType], "{source}");
            Ok(())
        });
    }

    #[test]
    fn undefined_reads_fail() {
        arbtest(|u| {
            let defined = u.int_in_range(0..=5)?;
            let mut source = (0..defined).map(|i| format!("V{i} <- {i}\n")).collect::<String>();
            let read = u.int_in_range(defined..=defined + 5)?;
            source += &format!("OUTPUT <- V{read} + 1");
            check!(codes(&source) == [ErrorCode::UndefinedVariable], "{source}");
            Ok(())
        });
    }
}
