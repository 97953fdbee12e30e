//! Fetch-decode-execute loop over a [`Chunk`].
use log::trace;

use super::{FaultKind, Fuel, RuntimeFault};
use crate::{
    compiler::{
        bytecode::{Chunk, Instruction, OpCode},
        OUTPUT_SLOT,
    },
    value::{Integer, Value},
};

/// How much fuel [`Executor::run`] hands out between refills.
const FUEL_PER_STEP: i32 = 1 << 16;

/// One execution of a chunk. The operand stack and the locals belong to the
/// executor alone, so any number of executors may share a chunk.
#[derive(Debug, Clone)]
pub struct Executor<'c> {
    chunk: &'c Chunk,
    ip: usize,
    stack: Vec<Value>,
    locals: Vec<Option<Value>>,
}

impl<'c> Executor<'c> {
    pub fn new(chunk: &'c Chunk) -> Self {
        Self {
            chunk,
            ip: 0,
            stack: vec![],
            locals: vec![None; chunk.slot_count()],
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Offset of the next instruction to execute.
    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn is_finished(&self) -> bool {
        self.ip >= self.chunk.len()
    }

    /// Run until the end of the chunk.
    pub fn run(&mut self) -> Result<Value, RuntimeFault> {
        let mut fuel = Fuel::with(FUEL_PER_STEP);
        loop {
            if let Some(output) = self.step(&mut fuel)? {
                return Ok(output);
            }
            fuel.refill(FUEL_PER_STEP, FUEL_PER_STEP);
        }
    }

    /// Execute instructions until either the fuel runs out, giving `None`, or
    /// the end of the chunk is reached, giving the value of `OUTPUT`.
    pub fn step(&mut self, fuel: &mut Fuel) -> Result<Option<Value>, RuntimeFault> {
        loop {
            if self.is_finished() {
                return self.output().map(Some);
            }
            if !fuel.should_continue() {
                return Ok(None);
            }
            self.execute()?;
            fuel.consume(1);
        }
    }

    fn output(&self) -> Result<Value, RuntimeFault> {
        let output = self.locals.get(usize::from(OUTPUT_SLOT)).copied().flatten();
        output.ok_or_else(|| {
            RuntimeFault::new(
                FaultKind::UninitializedSlot { slot: OUTPUT_SLOT },
                self.chunk.len(),
                self.chunk,
            )
        })
    }

    fn execute(&mut self) -> Result<(), RuntimeFault> {
        let at = self.ip;
        let instruction = self
            .chunk
            .decode(at)
            .map_err(|err| RuntimeFault::new(err.into(), at, self.chunk))?;
        trace!("{at:04} {instruction:?} {:?}", self.stack);
        self.ip = at + instruction.len();
        self.apply(instruction)
            .map_err(|kind| RuntimeFault::new(kind, at, self.chunk))
    }

    fn apply(&mut self, instruction: Instruction) -> Result<(), FaultKind> {
        match instruction {
            Instruction::Add => self.arithmetic(OpCode::Add, Integer::checked_add)?,
            Instruction::Multiply => self.arithmetic(OpCode::Multiply, Integer::checked_mul)?,
            Instruction::Greater => self.comparison(OpCode::Greater, |l, r| l > r)?,
            Instruction::Less => self.comparison(OpCode::Less, |l, r| l < r)?,
            Instruction::Equal => {
                let right = self.pop()?;
                let left = self.pop()?;
                if left.ty() != right.ty() {
                    return Err(FaultKind::OperandMismatch {
                        op: OpCode::Equal,
                        left: left.ty(),
                        right: right.ty(),
                    });
                }
                self.stack.push(Value::Boolean(left == right));
            }
            Instruction::Not => {
                let value = self.pop()?;
                let b = boolean(OpCode::Not, value)?;
                self.stack.push(Value::Boolean(!b));
            }
            Instruction::Push(value) => self.stack.push(value),
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Jump(offset) => self.jump(offset)?,
            Instruction::JumpIfFalse(offset) => {
                if !boolean(OpCode::JumpIfFalse, self.peek()?)? {
                    self.jump(offset)?;
                }
            }
            Instruction::Store(slot) => {
                let value = self.peek()?;
                *self.slot_mut(slot)? = Some(value);
            }
            Instruction::Load(slot) => {
                let value = self.slot_mut(slot)?.ok_or(FaultKind::UninitializedSlot { slot })?;
                self.stack.push(value);
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, FaultKind> {
        self.stack.pop().ok_or(FaultKind::StackUnderflow)
    }

    fn peek(&self) -> Result<Value, FaultKind> {
        self.stack.last().copied().ok_or(FaultKind::StackUnderflow)
    }

    fn numbers(&mut self, op: OpCode) -> Result<(Integer, Integer), FaultKind> {
        let right = self.pop()?;
        let left = self.pop()?;
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => Ok((l, r)),
            _ => Err(FaultKind::OperandMismatch {
                op,
                left: left.ty(),
                right: right.ty(),
            }),
        }
    }

    fn arithmetic(
        &mut self,
        op: OpCode,
        f: impl FnOnce(Integer, Integer) -> Option<Integer>,
    ) -> Result<(), FaultKind> {
        let (left, right) = self.numbers(op)?;
        let result = f(left, right).ok_or(FaultKind::ArithmeticOverflow { op })?;
        self.stack.push(Value::Number(result));
        Ok(())
    }

    fn comparison(
        &mut self,
        op: OpCode,
        f: impl FnOnce(Integer, Integer) -> bool,
    ) -> Result<(), FaultKind> {
        let (left, right) = self.numbers(op)?;
        self.stack.push(Value::Boolean(f(left, right)));
        Ok(())
    }

    /// `offset` is relative to the end of the jump, which `ip` already points at.
    fn jump(&mut self, offset: i16) -> Result<(), FaultKind> {
        let target = self.ip as isize + isize::from(offset);
        match usize::try_from(target) {
            Ok(target) if target <= self.chunk.len() => {
                self.ip = target;
                Ok(())
            }
            _ => Err(FaultKind::InvalidJump { target }),
        }
    }

    fn slot_mut(&mut self, slot: u8) -> Result<&mut Option<Value>, FaultKind> {
        let slot_count = self.locals.len();
        self.locals
            .get_mut(usize::from(slot))
            .ok_or(FaultKind::InvalidSlot { slot, slot_count })
    }
}

fn boolean(op: OpCode, value: Value) -> Result<bool, FaultKind> {
    value.as_boolean().ok_or(FaultKind::TypeMismatch {
        op,
        found: value.ty(),
    })
}
