//! Instruction set and the [`Chunk`] buffer the compiler emits into.
//!
//! Every instruction is one opcode byte followed by fixed-width operands.
//! Multi-byte operands are big-endian.
use core::fmt::{self, Write as _};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Pop two numbers, push their sum
    Add = 0,
    /// Pop two numbers, push their product
    Multiply,
    /// Pop two values of the same type, push whether they are equal
    Equal,
    /// Pop two numbers, push `left > right`
    Greater,
    /// Pop two numbers, push `left < right`
    Less,
    /// Pop a boolean, push its negation
    Not,

    /// Push the embedded literal.
    /// Operand: u8 type tag, then 8 bytes of payload
    Push,
    /// Discard the top of the stack
    Pop,
    /// Operand: i16 offset from the end of this instruction
    Jump,
    /// Peek the top of the stack and jump if it is `NO`.
    /// Operand: i16 offset from the end of this instruction
    JumpIfFalse,

    /// Copy the top of the stack into a slot, leaving it on the stack.
    /// Operand: u8 slot
    Store,
    /// Push the value of a slot.
    /// Operand: u8 slot
    Load,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let op = match value {
            0 => Self::Add,
            1 => Self::Multiply,
            2 => Self::Equal,
            3 => Self::Greater,
            4 => Self::Less,
            5 => Self::Not,
            6 => Self::Push,
            7 => Self::Pop,
            8 => Self::Jump,
            9 => Self::JumpIfFalse,
            10 => Self::Store,
            11 => Self::Load,
            _ => return None,
        };
        Some(op)
    }

    /// Size of the operands in bytes, not counting the opcode itself.
    pub fn operand_size(&self) -> usize {
        match self {
            Self::Add
            | Self::Multiply
            | Self::Equal
            | Self::Greater
            | Self::Less
            | Self::Not
            | Self::Pop => 0,
            Self::Store | Self::Load => 1,
            Self::Jump | Self::JumpIfFalse => 2,
            Self::Push => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Multiply => "MULTIPLY",
            Self::Equal => "EQUAL",
            Self::Greater => "GREATER",
            Self::Less => "LESS",
            Self::Not => "NOT",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Jump => "JUMP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::Store => "STORE",
            Self::Load => "LOAD",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const NUMBER_TAG: u8 = 0;
const BOOLEAN_TAG: u8 = 1;

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Add,
    Multiply,
    Equal,
    Greater,
    Less,
    Not,
    Push(Value),
    Pop,
    Jump(i16),
    JumpIfFalse(i16),
    Store(u8),
    Load(u8),
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Add => OpCode::Add,
            Self::Multiply => OpCode::Multiply,
            Self::Equal => OpCode::Equal,
            Self::Greater => OpCode::Greater,
            Self::Less => OpCode::Less,
            Self::Not => OpCode::Not,
            Self::Push(_) => OpCode::Push,
            Self::Pop => OpCode::Pop,
            Self::Jump(_) => OpCode::Jump,
            Self::JumpIfFalse(_) => OpCode::JumpIfFalse,
            Self::Store(_) => OpCode::Store,
            Self::Load(_) => OpCode::Load,
        }
    }

    /// Encoded length, opcode included.
    pub fn len(&self) -> usize {
        1 + self.opcode().operand_size()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("{0} instruction is cut short")]
    Truncated(OpCode),
    #[error("invalid literal tag {0:#04x}")]
    InvalidLiteralTag(u8),
    #[error("offset {offset} is past the end of a {len} byte chunk")]
    OutOfBounds { offset: usize, len: usize },
}

/// A jump offset that does not fit in the i16 operand.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("jump offset {0} is out of range")]
pub struct JumpTooFar(pub isize);

/// Position of a jump operand waiting to be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLabel(pub usize);

/// A compiled program: instructions, the source line of every byte, and the
/// number of local slots the program needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<usize>,
    slot_count: usize,
}

impl Chunk {
    /// Highest number of slots a chunk can address with a u8 operand
    pub const MAX_SLOTS: usize = u8::MAX as usize + 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write_byte(op as u8, line);
    }

    pub fn write_byte(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_u16(&mut self, value: u16, line: usize) {
        for byte in value.to_be_bytes() {
            self.write_byte(byte, line);
        }
    }

    pub fn emit_push(&mut self, value: Value, line: usize) {
        self.write_op(OpCode::Push, line);
        let (tag, payload) = match value {
            Value::Number(n) => (NUMBER_TAG, n),
            Value::Boolean(b) => (BOOLEAN_TAG, i64::from(b)),
        };
        self.write_byte(tag, line);
        for byte in payload.to_be_bytes() {
            self.write_byte(byte, line);
        }
    }

    /// Emit [`OpCode::Store`] or [`OpCode::Load`] for `slot`.
    pub fn emit_slot(&mut self, op: OpCode, slot: u8, line: usize) {
        debug_assert!(matches!(op, OpCode::Store | OpCode::Load));
        self.write_op(op, line);
        self.write_byte(slot, line);
    }

    /// Emit a jump with a placeholder operand, to be fixed by [`Self::patch_jump`].
    pub fn emit_jump(&mut self, op: OpCode, line: usize) -> JumpLabel {
        debug_assert!(matches!(op, OpCode::Jump | OpCode::JumpIfFalse));
        self.write_op(op, line);
        let label = JumpLabel(self.code.len());
        self.write_u16(0xFFFF, line);
        label
    }

    /// Point a placeholder jump at the current end of the chunk.
    pub fn patch_jump(&mut self, label: JumpLabel) -> Result<(), JumpTooFar> {
        let offset = self.code.len() as isize - (label.0 + 2) as isize;
        let offset = i16::try_from(offset).map_err(|_| JumpTooFar(offset))?;
        let [hi, lo] = offset.to_be_bytes();
        self.code[label.0] = hi;
        self.code[label.0 + 1] = lo;
        Ok(())
    }

    /// Emit a jump to an already known position, such as a loop back-edge.
    pub fn emit_jump_to(&mut self, op: OpCode, target: usize, line: usize) -> Result<(), JumpTooFar> {
        debug_assert!(matches!(op, OpCode::Jump | OpCode::JumpIfFalse));
        let end = self.code.len() + 3;
        let offset = target as isize - end as isize;
        let offset = i16::try_from(offset).map_err(|_| JumpTooFar(offset))?;
        self.write_op(op, line);
        self.write_u16(offset as u16, line);
        Ok(())
    }

    /// Hand out the next local slot, or `None` once every slot is taken.
    pub fn allocate_slot(&mut self) -> Option<u8> {
        let slot = u8::try_from(self.slot_count).ok()?;
        self.slot_count += 1;
        Some(slot)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Offset the next emitted byte will have.
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    pub fn line_at(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset).copied()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn operand<const N: usize>(&self, offset: usize, op: OpCode) -> Result<[u8; N], DecodeError> {
        self.code
            .get(offset..offset + N)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(DecodeError::Truncated(op))
    }

    /// Decode the instruction starting at `offset`.
    pub fn decode(&self, offset: usize) -> Result<Instruction, DecodeError> {
        let Some(&byte) = self.code.get(offset) else {
            return Err(DecodeError::OutOfBounds {
                offset,
                len: self.code.len(),
            });
        };
        let op = OpCode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte))?;
        let operands = offset + 1;
        let instruction = match op {
            OpCode::Add => Instruction::Add,
            OpCode::Multiply => Instruction::Multiply,
            OpCode::Equal => Instruction::Equal,
            OpCode::Greater => Instruction::Greater,
            OpCode::Less => Instruction::Less,
            OpCode::Not => Instruction::Not,
            OpCode::Pop => Instruction::Pop,
            OpCode::Push => {
                let [tag] = self.operand::<1>(operands, op)?;
                let payload = i64::from_be_bytes(self.operand(operands + 1, op)?);
                match tag {
                    NUMBER_TAG => Instruction::Push(Value::Number(payload)),
                    BOOLEAN_TAG => Instruction::Push(Value::Boolean(payload != 0)),
                    tag => return Err(DecodeError::InvalidLiteralTag(tag)),
                }
            }
            OpCode::Jump => Instruction::Jump(i16::from_be_bytes(self.operand(operands, op)?)),
            OpCode::JumpIfFalse => {
                Instruction::JumpIfFalse(i16::from_be_bytes(self.operand(operands, op)?))
            }
            OpCode::Store => Instruction::Store(self.operand::<1>(operands, op)?[0]),
            OpCode::Load => Instruction::Load(self.operand::<1>(operands, op)?[0]),
        };
        Ok(instruction)
    }

    /// Decode every instruction in order, along with its offset.
    pub fn instructions(&self) -> impl Iterator<Item = (usize, Result<Instruction, DecodeError>)> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset >= self.code.len() {
                return None;
            }
            let at = offset;
            let decoded = self.decode(at);
            offset = match &decoded {
                Ok(instruction) => at + instruction.len(),
                // resynchronise one byte further
                Err(_) => at + 1,
            };
            Some((at, decoded))
        })
    }

    /// The opcodes of the chunk, operands skipped.
    pub fn opcodes(&self) -> Vec<OpCode> {
        self.instructions()
            .filter_map(|(_, decoded)| decoded.ok().map(|i| i.opcode()))
            .collect()
    }

    /// Render a listing with one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} bytes, {} slots ==", self.len(), self.slot_count);
        let mut last_line = None;
        for (offset, decoded) in self.instructions() {
            let line = self.lines[offset];
            if last_line == Some(line) {
                let _ = write!(out, "{offset:04}    | ");
            } else {
                let _ = write!(out, "{offset:04} {line:4} ");
            }
            last_line = Some(line);
            let _ = match decoded {
                Ok(instruction) => match instruction {
                    Instruction::Push(value) => writeln!(out, "PUSH {value}"),
                    Instruction::Jump(jump) | Instruction::JumpIfFalse(jump) => {
                        let target = (offset + instruction.len()) as isize + jump as isize;
                        writeln!(out, "{} {jump:+} -> {target:04}", instruction.opcode())
                    }
                    Instruction::Store(slot) | Instruction::Load(slot) => {
                        writeln!(out, "{} {slot}", instruction.opcode())
                    }
                    other => writeln!(out, "{}", other.opcode()),
                },
                Err(err) => writeln!(out, "<{err}>"),
            };
        }
        out
    }
}
