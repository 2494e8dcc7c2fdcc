use std::fmt::Write;

use thiserror::Error;

use crate::value::Value;

/// Largest constant index the `ConstantBig` encoding can address (3 bytes)
pub const MAX_CONSTANT_INDEX: usize = 0xFF_FFFF;

/// Read the big endian three byte operand starting at `offset`
pub fn decode_u24(code: &[u8], offset: usize) -> Option<usize> {
    let bytes = code.get(offset..offset.checked_add(3)?)?;
    Some(bytes.iter().fold(0, |index, b| (index << 8) | usize::from(*b)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Return = 0,
    Constant,
    ConstantBig,
    Null,
    True,
    False,
    Negate,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Not,
    And,
    Or,
}

impl OpCode {
    pub fn decode(op: u8) -> Option<OpCode> {
        let op = match op {
            0 => OpCode::Return,
            1 => OpCode::Constant,
            2 => OpCode::ConstantBig,
            3 => OpCode::Null,
            4 => OpCode::True,
            5 => OpCode::False,
            6 => OpCode::Negate,
            7 => OpCode::Add,
            8 => OpCode::Subtract,
            9 => OpCode::Multiply,
            10 => OpCode::Divide,
            11 => OpCode::Modulo,
            12 => OpCode::Power,
            13 => OpCode::ShiftLeft,
            14 => OpCode::ShiftRight,
            15 => OpCode::Equal,
            16 => OpCode::NotEqual,
            17 => OpCode::Greater,
            18 => OpCode::GreaterEqual,
            19 => OpCode::Less,
            20 => OpCode::LessEqual,
            21 => OpCode::Not,
            22 => OpCode::And,
            23 => OpCode::Or,
            _ => return None,
        };
        Some(op)
    }

    /// Number of operand bytes that follow the opcode byte
    pub fn operand_len(self) -> usize {
        match self {
            OpCode::Constant => 1,
            OpCode::ConstantBig => 3,
            OpCode::Return
            | OpCode::Null
            | OpCode::True
            | OpCode::False
            | OpCode::Negate
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Power
            | OpCode::ShiftLeft
            | OpCode::ShiftRight
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::Greater
            | OpCode::GreaterEqual
            | OpCode::Less
            | OpCode::LessEqual
            | OpCode::Not
            | OpCode::And
            | OpCode::Or => 0,
        }
    }
}

impl From<BinaryOp> for OpCode {
    fn from(value: BinaryOp) -> Self {
        match value {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Subtract => OpCode::Subtract,
            BinaryOp::Multiply => OpCode::Multiply,
            BinaryOp::Divide => OpCode::Divide,
            BinaryOp::Modulo => OpCode::Modulo,
            BinaryOp::Power => OpCode::Power,
            BinaryOp::ShiftLeft => OpCode::ShiftLeft,
            BinaryOp::ShiftRight => OpCode::ShiftRight,
            BinaryOp::Equal => OpCode::Equal,
            BinaryOp::NotEqual => OpCode::NotEqual,
            BinaryOp::Greater => OpCode::Greater,
            BinaryOp::GreaterEqual => OpCode::GreaterEqual,
            BinaryOp::Less => OpCode::Less,
            BinaryOp::LessEqual => OpCode::LessEqual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
}

/// A compiled unit: instruction bytes, the source line of every byte and
/// the constant pool the instructions index into.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<usize>,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk {
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn line_at(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset).copied()
    }

    /// Drop all code and constants, leaving the chunk ready for reuse
    pub fn clear(&mut self) {
        self.code = Vec::new();
        self.lines = Vec::new();
        self.constants = Vec::new();
    }

    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op as u8, line);
    }

    pub fn emit_return(&mut self, line: usize) {
        self.write_op(OpCode::Return, line);
    }

    pub fn emit_binary_op(&mut self, op: BinaryOp, line: usize) {
        self.write_op(OpCode::from(op), line);
    }

    pub fn emit_bool(&mut self, value: bool, line: usize) {
        self.write_op(if value { OpCode::True } else { OpCode::False }, line);
    }

    pub fn emit_null(&mut self, line: usize) {
        self.write_op(OpCode::Null, line);
    }

    pub fn emit_negate(&mut self, line: usize) {
        self.write_op(OpCode::Negate, line);
    }

    pub fn emit_not(&mut self, line: usize) {
        self.write_op(OpCode::Not, line);
    }

    /// Append to the constant pool. Indices are never reused.
    pub fn add_constant(&mut self, constant: Value) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Add a constant and emit the instruction that loads it: `Constant` with a
    /// one byte index, or `ConstantBig` with a three byte big endian index once
    /// the pool outgrows a byte.
    pub fn write_constant(&mut self, constant: Value, line: usize) -> Result<usize, ChunkError> {
        if self.constants.len() > MAX_CONSTANT_INDEX {
            return Err(ChunkError::TooManyConstants);
        }
        let index = self.add_constant(constant);

        if index > usize::from(u8::MAX) {
            self.write_op(OpCode::ConstantBig, line);
            self.write((index >> 16) as u8, line);
            self.write((index >> 8) as u8, line);
            self.write(index as u8, line);
        } else {
            self.write_op(OpCode::Constant, line);
            self.write(index as u8, line);
        }
        Ok(index)
    }

    /// Decode the constant index of the load instruction at `offset`
    pub fn read_constant_index(&self, offset: usize) -> Option<usize> {
        match OpCode::decode(*self.code.get(offset)?)? {
            OpCode::Constant => self.code.get(offset + 1).map(|b| usize::from(*b)),
            OpCode::ConstantBig => decode_u24(&self.code, offset + 1),
            _ => None,
        }
    }

    pub fn disassemble(&self, name: &str) -> String {
        let mut result = format!("==== {} ====\n", name);

        let mut offset = 0usize;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(&mut result, offset);
            result.push('\n');
        }
        result
    }

    /// Render the instruction at `offset` and return the offset of the next one
    pub fn disassemble_instruction(&self, result: &mut String, offset: usize) -> usize {
        let (Some(&byte), Some(&line)) = (self.code.get(offset), self.lines.get(offset)) else {
            _ = write!(result, "{:04} <end>", offset);
            return offset;
        };

        if offset > 0 && self.lines.get(offset - 1) == Some(&line) {
            _ = write!(result, "{:04}    | ", offset);
        } else {
            _ = write!(result, "{:04} {:4} ", offset, line);
        }

        let Some(op) = OpCode::decode(byte) else {
            _ = write!(result, "INVALID {}", byte);
            return offset + 1;
        };

        // Nicely pad the result string
        _ = write!(result, "{:<14}", format!("{:?}", op));
        match op {
            OpCode::Constant | OpCode::ConstantBig => self.constant_instruction(result, op, offset),
            _ => offset + 1,
        }
    }

    fn constant_instruction(&self, target: &mut String, op: OpCode, offset: usize) -> usize {
        match self
            .read_constant_index(offset)
            .and_then(|index| Some((index, self.constants.get(index)?)))
        {
            Some((index, value)) => {
                _ = write!(target, " {:4} '{}'", index, value);
            }
            None => target.push_str(" <malformed>"),
        }
        offset + 1 + op.operand_len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_opcode_decodes_to_itself() {
        for byte in 0..=OpCode::Or as u8 {
            let op = OpCode::decode(byte).unwrap();
            assert_eq!(byte, op as u8);
        }
        assert_eq!(None, OpCode::decode(OpCode::Or as u8 + 1));
    }

    #[test]
    fn lines_track_every_byte() {
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Number(1.0), 1).unwrap();
        chunk.emit_negate(2);
        chunk.emit_return(3);
        assert_eq!(chunk.code().len(), chunk.lines().len());
        assert_eq!(&[1, 1, 2, 3], chunk.lines());
    }

    #[test]
    fn big_constants_switch_encoding() {
        let mut chunk = Chunk::new();
        let mut offsets = Vec::new();
        for i in 0..300 {
            offsets.push(chunk.len());
            let index = chunk.write_constant(Value::Number(i as f64), 1).unwrap();
            assert_eq!(i, index);
        }

        assert_eq!(Some(OpCode::Constant), OpCode::decode(chunk.code()[offsets[255]]));
        assert_eq!(Some(OpCode::ConstantBig), OpCode::decode(chunk.code()[offsets[256]]));
        assert_eq!(&[0, 1, 0], &chunk.code()[offsets[256] + 1..offsets[256] + 4]);

        for (i, offset) in offsets.into_iter().enumerate() {
            let index = chunk.read_constant_index(offset).unwrap();
            assert_eq!(Value::Number(i as f64), chunk.constants()[index]);
        }
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Bool(true), 1).unwrap();
        chunk.clear();
        assert!(chunk.is_empty());
        assert!(chunk.lines().is_empty());
        assert!(chunk.constants().is_empty());

        chunk.emit_null(4);
        assert_eq!(Some(4), chunk.line_at(0));
    }

    #[test]
    fn disassemble_shows_constants_and_repeated_lines() {
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Number(3.14), 1).unwrap();
        chunk.emit_return(1);
        chunk.write(0xEE, 2);

        let text = chunk.disassemble("test chunk");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!("==== test chunk ====", lines[0]);
        assert!(lines[1].starts_with("0000    1 Constant"));
        assert!(lines[1].ends_with("0 '3.14'"));
        assert!(lines[2].starts_with("0002    | Return"));
        assert_eq!("0003    2 INVALID 238", lines[3]);
    }

    #[test]
    fn disassembling_past_the_end_does_not_advance() {
        let mut chunk = Chunk::new();
        chunk.emit_return(1);

        let mut text = String::new();
        assert_eq!(1, chunk.disassemble_instruction(&mut text, 1));
        assert_eq!("0001 <end>", text);

        let mut text = String::new();
        assert_eq!(0, Chunk::new().disassemble_instruction(&mut text, 0));
        assert_eq!("0000 <end>", text);
    }

    #[test]
    fn three_byte_operands_are_big_endian() {
        assert_eq!(Some(0x01_02_03), decode_u24(&[0xAA, 1, 2, 3], 1));
        assert_eq!(Some(MAX_CONSTANT_INDEX), decode_u24(&[0xFF; 3], 0));
        assert_eq!(None, decode_u24(&[1, 2, 3], 1));
        assert_eq!(None, decode_u24(&[1, 2, 3], usize::MAX));
    }
}
