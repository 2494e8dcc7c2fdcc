use std::{
    fmt::Debug,
    io::{self, Stdout, Write},
};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    bytecode::{decode_u24, Chunk, OpCode},
    compiler::compile,
    config::Options,
    error::Error,
    reporter::Reporter,
    value::Value,
};

/// Everything that can stop a running chunk
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    #[error("Operand must be a number.")]
    OperandNotNumber,
    #[error("Operands must be numbers.")]
    OperandsNotNumbers,
    #[error("Shift amount {0} is out of range.")]
    ShiftOutOfRange(f64),
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Stack underflow.")]
    StackUnderflow,
    #[error("Invalid opcode {0}.")]
    InvalidOpcode(u8),
    #[error("Instruction operands run past the end of the chunk.")]
    TruncatedInstruction,
    #[error("Constant {0} is not in the pool.")]
    ConstantOutOfRange(usize),
    #[error("Chunk ended without a return.")]
    MissingReturn,
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("{fault}\n[line {line}] in script")]
pub struct RuntimeError {
    pub fault: Fault,
    pub line: usize,
}

struct Stack<V, const LIMIT: usize> {
    stack: Vec<V>,
}

impl<V, const LIMIT: usize> Stack<V, LIMIT> {
    pub fn new() -> Stack<V, LIMIT> {
        Stack {
            stack: Vec::with_capacity(LIMIT),
        }
    }

    pub fn push(&mut self, v: V) -> Result<(), Fault> {
        if self.stack.len() == LIMIT {
            Err(Fault::StackOverflow)
        } else {
            self.stack.push(v);
            Ok(())
        }
    }

    pub fn pop(&mut self) -> Result<V, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    /// The value `skip` slots below the top
    pub fn peek_n(&self, skip: usize) -> Result<&V, Fault> {
        self.stack.iter().rev().nth(skip).ok_or(Fault::StackUnderflow)
    }

    pub fn peek_mut(&mut self) -> Result<&mut V, Fault> {
        self.stack.last_mut().ok_or(Fault::StackUnderflow)
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn as_slice(&self) -> &[V] {
        &self.stack
    }
}

impl<V, const LIMIT: usize> Debug for Stack<V, LIMIT>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stack.iter()).finish()
    }
}

/// A bytecode interpreter. The stack outlives single runs, so one VM can
/// serve many `interpret` calls, but it is never shared between threads.
pub struct VM<W = Stdout, const STACK_MAX: usize = 256> {
    stack: Stack<Value, STACK_MAX>,
    out: W,
    options: Options,
}

impl VM {
    /// A VM printing results to stdout
    pub fn with_options(options: Options) -> VM {
        VM::with_output(io::stdout(), options)
    }
}

impl<W, const STACK_MAX: usize> VM<W, STACK_MAX>
where
    W: Write,
{
    /// A VM printing results to `out`
    pub fn with_output(out: W, options: Options) -> VM<W, STACK_MAX> {
        VM {
            stack: Stack::new(),
            out,
            options,
        }
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Compile and run `source`. Compile errors go to `reporter` and leave the
    /// VM untouched; the compiled chunk lives only for this call.
    pub fn interpret<R>(&mut self, source: &str, reporter: &mut R) -> Result<Value, Error>
    where
        R: Reporter,
    {
        let mut chunk = Chunk::new();
        compile(source, &mut chunk, reporter)?;

        if self.options.print_code {
            eprint!("{}", chunk.disassemble("code"));
        }

        let value = self.run(&chunk)?;
        debug!(%value, "interpret finished");
        Ok(value)
    }

    /// Execute `chunk` from its first byte until `Return`, which prints and
    /// yields the value on top of the stack. Any fault empties the stack.
    pub fn run(&mut self, chunk: &Chunk) -> Result<Value, RuntimeError> {
        let mut ip: usize = 0;
        match self.execute(chunk, &mut ip) {
            Ok(value) => Ok(value),
            Err(fault) => {
                self.stack.clear();
                let line = chunk.line_at(ip.saturating_sub(1)).unwrap_or(0);
                warn!(%fault, line, "runtime fault, stack reset");
                Err(RuntimeError { fault, line })
            }
        }
    }

    fn execute(&mut self, chunk: &Chunk, ip: &mut usize) -> Result<Value, Fault> {
        if self.options.trace_execution {
            eprintln!("==== EXEC ====");
        }
        loop {
            if *ip >= chunk.len() {
                return Err(Fault::MissingReturn);
            }
            if self.options.trace_execution {
                let mut result = String::new();
                chunk.disassemble_instruction(&mut result, *ip);
                eprintln!("{} \t\tstack: {:?}", result, self.stack);
            }

            let op = read_inst(chunk, ip)?;
            trace!(?op, ip = *ip - 1, depth = self.stack.len(), "execute");
            match op {
                OpCode::Return => {
                    let value = self.stack.pop()?;
                    // If the write fails, we don't care
                    _ = writeln!(self.out, "{}", value);
                    return Ok(value);
                }
                OpCode::Constant => {
                    let index = usize::from(read_u8(chunk, ip)?);
                    self.stack.push(read_constant(chunk, index)?)?;
                }
                OpCode::ConstantBig => {
                    let index = read_u24(chunk, ip)?;
                    self.stack.push(read_constant(chunk, index)?)?;
                }
                OpCode::Null => self.stack.push(Value::Null)?,
                OpCode::True => self.stack.push(Value::Bool(true))?,
                OpCode::False => self.stack.push(Value::Bool(false))?,
                OpCode::Negate => match self.stack.peek_mut()? {
                    Value::Number(n) => *n = -*n,
                    _ => return Err(Fault::OperandNotNumber),
                },
                OpCode::Add => self.numeric_binary_op(|l, r| Ok(Value::from(l + r)))?,
                OpCode::Subtract => self.numeric_binary_op(|l, r| Ok(Value::from(l - r)))?,
                OpCode::Multiply => self.numeric_binary_op(|l, r| Ok(Value::from(l * r)))?,
                OpCode::Divide => self.numeric_binary_op(|l, r| Ok(Value::from(l / r)))?,
                OpCode::Modulo => self.numeric_binary_op(|l, r| Ok(Value::from(l % r)))?,
                OpCode::Power => self.numeric_binary_op(|l, r| Ok(Value::from(l.powf(r))))?,
                OpCode::ShiftLeft => self.numeric_binary_op(|l, r| {
                    let amount = shift_amount(r)?;
                    Ok(Value::from((l as i64).wrapping_shl(amount) as f64))
                })?,
                OpCode::ShiftRight => self.numeric_binary_op(|l, r| {
                    let amount = shift_amount(r)?;
                    Ok(Value::from((l as i64).wrapping_shr(amount) as f64))
                })?,
                OpCode::Equal => self.binary_op(|l, r| Value::Bool(l == r))?,
                OpCode::NotEqual => self.binary_op(|l, r| Value::Bool(l != r))?,
                OpCode::Greater => self.numeric_binary_op(|l, r| Ok(Value::from(l > r)))?,
                OpCode::GreaterEqual => self.numeric_binary_op(|l, r| Ok(Value::from(l >= r)))?,
                OpCode::Less => self.numeric_binary_op(|l, r| Ok(Value::from(l < r)))?,
                OpCode::LessEqual => self.numeric_binary_op(|l, r| Ok(Value::from(l <= r)))?,
                OpCode::Not => {
                    let top = self.stack.peek_mut()?;
                    *top = Value::Bool(!top.to_bool());
                }
                OpCode::And => self.binary_op(|l, r| Value::Bool(l.to_bool() && r.to_bool()))?,
                OpCode::Or => self.binary_op(|l, r| Value::Bool(l.to_bool() || r.to_bool()))?,
            }
        }
    }

    // Pops the right operand and overwrites the left one with the result
    fn binary_op<F>(&mut self, op: F) -> Result<(), Fault>
    where
        F: FnOnce(Value, Value) -> Value,
    {
        let r = self.stack.pop()?;
        let l = self.stack.peek_mut()?;
        *l = op(*l, r);
        Ok(())
    }

    fn numeric_binary_op<F>(&mut self, op: F) -> Result<(), Fault>
    where
        F: FnOnce(f64, f64) -> Result<Value, Fault>,
    {
        let l = self.stack.peek_n(1)?.as_number();
        let r = self.stack.peek_n(0)?.as_number();
        let (Some(l), Some(r)) = (l, r) else {
            return Err(Fault::OperandsNotNumbers);
        };
        let result = op(l, r)?;
        self.stack.pop()?;
        *self.stack.peek_mut()? = result;
        Ok(())
    }
}

fn shift_amount(amount: f64) -> Result<u32, Fault> {
    let whole = amount.trunc();
    if (0.0..64.0).contains(&whole) {
        Ok(whole as u32)
    } else {
        Err(Fault::ShiftOutOfRange(amount))
    }
}

fn read_inst(chunk: &Chunk, ip: &mut usize) -> Result<OpCode, Fault> {
    let instruction = read_u8(chunk, ip)?;
    OpCode::decode(instruction).ok_or(Fault::InvalidOpcode(instruction))
}

fn read_u8(chunk: &Chunk, ip: &mut usize) -> Result<u8, Fault> {
    let byte = chunk
        .code()
        .get(*ip)
        .copied()
        .ok_or(Fault::TruncatedInstruction)?;
    *ip += 1;
    Ok(byte)
}

fn read_u24(chunk: &Chunk, ip: &mut usize) -> Result<usize, Fault> {
    let index = decode_u24(chunk.code(), *ip).ok_or(Fault::TruncatedInstruction)?;
    *ip += 3;
    Ok(index)
}

fn read_constant(chunk: &Chunk, index: usize) -> Result<Value, Fault> {
    chunk
        .constants()
        .get(index)
        .copied()
        .ok_or(Fault::ConstantOutOfRange(index))
}
