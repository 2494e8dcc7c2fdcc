//! A single pass compiler and stack VM for a small expression language.
//!
//! Source text is scanned into tokens, compiled straight to bytecode by a
//! Pratt parser and run on a value stack:
//!
//! ```text
//! VM::interpret(source) -> compile(source, chunk) -> VM::run(chunk)
//! ```

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod reporter;
pub mod scanner;
pub mod value;
pub mod vm;

pub use bytecode::{Chunk, OpCode};
pub use compiler::{compile, CompileError};
pub use config::Options;
pub use error::Error;
pub use reporter::{NoopReporter, Reporter, WriteReporter};
pub use scanner::{Scanner, Token, TokenType};
pub use value::Value;
pub use vm::{Fault, RuntimeError, VM};
