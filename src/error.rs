use thiserror::Error;

use crate::{compiler::CompileError, vm::RuntimeError};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Error {
    /// Process exit status for this failure, following sysexits
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Compile(_) => 65,
            Error::Runtime(_) => 70,
        }
    }
}
