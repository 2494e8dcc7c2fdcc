/// Switches for the diagnostic output the VM writes to stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Disassemble every chunk that compiles cleanly, before running it
    pub print_code: bool,
    /// Print each instruction and the stack before executing it
    pub trace_execution: bool,
}
