use std::fs;
use std::io::prelude::*;
use std::io::{stdin, stdout, BufReader, Stdout};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lumen::{Options, WriteReporter, VM};

const EX_USAGE: u8 = 64;
const EX_IOERR: u8 = 74;

#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "Compile and run lumen expressions")]
struct Cli {
    /// Script to run; starts a REPL when neither this nor --eval is given
    script: Option<PathBuf>,

    /// Run this expression instead of a script
    #[arg(short, long, conflicts_with = "script")]
    eval: Option<String>,

    /// Disassemble each compiled chunk to stderr
    #[arg(long)]
    print_code: bool,

    /// Print every instruction and the stack to stderr while running
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            _ = e.print();
            return ExitCode::from(EX_USAGE);
        }
        Err(e) => {
            // --help and --version
            _ = e.print();
            return ExitCode::SUCCESS;
        }
    };
    let options = Options {
        print_code: cli.print_code,
        trace_execution: cli.trace,
    };
    let mut vm = VM::with_options(options);

    let outcome = match (cli.eval, cli.script) {
        (Some(source), _) => Ok(run(&mut vm, &source)),
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Unable to read script file {}", path.display()))
            .map(|source| run(&mut vm, &source)),
        (None, None) => run_prompt(&mut vm).map(|_| ExitCode::SUCCESS),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(EX_IOERR)
        }
    }
}

fn run_prompt(vm: &mut VM<Stdout>) -> Result<()> {
    let mut reader = BufReader::new(stdin().lock());
    let mut line = String::new();
    loop {
        {
            let mut stdout = stdout().lock();
            stdout.write_all(b"> ")?;
            stdout.flush()?;
        }
        let n = reader
            .read_line(&mut line)
            .context("Unable to read from stdin")?;
        if n == 0 {
            break;
        }
        if !line.trim().is_empty() {
            // Errors are already printed, the session carries on
            run(vm, &line);
        }
        // Don't keep appending code until the next time
        line.clear();
    }
    Ok(())
}

fn run(vm: &mut VM<Stdout>, source: &str) -> ExitCode {
    let mut stderr = std::io::stderr().lock();
    let mut reporter = WriteReporter::new(&mut stderr);

    match vm.interpret(source, &mut reporter) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            if let lumen::Error::Runtime(runtime) = &e {
                eprintln!("{}", runtime);
            }
            ExitCode::from(e.exit_code())
        }
    }
}
