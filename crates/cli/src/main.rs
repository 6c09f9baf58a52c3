//! microc CLI entry point: compile one source file and run it immediately.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use microc_compiler::compile;
use microc_vm::{SystemHost, Vm};

#[derive(Parser)]
#[command(name = "microc")]
#[command(about = "Compile and run a C-subset source file", long_about = None)]
struct Cli {
    /// Source file to compile and run
    source: PathBuf,

    /// Arguments forwarded to the compiled program's main
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(status) => {
            eprintln!("exit({})", status);
            ExitCode::from(status as u8)
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(255)
        }
    }
}

fn run(cli: Cli) -> Result<i64> {
    let source = std::fs::read_to_string(&cli.source)
        .with_context(|| format!("could not read {}", cli.source.display()))?;

    let image = compile(&source)?;
    tracing::debug!(
        text_words = image.text.len(),
        data_bytes = image.data.len(),
        "image ready"
    );

    // The compiled main sees the source path as argv[0], like any program
    // invoked by name.
    let mut args = vec![cli.source.display().to_string()];
    args.extend(cli.args.iter().cloned());

    let mut vm = Vm::new(&image, SystemHost::new(), &args)?;
    Ok(vm.run()?)
}
