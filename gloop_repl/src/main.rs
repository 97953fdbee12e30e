use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use gloop::{compile_tokens, lexer::Span, scan, Chunk, Executor, Fuel};
use log::debug;
use yansi::Paint;

/// Compile and run gloop programs
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Program to run. Without one, programs are read interactively and
    /// compiled whenever an empty line is entered.
    file: Option<PathBuf>,
    /// Print the bytecode listing before running
    #[arg(long)]
    disassemble: bool,
    /// Stop after compiling
    #[arg(long)]
    no_run: bool,
    /// Give up after executing this many instructions
    #[arg(long)]
    fuel: Option<i32>,
}

/// Labels the character at `span`, or the last visible character for the
/// empty span at the end of the input.
fn make_block<'a>(
    idx: &'a LineIndex,
    source: &str,
    span: Span,
    message: &str,
) -> Option<Block<&'a str, String>> {
    let span = if span.is_empty() {
        let (start, c) = source.trim_end().char_indices().next_back()?;
        start..start + c.len_utf8()
    } else {
        span
    };
    Block::new(
        idx,
        [Label::new(span)
            .with_text(message.red().to_string())
            .with_style(|s| s.red().to_string())],
    )
}

fn report(name: &str, source: &str, headline: &str, span: Span, message: &str) {
    println!("{}: {headline}", "error".red().bold());
    let idx = LineIndex::new(source);
    match make_block(&idx, source, span, message) {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            println!("{}[{name}]", block.prologue());
            print!("{block}");
            println!("{}", block.epilogue());
        }
        None => println!("  {}", message.red()),
    }
}

fn execute(chunk: &Chunk, fuel: Option<i32>) -> bool {
    let mut executor = Executor::new(chunk);
    let result = match fuel {
        Some(fuel) => executor.step(&mut Fuel::with(fuel)),
        None => executor.run().map(Some),
    };
    match result {
        Ok(Some(output)) => {
            println!("{}", output.green());
            true
        }
        Ok(None) => {
            println!(
                "{}: out of fuel at offset {}",
                "stopped".yellow().bold(),
                executor.ip()
            );
            false
        }
        Err(fault) => {
            println!("{}: {fault}", "fault".red().bold());
            false
        }
    }
}

/// Compile and run one program, reporting every problem on the way.
fn process(name: &str, source: &str, args: &Args) -> bool {
    let tokens = match scan(source) {
        Ok(tokens) => tokens,
        Err(err) => {
            let headline = format!("line {} column {}", err.line, err.column);
            report(name, source, &headline, err.span, &err.error.to_string());
            return false;
        }
    };
    debug!("scanned {} tokens", tokens.len());

    let chunk = match compile_tokens(&tokens) {
        Ok(chunk) => chunk,
        Err(errors) => {
            for err in errors {
                let headline = format!("[{}] line {} column {}", err.code, err.line, err.column);
                report(name, source, &headline, err.span, &err.message);
            }
            return false;
        }
    };

    if args.disassemble {
        print!("{}", chunk.disassemble());
    }
    if args.no_run {
        return true;
    }
    execute(&chunk, args.fuel)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    yansi::whenever(yansi::Condition::TTY_AND_COLOR);
    let args = Args::parse();

    if let Some(path) = &args.file {
        let source = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let name = path.display().to_string();
        if !process(&name, &source, &args) {
            anyhow::bail!("{name} did not run to completion");
        }
        return Ok(());
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { ">> " } else { ".. " };
        let Ok(line) = readline.readline(prompt) else {
            break;
        };
        if !line.trim().is_empty() {
            buffer.push_str(&line);
            buffer.push('\n');
            continue;
        }
        if buffer.is_empty() {
            continue;
        }

        _ = readline.add_history_entry(buffer.trim_end());
        process("repl", &buffer, &args);
        buffer.clear();
    }

    Ok(())
}
