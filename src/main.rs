// ABOUTME: CLI entry point: argument parsing, script/stdin/inline source
// dispatch, the interactive REPL, and diagnostic logging setup

use clap::Parser;
use plang::config::{self, HELP_TEXT, HISTORY_FILE, WELCOME_MESSAGE, WELCOME_SUBTITLE};
use plang::highlighter::PlangHelper;
use plang::interpreter::Interpreter;
use plang::value::Value;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// The Plang interpreter
#[derive(Parser, Debug)]
#[command(name = "plang")]
#[command(version = config::VERSION)]
#[command(about = "A statically-typed scripting language with a dynamic feel")]
struct CliArgs {
    /// Script file to run
    #[arg(long = "file", value_name = "FILE")]
    file: Option<PathBuf>,

    /// Add a module search root (can be repeated)
    #[arg(long = "modpath", value_name = "DIR", action = clap::ArgAction::Append)]
    modpath: Vec<PathBuf>,

    /// Inline source text to evaluate
    #[arg(value_name = "CODE", trailing_var_arg = true)]
    code: Vec<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let args = CliArgs::parse();
    let mut interp = Interpreter::new();

    if let Some(file) = &args.file {
        let path = match resolve_script(file, &args.modpath) {
            Some(path) => path,
            None => {
                eprintln!("plang: cannot find script `{}`", file.display());
                return ExitCode::FAILURE;
            }
        };
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("plang: cannot read `{}`: {err}", path.display());
                return ExitCode::FAILURE;
            }
        };
        return run(&mut interp, &source);
    }

    if !args.code.is_empty() {
        let source = args.code.join(" ");
        return run(&mut interp, &source);
    }

    if !std::io::stdin().is_terminal() {
        let mut source = String::new();
        if let Err(err) = std::io::stdin().read_to_string(&mut source) {
            eprintln!("plang: cannot read stdin: {err}");
            return ExitCode::FAILURE;
        }
        return run(&mut interp, &source);
    }

    repl(&mut interp)
}

/// `DEBUG` enables diagnostic logging: a comma-separated tag list
/// (`DEBUG=lexer,validator`) or `ALL` for everything, written to stderr.
fn init_tracing() {
    let Ok(tags) = std::env::var("DEBUG") else {
        return;
    };
    let directives = if tags.trim().eq_ignore_ascii_case("all") {
        "trace".to_string()
    } else {
        tags.split(',')
            .map(|tag| format!("plang::{}=trace", tag.trim()))
            .collect::<Vec<_>>()
            .join(",")
    };
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_script(file: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    if file.exists() {
        return Some(file.to_path_buf());
    }
    roots.iter().map(|root| root.join(file)).find(|p| p.exists())
}

fn run(interp: &mut Interpreter, source: &str) -> ExitCode {
    match interp.interpret(source) {
        Ok(value) => ExitCode::from(exit_code_of(&value)),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// The process exit code is the final value coerced to an integer; null
/// runs exit 0.
fn exit_code_of(value: &Value) -> u8 {
    let code = match value {
        Value::Null => 0,
        Value::Boolean(b) => i64::from(*b),
        Value::Integer(n) => *n,
        Value::Real(n) => *n as i64,
        _ => 0,
    };
    code.rem_euclid(256) as u8
}

fn repl(interp: &mut Interpreter) -> ExitCode {
    println!("{WELCOME_MESSAGE}");
    println!("{WELCOME_SUBTITLE}");
    println!("{HELP_TEXT}");

    let rl_config = Config::builder().auto_add_history(true).build();
    let mut rl: Editor<PlangHelper, DefaultHistory> = match Editor::with_config(rl_config) {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("plang: cannot start the REPL: {err}");
            return ExitCode::FAILURE;
        }
    };
    rl.set_helper(Some(PlangHelper::new()));
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match interp.interpret(&line) {
                    // Each result echoes with its type, `value: Type`.
                    Ok(value) => println!("{value}: {}", value.type_of()),
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("plang: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_of(&Value::Null), 0);
        assert_eq!(exit_code_of(&Value::Integer(42)), 42);
        assert_eq!(exit_code_of(&Value::Integer(-1)), 255);
        assert_eq!(exit_code_of(&Value::Boolean(true)), 1);
        assert_eq!(exit_code_of(&Value::Str("whatever".into())), 0);
    }
}
