// ABOUTME: Configuration and constants for the Plang interpreter

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WELCOME_MESSAGE: &str = "Plang v0.9";
pub const WELCOME_SUBTITLE: &str = "A statically-typed scripting language with a dynamic feel";

/// Compile errors accumulated past this count abort the run.
pub const MAX_ERRORS: usize = 3;

/// Function call nesting past this depth throws a catchable runtime string.
pub const MAX_CALL_DEPTH: usize = 10_000;

/// History file used by the interactive REPL.
pub const HISTORY_FILE: &str = ".plang_history";

pub const HELP_TEXT: &str = r#"
Type any Plang expression to evaluate it; the result is echoed as
`value: Type`. Statements end at a newline or `;`. Use Ctrl-D to exit.
"#;
