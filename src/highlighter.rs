// ABOUTME: Syntax highlighter for the REPL with color support
// Implements rustyline's Highlighter trait to provide ANSI color codes
// for Plang syntax elements while preserving display width

use rustyline::completion::Completer;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::Helper;
use std::borrow::Cow;

// ANSI color codes (3-bit/4-bit colors for maximum terminal compatibility)
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_KEYWORD: &str = "\x1b[1;35m"; // Bold magenta
const COLOR_TYPE: &str = "\x1b[36m"; // Cyan
const COLOR_NUMBER: &str = "\x1b[33m"; // Yellow
const COLOR_STRING: &str = "\x1b[32m"; // Green
const COLOR_COMMENT: &str = "\x1b[90m"; // Bright black (gray)
const COLOR_BRACKET: &str = "\x1b[1;34m"; // Bold blue

const KEYWORDS: &[&str] = &[
    "var", "fn", "return", "if", "then", "else", "while", "next", "last", "try", "catch",
    "throw", "exists", "delete", "keys", "values", "type", "true", "false", "null", "and",
    "or", "not",
];

/// Main helper for the Plang REPL, providing syntax-aware highlighting.
pub struct PlangHelper;

impl PlangHelper {
    pub fn new() -> Self {
        PlangHelper
    }
}

impl Default for PlangHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Helper for PlangHelper {}

impl Completer for PlangHelper {
    type Candidate = String;
}

impl Hinter for PlangHelper {
    type Hint = String;
}

impl Validator for PlangHelper {}

impl Highlighter for PlangHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];

            // Comments run to the end of the line (or to `*/` inline).
            if ch == '#' || (ch == '/' && chars.get(i + 1) == Some(&'/')) {
                out.push_str(COLOR_COMMENT);
                out.extend(&chars[i..]);
                out.push_str(COLOR_RESET);
                break;
            }
            if ch == '/' && chars.get(i + 1) == Some(&'*') {
                let start = i;
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push_str(COLOR_COMMENT);
                out.extend(&chars[start..i]);
                out.push_str(COLOR_RESET);
                continue;
            }

            // Strings, plain or interpolated.
            if ch == '"' || ch == '\'' || (ch == '$' && matches!(chars.get(i + 1), Some('"') | Some('\''))) {
                let start = i;
                if ch == '$' {
                    i += 1;
                }
                let quote = chars[i];
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                let end = i.min(chars.len());
                out.push_str(COLOR_STRING);
                out.extend(&chars[start..end]);
                out.push_str(COLOR_RESET);
                continue;
            }

            if ch.is_ascii_digit() {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '.')
                {
                    // Stop before a `..` range so it keeps its own color.
                    if chars[i] == '.' && chars.get(i + 1) == Some(&'.') {
                        break;
                    }
                    i += 1;
                }
                out.push_str(COLOR_NUMBER);
                out.extend(&chars[start..i]);
                out.push_str(COLOR_RESET);
                continue;
            }

            if ch.is_alphabetic() || ch == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if KEYWORDS.contains(&word.as_str()) {
                    out.push_str(COLOR_KEYWORD);
                    out.push_str(&word);
                    out.push_str(COLOR_RESET);
                } else if word.chars().next().is_some_and(|c| c.is_uppercase()) {
                    out.push_str(COLOR_TYPE);
                    out.push_str(&word);
                    out.push_str(COLOR_RESET);
                } else {
                    out.push_str(&word);
                }
                continue;
            }

            if matches!(ch, '(' | ')' | '[' | ']' | '{' | '}') {
                out.push_str(COLOR_BRACKET);
                out.push(ch);
                out.push_str(COLOR_RESET);
                i += 1;
                continue;
            }

            out.push(ch);
            i += 1;
        }

        Cow::Owned(out)
    }

    fn highlight_char(&self, line: &str, _pos: usize, _kind: CmdKind) -> bool {
        !line.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_colored() {
        let helper = PlangHelper::new();
        let out = helper.highlight("var x = 1", 0);
        assert!(out.contains(COLOR_KEYWORD));
        assert!(out.contains(COLOR_NUMBER));
    }

    #[test]
    fn test_plain_identifiers_untouched() {
        let helper = PlangHelper::new();
        let out = helper.highlight("foo", 0);
        assert_eq!(out, "foo");
    }

    #[test]
    fn test_strings_and_comments() {
        let helper = PlangHelper::new();
        let out = helper.highlight(r#""hi" // rest"#, 0);
        assert!(out.contains(COLOR_STRING));
        assert!(out.contains(COLOR_COMMENT));
    }
}
