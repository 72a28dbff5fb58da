// ABOUTME: Hand-written lexer turning source text into a token stream

use crate::token::{keyword_kind, Pos, Token, TokenKind};
use tracing::trace;

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

/// Lexes a whole source text. Never fails: unrecognised characters become
/// `Other` tokens for the parser to report. The stream always ends in `Eof`.
pub fn lex(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.source.get(self.pos + 2).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        while let Some(ch) = self.current() {
            let pos = self.here();
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '\n' => {
                    self.advance();
                    // Runs of blank lines collapse into one terminator.
                    if !matches!(tokens.last().map(|t| t.kind), Some(TokenKind::Term) | None) {
                        tokens.push(Token::new(TokenKind::Term, "\n", pos));
                    }
                }
                ';' => {
                    self.advance();
                    if !matches!(tokens.last().map(|t| t.kind), Some(TokenKind::Term) | None) {
                        tokens.push(Token::new(TokenKind::Term, ";", pos));
                    }
                }
                '#' => self.skip_line_comment(),
                '/' if self.peek() == Some('/') => self.skip_line_comment(),
                '/' if self.peek() == Some('*') => self.skip_block_comment(),
                '\'' | '"' => tokens.push(self.scan_string(pos, false)),
                '$' if matches!(self.peek(), Some('\'') | Some('"')) => {
                    self.advance();
                    tokens.push(self.scan_string(pos, true));
                }
                c if c.is_ascii_digit() => tokens.push(self.scan_number(pos)),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.scan_word(pos)),
                _ => tokens.push(self.scan_operator(pos)),
            }
        }
        tokens.push(Token::new(TokenKind::Eof, "", self.here()));
        trace!(count = tokens.len(), "lexed token stream");
        tokens
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        // Consumes `/*`, then scans to the matching `*/` (possibly over
        // several lines) or end of input.
        self.advance();
        self.advance();
        while let Some(ch) = self.advance() {
            if ch == '*' && self.current() == Some('/') {
                self.advance();
                return;
            }
        }
    }

    fn scan_string(&mut self, pos: Pos, interpolated: bool) -> Token {
        let quote = match self.advance() {
            Some(q) => q,
            None => return Token::new(TokenKind::Other, "$", pos),
        };
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return Token::new(TokenKind::Other, text, pos),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    None => return Token::new(TokenKind::Other, text, pos),
                    Some(esc) if interpolated => {
                        // Interpolated bodies keep their escapes; expansion
                        // happens when the spans are spliced at evaluation.
                        text.push('\\');
                        text.push(esc);
                    }
                    Some(esc) => text.push(unescape(esc)),
                },
                Some(c) => text.push(c),
            }
        }
        let kind = if interpolated {
            TokenKind::InterpStr
        } else {
            TokenKind::Str
        };
        Token::new(kind, text, pos)
    }

    fn scan_number(&mut self, pos: Pos) -> Token {
        let mut text = String::new();
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            text.push(self.advance().unwrap_or('0'));
            text.push(self.advance().unwrap_or('x'));
            while let Some(c) = self.current() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            return Token::new(TokenKind::Hex, text, pos);
        }

        let mut real = false;
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !real && matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                // `1..3` is a range, `1.x` a dot expression; only a digit
                // after the dot continues the number.
                real = true;
                text.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E')
                && (matches!(self.peek(), Some(d) if d.is_ascii_digit())
                    || (matches!(self.peek(), Some('+') | Some('-'))
                        && matches!(self.peek2(), Some(d) if d.is_ascii_digit())))
            {
                real = true;
                text.push(c);
                self.advance();
                if matches!(self.current(), Some('+') | Some('-')) {
                    text.push(self.advance().unwrap_or('+'));
                }
                while let Some(d) = self.current() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        self.advance();
                    } else {
                        break;
                    }
                }
                break;
            } else {
                break;
            }
        }
        let kind = if real { TokenKind::Real } else { TokenKind::Integer };
        Token::new(kind, text, pos)
    }

    fn scan_word(&mut self, pos: Pos) -> Token {
        let mut text = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if let Some(kind) = keyword_kind(&text) {
            return Token::new(kind, text, pos);
        }
        let kind = if text.chars().next().is_some_and(|c| c.is_uppercase()) {
            TokenKind::TypeName
        } else {
            TokenKind::Ident
        };
        Token::new(kind, text, pos)
    }

    fn scan_operator(&mut self, pos: Pos) -> Token {
        let c0 = self.current().unwrap_or(' ');
        let c1 = self.peek();
        let c2 = self.peek2();

        // Longest match first.
        if c0 == '^' && c1 == Some('^') && c2 == Some('=') {
            self.advance();
            self.advance();
            self.advance();
            return Token::new(TokenKind::CaretCaretEq, "^^=", pos);
        }

        let two: Option<TokenKind> = match (c0, c1) {
            ('*', Some('*')) => Some(TokenKind::StarStar),
            ('^', Some('^')) => Some(TokenKind::CaretCaret),
            ('^', Some('=')) => Some(TokenKind::CaretEq),
            ('=', Some('=')) => Some(TokenKind::EqEq),
            ('!', Some('=')) => Some(TokenKind::BangEq),
            ('<', Some('=')) => Some(TokenKind::LessEq),
            ('>', Some('=')) => Some(TokenKind::GreaterEq),
            ('&', Some('&')) => Some(TokenKind::AmpAmp),
            ('|', Some('|')) => Some(TokenKind::PipePipe),
            ('+', Some('+')) => Some(TokenKind::PlusPlus),
            ('-', Some('-')) => Some(TokenKind::MinusMinus),
            ('+', Some('=')) => Some(TokenKind::PlusEq),
            ('-', Some('=')) => Some(TokenKind::MinusEq),
            ('*', Some('=')) => Some(TokenKind::StarEq),
            ('/', Some('=')) => Some(TokenKind::SlashEq),
            ('.', Some('.')) => Some(TokenKind::DotDot),
            ('-', Some('>')) => Some(TokenKind::Arrow),
            (':', Some(':')) => Some(TokenKind::ColonColon),
            _ => None,
        };
        if let Some(kind) = two {
            let mut text = String::new();
            text.push(self.advance().unwrap_or(c0));
            if let Some(c) = self.advance() {
                text.push(c);
            }
            return Token::new(kind, text, pos);
        }

        let one: Option<TokenKind> = match c0 {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Percent),
            '^' => Some(TokenKind::Caret),
            '.' => Some(TokenKind::Dot),
            '~' => Some(TokenKind::Tilde),
            '=' => Some(TokenKind::Assign),
            '<' => Some(TokenKind::Less),
            '>' => Some(TokenKind::Greater),
            '!' => Some(TokenKind::Bang),
            '&' => None,
            '|' => Some(TokenKind::Pipe),
            '?' => Some(TokenKind::Question),
            ':' => Some(TokenKind::Colon),
            ',' => Some(TokenKind::Comma),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            _ => None,
        };
        let ch = self.advance().unwrap_or(c0);
        match one {
            Some(kind) => Token::new(kind, ch.to_string(), pos),
            None => Token::new(TokenKind::Other, ch.to_string(), pos),
        }
    }
}

fn unescape(esc: char) -> char {
    match esc {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_longest_match_operators() {
        assert_eq!(
            kinds("== = ** * ^^= ^^ ^= ^ .. . -> - ++ +="),
            vec![
                TokenKind::EqEq,
                TokenKind::Assign,
                TokenKind::StarStar,
                TokenKind::Star,
                TokenKind::CaretCaretEq,
                TokenKind::CaretCaret,
                TokenKind::CaretEq,
                TokenKind::Caret,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::PlusPlus,
                TokenKind::PlusEq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_idents_and_type_names() {
        assert_eq!(
            kinds("var x = Integer while whale"),
            vec![
                TokenKind::Var,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::TypeName,
                TokenKind::While,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("42 0xFF 3.14 1e3 2.5e-4 1..3");
        let got: Vec<_> = tokens.iter().map(|t| (t.kind, t.text.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (TokenKind::Integer, "42"),
                (TokenKind::Hex, "0xFF"),
                (TokenKind::Real, "3.14"),
                (TokenKind::Real, "1e3"),
                (TokenKind::Real, "2.5e-4"),
                (TokenKind::Integer, "1"),
                (TokenKind::DotDot, ".."),
                (TokenKind::Integer, "3"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = lex(r#"'it''s' "a\tb" $"x is {x}\n""#);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "it");
        assert_eq!(tokens[1].text, "s");
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].text, "a\tb");
        assert_eq!(tokens[3].kind, TokenKind::InterpStr);
        assert_eq!(tokens[3].text, "x is {x}\\n");
    }

    #[test]
    fn test_comments_discarded() {
        assert_eq!(
            kinds("1 // one\n2 # two\n3 /* three */ 4 /* multi\nline */ 5"),
            vec![
                TokenKind::Integer,
                TokenKind::Term,
                TokenKind::Integer,
                TokenKind::Term,
                TokenKind::Integer,
                TokenKind::Integer,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_terminators_collapse() {
        assert_eq!(
            kinds("a\n\n\nb;;c"),
            vec![
                TokenKind::Ident,
                TokenKind::Term,
                TokenKind::Ident,
                TokenKind::Term,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = lex("a\n  b");
        assert_eq!(tokens[0].pos, Pos::new(1, 1));
        assert_eq!(tokens[2].pos, Pos::new(2, 3));
    }

    #[test]
    fn test_unrecognised_character() {
        let tokens = lex("a @ b");
        assert_eq!(tokens[1].kind, TokenKind::Other);
        assert_eq!(tokens[1].text, "@");
    }
}
