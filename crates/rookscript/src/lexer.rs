//! Tokenizer: turns source text into a flat stream of [`Token`]s, handling
//! `#include` directives by delegating to an [`Includer`] and pushing the
//! current reader onto a stack while the included stream is active.

use std::io::Read;

use crate::error::Diagnostic;
use crate::host::Includer;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    True,
    False,
    Null,
    Infinity,
    NaN,

    // punctuation / operators
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    DoubleColon,
    Dot,
    Semicolon,
    Arrow, // ->
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    ShrUnsigned,
    Bang,
    AmpAmp,
    PipePipe,
    QuestionQuestion,
    QuestionColon,
    Question,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,

    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    For,
    Each,
    Check,
    Entry,
    Function,
    Return,
    Break,
    Continue,
}

fn keyword_from_str(s: &str) -> Option<Keyword> {
    Some(match s.to_lowercase().as_str() {
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "while" => Keyword::While,
        "for" => Keyword::For,
        "each" => Keyword::Each,
        "check" => Keyword::Check,
        "entry" => Keyword::Entry,
        "function" => Keyword::Function,
        "return" => Keyword::Return,
        "break" => Keyword::Break,
        "continue" => Keyword::Continue,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub stream: String,
    pub line: u32,
    pub column: u32,
}

struct StreamState {
    name: String,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl StreamState {
    fn new(name: String, source: String) -> Self {
        Self {
            name,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

/// Tokenizes one or more streams (the root source plus any `#include`d
/// files) into a single flat token sequence. Errors accumulate rather than
/// aborting, so a `CompileError` can report every problem found.
pub struct Lexer<'a> {
    stack: Vec<StreamState>,
    includer: &'a dyn Includer,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(stream_name: impl Into<String>, source: impl Into<String>, includer: &'a dyn Includer) -> Self {
        Self {
            stack: vec![StreamState::new(stream_name.into(), source.into())],
            includer,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn error(&mut self, line: u32, column: u32, message: impl Into<String>) {
        let stream = self.stack.last().map(|s| s.name.clone()).unwrap_or_default();
        self.diagnostics.push(Diagnostic {
            stream,
            line,
            column,
            message: message.into(),
        });
    }

    /// Tokenizes everything, returning the full token stream (always ending
    /// with `Eof`) and any accumulated diagnostics.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            match self.next_token() {
                Some(tok) => {
                    let is_eof = tok.kind == TokenKind::Eof;
                    tokens.push(tok);
                    if is_eof {
                        break;
                    }
                }
                None => break,
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Option<Token> {
        loop {
            self.skip_whitespace_and_comments();
            if self.handle_include() {
                continue;
            }
            let Some(state) = self.stack.last() else {
                return Some(Token {
                    kind: TokenKind::Eof,
                    stream: String::new(),
                    line: 0,
                    column: 0,
                });
            };
            let Some(c) = state.peek() else {
                if self.stack.len() > 1 {
                    self.stack.pop();
                    continue;
                }
                return Some(Token {
                    kind: TokenKind::Eof,
                    stream: state.name.clone(),
                    line: state.line,
                    column: state.column,
                });
            };
            return Some(self.lex_one(c));
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            let Some(state) = self.stack.last_mut() else { return };
            match state.peek() {
                Some(c) if c.is_whitespace() => {
                    state.advance();
                }
                Some('/') if state.peek_at(1) == Some('/') => {
                    while let Some(c) = state.peek() {
                        if c == '\n' {
                            break;
                        }
                        state.advance();
                    }
                }
                Some('/') if state.peek_at(1) == Some('*') => {
                    state.advance();
                    state.advance();
                    while let Some(c) = state.peek() {
                        if c == '*' && state.peek_at(1) == Some('/') {
                            state.advance();
                            state.advance();
                            break;
                        }
                        state.advance();
                    }
                }
                _ => return,
            }
        }
    }

    /// Recognizes and consumes a `#include "path"` directive, pushing the
    /// resolved stream onto the include stack. Returns `true` if one was
    /// consumed, so the caller re-enters whitespace skipping on the new top.
    fn handle_include(&mut self) -> bool {
        let Some(state) = self.stack.last() else { return false };
        if state.peek() != Some('#') {
            return false;
        }
        let rest: String = state.chars[state.pos..].iter().collect();
        if !rest.starts_with("#include") {
            return false;
        }
        let (line, column, current_name) = (state.line, state.column, state.name.clone());
        {
            let state = self.stack.last_mut().unwrap();
            for _ in 0.."#include".len() {
                state.advance();
            }
        }
        self.skip_inline_whitespace();
        let path = match self.lex_string_literal_raw() {
            Some(p) => p,
            None => {
                self.error(line, column, "expected a quoted path after #include");
                return true;
            }
        };
        match self.includer.resolve_path(&current_name, &path) {
            Ok(canonical) => match self.includer.open(&canonical) {
                Ok(mut reader) => {
                    let mut contents = String::new();
                    if reader.read_to_string(&mut contents).is_err() {
                        self.error(line, column, format!("failed to read included file `{canonical}`"));
                        return true;
                    }
                    self.stack.push(StreamState::new(canonical, contents));
                }
                Err(e) => self.error(line, column, e.to_string()),
            },
            Err(e) => self.error(line, column, e.to_string()),
        }
        true
    }

    fn skip_inline_whitespace(&mut self) {
        let Some(state) = self.stack.last_mut() else { return };
        while let Some(c) = state.peek() {
            if c == ' ' || c == '\t' {
                state.advance();
            } else {
                break;
            }
        }
    }

    fn lex_string_literal_raw(&mut self) -> Option<String> {
        let state = self.stack.last_mut()?;
        if state.peek() != Some('"') {
            return None;
        }
        state.advance();
        let mut out = String::new();
        loop {
            match state.advance() {
                Some('"') => break,
                Some(c) => out.push(c),
                None => return None,
            }
        }
        Some(out)
    }

    fn lex_one(&mut self, c: char) -> Token {
        let state = self.stack.last().unwrap();
        let (line, column, stream) = (state.line, state.column, state.name.clone());

        if c.is_ascii_digit() {
            return self.lex_number(stream, line, column);
        }
        if c == '"' {
            return self.lex_string(stream, line, column);
        }
        if c.is_alphabetic() || c == '_' {
            return self.lex_identifier(stream, line, column);
        }
        self.lex_operator(stream, line, column)
    }

    fn lex_number(&mut self, stream: String, line: u32, column: u32) -> Token {
        let state = self.stack.last_mut().unwrap();
        let mut text = String::new();

        if state.peek() == Some('0') && matches!(state.peek_at(1), Some('x') | Some('X')) {
            text.push(state.advance().unwrap());
            text.push(state.advance().unwrap());
            while let Some(c) = state.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    state.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&text[2..], 16).unwrap_or(0);
            return Token { kind: TokenKind::IntLiteral(value), stream, line, column };
        }

        let mut is_float = false;
        while let Some(c) = state.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                state.advance();
            } else {
                break;
            }
        }
        if state.peek() == Some('.') && state.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push(state.advance().unwrap());
            while let Some(c) = state.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    state.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(state.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push(state.advance().unwrap());
            if matches!(state.peek(), Some('+') | Some('-')) {
                text.push(state.advance().unwrap());
            }
            while let Some(c) = state.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    state.advance();
                } else {
                    break;
                }
            }
        }

        if is_float {
            let value = text.parse::<f64>().unwrap_or(f64::NAN);
            Token { kind: TokenKind::FloatLiteral(value), stream, line, column }
        } else {
            let value = text.parse::<i64>().unwrap_or(0);
            Token { kind: TokenKind::IntLiteral(value), stream, line, column }
        }
    }

    fn lex_string(&mut self, stream: String, line: u32, column: u32) -> Token {
        let state = self.stack.last_mut().unwrap();
        state.advance(); // opening quote
        let mut out = String::new();
        loop {
            match state.advance() {
                Some('"') | None => break,
                Some('\\') => match state.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('\'') => out.push('\''),
                    Some(other) => out.push(other),
                    None => break,
                },
                Some(c) => out.push(c),
            }
        }
        Token { kind: TokenKind::StringLiteral(out), stream, line, column }
    }

    fn lex_identifier(&mut self, stream: String, line: u32, column: u32) -> Token {
        let state = self.stack.last_mut().unwrap();
        let mut text = String::new();
        while let Some(c) = state.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                state.advance();
            } else {
                break;
            }
        }
        let kind = match text.to_lowercase().as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "infinity" => TokenKind::Infinity,
            "nan" => TokenKind::NaN,
            _ => match keyword_from_str(&text) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Identifier(text),
            },
        };
        Token { kind, stream, line, column }
    }

    fn lex_operator(&mut self, stream: String, line: u32, column: u32) -> Token {
        let state = self.stack.last_mut().unwrap();
        let c = state.advance().unwrap();
        macro_rules! two {
            ($next:expr, $then:expr, $else_:expr) => {{
                if state.peek() == Some($next) {
                    state.advance();
                    $then
                } else {
                    $else_
                }
            }};
        }
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            ':' => two!(':', TokenKind::DoubleColon, TokenKind::Colon),
            '+' => two!('=', TokenKind::PlusAssign, TokenKind::Plus),
            '-' => {
                if state.peek() == Some('>') {
                    state.advance();
                    TokenKind::Arrow
                } else {
                    two!('=', TokenKind::MinusAssign, TokenKind::Minus)
                }
            }
            '*' => two!('=', TokenKind::StarAssign, TokenKind::Star),
            '/' => two!('=', TokenKind::SlashAssign, TokenKind::Slash),
            '%' => two!('=', TokenKind::PercentAssign, TokenKind::Percent),
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,
            '&' => two!('&', TokenKind::AmpAmp, TokenKind::Amp),
            '|' => two!('|', TokenKind::PipePipe, TokenKind::Pipe),
            '!' => two!('=', {
                if state.peek() == Some('=') {
                    state.advance();
                    TokenKind::NotEqEq
                } else {
                    TokenKind::NotEq
                }
            }, TokenKind::Bang),
            '=' => two!('=', {
                if state.peek() == Some('=') {
                    state.advance();
                    TokenKind::EqEqEq
                } else {
                    TokenKind::EqEq
                }
            }, TokenKind::Assign),
            '<' => two!('<', TokenKind::Shl, two!('=', TokenKind::Le, TokenKind::Lt)),
            '>' => {
                if state.peek() == Some('>') {
                    state.advance();
                    if state.peek() == Some('>') {
                        state.advance();
                        TokenKind::ShrUnsigned
                    } else {
                        TokenKind::Shr
                    }
                } else {
                    two!('=', TokenKind::Ge, TokenKind::Gt)
                }
            }
            '?' => {
                if state.peek() == Some('?') {
                    state.advance();
                    TokenKind::QuestionQuestion
                } else if state.peek() == Some(':') {
                    state.advance();
                    TokenKind::QuestionColon
                } else {
                    TokenKind::Question
                }
            }
            other => {
                self.error(line, column, format!("unexpected character `{other}`"));
                TokenKind::Eof
            }
        };
        Token { kind, stream, line, column }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullIncluder;

    fn tokens_of(src: &str) -> Vec<TokenKind> {
        let includer = NullIncluder;
        let (toks, diags) = Lexer::new("test", src, &includer).tokenize();
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers() {
        let kinds = tokens_of("1 2.5 0x1F 1e3");
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::FloatLiteral(2.5),
                TokenKind::IntLiteral(31),
                TokenKind::FloatLiteral(1000.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_escapes() {
        let kinds = tokens_of(r#""a\nb""#);
        assert_eq!(kinds, vec![TokenKind::StringLiteral("a\nb".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn lexes_keywords_case_insensitively() {
        let kinds = tokens_of("IF Entry");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::Entry),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_partial_application_arrow() {
        let kinds = tokens_of("a->b()");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Arrow,
                TokenKind::Identifier("b".to_string()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }
}
