//! Recursive-descent parser + emitter. Statements and declarations live
//! here; expression parsing (the shunting-yard-style precedence climb) is
//! in [`expr`]. The parser never builds an AST — it emits opcodes directly
//! into a [`Code`] as it walks the token stream, per the design notes'
//! "keep the backing command array append-only" guidance.

mod expr;

use std::collections::HashSet;

use crate::bytecode::{Code, EntryInfo};
use crate::error::Diagnostic;
use crate::lexer::{Keyword, Token, TokenKind};
use crate::opcode::{Label, Opcode};
use crate::value::Value;

fn scan_known_functions(tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Keyword(Keyword::Function) {
            if let Some(TokenKind::Identifier(name)) = tokens.get(i + 1).map(|t| &t.kind) {
                names.insert(name.to_lowercase());
            }
        }
        i += 1;
    }
    names
}

struct LoopContext {
    break_label: String,
    continue_label: String,
    checks_at_entry: u32,
}

/// Parser state: the token cursor, the `Code` being built, and the bits of
/// context a recursive-descent emitter needs to track across nested
/// constructs — open loops (for `break`/`continue`), open `check` blocks
/// (for error diversion and for computing how many check frames a
/// `break`/`continue`/`return` must unwind), and accumulated diagnostics.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    stream: String,
    code: Code,
    diagnostics: Vec<Diagnostic>,
    loops: Vec<LoopContext>,
    check_end_labels: Vec<String>,
    open_checks: u32,
    /// Lower-cased names of every `function` declared anywhere in this
    /// source, gathered by a pre-scan so a call site can tell a script
    /// function from a host function before that declaration has actually
    /// been parsed (functions may be called before their textual position).
    known_functions: HashSet<String>,
}

impl Parser {
    #[must_use]
    pub fn new(tokens: Vec<Token>, stream: impl Into<String>) -> Self {
        let known_functions = scan_known_functions(&tokens);
        Self {
            tokens,
            pos: 0,
            stream: stream.into(),
            code: Code::new(),
            diagnostics: Vec::new(),
            loops: Vec::new(),
            check_end_labels: Vec::new(),
            open_checks: 0,
            known_functions,
        }
    }

    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let tok = self.peek();
        self.diagnostics.push(Diagnostic {
            stream: self.stream.clone(),
            line: tok.line,
            column: tok.column,
            message: message.into(),
        });
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) {
        if !self.matches(kind) {
            self.error(format!("expected {what}, found {:?}", self.peek_kind()));
        }
    }

    fn expect_identifier(&mut self, what: &str) -> String {
        if let TokenKind::Identifier(name) = self.peek_kind().clone() {
            self.advance();
            name
        } else {
            self.error(format!("expected {what}"));
            String::new()
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    /// `script := (entryDecl | functionDecl)+`
    pub fn parse_script(&mut self) -> Code {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Keyword(Keyword::Entry) => self.parse_decl(true),
                TokenKind::Keyword(Keyword::Function) => self.parse_decl(false),
                _ => {
                    self.error("expected `entry` or `function` declaration");
                    self.advance();
                }
            }
        }
        std::mem::take(&mut self.code)
    }

    fn parse_decl(&mut self, is_entry: bool) {
        self.advance(); // `entry` / `function`
        let name = self.expect_identifier("a name");
        self.expect(&TokenKind::LParen, "`(`");
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_identifier("a parameter name"));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`");

        let start_index = self.code.next_index();
        if !is_entry {
            // Bind the call-target label right where the prelude begins, so
            // `CALL` lands before the parameter pops run.
            self.code.set_label(expr::function_label(&name), start_index);
        }
        // Prelude: pop already-pushed arguments into named locals, in
        // reverse parameter order (`§4.6`).
        for param in params.iter().rev() {
            self.code.append(Opcode::PopVariable(param.clone()));
        }

        self.open_checks = 0;
        self.parse_block();

        // Fall off the end of the body: implicit `return;`.
        self.code.append(Opcode::PushNull);
        self.code.append(Opcode::Return);

        let info = EntryInfo {
            param_count: params.len() as u32,
            start_index,
        };
        if is_entry {
            self.code.add_entry(name, info);
        } else {
            self.code.add_function(name, info);
        }
    }

    fn parse_block(&mut self) {
        self.expect(&TokenKind::LBrace, "`{`");
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            self.parse_statement();
        }
        self.expect(&TokenKind::RBrace, "`}`");
    }

    fn parse_statement(&mut self) {
        match self.peek_kind().clone() {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Each) => self.parse_each(),
            TokenKind::Keyword(Keyword::Check) => self.parse_check(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Break) => self.parse_break(),
            TokenKind::Keyword(Keyword::Continue) => self.parse_continue(),
            TokenKind::Semicolon => {
                self.advance();
            }
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_if(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`");
        self.parse_expression();
        self.expect(&TokenKind::RParen, "`)`");
        let false_label = self.code.generate_label("if_false");
        let end_label = self.code.generate_label("if_end");
        self.code.append(Opcode::JumpFalse(Label::Named(false_label.clone())));
        self.parse_statement();
        self.code.append(Opcode::Jump(Label::Named(end_label.clone())));
        self.place(&false_label);
        if self.matches(&TokenKind::Keyword(Keyword::Else)) {
            self.parse_statement();
        }
        self.place(&end_label);
    }

    fn place(&mut self, label: &str) {
        let idx = self.code.next_index();
        self.code.set_label(label.to_string(), idx);
    }

    fn parse_while(&mut self) {
        self.advance();
        let cond_label = self.code.generate_label("while_cond");
        let end_label = self.code.generate_label("while_end");
        self.place(&cond_label);
        self.expect(&TokenKind::LParen, "`(`");
        self.parse_expression();
        self.expect(&TokenKind::RParen, "`)`");
        self.code.append(Opcode::JumpFalse(Label::Named(end_label.clone())));
        self.loops.push(LoopContext {
            break_label: end_label.clone(),
            continue_label: cond_label.clone(),
            checks_at_entry: self.open_checks,
        });
        self.parse_statement();
        self.loops.pop();
        self.code.append(Opcode::Jump(Label::Named(cond_label)));
        self.place(&end_label);
    }

    fn parse_for(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`");
        if !self.check(&TokenKind::Semicolon) {
            self.parse_expr_statement_inner();
        }
        self.expect(&TokenKind::Semicolon, "`;`");
        let cond_label = self.code.generate_label("for_cond");
        let body_label = self.code.generate_label("for_body");
        let step_label = self.code.generate_label("for_step");
        let end_label = self.code.generate_label("for_end");

        self.place(&cond_label);
        if self.check(&TokenKind::Semicolon) {
            self.code.append(Opcode::Push(Value::Bool(true)));
        } else {
            self.parse_expression();
        }
        self.expect(&TokenKind::Semicolon, "`;`");
        self.code.append(Opcode::JumpBranch(
            Label::Named(body_label.clone()),
            Label::Named(end_label.clone()),
        ));

        self.place(&step_label);
        if !self.check(&TokenKind::RParen) {
            self.parse_expr_statement_inner();
        }
        self.expect(&TokenKind::RParen, "`)`");
        self.code.append(Opcode::Jump(Label::Named(cond_label)));

        self.place(&body_label);
        self.loops.push(LoopContext {
            break_label: end_label.clone(),
            continue_label: step_label.clone(),
            checks_at_entry: self.open_checks,
        });
        self.parse_statement();
        self.loops.pop();
        self.code.append(Opcode::Jump(Label::Named(step_label)));
        self.place(&end_label);
    }

    fn parse_each(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`");
        let first = self.expect_identifier("a variable name");
        let mut key_name = None;
        let mut value_name = first;
        if self.matches(&TokenKind::Comma) {
            key_name = Some(value_name);
            value_name = self.expect_identifier("a value variable name");
        }
        self.expect(&TokenKind::Colon, "`:`");
        self.parse_expression();
        self.expect(&TokenKind::RParen, "`)`");

        let hidden = self.code.generate_label("each_iter_var");
        self.code.append(Opcode::SetIteratorVariable(hidden.clone()));

        let step_label = self.code.generate_label("each_step");
        let end_label = self.code.generate_label("each_end");
        self.place(&step_label);
        self.code.append(Opcode::PushVariable(hidden));
        let has_key = key_name.is_some();
        self.code.append(Opcode::Iterate(Label::Named(end_label.clone()), has_key));
        self.code.append(Opcode::PopVariable(value_name));
        if let Some(key) = key_name {
            self.code.append(Opcode::PopVariable(key));
        }

        self.loops.push(LoopContext {
            break_label: end_label.clone(),
            continue_label: step_label.clone(),
            checks_at_entry: self.open_checks,
        });
        self.parse_statement();
        self.loops.pop();
        self.code.append(Opcode::Jump(Label::Named(step_label)));
        self.place(&end_label);
    }

    fn parse_check(&mut self) {
        self.advance();
        self.expect(&TokenKind::LParen, "`(`");
        let err_name = self.expect_identifier("an error variable name");
        self.expect(&TokenKind::RParen, "`)`");

        let end_label = self.code.generate_label("check_end");
        self.code.append(Opcode::PushCheck);
        self.check_end_labels.push(end_label.clone());
        self.open_checks += 1;

        self.parse_block_as_check_body();

        self.open_checks -= 1;
        self.check_end_labels.pop();
        self.code.append(Opcode::PushNull);
        self.place(&end_label);
        self.code.append(Opcode::PopCheck(1, true));
        self.code.append(Opcode::PopVariable(err_name));
    }

    fn parse_block_as_check_body(&mut self) {
        self.expect(&TokenKind::LBrace, "`{`");
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            self.parse_statement();
        }
        self.expect(&TokenKind::RBrace, "`}`");
    }

    /// Emits the `POP_CHECK(depth, keep_result)` needed to unwind any check
    /// frames opened since `target_depth` (a loop's or the function's entry
    /// `open_checks` count), if any are open.
    fn unwind_checks(&mut self, target_depth: u32, keep_result: bool) {
        if self.open_checks > target_depth {
            let depth = self.open_checks - target_depth;
            self.code.append(Opcode::PopCheck(depth, keep_result));
        }
    }

    fn parse_return(&mut self) {
        self.advance();
        if self.check(&TokenKind::Semicolon) {
            self.code.append(Opcode::PushNull);
        } else {
            self.parse_expression();
        }
        self.matches(&TokenKind::Semicolon);
        self.unwind_checks(0, true);
        self.code.append(Opcode::Return);
    }

    fn parse_break(&mut self) {
        self.advance();
        self.matches(&TokenKind::Semicolon);
        match self.loops.last() {
            Some(ctx) => {
                let (label, checks_at_entry) = (ctx.break_label.clone(), ctx.checks_at_entry);
                self.unwind_checks(checks_at_entry, false);
                self.code.append(Opcode::Jump(Label::Named(label)));
            }
            None => self.error("`break` outside of a loop"),
        }
    }

    fn parse_continue(&mut self) {
        self.advance();
        self.matches(&TokenKind::Semicolon);
        match self.loops.last() {
            Some(ctx) => {
                let (label, checks_at_entry) = (ctx.continue_label.clone(), ctx.checks_at_entry);
                self.unwind_checks(checks_at_entry, false);
                self.code.append(Opcode::Jump(Label::Named(label)));
            }
            None => self.error("`continue` outside of a loop"),
        }
    }

    /// A bare expression statement: evaluate for effect, divert on error if
    /// inside a `check` block, then discard the result.
    fn parse_expr_statement(&mut self) {
        self.parse_expr_statement_inner();
        self.matches(&TokenKind::Semicolon);
    }

    fn parse_expr_statement_inner(&mut self) {
        self.parse_assignment_or_expression();
    }

    fn current_check_end_label(&self) -> Option<String> {
        self.check_end_labels.last().cloned()
    }

    fn emit_check_error_if_needed(&mut self) {
        if let Some(label) = self.current_check_end_label() {
            self.code.append(Opcode::CheckError(Label::Named(label)));
        }
    }
}
