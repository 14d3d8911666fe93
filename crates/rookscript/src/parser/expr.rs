//! Expression parsing: a shunting-yard-style operator-precedence climb,
//! lowest to highest exactly as ordered in the instruction-set design
//! notes — ternary/coalescing, `||`, `&&`, `|`, `^`, `&`, equality,
//! relational, shift, additive, multiplicative, unary, then postfix
//! (index/key/namespace/arrow). Equality and relational operators do not
//! associate: `a < b < c` is a single comparison followed by a leftover
//! operator, not a chain.

use super::Parser;
use crate::lexer::TokenKind;
use crate::opcode::{Label, Opcode};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AssignOp {
    Plain,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    fn to_opcode(self) -> Opcode {
        match self {
            Self::Plain => unreachable!("plain assignment has no arithmetic opcode"),
            Self::Add => Opcode::Add,
            Self::Sub => Opcode::Sub,
            Self::Mul => Opcode::Mul,
            Self::Div => Opcode::Div,
            Self::Mod => Opcode::Mod,
        }
    }
}

fn assign_op_from_kind(kind: &TokenKind) -> Option<AssignOp> {
    Some(match kind {
        TokenKind::Assign => AssignOp::Plain,
        TokenKind::PlusAssign => AssignOp::Add,
        TokenKind::MinusAssign => AssignOp::Sub,
        TokenKind::StarAssign => AssignOp::Mul,
        TokenKind::SlashAssign => AssignOp::Div,
        TokenKind::PercentAssign => AssignOp::Mod,
        _ => return None,
    })
}

impl Parser {
    pub(super) fn parse_expression(&mut self) {
        self.parse_ternary();
    }

    /// Decides, via a read-only lookahead scan, whether the current
    /// identifier-led statement is an assignment or a plain expression
    /// evaluated for effect, then dispatches.
    pub(super) fn parse_assignment_or_expression(&mut self) {
        if matches!(self.peek_kind(), TokenKind::Identifier(_)) && self.scan_for_assignment() {
            self.parse_identifier_led_assignment();
        } else {
            self.parse_expression();
            self.emit_check_error_if_needed();
            self.code.append(Opcode::Pop);
        }
    }

    fn scan_for_assignment(&self) -> bool {
        let mut depth = 0i32;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match &self.tokens[i].kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => return false,
                TokenKind::Eof => return false,
                k if depth == 0 && assign_op_from_kind(k).is_some() => return true,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn peek_assign_op(&self) -> Option<AssignOp> {
        assign_op_from_kind(self.peek_kind())
    }

    fn parse_identifier_led_assignment(&mut self) {
        let name = self.expect_identifier("a name");

        if self.matches(&TokenKind::DoubleColon) {
            let var = self.expect_identifier("a variable name");
            let op = self.peek_assign_op().unwrap_or(AssignOp::Plain);
            self.advance();
            if op != AssignOp::Plain {
                self.code.append(Opcode::PushScopeVariable(name.clone(), var.clone()));
            }
            self.parse_expression();
            self.emit_check_error_if_needed();
            if op != AssignOp::Plain {
                self.code.append(op.to_opcode());
            }
            self.code.append(Opcode::PopScopeVariable(name, var));
            return;
        }

        if let Some(op) = self.peek_assign_op() {
            self.advance();
            if op != AssignOp::Plain {
                self.code.append(Opcode::PushVariable(name.clone()));
            }
            self.parse_expression();
            self.emit_check_error_if_needed();
            if op != AssignOp::Plain {
                self.code.append(op.to_opcode());
            }
            self.code.append(Opcode::PopVariable(name));
            return;
        }

        // A container-accessor chain: read through every accessor but the
        // last, then write (or read-modify-write) through the last one.
        self.code.append(Opcode::PushVariable(name));
        loop {
            if self.matches(&TokenKind::LBracket) {
                self.parse_expression();
                self.expect(&TokenKind::RBracket, "`]`");
                if let Some(op) = self.peek_assign_op() {
                    self.advance();
                    self.emit_list_write(op);
                    return;
                }
                self.code.append(Opcode::PushListIndex);
            } else if self.matches(&TokenKind::Dot) {
                let key = self.expect_identifier("a field name");
                self.code.append(Opcode::Push(Value::string(key)));
                if let Some(op) = self.peek_assign_op() {
                    self.advance();
                    self.emit_map_write(op);
                    return;
                }
                self.code.append(Opcode::PushMapKey);
            } else {
                self.error("malformed assignment target");
                return;
            }
        }
    }

    fn emit_list_write(&mut self, op: AssignOp) {
        if op != AssignOp::Plain {
            self.code.append(Opcode::PushListIndexContents);
        }
        self.parse_expression();
        self.emit_check_error_if_needed();
        if op != AssignOp::Plain {
            self.code.append(op.to_opcode());
        }
        self.code.append(Opcode::PopList);
    }

    fn emit_map_write(&mut self, op: AssignOp) {
        if op != AssignOp::Plain {
            self.code.append(Opcode::PushMapKeyContents);
        }
        self.parse_expression();
        self.emit_check_error_if_needed();
        if op != AssignOp::Plain {
            self.code.append(op.to_opcode());
        }
        self.code.append(Opcode::PopMap);
    }

    fn parse_ternary(&mut self) {
        self.parse_null_coalesce();
        if self.matches(&TokenKind::Question) {
            let false_label = self.code.generate_label("ternary_false");
            let end_label = self.code.generate_label("ternary_end");
            self.code.append(Opcode::JumpFalse(Label::Named(false_label.clone())));
            self.parse_expression();
            self.expect(&TokenKind::Colon, "`:`");
            self.code.append(Opcode::Jump(Label::Named(end_label.clone())));
            self.place(&false_label);
            self.parse_expression();
            self.place(&end_label);
        }
    }

    fn parse_null_coalesce(&mut self) {
        self.parse_false_coalesce();
        while self.matches(&TokenKind::QuestionQuestion) {
            let end_label = self.code.generate_label("nullco_end");
            self.code.append(Opcode::JumpNullCoalesce(Label::Named(end_label.clone())));
            self.parse_false_coalesce();
            self.place(&end_label);
        }
    }

    fn parse_false_coalesce(&mut self) {
        self.parse_or();
        while self.matches(&TokenKind::QuestionColon) {
            let end_label = self.code.generate_label("falseco_end");
            self.code.append(Opcode::JumpFalseCoalesce(Label::Named(end_label.clone())));
            self.parse_or();
            self.place(&end_label);
        }
    }

    fn parse_or(&mut self) {
        self.parse_and();
        while self.matches(&TokenKind::PipePipe) {
            let true_label = self.code.generate_label("or_true");
            let end_label = self.code.generate_label("or_end");
            self.code.append(Opcode::JumpTrue(Label::Named(true_label.clone())));
            self.parse_and();
            self.code.append(Opcode::Jump(Label::Named(end_label.clone())));
            self.place(&true_label);
            self.code.append(Opcode::Push(Value::Bool(true)));
            self.place(&end_label);
        }
    }

    fn parse_and(&mut self) {
        self.parse_bit_or();
        while self.matches(&TokenKind::AmpAmp) {
            let false_label = self.code.generate_label("and_false");
            let end_label = self.code.generate_label("and_end");
            self.code.append(Opcode::JumpFalse(Label::Named(false_label.clone())));
            self.parse_bit_or();
            self.code.append(Opcode::Jump(Label::Named(end_label.clone())));
            self.place(&false_label);
            self.code.append(Opcode::Push(Value::Bool(false)));
            self.place(&end_label);
        }
    }

    fn parse_bit_or(&mut self) {
        self.parse_bit_xor();
        while self.matches(&TokenKind::Pipe) {
            self.parse_bit_xor();
            self.code.append(Opcode::BitOr);
        }
    }

    fn parse_bit_xor(&mut self) {
        self.parse_bit_and();
        while self.matches(&TokenKind::Caret) {
            self.parse_bit_and();
            self.code.append(Opcode::BitXor);
        }
    }

    fn parse_bit_and(&mut self) {
        self.parse_equality();
        while self.matches(&TokenKind::Amp) {
            self.parse_equality();
            self.code.append(Opcode::BitAnd);
        }
    }

    fn parse_equality(&mut self) {
        self.parse_relational();
        let op = match self.peek_kind() {
            TokenKind::EqEq => Some(Opcode::Equal),
            TokenKind::NotEq => Some(Opcode::NotEqual),
            TokenKind::EqEqEq => Some(Opcode::StrictEqual),
            TokenKind::NotEqEq => Some(Opcode::StrictNotEqual),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.parse_relational();
            self.code.append(op);
        }
    }

    fn parse_relational(&mut self) {
        self.parse_shift();
        let op = match self.peek_kind() {
            TokenKind::Lt => Some(Opcode::Less),
            TokenKind::Le => Some(Opcode::LessOrEqual),
            TokenKind::Gt => Some(Opcode::Greater),
            TokenKind::Ge => Some(Opcode::GreaterOrEqual),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.parse_shift();
            self.code.append(op);
        }
    }

    fn parse_shift(&mut self) {
        self.parse_additive();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Shl => Opcode::LeftShift,
                TokenKind::Shr => Opcode::RightShift,
                TokenKind::ShrUnsigned => Opcode::RightShiftPadded,
                _ => break,
            };
            self.advance();
            self.parse_additive();
            self.code.append(op);
        }
    }

    fn parse_additive(&mut self) {
        self.parse_multiplicative();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => Opcode::Add,
                TokenKind::Minus => Opcode::Sub,
                _ => break,
            };
            self.advance();
            self.parse_multiplicative();
            self.code.append(op);
        }
    }

    fn parse_multiplicative(&mut self) {
        self.parse_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => Opcode::Mul,
                TokenKind::Slash => Opcode::Div,
                TokenKind::Percent => Opcode::Mod,
                _ => break,
            };
            self.advance();
            self.parse_unary();
            self.code.append(op);
        }
    }

    fn parse_unary(&mut self) {
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(Opcode::LogicalNot),
            TokenKind::Tilde => Some(Opcode::Not),
            TokenKind::Minus => Some(Opcode::Negate),
            TokenKind::Plus => None, // unary plus is a no-op
            _ => {
                self.parse_postfix();
                return;
            }
        };
        let is_plus = matches!(self.peek_kind(), TokenKind::Plus);
        self.advance();
        self.parse_unary();
        if let Some(op) = op {
            self.code.append(op);
        } else if is_plus {
            // nothing to emit
        }
    }

    fn parse_postfix(&mut self) {
        self.parse_primary();
        loop {
            if self.matches(&TokenKind::LBracket) {
                self.parse_expression();
                self.expect(&TokenKind::RBracket, "`]`");
                self.code.append(Opcode::PushListIndex);
            } else if self.matches(&TokenKind::Dot) {
                let key = self.expect_identifier("a field name");
                self.code.append(Opcode::Push(Value::string(key)));
                self.code.append(Opcode::PushMapKey);
            } else if self.matches(&TokenKind::Arrow) {
                self.parse_partial_application_call();
            } else {
                break;
            }
        }
    }

    /// `expr -> f(args)` / `expr -> ns::f(args)`: the already-computed
    /// left-hand value sits on the stack as the call's first argument; the
    /// explicit arguments are pushed after it.
    fn parse_partial_application_call(&mut self) {
        let mut name = self.expect_identifier("a function name");
        let mut namespace = None;
        if self.matches(&TokenKind::DoubleColon) {
            namespace = Some(name);
            name = self.expect_identifier("a function name");
        }
        self.expect(&TokenKind::LParen, "`(`");
        let mut extra_args = 0u32;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.parse_expression();
                extra_args += 1;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "`)`");
        self.emit_call(&name, namespace.as_deref(), extra_args + 1);
    }

    fn parse_primary(&mut self) {
        match self.peek_kind().clone() {
            TokenKind::IntLiteral(i) => {
                self.advance();
                self.code.append(Opcode::Push(Value::Int(i)));
            }
            TokenKind::FloatLiteral(f) => {
                self.advance();
                self.code.append(Opcode::Push(Value::Float(f)));
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                self.code.append(Opcode::Push(Value::string(s)));
            }
            TokenKind::True => {
                self.advance();
                self.code.append(Opcode::Push(Value::Bool(true)));
            }
            TokenKind::False => {
                self.advance();
                self.code.append(Opcode::Push(Value::Bool(false)));
            }
            TokenKind::Null => {
                self.advance();
                self.code.append(Opcode::PushNull);
            }
            TokenKind::Infinity => {
                self.advance();
                self.code.append(Opcode::Push(Value::Float(f64::INFINITY)));
            }
            TokenKind::NaN => {
                self.advance();
                self.code.append(Opcode::Push(Value::Float(f64::NAN)));
            }
            TokenKind::LParen => {
                self.advance();
                self.parse_expression();
                self.expect(&TokenKind::RParen, "`)`");
            }
            TokenKind::LBracket => self.parse_list_literal(),
            TokenKind::LBrace => self.parse_map_literal(),
            TokenKind::Identifier(_) => self.parse_identifier_primary(),
            other => {
                self.error(format!("unexpected token {other:?}"));
                self.advance();
            }
        }
    }

    fn parse_list_literal(&mut self) {
        self.advance(); // `[`
        let mut count = 0i64;
        if !self.check(&TokenKind::RBracket) {
            loop {
                self.parse_expression();
                count += 1;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket, "`]`");
        self.code.append(Opcode::Push(Value::Int(count)));
        self.code.append(Opcode::PushListInit);
    }

    fn parse_map_literal(&mut self) {
        self.advance(); // `{`
        let mut count = 0i64;
        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = match self.peek_kind().clone() {
                    TokenKind::Identifier(name) => {
                        self.advance();
                        name
                    }
                    TokenKind::StringLiteral(s) => {
                        self.advance();
                        s
                    }
                    _ => {
                        self.error("expected a map key");
                        String::new()
                    }
                };
                self.code.append(Opcode::Push(Value::string(key)));
                self.expect(&TokenKind::Colon, "`:`");
                self.parse_expression();
                count += 1;
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "`}`");
        self.code.append(Opcode::Push(Value::Int(count)));
        self.code.append(Opcode::PushMapInit);
    }

    fn parse_identifier_primary(&mut self) {
        let name = self.expect_identifier("an identifier");
        if self.matches(&TokenKind::DoubleColon) {
            let var = self.expect_identifier("a name");
            if self.check(&TokenKind::LParen) {
                self.advance();
                let mut argc = 0u32;
                if !self.check(&TokenKind::RParen) {
                    loop {
                        self.parse_expression();
                        argc += 1;
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "`)`");
                self.emit_call(&var, Some(&name), argc);
            } else {
                self.code.append(Opcode::PushScopeVariable(name, var));
            }
            return;
        }
        if self.matches(&TokenKind::LParen) {
            let mut argc = 0u32;
            if !self.check(&TokenKind::RParen) {
                loop {
                    self.parse_expression();
                    argc += 1;
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "`)`");
            self.emit_call(&name, None, argc);
            return;
        }
        self.code.append(Opcode::PushVariable(name));
    }

    /// Emits a call, choosing `CALL` (a script-local function) over
    /// `CALL_HOST`/`CALL_HOST_NAMESPACE` based on whether `name` was seen as
    /// a `function` declaration anywhere in this source during the
    /// pre-scan. `arg_count` is informational only — the opcode itself
    /// carries no arity; the callee's prelude or the host resolver decides
    /// how many values to pop.
    fn emit_call(&mut self, name: &str, namespace: Option<&str>, arg_count: u32) {
        let _ = arg_count;
        if let Some(ns) = namespace {
            self.code.append(Opcode::CallHostNamespace(ns.to_string(), name.to_string()));
            return;
        }
        if self.known_functions.contains(&name.to_lowercase()) {
            let label = function_label(name);
            self.code.append(Opcode::Call(Label::Named(label)));
        } else {
            self.code.append(Opcode::CallHost(name.to_string()));
        }
    }
}

pub(super) fn function_label(name: &str) -> String {
    format!("$fn_{}", name.to_lowercase())
}
