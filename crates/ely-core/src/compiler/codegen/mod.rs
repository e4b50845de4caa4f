//! Single-pass code generation.
//!
//! The `Compiler` consumes tokens on demand and emits directly into a
//! [`Program`] while parsing - there is no AST. Expressions are parsed with
//! Pratt precedence climbing over the rule table in [`crate::compiler::rules`];
//! control flow reserves placeholder jump operands and backpatches them once
//! the target offset is known. Each `function` body is compiled in a fresh
//! [`FunctionCtx`] chained to its enclosing context, which is how free
//! variables become upvalue captures.

mod scope;

#[cfg(test)]
mod tests;

pub use scope::{FunctionCtx, Local, UpvalueRef};

use std::rc::Rc;

use tracing::debug;

use crate::compiler::program::{Element, Op, Program};
use crate::compiler::rules::{rule_for, Infix, Precedence, Prefix};
use crate::error::{diagnostic, Error, Result};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::runtime::function::Function;

/// Compiles Ely source to a [`Program`].
pub struct Compiler<'src> {
    source: &'src str,
    scanner: Scanner<'src>,
    current: Token,
    previous: Token,
    ctx: Box<FunctionCtx>,
    diagnostics: Vec<String>,
}

impl<'src> Compiler<'src> {
    /// Creates a compiler for the given source.
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            scanner: Scanner::new(source),
            current: Token::eof(),
            previous: Token::eof(),
            ctx: Box::new(FunctionCtx::script()),
            diagnostics: Vec::new(),
        }
    }

    /// Compiles the whole source, returning the top-level program.
    ///
    /// Fatals are caught at statement granularity: the diagnostic is
    /// recorded, the token stream is synchronised to the next statement
    /// boundary, and compilation continues. If anything was recorded the
    /// compilation as a whole fails.
    pub fn compile(mut self) -> Result<Program> {
        if let Err(err) = self.advance() {
            self.report(err);
            self.synchronize();
        }
        while !self.check(&TokenKind::Eof) {
            self.statement_with_recovery();
        }
        self.emit_op(Op::Halt);

        if self.diagnostics.is_empty() {
            Ok(std::mem::take(&mut self.ctx.program))
        } else {
            Err(Error::parse(self.diagnostics.join("\n")))
        }
    }

    // ========================================================================
    // Token cursor
    // ========================================================================

    fn advance(&mut self) -> Result<()> {
        let next = self.scanner.next_token()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn matches(&mut self, kind: &TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error_at_current(&format!("{message}, found {}", self.current.kind)))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> Result<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error_at_current(&format!("{message}, found {}", self.current.kind)))
        }
    }

    fn error_at(&self, token: &Token, message: &str) -> Error {
        Error::parse(diagnostic(self.source, token.line, token.column, message))
    }

    fn error_at_current(&self, message: &str) -> Error {
        self.error_at(&self.current, message)
    }

    fn error_at_previous(&self, message: &str) -> Error {
        self.error_at(&self.previous, message)
    }

    // ========================================================================
    // Error recovery
    // ========================================================================

    fn statement_with_recovery(&mut self) {
        if let Err(err) = self.statement() {
            self.report(err);
            self.synchronize();
        }
    }

    fn report(&mut self, err: Error) {
        debug!("compile error: {err}");
        self.diagnostics.push(err.to_string());
    }

    /// Skips tokens until a statement boundary: a statement-start keyword,
    /// or just past a `do`/`then`.
    fn synchronize(&mut self) {
        loop {
            if self.check(&TokenKind::Eof) || self.current.kind.starts_statement() {
                break;
            }
            let past_block_opener = self.check(&TokenKind::Do) || self.check(&TokenKind::Then);
            // Lex errors inside the skipped region are dropped; the scanner
            // has already consumed the offending character.
            let _ = self.advance();
            if past_block_opener {
                break;
            }
        }
    }

    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn emit(&mut self, element: Element) -> usize {
        self.ctx.program.emit(element)
    }

    fn emit_op(&mut self, op: Op) -> usize {
        self.emit(Element::Op(op))
    }

    /// Emits a jump with a placeholder operand, returning the operand index
    /// for later patching.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit(Element::Number(0.0))
    }

    /// Points a reserved jump operand at the current end of the program.
    fn patch_jump(&mut self, operand: usize) {
        let dest = self.ctx.program.len();
        self.ctx.program.patch_jump(operand, dest);
    }

    // ========================================================================
    // Scopes and variables
    // ========================================================================

    fn begin_scope(&mut self) {
        self.ctx.scope_depth += 1;
    }

    /// Ends the innermost scope, emitting one `Pop` per local declared in it.
    fn end_scope(&mut self) -> Result<()> {
        if self.ctx.scope_depth == 0 {
            return Err(Error::Compile("ended a scope with no parent".to_string()));
        }
        while self
            .ctx
            .locals
            .last()
            .is_some_and(|local| local.depth >= self.ctx.scope_depth)
        {
            self.ctx.locals.pop();
            self.emit_op(Op::Pop);
        }
        self.ctx.scope_depth -= 1;
        Ok(())
    }

    /// Records a new local whose value is already on the stack.
    fn declare_local(&mut self, name: &str) -> Result<usize> {
        for local in self.ctx.locals.iter().rev() {
            if local.depth < self.ctx.scope_depth {
                break;
            }
            if local.name == name {
                return Err(
                    self.error_at_previous(&format!("'{name}' already declared in this scope"))
                );
            }
        }
        self.ctx.locals.push(Local {
            name: name.to_string(),
            depth: self.ctx.scope_depth,
            is_captured: false,
        });
        Ok(self.ctx.locals.len() - 1)
    }

    /// Declares `name` with its value on top of the stack: a global at scope
    /// depth 0, a new local slot otherwise.
    fn define_variable(&mut self, name: &str) -> Result<()> {
        if self.ctx.scope_depth == 0 {
            self.emit_op(Op::DefineGlobal);
            self.emit(Element::String(name.to_string()));
        } else {
            self.declare_local(name)?;
        }
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> Result<()> {
        if self.matches(&TokenKind::Var)? {
            self.var_declaration()
        } else if self.matches(&TokenKind::While)? {
            self.while_statement()
        } else if self.matches(&TokenKind::If)? {
            self.if_statement()
        } else if self.matches(&TokenKind::Function)? {
            self.function_statement()
        } else if self.matches(&TokenKind::Return)? {
            self.return_statement()
        } else {
            self.expression()
        }
    }

    fn var_declaration(&mut self) -> Result<()> {
        let name = self.expect_identifier("expected variable name")?;
        if self.matches(&TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit_op(Op::Null);
        }
        self.define_variable(&name)
    }

    fn while_statement(&mut self) -> Result<()> {
        let loop_start = self.ctx.program.len();
        self.expression()?;
        self.expect(&TokenKind::Do, "expected 'do' after loop condition")?;
        let exit_jump = self.emit_jump(Op::JumpIfFalse);

        self.begin_scope();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.statement_with_recovery();
        }
        self.end_scope()?;
        self.expect(&TokenKind::End, "expected 'end' after loop body")?;

        self.emit_op(Op::Jump);
        self.emit(Element::Number(loop_start as f64));
        self.patch_jump(exit_jump);
        Ok(())
    }

    /// Compiles from just after `if` (or `elseif`, which recurses here).
    fn if_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.expect(&TokenKind::Then, "expected 'then' after condition")?;
        let then_jump = self.emit_jump(Op::JumpIfFalse);

        self.begin_scope();
        while !self.check(&TokenKind::End)
            && !self.check(&TokenKind::Else)
            && !self.check(&TokenKind::ElseIf)
            && !self.check(&TokenKind::Eof)
        {
            self.statement_with_recovery();
        }
        self.end_scope()?;

        if self.matches(&TokenKind::ElseIf)? {
            let end_jump = self.emit_jump(Op::Jump);
            self.patch_jump(then_jump);
            self.if_statement()?;
            self.patch_jump(end_jump);
        } else if self.matches(&TokenKind::Else)? {
            let end_jump = self.emit_jump(Op::Jump);
            self.patch_jump(then_jump);
            self.begin_scope();
            while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
                self.statement_with_recovery();
            }
            self.end_scope()?;
            self.expect(&TokenKind::End, "expected 'end' after else branch")?;
            self.patch_jump(end_jump);
        } else {
            self.expect(&TokenKind::End, "expected 'end' after if body")?;
            self.patch_jump(then_jump);
        }
        Ok(())
    }

    fn function_statement(&mut self) -> Result<()> {
        let name = self.expect_identifier("expected function name")?;
        let (constant, upvalues) = self.function_body(Some(name.clone()))?;
        self.emit_closure(constant, &upvalues);
        self.define_variable(&name)
    }

    fn return_statement(&mut self) -> Result<()> {
        let bare = matches!(
            self.current.kind,
            TokenKind::End | TokenKind::Else | TokenKind::ElseIf | TokenKind::Eof
        ) || self.current.kind.starts_statement();

        let count = if bare {
            0.0
        } else {
            self.expression()?;
            1.0
        };
        self.emit_op(Op::Return);
        self.emit(Element::Number(count));
        Ok(())
    }

    // ========================================================================
    // Function bodies
    // ========================================================================

    /// Compiles `(params) ... end` in a nested context, returning the
    /// function constant and its upvalue descriptors.
    fn function_body(&mut self, name: Option<String>) -> Result<(Rc<Function>, Vec<UpvalueRef>)> {
        let enclosing = std::mem::replace(&mut self.ctx, Box::new(FunctionCtx::function(name)));
        self.ctx.parent = Some(enclosing);

        let body = self.function_body_inner();
        // Every function body ends with an implicit bare return.
        self.emit_op(Op::Return);
        self.emit(Element::Number(0.0));

        let parent = self.ctx.parent.take().expect("function context always has a parent");
        let ctx = std::mem::replace(&mut self.ctx, parent);
        body?;

        let constant = Rc::new(Function {
            name: ctx.name,
            arity: ctx.arity,
            program: Rc::new(ctx.program),
            upvalue_count: ctx.upvalues.len(),
            upvalues: Vec::new(),
        });
        Ok((constant, ctx.upvalues))
    }

    fn function_body_inner(&mut self) -> Result<()> {
        self.expect(&TokenKind::LParen, "expected '(' before parameters")?;
        if !self.check(&TokenKind::RParen) {
            loop {
                let param = self.expect_identifier("expected parameter name")?;
                self.ctx.arity += 1;
                self.declare_local(&param)?;
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "expected ')' after parameters")?;

        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.statement_with_recovery();
        }
        self.expect(&TokenKind::End, "expected 'end' after function body")
    }

    fn emit_closure(&mut self, constant: Rc<Function>, upvalues: &[UpvalueRef]) {
        self.emit_op(Op::Closure);
        self.emit(Element::Function(constant));
        for upvalue in upvalues {
            self.emit(Element::Bool(upvalue.is_local));
            self.emit(Element::Number(upvalue.index as f64));
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, level: Precedence) -> Result<()> {
        self.advance()?;
        let Some(prefix) = rule_for(&self.previous.kind).prefix else {
            return Err(self.error_at_previous(&format!("unexpected token {}", self.previous.kind)));
        };
        let can_assign = level <= Precedence::Assignment;
        self.dispatch_prefix(prefix, can_assign)?;

        while rule_for(&self.current.kind).precedence >= level {
            self.advance()?;
            let Some(infix) = rule_for(&self.previous.kind).infix else {
                return Err(self.error_at_previous(&format!("invalid operator {}", self.previous.kind)));
            };
            self.dispatch_infix(infix)?;
        }
        Ok(())
    }

    fn dispatch_prefix(&mut self, prefix: Prefix, can_assign: bool) -> Result<()> {
        match prefix {
            Prefix::Number => self.number(),
            Prefix::Literal => self.literal(),
            Prefix::Identifier => self.identifier(can_assign),
            Prefix::Grouping => self.grouping(),
            Prefix::List => self.list(),
            Prefix::HashTable => self.hash_table(),
            Prefix::Unary => self.unary(),
            Prefix::Function => self.function_expression(),
        }
    }

    fn dispatch_infix(&mut self, infix: Infix) -> Result<()> {
        match infix {
            Infix::Binary => self.binary(),
            Infix::Call => self.call(),
            Infix::Subscript => self.subscript(),
        }
    }

    fn number(&mut self) -> Result<()> {
        let TokenKind::Number(text) = &self.previous.kind else {
            unreachable!("number rule on non-number token");
        };
        let value = parse_number(text);
        self.emit_op(Op::PushImmediate);
        self.emit(Element::Number(value));
        Ok(())
    }

    fn literal(&mut self) -> Result<()> {
        let element = match &self.previous.kind {
            TokenKind::String(s) => Element::String(s.clone()),
            TokenKind::True => Element::Bool(true),
            TokenKind::False => Element::Bool(false),
            _ => unreachable!("literal rule on non-literal token"),
        };
        self.emit_op(Op::PushImmediate);
        self.emit(element);
        Ok(())
    }

    /// Variable read, or write when followed by `=` in assignment position.
    /// Resolution order: local, then upvalue chain, then global.
    fn identifier(&mut self, can_assign: bool) -> Result<()> {
        let TokenKind::Identifier(name) = self.previous.kind.clone() else {
            unreachable!("identifier rule on non-identifier token");
        };
        let is_assignment = can_assign && self.matches(&TokenKind::Equal)?;
        if is_assignment {
            self.expression()?;
        }

        if let Some(slot) = self.ctx.resolve_local(&name, false) {
            self.emit_op(if is_assignment { Op::SetLocal } else { Op::GetLocal });
            self.emit(Element::Number(slot as f64));
        } else if let Some(index) = self.ctx.resolve_upvalue(&name) {
            self.emit_op(if is_assignment { Op::SetUpvalue } else { Op::GetUpvalue });
            self.emit(Element::Number(index as f64));
        } else {
            self.emit_op(if is_assignment { Op::SetGlobal } else { Op::GetGlobal });
            self.emit(Element::String(name));
        }
        Ok(())
    }

    fn grouping(&mut self) -> Result<()> {
        self.expression()?;
        self.expect(&TokenKind::RParen, "expected ')' after expression")
    }

    /// `[e, ...]` compiles to indexed key/value pairs and `CreateHT`.
    fn list(&mut self) -> Result<()> {
        let mut count: usize = 0;
        if !self.check(&TokenKind::RSquare) {
            loop {
                self.emit_op(Op::PushImmediate);
                self.emit(Element::String(count.to_string()));
                self.expression()?;
                count += 1;
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RSquare, "expected ']' after list elements")?;
        self.emit_op(Op::CreateHT);
        self.emit(Element::Number(count as f64));
        Ok(())
    }

    /// `{"k": e, ...}`
    fn hash_table(&mut self) -> Result<()> {
        let mut count: usize = 0;
        if !self.check(&TokenKind::RCurly) {
            loop {
                let key = match &self.current.kind {
                    TokenKind::String(key) => key.clone(),
                    other => {
                        return Err(
                            self.error_at_current(&format!("expected string key, found {other}"))
                        );
                    }
                };
                self.advance()?;
                self.emit_op(Op::PushImmediate);
                self.emit(Element::String(key));
                self.expect(&TokenKind::Colon, "expected ':' after key")?;
                self.expression()?;
                count += 1;
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RCurly, "expected '}' after hash table entries")?;
        self.emit_op(Op::CreateHT);
        self.emit(Element::Number(count as f64));
        Ok(())
    }

    fn unary(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Unary)?;
        self.emit_op(Op::Not);
        Ok(())
    }

    fn function_expression(&mut self) -> Result<()> {
        let (constant, upvalues) = self.function_body(None)?;
        self.emit_closure(constant, &upvalues);
        Ok(())
    }

    fn binary(&mut self) -> Result<()> {
        let operator = self.previous.kind.clone();
        self.parse_precedence(rule_for(&operator).precedence)?;
        match operator {
            TokenKind::Plus => self.emit_op(Op::Add),
            TokenKind::Minus => self.emit_op(Op::Sub),
            TokenKind::Star => self.emit_op(Op::Multiply),
            TokenKind::Slash => self.emit_op(Op::Divide),
            TokenKind::Greater => self.emit_op(Op::Greater),
            TokenKind::Less => self.emit_op(Op::Less),
            TokenKind::EqualEqual => self.emit_op(Op::Equal),
            TokenKind::BangEqual => {
                self.emit_op(Op::Equal);
                self.emit_op(Op::Not)
            }
            TokenKind::And => self.emit_op(Op::And),
            TokenKind::Or => self.emit_op(Op::Or),
            other => return Err(self.error_at_previous(&format!("invalid operator {other}"))),
        };
        Ok(())
    }

    /// `callee(args...)` with the callee already on the stack.
    fn call(&mut self) -> Result<()> {
        let mut argc: usize = 0;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.expression()?;
                argc += 1;
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "expected ')' after arguments")?;
        self.emit_op(Op::Call);
        self.emit(Element::Number(argc as f64));
        Ok(())
    }

    /// `table[key]` with the table already on the stack.
    fn subscript(&mut self) -> Result<()> {
        self.expression()?;
        self.expect(&TokenKind::RSquare, "expected ']' after subscript")?;
        self.emit_op(Op::GetHT);
        Ok(())
    }
}

/// Converts a scanned number literal with parseFloat semantics: the longest
/// prefix that forms a valid number wins, so `1.2.3` is 1.2.
fn parse_number(text: &str) -> f64 {
    for end in (1..=text.len()).rev() {
        if let Ok(n) = text[..end].parse::<f64>() {
            return n;
        }
    }
    0.0
}
