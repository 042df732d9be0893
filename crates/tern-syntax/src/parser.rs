//! Precedence-driven expression parser.
//!
//! Expressions are built bottom-up by precedence climbing over the fixed
//! table in [`crate::op`]; runs of chainable operators at one level fold
//! into a single `Chain` node. Comma builds lists contextually
//! (parenthesized lists, call arguments, array literals, iterator lists)
//! rather than acting as a folding binary operator. Braced constructs
//! (`if`, `while`, `for`, `case`, `struct`, `enum`, `flags`, blocks) are
//! parsed where their keyword appears in prefix position.
//!
//! Mismatches log to the error log and the parse continues with a best
//! guess; the classic `=`-for-`==` slip in a condition is rewritten to the
//! corrected AST.

use tern_core::diag::{ErrorLog, Stage};
use tern_core::id::NodeId;
use tern_core::source::Span;
use tern_core::types::PrimKind;

use crate::ast::{Ast, BinOp, ChainOp, DeclKind, JumpKind, NodeKind, TermValue, UnOp};
use crate::op::{infix, prec, Assoc, Op};
use crate::token::{Kw, Token, TokenKind};

/// Parses a token stream into an AST arena; returns the arena and the
/// root `Stmts` node.
pub fn parse_module(tokens: &[Token], log: &mut ErrorLog) -> (Ast, NodeId) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: Ast::new(),
        log,
        last_span: Span::point(0),
    };
    let root = parser.parse_top_level();
    (parser.ast, root)
}

struct Parser<'t, 'log> {
    tokens: &'t [Token],
    pos: usize,
    ast: Ast,
    log: &'log mut ErrorLog,
    last_span: Span,
}

impl Parser<'_, '_> {
    // ---- token access -------------------------------------------------

    fn peek(&self) -> &Token {
        let mut i = self.pos;
        while let Some(tok) = self.tokens.get(i) {
            if tok.kind != TokenKind::Comment {
                return tok;
            }
            i += 1;
        }
        // The lexer always terminates the stream with EOF.
        &self.tokens[self.tokens.len() - 1]
    }

    fn bump(&mut self) -> Token {
        loop {
            let tok = self
                .tokens
                .get(self.pos)
                .cloned()
                .unwrap_or_else(|| self.tokens[self.tokens.len() - 1].clone());
            if tok.kind != TokenKind::Eof {
                self.pos += 1;
            }
            if tok.kind == TokenKind::Comment {
                continue;
            }
            self.last_span = tok.span;
            return tok;
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek_op(&self) -> Option<Op> {
        match self.peek().kind {
            TokenKind::Op(op) => Some(op),
            _ => None,
        }
    }

    /// Infix view of the next token: operator tokens plus the keyword
    /// operators `and`, `or`, `xor`.
    fn peek_infix(&self) -> Option<Op> {
        match self.peek().kind {
            TokenKind::Op(op) => Some(op),
            TokenKind::Keyword(Kw::And) => Some(Op::And),
            TokenKind::Keyword(Kw::Or) => Some(Op::Or),
            TokenKind::Keyword(Kw::Xor) => Some(Op::Xor),
            _ => None,
        }
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.peek_op() == Some(op) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op, what: &str) {
        if !self.eat_op(op) {
            let tok = self.peek().clone();
            self.log.error(
                Stage::Parse,
                tok.span,
                format!("expected {} but found `{}`", what, describe(&tok)),
            );
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.bump();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Op(Op::Semicolon)
        ) {
            self.bump();
        }
    }

    fn error_node(&mut self, span: Span, message: impl Into<String>) -> NodeId {
        self.log.error(Stage::Parse, span, message);
        self.ast.push(NodeKind::Terminal(TermValue::Int(0)), span)
    }

    // ---- statements ---------------------------------------------------

    fn parse_top_level(&mut self) -> NodeId {
        let list = self.parse_stmt_list(None);
        let span = match list.first() {
            Some(&first) => self.ast.span(first).merge(self.last_span),
            None => Span::point(0),
        };
        self.ast.push(NodeKind::Stmts { list }, span)
    }

    /// Statements separated by newlines or semicolons, up to `closer`
    /// (or EOF at the top level).
    fn parse_stmt_list(&mut self, closer: Option<Op>) -> Vec<NodeId> {
        let mut list = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() || (closer.is_some() && self.peek_op() == closer) {
                break;
            }
            list.push(self.parse_expr(0));
            // A statement ends at a separator or the closer.
            match self.peek().kind {
                TokenKind::Newline | TokenKind::Op(Op::Semicolon) | TokenKind::Eof => {}
                TokenKind::Op(op) if Some(op) == closer => {}
                _ => {
                    let tok = self.peek().clone();
                    self.log.error(
                        Stage::Parse,
                        tok.span,
                        format!("unexpected `{}` after expression", describe(&tok)),
                    );
                    // Recover at the next statement boundary.
                    while !matches!(
                        self.peek().kind,
                        TokenKind::Newline | TokenKind::Op(Op::Semicolon) | TokenKind::Eof
                    ) && !(closer.is_some() && self.peek_op() == closer)
                    {
                        self.bump();
                    }
                }
            }
        }
        list
    }

    fn parse_block(&mut self) -> NodeId {
        let start = self.peek().span;
        self.expect_op(Op::LBrace, "`{`");
        let list = self.parse_stmt_list(Some(Op::RBrace));
        self.expect_op(Op::RBrace, "`}`");
        self.ast
            .push(NodeKind::Stmts { list }, start.merge(self.last_span))
    }

    // ---- expressions --------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> NodeId {
        let mut lhs = self.parse_prefix();
        loop {
            // Postfix forms bind tightest.
            match self.peek_op() {
                Some(Op::LParen) if prec::POSTFIX >= min_bp => {
                    self.bump();
                    lhs = self.parse_call(lhs);
                    continue;
                }
                Some(Op::LBracket) if prec::POSTFIX >= min_bp => {
                    self.bump();
                    let index = self.parse_expr(0);
                    self.expect_op(Op::RBracket, "`]`");
                    let span = self.ast.span(lhs).merge(self.last_span);
                    lhs = self.ast.push(NodeKind::Index { operand: lhs, index }, span);
                    continue;
                }
                Some(Op::Dot) if prec::POSTFIX >= min_bp => {
                    self.bump();
                    lhs = self.parse_access(lhs);
                    continue;
                }
                _ => {}
            }

            // `x in container` declares an iterator.
            if matches!(self.peek().kind, TokenKind::Keyword(Kw::In)) && prec::ASSIGN >= min_bp {
                self.bump();
                let container = self.parse_expr(prec::ASSIGN + 1);
                lhs = self.make_decl(lhs, DeclKind::In, false, None, Some(container));
                continue;
            }

            let op = match self.peek_infix() {
                Some(op) => op,
                None => break,
            };
            let (bp, assoc) = match infix(op) {
                Some(binding) => binding,
                None => break,
            };
            if bp < min_bp {
                break;
            }
            self.bump();

            match assoc {
                Assoc::Chain => lhs = self.parse_chain(lhs, op, bp),
                Assoc::Right => match op {
                    Op::Colon => {
                        let ty = self.parse_expr(prec::ASSIGN + 1);
                        lhs = self.make_decl(lhs, DeclKind::Std, false, Some(ty), None);
                    }
                    Op::ColonEq => {
                        let init = self.parse_expr(prec::ASSIGN + 1);
                        lhs = self.make_decl(lhs, DeclKind::Infer, false, None, Some(init));
                    }
                    Op::DoubleColonEq => {
                        let init = self.parse_expr(prec::ASSIGN + 1);
                        lhs = self.make_decl(lhs, DeclKind::Infer, true, None, Some(init));
                    }
                    Op::Tick => {
                        let constraint = self.parse_expr(prec::ASSIGN + 1);
                        lhs = self.make_decl(lhs, DeclKind::Tick, false, Some(constraint), None);
                    }
                    Op::Arrow => lhs = self.parse_arrow(lhs),
                    _ => {
                        // The assignment family.
                        let rhs = self.parse_expr(bp);
                        lhs = self.finish_assign(lhs, op, rhs);
                    }
                },
                Assoc::Left => {
                    let rhs = self.parse_expr(bp + 1);
                    let kind = match op {
                        Op::Xor => BinOp::Xor,
                        Op::DotDot => BinOp::Range,
                        Op::Add => BinOp::Add,
                        Op::Sub => BinOp::Sub,
                        Op::Mul => BinOp::Mul,
                        Op::Div => BinOp::Div,
                        Op::Mod => BinOp::Mod,
                        _ => unreachable!("non-infix op in infix table"),
                    };
                    let span = self.ast.span(lhs).merge(self.ast.span(rhs));
                    lhs = self.ast.push(NodeKind::Binop { op: kind, lhs, rhs }, span);
                }
            }
        }
        lhs
    }

    fn parse_chain(&mut self, first: NodeId, first_op: Op, bp: u8) -> NodeId {
        let mut ops = vec![chain_op(first_op)];
        let mut exprs = vec![first, self.parse_expr(bp + 1)];
        while let Some(op) = self.peek_infix() {
            match infix(op) {
                Some((next_bp, Assoc::Chain)) if next_bp == bp => {
                    self.bump();
                    ops.push(chain_op(op));
                    exprs.push(self.parse_expr(bp + 1));
                }
                _ => break,
            }
        }
        let has_and = ops.iter().any(|o| *o == ChainOp::And);
        let has_or = ops.iter().any(|o| *o == ChainOp::Or);
        let span = self
            .ast
            .span(exprs[0])
            .merge(self.ast.span(*exprs.last().unwrap()));
        if has_and && has_or {
            self.log.error(
                Stage::Parse,
                span,
                "mixing `and` and `or` in one chain requires parentheses",
            );
        }
        self.ast.push(NodeKind::Chain { ops, exprs }, span)
    }

    fn make_decl(
        &mut self,
        name_node: NodeId,
        kind: DeclKind,
        constant: bool,
        ty_expr: Option<NodeId>,
        init: Option<NodeId>,
    ) -> NodeId {
        let name = match self.ast.kind(name_node) {
            NodeKind::Ident { name } => name.clone(),
            _ => {
                self.log.error(
                    Stage::Parse,
                    self.ast.span(name_node),
                    "a declaration name must be an identifier",
                );
                "_".to_string()
            }
        };
        let mut span = self.ast.span(name_node);
        if let Some(t) = ty_expr {
            span = span.merge(self.ast.span(t));
        }
        if let Some(i) = init {
            span = span.merge(self.ast.span(i));
        }
        self.ast.push(
            NodeKind::Decl {
                name,
                kind,
                constant,
                ty_expr,
                init,
            },
            span,
        )
    }

    /// `lhs -> ret` is a function type; followed by a block it is a
    /// function literal with `lhs` as the input list.
    fn parse_arrow(&mut self, lhs: NodeId) -> NodeId {
        let ret = self.parse_expr(prec::ARROW);
        if self.peek_op() == Some(Op::LBrace) {
            let body = self.parse_block();
            let inputs = match self.ast.kind(lhs) {
                NodeKind::CommaList { elems } => elems.clone(),
                _ => vec![lhs],
            };
            let span = self.ast.span(lhs).merge(self.last_span);
            return self.ast.push(
                NodeKind::FnLit {
                    inputs,
                    ret: Some(ret),
                    body,
                },
                span,
            );
        }
        let span = self.ast.span(lhs).merge(self.ast.span(ret));
        self.ast.push(
            NodeKind::Binop {
                op: BinOp::Arrow,
                lhs,
                rhs: ret,
            },
            span,
        )
    }

    /// `=` after an initializer-less declaration folds into the
    /// declaration; otherwise the assignment family builds a `Binop`.
    fn finish_assign(&mut self, lhs: NodeId, op: Op, rhs: NodeId) -> NodeId {
        if op == Op::Assign {
            if let NodeKind::Decl { init: None, .. } = self.ast.kind(lhs) {
                if let NodeKind::Decl { init, .. } = self.ast.kind_mut(lhs) {
                    *init = Some(rhs);
                }
                return lhs;
            }
        }
        let kind = match op {
            Op::Assign => BinOp::Assign,
            Op::AddEq => BinOp::AddAssign,
            Op::SubEq => BinOp::SubAssign,
            Op::MulEq => BinOp::MulAssign,
            Op::DivEq => BinOp::DivAssign,
            Op::ModEq => BinOp::ModAssign,
            Op::AndEq => BinOp::AndAssign,
            Op::OrEq => BinOp::OrAssign,
            Op::XorEq => BinOp::XorAssign,
            _ => BinOp::Assign,
        };
        let span = self.ast.span(lhs).merge(self.ast.span(rhs));
        self.ast.push(NodeKind::Binop { op: kind, lhs, rhs }, span)
    }

    fn parse_call(&mut self, callee: NodeId) -> NodeId {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        self.skip_newlines();
        if !self.eat_op(Op::RParen) {
            loop {
                let arg = self.parse_expr(0);
                // `name = expr` in argument position is a named argument.
                let mut named_arg = None;
                if let NodeKind::Binop {
                    op: BinOp::Assign,
                    lhs,
                    rhs,
                } = self.ast.kind(arg)
                {
                    if let NodeKind::Ident { name } = self.ast.kind(*lhs) {
                        named_arg = Some((name.clone(), *rhs));
                    }
                }
                match named_arg {
                    Some(pair) => named.push(pair),
                    None => {
                        if !named.is_empty() {
                            self.log.error(
                                Stage::Parse,
                                self.ast.span(arg),
                                "positional argument after named argument",
                            );
                        }
                        positional.push(arg);
                    }
                }
                self.skip_newlines();
                if self.eat_op(Op::Comma) {
                    self.skip_newlines();
                    if self.eat_op(Op::RParen) {
                        break;
                    }
                    continue;
                }
                self.expect_op(Op::RParen, "`)` to close the call");
                break;
            }
        }
        let span = self.ast.span(callee).merge(self.last_span);
        self.ast.push(
            NodeKind::Call {
                callee,
                positional,
                named,
            },
            span,
        )
    }

    fn parse_access(&mut self, operand: NodeId) -> NodeId {
        let tok = self.peek().clone();
        let member = match tok.kind {
            TokenKind::Ident => {
                self.bump();
                tok.lexeme
            }
            _ => {
                self.log.error(
                    Stage::Parse,
                    tok.span,
                    format!("expected a member name after `.`, found `{}`", describe(&tok)),
                );
                "_".to_string()
            }
        };
        let span = self.ast.span(operand).merge(self.last_span);
        self.ast.push(NodeKind::Access { operand, member }, span)
    }

    fn parse_prefix(&mut self) -> NodeId {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int => {
                self.bump();
                let value = match tok.lexeme.parse::<i64>() {
                    Ok(v) => v,
                    Err(_) => {
                        self.log.error(
                            Stage::Parse,
                            tok.span,
                            format!("integer literal `{}` is out of range", tok.lexeme),
                        );
                        0
                    }
                };
                self.ast.push(NodeKind::Terminal(TermValue::Int(value)), tok.span)
            }
            TokenKind::Real => {
                self.bump();
                let value = tok.lexeme.parse::<f64>().unwrap_or(0.0);
                self.ast
                    .push(NodeKind::Terminal(TermValue::Real(value)), tok.span)
            }
            TokenKind::Char => {
                self.bump();
                let value = tok.lexeme.chars().next().unwrap_or('\0');
                self.ast
                    .push(NodeKind::Terminal(TermValue::Char(value)), tok.span)
            }
            TokenKind::Str => {
                self.bump();
                self.ast
                    .push(NodeKind::Terminal(TermValue::Str(tok.lexeme)), tok.span)
            }
            TokenKind::TypeLit => {
                self.bump();
                let kind = PrimKind::from_name(&tok.lexeme).unwrap_or(PrimKind::Void);
                self.ast
                    .push(NodeKind::Terminal(TermValue::Prim(kind)), tok.span)
            }
            TokenKind::Ident => {
                self.bump();
                self.ast
                    .push(NodeKind::Ident { name: tok.lexeme }, tok.span)
            }
            TokenKind::Keyword(kw) => self.parse_keyword_prefix(kw, tok.span),
            TokenKind::Op(op) => self.parse_op_prefix(op, tok.span),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Comment => {
                self.error_node(tok.span, "expected an expression")
            }
        }
    }

    fn parse_keyword_prefix(&mut self, kw: Kw, span: Span) -> NodeId {
        match kw {
            Kw::True => {
                self.bump();
                self.ast.push(NodeKind::Terminal(TermValue::Bool(true)), span)
            }
            Kw::False => {
                self.bump();
                self.ast
                    .push(NodeKind::Terminal(TermValue::Bool(false)), span)
            }
            Kw::Null => {
                self.bump();
                self.ast.push(NodeKind::Terminal(TermValue::Null), span)
            }
            Kw::If => {
                self.bump();
                self.parse_if(span)
            }
            Kw::While => {
                self.bump();
                let cond = self.parse_condition();
                let body = self.parse_block();
                self.ast
                    .push(NodeKind::While { cond, body }, span.merge(self.last_span))
            }
            Kw::For => {
                self.bump();
                let mut iters = vec![self.parse_expr(0)];
                while self.eat_op(Op::Comma) {
                    iters.push(self.parse_expr(0));
                }
                let body = self.parse_block();
                self.ast
                    .push(NodeKind::For { iters, body }, span.merge(self.last_span))
            }
            Kw::Case => {
                self.bump();
                self.parse_case(span)
            }
            Kw::Struct => {
                self.bump();
                self.parse_struct_lit(span)
            }
            Kw::Enum => {
                self.bump();
                let members = self.parse_member_names();
                self.ast
                    .push(NodeKind::EnumLit { members }, span.merge(self.last_span))
            }
            Kw::Flags => {
                self.bump();
                let members = self.parse_member_names();
                self.ast
                    .push(NodeKind::FlagsLit { members }, span.merge(self.last_span))
            }
            Kw::Return => {
                self.bump();
                let value = if self.jump_has_operand() {
                    Some(self.parse_expr(prec::BOOL))
                } else {
                    None
                };
                self.ast.push(
                    NodeKind::Jump {
                        kind: JumpKind::Return,
                        value,
                    },
                    span.merge(self.last_span),
                )
            }
            Kw::Break | Kw::Continue | Kw::Repeat | Kw::Restart => {
                self.bump();
                let kind = match kw {
                    Kw::Break => JumpKind::Break,
                    Kw::Continue => JumpKind::Continue,
                    Kw::Repeat => JumpKind::Repeat,
                    _ => JumpKind::Restart,
                };
                self.ast.push(NodeKind::Jump { kind, value: None }, span)
            }
            Kw::Print => {
                self.bump();
                let operand = self.parse_expr(prec::BOOL);
                self.ast.push(
                    NodeKind::Unop {
                        op: UnOp::Print,
                        operand,
                    },
                    span.merge(self.last_span),
                )
            }
            Kw::Free => {
                self.bump();
                let operand = self.parse_expr(prec::BOOL);
                self.ast.push(
                    NodeKind::Unop {
                        op: UnOp::Free,
                        operand,
                    },
                    span.merge(self.last_span),
                )
            }
            Kw::Else | Kw::In | Kw::And | Kw::Or | Kw::Xor => {
                self.bump();
                self.error_node(span, format!("`{}` cannot start an expression", kw_name(kw)))
            }
        }
    }

    fn parse_op_prefix(&mut self, op: Op, span: Span) -> NodeId {
        match op {
            Op::Sub | Op::Not | Op::Amp | Op::At => {
                self.bump();
                let operand = self.parse_expr(prec::UNARY);
                let un = match op {
                    Op::Sub => UnOp::Neg,
                    Op::Not => UnOp::Not,
                    Op::Amp => UnOp::Addr,
                    _ => UnOp::Deref,
                };
                self.ast.push(
                    NodeKind::Unop { op: un, operand },
                    span.merge(self.last_span),
                )
            }
            Op::LParen => {
                self.bump();
                self.parse_paren_list(span)
            }
            Op::LBracket => {
                self.bump();
                self.parse_bracket(span)
            }
            Op::LBrace => self.parse_block(),
            _ => {
                self.bump();
                self.error_node(span, format!("unexpected operator `{:?}`", op))
            }
        }
    }

    /// After `(`: a grouping (one element) or a comma list.
    fn parse_paren_list(&mut self, start: Span) -> NodeId {
        self.skip_newlines();
        if self.eat_op(Op::RParen) {
            return self
                .ast
                .push(NodeKind::CommaList { elems: vec![] }, start.merge(self.last_span));
        }
        let mut elems = Vec::new();
        loop {
            elems.push(self.parse_expr(0));
            self.skip_newlines();
            if self.eat_op(Op::Comma) {
                self.skip_newlines();
                if self.eat_op(Op::RParen) {
                    break;
                }
                continue;
            }
            self.expect_op(Op::RParen, "`)`");
            break;
        }
        if elems.len() == 1 {
            elems[0]
        } else {
            self.ast
                .push(NodeKind::CommaList { elems }, start.merge(self.last_span))
        }
    }

    /// After `[`: an array literal, or `[len; elem]` / `[; elem]` types.
    fn parse_bracket(&mut self, start: Span) -> NodeId {
        self.skip_newlines();
        if self.eat_op(Op::RBracket) {
            return self
                .ast
                .push(NodeKind::ArrayLit { elems: vec![] }, start.merge(self.last_span));
        }
        if self.eat_op(Op::Semicolon) {
            let elem = self.parse_expr(0);
            self.expect_op(Op::RBracket, "`]`");
            return self.ast.push(
                NodeKind::ArrayType { len: None, elem },
                start.merge(self.last_span),
            );
        }
        let first = self.parse_expr(0);
        if self.eat_op(Op::Semicolon) {
            let elem = self.parse_expr(0);
            self.expect_op(Op::RBracket, "`]`");
            return self.ast.push(
                NodeKind::ArrayType {
                    len: Some(first),
                    elem,
                },
                start.merge(self.last_span),
            );
        }
        let mut elems = vec![first];
        loop {
            self.skip_newlines();
            if self.eat_op(Op::Comma) {
                self.skip_newlines();
                if self.eat_op(Op::RBracket) {
                    break;
                }
                elems.push(self.parse_expr(0));
                continue;
            }
            self.expect_op(Op::RBracket, "`]`");
            break;
        }
        self.ast
            .push(NodeKind::ArrayLit { elems }, start.merge(self.last_span))
    }

    fn parse_if(&mut self, start: Span) -> NodeId {
        let mut conds = Vec::new();
        let mut bodies = Vec::new();
        let mut else_body = None;
        loop {
            conds.push(self.parse_condition());
            bodies.push(self.parse_block());
            // `else` may sit on the next line.
            let mark = self.pos;
            self.skip_newlines();
            if matches!(self.peek().kind, TokenKind::Keyword(Kw::Else)) {
                self.bump();
                if matches!(self.peek().kind, TokenKind::Keyword(Kw::If)) {
                    self.bump();
                    continue;
                }
                else_body = Some(self.parse_block());
            } else {
                self.pos = mark;
            }
            break;
        }
        self.ast.push(
            NodeKind::If {
                conds,
                bodies,
                else_body,
            },
            start.merge(self.last_span),
        )
    }

    /// A condition expression; a top-level `=` here is almost certainly a
    /// typo for `==`, so log and rewrite.
    fn parse_condition(&mut self) -> NodeId {
        let cond = self.parse_expr(prec::ARROW + 1);
        if self.peek_op() == Some(Op::Assign) {
            let span = self.peek().span;
            self.log.error(
                Stage::Parse,
                span,
                "`=` is assignment; did you mean `==`?",
            );
            self.bump();
            let rhs = self.parse_expr(prec::ARROW + 1);
            let span = self.ast.span(cond).merge(self.ast.span(rhs));
            return self.ast.push(
                NodeKind::Chain {
                    ops: vec![ChainOp::Eq],
                    exprs: vec![cond, rhs],
                },
                span,
            );
        }
        cond
    }

    fn parse_case(&mut self, start: Span) -> NodeId {
        self.expect_op(Op::LBrace, "`{` after `case`");
        let mut arms = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() || self.peek_op() == Some(Op::RBrace) {
                break;
            }
            let key = self.parse_expr(0);
            self.expect_op(Op::Rocket, "`=>` between a case key and its value");
            let value = self.parse_expr(0);
            arms.push((key, value));
            if self.eat_op(Op::Comma) {
                continue;
            }
        }
        self.expect_op(Op::RBrace, "`}`");
        self.ast
            .push(NodeKind::Case { arms }, start.merge(self.last_span))
    }

    fn parse_struct_lit(&mut self, start: Span) -> NodeId {
        let mut params = Vec::new();
        if self.eat_op(Op::LParen) {
            let list = self.parse_paren_list(start);
            match self.ast.kind(list) {
                NodeKind::CommaList { elems } => params = elems.clone(),
                _ => params = vec![list],
            }
        }
        self.expect_op(Op::LBrace, "`{` after `struct`");
        let fields = self.parse_stmt_list(Some(Op::RBrace));
        self.expect_op(Op::RBrace, "`}`");
        self.ast.push(
            NodeKind::StructLit { params, fields },
            start.merge(self.last_span),
        )
    }

    /// `{ name, name, ... }` for enum and flags literals; commas or
    /// newlines separate.
    fn parse_member_names(&mut self) -> Vec<String> {
        self.expect_op(Op::LBrace, "`{`");
        let mut members = Vec::new();
        loop {
            self.skip_separators();
            while self.eat_op(Op::Comma) {
                self.skip_separators();
            }
            if self.at_eof() || self.peek_op() == Some(Op::RBrace) {
                break;
            }
            let tok = self.peek().clone();
            if tok.kind == TokenKind::Ident {
                self.bump();
                members.push(tok.lexeme);
            } else {
                self.log.error(
                    Stage::Parse,
                    tok.span,
                    format!("expected a member name, found `{}`", describe(&tok)),
                );
                self.bump();
            }
        }
        self.expect_op(Op::RBrace, "`}`");
        members
    }

    /// Whether a jump keyword is followed by an operand on the same line.
    fn jump_has_operand(&self) -> bool {
        !matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Op(Op::Semicolon)
                | TokenKind::Op(Op::RBrace)
        )
    }
}

fn chain_op(op: Op) -> ChainOp {
    match op {
        Op::EqEq => ChainOp::Eq,
        Op::Ne => ChainOp::Ne,
        Op::Lt => ChainOp::Lt,
        Op::Le => ChainOp::Le,
        Op::Gt => ChainOp::Gt,
        Op::Ge => ChainOp::Ge,
        Op::And => ChainOp::And,
        _ => ChainOp::Or,
    }
}

fn kw_name(kw: Kw) -> &'static str {
    match kw {
        Kw::Else => "else",
        Kw::In => "in",
        Kw::And => "and",
        Kw::Or => "or",
        Kw::Xor => "xor",
        _ => "keyword",
    }
}

fn describe(tok: &Token) -> String {
    match tok.kind {
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        _ => tok.lexeme.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use tern_core::source::SourceBuffer;

    fn parse(text: &str) -> (Ast, NodeId, ErrorLog) {
        let src = SourceBuffer::new("test", text);
        let mut log = ErrorLog::new();
        let tokens = lex(&src, &mut log);
        let (ast, root) = parse_module(&tokens, &mut log);
        (ast, root, log)
    }

    fn only_stmt(ast: &Ast, root: NodeId) -> NodeId {
        match ast.kind(root) {
            NodeKind::Stmts { list } => {
                assert_eq!(list.len(), 1, "expected exactly one statement");
                list[0]
            }
            other => panic!("root is not Stmts: {:?}", other),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let (ast, root, log) = parse("2 + 3 * 4");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::Binop {
                op: BinOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(
                    ast.kind(*rhs),
                    NodeKind::Binop { op: BinOp::Mul, .. }
                ));
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn comparisons_fold_into_one_chain() {
        let (ast, root, log) = parse("a < b < c");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::Chain { ops, exprs } => {
                assert_eq!(ops, &vec![ChainOp::Lt, ChainOp::Lt]);
                assert_eq!(exprs.len(), 3);
            }
            other => panic!("expected a chain, got {:?}", other),
        }
    }

    #[test]
    fn boolean_chain_folds_and_mixing_is_rejected() {
        let (ast, root, log) = parse("a and b and c");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        assert!(matches!(ast.kind(stmt), NodeKind::Chain { ops, .. } if ops.len() == 2));

        let (_, _, log) = parse("a and b or c");
        assert!(log.has_errors());
    }

    #[test]
    fn declaration_forms() {
        let (ast, root, log) = parse("x: int32\ny := 3\nz ::= 4\nw: int32 = 5");
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        assert_eq!(list.len(), 4);
        assert!(matches!(
            ast.kind(list[0]),
            NodeKind::Decl {
                kind: DeclKind::Std,
                init: None,
                ..
            }
        ));
        assert!(matches!(
            ast.kind(list[1]),
            NodeKind::Decl {
                kind: DeclKind::Infer,
                constant: false,
                ..
            }
        ));
        assert!(matches!(
            ast.kind(list[2]),
            NodeKind::Decl {
                kind: DeclKind::Infer,
                constant: true,
                ..
            }
        ));
        assert!(matches!(
            ast.kind(list[3]),
            NodeKind::Decl {
                kind: DeclKind::Std,
                init: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn function_literal() {
        let (ast, root, log) = parse("add ::= (a: int32, b: int32) -> int32 { return a + b }");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let init = match ast.kind(stmt) {
            NodeKind::Decl {
                constant: true,
                init: Some(init),
                ..
            } => *init,
            other => panic!("expected a constant decl, got {:?}", other),
        };
        match ast.kind(init) {
            NodeKind::FnLit { inputs, ret, body } => {
                assert_eq!(inputs.len(), 2);
                assert!(ret.is_some());
                assert!(matches!(ast.kind(*body), NodeKind::Stmts { .. }));
            }
            other => panic!("expected a function literal, got {:?}", other),
        }
    }

    #[test]
    fn return_binds_the_whole_expression() {
        let (ast, root, log) = parse("f ::= () -> int32 { return 2 + 3 * 4 }");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let body = match ast.kind(stmt) {
            NodeKind::Decl { init: Some(i), .. } => match ast.kind(*i) {
                NodeKind::FnLit { body, .. } => *body,
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        };
        let ret = match ast.kind(body) {
            NodeKind::Stmts { list } => list[0],
            other => panic!("{:?}", other),
        };
        match ast.kind(ret) {
            NodeKind::Jump {
                kind: JumpKind::Return,
                value: Some(v),
            } => {
                assert!(matches!(ast.kind(*v), NodeKind::Binop { op: BinOp::Add, .. }));
            }
            other => panic!("expected return with value, got {:?}", other),
        }
    }

    #[test]
    fn condition_assign_is_rewritten_to_equality() {
        let (ast, root, log) = parse("if x = 3 { y := 1 }");
        assert!(log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::If { conds, .. } => match ast.kind(conds[0]) {
                NodeKind::Chain { ops, .. } => assert_eq!(ops, &vec![ChainOp::Eq]),
                other => panic!("condition not rewritten: {:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn if_else_chain() {
        let (ast, root, log) = parse("if a { x := 1 } else if b { x := 2 } else { x := 3 }");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::If {
                conds,
                bodies,
                else_body,
            } => {
                assert_eq!(conds.len(), 2);
                assert_eq!(bodies.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn array_literal_and_type() {
        let (ast, root, log) = parse("a := [1, 2, 3]\nt := [3; int32]\nd := [; int32]");
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let init = |i: usize| match ast.kind(list[i]) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        assert!(matches!(ast.kind(init(0)), NodeKind::ArrayLit { elems } if elems.len() == 3));
        assert!(matches!(
            ast.kind(init(1)),
            NodeKind::ArrayType { len: Some(_), .. }
        ));
        assert!(matches!(
            ast.kind(init(2)),
            NodeKind::ArrayType { len: None, .. }
        ));
    }

    #[test]
    fn struct_enum_literals() {
        let (ast, root, log) = parse("S ::= struct { x: int32; y: int32 }\nE ::= enum { a, b, c }");
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let init = |i: usize| match ast.kind(list[i]) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        assert!(matches!(
            ast.kind(init(0)),
            NodeKind::StructLit { fields, .. } if fields.len() == 2
        ));
        assert!(matches!(
            ast.kind(init(1)),
            NodeKind::EnumLit { members } if members.len() == 3
        ));
    }

    #[test]
    fn case_expression() {
        let (ast, root, log) = parse("x := case { a => 1, b => 2 }");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let init = match ast.kind(stmt) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        assert!(matches!(ast.kind(init), NodeKind::Case { arms } if arms.len() == 2));
    }

    #[test]
    fn calls_with_named_arguments() {
        let (ast, root, log) = parse("f(1, 2, mode = 3)");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::Call {
                positional, named, ..
            } => {
                assert_eq!(positional.len(), 2);
                assert_eq!(named.len(), 1);
                assert_eq!(named[0].0, "mode");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn for_with_iterators() {
        let (ast, root, log) = parse("for i in 0..10, x in xs { print x }");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::For { iters, .. } => {
                assert_eq!(iters.len(), 2);
                assert!(matches!(
                    ast.kind(iters[0]),
                    NodeKind::Decl {
                        kind: DeclKind::In,
                        ..
                    }
                ));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn postfix_tower() {
        let (ast, root, log) = parse("a.b[0](x)");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        match ast.kind(stmt) {
            NodeKind::Call { callee, .. } => match ast.kind(*callee) {
                NodeKind::Index { operand, .. } => {
                    assert!(matches!(ast.kind(*operand), NodeKind::Access { .. }));
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unary_and_range() {
        let (ast, root, log) = parse("r := 1..n");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let init = match ast.kind(stmt) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        assert!(matches!(
            ast.kind(init),
            NodeKind::Binop {
                op: BinOp::Range,
                ..
            }
        ));

        let (ast, root, log) = parse("y := -x + 1");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let init = match ast.kind(stmt) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        match ast.kind(init) {
            NodeKind::Binop {
                op: BinOp::Add,
                lhs,
                ..
            } => assert!(matches!(
                ast.kind(*lhs),
                NodeKind::Unop { op: UnOp::Neg, .. }
            )),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn function_type_expression() {
        let (ast, root, log) = parse("t := (int32, int32) -> bool");
        assert!(!log.has_errors());
        let stmt = only_stmt(&ast, root);
        let init = match ast.kind(stmt) {
            NodeKind::Decl { init: Some(v), .. } => *v,
            other => panic!("{:?}", other),
        };
        assert!(matches!(
            ast.kind(init),
            NodeKind::Binop {
                op: BinOp::Arrow,
                ..
            }
        ));
    }
}
