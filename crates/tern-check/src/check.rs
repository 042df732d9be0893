//! The type checker.
//!
//! Declarations are visited in dependency order; every expression node is
//! assigned a type (possibly the `Error` sentinel). Failures are logged
//! once at their root cause; `Error` then propagates silently through
//! operators, joins, and calls.
//!
//! Alongside types, the checker computes the compile-time constant domain:
//! type expressions, constant initializers, enum members, `bytes`/`align`,
//! and folded arithmetic. Overload resolution consumes an identifier's
//! candidate set and records the winning declaration per call site.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tern_core::diag::{ErrorLog, Stage};
use tern_core::foreign::{foreign_signature, shape_type};
use tern_core::id::{DeclId, ModuleId, NodeId};
use tern_core::intern::{TypeContext, TypeId};
use tern_core::layout::Arch;
use tern_core::source::Span;
use tern_core::types::{
    EnumDef, FieldInit, FlagsDef, GenericDef, PrimKind, StructDef, StructField, Type,
};
use tern_syntax::ast::{Ast, BinOp, ChainOp, DeclKind, JumpKind, NodeKind, TermValue, UnOp};

use crate::consts::ConstVal;
use crate::deps::order_decls;
use crate::scope::ScopeGraph;

/// Everything the checker learned about a module.
#[derive(Debug, Default)]
pub struct Checked {
    /// Type of every expression node reached by the check.
    pub types: HashMap<NodeId, TypeId>,
    pub decl_types: HashMap<DeclId, TypeId>,
    pub node_consts: HashMap<NodeId, ConstVal>,
    pub decl_consts: HashMap<DeclId, ConstVal>,
    /// Call node -> the overload declaration it resolved to.
    pub call_targets: HashMap<NodeId, DeclId>,
    /// Operator node -> the `__add__`-style declaration it dispatches to.
    pub op_overloads: HashMap<NodeId, DeclId>,
    /// FnLit node -> declared result types.
    pub fn_results: HashMap<NodeId, Vec<TypeId>>,
}

impl Checked {
    pub fn type_of(&self, node: NodeId) -> TypeId {
        self.types.get(&node).copied().unwrap_or(TypeId::UNKNOWN)
    }

    pub fn const_of(&self, node: NodeId) -> Option<&ConstVal> {
        self.node_consts.get(&node)
    }
}

/// Checks a whole module: top-level declarations in dependency order, then
/// the remaining statements.
pub fn check_module(
    ast: &Ast,
    root: NodeId,
    scopes: &ScopeGraph,
    ctx: &TypeContext,
    arch: Arch,
    module: ModuleId,
    log: &mut ErrorLog,
) -> Checked {
    let order = order_decls(ast, scopes, log);
    let mut checker = Checker {
        ast,
        scopes,
        ctx,
        arch,
        module,
        log,
        out: Checked::default(),
        in_progress: Vec::new(),
        ret_stack: Vec::new(),
        loop_depth: 0,
        pending_name: None,
    };
    for &d in &order.cyclic {
        checker.out.decl_types.insert(d, TypeId::ERROR);
    }
    for &d in &order.order {
        checker.check_decl(d);
    }
    if let NodeKind::Stmts { list } = ast.kind(root) {
        for &stmt in list {
            checker.check_expr(stmt);
        }
    }
    debug!(
        nodes = checker.out.types.len(),
        decls = checker.out.decl_types.len(),
        "type check finished"
    );
    checker.out
}

struct Checker<'a, 'log> {
    ast: &'a Ast,
    scopes: &'a ScopeGraph,
    ctx: &'a TypeContext,
    arch: Arch,
    module: ModuleId,
    log: &'log mut ErrorLog,
    out: Checked,
    /// Declarations currently being checked; a repeat entry closes a cycle.
    in_progress: Vec<DeclId>,
    /// Result types of the enclosing function literals.
    ret_stack: Vec<Vec<TypeId>>,
    loop_depth: u32,
    /// Name to give the next nominal literal (`S ::= struct { ... }`).
    pending_name: Option<String>,
}

impl Checker<'_, '_> {
    fn error(&mut self, span: Span, message: impl Into<String>) -> TypeId {
        self.log.error(Stage::Type, span, message);
        TypeId::ERROR
    }

    /// Value of type `value` may initialize or be assigned to `target`.
    fn assignable(&self, target: TypeId, value: TypeId) -> bool {
        if target == TypeId::ERROR || value == TypeId::ERROR {
            return true;
        }
        self.ctx.join(target, value) == Some(target)
    }

    // ---- declarations -------------------------------------------------

    fn check_decl(&mut self, d: DeclId) -> TypeId {
        if let Some(&t) = self.out.decl_types.get(&d) {
            return t;
        }
        if self.in_progress.contains(&d) {
            let info = self.scopes.decl(d);
            let span = self.ast.span(info.node);
            let name = info.name.clone();
            self.log.error(
                Stage::Resolve,
                span,
                format!("cyclic dependency while checking `{}`", name),
            );
            self.out.decl_types.insert(d, TypeId::ERROR);
            return TypeId::ERROR;
        }
        self.in_progress.push(d);
        let info = self.scopes.decl(d).clone();
        let node = info.node;
        let span = self.ast.span(node);
        let (kind, ty_expr, init) = match self.ast.kind(node) {
            NodeKind::Decl {
                kind, ty_expr, init, ..
            } => (*kind, *ty_expr, *init),
            _ => (DeclKind::Infer, None, None),
        };

        let ty = match kind {
            DeclKind::Std => {
                let declared = match ty_expr {
                    Some(te) => self.eval_const_type(te),
                    None => self.error(span, "declaration is missing a type"),
                };
                if let Some(i) = init {
                    let it = self.check_expr(i);
                    if !self.assignable(declared, it) {
                        self.error(
                            self.ast.span(i),
                            format!(
                                "initializer of type {} does not match declared type {}",
                                self.ctx.display(it),
                                self.ctx.display(declared)
                            ),
                        );
                    }
                }
                declared
            }
            DeclKind::Infer => match init {
                Some(i) => {
                    self.pending_name = Some(info.name.clone());
                    let t = self.check_expr(i);
                    self.pending_name = None;
                    if info.constant {
                        if let Some(c) = self.out.node_consts.get(&i).cloned() {
                            self.out.decl_consts.insert(d, c);
                        } else if let NodeKind::FnLit { .. } = self.ast.kind(i) {
                            self.out.decl_consts.insert(d, ConstVal::Func(d));
                        }
                    }
                    t
                }
                None => self.error(span, "inferred declaration is missing an initializer"),
            },
            DeclKind::In => match init {
                Some(container) => {
                    let ct = self.check_expr(container);
                    self.element_type(container, ct)
                }
                None => self.error(span, "iterator declaration is missing its container"),
            },
            DeclKind::Tick => match ty_expr {
                Some(pred) => {
                    let pt = self.check_expr(pred);
                    match &*self.ctx.get(pt) {
                        Type::Func { params, results }
                            if params.len() == 1 && results.as_slice() == [TypeId::BOOL] =>
                        {
                            params[0]
                        }
                        Type::Error => TypeId::ERROR,
                        _ => self.error(
                            self.ast.span(pred),
                            "a generic constraint must be a one-argument predicate",
                        ),
                    }
                }
                None => self.error(span, "constraint declaration is missing its predicate"),
            },
        };

        self.in_progress.pop();
        self.out.decl_types.insert(d, ty);
        if info.name.starts_with("__") {
            self.validate_special(&info.name, ty, span);
        }
        ty
    }

    /// Element type for `x in container`.
    fn element_type(&mut self, container: NodeId, ct: TypeId) -> TypeId {
        match &*self.ctx.get(ct) {
            Type::Error => TypeId::ERROR,
            Type::Arr { elem, .. } => *elem,
            Type::Range { elem } => *elem,
            Type::Prim(PrimKind::ByteView) => TypeId::CHAR,
            Type::Prim(PrimKind::Type) => {
                let inner = self
                    .out
                    .node_consts
                    .get(&container)
                    .and_then(|c| c.as_type());
                match inner {
                    Some(t) if matches!(&*self.ctx.get(t), Type::Enum(_) | Type::Flags(_)) => t,
                    _ => self.error(
                        self.ast.span(container),
                        "only enum and flags types can be iterated",
                    ),
                }
            }
            _ => self.error(
                self.ast.span(container),
                format!("cannot iterate a value of type {}", self.ctx.display(ct)),
            ),
        }
    }

    /// Signature requirements for the `__*__` special declarations.
    fn validate_special(&mut self, name: &str, ty: TypeId, span: Span) {
        let func = match &*self.ctx.get(ty) {
            Type::Func { params, results } => Some((params.clone(), results.clone())),
            Type::Error => return,
            _ => None,
        };
        let ok = match (name, &func) {
            ("__print__", Some((params, results))) => params.len() == 1 && results.is_empty(),
            ("__destroy__", Some((params, results))) => {
                results.is_empty()
                    && params.len() == 1
                    && matches!(&*self.ctx.get(params[0]), Type::Ptr { .. })
            }
            ("__assign__", Some((params, results))) => {
                results.is_empty()
                    && params.len() == 2
                    && matches!(
                        &*self.ctx.get(params[0]),
                        Type::Ptr { pointee } if *pointee == params[1]
                    )
            }
            ("__neg__", Some((params, results))) => params.len() == 1 && results.len() == 1,
            ("__add__" | "__sub__" | "__mul__" | "__div__" | "__mod__", Some((params, results))) => {
                params.len() == 2 && results.len() == 1
            }
            (_, _) => return,
        };
        if !ok {
            self.log.error(
                Stage::Decl,
                span,
                format!("`{}` does not have the required signature", name),
            );
        }
    }

    // ---- constant helpers ---------------------------------------------

    /// Checks a node and requires its value to be a compile-time type.
    fn eval_const_type(&mut self, node: NodeId) -> TypeId {
        let t = self.check_expr(node);
        if t == TypeId::ERROR {
            return TypeId::ERROR;
        }
        if t != TypeId::TYPE {
            return self.error(
                self.ast.span(node),
                format!("expected a type, found a value of type {}", self.ctx.display(t)),
            );
        }
        match self.out.node_consts.get(&node).and_then(|c| c.as_type()) {
            Some(inner) => inner,
            None => self.error(self.ast.span(node), "type expression is not a compile-time constant"),
        }
    }

    /// Interprets a node as a list of types: a comma list contributes each
    /// element; `void` contributes nothing; anything else is one type.
    fn type_list(&mut self, node: NodeId) -> Vec<TypeId> {
        match self.ast.kind(node) {
            NodeKind::CommaList { elems } => {
                let elems = elems.clone();
                elems.into_iter().map(|e| self.eval_const_type(e)).collect()
            }
            _ => {
                let t = self.eval_const_type(node);
                if t == TypeId::VOID {
                    vec![]
                } else {
                    vec![t]
                }
            }
        }
    }

    // ---- expressions ---------------------------------------------------

    fn check_expr(&mut self, node: NodeId) -> TypeId {
        if let Some(&t) = self.out.types.get(&node) {
            return t;
        }
        let pending = self.pending_name.take();
        let t = self.check_expr_uncached(node, pending);
        self.out.types.insert(node, t);
        t
    }

    fn check_expr_uncached(&mut self, node: NodeId, pending_name: Option<String>) -> TypeId {
        let span = self.ast.span(node);
        match self.ast.kind(node).clone() {
            NodeKind::Terminal(value) => self.check_terminal(node, value),
            NodeKind::Ident { name } => self.check_ident(node, &name, span),
            NodeKind::Unop { op, operand } => self.check_unop(node, op, operand, span),
            NodeKind::Binop { op, lhs, rhs } => self.check_binop(node, op, lhs, rhs, span),
            NodeKind::Chain { ops, exprs } => self.check_chain(&ops, &exprs, span),
            NodeKind::Access { operand, member } => self.check_access(node, operand, &member, span),
            NodeKind::Index { operand, index } => self.check_index(operand, index, span),
            NodeKind::Call {
                callee,
                positional,
                named,
            } => self.check_call(node, callee, &positional, &named, span),
            NodeKind::Decl { .. } => {
                if let Some(&d) = self.scopes.node_decl.get(&node) {
                    self.check_decl(d);
                }
                TypeId::VOID
            }
            NodeKind::ArrayLit { elems } => self.check_array_lit(&elems, span),
            NodeKind::ArrayType { len, elem } => self.check_array_type(node, len, elem),
            NodeKind::StructLit { params, fields } => {
                self.check_struct_lit(node, &params, &fields, pending_name)
            }
            NodeKind::EnumLit { members } => {
                let def = EnumDef {
                    name: pending_name.unwrap_or_else(|| "<enum>".to_string()),
                    module: self.module,
                    members: members.iter().enumerate().map(|(i, n)| (n.clone(), i as u64)).collect(),
                };
                let id = self.ctx.enum_type(def);
                self.out.node_consts.insert(node, ConstVal::Type(id));
                TypeId::TYPE
            }
            NodeKind::FlagsLit { members } => {
                let def = FlagsDef {
                    name: pending_name.unwrap_or_else(|| "<flags>".to_string()),
                    module: self.module,
                    members: members
                        .iter()
                        .enumerate()
                        .map(|(i, n)| (n.clone(), 1u64 << i))
                        .collect(),
                };
                let id = self.ctx.flags_type(def);
                self.out.node_consts.insert(node, ConstVal::Type(id));
                TypeId::TYPE
            }
            NodeKind::FnLit { inputs, ret, body } => self.check_fn_lit(node, &inputs, ret, body),
            NodeKind::Case { arms } => self.check_case(&arms, span),
            NodeKind::If {
                conds,
                bodies,
                else_body,
            } => {
                for &c in &conds {
                    self.expect_bool(c);
                }
                for &b in &bodies {
                    self.check_expr(b);
                }
                if let Some(e) = else_body {
                    self.check_expr(e);
                }
                TypeId::VOID
            }
            NodeKind::While { cond, body } => {
                self.expect_bool(cond);
                self.loop_depth += 1;
                self.check_expr(body);
                self.loop_depth -= 1;
                TypeId::VOID
            }
            NodeKind::For { iters, body } => {
                for &iter in &iters {
                    match self.ast.kind(iter) {
                        NodeKind::Decl {
                            kind: DeclKind::In, ..
                        } => {
                            self.check_expr(iter);
                        }
                        _ => {
                            self.error(
                                self.ast.span(iter),
                                "a `for` iterator must have the form `name in container`",
                            );
                        }
                    }
                }
                self.loop_depth += 1;
                self.check_expr(body);
                self.loop_depth -= 1;
                TypeId::VOID
            }
            NodeKind::Jump { kind, value } => self.check_jump(kind, value, span),
            NodeKind::Stmts { list } => {
                for &stmt in &list {
                    self.check_expr(stmt);
                }
                TypeId::VOID
            }
            NodeKind::CommaList { elems } => {
                let types: Vec<TypeId> = elems.iter().map(|&e| self.check_expr(e)).collect();
                if elems.is_empty() {
                    // `()` in type position is the empty input list.
                    self.out.node_consts.insert(node, ConstVal::Type(TypeId::VOID));
                    return TypeId::TYPE;
                }
                self.ctx.tup(types)
            }
        }
    }

    fn check_terminal(&mut self, node: NodeId, value: TermValue) -> TypeId {
        let (ty, cv) = match value {
            TermValue::Int(v) => (TypeId::I32, Some(ConstVal::Int(v))),
            TermValue::Real(v) => (TypeId::F64, Some(ConstVal::Real(v))),
            TermValue::Char(c) => (TypeId::CHAR, Some(ConstVal::Char(c))),
            TermValue::Str(s) => (TypeId::BYTE_VIEW, Some(ConstVal::Str(s))),
            TermValue::Bool(b) => (TypeId::BOOL, Some(ConstVal::Bool(b))),
            TermValue::Null => (TypeId::NULLPTR, Some(ConstVal::Null)),
            TermValue::Prim(k) => (TypeId::TYPE, Some(ConstVal::Type(self.ctx.prim(k)))),
        };
        if let Some(c) = cv {
            self.out.node_consts.insert(node, c);
        }
        ty
    }

    fn check_ident(&mut self, node: NodeId, name: &str, span: Span) -> TypeId {
        let decls = self
            .scopes
            .ident_decls
            .get(&node)
            .cloned()
            .unwrap_or_default();
        match decls.len() {
            0 => {
                if let Some(shape) = foreign_signature(name) {
                    return shape_type(self.ctx, shape);
                }
                self.error(span, format!("undeclared identifier `{}`", name))
            }
            1 => {
                let t = self.check_decl(decls[0]);
                if let Some(c) = self.out.decl_consts.get(&decls[0]).cloned() {
                    self.out.node_consts.insert(node, c);
                }
                t
            }
            _ => {
                let options: Vec<TypeId> = decls.iter().map(|&d| self.check_decl(d)).collect();
                if options.contains(&TypeId::ERROR) {
                    return TypeId::ERROR;
                }
                self.ctx.overloads(options)
            }
        }
    }

    fn expect_bool(&mut self, node: NodeId) {
        let t = self.check_expr(node);
        if t != TypeId::BOOL && t != TypeId::ERROR {
            self.error(
                self.ast.span(node),
                format!("condition must be bool, found {}", self.ctx.display(t)),
            );
        }
    }

    fn check_unop(&mut self, node: NodeId, op: UnOp, operand: NodeId, span: Span) -> TypeId {
        let t = self.check_expr(operand);
        if t == TypeId::ERROR {
            return TypeId::ERROR;
        }
        let operand_const = self.out.node_consts.get(&operand).cloned();
        match op {
            UnOp::Neg => {
                if let Some(k) = self.ctx.prim_of(t) {
                    if k.is_numeric() {
                        match operand_const {
                            Some(ConstVal::Int(v)) => {
                                self.out
                                    .node_consts
                                    .insert(node, ConstVal::Int(v.wrapping_neg()));
                            }
                            Some(ConstVal::Real(v)) => {
                                self.out.node_consts.insert(node, ConstVal::Real(-v));
                            }
                            _ => {}
                        }
                        return t;
                    }
                }
                if matches!(&*self.ctx.get(t), Type::Struct(_)) {
                    if let Some(res) = self.op_overload(node, "__neg__", &[t], span) {
                        return res;
                    }
                }
                self.error(span, format!("cannot negate a value of type {}", self.ctx.display(t)))
            }
            UnOp::Not => match &*self.ctx.get(t) {
                Type::Prim(PrimKind::Bool) => {
                    if let Some(ConstVal::Bool(b)) = operand_const {
                        self.out.node_consts.insert(node, ConstVal::Bool(!b));
                    }
                    TypeId::BOOL
                }
                Type::Flags(_) => t,
                _ => self.error(span, "`!` requires a bool or flags operand"),
            },
            UnOp::Addr => {
                if t == TypeId::TYPE {
                    // On a type value, `&` is the pointer-type constructor.
                    match operand_const.and_then(|c| c.as_type()) {
                        Some(inner) => {
                            let p = self.ctx.ptr(inner);
                            self.out.node_consts.insert(node, ConstVal::Type(p));
                            TypeId::TYPE
                        }
                        None => self.error(span, "cannot form a pointer to a non-constant type"),
                    }
                } else {
                    self.ctx.ptr(t)
                }
            }
            UnOp::Deref => match &*self.ctx.get(t) {
                Type::Ptr { pointee } | Type::BufPtr { pointee } => *pointee,
                _ => self.error(
                    span,
                    format!("cannot dereference a value of type {}", self.ctx.display(t)),
                ),
            },
            UnOp::Print => TypeId::VOID,
            UnOp::Free => match &*self.ctx.get(t) {
                Type::Ptr { .. } | Type::BufPtr { .. } => TypeId::VOID,
                _ => self.error(span, "`free` requires a pointer operand"),
            },
        }
    }

    /// Looks up a user operator overload (`__add__`, ...) whose parameter
    /// types match exactly; records the winner for lowering.
    fn op_overload(
        &mut self,
        node: NodeId,
        name: &str,
        args: &[TypeId],
        span: Span,
    ) -> Option<TypeId> {
        let candidates = self.scopes.lookup(self.scopes.root(), name);
        let mut matched = Vec::new();
        for d in candidates {
            let dt = self.check_decl(d);
            if let Type::Func { params, results } = &*self.ctx.get(dt) {
                if params.as_slice() == args {
                    matched.push((d, self.ctx.tup(results.clone())));
                }
            }
        }
        match matched.len() {
            0 => None,
            1 => {
                self.out.op_overloads.insert(node, matched[0].0);
                Some(matched[0].1)
            }
            _ => {
                self.error(span, format!("ambiguous `{}` overload", name));
                Some(TypeId::ERROR)
            }
        }
    }

    fn check_binop(&mut self, node: NodeId, op: BinOp, lhs: NodeId, rhs: NodeId, span: Span) -> TypeId {
        let lt = self.check_expr(lhs);

        if op == BinOp::Arrow {
            // Function-type constructor: both sides are type lists.
            let params = self.type_list(lhs);
            let results = self.type_list(rhs);
            if params.contains(&TypeId::ERROR) || results.contains(&TypeId::ERROR) {
                return TypeId::ERROR;
            }
            let f = self.ctx.func(params, results);
            self.out.node_consts.insert(node, ConstVal::Type(f));
            return TypeId::TYPE;
        }

        let rt = self.check_expr(rhs);
        if lt == TypeId::ERROR || rt == TypeId::ERROR {
            return TypeId::ERROR;
        }

        if op.is_assign() {
            return self.check_assign(op, lt, rt, span);
        }

        match op {
            BinOp::Range => {
                let lk = self.ctx.prim_of(lt);
                if lt == rt && lk.map(|k| k.is_integer()).unwrap_or(false) {
                    self.ctx.range(lt)
                } else {
                    self.error(span, "range bounds must be matching integers")
                }
            }
            BinOp::Xor => match (&*self.ctx.get(lt), &*self.ctx.get(rt)) {
                (Type::Prim(PrimKind::Bool), Type::Prim(PrimKind::Bool)) => TypeId::BOOL,
                (Type::Flags(_), Type::Flags(_)) if lt == rt => lt,
                _ => self.error(span, "`xor` requires matching bool or flags operands"),
            },
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                // Composition: (b -> c) * (a -> b).
                if op == BinOp::Mul {
                    if let (Type::Func { params: fp, results: fr }, Type::Func { params: gp, results: gr }) =
                        (&*self.ctx.get(lt), &*self.ctx.get(rt))
                    {
                        if fp.as_slice() == gr.as_slice() {
                            return self.ctx.func(gp.clone(), fr.clone());
                        }
                        return self.error(span, "function composition requires the middle types to align");
                    }
                }
                if op == BinOp::Add && lt == TypeId::BYTE_VIEW && rt == TypeId::BYTE_VIEW {
                    return TypeId::BYTE_VIEW;
                }
                let (lk, rk) = (self.ctx.prim_of(lt), self.ctx.prim_of(rt));
                match (lk, rk) {
                    (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() && lt == rt => {
                        self.fold_arith(node, op, lhs, rhs);
                        lt
                    }
                    _ => {
                        let name = match op {
                            BinOp::Add => "__add__",
                            BinOp::Sub => "__sub__",
                            BinOp::Mul => "__mul__",
                            BinOp::Div => "__div__",
                            _ => "__mod__",
                        };
                        let structy = matches!(&*self.ctx.get(lt), Type::Struct(_))
                            || matches!(&*self.ctx.get(rt), Type::Struct(_));
                        if structy {
                            if let Some(res) = self.op_overload(node, name, &[lt, rt], span) {
                                return res;
                            }
                        }
                        self.error(
                            span,
                            format!(
                                "operands of types {} and {} do not match",
                                self.ctx.display(lt),
                                self.ctx.display(rt)
                            ),
                        )
                    }
                }
            }
            _ => self.error(span, "operator is not valid here"),
        }
    }

    fn fold_arith(&mut self, node: NodeId, op: BinOp, lhs: NodeId, rhs: NodeId) {
        let (a, b) = (
            self.out.node_consts.get(&lhs).cloned(),
            self.out.node_consts.get(&rhs).cloned(),
        );
        let folded = match (a, b) {
            (Some(ConstVal::Int(x)), Some(ConstVal::Int(y))) => match op {
                BinOp::Add => Some(ConstVal::Int(x.wrapping_add(y))),
                BinOp::Sub => Some(ConstVal::Int(x.wrapping_sub(y))),
                BinOp::Mul => Some(ConstVal::Int(x.wrapping_mul(y))),
                BinOp::Div if y != 0 => Some(ConstVal::Int(x.wrapping_div(y))),
                BinOp::Mod if y != 0 => Some(ConstVal::Int(x.wrapping_rem(y))),
                _ => None,
            },
            (Some(ConstVal::Real(x)), Some(ConstVal::Real(y))) => match op {
                BinOp::Add => Some(ConstVal::Real(x + y)),
                BinOp::Sub => Some(ConstVal::Real(x - y)),
                BinOp::Mul => Some(ConstVal::Real(x * y)),
                BinOp::Div => Some(ConstVal::Real(x / y)),
                _ => None,
            },
            _ => None,
        };
        if let Some(c) = folded {
            self.out.node_consts.insert(node, c);
        }
    }

    fn check_assign(&mut self, op: BinOp, lt: TypeId, rt: TypeId, span: Span) -> TypeId {
        match op {
            BinOp::Assign => {
                if !self.assignable(lt, rt) {
                    self.error(
                        span,
                        format!(
                            "cannot assign a value of type {} to a target of type {}",
                            self.ctx.display(rt),
                            self.ctx.display(lt)
                        ),
                    );
                }
            }
            BinOp::AndAssign | BinOp::OrAssign | BinOp::XorAssign => {
                let ok = (lt == rt && matches!(&*self.ctx.get(lt), Type::Flags(_)))
                    || (lt == TypeId::BOOL && rt == TypeId::BOOL);
                if !ok {
                    self.error(span, "compound bit assignment requires matching bool or flags");
                }
            }
            _ => {
                let numeric = self
                    .ctx
                    .prim_of(lt)
                    .map(|k| k.is_numeric())
                    .unwrap_or(false);
                if !(numeric && lt == rt) {
                    self.error(span, "compound assignment requires matching numeric operands");
                }
            }
        }
        TypeId::VOID
    }

    fn check_chain(&mut self, ops: &[ChainOp], exprs: &[NodeId], span: Span) -> TypeId {
        let types: Vec<TypeId> = exprs.iter().map(|&e| self.check_expr(e)).collect();
        if types.contains(&TypeId::ERROR) {
            return TypeId::ERROR;
        }
        let comparison = ops.iter().all(|o| o.is_comparison());
        if comparison {
            // All operand types must match pairwise.
            let first = types[0];
            if types.iter().any(|&t| self.ctx.join(first, t) != Some(first)) {
                return self.error(span, "chained comparison operands must share one type");
            }
            let ordered = ops
                .iter()
                .any(|o| matches!(o, ChainOp::Lt | ChainOp::Le | ChainOp::Gt | ChainOp::Ge));
            let comparable = match &*self.ctx.get(first) {
                Type::Prim(k) => {
                    if ordered {
                        k.is_numeric() || *k == PrimKind::Char
                    } else {
                        k.is_numeric()
                            || matches!(
                                k,
                                PrimKind::Bool | PrimKind::Char | PrimKind::Type | PrimKind::NullPtr
                            )
                    }
                }
                Type::Enum(_) | Type::Flags(_) => true,
                Type::Ptr { .. } | Type::BufPtr { .. } => !ordered,
                _ => false,
            };
            if !comparable {
                return self.error(
                    span,
                    format!("values of type {} cannot be compared here", self.ctx.display(first)),
                );
            }
            TypeId::BOOL
        } else {
            for (&e, &t) in exprs.iter().zip(types.iter()) {
                if t != TypeId::BOOL {
                    self.error(
                        self.ast.span(e),
                        format!("`and`/`or` operands must be bool, found {}", self.ctx.display(t)),
                    );
                }
            }
            TypeId::BOOL
        }
    }

    fn check_access(&mut self, node: NodeId, operand: NodeId, member: &str, span: Span) -> TypeId {
        let ot = self.check_expr(operand);
        if ot == TypeId::ERROR {
            return TypeId::ERROR;
        }
        match &*self.ctx.get(ot) {
            Type::Struct(def) => match def.fields.iter().find(|f| f.name == member) {
                Some(f) => f.ty,
                None => self.error(
                    span,
                    format!("struct {} has no field `{}`", def.name, member),
                ),
            },
            Type::Prim(PrimKind::Type) => {
                let inner = self
                    .out
                    .node_consts
                    .get(&operand)
                    .and_then(|c| c.as_type());
                let inner = match inner {
                    Some(t) => t,
                    None => {
                        return self.error(span, "member access on a non-constant type")
                    }
                };
                match member {
                    "bytes" => {
                        let n = self.arch.bytes(self.ctx, inner);
                        self.out.node_consts.insert(node, ConstVal::Int(n as i64));
                        TypeId::I64
                    }
                    "align" => {
                        let n = self.arch.alignment(self.ctx, inner);
                        self.out.node_consts.insert(node, ConstVal::Int(n as i64));
                        TypeId::I64
                    }
                    _ => match &*self.ctx.get(inner) {
                        Type::Enum(def) => match def.members.get(member) {
                            Some(&v) => {
                                self.out.node_consts.insert(node, ConstVal::Uint(v));
                                inner
                            }
                            None => self.error(
                                span,
                                format!("enum {} has no member `{}`", def.name, member),
                            ),
                        },
                        Type::Flags(def) => match def.members.get(member) {
                            Some(&v) => {
                                self.out.node_consts.insert(node, ConstVal::Uint(v));
                                inner
                            }
                            None => self.error(
                                span,
                                format!("flags {} has no member `{}`", def.name, member),
                            ),
                        },
                        _ => self.error(
                            span,
                            format!(
                                "type {} has no member `{}`",
                                self.ctx.display(inner),
                                member
                            ),
                        ),
                    },
                }
            }
            Type::Ptr { pointee } => {
                // One implicit dereference for field access through pointers.
                match &*self.ctx.get(*pointee) {
                    Type::Struct(def) => match def.fields.iter().find(|f| f.name == member) {
                        Some(f) => f.ty,
                        None => self.error(
                            span,
                            format!("struct {} has no field `{}`", def.name, member),
                        ),
                    },
                    _ => self.error(span, "member access requires a struct operand"),
                }
            }
            _ => self.error(
                span,
                format!(
                    "a value of type {} has no member `{}`",
                    self.ctx.display(ot),
                    member
                ),
            ),
        }
    }

    fn check_index(&mut self, operand: NodeId, index: NodeId, span: Span) -> TypeId {
        let ot = self.check_expr(operand);
        let it = self.check_expr(index);
        let idx_ok = it == TypeId::ERROR
            || self
                .ctx
                .prim_of(it)
                .map(|k| k.is_integer())
                .unwrap_or(false);
        if !idx_ok {
            self.error(
                self.ast.span(index),
                format!("index must be an integer, found {}", self.ctx.display(it)),
            );
        }
        match &*self.ctx.get(ot) {
            Type::Error => TypeId::ERROR,
            Type::Arr { elem, .. } => *elem,
            Type::BufPtr { pointee } => *pointee,
            Type::Prim(PrimKind::ByteView) => TypeId::CHAR,
            _ => self.error(
                span,
                format!("cannot index a value of type {}", self.ctx.display(ot)),
            ),
        }
    }

    fn check_array_lit(&mut self, elems: &[NodeId], span: Span) -> TypeId {
        if elems.is_empty() {
            return TypeId::EMPTY_ARRAY;
        }
        let mut joined = self.check_expr(elems[0]);
        for &e in &elems[1..] {
            let t = self.check_expr(e);
            match self.ctx.join(joined, t) {
                Some(j) => joined = j,
                None => {
                    return self.error(span, "inconsistent types in array literal");
                }
            }
        }
        if joined == TypeId::ERROR {
            return TypeId::ERROR;
        }
        self.ctx.arr(joined, Some(elems.len() as u64))
    }

    fn check_array_type(&mut self, node: NodeId, len: Option<NodeId>, elem: NodeId) -> TypeId {
        let length = match len {
            None => None,
            Some(l) => {
                self.check_expr(l);
                match self.out.node_consts.get(&l).and_then(|c| c.as_int()) {
                    Some(n) if n >= 0 => Some(n as u64),
                    _ => {
                        self.error(
                            self.ast.span(l),
                            "array length must be a non-negative compile-time integer",
                        );
                        return TypeId::ERROR;
                    }
                }
            }
        };
        let elem_ty = self.eval_const_type(elem);
        if elem_ty == TypeId::ERROR {
            return TypeId::ERROR;
        }
        let arr = self.ctx.arr(elem_ty, length);
        self.out.node_consts.insert(node, ConstVal::Type(arr));
        TypeId::TYPE
    }

    fn check_struct_lit(
        &mut self,
        node: NodeId,
        params: &[NodeId],
        fields: &[NodeId],
        pending_name: Option<String>,
    ) -> TypeId {
        let name = pending_name.unwrap_or_else(|| "<struct>".to_string());
        let scope = self
            .scopes
            .construct_scopes
            .get(&node)
            .copied()
            .unwrap_or_else(|| self.scopes.root());

        if !params.is_empty() {
            // A parameterized struct instantiates per bound-constants set.
            let def = GenericDef {
                name,
                module: self.module,
                params: params
                    .iter()
                    .filter_map(|&p| match self.ast.kind(p) {
                        NodeKind::Decl { name, .. } => Some(name.clone()),
                        _ => None,
                    })
                    .collect(),
                lit: node,
            };
            let id = self.ctx.generic_type(def);
            self.out.node_consts.insert(node, ConstVal::Type(id));
            return TypeId::TYPE;
        }

        let mut out_fields = Vec::new();
        for &field in fields {
            match self.ast.kind(field).clone() {
                NodeKind::Decl { name, init, .. } => {
                    self.check_expr(field);
                    let d = self.scopes.node_decl.get(&field).copied();
                    let fty = d
                        .map(|d| self.check_decl(d))
                        .unwrap_or(TypeId::ERROR);
                    let init_val = init.and_then(|i| self.field_init_const(i));
                    out_fields.push(StructField {
                        name,
                        ty: fty,
                        init: init_val,
                        hashtags: vec![],
                    });
                }
                _ => {
                    self.error(
                        self.ast.span(field),
                        "struct bodies may only contain field declarations",
                    );
                }
            }
        }
        let id = self.ctx.struct_type(StructDef {
            name,
            scope,
            module: self.module,
            fields: out_fields,
            hashtags: vec![],
        });
        self.out.node_consts.insert(node, ConstVal::Type(id));
        TypeId::TYPE
    }

    fn field_init_const(&mut self, init: NodeId) -> Option<FieldInit> {
        match self.out.node_consts.get(&init)? {
            ConstVal::Bool(b) => Some(FieldInit::Bool(*b)),
            ConstVal::Char(c) => Some(FieldInit::Char(*c)),
            ConstVal::Int(i) => Some(FieldInit::Int(*i)),
            ConstVal::Uint(u) => Some(FieldInit::Uint(*u)),
            ConstVal::Real(r) => Some(FieldInit::Real(*r)),
            _ => None,
        }
    }

    fn check_fn_lit(
        &mut self,
        node: NodeId,
        inputs: &[NodeId],
        ret: Option<NodeId>,
        body: NodeId,
    ) -> TypeId {
        let mut params = Vec::new();
        for &input in inputs {
            match self.ast.kind(input) {
                NodeKind::Decl { .. } => {
                    self.check_expr(input);
                    let t = self
                        .scopes
                        .node_decl
                        .get(&input)
                        .copied()
                        .map(|d| self.check_decl(d))
                        .unwrap_or(TypeId::ERROR);
                    params.push(t);
                }
                // An unnamed input is just its type.
                _ => params.push(self.eval_const_type(input)),
            }
        }
        let results = match ret {
            None => vec![],
            Some(r) => self.type_list(r),
        };
        self.out.fn_results.insert(node, results.clone());
        self.ret_stack.push(results.clone());
        let saved_depth = self.loop_depth;
        self.loop_depth = 0;
        self.check_expr(body);
        self.loop_depth = saved_depth;
        self.ret_stack.pop();
        self.ctx.func(params, results)
    }

    fn check_case(&mut self, arms: &[(NodeId, NodeId)], span: Span) -> TypeId {
        if arms.is_empty() {
            return self.error(span, "`case` requires at least one arm");
        }
        let mut joined = TypeId::UNKNOWN;
        for &(key, value) in arms {
            self.expect_bool(key);
            let vt = self.check_expr(value);
            match self.ctx.join(joined, vt) {
                Some(j) => joined = j,
                None => {
                    return self.error(span, "`case` values do not share one type");
                }
            }
        }
        joined
    }

    fn check_jump(&mut self, kind: JumpKind, value: Option<NodeId>, span: Span) -> TypeId {
        match kind {
            JumpKind::Return => {
                let expected = self.ret_stack.last().cloned();
                match expected {
                    None => {
                        self.error(span, "`return` outside a function");
                    }
                    Some(results) => {
                        let vt = value.map(|v| self.check_expr(v));
                        match (results.as_slice(), vt) {
                            ([], None) => {}
                            ([], Some(t)) if t == TypeId::VOID || t == TypeId::ERROR => {}
                            ([], Some(_)) => {
                                self.error(span, "this function does not return a value");
                            }
                            ([_one], None) => {
                                self.error(span, "`return` is missing its value");
                            }
                            ([one], Some(t)) => {
                                if !self.assignable(*one, t) {
                                    self.error(
                                        span,
                                        format!(
                                            "returned {} but the function yields {}",
                                            self.ctx.display(t),
                                            self.ctx.display(*one)
                                        ),
                                    );
                                }
                            }
                            (many, Some(t)) => {
                                let expected_tup = self.ctx.tup(many.to_vec());
                                if !self.assignable(expected_tup, t) {
                                    self.error(span, "returned values do not match the function results");
                                }
                            }
                            (_, None) => {
                                self.error(span, "`return` is missing its values");
                            }
                        }
                    }
                }
            }
            JumpKind::Break | JumpKind::Continue | JumpKind::Repeat | JumpKind::Restart => {
                if self.loop_depth == 0 {
                    self.error(span, "loop jump outside a loop");
                }
            }
        }
        TypeId::VOID
    }

    // ---- calls ----------------------------------------------------------

    fn check_call(
        &mut self,
        node: NodeId,
        callee: NodeId,
        positional: &[NodeId],
        named: &[(String, NodeId)],
        span: Span,
    ) -> TypeId {
        // The cast builtin: cast(T, v).
        if let NodeKind::Ident { name } = self.ast.kind(callee) {
            let unresolved = self
                .scopes
                .ident_decls
                .get(&callee)
                .map(|d| d.is_empty())
                .unwrap_or(true);
            if name == "cast" && unresolved {
                return self.check_cast(node, positional, named, span);
            }
        }

        let pos_types: Vec<TypeId> = positional.iter().map(|&a| self.check_expr(a)).collect();
        let named_types: Vec<(String, TypeId)> = named
            .iter()
            .map(|(n, a)| (n.clone(), self.check_expr(*a)))
            .collect();

        let ct = self.check_expr(callee);
        if ct == TypeId::ERROR || pos_types.contains(&TypeId::ERROR) {
            return TypeId::ERROR;
        }

        // A call on a compile-time type value: generic instantiation.
        if ct == TypeId::TYPE {
            let inner = self
                .out
                .node_consts
                .get(&callee)
                .and_then(|c| c.as_type());
            if let Some(g) = inner {
                if matches!(&*self.ctx.get(g), Type::Generic(_)) {
                    return self.instantiate_generic(node, g, positional, span);
                }
            }
            return self.error(span, "this type is not callable");
        }

        match &*self.ctx.get(ct) {
            Type::Func { params, results } => {
                let params = params.clone();
                let results = results.clone();
                let names = self.param_names_for_callee(callee);
                if !self.args_match(&params, names.as_deref(), &pos_types, &named_types) {
                    return self.error(
                        span,
                        format!("arguments do not match {}", self.ctx.display(ct)),
                    );
                }
                self.ctx.tup(results)
            }
            Type::Overloads { .. } => {
                let decls = self
                    .scopes
                    .ident_decls
                    .get(&callee)
                    .cloned()
                    .unwrap_or_default();
                let mut matched = Vec::new();
                for d in decls {
                    let dt = self.check_decl(d);
                    if let Type::Func { params, results } = &*self.ctx.get(dt) {
                        let params = params.clone();
                        let results = results.clone();
                        let names = self.decl_param_names(d);
                        if self.args_match(&params, names.as_deref(), &pos_types, &named_types) {
                            matched.push((d, results));
                        }
                    }
                }
                match matched.len() {
                    0 => self.error(span, "no matching overload for this call"),
                    1 => {
                        let (d, results) = matched.swap_remove(0);
                        self.out.call_targets.insert(node, d);
                        self.ctx.tup(results)
                    }
                    _ => self.error(span, "ambiguous call: more than one overload matches"),
                }
            }
            _ => self.error(
                span,
                format!("cannot call a value of type {}", self.ctx.display(ct)),
            ),
        }
    }

    fn args_match(
        &self,
        params: &[TypeId],
        names: Option<&[String]>,
        pos: &[TypeId],
        named: &[(String, TypeId)],
    ) -> bool {
        if pos.len() + named.len() != params.len() {
            return false;
        }
        for (i, &arg) in pos.iter().enumerate() {
            if !self.assignable(params[i], arg) {
                return false;
            }
        }
        if named.is_empty() {
            return true;
        }
        let names = match names {
            Some(n) => n,
            None => return false,
        };
        let mut used = vec![false; params.len()];
        for (name, arg) in named {
            match names.iter().position(|n| n == name) {
                Some(i) if i >= pos.len() && !used[i] => {
                    if !self.assignable(params[i], *arg) {
                        return false;
                    }
                    used[i] = true;
                }
                _ => return false,
            }
        }
        true
    }

    fn param_names_for_callee(&mut self, callee: NodeId) -> Option<Vec<String>> {
        let decls = self.scopes.ident_decls.get(&callee)?;
        if decls.len() != 1 {
            return None;
        }
        self.decl_param_names(decls[0])
    }

    fn decl_param_names(&self, d: DeclId) -> Option<Vec<String>> {
        let node = self.scopes.decl(d).node;
        if let NodeKind::Decl { init: Some(init), .. } = self.ast.kind(node) {
            if let NodeKind::FnLit { inputs, .. } = self.ast.kind(*init) {
                let names = inputs
                    .iter()
                    .map(|&i| match self.ast.kind(i) {
                        NodeKind::Decl { name, .. } => name.clone(),
                        _ => String::new(),
                    })
                    .collect();
                return Some(names);
            }
        }
        None
    }

    fn check_cast(
        &mut self,
        node: NodeId,
        positional: &[NodeId],
        named: &[(String, NodeId)],
        span: Span,
    ) -> TypeId {
        if positional.len() != 2 || !named.is_empty() {
            return self.error(span, "cast takes exactly two arguments: cast(T, value)");
        }
        let target = self.eval_const_type(positional[0]);
        let vt = self.check_expr(positional[1]);
        if target == TypeId::ERROR || vt == TypeId::ERROR {
            return TypeId::ERROR;
        }
        let vk = self.ctx.prim_of(vt);
        let tk = self.ctx.prim_of(target);
        let ptr_like = |t: TypeId| {
            matches!(
                &*self.ctx.get(t),
                Type::Ptr { .. } | Type::BufPtr { .. }
            )
        };
        let allowed = match (vk, tk) {
            (Some(v), Some(t)) if v == PrimKind::Bool && t.is_numeric() => true,
            (Some(v), Some(t)) if v.is_integer() && t.is_integer() => true,
            (Some(v), Some(t)) if v.is_integer() && t.is_real() => true,
            _ => ptr_like(vt) && ptr_like(target),
        };
        if !allowed {
            return self.error(
                span,
                format!(
                    "cannot cast {} to {}",
                    self.ctx.display(vt),
                    self.ctx.display(target)
                ),
            );
        }
        // Fold constant casts.
        let folded = match self.out.node_consts.get(&positional[1]) {
            Some(ConstVal::Bool(b)) if tk.map(|t| t.is_integer()).unwrap_or(false) => {
                Some(ConstVal::Int(*b as i64))
            }
            Some(ConstVal::Int(i)) if tk.map(|t| t.is_real()).unwrap_or(false) => {
                Some(ConstVal::Real(*i as f64))
            }
            Some(ConstVal::Int(i)) if tk.map(|t| t.is_integer()).unwrap_or(false) => {
                Some(ConstVal::Int(*i))
            }
            _ => None,
        };
        if let Some(c) = folded {
            self.out.node_consts.insert(node, c);
        }
        target
    }

    fn instantiate_generic(
        &mut self,
        node: NodeId,
        generic: TypeId,
        args: &[NodeId],
        span: Span,
    ) -> TypeId {
        let def = match &*self.ctx.get(generic) {
            Type::Generic(def) => def.clone(),
            _ => return TypeId::ERROR,
        };
        let (param_nodes, field_nodes) = match self.ast.kind(def.lit) {
            NodeKind::StructLit { params, fields } => (params.clone(), fields.clone()),
            _ => return TypeId::ERROR,
        };
        if args.len() != param_nodes.len() {
            return self.error(
                span,
                format!(
                    "{} takes {} compile-time arguments, got {}",
                    def.name,
                    param_nodes.len(),
                    args.len()
                ),
            );
        }
        let mut values = Vec::new();
        let mut keys = Vec::new();
        for &arg in args {
            self.check_expr(arg);
            let cv = match self.out.node_consts.get(&arg).cloned() {
                Some(c) => c,
                None => {
                    return self.error(
                        self.ast.span(arg),
                        "generic arguments must be compile-time constants",
                    )
                }
            };
            let key = match cv.key() {
                Some(k) => k,
                None => {
                    return self.error(
                        self.ast.span(arg),
                        "this constant cannot be used as a generic argument",
                    )
                }
            };
            values.push(cv);
            keys.push(key);
        }

        if let Some(cached) = self.ctx.generic_inst(generic, &keys) {
            self.out.node_consts.insert(node, ConstVal::Type(cached));
            return TypeId::TYPE;
        }

        // Register the identity before checking the fields so recursive
        // uses hit the cache instead of recursing.
        let scope = self
            .scopes
            .construct_scopes
            .get(&def.lit)
            .copied()
            .unwrap_or_else(|| self.scopes.root());
        let inst = self.ctx.struct_type(StructDef {
            name: format!("{}(...)", def.name),
            scope,
            module: self.module,
            fields: vec![],
            hashtags: vec![],
        });
        let inst = self.ctx.cache_generic_inst(generic, keys, inst);

        // Bind the parameters, clear stale results, and re-check fields.
        let mut saved: Vec<(DeclId, Option<TypeId>, Option<ConstVal>)> = Vec::new();
        for (&p, v) in param_nodes.iter().zip(values.iter()) {
            if let Some(&d) = self.scopes.node_decl.get(&p) {
                saved.push((
                    d,
                    self.out.decl_types.get(&d).copied(),
                    self.out.decl_consts.get(&d).cloned(),
                ));
                let bound_ty = match v {
                    ConstVal::Type(_) => TypeId::TYPE,
                    ConstVal::Int(_) => TypeId::I32,
                    ConstVal::Uint(_) => TypeId::U64,
                    ConstVal::Bool(_) => TypeId::BOOL,
                    ConstVal::Char(_) => TypeId::CHAR,
                    _ => TypeId::ERROR,
                };
                self.out.decl_types.insert(d, bound_ty);
                self.out.decl_consts.insert(d, v.clone());
            }
        }

        let mut out_fields = Vec::new();
        for &field in &field_nodes {
            self.clear_subtree(field);
            if let NodeKind::Decl { name, init, .. } = self.ast.kind(field).clone() {
                if let Some(&d) = self.scopes.node_decl.get(&field) {
                    self.out.decl_types.remove(&d);
                    let fty = self.check_decl(d);
                    let init_val = init.and_then(|i| self.field_init_const(i));
                    out_fields.push(StructField {
                        name,
                        ty: fty,
                        init: init_val,
                        hashtags: vec![],
                    });
                }
            }
        }
        self.ctx.update(
            inst,
            Type::Struct(StructDef {
                name: format!("{}(...)", def.name),
                scope,
                module: self.module,
                fields: out_fields,
                hashtags: vec![],
            }),
        );

        for (d, ty, cv) in saved {
            match ty {
                Some(t) => {
                    self.out.decl_types.insert(d, t);
                }
                None => {
                    self.out.decl_types.remove(&d);
                }
            }
            match cv {
                Some(c) => {
                    self.out.decl_consts.insert(d, c);
                }
                None => {
                    self.out.decl_consts.remove(&d);
                }
            }
        }

        self.out.node_consts.insert(node, ConstVal::Type(inst));
        TypeId::TYPE
    }

    fn clear_subtree(&mut self, node: NodeId) {
        self.out.types.remove(&node);
        self.out.node_consts.remove(&node);
        for child in self.ast.children(node) {
            self.clear_subtree(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::assign_scopes;
    use tern_core::source::SourceBuffer;
    use tern_syntax::lexer::lex;
    use tern_syntax::parser::parse_module;

    fn check(text: &str) -> (Ast, NodeId, Checked, TypeContext, ErrorLog) {
        let src = SourceBuffer::new("test", text);
        let mut log = ErrorLog::new();
        let tokens = lex(&src, &mut log);
        let (ast, root) = parse_module(&tokens, &mut log);
        let scopes = assign_scopes(&ast, root, &mut log);
        let ctx = TypeContext::new();
        let checked = check_module(
            &ast,
            root,
            &scopes,
            &ctx,
            Arch::default(),
            ModuleId(0),
            &mut log,
        );
        (ast, root, checked, ctx, log)
    }

    fn decl_init_type(text: &str, which: usize) -> (TypeId, TypeContext, ErrorLog) {
        let (ast, root, checked, ctx, log) = check(text);
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let init = match ast.kind(list[which]) {
            NodeKind::Decl { init: Some(i), .. } => *i,
            other => panic!("expected decl, got {:?}", other),
        };
        (checked.type_of(init), ctx, log)
    }

    #[test]
    fn every_checked_node_has_a_type() {
        let (ast, _, checked, _, log) = check("x := 1 + 2 * 3\ny := x < 4");
        assert!(!log.has_errors());
        for (&node, &t) in &checked.types {
            assert_ne!(t, TypeId::UNKNOWN, "node {:?} missing a real type", ast.kind(node));
        }
    }

    #[test]
    fn arithmetic_types_and_folding() {
        let (ast, root, checked, _, log) = check("x ::= 2 + 3 * 4");
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let init = match ast.kind(list[0]) {
            NodeKind::Decl { init: Some(i), .. } => *i,
            _ => unreachable!(),
        };
        assert_eq!(checked.type_of(init), TypeId::I32);
        assert_eq!(checked.const_of(init), Some(&ConstVal::Int(14)));
    }

    #[test]
    fn array_literal_joins_and_inconsistency_errors() {
        let (t, ctx, log) = decl_init_type("a := [1, 2, 3]", 0);
        assert!(!log.has_errors());
        assert_eq!(t, ctx.arr(TypeId::I32, Some(3)));

        let (t, _, log) = decl_init_type("a := [1, true]", 0);
        assert!(log.has_errors());
        assert_eq!(t, TypeId::ERROR);
        // One message for one root cause.
        assert_eq!(
            log.entries()
                .iter()
                .filter(|d| d.severity == tern_core::diag::Severity::Error)
                .count(),
            1
        );
    }

    #[test]
    fn comparison_chain_is_bool_and_mismatches_error() {
        let (_, _, checked, _, log) =
            check("f ::= (a: int32, b: int32, c: int32) -> bool { return a < b < c }");
        assert!(!log.has_errors());
        assert!(checked.types.values().any(|&t| t == TypeId::BOOL));

        let (_, _, _, _, log) = check("f ::= (a: int32, b: float64) -> bool { return a < b }");
        assert!(log.has_errors());
    }

    #[test]
    fn overload_resolution_picks_exactly_one() {
        let source = "add ::= (a: int32, b: int32) -> int32 { return a }\n\
                      add ::= (a: float64, b: float64) -> float64 { return a }\n";
        let (_, _, checked, _, log) = check(&format!("{}x ::= add(1, 2)", source));
        assert!(!log.has_errors());
        assert_eq!(checked.call_targets.len(), 1);

        let (_, _, _, _, log) = check(&format!("{}x ::= add(1.0, 2.0)", source));
        assert!(!log.has_errors());

        let (_, _, _, _, log) = check(&format!("{}x ::= add(1, 2.0)", source));
        assert!(log.has_errors());
        assert!(log
            .entries()
            .iter()
            .any(|d| d.message.contains("no matching overload")));
    }

    #[test]
    fn struct_bytes_is_a_compile_time_constant() {
        let (ast, root, checked, _, log) =
            check("S ::= struct { x: int32; y: int32 }\nn ::= S.bytes");
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let init = match ast.kind(list[1]) {
            NodeKind::Decl { init: Some(i), .. } => *i,
            _ => unreachable!(),
        };
        assert_eq!(checked.const_of(init), Some(&ConstVal::Int(8)));
        assert_eq!(checked.type_of(init), TypeId::I64);
    }

    #[test]
    fn cast_table() {
        let (_, _, _, _, log) = check("x := cast(float64, 3)");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("x := cast(uint32, 3)");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("x := cast(int32, true)");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("x := cast(bool, 3)");
        assert!(log.has_errors());
        let (_, _, _, _, log) = check("x := cast(int32, 1.5)");
        assert!(log.has_errors());
    }

    #[test]
    fn short_circuit_chain_requires_bools() {
        let (_, _, _, _, log) = check("f ::= (a: bool, b: bool) -> bool { return a and b }");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("f ::= (a: bool) -> bool { return a and 3 }");
        assert!(log.has_errors());
    }

    #[test]
    fn case_values_join() {
        let (_, _, _, _, log) =
            check("f ::= (a: bool) -> int32 { return case { a => 1, !a => 2 } }");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("f ::= (a: bool) -> int32 { return case { a => 1, !a => true } }");
        assert!(log.has_errors());
    }

    #[test]
    fn enum_member_access() {
        let (_, _, _, _, log) = check("Dir ::= enum { north, south }\nd ::= Dir.north");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("Dir ::= enum { north, south }\nd ::= Dir.west");
        assert!(log.has_errors());
    }

    #[test]
    fn special_decl_signatures_are_validated() {
        let (_, _, _, _, log) = check(
            "S ::= struct { x: int32 }\n__print__ ::= (s: S) -> void { print s.x }",
        );
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check(
            "S ::= struct { x: int32 }\n__print__ ::= (s: S) -> int32 { return s.x }",
        );
        assert!(log.has_errors());
    }

    #[test]
    fn generic_struct_instantiation_caches() {
        let (ast, root, checked, ctx, log) = check(
            "Pair ::= struct (T: type) { a: T; b: T }\n\
             P1 ::= Pair(int32)\n\
             P2 ::= Pair(int32)\n\
             P3 ::= Pair(float64)",
        );
        assert!(!log.has_errors());
        let list = match ast.kind(root) {
            NodeKind::Stmts { list } => list.clone(),
            _ => unreachable!(),
        };
        let inst = |i: usize| {
            let init = match ast.kind(list[i]) {
                NodeKind::Decl { init: Some(v), .. } => *v,
                _ => unreachable!(),
            };
            checked.const_of(init).and_then(|c| c.as_type()).unwrap()
        };
        assert_eq!(inst(1), inst(2));
        assert_ne!(inst(1), inst(3));
        // The instantiation is a real struct with substituted field types.
        match &*ctx.get(inst(1)) {
            Type::Struct(def) => {
                assert_eq!(def.fields.len(), 2);
                assert_eq!(def.fields[0].ty, TypeId::I32);
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn function_composition_aligns_middle_types() {
        let (_, _, _, _, log) = check(
            "f ::= (x: int32) -> bool { return x == 0 }\n\
             g ::= (x: float64) -> int32 { return cast(int32, cast(int64, 0)) }\n\
             h ::= f * g",
        );
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check(
            "f ::= (x: int32) -> bool { return x == 0 }\n\
             g ::= (x: float64) -> float64 { return x }\n\
             h ::= f * g",
        );
        assert!(log.has_errors());
    }

    #[test]
    fn checker_is_idempotent() {
        let text = "x := [1, true]\ny := x";
        let (_, _, first, _, log1) = check(text);
        let (_, _, second, _, log2) = check(text);
        assert_eq!(first.types.len(), second.types.len());
        assert_eq!(log1.entries().len(), log2.entries().len());
    }

    #[test]
    fn foreign_symbols_type_through_the_closed_table() {
        let (_, _, _, _, log) = check("f ::= () -> int32 { return putchar(65) }");
        assert!(!log.has_errors());
        let (_, _, _, _, log) = check("f ::= () -> int32 { return mystery(65) }");
        assert!(log.has_errors());
    }

    #[test]
    fn error_propagates_without_repeat_reports() {
        let (_, _, _, _, log) = check("x := nope\ny := x + 1\nz := y * 2");
        let errors = log
            .entries()
            .iter()
            .filter(|d| d.severity == tern_core::diag::Severity::Error)
            .count();
        assert_eq!(errors, 1);
    }
}
