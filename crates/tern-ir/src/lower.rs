//! Lowering of the typed AST into IR.
//!
//! Every `::=` function declaration becomes an IR function: an entry block
//! holding the frame's allocas, a body, and an exit block that moves the
//! return-value slots into the caller-provided slots. Expression lowering
//! produces a register-or-constant [`Val`]; lvalue lowering produces an
//! address. Compile-time constants computed by the checker short-circuit
//! straight to constant values.
//!
//! Short-circuit chains, comparisons, conditionals, and loops all follow
//! the landing-block + φ discipline; `ptr_fix` is the only place that
//! decides loads versus addresses.

use std::collections::HashMap;

use tracing::debug;

use tern_core::diag::{ErrorLog, Stage};
use tern_core::id::{BlockId, DeclId, FuncId, NodeId};
use tern_core::intern::{TypeContext, TypeId};
use tern_core::layout::Arch;
use tern_core::types::{PrimKind, Type};
use tern_check::check::Checked;
use tern_check::consts::ConstVal;
use tern_check::scope::ScopeGraph;
use tern_syntax::ast::{Ast, BinOp, ChainOp, DeclKind, JumpKind, NodeKind, TermValue, UnOp};

use crate::builder::FuncBuilder;
use crate::model::{Block, Exit, Func, ModuleIr, Op, Val};

/// Per-type helper functions generated at most once per (kind, type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Helper {
    Init,
    Destroy,
    Copy,
}

/// Per-function lowering state.
pub(crate) struct FnCtx<'a> {
    pub fb: FuncBuilder<'a>,
    pub slots: HashMap<DeclId, Val>,
    pub ret_slots: Vec<Val>,
    pub results: Vec<TypeId>,
    pub loops: Vec<LoopCtx>,
    /// Locals with destructor semantics, in declaration order.
    pub destroys: Vec<(TypeId, Val)>,
}

pub(crate) struct LoopCtx {
    pub continue_to: BlockId,
    pub break_to: BlockId,
    pub repeat_to: BlockId,
    pub restart_to: BlockId,
    /// Blocks that jumped to `restart_to` and must feed the loop φs their
    /// initial values again.
    pub restart_edges: Vec<BlockId>,
}

pub struct Lowerer<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) scopes: &'a ScopeGraph,
    pub(crate) checked: &'a Checked,
    pub(crate) ctx: &'a TypeContext,
    pub(crate) arch: Arch,
    pub(crate) log: &'a mut ErrorLog,
    pub(crate) module: ModuleIr,
    pub(crate) decl_funcs: HashMap<DeclId, FuncId>,
    pub(crate) helpers: HashMap<(Helper, TypeId), FuncId>,
}

/// Lowers a whole module: every top-level constant function declaration.
pub fn lower_module<'a>(
    ast: &'a Ast,
    scopes: &'a ScopeGraph,
    checked: &'a Checked,
    ctx: &'a TypeContext,
    arch: Arch,
    log: &'a mut ErrorLog,
) -> ModuleIr {
    let mut lowerer = Lowerer::new(ast, scopes, checked, ctx, arch, log);
    lowerer.lower_all();
    lowerer.finish()
}

impl<'a> Lowerer<'a> {
    pub fn new(
        ast: &'a Ast,
        scopes: &'a ScopeGraph,
        checked: &'a Checked,
        ctx: &'a TypeContext,
        arch: Arch,
        log: &'a mut ErrorLog,
    ) -> Self {
        Lowerer {
            ast,
            scopes,
            checked,
            ctx,
            arch,
            log,
            module: ModuleIr::default(),
            decl_funcs: HashMap::new(),
            helpers: HashMap::new(),
        }
    }

    pub fn lower_all(&mut self) {
        let top: Vec<DeclId> = self
            .scopes
            .decl_ids()
            .filter(|&d| {
                let info = self.scopes.decl(d);
                info.scope == self.scopes.root() && info.constant
            })
            .collect();
        for d in top {
            self.fn_for_decl(d);
        }
        self.module.main = self
            .module
            .funcs
            .iter()
            .position(|f| f.name == "main")
            .map(|i| tern_core::id::FuncId(i as u32));
        debug!(funcs = self.module.funcs.len(), "lowering finished");
    }

    pub fn finish(self) -> ModuleIr {
        self.module
    }

    fn placeholder_func(name: &str, ty: TypeId) -> Func {
        let mut entry = Block::new();
        entry.exit = Exit::Return;
        Func {
            name: name.to_string(),
            ty,
            n_params: 0,
            n_rets: 0,
            entry: BlockId(0),
            exit: BlockId(0),
            blocks: vec![entry],
            reg_types: vec![],
        }
    }

    /// The IR function for a constant function declaration, lowering it on
    /// first use. The slot is reserved before the body is lowered so
    /// recursive calls resolve.
    pub(crate) fn fn_for_decl(&mut self, d: DeclId) -> Option<FuncId> {
        if let Some(&f) = self.decl_funcs.get(&d) {
            return Some(f);
        }
        let info = self.scopes.decl(d).clone();
        let init = match self.ast.kind(info.node) {
            NodeKind::Decl { init: Some(i), .. } => *i,
            _ => return None,
        };
        if !matches!(self.ast.kind(init), NodeKind::FnLit { .. }) {
            return None;
        }
        let fn_ty = self.checked.type_of(init);
        let id = self
            .module
            .add_func(Self::placeholder_func(&info.name, fn_ty));
        self.decl_funcs.insert(d, id);
        let func = self.lower_fn_lit(&info.name, init);
        self.module.funcs[id.0 as usize] = func;
        Some(id)
    }

    /// Lowers a bare expression into a zero-argument thunk (REPL and
    /// compile-time evaluation).
    pub fn lower_thunk(&mut self, expr: NodeId, name: &str) -> Option<FuncId> {
        let ty = self.checked.type_of(expr);
        if ty == TypeId::ERROR {
            return None;
        }
        let results = if ty == TypeId::VOID { vec![] } else { vec![ty] };
        let fn_ty = self.ctx.func(vec![], results.clone());
        let fb = FuncBuilder::new(name, fn_ty, self.ctx, self.arch);
        let mut fx = FnCtx {
            fb,
            slots: HashMap::new(),
            ret_slots: Vec::new(),
            results: results.clone(),
            loops: Vec::new(),
            destroys: Vec::new(),
        };
        fx.fb.func.n_rets = results.len() as u32;
        let body = fx.fb.add_block();
        fx.fb.jump(body);
        fx.fb.use_block(body);
        for &rty in &results {
            let slot = fx.fb.alloca(rty);
            fx.ret_slots.push(slot);
        }
        let v = self.lower_expr(&mut fx, expr);
        if !results.is_empty() {
            self.store_result(&mut fx, 0, results[0], v);
        }
        self.seal_function(&mut fx);
        Some(self.module.add_func(fx.fb.finish()))
    }

    // ---- function lowering ----------------------------------------------

    fn lower_fn_lit(&mut self, name: &str, node: NodeId) -> Func {
        let (inputs, body) = match self.ast.kind(node) {
            NodeKind::FnLit { inputs, body, .. } => (inputs.clone(), *body),
            _ => return Self::placeholder_func(name, TypeId::ERROR),
        };
        let fn_ty = self.checked.type_of(node);
        let (params, results) = match &*self.ctx.get(fn_ty) {
            Type::Func { params, results } => (params.clone(), results.clone()),
            _ => (vec![], vec![]),
        };

        let fb = FuncBuilder::new(name, fn_ty, self.ctx, self.arch);
        let mut fx = FnCtx {
            fb,
            slots: HashMap::new(),
            ret_slots: Vec::new(),
            results: results.clone(),
            loops: Vec::new(),
            destroys: Vec::new(),
        };
        fx.fb.func.n_rets = results.len() as u32;

        // Argument registers: big types arrive by pointer.
        let mut param_regs = Vec::new();
        for &pty in &params {
            let reg_ty = if self.arch.is_big(self.ctx, pty) {
                self.ctx.ptr(pty)
            } else {
                pty
            };
            param_regs.push(fx.fb.param(reg_ty));
        }

        let body_blk = fx.fb.add_block();
        fx.fb.jump(body_blk);
        fx.fb.use_block(body_blk);

        // Named parameters get addressable frame slots.
        for (i, &input) in inputs.iter().enumerate() {
            let d = match self.scopes.node_decl.get(&input) {
                Some(&d) => d,
                None => continue,
            };
            let pty = params.get(i).copied().unwrap_or(TypeId::ERROR);
            let slot = fx.fb.alloca(pty);
            if self.arch.is_big(self.ctx, pty) {
                self.emit_copy_assign(&mut fx, pty, slot.clone(), Val::Reg(param_regs[i]));
            } else {
                fx.fb.store(Val::Reg(param_regs[i]), slot.clone(), pty);
            }
            fx.slots.insert(d, slot);
        }

        for &rty in &results {
            let slot = fx.fb.alloca(rty);
            fx.ret_slots.push(slot);
        }

        match self.ast.kind(body) {
            NodeKind::Stmts { list } => {
                let list = list.clone();
                self.lower_stmts(&mut fx, &list);
            }
            _ => {
                self.lower_expr(&mut fx, body);
            }
        }

        self.seal_function(&mut fx);
        fx.fb.finish()
    }

    /// Fallthrough to exit, then build the exit block: destroys, SetRets,
    /// Return.
    fn seal_function(&mut self, fx: &mut FnCtx<'a>) {
        let exit = fx.fb.func.exit;
        fx.fb.jump(exit);
        fx.fb.use_block(exit);
        for (ty, slot) in fx.destroys.clone().into_iter().rev() {
            self.emit_destroy(fx, ty, slot);
        }
        let results = fx.results.clone();
        for (i, &rty) in results.iter().enumerate() {
            let slot = fx.ret_slots[i].clone();
            let value = if self.arch.is_big(self.ctx, rty) {
                slot
            } else {
                fx.fb.load(slot, rty)
            };
            fx.fb
                .emit_void(Op::SetRet, rty, [Val::Int(i as i64), value]);
        }
        fx.fb.ret();
    }

    fn lower_stmts(&mut self, fx: &mut FnCtx<'a>, list: &[NodeId]) {
        for &stmt in list {
            if fx.fb.terminated() {
                break;
            }
            self.lower_expr(fx, stmt);
        }
    }

    fn store_result(&mut self, fx: &mut FnCtx<'a>, index: usize, rty: TypeId, value: Val) {
        let slot = fx.ret_slots[index].clone();
        if self.arch.is_big(self.ctx, rty) {
            self.emit_copy_assign(fx, rty, slot, value);
        } else {
            fx.fb.store(value, slot, rty);
        }
    }

    // ---- constants -------------------------------------------------------

    pub(crate) fn const_to_val(&mut self, c: &ConstVal, ty: TypeId) -> Option<Val> {
        Some(match c {
            ConstVal::Bool(b) => Val::Bool(*b),
            ConstVal::Char(ch) => Val::Char(*ch),
            ConstVal::Int(i) => match self.ctx.prim_of(ty) {
                Some(k) if k.is_unsigned() => Val::Uint(*i as u64),
                _ => Val::Int(*i),
            },
            ConstVal::Uint(u) => Val::Uint(*u),
            ConstVal::Real(r) => Val::Real(*r),
            ConstVal::Str(s) => self.module.intern_bytes(s.as_bytes()),
            ConstVal::Null => Val::Null,
            ConstVal::Type(t) => Val::Type(*t),
            ConstVal::Func(d) => Val::Func(self.fn_for_decl(*d)?),
            ConstVal::Void => Val::Void,
        })
    }

    pub(crate) fn default_val(&self, ty: TypeId) -> Val {
        match self.ctx.prim_of(ty) {
            Some(PrimKind::Bool) => Val::Bool(false),
            Some(PrimKind::Char) => Val::Char('\0'),
            Some(k) if k.is_unsigned() => Val::Uint(0),
            Some(k) if k.is_real() => Val::Real(0.0),
            Some(PrimKind::NullPtr) => Val::Null,
            Some(_) => Val::Int(0),
            None => match &*self.ctx.get(ty) {
                Type::Ptr { .. } | Type::BufPtr { .. } => Val::Null,
                Type::Enum(_) | Type::Flags(_) => Val::Uint(0),
                _ => Val::Int(0),
            },
        }
    }

    // ---- expressions -----------------------------------------------------

    pub(crate) fn lower_expr(&mut self, fx: &mut FnCtx<'a>, node: NodeId) -> Val {
        let ty = self.checked.type_of(node);

        if let Some(c) = self.checked.const_of(node).cloned() {
            if let Some(v) = self.const_to_val(&c, ty) {
                return v;
            }
        }

        match self.ast.kind(node).clone() {
            NodeKind::Terminal(value) => self.lower_terminal(&value, ty),
            NodeKind::Ident { name } => self.lower_ident(fx, node, &name, ty),
            NodeKind::Unop { op, operand } => self.lower_unop(fx, node, op, operand, ty),
            NodeKind::Binop { op, lhs, rhs } => self.lower_binop(fx, node, op, lhs, rhs, ty),
            NodeKind::Chain { ops, exprs } => self.lower_chain(fx, &ops, &exprs),
            NodeKind::Access { .. } | NodeKind::Index { .. } => {
                let addr = self.lower_lval(fx, node);
                fx.fb.ptr_fix(addr, ty)
            }
            NodeKind::Call {
                callee,
                positional,
                named,
            } => self.lower_call(fx, node, callee, &positional, &named),
            NodeKind::Decl { .. } => {
                self.lower_decl_stmt(fx, node);
                Val::Void
            }
            NodeKind::ArrayLit { elems } => self.lower_array_lit(fx, &elems, ty),
            NodeKind::ArrayType { .. }
            | NodeKind::StructLit { .. }
            | NodeKind::EnumLit { .. }
            | NodeKind::FlagsLit { .. } => {
                // Type-valued expressions reach here only when the checker
                // could not produce a constant; surface as an error value.
                self.not_yet(node, "dynamic type expression");
                Val::Type(TypeId::ERROR)
            }
            NodeKind::FnLit { .. } => {
                let f = self.lower_anonymous_fn(node);
                Val::Func(f)
            }
            NodeKind::Case { arms } => self.lower_case(fx, &arms, ty),
            NodeKind::If {
                conds,
                bodies,
                else_body,
            } => {
                self.lower_if(fx, &conds, &bodies, else_body);
                Val::Void
            }
            NodeKind::While { cond, body } => {
                self.lower_while(fx, cond, body);
                Val::Void
            }
            NodeKind::For { iters, body } => {
                self.lower_for(fx, &iters, body);
                Val::Void
            }
            NodeKind::Jump { kind, value } => {
                self.lower_jump(fx, kind, value, node);
                Val::Void
            }
            NodeKind::Stmts { list } => {
                self.lower_stmts(fx, &list);
                Val::Void
            }
            NodeKind::CommaList { elems } => {
                let mut last = Val::Void;
                for &e in &elems {
                    last = self.lower_expr(fx, e);
                }
                last
            }
        }
    }

    fn lower_terminal(&mut self, value: &TermValue, _ty: TypeId) -> Val {
        match value {
            TermValue::Int(v) => Val::Int(*v),
            TermValue::Real(v) => Val::Real(*v),
            TermValue::Char(c) => Val::Char(*c),
            TermValue::Str(s) => self.module.intern_bytes(s.as_bytes()),
            TermValue::Bool(b) => Val::Bool(*b),
            TermValue::Null => Val::Null,
            TermValue::Prim(k) => Val::Type(self.ctx.prim(*k)),
        }
    }

    fn lower_ident(&mut self, fx: &mut FnCtx<'a>, node: NodeId, name: &str, ty: TypeId) -> Val {
        let decls = self
            .scopes
            .ident_decls
            .get(&node)
            .cloned()
            .unwrap_or_default();
        match decls.len() {
            0 => Val::Foreign(name.to_string()),
            1 => {
                let d = decls[0];
                if let Some(slot) = fx.slots.get(&d).cloned() {
                    return fx.fb.ptr_fix(slot, ty);
                }
                if let Some(f) = self.fn_for_decl(d) {
                    return Val::Func(f);
                }
                self.not_yet(node, "module-level variable in runtime code");
                self.default_val(ty)
            }
            _ => {
                self.not_yet(node, "unresolved overload set used as a value");
                self.default_val(ty)
            }
        }
    }

    fn lower_unop(
        &mut self,
        fx: &mut FnCtx<'a>,
        node: NodeId,
        op: UnOp,
        operand: NodeId,
        ty: TypeId,
    ) -> Val {
        if let Some(&target) = self.checked.op_overloads.get(&node) {
            return self.lower_overload_call(fx, target, &[operand], ty);
        }
        match op {
            UnOp::Neg => {
                let v = self.lower_expr(fx, operand);
                fx.fb.emit(Op::Neg, ty, [v])
            }
            UnOp::Not => {
                let v = self.lower_expr(fx, operand);
                fx.fb.emit(Op::Not, ty, [v])
            }
            UnOp::Addr => self.lower_lval(fx, operand),
            UnOp::Deref => {
                let ptr = self.lower_expr(fx, operand);
                fx.fb.ptr_fix(ptr, ty)
            }
            UnOp::Print => {
                let oty = self.checked.type_of(operand);
                let v = self.lower_expr(fx, operand);
                self.emit_repr(fx, oty, v);
                Val::Void
            }
            UnOp::Free => {
                let v = self.lower_expr(fx, operand);
                let oty = self.checked.type_of(operand);
                fx.fb.emit_void(Op::Free, oty, [v]);
                Val::Void
            }
        }
    }

    fn lower_binop(
        &mut self,
        fx: &mut FnCtx<'a>,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: TypeId,
    ) -> Val {
        if let Some(&target) = self.checked.op_overloads.get(&node) {
            return self.lower_overload_call(fx, target, &[lhs, rhs], ty);
        }

        if op == BinOp::Assign {
            let lty = self.checked.type_of(lhs);
            let dst = self.lower_lval(fx, lhs);
            if self.arch.is_big(self.ctx, lty) {
                let src = self.lower_expr(fx, rhs);
                self.emit_copy_assign(fx, lty, dst, src);
            } else {
                let v = self.lower_expr(fx, rhs);
                fx.fb.store(v, dst, lty);
            }
            return Val::Void;
        }
        if let Some(base) = op.compound_base() {
            let lty = self.checked.type_of(lhs);
            let dst = self.lower_lval(fx, lhs);
            let cur = fx.fb.load(dst.clone(), lty);
            let v = self.lower_expr(fx, rhs);
            let res = fx.fb.emit(arith_op(base), lty, [cur, v]);
            fx.fb.store(res, dst, lty);
            return Val::Void;
        }
        if matches!(op, BinOp::AndAssign | BinOp::OrAssign | BinOp::XorAssign) {
            let lty = self.checked.type_of(lhs);
            let bit_op = match op {
                BinOp::AndAssign => Op::And,
                BinOp::OrAssign => Op::Or,
                _ => Op::Xor,
            };
            let dst = self.lower_lval(fx, lhs);
            let cur = fx.fb.load(dst.clone(), lty);
            let v = self.lower_expr(fx, rhs);
            let res = fx.fb.emit(bit_op, lty, [cur, v]);
            fx.fb.store(res, dst, lty);
            return Val::Void;
        }

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                // Composition of two constant functions synthesizes a new one.
                if op == BinOp::Mul && matches!(&*self.ctx.get(ty), Type::Func { .. }) {
                    let f = self.lower_expr(fx, lhs);
                    let g = self.lower_expr(fx, rhs);
                    return self.synth_compose(node, f, g, ty);
                }
                let l = self.lower_expr(fx, lhs);
                let r = self.lower_expr(fx, rhs);
                fx.fb.emit(arith_op(op), ty, [l, r])
            }
            BinOp::Xor => {
                let l = self.lower_expr(fx, lhs);
                let r = self.lower_expr(fx, rhs);
                fx.fb.emit(Op::Xor, ty, [l, r])
            }
            BinOp::Range => {
                self.not_yet(node, "range value outside a `for` loop");
                Val::Void
            }
            BinOp::Arrow => {
                self.not_yet(node, "dynamic function type expression");
                Val::Type(TypeId::ERROR)
            }
            _ => {
                self.not_yet(node, "operator lowering");
                Val::Void
            }
        }
    }

    /// Chains: a landing block plus a φ. Comparisons early-exit `false`;
    /// `and` exits `false`, `or` exits `true`; the last link's value flows
    /// through.
    fn lower_chain(&mut self, fx: &mut FnCtx<'a>, ops: &[ChainOp], exprs: &[NodeId]) -> Val {
        let land = fx.fb.add_block();
        let mut incomings: Vec<(BlockId, Val)> = Vec::new();

        if ops.iter().all(|o| o.is_comparison()) {
            let operand_ty = self.checked.type_of(exprs[0]);
            let mut lhs = self.lower_expr(fx, exprs[0]);
            for (i, &op) in ops.iter().enumerate() {
                let rhs = self.lower_expr(fx, exprs[i + 1]);
                let cmp = fx.fb.emit_with(
                    cmp_op(op),
                    operand_ty,
                    [lhs.clone(), rhs.clone()],
                    TypeId::BOOL,
                );
                if i + 1 == ops.len() {
                    incomings.push((fx.fb.cur, cmp));
                    fx.fb.jump(land);
                } else {
                    let next = fx.fb.add_block();
                    incomings.push((fx.fb.cur, Val::Bool(false)));
                    fx.fb.cond_jump(cmp, next, land);
                    fx.fb.use_block(next);
                    lhs = rhs;
                }
            }
        } else {
            for (i, &expr) in exprs.iter().enumerate() {
                let v = self.lower_expr(fx, expr);
                if i + 1 == exprs.len() {
                    incomings.push((fx.fb.cur, v));
                    fx.fb.jump(land);
                } else {
                    let next = fx.fb.add_block();
                    match ops[i] {
                        ChainOp::Or => {
                            incomings.push((fx.fb.cur, Val::Bool(true)));
                            fx.fb.cond_jump(v, land, next);
                        }
                        _ => {
                            incomings.push((fx.fb.cur, Val::Bool(false)));
                            fx.fb.cond_jump(v, next, land);
                        }
                    }
                    fx.fb.use_block(next);
                }
            }
        }

        fx.fb.use_block(land);
        fx.fb.phi(TypeId::BOOL, &incomings)
    }

    // ---- lvalues ---------------------------------------------------------

    pub(crate) fn lower_lval(&mut self, fx: &mut FnCtx<'a>, node: NodeId) -> Val {
        let ty = self.checked.type_of(node);
        match self.ast.kind(node).clone() {
            NodeKind::Ident { .. } => {
                let decls = self
                    .scopes
                    .ident_decls
                    .get(&node)
                    .cloned()
                    .unwrap_or_default();
                if let Some(&d) = decls.first() {
                    if let Some(slot) = fx.slots.get(&d).cloned() {
                        return slot;
                    }
                }
                self.not_yet(node, "address of a non-local name");
                fx.fb.alloca(ty)
            }
            NodeKind::Access { operand, member } => {
                let oty = self.checked.type_of(operand);
                let (base, struct_ty) = match &*self.ctx.get(oty) {
                    Type::Ptr { pointee } => (self.lower_expr(fx, operand), *pointee),
                    _ => (self.lower_lval(fx, operand), oty),
                };
                let index = match &*self.ctx.get(struct_ty) {
                    Type::Struct(def) => def.field_index(&member).unwrap_or(0),
                    _ => 0,
                };
                let fty = ty;
                fx.fb.emit_with(
                    Op::Field,
                    struct_ty,
                    [base, Val::Int(index as i64)],
                    self.ctx.ptr(fty),
                )
            }
            NodeKind::Index { operand, index } => {
                let oty = self.checked.type_of(operand);
                let base = match &*self.ctx.get(oty) {
                    Type::BufPtr { .. } => self.lower_expr(fx, operand),
                    _ => self.lower_lval(fx, operand),
                };
                let idx = self.lower_expr(fx, index);
                let elem = ty;
                fx.fb
                    .emit_with(Op::PtrIncr, elem, [base, idx], self.ctx.ptr(elem))
            }
            NodeKind::Unop {
                op: UnOp::Deref,
                operand,
            } => self.lower_expr(fx, operand),
            _ => {
                // Materialize an rvalue into a temporary.
                let slot = fx.fb.alloca(ty);
                if self.arch.is_big(self.ctx, ty) {
                    let v = self.lower_expr(fx, node);
                    self.emit_copy_assign(fx, ty, slot.clone(), v);
                } else {
                    let v = self.lower_expr(fx, node);
                    fx.fb.store(v, slot.clone(), ty);
                }
                slot
            }
        }
    }

    // ---- declarations ----------------------------------------------------

    fn lower_decl_stmt(&mut self, fx: &mut FnCtx<'a>, node: NodeId) {
        let d = match self.scopes.node_decl.get(&node) {
            Some(&d) => d,
            None => return,
        };
        let info = self.scopes.decl(d).clone();
        if info.kind == DeclKind::In {
            // Iterator declarations are materialized by the `for` loop.
            return;
        }
        let ty = self
            .checked
            .decl_types
            .get(&d)
            .copied()
            .unwrap_or(TypeId::ERROR);
        if ty == TypeId::ERROR || ty == TypeId::TYPE {
            // Erroneous or purely compile-time declarations own no storage.
            return;
        }
        let init = match self.ast.kind(node) {
            NodeKind::Decl { init, .. } => *init,
            _ => None,
        };
        if info.constant {
            if let Some(i) = init {
                if self.checked.const_of(i).is_some()
                    || matches!(self.ast.kind(i), NodeKind::FnLit { .. })
                {
                    // Fully compile-time constants own no storage either.
                    return;
                }
            }
        }
        let slot = fx.fb.alloca(ty);
        fx.slots.insert(d, slot.clone());
        match init {
            Some(i) => {
                if self.arch.is_big(self.ctx, ty) {
                    let src = self.lower_expr(fx, i);
                    self.emit_copy_assign(fx, ty, slot.clone(), src);
                } else {
                    let v = self.lower_expr(fx, i);
                    fx.fb.store(v, slot.clone(), ty);
                }
            }
            None => self.emit_init(fx, ty, slot.clone()),
        }
        if self.has_destructor(ty) {
            fx.destroys.push((ty, slot));
        }
    }

    // ---- calls -----------------------------------------------------------

    fn lower_overload_call(
        &mut self,
        fx: &mut FnCtx<'a>,
        target: DeclId,
        operands: &[NodeId],
        ty: TypeId,
    ) -> Val {
        let f = match self.fn_for_decl(target) {
            Some(f) => f,
            None => return self.default_val(ty),
        };
        let fn_ty = self.checked.decl_types[&target];
        let (params, results) = match &*self.ctx.get(fn_ty) {
            Type::Func { params, results } => (params.clone(), results.clone()),
            _ => return self.default_val(ty),
        };
        let args: Vec<Val> = operands
            .iter()
            .zip(params.iter())
            .map(|(&operand, &pty)| self.lower_arg(fx, operand, pty))
            .collect();
        self.emit_call(fx, Val::Func(f), fn_ty, args, &results)
    }

    fn lower_arg(&mut self, fx: &mut FnCtx<'a>, arg: NodeId, pty: TypeId) -> Val {
        if self.arch.is_big(self.ctx, pty) {
            let src = self.lower_expr(fx, arg);
            let tmp = fx.fb.alloca(pty);
            self.emit_copy_assign(fx, pty, tmp.clone(), src);
            tmp
        } else {
            self.lower_expr(fx, arg)
        }
    }

    pub(crate) fn emit_call(
        &mut self,
        fx: &mut FnCtx<'a>,
        callee: Val,
        fn_ty: TypeId,
        args: Vec<Val>,
        results: &[TypeId],
    ) -> Val {
        let mut all = vec![callee];
        all.extend(args);
        let mut ret_slots = Vec::new();
        for &rty in results {
            let slot = fx.fb.alloca(rty);
            all.push(slot.clone());
            ret_slots.push(slot);
        }
        fx.fb.emit_void(Op::Call, fn_ty, all);
        match results.first() {
            None => Val::Void,
            Some(&rty) => fx.fb.ptr_fix(ret_slots[0].clone(), rty),
        }
    }

    fn lower_call(
        &mut self,
        fx: &mut FnCtx<'a>,
        node: NodeId,
        callee: NodeId,
        positional: &[NodeId],
        named: &[(String, NodeId)],
    ) -> Val {
        // The cast builtin becomes the Cast opcode on the target type.
        if let NodeKind::Ident { name } = self.ast.kind(callee) {
            let unresolved = self
                .scopes
                .ident_decls
                .get(&callee)
                .map(|d| d.is_empty())
                .unwrap_or(true);
            if name == "cast" && unresolved {
                let target = self.checked.type_of(node);
                let value = match positional.get(1) {
                    Some(&v) => self.lower_expr(fx, v),
                    None => return self.default_val(target),
                };
                return fx.fb.emit(Op::Cast, target, [value]);
            }
        }

        // Resolve the target: a recorded overload, a single declaration,
        // a foreign symbol, or a first-class function value.
        let target_decl: Option<DeclId> = self
            .checked
            .call_targets
            .get(&node)
            .copied()
            .or_else(|| {
                self.scopes
                    .ident_decls
                    .get(&callee)
                    .filter(|d| d.len() == 1)
                    .map(|d| d[0])
            });

        let (callee_val, fn_ty) = match target_decl {
            Some(d) => match self.fn_for_decl(d) {
                Some(f) => (Val::Func(f), self.checked.decl_types[&d]),
                None => {
                    // A function-typed local: load it.
                    let v = self.lower_expr(fx, callee);
                    (v, self.checked.type_of(callee))
                }
            },
            None => {
                let v = self.lower_expr(fx, callee);
                (v, self.checked.type_of(callee))
            }
        };

        let (params, results) = match &*self.ctx.get(fn_ty) {
            Type::Func { params, results } => (params.clone(), results.clone()),
            _ => {
                self.not_yet(node, "call through a non-function value");
                return Val::Void;
            }
        };

        // Order the arguments by parameter position.
        let mut ordered: Vec<Option<NodeId>> = vec![None; params.len()];
        for (i, &a) in positional.iter().enumerate() {
            if i < ordered.len() {
                ordered[i] = Some(a);
            }
        }
        if !named.is_empty() {
            let names = target_decl.and_then(|d| self.decl_param_names(d));
            if let Some(names) = names {
                for (name, a) in named {
                    if let Some(i) = names.iter().position(|n| n == name) {
                        if i < ordered.len() {
                            ordered[i] = Some(*a);
                        }
                    }
                }
            }
        }

        let mut args = Vec::new();
        for (i, slot) in ordered.iter().enumerate() {
            match slot {
                Some(a) => args.push(self.lower_arg(fx, *a, params[i])),
                None => args.push(self.default_val(params[i])),
            }
        }
        self.emit_call(fx, callee_val, fn_ty, args, &results)
    }

    fn decl_param_names(&self, d: DeclId) -> Option<Vec<String>> {
        let node = self.scopes.decl(d).node;
        if let NodeKind::Decl { init: Some(init), .. } = self.ast.kind(node) {
            if let NodeKind::FnLit { inputs, .. } = self.ast.kind(*init) {
                return Some(
                    inputs
                        .iter()
                        .map(|&i| match self.ast.kind(i) {
                            NodeKind::Decl { name, .. } => name.clone(),
                            _ => String::new(),
                        })
                        .collect(),
                );
            }
        }
        None
    }

    fn lower_anonymous_fn(&mut self, node: NodeId) -> FuncId {
        let fn_ty = self.checked.type_of(node);
        let id = self.module.add_func(Self::placeholder_func("<fn>", fn_ty));
        let func = self.lower_fn_lit("<fn>", node);
        self.module.funcs[id.0 as usize] = func;
        id
    }

    /// `h = f * g`: synthesize `h(x..) = f(g(x..))` for constant functions.
    fn synth_compose(&mut self, node: NodeId, f: Val, g: Val, ty: TypeId) -> Val {
        let (g_id, f_id) = match (&g, &f) {
            (Val::Func(gi), Val::Func(fi)) => (*gi, *fi),
            _ => {
                self.not_yet(node, "composition of non-constant functions");
                return Val::Void;
            }
        };
        let (params, results) = match &*self.ctx.get(ty) {
            Type::Func { params, results } => (params.clone(), results.clone()),
            _ => return Val::Void,
        };

        let fb = FuncBuilder::new("<compose>", ty, self.ctx, self.arch);
        let mut fx = FnCtx {
            fb,
            slots: HashMap::new(),
            ret_slots: Vec::new(),
            results: results.clone(),
            loops: Vec::new(),
            destroys: Vec::new(),
        };
        fx.fb.func.n_rets = results.len() as u32;
        let mut param_vals = Vec::new();
        for &pty in &params {
            let reg = fx.fb.param(pty);
            param_vals.push(Val::Reg(reg));
        }
        let body = fx.fb.add_block();
        fx.fb.jump(body);
        fx.fb.use_block(body);
        for &rty in &results {
            let slot = fx.fb.alloca(rty);
            fx.ret_slots.push(slot);
        }

        // Mid values: call g, load its result, feed f.
        let g_fn_ty = self.module.func(g_id).ty;
        let f_fn_ty = self.module.func(f_id).ty;
        let g_results = match &*self.ctx.get(g_fn_ty) {
            Type::Func { results, .. } => results.clone(),
            _ => vec![],
        };
        let mid = self.emit_call(&mut fx, Val::Func(g_id), g_fn_ty, param_vals, &g_results);
        let out = self.emit_call(&mut fx, Val::Func(f_id), f_fn_ty, vec![mid], &results);
        if !results.is_empty() {
            self.store_result(&mut fx, 0, results[0], out);
        }
        self.seal_function(&mut fx);
        let id = self.module.add_func(fx.fb.finish());
        Val::Func(id)
    }

    // ---- control flow ----------------------------------------------------

    /// The landing block is created lazily: when every arm terminates on
    /// its own there is no merge point, and emitting one would leave an
    /// unreachable block behind for the validator to reject.
    fn lower_if(
        &mut self,
        fx: &mut FnCtx<'a>,
        conds: &[NodeId],
        bodies: &[NodeId],
        else_body: Option<NodeId>,
    ) {
        let mut land: Option<BlockId> = None;
        for (i, &cond) in conds.iter().enumerate() {
            let c = self.lower_expr(fx, cond);
            let body_blk = fx.fb.add_block();
            let has_more = i + 1 < conds.len() || else_body.is_some();
            let next_blk = if has_more {
                Some(fx.fb.add_block())
            } else {
                None
            };
            let false_target = match next_blk {
                Some(b) => b,
                None => {
                    let b = land.unwrap_or_else(|| fx.fb.add_block());
                    land = Some(b);
                    b
                }
            };
            fx.fb.cond_jump(c, body_blk, false_target);
            fx.fb.use_block(body_blk);
            self.lower_expr(fx, bodies[i]);
            if !fx.fb.terminated() {
                let b = land.unwrap_or_else(|| fx.fb.add_block());
                land = Some(b);
                fx.fb.jump(b);
            }
            if let Some(b) = next_blk {
                fx.fb.use_block(b);
            }
        }
        if let Some(e) = else_body {
            self.lower_expr(fx, e);
            if !fx.fb.terminated() {
                let b = land.unwrap_or_else(|| fx.fb.add_block());
                land = Some(b);
                fx.fb.jump(b);
            }
        }
        if let Some(b) = land {
            fx.fb.use_block(b);
        }
    }

    fn lower_while(&mut self, fx: &mut FnCtx<'a>, cond: NodeId, body: NodeId) {
        let cond_blk = fx.fb.add_block();
        let body_blk = fx.fb.add_block();
        let land = fx.fb.add_block();
        fx.fb.jump(cond_blk);
        fx.fb.use_block(cond_blk);
        let c = self.lower_expr(fx, cond);
        fx.fb.cond_jump(c, body_blk, land);
        fx.fb.use_block(body_blk);
        fx.loops.push(LoopCtx {
            continue_to: cond_blk,
            break_to: land,
            repeat_to: body_blk,
            restart_to: cond_blk,
            restart_edges: Vec::new(),
        });
        self.lower_expr(fx, body);
        fx.fb.jump(cond_blk);
        fx.loops.pop();
        fx.fb.use_block(land);
    }

    fn lower_case(&mut self, fx: &mut FnCtx<'a>, arms: &[(NodeId, NodeId)], ty: TypeId) -> Val {
        if self.arch.is_big(self.ctx, ty) {
            self.not_yet(arms[0].0, "aggregate-valued case expression");
            return Val::Void;
        }
        let land = fx.fb.add_block();
        let mut incomings: Vec<(BlockId, Val)> = Vec::new();
        for &(key, value) in arms {
            let k = self.lower_expr(fx, key);
            let body_blk = fx.fb.add_block();
            let next_blk = fx.fb.add_block();
            fx.fb.cond_jump(k, body_blk, next_blk);
            fx.fb.use_block(body_blk);
            let v = self.lower_expr(fx, value);
            incomings.push((fx.fb.cur, v));
            fx.fb.jump(land);
            fx.fb.use_block(next_blk);
        }
        // No key matched: the case yields its default value.
        incomings.push((fx.fb.cur, self.default_val(ty)));
        fx.fb.jump(land);
        fx.fb.use_block(land);
        fx.fb.phi(ty, &incomings)
    }

    fn lower_jump(
        &mut self,
        fx: &mut FnCtx<'a>,
        kind: JumpKind,
        value: Option<NodeId>,
        node: NodeId,
    ) {
        match kind {
            JumpKind::Return => {
                if let Some(v) = value {
                    let results = fx.results.clone();
                    match (results.len(), self.ast.kind(v).clone()) {
                        (n, NodeKind::CommaList { elems }) if n > 1 && elems.len() == n => {
                            for (i, &e) in elems.iter().enumerate() {
                                let val = self.lower_expr(fx, e);
                                self.store_result(fx, i, results[i], val);
                            }
                        }
                        (0, _) => {
                            self.lower_expr(fx, v);
                        }
                        (_, _) => {
                            let val = self.lower_expr(fx, v);
                            self.store_result(fx, 0, results[0], val);
                        }
                    }
                }
                let exit = fx.fb.func.exit;
                fx.fb.jump(exit);
            }
            JumpKind::Break => {
                if let Some(target) = fx.loops.last().map(|l| l.break_to) {
                    fx.fb.jump(target);
                } else {
                    self.not_yet(node, "break outside a loop");
                }
            }
            JumpKind::Continue => {
                if let Some(target) = fx.loops.last().map(|l| l.continue_to) {
                    fx.fb.jump(target);
                } else {
                    self.not_yet(node, "continue outside a loop");
                }
            }
            JumpKind::Repeat => {
                if let Some(target) = fx.loops.last().map(|l| l.repeat_to) {
                    fx.fb.jump(target);
                } else {
                    self.not_yet(node, "repeat outside a loop");
                }
            }
            JumpKind::Restart => {
                let cur = fx.fb.cur;
                if let Some(ctx) = fx.loops.last_mut() {
                    ctx.restart_edges.push(cur);
                    let target = ctx.restart_to;
                    fx.fb.jump(target);
                } else {
                    self.not_yet(node, "restart outside a loop");
                }
            }
        }
    }

    // ---- for loops -------------------------------------------------------

    fn lower_for(&mut self, fx: &mut FnCtx<'a>, iters: &[NodeId], body: NodeId) {
        struct Plan {
            decl: DeclId,
            elem_ty: TypeId,
            kind: PlanKind,
            /// Initial values per φ of this iterator.
            init_vals: Vec<Val>,
        }
        enum PlanKind {
            Range { end: Val },
            Array { len: u64 },
            Enum { count: u64 },
        }

        // Initialize every iterator in the current block.
        let mut plans = Vec::new();
        for &iter in iters {
            let d = match self.scopes.node_decl.get(&iter) {
                Some(&d) => d,
                None => continue,
            };
            let elem_ty = self
                .checked
                .decl_types
                .get(&d)
                .copied()
                .unwrap_or(TypeId::ERROR);
            let container = match self.ast.kind(iter) {
                NodeKind::Decl { init: Some(c), .. } => *c,
                _ => continue,
            };
            let cty = self.checked.type_of(container);
            let plan = match self.ast.kind(container).clone() {
                NodeKind::Binop {
                    op: BinOp::Range,
                    lhs,
                    rhs,
                } => {
                    let start = self.lower_expr(fx, lhs);
                    let end = self.lower_expr(fx, rhs);
                    Plan {
                        decl: d,
                        elem_ty,
                        kind: PlanKind::Range { end },
                        init_vals: vec![start],
                    }
                }
                _ => match &*self.ctx.get(cty) {
                    Type::Range { .. } => {
                        self.not_yet(container, "iterating a stored range value");
                        continue;
                    }
                    Type::Arr { len: Some(n), .. } => {
                        let base = self.lower_expr(fx, container);
                        Plan {
                            decl: d,
                            elem_ty,
                            kind: PlanKind::Array { len: *n },
                            init_vals: vec![base, Val::Uint(0)],
                        }
                    }
                    Type::Arr { len: None, .. } => {
                        self.not_yet(container, "iterating a dynamic array");
                        continue;
                    }
                    Type::Prim(PrimKind::Type) => {
                        // Enum members are numbered in declaration order, so
                        // the index is the member value. Flags values are
                        // bit positions and have no cheap index mapping.
                        let count = match &*self.ctx.get(elem_ty) {
                            Type::Enum(def) => def.members.len() as u64,
                            _ => {
                                self.not_yet(container, "iterating a non-enum type");
                                continue;
                            }
                        };
                        Plan {
                            decl: d,
                            elem_ty,
                            kind: PlanKind::Enum { count },
                            init_vals: vec![Val::Uint(0)],
                        }
                    }
                    _ => {
                        self.not_yet(container, "iterating this container");
                        continue;
                    }
                },
            };
            plans.push(plan);
        }
        if plans.is_empty() {
            return;
        }

        let pre = fx.fb.cur;
        let phi_blk = fx.fb.add_block();
        let cond_blk = fx.fb.add_block();
        let body_blk = fx.fb.add_block();
        let incr_blk = fx.fb.add_block();
        let land = fx.fb.add_block();

        fx.fb.jump(phi_blk);
        fx.fb.use_block(phi_blk);
        let mut phi_refs = Vec::new();
        let mut phi_vals: Vec<Vec<Val>> = Vec::new();
        for plan in &plans {
            let mut refs = Vec::new();
            let mut vals = Vec::new();
            let phi_tys: Vec<TypeId> = match plan.kind {
                PlanKind::Range { .. } => vec![plan.elem_ty],
                PlanKind::Array { .. } => {
                    vec![self.ctx.ptr(plan.elem_ty), TypeId::U64]
                }
                PlanKind::Enum { .. } => vec![TypeId::U64],
            };
            for ty in phi_tys {
                let (r, v) = fx.fb.phi_reserve(ty);
                refs.push(r);
                vals.push(v);
            }
            phi_refs.push(refs);
            phi_vals.push(vals);
        }
        fx.fb.jump(cond_blk);

        // Done when any iterator is exhausted.
        fx.fb.use_block(cond_blk);
        let mut done: Option<Val> = None;
        for (plan, vals) in plans.iter().zip(phi_vals.iter()) {
            let d = match &plan.kind {
                PlanKind::Range { end } => fx.fb.emit_with(
                    Op::Ge,
                    plan.elem_ty,
                    [vals[0].clone(), end.clone()],
                    TypeId::BOOL,
                ),
                PlanKind::Array { len } => fx.fb.emit_with(
                    Op::Ge,
                    TypeId::U64,
                    [vals[1].clone(), Val::Uint(*len)],
                    TypeId::BOOL,
                ),
                PlanKind::Enum { count } => fx.fb.emit_with(
                    Op::Ge,
                    TypeId::U64,
                    [vals[0].clone(), Val::Uint(*count)],
                    TypeId::BOOL,
                ),
            };
            done = Some(match done {
                None => d,
                Some(prev) => fx.fb.emit(Op::Or, TypeId::BOOL, [prev, d]),
            });
        }
        let done = done.unwrap_or(Val::Bool(true));
        fx.fb.cond_jump(done, land, body_blk);

        // Bind the loop variables, then the user body.
        fx.fb.use_block(body_blk);
        for (plan, vals) in plans.iter().zip(phi_vals.iter()) {
            let slot = fx.fb.alloca(plan.elem_ty);
            match &plan.kind {
                PlanKind::Range { .. } | PlanKind::Enum { .. } => {
                    fx.fb.store(vals[0].clone(), slot.clone(), plan.elem_ty);
                }
                PlanKind::Array { .. } => {
                    if self.arch.is_big(self.ctx, plan.elem_ty) {
                        self.emit_copy_assign(fx, plan.elem_ty, slot.clone(), vals[0].clone());
                    } else {
                        let v = fx.fb.load(vals[0].clone(), plan.elem_ty);
                        fx.fb.store(v, slot.clone(), plan.elem_ty);
                    }
                }
            }
            fx.slots.insert(plan.decl, slot);
        }
        fx.loops.push(LoopCtx {
            continue_to: incr_blk,
            break_to: land,
            repeat_to: body_blk,
            restart_to: phi_blk,
            restart_edges: Vec::new(),
        });
        self.lower_expr(fx, body);
        fx.fb.jump(incr_blk);
        let loop_ctx = fx.loops.pop();

        // Step each iterator.
        fx.fb.use_block(incr_blk);
        let mut next_vals: Vec<Vec<Val>> = Vec::new();
        for (plan, vals) in plans.iter().zip(phi_vals.iter()) {
            let mut next = Vec::new();
            match &plan.kind {
                PlanKind::Range { .. } => {
                    next.push(fx.fb.emit(Op::Add, plan.elem_ty, [vals[0].clone(), Val::Int(1)]));
                }
                PlanKind::Array { .. } => {
                    next.push(fx.fb.emit_with(
                        Op::PtrIncr,
                        plan.elem_ty,
                        [vals[0].clone(), Val::Uint(1)],
                        self.ctx.ptr(plan.elem_ty),
                    ));
                    next.push(fx.fb.emit(Op::Add, TypeId::U64, [vals[1].clone(), Val::Uint(1)]));
                }
                PlanKind::Enum { .. } => {
                    next.push(fx.fb.emit(Op::Add, TypeId::U64, [vals[0].clone(), Val::Uint(1)]));
                }
            }
            next_vals.push(next);
        }
        fx.fb.jump(phi_blk);

        // Fill the φs: entry edge, back edge, plus any restart edges.
        let restart_edges = loop_ctx.map(|c| c.restart_edges).unwrap_or_default();
        for ((refs, plan), next) in phi_refs.iter().zip(plans.iter()).zip(next_vals.iter()) {
            for (slot, phi_ref) in refs.iter().enumerate() {
                let mut pairs = vec![
                    (pre, plan.init_vals[slot].clone()),
                    (incr_blk, next[slot].clone()),
                ];
                for &edge in &restart_edges {
                    pairs.push((edge, plan.init_vals[slot].clone()));
                }
                fx.fb.phi_fill(*phi_ref, &pairs);
            }
        }

        fx.fb.use_block(land);
    }

    // ---- array literals --------------------------------------------------

    fn lower_array_lit(&mut self, fx: &mut FnCtx<'a>, elems: &[NodeId], ty: TypeId) -> Val {
        let elem_ty = match &*self.ctx.get(ty) {
            Type::Arr { elem, .. } => *elem,
            _ => return Val::Void,
        };
        let base = fx.fb.alloca(ty);
        for (i, &e) in elems.iter().enumerate() {
            let addr = fx.fb.emit_with(
                Op::PtrIncr,
                elem_ty,
                [base.clone(), Val::Uint(i as u64)],
                self.ctx.ptr(elem_ty),
            );
            if self.arch.is_big(self.ctx, elem_ty) {
                let src = self.lower_expr(fx, e);
                self.emit_copy_assign(fx, elem_ty, addr, src);
            } else {
                let v = self.lower_expr(fx, e);
                fx.fb.store(v, addr, elem_ty);
            }
        }
        base
    }

    // ---- diagnostics -----------------------------------------------------

    pub(crate) fn not_yet(&mut self, node: NodeId, what: &str) {
        self.log.error(
            Stage::Interp,
            self.ast.span(node),
            format!("not supported in IR lowering: {}", what),
        );
    }
}

pub(crate) fn arith_op(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        _ => Op::Mod,
    }
}

pub(crate) fn cmp_op(op: ChainOp) -> Op {
    match op {
        ChainOp::Eq => Op::Eq,
        ChainOp::Ne => Op::Ne,
        ChainOp::Lt => Op::Lt,
        ChainOp::Le => Op::Le,
        ChainOp::Gt => Op::Gt,
        ChainOp::Ge => Op::Ge,
        ChainOp::And => Op::And,
        ChainOp::Or => Op::Or,
    }
}
