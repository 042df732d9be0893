//! Per-type IR emission: initialize, destroy, copy-assign, move-assign,
//! and print ("repr") for every runtime type.
//!
//! Primitives emit a single store or print. Arrays emit a counted loop
//! over their elements. Structs call lazily generated per-type helper
//! functions that dispatch to field helpers; a helper is generated at most
//! once per (operation, type) and memoized before its body is built so
//! recursive types terminate. Variants compare the runtime tag and
//! dispatch to the matching alternative.
//!
//! User hooks (`__assign__`, `__destroy__`, `__print__`) take precedence
//! over the generated field-wise behavior.

use tern_core::diag::Stage;
use tern_core::id::{DeclId, FuncId};
use tern_core::intern::TypeId;
use tern_core::source::Span;
use tern_core::types::{FieldInit, Type};

use crate::builder::FuncBuilder;
use crate::lower::{FnCtx, Helper, Lowerer};
use crate::model::{Op, Val};

impl<'a> Lowerer<'a> {
    /// Whether values of this type need destructor calls.
    pub(crate) fn has_destructor(&self, ty: TypeId) -> bool {
        match &*self.ctx.get(ty) {
            Type::Struct(def) => {
                self.user_hook("__destroy__", self.ctx.ptr(ty)).is_some()
                    || def.fields.iter().any(|f| self.has_destructor(f.ty))
            }
            Type::Arr { elem, .. } => self.has_destructor(*elem),
            Type::Tup { entries } => entries.iter().any(|&e| self.has_destructor(e)),
            Type::Var { alts } => alts.iter().any(|&a| self.has_destructor(a)),
            _ => false,
        }
    }

    /// A top-level `__*__` declaration whose first parameter matches.
    pub(crate) fn user_hook(&self, name: &str, first_param: TypeId) -> Option<DeclId> {
        for d in self.scopes.lookup(self.scopes.root(), name) {
            if let Some(&dt) = self.checked.decl_types.get(&d) {
                if let Type::Func { params, .. } = &*self.ctx.get(dt) {
                    if params.first() == Some(&first_param) {
                        return Some(d);
                    }
                }
            }
        }
        None
    }

    fn unsupported(&mut self, what: &str) {
        self.log.error(
            Stage::Interp,
            Span::point(0),
            format!("not supported in IR emission: {}", what),
        );
    }

    /// A counted loop from 0 to `count`; `body` receives the index value.
    pub(crate) fn emit_counted_loop(
        &mut self,
        fx: &mut FnCtx<'a>,
        count: u64,
        body: &mut dyn FnMut(&mut Self, &mut FnCtx<'a>, Val),
    ) {
        let pre = fx.fb.cur;
        let phi_blk = fx.fb.add_block();
        let body_blk = fx.fb.add_block();
        let incr_blk = fx.fb.add_block();
        let land = fx.fb.add_block();

        fx.fb.jump(phi_blk);
        fx.fb.use_block(phi_blk);
        let (phi, idx) = fx.fb.phi_reserve(TypeId::U64);
        let done = fx
            .fb
            .emit_with(Op::Ge, TypeId::U64, [idx.clone(), Val::Uint(count)], TypeId::BOOL);
        fx.fb.cond_jump(done, land, body_blk);

        fx.fb.use_block(body_blk);
        body(self, fx, idx.clone());
        fx.fb.jump(incr_blk);

        fx.fb.use_block(incr_blk);
        let next = fx.fb.emit(Op::Add, TypeId::U64, [idx, Val::Uint(1)]);
        fx.fb.jump(phi_blk);
        fx.fb.phi_fill(phi, &[(pre, Val::Uint(0)), (incr_blk, next)]);

        fx.fb.use_block(land);
    }

    /// Tag dispatch over a variant's alternatives; `body` receives the
    /// matching alternative and its payload address.
    fn emit_variant_dispatch(
        &mut self,
        fx: &mut FnCtx<'a>,
        var_ty: TypeId,
        addr: Val,
        body: &mut dyn FnMut(&mut Self, &mut FnCtx<'a>, TypeId, Val),
    ) {
        let alts = match &*self.ctx.get(var_ty) {
            Type::Var { alts } => alts.clone(),
            _ => return,
        };
        let tag = fx
            .fb
            .emit_with(Op::VariantType, var_ty, [addr.clone()], TypeId::TYPE);
        let land = fx.fb.add_block();
        for alt in alts {
            let hit = fx.fb.emit_with(
                Op::Eq,
                TypeId::TYPE,
                [tag.clone(), Val::Type(alt)],
                TypeId::BOOL,
            );
            let blk = fx.fb.add_block();
            let next = fx.fb.add_block();
            fx.fb.cond_jump(hit, blk, next);
            fx.fb.use_block(blk);
            let payload = fx
                .fb
                .emit_with(Op::VariantValue, alt, [addr.clone()], self.ctx.ptr(alt));
            body(self, fx, alt, payload);
            fx.fb.jump(land);
            fx.fb.use_block(next);
        }
        fx.fb.jump(land);
        fx.fb.use_block(land);
    }

    // ---- copy / move -----------------------------------------------------

    /// Copies a value of `ty` from the address `src` to the address `dst`.
    pub(crate) fn emit_copy_assign(&mut self, fx: &mut FnCtx<'a>, ty: TypeId, dst: Val, src: Val) {
        match &*self.ctx.get(ty) {
            Type::Arr { elem, len: Some(n) } => {
                let (elem, n) = (*elem, *n);
                let stride_ptr = self.ctx.ptr(elem);
                self.emit_counted_loop(fx, n, &mut |l, fx, idx| {
                    let d = fx
                        .fb
                        .emit_with(Op::PtrIncr, elem, [dst.clone(), idx.clone()], stride_ptr);
                    let s = fx
                        .fb
                        .emit_with(Op::PtrIncr, elem, [src.clone(), idx], stride_ptr);
                    if l.arch.is_big(l.ctx, elem) {
                        l.emit_copy_assign(fx, elem, d, s);
                    } else {
                        let v = fx.fb.load(s, elem);
                        fx.fb.store(v, d, elem);
                    }
                });
            }
            Type::Arr { len: None, .. } => self.unsupported("copying a dynamic array"),
            Type::Struct(_) => {
                if let Some(hook) = self.user_hook("__assign__", self.ctx.ptr(ty)) {
                    if let Some(f) = self.fn_for_decl(hook) {
                        let fn_ty = self.checked.decl_types[&hook];
                        self.emit_call(fx, Val::Func(f), fn_ty, vec![dst, src], &[]);
                        return;
                    }
                }
                let helper = self.helper_func(Helper::Copy, ty);
                let fn_ty = self.module.func(helper).ty;
                self.emit_call(fx, Val::Func(helper), fn_ty, vec![dst, src], &[]);
            }
            Type::Tup { entries } => {
                let entries = entries.clone();
                for (i, &ety) in entries.iter().enumerate() {
                    let d = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [dst.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(ety),
                    );
                    let s = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [src.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(ety),
                    );
                    if self.arch.is_big(self.ctx, ety) {
                        self.emit_copy_assign(fx, ety, d, s);
                    } else {
                        let v = fx.fb.load(s, ety);
                        fx.fb.store(v, d, ety);
                    }
                }
            }
            Type::Var { .. } => {
                // Tag first, then the payload of the live alternative.
                let tag = fx
                    .fb
                    .emit_with(Op::VariantType, ty, [src.clone()], TypeId::TYPE);
                fx.fb.store(tag, dst.clone(), TypeId::TYPE);
                self.emit_variant_dispatch(fx, ty, src.clone(), &mut |l, fx, alt, payload| {
                    let d = fx
                        .fb
                        .emit_with(Op::VariantValue, alt, [dst.clone()], l.ctx.ptr(alt));
                    if l.arch.is_big(l.ctx, alt) {
                        l.emit_copy_assign(fx, alt, d, payload);
                    } else {
                        let v = fx.fb.load(payload, alt);
                        fx.fb.store(v, d, alt);
                    }
                });
            }
            _ => {
                let v = fx.fb.load(src, ty);
                fx.fb.store(v, dst, ty);
            }
        }
    }

    /// Move assignment. Compile-time values have no owned resources to
    /// steal, so a move is a copy; the distinction stays at the call sites
    /// that would matter to a native back end.
    pub(crate) fn emit_move_assign(&mut self, fx: &mut FnCtx<'a>, ty: TypeId, dst: Val, src: Val) {
        self.emit_copy_assign(fx, ty, dst, src);
    }

    // ---- initialize ------------------------------------------------------

    /// Default-initializes the value at `addr`.
    pub(crate) fn emit_init(&mut self, fx: &mut FnCtx<'a>, ty: TypeId, addr: Val) {
        match &*self.ctx.get(ty) {
            Type::Arr { elem, len: Some(n) } => {
                let (elem, n) = (*elem, *n);
                let elem_ptr = self.ctx.ptr(elem);
                self.emit_counted_loop(fx, n, &mut |l, fx, idx| {
                    let a = fx
                        .fb
                        .emit_with(Op::PtrIncr, elem, [addr.clone(), idx], elem_ptr);
                    l.emit_init(fx, elem, a);
                });
            }
            Type::Arr { len: None, .. } => self.unsupported("initializing a dynamic array"),
            Type::Struct(_) => {
                let helper = self.helper_func(Helper::Init, ty);
                let fn_ty = self.module.func(helper).ty;
                self.emit_call(fx, Val::Func(helper), fn_ty, vec![addr], &[]);
            }
            Type::Tup { entries } => {
                let entries = entries.clone();
                for (i, &ety) in entries.iter().enumerate() {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [addr.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(ety),
                    );
                    self.emit_init(fx, ety, a);
                }
            }
            Type::Var { alts } => {
                let first = alts[0];
                fx.fb.store(Val::Type(first), addr.clone(), TypeId::TYPE);
                let payload =
                    fx.fb
                        .emit_with(Op::VariantValue, first, [addr], self.ctx.ptr(first));
                self.emit_init(fx, first, payload);
            }
            _ => {
                let v = self.default_val(ty);
                fx.fb.store(v, addr, ty);
            }
        }
    }

    // ---- destroy ---------------------------------------------------------

    /// Destroys the value at `addr`: the user hook runs first, then the
    /// fields in reverse declaration order.
    pub(crate) fn emit_destroy(&mut self, fx: &mut FnCtx<'a>, ty: TypeId, addr: Val) {
        if !self.has_destructor(ty) {
            return;
        }
        match &*self.ctx.get(ty) {
            Type::Arr { elem, len: Some(n) } => {
                let (elem, n) = (*elem, *n);
                let elem_ptr = self.ctx.ptr(elem);
                self.emit_counted_loop(fx, n, &mut |l, fx, idx| {
                    let a = fx
                        .fb
                        .emit_with(Op::PtrIncr, elem, [addr.clone(), idx], elem_ptr);
                    l.emit_destroy(fx, elem, a);
                });
            }
            Type::Struct(_) => {
                let helper = self.helper_func(Helper::Destroy, ty);
                let fn_ty = self.module.func(helper).ty;
                self.emit_call(fx, Val::Func(helper), fn_ty, vec![addr], &[]);
            }
            Type::Tup { entries } => {
                let entries = entries.clone();
                for (i, &ety) in entries.iter().enumerate().rev() {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [addr.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(ety),
                    );
                    self.emit_destroy(fx, ety, a);
                }
            }
            Type::Var { .. } => {
                self.emit_variant_dispatch(fx, ty, addr, &mut |l, fx, alt, payload| {
                    l.emit_destroy(fx, alt, payload);
                });
            }
            _ => {}
        }
    }

    // ---- repr (print) ----------------------------------------------------

    /// Prints a value: `value` is the loaded value for small types and the
    /// address for big ones.
    pub(crate) fn emit_repr(&mut self, fx: &mut FnCtx<'a>, ty: TypeId, value: Val) {
        match &*self.ctx.get(ty) {
            Type::Struct(def) => {
                if let Some(hook) = self.user_hook("__print__", ty) {
                    if let Some(f) = self.fn_for_decl(hook) {
                        let fn_ty = self.checked.decl_types[&hook];
                        self.emit_call(fx, Val::Func(f), fn_ty, vec![value], &[]);
                        return;
                    }
                }
                let fields: Vec<(usize, TypeId)> = def
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (i, f.ty))
                    .collect();
                for (i, fty) in fields {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [value.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(fty),
                    );
                    let v = fx.fb.ptr_fix(a, fty);
                    self.emit_repr(fx, fty, v);
                }
            }
            Type::Arr { elem, len: Some(n) } => {
                let (elem, n) = (*elem, *n);
                let elem_ptr = self.ctx.ptr(elem);
                self.emit_counted_loop(fx, n, &mut |l, fx, idx| {
                    let a = fx
                        .fb
                        .emit_with(Op::PtrIncr, elem, [value.clone(), idx], elem_ptr);
                    let v = fx.fb.ptr_fix(a, elem);
                    l.emit_repr(fx, elem, v);
                });
            }
            Type::Arr { len: None, .. } => self.unsupported("printing a dynamic array"),
            Type::Tup { entries } => {
                let entries = entries.clone();
                for (i, &ety) in entries.iter().enumerate() {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [value.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(ety),
                    );
                    let v = fx.fb.ptr_fix(a, ety);
                    self.emit_repr(fx, ety, v);
                }
            }
            Type::Var { .. } => {
                self.emit_variant_dispatch(fx, ty, value, &mut |l, fx, alt, payload| {
                    let v = fx.fb.ptr_fix(payload, alt);
                    l.emit_repr(fx, alt, v);
                });
            }
            _ => fx.fb.emit_void(Op::Print, ty, [value]),
        }
    }

    // ---- struct helpers --------------------------------------------------

    /// The per-type helper function, generated at most once per
    /// (operation, type). The slot is memoized before the body is built so
    /// recursive types find it.
    pub(crate) fn helper_func(&mut self, kind: Helper, ty: TypeId) -> FuncId {
        if let Some(&f) = self.helpers.get(&(kind, ty)) {
            return f;
        }
        let ptr = self.ctx.ptr(ty);
        let (params, tag) = match kind {
            Helper::Copy => (vec![ptr, ptr], "copy"),
            Helper::Init => (vec![ptr], "init"),
            Helper::Destroy => (vec![ptr], "destroy"),
        };
        let fn_ty = self.ctx.func(params.clone(), vec![]);
        let name = format!("<{} {}>", tag, self.ctx.display(ty));
        let id = self
            .module
            .add_func(Self::placeholder_named(&name, fn_ty));
        self.helpers.insert((kind, ty), id);

        let fb = FuncBuilder::new(name, fn_ty, self.ctx, self.arch);
        let mut fx = FnCtx {
            fb,
            slots: Default::default(),
            ret_slots: Vec::new(),
            results: Vec::new(),
            loops: Vec::new(),
            destroys: Vec::new(),
        };
        let mut regs = Vec::new();
        for &pty in &params {
            regs.push(Val::Reg(fx.fb.param(pty)));
        }
        let body_blk = fx.fb.add_block();
        fx.fb.jump(body_blk);
        fx.fb.use_block(body_blk);

        let fields: Vec<(usize, TypeId, Option<FieldInit>)> = match &*self.ctx.get(ty) {
            Type::Struct(def) => def
                .fields
                .iter()
                .enumerate()
                .map(|(i, f)| (i, f.ty, f.init))
                .collect(),
            _ => vec![],
        };

        match kind {
            Helper::Copy => {
                let (dst, src) = (regs[0].clone(), regs[1].clone());
                for (i, fty, _) in fields {
                    let d = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [dst.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(fty),
                    );
                    let s = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [src.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(fty),
                    );
                    if self.arch.is_big(self.ctx, fty) {
                        self.emit_copy_assign(&mut fx, fty, d, s);
                    } else {
                        let v = fx.fb.load(s, fty);
                        fx.fb.store(v, d, fty);
                    }
                }
            }
            Helper::Init => {
                let dst = regs[0].clone();
                for (i, fty, init) in fields {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [dst.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(fty),
                    );
                    match init {
                        Some(c) => {
                            let v = field_init_val(c);
                            fx.fb.store(v, a, fty);
                        }
                        None => self.emit_init(&mut fx, fty, a),
                    }
                }
            }
            Helper::Destroy => {
                let dst = regs[0].clone();
                if let Some(hook) = self.user_hook("__destroy__", ptr) {
                    if let Some(f) = self.fn_for_decl(hook) {
                        let hook_ty = self.checked.decl_types[&hook];
                        self.emit_call(&mut fx, Val::Func(f), hook_ty, vec![dst.clone()], &[]);
                    }
                }
                for (i, fty, _) in fields.into_iter().rev() {
                    let a = fx.fb.emit_with(
                        Op::Field,
                        ty,
                        [dst.clone(), Val::Int(i as i64)],
                        self.ctx.ptr(fty),
                    );
                    self.emit_destroy(&mut fx, fty, a);
                }
            }
        }

        let exit = fx.fb.func.exit;
        fx.fb.jump(exit);
        fx.fb.use_block(exit);
        fx.fb.ret();
        self.module.funcs[id.0 as usize] = fx.fb.finish();
        id
    }

    fn placeholder_named(name: &str, ty: TypeId) -> crate::model::Func {
        let mut entry = crate::model::Block::new();
        entry.exit = crate::model::Exit::Return;
        crate::model::Func {
            name: name.to_string(),
            ty,
            n_params: 0,
            n_rets: 0,
            entry: tern_core::id::BlockId(0),
            exit: tern_core::id::BlockId(0),
            blocks: vec![entry],
            reg_types: vec![],
        }
    }
}

fn field_init_val(init: FieldInit) -> Val {
    match init {
        FieldInit::Bool(b) => Val::Bool(b),
        FieldInit::Char(c) => Val::Char(c),
        FieldInit::Int(i) => Val::Int(i),
        FieldInit::Uint(u) => Val::Uint(u),
        FieldInit::Real(r) => Val::Real(r),
    }
}
