//! The function builder: block allocation, command emission, φ plumbing.
//!
//! The builder keeps a current insertion block. `alloca` always lands in
//! the entry block (which dominates everything), so loop bodies do not
//! grow the frame per iteration. φ nodes can be reserved before their
//! incoming edges exist and filled once the loop shape is complete.
//!
//! `ptr_fix` is the single ABI rule at use sites: loading small types,
//! leaving big types addressed.

use smallvec::SmallVec;

use tern_core::id::{BlockId, Reg};
use tern_core::intern::{TypeContext, TypeId};
use tern_core::layout::Arch;

use crate::model::{Block, Cmd, Exit, Func, Op, Val};

/// Handle to a reserved φ command, to be filled later.
#[derive(Debug, Clone, Copy)]
pub struct PhiRef {
    block: BlockId,
    index: usize,
}

pub struct FuncBuilder<'a> {
    pub func: Func,
    pub cur: BlockId,
    pub ctx: &'a TypeContext,
    pub arch: Arch,
}

impl<'a> FuncBuilder<'a> {
    /// Creates a function with an entry block (current) and an exit block.
    pub fn new(name: impl Into<String>, ty: TypeId, ctx: &'a TypeContext, arch: Arch) -> Self {
        let func = Func {
            name: name.into(),
            ty,
            n_params: 0,
            n_rets: 0,
            entry: BlockId(0),
            exit: BlockId(1),
            blocks: vec![Block::new(), Block::new()],
            reg_types: Vec::new(),
        };
        FuncBuilder {
            func,
            cur: BlockId(0),
            ctx,
            arch,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block::new());
        id
    }

    pub fn use_block(&mut self, block: BlockId) {
        self.cur = block;
    }

    pub fn new_reg(&mut self, ty: TypeId) -> Reg {
        let reg = Reg(self.func.reg_types.len() as u32);
        self.func.reg_types.push(ty);
        reg
    }

    /// Declares the next register as a parameter register.
    pub fn param(&mut self, ty: TypeId) -> Reg {
        let reg = self.new_reg(ty);
        self.func.n_params += 1;
        reg
    }

    pub fn terminated(&self) -> bool {
        !matches!(self.func.blocks[self.cur.0 as usize].exit, Exit::None)
    }

    fn push(&mut self, cmd: Cmd) {
        self.func.blocks[self.cur.0 as usize].cmds.push(cmd);
    }

    /// Emits a command whose result register has the command's type.
    pub fn emit(&mut self, op: Op, ty: TypeId, args: impl IntoIterator<Item = Val>) -> Val {
        self.emit_with(op, ty, args, ty)
    }

    /// Emits a command with an explicit result-register type (comparisons
    /// are typed by their operands but produce bool; address-producing
    /// commands produce pointers).
    pub fn emit_with(
        &mut self,
        op: Op,
        ty: TypeId,
        args: impl IntoIterator<Item = Val>,
        result_ty: TypeId,
    ) -> Val {
        let result = self.new_reg(result_ty);
        self.push(Cmd {
            op,
            ty,
            args: args.into_iter().collect(),
            result: Some(result),
        });
        Val::Reg(result)
    }

    /// Emits a command without a result.
    pub fn emit_void(&mut self, op: Op, ty: TypeId, args: impl IntoIterator<Item = Val>) {
        self.push(Cmd {
            op,
            ty,
            args: args.into_iter().collect(),
            result: None,
        });
    }

    // ---- terminators ---------------------------------------------------

    pub fn jump(&mut self, target: BlockId) {
        if !self.terminated() {
            self.func.blocks[self.cur.0 as usize].exit = Exit::Jump(target);
        }
    }

    pub fn cond_jump(&mut self, cond: Val, on_true: BlockId, on_false: BlockId) {
        if !self.terminated() {
            self.func.blocks[self.cur.0 as usize].exit = Exit::Cond {
                cond,
                on_true,
                on_false,
            };
        }
    }

    pub fn ret(&mut self) {
        if !self.terminated() {
            self.func.blocks[self.cur.0 as usize].exit = Exit::Return;
        }
    }

    // ---- memory --------------------------------------------------------

    /// Reserves stack space in the entry block; the result register holds
    /// the address for the whole function lifetime.
    pub fn alloca(&mut self, ty: TypeId) -> Val {
        let result = self.new_reg(self.ctx.ptr(ty));
        self.func.blocks[self.func.entry.0 as usize].cmds.push(Cmd {
            op: Op::Alloca,
            ty,
            args: SmallVec::new(),
            result: Some(result),
        });
        Val::Reg(result)
    }

    pub fn load(&mut self, addr: Val, ty: TypeId) -> Val {
        self.emit(Op::Load, ty, [addr])
    }

    pub fn store(&mut self, value: Val, addr: Val, ty: TypeId) {
        self.emit_void(Op::Store, ty, [value, addr]);
    }

    /// The load-or-address rule: small types are loaded from their
    /// address, big types stay addressed.
    pub fn ptr_fix(&mut self, addr: Val, ty: TypeId) -> Val {
        if self.arch.is_big(self.ctx, ty) {
            addr
        } else {
            self.load(addr, ty)
        }
    }

    // ---- phi plumbing --------------------------------------------------

    /// Emits a φ with known incoming pairs.
    pub fn phi(&mut self, ty: TypeId, pairs: &[(BlockId, Val)]) -> Val {
        let mut args: SmallVec<[Val; 2]> = SmallVec::new();
        for (block, val) in pairs {
            args.push(Val::Block(*block));
            args.push(val.clone());
        }
        self.emit(Op::Phi, ty, args)
    }

    /// Reserves a φ at the current insertion point with no incoming pairs
    /// yet; fill it once the loop's back edges exist.
    pub fn phi_reserve(&mut self, ty: TypeId) -> (PhiRef, Val) {
        let result = self.new_reg(ty);
        let index = self.func.blocks[self.cur.0 as usize].cmds.len();
        self.push(Cmd {
            op: Op::Phi,
            ty,
            args: SmallVec::new(),
            result: Some(result),
        });
        (
            PhiRef {
                block: self.cur,
                index,
            },
            Val::Reg(result),
        )
    }

    pub fn phi_fill(&mut self, phi: PhiRef, pairs: &[(BlockId, Val)]) {
        let mut args: SmallVec<[Val; 2]> = SmallVec::new();
        for (block, val) in pairs {
            args.push(Val::Block(*block));
            args.push(val.clone());
        }
        self.func.blocks[phi.block.0 as usize].cmds[phi.index].args = args;
    }

    /// Splits control on `cond`: returns the continue block after jumping
    /// to `exit_block` when the condition matches `exit_when`.
    pub fn early_exit_on(&mut self, exit_when: bool, exit_block: BlockId, cond: Val) -> BlockId {
        let continue_block = self.add_block();
        if exit_when {
            self.cond_jump(cond, exit_block, continue_block);
        } else {
            self.cond_jump(cond, continue_block, exit_block);
        }
        self.use_block(continue_block);
        continue_block
    }

    pub fn finish(self) -> Func {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::intern::TypeId;

    #[test]
    fn allocas_land_in_the_entry_block() {
        let ctx = TypeContext::new();
        let fn_ty = ctx.func(vec![], vec![]);
        let mut fb = FuncBuilder::new("t", fn_ty, &ctx, Arch::default());
        let body = fb.add_block();
        fb.jump(body);
        fb.use_block(body);
        let slot = fb.alloca(TypeId::I32);
        fb.store(Val::Int(3), slot, TypeId::I32);
        fb.ret();

        let func = fb.finish();
        let entry = &func.blocks[func.entry.0 as usize];
        assert_eq!(entry.cmds.len(), 1);
        assert_eq!(entry.cmds[0].op, Op::Alloca);
        // The store stayed in the body block.
        assert_eq!(func.blocks[body.0 as usize].cmds[0].op, Op::Store);
    }

    #[test]
    fn terminators_do_not_overwrite() {
        let ctx = TypeContext::new();
        let fn_ty = ctx.func(vec![], vec![]);
        let mut fb = FuncBuilder::new("t", fn_ty, &ctx, Arch::default());
        let a = fb.add_block();
        let b = fb.add_block();
        fb.jump(a);
        fb.jump(b);
        match &fb.func.blocks[fb.func.entry.0 as usize].exit {
            Exit::Jump(t) => assert_eq!(*t, a),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn phi_reserve_then_fill() {
        let ctx = TypeContext::new();
        let fn_ty = ctx.func(vec![], vec![]);
        let mut fb = FuncBuilder::new("t", fn_ty, &ctx, Arch::default());
        let (phi, val) = fb.phi_reserve(TypeId::I32);
        fb.phi_fill(phi, &[(BlockId(0), Val::Int(0)), (BlockId(1), val.clone())]);
        let cmd = &fb.func.blocks[0].cmds[0];
        assert_eq!(cmd.op, Op::Phi);
        assert_eq!(cmd.args.len(), 4);
    }

    #[test]
    fn ptr_fix_loads_only_small_types() {
        let ctx = TypeContext::new();
        let fn_ty = ctx.func(vec![], vec![]);
        let mut fb = FuncBuilder::new("t", fn_ty, &ctx, Arch::default());
        let small = fb.alloca(TypeId::I64);
        let loaded = fb.ptr_fix(small.clone(), TypeId::I64);
        assert_ne!(loaded, small);

        let arr_ty = ctx.arr(TypeId::I64, Some(4));
        let big = fb.alloca(arr_ty);
        let fixed = fb.ptr_fix(big.clone(), arr_ty);
        assert_eq!(fixed, big);
    }
}
