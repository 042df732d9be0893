//! The IR data model: functions, blocks, commands, values, addresses.
//!
//! A function is a register file plus basic blocks; every block ends in
//! exactly one terminator ([`Exit`]). Commands carry one generic opcode
//! typed by the command's type (`Add` on `int32` vs `float64` is the same
//! opcode), argument values that are registers or constants, and an
//! optional result register. Argument registers are the low ones; return
//! values travel through caller-provided slots (`SetRet`).

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use tern_core::id::{BlockId, FuncId, Reg};
use tern_core::intern::TypeId;

/// Opcodes. Arithmetic and comparison are typed by [`Cmd::ty`]: signed
/// integers wrap, unsigned are modular, floats are IEEE-754.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Trunc,
    Extend,
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Xor,
    Or,
    And,
    /// Size in bytes of a type value.
    Bytes,
    /// Alignment in bytes of a type value.
    Align,
    Print,
    Malloc,
    Free,
    Load,
    Store,
    ArrayLength,
    ArrayData,
    /// Element-strided pointer advance; `ty` is the element type.
    PtrIncr,
    /// Field address; `ty` is the struct type, args are `[addr, index]`.
    Field,
    /// Merge select on the predecessor block; args are
    /// `[block, value, block, value, ...]`.
    Phi,
    /// `[callee, args.., ret_addrs..]`; `ty` is the callee's function type.
    Call,
    Cast,
    /// `[index, value]`: store into the caller-provided return slot.
    SetRet,
    /// Reserve stack space for `ty`; yields its address.
    Alloca,
    // Compile-time type construction.
    Arrow,
    PtrType,
    ArrType,
    Tup,
    Variant,
    /// Runtime tag of a variant value.
    VariantType,
    /// Payload address of a variant value; `ty` is the alternative.
    VariantValue,
    CreateStruct,
    InsertField,
    FinalizeStruct,
    CreateEnum,
    InsertEnumMember,
    FinalizeEnum,
    CreateFlags,
    InsertFlag,
    FinalizeFlags,
}

/// A command argument: a register or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Val {
    Reg(Reg),
    Bool(bool),
    Char(char),
    Int(i64),
    Uint(u64),
    Real(f64),
    Type(TypeId),
    Func(FuncId),
    /// A foreign symbol, dispatched through the closed signature table.
    Foreign(String),
    /// A block label, used by `Phi` incoming pairs.
    Block(BlockId),
    /// A (offset, length) view into the module's read-only data.
    ByteView { off: u32, len: u32 },
    Null,
    Void,
}

/// One IR command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    pub op: Op,
    pub ty: TypeId,
    pub args: SmallVec<[Val; 2]>,
    pub result: Option<Reg>,
}

/// Block terminator. `None` only exists while a block is under
/// construction; validation rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exit {
    None,
    Jump(BlockId),
    Cond {
        cond: Val,
        on_true: BlockId,
        on_false: BlockId,
    },
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub cmds: Vec<Cmd>,
    pub exit: Exit,
}

impl Block {
    pub fn new() -> Block {
        Block {
            cmds: Vec::new(),
            exit: Exit::None,
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Block::new()
    }
}

/// An IR function: signature, entry/exit blocks, blocks, and the
/// per-register type file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Func {
    pub name: String,
    /// The interned function type.
    pub ty: TypeId,
    pub n_params: u32,
    pub n_rets: u32,
    pub entry: BlockId,
    pub exit: BlockId,
    pub blocks: Vec<Block>,
    pub reg_types: Vec<TypeId>,
}

impl Func {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Blocks that can transfer control to `target`.
    pub fn predecessors(&self, target: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            let hits = match &block.exit {
                Exit::Jump(t) => *t == target,
                Exit::Cond {
                    on_true, on_false, ..
                } => *on_true == target || *on_false == target,
                _ => false,
            };
            if hits {
                preds.push(id);
            }
        }
        preds
    }
}

/// The IR of one module: its functions and read-only data. Functions are
/// owned by the module; the interpreter holds only references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleIr {
    pub funcs: Vec<Func>,
    pub rodata: Vec<u8>,
    /// The function named `main`, when the module has one.
    pub main: Option<FuncId>,
}

impl ModuleIr {
    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id.0 as usize]
    }

    pub fn add_func(&mut self, func: Func) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(func);
        id
    }

    /// Interns a byte string into read-only data, returning its view.
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> Val {
        let off = self.rodata.len() as u32;
        self.rodata.extend_from_slice(bytes);
        Val::ByteView {
            off,
            len: bytes.len() as u32,
        }
    }
}

/// An interpreter address: one of the three storage regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Addr {
    Stack(u64),
    Heap(u64),
    ReadOnly(u64),
}

impl Addr {
    pub fn offset(self) -> u64 {
        match self {
            Addr::Stack(o) | Addr::Heap(o) | Addr::ReadOnly(o) => o,
        }
    }

    pub fn with_offset(self, offset: u64) -> Addr {
        match self {
            Addr::Stack(_) => Addr::Stack(offset),
            Addr::Heap(_) => Addr::Heap(offset),
            Addr::ReadOnly(_) => Addr::ReadOnly(offset),
        }
    }

    /// Tagged 64-bit encoding, for pointers stored in interpreter memory.
    pub fn encode(self) -> u64 {
        let (tag, off) = match self {
            Addr::Stack(o) => (0u64, o),
            Addr::Heap(o) => (1u64, o),
            Addr::ReadOnly(o) => (2u64, o),
        };
        (tag << 62) | (off & ((1 << 62) - 1))
    }

    pub fn decode(bits: u64) -> Addr {
        let off = bits & ((1 << 62) - 1);
        match bits >> 62 {
            0 => Addr::Stack(off),
            1 => Addr::Heap(off),
            _ => Addr::ReadOnly(off),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_cover_both_edges() {
        let mut func = Func {
            name: "t".into(),
            ty: TypeId::VOID,
            n_params: 0,
            n_rets: 0,
            entry: BlockId(0),
            exit: BlockId(3),
            blocks: vec![Block::new(), Block::new(), Block::new(), Block::new()],
            reg_types: vec![],
        };
        func.blocks[0].exit = Exit::Cond {
            cond: Val::Bool(true),
            on_true: BlockId(1),
            on_false: BlockId(2),
        };
        func.blocks[1].exit = Exit::Jump(BlockId(3));
        func.blocks[2].exit = Exit::Jump(BlockId(3));
        func.blocks[3].exit = Exit::Return;
        assert_eq!(func.predecessors(BlockId(3)), vec![BlockId(1), BlockId(2)]);
        assert_eq!(func.predecessors(BlockId(1)), vec![BlockId(0)]);
        assert!(func.predecessors(BlockId(0)).is_empty());
    }

    #[test]
    fn addr_encoding_roundtrips() {
        for addr in [Addr::Stack(0), Addr::Stack(4096), Addr::Heap(17), Addr::ReadOnly(3)] {
            assert_eq!(Addr::decode(addr.encode()), addr);
        }
    }

    #[test]
    fn rodata_interning_appends() {
        let mut module = ModuleIr::default();
        let a = module.intern_bytes(b"hi");
        let b = module.intern_bytes(b"there");
        assert_eq!(a, Val::ByteView { off: 0, len: 2 });
        assert_eq!(b, Val::ByteView { off: 2, len: 5 });
        assert_eq!(module.rodata.len(), 7);
    }

    #[test]
    fn serde_roundtrip() {
        let cmd = Cmd {
            op: Op::Add,
            ty: TypeId::I32,
            args: smallvec::smallvec![Val::Reg(Reg(1)), Val::Int(2)],
            result: Some(Reg(2)),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Cmd = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, back);
    }
}
