//! The interpreter state machine: byte stack, frames, and the execution
//! loop.
//!
//! Per function invocation the machine runs
//! `Enter -> ExecuteBlock -> {CommandStep}* -> BlockExit`; unconditional
//! and conditional exits move the block cursor (recording the previous
//! block for φ selection), and `Return` pops the frame, resetting the
//! stack bump pointer to the frame's base.

use indexmap::IndexMap;

use tern_core::foreign::{foreign_signature, shape_of};
use tern_core::id::{BlockId, FuncId, Reg};
use tern_core::intern::{TypeContext, TypeId};
use tern_core::layout::Arch;
use tern_core::types::{EnumDef, FlagsDef, PrimKind, StructDef, StructField, Type};

use crate::model::{Addr, Cmd, Exit, ModuleIr, Op, Val};

use super::error::InterpError;
use super::foreign::call_foreign;
use super::value::{Value, NULL_BITS};

const FRAME_LIMIT: usize = 1024;
const STEP_LIMIT: u64 = 50_000_000;

/// One function invocation on the call stack.
#[derive(Debug)]
pub struct Frame {
    pub func: FuncId,
    pub regs: Vec<Option<Value>>,
    pub ret_addrs: Vec<Addr>,
    pub cur: BlockId,
    pub prev: Option<BlockId>,
    pub pc: usize,
    pub stack_base: usize,
}

struct Memory {
    stack: Vec<u8>,
    heap: Vec<u8>,
    rodata: Vec<u8>,
}

impl Memory {
    fn bytes(&self, addr: Addr, len: usize) -> Result<&[u8], ()> {
        let (region, off) = match addr {
            Addr::Stack(o) => (&self.stack, o as usize),
            Addr::Heap(o) => (&self.heap, o as usize),
            Addr::ReadOnly(o) => (&self.rodata, o as usize),
        };
        region.get(off..off + len).ok_or(())
    }

    fn bytes_mut(&mut self, addr: Addr, len: usize) -> Result<&mut [u8], ()> {
        let (region, off) = match addr {
            Addr::Stack(o) => (&mut self.stack, o as usize),
            Addr::Heap(o) => (&mut self.heap, o as usize),
            // Read-only data is append-only during compilation.
            Addr::ReadOnly(_) => return Err(()),
        };
        region.get_mut(off..off + len).ok_or(())
    }
}

/// Builders for compile-time type construction opcodes.
enum SumBuilder {
    Struct { name: String, fields: Vec<StructField> },
    Enum { name: String, members: IndexMap<String, u64> },
    Flags { name: String, members: IndexMap<String, u64> },
}

pub struct Interp<'m> {
    module: &'m ModuleIr,
    ctx: &'m TypeContext,
    arch: Arch,
    mem: Memory,
    frames: Vec<Frame>,
    builders: Vec<SumBuilder>,
    steps: u64,
    /// Captured `print` / `putchar` output.
    pub output: String,
}

impl<'m> Interp<'m> {
    pub fn new(module: &'m ModuleIr, ctx: &'m TypeContext, arch: Arch) -> Self {
        Interp {
            module,
            ctx,
            arch,
            mem: Memory {
                stack: Vec::new(),
                heap: Vec::new(),
                rodata: module.rodata.clone(),
            },
            frames: Vec::new(),
            builders: Vec::new(),
            steps: 0,
            output: String::new(),
        }
    }

    fn func_name(&self) -> String {
        self.frames
            .last()
            .map(|f| self.module.func(f.func).name.clone())
            .unwrap_or_else(|| "<no frame>".to_string())
    }

    /// A dump of the call stack, printed when an internal trap aborts the
    /// compile.
    pub fn frame_dump(&self) -> String {
        let mut out = String::from("interpreter stack:\n");
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let func = self.module.func(frame.func);
            out.push_str(&format!(
                "  #{} `{}` at {}:{}\n",
                i, func.name, frame.cur, frame.pc
            ));
        }
        out
    }

    /// Calls a function with argument values and runs it to completion,
    /// returning its results (big results as addresses into the stack of
    /// the caller-provided slots).
    pub fn call(&mut self, f: FuncId, args: Vec<Value>) -> Result<Vec<Value>, InterpError> {
        let func_ty = self.module.func(f).ty;
        let results = match &*self.ctx.get(func_ty) {
            Type::Func { results, .. } => results.clone(),
            _ => vec![],
        };
        let base_depth = self.frames.len();
        let base_sp = self.mem.stack.len();

        let mut ret_addrs = Vec::new();
        for &rty in &results {
            ret_addrs.push(self.stack_alloc(rty));
        }

        self.push_frame(f, args, ret_addrs.clone())?;
        while self.frames.len() > base_depth {
            self.step()?;
        }

        let mut out = Vec::new();
        for (&rty, &addr) in results.iter().zip(ret_addrs.iter()) {
            if self.arch.is_big(self.ctx, rty) {
                out.push(Value::Addr(addr));
            } else {
                out.push(self.read_value(addr, rty)?);
            }
        }
        Ok(out)
    }

    fn push_frame(
        &mut self,
        f: FuncId,
        args: Vec<Value>,
        ret_addrs: Vec<Addr>,
    ) -> Result<(), InterpError> {
        if self.frames.len() >= FRAME_LIMIT {
            return Err(InterpError::StackOverflow { limit: FRAME_LIMIT });
        }
        let func = self.module.func(f);
        let mut regs = vec![None; func.reg_types.len()];
        for (i, arg) in args.into_iter().enumerate() {
            if i < regs.len() {
                regs[i] = Some(arg);
            }
        }
        self.frames.push(Frame {
            func: f,
            regs,
            ret_addrs,
            cur: func.entry,
            prev: None,
            pc: 0,
            stack_base: self.mem.stack.len(),
        });
        Ok(())
    }

    fn step(&mut self) -> Result<(), InterpError> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(InterpError::StepLimit { limit: STEP_LIMIT });
        }
        let (func_id, cur, pc) = match self.frames.last() {
            Some(f) => (f.func, f.cur, f.pc),
            None => {
                return Err(InterpError::Unreachable {
                    what: "step with an empty call stack".into(),
                })
            }
        };
        let func = self.module.func(func_id);
        let block = func.block(cur);
        if pc < block.cmds.len() {
            let cmd = block.cmds[pc].clone();
            if let Some(frame) = self.frames.last_mut() {
                frame.pc += 1;
            }
            return self.exec_cmd(&cmd);
        }

        match block.exit.clone() {
            Exit::Jump(target) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.prev = Some(cur);
                    frame.cur = target;
                    frame.pc = 0;
                }
            }
            Exit::Cond {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.resolve(&cond, TypeId::BOOL)?;
                let target = match c.as_bool() {
                    Some(true) => on_true,
                    Some(false) => on_false,
                    None => {
                        return Err(InterpError::Unreachable {
                            what: "non-bool conditional jump".into(),
                        })
                    }
                };
                if let Some(frame) = self.frames.last_mut() {
                    frame.prev = Some(cur);
                    frame.cur = target;
                    frame.pc = 0;
                }
            }
            Exit::Return => {
                if let Some(frame) = self.frames.pop() {
                    self.mem.stack.truncate(frame.stack_base);
                }
            }
            Exit::None => {
                return Err(InterpError::Unreachable {
                    what: "block without a terminator".into(),
                })
            }
        }
        Ok(())
    }

    // ---- value resolution ------------------------------------------------

    fn resolve(&self, val: &Val, ty: TypeId) -> Result<Value, InterpError> {
        Ok(match val {
            Val::Reg(r) => {
                let frame = self.frames.last().ok_or(InterpError::Unreachable {
                    what: "register read without a frame".into(),
                })?;
                match frame.regs.get(r.0 as usize) {
                    Some(Some(v)) => v.clone(),
                    _ => {
                        return Err(InterpError::UseBeforeInit {
                            func: self.func_name(),
                            reg: Reg(r.0),
                        })
                    }
                }
            }
            Val::Bool(b) => Value::Bool(*b),
            Val::Char(c) => Value::Char(*c),
            Val::Int(i) => self.int_value(*i, ty),
            Val::Uint(u) => self.uint_value(*u, ty),
            Val::Real(r) => match self.ctx.prim_of(ty) {
                Some(PrimKind::F32) => Value::F32(*r as f32),
                _ => Value::F64(*r),
            },
            Val::Type(t) => Value::Type(*t),
            Val::Func(f) => Value::Func(*f),
            Val::Foreign(name) => Value::Foreign(name.clone()),
            Val::Block(_) => {
                return Err(InterpError::Unreachable {
                    what: "block label used as a value".into(),
                })
            }
            Val::ByteView { off, len } => Value::View {
                addr: Addr::ReadOnly(*off as u64),
                len: *len as u64,
            },
            Val::Null => Value::Null,
            Val::Void => Value::Unit,
        })
    }

    fn int_value(&self, i: i64, ty: TypeId) -> Value {
        match &*self.ctx.get(ty) {
            Type::Prim(k) => match k {
                PrimKind::I8 => Value::I8(i as i8),
                PrimKind::I16 => Value::I16(i as i16),
                PrimKind::I32 => Value::I32(i as i32),
                PrimKind::I64 => Value::I64(i),
                PrimKind::U8 => Value::U8(i as u8),
                PrimKind::U16 => Value::U16(i as u16),
                PrimKind::U32 => Value::U32(i as u32),
                PrimKind::U64 => Value::U64(i as u64),
                PrimKind::F32 => Value::F32(i as f32),
                PrimKind::F64 => Value::F64(i as f64),
                PrimKind::Char => Value::Char(i as u8 as char),
                PrimKind::Bool => Value::Bool(i != 0),
                _ => Value::I64(i),
            },
            Type::Enum(_) | Type::Flags(_) => Value::U64(i as u64),
            _ => Value::I64(i),
        }
    }

    fn uint_value(&self, u: u64, ty: TypeId) -> Value {
        match &*self.ctx.get(ty) {
            Type::Prim(k) => match k {
                PrimKind::U8 => Value::U8(u as u8),
                PrimKind::U16 => Value::U16(u as u16),
                PrimKind::U32 => Value::U32(u as u32),
                PrimKind::U64 => Value::U64(u),
                PrimKind::I8 => Value::I8(u as i8),
                PrimKind::I16 => Value::I16(u as i16),
                PrimKind::I32 => Value::I32(u as i32),
                PrimKind::I64 => Value::I64(u as i64),
                _ => Value::U64(u),
            },
            Type::Enum(_) | Type::Flags(_) => Value::U64(u),
            _ => Value::U64(u),
        }
    }

    // ---- memory ----------------------------------------------------------

    fn stack_alloc(&mut self, ty: TypeId) -> Addr {
        let align = self.arch.alignment(self.ctx, ty).max(1);
        let size = self.arch.bytes(self.ctx, ty);
        let sp = self.arch.forward_align(self.mem.stack.len() as u64, align);
        self.mem.stack.resize((sp + size) as usize, 0);
        Addr::Stack(sp)
    }

    fn bad_address(&self) -> InterpError {
        InterpError::BadAddress {
            func: self.func_name(),
        }
    }

    fn read_value(&self, addr: Addr, ty: TypeId) -> Result<Value, InterpError> {
        let read_u64 = |bytes: &[u8]| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            u64::from_le_bytes(buf)
        };
        let size = self.arch.bytes(self.ctx, ty) as usize;
        let bytes = self
            .mem
            .bytes(addr, size)
            .map_err(|_| self.bad_address())?;
        Ok(match &*self.ctx.get(ty) {
            Type::Prim(k) => match k {
                PrimKind::Bool => Value::Bool(bytes[0] != 0),
                PrimKind::Char => Value::Char(bytes[0] as char),
                PrimKind::I8 => Value::I8(bytes[0] as i8),
                PrimKind::I16 => Value::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
                PrimKind::I32 => {
                    Value::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                }
                PrimKind::I64 => Value::I64(read_u64(bytes) as i64),
                PrimKind::U8 => Value::U8(bytes[0]),
                PrimKind::U16 => Value::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
                PrimKind::U32 => {
                    Value::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                }
                PrimKind::U64 => Value::U64(read_u64(bytes)),
                PrimKind::F32 => Value::F32(f32::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])),
                PrimKind::F64 => Value::F64(f64::from_bits(read_u64(bytes))),
                PrimKind::Type => Value::Type(TypeId(read_u64(bytes) as u32)),
                PrimKind::NullPtr => Value::Null,
                PrimKind::ByteView => {
                    let ptr_bits = read_u64(&bytes[0..8]);
                    let len = read_u64(&bytes[8..16]);
                    if ptr_bits == NULL_BITS {
                        Value::Null
                    } else {
                        Value::View {
                            addr: Addr::decode(ptr_bits),
                            len,
                        }
                    }
                }
                PrimKind::Void | PrimKind::EmptyArray => Value::Unit,
                PrimKind::Module => Value::U64(read_u64(bytes)),
            },
            Type::Ptr { .. } | Type::BufPtr { .. } => {
                let bits = read_u64(bytes);
                if bits == NULL_BITS {
                    Value::Null
                } else {
                    Value::Addr(Addr::decode(bits))
                }
            }
            Type::Func { .. } => Value::Func(FuncId(read_u64(bytes) as u32)),
            Type::Enum(_) | Type::Flags(_) => Value::U64(read_u64(bytes)),
            _ => {
                return Err(InterpError::Unreachable {
                    what: format!("load of aggregate type {}", self.ctx.display(ty)),
                })
            }
        })
    }

    fn write_value(&mut self, addr: Addr, ty: TypeId, value: &Value) -> Result<(), InterpError> {
        let size = self.arch.bytes(self.ctx, ty) as usize;
        if size == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; size];
        match &*self.ctx.get(ty) {
            Type::Prim(k) => match k {
                PrimKind::Bool => buf[0] = value.as_bool().unwrap_or(false) as u8,
                PrimKind::Char => buf[0] = value.as_i64().unwrap_or(0) as u8,
                PrimKind::I8 | PrimKind::U8 => buf[0] = value.as_i64().unwrap_or(0) as u8,
                PrimKind::I16 | PrimKind::U16 => {
                    buf.copy_from_slice(&(value.as_i64().unwrap_or(0) as u16).to_le_bytes())
                }
                PrimKind::I32 | PrimKind::U32 => {
                    buf.copy_from_slice(&(value.as_i64().unwrap_or(0) as u32).to_le_bytes())
                }
                PrimKind::I64 | PrimKind::U64 | PrimKind::Module => {
                    buf.copy_from_slice(&(value.as_i64().unwrap_or(0) as u64).to_le_bytes())
                }
                PrimKind::F32 => {
                    let f = value.as_f64().unwrap_or(0.0) as f32;
                    buf.copy_from_slice(&f.to_le_bytes())
                }
                PrimKind::F64 => {
                    buf.copy_from_slice(&value.as_f64().unwrap_or(0.0).to_le_bytes())
                }
                PrimKind::Type => {
                    let t = match value {
                        Value::Type(t) => t.0 as u64,
                        _ => 0,
                    };
                    buf.copy_from_slice(&t.to_le_bytes())
                }
                PrimKind::NullPtr => buf.copy_from_slice(&NULL_BITS.to_le_bytes()),
                PrimKind::ByteView => match value {
                    Value::View { addr, len } => {
                        buf[0..8].copy_from_slice(&addr.encode().to_le_bytes());
                        buf[8..16].copy_from_slice(&len.to_le_bytes());
                    }
                    _ => buf[0..8].copy_from_slice(&NULL_BITS.to_le_bytes()),
                },
                PrimKind::Void | PrimKind::EmptyArray => {}
            },
            Type::Ptr { .. } | Type::BufPtr { .. } => {
                let bits = match value {
                    Value::Addr(a) => a.encode(),
                    Value::Null => NULL_BITS,
                    _ => NULL_BITS,
                };
                buf.copy_from_slice(&bits.to_le_bytes());
            }
            Type::Func { .. } => {
                let bits = match value {
                    Value::Func(f) => f.0 as u64,
                    _ => 0,
                };
                buf.copy_from_slice(&bits.to_le_bytes());
            }
            Type::Enum(_) | Type::Flags(_) => {
                buf.copy_from_slice(&value.as_u64().unwrap_or(0).to_le_bytes())
            }
            _ => {
                return Err(InterpError::Unreachable {
                    what: format!("store of aggregate type {}", self.ctx.display(ty)),
                })
            }
        }
        let dst = self
            .mem
            .bytes_mut(addr, size)
            .map_err(|_| InterpError::BadAddress {
                func: "<store>".to_string(),
            })?;
        dst.copy_from_slice(&buf);
        Ok(())
    }

    fn memcpy(&mut self, dst: Addr, src: Addr, len: usize) -> Result<(), InterpError> {
        let bytes = self
            .mem
            .bytes(src, len)
            .map_err(|_| self.bad_address())?
            .to_vec();
        let out = self
            .mem
            .bytes_mut(dst, len)
            .map_err(|_| InterpError::BadAddress {
                func: "<memcpy>".to_string(),
            })?;
        out.copy_from_slice(&bytes);
        Ok(())
    }

    fn set_result(&mut self, reg: Option<Reg>, value: Value) {
        if let (Some(r), Some(frame)) = (reg, self.frames.last_mut()) {
            if let Some(slot) = frame.regs.get_mut(r.0 as usize) {
                *slot = Some(value);
            }
        }
    }

    fn view_string(&self, value: &Value) -> Result<String, InterpError> {
        match value {
            Value::View { addr, len } => {
                let bytes = self
                    .mem
                    .bytes(*addr, *len as usize)
                    .map_err(|_| self.bad_address())?;
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => Ok(value.to_string()),
        }
    }

    // ---- command dispatch ------------------------------------------------

    fn exec_cmd(&mut self, cmd: &Cmd) -> Result<(), InterpError> {
        match cmd.op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                if cmd.ty == TypeId::BYTE_VIEW && cmd.op == Op::Add {
                    let a = self.resolve(&cmd.args[0], cmd.ty)?;
                    let b = self.resolve(&cmd.args[1], cmd.ty)?;
                    let joined = format!("{}{}", self.view_string(&a)?, self.view_string(&b)?);
                    let off = self.mem.heap.len() as u64;
                    self.mem.heap.extend_from_slice(joined.as_bytes());
                    self.set_result(
                        cmd.result,
                        Value::View {
                            addr: Addr::Heap(off),
                            len: joined.len() as u64,
                        },
                    );
                    return Ok(());
                }
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let b = self.resolve(&cmd.args[1], cmd.ty)?;
                let v = self.arith(cmd.op, cmd.ty, &a, &b)?;
                self.set_result(cmd.result, v);
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Eq | Op::Ne => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let b = self.resolve(&cmd.args[1], cmd.ty)?;
                let v = self.compare(cmd.op, &a, &b)?;
                self.set_result(cmd.result, Value::Bool(v));
            }
            Op::Neg => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let v = match &a {
                    Value::I8(v) => Value::I8(v.wrapping_neg()),
                    Value::I16(v) => Value::I16(v.wrapping_neg()),
                    Value::I32(v) => Value::I32(v.wrapping_neg()),
                    Value::I64(v) => Value::I64(v.wrapping_neg()),
                    Value::F32(v) => Value::F32(-v),
                    Value::F64(v) => Value::F64(-v),
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: format!("negate {}", a.type_name()),
                        })
                    }
                };
                self.set_result(cmd.result, v);
            }
            Op::Not => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let v = match &a {
                    Value::Bool(b) => Value::Bool(!b),
                    Value::U64(bits) => Value::U64(!bits),
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: format!("not on {}", a.type_name()),
                        })
                    }
                };
                self.set_result(cmd.result, v);
            }
            Op::Or | Op::And | Op::Xor => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let b = self.resolve(&cmd.args[1], cmd.ty)?;
                let v = match (&a, &b) {
                    (Value::Bool(x), Value::Bool(y)) => Value::Bool(match cmd.op {
                        Op::Or => *x || *y,
                        Op::And => *x && *y,
                        _ => *x ^ *y,
                    }),
                    _ => {
                        let (x, y) = (a.as_u64().unwrap_or(0), b.as_u64().unwrap_or(0));
                        Value::U64(match cmd.op {
                            Op::Or => x | y,
                            Op::And => x & y,
                            _ => x ^ y,
                        })
                    }
                };
                self.set_result(cmd.result, v);
            }
            Op::Trunc | Op::Extend | Op::Cast => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                let v = self.convert(&a, cmd.ty)?;
                self.set_result(cmd.result, v);
            }
            Op::Bytes => {
                let a = self.resolve(&cmd.args[0], TypeId::TYPE)?;
                let t = match a {
                    Value::Type(t) => t,
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "bytes of a non-type".into(),
                        })
                    }
                };
                let n = self.arch.bytes(self.ctx, t);
                self.set_result(cmd.result, Value::I64(n as i64));
            }
            Op::Align => {
                let a = self.resolve(&cmd.args[0], TypeId::TYPE)?;
                let t = match a {
                    Value::Type(t) => t,
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "align of a non-type".into(),
                        })
                    }
                };
                let n = self.arch.alignment(self.ctx, t);
                self.set_result(cmd.result, Value::I64(n as i64));
            }
            Op::Print => {
                let a = self.resolve(&cmd.args[0], cmd.ty)?;
                self.print_value(cmd.ty, &a)?;
            }
            Op::Alloca => {
                let addr = self.stack_alloc(cmd.ty);
                self.set_result(cmd.result, Value::Addr(addr));
            }
            Op::Malloc => {
                let size = self
                    .resolve(&cmd.args[0], TypeId::U64)?
                    .as_u64()
                    .unwrap_or(0);
                let align = self.arch.alignment(self.ctx, cmd.ty).max(1);
                let off = self.arch.forward_align(self.mem.heap.len() as u64, align);
                self.mem.heap.resize((off + size) as usize, 0);
                self.set_result(cmd.result, Value::Addr(Addr::Heap(off)));
            }
            Op::Free => {
                // The compile-time heap is reclaimed wholesale when the
                // interpreter is dropped.
                self.resolve(&cmd.args[0], cmd.ty)?;
            }
            Op::Load => {
                let addr = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let v = self.read_value(addr, cmd.ty)?;
                self.set_result(cmd.result, v);
            }
            Op::Store => {
                let value = self.resolve(&cmd.args[0], cmd.ty)?;
                let addr = self
                    .resolve(&cmd.args[1], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                self.write_value(addr, cmd.ty, &value)?;
            }
            Op::SetRet => {
                let index = match &cmd.args[0] {
                    Val::Int(i) => *i as usize,
                    _ => 0,
                };
                let value = self.resolve(&cmd.args[1], cmd.ty)?;
                let target = {
                    let frame = self.frames.last().ok_or(InterpError::Unreachable {
                        what: "SetRet without a frame".into(),
                    })?;
                    frame.ret_addrs.get(index).copied()
                };
                let target = target.ok_or(InterpError::Unreachable {
                    what: "SetRet slot out of range".into(),
                })?;
                if self.arch.is_big(self.ctx, cmd.ty) {
                    let src = value.as_addr().ok_or_else(|| self.bad_address())?;
                    let len = self.arch.bytes(self.ctx, cmd.ty) as usize;
                    self.memcpy(target, src, len)?;
                } else {
                    self.write_value(target, cmd.ty, &value)?;
                }
            }
            Op::PtrIncr => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let idx = self
                    .resolve(&cmd.args[1], TypeId::U64)?
                    .as_u64()
                    .unwrap_or(0);
                let stride = self.arch.array_stride(self.ctx, cmd.ty);
                let addr = base.with_offset(base.offset() + idx * stride);
                self.set_result(cmd.result, Value::Addr(addr));
            }
            Op::Field => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let index = match &cmd.args[1] {
                    Val::Int(i) => *i as usize,
                    _ => 0,
                };
                let offset = match &*self.ctx.get(cmd.ty) {
                    Type::Struct(_) => self.arch.field_offset(self.ctx, cmd.ty, index),
                    Type::Tup { .. } => self.arch.tuple_offset(self.ctx, cmd.ty, index),
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "field of a non-aggregate".into(),
                        })
                    }
                };
                let addr = base.with_offset(base.offset() + offset);
                self.set_result(cmd.result, Value::Addr(addr));
            }
            Op::ArrayData => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let bits = {
                    let bytes = self.mem.bytes(base, 8).map_err(|_| self.bad_address())?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    u64::from_le_bytes(buf)
                };
                self.set_result(cmd.result, Value::Addr(Addr::decode(bits)));
            }
            Op::ArrayLength => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let len_addr = base.with_offset(base.offset() + 8);
                let bytes = self
                    .mem
                    .bytes(len_addr, 8)
                    .map_err(|_| self.bad_address())?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                self.set_result(cmd.result, Value::U64(u64::from_le_bytes(buf)));
            }
            Op::Phi => {
                let prev = self
                    .frames
                    .last()
                    .and_then(|f| f.prev)
                    .ok_or(InterpError::Unreachable {
                        what: "phi with no predecessor block".into(),
                    })?;
                let mut selected = None;
                for pair in cmd.args.chunks(2) {
                    if let [Val::Block(b), v] = pair {
                        if *b == prev {
                            selected = Some(v.clone());
                            break;
                        }
                    }
                }
                let v = match selected {
                    Some(v) => self.resolve(&v, cmd.ty)?,
                    None => {
                        return Err(InterpError::Unreachable {
                            what: "phi has no incoming pair for the predecessor".into(),
                        })
                    }
                };
                self.set_result(cmd.result, v);
            }
            Op::Call => self.exec_call(cmd)?,
            Op::Arrow => {
                let a = self.resolve(&cmd.args[0], TypeId::TYPE)?;
                let b = self.resolve(&cmd.args[1], TypeId::TYPE)?;
                match (a, b) {
                    (Value::Type(i), Value::Type(o)) => {
                        let params = if i == TypeId::VOID { vec![] } else { vec![i] };
                        let results = if o == TypeId::VOID { vec![] } else { vec![o] };
                        let f = self.ctx.func(params, results);
                        self.set_result(cmd.result, Value::Type(f));
                    }
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "arrow on non-types".into(),
                        })
                    }
                }
            }
            Op::PtrType => {
                let a = self.resolve(&cmd.args[0], TypeId::TYPE)?;
                match a {
                    Value::Type(t) => {
                        let p = self.ctx.ptr(t);
                        self.set_result(cmd.result, Value::Type(p));
                    }
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "ptr of a non-type".into(),
                        })
                    }
                }
            }
            Op::ArrType => {
                let len = self
                    .resolve(&cmd.args[0], TypeId::U64)?
                    .as_u64();
                let elem = self.resolve(&cmd.args[1], TypeId::TYPE)?;
                match elem {
                    Value::Type(t) => {
                        let a = self.ctx.arr(t, len);
                        self.set_result(cmd.result, Value::Type(a));
                    }
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "array of a non-type".into(),
                        })
                    }
                }
            }
            Op::Tup => {
                let mut entries = Vec::new();
                for arg in &cmd.args {
                    match self.resolve(arg, TypeId::TYPE)? {
                        Value::Type(t) => entries.push(t),
                        _ => {
                            return Err(InterpError::Unreachable {
                                what: "tuple of a non-type".into(),
                            })
                        }
                    }
                }
                let t = self.ctx.tup(entries);
                self.set_result(cmd.result, Value::Type(t));
            }
            Op::Variant => {
                let mut alts = Vec::new();
                for arg in &cmd.args {
                    match self.resolve(arg, TypeId::TYPE)? {
                        Value::Type(t) => alts.push(t),
                        _ => {
                            return Err(InterpError::Unreachable {
                                what: "variant of a non-type".into(),
                            })
                        }
                    }
                }
                let t = self.ctx.var(alts);
                self.set_result(cmd.result, Value::Type(t));
            }
            Op::VariantType => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                let v = self.read_value(base, TypeId::TYPE)?;
                self.set_result(cmd.result, v);
            }
            Op::VariantValue => {
                let base = self
                    .resolve(&cmd.args[0], self.ctx.ptr(cmd.ty))?
                    .as_addr()
                    .ok_or_else(|| self.bad_address())?;
                // The payload sits after the 8-byte tag.
                let addr = base.with_offset(base.offset() + 8);
                self.set_result(cmd.result, Value::Addr(addr));
            }
            Op::CreateStruct | Op::CreateEnum | Op::CreateFlags => {
                let name = {
                    let v = self.resolve(&cmd.args[0], TypeId::BYTE_VIEW)?;
                    self.view_string(&v)?
                };
                let builder = match cmd.op {
                    Op::CreateStruct => SumBuilder::Struct {
                        name,
                        fields: Vec::new(),
                    },
                    Op::CreateEnum => SumBuilder::Enum {
                        name,
                        members: IndexMap::new(),
                    },
                    _ => SumBuilder::Flags {
                        name,
                        members: IndexMap::new(),
                    },
                };
                self.builders.push(builder);
                self.set_result(cmd.result, Value::U64(self.builders.len() as u64 - 1));
            }
            Op::InsertField => {
                let handle = self
                    .resolve(&cmd.args[0], TypeId::U64)?
                    .as_u64()
                    .unwrap_or(0) as usize;
                let name = {
                    let v = self.resolve(&cmd.args[1], TypeId::BYTE_VIEW)?;
                    self.view_string(&v)?
                };
                let ty = match self.resolve(&cmd.args[2], TypeId::TYPE)? {
                    Value::Type(t) => t,
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "field of a non-type".into(),
                        })
                    }
                };
                match self.builders.get_mut(handle) {
                    Some(SumBuilder::Struct { fields, .. }) => fields.push(StructField {
                        name,
                        ty,
                        init: None,
                        hashtags: vec![],
                    }),
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "InsertField on a non-struct builder".into(),
                        })
                    }
                }
            }
            Op::InsertEnumMember | Op::InsertFlag => {
                let handle = self
                    .resolve(&cmd.args[0], TypeId::U64)?
                    .as_u64()
                    .unwrap_or(0) as usize;
                let name = {
                    let v = self.resolve(&cmd.args[1], TypeId::BYTE_VIEW)?;
                    self.view_string(&v)?
                };
                match self.builders.get_mut(handle) {
                    Some(SumBuilder::Enum { members, .. }) => {
                        let value = members.len() as u64;
                        members.insert(name, value);
                    }
                    Some(SumBuilder::Flags { members, .. }) => {
                        let value = 1u64 << members.len();
                        members.insert(name, value);
                    }
                    _ => {
                        return Err(InterpError::Unreachable {
                            what: "member insert on a non-sum builder".into(),
                        })
                    }
                }
            }
            Op::FinalizeStruct | Op::FinalizeEnum | Op::FinalizeFlags => {
                let handle = self
                    .resolve(&cmd.args[0], TypeId::U64)?
                    .as_u64()
                    .unwrap_or(0) as usize;
                let builder = match self.builders.get(handle) {
                    Some(b) => b,
                    None => {
                        return Err(InterpError::Unreachable {
                            what: "finalize of an unknown builder".into(),
                        })
                    }
                };
                let module = tern_core::id::ModuleId(0);
                let t = match builder {
                    SumBuilder::Struct { name, fields } => self.ctx.struct_type(StructDef {
                        name: name.clone(),
                        scope: tern_core::id::ScopeId(0),
                        module,
                        fields: fields.clone(),
                        hashtags: vec![],
                    }),
                    SumBuilder::Enum { name, members } => self.ctx.enum_type(EnumDef {
                        name: name.clone(),
                        module,
                        members: members.clone(),
                    }),
                    SumBuilder::Flags { name, members } => self.ctx.flags_type(FlagsDef {
                        name: name.clone(),
                        module,
                        members: members.clone(),
                    }),
                };
                self.set_result(cmd.result, Value::Type(t));
            }
        }
        Ok(())
    }

    fn exec_call(&mut self, cmd: &Cmd) -> Result<(), InterpError> {
        let (params, results) = match &*self.ctx.get(cmd.ty) {
            Type::Func { params, results } => (params.clone(), results.clone()),
            _ => {
                return Err(InterpError::Unreachable {
                    what: "call with a non-function type".into(),
                })
            }
        };
        let callee = self.resolve(&cmd.args[0], cmd.ty)?;
        let mut args = Vec::new();
        for (i, &pty) in params.iter().enumerate() {
            let reg_ty = if self.arch.is_big(self.ctx, pty) {
                self.ctx.ptr(pty)
            } else {
                pty
            };
            args.push(self.resolve(&cmd.args[1 + i], reg_ty)?);
        }
        let mut ret_addrs = Vec::new();
        for (j, &rty) in results.iter().enumerate() {
            let v = self.resolve(&cmd.args[1 + params.len() + j], self.ctx.ptr(rty))?;
            ret_addrs.push(v.as_addr().ok_or_else(|| self.bad_address())?);
        }
        match callee {
            Value::Func(f) => self.push_frame(f, args, ret_addrs),
            Value::Foreign(name) => {
                let shape = foreign_signature(&name).ok_or(InterpError::UnsupportedForeign {
                    name: name.clone(),
                })?;
                if shape_of(self.ctx, cmd.ty) != Some(shape) {
                    return Err(InterpError::UnsupportedForeign { name });
                }
                let result = call_foreign(&name, shape, &args, &mut self.output)?;
                if let (Some(v), Some(&rty)) = (result, results.first()) {
                    if let Some(&addr) = ret_addrs.first() {
                        self.write_value(addr, rty, &v)?;
                    }
                }
                Ok(())
            }
            other => Err(InterpError::Unreachable {
                what: format!("call through a {} value", other.type_name()),
            }),
        }
    }

    // ---- arithmetic ------------------------------------------------------

    fn arith(&self, op: Op, ty: TypeId, a: &Value, b: &Value) -> Result<Value, InterpError> {
        let kind = self.ctx.prim_of(ty);
        match kind {
            Some(k) if k.is_signed() => {
                let (x, y) = (
                    a.as_i64().unwrap_or(0),
                    b.as_i64().unwrap_or(0),
                );
                if matches!(op, Op::Div | Op::Mod) && y == 0 {
                    return Err(InterpError::DivideByZero {
                        func: self.func_name(),
                    });
                }
                let r = match op {
                    Op::Add => x.wrapping_add(y),
                    Op::Sub => x.wrapping_sub(y),
                    Op::Mul => x.wrapping_mul(y),
                    Op::Div => x.wrapping_div(y),
                    _ => x.wrapping_rem(y),
                };
                Ok(match k {
                    PrimKind::I8 => Value::I8(r as i8),
                    PrimKind::I16 => Value::I16(r as i16),
                    PrimKind::I32 => Value::I32(r as i32),
                    _ => Value::I64(r),
                })
            }
            Some(k) if k.is_unsigned() => {
                let (x, y) = (
                    a.as_u64().unwrap_or(0),
                    b.as_u64().unwrap_or(0),
                );
                if matches!(op, Op::Div | Op::Mod) && y == 0 {
                    return Err(InterpError::DivideByZero {
                        func: self.func_name(),
                    });
                }
                let r = match op {
                    Op::Add => x.wrapping_add(y),
                    Op::Sub => x.wrapping_sub(y),
                    Op::Mul => x.wrapping_mul(y),
                    Op::Div => x / y,
                    _ => x % y,
                };
                Ok(match k {
                    PrimKind::U8 => Value::U8(r as u8),
                    PrimKind::U16 => Value::U16(r as u16),
                    PrimKind::U32 => Value::U32(r as u32),
                    _ => Value::U64(r),
                })
            }
            Some(k) if k.is_real() => {
                let (x, y) = (
                    a.as_f64().unwrap_or(0.0),
                    b.as_f64().unwrap_or(0.0),
                );
                let r = match op {
                    Op::Add => x + y,
                    Op::Sub => x - y,
                    Op::Mul => x * y,
                    Op::Div => x / y,
                    _ => x % y,
                };
                Ok(if k == PrimKind::F32 {
                    Value::F32(r as f32)
                } else {
                    Value::F64(r)
                })
            }
            _ => Err(InterpError::Unreachable {
                what: format!("arithmetic on {}", self.ctx.display(ty)),
            }),
        }
    }

    fn compare(&self, op: Op, a: &Value, b: &Value) -> Result<bool, InterpError> {
        use std::cmp::Ordering;
        let ord = match (a, b) {
            (Value::F32(_), _) | (Value::F64(_), _) | (_, Value::F32(_)) | (_, Value::F64(_)) => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                // IEEE-754: unordered comparisons are all false except `!=`.
                match x.partial_cmp(&y) {
                    Some(o) => o,
                    None => return Ok(op == Op::Ne),
                }
            }
            (Value::Type(x), Value::Type(y)) => x.0.cmp(&y.0),
            (Value::Func(x), Value::Func(y)) => x.0.cmp(&y.0),
            (Value::Addr(x), Value::Addr(y)) => x.encode().cmp(&y.encode()),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) | (_, Value::Null) => Ordering::Greater,
            (Value::U64(x), Value::U64(y)) => x.cmp(y),
            _ => {
                let (x, y) = (
                    a.as_i64().ok_or(InterpError::Unreachable {
                        what: format!("compare {} with {}", a.type_name(), b.type_name()),
                    })?,
                    b.as_i64().ok_or(InterpError::Unreachable {
                        what: format!("compare {} with {}", a.type_name(), b.type_name()),
                    })?,
                );
                x.cmp(&y)
            }
        };
        Ok(match op {
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Eq => ord == Ordering::Equal,
            _ => ord != Ordering::Equal,
        })
    }

    /// Numeric conversion toward the command type (Trunc/Extend/Cast).
    fn convert(&self, value: &Value, ty: TypeId) -> Result<Value, InterpError> {
        match &*self.ctx.get(ty) {
            Type::Prim(k) => Ok(match k {
                PrimKind::Bool => Value::Bool(value.as_i64().unwrap_or(0) != 0),
                PrimKind::Char => Value::Char(value.as_i64().unwrap_or(0) as u8 as char),
                PrimKind::I8 => Value::I8(self.to_i64(value) as i8),
                PrimKind::I16 => Value::I16(self.to_i64(value) as i16),
                PrimKind::I32 => Value::I32(self.to_i64(value) as i32),
                PrimKind::I64 => Value::I64(self.to_i64(value)),
                PrimKind::U8 => Value::U8(self.to_i64(value) as u8),
                PrimKind::U16 => Value::U16(self.to_i64(value) as u16),
                PrimKind::U32 => Value::U32(self.to_i64(value) as u32),
                PrimKind::U64 => Value::U64(self.to_i64(value) as u64),
                PrimKind::F32 => Value::F32(self.to_f64(value) as f32),
                PrimKind::F64 => Value::F64(self.to_f64(value)),
                _ => {
                    return Err(InterpError::Unreachable {
                        what: format!("cast to {}", self.ctx.display(ty)),
                    })
                }
            }),
            Type::Ptr { .. } | Type::BufPtr { .. } => Ok(value.clone()),
            _ => Err(InterpError::Unreachable {
                what: format!("cast to {}", self.ctx.display(ty)),
            }),
        }
    }

    fn to_i64(&self, value: &Value) -> i64 {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or(0)
    }

    fn to_f64(&self, value: &Value) -> f64 {
        value
            .as_f64()
            .or_else(|| value.as_i64().map(|i| i as f64))
            .unwrap_or(0.0)
    }

    fn print_value(&mut self, ty: TypeId, value: &Value) -> Result<(), InterpError> {
        let text = match &*self.ctx.get(ty) {
            Type::Enum(def) => {
                let v = value.as_u64().unwrap_or(0);
                def.value_name(v)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| v.to_string())
            }
            Type::Flags(def) => {
                let bits = value.as_u64().unwrap_or(0);
                let names: Vec<&str> = def
                    .members
                    .iter()
                    .filter(|(_, &v)| bits & v != 0)
                    .map(|(n, _)| n.as_str())
                    .collect();
                names.join("|")
            }
            Type::Prim(PrimKind::ByteView) => self.view_string(value)?,
            Type::Prim(PrimKind::Type) => match value {
                Value::Type(t) => self.ctx.display(*t),
                _ => value.to_string(),
            },
            _ => value.to_string(),
        };
        self.output.push_str(&text);
        Ok(())
    }
}
