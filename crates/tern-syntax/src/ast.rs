//! The untyped AST, stored in a per-module arena.
//!
//! Nodes reference children by [`NodeId`] into the arena; every node has at
//! most one parent, and back-references (a declaration's scope, an
//! identifier's candidate declarations) are indices filled in by later
//! passes, never pointers.

use serde::{Deserialize, Serialize};

use tern_core::id::NodeId;
use tern_core::source::Span;
use tern_core::types::PrimKind;

/// The four declaration kinds: `x: T` / `x := v` / `x in c` / `` x `pred ``.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Std,
    Infer,
    In,
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpKind {
    Return,
    Break,
    Continue,
    Repeat,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Unary `-`.
    Neg,
    /// `!`.
    Not,
    /// `&` - address of an lvalue, or pointer-type constructor on a type.
    Addr,
    /// `@` - dereference.
    Deref,
    Print,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Xor,
    /// `..`
    Range,
    /// `->` on two types: the function-type constructor.
    Arrow,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
}

impl BinOp {
    pub fn is_assign(self) -> bool {
        matches!(
            self,
            BinOp::Assign
                | BinOp::AddAssign
                | BinOp::SubAssign
                | BinOp::MulAssign
                | BinOp::DivAssign
                | BinOp::ModAssign
                | BinOp::AndAssign
                | BinOp::OrAssign
                | BinOp::XorAssign
        )
    }

    /// The underlying arithmetic op of a compound assignment.
    pub fn compound_base(self) -> Option<BinOp> {
        Some(match self {
            BinOp::AddAssign => BinOp::Add,
            BinOp::SubAssign => BinOp::Sub,
            BinOp::MulAssign => BinOp::Mul,
            BinOp::DivAssign => BinOp::Div,
            BinOp::ModAssign => BinOp::Mod,
            _ => return None,
        })
    }
}

/// Operators that fold into chains rather than nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl ChainOp {
    pub fn is_comparison(self) -> bool {
        !matches!(self, ChainOp::And | ChainOp::Or)
    }
}

/// Literal and reserved-terminal payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermValue {
    Int(i64),
    Real(f64),
    Char(char),
    Str(String),
    Bool(bool),
    Null,
    /// A primitive type literal (`int32`, ...).
    Prim(PrimKind),
}

/// The tagged node sum. Children are arena indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Terminal(TermValue),
    Ident {
        name: String,
    },
    Unop {
        op: UnOp,
        operand: NodeId,
    },
    Binop {
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// `exprs.len() == ops.len() + 1`.
    Chain {
        ops: Vec<ChainOp>,
        exprs: Vec<NodeId>,
    },
    Access {
        operand: NodeId,
        member: String,
    },
    Index {
        operand: NodeId,
        index: NodeId,
    },
    Call {
        callee: NodeId,
        positional: Vec<NodeId>,
        named: Vec<(String, NodeId)>,
    },
    Decl {
        name: String,
        kind: DeclKind,
        /// Declared with `::=`: constant, and overloadable.
        constant: bool,
        ty_expr: Option<NodeId>,
        init: Option<NodeId>,
    },
    ArrayLit {
        elems: Vec<NodeId>,
    },
    /// `[len; elem]`; `len == None` is the dynamic-length spelling `[; elem]`.
    ArrayType {
        len: Option<NodeId>,
        elem: NodeId,
    },
    StructLit {
        params: Vec<NodeId>,
        fields: Vec<NodeId>,
    },
    EnumLit {
        members: Vec<String>,
    },
    FlagsLit {
        members: Vec<String>,
    },
    FnLit {
        inputs: Vec<NodeId>,
        /// The declared output type expression; `None` means void.
        ret: Option<NodeId>,
        body: NodeId,
    },
    Case {
        arms: Vec<(NodeId, NodeId)>,
    },
    If {
        conds: Vec<NodeId>,
        bodies: Vec<NodeId>,
        else_body: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    For {
        iters: Vec<NodeId>,
        body: NodeId,
    },
    Jump {
        kind: JumpKind,
        value: Option<NodeId>,
    },
    Stmts {
        list: Vec<NodeId>,
    },
    /// A parenthesized comma list `(a, b, c)`; the unit value when empty.
    CommaList {
        elems: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

/// Arena of AST nodes for one module.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Ast {
        Ast::default()
    }

    pub fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, span });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0 as usize].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0 as usize].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.0 as usize].span
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Direct children of a node, in source order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::Terminal(_)
            | NodeKind::Ident { .. }
            | NodeKind::EnumLit { .. }
            | NodeKind::FlagsLit { .. } => vec![],
            NodeKind::Unop { operand, .. } => vec![*operand],
            NodeKind::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::Chain { exprs, .. } => exprs.clone(),
            NodeKind::Access { operand, .. } => vec![*operand],
            NodeKind::Index { operand, index } => vec![*operand, *index],
            NodeKind::Call {
                callee,
                positional,
                named,
            } => {
                let mut out = vec![*callee];
                out.extend(positional.iter().copied());
                out.extend(named.iter().map(|(_, n)| *n));
                out
            }
            NodeKind::Decl { ty_expr, init, .. } => {
                ty_expr.iter().chain(init.iter()).copied().collect()
            }
            NodeKind::ArrayLit { elems } => elems.clone(),
            NodeKind::ArrayType { len, elem } => {
                len.iter().copied().chain(std::iter::once(*elem)).collect()
            }
            NodeKind::StructLit { params, fields } => {
                params.iter().chain(fields.iter()).copied().collect()
            }
            NodeKind::FnLit { inputs, ret, body } => {
                let mut out = inputs.clone();
                out.extend(ret.iter().copied());
                out.push(*body);
                out
            }
            NodeKind::Case { arms } => arms.iter().flat_map(|&(k, v)| [k, v]).collect(),
            NodeKind::If {
                conds,
                bodies,
                else_body,
            } => conds
                .iter()
                .chain(bodies.iter())
                .chain(else_body.iter())
                .copied()
                .collect(),
            NodeKind::While { cond, body } => vec![*cond, *body],
            NodeKind::For { iters, body } => {
                iters.iter().copied().chain(std::iter::once(*body)).collect()
            }
            NodeKind::Jump { value, .. } => value.iter().copied().collect(),
            NodeKind::Stmts { list } => list.clone(),
            NodeKind::CommaList { elems } => elems.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_indices_are_stable() {
        let mut ast = Ast::new();
        let a = ast.push(NodeKind::Terminal(TermValue::Int(1)), Span::new(0, 1));
        let b = ast.push(NodeKind::Terminal(TermValue::Int(2)), Span::new(2, 3));
        let sum = ast.push(
            NodeKind::Binop {
                op: BinOp::Add,
                lhs: a,
                rhs: b,
            },
            Span::new(0, 3),
        );
        assert_eq!(ast.len(), 3);
        match ast.kind(sum) {
            NodeKind::Binop { lhs, rhs, .. } => {
                assert_eq!(*lhs, a);
                assert_eq!(*rhs, b);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn compound_assign_bases() {
        assert_eq!(BinOp::AddAssign.compound_base(), Some(BinOp::Add));
        assert_eq!(BinOp::ModAssign.compound_base(), Some(BinOp::Mod));
        assert_eq!(BinOp::Assign.compound_base(), None);
        assert!(BinOp::Assign.is_assign());
        assert!(!BinOp::Add.is_assign());
    }

    #[test]
    fn chain_op_classes() {
        assert!(ChainOp::Lt.is_comparison());
        assert!(ChainOp::Eq.is_comparison());
        assert!(!ChainOp::And.is_comparison());
    }
}
