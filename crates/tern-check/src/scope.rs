//! The scope graph: lexical scopes, declaration insertion, and lookup.
//!
//! Scopes live in an arena and reference their parent by index. A
//! declaration appears in exactly one scope. Duplicate names in one scope
//! are allowed only when every colliding declaration is a `::=` constant
//! (an overload set); declaring a name that already resolves in an
//! ancestor scope is a shadowing violation.
//!
//! Lookup walks the parent chain collecting *all* matching declarations;
//! an identifier with several candidates later gets the overload-set type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tern_core::diag::{ErrorLog, Stage};
use tern_core::id::{DeclId, NodeId, ScopeId};
use tern_syntax::ast::{Ast, DeclKind, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Declaration-only scopes: the module root and struct bodies.
    Decl,
    Block,
    Fn,
    For,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub decls: HashMap<String, Vec<DeclId>>,
}

/// Everything later passes need to know about one declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclInfo {
    pub name: String,
    pub node: NodeId,
    pub scope: ScopeId,
    pub kind: DeclKind,
    pub constant: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScopeGraph {
    scopes: Vec<Scope>,
    decls: Vec<DeclInfo>,
    /// Declaration node -> its DeclId.
    pub node_decl: HashMap<NodeId, DeclId>,
    /// Identifier node -> all candidate declarations, innermost first.
    pub ident_decls: HashMap<NodeId, Vec<DeclId>>,
    /// Scope introduced by a `FnLit`, `StructLit`, or `For` node.
    pub construct_scopes: HashMap<NodeId, ScopeId>,
}

impl ScopeGraph {
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn decl(&self, id: DeclId) -> &DeclInfo {
        &self.decls[id.0 as usize]
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn decl_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len() as u32).map(DeclId)
    }

    fn new_scope(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            kind,
            decls: HashMap::new(),
        });
        id
    }

    /// All declarations named `name` visible from `scope`, walking the
    /// parent chain outward.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Vec<DeclId> {
        let mut found = Vec::new();
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if let Some(ids) = self.scope(s).decls.get(name) {
                found.extend(ids.iter().copied());
            }
            cur = self.scope(s).parent;
        }
        found
    }

    fn resolves_in_ancestor(&self, scope: ScopeId, name: &str) -> bool {
        let mut cur = self.scope(scope).parent;
        while let Some(s) = cur {
            if self.scope(s).decls.contains_key(name) {
                return true;
            }
            cur = self.scope(s).parent;
        }
        false
    }
}

/// Builds the scope graph for a module and resolves every identifier to
/// its candidate declarations.
pub fn assign_scopes(ast: &Ast, root: NodeId, log: &mut ErrorLog) -> ScopeGraph {
    let mut walker = Walker {
        ast,
        graph: ScopeGraph::default(),
        log,
    };
    let module_scope = walker.graph.new_scope(None, ScopeKind::Decl);
    match ast.kind(root) {
        NodeKind::Stmts { list } => {
            let list = list.clone();
            walker.walk_stmts(&list, module_scope);
        }
        _ => walker.walk(root, module_scope),
    }
    walker.graph
}

struct Walker<'a, 'log> {
    ast: &'a Ast,
    graph: ScopeGraph,
    log: &'log mut ErrorLog,
}

impl Walker<'_, '_> {
    /// Statement lists are two-phase: declarations are inserted first so
    /// later statements may reference earlier-or-later names, then the
    /// statements are walked for resolution.
    fn walk_stmts(&mut self, list: &[NodeId], scope: ScopeId) {
        for &stmt in list {
            if matches!(self.ast.kind(stmt), NodeKind::Decl { .. }) {
                self.insert_decl(stmt, scope);
            }
        }
        for &stmt in list {
            self.walk(stmt, scope);
        }
    }

    fn insert_decl(&mut self, node: NodeId, scope: ScopeId) -> DeclId {
        let (name, kind, constant) = match self.ast.kind(node) {
            NodeKind::Decl {
                name,
                kind,
                constant,
                ..
            } => (name.clone(), *kind, *constant),
            _ => ("_".to_string(), DeclKind::Infer, false),
        };

        if let Some(existing) = self.graph.scope(scope).decls.get(&name) {
            let all_const = constant
                && existing
                    .iter()
                    .all(|&d| self.graph.decl(d).constant);
            if !all_const {
                self.log.error(
                    Stage::Resolve,
                    self.ast.span(node),
                    format!("`{}` is already declared in this scope", name),
                );
            }
        } else if name != "_" && self.graph.resolves_in_ancestor(scope, &name) {
            self.log.error(
                Stage::Resolve,
                self.ast.span(node),
                format!("declaration of `{}` shadows an outer declaration", name),
            );
        }

        let id = DeclId(self.graph.decls.len() as u32);
        self.graph.decls.push(DeclInfo {
            name: name.clone(),
            node,
            scope,
            kind,
            constant,
        });
        if let Some(s) = self.graph.scopes.get_mut(scope.0 as usize) {
            s.decls.entry(name).or_default().push(id);
        }
        self.graph.node_decl.insert(node, id);
        id
    }

    fn walk(&mut self, node: NodeId, scope: ScopeId) {
        match self.ast.kind(node).clone() {
            NodeKind::Terminal(_) => {}
            NodeKind::Ident { name } => {
                let found = self.graph.lookup(scope, &name);
                self.graph.ident_decls.insert(node, found);
            }
            NodeKind::Unop { operand, .. } => self.walk(operand, scope),
            NodeKind::Binop { lhs, rhs, .. } => {
                self.walk(lhs, scope);
                self.walk(rhs, scope);
            }
            NodeKind::Chain { exprs, .. } => {
                for e in exprs {
                    self.walk(e, scope);
                }
            }
            NodeKind::Access { operand, .. } => self.walk(operand, scope),
            NodeKind::Index { operand, index } => {
                self.walk(operand, scope);
                self.walk(index, scope);
            }
            NodeKind::Call {
                callee,
                positional,
                named,
            } => {
                self.walk(callee, scope);
                for a in positional {
                    self.walk(a, scope);
                }
                for (_, a) in named {
                    self.walk(a, scope);
                }
            }
            NodeKind::Decl { ty_expr, init, .. } => {
                if !self.graph.node_decl.contains_key(&node) {
                    self.insert_decl(node, scope);
                }
                if let Some(t) = ty_expr {
                    self.walk(t, scope);
                }
                if let Some(i) = init {
                    self.walk(i, scope);
                }
            }
            NodeKind::ArrayLit { elems } => {
                for e in elems {
                    self.walk(e, scope);
                }
            }
            NodeKind::ArrayType { len, elem } => {
                if let Some(l) = len {
                    self.walk(l, scope);
                }
                self.walk(elem, scope);
            }
            NodeKind::StructLit { params, fields } => {
                let inner = self.graph.new_scope(Some(scope), ScopeKind::Decl);
                self.graph.construct_scopes.insert(node, inner);
                for p in params {
                    if matches!(self.ast.kind(p), NodeKind::Decl { .. }) {
                        self.insert_decl(p, inner);
                    }
                    self.walk(p, inner);
                }
                self.walk_stmts(&fields, inner);
            }
            NodeKind::EnumLit { .. } | NodeKind::FlagsLit { .. } => {}
            NodeKind::FnLit { inputs, ret, body } => {
                let fn_scope = self.graph.new_scope(Some(scope), ScopeKind::Fn);
                self.graph.construct_scopes.insert(node, fn_scope);
                for input in &inputs {
                    if matches!(self.ast.kind(*input), NodeKind::Decl { .. }) {
                        self.insert_decl(*input, fn_scope);
                    }
                }
                for input in &inputs {
                    self.walk(*input, fn_scope);
                }
                if let Some(r) = ret {
                    self.walk(r, fn_scope);
                }
                // The body's statement list shares the function scope.
                match self.ast.kind(body).clone() {
                    NodeKind::Stmts { list } => self.walk_stmts(&list, fn_scope),
                    _ => self.walk(body, fn_scope),
                }
            }
            NodeKind::Case { arms } => {
                for (k, v) in arms {
                    self.walk(k, scope);
                    self.walk(v, scope);
                }
            }
            NodeKind::If {
                conds,
                bodies,
                else_body,
            } => {
                for c in conds {
                    self.walk(c, scope);
                }
                for b in bodies {
                    self.walk(b, scope);
                }
                if let Some(e) = else_body {
                    self.walk(e, scope);
                }
            }
            NodeKind::While { cond, body } => {
                self.walk(cond, scope);
                self.walk(body, scope);
            }
            NodeKind::For { iters, body } => {
                let for_scope = self.graph.new_scope(Some(scope), ScopeKind::For);
                self.graph.construct_scopes.insert(node, for_scope);
                for iter in &iters {
                    if matches!(self.ast.kind(*iter), NodeKind::Decl { .. }) {
                        self.insert_decl(*iter, for_scope);
                    }
                }
                for iter in &iters {
                    self.walk(*iter, for_scope);
                }
                match self.ast.kind(body).clone() {
                    NodeKind::Stmts { list } => self.walk_stmts(&list, for_scope),
                    _ => self.walk(body, for_scope),
                }
            }
            NodeKind::Jump { value, .. } => {
                if let Some(v) = value {
                    self.walk(v, scope);
                }
            }
            NodeKind::Stmts { list } => {
                let block = self.graph.new_scope(Some(scope), ScopeKind::Block);
                self.graph.construct_scopes.insert(node, block);
                self.walk_stmts(&list, block);
            }
            NodeKind::CommaList { elems } => {
                for e in elems {
                    self.walk(e, scope);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::source::SourceBuffer;
    use tern_syntax::lexer::lex;
    use tern_syntax::parser::parse_module;

    fn build(text: &str) -> (Ast, NodeId, ScopeGraph, ErrorLog) {
        let src = SourceBuffer::new("test", text);
        let mut log = ErrorLog::new();
        let tokens = lex(&src, &mut log);
        let (ast, root) = parse_module(&tokens, &mut log);
        let graph = assign_scopes(&ast, root, &mut log);
        (ast, root, graph, log)
    }

    fn ident_node(ast: &Ast, name: &str) -> NodeId {
        ast.ids()
            .find(|&id| matches!(ast.kind(id), NodeKind::Ident { name: n } if n == name))
            .expect("identifier not found")
    }

    #[test]
    fn forward_references_resolve_at_module_level() {
        let (ast, _, graph, log) = build("f ::= () -> int32 { return g() }\ng ::= () -> int32 { return 1 }");
        assert!(!log.has_errors());
        let g_use = ident_node(&ast, "g");
        assert_eq!(graph.ident_decls[&g_use].len(), 1);
    }

    #[test]
    fn overload_sets_collect_all_candidates() {
        let (ast, _, graph, log) = build(
            "add ::= (a: int32, b: int32) -> int32 { return a }\n\
             add ::= (a: float64, b: float64) -> float64 { return a }\n\
             x := add",
        );
        assert!(!log.has_errors());
        // The use site (the last `add`) sees both declarations.
        let uses: Vec<NodeId> = ast
            .ids()
            .filter(|&id| matches!(ast.kind(id), NodeKind::Ident { name } if name == "add"))
            .collect();
        let use_site = *uses.last().unwrap();
        assert_eq!(graph.ident_decls[&use_site].len(), 2);
    }

    #[test]
    fn non_constant_redeclaration_is_an_error() {
        let (_, _, _, log) = build("x := 1\nx := 2");
        assert!(log.has_errors());
    }

    #[test]
    fn shadowing_is_an_error() {
        let (_, _, _, log) = build("x := 1\nf ::= () -> int32 { x := 2\nreturn x }");
        assert!(log.has_errors());
    }

    #[test]
    fn params_live_in_the_function_scope() {
        let (ast, _, graph, log) = build("f ::= (a: int32) -> int32 { return a }");
        assert!(!log.has_errors());
        let a_use = ast
            .ids()
            .filter(|&id| matches!(ast.kind(id), NodeKind::Ident { name } if name == "a"))
            .next_back()
            .unwrap();
        let decls = &graph.ident_decls[&a_use];
        assert_eq!(decls.len(), 1);
        let info = graph.decl(decls[0]);
        assert_eq!(graph.scope(info.scope).kind, ScopeKind::Fn);
    }

    #[test]
    fn unknown_identifier_has_no_candidates() {
        let (ast, _, graph, _) = build("y := nope");
        let use_site = ident_node(&ast, "nope");
        assert!(graph.ident_decls[&use_site].is_empty());
    }

    #[test]
    fn for_iterators_get_their_own_scope() {
        let (ast, _, graph, log) = build("xs := [1, 2]\nfor x in xs { print x }");
        assert!(!log.has_errors());
        let x_use = ast
            .ids()
            .filter(|&id| matches!(ast.kind(id), NodeKind::Ident { name } if name == "x"))
            .next_back()
            .unwrap();
        let decls = &graph.ident_decls[&x_use];
        assert_eq!(decls.len(), 1);
        assert_eq!(
            graph.scope(graph.decl(decls[0]).scope).kind,
            ScopeKind::For
        );
    }
}
