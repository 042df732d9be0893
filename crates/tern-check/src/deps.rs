//! Dependency ordering for top-level declarations.
//!
//! A digraph over the module's top-level declarations carries an edge from
//! each declaration to every declaration referenced by its type expression
//! or initializer. References inside function-literal *bodies* do not
//! create edges (signatures do), so mutually recursive functions with
//! explicit signatures are legal while type-level cycles are caught.
//!
//! Strongly connected components of size > 1 (or with a self-loop) are
//! reported as cycles naming the participants; every participant's type
//! becomes `Error` and checking of those declarations is skipped.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use tern_core::diag::{ErrorLog, Stage};
use tern_core::id::{DeclId, NodeId};
use tern_syntax::ast::{Ast, NodeKind};

use crate::scope::ScopeGraph;

/// The result of dependency resolution: declarations in
/// dependencies-first order, plus the set that participated in a cycle.
#[derive(Debug, Default)]
pub struct DeclOrder {
    pub order: Vec<DeclId>,
    pub cyclic: HashSet<DeclId>,
}

/// Orders the module-scope declarations for type checking.
pub fn order_decls(ast: &Ast, scopes: &ScopeGraph, log: &mut ErrorLog) -> DeclOrder {
    let top_level: Vec<DeclId> = scopes
        .decl_ids()
        .filter(|&d| scopes.decl(d).scope == scopes.root())
        .collect();

    let mut graph: DiGraph<DeclId, ()> = DiGraph::new();
    let mut index_of: HashMap<DeclId, NodeIndex> = HashMap::new();
    for &d in &top_level {
        index_of.insert(d, graph.add_node(d));
    }

    for &d in &top_level {
        let info = scopes.decl(d);
        let mut referenced = Vec::new();
        if let NodeKind::Decl { ty_expr, init, .. } = ast.kind(info.node) {
            if let Some(t) = *ty_expr {
                collect_refs(ast, scopes, t, &mut referenced);
            }
            if let Some(i) = *init {
                collect_refs(ast, scopes, i, &mut referenced);
            }
        }
        for target in referenced {
            if let Some(&target_idx) = index_of.get(&target) {
                let from = index_of[&d];
                graph.update_edge(from, target_idx, ());
            }
        }
    }

    // tarjan_scc yields components in reverse topological order, which is
    // exactly dependencies-first for our edge direction.
    let sccs = tarjan_scc(&graph);
    let mut result = DeclOrder::default();
    for scc in sccs {
        let is_cycle = scc.len() > 1
            || (scc.len() == 1 && graph.contains_edge(scc[0], scc[0]));
        if is_cycle {
            let names: Vec<&str> = scc
                .iter()
                .map(|&idx| scopes.decl(graph[idx]).name.as_str())
                .collect();
            let span = scopes
                .decl(graph[scc[0]])
                .node;
            log.error(
                Stage::Resolve,
                ast.span(span),
                format!("cyclic dependency between: {}", names.join(", ")),
            );
            for &idx in &scc {
                result.cyclic.insert(graph[idx]);
            }
        }
        for &idx in &scc {
            result.order.push(graph[idx]);
        }
    }
    result
}

/// Collects top-level declarations referenced from `node`, skipping
/// function-literal bodies.
fn collect_refs(ast: &Ast, scopes: &ScopeGraph, node: NodeId, out: &mut Vec<DeclId>) {
    match ast.kind(node) {
        NodeKind::Ident { .. } => {
            if let Some(decls) = scopes.ident_decls.get(&node) {
                out.extend(decls.iter().copied());
            }
        }
        NodeKind::Terminal(_) | NodeKind::EnumLit { .. } | NodeKind::FlagsLit { .. } => {}
        NodeKind::Unop { operand, .. } => collect_refs(ast, scopes, *operand, out),
        NodeKind::Binop { lhs, rhs, .. } => {
            collect_refs(ast, scopes, *lhs, out);
            collect_refs(ast, scopes, *rhs, out);
        }
        NodeKind::Chain { exprs, .. } => {
            for &e in exprs {
                collect_refs(ast, scopes, e, out);
            }
        }
        NodeKind::Access { operand, .. } => collect_refs(ast, scopes, *operand, out),
        NodeKind::Index { operand, index } => {
            collect_refs(ast, scopes, *operand, out);
            collect_refs(ast, scopes, *index, out);
        }
        NodeKind::Call {
            callee,
            positional,
            named,
        } => {
            collect_refs(ast, scopes, *callee, out);
            for &a in positional {
                collect_refs(ast, scopes, a, out);
            }
            for (_, a) in named {
                collect_refs(ast, scopes, *a, out);
            }
        }
        NodeKind::Decl { ty_expr, init, .. } => {
            if let Some(t) = ty_expr {
                collect_refs(ast, scopes, *t, out);
            }
            if let Some(i) = init {
                collect_refs(ast, scopes, *i, out);
            }
        }
        NodeKind::ArrayLit { elems } => {
            for &e in elems {
                collect_refs(ast, scopes, e, out);
            }
        }
        NodeKind::ArrayType { len, elem } => {
            if let Some(l) = len {
                collect_refs(ast, scopes, *l, out);
            }
            collect_refs(ast, scopes, *elem, out);
        }
        NodeKind::StructLit { params, fields } => {
            for &p in params {
                collect_refs(ast, scopes, p, out);
            }
            for &f in fields {
                collect_refs(ast, scopes, f, out);
            }
        }
        // The signature participates in ordering; the body does not.
        NodeKind::FnLit { inputs, ret, .. } => {
            for &input in inputs {
                collect_refs(ast, scopes, input, out);
            }
            if let Some(r) = ret {
                collect_refs(ast, scopes, *r, out);
            }
        }
        NodeKind::Case { arms } => {
            for &(k, v) in arms {
                collect_refs(ast, scopes, k, out);
                collect_refs(ast, scopes, v, out);
            }
        }
        NodeKind::If {
            conds,
            bodies,
            else_body,
        } => {
            for &c in conds {
                collect_refs(ast, scopes, c, out);
            }
            for &b in bodies {
                collect_refs(ast, scopes, b, out);
            }
            if let Some(e) = else_body {
                collect_refs(ast, scopes, *e, out);
            }
        }
        NodeKind::While { cond, body } => {
            collect_refs(ast, scopes, *cond, out);
            collect_refs(ast, scopes, *body, out);
        }
        NodeKind::For { iters, body } => {
            for &i in iters {
                collect_refs(ast, scopes, i, out);
            }
            collect_refs(ast, scopes, *body, out);
        }
        NodeKind::Jump { value, .. } => {
            if let Some(v) = value {
                collect_refs(ast, scopes, *v, out);
            }
        }
        NodeKind::Stmts { list } => {
            for &s in list {
                collect_refs(ast, scopes, s, out);
            }
        }
        NodeKind::CommaList { elems } => {
            for &e in elems {
                collect_refs(ast, scopes, e, out);
            }
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

    fn order(text: &str) -> (Vec<String>, HashSet<String>, ErrorLog) {
        let src = SourceBuffer::new("test", text);
        let mut log = ErrorLog::new();
        let tokens = lex(&src, &mut log);
        let (ast, root) = parse_module(&tokens, &mut log);
        let scopes = assign_scopes(&ast, root, &mut log);
        let result = order_decls(&ast, &scopes, &mut log);
        let names = result
            .order
            .iter()
            .map(|&d| scopes.decl(d).name.clone())
            .collect();
        let cyclic = result
            .cyclic
            .iter()
            .map(|&d| scopes.decl(d).name.clone())
            .collect();
        (names, cyclic, log)
    }

    #[test]
    fn dependencies_come_first() {
        let (names, cyclic, log) = order("n ::= m + 1\nm ::= 2");
        assert!(!log.has_errors());
        assert!(cyclic.is_empty());
        let n_pos = names.iter().position(|n| n == "n").unwrap();
        let m_pos = names.iter().position(|n| n == "m").unwrap();
        assert!(m_pos < n_pos);
    }

    #[test]
    fn value_cycle_is_reported() {
        let (names, cyclic, log) = order("a ::= b\nb ::= a");
        assert!(log.has_errors());
        assert!(cyclic.contains("a") && cyclic.contains("b"));
        // Cyclic declarations still appear in the order (marked Error later).
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let (_, cyclic, log) = order("x ::= x + 1");
        assert!(log.has_errors());
        assert!(cyclic.contains("x"));
    }

    #[test]
    fn mutual_recursion_through_function_bodies_is_legal() {
        let (_, cyclic, log) = order(
            "even ::= (n: int32) -> bool { return odd(n - 1) }\n\
             odd ::= (n: int32) -> bool { return even(n - 1) }",
        );
        assert!(!log.has_errors());
        assert!(cyclic.is_empty());
    }

    #[test]
    fn type_expression_edges_count() {
        let (_, cyclic, log) = order("T ::= struct { next: U }\nU ::= struct { prev: T }");
        assert!(log.has_errors());
        assert_eq!(cyclic.len(), 2);
    }
}
