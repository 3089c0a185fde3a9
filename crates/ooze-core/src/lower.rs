use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ooze_runtime::{
    create_async_select, create_async_value, create_async_functional, make_graph, Any, AsyncFn,
    ConstructingGraph, FunctionGraph, Oterm, PassBy,
};

use crate::ast::{Ast, AstTag, Literal};
use crate::forest::NodeId;
use crate::program::{Inst, Program};
use crate::types::TypeGraph;

/// A lowered function graph plus the outer-scope bindings it captures:
/// `captured_values` are consumed (or copied) at invocation,
/// `captured_borrows` are lent for the duration of the run.
pub struct FunctionGraphData {
    pub graph: FunctionGraph,
    pub captured_values: Vec<NodeId>,
    pub captured_borrows: Vec<NodeId>,
}

pub struct LowerInput<'a> {
    pub ast: &'a Ast,
    pub tg: &'a TypeGraph,
    pub copy_types: &'a HashSet<TypeId>,
    pub binding_of: &'a HashMap<NodeId, NodeId>,
    /// Global function patterns resolvable through the program registry.
    pub fns: &'a HashMap<NodeId, Inst>,
    pub program: &'a Arc<Program>,
}

struct LowerCtx<'a> {
    input: &'a LowerInput<'a>,
    cg: ConstructingGraph,
    bindings: HashMap<NodeId, Vec<Oterm>>,
}

impl<'a> LowerCtx<'a> {
    fn pass_bys(&self, id: NodeId) -> Vec<PassBy> {
        let mut out = Vec::new();
        self.input
            .tg
            .pass_bys_of(self.input.copy_types, self.input.ast.ty(id), &mut out);
        out
    }

    fn output_count(&self, id: NodeId) -> usize {
        self.input.tg.size_of(self.input.ast.ty(id))
    }

    /// Distributes `terms` over the pattern's identifiers following the
    /// size layout of their types.
    fn bind_pattern(&mut self, pattern: NodeId, terms: &[Oterm]) {
        let ast = self.input.ast;
        let tg = self.input.tg;
        let mut offset = 0;
        for leaf in ast.forest.leaves(pattern) {
            let size = tg.size_of(ast.ty(leaf));
            if ast.tag(leaf) == AstTag::PatternIdent {
                self.bindings.insert(leaf, terms[offset..offset + size].to_vec());
            }
            offset += size;
        }
        debug_assert_eq!(offset, terms.len());
    }

    fn fn_value(&self, inst: Inst) -> AsyncFn {
        match self.input.program.native_fn(inst) {
            Some(f) => f,
            None => self.input.program.async_fn(inst),
        }
    }

    fn add_expr(&mut self, id: NodeId) -> Vec<Oterm> {
        let ast = self.input.ast;
        match ast.tag(id) {
            AstTag::ExprLiteral => {
                let value = literal_value(ast.literal(id));
                self.cg.add(create_async_value(value), &[], &[], 1)
            }
            AstTag::ExprIdent => {
                let pattern = self.input.binding_of[&id];
                if let Some(terms) = self.bindings.get(&pattern) {
                    return terms.clone();
                }
                // A global function used as a value.
                let inst = self.input.fns[&pattern];
                let f = self.fn_value(inst);
                self.cg
                    .add(create_async_value(Any::cloneable(f)), &[], &[], 1)
            }
            AstTag::ExprBorrow => {
                // Borrowing is a type-level distinction; the value terms
                // pass straight through.
                let inner = ast.forest.first_child(id).expect("borrow without child");
                self.add_expr(inner)
            }
            AstTag::ExprTuple => {
                let mut terms = Vec::new();
                let children: Vec<NodeId> = ast.forest.children(id).collect();
                for child in children {
                    terms.extend(self.add_expr(child));
                }
                terms
            }
            AstTag::ExprWith => {
                let [assignment, body] = ast.forest.child_array(id);
                let [pattern, expr] = ast.forest.child_array(assignment);
                let terms = self.add_expr(expr);
                self.bind_pattern(pattern, &terms);
                self.add_expr(body)
            }
            AstTag::ExprSelect => {
                let [cond, if_expr, else_expr] = ast.forest.child_array(id);
                let mut terms = self.add_expr(cond);
                let if_terms = self.add_expr(if_expr);
                let else_terms = self.add_expr(else_expr);
                debug_assert_eq!(if_terms.len(), else_terms.len());
                terms.extend(if_terms);
                terms.extend(else_terms);

                let mut pass_bys = self.pass_bys(cond);
                pass_bys.extend(self.pass_bys(if_expr));
                pass_bys.extend(self.pass_bys(else_expr));

                self.cg.add(
                    create_async_select(),
                    &terms,
                    &pass_bys,
                    self.output_count(id),
                )
            }
            AstTag::ExprCall => {
                let [callee, arg] = ast.forest.child_array(id);

                if ast.tag(callee) == AstTag::ExprIdent {
                    let pattern = self.input.binding_of[&callee];
                    if !self.bindings.contains_key(&pattern) {
                        if let Some(&inst) = self.input.fns.get(&pattern) {
                            return self.add_direct_call(inst, arg, id);
                        }
                    }
                }

                let mut terms = self.add_expr(callee);
                debug_assert_eq!(1, terms.len());
                terms.extend(self.add_expr(arg));

                let mut pass_bys = self.pass_bys(callee);
                pass_bys.extend(self.pass_bys(arg));

                let output_count = self.output_count(id);
                self.cg.add(
                    create_async_functional(output_count),
                    &terms,
                    &pass_bys,
                    output_count,
                )
            }
            tag => unreachable!("cannot lower {:?}", tag),
        }
    }

    /// Direct call of a known global: finalized graphs inline as
    /// sub-graphs, natives and not-yet-published (recursive) instances go
    /// through an invocation node.
    fn add_direct_call(&mut self, inst: Inst, arg: NodeId, call: NodeId) -> Vec<Oterm> {
        let arg_terms = self.add_expr(arg);

        if let Some(graph) = self.input.program.finalized_graph(inst) {
            return self.cg.add_graph(&graph, &arg_terms);
        }

        let pass_bys = self.pass_bys(arg);
        let f = self.fn_value(inst);
        self.cg
            .add(f, &arg_terms, &pass_bys, self.output_count(call))
    }
}

/// Borrow lifting: a captured binding used N times where all N uses sit
/// under `ExprBorrow` becomes a borrow-typed implicit parameter of the
/// expression, so the binding is lent for the run instead of consumed.
/// Any other usage mix makes it a value parameter (copied when
/// copy-registered, moved otherwise).
fn lift_borrow_captures(
    ast: &Ast,
    captured: Vec<NodeId>,
    uses_of: &HashMap<NodeId, Vec<NodeId>>,
) -> (Vec<NodeId>, Vec<NodeId>) {
    captured.into_iter().partition(|pattern| {
        uses_of[pattern].iter().all(|&u| {
            ast.forest
                .parent(u)
                .is_some_and(|p| ast.tag(p) == AstTag::ExprBorrow)
        })
    })
}

fn literal_value(literal: &Literal) -> Any {
    match literal {
        Literal::I8(v) => Any::cloneable(*v),
        Literal::I16(v) => Any::cloneable(*v),
        Literal::I32(v) => Any::cloneable(*v),
        Literal::I64(v) => Any::cloneable(*v),
        Literal::U8(v) => Any::cloneable(*v),
        Literal::U16(v) => Any::cloneable(*v),
        Literal::U32(v) => Any::cloneable(*v),
        Literal::U64(v) => Any::cloneable(*v),
        Literal::F32(v) => Any::cloneable(*v),
        Literal::F64(v) => Any::cloneable(*v),
        Literal::Bool(v) => Any::cloneable(*v),
        Literal::String(v) => Any::cloneable(v.clone()),
    }
}

/// Lowers a type-checked function body (`Fn` node) into a graph. Inputs
/// are the function's parameters; script functions capture nothing.
pub fn create_fn_graph(input: &LowerInput<'_>, fn_node: NodeId) -> FunctionGraph {
    let ast = input.ast;
    debug_assert_eq!(AstTag::Fn, ast.tag(fn_node));
    let [pattern, body] = ast.forest.child_array(fn_node);

    let mut input_borrows = Vec::new();
    input.tg.borrows_of(ast.ty(pattern), &mut input_borrows);

    let (cg, terms) = make_graph(input_borrows);
    let mut ctx = LowerCtx {
        input,
        cg,
        bindings: HashMap::new(),
    };
    ctx.bind_pattern(pattern, &terms);
    let outputs = ctx.add_expr(body);
    let pass_bys = ctx.pass_bys(body);
    ctx.cg.finalize(&outputs, &pass_bys)
}

/// Lowers a top-level expression into a graph whose inputs are the
/// outer-scope bindings it references: value captures first, then borrow
/// captures, in first-use order.
pub fn create_expr_graph(input: &LowerInput<'_>, root: NodeId) -> FunctionGraphData {
    let ast = input.ast;

    // Patterns defined inside the subtree resolve in-graph.
    let inner_patterns: HashSet<NodeId> = ast
        .forest
        .pre_order(root)
        .filter(|&id| ast.tag(id) == AstTag::PatternIdent)
        .collect();

    // Captured bindings, in first-use order.
    let mut captured: Vec<NodeId> = Vec::new();
    let mut uses_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for id in ast.forest.pre_order(root) {
        if ast.tag(id) != AstTag::ExprIdent {
            continue;
        }
        let pattern = input.binding_of[&id];
        if inner_patterns.contains(&pattern) || input.fns.contains_key(&pattern) {
            continue;
        }
        if !captured.contains(&pattern) {
            captured.push(pattern);
        }
        uses_of.entry(pattern).or_default().push(id);
    }

    let (captured_borrows, captured_values) = lift_borrow_captures(ast, captured, &uses_of);

    let mut input_borrows = Vec::new();
    let mut sizes = Vec::new();
    for &pattern in &captured_values {
        let size = input.tg.size_of(ast.ty(pattern));
        input_borrows.extend(std::iter::repeat(false).take(size));
        sizes.push(size);
    }
    for &pattern in &captured_borrows {
        let size = input.tg.size_of(ast.ty(pattern));
        input_borrows.extend(std::iter::repeat(true).take(size));
        sizes.push(size);
    }

    let (cg, terms) = make_graph(input_borrows);
    let mut ctx = LowerCtx {
        input,
        cg,
        bindings: HashMap::new(),
    };

    let mut offset = 0;
    for (&pattern, &size) in captured_values
        .iter()
        .chain(&captured_borrows)
        .zip(&sizes)
    {
        ctx.bindings
            .insert(pattern, terms[offset..offset + size].to_vec());
        offset += size;
    }

    let outputs = ctx.add_expr(root);
    let pass_bys = ctx.pass_bys(root);
    let graph = ctx.cg.finalize(&outputs, &pass_bys);

    FunctionGraphData {
        graph,
        captured_values,
        captured_borrows,
    }
}
