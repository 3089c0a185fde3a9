use std::collections::{HashMap, HashSet};

use crate::ast::{is_expr, Ast, AstTag};
use crate::diagnostics::ContextualError;
use crate::forest::NodeId;
use crate::src_map::{src_text, SrcRef};
use crate::types::{NativeTypeInfo, Type, TypeGraph, TypeTag};

/// Bipartite fan-out between identifier uses and the patterns that may
/// define them. Locals have exactly one candidate; globals may have many
/// until overload resolution picks one.
#[derive(Default, Debug)]
pub struct IdentGraph {
    pub candidates: HashMap<NodeId, Vec<NodeId>>,
    pub fanout: HashMap<NodeId, Vec<NodeId>>,
}

/// Result of elaboration over a batch of new roots.
pub struct SemaData {
    /// Every `ExprIdent` mapped to its defining `PatternIdent`.
    pub binding_of: HashMap<NodeId, NodeId>,
    /// The subset of `binding_of` that resolved through overload choice.
    pub overloads: HashMap<NodeId, NodeId>,
    /// Script functions of the batch in leaf-first call order.
    pub fn_order: Vec<NodeId>,
}

/// Binds every named leaf type parsed in this batch, or reports
/// `undefined type` at the site the name was written.
pub fn type_name_resolution(
    srcs: &[&str],
    native: &NativeTypeInfo,
    type_srcs: &[(Type, SrcRef)],
    tg: &mut TypeGraph,
) -> Result<(), Vec<ContextualError>> {
    let mut errors = Vec::new();
    for &(t, src_ref) in type_srcs {
        let name = src_text(srcs, src_ref);
        match native.names.get(name) {
            Some(&id) => tg.set_native_id(t, id),
            None => errors.push(ContextualError::new(src_ref, "undefined type")),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collects the global patterns visible to the whole program: one per
/// `EnvValue` and `RootFn` root (or per function of a `Module`), in
/// definition order.
pub fn global_patterns(ast: &Ast) -> Vec<NodeId> {
    let mut globals = Vec::new();
    for root in ast.forest.roots() {
        match ast.tag(root) {
            AstTag::EnvValue | AstTag::RootFn => {
                globals.push(ast.forest.first_child(root).expect("global without name"));
            }
            AstTag::Module => {
                for child in ast.forest.children(root) {
                    if ast.tag(child) == AstTag::RootFn {
                        globals.push(ast.forest.first_child(child).expect("fn without name"));
                    }
                }
            }
            _ => {}
        }
    }
    globals
}

struct IdentCtx<'a> {
    srcs: &'a [&'a str],
    ast: &'a Ast,
    globals: &'a [NodeId],
    stack: Vec<(&'a str, NodeId)>,
    graph: IdentGraph,
    errors: Vec<ContextualError>,
}

impl<'a> IdentCtx<'a> {
    fn connect(&mut self, use_id: NodeId, pattern: NodeId) {
        self.graph.candidates.entry(use_id).or_default().push(pattern);
        self.graph.fanout.entry(pattern).or_default().push(use_id);
    }

    fn walk(&mut self, id: NodeId) {
        match self.ast.tag(id) {
            AstTag::PatternIdent => {
                let text = src_text(self.srcs, self.ast.src(id));
                self.stack.push((text, id));
            }
            AstTag::Fn | AstTag::ExprWith => {
                let depth = self.stack.len();
                for child in self.ast.forest.children(id) {
                    self.walk(child);
                }
                self.stack.truncate(depth);
            }
            AstTag::Assignment => {
                // Non-recursive let: the expression sees the outer scope.
                let [pattern, expr] = self.ast.forest.child_array(id);
                self.walk(expr);
                self.walk(pattern);
            }
            AstTag::ExprIdent => {
                let text = src_text(self.srcs, self.ast.src(id));
                if let Some(&(_, pattern)) =
                    self.stack.iter().rev().find(|&&(name, _)| name == text)
                {
                    self.connect(id, pattern);
                } else {
                    let mut found = false;
                    for &global in self.globals {
                        if src_text(self.srcs, self.ast.src(global)) == text {
                            self.connect(id, global);
                            found = true;
                        }
                    }
                    if !found {
                        self.errors.push(ContextualError::new(
                            self.ast.src(id),
                            format!("use of undeclared binding '{}'", text),
                        ));
                    }
                }
            }
            AstTag::RootFn => {
                // The name is a global, seeded up front.
                let [_, fn_node] = self.ast.forest.child_array(id);
                self.walk(fn_node);
            }
            AstTag::EnvValue => {}
            _ => {
                for child in self.ast.forest.children(id) {
                    self.walk(child);
                }
            }
        }
    }
}

/// Builds the identifier graph for the given roots. Scoping: a stack of
/// in-scope patterns walked top-down, outer scopes shadowed by inner;
/// unresolved names fall back to the visible globals.
pub fn calculate_ident_graph(
    srcs: &[&str],
    ast: &Ast,
    globals: &[NodeId],
    roots: &[NodeId],
) -> Result<IdentGraph, Vec<ContextualError>> {
    let mut ctx = IdentCtx {
        srcs,
        ast,
        globals,
        stack: Vec::new(),
        graph: IdentGraph::default(),
        errors: Vec::new(),
    };
    for &root in roots {
        ctx.walk(root);
        ctx.stack.clear();
    }
    if ctx.errors.is_empty() {
        Ok(ctx.graph)
    } else {
        Err(ctx.errors)
    }
}

struct Propagation<'a> {
    native: &'a NativeTypeInfo,
    errors: Vec<ContextualError>,
    // Structural type nodes built once per call site.
    call_shapes: HashMap<NodeId, Type>,
    bool_leaf: Type,
}

impl<'a> Propagation<'a> {
    fn unify(&mut self, tg: &mut TypeGraph, given: Type, expected: Type, at: SrcRef) {
        if let Err((g, e)) = tg.unify(given, expected) {
            let error = ContextualError::new(
                at,
                format!(
                    "expected {}, given {}",
                    tg.pretty_print(self.native, e),
                    tg.pretty_print(self.native, g)
                ),
            );
            if !self.errors.contains(&error) {
                self.errors.push(error);
            }
        }
    }

    /// One-time structural constraints, children before parents.
    fn seed_structure(&mut self, ast: &Ast, tg: &mut TypeGraph, root: NodeId) {
        let ids: Vec<NodeId> = ast.forest.post_order(root).collect();
        for id in ids {
            match ast.tag(id) {
                AstTag::PatternTuple | AstTag::ExprTuple => {
                    let children: Vec<Type> =
                        ast.forest.children(id).map(|c| ast.ty(c)).collect();
                    let tuple = tg.tuple(children);
                    self.unify(tg, tuple, ast.ty(id), ast.src(id));
                }
                AstTag::ExprBorrow => {
                    let inner = ast.forest.first_child(id).expect("borrow without child");
                    let borrow = tg.borrow(ast.ty(inner));
                    self.unify(tg, borrow, ast.ty(id), ast.src(id));
                }
                AstTag::ExprWith => {
                    let [_, body] = ast.forest.child_array(id);
                    self.unify(tg, ast.ty(body), ast.ty(id), ast.src(id));
                }
                AstTag::ExprSelect => {
                    let [cond, if_expr, else_expr] = ast.forest.child_array(id);
                    self.unify(tg, ast.ty(cond), self.bool_leaf, ast.src(cond));
                    self.unify(tg, ast.ty(if_expr), ast.ty(else_expr), ast.src(else_expr));
                    self.unify(tg, ast.ty(if_expr), ast.ty(id), ast.src(id));
                }
                AstTag::Assignment => {
                    let [pattern, expr] = ast.forest.child_array(id);
                    self.unify(tg, ast.ty(expr), ast.ty(pattern), ast.src(pattern));
                }
                AstTag::Fn => {
                    let [_, body] = ast.forest.child_array(id);
                    let fn_ty = ast.ty(id);
                    debug_assert_eq!(TypeTag::Fn, tg.tag(fn_ty));
                    let output = tg.children(fn_ty)[1];
                    self.unify(tg, ast.ty(body), output, ast.src(body));
                }
                _ => {}
            }
        }
    }

    /// Call-site constraints; granular once the callee's shape is known so
    /// mismatches anchor at the offending argument.
    fn seed_calls(&mut self, ast: &Ast, tg: &mut TypeGraph, root: NodeId) {
        let ids: Vec<NodeId> = ast.forest.post_order(root).collect();
        for id in ids {
            if ast.tag(id) != AstTag::ExprCall {
                continue;
            }
            let [callee, arg] = ast.forest.child_array(id);

            if tg.tag(ast.ty(callee)) == TypeTag::Fn {
                let fn_children = tg.children(ast.ty(callee)).to_vec();
                let (input, output) = (fn_children[0], fn_children[1]);

                let arg_elements: Vec<NodeId> = ast.forest.children(arg).collect();
                let params = tg.children(input).to_vec();
                if tg.tag(input) == TypeTag::Tuple
                    && ast.tag(arg) == AstTag::ExprTuple
                    && params.len() == arg_elements.len()
                {
                    for (&param, &element) in params.iter().zip(&arg_elements) {
                        self.unify(tg, param, ast.ty(element), ast.src(element));
                    }
                } else {
                    self.unify(tg, input, ast.ty(arg), ast.src(arg));
                }
                self.unify(tg, output, ast.ty(id), ast.src(id));
            } else {
                let shape = *self.call_shapes.entry(id).or_insert_with(|| {
                    let arg_ty = ast.ty(arg);
                    let result_ty = ast.ty(id);
                    tg.fn_type(arg_ty, result_ty)
                });
                self.unify(tg, ast.ty(callee), shape, ast.src(callee));
            }
        }
    }
}

pub struct SemaInput<'a> {
    pub srcs: &'a [&'a str],
    pub native: &'a NativeTypeInfo,
    pub new_roots: &'a [NodeId],
}

/// Full elaboration over the new roots: identifier graph, bidirectional
/// constraint propagation to fixpoint, overload resolution, and the
/// fully-resolved checks. Errors are accumulated per batch.
pub fn sema(
    input: SemaInput<'_>,
    ast: &mut Ast,
    tg: &mut TypeGraph,
) -> Result<SemaData, Vec<ContextualError>> {
    let SemaInput {
        srcs,
        native,
        new_roots,
    } = input;

    let globals = global_patterns(ast);
    let ident_graph = calculate_ident_graph(srcs, ast, &globals, new_roots)?;

    let bool_leaf = tg.leaf(std::any::TypeId::of::<bool>());
    let mut prop = Propagation {
        native,
        errors: Vec::new(),
        call_shapes: HashMap::new(),
        bool_leaf,
    };

    for &root in new_roots {
        prop.seed_structure(ast, tg, root);
    }

    // Identifier edges: locals and unambiguous globals bind directly.
    let mut binding_of: HashMap<NodeId, NodeId> = HashMap::new();
    let mut overloads: HashMap<NodeId, NodeId> = HashMap::new();
    let mut unresolved: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
    let mut uses: Vec<(NodeId, &Vec<NodeId>)> = ident_graph
        .candidates
        .iter()
        .map(|(&id, c)| (id, c))
        .collect();
    uses.sort_by_key(|(id, _)| *id);
    for (use_id, candidates) in uses {
        match candidates.as_slice() {
            [single] => {
                binding_of.insert(use_id, *single);
                prop.unify(tg, ast.ty(*single), ast.ty(use_id), ast.src(use_id));
            }
            _ => unresolved.push((use_id, candidates.clone())),
        }
    }

    // Propagate and resolve overloads to fixpoint.
    loop {
        let before = tg.revision();
        for &root in new_roots {
            prop.seed_calls(ast, tg, root);
        }

        let mut progressed = false;
        unresolved.retain(|(use_id, candidates)| {
            let viable: Vec<NodeId> = candidates
                .iter()
                .copied()
                .filter(|&c| tg.unifiable(ast.ty(c), ast.ty(*use_id)))
                .collect();
            if viable.len() == 1 {
                let chosen = viable[0];
                binding_of.insert(*use_id, chosen);
                overloads.insert(*use_id, chosen);
                prop.unify(tg, ast.ty(chosen), ast.ty(*use_id), ast.src(*use_id));
                progressed = true;
                false
            } else {
                true
            }
        });

        if !progressed && tg.revision() == before {
            break;
        }
    }

    let mut errors = std::mem::take(&mut prop.errors);

    // Remaining multi-candidate uses are unmatched or ambiguous.
    for (use_id, candidates) in &unresolved {
        let viable: Vec<NodeId> = candidates
            .iter()
            .copied()
            .filter(|&c| tg.unifiable(ast.ty(c), ast.ty(*use_id)))
            .collect();
        let (message, listed) = if viable.is_empty() {
            ("no matching overload found", candidates.clone())
        } else {
            ("ambiguous overload", viable)
        };
        let mut notes = vec![format!(
            "deduced {} [{} candidate(s)]",
            tg.pretty_print(native, ast.ty(*use_id)),
            listed.len()
        )];
        for candidate in &listed {
            notes.push(format!("  {}", tg.pretty_print(native, ast.ty(*candidate))));
        }
        errors.push(ContextualError::with_notes(
            ast.src(*use_id),
            message,
            notes,
        ));
    }

    // Resolution checks cascade from earlier failures, so they only run
    // on an otherwise clean batch.
    if errors.is_empty() {
        check_fully_resolved(
            srcs,
            native,
            ast,
            tg,
            new_roots,
            &ident_graph,
            &binding_of,
            &mut errors,
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let fn_order = leaf_first_fn_order(ast, new_roots, &binding_of);

    Ok(SemaData {
        binding_of,
        overloads,
        fn_order,
    })
}

#[allow(clippy::too_many_arguments)]
fn check_fully_resolved(
    srcs: &[&str],
    native: &NativeTypeInfo,
    ast: &Ast,
    tg: &TypeGraph,
    new_roots: &[NodeId],
    ident_graph: &IdentGraph,
    binding_of: &HashMap<NodeId, NodeId>,
    errors: &mut Vec<ContextualError>,
) {
    // No floating types may remain; report the first offender per root.
    for &root in new_roots {
        for id in ast.forest.pre_order(root) {
            let tag = ast.tag(id);
            if !is_expr(tag) && !crate::ast::is_pattern(tag) {
                continue;
            }
            if tg.contains_floating(ast.ty(id)) {
                errors.push(ContextualError::with_notes(
                    ast.src(id),
                    "unable to fully deduce type",
                    vec![format!(
                        "deduced {}",
                        tg.pretty_print(native, ast.ty(id))
                    )],
                ));
                break;
            }
        }
    }

    // Borrowed values cannot escape into bindings or results.
    for &root in new_roots {
        match ast.tag(root) {
            tag if is_expr(tag) => {
                if tg.contains_borrow(ast.ty(root)) {
                    errors.push(ContextualError::new(
                        ast.src(root),
                        "cannot return a borrowed value",
                    ));
                }
            }
            AstTag::Assignment => {
                let [_, expr] = ast.forest.child_array(root);
                if tg.contains_borrow(ast.ty(expr)) {
                    errors.push(ContextualError::new(
                        ast.src(expr),
                        "cannot return a borrowed value",
                    ));
                }
            }
            _ => {}
        }
        for id in ast.forest.pre_order(root) {
            if ast.tag(id) == AstTag::Fn {
                let [_, body] = ast.forest.child_array(id);
                if tg.contains_borrow(ast.ty(body)) {
                    errors.push(ContextualError::new(
                        ast.src(body),
                        "cannot return a borrowed value",
                    ));
                }
            }
        }
    }

    // A non-copyable binding may be consumed at most once.
    for (&pattern, uses) in &ident_graph.fanout {
        let ty = ast.ty(pattern);
        if tg.contains_floating(ty) {
            continue;
        }
        if tg.tag(ty) == TypeTag::Borrow || tg.is_copyable(&native.copyable, ty) {
            continue;
        }
        let consuming = uses
            .iter()
            .filter(|&&u| {
                binding_of.get(&u) == Some(&pattern)
                    && !ast
                        .forest
                        .parent(u)
                        .is_some_and(|p| ast.tag(p) == AstTag::ExprBorrow)
            })
            .count();
        if consuming > 1 {
            errors.push(ContextualError::new(
                ast.src(pattern),
                format!(
                    "binding '{}' used {} times",
                    src_text(srcs, ast.src(pattern)),
                    consuming
                ),
            ));
        }
    }
}

/// Script functions of the batch ordered so that callees precede callers;
/// members of call cycles are emitted in definition order.
fn leaf_first_fn_order(
    ast: &Ast,
    new_roots: &[NodeId],
    binding_of: &HashMap<NodeId, NodeId>,
) -> Vec<NodeId> {
    let mut fns = Vec::new();
    for &root in new_roots {
        match ast.tag(root) {
            AstTag::RootFn => fns.push(root),
            AstTag::Module => {
                fns.extend(
                    ast.forest
                        .children(root)
                        .filter(|&c| ast.tag(c) == AstTag::RootFn),
                );
            }
            _ => {}
        }
    }

    let name_to_fn: HashMap<NodeId, NodeId> = fns
        .iter()
        .map(|&f| (ast.forest.first_child(f).expect("fn without name"), f))
        .collect();

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    fn visit(
        ast: &Ast,
        fn_root: NodeId,
        name_to_fn: &HashMap<NodeId, NodeId>,
        binding_of: &HashMap<NodeId, NodeId>,
        visited: &mut HashSet<NodeId>,
        visiting: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        if visited.contains(&fn_root) || !visiting.insert(fn_root) {
            return;
        }
        let [_, fn_node] = ast.forest.child_array(fn_root);
        for id in ast.forest.pre_order(fn_node) {
            if ast.tag(id) != AstTag::ExprIdent {
                continue;
            }
            if let Some(pattern) = binding_of.get(&id) {
                if let Some(&callee) = name_to_fn.get(pattern) {
                    visit(ast, callee, name_to_fn, binding_of, visited, visiting, order);
                }
            }
        }
        visiting.remove(&fn_root);
        visited.insert(fn_root);
        order.push(fn_root);
    }

    for &f in &fns {
        visit(ast, f, &name_to_fn, binding_of, &mut visited, &mut visiting, &mut order);
    }
    order
}
