use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use ooze_runtime::{create_async, create_async_graph, ExecutorRef};

use crate::ast::{Ast, AstTag};
use crate::bindings::{AsyncValue, Binding, Bindings};
use crate::diagnostics::contextualize;
use crate::forest::NodeId;
use crate::lower::{create_expr_graph, create_fn_graph, LowerInput};
use crate::native::IntoNativeFn;
use crate::parse;
use crate::program::{Inst, Program};
use crate::sema::{sema, type_name_resolution, SemaData, SemaInput};
use crate::src_map::{append_src, src_text, SrcId, SrcRef};
use crate::types::{NativeTypeInfo, Type, TypeGraph};

/// The embedding surface and driver. Owns the environment source buffer,
/// the global AST (one `EnvValue` root per global), the type graph, the
/// native type registry and the program of invocable instances.
///
/// Elaboration works on clones and commits only on success, so a failed
/// call leaves the environment structurally unchanged.
pub struct Env {
    src: String,
    ast: Ast,
    tg: TypeGraph,
    native_types: NativeTypeInfo,
    program: Arc<Program>,
    insts: HashMap<NodeId, Inst>,
}

pub type StringResult<T> = Result<T, Vec<String>>;

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Self {
            src: String::new(),
            ast: Ast::default(),
            tg: TypeGraph::default(),
            native_types: NativeTypeInfo::default(),
            program: Program::new(),
            insts: HashMap::new(),
        }
    }

    pub fn native_types(&self) -> &NativeTypeInfo {
        &self.native_types
    }

    pub fn pretty_print(&self, ty: Type) -> String {
        self.tg.pretty_print(&self.native_types, ty)
    }

    /// Registers a copyable native type and its `clone(&T) -> T` overload.
    pub fn add_type<T: Clone + Send + Sync + 'static>(&mut self, name: &str) {
        self.native_types.register(name, TypeId::of::<T>(), true);
        self.add_function::<(T, crate::native::Borrowed<T>), _>("clone", |x: &T| x.clone());
    }

    /// Registers a move-only native type: values of it are consumed by
    /// use and never copied.
    pub fn add_move_type<T: Send + Sync + 'static>(&mut self, name: &str) {
        self.native_types.register(name, TypeId::of::<T>(), false);
    }

    /// Registers a native function under `name`; overloads accumulate.
    pub fn add_function<M, F: IntoNativeFn<M>>(&mut self, name: &str, f: F) {
        let signature = F::signature();

        let params: Vec<Type> = signature
            .params
            .iter()
            .map(|&(type_id, is_borrow)| {
                let leaf = self.tg.leaf(type_id);
                if is_borrow {
                    self.tg.borrow(leaf)
                } else {
                    leaf
                }
            })
            .collect();
        let input = self.tg.tuple(params);
        let output = match signature.output {
            Some(type_id) => self.tg.leaf(type_id),
            None => self.tg.unit(),
        };
        let fn_ty = self.tg.fn_type(input, output);

        let inst = self.program.reserve();
        self.program
            .define_native(inst, create_async(f.into_any_function()));

        let ident = self.add_or_replace_global(name, fn_ty);
        self.insts.insert(ident, inst);
    }

    /// Re-registering a global under the same name and type replaces it,
    /// which keeps repeated elaboration of the same scripts idempotent.
    fn add_or_replace_global(&mut self, name: &str, ty: Type) -> NodeId {
        let existing = self.ast.forest.roots().find_map(|root| {
            if self.ast.tag(root) != AstTag::EnvValue {
                return None;
            }
            let ident = self.ast.forest.first_child(root)?;
            let existing_name = src_text(&[self.src.as_str()], self.ast.src(ident));
            (existing_name == name && self.tg.structural_eq(self.ast.ty(ident), ty))
                .then_some(ident)
        });
        match existing {
            Some(ident) => ident,
            None => self.add_global(name, ty),
        }
    }

    fn add_global(&mut self, name: &str, ty: Type) -> NodeId {
        let slice = append_src(&mut self.src, name);
        let src_ref = SrcRef {
            src: SrcId(0),
            slice,
        };
        let ident = self.ast.append(AstTag::PatternIdent, src_ref, ty, &[]);
        self.ast.append(AstTag::EnvValue, src_ref, ty, &[ident]);
        ident
    }

    /// Global names with their types, in definition order.
    pub fn globals(&self) -> Vec<(String, Type)> {
        let roots: Vec<NodeId> = self.ast.forest.roots().collect();
        roots
            .into_iter()
            .filter(|&r| self.ast.tag(r) == AstTag::EnvValue)
            .map(|r| {
                let ident = self.ast.forest.first_child(r).expect("global without name");
                let name = src_text(&[self.src.as_str()], self.ast.src(ident));
                (name.to_string(), self.ast.ty(ident))
            })
            .collect()
    }

    /// Functions only: `(name, type)` for every registered overload.
    pub fn functions(&self) -> Vec<(String, Type)> {
        let mut out = Vec::new();
        for root in self.ast.forest.roots() {
            if self.ast.tag(root) != AstTag::EnvValue {
                continue;
            }
            let ident = self.ast.forest.first_child(root).expect("global without name");
            if self.insts.contains_key(&ident) {
                let name = src_text(&[self.src.as_str()], self.ast.src(ident));
                out.push((name.to_string(), self.ast.ty(ident)));
            }
        }
        out
    }

    /// Pretty-printed input and output of a function type.
    pub fn fn_signature(&self, ty: Type) -> Option<(String, String)> {
        use crate::types::TypeTag;
        if self.tg.tag(ty) != TypeTag::Fn {
            return None;
        }
        let children = self.tg.children(ty).to_vec();
        Some((self.pretty_print(children[0]), self.pretty_print(children[1])))
    }

    /// Whether a `to_string(&T) -> string` overload resolves for the type.
    pub fn to_string_resolves(&self, type_id: TypeId) -> bool {
        let mut tg = self.tg.clone();
        let leaf = tg.leaf(type_id);
        let borrowed = tg.borrow(leaf);
        let input = tg.tuple(vec![borrowed]);
        let output = tg.leaf(TypeId::of::<String>());
        let probe = tg.fn_type(input, output);

        self.functions()
            .iter()
            .any(|(name, ty)| name == "to_string" && tg.structural_eq(*ty, probe))
    }

    /// Parses a bare type, e.g. `fn(&i32) -> string`.
    pub fn parse_type(&mut self, text: &str) -> StringResult<Type> {
        let mut scratch = Ast::default();
        let mut tg = self.tg.clone();
        let srcs = [self.src.as_str(), text];

        let result = parse::parse_type(&mut scratch, &mut tg, SrcId(1), text).and_then(
            |(ty, type_srcs)| {
                type_name_resolution(&srcs, &self.native_types, &type_srcs, &mut tg)?;
                Ok(ty)
            },
        );
        match result {
            Ok(ty) => {
                let mut cache = HashMap::new();
                Ok(tg.copy_type_into(ty, &mut self.tg, &mut cache))
            }
            Err(errors) => Err(contextualize(&srcs, errors)),
        }
    }

    /// Parses and fully elaborates each script; on success every script
    /// function becomes a global backed by its lowered graph. A failure
    /// reports every error in the batch and leaves the environment
    /// unchanged.
    pub fn parse_scripts(&mut self, files: &[&str]) -> StringResult<()> {
        let env_src = self.src.clone();
        let mut ast = self.ast.clone();
        let mut tg = self.tg.clone();

        let mut srcs = vec![env_src.as_str()];
        srcs.extend(files.iter().copied());

        // Parse errors accumulate across the whole batch.
        let mut roots = Vec::new();
        let mut type_srcs = Vec::new();
        let mut errors = Vec::new();
        for (i, file) in files.iter().enumerate() {
            match parse::parse_module(&mut ast, &mut tg, SrcId(i as u32 + 1), file) {
                Ok((root, mut sites)) => {
                    roots.push(root);
                    type_srcs.append(&mut sites);
                }
                Err(mut file_errors) => errors.append(&mut file_errors),
            }
        }
        if !errors.is_empty() {
            return Err(contextualize(&srcs, errors));
        }

        type_name_resolution(&srcs, &self.native_types, &type_srcs, &mut tg)
            .map_err(|errors| contextualize(&srcs, errors))?;

        let data = sema(
            SemaInput {
                srcs: &srcs,
                native: &self.native_types,
                new_roots: &roots,
            },
            &mut ast,
            &mut tg,
        )
        .map_err(|errors| contextualize(&srcs, errors))?;

        // Reserve every instance before lowering any body, so mutually
        // recursive functions resolve; lower leaf-first so non-recursive
        // callees inline.
        let mut fns = self.insts.clone();
        let mut reserved = Vec::new();
        for &fn_root in &data.fn_order {
            let name = ast.forest.first_child(fn_root).expect("fn without name");
            let inst = self.program.reserve();
            fns.insert(name, inst);
            reserved.push((fn_root, inst));
        }

        for &(fn_root, inst) in &reserved {
            let [_, fn_node] = ast.forest.child_array(fn_root);
            let graph = create_fn_graph(
                &LowerInput {
                    ast: &ast,
                    tg: &tg,
                    copy_types: &self.native_types.copyable,
                    binding_of: &data.binding_of,
                    fns: &fns,
                    program: &self.program,
                },
                fn_node,
            );
            self.program.define_graph(inst, graph);
        }

        // Commit: script functions become environment globals.
        for &(fn_root, inst) in &reserved {
            let name_node = ast.forest.first_child(fn_root).expect("fn without name");
            let name = src_text(&srcs, ast.src(name_node)).to_string();
            let mut cache = HashMap::new();
            let ty = tg.copy_type_into(ast.ty(name_node), &mut self.tg, &mut cache);
            let ident = self.add_or_replace_global(&name, ty);
            self.insts.insert(ident, inst);
        }
        tracing::debug!(functions = reserved.len(), "scripts elaborated");
        Ok(())
    }

    /// Evaluates a REPL line: either an expression (returns its binding)
    /// or a `let`-assignment (updates `bindings`, returns a unit binding).
    pub fn run(
        &mut self,
        ex: &ExecutorRef,
        bindings: &mut Bindings,
        expr: &str,
    ) -> StringResult<Binding> {
        let (env_src, mut ast, mut tg, binding_names) = self.prepare(bindings);
        let srcs = [env_src.as_str(), expr];

        let (root, type_srcs) = parse::parse_repl(&mut ast, &mut tg, SrcId(1), expr)
            .map_err(|errors| contextualize(&srcs, errors))?;

        let data = self.elaborate(&srcs, &type_srcs, &[root], &mut ast, &mut tg)?;

        Ok(self.run_or_assign(ex, bindings, &srcs, &binding_names, &data, &ast, &tg, root))
    }

    /// As [`Env::run`], but expression results are rendered through a
    /// synthesized `to_string(&expr)` call and returned as text.
    pub fn run_to_string(
        &mut self,
        ex: &ExecutorRef,
        bindings: &mut Bindings,
        expr: &str,
    ) -> StringResult<String> {
        let (mut env_src, mut ast, mut tg, binding_names) = self.prepare(bindings);
        let to_string_ref = SrcRef {
            src: SrcId(0),
            slice: append_src(&mut env_src, "to_string"),
        };
        let srcs = [env_src.as_str(), expr];

        let (root, type_srcs) = parse::parse_repl(&mut ast, &mut tg, SrcId(1), expr)
            .map_err(|errors| contextualize(&srcs, errors))?;

        let data = self.elaborate(&srcs, &type_srcs, &[root], &mut ast, &mut tg)?;

        if ast.tag(root) == AstTag::Assignment {
            self.run_or_assign(ex, bindings, &srcs, &binding_names, &data, &ast, &tg, root);
            return Ok(String::new());
        }

        // Wrap the expression: to_string((&root,)).
        let borrow_ty = tg.borrow(ast.ty(root));
        let borrow_id = ast.append(AstTag::ExprBorrow, ast.src(root), borrow_ty, &[root]);
        let tuple_ty = tg.tuple(vec![borrow_ty]);
        let tuple_id = ast.append(AstTag::ExprTuple, ast.src(root), tuple_ty, &[borrow_id]);
        let callee_ty = tg.floating(to_string_ref);
        let callee_id = ast.append(AstTag::ExprIdent, to_string_ref, callee_ty, &[]);
        let string_ty = tg.leaf(TypeId::of::<String>());
        let call_id = ast.append(
            AstTag::ExprCall,
            ast.src(root),
            string_ty,
            &[callee_id, tuple_id],
        );

        let data = self.elaborate(&srcs, &[], &[call_id], &mut ast, &mut tg)?;

        let result =
            self.run_or_assign(ex, bindings, &srcs, &binding_names, &data, &ast, &tg, call_id);
        debug_assert_eq!(1, result.values.len());
        let value = result
            .values
            .into_iter()
            .next()
            .expect("to_string produces one value")
            .take()
            .wait();
        Ok(value
            .downcast::<String>()
            .ok()
            .expect("to_string produces a string"))
    }

    /// Type-checks an expression without running it.
    pub fn type_check_expr(&self, expr: &str) -> StringResult<()> {
        self.type_check(expr, parse::parse_expr)
    }

    /// Type-checks a function definition without adding it.
    pub fn type_check_fn(&self, function: &str) -> StringResult<()> {
        self.type_check(function, parse::parse_function)
    }

    /// Type-checks a binding pattern.
    pub fn type_check_binding(&self, binding: &str) -> StringResult<()> {
        self.type_check(binding, parse::parse_binding)
    }

    fn type_check(
        &self,
        text: &str,
        parse_fn: fn(&mut Ast, &mut TypeGraph, SrcId, &str) -> parse::ParseResult,
    ) -> StringResult<()> {
        let mut ast = self.ast.clone();
        let mut tg = self.tg.clone();
        let srcs = [self.src.as_str(), text];

        let (root, type_srcs) = parse_fn(&mut ast, &mut tg, SrcId(1), text)
            .map_err(|errors| contextualize(&srcs, errors))?;

        self.elaborate(&srcs, &type_srcs, &[root], &mut ast, &mut tg)
            .map(|_| ())
    }

    fn elaborate(
        &self,
        srcs: &[&str],
        type_srcs: &[(Type, SrcRef)],
        roots: &[NodeId],
        ast: &mut Ast,
        tg: &mut TypeGraph,
    ) -> StringResult<SemaData> {
        type_name_resolution(srcs, &self.native_types, type_srcs, tg)
            .map_err(|errors| contextualize(srcs, errors))?;
        sema(
            SemaInput {
                srcs,
                native: &self.native_types,
                new_roots: roots,
            },
            ast,
            tg,
        )
        .map_err(|errors| contextualize(srcs, errors))
    }

    /// Clones the environment state and appends the current bindings as
    /// globals, returning the working copies plus the mapping from the
    /// appended global patterns back to binding names.
    fn prepare(&self, bindings: &Bindings) -> (String, Ast, TypeGraph, HashMap<NodeId, String>) {
        let mut env_src = self.src.clone();
        let mut ast = self.ast.clone();
        let tg = self.tg.clone();

        let mut binding_names = HashMap::new();
        for (name, binding) in bindings {
            let slice = append_src(&mut env_src, name);
            let src_ref = SrcRef {
                src: SrcId(0),
                slice,
            };
            let ident = ast.append(AstTag::PatternIdent, src_ref, binding.ty, &[]);
            ast.append(AstTag::EnvValue, src_ref, binding.ty, &[ident]);
            binding_names.insert(ident, name.clone());
        }
        (env_src, ast, tg, binding_names)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_or_assign(
        &mut self,
        ex: &ExecutorRef,
        bindings: &mut Bindings,
        srcs: &[&str],
        binding_names: &HashMap<NodeId, String>,
        data: &SemaData,
        ast: &Ast,
        tg: &TypeGraph,
        root: NodeId,
    ) -> Binding {
        let is_assignment = ast.tag(root) == AstTag::Assignment;
        let expr_root = if is_assignment {
            let [_, expr] = ast.forest.child_array(root);
            expr
        } else {
            root
        };

        let values = self.run_expr(ex, bindings, binding_names, data, ast, tg, expr_root);
        let mut cache = HashMap::new();

        if is_assignment {
            let [pattern, _] = ast.forest.child_array(root);
            let mut values = values.into_iter();
            for leaf in ast.forest.leaves(pattern) {
                let size = tg.size_of(ast.ty(leaf));
                let leaf_values: Vec<AsyncValue> = values.by_ref().take(size).collect();
                if ast.tag(leaf) == AstTag::PatternIdent {
                    let name = src_text(srcs, ast.src(leaf)).to_string();
                    let ty = tg.copy_type_into(ast.ty(leaf), &mut self.tg, &mut cache);
                    bindings.insert(
                        name,
                        Binding {
                            ty,
                            values: leaf_values,
                        },
                    );
                }
            }
            let unit = self.tg.unit();
            Binding::unit(unit)
        } else {
            let ty = tg.copy_type_into(ast.ty(expr_root), &mut self.tg, &mut cache);
            Binding { ty, values }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_expr(
        &self,
        ex: &ExecutorRef,
        bindings: &mut Bindings,
        binding_names: &HashMap<NodeId, String>,
        data: &SemaData,
        ast: &Ast,
        tg: &TypeGraph,
        expr_root: NodeId,
    ) -> Vec<AsyncValue> {
        let fgd = create_expr_graph(
            &LowerInput {
                ast,
                tg,
                copy_types: &self.native_types.copyable,
                binding_of: &data.binding_of,
                fns: &self.insts,
                program: &self.program,
            },
            expr_root,
        );

        let mut futures = Vec::new();
        for pattern in &fgd.captured_values {
            let name = &binding_names[pattern];
            if tg.is_copyable(&self.native_types.copyable, ast.ty(*pattern)) {
                let binding = bindings.get_mut(name).expect("resolved binding");
                for value in &mut binding.values {
                    futures.push(value.borrow().then(|any| {
                        any.try_clone().expect("copy-registered value must clone")
                    }));
                }
            } else {
                let binding = bindings.shift_remove(name).expect("resolved binding");
                futures.extend(binding.values.into_iter().map(AsyncValue::take));
            }
        }

        let mut borrows = Vec::new();
        for pattern in &fgd.captured_borrows {
            let name = &binding_names[pattern];
            let binding = bindings.get_mut(name).expect("resolved binding");
            for value in &mut binding.values {
                borrows.push(value.borrow());
            }
        }

        tracing::debug!(
            values = futures.len(),
            borrows = borrows.len(),
            "executing expression graph"
        );
        let f = create_async_graph(fgd.graph);
        f(ex.clone(), futures, borrows)
            .into_iter()
            .map(AsyncValue::from)
            .collect()
    }
}
