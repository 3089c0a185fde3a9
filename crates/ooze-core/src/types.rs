use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use indexmap::IndexMap;
use ooze_runtime::any::type_id_hash;
use ooze_runtime::PassBy;

use crate::src_map::SrcRef;

/// Handle to a node in a [`TypeGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Type(pub u32);

impl Type {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeTag {
    Leaf,
    Tuple,
    Borrow,
    Fn,
    Floating,
}

/// Names and capabilities of the host-registered native types.
#[derive(Clone, Default)]
pub struct NativeTypeInfo {
    pub names: IndexMap<String, TypeId>,
    pub names_by_id: HashMap<TypeId, String>,
    pub copyable: HashSet<TypeId>,
}

impl NativeTypeInfo {
    pub fn register(&mut self, name: &str, id: TypeId, copyable: bool) {
        self.names.insert(name.to_string(), id);
        self.names_by_id.insert(id, name.to_string());
        if copyable {
            self.copyable.insert(id);
        }
    }
}

/// A DAG of type nodes. `Floating` nodes are the inference unknowns; they
/// resolve through links set by unification and are illegal once sema has
/// finished. Structural sharing is permitted but equality is structural.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TypeGraph {
    tags: Vec<TypeTag>,
    native: Vec<Option<TypeId>>,
    srcs: Vec<SrcRef>,
    children: Vec<Vec<Type>>,
    links: Vec<Option<Type>>,
    revision: u64,
}

impl TypeGraph {
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn add_node(
        &mut self,
        tag: TypeTag,
        children: Vec<Type>,
        native: Option<TypeId>,
        src: SrcRef,
    ) -> Type {
        let id = Type(self.tags.len() as u32);
        self.tags.push(tag);
        self.native.push(native);
        self.srcs.push(src);
        self.children.push(children);
        self.links.push(None);
        id
    }

    pub fn floating(&mut self, src: SrcRef) -> Type {
        self.add_node(TypeTag::Floating, Vec::new(), None, src)
    }

    pub fn leaf(&mut self, id: TypeId) -> Type {
        self.add_node(TypeTag::Leaf, Vec::new(), Some(id), SrcRef::NONE)
    }

    /// A leaf whose native id is bound later by type-name resolution.
    pub fn named_leaf(&mut self, src: SrcRef) -> Type {
        self.add_node(TypeTag::Leaf, Vec::new(), None, src)
    }

    pub fn tuple(&mut self, children: Vec<Type>) -> Type {
        self.add_node(TypeTag::Tuple, children, None, SrcRef::NONE)
    }

    pub fn borrow(&mut self, inner: Type) -> Type {
        self.add_node(TypeTag::Borrow, vec![inner], None, SrcRef::NONE)
    }

    pub fn fn_type(&mut self, input: Type, output: Type) -> Type {
        self.add_node(TypeTag::Fn, vec![input, output], None, SrcRef::NONE)
    }

    pub fn unit(&mut self) -> Type {
        self.tuple(Vec::new())
    }

    /// Monotone counter bumped whenever unification links a floating
    /// node; lets callers detect a propagation fixpoint.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Follows floating links to the representative node.
    pub fn resolve(&self, mut t: Type) -> Type {
        while let Some(link) = self.links[t.get()] {
            t = link;
        }
        t
    }

    pub fn tag(&self, t: Type) -> TypeTag {
        let t = self.resolve(t);
        self.tags[t.get()]
    }

    pub fn native_id(&self, t: Type) -> Option<TypeId> {
        let t = self.resolve(t);
        self.native[t.get()]
    }

    pub fn set_native_id(&mut self, t: Type, id: TypeId) {
        let t = self.resolve(t);
        self.native[t.get()] = Some(id);
    }

    pub fn src(&self, t: Type) -> SrcRef {
        self.srcs[t.get()]
    }

    pub fn children(&self, t: Type) -> &[Type] {
        let t = self.resolve(t);
        &self.children[t.get()]
    }

    pub fn is_floating(&self, t: Type) -> bool {
        self.tag(t) == TypeTag::Floating
    }

    /// True if any floating node remains anywhere in the type.
    pub fn contains_floating(&self, t: Type) -> bool {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Floating => true,
            _ => self.children[t.get()]
                .clone()
                .iter()
                .any(|&c| self.contains_floating(c)),
        }
    }

    /// True if a borrow occurs outside of a function type, i.e. the value
    /// cannot be stored in a binding.
    pub fn contains_borrow(&self, t: Type) -> bool {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Borrow => true,
            TypeTag::Tuple => self.children[t.get()]
                .clone()
                .iter()
                .any(|&c| self.contains_borrow(c)),
            _ => false,
        }
    }

    /// Unifies two types, setting floating links as needed. On structural
    /// mismatch returns the offending pair `(given, expected)`.
    pub fn unify(&mut self, a: Type, b: Type) -> Result<(), (Type, Type)> {
        let (a, b) = (self.resolve(a), self.resolve(b));
        if a == b {
            return Ok(());
        }
        match (self.tags[a.get()], self.tags[b.get()]) {
            (TypeTag::Floating, _) => {
                self.links[a.get()] = Some(b);
                self.revision += 1;
                Ok(())
            }
            (_, TypeTag::Floating) => {
                self.links[b.get()] = Some(a);
                self.revision += 1;
                Ok(())
            }
            (TypeTag::Leaf, TypeTag::Leaf) => {
                if self.native[a.get()] == self.native[b.get()] {
                    Ok(())
                } else {
                    Err((a, b))
                }
            }
            (ta, tb) if ta == tb => {
                let ca = self.children[a.get()].clone();
                let cb = self.children[b.get()].clone();
                if ca.len() != cb.len() {
                    return Err((a, b));
                }
                for (x, y) in ca.into_iter().zip(cb) {
                    self.unify(x, y)?;
                }
                Ok(())
            }
            _ => Err((a, b)),
        }
    }

    /// Pure compatibility check: would `a` and `b` unify, treating
    /// floating nodes as wildcards? Nothing is committed.
    pub fn unifiable(&self, a: Type, b: Type) -> bool {
        let (a, b) = (self.resolve(a), self.resolve(b));
        if a == b {
            return true;
        }
        match (self.tags[a.get()], self.tags[b.get()]) {
            (TypeTag::Floating, _) | (_, TypeTag::Floating) => true,
            (TypeTag::Leaf, TypeTag::Leaf) => self.native[a.get()] == self.native[b.get()],
            (ta, tb) if ta == tb => {
                let ca = &self.children[a.get()];
                let cb = &self.children[b.get()];
                ca.len() == cb.len()
                    && ca
                        .iter()
                        .zip(cb.iter())
                        .all(|(&x, &y)| self.unifiable(x, y))
            }
            _ => false,
        }
    }

    /// Structural equality over the resolved DAG.
    pub fn structural_eq(&self, a: Type, b: Type) -> bool {
        let (a, b) = (self.resolve(a), self.resolve(b));
        if a == b {
            return true;
        }
        match (self.tags[a.get()], self.tags[b.get()]) {
            (TypeTag::Leaf, TypeTag::Leaf) => self.native[a.get()] == self.native[b.get()],
            (ta, tb) if ta == tb => {
                let ca = &self.children[a.get()];
                let cb = &self.children[b.get()];
                ca.len() == cb.len()
                    && ca
                        .iter()
                        .zip(cb.iter())
                        .all(|(&x, &y)| self.structural_eq(x, y))
            }
            _ => false,
        }
    }

    /// Number of storage cells: each leaf and each function counts as one,
    /// borrows are transparent, tuples sum their components.
    pub fn size_of(&self, t: Type) -> usize {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Leaf | TypeTag::Fn => 1,
            TypeTag::Borrow | TypeTag::Tuple => self.children[t.get()]
                .clone()
                .iter()
                .map(|&c| self.size_of(c))
                .sum(),
            TypeTag::Floating => panic!("size of an unresolved type"),
        }
    }

    /// One entry per transported value: `true` marks a borrow. Borrows
    /// contribute a single entry and are not descended into.
    pub fn borrows_of(&self, t: Type, out: &mut Vec<bool>) {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Leaf | TypeTag::Fn => out.push(false),
            TypeTag::Borrow => out.push(true),
            TypeTag::Tuple => {
                for &c in self.children[t.get()].clone().iter() {
                    self.borrows_of(c, out);
                }
            }
            TypeTag::Floating => panic!("borrows of an unresolved type"),
        }
    }

    /// The edge transport mode per transported value: leaves are copied if
    /// copy-registered and moved otherwise, function values are cheap to
    /// copy, borrows transport a single borrowed entry.
    pub fn pass_bys_of(&self, copy_types: &HashSet<TypeId>, t: Type, out: &mut Vec<PassBy>) {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Leaf => {
                let id = self.native[t.get()].expect("unresolved leaf in pass-by walk");
                out.push(if copy_types.contains(&id) {
                    PassBy::Copy
                } else {
                    PassBy::Move
                });
            }
            TypeTag::Fn => out.push(PassBy::Copy),
            TypeTag::Borrow => out.push(PassBy::Borrow),
            TypeTag::Tuple => {
                for &c in self.children[t.get()].clone().iter() {
                    self.pass_bys_of(copy_types, c, out);
                }
            }
            TypeTag::Floating => panic!("pass-by of an unresolved type"),
        }
    }

    /// True if every leaf of the type is copy-registered; function values
    /// always count as copyable.
    pub fn is_copyable(&self, copy_types: &HashSet<TypeId>, t: Type) -> bool {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Leaf => {
                let id = self.native[t.get()].expect("unresolved leaf in copyable walk");
                copy_types.contains(&id)
            }
            TypeTag::Fn => true,
            TypeTag::Tuple => self.children[t.get()]
                .clone()
                .iter()
                .all(|&c| self.is_copyable(copy_types, c)),
            TypeTag::Borrow | TypeTag::Floating => false,
        }
    }

    /// Copies the type into `dst`, translating through `cache` so shared
    /// nodes stay shared. Used to persist binding types in the environment
    /// graph when a working graph is discarded.
    pub fn copy_type_into(
        &self,
        t: Type,
        dst: &mut TypeGraph,
        cache: &mut HashMap<Type, Type>,
    ) -> Type {
        let t = self.resolve(t);
        if let Some(&copied) = cache.get(&t) {
            return copied;
        }
        let children = self.children[t.get()]
            .clone()
            .iter()
            .map(|&c| self.copy_type_into(c, dst, cache))
            .collect();
        let copied = dst.add_node(
            self.tags[t.get()],
            children,
            self.native[t.get()],
            SrcRef::NONE,
        );
        cache.insert(t, copied);
        copied
    }

    pub fn pretty_print(&self, names: &NativeTypeInfo, t: Type) -> String {
        let mut out = String::new();
        self.pretty_print_into(names, t, &mut out);
        out
    }

    fn pretty_print_into(&self, names: &NativeTypeInfo, t: Type, out: &mut String) {
        let t = self.resolve(t);
        match self.tags[t.get()] {
            TypeTag::Floating => out.push('_'),
            TypeTag::Leaf => match self.native[t.get()] {
                Some(id) => match names.names_by_id.get(&id) {
                    Some(name) => out.push_str(name),
                    None => {
                        let _ = write!(out, "type 0x{:x}", type_id_hash(id));
                    }
                },
                None => out.push('_'),
            },
            TypeTag::Borrow => {
                out.push('&');
                self.pretty_print_into(names, self.children[t.get()][0], out);
            }
            TypeTag::Tuple => {
                out.push('(');
                let children = self.children[t.get()].clone();
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.pretty_print_into(names, *c, out);
                }
                out.push(')');
            }
            TypeTag::Fn => {
                let children = self.children[t.get()].clone();
                out.push_str("fn");
                self.pretty_print_into(names, children[0], out);
                out.push_str(" -> ");
                self.pretty_print_into(names, children[1], out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> NativeTypeInfo {
        let mut info = NativeTypeInfo::default();
        info.register("i32", TypeId::of::<i32>(), true);
        info.register("string", TypeId::of::<String>(), true);
        info
    }

    #[test]
    fn pretty_print_shapes() {
        let info = info();
        let mut tg = TypeGraph::default();
        let i32_t = tg.leaf(TypeId::of::<i32>());
        let string_t = tg.leaf(TypeId::of::<String>());
        let tuple = tg.tuple(vec![i32_t, string_t]);
        let borrowed = tg.borrow(i32_t);
        let unit = tg.unit();
        let fn_t = tg.fn_type(unit, i32_t);

        assert_eq!("i32", tg.pretty_print(&info, i32_t));
        assert_eq!("(i32, string)", tg.pretty_print(&info, tuple));
        assert_eq!("&i32", tg.pretty_print(&info, borrowed));
        assert_eq!("()", tg.pretty_print(&info, unit));
        assert_eq!("fn() -> i32", tg.pretty_print(&info, fn_t));
    }

    #[test]
    fn unify_floating_links() {
        let mut tg = TypeGraph::default();
        let a = tg.floating(SrcRef::NONE);
        let b = tg.leaf(TypeId::of::<i32>());
        tg.unify(a, b).unwrap();
        assert_eq!(TypeTag::Leaf, tg.tag(a));
        assert!(tg.structural_eq(a, b));
    }

    #[test]
    fn unify_structural_mismatch() {
        let mut tg = TypeGraph::default();
        let a = tg.leaf(TypeId::of::<i32>());
        let b = tg.leaf(TypeId::of::<f32>());
        assert!(tg.unify(a, b).is_err());
    }

    #[test]
    fn unify_through_tuples() {
        let mut tg = TypeGraph::default();
        let f = tg.floating(SrcRef::NONE);
        let i = tg.leaf(TypeId::of::<i32>());
        let t1 = tg.tuple(vec![f, i]);
        let i2 = tg.leaf(TypeId::of::<i32>());
        let s = tg.leaf(TypeId::of::<String>());
        let t2 = tg.tuple(vec![s, i2]);

        tg.unify(t1, t2).unwrap();
        assert!(tg.structural_eq(f, s));
    }

    #[test]
    fn size_and_borrows() {
        let mut tg = TypeGraph::default();
        let i = tg.leaf(TypeId::of::<i32>());
        let s = tg.leaf(TypeId::of::<String>());
        let b = tg.borrow(i);
        let unit = tg.unit();
        let f = tg.fn_type(unit, i);
        let t = tg.tuple(vec![i, s, b, f]);

        assert_eq!(4, tg.size_of(t));

        let mut borrows = Vec::new();
        tg.borrows_of(t, &mut borrows);
        assert_eq!(vec![false, false, true, false], borrows);
    }

    #[test]
    fn pass_bys() {
        let mut tg = TypeGraph::default();
        let copy_types: HashSet<TypeId> = [TypeId::of::<i32>()].into_iter().collect();
        let i = tg.leaf(TypeId::of::<i32>());
        let s = tg.leaf(TypeId::of::<String>());
        let b = tg.borrow(s);
        let t = tg.tuple(vec![i, s, b]);

        let mut out = Vec::new();
        tg.pass_bys_of(&copy_types, t, &mut out);
        assert_eq!(vec![PassBy::Copy, PassBy::Move, PassBy::Borrow], out);
    }

    #[test]
    fn copy_between_graphs() {
        let info = info();
        let mut src = TypeGraph::default();
        let i = src.leaf(TypeId::of::<i32>());
        let s = src.leaf(TypeId::of::<String>());
        let t = src.tuple(vec![i, s]);

        let mut dst = TypeGraph::default();
        let mut cache = HashMap::new();
        let copied = src.copy_type_into(t, &mut dst, &mut cache);
        assert_eq!("(i32, string)", dst.pretty_print(&info, copied));
    }
}
