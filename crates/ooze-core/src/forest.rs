/// Index of a node in a [`Forest`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
struct Links {
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

/// An ordered forest stored in an append-only arena. Nodes are built
/// bottom-up: children are created as roots and adopted when their parent
/// is appended. Traversals walk sibling/parent links and never allocate.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Forest<T> {
    values: Vec<T>,
    links: Vec<Links>,
    first_root: Option<NodeId>,
    last_root: Option<NodeId>,
}

impl<T> Forest<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            links: Vec::new(),
            first_root: None,
            last_root: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.links[id.get()].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.links[id.get()].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.links[id.get()].next_sibling
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.links[id.get()].parent.is_none()
    }

    /// The root of the tree containing `id`.
    pub fn root(&self, mut id: NodeId) -> NodeId {
        while let Some(parent) = self.parent(id) {
            id = parent;
        }
        id
    }

    fn push_node(&mut self, value: T) -> NodeId {
        let id = NodeId(self.values.len() as u32);
        self.values.push(value);
        self.links.push(Links {
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
        });
        id
    }

    fn append_to_root_list(&mut self, id: NodeId) {
        match self.last_root {
            Some(last) => self.links[last.get()].next_sibling = Some(id),
            None => self.first_root = Some(id),
        }
        self.last_root = Some(id);
    }

    fn remove_from_root_list(&mut self, id: NodeId) {
        let mut prev: Option<NodeId> = None;
        let mut current = self.first_root;
        while let Some(c) = current {
            if c == id {
                let next = self.links[c.get()].next_sibling;
                match prev {
                    Some(p) => self.links[p.get()].next_sibling = next,
                    None => self.first_root = next,
                }
                if self.last_root == Some(id) {
                    self.last_root = prev;
                }
                self.links[id.get()].next_sibling = None;
                return;
            }
            prev = current;
            current = self.links[c.get()].next_sibling;
        }
        panic!("node is not a root");
    }

    /// Appends a new root with no children.
    pub fn append_root(&mut self, value: T) -> NodeId {
        let id = self.push_node(value);
        self.append_to_root_list(id);
        id
    }

    /// Appends a new root adopting `children`, which must currently be
    /// roots; they keep their relative order.
    pub fn append_root_with_children(&mut self, value: T, children: &[NodeId]) -> NodeId {
        let id = self.push_node(value);
        self.append_to_root_list(id);
        for &child in children {
            assert!(self.is_root(child), "adopted node must be a root");
            self.remove_from_root_list(child);
            self.links[child.get()].parent = Some(id);
            match self.links[id.get()].last_child {
                Some(last) => self.links[last.get()].next_sibling = Some(child),
                None => self.links[id.get()].first_child = Some(child),
            }
            self.links[id.get()].last_child = Some(child);
        }
        id
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut current = self.first_root;
        std::iter::from_fn(move || {
            let id = current?;
            current = self.links[id.get()].next_sibling;
            Some(id)
        })
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut current = self.first_child(id);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.links[id.get()].next_sibling;
            Some(id)
        })
    }

    pub fn child_array<const N: usize>(&self, id: NodeId) -> [NodeId; N] {
        let mut out = [NodeId(0); N];
        let mut children = self.children(id);
        for slot in &mut out {
            *slot = children.next().expect("node has too few children");
        }
        out
    }

    /// Pre-order traversal of the subtree rooted at `id`.
    pub fn pre_order(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = Some(id);
        std::iter::from_fn(move || {
            let current = next?;
            next = if let Some(child) = self.first_child(current) {
                Some(child)
            } else {
                // Climb until a sibling exists, stopping at the subtree root.
                let mut at = current;
                loop {
                    if at == id {
                        break None;
                    }
                    if let Some(sibling) = self.next_sibling(at) {
                        break Some(sibling);
                    }
                    at = self.parent(at).expect("walked above the subtree root");
                }
            };
            Some(current)
        })
    }

    /// Post-order traversal of the subtree rooted at `id`.
    pub fn post_order(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = Some(self.leftmost_leaf(id));
        let root = id;
        std::iter::from_fn(move || {
            let current = next?;
            next = if current == root {
                None
            } else if let Some(sibling) = self.next_sibling(current) {
                Some(self.leftmost_leaf(sibling))
            } else {
                self.parent(current)
            };
            Some(current)
        })
    }

    fn leftmost_leaf(&self, mut id: NodeId) -> NodeId {
        while let Some(child) = self.first_child(id) {
            id = child;
        }
        id
    }

    /// Leaf-only traversal of the subtree rooted at `id`, left to right.
    pub fn leaves(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.pre_order(id).filter(|&n| self.first_child(n).is_none())
    }

    pub fn get(&self, id: NodeId) -> &T {
        &self.values[id.get()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.values[id.get()]
    }
}

impl<T> std::ops::Index<NodeId> for Forest<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //     a        h
    //    / \      / \
    //   b   f    i   m
    //  / \  |   /|\
    // c   e g  j k l
    // |
    // d
    fn make_test_forest() -> Forest<&'static str> {
        let mut f = Forest::new();
        let d = f.append_root("d");
        let c = f.append_root_with_children("c", &[d]);
        let e = f.append_root("e");
        let b = f.append_root_with_children("b", &[c, e]);
        let g = f.append_root("g");
        let fx = f.append_root_with_children("f", &[g]);
        let _a = f.append_root_with_children("a", &[b, fx]);
        let j = f.append_root("j");
        let k = f.append_root("k");
        let l = f.append_root("l");
        let i = f.append_root_with_children("i", &[j, k, l]);
        let m = f.append_root("m");
        let _h = f.append_root_with_children("h", &[i, m]);
        f
    }

    fn values<'a>(f: &'a Forest<&'static str>, ids: impl Iterator<Item = NodeId>) -> Vec<&'static str> {
        ids.map(|id| *f.get(id)).collect()
    }

    #[test]
    fn roots() {
        let f = make_test_forest();
        assert_eq!(vec!["a", "h"], values(&f, f.roots()));
        assert!(Forest::<i32>::new().roots().next().is_none());
    }

    #[test]
    fn children() {
        let f = make_test_forest();
        assert_eq!(13, f.len());

        let a = f.roots().next().unwrap();
        assert_eq!(vec!["b", "f"], values(&f, f.children(a)));
        let b = f.first_child(a).unwrap();
        assert_eq!(vec!["c", "e"], values(&f, f.children(b)));
        let h = f.roots().nth(1).unwrap();
        let i = f.first_child(h).unwrap();
        assert_eq!(vec!["j", "k", "l"], values(&f, f.children(i)));
    }

    #[test]
    fn pre_order() {
        let f = make_test_forest();
        let a = f.roots().next().unwrap();
        assert_eq!(vec!["a", "b", "c", "d", "e", "f", "g"], values(&f, f.pre_order(a)));

        let b = f.first_child(a).unwrap();
        assert_eq!(vec!["b", "c", "d", "e"], values(&f, f.pre_order(b)));

        let h = f.roots().nth(1).unwrap();
        assert_eq!(vec!["h", "i", "j", "k", "l", "m"], values(&f, f.pre_order(h)));
    }

    #[test]
    fn post_order() {
        let f = make_test_forest();
        let a = f.roots().next().unwrap();
        assert_eq!(vec!["d", "c", "e", "b", "g", "f", "a"], values(&f, f.post_order(a)));

        let b = f.first_child(a).unwrap();
        assert_eq!(vec!["d", "c", "e", "b"], values(&f, f.post_order(b)));

        let h = f.roots().nth(1).unwrap();
        assert_eq!(vec!["j", "k", "l", "i", "m", "h"], values(&f, f.post_order(h)));
    }

    #[test]
    fn leaves() {
        let f = make_test_forest();
        let a = f.roots().next().unwrap();
        assert_eq!(vec!["d", "e", "g"], values(&f, f.leaves(a)));
    }

    #[test]
    fn adoption_preserves_order() {
        let mut f = Forest::new();
        let c = f.append_root("c");
        let e = f.append_root("e");
        let a = f.append_root_with_children("a", &[c, e]);

        assert_eq!(vec!["c", "e"], values(&f, f.children(a)));
        assert_eq!(Some(a), f.parent(c));
        assert_eq!(vec!["a"], values(&f, f.roots()));
    }
}
