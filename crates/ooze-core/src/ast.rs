use std::collections::HashMap;

use crate::forest::{Forest, NodeId};
use crate::src_map::SrcRef;
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AstTag {
    PatternWildCard,
    PatternIdent,
    PatternTuple,
    ExprLiteral,
    ExprIdent,
    ExprCall,
    ExprSelect,
    ExprBorrow,
    ExprWith,
    ExprTuple,
    Fn,
    Assignment,
    RootFn,
    EnvValue,
    Module,
}

pub fn is_expr(tag: AstTag) -> bool {
    matches!(
        tag,
        AstTag::ExprLiteral
            | AstTag::ExprIdent
            | AstTag::ExprCall
            | AstTag::ExprSelect
            | AstTag::ExprBorrow
            | AstTag::ExprWith
            | AstTag::ExprTuple
    )
}

pub fn is_pattern(tag: AstTag) -> bool {
    matches!(
        tag,
        AstTag::PatternWildCard | AstTag::PatternIdent | AstTag::PatternTuple
    )
}

#[derive(Clone, PartialEq, Debug)]
pub enum Literal {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
}

/// The AST: an ordered forest of tagged nodes with parallel side tables
/// for source references and type handles, plus a literal value table.
/// Children are positional (an `ExprCall` has exactly two: callee then
/// argument).
#[derive(Clone, PartialEq, Debug)]
pub struct Ast {
    pub forest: Forest<AstTag>,
    pub srcs: Vec<SrcRef>,
    pub types: Vec<Type>,
    pub literals: HashMap<NodeId, Literal>,
}

impl Default for Ast {
    fn default() -> Self {
        Ast {
            forest: Forest::new(),
            srcs: Vec::new(),
            types: Vec::new(),
            literals: HashMap::new(),
        }
    }
}

impl Ast {
    /// Appends a node adopting `children` (which must be roots), recording
    /// its source reference and type handle.
    pub fn append(
        &mut self,
        tag: AstTag,
        src_ref: SrcRef,
        ty: Type,
        children: &[NodeId],
    ) -> NodeId {
        let id = self.forest.append_root_with_children(tag, children);
        debug_assert_eq!(id.get(), self.srcs.len());
        self.srcs.push(src_ref);
        self.types.push(ty);
        id
    }

    pub fn tag(&self, id: NodeId) -> AstTag {
        *self.forest.get(id)
    }

    pub fn ty(&self, id: NodeId) -> Type {
        self.types[id.get()]
    }

    pub fn set_ty(&mut self, id: NodeId, ty: Type) {
        self.types[id.get()] = ty;
    }

    pub fn src(&self, id: NodeId) -> SrcRef {
        self.srcs[id.get()]
    }

    pub fn literal(&self, id: NodeId) -> &Literal {
        &self.literals[&id]
    }
}
