#![deny(unreachable_pub)]

pub mod ast;
pub mod bindings;
pub mod diagnostics;
pub mod env;
pub mod forest;
pub mod lex;
pub mod lower;
pub mod native;
pub mod parse;
pub mod pc;
pub mod program;
pub mod sema;
pub mod src_map;
pub mod types;

pub use ast::{Ast, AstTag, Literal};
pub use bindings::{AsyncValue, Binding, BindingState, Bindings};
pub use diagnostics::{contextualize, ContextualError};
pub use env::Env;
pub use forest::{Forest, NodeId};
pub use program::{Inst, Program};
pub use src_map::{SrcId, SrcRef};
pub use types::{NativeTypeInfo, Type, TypeGraph, TypeTag};
