#![deny(unreachable_pub)]

pub mod repl;

pub use ooze_builtin::{create_empty_env, create_primitive_env};
pub use ooze_core::{
    Ast, AsyncValue, Binding, BindingState, Bindings, Env, Inst, Program, SrcId, SrcRef, Type,
    TypeGraph, TypeTag,
};
pub use ooze_runtime::{
    borrow, make_promise_future, make_seq_executor, make_task_executor, Any, AsyncFn,
    BorrowedFuture, Executor, ExecutorRef, Future, Promise,
};
