#![deny(unreachable_pub)]

pub mod any;
pub mod executor;
pub mod future;
pub mod graph;
pub mod primitives;

pub use any::Any;
pub use executor::{make_seq_executor, make_task_executor, Executor, ExecutorRef, Task};
pub use future::{borrow, make_promise_future, BorrowGuard, BorrowedFuture, Future, Promise};
pub use graph::{make_graph, ConstructingGraph, FunctionGraph, Oterm, PassBy};
pub use primitives::{
    create_async, create_async_converge, create_async_functional, create_async_graph,
    create_async_if, create_async_select, create_async_value, curry, AnyFunction, AsyncFn,
};
