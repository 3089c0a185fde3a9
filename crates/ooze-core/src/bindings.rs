use indexmap::IndexMap;

use ooze_runtime::{borrow, BorrowedFuture, ExecutorRef, Future};

use crate::types::Type;

/// REPL-level binding lifecycle: `Pending → Ready ↔ Borrowed`; a binding
/// consumed by a move is removed from the map entirely.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum BindingState {
    Ready,
    Borrowed,
    Pending,
}

/// One stored value of a binding: an owned future, with a live borrow
/// share once the value has been lent out. Taking the value drops the
/// share first so the post-borrow future can resume.
#[derive(Debug)]
pub struct AsyncValue {
    future: Option<Future>,
    borrowed: Option<BorrowedFuture>,
}

impl From<Future> for AsyncValue {
    fn from(future: Future) -> Self {
        Self {
            future: Some(future),
            borrowed: None,
        }
    }
}

impl AsyncValue {
    pub fn state(&self) -> BindingState {
        if self.borrowed.is_some() {
            BindingState::Borrowed
        } else if self.future.as_ref().is_some_and(Future::is_ready) {
            BindingState::Ready
        } else {
            BindingState::Pending
        }
    }

    /// Consumes the value: any outstanding share is released and the
    /// returned future resolves once all borrows have completed.
    pub fn take(self) -> Future {
        drop(self.borrowed);
        self.future.expect("async value always holds a future")
    }

    /// Lends the value out. The share is kept so later borrows are cheap;
    /// the owned future becomes the post-borrow future.
    pub fn borrow(&mut self) -> BorrowedFuture {
        if self.borrowed.is_none() {
            let future = self.future.take().expect("async value always holds a future");
            let (share, post) = borrow(future);
            self.future = Some(post);
            self.borrowed = Some(share);
        }
        self.borrowed.as_ref().expect("just set").clone()
    }

    /// Blocks until the value is ready, returning a resolved holder.
    pub fn await_ready(self, ex: &ExecutorRef) -> AsyncValue {
        let value = self.take().wait();
        AsyncValue::from(Future::ready(ex, value))
    }
}

/// A named result: its environment type plus one [`AsyncValue`] per
/// storage cell of that type (borrow wrappers are not stored).
#[derive(Debug)]
pub struct Binding {
    pub ty: Type,
    pub values: Vec<AsyncValue>,
}

impl Binding {
    pub fn unit(ty: Type) -> Self {
        Self {
            ty,
            values: Vec::new(),
        }
    }

    pub fn state(&self) -> BindingState {
        self.values
            .iter()
            .map(AsyncValue::state)
            .max()
            .unwrap_or(BindingState::Ready)
    }
}

pub type Bindings = IndexMap<String, Binding>;
