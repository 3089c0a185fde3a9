use std::sync::{Arc, OnceLock, RwLock};

use ooze_runtime::{create_async_graph, AsyncFn, FunctionGraph};

/// Handle naming one invocable unit registered in a [`Program`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Inst(pub u32);

enum Entry {
    Graph(FunctionGraph),
    Native(AsyncFn),
}

/// Registry of invocable units. Slots are reserved up front so mutually
/// recursive functions can reference each other before any body is
/// lowered; once a slot is published it is immutable and safe to read
/// from any executor thread.
#[derive(Default)]
pub struct Program {
    slots: RwLock<Vec<Arc<OnceLock<Entry>>>>,
}

impl Program {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserves a placeholder slot, to be filled by `define_graph` or
    /// `define_native`.
    pub fn reserve(&self) -> Inst {
        let mut slots = self.slots.write().unwrap();
        let inst = Inst(slots.len() as u32);
        slots.push(Arc::new(OnceLock::new()));
        inst
    }

    fn slot(&self, inst: Inst) -> Arc<OnceLock<Entry>> {
        Arc::clone(&self.slots.read().unwrap()[inst.0 as usize])
    }

    pub fn define_graph(&self, inst: Inst, graph: FunctionGraph) {
        if self.slot(inst).set(Entry::Graph(graph)).is_err() {
            panic!("instance defined twice");
        }
    }

    pub fn define_native(&self, inst: Inst, f: AsyncFn) {
        if self.slot(inst).set(Entry::Native(f)).is_err() {
            panic!("instance defined twice");
        }
    }

    /// The finalized graph behind `inst`, if it is a graph and has been
    /// published. Used to inline direct calls.
    pub fn finalized_graph(&self, inst: Inst) -> Option<FunctionGraph> {
        match self.slot(inst).get() {
            Some(Entry::Graph(graph)) => Some(graph.clone()),
            _ => None,
        }
    }

    pub fn native_fn(&self, inst: Inst) -> Option<AsyncFn> {
        match self.slot(inst).get() {
            Some(Entry::Native(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// An invocable for the instance. Resolution is lazy: the slot is read
    /// at call time, which is what makes recursion through function
    /// values work.
    pub fn async_fn(self: &Arc<Self>, inst: Inst) -> AsyncFn {
        let program = Arc::clone(self);
        Arc::new(move |ex, futures, borrows| {
            let slot = program.slot(inst);
            match slot.get() {
                Some(Entry::Native(f)) => f(ex, futures, borrows),
                Some(Entry::Graph(graph)) => {
                    create_async_graph(graph.clone())(ex, futures, borrows)
                }
                None => panic!("instance invoked before its definition was published"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ooze_runtime::{
        create_async, make_seq_executor, Any, AnyFunction, Future,
    };

    #[test]
    fn native_roundtrip() {
        let program = Program::new();
        let inst = program.reserve();
        program.define_native(
            inst,
            create_async(AnyFunction::new(vec![false], 1, |mut owned, _| {
                vec![owned.remove(0)]
            })),
        );

        let ex = make_seq_executor();
        let f = program.async_fn(inst);
        let results = f(ex.clone(), vec![Future::ready(&ex, Any::cloneable(3i32))], vec![]);
        let value = results.into_iter().next().unwrap().wait();
        assert_eq!(3, value.downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn lazy_resolution_allows_reservation_before_definition() {
        let program = Program::new();
        let inst = program.reserve();
        // Usable as a value before the definition lands.
        let f = program.async_fn(inst);
        program.define_native(
            inst,
            create_async(AnyFunction::new(vec![], 1, |_, _| {
                vec![Any::cloneable(7i32)]
            })),
        );

        let ex = make_seq_executor();
        let results = f(ex.clone(), vec![], vec![]);
        assert_eq!(
            7,
            results
                .into_iter()
                .next()
                .unwrap()
                .wait()
                .downcast::<i32>()
                .ok()
                .unwrap()
        );
    }
}
