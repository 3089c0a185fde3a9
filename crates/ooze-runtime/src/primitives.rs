use std::sync::{Arc, Mutex};

use crate::any::Any;
use crate::executor::ExecutorRef;
use crate::future::{make_promise_future, BorrowGuard, BorrowedFuture, Future, Promise};

/// An invocable unit of the dataflow runtime: takes owned inputs as futures
/// and borrowed inputs as shares, returns its outputs as futures
/// immediately.
pub type AsyncFn =
    Arc<dyn Fn(ExecutorRef, Vec<Future>, Vec<BorrowedFuture>) -> Vec<Future> + Send + Sync>;

/// A synchronous native function over type-erased values, with a mask
/// marking which inputs it takes by shared reference.
#[derive(Clone)]
pub struct AnyFunction {
    f: Arc<dyn Fn(Vec<Any>, &[&Any]) -> Vec<Any> + Send + Sync>,
    borrows: Vec<bool>,
    output_count: usize,
}

impl AnyFunction {
    pub fn new(
        borrows: Vec<bool>,
        output_count: usize,
        f: impl Fn(Vec<Any>, &[&Any]) -> Vec<Any> + Send + Sync + 'static,
    ) -> Self {
        Self {
            f: Arc::new(f),
            borrows,
            output_count,
        }
    }

    pub fn borrows(&self) -> &[bool] {
        &self.borrows
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn invoke(&self, owned: Vec<Any>, borrowed: &[&Any]) -> Vec<Any> {
        (self.f)(owned, borrowed)
    }
}

struct Gather {
    owned: Vec<Option<Any>>,
    borrowed: Vec<Option<BorrowGuard>>,
    missing: usize,
}

/// Waits for every input of a native invocation, then runs `f` on the
/// executor with the resolved values.
fn gather_inputs(
    ex: &ExecutorRef,
    futures: Vec<Future>,
    borrows: Vec<BorrowedFuture>,
    f: impl FnOnce(Vec<Any>, Vec<BorrowGuard>) + Send + 'static,
) {
    let missing = futures.len() + borrows.len();
    if missing == 0 {
        ex.enqueue(move || f(Vec::new(), Vec::new()));
        return;
    }

    struct State {
        gather: Gather,
        f: Option<Box<dyn FnOnce(Vec<Any>, Vec<BorrowGuard>) + Send>>,
    }
    let state = Arc::new(Mutex::new(State {
        gather: Gather {
            owned: futures.iter().map(|_| None).collect(),
            borrowed: borrows.iter().map(|_| None).collect(),
            missing,
        },
        f: Some(Box::new(f)),
    }));

    let arrive = |state: &Arc<Mutex<State>>| {
        let mut locked = state.lock().unwrap();
        locked.gather.missing -= 1;
        if locked.gather.missing > 0 {
            return;
        }
        let owned = locked.gather.owned.iter_mut().map(|v| v.take().unwrap()).collect();
        let borrowed = locked
            .gather
            .borrowed
            .iter_mut()
            .map(|v| v.take().unwrap())
            .collect();
        let f = locked.f.take().unwrap();
        drop(locked);
        f(owned, borrowed);
    };

    for (i, future) in futures.into_iter().enumerate() {
        let state = Arc::clone(&state);
        future.on_ready(move |value| {
            state.lock().unwrap().gather.owned[i] = Some(value);
            arrive(&state);
        });
    }
    for (i, borrowed) in borrows.iter().enumerate() {
        let state = Arc::clone(&state);
        borrowed.on_ready(move |guard| {
            state.lock().unwrap().gather.borrowed[i] = Some(guard);
            arrive(&state);
        });
    }
}

fn make_output_futures(ex: &ExecutorRef, count: usize) -> (Vec<Promise>, Vec<Future>) {
    (0..count).map(|_| make_promise_future(ex)).unzip()
}

fn send_outputs(promises: Vec<Promise>, values: Vec<Any>) {
    debug_assert_eq!(promises.len(), values.len());
    for (promise, value) in promises.into_iter().zip(values) {
        promise.send(value);
    }
}

fn forward_outputs(promises: Vec<Promise>, futures: Vec<Future>) {
    debug_assert_eq!(promises.len(), futures.len());
    for (promise, future) in promises.into_iter().zip(futures) {
        future.forward(promise);
    }
}

/// Wraps a synchronous native function: waits for all inputs, invokes once
/// they are ready, and splits the results into one future per output.
pub fn create_async(f: AnyFunction) -> AsyncFn {
    Arc::new(move |ex, futures, borrows| {
        debug_assert_eq!(
            f.borrows().iter().filter(|&&b| !b).count(),
            futures.len(),
            "owned input arity mismatch"
        );
        let (promises, outputs) = make_output_futures(&ex, f.output_count());
        let f = f.clone();
        gather_inputs(&ex, futures, borrows, move |owned, guards| {
            let refs: Vec<&Any> = guards.iter().map(|g| &**g).collect();
            send_outputs(promises, f.invoke(owned, &refs));
        });
        outputs
    })
}

/// 0-in, 1-out: emits a (cloneable) constant each invocation.
pub fn create_async_value(value: Any) -> AsyncFn {
    Arc::new(move |ex, futures, borrows| {
        debug_assert!(futures.is_empty() && borrows.is_empty());
        let value = value
            .try_clone()
            .expect("constant values must be cloneable");
        vec![Future::ready(&ex, value)]
    })
}

/// First input is a function value; invokes it on the remaining inputs.
pub fn create_async_functional(output_count: usize) -> AsyncFn {
    Arc::new(move |ex, mut futures, borrows| {
        let f_future = futures.remove(0);
        let (promises, outputs) = make_output_futures(&ex, output_count);
        let ex2 = ex.clone();
        f_future.on_ready(move |any| {
            let f = any
                .downcast::<AsyncFn>()
                .unwrap_or_else(|_| panic!("functional input is not a function value"));
            forward_outputs(promises, f(ex2, futures, borrows));
        });
        outputs
    })
}

/// Condition plus 2k inputs; emits the first k if true, the last k
/// otherwise. The unchosen values are dropped the moment the condition is
/// known.
pub fn create_async_select() -> AsyncFn {
    Arc::new(move |ex, mut futures, borrows| {
        debug_assert!(borrows.is_empty(), "select operates on owned inputs");
        let cond = futures.remove(0);
        let count = futures.len() / 2;
        let (promises, outputs) = make_output_futures(&ex, count);
        cond.on_ready(move |any| {
            let cond = any.downcast::<bool>().ok().expect("select condition must be bool");
            let rest = futures.split_off(count);
            let chosen = if cond { futures } else { rest };
            forward_outputs(promises, chosen);
        });
        outputs
    })
}

/// Condition plus argument inputs; dispatches to one branch function,
/// evaluating only it.
pub fn create_async_if(output_count: usize, then_fn: AsyncFn, else_fn: AsyncFn) -> AsyncFn {
    Arc::new(move |ex, mut futures, borrows| {
        let cond = futures.remove(0);
        let (promises, outputs) = make_output_futures(&ex, output_count);
        let (then_fn, else_fn) = (then_fn.clone(), else_fn.clone());
        let ex2 = ex.clone();
        cond.on_ready(move |any| {
            let cond = any.downcast::<bool>().ok().expect("if condition must be bool");
            let branch = if cond { then_fn } else { else_fn };
            forward_outputs(promises, branch(ex2, futures, borrows));
        });
        outputs
    })
}

/// Body function, an initial done flag, and state; iterates the body until
/// it reports convergence, then emits the final state. Borrowed inputs are
/// shared across every iteration.
pub fn create_async_converge() -> AsyncFn {
    Arc::new(move |ex, mut futures, borrows| {
        let body_future = futures.remove(0);
        let cond = futures.remove(0);
        let (promises, outputs) = make_output_futures(&ex, futures.len());
        let ex2 = ex.clone();
        body_future.on_ready(move |any| {
            let body = any
                .downcast::<AsyncFn>()
                .unwrap_or_else(|_| panic!("converge body is not a function value"));
            converge_iteration(ex2, body, cond, futures, borrows, promises);
        });
        outputs
    })
}

fn converge_iteration(
    ex: ExecutorRef,
    body: AsyncFn,
    cond: Future,
    state: Vec<Future>,
    borrows: Vec<BorrowedFuture>,
    promises: Vec<Promise>,
) {
    let ex2 = ex.clone();
    cond.on_ready(move |any| {
        let done = any.downcast::<bool>().ok().expect("converge flag must be bool");
        if done {
            forward_outputs(promises, state);
        } else {
            let mut next = body(ex2.clone(), state, borrows.clone());
            let next_state = next.split_off(1);
            let next_cond = next.remove(0);
            converge_iteration(ex2, body, next_cond, next_state, borrows, promises);
        }
    });
}

/// Binds constant leading values to a function, producing a function of the
/// remaining inputs. Used for function-valued constants captured by script
/// functions.
pub fn curry(f: AsyncFn, values: Vec<Any>) -> AsyncFn {
    Arc::new(move |ex, futures, borrows| {
        let mut all: Vec<Future> = values
            .iter()
            .map(|v| {
                let v = v.try_clone().expect("curried values must be cloneable");
                Future::ready(&ex, v)
            })
            .collect();
        all.extend(futures);
        f(ex, all, borrows)
    })
}

pub use crate::graph::create_async_graph;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::make_seq_executor;
    use crate::future::borrow;

    fn run_async_fn(
        ex: &ExecutorRef,
        f: &AsyncFn,
        owned: Vec<Any>,
        borrowed: Vec<Any>,
    ) -> Vec<Any> {
        let futures = owned.into_iter().map(|v| Future::ready(ex, v)).collect();
        let borrows = borrowed
            .into_iter()
            .map(|v| borrow(Future::ready(ex, v)).0)
            .collect();
        f(ex.clone(), futures, borrows)
            .into_iter()
            .map(|f| f.wait())
            .collect()
    }

    fn ints(results: Vec<Any>) -> Vec<i32> {
        results
            .into_iter()
            .map(|any| any.downcast::<i32>().ok().unwrap())
            .collect()
    }

    fn to_async(
        borrows: Vec<bool>,
        output_count: usize,
        f: impl Fn(Vec<Any>, &[&Any]) -> Vec<Any> + Send + Sync + 'static,
    ) -> AsyncFn {
        create_async(AnyFunction::new(borrows, output_count, f))
    }

    fn add_fn() -> AsyncFn {
        to_async(vec![false, true], 1, |owned, borrowed| {
            let x = owned[0].downcast_ref::<i32>().unwrap();
            let y = borrowed[0].downcast_ref::<i32>().unwrap();
            vec![Any::cloneable(x + y)]
        })
    }

    #[test]
    fn value() {
        let ex = make_seq_executor();
        let f = create_async_value(Any::cloneable(1i32));
        assert_eq!(vec![1], ints(run_async_fn(&ex, &f, vec![], vec![])));

        let f = create_async_value(Any::cloneable(String::from("abc")));
        let results = run_async_fn(&ex, &f, vec![], vec![]);
        assert_eq!(
            "abc",
            results
                .into_iter()
                .next()
                .unwrap()
                .downcast::<String>()
                .ok()
                .unwrap()
        );
    }

    #[test]
    fn any_function() {
        let ex = make_seq_executor();

        let noop = to_async(vec![], 0, |_, _| vec![]);
        assert!(run_async_fn(&ex, &noop, vec![], vec![]).is_empty());

        let three = to_async(vec![], 1, |_, _| vec![Any::cloneable(3i32)]);
        assert_eq!(vec![3], ints(run_async_fn(&ex, &three, vec![], vec![])));

        let add = add_fn();
        let results = run_async_fn(&ex, &add, vec![Any::cloneable(2i32)], vec![Any::cloneable(7i32)]);
        assert_eq!(vec![9], ints(results));
    }

    #[test]
    fn functional() {
        let ex = make_seq_executor();
        let f = create_async_functional(1);

        let add1 = to_async(vec![false], 1, |owned, _| {
            vec![Any::cloneable(owned[0].downcast_ref::<i32>().unwrap() + 1)]
        });
        let results = run_async_fn(
            &ex,
            &f,
            vec![Any::cloneable(add1), Any::cloneable(6i32)],
            vec![],
        );
        assert_eq!(vec![7], ints(results));

        let results = run_async_fn(
            &ex,
            &f,
            vec![Any::cloneable(add_fn()), Any::cloneable(2i32)],
            vec![Any::cloneable(6i32)],
        );
        assert_eq!(vec![9], ints(results));
    }

    #[test]
    fn select() {
        let ex = make_seq_executor();
        let f = create_async_select();

        assert!(run_async_fn(&ex, &f, vec![Any::cloneable(true)], vec![]).is_empty());
        assert!(run_async_fn(&ex, &f, vec![Any::cloneable(false)], vec![]).is_empty());

        let args = || vec![Any::cloneable(true), Any::cloneable(1i32), Any::cloneable(2i32)];
        assert_eq!(vec![1], ints(run_async_fn(&ex, &f, args(), vec![])));

        let args = vec![Any::cloneable(false), Any::cloneable(1i32), Any::cloneable(2i32)];
        assert_eq!(vec![2], ints(run_async_fn(&ex, &f, args, vec![])));

        let args = vec![
            Any::cloneable(true),
            Any::cloneable(1i32),
            Any::cloneable(2i32),
            Any::cloneable(3i32),
            Any::cloneable(4i32),
        ];
        assert_eq!(vec![1, 2], ints(run_async_fn(&ex, &f, args, vec![])));

        let args = vec![
            Any::cloneable(false),
            Any::cloneable(1i32),
            Any::cloneable(2i32),
            Any::cloneable(3i32),
            Any::cloneable(4i32),
        ];
        assert_eq!(vec![3, 4], ints(run_async_fn(&ex, &f, args, vec![])));
    }

    #[test]
    fn if_dispatches_one_branch() {
        let ex = make_seq_executor();

        let one = create_async_value(Any::cloneable(1i32));
        let two = create_async_value(Any::cloneable(2i32));
        let f = create_async_if(1, one, two);
        assert_eq!(vec![1], ints(run_async_fn(&ex, &f, vec![Any::cloneable(true)], vec![])));
        assert_eq!(vec![2], ints(run_async_fn(&ex, &f, vec![Any::cloneable(false)], vec![])));

        let add = to_async(vec![false, true], 1, |owned, borrowed| {
            let x = owned[0].downcast_ref::<i32>().unwrap();
            let y = borrowed[0].downcast_ref::<i32>().unwrap();
            vec![Any::cloneable(x + y)]
        });
        let mul = to_async(vec![false, true], 1, |owned, borrowed| {
            let x = owned[0].downcast_ref::<i32>().unwrap();
            let y = borrowed[0].downcast_ref::<i32>().unwrap();
            vec![Any::cloneable(x * y)]
        });
        let f = create_async_if(1, add, mul);
        let results = run_async_fn(
            &ex,
            &f,
            vec![Any::cloneable(true), Any::cloneable(3i32)],
            vec![Any::cloneable(4i32)],
        );
        assert_eq!(vec![7], ints(results));
        let results = run_async_fn(
            &ex,
            &f,
            vec![Any::cloneable(false), Any::cloneable(3i32)],
            vec![Any::cloneable(4i32)],
        );
        assert_eq!(vec![12], ints(results));
    }

    #[test]
    fn converge() {
        let ex = make_seq_executor();
        let f = create_async_converge();

        let empty_body = create_async_value(Any::cloneable(true));
        let args = vec![Any::cloneable(empty_body.clone()), Any::cloneable(false)];
        assert!(run_async_fn(&ex, &f, args, vec![]).is_empty());
        let args = vec![Any::cloneable(empty_body), Any::cloneable(true)];
        assert!(run_async_fn(&ex, &f, args, vec![]).is_empty());

        // Counts up by one until the limit is reached.
        let body = to_async(vec![false, true], 2, |owned, borrowed| {
            let x = owned[0].downcast_ref::<i32>().unwrap();
            let limit = borrowed[0].downcast_ref::<i32>().unwrap();
            vec![Any::cloneable(x + 1 >= *limit), Any::cloneable(x + 1)]
        });

        let args = vec![
            Any::cloneable(body.clone()),
            Any::cloneable(false),
            Any::cloneable(5i32),
        ];
        let results = run_async_fn(&ex, &f, args, vec![Any::cloneable(10i32)]);
        assert_eq!(vec![10], ints(results));

        let args = vec![Any::cloneable(body), Any::cloneable(true), Any::cloneable(5i32)];
        let results = run_async_fn(&ex, &f, args, vec![Any::cloneable(10i32)]);
        assert_eq!(vec![5], ints(results));
    }

    #[test]
    fn curry_prepends_values() {
        let ex = make_seq_executor();
        let sum = to_async(vec![false, false], 1, |owned, _| {
            let x = owned[0].downcast_ref::<i32>().unwrap();
            let y = owned[1].downcast_ref::<i32>().unwrap();
            vec![Any::cloneable(x + y)]
        });
        let add5 = curry(sum, vec![Any::cloneable(5i32)]);
        assert_eq!(
            vec![8],
            ints(run_async_fn(&ex, &add5, vec![Any::cloneable(3i32)], vec![]))
        );
    }
}
