use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send>;

/// Schedules nullary tasks. Tasks are non-preemptive and run to completion
/// once started; cross-task waiting is expressed through future
/// continuations, never by blocking inside scheduled work.
pub trait Executor: Send + Sync + 'static {
    fn enqueue(&self, task: Task);
}

/// Cloneable handle to an executor. The underlying executor lives until the
/// last handle is dropped, so tasks holding a handle keep it alive.
#[derive(Clone)]
pub struct ExecutorRef(Arc<dyn Executor>);

impl ExecutorRef {
    pub fn new(executor: impl Executor) -> Self {
        Self(Arc::new(executor))
    }

    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        self.0.enqueue(Box::new(task));
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Single-threaded run-queue. Enqueued tasks are drained in FIFO order by
/// whichever thread first finds the queue idle; tasks enqueued while
/// draining join the same drain loop, which gives the same ordering
/// guarantees as the task executor without any worker threads.
struct SeqExecutor {
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
}

impl Executor for SeqExecutor {
    fn enqueue(&self, task: Task) {
        self.queue.lock().unwrap().push_back(task);

        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.queue.lock().unwrap().pop_front();
                match next {
                    Some(task) => task(),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            // A task enqueued between the final pop and the flag reset
            // would otherwise be stranded.
            if self.queue.lock().unwrap().is_empty() {
                return;
            }
        }
    }
}

pub fn make_seq_executor() -> ExecutorRef {
    ExecutorRef::new(SeqExecutor {
        queue: Mutex::new(VecDeque::new()),
        draining: AtomicBool::new(false),
    })
}

#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    done: Condvar,
}

impl Inflight {
    fn increment(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.done.wait(count).unwrap();
        }
    }
}

struct DecrementGuard(Arc<Inflight>);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Work-stealing task executor backed by a tokio multi-thread runtime.
struct TaskExecutor {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: tokio::runtime::Handle,
    inflight: Arc<Inflight>,
}

impl Executor for TaskExecutor {
    fn enqueue(&self, task: Task) {
        self.inflight.increment();
        let guard = DecrementGuard(Arc::clone(&self.inflight));
        self.handle.spawn(async move {
            let _guard = guard;
            task();
        });
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        let runtime = self.runtime.lock().unwrap().take();
        let Some(runtime) = runtime else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            // The final handle was dropped from inside a worker task; the
            // runtime cannot be waited on from its own thread.
            runtime.shutdown_background();
        } else {
            self.inflight.wait_idle();
            drop(runtime);
        }
    }
}

pub fn make_task_executor(threads: usize) -> ExecutorRef {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("ooze-worker")
        .build()
        .expect("failed to start task executor runtime");
    tracing::debug!(threads, "task executor started");
    let handle = runtime.handle().clone();
    ExecutorRef::new(TaskExecutor {
        runtime: Mutex::new(Some(runtime)),
        handle,
        inflight: Arc::new(Inflight::default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn executor_ref_count() {
        let ex = make_seq_executor();

        let er1 = ex.clone();
        let er2 = ex.clone();
        assert_eq!(3, ex.ref_count());

        let er_copy = er1.clone();
        assert_eq!(4, ex.ref_count());

        drop(er2);
        drop(er_copy);
        assert_eq!(2, ex.ref_count());

        drop(er1);
        assert_eq!(1, ex.ref_count());
    }

    #[test]
    fn seq_executor_runs_in_fifo_order() {
        let ex = make_seq_executor();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (o1, o2) = (order.clone(), order.clone());
        let ex2 = ex.clone();
        ex.enqueue(move || {
            o1.lock().unwrap().push(1);
            let o3 = o2.clone();
            ex2.enqueue(move || o3.lock().unwrap().push(3));
            o2.lock().unwrap().push(2);
        });

        assert_eq!(vec![1, 2, 3], *order.lock().unwrap());
    }

    #[test]
    fn task_executor_drains_before_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let ex = make_task_executor(4);
            for _ in 0..100 {
                let count = count.clone();
                ex.enqueue(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(100, count.load(Ordering::SeqCst));
    }
}
