//! One-shot completion signal with `then`-style continuations.
//!
//! The library owns no threads: continuations run on whatever thread
//! completed the promise unless an [`Executor`] is supplied, in which case
//! the job is handed to it. [`InitHandle`] additionally implements
//! [`Future`], so hosts running an async runtime can simply await it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex};

/// Host-supplied execution context for continuation delivery.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

impl<F> Executor for F
where
    F: Fn(Box<dyn FnOnce() + Send>) + Send + Sync,
{
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        self(job)
    }
}

type Callback<T> = Box<dyn FnOnce(T) + Send>;

struct State<T> {
    value: Option<T>,
    callbacks: Vec<(Callback<T>, Option<Arc<dyn Executor>>)>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// The completing side. Completes exactly once; later calls are ignored.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The subscribing side, cloneable and shareable across threads.
pub struct InitHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    value: None,
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> InitHandle<T> {
        InitHandle {
            shared: self.shared.clone(),
        }
    }

    /// Resolves the promise. The first call wins; continuations registered
    /// before completion run now, in registration order.
    pub fn complete(&self, value: T) {
        let (callbacks, wakers) = {
            let mut state = self.shared.state.lock();
            if state.value.is_some() {
                return;
            }
            state.value = Some(value.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };
        self.shared.ready.notify_all();
        for (callback, executor) in callbacks {
            dispatch(executor, callback, value.clone());
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InitHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> InitHandle<T> {
    /// Attaches a continuation, run at (or immediately after) completion on
    /// the completing thread.
    pub fn then(&self, f: impl FnOnce(T) + Send + 'static) {
        self.attach(None, Box::new(f));
    }

    /// Like [`then`](Self::then), but the continuation is handed to
    /// `executor` instead of running inline.
    pub fn then_via(&self, executor: Arc<dyn Executor>, f: impl FnOnce(T) + Send + 'static) {
        self.attach(Some(executor), Box::new(f));
    }

    fn attach(&self, executor: Option<Arc<dyn Executor>>, callback: Callback<T>) {
        let value = {
            let mut state = self.shared.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.callbacks.push((callback, executor));
                    return;
                }
            }
        };
        dispatch(executor, callback, value);
    }

    /// Returns the value if the promise has completed.
    pub fn try_get(&self) -> Option<T> {
        self.shared.state.lock().value.clone()
    }

    /// Blocks the calling thread until completion.
    pub fn wait(&self) -> T {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = &state.value {
                return value.clone();
            }
            self.shared.ready.wait(&mut state);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future for InitHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.shared.state.lock();
        match &state.value {
            Some(value) => Poll::Ready(value.clone()),
            None => {
                state.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

fn dispatch<T: Send + 'static>(
    executor: Option<Arc<dyn Executor>>,
    callback: Callback<T>,
    value: T,
) {
    match executor {
        Some(executor) => executor.execute(Box::new(move || callback(value))),
        None => callback(value),
    }
}
