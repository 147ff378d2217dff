//! Cooperative executor and the affinity contract.
//!
//! One [`AffinityContext`] owns a slab of tasks and is driven from exactly
//! one thread at a time. [`Affinity`] is the cloneable handle other threads
//! hold: it schedules work onto the context ([`post`](Affinity::post),
//! [`spawn`](Affinity::spawn)) and asserts placement
//! ([`is_current`](Affinity::is_current),
//! [`await_affinity`](Affinity::await_affinity)).
//!
//! Mutable transport state (buffer aggregates, decoder state, connection
//! tables) is never locked. Every operation that touches it first proves it
//! is running on the owning context; an operation that resumes anywhere
//! else fails with [`StreamError::AffinityViolation`] and must not be
//! retried.
//!
//! The executor is drivable without any dedicated thread: tests and
//! embedders call [`AffinityContext::turn`] or
//! [`AffinityContext::run_until`] directly, which makes the calling thread
//! the context for the duration of the call. [`ContextBuilder`] is the
//! production path and runs the context on its own named thread.

pub(crate) mod task;
pub(crate) mod waker;

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::thread;

use crate::config::ContextConfig;
use crate::error::StreamError;
use crate::metrics;

use self::task::{BoxFuture, TaskSlab};
use self::waker::{Parker, task_waker};

pub use self::task::TaskId;

thread_local! {
    /// Id of the context currently polling on this thread. Zero while the
    /// thread is not inside a turn.
    static CURRENT_AFFINITY: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Inbox index reserved for the root future driven by `run_until`.
const ROOT_TASK: u32 = u32::MAX;

// ── Shared state ─────────────────────────────────────────────────

/// Work posted to a context from other threads or from its own tasks.
enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Spawn(task::SendBoxFuture),
}

struct Inbox {
    /// Task indices whose wakers fired. `ROOT_TASK` marks the root future.
    ready: VecDeque<u32>,
    jobs: Vec<Job>,
    shutdown: bool,
}

pub(crate) struct ContextShared {
    id: u64,
    inbox: Mutex<Inbox>,
    /// Signalled whenever the inbox gains work or shutdown is requested.
    stirred: Condvar,
}

impl ContextShared {
    pub(crate) fn new(id: u64) -> Self {
        ContextShared {
            id,
            inbox: Mutex::new(Inbox {
                ready: VecDeque::new(),
                jobs: Vec::new(),
                shutdown: false,
            }),
            stirred: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inbox> {
        match self.inbox.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue a task index for polling and stir the owning thread.
    pub(crate) fn wake_task(&self, index: u32) {
        let mut inbox = self.lock();
        inbox.ready.push_back(index);
        drop(inbox);
        self.stirred.notify_all();
    }

    fn push_job(&self, job: Job) {
        let mut inbox = self.lock();
        inbox.jobs.push(job);
        drop(inbox);
        self.stirred.notify_all();
    }

    fn request_shutdown(&self) {
        let mut inbox = self.lock();
        inbox.shutdown = true;
        drop(inbox);
        self.stirred.notify_all();
    }
}

// ── Executor ─────────────────────────────────────────────────────

/// Single-threaded cooperative executor owning a slab of tasks.
///
/// Many logical operations interleave on one thread, suspending at pipe
/// reads, affinity hops, and handshake completions. The context itself
/// never crosses threads; cross-thread interaction goes through the
/// [`Affinity`] handle.
pub struct AffinityContext {
    shared: Arc<ContextShared>,
    tasks: TaskSlab,
    /// Indices ready to poll this turn.
    run_queue: VecDeque<u32>,
}

impl AffinityContext {
    /// Create a context with the given task capacity.
    pub fn new(config: &ContextConfig) -> Self {
        Self::with_id(config, NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    fn with_id(config: &ContextConfig, id: u64) -> Self {
        metrics::CONTEXTS_ACTIVE.increment();
        AffinityContext {
            shared: Arc::new(ContextShared::new(id)),
            tasks: TaskSlab::new(config.task_capacity),
            run_queue: VecDeque::with_capacity(64),
        }
    }

    /// Context id, unique within the process.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Handle for scheduling work onto this context from any thread.
    pub fn affinity(&self) -> Affinity {
        Affinity {
            shared: self.shared.clone(),
        }
    }

    /// Spawn a task owned by this context. It is polled on the next turn.
    pub fn spawn<F>(&mut self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = self.tasks.spawn(Box::pin(future));
        metrics::TASKS_SPAWNED.increment();
        self.run_queue.push_back(id.0);
        id
    }

    /// Drain posted jobs and fired wakers, then poll every ready task.
    ///
    /// The calling thread is the context for the duration of the call.
    /// Returns the number of jobs run plus tasks polled.
    pub fn turn(&mut self) -> usize {
        let _enter = self.enter();
        let mut root_woken = false;
        self.turn_inner(&mut root_woken)
    }

    /// Drive `future` to completion on this context, turning spawned
    /// tasks as they become ready. The calling thread parks when nothing
    /// is runnable.
    pub fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        let _enter = self.enter();
        let mut future = std::pin::pin!(future);
        let root_waker = task_waker(self.shared.clone(), ROOT_TASK);
        let mut poll_root = true;
        loop {
            if poll_root {
                poll_root = false;
                let mut cx = Context::from_waker(&root_waker);
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            self.turn_inner(&mut poll_root);
            if poll_root {
                continue;
            }
            // Nothing runnable: park until a waker or job arrives.
            let mut inbox = self.shared.lock();
            while inbox.ready.is_empty() && inbox.jobs.is_empty() {
                inbox = match self.shared.stirred.wait(inbox) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }
    }

    /// Run turns until shutdown is requested, parking between turns.
    ///
    /// Queued jobs and fired wakers are drained before the loop exits;
    /// tasks still parked at shutdown are dropped.
    pub fn run(&mut self) {
        let _enter = self.enter();
        let mut root_woken = false;
        loop {
            self.turn_inner(&mut root_woken);
            let mut inbox = self.shared.lock();
            while inbox.ready.is_empty() && inbox.jobs.is_empty() && !inbox.shutdown {
                inbox = match self.shared.stirred.wait(inbox) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            if inbox.shutdown && inbox.ready.is_empty() && inbox.jobs.is_empty() {
                return;
            }
        }
    }

    /// Mark this thread as the context until the guard drops.
    fn enter(&self) -> EnterGuard {
        let previous = CURRENT_AFFINITY.with(|c| c.replace(self.shared.id));
        EnterGuard { previous }
    }

    /// One scheduling pass: collect inbox work, then poll ready tasks.
    /// Wakes fired during polling land back in the inbox and are picked
    /// up on the next pass.
    fn turn_inner(&mut self, poll_root: &mut bool) -> usize {
        let mut progressed = 0;

        let jobs = {
            let mut inbox = self.shared.lock();
            while let Some(index) = inbox.ready.pop_front() {
                if index == ROOT_TASK {
                    *poll_root = true;
                } else if self.tasks.wake(index) {
                    self.run_queue.push_back(index);
                }
            }
            std::mem::take(&mut inbox.jobs)
        };
        for job in jobs {
            match job {
                Job::Run(f) => f(),
                Job::Spawn(future) => {
                    let id = self.tasks.spawn(future);
                    metrics::TASKS_SPAWNED.increment();
                    self.run_queue.push_back(id.0);
                }
            }
            progressed += 1;
        }

        while let Some(index) = self.run_queue.pop_front() {
            let Some(mut future) = self.tasks.take_ready(index) else {
                continue;
            };
            let waker = task_waker(self.shared.clone(), index);
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => self.tasks.remove(index),
                Poll::Pending => self.tasks.park(index, future),
            }
            progressed += 1;
        }
        progressed
    }
}

impl Drop for AffinityContext {
    fn drop(&mut self) {
        metrics::CONTEXTS_ACTIVE.decrement();
    }
}

struct EnterGuard {
    previous: u64,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_AFFINITY.with(|c| c.set(self.previous));
    }
}

// ── Affinity handle ──────────────────────────────────────────────

/// Cloneable cross-thread handle to an [`AffinityContext`].
#[derive(Clone)]
pub struct Affinity {
    shared: Arc<ContextShared>,
}

impl Affinity {
    /// Id of the context this handle targets.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// True iff the calling thread is currently inside a turn of this
    /// handle's context.
    pub fn is_current(&self) -> bool {
        CURRENT_AFFINITY.with(|c| c.get()) == self.shared.id
    }

    /// Schedule a closure to run on the context without suspending the
    /// caller. It runs during the context's next turn.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_current() {
            metrics::CROSS_POSTS.increment();
        }
        self.shared.push_job(Job::Run(Box::new(job)));
    }

    /// Spawn a task onto the context from any thread.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_current() {
            metrics::CROSS_POSTS.increment();
        }
        self.shared.push_job(Job::Spawn(Box::pin(future)));
    }

    /// Resolve once the calling operation is running on this context.
    ///
    /// Completes synchronously when already current. Otherwise the caller
    /// suspends and a resume grant is queued on the context; if the
    /// operation is then resumed anywhere other than the owning context,
    /// the hop fails with [`StreamError::AffinityViolation`].
    pub fn await_affinity(&self) -> Hop {
        Hop {
            affinity: self.clone(),
            grant: None,
            violated: false,
        }
    }
}

// ── Affinity hop ─────────────────────────────────────────────────

struct HopGrant {
    /// Set by the grant job when it runs on the target context.
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl HopGrant {
    fn waker_slot(&self) -> MutexGuard<'_, Option<Waker>> {
        match self.waker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Future returned by [`Affinity::await_affinity`].
pub struct Hop {
    affinity: Affinity,
    grant: Option<Arc<HopGrant>>,
    violated: bool,
}

impl Future for Hop {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.affinity.is_current() {
            return Poll::Ready(Ok(()));
        }
        match &this.grant {
            None => {
                let grant = Arc::new(HopGrant {
                    fired: AtomicBool::new(false),
                    waker: Mutex::new(Some(cx.waker().clone())),
                });
                let fire = grant.clone();
                this.affinity.post(move || {
                    fire.fired.store(true, Ordering::Release);
                    if let Some(waker) = fire.waker_slot().take() {
                        waker.wake();
                    }
                });
                this.grant = Some(grant);
                Poll::Pending
            }
            Some(grant) if grant.fired.load(Ordering::Acquire) => {
                // The grant ran on the context, yet we were polled
                // somewhere else. Unsynchronized access may already have
                // happened; fail the operation.
                if !this.violated {
                    this.violated = true;
                    metrics::AFFINITY_VIOLATIONS.increment();
                }
                Poll::Ready(Err(StreamError::AffinityViolation))
            }
            Some(grant) => {
                *grant.waker_slot() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

// ── Dedicated context threads ────────────────────────────────────

/// Builder for a context running on its own named thread.
///
/// The context is created on the spawned thread, so it never crosses a
/// thread boundary. The returned [`ContextHandle`] carries the context's
/// [`Affinity`] and joins the thread on shutdown.
#[derive(Default)]
pub struct ContextBuilder {
    config: ContextConfig,
    name: Option<String>,
}

impl ContextBuilder {
    /// Create a builder with default context settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from an existing [`ContextConfig`].
    pub fn from_config(config: &ContextConfig) -> Self {
        ContextBuilder {
            config: config.clone(),
            name: None,
        }
    }

    /// Thread name. Defaults to `wireline-ctx-<id>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn the context thread and return its handle.
    pub fn spawn(self) -> Result<ContextHandle, StreamError> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name = self.name.unwrap_or_else(|| format!("wireline-ctx-{id}"));
        let config = self.config;
        let (tx, rx) = crossbeam_channel::bounded(1);

        let join = thread::Builder::new().name(name).spawn(move || {
            let mut context = AffinityContext::with_id(&config, id);
            if tx.send(context.affinity()).is_err() {
                return;
            }
            context.run();
        })?;

        let affinity = rx
            .recv()
            .map_err(|_| StreamError::Io(io::Error::other("context thread exited during startup")))?;

        Ok(ContextHandle {
            affinity,
            join: Some(join),
        })
    }
}

/// Handle to a context running on its own thread.
pub struct ContextHandle {
    affinity: Affinity,
    join: Option<thread::JoinHandle<()>>,
}

impl ContextHandle {
    /// Handle for scheduling work onto the context.
    pub fn affinity(&self) -> Affinity {
        self.affinity.clone()
    }

    /// Request shutdown and join the context thread. Queued work is
    /// drained before the thread exits.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.affinity.shared.request_shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

// ── Plain-thread driver ──────────────────────────────────────────

/// Drive a future to completion on the current thread, outside any
/// context. Producer threads and tests use this; context-owned work goes
/// through [`AffinityContext::run_until`] instead.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let parker = Arc::new(Parker::new());
    let waker = Waker::from(parker.clone());
    let mut cx = Context::from_waker(&waker);
    let mut future = std::pin::pin!(future);
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        parker.park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;

    struct Flag(AtomicBool);

    impl Flag {
        fn new() -> Arc<Self> {
            Arc::new(Flag(AtomicBool::new(false)))
        }

        fn take(&self) -> bool {
            self.0.swap(false, Ordering::SeqCst)
        }
    }

    impl std::task::Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Future that pends once, waking itself, then resolves.
    struct Yield(bool);

    impl Future for Yield {
        type Output = ();
        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    /// Counts how many times the inner future is polled.
    struct CountPolls<F> {
        inner: F,
        polls: Rc<Cell<u32>>,
    }

    impl<F: Future + Unpin> Future for CountPolls<F> {
        type Output = F::Output;
        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
            let this = self.get_mut();
            this.polls.set(this.polls.get() + 1);
            Pin::new(&mut this.inner).poll(cx)
        }
    }

    #[test]
    fn run_until_returns_root_output() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        assert_eq!(ctx.run_until(async { 7 }), 7);
    }

    #[test]
    fn spawn_and_turn_runs_task() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let ran = Rc::new(Cell::new(false));
        let task_ran = ran.clone();
        ctx.spawn(async move {
            task_ran.set(true);
        });
        assert!(ctx.turn() > 0);
        assert!(ran.get());
        assert_eq!(ctx.turn(), 0);
    }

    #[test]
    fn run_until_drives_spawned_tasks() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let value = Rc::new(Cell::new(0));
        let task_value = value.clone();
        ctx.spawn(async move {
            task_value.set(42);
        });
        ctx.run_until(Yield(false));
        assert_eq!(value.get(), 42);
    }

    #[test]
    fn contexts_get_distinct_ids() {
        let a = AffinityContext::new(&ContextConfig::default());
        let b = AffinityContext::new(&ContextConfig::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn is_current_only_inside_turns() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let affinity = ctx.affinity();
        assert!(!affinity.is_current());

        let probe = affinity.clone();
        assert!(ctx.run_until(async move { probe.is_current() }));
        assert!(!affinity.is_current());
    }

    #[test]
    fn hop_on_context_completes_synchronously() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let affinity = ctx.affinity();
        let polls = Rc::new(Cell::new(0));
        let hop = CountPolls {
            inner: affinity.await_affinity(),
            polls: polls.clone(),
        };

        let result = ctx.run_until(async move { hop.await });
        assert!(result.is_ok());
        assert_eq!(polls.get(), 1);
    }

    #[test]
    fn hop_off_context_resumes_on_the_context() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let affinity = ctx.affinity();
        let mut hop = affinity.await_affinity();

        let waker = Waker::from(Flag::new());
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut hop).poll(&mut cx).is_pending());

        // Rescheduled onto the context: the hop completes there.
        let result = ctx.run_until(async move { hop.await });
        assert!(result.is_ok());
    }

    #[test]
    fn hop_resumed_off_context_fails() {
        let mut ctx = AffinityContext::new(&ContextConfig::default());
        let affinity = ctx.affinity();
        let mut hop = affinity.await_affinity();

        let flag = Flag::new();
        let waker = Waker::from(flag.clone());
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut hop).poll(&mut cx).is_pending());

        // The context runs the resume grant and fires our waker.
        assert!(ctx.turn() > 0);
        assert!(flag.take());

        // Re-polled off the context: the contract is broken.
        match Pin::new(&mut hop).poll(&mut cx) {
            Poll::Ready(Err(err)) => assert!(err.is_fatal()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builder_runs_posted_jobs_on_named_thread() {
        let handle = ContextBuilder::new().spawn().unwrap();
        let affinity = handle.affinity();
        assert!(!affinity.is_current());

        let (tx, rx) = crossbeam_channel::bounded(1);
        affinity.post(move || {
            let name = thread::current().name().map(String::from);
            tx.send(name).ok();
        });
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("wireline-ctx-"));
        handle.shutdown();
    }

    #[test]
    fn builder_honors_custom_thread_name() {
        let handle = ContextBuilder::new().name("frame-loop").spawn().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.affinity().post(move || {
            tx.send(thread::current().name().map(String::from)).ok();
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("frame-loop"));
        handle.shutdown();
    }

    #[test]
    fn cross_thread_spawn_lands_on_the_context() {
        let handle = ContextBuilder::new().spawn().unwrap();
        let affinity = handle.affinity();
        let probe = affinity.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        affinity.spawn(async move {
            tx.send(probe.is_current()).ok();
        });
        assert!(rx.recv().unwrap());
        handle.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let handle = ContextBuilder::new().spawn().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.affinity().post(move || {
            tx.send(()).ok();
        });
        handle.shutdown();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn block_on_drives_self_waking_futures() {
        assert_eq!(block_on(async { 5 }), 5);
        block_on(async {
            Yield(false).await;
            Yield(false).await;
        });
    }
}
