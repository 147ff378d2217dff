use std::sync::{Arc, Condvar, Mutex};
use std::task::{Wake, Waker};

use super::ContextShared;

/// Waker that queues a task index on its context's inbox.
///
/// May fire from any thread (pipe producers, resume grants). The index
/// lands in the inbox and is collected on the context's next turn.
struct TaskWaker {
    shared: Arc<ContextShared>,
    index: u32,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.shared.wake_task(self.index);
    }
}

/// Create a waker for the task at `index` on the given context.
pub(crate) fn task_waker(shared: Arc<ContextShared>, index: u32) -> Waker {
    Waker::from(Arc::new(TaskWaker { shared, index }))
}

/// Condvar-backed waker for [`block_on`](super::block_on).
///
/// The driving thread parks between polls; `wake` deposits a token and
/// `park` consumes it, so a wake that lands before the park is not lost.
pub(crate) struct Parker {
    woken: Mutex<bool>,
    unparked: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Parker {
            woken: Mutex::new(false),
            unparked: Condvar::new(),
        }
    }

    /// Block until a wake token arrives, then consume it.
    pub(crate) fn park(&self) {
        let mut woken = match self.woken.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*woken {
            woken = match self.unparked.wait(woken) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *woken = false;
    }
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut woken = match self.woken.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *woken = true;
        drop(woken);
        self.unparked.notify_all();
    }
}
