use std::future::Future;
use std::pin::Pin;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;
pub(crate) type SendBoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque handle for a task spawned onto a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) u32);

/// State of a single task slot.
enum TaskSlot {
    /// Slot is empty (no task).
    Empty,
    /// Task is parked (waiting for a wakeup).
    Parked(BoxFuture),
    /// Task is ready to be polled.
    Ready(BoxFuture),
}

/// Slab of async tasks with a free list for O(1) allocate/release.
///
/// Starts at the configured capacity and grows on demand. Slot indices
/// are reused after removal; a stale waker holding a reused index causes
/// at most one spurious poll.
pub(crate) struct TaskSlab {
    tasks: Vec<TaskSlot>,
    free_list: Vec<u32>,
}

impl TaskSlab {
    /// Create a slab with `capacity` pre-allocated slots.
    pub(crate) fn new(capacity: usize) -> Self {
        let mut tasks = Vec::with_capacity(capacity);
        let mut free_list = Vec::with_capacity(capacity);
        for i in 0..capacity {
            tasks.push(TaskSlot::Empty);
            free_list.push(i as u32);
        }
        TaskSlab { tasks, free_list }
    }

    /// Spawn a task. The slot is immediately Ready for its first poll.
    pub(crate) fn spawn(&mut self, future: BoxFuture) -> TaskId {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                let index = self.tasks.len() as u32;
                self.tasks.push(TaskSlot::Empty);
                index
            }
        };
        self.tasks[index as usize] = TaskSlot::Ready(future);
        TaskId(index)
    }

    /// Take a Ready task out for polling. Returns None if the slot is
    /// not in the Ready state.
    pub(crate) fn take_ready(&mut self, index: u32) -> Option<BoxFuture> {
        let idx = index as usize;
        if idx >= self.tasks.len() {
            return None;
        }
        match std::mem::replace(&mut self.tasks[idx], TaskSlot::Empty) {
            TaskSlot::Ready(fut) => Some(fut),
            other => {
                // Put it back — was not Ready.
                self.tasks[idx] = other;
                None
            }
        }
    }

    /// Park a task back after it returned Poll::Pending.
    pub(crate) fn park(&mut self, index: u32, future: BoxFuture) {
        let idx = index as usize;
        debug_assert!(idx < self.tasks.len());
        self.tasks[idx] = TaskSlot::Parked(future);
    }

    /// Mark a Parked task as Ready (called when its waker fires).
    /// Returns true if the task was parked and is now ready.
    pub(crate) fn wake(&mut self, index: u32) -> bool {
        let idx = index as usize;
        if idx >= self.tasks.len() {
            return false;
        }
        match std::mem::replace(&mut self.tasks[idx], TaskSlot::Empty) {
            TaskSlot::Parked(fut) => {
                self.tasks[idx] = TaskSlot::Ready(fut);
                true
            }
            TaskSlot::Ready(fut) => {
                // Already ready — put it back.
                self.tasks[idx] = TaskSlot::Ready(fut);
                false
            }
            TaskSlot::Empty => false,
        }
    }

    /// Remove a completed task, returning its slot to the free list.
    pub(crate) fn remove(&mut self, index: u32) {
        let idx = index as usize;
        if idx < self.tasks.len() {
            self.tasks[idx] = TaskSlot::Empty;
            self.free_list.push(index);
        }
    }

    /// Check if a task exists at the given index.
    #[cfg(test)]
    pub(crate) fn has_task(&self, index: u32) -> bool {
        let idx = index as usize;
        idx < self.tasks.len() && !matches!(self.tasks[idx], TaskSlot::Empty)
    }
}
