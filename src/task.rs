//! Lock-gated repeating function on a dedicated thread.
//!
//! A [`Task`] calls its function over and over on its own OS thread while it
//! is started. Every iteration runs with the task's lock held, normally the
//! stream lock of the pad the task drives. Anyone holding that lock knows
//! the function is not running, which is what makes [`Task::pause`] safe to
//! call at any point: once the caller owns the lock, the next iteration
//! re-checks the state before calling the function.
//!
//! # Usage errors
//!
//! - [`Task::start`] or [`Task::pause`] without a lock: rejected, no thread.
//! - [`Task::set_lock`] while the thread is alive: rejected, the thread may
//!   already be waiting on the old lock.
//! - [`Task::join`] from the task's own thread: rejected, it would deadlock.
//!
//! [`Task::stop`] needs no lock and never blocks.
//!
//! ```rust
//! use padflow::task::{Task, TaskState, StreamLock};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let counter = count.clone();
//! let task = Task::new("counter", move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     std::thread::yield_now();
//! });
//!
//! assert!(task.start().is_err()); // no lock yet
//! task.set_lock(StreamLock::default()).unwrap();
//! task.start().unwrap();
//! while count.load(Ordering::SeqCst) < 3 {
//!     std::thread::yield_now();
//! }
//! task.stop();
//! task.join().unwrap();
//! assert_eq!(task.state(), TaskState::Stopped);
//! ```

use crate::config::TaskConfig;
use crate::observability::span_task;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

/// Recursive lock shared between a task and the code controlling it.
pub type StreamLock = Arc<ReentrantMutex<()>>;

/// Run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The function is called repeatedly.
    Started,
    /// The thread is alive but idle.
    Paused,
    /// The thread exits after the current iteration.
    Stopped,
}

/// Task usage errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// `start` or `pause` without a lock.
    #[error("task '{0}' has no lock set")]
    NoLock(String),
    /// `set_lock` while the thread is alive.
    #[error("cannot set the lock of running task '{0}'")]
    LockAlreadySet(String),
    /// `join` called from inside the task function.
    #[error("task '{0}' cannot join itself")]
    JoinFromTaskThread(String),
    /// The task function panicked.
    #[error("task '{0}' panicked")]
    Panicked(String),
    /// The worker thread could not be created.
    #[error("failed to spawn thread for task '{name}': {reason}")]
    Spawn {
        /// Task name.
        name: String,
        /// OS error text.
        reason: String,
    },
}

type TaskFn = Box<dyn FnMut() + Send + 'static>;

struct Control {
    state: TaskState,
    lock: Option<StreamLock>,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
    /// Cleared by the worker, under this mutex, right before it exits.
    running: bool,
}

struct TaskInner {
    name: String,
    config: TaskConfig,
    func: Mutex<TaskFn>,
    control: Mutex<Control>,
    cond: Condvar,
}

/// Handle to a task. Clones refer to the same task.
#[derive(Clone)]
pub struct Task(Arc<TaskInner>);

impl Task {
    /// New stopped task calling `func`.
    pub fn new(name: impl Into<String>, func: impl FnMut() + Send + 'static) -> Self {
        Self::with_config(name, TaskConfig::default(), func)
    }

    /// New stopped task with explicit thread settings.
    pub fn with_config(
        name: impl Into<String>,
        config: TaskConfig,
        func: impl FnMut() + Send + 'static,
    ) -> Self {
        Self(Arc::new(TaskInner {
            name: name.into(),
            config,
            func: Mutex::new(Box::new(func)),
            control: Mutex::new(Control {
                state: TaskState::Stopped,
                lock: None,
                thread: None,
                thread_id: None,
                running: false,
            }),
            cond: Condvar::new(),
        }))
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.0.control.lock().state
    }

    /// The lock held around each iteration.
    pub fn lock(&self) -> Option<StreamLock> {
        self.0.control.lock().lock.clone()
    }

    /// Set the lock held around each iteration.
    ///
    /// Must happen before the first `start`/`pause`, or after the thread was joined.
    pub fn set_lock(&self, lock: StreamLock) -> Result<(), TaskError> {
        let mut control = self.0.control.lock();
        if control.running {
            warn!(task = %self.0.name, "cannot call set_lock on a running task");
            return Err(TaskError::LockAlreadySet(self.0.name.clone()));
        }
        control.lock = Some(lock);
        Ok(())
    }

    /// Start calling the function. Returns without waiting for the first iteration.
    pub fn start(&self) -> Result<(), TaskError> {
        self.set_state(TaskState::Started)
    }

    /// Stop calling the function but keep the thread.
    ///
    /// The iteration in progress, if any, completes first. Callers that need
    /// to know it has completed take the task's lock afterwards.
    pub fn pause(&self) -> Result<(), TaskError> {
        self.set_state(TaskState::Paused)
    }

    /// Let the thread exit after the current iteration. Never blocks.
    pub fn stop(&self) {
        let mut control = self.0.control.lock();
        if control.state != TaskState::Stopped {
            debug!(task = %self.0.name, from = ?control.state, "stopping task");
        }
        control.state = TaskState::Stopped;
        self.0.cond.notify_all();
    }

    /// Stop the task and wait for its thread to exit.
    pub fn join(&self) -> Result<(), TaskError> {
        let handle = {
            let mut control = self.0.control.lock();
            if control.thread_id == Some(thread::current().id()) && control.running {
                warn!(task = %self.0.name, "task tried to join itself");
                return Err(TaskError::JoinFromTaskThread(self.0.name.clone()));
            }
            control.state = TaskState::Stopped;
            self.0.cond.notify_all();
            control.thread.take()
        };

        let Some(handle) = handle else {
            return Ok(());
        };
        let joined = handle.join();
        self.0.control.lock().thread_id = None;
        if joined.is_err() {
            warn!(task = %self.0.name, "task thread panicked");
            return Err(TaskError::Panicked(self.0.name.clone()));
        }
        debug!(task = %self.0.name, "task joined");
        Ok(())
    }

    /// Whether the caller is running on this task's thread.
    pub fn is_current_thread(&self) -> bool {
        let control = self.0.control.lock();
        control.running && control.thread_id == Some(thread::current().id())
    }

    fn set_state(&self, state: TaskState) -> Result<(), TaskError> {
        let mut control = self.0.control.lock();
        if control.lock.is_none() {
            warn!(task = %self.0.name, ?state, "task has no lock set");
            return Err(TaskError::NoLock(self.0.name.clone()));
        }
        if control.state == state {
            return Ok(());
        }

        debug!(task = %self.0.name, from = ?control.state, to = ?state, "task state change");
        control.state = state;

        if !control.running {
            // A thread that saw Stopped and exited is reaped before spawning again.
            if let Some(old) = control.thread.take() {
                if old.join().is_err() {
                    warn!(task = %self.0.name, "previous task thread panicked");
                }
            }
            let inner = self.0.clone();
            let mut builder = thread::Builder::new().name(self.0.config.thread_name(&self.0.name));
            if let Some(size) = self.0.config.stack_size {
                builder = builder.stack_size(size);
            }
            match builder.spawn(move || run(inner)) {
                Ok(handle) => {
                    control.thread_id = Some(handle.thread().id());
                    control.thread = Some(handle);
                    control.running = true;
                }
                Err(e) => {
                    control.state = TaskState::Stopped;
                    warn!(task = %self.0.name, error = %e, "failed to spawn task thread");
                    return Err(TaskError::Spawn {
                        name: self.0.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.0.cond.notify_all();
        Ok(())
    }
}

/// Leaves the task stopped and restartable when the function panics.
struct PanicGuard<'a>(&'a TaskInner);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut control = self.0.control.lock();
        control.running = false;
        control.state = TaskState::Stopped;
        self.0.cond.notify_all();
        warn!(task = %self.0.name, "task function panicked, task stopped");
    }
}

fn run(inner: Arc<TaskInner>) {
    let _span = span_task(&inner.name).entered();
    let _panic = PanicGuard(&inner);
    trace!("task thread entered");
    loop {
        let lock = {
            let mut control = inner.control.lock();
            while control.state == TaskState::Paused {
                inner.cond.wait(&mut control);
            }
            if control.state == TaskState::Stopped {
                control.running = false;
                break;
            }
            control.lock.clone()
        };
        let Some(lock) = lock else {
            inner.control.lock().running = false;
            break;
        };

        let _stream = lock.lock();
        if inner.control.lock().state != TaskState::Started {
            continue;
        }
        let mut func = inner.func.lock();
        (func)();
    }
    trace!("task thread exiting");
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.0.name)
            .field("state", &self.state())
            .finish()
    }
}
