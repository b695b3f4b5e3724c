//! Task handles, completion signals, and the terminal-state cell behind them.
//!
//! Each process owns one [`TerminalCell`]: it starts out running and is
//! settled exactly once, by the interpreter, when the routine returns or
//! fails. Handles and completions only ever hold a read-only [`TerminalView`].

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::effect::Function;
use crate::error::{ProcError, Result};
use crate::value::Value;

/// Unique identifier of a forked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
enum Terminal {
    #[default]
    Running,
    Returned(Value),
    Failed(ProcError),
}

/// Single-writer terminal state of one process.
#[derive(Default)]
pub(crate) struct TerminalCell(Rc<RefCell<Terminal>>);

impl TerminalCell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the outcome. Only the first call has any effect.
    pub(crate) fn settle(&self, outcome: &Result<Value>) {
        let mut state = self.0.borrow_mut();
        debug_assert!(matches!(*state, Terminal::Running), "process settled twice");
        if matches!(*state, Terminal::Running) {
            *state = match outcome {
                Ok(value) => Terminal::Returned(value.clone()),
                Err(error) => Terminal::Failed(error.clone()),
            };
        }
    }

    pub(crate) fn view(&self) -> TerminalView {
        TerminalView(Rc::clone(&self.0))
    }
}

/// Read-only view of a process's terminal state.
#[derive(Clone)]
pub struct TerminalView(Rc<RefCell<Terminal>>);

impl TerminalView {
    pub fn is_running(&self) -> bool {
        matches!(*self.0.borrow(), Terminal::Running)
    }

    /// The returned value, once the process has returned.
    pub fn result(&self) -> Option<Value> {
        match &*self.0.borrow() {
            Terminal::Returned(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The terminal error, once the process has failed.
    pub fn error(&self) -> Option<ProcError> {
        match &*self.0.borrow() {
            Terminal::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Either outcome, once settled.
    pub fn outcome(&self) -> Option<Result<Value>> {
        match &*self.0.borrow() {
            Terminal::Running => None,
            Terminal::Returned(value) => Some(Ok(value.clone())),
            Terminal::Failed(error) => Some(Err(error.clone())),
        }
    }
}

impl fmt::Debug for TerminalView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TerminalView").field(&*self.0.borrow()).finish()
    }
}

/// One-shot eventual outcome of a process.
///
/// Cloning is cheap and every clone settles with the same outcome. Awaiting
/// it never drives the process; the interpreter does that on its own.
#[derive(Clone)]
pub struct Completion {
    inner: Shared<LocalBoxFuture<'static, Result<Value>>>,
    state: TerminalView,
}

impl Completion {
    /// A completion paired with the sender that settles it.
    pub(crate) fn pair(state: TerminalView) -> (oneshot::Sender<Result<Value>>, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = rx
            .map(|received| received.unwrap_or(Err(ProcError::Abandoned)))
            .boxed_local()
            .shared();
        (tx, Self { inner, state })
    }

    /// The outcome, if the process has already settled.
    pub fn peek(&self) -> Option<Result<Value>> {
        self.state.outcome()
    }

    pub fn is_settled(&self) -> bool {
        !self.state.is_running()
    }

    pub fn state(&self) -> &TerminalView {
        &self.state
    }
}

impl Future for Completion {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &self.state)
            .finish()
    }
}

/// Record of a forked process.
///
/// Shared between the forking process, which may `Join` it, and the child's
/// interpreter, which settles it once.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Rc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    name: String,
    generator: Option<Function>,
    spawned_at: DateTime<Utc>,
    done: Completion,
}

impl TaskHandle {
    pub(crate) fn new(name: impl Into<String>, generator: Option<Function>, done: Completion) -> Self {
        Self {
            inner: Rc::new(TaskInner {
                id: TaskId::new(),
                name: name.into(),
                generator,
                spawned_at: Utc::now(),
                done,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Name of the forked function, or `"anonymous"`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The function that produced the child routine, when there was one.
    pub fn generator(&self) -> Option<&Function> {
        self.inner.generator.as_ref()
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.inner.spawned_at
    }

    pub fn is_running(&self) -> bool {
        self.inner.done.state().is_running()
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.done.state().result()
    }

    pub fn error(&self) -> Option<ProcError> {
        self.inner.done.state().error()
    }

    /// The child's completion signal.
    pub fn completion(&self) -> Completion {
        self.inner.done.clone()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_terminal_cell_settles_once() {
        let cell = TerminalCell::new();
        let view = cell.view();
        assert!(view.is_running());
        assert!(view.outcome().is_none());

        cell.settle(&Ok(Value::from(7)));

        assert!(!view.is_running());
        assert_eq!(view.result(), Some(Value::from(7)));
        assert!(view.error().is_none());
    }

    #[test]
    fn test_completion_resolves_every_clone() {
        let cell = TerminalCell::new();
        let (tx, completion) = Completion::pair(cell.view());
        let other = completion.clone();

        cell.settle(&Ok(Value::from("done")));
        tx.send(Ok(Value::from("done"))).unwrap();

        assert_eq!(completion.peek().unwrap().unwrap(), Value::from("done"));
        assert_eq!(
            completion.now_or_never().unwrap().unwrap(),
            Value::from("done")
        );
        assert_eq!(other.now_or_never().unwrap().unwrap(), Value::from("done"));
    }

    #[test]
    fn test_dropped_sender_abandons() {
        let cell = TerminalCell::new();
        let (tx, completion) = Completion::pair(cell.view());
        drop(tx);

        let outcome = completion.now_or_never().unwrap();
        assert!(matches!(outcome, Err(ProcError::Abandoned)));
    }

    #[test]
    fn test_task_handle_reads_child_state() {
        let cell = TerminalCell::new();
        let (_tx, completion) = Completion::pair(cell.view());
        let task = TaskHandle::new("worker", None, completion);

        assert_eq!(task.name(), "worker");
        assert!(task.is_running());
        assert!(task.generator().is_none());

        cell.settle(&Err(ProcError::raised("crashed")));
        assert!(!task.is_running());
        assert!(task.result().is_none());
        assert_eq!(
            task.error().and_then(|e| e.thrown().cloned()),
            Some(Value::from("crashed"))
        );
        assert_eq!(task, task.clone());
    }
}
