//! Testing utilities for the saga interpreter.
//!
//! - [`ScriptedRoutine`] yields a fixed list of effects and records every
//!   input it is resumed or injected with.
//! - [`EmitLog`] records what processes emit.
//! - [`gate`] and [`never`] build effects whose timing the test controls.
//! - [`run_local`] and [`settle`] drive spawned processes.
//!
//! # Example
//!
//! ```ignore
//! use saga_core::{run, Effect, Event, Value};
//! use saga_testing::{run_local, EmitLog, ScriptedRoutine};
//!
//! run_local(async {
//!     let emitted = EmitLog::new();
//!     let script = ScriptedRoutine::new([Effect::emit(Event::new("ping"))]);
//!     let log = script.log();
//!
//!     run(script, emitted.io()).await.unwrap();
//!     assert_eq!(emitted.kinds(), vec!["ping"]);
//!     assert_eq!(log.resumes(), vec![Value::Unit, Value::from(1)]);
//! }).await;
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use saga_core::{
    Effect, Event, Function, Invocation, Io, LocalBus, ProcError, Result, Routine, Step, Value,
};
use tokio::sync::oneshot;
use tokio::task::LocalSet;

// ============================================================================
// Scripted routines
// ============================================================================

/// One input a [`ScriptedRoutine`] observed.
#[derive(Debug, Clone)]
pub enum Observed {
    Resumed(Value),
    Injected(ProcError),
}

/// Shared view of what a [`ScriptedRoutine`] observed, readable after the
/// routine has been moved into a process.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    entries: Rc<RefCell<Vec<Observed>>>,
}

impl ScriptLog {
    pub fn entries(&self) -> Vec<Observed> {
        self.entries.borrow().clone()
    }

    pub fn resumes(&self) -> Vec<Value> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                Observed::Resumed(value) => Some(value.clone()),
                Observed::Injected(_) => None,
            })
            .collect()
    }

    pub fn injections(&self) -> Vec<ProcError> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                Observed::Injected(error) => Some(error.clone()),
                Observed::Resumed(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn push(&self, entry: Observed) {
        self.entries.borrow_mut().push(entry);
    }
}

/// A routine that yields a fixed sequence of effects.
///
/// Once the script is exhausted it returns its configured value, or the last
/// value it was resumed with.
pub struct ScriptedRoutine {
    effects: VecDeque<Effect>,
    returning: Option<Value>,
    injectable: bool,
    recovering: bool,
    last: Value,
    log: ScriptLog,
}

impl ScriptedRoutine {
    pub fn new(effects: impl IntoIterator<Item = Effect>) -> Self {
        Self {
            effects: effects.into_iter().collect(),
            returning: None,
            injectable: true,
            recovering: false,
            last: Value::Unit,
            log: ScriptLog::default(),
        }
    }

    /// Return this value once the script is exhausted.
    pub fn returning(mut self, value: impl Into<Value>) -> Self {
        self.returning = Some(value.into());
        self
    }

    /// Whether the routine accepts error injection (default `true`).
    pub fn injectable(mut self, injectable: bool) -> Self {
        self.injectable = injectable;
        self
    }

    /// Catch injected errors and carry on with the next scripted effect.
    pub fn recovering(mut self) -> Self {
        self.recovering = true;
        self
    }

    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    fn advance(&mut self) -> Step {
        match self.effects.pop_front() {
            Some(effect) => Step::Yield(effect),
            None => Step::Done(
                self.returning
                    .clone()
                    .unwrap_or_else(|| self.last.clone()),
            ),
        }
    }
}

impl Routine for ScriptedRoutine {
    fn resume(&mut self, input: Value) -> Result<Step> {
        self.log.push(Observed::Resumed(input.clone()));
        self.last = input;
        Ok(self.advance())
    }

    fn can_inject(&self) -> bool {
        self.injectable
    }

    fn inject(&mut self, error: ProcError) -> Result<Step> {
        self.log.push(Observed::Injected(error.clone()));
        if self.recovering {
            self.last = Value::Unit;
            Ok(self.advance())
        } else {
            Err(error)
        }
    }
}

// ============================================================================
// Emit recording
// ============================================================================

/// Records every event emitted through the [`Io`] it hands out.
#[derive(Debug, Clone, Default)]
pub struct EmitLog {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EmitLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities that record emits and never deliver events.
    pub fn io(&self) -> Io {
        let events = Rc::clone(&self.events);
        Io::detached().with_emit(move |event| events.borrow_mut().push(event))
    }

    /// Capabilities that record emits and dispatch them into `bus`.
    pub fn tee(&self, bus: &LocalBus) -> Io {
        let events = Rc::clone(&self.events);
        let target = bus.clone();
        bus.io().with_emit(move |event| {
            events.borrow_mut().push(event.clone());
            target.dispatch(event);
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|event| event.kind.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

// ============================================================================
// Controlled effects
// ============================================================================

/// Settles the effect returned alongside it by [`gate`].
pub struct Gate {
    sender: oneshot::Sender<Result<Value>>,
}

impl Gate {
    pub fn open(self, value: impl Into<Value>) {
        let _ = self.sender.send(Ok(value.into()));
    }

    pub fn fail(self, error: ProcError) {
        let _ = self.sender.send(Err(error));
    }
}

/// An effect that settles when the returned [`Gate`] is opened or failed.
/// Dropping the gate leaves the effect pending forever.
pub fn gate() -> (Gate, Effect) {
    let (sender, receiver) = oneshot::channel();
    let effect = Effect::future(async move {
        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => futures_pending().await,
        }
    });
    (Gate { sender }, effect)
}

/// An effect that never settles.
pub fn never() -> Effect {
    Effect::future(futures_pending())
}

/// An effect that fails with a raised value.
pub fn failing(value: impl Into<Value>) -> Effect {
    let error = ProcError::raised(value);
    Effect::future(async move { Err(error) })
}

/// A function returning `value` whatever its arguments.
pub fn returning(name: &str, value: impl Into<Value>) -> Function {
    let value = value.into();
    Function::new(name, move |_| Ok(Invocation::Ready(value.clone())))
}

/// A function raising `value` whatever its arguments.
pub fn raising(name: &str, value: impl Into<Value>) -> Function {
    let value = value.into();
    Function::new(name, move |_| Err(ProcError::Raised(value.clone())))
}

async fn futures_pending() -> Result<Value> {
    std::future::pending().await
}

// ============================================================================
// Driving processes
// ============================================================================

/// Run `future` inside a fresh [`LocalSet`], so processes it starts can
/// suspend.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

/// Yield to the scheduler enough times for ready processes to reach their
/// next suspension point.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
