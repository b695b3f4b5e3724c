//! Effect dispatcher and the handlers behind each effect kind.
//!
//! [`Resolver::resolve`] turns one [`Effect`] into an [`EffectFuture`]. All
//! synchronous work (invoking a called function, registering a wait, starting
//! a forked or nested process up to its first suspension) happens inside
//! `resolve` itself; the returned future only waits for the outcome.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use futures::future::{self, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;
use tokio::task::{self, JoinHandle};
use tracing::{debug, trace, warn};

use crate::bus::{Io, Listener};
use crate::effect::{Callback, CallbackFunction, Effect, EffectFuture, ForkTarget, Function, Invocation};
use crate::error::{ProcError, Result};
use crate::event::{Event, Matcher, Pattern};
use crate::interpreter;
use crate::routine::{lift, BoxRoutine, Lifted};
use crate::task::TaskHandle;
use crate::value::Value;

/// The single outstanding wait registration of a process.
#[derive(Clone, Default)]
pub(crate) struct WaitSlot(Rc<RefCell<Option<PendingWait>>>);

struct PendingWait {
    pattern: Pattern,
    matcher: Matcher,
    resolve: oneshot::Sender<Event>,
}

impl WaitSlot {
    pub(crate) fn clear(&self) {
        self.0.borrow_mut().take();
    }

    /// Occupy the slot. Refused while another wait holds it.
    ///
    /// The receiver errors once the slot is cleared or the process goes away
    /// without a matching event.
    fn register(&self, pattern: Pattern) -> Option<oneshot::Receiver<Event>> {
        let mut slot = self.0.borrow_mut();
        if slot.is_some() {
            return None;
        }
        let (resolve, rx) = oneshot::channel();
        *slot = Some(PendingWait {
            matcher: pattern.matcher(),
            pattern,
            resolve,
        });
        Some(rx)
    }

    /// Resolve the pending wait with `event` if it matches.
    pub(crate) fn offer(&self, event: &Event) -> bool {
        let mut slot = self.0.borrow_mut();
        let matched = slot.as_ref().is_some_and(|wait| (wait.matcher)(event));
        if matched {
            if let Some(wait) = slot.take() {
                trace!(pattern = ?wait.pattern, kind = %event.kind, "wait satisfied");
                let _ = wait.resolve.send(event.clone());
            }
        }
        matched
    }

    #[cfg(test)]
    pub(crate) fn is_occupied(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Listener that feeds published events into this slot.
    pub(crate) fn listener(&self) -> Listener {
        let slot = self.clone();
        Rc::new(move |event: &Event| {
            slot.offer(event);
        })
    }
}

/// Resolves effects on behalf of one process.
#[derive(Clone)]
pub(crate) struct Resolver {
    io: Io,
    slot: WaitSlot,
}

impl Resolver {
    pub(crate) fn new(io: Io, slot: WaitSlot) -> Self {
        Self { io, slot }
    }

    pub(crate) fn slot(&self) -> &WaitSlot {
        &self.slot
    }

    pub(crate) fn resolve(&self, effect: Effect) -> EffectFuture {
        match effect {
            Effect::Routine(routine) => self.nested(routine),
            Effect::Wait(pattern) => self.wait(pattern),
            Effect::Emit(event) => self.emit(event),
            Effect::Race(branches) => self.race(branches),
            Effect::Call { function, args } => self.call(&function, args),
            Effect::CallbackStyle { function, args } => self.callback_style(&function, args),
            Effect::Fork { target, args } => self.fork(target, args),
            Effect::Join(task) => task.completion().boxed_local(),
            Effect::Parallel(effects) => self.parallel(effects),
            Effect::Value(value) => future::ready(Ok(value)).boxed_local(),
            Effect::Await(pending) => pending,
        }
    }

    /// Interpret a routine as its own process and adopt its completion.
    fn nested(&self, routine: BoxRoutine) -> EffectFuture {
        interpreter::run_boxed(routine, self.io.clone()).boxed_local()
    }

    fn wait(&self, pattern: Pattern) -> EffectFuture {
        let Some(rx) = self.slot.register(pattern) else {
            warn!("wait issued while another wait is pending; it will never settle");
            return future::pending::<Result<Value>>().boxed_local();
        };
        async move {
            match rx.await {
                Ok(event) => Ok(Value::Event(event)),
                // Only a settled race or parallel can still hold this future.
                Err(_) => Err(ProcError::Abandoned),
            }
        }
        .boxed_local()
    }

    fn emit(&self, event: Event) -> EffectFuture {
        let io = self.io.clone();
        async move {
            task::yield_now().await;
            trace!(kind = %event.kind, "emitting event");
            io.emit(event);
            Ok(Value::from(1))
        }
        .boxed_local()
    }

    fn call(&self, function: &Function, args: Vec<Value>) -> EffectFuture {
        match function.invoke(args) {
            Ok(Invocation::Ready(value)) => future::ready(Ok(value)).boxed_local(),
            Ok(Invocation::Pending(pending)) => pending,
            Ok(Invocation::Routine(routine)) => self.nested(routine),
            Err(error) => {
                debug!(function = function.name(), error = %error, "call failed");
                future::ready(Err(error)).boxed_local()
            }
        }
    }

    fn callback_style(&self, function: &CallbackFunction, args: Vec<Value>) -> EffectFuture {
        let (callback, rx) = Callback::channel();
        if let Err(error) = function.invoke(args, callback) {
            return future::ready(Err(error)).boxed_local();
        }
        async move {
            match rx.await {
                Ok(outcome) => outcome,
                // Every callback clone dropped without being called.
                Err(_) => future::pending().await,
            }
        }
        .boxed_local()
    }

    fn fork(&self, target: ForkTarget, args: Vec<Value>) -> EffectFuture {
        let (name, generator, routine): (String, Option<Function>, BoxRoutine) = match target {
            ForkTarget::Function(function) => {
                let name = function.name().to_string();
                match function.invoke(args) {
                    Ok(Invocation::Routine(routine)) => (name, Some(function), routine),
                    Ok(Invocation::Ready(value)) => {
                        (name, None, Box::new(lift(Effect::Value(value))))
                    }
                    Ok(Invocation::Pending(pending)) => {
                        (name, None, Box::new(lift(Effect::Await(pending))))
                    }
                    Err(error) => (name, None, Box::new(Lifted::raising(error))),
                }
            }
            ForkTarget::Routine(routine) => ("anonymous".to_string(), None, routine),
            ForkTarget::Value(value) => (
                "anonymous".to_string(),
                None,
                Box::new(lift(Effect::Value(value))),
            ),
        };

        let done = interpreter::run_boxed(routine, self.io.clone());
        let task = TaskHandle::new(name, generator, done);
        debug!(task = %task.id(), name = task.name(), "forked task");
        future::ready(Ok(Value::Task(task))).boxed_local()
    }

    /// First branch to settle wins; the rest keep running detached.
    fn race(&self, branches: Vec<(String, Effect)>) -> EffectFuture {
        if branches.is_empty() {
            return future::pending::<Result<Value>>().boxed_local();
        }

        let contenders: Vec<JoinHandle<Result<Value>>> = branches
            .into_iter()
            .map(|(key, effect)| {
                let outcome = self.resolve(effect);
                task::spawn_local(async move {
                    match outcome.await {
                        Ok(value) => Ok(Value::Map(BTreeMap::from([(key, value)]))),
                        Err(error) => Err(ProcError::race(key, error)),
                    }
                })
            })
            .collect();

        async move {
            let (winner, index, _losers) = future::select_all(contenders).await;
            trace!(index, "race settled");
            winner.unwrap_or_else(|_| Err(ProcError::Abandoned))
        }
        .boxed_local()
    }

    /// All branches must succeed. The first failure to surface wins,
    /// whichever branch it comes from.
    fn parallel(&self, effects: Vec<Effect>) -> EffectFuture {
        let mut branches: FuturesUnordered<_> = effects
            .into_iter()
            .enumerate()
            .map(|(index, effect)| {
                task::spawn_local(self.resolve(effect)).map(move |joined| {
                    (index, joined.unwrap_or_else(|_| Err(ProcError::Abandoned)))
                })
            })
            .collect();
        let mut results: Vec<Option<Value>> = vec![None; branches.len()];

        async move {
            while let Some((index, outcome)) = branches.next().await {
                match outcome {
                    Ok(value) => results[index] = Some(value),
                    Err(error) => return Err(error),
                }
            }
            Ok(Value::List(
                results.into_iter().map(Option::unwrap_or_default).collect(),
            ))
        }
        .boxed_local()
    }
}
