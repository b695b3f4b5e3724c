//! The process interpreter: the step loop that drives one routine.
//!
//! ```text
//! run(routine, io)
//!     │
//!     ├─► subscribe(slot listener)            (once per process)
//!     │
//!     └─► step(Unit) ──────────────────────┐  (synchronous, before run returns)
//!                                          ▼
//!              ┌──────────── clear wait slot
//!              │             resume / inject
//!              │                   │
//!              │        ┌──────────┴──────────┐
//!              │   Yield(effect)         Done / Err
//!              │        │                     │
//!              │   resolve(effect)       settle terminal cell
//!              │        │                release subscription
//!              │   await outcome         settle completion
//!              │        │
//!              └────────┘  (spawn_local task)
//! ```
//!
//! Steps of one process are strictly sequential: step N+1 never starts before
//! the effect of step N has settled. Processes that yield at least once are
//! driven by a `tokio::task::spawn_local` task and therefore need a
//! `LocalSet`.

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{Io, Subscription};
use crate::dispatch::{Resolver, WaitSlot};
use crate::effect::{EffectFuture, Function, Invocation};
use crate::error::{ProcError, Result};
use crate::routine::{BoxRoutine, Resume, Routine, Step};
use crate::task::{Completion, TerminalCell};
use crate::value::Value;

/// Interpret `routine` as a process.
///
/// The routine runs up to its first suspension point before this returns.
pub fn run<R: Routine + 'static>(routine: R, io: Io) -> Completion {
    run_boxed(Box::new(routine), io)
}

/// [`run`] for an already boxed routine.
pub fn run_boxed(routine: BoxRoutine, io: Io) -> Completion {
    Proc::start(routine, io)
}

/// Invoke a saga function and interpret the routine it returns.
///
/// Fails fast with [`ProcError::NotAdvanceable`] when the function returns
/// anything but a routine.
pub fn run_saga(function: &Function, args: Vec<Value>, io: Io) -> Result<Completion> {
    match function.invoke(args)? {
        Invocation::Routine(routine) => Ok(run_boxed(routine, io)),
        Invocation::Ready(_) | Invocation::Pending(_) => {
            debug!(function = function.name(), "saga function did not return a routine");
            Err(ProcError::NotAdvanceable)
        }
    }
}

struct Proc {
    id: Uuid,
    routine: BoxRoutine,
    resolver: Resolver,
    terminal: TerminalCell,
    settle: Option<oneshot::Sender<Result<Value>>>,
    subscription: Option<Subscription>,
}

impl Proc {
    fn start(routine: BoxRoutine, io: Io) -> Completion {
        let terminal = TerminalCell::new();
        let (settle, completion) = Completion::pair(terminal.view());
        let slot = WaitSlot::default();
        let subscription = io.subscribe(slot.listener());

        let mut process = Proc {
            id: Uuid::new_v4(),
            routine,
            resolver: Resolver::new(io, slot),
            terminal,
            settle: Some(settle),
            subscription: Some(subscription),
        };
        debug!(proc = %process.id, "process started");

        if let Some(pending) = process.step(Resume::Value(Value::Unit)) {
            tokio::task::spawn_local(process.drive(pending));
        }
        completion
    }

    async fn drive(mut self, mut pending: EffectFuture) {
        loop {
            let input = match pending.await {
                Ok(value) => Resume::Value(value),
                Err(error) => Resume::Error(error),
            };
            match self.step(input) {
                Some(next) => pending = next,
                None => break,
            }
        }
    }

    /// Advance once. Returns the next effect's outcome to wait for, or `None`
    /// once the process has settled.
    fn step(&mut self, input: Resume) -> Option<EffectFuture> {
        self.resolver.slot().clear();

        let advanced = match input {
            Resume::Value(value) => self.routine.resume(value),
            Resume::Error(error) if self.routine.can_inject() => self.routine.inject(error),
            // Nowhere to deliver it: fail as if the routine had raised it.
            Resume::Error(error) => Err(error),
        };

        match advanced {
            Ok(Step::Yield(effect)) => {
                debug!(proc = %self.id, kind = %effect.kind(), "effect yielded");
                Some(self.resolver.resolve(effect))
            }
            Ok(Step::Done(value)) => {
                self.finish(Ok(value));
                None
            }
            Err(error) => {
                self.finish(Err(error));
                None
            }
        }
    }

    fn finish(&mut self, outcome: Result<Value>) {
        self.terminal.settle(&outcome);
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
        match &outcome {
            Ok(value) => debug!(proc = %self.id, result = %value, "process returned"),
            Err(error) => debug!(proc = %self.id, error = %error, "process failed"),
        }
        if let Some(settle) = self.settle.take() {
            // Nobody holding the completion is not an error.
            let _ = settle.send(outcome);
        }
    }
}
