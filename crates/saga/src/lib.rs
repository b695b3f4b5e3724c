//! # Saga
//!
//! A single-threaded effect interpreter for suspendable processes.
//!
//! ## Core Concepts
//!
//! A process body is a [`Routine`]: an explicit state machine that, at every
//! suspension point, yields an [`Effect`] describing what it needs next.
//! The interpreter resolves the effect and resumes the routine with the
//! outcome:
//! - [`Effect::Wait`] = consume the next matching published event
//! - [`Effect::Emit`] = publish an event
//! - [`Effect::Call`] / [`Effect::CallbackStyle`] = invoke a function
//! - [`Effect::Race`] / [`Effect::Parallel`] = combine effects
//! - [`Effect::Fork`] / [`Effect::Join`] = structured child processes
//!
//! Asynchronous workflows become linear, testable sequences of yielded
//! intents instead of callback chains.
//!
//! ## Architecture
//!
//! ```text
//! Engine / run(routine, io)
//!     │
//!     ▼
//! Process interpreter (step loop) ◄──── LocalBus ◄──── emit()
//!     │        ▲                            ▲
//!     │ Effect │ outcome                    │
//!     ▼        │                            │
//! Dispatcher ──┴─► Wait ── wait slot ───────┘ (subscribe)
//!     │
//!     ├─► Emit ─────────────────────────────► emit() (next tick)
//!     ├─► Call / CallbackStyle
//!     ├─► Race / Parallel ──► branch tasks (spawn_local)
//!     ├─► Fork ──► child interpreter ──► TaskHandle
//!     └─► Join ──► child Completion
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One routine, one interpreter** - A routine is owned and advanced by
//!    exactly one process
//! 2. **Sequential steps** - Step N+1 never begins before step N's effect settles
//! 3. **Eager first step** - A routine runs to its first suspension point before
//!    `run` returns
//! 4. **One wait at a time** - A process holds at most one pending wait; events
//!    that do not match it are dropped, not queued
//! 5. **Single writer** - A task's terminal state is written once, by its own
//!    interpreter
//! 6. **Subscription released once** - On the terminal path only
//!
//! ## Scheduling
//!
//! Everything runs on one thread. Processes that suspend are driven by
//! `tokio::task::spawn_local`, so they must be started inside a
//! [`tokio::task::LocalSet`]. There is no cancellation: race losers, parallel
//! siblings of a failed branch, and unjoined forks all run to completion.
//!
//! ## Example
//!
//! ```ignore
//! use saga_core::{from_fn, Effect, Engine, Event, Resume, Step, Value};
//!
//! let engine = Engine::new();
//! let mut stage = 0;
//! let task = engine.run(from_fn(move |resume| {
//!     stage += 1;
//!     match (stage, resume) {
//!         (1, _) => Ok(Step::Yield(Effect::wait("order.placed"))),
//!         (2, Resume::Value(order)) => Ok(Step::Yield(Effect::emit(Event::new("order.ack")))),
//!         (_, Resume::Error(e)) => Err(e),
//!         (_, Resume::Value(_)) => Ok(Step::Done(Value::Unit)),
//!     }
//! }));
//!
//! engine.emit(Event::new("order.placed"));
//! task.completion().await?;
//! ```
//!
//! ## What This Is Not
//!
//! This is **not**:
//! - A task pool or OS-level scheduler
//! - A persistence layer for process state
//! - A cancellation framework

// Core modules
mod bus;
mod dispatch;
mod effect;
mod engine;
mod error;
mod event;
mod interpreter;
mod routine;
mod task;
mod value;


// Re-export interpreter entry points
pub use interpreter::{run, run_boxed, run_saga};

// Re-export routine types
pub use routine::{from_fn, lift, BoxRoutine, FnRoutine, Lifted, Resume, Routine, Step};

// Re-export effect types
pub use effect::{
    Callback, CallbackFunction, Effect, EffectFuture, EffectKind, ForkTarget, Function,
    Invocation,
};

// Re-export task types
pub use task::{Completion, TaskHandle, TaskId, TerminalView};

// Re-export bus types
pub use bus::{EmitFn, EventSource, EventTap, Io, Listener, LocalBus, Subscription};

// Re-export event types
pub use event::{Event, Matcher, Pattern};

// Re-export value and error types
pub use error::{ProcError, Result};
pub use value::Value;

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineConfig};
