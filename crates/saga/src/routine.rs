//! Routines: the suspendable bodies the interpreter drives.
//!
//! A [`Routine`] is an explicit state machine. Each call to
//! [`resume`](Routine::resume) runs it up to its next suspension point and
//! reports either the effect it is waiting on or its final value. Routines
//! that can observe failures of the effects they yielded opt in through
//! [`can_inject`](Routine::can_inject).

use std::mem;

use crate::effect::Effect;
use crate::error::{ProcError, Result};
use crate::value::Value;

/// Outcome of advancing a routine by one step.
#[derive(Debug)]
pub enum Step {
    /// The routine suspended on an effect.
    Yield(Effect),
    /// The routine finished with a value.
    Done(Value),
}

/// What a routine is resumed with.
#[derive(Debug, Clone)]
pub enum Resume {
    /// The settled value of the previously yielded effect.
    Value(Value),
    /// The failure of the previously yielded effect.
    Error(ProcError),
}

/// A suspendable process body.
pub trait Routine {
    /// Advance with the outcome of the previous effect (`Value::Unit` on the
    /// first step). Returning `Err` terminates the process with that error.
    fn resume(&mut self, input: Value) -> Result<Step>;

    /// Whether [`inject`](Routine::inject) may be used to deliver failures.
    fn can_inject(&self) -> bool {
        false
    }

    /// Deliver a failure at the current suspension point. A routine that
    /// recovers returns its next step; one that does not returns the error.
    fn inject(&mut self, error: ProcError) -> Result<Step> {
        Err(error)
    }
}

/// Boxed routine, the form processes own.
pub type BoxRoutine = Box<dyn Routine>;

impl<R: Routine + ?Sized> Routine for Box<R> {
    fn resume(&mut self, input: Value) -> Result<Step> {
        (**self).resume(input)
    }

    fn can_inject(&self) -> bool {
        (**self).can_inject()
    }

    fn inject(&mut self, error: ProcError) -> Result<Step> {
        (**self).inject(error)
    }
}

/// Routine backed by a closure over [`Resume`].
pub struct FnRoutine<F> {
    body: F,
    injectable: bool,
}

/// Build a routine from a closure. Failures of yielded effects reach the
/// closure as [`Resume::Error`].
///
/// ```ignore
/// let mut stage = 0;
/// let routine = from_fn(move |resume| {
///     stage += 1;
///     match (stage, resume) {
///         (1, _) => Ok(Step::Yield(Effect::wait("ready"))),
///         (_, Resume::Value(event)) => Ok(Step::Done(event)),
///         (_, Resume::Error(e)) => Err(e),
///     }
/// });
/// ```
pub fn from_fn<F>(body: F) -> FnRoutine<F>
where
    F: FnMut(Resume) -> Result<Step>,
{
    FnRoutine {
        body,
        injectable: true,
    }
}

impl<F> FnRoutine<F> {
    /// Refuse error injection: failed effects terminate the process without
    /// the closure seeing them.
    pub fn without_injection(mut self) -> Self {
        self.injectable = false;
        self
    }
}

impl<F> Routine for FnRoutine<F>
where
    F: FnMut(Resume) -> Result<Step>,
{
    fn resume(&mut self, input: Value) -> Result<Step> {
        (self.body)(Resume::Value(input))
    }

    fn can_inject(&self) -> bool {
        self.injectable
    }

    fn inject(&mut self, error: ProcError) -> Result<Step> {
        (self.body)(Resume::Error(error))
    }
}

/// Single-step routine: yields one effect and returns whatever it settles to.
#[derive(Debug)]
pub enum Lifted {
    Pending(Effect),
    Raising(ProcError),
    Yielded,
    Finished,
}

/// Wrap one effect as a routine.
pub fn lift(effect: Effect) -> Lifted {
    Lifted::Pending(effect)
}

impl Lifted {
    /// A routine whose first step fails with `error`.
    pub fn raising(error: ProcError) -> Self {
        Self::Raising(error)
    }
}

impl Routine for Lifted {
    fn resume(&mut self, input: Value) -> Result<Step> {
        debug_assert!(
            !matches!(self, Self::Finished),
            "lifted routine resumed after it finished"
        );
        match mem::replace(self, Self::Finished) {
            Self::Pending(effect) => {
                *self = Self::Yielded;
                Ok(Step::Yield(effect))
            }
            Self::Raising(error) => Err(error),
            Self::Yielded => Ok(Step::Done(input)),
            Self::Finished => Ok(Step::Done(Value::Unit)),
        }
    }
}
