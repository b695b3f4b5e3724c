//! Effects: declarative descriptions of what a suspended process needs.
//!
//! [`Effect`] is a closed sum type, so dispatch is an exhaustive `match`
//! rather than a chain of shape recognizers. Anything that is not one of the
//! recognized kinds travels as [`Effect::Value`] and resolves to itself.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{ProcError, Result};
use crate::event::{Event, Pattern};
use crate::routine::{BoxRoutine, Routine};
use crate::task::TaskHandle;
use crate::value::Value;

/// Eventual outcome of an effect.
pub type EffectFuture = LocalBoxFuture<'static, Result<Value>>;

/// A declarative request yielded by a routine.
pub enum Effect {
    /// Run another routine inline and adopt its outcome.
    Routine(BoxRoutine),
    /// Wait for the next published event matching the pattern.
    Wait(Pattern),
    /// Publish an event.
    Emit(Event),
    /// Settle with the first branch to settle, tagged with its key.
    Race(Vec<(String, Effect)>),
    /// Invoke a function.
    Call { function: Function, args: Vec<Value> },
    /// Invoke a function that reports through an appended callback.
    CallbackStyle {
        function: CallbackFunction,
        args: Vec<Value>,
    },
    /// Start a child process and resolve with its handle.
    Fork { target: ForkTarget, args: Vec<Value> },
    /// Adopt the outcome of a forked process.
    Join(TaskHandle),
    /// Run every effect concurrently and collect results in order.
    Parallel(Vec<Effect>),
    /// An already resolved value.
    Value(Value),
    /// A value that is still being computed elsewhere.
    Await(EffectFuture),
}

impl Effect {
    pub fn wait(pattern: impl Into<Pattern>) -> Self {
        Self::Wait(pattern.into())
    }

    pub fn emit(event: Event) -> Self {
        Self::Emit(event)
    }

    /// Branches keep their given order; ties go to the earliest.
    pub fn race<K, I>(branches: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Effect)>,
    {
        Self::Race(
            branches
                .into_iter()
                .map(|(key, effect)| (key.into(), effect))
                .collect(),
        )
    }

    pub fn call(function: Function, args: Vec<Value>) -> Self {
        Self::Call { function, args }
    }

    pub fn cps(function: CallbackFunction, args: Vec<Value>) -> Self {
        Self::CallbackStyle { function, args }
    }

    pub fn fork(target: impl Into<ForkTarget>, args: Vec<Value>) -> Self {
        Self::Fork {
            target: target.into(),
            args,
        }
    }

    pub fn join(task: TaskHandle) -> Self {
        Self::Join(task)
    }

    pub fn parallel(effects: impl IntoIterator<Item = Effect>) -> Self {
        Self::Parallel(effects.into_iter().collect())
    }

    pub fn routine(routine: impl Routine + 'static) -> Self {
        Self::Routine(Box::new(routine))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn future(future: impl Future<Output = Result<Value>> + 'static) -> Self {
        Self::Await(future.boxed_local())
    }

    /// The recognized kind of this effect.
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Routine(_) => EffectKind::Routine,
            Self::Wait(_) => EffectKind::Wait,
            Self::Emit(_) => EffectKind::Emit,
            Self::Race(_) => EffectKind::Race,
            Self::Call { .. } => EffectKind::Call,
            Self::CallbackStyle { .. } => EffectKind::CallbackStyle,
            Self::Fork { .. } => EffectKind::Fork,
            Self::Join(_) => EffectKind::Join,
            Self::Parallel(_) => EffectKind::Parallel,
            Self::Value(_) | Self::Await(_) => EffectKind::Value,
        }
    }
}

impl From<Value> for Effect {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routine(_) => f.write_str("Routine(..)"),
            Self::Wait(pattern) => f.debug_tuple("Wait").field(pattern).finish(),
            Self::Emit(event) => f.debug_tuple("Emit").field(event).finish(),
            Self::Race(branches) => f.debug_tuple("Race").field(branches).finish(),
            Self::Call { function, args } => f
                .debug_struct("Call")
                .field("function", function)
                .field("args", args)
                .finish(),
            Self::CallbackStyle { function, args } => f
                .debug_struct("CallbackStyle")
                .field("function", function)
                .field("args", args)
                .finish(),
            Self::Fork { target, args } => f
                .debug_struct("Fork")
                .field("target", target)
                .field("args", args)
                .finish(),
            Self::Join(task) => f.debug_tuple("Join").field(task).finish(),
            Self::Parallel(effects) => f.debug_tuple("Parallel").field(effects).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Await(_) => f.write_str("Await(..)"),
        }
    }
}

/// Effect kinds, for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Routine,
    Wait,
    Emit,
    Race,
    Call,
    CallbackStyle,
    Fork,
    Join,
    Parallel,
    Value,
}

impl EffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Wait => "wait",
            Self::Emit => "emit",
            Self::Race => "race",
            Self::Call => "call",
            Self::CallbackStyle => "cps",
            Self::Fork => "fork",
            Self::Join => "join",
            Self::Parallel => "parallel",
            Self::Value => "value",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What invoking a [`Function`] produced.
pub enum Invocation {
    /// A plain value.
    Ready(Value),
    /// A value that settles later.
    Pending(EffectFuture),
    /// A routine to be interpreted as a process.
    Routine(BoxRoutine),
}

impl Invocation {
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(value.into())
    }

    pub fn pending(future: impl Future<Output = Result<Value>> + 'static) -> Self {
        Self::Pending(future.boxed_local())
    }

    pub fn routine(routine: impl Routine + 'static) -> Self {
        Self::Routine(Box::new(routine))
    }
}

impl From<Value> for Invocation {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

type FunctionBody = dyn Fn(Vec<Value>) -> Result<Invocation>;

/// A named, shareable function that `Call` and `Fork` can invoke.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    body: Rc<FunctionBody>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(Vec<Value>) -> Result<Invocation> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name.into()),
            body: Rc::new(body),
        }
    }

    pub fn anonymous(body: impl Fn(Vec<Value>) -> Result<Invocation> + 'static) -> Self {
        Self::new("anonymous", body)
    }

    /// A function that always produces a routine.
    pub fn generator<R, F>(name: impl Into<String>, make: F) -> Self
    where
        R: Routine + 'static,
        F: Fn(Vec<Value>) -> R + 'static,
    {
        Self::new(name, move |args| Ok(Invocation::routine(make(args))))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: Vec<Value>) -> Result<Invocation> {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Function").field(&self.name).finish()
    }
}

type CallbackBody = dyn Fn(Vec<Value>, Callback) -> Result<()>;

/// A function that reports its outcome through a trailing [`Callback`].
#[derive(Clone)]
pub struct CallbackFunction {
    name: Rc<str>,
    body: Rc<CallbackBody>,
}

impl CallbackFunction {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(Vec<Value>, Callback) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name.into()),
            body: Rc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: Vec<Value>, callback: Callback) -> Result<()> {
        (self.body)(args, callback)
    }
}

impl fmt::Debug for CallbackFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallbackFunction").field(&self.name).finish()
    }
}

/// The `(error, value)` callback appended to a callback-style invocation.
///
/// Only the first call counts; later calls are logged and ignored. Dropping
/// every clone without calling it leaves the effect pending forever.
#[derive(Clone)]
pub struct Callback {
    sender: Rc<RefCell<Option<oneshot::Sender<Result<Value>>>>>,
}

impl Callback {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Rc::new(RefCell::new(Some(tx))),
            },
            rx,
        )
    }

    /// Report the outcome. A present `error` rejects; otherwise `value`
    /// resolves.
    pub fn call(&self, error: Option<ProcError>, value: Value) {
        let Some(sender) = self.sender.borrow_mut().take() else {
            warn!("callback invoked more than once; ignoring");
            return;
        };
        let outcome = match error {
            Some(error) => Err(error),
            None => Ok(value),
        };
        // The receiver is gone only when nobody awaits the effect any more.
        let _ = sender.send(outcome);
    }

    pub fn ok(&self, value: impl Into<Value>) {
        self.call(None, value.into())
    }

    pub fn err(&self, error: ProcError) {
        self.call(Some(error), Value::Unit)
    }

    /// Whether the callback has already been used.
    pub fn is_spent(&self) -> bool {
        self.sender.borrow().is_none()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// What a `Fork` starts.
pub enum ForkTarget {
    /// Invoked with the fork's arguments; a returned routine becomes the
    /// child, any other result is wrapped in a single-step routine.
    Function(Function),
    /// Run as the child directly.
    Routine(BoxRoutine),
    /// Wrapped in a single-step routine that returns it.
    Value(Value),
}

impl ForkTarget {
    pub fn routine(routine: impl Routine + 'static) -> Self {
        Self::Routine(Box::new(routine))
    }
}

impl From<Function> for ForkTarget {
    fn from(function: Function) -> Self {
        Self::Function(function)
    }
}

impl From<Value> for ForkTarget {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<BoxRoutine> for ForkTarget {
    fn from(routine: BoxRoutine) -> Self {
        Self::Routine(routine)
    }
}

impl fmt::Debug for ForkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(function) => f.debug_tuple("Function").field(function).finish(),
            Self::Routine(_) => f.write_str("Routine(..)"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Effect::wait("*").kind(), EffectKind::Wait);
        assert_eq!(Effect::value(1).kind(), EffectKind::Value);
        assert_eq!(
            Effect::future(async { Ok(Value::Unit) }).kind(),
            EffectKind::Value
        );
        assert_eq!(
            Effect::race([("a", Effect::value(1))]).kind().to_string(),
            "race"
        );
    }

    #[test]
    fn test_race_preserves_branch_order() {
        let Effect::Race(branches) =
            Effect::race([("z", Effect::value(1)), ("a", Effect::value(2))])
        else {
            panic!("expected race");
        };
        let keys: Vec<_> = branches.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_function_invocation() {
        let double = Function::new("double", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Invocation::ready(n * 2))
        });

        assert_eq!(double.name(), "double");
        assert!(matches!(
            double.invoke(vec![Value::from(21)]),
            Ok(Invocation::Ready(v)) if v == Value::from(42)
        ));
    }

    #[test]
    fn test_callback_first_call_wins() {
        let (callback, mut rx) = Callback::channel();
        assert!(!callback.is_spent());

        callback.ok(1);
        callback.err(ProcError::raised("late"));

        assert!(callback.is_spent());
        assert!(matches!(rx.try_recv(), Ok(Ok(v)) if v == Value::from(1)));
    }

    #[test]
    fn test_callback_error_rejects() {
        let (callback, mut rx) = Callback::channel();
        callback.call(Some(ProcError::raised("bad")), Value::from(3));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.unwrap_err().thrown(), Some(&Value::from("bad")));
    }
}
