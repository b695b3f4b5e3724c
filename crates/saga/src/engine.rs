//! Engine: a bus plus the processes started on it.
//!
//! The engine is the front door for applications. It owns a [`LocalBus`],
//! hands every root process an [`Io`] wired back into that bus, and wraps
//! each root in a [`TaskHandle`] so it can be inspected like a forked task.

use std::rc::Rc;

use tracing::debug;

use crate::bus::{EventTap, Io, LocalBus};
use crate::effect::Function;
use crate::error::Result;
use crate::event::Event;
use crate::interpreter;
use crate::routine::Routine;
use crate::task::TaskHandle;
use crate::value::Value;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name given to root tasks started with [`Engine::run`]
    pub name: String,
    /// Log every dispatched event at debug level
    pub trace_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "saga".to_string(),
            trace_events: false,
        }
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    taps: Vec<Rc<dyn EventTap>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn trace_events(mut self, enabled: bool) -> Self {
        self.config.trace_events = enabled;
        self
    }

    /// Observe every event published on the engine's bus.
    pub fn with_tap(mut self, tap: impl EventTap + 'static) -> Self {
        self.taps.push(Rc::new(tap));
        self
    }

    pub fn build(self) -> Engine {
        let bus = LocalBus::new();
        bus.set_trace_events(self.config.trace_events);
        for tap in self.taps {
            bus.add_tap(tap);
        }
        Engine {
            config: self.config,
            bus,
        }
    }
}

/// Runs root processes against a shared bus.
pub struct Engine {
    config: EngineConfig,
    bus: LocalBus,
}

impl Engine {
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn io(&self) -> Io {
        self.bus.io()
    }

    /// Publish an event to every process waiting on this engine.
    pub fn emit(&self, event: Event) {
        self.bus.dispatch(event)
    }

    /// Start a root process.
    pub fn run<R: Routine + 'static>(&self, routine: R) -> TaskHandle {
        debug!(engine = %self.config.name, "starting root process");
        let done = interpreter::run(routine, self.io());
        TaskHandle::new(self.config.name.clone(), None, done)
    }

    /// Start a root process from a saga function.
    pub fn run_saga(&self, function: &Function, args: Vec<Value>) -> Result<TaskHandle> {
        debug!(engine = %self.config.name, saga = function.name(), "starting saga");
        let done = interpreter::run_saga(function, args, self.io())?;
        Ok(TaskHandle::new(
            function.name().to_string(),
            Some(function.clone()),
            done,
        ))
    }

    /// Number of processes currently listening for events.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
