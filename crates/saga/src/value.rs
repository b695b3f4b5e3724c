//! Values exchanged between routines and effects.

use std::collections::BTreeMap;
use std::fmt;

use crate::event::Event;
use crate::task::TaskHandle;

/// A value a routine is resumed with, returns, or raises.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No value at all (the input of a routine's first step).
    #[default]
    Unit,
    /// Plain data.
    Data(serde_json::Value),
    /// An event delivered by a `Wait`.
    Event(Event),
    /// A handle produced by `Fork`.
    Task(TaskHandle),
    /// Ordered results, e.g. of a `Parallel` effect.
    List(Vec<Value>),
    /// Keyed results, e.g. the `{key: value}` of a won race.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// A single-entry map.
    pub fn keyed(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Map(BTreeMap::from([(key.into(), value.into())]))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(serde_json::Value::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(serde_json::Value::as_str)
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskHandle> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<TaskHandle> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key of a `Map` value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries.get(key),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("undefined"),
            Self::Data(data) => write!(f, "{data}"),
            Self::Event(event) => write!(f, "{event}"),
            Self::Task(task) => write!(f, "<task {} {}>", task.name(), task.id()),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(data: serde_json::Value) -> Self {
        Self::Data(data)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Data(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Data(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Data(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Data(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Data(b.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Data(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Data(s.into())
    }
}

impl From<Event> for Value {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<TaskHandle> for Value {
    fn from(task: TaskHandle) -> Self {
        Self::Task(task)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
