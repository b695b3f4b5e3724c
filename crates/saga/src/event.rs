//! Events and the patterns that select them.
//!
//! A [`Pattern`] compiles to a pure predicate over [`Event`]s. The interpreter
//! only ever consumes the predicate; how events are routed is the bus's
//! business.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A published fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind, the field patterns select on
    pub kind: String,
    /// Arbitrary payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Create an event carrying a payload.
    pub fn with_payload(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_null() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.payload)
        }
    }
}

/// Compiled event predicate.
pub type Matcher = Rc<dyn Fn(&Event) -> bool>;

/// Selects the events a `Wait` effect is interested in.
#[derive(Clone)]
pub enum Pattern {
    /// Every event.
    Any,
    /// Events of exactly this kind.
    Kind(String),
    /// Events whose kind is one of these.
    OneOf(SmallVec<[String; 4]>),
    /// A caller-supplied predicate.
    Predicate(Matcher),
}

impl Pattern {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self::Kind(kind.into())
    }

    pub fn one_of<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(kinds.into_iter().map(Into::into).collect())
    }

    pub fn predicate(f: impl Fn(&Event) -> bool + 'static) -> Self {
        Self::Predicate(Rc::new(f))
    }

    /// Evaluate the pattern against one event.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(kind) => event.kind == *kind,
            Self::OneOf(kinds) => kinds.iter().any(|kind| event.kind == *kind),
            Self::Predicate(f) => f(event),
        }
    }

    /// Compile the pattern into a standalone predicate.
    pub fn matcher(&self) -> Matcher {
        match self {
            Self::Predicate(f) => Rc::clone(f),
            _ => {
                let pattern = self.clone();
                Rc::new(move |event| pattern.matches(event))
            }
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Self::OneOf(kinds) => f.debug_tuple("OneOf").field(kinds).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for Pattern {
    /// `"*"` selects everything; any other string selects one kind.
    fn from(s: &str) -> Self {
        if s == "*" {
            Self::Any
        } else {
            Self::Kind(s.to_string())
        }
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl<S: Into<String>> From<Vec<S>> for Pattern {
    fn from(kinds: Vec<S>) -> Self {
        Self::one_of(kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wildcard_matches_everything() {
        let pattern = Pattern::from("*");
        assert!(matches!(pattern, Pattern::Any));
        assert!(pattern.matches(&Event::new("anything")));
    }

    #[test]
    fn test_kind_and_one_of() {
        let ping = Event::new("ping");
        let pong = Event::new("pong");

        let single = Pattern::from("ping");
        assert!(single.matches(&ping));
        assert!(!single.matches(&pong));

        let either = Pattern::from(vec!["ping", "pong"]);
        assert!(either.matches(&ping));
        assert!(either.matches(&pong));
        assert!(!either.matches(&Event::new("pang")));
    }

    #[test]
    fn test_predicate_sees_payload() {
        let large = Pattern::predicate(|e| e.payload["amount"].as_i64().unwrap_or(0) > 100);
        let matcher = large.matcher();

        assert!(matcher(&Event::with_payload("order", json!({ "amount": 250 }))));
        assert!(!matcher(&Event::with_payload("order", json!({ "amount": 5 }))));
        assert!(!matcher(&Event::new("order")));
    }

    #[test]
    fn test_event_serializes_with_default_payload() {
        let event: Event = serde_json::from_value(json!({ "kind": "tick" })).unwrap();
        assert_eq!(event, Event::new("tick"));
        assert_eq!(event.to_string(), "tick");
    }
}
