use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::RequestStrategy;

/// Priority class used by adaptive throttling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestPriority {
    Critical,
    Ordinary,
    Sheddable,
}

impl RequestPriority {
    pub const ALL: [RequestPriority; 3] = [
        RequestPriority::Critical,
        RequestPriority::Ordinary,
        RequestPriority::Sheddable,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RequestPriority::Critical => "Critical",
            RequestPriority::Ordinary => "Ordinary",
            RequestPriority::Sheddable => "Sheddable",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            RequestPriority::Critical => 0,
            RequestPriority::Ordinary => 1,
            RequestPriority::Sheddable => 2,
        }
    }
}

/// Per-call parameters. Copy-on-write: every `with_*` returns the value unchanged when
/// the new setting equals the current one.
#[derive(Clone, Default)]
pub struct RequestParameters {
    strategy: Option<Arc<dyn RequestStrategy>>,
    priority: Option<RequestPriority>,
    connection_timeout: Option<Duration>,
    properties: Arc<BTreeMap<String, Value>>,
}

impl RequestParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(&self) -> Option<&Arc<dyn RequestStrategy>> {
        self.strategy.as_ref()
    }

    pub fn priority(&self) -> Option<RequestPriority> {
        self.priority
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn with_strategy(self, strategy: Option<Arc<dyn RequestStrategy>>) -> Self {
        let unchanged = match (&self.strategy, &strategy) {
            (None, None) => true,
            (Some(current), Some(new)) => std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(new)),
            _ => false,
        };
        if unchanged {
            return self;
        }
        Self { strategy, ..self }
    }

    pub fn with_priority(self, priority: Option<RequestPriority>) -> Self {
        if self.priority == priority {
            return self;
        }
        Self { priority, ..self }
    }

    pub fn with_connection_timeout(self, connection_timeout: Option<Duration>) -> Self {
        if self.connection_timeout == connection_timeout {
            return self;
        }
        Self {
            connection_timeout,
            ..self
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if self.properties.get(&key) == Some(&value) {
            return self;
        }
        Arc::make_mut(&mut self.properties).insert(key, value);
        self
    }

    pub fn without_property(mut self, key: &str) -> Self {
        if !self.properties.contains_key(key) {
            return self;
        }
        Arc::make_mut(&mut self.properties).remove(key);
        self
    }

    /// Whether both values share the same property storage.
    pub fn shares_properties_with(&self, other: &RequestParameters) -> bool {
        Arc::ptr_eq(&self.properties, &other.properties)
    }
}

impl fmt::Debug for RequestParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestParameters")
            .field("strategy", &self.strategy.as_ref().map(|strategy| strategy.name()))
            .field("priority", &self.priority)
            .field("connection_timeout", &self.connection_timeout)
            .field("properties", &self.properties)
            .finish()
    }
}
