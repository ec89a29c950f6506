//! Subscription registry shared by the message-client adapters.
//!
//! Holds at most one handler per topic filter.  Registering a filter that is
//! already present replaces its QoS and handler in place, so only the latest
//! callback ever fires for that filter.

use super::model::{Message, MessageHandler, QoS};
use super::topics::{self, TopicError};

/// Outcome of [`SubscriptionTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    InvalidFilter(TopicError),
    TableFull,
}

struct Entry {
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

pub struct SubscriptionTable {
    entries: Vec<Entry>,
    capacity: usize,
}

impl SubscriptionTable {
    pub const DEFAULT_CAPACITY: usize = 8;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<Registration, SubscriptionError> {
        topics::validate_filter(filter).map_err(SubscriptionError::InvalidFilter)?;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.filter == filter) {
            entry.qos = qos;
            entry.handler = handler;
            return Ok(Registration::Replaced);
        }
        if self.entries.len() >= self.capacity {
            return Err(SubscriptionError::TableFull);
        }
        self.entries.push(Entry {
            filter: filter.to_string(),
            qos,
            handler,
        });
        Ok(Registration::Added)
    }

    /// Returns `true` if the filter was registered.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.filter != filter);
        self.entries.len() != before
    }

    pub fn qos_for(&self, filter: &str) -> Option<QoS> {
        self.entries.iter().find(|e| e.filter == filter).map(|e| e.qos)
    }

    /// Whether any registered filter selects `topic`.
    pub fn is_interested(&self, topic: &str) -> bool {
        self.entries.iter().any(|e| topics::matches(&e.filter, topic))
    }

    /// Hand `message` to every handler whose filter matches its topic.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, message: &Message<'_>) -> usize {
        let mut delivered = 0;
        for entry in &mut self.entries {
            if topics::matches(&entry.filter, message.topic) {
                (entry.handler)(message);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}
