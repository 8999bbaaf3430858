//! Bookkeeping of topics the session considers subscribed

/// Insertion-ordered set of topic names
///
/// Only used to support `unsubscribe_all`. Topics are added when a subscribe
/// is issued, not when it is acknowledged, so the set may hold topics the
/// broker refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<String>,
}

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `topic`; returns false when it was already present
    pub fn insert(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return false;
        }
        self.topics.push(topic.to_owned());
        true
    }

    pub fn extend<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.insert(topic.as_ref());
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Topics in insertion order
    pub fn to_vec(&self) -> Vec<String> {
        self.topics.clone()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
