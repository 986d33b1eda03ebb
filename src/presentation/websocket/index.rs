//! Topic Index
//!
//! Sessions by id plus a topic → session-id reverse index. Not synchronized;
//! the hub wraps it in a single reader/writer lock.

use std::collections::{HashMap, HashSet};

use super::operation::SessionId;
use super::session::SessionHandle;

/// Returned by [`TopicIndex::insert`] once the index has been sealed for shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSealed;

struct Entry {
    handle: SessionHandle,
    topics: HashSet<String>,
}

#[derive(Default)]
pub struct TopicIndex {
    sessions: HashMap<SessionId, Entry>,
    topics: HashMap<String, HashSet<SessionId>>,
    sealed: bool,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a session under each topic. Re-inserting a known session merges
    /// its topic sets. Returns `true` when the session was not indexed before.
    pub fn insert<I>(&mut self, handle: SessionHandle, topics: I) -> Result<bool, IndexSealed>
    where
        I: IntoIterator<Item = String>,
    {
        if self.sealed {
            return Err(IndexSealed);
        }

        let id = handle.id();
        let is_new = !self.sessions.contains_key(&id);
        let entry = self.sessions.entry(id).or_insert_with(|| Entry {
            handle,
            topics: HashSet::new(),
        });
        for topic in topics {
            self.topics.entry(topic.clone()).or_default().insert(id);
            entry.topics.insert(topic);
        }
        Ok(is_new)
    }

    /// Strip a session from every topic. Returns its handle if it was present.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionHandle> {
        let entry = self.sessions.remove(id)?;
        for topic in &entry.topics {
            if let Some(members) = self.topics.get_mut(topic) {
                members.remove(id);
                if members.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        Some(entry.handle)
    }

    /// Handles of every session subscribed to `topic`.
    pub fn subscribers<'a>(&'a self, topic: &str) -> impl Iterator<Item = &'a SessionHandle> + 'a {
        self.topics
            .get(topic)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.sessions.get(id).map(|entry| &entry.handle))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    #[cfg(test)]
    fn topics_of(&self, id: &SessionId) -> Option<&HashSet<String>> {
        self.sessions.get(id).map(|entry| &entry.topics)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Refuse further inserts and hand back every indexed session.
    pub fn seal(&mut self) -> Vec<SessionHandle> {
        self.sealed = true;
        self.topics.clear();
        self.sessions.drain().map(|(_, entry)| entry.handle).collect()
    }

    /// Both directions of the index agree.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward = self.sessions.iter().all(|(id, entry)| {
            entry
                .topics
                .iter()
                .all(|topic| self.topics.get(topic).is_some_and(|ids| ids.contains(id)))
        });
        let backward = self.topics.iter().all(|(topic, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    self.sessions
                        .get(id)
                        .is_some_and(|entry| entry.topics.contains(topic))
                })
        });
        forward && backward
    }
}
