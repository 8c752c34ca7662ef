//! Environments.
//!
//! Where possible we try to stick to flat, low-indirection environments like
//! [`UniqueEnv`], but when we need to copy environments often (for example
//! when capturing the scope of an inference variable), we use a [`SharedEnv`]
//! to increase the amount of sharing at the expense of locality.

use std::fmt;

/// The length of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvLen(usize);

impl EnvLen {
    /// Construct a new, empty environment.
    pub fn new() -> EnvLen {
        EnvLen(0)
    }

    /// The index of the next entry that will be pushed onto an environment of
    /// this length.
    pub fn next_index(self) -> usize {
        self.0
    }
}

impl From<EnvLen> for usize {
    fn from(len: EnvLen) -> usize {
        len.0
    }
}

/// A uniquely owned environment.
#[derive(Debug, Clone)]
pub struct UniqueEnv<Entry> {
    entries: Vec<Entry>,
}

impl<Entry> UniqueEnv<Entry> {
    /// Construct a new, empty environment.
    pub fn new() -> UniqueEnv<Entry> {
        UniqueEnv {
            entries: Vec::new(),
        }
    }

    /// The length of the environment.
    pub fn len(&self) -> EnvLen {
        EnvLen(self.entries.len())
    }

    /// Push an entry onto the environment.
    pub fn push(&mut self, entry: Entry) {
        assert!(self.entries.len() < u32::MAX as usize);
        self.entries.push(entry);
    }

    /// Truncate the environment to the given length.
    pub fn truncate(&mut self, len: EnvLen) {
        self.entries.truncate(len.0);
    }

    /// Lookup an entry in the environment.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Set an entry in the environment.
    pub fn set(&mut self, index: usize, entry: Entry) {
        self.entries[index] = entry;
    }

    /// Iterate over the elements in the environment.
    pub fn iter(&self) -> impl '_ + DoubleEndedIterator<Item = &'_ Entry> {
        self.entries.iter()
    }
}

impl<Entry> Default for UniqueEnv<Entry> {
    fn default() -> Self {
        UniqueEnv::new()
    }
}

/// A persistent environment with structural sharing.
#[derive(Clone)]
pub struct SharedEnv<Entry> {
    // An `rpds::Vector` is used instead of an `im::Vector` as it's a bit
    // more compact. Scopes of inference variables are snapshots of the local
    // environment, so they get cloned often.
    entries: rpds::VectorSync<Entry>,
}

impl<Entry> SharedEnv<Entry> {
    /// Construct a new, empty environment.
    pub fn new() -> SharedEnv<Entry> {
        SharedEnv {
            entries: rpds::Vector::new_sync(),
        }
    }

    /// The length of the environment.
    pub fn len(&self) -> EnvLen {
        EnvLen(self.entries.len())
    }

    /// Lookup an entry in the environment.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Push an entry onto the environment.
    pub fn push(&mut self, entry: Entry) {
        assert!(self.entries.len() < u32::MAX as usize);
        self.entries.push_back_mut(entry);
    }

    /// Pop an entry off the environment.
    pub fn pop(&mut self) {
        self.entries.drop_last_mut();
    }

    /// Truncate the environment to the given length.
    pub fn truncate(&mut self, len: EnvLen) {
        (len.0..self.len().0).for_each(|_| self.pop());
    }

    /// Iterate over the elements in the environment.
    pub fn iter(&self) -> impl '_ + DoubleEndedIterator<Item = &'_ Entry> {
        self.entries.iter()
    }
}

impl<Entry> Default for SharedEnv<Entry> {
    fn default() -> Self {
        SharedEnv::new()
    }
}

impl<Entry: fmt::Debug> fmt::Debug for SharedEnv<Entry> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEnv")
            .field("entries", &DebugEntries(&self.entries))
            .finish()
    }
}

struct DebugEntries<'a, Entry>(&'a rpds::VectorSync<Entry>);

impl<'a, Entry: fmt::Debug> fmt::Debug for DebugEntries<'a, Entry> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_env_truncate_keeps_snapshot() {
        let mut env = SharedEnv::new();
        env.push(1);
        env.push(2);
        let snapshot = env.clone();
        env.push(3);
        env.truncate(EnvLen(1));

        assert_eq!(env.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(snapshot.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unique_env_set_overwrites_entry() {
        let mut env = UniqueEnv::new();
        env.push(None);
        env.push(None);
        env.set(1, Some("solved"));

        assert_eq!(env.get(1), Some(&Some("solved")));
        assert_eq!(env.len().next_index(), 2);
    }
}
