//! Name-keyed registry that remembers registration order.

/// Entries keyed by unique name; re-adding a name replaces the entry in place
#[derive(Debug)]
pub(crate) struct Registry<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> Registry<T> {
    /// Insert or overwrite; returns the replaced value, which is not shut down
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: T) -> Option<T> {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<T> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<T> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Copy of every entry in registration order, so callers can work without holding a lock
    pub(crate) fn snapshot(&self) -> Vec<(String, T)> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
