use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// File names currently being processed.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    names: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `name` unless present. The returned guard removes it again.
    pub fn try_acquire(&self, name: &str) -> Option<InFlightGuard> {
        if !self.lock().insert(name.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Membership of one name in an [`InFlightSet`], released on drop,
/// including during panic unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    name: String,
}

impl InFlightGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}
