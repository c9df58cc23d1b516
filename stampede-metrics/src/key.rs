use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Interned string id used for metric names, tag keys and tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashMap<Arc<str>, KeyId, RandomState>,
    names: Vec<Arc<str>>,
}

/// Append-only string interner shared by all series of a registry.
#[derive(Debug, Default)]
pub struct Interner {
    inner: RwLock<Inner>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> KeyId {
        if let Some(&id) = self.inner.read().ids.get(s) {
            return id;
        }

        let mut inner = self.inner.write();
        // Another writer may have won the race between the two locks.
        if let Some(&id) = inner.ids.get(s) {
            return id;
        }

        let id = KeyId(u32::try_from(inner.names.len()).unwrap_or(u32::MAX));
        let s: Arc<str> = Arc::from(s);
        inner.names.push(s.clone());
        inner.ids.insert(s, id);
        id
    }

    /// Looks up an id without interning.
    pub fn get(&self, s: &str) -> Option<KeyId> {
        self.inner.read().ids.get(s).copied()
    }

    pub fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().names.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable_and_resolvable() {
        let interner = Interner::new();
        let a = interner.intern("type");
        let b = interner.intern("read");
        assert_ne!(a, b);
        assert_eq!(interner.intern("type"), a);
        assert_eq!(interner.get("read"), Some(b));
        assert_eq!(interner.get("write"), None);
        assert_eq!(interner.resolve(a).as_deref(), Some("type"));
        assert_eq!(interner.len(), 2);
    }
}
