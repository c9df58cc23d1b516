use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted, de-duplicated set of interned `key=value` pairs identifying one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // SmallVec to avoid allocation for small tag sets (usually < 6)
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 6]>,
}

impl TagSet {
    /// Builds a tag set from arbitrary pairs. For duplicate keys the last value wins.
    pub fn from_pairs(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 6]> = SmallVec::new();
        for (k, v) in iter {
            match tags.iter_mut().find(|(ek, _)| *ek == k) {
                Some(slot) => slot.1 = v,
                None => tags.push((k, v)),
            }
        }
        tags.sort_unstable_by_key(|(k, _)| *k);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }
}
