use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{SeqAccess, Visitor},
    ser::SerializeSeq,
};

/// A new-type around an insertion-ordered map that serializes as a vector of
/// key/value pairs.
///
/// Catalog state is keyed by integer ids, but a serialized map with integer
/// keys is not valid in all formats (JSON requires string keys), so maps are
/// persisted as sequences of pairs. Insertion order is preserved, which keeps
/// the persisted form deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerdeVecMap<K: Eq + Hash, V>(IndexMap<K, V>);

impl<K: Eq + Hash, V> SerdeVecMap<K, V> {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(IndexMap::with_capacity(capacity))
    }
}

impl<K: Eq + Hash, V> Default for SerdeVecMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> From<IndexMap<K, V>> for SerdeVecMap<K, V> {
    fn from(map: IndexMap<K, V>) -> Self {
        Self(map)
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for SerdeVecMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K: Eq + Hash, V> IntoIterator for SerdeVecMap<K, V> {
    type Item = (K, V);
    type IntoIter = indexmap::map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, K: Eq + Hash, V> IntoIterator for &'a SerdeVecMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = indexmap::map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Eq + Hash, V> Deref for SerdeVecMap<K, V> {
    type Target = IndexMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K: Eq + Hash, V> DerefMut for SerdeVecMap<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K, V> Hash for SerdeVecMap<K, V>
where
    K: Eq + Hash,
    V: Hash,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0.len());
        for (k, v) in &self.0 {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl<K, V> Serialize for SerdeVecMap<K, V>
where
    K: Serialize + Eq + Hash,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for pair in &self.0 {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

impl<'de, K, V> Deserialize<'de> for SerdeVecMap<K, V>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(VecVisitor::new())
    }
}

struct VecVisitor<K, V>(PhantomData<(K, V)>);

impl<K, V> VecVisitor<K, V> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

impl<'de, K, V> Visitor<'de> for VecVisitor<K, V>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
{
    type Value = SerdeVecMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "a sequence of key/value pairs")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut map = IndexMap::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some((key, value)) = seq.next_element::<(K, V)>()? {
            map.insert(key, value);
        }
        Ok(SerdeVecMap(map))
    }
}

#[cfg(test)]
mod tests {
    use super::SerdeVecMap;
    use crate::{CatalogId, EntityId};

    #[test]
    fn serde_vec_map_with_json() {
        let mut map = SerdeVecMap::new();
        map.insert(EntityId::new(0), "foo");
        map.insert(EntityId::new(1), "bar");

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[[0,"foo"],[1,"bar"]]"#);

        let back: SerdeVecMap<EntityId, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&EntityId::new(0)).map(String::as_str), Some("foo"));
        assert_eq!(back.get(&EntityId::new(1)).map(String::as_str), Some("bar"));
    }

    #[test]
    fn insertion_order_survives_round_trip() {
        let map: SerdeVecMap<u64, u64> = (0..16).rev().map(|n| (n, n * 2)).collect();
        let json = serde_json::to_string(&map).unwrap();
        let back: SerdeVecMap<u64, u64> = serde_json::from_str(&json).unwrap();
        let keys: Vec<u64> = back.keys().copied().collect();
        assert_eq!(keys, (0..16).rev().collect::<Vec<u64>>());
    }

    #[test]
    fn composite_tuple_keys() {
        let mut map = SerdeVecMap::new();
        map.insert((EntityId::new(1), 4u64), "v");
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"[[[1,4],"v"]]"#);
        let back: SerdeVecMap<(EntityId, u64), String> = serde_json::from_str(&json).unwrap();
        assert!(back.contains_key(&(EntityId::new(1), 4)));
    }
}
