//! String, temp-string and config-key pools.
//!
//! All pools are append-only and deduplicating; indices are stable for the
//! lifetime of the pool. Temp strings are valid only for the source that
//! created them and carry a back-reference to the global pool.

use hashbrown::HashMap;

use forge_common::{Error, Result};

use crate::schema::{ConfigNameIndex, GlobalStringIndex, MainType, TempStringIndex};

/// Insertion-ordered deduplicating string pool.
#[derive(Default)]
pub struct StringPool {
    map: HashMap<String, usize>,
    list: Vec<String>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing index on re-insert.
    pub fn index(&mut self, value: &str) -> GlobalStringIndex {
        if let Some(&index) = self.map.get(value) {
            return GlobalStringIndex(index);
        }

        let index = self.list.len();
        self.list.push(value.to_owned());
        self.map.insert(value.to_owned(), index);
        GlobalStringIndex(index)
    }

    pub fn get(&self, index: GlobalStringIndex) -> Result<&str> {
        self.list
            .get(index.0)
            .map(String::as_str)
            .ok_or(Error::KeyNotFound)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.list.iter().map(String::as_str)
    }
}

/// Per-source scratch table mapping dense temp indices to global strings.
#[derive(Default)]
pub struct TempStringPool {
    map: HashMap<GlobalStringIndex, TempStringIndex>,
    list: Vec<GlobalStringIndex>,
}

impl TempStringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next temp index if this global index is new to the
    /// active source.
    pub fn index(&mut self, global: GlobalStringIndex) -> TempStringIndex {
        if let Some(&index) = self.map.get(&global) {
            return index;
        }

        let index = TempStringIndex(self.list.len());
        self.list.push(global);
        self.map.insert(global, index);
        index
    }

    pub fn get(&self, index: TempStringIndex) -> Result<GlobalStringIndex> {
        self.list.get(index.0).copied().ok_or(Error::KeyNotFound)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfigKeyDef {
    pub name: GlobalStringIndex,
    pub main_type: MainType,
}

/// Named configurable-value keys, typed by their reflected main type.
#[derive(Default)]
pub struct ConfigKeyPool {
    map: HashMap<GlobalStringIndex, ConfigNameIndex>,
    list: Vec<ConfigKeyDef>,
}

impl ConfigKeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a key, enforcing that a name is never reused with a
    /// conflicting main type.
    pub fn index(&mut self, name: GlobalStringIndex, main_type: MainType) -> Result<ConfigNameIndex> {
        if let Some(&index) = self.map.get(&name) {
            let existing = &self.list[index.0];
            if existing.main_type != main_type {
                return Err(Error::MalformedFile);
            }

            return Ok(index);
        }

        let index = ConfigNameIndex(self.list.len());
        self.list.push(ConfigKeyDef { name, main_type });
        self.map.insert(name, index);
        Ok(index)
    }

    pub fn get(&self, index: ConfigNameIndex) -> Result<ConfigKeyDef> {
        self.list.get(index.0).copied().ok_or(Error::KeyNotFound)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{GlobalStringIndex, MainType, TempStringIndex};

    use super::{ConfigKeyPool, StringPool, TempStringPool};

    #[test]
    fn string_pool_deduplicates() {
        let mut pool = StringPool::new();

        let a = pool.index("alpha");
        let b = pool.index("beta");
        let a2 = pool.index("alpha");

        assert_eq!(a, GlobalStringIndex(0));
        assert_eq!(b, GlobalStringIndex(1));
        assert_eq!(a, a2);
        assert_eq!(pool.get(a).unwrap(), "alpha");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn temp_pool_assigns_dense_indices() {
        let mut pool = TempStringPool::new();

        let first = pool.index(GlobalStringIndex(7));
        let second = pool.index(GlobalStringIndex(3));
        let again = pool.index(GlobalStringIndex(7));

        assert_eq!(first, TempStringIndex(0));
        assert_eq!(second, TempStringIndex(1));
        assert_eq!(first, again);
        assert_eq!(pool.get(second).unwrap(), GlobalStringIndex(3));
    }

    #[test]
    fn config_keys_reject_type_conflicts() {
        let mut pool = ConfigKeyPool::new();

        let key = pool.index(GlobalStringIndex(0), MainType::Filter).unwrap();
        let same = pool.index(GlobalStringIndex(0), MainType::Filter).unwrap();
        assert_eq!(key, same);

        assert!(pool.index(GlobalStringIndex(0), MainType::UInt32).is_err());
    }
}
