// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed name registry for graph objects.
//!
//! Names are unique across the whole namespace; each entry carries a type
//! tag and a handle. Iteration is per type, in insertion order, which keeps
//! `list_modules` stable across calls. All mutation happens on the control
//! plane under the pause barrier, so no interior synchronization is needed.

use ahash::AHashMap;

use crate::error::EngineError;

/// Kinds of objects the namespace can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NsType {
    Module,
    Class,
}

#[derive(Debug)]
struct NsEntry<H> {
    ty: NsType,
    handle: H,
}

/// `(type, name) -> handle` store with per-type insertion-ordered iteration.
#[derive(Debug)]
pub struct Namespace<H> {
    map: AHashMap<String, NsEntry<H>>,
    // insertion order per type; removal is a linear scan, which only ever
    // runs on the control path
    order: AHashMap<NsType, Vec<String>>,
}

impl<H: Copy> Namespace<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: AHashMap::new(),
            order: AHashMap::new(),
        }
    }

    /// Register `name` under `ty`. Fails if the name is taken by any type.
    pub fn insert(&mut self, ty: NsType, name: &str, handle: H) -> Result<(), EngineError> {
        if self.map.contains_key(name) {
            return Err(EngineError::NameConflict(name.to_owned()));
        }
        self.map.insert(name.to_owned(), NsEntry { ty, handle });
        self.order.entry(ty).or_default().push(name.to_owned());
        Ok(())
    }

    /// Look up `name`, requiring it to be of type `ty`.
    #[must_use]
    pub fn lookup(&self, ty: NsType, name: &str) -> Option<H> {
        self.map
            .get(name)
            .filter(|entry| entry.ty == ty)
            .map(|entry| entry.handle)
    }

    /// Whether `name` exists under any type.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Remove `name` regardless of its type; returns its handle if present.
    pub fn remove(&mut self, name: &str) -> Option<H> {
        let entry = self.map.remove(name)?;
        if let Some(names) = self.order.get_mut(&entry.ty) {
            if let Some(pos) = names.iter().position(|n| n == name) {
                names.remove(pos);
            }
        }
        Some(entry.handle)
    }

    /// Number of entries of type `ty`.
    #[must_use]
    pub fn len(&self, ty: NsType) -> usize {
        self.order.get(&ty).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self, ty: NsType) -> bool {
        self.len(ty) == 0
    }

    /// Cursor over all entries of type `ty`, each yielded exactly once, in
    /// insertion order. Dropping the iterator releases it.
    pub fn iter(&self, ty: NsType) -> NsIter<'_, H> {
        NsIter {
            ns: self,
            names: self.order.get(&ty).map_or(&[], Vec::as_slice),
            pos: 0,
        }
    }
}

impl<H: Copy> Default for Namespace<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator handed out by [`Namespace::iter`].
#[derive(Debug)]
pub struct NsIter<'a, H> {
    ns: &'a Namespace<H>,
    names: &'a [String],
    pos: usize,
}

impl<'a, H: Copy> Iterator for NsIter<'a, H> {
    type Item = (&'a str, H);

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.get(self.pos)?;
        self.pos += 1;
        let entry = self.ns.map.get(name)?;
        Some((name.as_str(), entry.handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut ns: Namespace<u32> = Namespace::new();
        ns.insert(NsType::Module, "m0", 7).unwrap();
        assert_eq!(ns.lookup(NsType::Module, "m0"), Some(7));
        // wrong type does not match
        assert_eq!(ns.lookup(NsType::Class, "m0"), None);
        assert_eq!(ns.remove("m0"), Some(7));
        assert_eq!(ns.lookup(NsType::Module, "m0"), None);
    }

    #[test]
    fn duplicate_names_conflict_across_types() {
        let mut ns: Namespace<u32> = Namespace::new();
        ns.insert(NsType::Module, "x", 0).unwrap();
        assert!(matches!(
            ns.insert(NsType::Module, "x", 1),
            Err(EngineError::NameConflict(_))
        ));
        assert!(matches!(
            ns.insert(NsType::Class, "x", 1),
            Err(EngineError::NameConflict(_))
        ));
    }

    #[test]
    fn iteration_is_per_type_and_insertion_ordered() {
        let mut ns: Namespace<u32> = Namespace::new();
        ns.insert(NsType::Module, "b", 1).unwrap();
        ns.insert(NsType::Class, "klass", 99).unwrap();
        ns.insert(NsType::Module, "a", 2).unwrap();

        let mods: Vec<_> = ns.iter(NsType::Module).collect();
        assert_eq!(mods, vec![("b", 1), ("a", 2)]);
        assert_eq!(ns.len(NsType::Module), 2);
        assert_eq!(ns.len(NsType::Class), 1);

        // removal keeps order of the rest
        ns.remove("b");
        let mods: Vec<_> = ns.iter(NsType::Module).map(|(n, _)| n).collect();
        assert_eq!(mods, vec!["a"]);
    }
}
