//! Global index → local slot lookup.
//!
//! `GlobalToLocalMap` is rebuilt from a `glb_idx` array after every
//! structural change and is read-only in between. Two layouts are offered:
//! a sorted vector (compact, binary search) and a hash map (O(1) lookups).

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;

use crate::config::LookupStrategy;
use crate::data::dof_store::{GlobalIndex, UNSET_INDEX};
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Mapping from global indices to local slots.
#[derive(Clone, Debug)]
pub enum GlobalToLocalMap {
    /// `(gid, slot)` pairs sorted by gid.
    Sorted(Vec<(GlobalIndex, usize)>),
    /// Hash map keyed by gid.
    Hashed(HashMap<GlobalIndex, usize>),
}

impl Default for GlobalToLocalMap {
    fn default() -> Self {
        GlobalToLocalMap::Sorted(Vec::new())
    }
}

impl GlobalToLocalMap {
    /// Build the map for `glb_idx`. Unset entries are skipped; a gid held by
    /// two slots is a `DuplicateGlobalIndex` error.
    pub fn build(
        kind: EntityKind,
        glb_idx: &[GlobalIndex],
        strategy: LookupStrategy,
    ) -> Result<Self, MeshIdentityError> {
        let duplicate = |gid: GlobalIndex, first: usize, second: usize| MeshIdentityError::DuplicateGlobalIndex {
            kind,
            gid,
            first,
            second,
        };
        match strategy {
            LookupStrategy::Sorted => {
                let mut pairs: Vec<(GlobalIndex, usize)> = glb_idx
                    .iter()
                    .copied()
                    .enumerate()
                    .filter(|&(_, g)| g != UNSET_INDEX)
                    .map(|(slot, g)| (g, slot))
                    .collect();
                pairs.sort_unstable();
                if let Some(w) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
                    return Err(duplicate(w[0].0, w[0].1, w[1].1));
                }
                Ok(GlobalToLocalMap::Sorted(pairs))
            }
            LookupStrategy::Hashed => {
                let mut map = HashMap::with_capacity(glb_idx.len());
                for (slot, &g) in glb_idx.iter().enumerate() {
                    if g == UNSET_INDEX {
                        continue;
                    }
                    match map.entry(g) {
                        Entry::Occupied(o) => return Err(duplicate(g, *o.get(), slot)),
                        Entry::Vacant(v) => {
                            v.insert(slot);
                        }
                    }
                }
                Ok(GlobalToLocalMap::Hashed(map))
            }
        }
    }

    /// Local slot holding `gid`, if any.
    pub fn get(&self, gid: GlobalIndex) -> Option<usize> {
        match self {
            GlobalToLocalMap::Sorted(pairs) => pairs
                .binary_search_by_key(&gid, |&(g, _)| g)
                .ok()
                .map(|i| pairs[i].1),
            GlobalToLocalMap::Hashed(map) => map.get(&gid).copied(),
        }
    }

    pub fn contains(&self, gid: GlobalIndex) -> bool {
        self.get(gid).is_some()
    }

    pub fn len(&self) -> usize {
        match self {
            GlobalToLocalMap::Sorted(pairs) => pairs.len(),
            GlobalToLocalMap::Hashed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
