//! Ghost bookkeeping for one entity kind.
//!
//! Holds the global → local lookup and the cached halo schedule. Both are
//! dropped on every structural change; the lookup is rebuilt eagerly by the
//! identity pass, the schedule lazily on the next exchange.

use crate::config::LookupStrategy;
use crate::data::dof_store::GlobalIndex;
use crate::data::global_map::GlobalToLocalMap;
use crate::mesh_error::MeshIdentityError;
use crate::overlap::halo::{FieldSync, HaloSchedule};
use crate::topology::EntityKind;

#[derive(Clone, Debug)]
pub struct GhostSynchronizer {
    kind: EntityKind,
    strategy: LookupStrategy,
    map: GlobalToLocalMap,
    schedule: Option<HaloSchedule>,
}

impl GhostSynchronizer {
    pub fn new(kind: EntityKind, strategy: LookupStrategy) -> Self {
        Self {
            kind,
            strategy,
            map: GlobalToLocalMap::default(),
            schedule: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Drop the lookup and the cached schedule.
    pub fn invalidate(&mut self) {
        self.map = GlobalToLocalMap::default();
        self.schedule = None;
    }

    /// Rebuild the lookup from the current global indices.
    pub fn rebuild(&mut self, glb_idx: &[GlobalIndex]) -> Result<(), MeshIdentityError> {
        self.invalidate();
        self.map = GlobalToLocalMap::build(self.kind, glb_idx, self.strategy)?;
        Ok(())
    }

    /// Local slot of `gid`, if this rank holds a copy.
    pub fn lookup(&self, gid: GlobalIndex) -> Option<usize> {
        self.map.get(gid)
    }

    pub fn map(&self) -> &GlobalToLocalMap {
        &self.map
    }

    pub fn has_schedule(&self) -> bool {
        self.schedule.is_some()
    }

    /// Cached halo schedule, computed through `sync` on first use.
    ///
    /// Collective when nothing is cached: all ranks must call it together
    /// after a rebuild.
    pub fn schedule<F: FieldSync + ?Sized>(
        &mut self,
        glb_idx: &[GlobalIndex],
        ranks: &[usize],
        sync: &mut F,
    ) -> Result<&HaloSchedule, MeshIdentityError> {
        if self.schedule.is_none() {
            sync.register(self.kind, glb_idx, ranks)?;
            self.schedule = Some(sync.compute_schedule(self.kind)?);
        }
        self.schedule
            .as_ref()
            .ok_or_else(|| MeshIdentityError::IdentityMismatch("halo schedule missing".into()))
    }

    /// Refresh ghost entries of `values` (`width` per slot) from their owners.
    pub fn synchronize<F: FieldSync + ?Sized>(
        &mut self,
        glb_idx: &[GlobalIndex],
        ranks: &[usize],
        sync: &mut F,
        channel: &str,
        width: usize,
        values: &mut [f64],
    ) -> Result<(), MeshIdentityError> {
        let kind = self.kind;
        let schedule = self.schedule(glb_idx, ranks, sync)?;
        sync.synchronize(kind, schedule, channel, width, values)
    }
}
