//! Halo exchange schedules and the field-sync collaborator.
//!
//! A [`HaloSchedule`] lists, per peer rank, which owned slots are sent and
//! which ghost slots are received. Both lists are ordered by global index
//! within a peer, so sender and receiver walk the same sequence.

use hashbrown::HashMap;
use log::trace;

use crate::algs::communicator::{Communicator, all_to_all_pod};
use crate::algs::wire::cast_slice;
use crate::data::dof_store::GlobalIndex;
use crate::mesh_error::MeshIdentityError;
use crate::topology::EntityKind;

/// Exchange pattern for one entity kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloSchedule {
    /// `(peer, local slot)` of owned entities whose values go to `peer`.
    pub sends: Vec<(usize, usize)>,
    /// `(peer, local slot)` of ghost entities filled from `peer`.
    pub recvs: Vec<(usize, usize)>,
}

impl HaloSchedule {
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.recvs.is_empty()
    }

    /// Slots sent to `peer`, in exchange order.
    pub fn sends_to(&self, peer: usize) -> impl Iterator<Item = usize> + '_ {
        self.sends
            .iter()
            .filter(move |&&(p, _)| p == peer)
            .map(|&(_, s)| s)
    }

    /// Slots received from `peer`, in exchange order.
    pub fn recvs_from(&self, peer: usize) -> impl Iterator<Item = usize> + '_ {
        self.recvs
            .iter()
            .filter(move |&&(p, _)| p == peer)
            .map(|&(_, s)| s)
    }

    /// Distinct peers this rank talks to.
    pub fn peers(&self) -> Vec<usize> {
        let mut p: Vec<usize> = self
            .sends
            .iter()
            .chain(&self.recvs)
            .map(|&(p, _)| p)
            .collect();
        p.sort_unstable();
        p.dedup();
        p
    }
}

/// Field/halo synchronization collaborator.
///
/// Implementations are collective: `compute_schedule` and `synchronize` must
/// be called on every rank in the same order.
pub trait FieldSync {
    /// Hand over the identity arrays of one entity kind.
    fn register(
        &mut self,
        kind: EntityKind,
        glb_idx: &[GlobalIndex],
        ranks: &[usize],
    ) -> Result<(), MeshIdentityError>;

    /// Build the exchange pattern for the registered arrays of `kind`.
    fn compute_schedule(&mut self, kind: EntityKind) -> Result<HaloSchedule, MeshIdentityError>;

    /// Copy owner values into ghost slots of `values` (`width` per slot).
    fn synchronize(
        &mut self,
        kind: EntityKind,
        schedule: &HaloSchedule,
        channel: &str,
        width: usize,
        values: &mut [f64],
    ) -> Result<(), MeshIdentityError>;
}

#[derive(Clone, Debug)]
struct Registration {
    glb_idx: Vec<GlobalIndex>,
    ranks: Vec<usize>,
}

/// [`FieldSync`] over a [`Communicator`].
///
/// Ghost holders request their global indices from the owners with one
/// all-to-all; values then travel owner → ghost with one all-to-all per
/// `synchronize`. A channel's width is fixed by its first use.
#[derive(Debug)]
pub struct CommFieldSync<C> {
    comm: C,
    registered: HashMap<EntityKind, Registration>,
    channels: HashMap<String, usize>,
}

impl<C: Communicator> CommFieldSync<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            registered: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    fn registration(&self, kind: EntityKind) -> Result<&Registration, MeshIdentityError> {
        self.registered.get(&kind).ok_or_else(|| {
            MeshIdentityError::IdentityMismatch(format!("{kind:?} arrays were never registered"))
        })
    }

    fn check_channel(&mut self, channel: &str, width: usize) -> Result<(), MeshIdentityError> {
        match self.channels.get(channel) {
            Some(&w) if w != width => Err(MeshIdentityError::FieldWidthMismatch {
                expected: w,
                found: width,
            }),
            Some(_) => Ok(()),
            None => {
                self.channels.insert(channel.to_owned(), width);
                Ok(())
            }
        }
    }
}

impl<C: Communicator> FieldSync for CommFieldSync<C> {
    fn register(
        &mut self,
        kind: EntityKind,
        glb_idx: &[GlobalIndex],
        ranks: &[usize],
    ) -> Result<(), MeshIdentityError> {
        if glb_idx.len() != ranks.len() {
            return Err(MeshIdentityError::IndexOutOfRange {
                kind,
                index: ranks.len(),
                len: glb_idx.len(),
            });
        }
        self.registered.insert(
            kind,
            Registration {
                glb_idx: glb_idx.to_vec(),
                ranks: ranks.to_vec(),
            },
        );
        Ok(())
    }

    fn compute_schedule(&mut self, kind: EntityKind) -> Result<HaloSchedule, MeshIdentityError> {
        let me = self.comm.rank();
        let size = self.comm.size();
        let reg = self.registration(kind)?;

        // ghost slots grouped by owner, ordered by gid
        let mut wanted: Vec<Vec<(GlobalIndex, usize)>> = vec![Vec::new(); size];
        for (slot, (&g, &r)) in reg.glb_idx.iter().zip(&reg.ranks).enumerate() {
            if r == me {
                continue;
            }
            if r >= size {
                return Err(MeshIdentityError::RankOutOfRange {
                    kind,
                    slot,
                    rank: r,
                    size,
                });
            }
            wanted[r].push((g, slot));
        }
        for w in &mut wanted {
            w.sort_unstable();
        }
        let recvs: Vec<(usize, usize)> = wanted
            .iter()
            .enumerate()
            .flat_map(|(peer, w)| w.iter().map(move |&(_, s)| (peer, s)))
            .collect();

        if !self.comm.is_active() {
            return Ok(HaloSchedule {
                sends: Vec::new(),
                recvs,
            });
        }

        let requests: Vec<Vec<u64>> = wanted
            .iter()
            .map(|w| w.iter().map(|&(g, _)| g.to_le()).collect())
            .collect();
        let incoming = all_to_all_pod(&self.comm, &requests)?;

        let owned: HashMap<GlobalIndex, usize> = reg
            .glb_idx
            .iter()
            .zip(&reg.ranks)
            .enumerate()
            .filter(|&(_, (_, &r))| r == me)
            .map(|(slot, (&g, _))| (g, slot))
            .collect();
        let mut sends = Vec::new();
        for (peer, gids) in incoming.iter().enumerate() {
            for &g in gids {
                let g = u64::from_le(g);
                let slot = owned.get(&g).copied().ok_or_else(|| {
                    MeshIdentityError::IdentityMismatch(format!(
                        "rank {peer} expects {kind:?} {g} from rank {me}, which does not own it"
                    ))
                })?;
                sends.push((peer, slot));
            }
        }
        trace!(
            "[rank {me}] {kind:?} halo: {} sends, {} recvs",
            sends.len(),
            recvs.len()
        );
        Ok(HaloSchedule { sends, recvs })
    }

    fn synchronize(
        &mut self,
        kind: EntityKind,
        schedule: &HaloSchedule,
        channel: &str,
        width: usize,
        values: &mut [f64],
    ) -> Result<(), MeshIdentityError> {
        self.check_channel(channel, width)?;
        let n = self.registration(kind)?.glb_idx.len();
        if values.len() != n * width {
            return Err(MeshIdentityError::FieldWidthMismatch {
                expected: n * width,
                found: values.len(),
            });
        }
        if !self.comm.is_active() || width == 0 {
            return Ok(());
        }
        let size = self.comm.size();
        let mut send: Vec<Vec<f64>> = vec![Vec::new(); size];
        for &(peer, slot) in &schedule.sends {
            send[peer].extend_from_slice(&values[slot * width..(slot + 1) * width]);
        }
        let recv = all_to_all_pod(&self.comm, &send)?;
        for (peer, data) in recv.iter().enumerate() {
            let slots: Vec<usize> = schedule.recvs_from(peer).collect();
            if data.len() != slots.len() * width {
                return Err(MeshIdentityError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: slots.len() * width * 8,
                    got: cast_slice(data).len(),
                });
            }
            for (chunk, &slot) in data.chunks_exact(width).zip(&slots) {
                values[slot * width..(slot + 1) * width].copy_from_slice(chunk);
            }
        }
        trace!("[rank {}] synchronized channel {channel} ({kind:?})", self.comm.rank());
        Ok(())
    }
}
