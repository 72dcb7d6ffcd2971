//! Thin façade over blocking collective communication.
//!
//! Every identity pass talks to its peers only through the four collectives of
//! [`Communicator`]. Messages are contiguous byte buffers; typed helpers cast
//! `bytemuck::Pod` records in and out of them.
//!
//! All ranks must issue the same sequence of collectives. There is no timeout:
//! a rank that skips a round leaves the others blocked.
//!
//! Backends:
//! - [`NoComm`]: one rank, every collective is the identity.
//! - [`ThreadComm`]: ranks are threads of one process sharing a mailbox.
//! - `MpiComm` (feature `mpi-support`): `MPI_COMM_WORLD`.

use crate::algs::wire::{cast_slice, decode_records};
use crate::mesh_error::MeshIdentityError;
use bytemuck::Pod;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Blocking collective communication interface.
pub trait Communicator {
    /// Rank of this process, `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participating ranks.
    fn size(&self) -> usize;

    /// `false` when there is a single rank and collectives degrade to no-ops.
    fn is_active(&self) -> bool {
        self.size() > 1
    }

    /// Exchange one buffer with every rank: `send[r]` goes to rank `r`,
    /// the result holds what rank `r` sent to us at index `r`.
    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError>;

    /// Gather `buf` from every rank, indexed by source rank.
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        self.all_to_all(vec![buf.to_vec(); self.size()])
    }

    /// Return `root`'s `data` on every rank.
    fn broadcast(&self, data: Vec<u8>, root: usize) -> Result<Vec<u8>, MeshIdentityError>;
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn is_active(&self) -> bool {
        (**self).is_active()
    }
    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        (**self).all_to_all(send)
    }
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        (**self).all_gather(buf)
    }
    fn broadcast(&self, data: Vec<u8>, root: usize) -> Result<Vec<u8>, MeshIdentityError> {
        (**self).broadcast(data, root)
    }
}

/// All-gather a slice of `Pod` records; result indexed by source rank.
pub fn all_gather_pod<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    items: &[T],
) -> Result<Vec<Vec<T>>, MeshIdentityError> {
    let raw = comm.all_gather(cast_slice(items))?;
    raw.iter()
        .enumerate()
        .map(|(src, bytes)| decode_records(src, bytes))
        .collect()
}

/// All-to-all of `Pod` record lists; `send[r]` goes to rank `r`.
pub fn all_to_all_pod<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    send: &[Vec<T>],
) -> Result<Vec<Vec<T>>, MeshIdentityError> {
    check_per_rank(comm, send.len())?;
    let bufs = send.iter().map(|v| cast_slice(v).to_vec()).collect();
    let raw = comm.all_to_all(bufs)?;
    raw.iter()
        .enumerate()
        .map(|(src, bytes)| decode_records(src, bytes))
        .collect()
}

/// `true` on every rank iff `flag` is `true` on at least one rank.
pub fn any_rank<C: Communicator + ?Sized>(comm: &C, flag: bool) -> Result<bool, MeshIdentityError> {
    if !comm.is_active() {
        return Ok(flag);
    }
    let all = comm.all_gather(&[u8::from(flag)])?;
    Ok(all.iter().any(|b| b.first().copied().unwrap_or(0) != 0))
}

/// Make a local outcome collective: when any rank failed, every rank fails.
///
/// A rank with its own error keeps it; the others return
/// [`MeshIdentityError::RemoteFailure`] naming the lowest failing rank. Call
/// it before the next collective so no rank is left blocked.
pub fn agree<T, C: Communicator + ?Sized>(
    comm: &C,
    local: Result<T, MeshIdentityError>,
) -> Result<T, MeshIdentityError> {
    if !comm.is_active() {
        return local;
    }
    let all = comm.all_gather(&[u8::from(local.is_err())])?;
    let failed = all
        .iter()
        .position(|b| b.first().copied().unwrap_or(0) != 0);
    match (local, failed) {
        (Err(e), _) => Err(e),
        (Ok(_), Some(rank)) => Err(MeshIdentityError::RemoteFailure { rank }),
        (Ok(v), None) => Ok(v),
    }
}

pub(crate) fn check_per_rank<C: Communicator + ?Sized>(
    comm: &C,
    len: usize,
) -> Result<(), MeshIdentityError> {
    if len == comm.size() {
        Ok(())
    } else {
        Err(MeshIdentityError::RankCountMismatch {
            expected: comm.size(),
            found: len,
        })
    }
}

/// Compile-time no-op comm for serial runs and unit tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn all_to_all(&self, mut send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        check_per_rank(self, send.len())?;
        let own = send.pop().unwrap_or_default();
        Ok(vec![own])
    }
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        Ok(vec![buf.to_vec()])
    }
    fn broadcast(&self, data: Vec<u8>, _root: usize) -> Result<Vec<u8>, MeshIdentityError> {
        Ok(data)
    }
}

// --- ThreadComm: ranks as threads of one process ---
type Key = (usize, usize, u64); // (src, dst, epoch)

/// In-process communicator: each rank runs on its own thread and owns one
/// `ThreadComm` from [`ThreadComm::universe`].
///
/// Collectives are matched by a per-rank epoch counter, so ranks must call
/// them in the same order (exactly as with MPI).
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<DashMap<Key, Bytes>>,
    epoch: AtomicU64,
}

impl ThreadComm {
    /// Create `size` connected communicators, one per rank.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                epoch: AtomicU64::new(0),
            })
            .collect()
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn post(&self, dst: usize, epoch: u64, data: Vec<u8>) {
        self.mailbox.insert((self.rank, dst, epoch), Bytes::from(data));
    }

    fn take(&self, src: usize, epoch: u64) -> Vec<u8> {
        let key = (src, self.rank, epoch);
        loop {
            if let Some((_, bytes)) = self.mailbox.remove(&key) {
                return bytes.to_vec();
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
        check_per_rank(self, send.len())?;
        let epoch = self.next_epoch();
        for (dst, data) in send.into_iter().enumerate() {
            self.post(dst, epoch, data);
        }
        Ok((0..self.size).map(|src| self.take(src, epoch)).collect())
    }
    fn broadcast(&self, data: Vec<u8>, root: usize) -> Result<Vec<u8>, MeshIdentityError> {
        if root >= self.size {
            return Err(MeshIdentityError::CommError {
                neighbor: root,
                reason: format!("broadcast root out of range (size {})", self.size),
            });
        }
        let epoch = self.next_epoch();
        if self.rank == root {
            for dst in (0..self.size).filter(|&d| d != root) {
                self.post(dst, epoch, data.clone());
            }
            Ok(data)
        } else {
            Ok(self.take(root, epoch))
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        /// Initialize MPI. Returns `None` if MPI was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    fn displs(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect()
    }

    fn split(buf: Vec<u8>, counts: &[Count]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(counts.len());
        let mut start = 0usize;
        for &c in counts {
            let end = start + c as usize;
            out.push(buf[start..end].to_vec());
            start = end;
        }
        out
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
            check_per_rank(self, send.len())?;
            let send_counts: Vec<Count> = send.iter().map(|v| v.len() as Count).collect();
            let mut recv_counts = vec![0 as Count; self.size];
            self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
            let send_displs = displs(&send_counts);
            let recv_displs = displs(&recv_counts);
            let flat: Vec<u8> = send.concat();
            let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
            let mut recv = vec![0u8; total];
            {
                let sp = Partition::new(&flat[..], &send_counts[..], &send_displs[..]);
                let mut rp =
                    PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
                self.world.all_to_all_varcount_into(&sp, &mut rp);
            }
            Ok(split(recv, &recv_counts))
        }

        fn all_gather(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>, MeshIdentityError> {
            let mine = buf.len() as Count;
            let mut counts = vec![0 as Count; self.size];
            self.world.all_gather_into(&mine, &mut counts[..]);
            let d = displs(&counts);
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut recv = vec![0u8; total];
            {
                let mut rp = PartitionMut::new(&mut recv[..], &counts[..], &d[..]);
                self.world.all_gather_varcount_into(buf, &mut rp);
            }
            Ok(split(recv, &counts))
        }

        fn broadcast(&self, mut data: Vec<u8>, root: usize) -> Result<Vec<u8>, MeshIdentityError> {
            let root_proc = self.world.process_at_rank(root as i32);
            let mut len = data.len() as u64;
            root_proc.broadcast_into(&mut len);
            data.resize(len as usize, 0);
            root_proc.broadcast_into(&mut data[..]);
            Ok(data)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
