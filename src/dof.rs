//! Degree-of-freedom numbering, ghost exchange and distributed vectors.
//!
//! Nodes are renumbered so that each partition owns a contiguous range of
//! global indices. On top of the owned range each partition keeps a set of
//! *ghost* nodes: every node it does not own that shares an element with one
//! of its owned nodes, or that belongs to an element the partition integrates.
//! Local vectors therefore have layout `[owned | ghosts]`, with ghosts sorted
//! by global index.
//!
//! Because the mesh is replicated, every partition computes the ghost sets of
//! *all* partitions and derives matching per-peer send and receive schedules
//! without communication. Messages between a pair of partitions always list
//! nodes in ascending global order, so the payloads pair up positionally.

use crate::comm::Communicator;
use crate::mesh::{Constraint, MeshData};
use crate::Real;
use rustc_hash::FxHashSet;
use std::ops::Range;

const TAG_BROADCAST: usize = 1;
const TAG_ACCUMULATE: usize = 2;

/// The degree-of-freedom map of one partition.
#[derive(Debug, Clone)]
pub struct DofMap {
    rank: usize,
    size: usize,
    block_size: usize,
    /// Prefix of owned-node counts in the new numbering, length `size + 1`.
    ownership_ranges: Vec<usize>,
    new_of_old: Vec<usize>,
    old_of_new: Vec<usize>,
    /// Ghost nodes of this partition, new numbering, ascending.
    ghost_nodes: Vec<usize>,
    /// Per peer: my owned nodes (new numbering) that are ghosts on the peer.
    send_nodes: Vec<Vec<usize>>,
    /// Per peer: nodes owned by the peer (new numbering) that are my ghosts.
    recv_nodes: Vec<Vec<usize>>,
}

impl DofMap {
    pub fn new<T: Real>(mesh: &MeshData<T>, rank: usize, size: usize) -> Self {
        assert!(rank < size);
        let num_nodes = mesh.num_nodes();

        // Renumber nodes so each partition's nodes are contiguous, preserving
        // the original order within a partition.
        let mut ownership_ranges = vec![0usize; size + 1];
        for &owner in &mesh.node_owner {
            ownership_ranges[owner + 1] += 1;
        }
        for i in 0..size {
            ownership_ranges[i + 1] += ownership_ranges[i];
        }
        let mut next = ownership_ranges.clone();
        let mut new_of_old = vec![0usize; num_nodes];
        let mut old_of_new = vec![0usize; num_nodes];
        for (old, &owner) in mesh.node_owner.iter().enumerate() {
            let new = next[owner];
            next[owner] += 1;
            new_of_old[old] = new;
            old_of_new[new] = old;
        }

        // Ghost sets of every partition. A node is a ghost of partition `t`
        // if `t` does not own it, and it appears in an element that contains a
        // node owned by `t` or that `t` integrates.
        let mut ghost_sets: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); size];
        for (element, connectivity) in mesh.elements.iter().enumerate() {
            let integrator = mesh.element_owner[element];
            for &node in &connectivity.nodes {
                let owner = mesh.node_owner[node];
                let new = new_of_old[node];
                if owner != integrator {
                    ghost_sets[integrator].insert(new);
                }
                for &other in &connectivity.nodes {
                    let other_owner = mesh.node_owner[other];
                    if other_owner != owner {
                        ghost_sets[owner].insert(new_of_old[other]);
                    }
                }
            }
        }

        let mut ghost_nodes: Vec<usize> = ghost_sets[rank].iter().copied().collect();
        ghost_nodes.sort_unstable();

        let owner_of_new = |new: usize| match ownership_ranges.binary_search(&new) {
            // `ownership_ranges` may contain repeated values for empty
            // partitions; pick the partition whose half-open range holds `new`.
            Ok(position) => (position..size).find(|&p| ownership_ranges[p + 1] > new).unwrap_or(position),
            Err(position) => position - 1,
        };

        let mut recv_nodes = vec![Vec::new(); size];
        for &ghost in &ghost_nodes {
            recv_nodes[owner_of_new(ghost)].push(ghost);
        }
        let owned = ownership_ranges[rank]..ownership_ranges[rank + 1];
        let mut send_nodes = vec![Vec::new(); size];
        for (peer, ghosts) in ghost_sets.iter().enumerate() {
            if peer == rank {
                continue;
            }
            let mut mine: Vec<usize> = ghosts.iter().copied().filter(|g| owned.contains(g)).collect();
            mine.sort_unstable();
            send_nodes[peer] = mine;
        }

        Self {
            rank,
            size,
            block_size: mesh.dofs_per_node,
            ownership_ranges,
            new_of_old,
            old_of_new,
            ghost_nodes,
            send_nodes,
            recv_nodes,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Owned nodes of this partition in the new numbering.
    pub fn owned_range(&self) -> Range<usize> {
        self.ownership_ranges[self.rank]..self.ownership_ranges[self.rank + 1]
    }

    pub fn num_owned_nodes(&self) -> usize {
        self.owned_range().len()
    }

    pub fn num_local_nodes(&self) -> usize {
        self.num_owned_nodes() + self.ghost_nodes.len()
    }

    pub fn num_global_nodes(&self) -> usize {
        self.new_of_old.len()
    }

    pub fn owned_dofs(&self) -> usize {
        self.num_owned_nodes() * self.block_size
    }

    pub fn local_dofs(&self) -> usize {
        self.num_local_nodes() * self.block_size
    }

    pub fn global_dofs(&self) -> usize {
        self.num_global_nodes() * self.block_size
    }

    pub fn ghost_nodes(&self) -> &[usize] {
        &self.ghost_nodes
    }

    pub fn new_of_old(&self, old_node: usize) -> usize {
        self.new_of_old[old_node]
    }

    pub fn old_of_new(&self, new_node: usize) -> usize {
        self.old_of_new[new_node]
    }

    /// Local index of a node given in the *original* numbering, if the node is
    /// known to this partition.
    pub fn local_node_of_old(&self, old_node: usize) -> Option<usize> {
        self.local_node_of_new(self.new_of_old[old_node])
    }

    /// Local index of a node given in the new numbering.
    pub fn local_node_of_new(&self, new_node: usize) -> Option<usize> {
        let owned = self.owned_range();
        if owned.contains(&new_node) {
            Some(new_node - owned.start)
        } else {
            self.ghost_nodes
                .binary_search(&new_node)
                .ok()
                .map(|position| owned.len() + position)
        }
    }

    pub fn is_owned_old(&self, old_node: usize) -> bool {
        self.owned_range().contains(&self.new_of_old[old_node])
    }

    /// Local degree-of-freedom indices of the homogeneous constraints known to
    /// this partition, ascending.
    pub fn constrained_local_dofs(&self, constraints: &[Constraint]) -> Vec<usize> {
        let mut dofs: Vec<usize> = constraints
            .iter()
            .filter_map(|c| {
                self.local_node_of_old(c.node)
                    .map(|local| local * self.block_size + c.component)
            })
            .collect();
        dofs.sort_unstable();
        dofs.dedup();
        dofs
    }

    /// Overwrites every ghost entry of `values` with the owner's value.
    /// `values` has local layout, `local_dofs()` entries.
    pub fn sync_broadcast<T, C>(&self, comm: &C, values: &mut [T])
    where
        T: Real,
        C: Communicator<T>,
    {
        assert_eq!(values.len(), self.local_dofs());
        let bs = self.block_size;
        let owned_start = self.owned_range().start;
        for peer in 0..self.size {
            if self.send_nodes[peer].is_empty() {
                continue;
            }
            let mut payload = Vec::with_capacity(self.send_nodes[peer].len() * bs);
            for &node in &self.send_nodes[peer] {
                let local = node - owned_start;
                payload.extend_from_slice(&values[local * bs..(local + 1) * bs]);
            }
            comm.send(peer, TAG_BROADCAST, &payload);
        }
        for peer in 0..self.size {
            if self.recv_nodes[peer].is_empty() {
                continue;
            }
            let payload = comm.recv(peer, TAG_BROADCAST);
            assert_eq!(payload.len(), self.recv_nodes[peer].len() * bs);
            for (position, &node) in self.recv_nodes[peer].iter().enumerate() {
                let local = self
                    .local_node_of_new(node)
                    .unwrap_or_else(|| unreachable!("Receive schedule only lists ghost nodes."));
                values[local * bs..(local + 1) * bs].copy_from_slice(&payload[position * bs..(position + 1) * bs]);
            }
        }
    }

    /// Accumulates ghost contributions into the owning partition and then
    /// broadcasts the owner's totals back, so that owned and ghost entries
    /// agree on every partition afterwards.
    pub fn sync_add<T, C>(&self, comm: &C, values: &mut [T])
    where
        T: Real,
        C: Communicator<T>,
    {
        assert_eq!(values.len(), self.local_dofs());
        let bs = self.block_size;
        let owned_start = self.owned_range().start;
        for peer in 0..self.size {
            if self.recv_nodes[peer].is_empty() {
                continue;
            }
            let mut payload = Vec::with_capacity(self.recv_nodes[peer].len() * bs);
            for &node in &self.recv_nodes[peer] {
                let local = self
                    .local_node_of_new(node)
                    .unwrap_or_else(|| unreachable!("Receive schedule only lists ghost nodes."));
                payload.extend_from_slice(&values[local * bs..(local + 1) * bs]);
            }
            comm.send(peer, TAG_ACCUMULATE, &payload);
        }
        for peer in 0..self.size {
            if self.send_nodes[peer].is_empty() {
                continue;
            }
            let payload = comm.recv(peer, TAG_ACCUMULATE);
            assert_eq!(payload.len(), self.send_nodes[peer].len() * bs);
            for (position, &node) in self.send_nodes[peer].iter().enumerate() {
                let local = node - owned_start;
                for component in 0..bs {
                    values[local * bs + component] += payload[position * bs + component];
                }
            }
        }
        self.sync_broadcast(comm, values);
    }

    /// Collects the owned entries of every partition into a full vector in the
    /// *original* node numbering, replicated on all partitions.
    pub fn gather_global<T, C>(&self, comm: &C, local: &[T]) -> Vec<T>
    where
        T: Real,
        C: Communicator<T>,
    {
        assert!(local.len() >= self.owned_dofs());
        let bs = self.block_size;
        let owned = self.owned_range();
        let mut global = vec![T::zero(); self.global_dofs()];
        for (local_node, new_node) in owned.enumerate() {
            let old = self.old_of_new[new_node];
            global[old * bs..(old + 1) * bs].copy_from_slice(&local[local_node * bs..(local_node + 1) * bs]);
        }
        comm.all_reduce_sum_slice(&mut global);
        global
    }

    /// Fills a local vector from a full vector in the original numbering.
    pub fn scatter_global<T: Real>(&self, global: &[T], local: &mut [T]) {
        assert_eq!(global.len(), self.global_dofs());
        assert_eq!(local.len(), self.local_dofs());
        let bs = self.block_size;
        let owned = self.owned_range();
        for local_node in 0..self.num_local_nodes() {
            let new_node = if local_node < owned.len() {
                owned.start + local_node
            } else {
                self.ghost_nodes[local_node - owned.len()]
            };
            let old = self.old_of_new[new_node];
            local[local_node * bs..(local_node + 1) * bs].copy_from_slice(&global[old * bs..(old + 1) * bs]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{spmd, SerialComm};
    use crate::mesh::{Constraint, ConstitutiveHandle, ElementConnectivity, ElementKind, MeshData};
    use nalgebra::point;

    fn strip_mesh(num_quads: usize) -> MeshData<f64> {
        // A strip of quads: nodes 0..=n along y = 0, n+1.. along y = 1.
        let columns = num_quads + 1;
        let mut nodes = Vec::new();
        for y in 0..2 {
            for x in 0..columns {
                nodes.push(point![x as f64, y as f64, 0.0]);
            }
        }
        let elements = (0..num_quads)
            .map(|i| ElementConnectivity {
                kind: ElementKind::ShellQuad4,
                nodes: vec![i, i + 1, columns + i + 1, columns + i],
                constitutive: ConstitutiveHandle(0),
            })
            .collect();
        MeshData::serial(nodes, elements, 2, Vec::new())
    }

    #[test]
    fn serial_map_has_no_ghosts() {
        let mesh = strip_mesh(3);
        let map = DofMap::new(&mesh, 0, 1);
        assert_eq!(map.num_owned_nodes(), 8);
        assert_eq!(map.num_local_nodes(), 8);
        assert!(map.ghost_nodes().is_empty());
        assert_eq!(map.owned_dofs(), 16);
        for old in 0..8 {
            assert_eq!(map.local_node_of_old(old), Some(map.new_of_old(old)));
        }
    }

    #[test]
    fn ghosts_cover_shared_element_nodes() {
        let mesh = strip_mesh(3).with_uniform_partition(2);
        // Nodes 0..4 on partition 0, nodes 4..8 on partition 1.
        let map0 = DofMap::new(&mesh, 0, 2);
        let map1 = DofMap::new(&mesh, 1, 2);
        assert_eq!(map0.num_owned_nodes(), 4);
        assert_eq!(map1.num_owned_nodes(), 4);
        // Every element of the strip touches both halves, so each side ghosts
        // all of the other side's element-adjacent nodes.
        assert!(!map0.ghost_nodes().is_empty());
        assert!(!map1.ghost_nodes().is_empty());
        // Symmetric schedules: whatever 0 receives from 1, 1 sends to 0.
        assert_eq!(map0.recv_nodes[1], map1.send_nodes[0]);
        assert_eq!(map1.recv_nodes[0], map0.send_nodes[1]);
        // All of an element's nodes are locally addressable on its integrator.
        for (element, connectivity) in mesh.elements.iter().enumerate() {
            let map = if mesh.element_owner[element] == 0 { &map0 } else { &map1 };
            for &node in &connectivity.nodes {
                assert!(map.local_node_of_old(node).is_some());
            }
        }
    }

    #[test]
    fn constrained_dofs_filter_to_local_nodes() {
        let mut mesh = strip_mesh(3);
        mesh.constraints = vec![
            Constraint { node: 0, component: 0 },
            Constraint { node: 0, component: 1 },
            Constraint { node: 7, component: 1 },
        ];
        let mesh = mesh.with_uniform_partition(2);
        let map0 = DofMap::new(&mesh, 0, 2);
        let dofs = map0.constrained_local_dofs(&mesh.constraints);
        let node0 = map0.local_node_of_old(0).unwrap();
        assert!(dofs.contains(&(node0 * 2)));
        assert!(dofs.contains(&(node0 * 2 + 1)));
    }

    #[test]
    fn sync_round_trip_matches_serial() {
        let mesh = strip_mesh(4);
        // Nodal "assembly": each node accumulates the number of elements that
        // contain it, once per integrating partition. After sync_add every
        // partition must see the serial totals.
        let serial = {
            let map = DofMap::new(&mesh, 0, 1);
            let mut values = vec![0.0f64; map.local_dofs()];
            for connectivity in &mesh.elements {
                for &node in &connectivity.nodes {
                    let local = map.local_node_of_old(node).unwrap();
                    values[local * 2] += 1.0;
                    values[local * 2 + 1] += 0.5;
                }
            }
            map.sync_add(&SerialComm, &mut values);
            map.gather_global(&SerialComm, &values)
        };

        for size in [2usize, 4] {
            let mesh = mesh.clone().with_uniform_partition(size);
            let results = spmd::<f64, _, _>(size, |comm| {
                let map = DofMap::new(&mesh, comm.rank(), comm.size());
                let mut values = vec![0.0f64; map.local_dofs()];
                for (element, connectivity) in mesh.elements.iter().enumerate() {
                    if mesh.element_owner[element] != comm.rank() {
                        continue;
                    }
                    for &node in &connectivity.nodes {
                        let local = map.local_node_of_old(node).unwrap();
                        values[local * 2] += 1.0;
                        values[local * 2 + 1] += 0.5;
                    }
                }
                map.sync_add(&comm, &mut values);
                map.gather_global(&comm, &values)
            });
            for gathered in results {
                assert_eq!(gathered, serial);
            }
        }
    }

    #[test]
    fn broadcast_overwrites_ghosts_with_owner_values() {
        let mesh = strip_mesh(3).with_uniform_partition(2);
        let results = spmd::<f64, _, _>(2, |comm| {
            let map = DofMap::new(&mesh, comm.rank(), comm.size());
            let mut values = vec![-1.0f64; map.local_dofs()];
            // Owners write their global node index, ghosts keep a sentinel.
            for (local_node, new_node) in map.owned_range().enumerate() {
                values[local_node * 2] = map.old_of_new(new_node) as f64;
                values[local_node * 2 + 1] = 100.0 + map.old_of_new(new_node) as f64;
            }
            map.sync_broadcast(&comm, &mut values);
            // Every ghost slot now holds the owner's value.
            let owned = map.num_owned_nodes();
            map.ghost_nodes()
                .iter()
                .enumerate()
                .map(|(i, &ghost)| {
                    let local = owned + i;
                    (values[local * 2], map.old_of_new(ghost) as f64)
                })
                .collect::<Vec<_>>()
        });
        for partition in results {
            for (value, expected) in partition {
                assert_eq!(value, expected);
            }
        }
    }

    #[test]
    fn scatter_then_gather_is_identity() {
        let mesh = strip_mesh(3).with_uniform_partition(2);
        let global: Vec<f64> = (0..16).map(|i| i as f64 * 0.25).collect();
        let results = spmd::<f64, _, _>(2, |comm| {
            let map = DofMap::new(&mesh, comm.rank(), comm.size());
            let mut local = vec![0.0f64; map.local_dofs()];
            map.scatter_global(&global, &mut local);
            map.gather_global(&comm, &local)
        });
        for gathered in results {
            assert_eq!(gathered, global);
        }
    }
}
