//! Distributed assembly of residuals and Jacobians.
//!
//! Each element is integrated by exactly one partition. Contributions to rows
//! owned by other partitions are shipped to the row owner over a block
//! exchange schedule that, like the ghost sets, is derived locally from the
//! replicated mesh: for every peer pair both sides enumerate the same sorted
//! list of `(row, column)` block coordinates, so the payloads pair up
//! positionally.
//!
//! The assembled matrix has one block row per owned node and one block column
//! per local (owned or ghost) node; the leading square part couples owned
//! nodes among themselves.

use crate::comm::Communicator;
use crate::constitutive::ConstitutiveSet;
use crate::dof::DofMap;
use crate::element::{element_stiffness, ElementRegistry};
use crate::error::{NumericalFailure, PartitionError};
use crate::mesh::MeshData;
use crate::Real;
use garm_sparse::{is_finite, BsrMatrix, BsrPattern};
use nalgebra::{DMatrix, DMatrixView, DVector};
use rayon::prelude::*;
use std::sync::Arc;

const TAG_MATRIX: usize = 3;

/// Per-partition assembly state: the matrix sparsity pattern, the ghost-row
/// exchange schedule and the constrained local degrees of freedom.
#[derive(Debug)]
pub struct Assembler {
    pattern: Arc<BsrPattern>,
    /// Per peer: block coordinates (new numbering) this partition produces for
    /// rows the peer owns, sorted.
    send_blocks: Vec<Vec<(usize, usize)>>,
    /// Per peer: block coordinates for rows this partition owns that the peer
    /// produces, sorted identically on both sides.
    recv_blocks: Vec<Vec<(usize, usize)>>,
    /// Constrained local dof indices, ascending. Includes ghost dofs.
    constrained: Vec<usize>,
    /// Elements integrated by this partition.
    owned_elements: Vec<usize>,
}

impl Assembler {
    pub fn new<T: Real>(
        mesh: &MeshData<T>,
        dof_map: &DofMap,
        registry: &ElementRegistry<T>,
        constitutive: &ConstitutiveSet<T>,
    ) -> Result<Self, PartitionError> {
        let rank = dof_map.rank();

        for (element, connectivity) in mesh.elements.iter().enumerate() {
            let model = registry
                .get(connectivity.kind)
                .ok_or(PartitionError::UnknownElementKind { element })?;
            if connectivity.nodes.len() != model.nodes_per_element() {
                return Err(PartitionError::ConnectivityMismatch {
                    element,
                    expected: model.nodes_per_element(),
                    actual: connectivity.nodes.len(),
                });
            }
            if model.dofs_per_node() != mesh.dofs_per_node {
                return Err(PartitionError::BlockSizeMismatch {
                    element,
                    expected: mesh.dofs_per_node,
                    actual: model.dofs_per_node(),
                });
            }
            if constitutive.get(connectivity.constitutive).is_none() {
                return Err(PartitionError::ConstitutiveOutOfRange {
                    element,
                    handle: connectivity.constitutive.0,
                    num_models: constitutive.len(),
                });
            }
        }

        // Sparsity pattern: one coordinate per (owned node, element neighbor)
        // pair, plus the diagonal of every owned node so that constrained or
        // isolated nodes keep an entry to pin.
        let num_owned = dof_map.num_owned_nodes();
        let mut coordinates: Vec<(usize, usize)> = (0..num_owned).map(|i| (i, i)).collect();
        for connectivity in &mesh.elements {
            for &a in &connectivity.nodes {
                if !dof_map.is_owned_old(a) {
                    continue;
                }
                let row = dof_map
                    .local_node_of_old(a)
                    .unwrap_or_else(|| unreachable!("Owned nodes are always local."));
                for &b in &connectivity.nodes {
                    let col = dof_map
                        .local_node_of_old(b)
                        .unwrap_or_else(|| unreachable!("Element neighbors of owned nodes are ghosts."));
                    coordinates.push((row, col));
                }
            }
        }
        coordinates.par_sort_unstable();
        coordinates.dedup();
        let pattern = Arc::new(BsrPattern::from_block_coordinates(
            num_owned,
            dof_map.num_local_nodes(),
            mesh.dofs_per_node,
            coordinates,
        ));

        // Ghost-row exchange schedule in the new numbering.
        let size = dof_map.size();
        let mut send_blocks = vec![Vec::new(); size];
        let mut recv_blocks = vec![Vec::new(); size];
        let mut owned_elements = Vec::new();
        for (element, connectivity) in mesh.elements.iter().enumerate() {
            let integrator = mesh.element_owner[element];
            if integrator == rank {
                owned_elements.push(element);
            }
            for &a in &connectivity.nodes {
                let row_owner = mesh.node_owner[a];
                if row_owner == integrator {
                    continue;
                }
                let row = dof_map.new_of_old(a);
                if integrator == rank {
                    for &b in &connectivity.nodes {
                        send_blocks[row_owner].push((row, dof_map.new_of_old(b)));
                    }
                } else if row_owner == rank {
                    for &b in &connectivity.nodes {
                        recv_blocks[integrator].push((row, dof_map.new_of_old(b)));
                    }
                }
            }
        }
        for schedule in send_blocks.iter_mut().chain(recv_blocks.iter_mut()) {
            schedule.sort_unstable();
            schedule.dedup();
        }

        let constrained = dof_map.constrained_local_dofs(&mesh.constraints);

        Ok(Self {
            pattern,
            send_blocks,
            recv_blocks,
            constrained,
            owned_elements,
        })
    }

    pub fn pattern(&self) -> &Arc<BsrPattern> {
        &self.pattern
    }

    pub fn constrained_dofs(&self) -> &[usize] {
        &self.constrained
    }

    pub fn owned_elements(&self) -> &[usize] {
        &self.owned_elements
    }

    /// Gathers an element's node coordinates and local displacement block.
    fn element_dofs<T: Real>(&self, mesh: &MeshData<T>, dof_map: &DofMap, element: usize, state: &[T]) -> Vec<T> {
        let bs = dof_map.block_size();
        let connectivity = &mesh.elements[element];
        let mut dofs = Vec::with_capacity(connectivity.nodes.len() * bs);
        for &node in &connectivity.nodes {
            let local = dof_map
                .local_node_of_old(node)
                .unwrap_or_else(|| unreachable!("Integrated elements have local nodes only."));
            dofs.extend_from_slice(&state[local * bs..(local + 1) * bs]);
        }
        dofs
    }

    /// Assembles the residual `R(u) = f_int(u) - f_ext` over owned degrees of
    /// freedom, with constrained entries zeroed. `state` must be ghost-synced.
    pub fn assemble_residual<T, C>(
        &self,
        mesh: &MeshData<T>,
        dof_map: &DofMap,
        registry: &ElementRegistry<T>,
        constitutive: &ConstitutiveSet<T>,
        design: &[T],
        state: &[T],
        external: &[T],
        comm: &C,
    ) -> Result<Vec<T>, NumericalFailure>
    where
        T: Real,
        C: Communicator<T>,
    {
        assert_eq!(state.len(), dof_map.local_dofs());
        assert_eq!(external.len(), dof_map.owned_dofs());
        let bs = dof_map.block_size();
        let mut local = vec![T::zero(); dof_map.local_dofs()];

        for &element in &self.owned_elements {
            let connectivity = &mesh.elements[element];
            let model = registry
                .get(connectivity.kind)
                .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
            let material = constitutive
                .get(connectivity.constitutive)
                .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
            let nodes: Vec<_> = connectivity.nodes.iter().map(|&n| mesh.nodes[n]).collect();
            let stiffness = element_stiffness(model, &nodes, material, design)
                .map_err(|_| NumericalFailure::in_element("element quadrature", element))?;
            let dofs = DVector::from_vec(self.element_dofs(mesh, dof_map, element, state));
            let forces = stiffness * dofs;
            if forces.iter().any(|&f| !is_finite(f)) {
                return Err(NumericalFailure::in_element("residual assembly", element));
            }
            for (position, &node) in connectivity.nodes.iter().enumerate() {
                let local_node = dof_map
                    .local_node_of_old(node)
                    .unwrap_or_else(|| unreachable!("Integrated elements have local nodes only."));
                for component in 0..bs {
                    local[local_node * bs + component] += forces[position * bs + component];
                }
            }
        }

        dof_map.sync_add(comm, &mut local);

        let mut residual: Vec<T> = local[..dof_map.owned_dofs()]
            .iter()
            .zip(external)
            .map(|(&internal, &ext)| internal - ext)
            .collect();
        for &dof in &self.constrained {
            if dof < residual.len() {
                residual[dof] = T::zero();
            }
        }
        Ok(residual)
    }

    /// Assembles the Jacobian with homogeneous Dirichlet conditions applied:
    /// constrained rows and columns are zeroed and the constrained diagonal
    /// entries set to a representative scale, identical on every partition.
    pub fn assemble_jacobian<T, C>(
        &self,
        mesh: &MeshData<T>,
        dof_map: &DofMap,
        registry: &ElementRegistry<T>,
        constitutive: &ConstitutiveSet<T>,
        design: &[T],
        comm: &C,
    ) -> Result<BsrMatrix<T>, NumericalFailure>
    where
        T: Real + Send + Sync,
        C: Communicator<T>,
    {
        let bs = dof_map.block_size();
        let rank = dof_map.rank();
        let mut matrix = BsrMatrix::from_pattern(Arc::clone(&self.pattern));

        // Element stiffness matrices in parallel, scatter serially.
        let stiffnesses: Vec<(usize, Result<DMatrix<T>, ()>)> = self
            .owned_elements
            .par_iter()
            .map(|&element| {
                let connectivity = &mesh.elements[element];
                let model = registry
                    .get(connectivity.kind)
                    .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
                let material = constitutive
                    .get(connectivity.constitutive)
                    .unwrap_or_else(|| unreachable!("Validated in Assembler::new."));
                let nodes: Vec<_> = connectivity.nodes.iter().map(|&n| mesh.nodes[n]).collect();
                (element, element_stiffness(model, &nodes, material, design).map_err(|_| ()))
            })
            .collect();

        let mut outgoing: Vec<rustc_hash::FxHashMap<(usize, usize), DMatrix<T>>> =
            vec![rustc_hash::FxHashMap::default(); dof_map.size()];
        for (element, stiffness) in stiffnesses {
            let stiffness =
                stiffness.map_err(|()| NumericalFailure::in_element("element quadrature", element))?;
            if stiffness.iter().any(|&k| !is_finite(k)) {
                return Err(NumericalFailure::in_element("jacobian assembly", element));
            }
            let connectivity = &mesh.elements[element];
            for (position_a, &a) in connectivity.nodes.iter().enumerate() {
                let row_owner = mesh.node_owner[a];
                for (position_b, &b) in connectivity.nodes.iter().enumerate() {
                    let block = stiffness.view((position_a * bs, position_b * bs), (bs, bs));
                    if row_owner == rank {
                        let row = dof_map
                            .local_node_of_old(a)
                            .unwrap_or_else(|| unreachable!("Owned nodes are always local."));
                        let col = dof_map
                            .local_node_of_old(b)
                            .unwrap_or_else(|| unreachable!("Element neighbors are local."));
                        matrix.add_block(row, col, block);
                    } else {
                        let key = (dof_map.new_of_old(a), dof_map.new_of_old(b));
                        let entry = outgoing[row_owner]
                            .entry(key)
                            .or_insert_with(|| DMatrix::zeros(bs, bs));
                        *entry += block;
                    }
                }
            }
        }

        // Ship ghost-row blocks to their owners, in schedule order.
        for peer in 0..dof_map.size() {
            if self.send_blocks[peer].is_empty() {
                continue;
            }
            let mut payload = Vec::with_capacity(self.send_blocks[peer].len() * bs * bs);
            for key in &self.send_blocks[peer] {
                match outgoing[peer].get(key) {
                    Some(block) => payload.extend_from_slice(block.as_slice()),
                    None => payload.extend(std::iter::repeat(T::zero()).take(bs * bs)),
                }
            }
            comm.send(peer, TAG_MATRIX, &payload);
        }
        for peer in 0..dof_map.size() {
            if self.recv_blocks[peer].is_empty() {
                continue;
            }
            let payload = comm.recv(peer, TAG_MATRIX);
            assert_eq!(payload.len(), self.recv_blocks[peer].len() * bs * bs);
            for (position, &(row_new, col_new)) in self.recv_blocks[peer].iter().enumerate() {
                let row = dof_map
                    .local_node_of_new(row_new)
                    .unwrap_or_else(|| unreachable!("Receive schedule rows are owned."));
                let col = dof_map
                    .local_node_of_new(col_new)
                    .unwrap_or_else(|| unreachable!("Receive schedule columns are local."));
                let chunk = &payload[position * bs * bs..(position + 1) * bs * bs];
                matrix.add_block(row, col, DMatrixView::from_slice(chunk, bs, bs));
            }
        }

        self.apply_dirichlet(dof_map, comm, &mut matrix);

        if matrix.values().iter().any(|&v| !is_finite(v)) {
            return Err(NumericalFailure::new("jacobian assembly"));
        }
        Ok(matrix)
    }

    /// Zeroes constrained rows and columns and pins the constrained diagonal
    /// entries to the mean magnitude of the unconstrained diagonal, computed
    /// globally so every partition applies the same value.
    fn apply_dirichlet<T, C>(&self, dof_map: &DofMap, comm: &C, matrix: &mut BsrMatrix<T>)
    where
        T: Real,
        C: Communicator<T>,
    {
        let bs = dof_map.block_size();
        let owned_dofs = dof_map.owned_dofs();
        let mut constrained_mask = vec![false; dof_map.local_dofs()];
        for &dof in &self.constrained {
            constrained_mask[dof] = true;
        }

        let mut diagonal_stats = [T::zero(), T::zero()];
        for block_row in 0..dof_map.num_owned_nodes() {
            if let Some(diagonal) = matrix.diagonal_block(block_row) {
                for component in 0..bs {
                    let dof = block_row * bs + component;
                    if !constrained_mask[dof] {
                        diagonal_stats[0] += diagonal[(component, component)].abs();
                        diagonal_stats[1] += T::one();
                    }
                }
            }
        }
        comm.all_reduce_sum_slice(&mut diagonal_stats);
        let scale = if diagonal_stats[1] > T::zero() {
            diagonal_stats[0] / diagonal_stats[1]
        } else {
            T::one()
        };

        for block_row in 0..dof_map.num_owned_nodes() {
            let range = matrix.pattern().row_block_range(block_row);
            let columns: Vec<usize> = matrix.pattern().row_col_indices(block_row).to_vec();
            for (offset, block_col) in columns.into_iter().enumerate() {
                let mut block = matrix.block_mut(range.start + offset);
                for r in 0..bs {
                    let row_constrained = constrained_mask[block_row * bs + r];
                    for c in 0..bs {
                        let col_constrained = constrained_mask[block_col * bs + c];
                        if row_constrained || col_constrained {
                            block[(r, c)] = T::zero();
                        }
                    }
                }
            }
        }
        for &dof in &self.constrained {
            if dof >= owned_dofs {
                continue;
            }
            let (block_row, component) = (dof / bs, dof % bs);
            let idx = matrix
                .pattern()
                .find_block(block_row, block_row)
                .unwrap_or_else(|| unreachable!("Owned diagonal blocks are always in the pattern."));
            let mut diagonal = matrix.block_mut(idx);
            diagonal[(component, component)] = scale;
        }
    }
}
