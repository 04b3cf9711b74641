//! Mesh and partition description.
//!
//! A [`MeshData`] is replicated on every partition: coordinates, connectivity
//! and ownership are globally known, which lets each partition derive its
//! degree-of-freedom numbering and exchange schedules deterministically,
//! without any setup communication. Only state and matrix values are
//! distributed.

use crate::error::PartitionError;
use crate::Real;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// The element kinds understood by the standard registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// Two-node Euler-Bernoulli beam with transverse deflection and rotation
    /// per node.
    BeamEuler2,
    /// Four-node planar membrane with in-plane displacements per node.
    ShellQuad4,
    /// Eight-node trilinear hexahedron with three displacements per node.
    SolidHex8,
}

/// Index of a constitutive model in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstitutiveHandle(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementConnectivity {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    pub constitutive: ConstitutiveHandle,
}

/// A homogeneous Dirichlet constraint on one component of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub node: usize,
    pub component: usize,
}

/// A globally replicated mesh with node and element ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData<T: Real> {
    pub nodes: Vec<Point3<T>>,
    pub elements: Vec<ElementConnectivity>,
    /// Degrees of freedom per node, uniform across the mesh.
    pub dofs_per_node: usize,
    /// Owning partition of each node.
    pub node_owner: Vec<usize>,
    /// Owning partition of each element. Exactly one partition integrates each
    /// element.
    pub element_owner: Vec<usize>,
    /// Homogeneous Dirichlet constraints.
    pub constraints: Vec<Constraint>,
}

impl<T: Real> MeshData<T> {
    /// A serial mesh: every node and element owned by partition 0.
    pub fn serial(
        nodes: Vec<Point3<T>>,
        elements: Vec<ElementConnectivity>,
        dofs_per_node: usize,
        constraints: Vec<Constraint>,
    ) -> Self {
        let node_owner = vec![0; nodes.len()];
        let element_owner = vec![0; elements.len()];
        Self {
            nodes,
            elements,
            dofs_per_node,
            node_owner,
            element_owner,
            constraints,
        }
    }

    /// Repartitions the mesh into `size` contiguous node ranges. Each element
    /// is assigned to the owner of its first node.
    pub fn with_uniform_partition(mut self, size: usize) -> Self {
        self.node_owner = uniform_partition(self.nodes.len(), size);
        self.element_owner = self
            .elements
            .iter()
            .map(|element| self.node_owner[element.nodes[0]])
            .collect();
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Checks ownership, connectivity bounds and constraint bounds against a
    /// partition count. Element kind and constitutive checks live in the model
    /// layer, where the registry and arena are known.
    pub fn validate_partition(&self, size: usize) -> Result<(), PartitionError> {
        let num_nodes = self.nodes.len();
        assert_eq!(self.node_owner.len(), num_nodes);
        assert_eq!(self.element_owner.len(), self.elements.len());

        for (node, &owner) in self.node_owner.iter().enumerate() {
            if owner >= size {
                return Err(PartitionError::OwnerOutOfRange { node, owner, size });
            }
        }
        for (element, &owner) in self.element_owner.iter().enumerate() {
            if owner >= size {
                return Err(PartitionError::ElementOwnerOutOfRange { element, owner, size });
            }
        }
        let mut owned_counts = vec![0usize; size];
        for &owner in &self.node_owner {
            owned_counts[owner] += 1;
        }
        if let Some(rank) = owned_counts.iter().position(|&count| count == 0) {
            return Err(PartitionError::EmptyPartition { rank });
        }
        for (element, connectivity) in self.elements.iter().enumerate() {
            for &node in &connectivity.nodes {
                if node >= num_nodes {
                    return Err(PartitionError::NodeOutOfRange { element, node, num_nodes });
                }
            }
        }
        for constraint in &self.constraints {
            if constraint.node >= num_nodes || constraint.component >= self.dofs_per_node {
                return Err(PartitionError::InvalidConstraint {
                    node: constraint.node,
                    component: constraint.component,
                });
            }
        }
        Ok(())
    }
}

/// Splits `num_nodes` nodes into `size` contiguous chunks of near-equal size.
pub fn uniform_partition(num_nodes: usize, size: usize) -> Vec<usize> {
    assert!(size >= 1);
    let base = num_nodes / size;
    let remainder = num_nodes % size;
    let mut owners = Vec::with_capacity(num_nodes);
    for rank in 0..size {
        let count = base + usize::from(rank < remainder);
        owners.extend(std::iter::repeat(rank).take(count));
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    fn two_quad_mesh() -> MeshData<f64> {
        let nodes = vec![
            point![0.0, 0.0, 0.0],
            point![1.0, 0.0, 0.0],
            point![2.0, 0.0, 0.0],
            point![0.0, 1.0, 0.0],
            point![1.0, 1.0, 0.0],
            point![2.0, 1.0, 0.0],
        ];
        let elements = vec![
            ElementConnectivity {
                kind: ElementKind::ShellQuad4,
                nodes: vec![0, 1, 4, 3],
                constitutive: ConstitutiveHandle(0),
            },
            ElementConnectivity {
                kind: ElementKind::ShellQuad4,
                nodes: vec![1, 2, 5, 4],
                constitutive: ConstitutiveHandle(0),
            },
        ];
        MeshData::serial(nodes, elements, 2, vec![Constraint { node: 0, component: 0 }])
    }

    #[test]
    fn uniform_partition_distributes_remainder() {
        assert_eq!(uniform_partition(5, 2), vec![0, 0, 0, 1, 1]);
        assert_eq!(uniform_partition(6, 3), vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(uniform_partition(3, 1), vec![0, 0, 0]);
    }

    #[test]
    fn serial_mesh_validates() {
        let mesh = two_quad_mesh();
        assert!(mesh.validate_partition(1).is_ok());
    }

    #[test]
    fn repartition_assigns_elements_to_first_node_owner() {
        let mesh = two_quad_mesh().with_uniform_partition(2);
        assert_eq!(mesh.node_owner, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(mesh.element_owner, vec![0, 0]);
        assert!(mesh.validate_partition(2).is_ok());
    }

    #[test]
    fn validation_rejects_bad_owner() {
        let mut mesh = two_quad_mesh();
        mesh.node_owner[3] = 5;
        assert_eq!(
            mesh.validate_partition(1),
            Err(PartitionError::OwnerOutOfRange { node: 3, owner: 5, size: 1 })
        );
    }

    #[test]
    fn validation_rejects_empty_partition() {
        let mesh = two_quad_mesh();
        // All nodes owned by 0, so a two-partition run leaves partition 1 empty.
        assert_eq!(mesh.validate_partition(2), Err(PartitionError::EmptyPartition { rank: 1 }));
    }

    #[test]
    fn validation_rejects_node_out_of_range() {
        let mut mesh = two_quad_mesh();
        mesh.elements[1].nodes[2] = 17;
        assert_eq!(
            mesh.validate_partition(1),
            Err(PartitionError::NodeOutOfRange {
                element: 1,
                node: 17,
                num_nodes: 6
            })
        );
    }

    #[test]
    fn validation_rejects_bad_constraint() {
        let mut mesh = two_quad_mesh();
        mesh.constraints.push(Constraint { node: 1, component: 3 });
        assert_eq!(
            mesh.validate_partition(1),
            Err(PartitionError::InvalidConstraint { node: 1, component: 3 })
        );
    }
}
