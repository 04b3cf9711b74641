//! Four-node planar membrane element.

use super::{DegenerateGeometry, ElementModel, QuadraturePoint};
use crate::mesh::ElementKind;
use crate::Real;
use nalgebra::{DMatrix, Matrix2, Point3};
use numeric_literals::replace_float_literals;

/// Bilinear quadrilateral membrane with in-plane displacements `(u_x, u_y)`
/// per node, integrated with a 2x2 Gauss rule.
///
/// The element operates on the `x` and `y` coordinates of its nodes; meshes
/// using it are planar. Nodes are listed counter-clockwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellQuad4;

// Reference coordinates of the four corners.
const XI: [f64; 4] = [-1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 4] = [-1.0, -1.0, 1.0, 1.0];

impl<T: Real> ElementModel<T> for ShellQuad4 {
    fn kind(&self) -> ElementKind {
        ElementKind::ShellQuad4
    }

    fn nodes_per_element(&self) -> usize {
        4
    }

    fn dofs_per_node(&self) -> usize {
        2
    }

    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn quadrature(&self, nodes: &[Point3<T>]) -> Result<Vec<QuadraturePoint<T>>, DegenerateGeometry> {
        assert_eq!(nodes.len(), 4);
        let gauss = 1.0 / 3.0.sqrt();
        let mut points = Vec::with_capacity(4);
        for &xi in &[-gauss, gauss] {
            for &eta in &[-gauss, gauss] {
                // Shape function derivatives with respect to (xi, eta).
                let mut d_xi = [T::zero(); 4];
                let mut d_eta = [T::zero(); 4];
                for a in 0..4 {
                    let xa = T::from_f64(XI[a]).expect("literal must fit in T");
                    let ea = T::from_f64(ETA[a]).expect("literal must fit in T");
                    d_xi[a] = 0.25 * xa * (1.0 + ea * eta);
                    d_eta[a] = 0.25 * ea * (1.0 + xa * xi);
                }

                let mut jacobian = Matrix2::zeros();
                for a in 0..4 {
                    jacobian[(0, 0)] += d_xi[a] * nodes[a].x;
                    jacobian[(0, 1)] += d_xi[a] * nodes[a].y;
                    jacobian[(1, 0)] += d_eta[a] * nodes[a].x;
                    jacobian[(1, 1)] += d_eta[a] * nodes[a].y;
                }
                let determinant = jacobian.determinant();
                if determinant <= T::zero() {
                    return Err(DegenerateGeometry);
                }
                let inverse = jacobian
                    .try_inverse()
                    .ok_or(DegenerateGeometry)?;

                let mut b = DMatrix::zeros(3, 8);
                for a in 0..4 {
                    let d_x = inverse[(0, 0)] * d_xi[a] + inverse[(0, 1)] * d_eta[a];
                    let d_y = inverse[(1, 0)] * d_xi[a] + inverse[(1, 1)] * d_eta[a];
                    b[(0, 2 * a)] = d_x;
                    b[(1, 2 * a + 1)] = d_y;
                    b[(2, 2 * a)] = d_y;
                    b[(2, 2 * a + 1)] = d_x;
                }
                points.push(QuadraturePoint {
                    weight: determinant,
                    strain_displacement: b,
                });
            }
        }
        Ok(points)
    }
}
