//! Two-node Euler-Bernoulli beam element.

use super::{DegenerateGeometry, ElementModel, QuadraturePoint};
use crate::mesh::ElementKind;
use crate::Real;
use nalgebra::{DMatrix, Point3};
use numeric_literals::replace_float_literals;

/// Euler-Bernoulli beam with transverse deflection `w` and rotation `θ` per
/// node, interpolated with cubic Hermite polynomials. The single strain
/// component is the curvature `w''`, so two Gauss points integrate the bending
/// stiffness exactly and reproduce the classical `EI/L³` matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeamEuler2;

impl<T: Real> ElementModel<T> for BeamEuler2 {
    fn kind(&self) -> ElementKind {
        ElementKind::BeamEuler2
    }

    fn nodes_per_element(&self) -> usize {
        2
    }

    fn dofs_per_node(&self) -> usize {
        2
    }

    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn quadrature(&self, nodes: &[Point3<T>]) -> Result<Vec<QuadraturePoint<T>>, DegenerateGeometry> {
        assert_eq!(nodes.len(), 2);
        let length = (nodes[1] - nodes[0]).norm();
        if length <= T::zero() {
            return Err(DegenerateGeometry);
        }
        let l = length;
        // Gauss points of the 2-point rule mapped to s = x / L in [0, 1].
        let gauss = 1.0 / 3.0.sqrt();
        let mut points = Vec::with_capacity(2);
        for &xi in &[-gauss, gauss] {
            let s = 0.5 * (1.0 + xi);
            // Second derivatives of the Hermite shape functions (w1, θ1, w2, θ2).
            let b = DMatrix::from_row_slice(
                1,
                4,
                &[
                    (12.0 * s - 6.0) / (l * l),
                    (6.0 * s - 4.0) / l,
                    (6.0 - 12.0 * s) / (l * l),
                    (6.0 * s - 2.0) / l,
                ],
            );
            points.push(QuadraturePoint {
                weight: 0.5 * l,
                strain_displacement: b,
            });
        }
        Ok(points)
    }
}
