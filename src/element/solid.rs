//! Eight-node trilinear hexahedral element.

use super::{DegenerateGeometry, ElementModel, QuadraturePoint};
use crate::mesh::ElementKind;
use crate::Real;
use nalgebra::{DMatrix, Matrix3, Point3};
use numeric_literals::replace_float_literals;

/// Trilinear hexahedron with displacements `(u_x, u_y, u_z)` per node,
/// integrated with a 2x2x2 Gauss rule. Strain components are ordered
/// `(e_xx, e_yy, e_zz, g_xy, g_yz, g_zx)` with engineering shear strains.
///
/// Nodes are listed bottom face counter-clockwise, then top face.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolidHex8;

const XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

impl<T: Real> ElementModel<T> for SolidHex8 {
    fn kind(&self) -> ElementKind {
        ElementKind::SolidHex8
    }

    fn nodes_per_element(&self) -> usize {
        8
    }

    fn dofs_per_node(&self) -> usize {
        3
    }

    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn quadrature(&self, nodes: &[Point3<T>]) -> Result<Vec<QuadraturePoint<T>>, DegenerateGeometry> {
        assert_eq!(nodes.len(), 8);
        let gauss = 1.0 / 3.0.sqrt();
        let abscissae = [-gauss, gauss];
        let mut points = Vec::with_capacity(8);
        for &xi in &abscissae {
            for &eta in &abscissae {
                for &zeta in &abscissae {
                    let mut d_ref = [[T::zero(); 3]; 8];
                    for a in 0..8 {
                        let xa = T::from_f64(XI[a]).expect("literal must fit in T");
                        let ea = T::from_f64(ETA[a]).expect("literal must fit in T");
                        let za = T::from_f64(ZETA[a]).expect("literal must fit in T");
                        d_ref[a][0] = 0.125 * xa * (1.0 + ea * eta) * (1.0 + za * zeta);
                        d_ref[a][1] = 0.125 * ea * (1.0 + xa * xi) * (1.0 + za * zeta);
                        d_ref[a][2] = 0.125 * za * (1.0 + xa * xi) * (1.0 + ea * eta);
                    }

                    let mut jacobian = Matrix3::zeros();
                    for a in 0..8 {
                        for i in 0..3 {
                            jacobian[(i, 0)] += d_ref[a][i] * nodes[a].x;
                            jacobian[(i, 1)] += d_ref[a][i] * nodes[a].y;
                            jacobian[(i, 2)] += d_ref[a][i] * nodes[a].z;
                        }
                    }
                    let determinant = jacobian.determinant();
                    if determinant <= T::zero() {
                        return Err(DegenerateGeometry);
                    }
                    let inverse = jacobian.try_inverse().ok_or(DegenerateGeometry)?;

                    let mut b = DMatrix::zeros(6, 24);
                    for a in 0..8 {
                        let mut gradient = [T::zero(); 3];
                        for i in 0..3 {
                            for j in 0..3 {
                                gradient[i] += inverse[(i, j)] * d_ref[a][j];
                            }
                        }
                        let (d_x, d_y, d_z) = (gradient[0], gradient[1], gradient[2]);
                        let column = 3 * a;
                        b[(0, column)] = d_x;
                        b[(1, column + 1)] = d_y;
                        b[(2, column + 2)] = d_z;
                        b[(3, column)] = d_y;
                        b[(3, column + 1)] = d_x;
                        b[(4, column + 1)] = d_z;
                        b[(4, column + 2)] = d_y;
                        b[(5, column)] = d_z;
                        b[(5, column + 2)] = d_x;
                    }
                    points.push(QuadraturePoint {
                        weight: determinant,
                        strain_displacement: b,
                    });
                }
            }
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    fn unit_cube() -> [Point3<f64>; 8] {
        [
            point![0.0, 0.0, 0.0],
            point![1.0, 0.0, 0.0],
            point![1.0, 1.0, 0.0],
            point![0.0, 1.0, 0.0],
            point![0.0, 0.0, 1.0],
            point![1.0, 0.0, 1.0],
            point![1.0, 1.0, 1.0],
            point![0.0, 1.0, 1.0],
        ]
    }

    #[test]
    fn unit_cube_quadrature_weights_sum_to_volume() {
        let points = SolidHex8.quadrature(&unit_cube()).unwrap();
        assert_eq!(points.len(), 8);
        let volume: f64 = points.iter().map(|p| p.weight).sum();
        assert!((volume - 1.0).abs() < 1e-13);
    }

    #[test]
    fn uniform_stretch_gives_constant_strain() {
        // u_z = 0.02 z, everything else zero.
        let cube = unit_cube();
        let mut dofs = [0.0; 24];
        for (a, node) in cube.iter().enumerate() {
            dofs[3 * a + 2] = 0.02 * node.z;
        }
        for point in SolidHex8.quadrature(&cube).unwrap() {
            let strain = &point.strain_displacement * nalgebra::DVector::from_column_slice(&dofs);
            assert!((strain[2] - 0.02).abs() < 1e-13);
            for component in [0, 1, 3, 4, 5] {
                assert!(strain[component].abs() < 1e-13);
            }
        }
    }

    #[test]
    fn inverted_hex_is_degenerate() {
        let mut cube = unit_cube();
        cube.swap(0, 4);
        cube.swap(1, 5);
        cube.swap(2, 6);
        cube.swap(3, 7);
        assert!(SolidHex8.quadrature(&cube).is_err());
    }
}
