//! Element models and element-level integration.
//!
//! An [`ElementModel`] reduces an element to a set of quadrature points, each
//! carrying an integration weight (already scaled by the Jacobian determinant)
//! and a strain-displacement matrix. All element-level quantities follow from
//! those points and a [`ConstitutiveModel`]:
//!
//! - stiffness `K_e = Σ w Bᵀ D B`,
//! - its design derivative via the tangent derivative,
//! - mass `Σ w ρ`,
//! - strains `ε = B u_e` for failure evaluation.

use crate::constitutive::ConstitutiveModel;
use crate::mesh::ElementKind;
use crate::Real;
use nalgebra::{DMatrix, DVector, Point3};
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;

mod beam;
mod shell;
mod solid;

pub use beam::BeamEuler2;
pub use shell::ShellQuad4;
pub use solid::SolidHex8;

/// An element with a non-positive Jacobian determinant (inverted or collapsed
/// geometry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegenerateGeometry;

impl fmt::Display for DegenerateGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element geometry has a non-positive Jacobian determinant.")
    }
}

impl Error for DegenerateGeometry {}

/// One quadrature point of an element.
#[derive(Debug, Clone)]
pub struct QuadraturePoint<T> {
    /// Quadrature weight times the Jacobian determinant.
    pub weight: T,
    /// Strain-displacement matrix, `num_strains x element_dofs`.
    pub strain_displacement: DMatrix<T>,
}

/// Geometric behavior of one element kind.
pub trait ElementModel<T: Real>: Send + Sync {
    fn kind(&self) -> ElementKind;
    fn nodes_per_element(&self) -> usize;
    fn dofs_per_node(&self) -> usize;

    /// Evaluates the element's quadrature rule for the given node coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `nodes` does not have `nodes_per_element()` entries.
    fn quadrature(&self, nodes: &[Point3<T>]) -> Result<Vec<QuadraturePoint<T>>, DegenerateGeometry>;
}

pub fn element_stiffness<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    model: &dyn ConstitutiveModel<T>,
    design: &[T],
) -> Result<DMatrix<T>, DegenerateGeometry> {
    integrate_stiffness(element, nodes, &model.tangent(design))
}

pub fn element_stiffness_design_derivative<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    model: &dyn ConstitutiveModel<T>,
    design: &[T],
    design_var: usize,
) -> Result<DMatrix<T>, DegenerateGeometry> {
    integrate_stiffness(element, nodes, &model.tangent_design_derivative(design, design_var))
}

fn integrate_stiffness<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    tangent: &DMatrix<T>,
) -> Result<DMatrix<T>, DegenerateGeometry> {
    let dofs = element.nodes_per_element() * element.dofs_per_node();
    let mut stiffness = DMatrix::zeros(dofs, dofs);
    for point in element.quadrature(nodes)? {
        let b = &point.strain_displacement;
        stiffness += b.transpose() * tangent * b * point.weight;
    }
    Ok(stiffness)
}

pub fn element_mass<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    model: &dyn ConstitutiveModel<T>,
    design: &[T],
) -> Result<T, DegenerateGeometry> {
    let density = model.density(design);
    let mut mass = T::zero();
    for point in element.quadrature(nodes)? {
        mass += point.weight * density;
    }
    Ok(mass)
}

pub fn element_mass_design_derivative<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    model: &dyn ConstitutiveModel<T>,
    design: &[T],
    design_var: usize,
) -> Result<T, DegenerateGeometry> {
    let derivative = model.density_design_derivative(design, design_var);
    let mut mass = T::zero();
    for point in element.quadrature(nodes)? {
        mass += point.weight * derivative;
    }
    Ok(mass)
}

/// Strain at each quadrature point for the given element displacements.
pub fn element_strains<T: Real>(
    element: &dyn ElementModel<T>,
    nodes: &[Point3<T>],
    element_dofs: &[T],
) -> Result<Vec<DVector<T>>, DegenerateGeometry> {
    let u = DVector::from_column_slice(element_dofs);
    Ok(element
        .quadrature(nodes)?
        .into_iter()
        .map(|point| &point.strain_displacement * &u)
        .collect())
}

/// The element models available to an analysis, keyed by [`ElementKind`].
pub struct ElementRegistry<T> {
    models: FxHashMap<ElementKind, Box<dyn ElementModel<T>>>,
}

impl<T: Real> ElementRegistry<T> {
    pub fn empty() -> Self {
        Self {
            models: FxHashMap::default(),
        }
    }

    /// A registry with all built-in element kinds.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(BeamEuler2));
        registry.register(Box::new(ShellQuad4));
        registry.register(Box::new(SolidHex8));
        registry
    }

    /// Registers a model, replacing any previous model of the same kind.
    pub fn register(&mut self, model: Box<dyn ElementModel<T>>) {
        self.models.insert(model.kind(), model);
    }

    pub fn get(&self, kind: ElementKind) -> Option<&dyn ElementModel<T>> {
        self.models.get(&kind).map(|boxed| &**boxed)
    }
}

impl<T: Real> Default for ElementRegistry<T> {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutive::{BeamStiffness, IsotropicElastic, IsotropicElastic3d};
    use matrixcompare::assert_matrix_eq;
    use nalgebra::point;

    #[test]
    fn registry_knows_standard_kinds() {
        let registry = ElementRegistry::<f64>::standard();
        for kind in [ElementKind::BeamEuler2, ElementKind::ShellQuad4, ElementKind::SolidHex8] {
            let model = registry.get(kind).unwrap();
            assert_eq!(model.kind(), kind);
        }
        assert!(ElementRegistry::<f64>::empty().get(ElementKind::ShellQuad4).is_none());
    }

    #[test]
    fn beam_stiffness_matches_analytic_matrix() {
        let length: f64 = 2.5;
        let nodes = [point![0.0, 0.0, 0.0], point![length, 0.0, 0.0]];
        let section = BeamStiffness {
            youngs_modulus: 200e9,
            area_moment: 4e-6,
            fiber_distance: 0.02,
            lineic_mass: 6.0,
            yield_stress: 250e6,
            scale_var: 0,
        };
        let design = [1.0];
        let stiffness = element_stiffness(&BeamEuler2, &nodes, &section, &design).unwrap();

        let ei = 200e9 * 4e-6;
        let l = length;
        let reference = DMatrix::from_row_slice(
            4,
            4,
            &[
                12.0 / (l * l * l),
                6.0 / (l * l),
                -12.0 / (l * l * l),
                6.0 / (l * l),
                6.0 / (l * l),
                4.0 / l,
                -6.0 / (l * l),
                2.0 / l,
                -12.0 / (l * l * l),
                -6.0 / (l * l),
                12.0 / (l * l * l),
                -6.0 / (l * l),
                6.0 / (l * l),
                2.0 / l,
                -6.0 / (l * l),
                4.0 / l,
            ],
        ) * ei;
        assert_matrix_eq!(stiffness, reference, comp = float, ulp = 256);
    }

    #[test]
    fn element_masses_match_closed_forms() {
        let membrane = IsotropicElastic {
            youngs_modulus: 70e9,
            poissons_ratio: 0.3,
            mass_density: 2700.0,
            yield_stress: 270e6,
            thickness_var: 0,
        };
        let quad = [
            point![0.0, 0.0, 0.0],
            point![2.0, 0.0, 0.0],
            point![2.0, 1.0, 0.0],
            point![0.0, 1.0, 0.0],
        ];
        let design = [0.003];
        let mass: f64 = element_mass(&ShellQuad4, &quad, &membrane, &design).unwrap();
        assert!((mass - 2.0 * 0.003 * 2700.0).abs() < 1e-9);
        let derivative: f64 = element_mass_design_derivative(&ShellQuad4, &quad, &membrane, &design, 0).unwrap();
        assert!((derivative - 2.0 * 2700.0).abs() < 1e-9);

        let solid = IsotropicElastic3d {
            youngs_modulus: 200e9,
            poissons_ratio: 0.3,
            mass_density: 7800.0,
            yield_stress: 350e6,
            scale_var: 0,
        };
        let hex = [
            point![0.0, 0.0, 0.0],
            point![1.0, 0.0, 0.0],
            point![1.0, 1.0, 0.0],
            point![0.0, 1.0, 0.0],
            point![0.0, 0.0, 0.5],
            point![1.0, 0.0, 0.5],
            point![1.0, 1.0, 0.5],
            point![0.0, 1.0, 0.5],
        ];
        let mass: f64 = element_mass(&SolidHex8, &hex, &solid, &[0.5]).unwrap();
        assert!((mass - 0.5 * 0.5 * 7800.0).abs() < 1e-6);
    }

    #[test]
    fn rigid_body_translation_produces_no_strain() {
        let quad = [
            point![0.0, 0.0, 0.0],
            point![1.3, 0.1, 0.0],
            point![1.2, 1.1, 0.0],
            point![-0.1, 0.9, 0.0],
        ];
        // Uniform translation in x and y.
        let dofs: [f64; 8] = [0.7, -0.2, 0.7, -0.2, 0.7, -0.2, 0.7, -0.2];
        for strain in element_strains(&ShellQuad4, &quad, &dofs).unwrap() {
            for component in strain.iter() {
                assert!(component.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn uniform_stretch_produces_constant_strain() {
        let quad = [
            point![0.0, 0.0, 0.0],
            point![2.0, 0.0, 0.0],
            point![2.0, 1.0, 0.0],
            point![0.0, 1.0, 0.0],
        ];
        // u_x = 0.01 x: constant strain exx = 0.01.
        let dofs: [f64; 8] = [0.0, 0.0, 0.02, 0.0, 0.02, 0.0, 0.0, 0.0];
        for strain in element_strains(&ShellQuad4, &quad, &dofs).unwrap() {
            assert!((strain[0] - 0.01).abs() < 1e-12);
            assert!(strain[1].abs() < 1e-12);
            assert!(strain[2].abs() < 1e-12);
        }
    }

    #[test]
    fn collapsed_quad_is_rejected() {
        let quad = [
            point![0.0, 0.0, 0.0],
            point![1.0, 0.0, 0.0],
            point![1.0, 0.0, 0.0],
            point![0.0, 0.0, 0.0],
        ];
        assert_eq!(ShellQuad4.quadrature(&quad).unwrap_err(), DegenerateGeometry);
    }

    #[test]
    fn hex_stiffness_is_symmetric_and_annihilates_translations() {
        let solid = IsotropicElastic3d {
            youngs_modulus: 10e9,
            poissons_ratio: 0.25,
            mass_density: 1000.0,
            yield_stress: 100e6,
            scale_var: 0,
        };
        let hex = [
            point![0.0, 0.0, 0.0],
            point![1.1, 0.0, 0.0],
            point![1.2, 1.0, 0.1],
            point![0.0, 1.1, 0.0],
            point![0.0, 0.1, 1.0],
            point![1.0, 0.0, 1.1],
            point![1.1, 1.0, 1.2],
            point![0.1, 1.0, 1.0],
        ];
        let stiffness: DMatrix<f64> = element_stiffness(&SolidHex8, &hex, &solid, &[1.0]).unwrap();
        assert_matrix_eq!(stiffness, stiffness.transpose(), comp = float, ulp = 64);
        // K times a rigid translation vanishes.
        let mut translation = DVector::zeros(24);
        for node in 0..8 {
            translation[3 * node] = 1.0;
        }
        let force = &stiffness * translation;
        let scale = stiffness.amax();
        for entry in force.iter() {
            assert!(entry.abs() <= 1e-12 * scale);
        }
    }
}
