//! Constitutive models: pointwise material behavior and its design derivatives.
//!
//! A [`ConstitutiveModel`] supplies the stiffness integrand used by the element
//! integration, the mass integrand, and a pointwise failure index, together
//! with the derivatives of all three with respect to the design variables the
//! model depends on. Design variables live in one global vector replicated on
//! every partition; each model stores the indices it reads.

use crate::mesh::ConstitutiveHandle;
use crate::Real;
use nalgebra::{DMatrix, DVector};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pointwise material behavior.
///
/// `tangent` is the full stiffness integrand, including any thickness or
/// stiffness scaling controlled by design variables; the element stiffness is
/// `∫ Bᵀ tangent B`. `density` is the mass integrand per unit of the element's
/// integration measure (area for membranes, volume for solids, length for
/// beams).
///
/// The design-derivative methods are only called with indices from
/// [`design_vars`](Self::design_vars); derivatives with respect to any other
/// variable are identically zero.
pub trait ConstitutiveModel<T: Real>: fmt::Debug + Send + Sync {
    fn num_strains(&self) -> usize;

    fn tangent(&self, design: &[T]) -> DMatrix<T>;
    fn tangent_design_derivative(&self, design: &[T], design_var: usize) -> DMatrix<T>;

    fn density(&self, design: &[T]) -> T;
    fn density_design_derivative(&self, design: &[T], design_var: usize) -> T;

    fn design_vars(&self) -> &[usize];

    /// Failure index at a point, normalized so that 1 marks the onset of
    /// failure.
    fn failure(&self, design: &[T], strain: &[T]) -> T;
    fn failure_strain_gradient(&self, design: &[T], strain: &[T]) -> DVector<T>;
    fn failure_design_derivative(&self, design: &[T], strain: &[T], design_var: usize) -> T;
}

/// Arena of constitutive models referenced by [`ConstitutiveHandle`].
#[derive(Debug, Default)]
pub struct ConstitutiveSet<T> {
    models: Vec<Box<dyn ConstitutiveModel<T>>>,
}

impl<T: Real> ConstitutiveSet<T> {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    pub fn insert(&mut self, model: Box<dyn ConstitutiveModel<T>>) -> ConstitutiveHandle {
        self.models.push(model);
        ConstitutiveHandle(self.models.len() - 1)
    }

    pub fn get(&self, handle: ConstitutiveHandle) -> Option<&dyn ConstitutiveModel<T>> {
        self.models.get(handle.0).map(|boxed| &**boxed)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Largest design-variable index referenced by any model, if any.
    pub fn max_design_var(&self) -> Option<usize> {
        self.models
            .iter()
            .flat_map(|model| model.design_vars().iter().copied())
            .max()
    }
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn von_mises_plane<T: Real>(stress: &[T]) -> T {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    (sx * sx - sx * sy + sy * sy + 3.0 * txy * txy).sqrt()
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn von_mises_plane_stress_gradient<T: Real>(stress: &[T]) -> DVector<T> {
    let vm = von_mises_plane(stress);
    if vm == T::zero() {
        return DVector::zeros(3);
    }
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    DVector::from_vec(vec![
        (2.0 * sx - sy) / (2.0 * vm),
        (2.0 * sy - sx) / (2.0 * vm),
        3.0 * txy / vm,
    ])
}

/// Isotropic plane-stress membrane material with the panel thickness as its
/// design variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsotropicElastic<T> {
    pub youngs_modulus: T,
    pub poissons_ratio: T,
    /// Mass per unit volume.
    pub mass_density: T,
    pub yield_stress: T,
    /// Index of the thickness design variable.
    pub thickness_var: usize,
}

impl<T: Real> IsotropicElastic<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn elasticity_matrix(&self) -> DMatrix<T> {
        let scale = self.youngs_modulus / (1.0 - self.poissons_ratio * self.poissons_ratio);
        let nu = self.poissons_ratio;
        let mut c = DMatrix::zeros(3, 3);
        c[(0, 0)] = scale;
        c[(0, 1)] = scale * nu;
        c[(1, 0)] = scale * nu;
        c[(1, 1)] = scale;
        c[(2, 2)] = scale * (1.0 - nu) * 0.5;
        c
    }

    fn stress(&self, strain: &[T]) -> Vec<T> {
        let c = self.elasticity_matrix();
        let e = DVector::from_column_slice(strain);
        let s = c * e;
        s.iter().copied().collect()
    }
}

impl<T: Real> ConstitutiveModel<T> for IsotropicElastic<T> {
    fn num_strains(&self) -> usize {
        3
    }

    fn tangent(&self, design: &[T]) -> DMatrix<T> {
        self.elasticity_matrix() * design[self.thickness_var]
    }

    fn tangent_design_derivative(&self, _design: &[T], design_var: usize) -> DMatrix<T> {
        debug_assert_eq!(design_var, self.thickness_var);
        self.elasticity_matrix()
    }

    fn density(&self, design: &[T]) -> T {
        self.mass_density * design[self.thickness_var]
    }

    fn density_design_derivative(&self, _design: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.thickness_var);
        self.mass_density
    }

    fn design_vars(&self) -> &[usize] {
        std::slice::from_ref(&self.thickness_var)
    }

    fn failure(&self, _design: &[T], strain: &[T]) -> T {
        von_mises_plane(&self.stress(strain)) / self.yield_stress
    }

    fn failure_strain_gradient(&self, _design: &[T], strain: &[T]) -> DVector<T> {
        // df/dε = (dvm/dσ C) / σ_yield; membrane stress does not depend on the
        // thickness.
        let stress = self.stress(strain);
        let dvm = von_mises_plane_stress_gradient(&stress);
        (self.elasticity_matrix().transpose() * dvm) / self.yield_stress
    }

    fn failure_design_derivative(&self, _design: &[T], _strain: &[T], _design_var: usize) -> T {
        T::zero()
    }
}

/// Orthotropic plane-stress membrane material with the panel thickness as its
/// design variable. The failure index is von Mises on the stress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrthotropicElastic<T> {
    pub e1: T,
    pub e2: T,
    pub nu12: T,
    pub g12: T,
    /// Mass per unit volume.
    pub mass_density: T,
    pub yield_stress: T,
    /// Index of the thickness design variable.
    pub thickness_var: usize,
}

impl<T: Real> OrthotropicElastic<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn elasticity_matrix(&self) -> DMatrix<T> {
        let nu21 = self.nu12 * self.e2 / self.e1;
        let denom = 1.0 - self.nu12 * nu21;
        let mut c = DMatrix::zeros(3, 3);
        c[(0, 0)] = self.e1 / denom;
        c[(0, 1)] = self.nu12 * self.e2 / denom;
        c[(1, 0)] = c[(0, 1)];
        c[(1, 1)] = self.e2 / denom;
        c[(2, 2)] = self.g12;
        c
    }

    fn stress(&self, strain: &[T]) -> Vec<T> {
        let s = self.elasticity_matrix() * DVector::from_column_slice(strain);
        s.iter().copied().collect()
    }
}

impl<T: Real> ConstitutiveModel<T> for OrthotropicElastic<T> {
    fn num_strains(&self) -> usize {
        3
    }

    fn tangent(&self, design: &[T]) -> DMatrix<T> {
        self.elasticity_matrix() * design[self.thickness_var]
    }

    fn tangent_design_derivative(&self, _design: &[T], design_var: usize) -> DMatrix<T> {
        debug_assert_eq!(design_var, self.thickness_var);
        self.elasticity_matrix()
    }

    fn density(&self, design: &[T]) -> T {
        self.mass_density * design[self.thickness_var]
    }

    fn density_design_derivative(&self, _design: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.thickness_var);
        self.mass_density
    }

    fn design_vars(&self) -> &[usize] {
        std::slice::from_ref(&self.thickness_var)
    }

    fn failure(&self, _design: &[T], strain: &[T]) -> T {
        von_mises_plane(&self.stress(strain)) / self.yield_stress
    }

    fn failure_strain_gradient(&self, _design: &[T], strain: &[T]) -> DVector<T> {
        let stress = self.stress(strain);
        let dvm = von_mises_plane_stress_gradient(&stress);
        (self.elasticity_matrix().transpose() * dvm) / self.yield_stress
    }

    fn failure_design_derivative(&self, _design: &[T], _strain: &[T], _design_var: usize) -> T {
        T::zero()
    }
}

/// Isotropic three-dimensional material whose stiffness and mass are both
/// scaled by one design variable, as in density-based topology optimization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsotropicElastic3d<T> {
    pub youngs_modulus: T,
    pub poissons_ratio: T,
    /// Mass per unit volume at scale 1.
    pub mass_density: T,
    pub yield_stress: T,
    /// Index of the scale design variable.
    pub scale_var: usize,
}

impl<T: Real> IsotropicElastic3d<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn elasticity_matrix(&self) -> DMatrix<T> {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;
        let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let mu = e / (2.0 * (1.0 + nu));
        let mut c = DMatrix::zeros(6, 6);
        for i in 0..3 {
            for j in 0..3 {
                c[(i, j)] = lambda;
            }
            c[(i, i)] = lambda + 2.0 * mu;
            c[(i + 3, i + 3)] = mu;
        }
        c
    }

    fn stress(&self, design: &[T], strain: &[T]) -> Vec<T> {
        let s = self.elasticity_matrix() * DVector::from_column_slice(strain) * design[self.scale_var];
        s.iter().copied().collect()
    }
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn von_mises_3d<T: Real>(stress: &[T]) -> T {
    let (sx, sy, sz) = (stress[0], stress[1], stress[2]);
    let (txy, tyz, tzx) = (stress[3], stress[4], stress[5]);
    let normal =
        0.5 * ((sx - sy) * (sx - sy) + (sy - sz) * (sy - sz) + (sz - sx) * (sz - sx));
    (normal + 3.0 * (txy * txy + tyz * tyz + tzx * tzx)).sqrt()
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn von_mises_3d_stress_gradient<T: Real>(stress: &[T]) -> DVector<T> {
    let vm = von_mises_3d(stress);
    if vm == T::zero() {
        return DVector::zeros(6);
    }
    let (sx, sy, sz) = (stress[0], stress[1], stress[2]);
    let (txy, tyz, tzx) = (stress[3], stress[4], stress[5]);
    DVector::from_vec(vec![
        (2.0 * sx - sy - sz) / (2.0 * vm),
        (2.0 * sy - sz - sx) / (2.0 * vm),
        (2.0 * sz - sx - sy) / (2.0 * vm),
        3.0 * txy / vm,
        3.0 * tyz / vm,
        3.0 * tzx / vm,
    ])
}

impl<T: Real> ConstitutiveModel<T> for IsotropicElastic3d<T> {
    fn num_strains(&self) -> usize {
        6
    }

    fn tangent(&self, design: &[T]) -> DMatrix<T> {
        self.elasticity_matrix() * design[self.scale_var]
    }

    fn tangent_design_derivative(&self, _design: &[T], design_var: usize) -> DMatrix<T> {
        debug_assert_eq!(design_var, self.scale_var);
        self.elasticity_matrix()
    }

    fn density(&self, design: &[T]) -> T {
        self.mass_density * design[self.scale_var]
    }

    fn density_design_derivative(&self, _design: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.scale_var);
        self.mass_density
    }

    fn design_vars(&self) -> &[usize] {
        std::slice::from_ref(&self.scale_var)
    }

    fn failure(&self, design: &[T], strain: &[T]) -> T {
        von_mises_3d(&self.stress(design, strain)) / self.yield_stress
    }

    fn failure_strain_gradient(&self, design: &[T], strain: &[T]) -> DVector<T> {
        let stress = self.stress(design, strain);
        let dvm = von_mises_3d_stress_gradient(&stress);
        (self.elasticity_matrix().transpose() * dvm) * (design[self.scale_var] / self.yield_stress)
    }

    fn failure_design_derivative(&self, _design: &[T], strain: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.scale_var);
        // Stress is linear in the scale, so the index is too.
        von_mises_3d(&self.stress_at_unit_scale(strain)) / self.yield_stress
    }
}

impl<T: Real> IsotropicElastic3d<T> {
    fn stress_at_unit_scale(&self, strain: &[T]) -> Vec<T> {
        let s = self.elasticity_matrix() * DVector::from_column_slice(strain);
        s.iter().copied().collect()
    }
}

/// Euler-Bernoulli beam section whose bending stiffness and mass per length
/// are both scaled by one design variable. The single strain component is the
/// curvature; the failure index is the extreme-fiber bending stress over the
/// yield stress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamStiffness<T> {
    pub youngs_modulus: T,
    /// Second moment of area at scale 1.
    pub area_moment: T,
    /// Distance from the neutral axis to the extreme fiber.
    pub fiber_distance: T,
    /// Mass per unit length at scale 1.
    pub lineic_mass: T,
    pub yield_stress: T,
    /// Index of the scale design variable.
    pub scale_var: usize,
}

impl<T: Real> ConstitutiveModel<T> for BeamStiffness<T> {
    fn num_strains(&self) -> usize {
        1
    }

    fn tangent(&self, design: &[T]) -> DMatrix<T> {
        DMatrix::from_element(1, 1, self.youngs_modulus * self.area_moment * design[self.scale_var])
    }

    fn tangent_design_derivative(&self, _design: &[T], design_var: usize) -> DMatrix<T> {
        debug_assert_eq!(design_var, self.scale_var);
        DMatrix::from_element(1, 1, self.youngs_modulus * self.area_moment)
    }

    fn density(&self, design: &[T]) -> T {
        self.lineic_mass * design[self.scale_var]
    }

    fn density_design_derivative(&self, _design: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.scale_var);
        self.lineic_mass
    }

    fn design_vars(&self) -> &[usize] {
        std::slice::from_ref(&self.scale_var)
    }

    fn failure(&self, design: &[T], strain: &[T]) -> T {
        let curvature = strain[0];
        design[self.scale_var] * self.youngs_modulus * self.fiber_distance * curvature.abs() / self.yield_stress
    }

    fn failure_strain_gradient(&self, design: &[T], strain: &[T]) -> DVector<T> {
        let curvature = strain[0];
        let sign = if curvature > T::zero() {
            T::one()
        } else if curvature < T::zero() {
            -T::one()
        } else {
            T::zero()
        };
        DVector::from_element(
            1,
            design[self.scale_var] * self.youngs_modulus * self.fiber_distance * sign / self.yield_stress,
        )
    }

    fn failure_design_derivative(&self, _design: &[T], strain: &[T], design_var: usize) -> T {
        debug_assert_eq!(design_var, self.scale_var);
        self.youngs_modulus * self.fiber_distance * strain[0].abs() / self.yield_stress
    }
}
