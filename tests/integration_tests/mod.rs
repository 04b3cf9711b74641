use garm::constitutive::{ConstitutiveSet, IsotropicElastic};
use garm::element::ElementRegistry;
use garm::mesh::{Constraint, ConstitutiveHandle, ElementConnectivity, ElementKind, MeshData};
use garm::{FunctionKind, PointLoad, SolverConfig};
use nalgebra::point;

mod adjoint_gradients;
mod failure_modes;
mod partition_invariance;

/// A clamped strip of membrane quads with alternating materials, loaded in
/// tension at the free edge. Two design variables: one thickness per material.
pub fn strip_mesh(quads: usize) -> MeshData<f64> {
    let mut nodes = Vec::new();
    for i in 0..=quads {
        nodes.push(point![i as f64 * 0.5, 0.0, 0.0]);
        nodes.push(point![i as f64 * 0.5, 1.0, 0.0]);
    }
    let elements = (0..quads)
        .map(|i| ElementConnectivity {
            kind: ElementKind::ShellQuad4,
            nodes: vec![2 * i, 2 * i + 2, 2 * i + 3, 2 * i + 1],
            constitutive: ConstitutiveHandle(i % 2),
        })
        .collect();
    let constraints = vec![
        Constraint { node: 0, component: 0 },
        Constraint { node: 0, component: 1 },
        Constraint { node: 1, component: 0 },
        Constraint { node: 1, component: 1 },
    ];
    MeshData::serial(nodes, elements, 2, constraints)
}

pub fn strip_materials() -> ConstitutiveSet<f64> {
    let mut set = ConstitutiveSet::new();
    set.insert(Box::new(IsotropicElastic {
        youngs_modulus: 70e9,
        poissons_ratio: 0.3,
        mass_density: 2700.0,
        yield_stress: 270e6,
        thickness_var: 0,
    }));
    set.insert(Box::new(IsotropicElastic {
        youngs_modulus: 200e9,
        poissons_ratio: 0.3,
        mass_density: 7800.0,
        yield_stress: 350e6,
        thickness_var: 1,
    }));
    set
}

pub fn strip_loads(quads: usize) -> Vec<PointLoad<f64>> {
    vec![
        PointLoad {
            node: 2 * quads,
            components: vec![2e4, 5e3],
        },
        PointLoad {
            node: 2 * quads + 1,
            components: vec![2e4, -5e3],
        },
    ]
}

pub fn strip_design() -> Vec<f64> {
    vec![0.002, 0.003]
}

pub fn functions_of_interest() -> Vec<FunctionKind<f64>> {
    vec![
        FunctionKind::Mass,
        FunctionKind::Compliance,
        FunctionKind::KsFailure { weight: 50.0 },
    ]
}

pub fn registry() -> ElementRegistry<f64> {
    ElementRegistry::standard()
}

pub fn config() -> SolverConfig<f64> {
    SolverConfig::default()
}
