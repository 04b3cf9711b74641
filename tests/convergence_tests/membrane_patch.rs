//! Patch test for the bilinear membrane quad: a clamped strip under uniform
//! end tension carries a constant stress field, which the element reproduces
//! exactly at every refinement. Poisson coupling is switched off so the
//! exact displacement is linear in x and independent of y.

use garm::comm::SerialComm;
use garm::constitutive::{ConstitutiveSet, IsotropicElastic};
use garm::element::ElementRegistry;
use garm::mesh::{Constraint, ConstitutiveHandle, ElementConnectivity, ElementKind, MeshData};
use garm::{FeModel, PointLoad, SolverConfig};
use nalgebra::point;

const LENGTH: f64 = 2.0;
const THICKNESS: f64 = 0.002;
const YOUNGS_MODULUS: f64 = 70e9;
const EDGE_LOAD: f64 = 1e4;

fn stretched_strip_tip_displacement(quads: usize) -> f64 {
    let mut nodes = Vec::new();
    for i in 0..=quads {
        let x = LENGTH * i as f64 / quads as f64;
        nodes.push(point![x, 0.0, 0.0]);
        nodes.push(point![x, 1.0, 0.0]);
    }
    let elements = (0..quads)
        .map(|i| ElementConnectivity {
            kind: ElementKind::ShellQuad4,
            nodes: vec![2 * i, 2 * i + 2, 2 * i + 3, 2 * i + 1],
            constitutive: ConstitutiveHandle(0),
        })
        .collect();
    let constraints = vec![
        Constraint { node: 0, component: 0 },
        Constraint { node: 0, component: 1 },
        Constraint { node: 1, component: 0 },
        Constraint { node: 1, component: 1 },
    ];
    let mesh = MeshData::serial(nodes, elements, 2, constraints);

    let mut materials = ConstitutiveSet::new();
    materials.insert(Box::new(IsotropicElastic {
        youngs_modulus: YOUNGS_MODULUS,
        poissons_ratio: 0.0,
        mass_density: 2700.0,
        yield_stress: 270e6,
        thickness_var: 0,
    }));
    let loads = vec![
        PointLoad { node: 2 * quads, components: vec![EDGE_LOAD, 0.0] },
        PointLoad { node: 2 * quads + 1, components: vec![EDGE_LOAD, 0.0] },
    ];

    let mut model = FeModel::new(
        mesh,
        ElementRegistry::standard(),
        materials,
        &loads,
        vec![THICKNESS],
        SolverConfig::default(),
        SerialComm,
    )
    .unwrap();
    model.solve().unwrap();
    model.displacements()[2 * (2 * quads)]
}

#[test]
fn uniform_tension_is_exact_at_every_refinement() {
    // Unit width, so the membrane stress is the total load over the thickness.
    let stress = 2.0 * EDGE_LOAD / THICKNESS;
    let expected = stress / YOUNGS_MODULUS * LENGTH;
    for quads in [1, 2, 4] {
        let displacement = stretched_strip_tip_displacement(quads);
        assert!(
            (displacement - expected).abs() <= 1e-8 * expected,
            "{quads} quads: tip displacement {displacement} vs {expected}"
        );
    }
}
