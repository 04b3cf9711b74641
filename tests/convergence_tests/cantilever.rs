//! A tip-loaded cantilever discretized with Hermite beam elements recovers
//! the Euler-Bernoulli solution at the nodes for any refinement, because the
//! cubic shape functions contain the exact deflection.

use garm::comm::SerialComm;
use garm::constitutive::{BeamStiffness, ConstitutiveSet};
use garm::element::ElementRegistry;
use garm::mesh::{Constraint, ConstitutiveHandle, ElementConnectivity, ElementKind, MeshData};
use garm::{FeModel, PointLoad, SolverConfig};
use nalgebra::point;

const LENGTH: f64 = 2.0;
const TIP_LOAD: f64 = 100.0;
const YOUNGS_MODULUS: f64 = 200e9;
const AREA_MOMENT: f64 = 1e-6;

fn cantilever_tip_state(elements: usize) -> (f64, f64) {
    let nodes = (0..=elements)
        .map(|i| point![LENGTH * i as f64 / elements as f64, 0.0, 0.0])
        .collect();
    let connectivity = (0..elements)
        .map(|i| ElementConnectivity {
            kind: ElementKind::BeamEuler2,
            nodes: vec![i, i + 1],
            constitutive: ConstitutiveHandle(0),
        })
        .collect();
    let constraints = vec![
        Constraint { node: 0, component: 0 },
        Constraint { node: 0, component: 1 },
    ];
    let mesh = MeshData::serial(nodes, connectivity, 2, constraints);

    let mut materials = ConstitutiveSet::new();
    materials.insert(Box::new(BeamStiffness {
        youngs_modulus: YOUNGS_MODULUS,
        area_moment: AREA_MOMENT,
        fiber_distance: 0.05,
        lineic_mass: 7.8,
        yield_stress: 350e6,
        scale_var: 0,
    }));
    let loads = vec![PointLoad {
        node: elements,
        components: vec![TIP_LOAD, 0.0],
    }];

    let mut model = FeModel::new(
        mesh,
        ElementRegistry::standard(),
        materials,
        &loads,
        vec![1.0],
        SolverConfig::default(),
        SerialComm,
    )
    .unwrap();
    model.solve().unwrap();
    let displacements = model.displacements();
    (displacements[2 * elements], displacements[2 * elements + 1])
}

#[test]
fn tip_deflection_is_nodally_exact_at_every_refinement() {
    let bending_stiffness = YOUNGS_MODULUS * AREA_MOMENT;
    let expected_deflection = TIP_LOAD * LENGTH.powi(3) / (3.0 * bending_stiffness);
    let expected_rotation = TIP_LOAD * LENGTH.powi(2) / (2.0 * bending_stiffness);
    for elements in [1, 2, 4, 8] {
        let (deflection, rotation) = cantilever_tip_state(elements);
        assert!(
            (deflection - expected_deflection).abs() <= 1e-8 * expected_deflection,
            "{elements} elements: deflection {deflection} vs {expected_deflection}"
        );
        assert!(
            (rotation - expected_rotation).abs() <= 1e-8 * expected_rotation,
            "{elements} elements: rotation {rotation} vs {expected_rotation}"
        );
    }
}
