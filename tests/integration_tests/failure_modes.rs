//! Failures must surface as typed errors naming the culprit, not as panics
//! or silent garbage.

use super::{config, registry, strip_loads, strip_materials, strip_mesh};
use garm::comm::SerialComm;
use garm::element::ElementRegistry;
use garm::error::PartitionError;
use garm::{AnalysisError, FeModel, SolverConfig};
use nalgebra::point;

#[test]
fn collapsed_element_is_reported_by_index() {
    let mut mesh = strip_mesh(3);
    // Collapse the second quad onto a line.
    let donor = mesh.nodes[2];
    mesh.nodes[4] = donor;
    mesh.nodes[5] = donor;
    let mut model = FeModel::new(
        mesh,
        registry(),
        strip_materials(),
        &strip_loads(3),
        vec![0.002, 0.003],
        config(),
        SerialComm,
    )
    .unwrap();
    match model.solve() {
        Err(AnalysisError::Numerical(failure)) => assert_eq!(failure.element, Some(1)),
        other => panic!("Expected a numerical failure, got {other:?}"),
    }
}

#[test]
fn unregistered_element_kind_is_rejected_up_front() {
    let error = FeModel::new(
        strip_mesh(2),
        ElementRegistry::empty(),
        strip_materials(),
        &strip_loads(2),
        vec![0.002, 0.003],
        config(),
        SerialComm,
    )
    .err()
    .unwrap();
    assert!(matches!(
        error,
        AnalysisError::Partition(PartitionError::UnknownElementKind { element: 0 })
    ));
}

#[test]
fn exhausted_newton_budget_is_reported_as_divergence() {
    let config = SolverConfig {
        max_newton_iterations: 0,
        ..SolverConfig::default()
    };
    let mut model = FeModel::new(
        strip_mesh(2),
        registry(),
        strip_materials(),
        &strip_loads(2),
        vec![0.002, 0.003],
        config,
        SerialComm,
    )
    .unwrap();
    match model.solve() {
        Err(AnalysisError::Divergence(error)) => assert_eq!(error.iterations, 0),
        other => panic!("Expected a divergence error, got {other:?}"),
    }
}

#[test]
fn constraint_outside_the_mesh_is_rejected() {
    let mut mesh = strip_mesh(2);
    mesh.constraints.push(garm::mesh::Constraint { node: 99, component: 0 });
    let error = FeModel::new(
        mesh,
        registry(),
        strip_materials(),
        &strip_loads(2),
        vec![0.002, 0.003],
        config(),
        SerialComm,
    )
    .err()
    .unwrap();
    assert!(matches!(
        error,
        AnalysisError::Partition(PartitionError::InvalidConstraint { node: 99, .. })
    ));
}

#[test]
fn beam_model_rejects_membrane_connectivity() {
    let mut mesh = strip_mesh(2);
    mesh.elements[0].kind = garm::mesh::ElementKind::BeamEuler2;
    let error = FeModel::new(
        mesh,
        registry(),
        strip_materials(),
        &strip_loads(2),
        vec![0.002, 0.003],
        config(),
        SerialComm,
    )
    .err()
    .unwrap();
    assert!(matches!(
        error,
        AnalysisError::Partition(PartitionError::ConnectivityMismatch { element: 0, .. })
    ));
}

#[test]
fn smallest_well_posed_problem_solves() {
    // One beam element, clamped at one end.
    let mesh = garm::mesh::MeshData::serial(
        vec![point![0.0, 0.0, 0.0], point![1.0, 0.0, 0.0]],
        vec![garm::mesh::ElementConnectivity {
            kind: garm::mesh::ElementKind::BeamEuler2,
            nodes: vec![0, 1],
            constitutive: garm::mesh::ConstitutiveHandle(0),
        }],
        2,
        vec![
            garm::mesh::Constraint { node: 0, component: 0 },
            garm::mesh::Constraint { node: 0, component: 1 },
        ],
    );
    let mut materials = garm::constitutive::ConstitutiveSet::new();
    materials.insert(Box::new(garm::constitutive::BeamStiffness {
        youngs_modulus: 200e9,
        area_moment: 1e-6,
        fiber_distance: 0.05,
        lineic_mass: 7.8,
        yield_stress: 350e6,
        scale_var: 0,
    }));
    let loads = vec![garm::PointLoad { node: 1, components: vec![100.0, 0.0] }];
    let mut model = FeModel::new(
        mesh,
        registry(),
        materials,
        &loads,
        vec![1.0],
        config(),
        SerialComm,
    )
    .unwrap();
    let output = model.solve().unwrap();
    assert_eq!(output.iterations, 1);
}
