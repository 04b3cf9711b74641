//! Analysis results must not depend on how the mesh is partitioned: a run on
//! one partition and runs on several thread-backed partitions produce the
//! same functions, gradients and displacements.

use super::{config, functions_of_interest, registry, strip_design, strip_loads, strip_materials, strip_mesh};
use garm::comm::spmd;
use garm::FeModel;

const QUADS: usize = 8;

type RunResult = (Vec<f64>, Vec<Vec<f64>>, Vec<f64>);

fn run_partitioned(size: usize) -> RunResult {
    let results = spmd::<f64, RunResult, _>(size, |comm| {
        let mesh = strip_mesh(QUADS).with_uniform_partition(size);
        let mut model = FeModel::new(
            mesh,
            registry(),
            strip_materials(),
            &strip_loads(QUADS),
            strip_design(),
            config(),
            comm,
        )
        .unwrap();
        model.solve().unwrap();
        let kinds = functions_of_interest();
        let values = model.evaluate_functions(&kinds).unwrap();
        let gradients = model.evaluate_gradients(&kinds).unwrap();
        let displacements = model.displacements();
        (values, gradients, displacements)
    });

    // Reduced quantities are broadcast from the root, so every partition must
    // report bitwise-identical results.
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
    results.into_iter().next().unwrap()
}

fn assert_close(a: &[f64], b: &[f64], what: &str) {
    assert_eq!(a.len(), b.len());
    for (index, (x, y)) in a.iter().zip(b).enumerate() {
        let scale = x.abs().max(y.abs()).max(1e-12);
        assert!(
            (x - y).abs() <= 1e-6 * scale,
            "{what}[{index}]: {x} vs {y}"
        );
    }
}

#[test]
fn two_partitions_match_serial() {
    let (values_1, gradients_1, displacements_1) = run_partitioned(1);
    let (values_2, gradients_2, displacements_2) = run_partitioned(2);
    assert_close(&values_1, &values_2, "function");
    for (a, b) in gradients_1.iter().zip(&gradients_2) {
        assert_close(a, b, "gradient");
    }
    assert_close(&displacements_1, &displacements_2, "displacement");
}

#[test]
fn four_partitions_match_serial() {
    let (values_1, gradients_1, displacements_1) = run_partitioned(1);
    let (values_4, gradients_4, displacements_4) = run_partitioned(4);
    assert_close(&values_1, &values_4, "function");
    for (a, b) in gradients_1.iter().zip(&gradients_4) {
        assert_close(a, b, "gradient");
    }
    assert_close(&displacements_1, &displacements_4, "displacement");
}
