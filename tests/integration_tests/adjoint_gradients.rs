//! The adjoint design derivatives must agree with central finite differences
//! of the full solve-then-evaluate pipeline, including on multiple
//! partitions.

use super::{config, functions_of_interest, registry, strip_design, strip_loads, strip_materials, strip_mesh};
use garm::comm::spmd;
use garm::FeModel;

const QUADS: usize = 4;

fn check_on_partitions(size: usize) {
    let results = spmd::<f64, (Vec<Vec<f64>>, Vec<Vec<f64>>), _>(size, |comm| {
        let mesh = strip_mesh(QUADS).with_uniform_partition(size);
        let design = strip_design();
        let kinds = functions_of_interest();
        let mut model = FeModel::new(
            mesh,
            registry(),
            strip_materials(),
            &strip_loads(QUADS),
            design.clone(),
            config(),
            comm,
        )
        .unwrap();
        let gradients = model.evaluate_gradients(&kinds).unwrap();

        // Central differences, one full re-solve per perturbed design.
        let mut differences = vec![vec![0.0; design.len()]; kinds.len()];
        for var in 0..design.len() {
            let h = design[var] * 1e-6;
            let mut perturbed = design.clone();
            perturbed[var] = design[var] + h;
            model.set_design_vars(&perturbed);
            let plus = model.evaluate_functions(&kinds).unwrap();
            perturbed[var] = design[var] - h;
            model.set_design_vars(&perturbed);
            let minus = model.evaluate_functions(&kinds).unwrap();
            for (function, (p, m)) in plus.iter().zip(&minus).enumerate() {
                differences[function][var] = (p - m) / (2.0 * h);
            }
        }
        (gradients, differences)
    });

    for (gradients, differences) in results {
        for (function, (adjoint, fd)) in gradients.iter().zip(&differences).enumerate() {
            for (var, (a, d)) in adjoint.iter().zip(fd).enumerate() {
                let scale = d.abs().max(1e-12);
                assert!(
                    (a - d).abs() <= 1e-5 * scale,
                    "function {function}, design variable {var}: adjoint {a} vs central differences {d}"
                );
            }
        }
    }
}

#[test]
fn adjoint_matches_central_differences_serial() {
    check_on_partitions(1);
}

#[test]
fn adjoint_matches_central_differences_on_two_partitions() {
    check_on_partitions(2);
}
