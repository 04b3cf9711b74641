//! Solver configuration.

use crate::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Which local preconditioner to apply inside the global Krylov solve. Each
/// partition preconditions its owned diagonal block; coupling between
/// partitions is left to the Krylov iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionerType {
    Identity,
    BlockJacobi,
    BlockIlu0,
}

/// Tolerances and budgets for the nonlinear and linear solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig<T: Real> {
    /// Relative residual tolerance of the inner GMRES solve.
    pub linear_solver_tolerance: T,
    /// Total GMRES iteration budget per linear solve.
    pub max_krylov_iterations: usize,
    /// GMRES restart length.
    pub krylov_restart: usize,
    pub preconditioner: PreconditionerType,
    /// Relative residual tolerance of the Newton iteration.
    pub newton_tolerance: T,
    pub max_newton_iterations: usize,
    /// Newton diverges once the residual norm exceeds this multiple of the
    /// initial residual norm.
    pub divergence_tolerance: T,
    /// Maximum number of step halvings in the backtracking line search.
    pub max_line_search_steps: usize,
}

impl<T: Real> Default for SolverConfig<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn default() -> Self {
        Self {
            linear_solver_tolerance: 1e-10,
            max_krylov_iterations: 1000,
            krylov_restart: 50,
            preconditioner: PreconditionerType::BlockIlu0,
            newton_tolerance: 1e-9,
            max_newton_iterations: 20,
            divergence_tolerance: 1e6,
            max_line_search_steps: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = SolverConfig::<f64> {
            linear_solver_tolerance: 1e-8,
            krylov_restart: 25,
            preconditioner: PreconditionerType::BlockJacobi,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SolverConfig<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn unknown_preconditioner_is_rejected() {
        let result: Result<SolverConfig<f64>, _> =
            serde_json::from_str(r#"{"preconditioner": "approx_schur"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: SolverConfig<f64> =
            serde_json::from_str(r#"{"preconditioner": "block_jacobi", "max_newton_iterations": 5}"#).unwrap();
        assert_eq!(parsed.preconditioner, PreconditionerType::BlockJacobi);
        assert_eq!(parsed.max_newton_iterations, 5);
        assert_eq!(parsed.linear_solver_tolerance, SolverConfig::<f64>::default().linear_solver_tolerance);
    }
}
