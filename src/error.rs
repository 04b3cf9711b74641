//! Error types shared across the crate.

use std::error::Error;
use std::fmt;

/// An invalid mesh partition or analysis setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A node owner refers to a partition that does not exist.
    OwnerOutOfRange { node: usize, owner: usize, size: usize },
    /// An element owner refers to a partition that does not exist.
    ElementOwnerOutOfRange { element: usize, owner: usize, size: usize },
    /// A partition owns no nodes.
    EmptyPartition { rank: usize },
    /// An element references a node outside the mesh.
    NodeOutOfRange { element: usize, node: usize, num_nodes: usize },
    /// An element's connectivity length does not match its kind.
    ConnectivityMismatch { element: usize, expected: usize, actual: usize },
    /// An element's kind has no registered model.
    UnknownElementKind { element: usize },
    /// An element's number of degrees of freedom per node does not match the mesh.
    BlockSizeMismatch { element: usize, expected: usize, actual: usize },
    /// An element references a constitutive model outside the arena.
    ConstitutiveOutOfRange { element: usize, handle: usize, num_models: usize },
    /// A constitutive model references a design variable outside the design vector.
    DesignVarOutOfRange { handle: usize, design_var: usize, num_design_vars: usize },
    /// A boundary condition references a node or component outside the mesh.
    InvalidConstraint { node: usize, component: usize },
    /// A point load references a node outside the mesh or has the wrong number of components.
    InvalidLoad { node: usize },
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnerOutOfRange { node, owner, size } => {
                write!(f, "Node {node} is assigned to partition {owner}, but only {size} partitions exist.")
            }
            Self::ElementOwnerOutOfRange { element, owner, size } => {
                write!(f, "Element {element} is assigned to partition {owner}, but only {size} partitions exist.")
            }
            Self::EmptyPartition { rank } => {
                write!(f, "Partition {rank} owns no nodes.")
            }
            Self::NodeOutOfRange { element, node, num_nodes } => {
                write!(f, "Element {element} references node {node}, but the mesh has {num_nodes} nodes.")
            }
            Self::ConnectivityMismatch { element, expected, actual } => {
                write!(f, "Element {element} has {actual} nodes, but its kind requires {expected}.")
            }
            Self::UnknownElementKind { element } => {
                write!(f, "Element {element} has a kind with no registered element model.")
            }
            Self::BlockSizeMismatch { element, expected, actual } => {
                write!(
                    f,
                    "Element {element} has {actual} degrees of freedom per node, but the mesh uses {expected}."
                )
            }
            Self::ConstitutiveOutOfRange { element, handle, num_models } => {
                write!(
                    f,
                    "Element {element} references constitutive model {handle}, but only {num_models} are defined."
                )
            }
            Self::DesignVarOutOfRange { handle, design_var, num_design_vars } => {
                write!(
                    f,
                    "Constitutive model {handle} references design variable {design_var}, \
                     but only {num_design_vars} are defined."
                )
            }
            Self::InvalidConstraint { node, component } => {
                write!(f, "Constraint on component {component} of node {node} is outside the mesh.")
            }
            Self::InvalidLoad { node } => {
                write!(f, "Point load on node {node} is invalid.")
            }
        }
    }
}

impl Error for PartitionError {}

/// A non-finite value encountered during assembly or function evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericalFailure {
    /// The computation stage that produced the non-finite value.
    pub context: &'static str,
    /// The element that produced it, when attributable to one.
    pub element: Option<usize>,
}

impl NumericalFailure {
    pub fn new(context: &'static str) -> Self {
        Self { context, element: None }
    }

    pub fn in_element(context: &'static str, element: usize) -> Self {
        Self {
            context,
            element: Some(element),
        }
    }
}

impl fmt::Display for NumericalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Some(element) => write!(f, "Non-finite value produced by element {} during {}.", element, self.context),
            None => write!(f, "Non-finite value encountered during {}.", self.context),
        }
    }
}

impl Error for NumericalFailure {}

/// A linear solve that did not reach the requested tolerance within its budget.
#[derive(Debug, Clone)]
pub struct ConvergenceFailure<T> {
    pub iterations: usize,
    pub relative_residual: T,
    pub tolerance: T,
}

impl<T: fmt::Display> fmt::Display for ConvergenceFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Linear solve stopped after {} iterations with relative residual {} (tolerance {}).",
            self.iterations, self.relative_residual, self.tolerance
        )
    }
}

impl<T: fmt::Debug + fmt::Display> Error for ConvergenceFailure<T> {}

/// A Newton iteration that diverged or exhausted its iteration budget.
#[derive(Debug, Clone)]
pub struct DivergenceError<T> {
    pub iterations: usize,
    pub residual_norm: T,
    pub initial_residual_norm: T,
}

impl<T: fmt::Display> fmt::Display for DivergenceError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Newton iteration diverged after {} iterations: residual norm {} (initial norm {}).",
            self.iterations, self.residual_norm, self.initial_residual_norm
        )
    }
}

impl<T: fmt::Debug + fmt::Display> Error for DivergenceError<T> {}

/// A failure while computing design sensitivities for a function of interest.
#[derive(Debug)]
pub struct AdjointFailure<T> {
    /// Index of the function whose adjoint solve or accumulation failed.
    pub function: usize,
    pub source: Box<AnalysisError<T>>,
}

impl<T: fmt::Debug + fmt::Display> fmt::Display for AdjointFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adjoint computation for function {} failed: {}", self.function, self.source)
    }
}

impl<T: fmt::Debug + fmt::Display + 'static> Error for AdjointFailure<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.source)
    }
}

/// Any error produced by an analysis.
#[derive(Debug)]
pub enum AnalysisError<T> {
    Partition(PartitionError),
    Numerical(NumericalFailure),
    Convergence(ConvergenceFailure<T>),
    Divergence(DivergenceError<T>),
    Adjoint(AdjointFailure<T>),
}

impl<T: fmt::Debug + fmt::Display> fmt::Display for AnalysisError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition(err) => fmt::Display::fmt(err, f),
            Self::Numerical(err) => fmt::Display::fmt(err, f),
            Self::Convergence(err) => fmt::Display::fmt(err, f),
            Self::Divergence(err) => fmt::Display::fmt(err, f),
            Self::Adjoint(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl<T: fmt::Debug + fmt::Display + 'static> Error for AnalysisError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Partition(err) => Some(err),
            Self::Numerical(err) => Some(err),
            Self::Convergence(err) => Some(err),
            Self::Divergence(err) => Some(err),
            Self::Adjoint(err) => Some(err),
        }
    }
}

impl<T> From<PartitionError> for AnalysisError<T> {
    fn from(err: PartitionError) -> Self {
        Self::Partition(err)
    }
}

impl<T> From<NumericalFailure> for AnalysisError<T> {
    fn from(err: NumericalFailure) -> Self {
        Self::Numerical(err)
    }
}

impl<T> From<ConvergenceFailure<T>> for AnalysisError<T> {
    fn from(err: ConvergenceFailure<T>) -> Self {
        Self::Convergence(err)
    }
}

impl<T> From<DivergenceError<T>> for AnalysisError<T> {
    fn from(err: DivergenceError<T>) -> Self {
        Self::Divergence(err)
    }
}

impl<T> From<AdjointFailure<T>> for AnalysisError<T> {
    fn from(err: AdjointFailure<T>) -> Self {
        Self::Adjoint(err)
    }
}
