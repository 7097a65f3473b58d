//! Hibernation cycles and the reconcile loop that starts them
//!
//! [`PlanController::reconcile`] is the single entry point: it validates the plan,
//! applies suspension and retry annotations, compares the schedule against the current
//! phase and, when they disagree, runs a cycle through [`CycleRunner`]. Target order
//! within a cycle comes from the [`DependencyGraph`].

pub mod controller;
pub mod cycle;
pub mod graph;

pub use controller::{PlanController, ReconcileOutcome};
pub use cycle::{CycleOutcome, CycleReport, CycleRunner};
pub use graph::DependencyGraph;
