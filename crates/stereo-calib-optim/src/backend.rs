//! tiny-solver backend: factor graph assembly and the iteration-capped
//! Levenberg-Marquardt driver.

use std::collections::HashMap;

use log::{debug, trace};
use tiny_solver::factors::na as ts_na;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer, OptimizerOptions, Problem};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::factors::ViewReprojection;

/// Named parameter blocks, as tiny-solver consumes and returns them.
pub(crate) type Values = HashMap<String, ts_na::DVector<f64>>;

/// Stopping rule shared by the mono and stereo solves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverOptions {
    /// Relative cost decrease of one iteration below which the solve stops.
    pub min_relative_decrease: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            min_relative_decrease: 1e-10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveReport {
    /// Levenberg-Marquardt iterations spent, never above the cap.
    pub iterations: usize,
    /// Sum of squared residuals before and after.
    pub initial_cost: f64,
    pub final_cost: f64,
    /// RMS over all corners, pixels.
    pub rms: f64,
    pub converged: bool,
}

fn iteration_options(max_iteration: usize) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration,
        verbosity_level: 0,
        ..Default::default()
    }
}

/// Reprojection factors keyed by the parameter blocks they read.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReprojectionGraph {
    blocks: Vec<(Vec<String>, ViewReprojection)>,
}

impl ReprojectionGraph {
    pub(crate) fn add(&mut self, keys: &[&str], factor: ViewReprojection) {
        self.blocks
            .push((keys.iter().map(|k| k.to_string()).collect(), factor));
    }

    pub(crate) fn point_count(&self) -> usize {
        self.blocks.iter().map(|(_, f)| f.residual_count() / 2).sum()
    }

    fn problem(&self) -> Problem {
        let mut problem = Problem::new();
        for (keys, factor) in &self.blocks {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            problem.add_residual_block(
                factor.residual_count(),
                &keys,
                Box::new(factor.clone()),
                None,
            );
        }
        problem
    }

    /// Sum of squared residuals; infinite when a block is missing.
    pub(crate) fn cost(&self, values: &Values) -> f64 {
        let mut total = 0.0;
        for (keys, factor) in &self.blocks {
            let Some(params) = keys
                .iter()
                .map(|k| values.get(k).cloned())
                .collect::<Option<Vec<_>>>()
            else {
                return f64::INFINITY;
            };
            total += Factor::<f64>::residual_func(factor, &params).norm_squared();
        }
        total
    }

    fn rms(&self, cost: f64) -> f64 {
        let points = self.point_count();
        if points == 0 {
            return 0.0;
        }
        (cost / points as f64).sqrt()
    }

    /// Refine `initial` with at most `max_iterations` solver iterations.
    ///
    /// The solver runs one iteration at a time so the count is exact. When a
    /// single iteration cannot lower the cost, the rest of the budget goes to
    /// one uninterrupted run so the damping can grow, and is counted in full.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, initial, options),
            fields(blocks = self.blocks.len(), points = self.point_count())
        )
    )]
    pub(crate) fn solve(
        &self,
        initial: Values,
        max_iterations: usize,
        options: &SolverOptions,
    ) -> (Values, SolveReport) {
        let initial_cost = self.cost(&initial);
        let mut report = SolveReport {
            iterations: 0,
            initial_cost,
            final_cost: initial_cost,
            rms: self.rms(initial_cost),
            converged: false,
        };
        if max_iterations == 0 {
            return (initial, report);
        }

        let problem = self.problem();
        let optimizer = LevenbergMarquardtOptimizer::default();
        let mut values = initial;

        while report.iterations < max_iterations {
            let Some(next) = optimizer.optimize(&problem, &values, Some(iteration_options(1)))
            else {
                debug!("linear solve failed after {} iterations", report.iterations);
                break;
            };
            report.iterations += 1;
            let cost = self.cost(&next);

            // NaN never counts as progress.
            let improved = cost < report.final_cost;
            if !improved {
                let remaining = max_iterations - report.iterations;
                if remaining > 0 {
                    if let Some(tail) =
                        optimizer.optimize(&problem, &values, Some(iteration_options(remaining)))
                    {
                        let tail_cost = self.cost(&tail);
                        if tail_cost < report.final_cost {
                            values = tail;
                            report.final_cost = tail_cost;
                        }
                    }
                    report.iterations = max_iterations;
                }
                break;
            }

            let decrease = report.final_cost - cost;
            values = next;
            report.final_cost = cost;
            trace!("iteration {}: cost {cost:.6e}", report.iterations);
            if decrease <= options.min_relative_decrease * cost.max(f64::MIN_POSITIVE) {
                report.converged = true;
                break;
            }
        }

        report.rms = self.rms(report.final_cost);
        debug!(
            "solve finished after {} iterations (converged: {}): cost {:.6e} -> {:.6e}",
            report.iterations, report.converged, report.initial_cost, report.final_cost
        );
        (values, report)
    }
}
