//! Dense Levenberg-Marquardt with IRLS robust weighting.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Robust loss applied per residual row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RobustKernel {
    #[default]
    None,
    Huber {
        delta: f64,
    },
}

impl RobustKernel {
    /// Loss `rho(r^2)` and IRLS weight for a squared residual.
    pub fn rho_and_weight(self, r2: f64) -> (f64, f64) {
        match self {
            RobustKernel::None => (r2, 1.0),
            RobustKernel::Huber { delta } => {
                let r = r2.sqrt();
                if r <= delta {
                    (r2, 1.0)
                } else {
                    (2.0 * delta * r - delta * delta, delta / r)
                }
            }
        }
    }
}

/// Nonlinear least-squares problem with analytic Jacobian.
pub trait NllsProblem {
    fn num_params(&self) -> usize;

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64>;

    /// Kernel for residual row `row`; priors usually stay quadratic.
    fn kernel(&self, _row: usize) -> RobustKernel {
        RobustKernel::None
    }

    /// Robust cost `0.5 * sum rho(r_i^2)`.
    fn cost(&self, r: &DVector<f64>) -> f64 {
        0.5 * r
            .iter()
            .enumerate()
            .map(|(i, v)| self.kernel(i).rho_and_weight(v * v).0)
            .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub max_iters: usize,
    /// Relative cost decrease below which the solve stops.
    pub ftol: f64,
    /// Max-norm of the gradient below which the solve stops.
    pub gtol: f64,
    /// Relative step size below which the solve stops.
    pub xtol: f64,
    /// Accepted steps per stall check; 0 disables it.
    pub stall_window: usize,
    /// Relative cost decrease over a whole stall window below which the
    /// solve is treated as converged.
    pub stall_rtol: f64,
    pub initial_lambda: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-8,
            gtol: 1e-10,
            xtol: 1e-10,
            stall_window: 10,
            stall_rtol: 1e-3,
            initial_lambda: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
}

/// Minimize `problem` from `x0`; returns the best parameters seen.
pub fn solve_lm<P: NllsProblem>(problem: &P, x0: DVector<f64>, opts: &SolveOptions) -> (DVector<f64>, SolveReport) {
    let n = problem.num_params();
    let mut x = x0;
    let mut r = problem.residuals(&x);
    let mut cost = problem.cost(&r);
    let initial_cost = cost;
    let mut lambda = opts.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;
    let mut window_cost = cost;
    let mut window_steps = 0;

    if !cost.is_finite() {
        return (
            x,
            SolveReport {
                iterations: 0,
                initial_cost,
                final_cost: cost,
                converged: false,
            },
        );
    }

    while iterations < opts.max_iters {
        iterations += 1;
        let jac = problem.jacobian(&x);

        // IRLS: scale rows by sqrt(w)
        let mut jw = jac;
        let mut rw = r.clone();
        for i in 0..rw.len() {
            let (_, w) = problem.kernel(i).rho_and_weight(r[i] * r[i]);
            let sw = w.sqrt();
            rw[i] *= sw;
            jw.row_mut(i).scale_mut(sw);
        }
        let jt = jw.transpose();
        let jtj = &jt * &jw;
        let g = &jt * &rw;
        if g.amax() < opts.gtol {
            converged = true;
            break;
        }

        let mut accepted = false;
        for _ in 0..12 {
            let mut a = jtj.clone();
            for k in 0..n {
                a[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let Some(step) = a.cholesky().map(|c| c.solve(&(-&g))) else {
                lambda *= 10.0;
                continue;
            };
            let x_new = &x + &step;
            let r_new = problem.residuals(&x_new);
            let cost_new = problem.cost(&r_new);
            if cost_new.is_finite() && cost_new < cost {
                let rel_drop = (cost - cost_new) / cost.max(1e-300);
                let rel_step = step.norm() / (x.norm() + opts.xtol);
                x = x_new;
                r = r_new;
                cost = cost_new;
                lambda = (lambda * 0.3).max(1e-12);
                accepted = true;
                if rel_drop < opts.ftol || rel_step < opts.xtol {
                    converged = true;
                }
                window_steps += 1;
                if opts.stall_window > 0 && window_steps >= opts.stall_window {
                    // cost has flattened out
                    if window_cost - cost <= opts.stall_rtol * window_cost {
                        converged = true;
                    }
                    window_cost = cost;
                    window_steps = 0;
                }
                break;
            }
            lambda *= 10.0;
        }
        if !accepted {
            // no descent direction left at this linearization
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    (
        x,
        SolveReport {
            iterations,
            initial_cost,
            final_cost: cost,
            converged,
        },
    )
}
