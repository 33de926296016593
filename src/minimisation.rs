use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{ArgminError, Executor, Jacobian, Operator};
use argmin::solver::gaussnewton::GaussNewtonLS;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use ndarray::{s, Array1, Array2};
use ndarray_linalg::{c64, Inverse};

use crate::circuit::Circuit;
use crate::spectrum::ImpedanceSpectrum;
use crate::{Error, Result};

/// Relative step used for the finite difference Jacobian
const JACOBIAN_STEP: f64 = 1e-6;
/// Iteration stops once the cost falls by less than this
const COST_TOLERANCE: f64 = 1.5e-8;
/// Gradient norm below which the parameters are already optimal
const GRADIENT_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
pub(crate) struct SolverSettings {
    pub(crate) max_iters: u64,
    /// Attach a terminal logger to the solver loop
    pub(crate) trace: bool,
}

/// Parameters and standard errors of a converged fit
#[derive(Clone, Debug)]
pub(crate) struct Solution {
    pub(crate) parameters: Vec<f64>,
    pub(crate) uncertainties: Vec<f64>,
}

/// Complex nonlinear least squares problem for an equivalent circuit
///
/// The residual vector stacks the real and imaginary misfit at each frequency, both weighted by
/// the inverse modulus of the measured impedance so every decade of the spectrum contributes
/// comparably.
///
/// The solver works on the natural logarithm of the circuit parameters, which keeps every element
/// value positive without bounds.
#[derive(Clone)]
pub(crate) struct Problem {
    circuit: Circuit,
    /// Angular frequency of each measurement
    omega: Vec<f64>,
    observed: Vec<c64>,
    /// Inverse modulus of each measurement
    weights: Vec<f64>,
}

impl Problem {
    pub(crate) fn build(circuit: &Circuit, spectrum: &ImpedanceSpectrum) -> Self {
        Self {
            circuit: circuit.clone(),
            omega: spectrum.angular_frequency(),
            observed: spectrum.impedance(),
            weights: spectrum.modulus().iter().map(|m| 1.0 / m).collect(),
        }
    }

    /// Weighted residuals at log-parameters `log_params`
    fn compute(&self, log_params: &Array1<f64>) -> Array1<f64> {
        let params = log_params.mapv(f64::exp);
        let params = params.as_slice().unwrap_or(&[]);
        let n = self.omega.len();
        let mut residuals = Array1::zeros(2 * n);
        for (ii, ((&omega, observed), weight)) in self
            .omega
            .iter()
            .zip(&self.observed)
            .zip(&self.weights)
            .enumerate()
        {
            let misfit = self.circuit.impedance(params, omega) - observed;
            residuals[ii] = misfit.re * weight;
            residuals[n + ii] = misfit.im * weight;
        }
        residuals
    }

    /// Central finite difference estimate of the `ii`th Jacobian column
    fn jacobian_column(&self, log_params: &Array1<f64>, ii: usize) -> Array1<f64> {
        let mut plus = log_params.clone();
        plus[ii] += JACOBIAN_STEP;
        let mut minus = log_params.clone();
        minus[ii] -= JACOBIAN_STEP;
        (self.compute(&plus) - self.compute(&minus)) / (2. * JACOBIAN_STEP)
    }

    fn jacobian_matrix(&self, log_params: &Array1<f64>) -> Array2<f64> {
        let mut jacobian = Array2::zeros((2 * self.omega.len(), log_params.len()));
        for jj in 0..log_params.len() {
            let col = self.jacobian_column(log_params, jj);
            jacobian.slice_mut(s![.., jj]).assign(&col);
        }
        jacobian
    }

    /// Run the optimisation from `initial_parameters`
    ///
    /// # Errors
    /// Returns an error if the initial guess does not match the circuit or is not strictly
    /// positive, if the solver fails, or if it ends on non-finite parameters.
    pub(crate) fn solve(
        self,
        initial_parameters: &[f64],
        settings: SolverSettings,
    ) -> Result<Solution> {
        if initial_parameters.len() != self.circuit.num_parameters() {
            return Err(Error::CircuitSyntax {
                topology: self.circuit.topology().to_owned(),
                reason: format!(
                    "{} initial values given for {} parameters",
                    initial_parameters.len(),
                    self.circuit.num_parameters()
                ),
            });
        }
        if initial_parameters.iter().any(|p| !(p.is_finite() && *p > 0.0)) {
            return Err(Error::invalid(format!(
                "initial guess for {} must be finite and positive",
                self.circuit.topology()
            )));
        }
        let degrees_of_freedom = (2 * self.omega.len()).checked_sub(initial_parameters.len());
        if degrees_of_freedom.map_or(true, |dof| dof == 0) {
            return Err(Error::InsufficientData {
                required: initial_parameters.len() / 2 + 1,
                available: self.omega.len(),
            });
        }

        let mut log_params: Array1<f64> = initial_parameters.iter().map(|p| p.ln()).collect();
        let mut cost = self.cost(&log_params);
        for _ in 0..settings.max_iters {
            if self.gradient_norm(&log_params) <= GRADIENT_TOLERANCE {
                break;
            }
            let Some(next) = self.step(&log_params, settings)? else {
                break;
            };
            let next_cost = self.cost(&next);
            if next_cost.is_nan() || next_cost > cost {
                break;
            }
            let improvement = cost - next_cost;
            log_params = next;
            cost = next_cost;
            if improvement < COST_TOLERANCE {
                break;
            }
        }

        let parameters = log_params.mapv(f64::exp);
        let residuals = self.compute(&log_params);
        if parameters.iter().chain(residuals.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Convergence(format!(
                "fit of {} diverged",
                self.circuit.topology()
            )));
        }

        let uncertainties = self.standard_errors(&log_params, &parameters, &residuals);

        Ok(Solution {
            parameters: parameters.to_vec(),
            uncertainties,
        })
    }

    /// Half the sum of squared weighted residuals
    fn cost(&self, log_params: &Array1<f64>) -> f64 {
        let residuals = self.compute(log_params);
        0.5 * residuals.dot(&residuals)
    }

    /// Norm of the cost gradient `J^T r`
    fn gradient_norm(&self, log_params: &Array1<f64>) -> f64 {
        let gradient = self
            .jacobian_matrix(log_params)
            .t()
            .dot(&self.compute(log_params));
        gradient.dot(&gradient).sqrt()
    }

    /// A single Gauss–Newton iteration from `log_params`
    ///
    /// Returns `None` when the line search finds no descent direction, which happens once the
    /// gradient has vanished up to rounding.
    fn step(
        &self,
        log_params: &Array1<f64>,
        settings: SolverSettings,
    ) -> Result<Option<Array1<f64>>> {
        let linesearch = MoreThuenteLineSearch::new()
            .with_bounds(0.0, 1.0)
            .map_err(solver_error)?;
        let solver = GaussNewtonLS::new(linesearch);

        let mut executor = Executor::new(self.clone(), solver)
            .configure(|state| state.param(log_params.clone()).max_iters(1));
        if settings.trace {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        match executor.run() {
            Ok(res) => Ok(res.state().clone().take_param()),
            Err(err) if is_line_search_failure(&err) => Ok(None),
            Err(err) => Err(solver_error(err)),
        }
    }

    /// Standard errors from the covariance `s^2 (J^T J)^-1` in natural parameter space
    ///
    /// Entries are NaN when the normal matrix is singular.
    fn standard_errors(
        &self,
        log_params: &Array1<f64>,
        parameters: &Array1<f64>,
        residuals: &Array1<f64>,
    ) -> Vec<f64> {
        let mut jacobian = self.jacobian_matrix(log_params);
        // d/dp = (1/p) d/d(ln p)
        for (mut col, p) in jacobian.columns_mut().into_iter().zip(parameters) {
            col /= *p;
        }

        #[allow(clippy::cast_precision_loss)]
        let dof = (residuals.len() - parameters.len()) as f64;
        let variance = residuals.dot(residuals) / dof;

        match jacobian.t().dot(&jacobian).inv() {
            Ok(covariance) => covariance
                .diag()
                .iter()
                .map(|c| (c * variance).abs().sqrt())
                .collect(),
            Err(_) => vec![f64::NAN; parameters.len()],
        }
    }
}

fn is_line_search_failure(err: &argmin::core::Error) -> bool {
    matches!(
        err.downcast_ref::<ArgminError>(),
        Some(ArgminError::ConditionViolated { .. })
    )
}

fn solver_error(err: argmin::core::Error) -> Error {
    Error::Solver(err.to_string())
}

impl Operator for Problem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.compute(p))
    }
}

impl Jacobian for Problem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.jacobian_matrix(p))
    }
}
