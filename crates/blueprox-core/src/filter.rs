//! Per-device distance smoothing.
//!
//! Each device gets an unscented Kalman filter over the state `[distance, rate]`, with
//! Merwe scaled sigma points, a constant-velocity motion model and a direct distance
//! measurement. Updates are event paced: every call advances the model by one step
//! regardless of wall-clock time.
//!
//! ```text
//! predict:  d' = d + rate * dt      rate' = rate
//! measure:  z  = d
//! ```

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::types::Observation;

const N: usize = 2; // State dimension
const SIGMA_POINTS: usize = 2 * N + 1;

/// Time advanced by a single update call.
const STEP_DT: f64 = 1.0;

type Vector = [f64; N];
type Matrix = [[f64; N]; N];

/// Numerical failures inside a filter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The scaled covariance has no Cholesky factor.
    #[error("covariance matrix is not positive definite")]
    NotPositiveDefinite,

    /// The innovation variance collapsed to zero or below.
    #[error("innovation variance is not positive")]
    DegenerateInnovation,

    /// The state or covariance left the finite range.
    #[error("filter state is not finite")]
    NonFinite,
}

/// Sigma point weights for the scaled unscented transform.
#[derive(Debug, Clone, Copy)]
struct SigmaWeights {
    lambda: f64,
    mean: [f64; SIGMA_POINTS],
    covariance: [f64; SIGMA_POINTS],
}

impl SigmaWeights {
    fn merwe(alpha: f64, beta: f64, kappa: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let n = N as f64;
        let lambda = alpha * alpha * (n + kappa) - n;
        let side = 1.0 / (2.0 * (n + lambda));

        let mut mean = [side; SIGMA_POINTS];
        let mut covariance = [side; SIGMA_POINTS];
        mean[0] = lambda / (n + lambda);
        covariance[0] = mean[0] + (1.0 - alpha * alpha + beta);

        Self {
            lambda,
            mean,
            covariance,
        }
    }
}

fn transition(x: &Vector, dt: f64) -> Vector {
    [x[0] + x[1] * dt, x[1]]
}

const fn measure(x: &Vector) -> f64 {
    x[0]
}

/// Lower Cholesky factor of a 2x2 symmetric matrix.
fn cholesky(m: &Matrix) -> Result<Matrix, FilterError> {
    let a = m[0][0];
    if !(a > 0.0) {
        return Err(FilterError::NotPositiveDefinite);
    }
    let l00 = a.sqrt();
    let l10 = m[1][0] / l00;
    let rem = l10.mul_add(-l10, m[1][1]);
    if !(rem >= 0.0) {
        return Err(FilterError::NotPositiveDefinite);
    }
    Ok([[l00, 0.0], [l10, rem.sqrt()]])
}

fn is_finite(x: &Vector, p: &Matrix) -> bool {
    x.iter().chain(p.iter().flatten()).all(|v| v.is_finite())
}

fn round_to_cm(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Unscented Kalman filter tracking one device's distance.
#[derive(Debug, Clone)]
pub struct ProximityFilter {
    /// State: [distance, rate]
    x: Vector,
    /// State covariance
    p: Matrix,
    /// Process noise
    q: Matrix,
    /// Measurement noise variance
    r: f64,
    weights: SigmaWeights,
    last_estimate: Option<f64>,
    updates: u64,
}

impl ProximityFilter {
    /// Create a filter centred on the first observed distance, at rest.
    #[must_use]
    pub fn new(initial_distance: f64, config: &FilterConfig) -> Self {
        let scale = config.initial_covariance_scale;
        let q = config.process_noise;
        Self {
            x: [initial_distance, 0.0],
            p: [[scale, 0.0], [0.0, scale]],
            q: [[q, 0.0], [0.0, q]],
            r: config.measurement_noise,
            weights: SigmaWeights::merwe(config.alpha, config.beta, config.kappa),
            last_estimate: None,
            updates: 0,
        }
    }

    /// Fold in one raw distance observation.
    ///
    /// An absent observation returns the last published estimate and leaves the
    /// filter untouched. A present one runs predict then correct and publishes the
    /// distance rounded to centimetres.
    ///
    /// # Errors
    ///
    /// Returns a [`FilterError`] if the step is numerically unusable; the state is then
    /// left exactly as it was before the call.
    pub fn update(&mut self, observation: Observation<f64>) -> Result<Option<f64>, FilterError> {
        let Observation::Present(z) = observation else {
            return Ok(self.last_estimate);
        };

        let (x, p) = self.step(z)?;
        self.x = x;
        self.p = p;
        self.updates += 1;

        let estimate = round_to_cm(self.x[0]);
        self.last_estimate = Some(estimate);
        Ok(Some(estimate))
    }

    /// Last value returned by [`update`](Self::update), if any.
    #[must_use]
    pub const fn last_estimate(&self) -> Option<f64> {
        self.last_estimate
    }

    /// Unrounded distance component of the state.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.x[0]
    }

    /// Rate of change of distance per update step.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.x[1]
    }

    /// Variance of the distance estimate.
    #[must_use]
    pub const fn distance_variance(&self) -> f64 {
        self.p[0][0]
    }

    /// Number of observations folded in so far.
    #[must_use]
    pub const fn updates(&self) -> u64 {
        self.updates
    }

    fn sigma_points(&self) -> Result<[Vector; SIGMA_POINTS], FilterError> {
        #[allow(clippy::cast_precision_loss)]
        let c = N as f64 + self.weights.lambda;
        let scaled = [
            [c * self.p[0][0], c * self.p[0][1]],
            [c * self.p[1][0], c * self.p[1][1]],
        ];
        let l = cholesky(&scaled)?;

        let mut points = [self.x; SIGMA_POINTS];
        for k in 0..N {
            for i in 0..N {
                points[k + 1][i] += l[i][k];
                points[N + k + 1][i] -= l[i][k];
            }
        }
        Ok(points)
    }

    /// One predict + correct cycle, returning the new state without committing it.
    fn step(&self, z: f64) -> Result<(Vector, Matrix), FilterError> {
        let w = &self.weights;

        // ===== Predict step =====
        let sigmas = self.sigma_points()?;
        let sigmas_f = sigmas.map(|s| transition(&s, STEP_DT));

        let mut x_pred = [0.0; N];
        for (wm, s) in w.mean.iter().zip(&sigmas_f) {
            for i in 0..N {
                x_pred[i] += wm * s[i];
            }
        }

        let mut p_pred = self.q;
        for (wc, s) in w.covariance.iter().zip(&sigmas_f) {
            let d = [s[0] - x_pred[0], s[1] - x_pred[1]];
            for i in 0..N {
                for j in 0..N {
                    p_pred[i][j] += wc * d[i] * d[j];
                }
            }
        }

        // ===== Update step =====
        let sigmas_h = sigmas_f.map(|s| measure(&s));
        let z_pred: f64 = w.mean.iter().zip(&sigmas_h).map(|(wm, h)| wm * h).sum();

        let mut s = self.r;
        let mut pxz = [0.0; N];
        for ((wc, sf), h) in w.covariance.iter().zip(&sigmas_f).zip(&sigmas_h) {
            let dz = h - z_pred;
            s += wc * dz * dz;
            for i in 0..N {
                pxz[i] += wc * (sf[i] - x_pred[i]) * dz;
            }
        }
        if !(s > 0.0) {
            return Err(FilterError::DegenerateInnovation);
        }

        let k = [pxz[0] / s, pxz[1] / s];
        let residual = z - z_pred;
        let x = [k[0].mul_add(residual, x_pred[0]), k[1].mul_add(residual, x_pred[1])];

        let mut p = p_pred;
        for i in 0..N {
            for j in 0..N {
                p[i][j] -= k[i] * s * k[j];
            }
        }
        // Keep P symmetric against rounding drift.
        let off = 0.5 * (p[0][1] + p[1][0]);
        p[0][1] = off;
        p[1][0] = off;

        if !is_finite(&x, &p) {
            return Err(FilterError::NonFinite);
        }
        Ok((x, p))
    }
}

/// Owns one [`ProximityFilter`] per device address.
///
/// Filters are created lazily on the first usable observation and live for the rest of
/// the process; devices that disappear simply stop being updated.
#[derive(Debug, Clone, Default)]
pub struct FilterBank {
    config: FilterConfig,
    filters: HashMap<String, ProximityFilter>,
    last_raw: HashMap<String, f64>,
}

impl FilterBank {
    /// Create an empty bank whose filters use `config`.
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            filters: HashMap::new(),
            last_raw: HashMap::new(),
        }
    }

    /// Return the filter for `address`, creating it at `initial_distance` if needed.
    ///
    /// Calling this again for the same address returns the existing filter unchanged.
    pub fn get_or_create(&mut self, address: &str, initial_distance: f64) -> &mut ProximityFilter {
        let config = &self.config;
        self.filters.entry(address.to_string()).or_insert_with(|| {
            debug!(address = %address, initial_distance, "Creating proximity filter");
            ProximityFilter::new(initial_distance, config)
        })
    }

    /// Feed a raw distance for `address` and return the published estimate.
    ///
    /// Absent observations never touch filter state: they return the last published
    /// estimate, or the last raw distance if no filter exists yet. A numerically failed
    /// step is logged and the previous estimate is returned.
    pub fn update(&mut self, address: &str, raw: Observation<f64>) -> Option<f64> {
        let Observation::Present(distance) = raw else {
            return self.estimate(address);
        };

        self.last_raw.insert(address.to_string(), distance);
        let filter = self.get_or_create(address, distance);
        match filter.update(raw) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(address = %address, error = %err, "Proximity filter step rejected");
                filter
                    .last_estimate()
                    .or_else(|| self.last_raw.get(address).copied())
            }
        }
    }

    /// Last published estimate for `address`, falling back to its last raw distance.
    #[must_use]
    pub fn estimate(&self, address: &str) -> Option<f64> {
        self.filters
            .get(address)
            .and_then(ProximityFilter::last_estimate)
            .or_else(|| self.last_raw.get(address).copied())
    }

    /// Last raw (unfiltered) distance computed for `address`.
    #[must_use]
    pub fn last_raw_distance(&self, address: &str) -> Option<f64> {
        self.last_raw.get(address).copied()
    }

    /// Filter for `address`, if one has been created.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ProximityFilter> {
        self.filters.get(address)
    }

    /// Whether a filter exists for `address`.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.filters.contains_key(address)
    }

    /// Number of filters created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filter has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
