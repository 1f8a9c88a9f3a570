//! Beta/Gamma/Normal samplers over an injected random source
//!
//! Every routine takes the generator explicitly so a seeded `StdRng` gives
//! reproducible draws. [`Sampler`] owns the engine's shared generator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Mutex;

use crate::error::{EngineError, Result};

/// Uniform draw from the open interval (0, 1)
fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let u: f64 = rng.random();
        if u > 0.0 {
            return u;
        }
    }
}

fn check_shape(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "{} must be a positive finite number, got {}",
            name, value
        )))
    }
}

/// Standard normal draw via the Box–Muller transform
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = open_unit(rng);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Gamma(shape, scale) draw using Marsaglia–Tsang
///
/// Shapes below one are boosted: draw Gamma(shape + 1) and scale by
/// `U^(1/shape)`.
pub fn sample_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64, scale: f64) -> Result<f64> {
    check_shape("shape", shape)?;
    check_shape("scale", scale)?;

    if shape < 1.0 {
        let boosted = sample_gamma(rng, shape + 1.0, scale)?;
        let u = open_unit(rng);
        return Ok(boosted * u.powf(1.0 / shape));
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let (x, v) = loop {
            let x = sample_normal(rng);
            let t = 1.0 + c * x;
            if t > 0.0 {
                break (x, t * t * t);
            }
        };

        let u = open_unit(rng);
        let x2 = x * x;

        // squeeze
        if u < 1.0 - 0.0331 * x2 * x2 {
            return Ok(d * v * scale);
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return Ok(d * v * scale);
        }
    }
}

/// Beta(alpha, beta) draw as X / (X + Y) with X ~ Gamma(alpha), Y ~ Gamma(beta)
///
/// The result always lies strictly inside (0, 1).
pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> Result<f64> {
    check_shape("alpha", alpha)?;
    check_shape("beta", beta)?;

    let x = sample_gamma(rng, alpha, 1.0)?;
    let y = sample_gamma(rng, beta, 1.0)?;
    let sum = x + y;

    if !(sum > 0.0) || !sum.is_finite() {
        return Err(EngineError::StatisticalUndefined(format!(
            "Beta({}, {}) draw degenerated (x={}, y={})",
            alpha, beta, x, y
        )));
    }

    // Underflow in either gamma draw would otherwise land exactly on 0 or 1
    Ok((x / sum).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON))
}

/// Shared, seedable random source
pub struct Sampler {
    rng: Mutex<StdRng>,
}

impl Sampler {
    /// Seeded when `seed` is given, OS entropy otherwise
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::from_rng(rng)
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng: Mutex::new(rng) }
    }

    /// Run `f` with exclusive access to the generator
    ///
    /// Never hold the generator across an await point; compute the draws
    /// first and await afterwards.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    /// Split off an independent generator for work on another thread
    pub fn fork(&self) -> StdRng {
        self.with_rng(|rng| StdRng::from_rng(rng))
    }

    pub fn sample_beta(&self, alpha: f64, beta: f64) -> Result<f64> {
        self.with_rng(|rng| sample_beta(rng, alpha, beta))
    }
}
