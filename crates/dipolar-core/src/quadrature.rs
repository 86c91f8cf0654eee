//! Gauss quadrature tables on the reference interval [-1, 1].
//!
//! The face integrator takes its integration rule as injected data, so the
//! order can be changed without touching the integrator. A table is built
//! once, wrapped in an `Arc`, and shared read-only by every worker.

use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// Order-10 Gauss–Legendre nodes on [-1, 1].
const GL10_POINTS: [f64; 10] = [
    -0.973_906_528_517_171_7,
    -0.865_063_366_688_984_5,
    -0.679_409_568_299_024_4,
    -0.433_395_394_129_247_16,
    -0.148_874_338_981_631_22,
    0.148_874_338_981_631_22,
    0.433_395_394_129_247_16,
    0.679_409_568_299_024_4,
    0.865_063_366_688_984_5,
    0.973_906_528_517_171_7,
];

/// Order-10 Gauss–Legendre weights matching [`GL10_POINTS`].
const GL10_WEIGHTS: [f64; 10] = [
    0.066_671_344_308_688_03,
    0.149_451_349_150_580_53,
    0.219_086_362_515_982_07,
    0.269_266_719_309_996_24,
    0.295_524_224_714_752_9,
    0.295_524_224_714_752_9,
    0.269_266_719_309_996_24,
    0.219_086_362_515_982_07,
    0.149_451_349_150_580_53,
    0.066_671_344_308_688_03,
];

/// A one-dimensional quadrature rule on [-1, 1].
///
/// Two-dimensional face integrals use the tensor product of the rule with
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct QuadratureTable {
    points: Vec<f64>,
    weights: Vec<f64>,
}

#[derive(Deserialize)]
struct RawTable {
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl TryFrom<RawTable> for QuadratureTable {
    type Error = KernelError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Self::new(raw.points, raw.weights)
    }
}

impl QuadratureTable {
    /// Build a table from parallel point and weight arrays.
    pub fn new(points: Vec<f64>, weights: Vec<f64>) -> Result<Self, KernelError> {
        if points.is_empty() {
            return Err(KernelError::InvalidQuadrature("table is empty".into()));
        }
        if points.len() != weights.len() {
            return Err(KernelError::InvalidQuadrature(format!(
                "{} points but {} weights",
                points.len(),
                weights.len()
            )));
        }
        if let Some(p) = points
            .iter()
            .find(|p| !p.is_finite() || p.abs() > 1.0)
        {
            return Err(KernelError::InvalidQuadrature(format!(
                "point {} lies outside [-1, 1]",
                p
            )));
        }
        if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(KernelError::InvalidQuadrature(format!(
                "weight {} is not positive",
                w
            )));
        }
        Ok(Self { points, weights })
    }

    /// The order-10 Gauss–Legendre rule used for the reference kernel.
    pub fn gauss_legendre_10() -> Self {
        Self {
            points: GL10_POINTS.to_vec(),
            weights: GL10_WEIGHTS.to_vec(),
        }
    }

    /// Number of nodes per dimension.
    pub fn order(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterate over (point, weight) pairs.
    pub fn nodes(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().copied().zip(self.weights.iter().copied())
    }
}

impl Default for QuadratureTable {
    fn default() -> Self {
        Self::gauss_legendre_10()
    }
}
