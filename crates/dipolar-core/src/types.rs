//! Core types shared across the kernel generator.
//!
//! This module defines the caller-supplied, read-only inputs of a kernel
//! generation pass: the component selector, the kernel grid extent, the cell
//! size, the periodicity, and the parameter bundle that groups them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// A Cartesian field or magnetisation component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    X,
    Y,
    Z,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::X, Component::Y, Component::Z];

    /// Axis index (0, 1 or 2).
    pub fn index(self) -> usize {
        match self {
            Component::X => 0,
            Component::Y => 1,
            Component::Z => 2,
        }
    }

    /// The two axes transverse to this one, in cyclic order.
    pub fn transverse(self) -> (usize, usize) {
        let u = self.index();
        ((u + 1) % 3, (u + 2) % 3)
    }

    fn label(self) -> char {
        match self {
            Component::X => 'x',
            Component::Y => 'y',
            Component::Z => 'z',
        }
    }
}

impl TryFrom<usize> for Component {
    type Error = KernelError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Component::X),
            1 => Ok(Component::Y),
            2 => Ok(Component::Z),
            other => Err(KernelError::InvalidComponent(other.to_string())),
        }
    }
}

impl FromStr for Component {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" | "0" => Ok(Component::X),
            "y" | "1" => Ok(Component::Y),
            "z" | "2" => Ok(Component::Z),
            _ => Err(KernelError::InvalidComponent(s.to_string())),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A (field component, source component) pair selecting one kernel slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentPair {
    pub field: Component,
    pub source: Component,
}

impl ComponentPair {
    pub fn new(field: Component, source: Component) -> Self {
        Self { field, source }
    }

    /// The pair with field and source exchanged.
    pub fn transposed(self) -> Self {
        Self {
            field: self.source,
            source: self.field,
        }
    }

    pub fn is_diagonal(self) -> bool {
        self.field == self.source
    }
}

impl FromStr for ComponentPair {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let mut chars = t.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(a), Some(b), None) => Ok(Self {
                field: a.to_string().parse()?,
                source: b.to_string().parse()?,
            }),
            _ => Err(KernelError::InvalidComponent(s.to_string())),
        }
    }
}

impl fmt::Display for ComponentPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.field, self.source)
    }
}

/// The six independent pairs of the symmetric kernel tensor.
pub const SYMMETRIC_PAIRS: [ComponentPair; 6] = [
    ComponentPair { field: Component::X, source: Component::X },
    ComponentPair { field: Component::Y, source: Component::Y },
    ComponentPair { field: Component::Z, source: Component::Z },
    ComponentPair { field: Component::Y, source: Component::Z },
    ComponentPair { field: Component::X, source: Component::Z },
    ComponentPair { field: Component::X, source: Component::Y },
];

/// Extent (N0, N1, N2) of the full kernel volume, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[usize; 3]", into = "[usize; 3]")]
pub struct GridExtent([usize; 3]);

impl GridExtent {
    pub fn new(n: [usize; 3]) -> Result<Self, KernelError> {
        if n.iter().any(|&v| v == 0) {
            return Err(KernelError::InvalidExtent(format!(
                "kernel extent must be positive along every axis, got {:?}",
                n
            )));
        }
        Ok(Self(n))
    }

    /// Kernel extent needed to convolve a magnetisation mesh of `mesh` cells.
    ///
    /// Open axes are zero-padded to twice the mesh size so the circular
    /// convolution of the transform engine becomes a linear one. Periodic
    /// axes and singleton axes keep the mesh size.
    pub fn for_mesh(mesh: [usize; 3], periodicity: &Periodicity) -> Result<Self, KernelError> {
        let mut n = mesh;
        for axis in 0..3 {
            if periodicity.repetitions(axis) == 0 && mesh[axis] > 1 {
                n[axis] = 2 * mesh[axis];
            }
        }
        Self::new(n)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.0
    }

    pub fn axis(&self, axis: usize) -> usize {
        self.0[axis]
    }

    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lattice offset stored at global index `index` along `axis`.
    ///
    /// Indices past the midpoint wrap to negative offsets:
    /// `g` maps to `g` when `2g <= N` and to `g - N` otherwise.
    pub fn centered_offset(&self, axis: usize, index: usize) -> i64 {
        let n = self.0[axis];
        if 2 * index > n {
            index as i64 - n as i64
        } else {
            index as i64
        }
    }

    /// Global index holding lattice offset `offset` along `axis`.
    pub fn wrap_index(&self, axis: usize, offset: i64) -> usize {
        offset.rem_euclid(self.0[axis] as i64) as usize
    }
}

impl TryFrom<[usize; 3]> for GridExtent {
    type Error = KernelError;

    fn try_from(n: [usize; 3]) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<GridExtent> for [usize; 3] {
    fn from(e: GridExtent) -> Self {
        e.0
    }
}

/// Physical dimensions of one finite-difference cell. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]", into = "[f64; 3]")]
pub struct CellSize([f64; 3]);

impl CellSize {
    pub fn new(size: [f64; 3]) -> Result<Self, KernelError> {
        if size.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(KernelError::InvalidCellSize(size));
        }
        Ok(Self(size))
    }

    /// Cubic cell of side `a`.
    pub fn cubic(a: f64) -> Result<Self, KernelError> {
        Self::new([a, a, a])
    }

    pub fn dims(&self) -> [f64; 3] {
        self.0
    }

    pub fn axis(&self, axis: usize) -> f64 {
        self.0[axis]
    }

    pub fn volume(&self) -> f64 {
        self.0[0] * self.0[1] * self.0[2]
    }

    /// Longest side of the cell.
    pub fn max_side(&self) -> f64 {
        self.0[0].max(self.0[1]).max(self.0[2])
    }

    /// Same cell with every side multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Result<Self, KernelError> {
        Self::new([self.0[0] * factor, self.0[1] * factor, self.0[2] * factor])
    }
}

impl TryFrom<[f64; 3]> for CellSize {
    type Error = KernelError;

    fn try_from(size: [f64; 3]) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<CellSize> for [f64; 3] {
    fn from(c: CellSize) -> Self {
        c.0
    }
}

/// Number of periodic repetitions summed per axis; zero means open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct Periodicity([usize; 3]);

impl Periodicity {
    pub fn new(per: [usize; 3]) -> Self {
        Self(per)
    }

    pub fn open() -> Self {
        Self([0, 0, 0])
    }

    pub fn repetitions(&self, axis: usize) -> usize {
        self.0[axis]
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        self.0[axis] > 0
    }

    /// Total number of images summed for one element.
    pub fn image_count(&self) -> usize {
        self.0.iter().map(|&p| 2 * p + 1).product()
    }
}

impl From<[usize; 3]> for Periodicity {
    fn from(per: [usize; 3]) -> Self {
        Self(per)
    }
}

impl From<Periodicity> for [usize; 3] {
    fn from(p: Periodicity) -> Self {
        p.0
    }
}

/// Default far-field radius, in multiples of the longest cell side.
///
/// Beyond it the point-dipole tensor stays within 1e-3 (relative to the
/// largest tensor entry) of face quadrature for any cell aspect ratio.
pub const DEFAULT_FAR_FIELD_RADIUS: u32 = 25;

fn default_far_field_radius() -> Option<u32> {
    Some(DEFAULT_FAR_FIELD_RADIUS)
}

/// Shared, read-only parameters of one kernel generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Full kernel extent (N0, N1, N2).
    pub extent: GridExtent,
    /// Finite-difference cell size.
    pub cell_size: CellSize,
    /// Periodic repetitions per axis.
    #[serde(default)]
    pub periodicity: Periodicity,
    /// Offsets at least `r` longest cell sides away (physical distance) use
    /// the point-dipole tensor. `None` integrates every offset.
    #[serde(default = "default_far_field_radius")]
    pub far_field_radius: Option<u32>,
    /// Multiply every element by 1/(N0·N1·N2) for an unnormalised inverse
    /// transform downstream.
    #[serde(default)]
    pub normalize: bool,
}

impl KernelParams {
    /// Open-boundary parameters with the default near/far split.
    pub fn new(extent: GridExtent, cell_size: CellSize) -> Self {
        Self {
            extent,
            cell_size,
            periodicity: Periodicity::open(),
            far_field_radius: default_far_field_radius(),
            normalize: false,
        }
    }

    pub fn with_periodicity(mut self, periodicity: Periodicity) -> Self {
        self.periodicity = periodicity;
        self
    }

    pub fn with_far_field_radius(mut self, radius: Option<u32>) -> Self {
        self.far_field_radius = radius;
        self
    }

    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Factor applied to every element after summation.
    pub fn output_scale(&self) -> f64 {
        if self.normalize {
            1.0 / self.extent.len() as f64
        } else {
            1.0
        }
    }
}
