//! # Dipolar Core
//!
//! Generator for the discretised magnetostatic interaction kernel that a
//! micromagnetic solver convolves with the magnetisation (via a spectral
//! transform) to obtain the demagnetising field.
//!
//! ## Architecture
//!
//! Each kernel entry is the field of a uniformly magnetised source cell,
//! obtained by Gauss quadrature over the source cell's charged faces
//! ([`kernel::face`]) and optionally summed over periodic images
//! ([`periodic`]). The kernel volume is split along axis 1 into static
//! device partitions ([`partition`]); [`kernel::dispatch`] launches one
//! assembly pass per device on its
//! [`ExecutionStream`](dipolar_compute::ExecutionStream) and returns
//! without waiting.
//!
//! ## Modules
//!
//! - [`types`] — Component selector, grid extent, cell size, periodicity, parameters.
//! - [`quadrature`] — Injected Gauss quadrature tables.
//! - [`kernel`] — Face integrator, assembly, dispatch, full tensor.
//! - [`periodic`] — Periodic image summation.
//! - [`partition`] — Axis-1 partition plans.

pub mod kernel;
pub mod partition;
pub mod periodic;
pub mod quadrature;
pub mod types;

pub use kernel::{
    generate_kernel_slice, generate_kernel_tensor, KernelError, KernelTensor, SliceRequest,
};
pub use partition::{Partition, PartitionPlan};
pub use quadrature::QuadratureTable;
pub use types::{CellSize, Component, ComponentPair, GridExtent, KernelParams, Periodicity};
