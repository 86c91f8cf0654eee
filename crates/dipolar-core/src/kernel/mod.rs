//! Kernel-element generation.
//!
//! The pipeline runs leaf to root:
//!
//! - [`face`] integrates one (field, source) tensor entry for one lattice
//!   offset over the source cell's charged faces.
//! - [`crate::periodic`] sums that entry over the periodic image window.
//! - [`assembly`] fills one device's partition of a kernel slice.
//! - [`dispatch`] validates a multi-device request and launches one
//!   assembly pass per execution stream without waiting for completion.
//! - [`tensor`] drives all six independent slices and stitches the device
//!   partitions back into full arrays.

pub mod assembly;
pub mod dispatch;
pub mod face;
pub mod tensor;

use dipolar_compute::ComputeError;
use thiserror::Error;

/// Errors raised while generating kernel slices.
///
/// Every variant except [`Launch`](KernelError::Launch) and
/// [`Device`](KernelError::Device) is a contract violation, detected before
/// any work is enqueued.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Invalid component '{0}': expected x, y, z (or 0, 1, 2)")]
    InvalidComponent(String),

    #[error("Invalid cell size {0:?}: every side must be finite and positive")]
    InvalidCellSize([f64; 3]),

    #[error("Invalid kernel extent: {0}")]
    InvalidExtent(String),

    #[error("Invalid quadrature table: {0}")]
    InvalidQuadrature(String),

    #[error(
        "Device count mismatch: {buffers} buffers, {quadrature} quadrature tables, \
         {streams} streams, {partitions} partitions"
    )]
    DeviceCountMismatch {
        buffers: usize,
        quadrature: usize,
        streams: usize,
        partitions: usize,
    },

    #[error("Partition mismatch: {0}")]
    PartitionMismatch(String),

    #[error("Output buffer for device {device} has shape {actual:?}, expected {expected:?}")]
    BufferShape {
        device: usize,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Output buffer has shape {actual:?}, expected {expected:?}")]
    SliceShape {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Launch failed on device {device}")]
    Launch {
        device: usize,
        #[source]
        source: ComputeError,
    },

    #[error("Device {device} failed during kernel generation")]
    Device {
        device: usize,
        #[source]
        source: ComputeError,
    },
}

impl KernelError {
    /// Whether this error was raised by argument validation rather than by
    /// a device.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, KernelError::Launch { .. } | KernelError::Device { .. })
    }
}

pub use assembly::assemble_slice;
pub use dispatch::{
    allocate_buffers, generate_kernel_slice, DeviceSlice, LaunchedSlice, PendingSlice,
    SliceRequest,
};
pub use face::{face_kernel_element, kernel_element, point_dipole_element};
pub use tensor::{generate_kernel_tensor, KernelTensor};
