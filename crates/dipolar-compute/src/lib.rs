//! # Dipolar Compute
//!
//! Execution backends for the dipolar kernel generator. This crate provides
//! the [`ExecutionStream`](backend::ExecutionStream) trait, an ordered
//! per-device execution context that isolates the kernel numerics from the
//! concurrency runtime that executes them.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU streams (thread + Rayon pool per device) | `cpu` (default) | Implemented |

pub mod backend;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{launch, BackendType, ComputeError, DeviceInfo, ExecutionStream, Pending, Task};

#[cfg(feature = "cpu")]
pub use cpu::{spawn_streams, CpuStream};
