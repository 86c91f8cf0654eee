//! Execution-stream trait and device abstraction.
//!
//! The [`ExecutionStream`] trait abstracts over the per-device asynchronous
//! execution context so that the kernel generator in `dipolar-core` depends
//! only on a narrow enqueue/synchronise interface and never on a concrete
//! concurrency runtime.

use std::sync::mpsc::{self, Receiver, TryRecvError};

use thiserror::Error;

/// Errors originating from execution streams.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Launch failed on device {device}: {reason}")]
    LaunchFailed { device: usize, reason: String },

    #[error("Task on device {device} aborted before producing a result")]
    TaskAborted { device: usize },
}

/// Describes one execution device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
}

/// A unit of work enqueued on a stream.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An ordered, asynchronous execution context bound to one device.
///
/// Work enqueued on a stream runs in program order on that stream's device.
/// No ordering exists between different streams. `enqueue` never waits for
/// the work to finish; callers observe completion through
/// [`synchronize`](ExecutionStream::synchronize) or a [`Pending`] handle.
pub trait ExecutionStream: Send + Sync {
    /// Return information about the device behind this stream.
    fn device_info(&self) -> DeviceInfo;

    /// Enqueue a task for asynchronous execution.
    fn enqueue(&self, task: Task) -> Result<(), ComputeError>;

    /// Block until every task enqueued so far has finished.
    ///
    /// Reports an error if any of those tasks panicked. The failure record is
    /// cleared once reported.
    fn synchronize(&self) -> Result<(), ComputeError>;
}

/// Completion handle for a value produced by an enqueued task.
#[derive(Debug)]
pub struct Pending<T> {
    device: usize,
    receiver: Receiver<T>,
}

impl<T> Pending<T> {
    /// Device the task was launched on.
    pub fn device(&self) -> usize {
        self.device
    }

    /// Block until the task has produced its value.
    pub fn wait(self) -> Result<T, ComputeError> {
        self.receiver
            .recv()
            .map_err(|_| ComputeError::TaskAborted {
                device: self.device,
            })
    }

    /// Return the value if the task has already finished, or give the handle
    /// back if it is still running.
    pub fn try_wait(self) -> Result<Result<T, Self>, ComputeError> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Ok(value)),
            Err(TryRecvError::Empty) => Ok(Err(self)),
            Err(TryRecvError::Disconnected) => Err(ComputeError::TaskAborted {
                device: self.device,
            }),
        }
    }
}

/// Enqueue `work` on `stream` and return a handle to its result.
///
/// Returns as soon as the task has been handed to the stream.
pub fn launch<T, F>(stream: &dyn ExecutionStream, work: F) -> Result<Pending<T>, ComputeError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let device = stream.device_info().id;
    let (sender, receiver) = mpsc::sync_channel(1);
    stream.enqueue(Box::new(move || {
        // The receiver may already be gone if the caller dropped the handle.
        let _ = sender.send(work());
    }))?;
    Ok(Pending { device, receiver })
}
