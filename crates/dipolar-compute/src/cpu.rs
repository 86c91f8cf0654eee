//! CPU execution streams.
//!
//! Each [`CpuStream`] stands in for one compute device: a dedicated worker
//! thread drains the stream's queue in program order and runs every task
//! inside the stream's own Rayon pool, so data-parallel work launched on
//! different streams never competes for the same threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::backend::{BackendType, ComputeError, DeviceInfo, ExecutionStream, Task};

/// Bookkeeping shared between a stream and its worker thread.
#[derive(Default)]
struct StreamState {
    in_flight: Mutex<usize>,
    idle: Condvar,
    failures: Mutex<Vec<String>>,
}

impl StreamState {
    fn finish_one(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// CPU stream backed by a worker thread and a private Rayon pool.
pub struct CpuStream {
    id: usize,
    num_threads: usize,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<StreamState>,
}

impl CpuStream {
    /// Create a stream for device `id` using all available threads.
    pub fn new(id: usize) -> Result<Self, ComputeError> {
        Self::with_threads(id, rayon::current_num_threads())
    }

    /// Create a stream for device `id` with a specified thread count.
    pub fn with_threads(id: usize, num_threads: usize) -> Result<Self, ComputeError> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("dipolar-dev{}-{}", id, i))
            .build()
            .map_err(|e| ComputeError::DeviceError(format!("device {}: {}", id, e)))?;

        let (sender, receiver) = mpsc::channel::<Task>();
        let state = Arc::new(StreamState::default());
        let worker_state = Arc::clone(&state);

        let worker = thread::Builder::new()
            .name(format!("dipolar-stream{}", id))
            .spawn(move || {
                for task in receiver {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pool.install(task)));
                    if let Err(payload) = outcome {
                        let reason = panic_message(payload.as_ref());
                        warn!("stream {}: task panicked: {}", id, reason);
                        worker_state
                            .failures
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(reason);
                    }
                    worker_state.finish_one();
                }
                debug!("stream {}: worker shut down", id);
            })
            .map_err(|e| ComputeError::DeviceError(format!("device {}: {}", id, e)))?;

        Ok(Self {
            id,
            num_threads,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        })
    }

    /// Number of worker threads in this stream's pool.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl ExecutionStream for CpuStream {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            name: format!("CPU stream {} ({} threads)", self.id, self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn enqueue(&self, task: Task) -> Result<(), ComputeError> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = sender.as_ref().ok_or_else(|| ComputeError::LaunchFailed {
            device: self.id,
            reason: "stream has been shut down".into(),
        })?;

        *self.state.in_flight.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        sender.send(task).map_err(|_| {
            self.state.finish_one();
            ComputeError::LaunchFailed {
                device: self.id,
                reason: "worker thread is gone".into(),
            }
        })
    }

    fn synchronize(&self) -> Result<(), ComputeError> {
        let mut in_flight = self.state.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        while *in_flight > 0 {
            in_flight = self
                .state
                .idle
                .wait(in_flight)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(in_flight);

        let failures = std::mem::take(
            &mut *self.state.failures.lock().unwrap_or_else(|e| e.into_inner()),
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ComputeError::DeviceError(format!(
                "device {}: {} task(s) failed: {}",
                self.id,
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

impl Drop for CpuStream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain its queue and exit.
        self.sender
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = self.worker.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = worker.join();
        }
    }
}

/// Spawn `count` CPU streams, one per simulated device.
///
/// With `threads_per_device == 0` the available Rayon threads are shared
/// evenly between the streams.
pub fn spawn_streams(
    count: usize,
    threads_per_device: usize,
) -> Result<Vec<Arc<dyn ExecutionStream>>, ComputeError> {
    if count == 0 {
        return Err(ComputeError::Unavailable(
            "at least one CPU stream is required".into(),
        ));
    }
    let threads = if threads_per_device == 0 {
        (rayon::current_num_threads() / count).max(1)
    } else {
        threads_per_device
    };
    (0..count)
        .map(|id| {
            CpuStream::with_threads(id, threads).map(|s| Arc::new(s) as Arc<dyn ExecutionStream>)
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
