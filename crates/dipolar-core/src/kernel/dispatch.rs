//! Multi-device dispatch of one kernel slice.
//!
//! [`generate_kernel_slice`] checks every precondition of the batch, then
//! enqueues one assembly pass per device on that device's stream and returns
//! without waiting. Each pass owns its output buffer for the duration of the
//! work; the filled buffer comes back through the device's
//! [`PendingSlice`].

use std::sync::Arc;

use log::{debug, info};
use ndarray::Array3;

use dipolar_compute::{launch, ExecutionStream, Pending};

use super::assembly::{assemble_slice, partition_shape};
use super::KernelError;
use crate::partition::{Partition, PartitionPlan};
use crate::quadrature::QuadratureTable;
use crate::types::{ComponentPair, KernelParams};

/// What to generate: one (field, source) slice with shared parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceRequest {
    pub pair: ComponentPair,
    pub params: KernelParams,
}

impl SliceRequest {
    pub fn new(pair: ComponentPair, params: KernelParams) -> Self {
        Self { pair, params }
    }
}

/// A device's populated partition of a kernel slice.
#[derive(Debug, Clone)]
pub struct DeviceSlice {
    pub device: usize,
    pub pair: ComponentPair,
    pub partition: Partition,
    /// Values indexed `(x, y_local, z)`.
    pub data: Array3<f64>,
}

/// Completion handle for one device's assembly pass.
#[derive(Debug)]
pub struct PendingSlice {
    device: usize,
    pair: ComponentPair,
    partition: Partition,
    pending: Pending<Result<Array3<f64>, KernelError>>,
}

impl PendingSlice {
    pub fn device(&self) -> usize {
        self.device
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Block until the pass has finished and take back the buffer.
    pub fn wait(self) -> Result<DeviceSlice, KernelError> {
        let device = self.device;
        let data = self
            .pending
            .wait()
            .map_err(|source| KernelError::Device { device, source })??;
        debug!("device {}: slice {} complete", device, self.pair);
        Ok(DeviceSlice {
            device,
            pair: self.pair,
            partition: self.partition,
            data,
        })
    }
}

/// Per-device launch outcomes of one dispatch, indexed by device.
#[derive(Debug)]
pub struct LaunchedSlice {
    launches: Vec<Result<PendingSlice, KernelError>>,
}

impl LaunchedSlice {
    pub fn launches(&self) -> &[Result<PendingSlice, KernelError>] {
        &self.launches
    }

    pub fn into_launches(self) -> Vec<Result<PendingSlice, KernelError>> {
        self.launches
    }

    /// Devices whose launch was refused by their stream.
    pub fn failed_devices(&self) -> Vec<usize> {
        self.launches
            .iter()
            .enumerate()
            .filter_map(|(d, l)| l.is_err().then_some(d))
            .collect()
    }

    /// Wait for every launched device, then report the first failure if any.
    pub fn wait_all(self) -> Result<Vec<DeviceSlice>, KernelError> {
        let mut slices = Vec::with_capacity(self.launches.len());
        let mut first_error = None;
        for launch in self.launches {
            match launch.and_then(PendingSlice::wait) {
                Ok(slice) => slices.push(slice),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(slices),
        }
    }
}

/// Zeroed output buffers shaped for every partition of `plan`.
pub fn allocate_buffers(params: &KernelParams, plan: &PartitionPlan) -> Vec<Array3<f64>> {
    plan.parts()
        .iter()
        .map(|p| {
            let [n0, n1, n2] = partition_shape(params, p);
            Array3::zeros((n0, n1, n2))
        })
        .collect()
}

/// Check every precondition of a dispatch without launching anything.
pub fn validate_dispatch(
    buffers: &[Array3<f64>],
    params: &KernelParams,
    plan: &PartitionPlan,
    quadrature: &[Arc<QuadratureTable>],
    streams: &[Arc<dyn ExecutionStream>],
) -> Result<(), KernelError> {
    let devices = plan.devices();
    if buffers.len() != devices || quadrature.len() != devices || streams.len() != devices {
        return Err(KernelError::DeviceCountMismatch {
            buffers: buffers.len(),
            quadrature: quadrature.len(),
            streams: streams.len(),
            partitions: devices,
        });
    }
    if plan.extent() != params.extent.axis(1) {
        return Err(KernelError::PartitionMismatch(format!(
            "partition plan covers {} indices but axis 1 has extent {}",
            plan.extent(),
            params.extent.axis(1)
        )));
    }
    for (device, (buffer, part)) in buffers.iter().zip(plan.parts()).enumerate() {
        let expected = partition_shape(params, part);
        let (a, b, c) = buffer.dim();
        if [a, b, c] != expected {
            return Err(KernelError::BufferShape {
                device,
                expected,
                actual: [a, b, c],
            });
        }
    }
    Ok(())
}

/// Launch the assembly of `request` on every device and return immediately.
///
/// `buffers`, `quadrature` and `streams` are indexed by device, matching the
/// partitions of `plan`. Contract violations are reported before any work is
/// enqueued. A stream that refuses its launch is reported in that device's
/// slot of the returned [`LaunchedSlice`]; the other devices still run.
pub fn generate_kernel_slice(
    buffers: Vec<Array3<f64>>,
    request: &SliceRequest,
    plan: &PartitionPlan,
    quadrature: &[Arc<QuadratureTable>],
    streams: &[Arc<dyn ExecutionStream>],
) -> Result<LaunchedSlice, KernelError> {
    validate_dispatch(&buffers, &request.params, plan, quadrature, streams)?;

    info!(
        "dispatching slice {} over {} device(s), extent {:?}",
        request.pair,
        plan.devices(),
        request.params.extent.dims()
    );

    let launches = buffers
        .into_iter()
        .zip(plan.parts())
        .zip(quadrature.iter().zip(streams))
        .enumerate()
        .map(|(device, ((mut buffer, &partition), (quad, stream)))| {
            let quad = Arc::clone(quad);
            let SliceRequest { pair, params } = *request;
            debug!(
                "device {}: enqueue slice {} rows [{}, {})",
                device,
                pair,
                partition.start,
                partition.end()
            );
            let pending = launch(stream.as_ref(), move || {
                assemble_slice(buffer.view_mut(), pair, &partition, &params, &quad)
                    .map(|()| buffer)
            })
            .map_err(|source| KernelError::Launch { device, source })?;
            Ok(PendingSlice {
                device,
                pair,
                partition,
                pending,
            })
        })
        .collect();

    Ok(LaunchedSlice { launches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellSize, Component, GridExtent};
    use dipolar_compute::{spawn_streams, BackendType, ComputeError, CpuStream, DeviceInfo, Task};

    /// Device that refuses launches or loses its work to a panic.
    struct FaultyStream {
        id: usize,
        refuse: bool,
    }

    impl ExecutionStream for FaultyStream {
        fn device_info(&self) -> DeviceInfo {
            DeviceInfo {
                id: self.id,
                name: "faulty".into(),
                backend_type: BackendType::Cpu,
                compute_units: Some(1),
            }
        }

        fn enqueue(&self, task: Task) -> Result<(), ComputeError> {
            if self.refuse {
                return Err(ComputeError::LaunchFailed {
                    device: self.id,
                    reason: "out of resources".into(),
                });
            }
            std::thread::spawn(move || {
                let _task = task;
                panic!("device fault");
            });
            Ok(())
        }

        fn synchronize(&self) -> Result<(), ComputeError> {
            Ok(())
        }
    }

    fn healthy_and_faulty(refuse: bool) -> Vec<Arc<dyn ExecutionStream>> {
        vec![
            Arc::new(CpuStream::with_threads(0, 1).unwrap()),
            Arc::new(FaultyStream { id: 1, refuse }),
        ]
    }

    fn params() -> KernelParams {
        KernelParams::new(
            GridExtent::new([4, 4, 2]).unwrap(),
            CellSize::cubic(1.0).unwrap(),
        )
    }

    fn quads(n: usize) -> Vec<Arc<QuadratureTable>> {
        let q = Arc::new(QuadratureTable::gauss_legendre_10());
        (0..n).map(|_| Arc::clone(&q)).collect()
    }

    #[test]
    fn test_mismatched_lengths_fail_before_launch() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let streams = spawn_streams(2, 1).unwrap();
        let err = generate_kernel_slice(
            allocate_buffers(&p, &plan),
            &SliceRequest::new(ComponentPair::new(Component::X, Component::X), p),
            &plan,
            &quads(1),
            &streams,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::DeviceCountMismatch { quadrature: 1, .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_plan_must_cover_axis_one() {
        let p = params();
        let plan = PartitionPlan::even(6, 2).unwrap();
        let streams = spawn_streams(2, 1).unwrap();
        let buffers = vec![Array3::zeros((4, 3, 2)), Array3::zeros((4, 3, 2))];
        let err = generate_kernel_slice(
            buffers,
            &SliceRequest::new(ComponentPair::new(Component::X, Component::X), p),
            &plan,
            &quads(2),
            &streams,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::PartitionMismatch(_)));
    }

    #[test]
    fn test_buffer_shape_reports_device() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let streams = spawn_streams(2, 1).unwrap();
        let buffers = vec![Array3::zeros((4, 2, 2)), Array3::zeros((4, 3, 2))];
        let err = generate_kernel_slice(
            buffers,
            &SliceRequest::new(ComponentPair::new(Component::X, Component::Y), p),
            &plan,
            &quads(2),
            &streams,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::BufferShape { device: 1, .. }));
    }

    #[test]
    fn test_buffers_return_populated() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let streams = spawn_streams(2, 1).unwrap();
        let launched = generate_kernel_slice(
            allocate_buffers(&p, &plan),
            &SliceRequest::new(ComponentPair::new(Component::Z, Component::Z), p),
            &plan,
            &quads(2),
            &streams,
        )
        .unwrap();
        assert!(launched.failed_devices().is_empty());

        let slices = launched.wait_all().unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[1].partition, Partition::new(2, 2));
        // Self term sits on device 0 at local (0, 0, 0).
        assert!((slices[0].data[[0, 0, 0]] + 1.0 / 3.0).abs() < 1e-6);
        assert!(slices.iter().all(|s| s.data.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_refused_launch_lands_in_device_slot() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let launched = generate_kernel_slice(
            allocate_buffers(&p, &plan),
            &SliceRequest::new(ComponentPair::new(Component::X, Component::X), p),
            &plan,
            &quads(2),
            &healthy_and_faulty(true),
        )
        .unwrap();

        assert_eq!(launched.failed_devices(), vec![1]);
        let mut launches = launched.into_launches();
        let refused = launches.pop().unwrap().unwrap_err();
        assert!(matches!(refused, KernelError::Launch { device: 1, .. }));
        assert!(!refused.is_contract_violation());

        // The healthy device still completes its partition.
        let slice = launches.pop().unwrap().unwrap().wait().unwrap();
        assert_eq!(slice.device, 0);
        assert!((slice.data[[0, 0, 0]] + 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_wait_all_reports_launch_failure_after_draining() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let streams = healthy_and_faulty(true);
        let launched = generate_kernel_slice(
            allocate_buffers(&p, &plan),
            &SliceRequest::new(ComponentPair::new(Component::Y, Component::Y), p),
            &plan,
            &quads(2),
            &streams,
        )
        .unwrap();

        let err = launched.wait_all().unwrap_err();
        assert!(matches!(err, KernelError::Launch { device: 1, .. }));
        // Device 0 was waited on, so its stream is idle.
        streams[0].synchronize().unwrap();
    }

    #[test]
    fn test_panicking_device_reports_device_error() {
        let p = params();
        let plan = PartitionPlan::even(4, 2).unwrap();
        let launched = generate_kernel_slice(
            allocate_buffers(&p, &plan),
            &SliceRequest::new(ComponentPair::new(Component::X, Component::Z), p),
            &plan,
            &quads(2),
            &healthy_and_faulty(false),
        )
        .unwrap();
        assert!(launched.failed_devices().is_empty());

        let err = launched.wait_all().unwrap_err();
        assert!(matches!(
            err,
            KernelError::Device {
                device: 1,
                source: ComputeError::TaskAborted { device: 1 },
            }
        ));
    }
}
