//! Full symmetric kernel tensor.
//!
//! The demagnetising kernel is a symmetric 3×3 tensor field, so six slices
//! (xx, yy, zz, yz, xz, xy) determine all nine. All six are dispatched up
//! front, one after another on each device's stream, and only then awaited.

use std::sync::Arc;

use log::info;
use ndarray::{s, Array3, ArrayView3};

use dipolar_compute::ExecutionStream;

use super::dispatch::{allocate_buffers, generate_kernel_slice, DeviceSlice, SliceRequest};
use super::KernelError;
use crate::partition::PartitionPlan;
use crate::quadrature::QuadratureTable;
use crate::types::{Component, ComponentPair, KernelParams, SYMMETRIC_PAIRS};

/// The six independent kernel slices over the full `(N0, N1, N2)` extent.
#[derive(Debug, Clone)]
pub struct KernelTensor {
    params: KernelParams,
    slices: Vec<(ComponentPair, Array3<f64>)>,
}

impl KernelTensor {
    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    /// Slice for (field, source); (a, b) and (b, a) share storage.
    pub fn component(&self, field: Component, source: Component) -> ArrayView3<'_, f64> {
        let wanted = ComponentPair::new(field, source);
        self.slices
            .iter()
            .find(|(p, _)| *p == wanted || p.transposed() == wanted)
            .map(|(_, data)| data.view())
            .unwrap_or_else(|| unreachable!("all six symmetric pairs are stored"))
    }

    /// Stored slices in [`SYMMETRIC_PAIRS`] order.
    pub fn slices(&self) -> impl Iterator<Item = (ComponentPair, ArrayView3<'_, f64>)> {
        self.slices.iter().map(|(p, d)| (*p, d.view()))
    }
}

/// Copy device partitions of one slice into a full-extent array.
pub fn stitch_partitions(params: &KernelParams, parts: &[DeviceSlice]) -> Array3<f64> {
    let [n0, n1, n2] = params.extent.dims();
    let mut full = Array3::zeros((n0, n1, n2));
    for part in parts {
        full.slice_mut(s![.., part.partition.start..part.partition.end(), ..])
            .assign(&part.data);
    }
    full
}

/// Generate all six independent slices on the given devices and wait for
/// them.
pub fn generate_kernel_tensor(
    params: &KernelParams,
    plan: &PartitionPlan,
    quadrature: &[Arc<QuadratureTable>],
    streams: &[Arc<dyn ExecutionStream>],
) -> Result<KernelTensor, KernelError> {
    let mut launched = Vec::with_capacity(SYMMETRIC_PAIRS.len());
    for pair in SYMMETRIC_PAIRS {
        let request = SliceRequest::new(pair, *params);
        let batch = generate_kernel_slice(
            allocate_buffers(params, plan),
            &request,
            plan,
            quadrature,
            streams,
        )?;
        launched.push((pair, batch));
    }

    let mut slices = Vec::with_capacity(launched.len());
    for (pair, batch) in launched {
        let parts = batch.wait_all()?;
        slices.push((pair, stitch_partitions(params, &parts)));
    }

    info!(
        "kernel tensor complete: {} slices of {:?}",
        slices.len(),
        params.extent.dims()
    );
    Ok(KernelTensor {
        params: *params,
        slices,
    })
}
