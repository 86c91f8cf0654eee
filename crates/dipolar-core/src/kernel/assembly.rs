//! Kernel assembly for one device partition.
//!
//! Fills an `(N0, N1part, N2)` buffer with the periodically summed
//! (field, source) entry of every lattice cell the device owns. Local axis-1
//! indices are shifted by the partition start before the wraparound
//! centering is applied, so a device sees only its own slab yet produces the
//! same values as a single-device pass over the full extent.
//!
//! Element `(i, j, k)` of the buffer is written by exactly one Rayon task.

use ndarray::{ArrayViewMut3, Zip};

use super::KernelError;
use crate::partition::Partition;
use crate::periodic::periodic_kernel_element;
use crate::quadrature::QuadratureTable;
use crate::types::{ComponentPair, KernelParams};

/// Expected buffer shape for a partition.
pub fn partition_shape(params: &KernelParams, partition: &Partition) -> [usize; 3] {
    let n = params.extent.dims();
    [n[0], partition.len, n[2]]
}

/// Populate `buffer` with the kernel slice `pair` for `partition`.
///
/// Runs data-parallel on the current Rayon pool; on a CPU stream that is the
/// stream's private pool.
pub fn assemble_slice(
    mut buffer: ArrayViewMut3<'_, f64>,
    pair: ComponentPair,
    partition: &Partition,
    params: &KernelParams,
    quadrature: &QuadratureTable,
) -> Result<(), KernelError> {
    let expected = partition_shape(params, partition);
    let actual = buffer.dim();
    let actual = [actual.0, actual.1, actual.2];
    if actual != expected {
        return Err(KernelError::SliceShape { expected, actual });
    }
    if partition.end() > params.extent.axis(1) {
        return Err(KernelError::PartitionMismatch(format!(
            "partition [{}, {}) exceeds axis 1 extent {}",
            partition.start,
            partition.end(),
            params.extent.axis(1)
        )));
    }

    let extent = params.extent;
    let scale = params.output_scale();

    Zip::indexed(&mut buffer).par_for_each(|(i, j, k), value| {
        let offset = [
            extent.centered_offset(0, i),
            extent.centered_offset(1, partition.global_index(j)),
            extent.centered_offset(2, k),
        ];
        *value = scale * periodic_kernel_element(pair, offset, params, quadrature);
    });

    Ok(())
}
