//! Static partitioning of the kernel's axis 1 across devices.
//!
//! Each device owns a contiguous slab `[start, start + len)` of axis 1. A
//! plan is validated once, up front, to tile `[0, N1)` exactly with no
//! overlap, so no two devices ever write the same element.

use serde::{Deserialize, Serialize};

use crate::kernel::KernelError;

/// The axis-1 slab owned by one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// First global index along axis 1.
    pub start: usize,
    /// Number of axis-1 indices owned (N1part).
    pub len: usize,
}

impl Partition {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last owned global index.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Global axis-1 index of local index `local`.
    pub fn global_index(&self, local: usize) -> usize {
        self.start + local
    }

    pub fn contains(&self, global: usize) -> bool {
        global >= self.start && global < self.end()
    }
}

/// Validated assignment of axis-1 slabs to devices, indexed by device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    extent: usize,
    parts: Vec<Partition>,
}

impl PartitionPlan {
    /// Accept explicit per-device descriptors.
    ///
    /// The descriptors must be non-empty, contiguous in device order, and
    /// cover `[0, extent)` exactly.
    pub fn new(extent: usize, parts: Vec<Partition>) -> Result<Self, KernelError> {
        if parts.is_empty() {
            return Err(KernelError::PartitionMismatch(
                "at least one device partition is required".into(),
            ));
        }
        let mut next = 0;
        for (device, part) in parts.iter().enumerate() {
            if part.len == 0 {
                return Err(KernelError::PartitionMismatch(format!(
                    "device {} owns an empty partition",
                    device
                )));
            }
            if part.start != next {
                return Err(KernelError::PartitionMismatch(format!(
                    "device {} starts at {} but the previous partition ends at {}",
                    device, part.start, next
                )));
            }
            next = part.end();
        }
        if next != extent {
            return Err(KernelError::PartitionMismatch(format!(
                "partitions cover [0, {}) but axis 1 has extent {}",
                next, extent
            )));
        }
        Ok(Self { extent, parts })
    }

    /// The whole axis on a single device.
    pub fn single(extent: usize) -> Result<Self, KernelError> {
        Self::new(extent, vec![Partition::new(0, extent)])
    }

    /// `local_extent` indices per device, the last device taking the
    /// remainder.
    ///
    /// Requires `(devices - 1) * local_extent < extent <= devices * local_extent`.
    pub fn from_local_extent(
        extent: usize,
        local_extent: usize,
        devices: usize,
    ) -> Result<Self, KernelError> {
        if devices == 0 || local_extent == 0 {
            return Err(KernelError::PartitionMismatch(format!(
                "{} devices with local extent {} cannot tile axis 1",
                devices, local_extent
            )));
        }
        let covered = devices.checked_mul(local_extent).ok_or_else(|| {
            KernelError::PartitionMismatch(format!(
                "{} devices x {} overflows the axis-1 index range",
                devices, local_extent
            ))
        })?;
        if covered < extent || covered - local_extent >= extent {
            return Err(KernelError::PartitionMismatch(format!(
                "{} devices x {} does not tile axis 1 of extent {}",
                devices, local_extent, extent
            )));
        }
        let parts = (0..devices)
            .map(|d| {
                let start = d * local_extent;
                Partition::new(start, local_extent.min(extent - start))
            })
            .collect();
        Self::new(extent, parts)
    }

    /// Split as evenly as possible; the first `extent % devices` devices get
    /// one extra index.
    pub fn even(extent: usize, devices: usize) -> Result<Self, KernelError> {
        if devices == 0 || devices > extent {
            return Err(KernelError::PartitionMismatch(format!(
                "cannot split axis 1 of extent {} across {} devices",
                extent, devices
            )));
        }
        let base = extent / devices;
        let extra = extent % devices;
        let mut start = 0;
        let parts = (0..devices)
            .map(|d| {
                let len = base + usize::from(d < extra);
                let part = Partition::new(start, len);
                start += len;
                part
            })
            .collect();
        Self::new(extent, parts)
    }

    /// Axis-1 extent N1 covered by the plan.
    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn devices(&self) -> usize {
        self.parts.len()
    }

    pub fn parts(&self) -> &[Partition] {
        &self.parts
    }

    pub fn get(&self, device: usize) -> Option<&Partition> {
        self.parts.get(device)
    }

    /// Device owning global axis-1 index `global`.
    pub fn owner(&self, global: usize) -> Option<usize> {
        self.parts.iter().position(|p| p.contains(global))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_local_extent_exact_tiling() {
        let plan = PartitionPlan::from_local_extent(8, 4, 2).unwrap();
        assert_eq!(plan.parts(), &[Partition::new(0, 4), Partition::new(4, 4)]);
    }

    #[test]
    fn test_from_local_extent_remainder_device() {
        let plan = PartitionPlan::from_local_extent(10, 4, 3).unwrap();
        assert_eq!(
            plan.parts(),
            &[Partition::new(0, 4), Partition::new(4, 4), Partition::new(8, 2)]
        );
        assert!(PartitionPlan::from_local_extent(10, 4, 2).is_err());
        assert!(PartitionPlan::from_local_extent(8, 4, 3).is_err());
        assert!(PartitionPlan::from_local_extent(8, 0, 3).is_err());
    }

    #[test]
    fn test_from_local_extent_rejects_overflow() {
        let err = PartitionPlan::from_local_extent(8, usize::MAX / 2 + 1, 2).unwrap_err();
        assert!(matches!(err, KernelError::PartitionMismatch(_)));
        assert!(PartitionPlan::from_local_extent(8, usize::MAX, 3).is_err());
    }

    #[test]
    fn test_even_split_spreads_remainder() {
        let plan = PartitionPlan::even(7, 3).unwrap();
        let lens: Vec<usize> = plan.parts().iter().map(|p| p.len).collect();
        assert_eq!(lens, vec![3, 2, 2]);
        assert_eq!(plan.owner(0), Some(0));
        assert_eq!(plan.owner(3), Some(1));
        assert_eq!(plan.owner(6), Some(2));
        assert_eq!(plan.owner(7), None);
        assert!(PartitionPlan::even(2, 3).is_err());
    }

    #[test]
    fn test_rejects_gaps_overlaps_and_short_cover() {
        let gap = vec![Partition::new(0, 2), Partition::new(3, 1)];
        assert!(PartitionPlan::new(4, gap).is_err());
        let overlap = vec![Partition::new(0, 3), Partition::new(2, 2)];
        assert!(PartitionPlan::new(4, overlap).is_err());
        let short = vec![Partition::new(0, 2), Partition::new(2, 1)];
        assert!(PartitionPlan::new(4, short).is_err());
        let empty = vec![Partition::new(0, 4), Partition::new(4, 0)];
        assert!(PartitionPlan::new(4, empty).is_err());
        assert!(PartitionPlan::new(4, vec![]).is_err());
    }
}
