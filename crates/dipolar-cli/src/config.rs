//! TOML configuration deserialisation for kernel generation jobs.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use dipolar_core::types::{ComponentPair, DEFAULT_FAR_FIELD_RADIUS, SYMMETRIC_PAIRS};
use dipolar_core::{
    CellSize, GridExtent, KernelParams, PartitionPlan, Periodicity, QuadratureTable,
};

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub mesh: MeshConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub quadrature: QuadratureConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Lattice geometry from TOML.
///
/// Either `size` (the magnetisation mesh, doubled along open axes) or
/// `kernel_extent` (used as given) must be set.
#[derive(Debug, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub size: Option<[usize; 3]>,
    #[serde(default)]
    pub kernel_extent: Option<[usize; 3]>,
    pub cell_size: [f64; 3],
    #[serde(default)]
    pub periodicity: [usize; 3],
}

/// Kernel evaluation options.
#[derive(Debug, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub components: ComponentSelection,
    /// Near/far split in longest cell sides; 0 integrates every offset.
    #[serde(default = "default_far_field_radius")]
    pub far_field_radius: u32,
    #[serde(default)]
    pub normalize: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            components: ComponentSelection::default(),
            far_field_radius: default_far_field_radius(),
            normalize: false,
        }
    }
}

fn default_far_field_radius() -> u32 {
    DEFAULT_FAR_FIELD_RADIUS
}

/// `"all"` or an explicit list such as `["xx", "xy"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ComponentSelection {
    Keyword(String),
    List(Vec<String>),
}

impl Default for ComponentSelection {
    fn default() -> Self {
        Self::Keyword("all".into())
    }
}

impl ComponentSelection {
    /// `None` for the full symmetric tensor, otherwise the listed slices.
    pub fn resolve(&self) -> Result<Option<Vec<ComponentPair>>> {
        match self {
            Self::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(None),
            Self::Keyword(k) => bail!(
                "Unknown component selection '{}'. Use \"all\" or a list like [\"xx\", \"xy\"]",
                k
            ),
            Self::List(items) => {
                if items.is_empty() {
                    bail!("kernel.components must not be empty");
                }
                let mut pairs = Vec::with_capacity(items.len());
                for item in items {
                    let pair: ComponentPair = item
                        .parse()
                        .with_context(|| format!("kernel.components entry '{}'", item))?;
                    if !pairs.contains(&pair) {
                        pairs.push(pair);
                    }
                }
                Ok(Some(pairs))
            }
        }
    }
}

/// Device pool settings.
#[derive(Debug, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_device_count")]
    pub count: usize,
    /// Worker threads per device; 0 shares the machine evenly.
    #[serde(default)]
    pub threads_per_device: usize,
    /// Axis-1 rows per device (N1part), the last device taking the
    /// remainder. Omitted: split as evenly as possible.
    #[serde(default)]
    pub local_extent: Option<usize>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            count: default_device_count(),
            threads_per_device: 0,
            local_extent: None,
        }
    }
}

fn default_device_count() -> usize {
    1
}

/// Quadrature dataset: bundled order-10 Gauss-Legendre unless a file is given.
#[derive(Debug, Default, Deserialize)]
pub struct QuadratureConfig {
    #[serde(default)]
    pub file: Option<String>,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Write one CSV per slice (default: true).
    #[serde(default = "default_true")]
    pub save_csv: bool,
    /// Also write a JSON document with all slices (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_csv: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Validated kernel parameters for this job.
    pub fn kernel_params(&self) -> Result<KernelParams> {
        let periodicity = Periodicity::new(self.mesh.periodicity);
        let extent = match (self.mesh.size, self.mesh.kernel_extent) {
            (Some(_), Some(_)) => bail!("mesh.size and mesh.kernel_extent are mutually exclusive"),
            (Some(size), None) => GridExtent::for_mesh(size, &periodicity)?,
            (None, Some(extent)) => GridExtent::new(extent)?,
            (None, None) => bail!("mesh requires either 'size' or 'kernel_extent'"),
        };
        let cell_size = CellSize::new(self.mesh.cell_size)?;
        let radius = match self.kernel.far_field_radius {
            0 => None,
            r => Some(r),
        };
        Ok(KernelParams::new(extent, cell_size)
            .with_periodicity(periodicity)
            .with_far_field_radius(radius)
            .with_normalization(self.kernel.normalize))
    }

    /// Slices to generate; `None` means the full symmetric tensor.
    pub fn selected_pairs(&self) -> Result<Option<Vec<ComponentPair>>> {
        self.kernel.components.resolve()
    }

    /// Axis-1 partition plan for `params` across the configured devices.
    pub fn partition_plan(&self, params: &KernelParams) -> Result<PartitionPlan> {
        let n1 = params.extent.axis(1);
        let count = self.devices.count;
        if count == 0 {
            bail!("devices.count must be at least 1");
        }
        let plan = match self.devices.local_extent {
            Some(local) => PartitionPlan::from_local_extent(n1, local, count),
            None => PartitionPlan::even(n1, count),
        };
        plan.with_context(|| format!("partitioning axis 1 of extent {} across {} devices", n1, count))
    }

    /// Check everything that can be checked without generating anything.
    pub fn validate(&self) -> Result<()> {
        let params = self.kernel_params()?;
        self.selected_pairs()?;
        self.partition_plan(&params)?;
        Ok(())
    }

    /// Pairs that will actually be written, in output order.
    pub fn output_pairs(&self) -> Result<Vec<ComponentPair>> {
        Ok(self
            .selected_pairs()?
            .unwrap_or_else(|| SYMMETRIC_PAIRS.to_vec()))
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load a quadrature table from a TOML or JSON file with `points` and
/// `weights` arrays.
pub fn load_quadrature(path: &Path) -> Result<QuadratureTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading quadrature file {}", path.display()))?;
    let table: QuadratureTable = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => toml::from_str(&content)?,
    };
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> JobConfig {
        toml::from_str(s).expect("valid job")
    }

    #[test]
    fn test_minimal_job_uses_defaults() {
        let job = parse(
            r#"
            [mesh]
            size = [4, 3, 1]
            cell_size = [5e-9, 5e-9, 2e-9]
            "#,
        );
        let params = job.kernel_params().unwrap();
        assert_eq!(params.extent.dims(), [8, 6, 1]);
        assert_eq!(params.far_field_radius, Some(DEFAULT_FAR_FIELD_RADIUS));
        assert!(!params.normalize);
        assert!(job.selected_pairs().unwrap().is_none());
        assert_eq!(job.output_pairs().unwrap().len(), 6);
        assert_eq!(job.devices.count, 1);
        assert!(job.output.save_csv);
        assert!(!job.output.save_json);
        job.validate().unwrap();
    }

    #[test]
    fn test_periodic_axes_are_not_doubled() {
        let job = parse(
            r#"
            [mesh]
            size = [4, 4, 2]
            cell_size = [1.0, 1.0, 1.0]
            periodicity = [3, 0, 0]

            [kernel]
            far_field_radius = 0
            normalize = true
            "#,
        );
        let params = job.kernel_params().unwrap();
        assert_eq!(params.extent.dims(), [4, 8, 4]);
        assert_eq!(params.periodicity.repetitions(0), 3);
        assert_eq!(params.far_field_radius, None);
        assert!(params.normalize);
    }

    #[test]
    fn test_component_list() {
        let job = parse(
            r#"
            [mesh]
            kernel_extent = [4, 4, 4]
            cell_size = [1.0, 1.0, 1.0]

            [kernel]
            components = ["xx", "xy", "xx"]
            "#,
        );
        let pairs = job.selected_pairs().unwrap().unwrap();
        let names: Vec<String> = pairs.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["xx", "xy"]);
    }

    #[test]
    fn test_rejects_bad_jobs() {
        let both = parse(
            r#"
            [mesh]
            size = [4, 4, 4]
            kernel_extent = [4, 4, 4]
            cell_size = [1.0, 1.0, 1.0]
            "#,
        );
        assert!(both.validate().is_err());

        let bad_cell = parse(
            r#"
            [mesh]
            size = [4, 4, 4]
            cell_size = [1.0, -1.0, 1.0]
            "#,
        );
        assert!(bad_cell.validate().is_err());

        let bad_component = parse(
            r#"
            [mesh]
            size = [4, 4, 4]
            cell_size = [1.0, 1.0, 1.0]
            [kernel]
            components = ["xw"]
            "#,
        );
        assert!(bad_component.validate().is_err());

        let too_many_devices = parse(
            r#"
            [mesh]
            kernel_extent = [4, 2, 4]
            cell_size = [1.0, 1.0, 1.0]
            [devices]
            count = 3
            "#,
        );
        assert!(too_many_devices.validate().is_err());
    }

    #[test]
    fn test_local_extent_selects_remainder_plan() {
        let job = parse(
            r#"
            [mesh]
            kernel_extent = [4, 10, 4]
            cell_size = [1.0, 1.0, 1.0]
            [devices]
            count = 3
            local_extent = 4
            "#,
        );
        let params = job.kernel_params().unwrap();
        let plan = job.partition_plan(&params).unwrap();
        let lens: Vec<usize> = plan.parts().iter().map(|p| p.len).collect();
        assert_eq!(lens, vec![4, 4, 2]);

        let even = parse(
            r#"
            [mesh]
            kernel_extent = [4, 10, 4]
            cell_size = [1.0, 1.0, 1.0]
            [devices]
            count = 3
            "#,
        );
        let lens: Vec<usize> = even
            .partition_plan(&params)
            .unwrap()
            .parts()
            .iter()
            .map(|p| p.len)
            .collect();
        assert_eq!(lens, vec![4, 3, 3]);

        let short = parse(
            r#"
            [mesh]
            kernel_extent = [4, 10, 4]
            cell_size = [1.0, 1.0, 1.0]
            [devices]
            count = 2
            local_extent = 4
            "#,
        );
        assert!(short.validate().is_err());
    }
}
