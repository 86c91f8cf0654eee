//! Generation runner: ties together configuration, devices, and kernel output.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use ndarray::Array3;
use serde::Serialize;

use dipolar_compute::{spawn_streams, ExecutionStream};
use dipolar_core::kernel::dispatch::allocate_buffers;
use dipolar_core::kernel::tensor::stitch_partitions;
use dipolar_core::{
    generate_kernel_slice, generate_kernel_tensor, ComponentPair, KernelParams, PartitionPlan,
    QuadratureTable, SliceRequest,
};

use crate::config::{load_quadrature, JobConfig};

/// Results from a generation run.
pub struct GenerationOutput {
    pub params: KernelParams,
    pub devices: usize,
    pub slices: Vec<(ComponentPair, Array3<f64>)>,
    pub elapsed: Duration,
}

/// Generate every requested kernel slice for a parsed job configuration.
pub fn run_generation(job: &JobConfig) -> Result<GenerationOutput> {
    job.validate()?;
    let params = job.kernel_params()?;

    let quadrature = match &job.quadrature.file {
        Some(file) => load_quadrature(Path::new(file))?,
        None => QuadratureTable::gauss_legendre_10(),
    };
    println!(
        "Quadrature: order {}{}",
        quadrature.order(),
        job.quadrature
            .file
            .as_deref()
            .map(|f| format!(" from {}", f))
            .unwrap_or_default()
    );

    let plan = job.partition_plan(&params)?;
    let streams = spawn_streams(plan.devices(), job.devices.threads_per_device)?;
    let shared = Arc::new(quadrature);
    let tables: Vec<Arc<QuadratureTable>> = streams.iter().map(|_| Arc::clone(&shared)).collect();

    println!("Kernel extent: {:?}", params.extent.dims());
    println!("Cell size: {:?}", params.cell_size.dims());
    println!("Periodicity: {:?}", <[usize; 3]>::from(params.periodicity));
    for (device, part) in plan.parts().iter().enumerate() {
        println!(
            "  device {}: axis-1 rows [{}, {})",
            device,
            part.start,
            part.end()
        );
    }

    let start = Instant::now();
    let slices = match job.selected_pairs()? {
        None => {
            let tensor = generate_kernel_tensor(&params, &plan, &tables, &streams)?;
            tensor
                .slices()
                .map(|(pair, data)| (pair, data.to_owned()))
                .collect()
        }
        Some(pairs) => generate_selected(&pairs, &params, &plan, &tables, &streams)?,
    };
    let elapsed = start.elapsed();

    info!("generated {} slice(s) in {:.3?}", slices.len(), elapsed);
    println!("Generated {} slice(s) in {:.2?}", slices.len(), elapsed);

    Ok(GenerationOutput {
        params,
        devices: streams.len(),
        slices,
        elapsed,
    })
}

/// Launch every selected slice before waiting on any of them.
fn generate_selected(
    pairs: &[ComponentPair],
    params: &KernelParams,
    plan: &PartitionPlan,
    tables: &[Arc<QuadratureTable>],
    streams: &[Arc<dyn ExecutionStream>],
) -> Result<Vec<(ComponentPair, Array3<f64>)>> {
    let mut launched = Vec::with_capacity(pairs.len());
    for &pair in pairs {
        let batch = generate_kernel_slice(
            allocate_buffers(params, plan),
            &SliceRequest::new(pair, *params),
            plan,
            tables,
            streams,
        )?;
        launched.push((pair, batch));
    }

    let mut slices = Vec::with_capacity(launched.len());
    for (pair, batch) in launched {
        let parts = batch
            .wait_all()
            .with_context(|| format!("generating slice {}", pair))?;
        slices.push((pair, stitch_partitions(params, &parts)));
    }
    Ok(slices)
}

/// Write one kernel slice to a CSV file with a metadata header.
///
/// Rows carry the storage index, the lattice offset it holds, and the value.
pub fn write_slice_csv(
    pair: ComponentPair,
    data: &Array3<f64>,
    params: &KernelParams,
    path: &Path,
) -> Result<()> {
    use std::io::{BufWriter, Write};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = BufWriter::new(std::fs::File::create(path)?);

    writeln!(file, "# Dipolar kernel slice K_{}", pair)?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# extent: {:?}", params.extent.dims())?;
    writeln!(file, "# cell_size: {:?}", params.cell_size.dims())?;
    writeln!(file, "# periodicity: {:?}", <[usize; 3]>::from(params.periodicity))?;
    match params.far_field_radius {
        Some(r) => writeln!(file, "# far_field_radius: {}", r)?,
        None => writeln!(file, "# far_field_radius: none")?,
    }
    writeln!(file, "# normalized: {}", params.normalize)?;
    writeln!(file, "#")?;
    writeln!(file, "ix,iy,iz,dx,dy,dz,value")?;

    let extent = params.extent;
    for ((i, j, k), v) in data.indexed_iter() {
        writeln!(
            file,
            "{},{},{},{},{},{},{:.12e}",
            i,
            j,
            k,
            extent.centered_offset(0, i),
            extent.centered_offset(1, j),
            extent.centered_offset(2, k),
            v
        )?;
    }
    file.flush()?;

    println!("Slice {} written to: {}", pair, path.display());
    Ok(())
}

#[derive(Serialize)]
struct KernelDocument<'a> {
    version: &'static str,
    params: &'a KernelParams,
    devices: usize,
    elapsed_seconds: f64,
    slices: Vec<SliceDocument>,
}

#[derive(Serialize)]
struct SliceDocument {
    component: String,
    shape: [usize; 3],
    /// Row-major `(x, y, z)` values.
    values: Vec<f64>,
}

/// Write all generated slices to a JSON file.
pub fn write_kernel_json(output: &GenerationOutput, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let doc = KernelDocument {
        version: env!("CARGO_PKG_VERSION"),
        params: &output.params,
        devices: output.devices,
        elapsed_seconds: output.elapsed.as_secs_f64(),
        slices: output
            .slices
            .iter()
            .map(|(pair, data)| {
                let (a, b, c) = data.dim();
                SliceDocument {
                    component: pair.to_string(),
                    shape: [a, b, c],
                    values: data.iter().copied().collect(),
                }
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Kernel (JSON) written to: {}", path.display());
    Ok(())
}

/// Print the execution devices a job with `count` devices would use.
pub fn describe_devices(count: usize, threads_per_device: usize) -> Result<()> {
    let streams = spawn_streams(count, threads_per_device)?;
    println!("Execution devices:");
    for stream in &streams {
        let info = stream.device_info();
        println!(
            "  [{}] {} ({:?}, {} threads)",
            info.id,
            info.name,
            info.backend_type,
            info.compute_units
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into())
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use dipolar_core::Component;

    fn job(extra: &str) -> JobConfig {
        let text = format!(
            r#"
            [mesh]
            kernel_extent = [4, 4, 2]
            cell_size = [1.0, 1.0, 1.0]
            {}
            "#,
            extra
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_full_tensor_run() {
        let out = run_generation(&job("[devices]\ncount = 2\nthreads_per_device = 1")).unwrap();
        assert_eq!(out.devices, 2);
        assert_eq!(out.slices.len(), 6);
        let trace: f64 = out
            .slices
            .iter()
            .filter(|(p, _)| p.is_diagonal())
            .map(|(_, d)| d[[0, 0, 0]])
            .sum();
        assert_abs_diff_eq!(trace, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_selected_slices_match_tensor() {
        let full = run_generation(&job("")).unwrap();
        let some = run_generation(&job("[kernel]\ncomponents = [\"yx\"]")).unwrap();
        assert_eq!(some.slices.len(), 1);

        let (pair, data) = &some.slices[0];
        assert_eq!(*pair, ComponentPair::new(Component::Y, Component::X));
        let xy = full
            .slices
            .iter()
            .find(|(p, _)| *p == pair.transposed())
            .map(|(_, d)| d)
            .unwrap();
        for (a, b) in data.iter().zip(xy.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_local_extent_plan_matches_even_split() {
        let text = |devices: &str| {
            format!(
                r#"
                [mesh]
                kernel_extent = [4, 5, 2]
                cell_size = [1.0, 2.0, 1.0]
                [kernel]
                components = ["xy"]
                [devices]
                {}
                threads_per_device = 1
                "#,
                devices
            )
        };
        let remainder: JobConfig = toml::from_str(&text("count = 2\nlocal_extent = 4")).unwrap();
        let even: JobConfig = toml::from_str(&text("count = 2")).unwrap();

        let a = run_generation(&remainder).unwrap();
        let b = run_generation(&even).unwrap();
        assert_eq!(a.devices, 2);
        assert_eq!(a.slices[0].1, b.slices[0].1);
    }

    #[test]
    fn test_writes_csv_and_json() {
        let dir = std::env::temp_dir().join(format!("dipolar-runner-{}", std::process::id()));
        let out = run_generation(&job("[kernel]\ncomponents = [\"zz\"]")).unwrap();
        let (pair, data) = &out.slices[0];

        let csv = dir.join("kernel_zz.csv");
        write_slice_csv(*pair, data, &out.params, &csv).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows[0], "ix,iy,iz,dx,dy,dz,value");
        assert_eq!(rows.len(), 1 + 4 * 4 * 2);
        // Index 3 along a 4-cell axis holds offset -1.
        assert!(rows.iter().any(|r| r.starts_with("3,0,1,-1,0,1,")));

        let json = dir.join("kernel.json");
        write_kernel_json(&out, &json).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(doc["slices"][0]["component"], "zz");
        assert_eq!(doc["slices"][0]["values"].as_array().unwrap().len(), 32);
        assert_eq!(doc["params"]["extent"], serde_json::json!([4, 4, 2]));

        std::fs::remove_dir_all(&dir).ok();
    }
}
