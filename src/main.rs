//! sparkplug: compile a CUDA kernel with nvcc, launch it, and validate
//! the result against a host-computed reference.
//!
//! Usage:
//!   sparkplug [OPTIONS] [SOURCE]
//!
//! Examples:
//!   sparkplug                                   # demo kernel, software device
//!   sparkplug --driver cuda --force-rebuild     # real GPU (feature cuda-runtime)
//!   sparkplug --parent-threads 8 --child-threads 4 --grid ceil

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use sparkplug::compiler::{ArtifactKind, NvccCompiler};
use sparkplug::demo;
use sparkplug::error::Error;
use sparkplug::pipeline::{run_kernel, verify, GridPolicy, LaunchConfig};
use sparkplug::runtime::Driver;

/// Compile-and-launch validation harness for CUDA kernels
#[derive(Parser, Debug)]
#[command(name = "sparkplug")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kernel source file
    #[arg(value_name = "SOURCE", default_value = "demos/dynamic_parallelism.cu")]
    source: PathBuf,

    /// Entry point to resolve in the compiled module
    #[arg(short, long, default_value = demo::ENTRY_POINT)]
    entry_point: String,

    /// Number of parent threads (block size of the launch)
    #[arg(long, default_value_t = 8)]
    parent_threads: u32,

    /// Number of child threads per parent
    #[arg(long, default_value_t = 0)]
    child_threads: u32,

    /// Compiled artifact kind
    #[arg(long, value_enum, default_value = "cubin")]
    target: Target,

    /// Grid-dimension policy
    #[arg(long, value_enum, default_value = "legacy")]
    grid: Grid,

    /// Recompile even if the artifact already exists
    #[arg(long)]
    force_rebuild: bool,

    /// Device ordinal
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Execution driver
    #[arg(long, value_enum, default_value = default_driver())]
    driver: DriverKind,
}

fn default_driver() -> &'static str {
    if cfg!(feature = "cuda-runtime") {
        "cuda"
    } else {
        "sim"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    /// Device machine code
    Cubin,
    /// Intermediate representation
    Ptx,
}

impl From<Target> for ArtifactKind {
    fn from(target: Target) -> Self {
        match target {
            Target::Cubin => ArtifactKind::Cubin,
            Target::Ptx => ArtifactKind::Ptx,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Grid {
    /// Original demo formula, (n + n - 1) / threads
    Legacy,
    /// Ceiling division, (n + threads - 1) / threads
    Ceil,
}

impl From<Grid> for GridPolicy {
    fn from(grid: Grid) -> Self {
        match grid {
            Grid::Legacy => GridPolicy::Legacy,
            Grid::Ceil => GridPolicy::CeilDiv,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    /// In-process software device
    Sim,
    /// Real GPU through the CUDA driver
    Cuda,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let start = Instant::now();

    let num_elements = args.parent_threads as usize * args.child_threads as usize;
    let config = LaunchConfig::new(num_elements, args.parent_threads)
        .with_grid_policy(args.grid.into());
    let compiler = NvccCompiler::new(args.target.into()).force_rebuild(args.force_rebuild);
    let reference = demo::reference(
        args.parent_threads as usize,
        args.child_threads as usize,
    );

    let result = match args.driver {
        DriverKind::Sim => run_sim(&args, &compiler, &config)?,
        DriverKind::Cuda => run_cuda(&args, &compiler, &config)?,
    };

    let verdict = verify(&result, &reference);
    println!("Result: {result:?}");
    println!("{verdict}");
    println!("{} ms", start.elapsed().as_millis());
    Ok(())
}

/// Run against the software device. The artifact file is fabricated if
/// missing so the compile step resolves as a cache hit without nvcc.
fn run_sim(
    args: &Args,
    compiler: &NvccCompiler,
    config: &LaunchConfig,
) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let artifact = compiler.output_path(&args.source);
    if !artifact.exists() {
        log::info!(
            "fabricating artifact {} for the software device",
            artifact.display()
        );
        fs::write(&artifact, b"sparkplug simulated artifact")?;
    }
    let driver = demo::sim_driver(&artifact);
    let ctx = driver.initialize(args.device)?;
    let result = run_kernel(&ctx, compiler, &args.source, &args.entry_point, config)?;
    Ok(result)
}

#[cfg(feature = "cuda-runtime")]
fn run_cuda(
    args: &Args,
    compiler: &NvccCompiler,
    config: &LaunchConfig,
) -> Result<Vec<f32>, Error> {
    let ctx = sparkplug::cuda::CudaDriver.initialize(args.device)?;
    run_kernel(&ctx, compiler, &args.source, &args.entry_point, config)
}

#[cfg(not(feature = "cuda-runtime"))]
fn run_cuda(
    _args: &Args,
    _compiler: &NvccCompiler,
    _config: &LaunchConfig,
) -> Result<Vec<f32>, Error> {
    Err(Error::Initialization(
        "CUDA runtime not available. Rebuild with --features cuda-runtime".to_string(),
    ))
}
