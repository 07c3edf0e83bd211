//! The sequential compile / load / launch / verify pipeline.
//!
//! Control flow is strictly ordered: capability query, compile, module
//! load, symbol resolution, allocation, launch, synchronize, copy-back.
//! The only branch is the degenerate zero-element case, which skips the
//! device work entirely.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use crate::compiler::NvccCompiler;
use crate::error::Error;
use crate::runtime::{Context, DeviceBuffer, KernelArg, LaunchDescriptor, Module};

/// Grid-dimension policy.
///
/// The demo this harness descends from computed its grid size as
/// `(n + n - 1) / threads_per_block`, which rounds `2n / block` down
/// instead of taking a ceiling division. `Legacy` reproduces that
/// behavior verbatim; `CeilDiv` is the conventional
/// `(n + threads_per_block - 1) / threads_per_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridPolicy {
    /// Literal original formula, kept for output compatibility
    #[default]
    Legacy,
    /// Conventional ceiling division
    CeilDiv,
}

impl GridPolicy {
    /// Number of blocks along x for `element_count` elements.
    pub fn grid_size(&self, element_count: usize, threads_per_block: u32) -> u32 {
        let n = element_count;
        let tpb = threads_per_block as usize;
        let blocks = match self {
            GridPolicy::Legacy => (n + n.saturating_sub(1)) / tpb,
            GridPolicy::CeilDiv => (n + tpb - 1) / tpb,
        };
        blocks as u32
    }
}

/// Launch configuration for one run.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Number of f32 elements in the output buffer
    pub element_count: usize,
    /// Block size along x
    pub threads_per_block: u32,
    /// Grid-dimension policy
    pub grid_policy: GridPolicy,
}

impl LaunchConfig {
    /// Create a configuration with the default grid policy.
    pub fn new(element_count: usize, threads_per_block: u32) -> Self {
        Self {
            element_count,
            threads_per_block,
            grid_policy: GridPolicy::default(),
        }
    }

    /// Select the grid-dimension policy.
    pub fn with_grid_policy(mut self, policy: GridPolicy) -> Self {
        self.grid_policy = policy;
        self
    }

    fn descriptor(&self) -> LaunchDescriptor {
        LaunchDescriptor {
            grid: (
                self.grid_policy
                    .grid_size(self.element_count, self.threads_per_block),
                1,
                1,
            ),
            block: (self.threads_per_block, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

/// Outcome of the element-wise comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Result matched the reference exactly
    Passed,
    /// At least one element differed
    Failed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("PASSED"),
            Verdict::Failed => f.write_str("FAILED"),
        }
    }
}

/// Outcome of a full compile-and-launch run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Values copied back from the device
    pub result: Vec<f32>,
    /// PASSED/FAILED comparison outcome
    pub verdict: Verdict,
    /// Wall-clock time for the whole run, in milliseconds
    pub elapsed_ms: u128,
}

/// Compile `source`, load it, resolve `entry_point`, launch it, and
/// copy the result back. Returns exactly `config.element_count` values.
///
/// The device buffer is released when its handle drops, on every exit
/// path. A zero-element configuration skips allocation and launch and
/// returns an empty result.
pub fn run_kernel<C: Context>(
    ctx: &C,
    compiler: &NvccCompiler,
    source: &Path,
    entry_point: &str,
    config: &LaunchConfig,
) -> Result<Vec<f32>, Error> {
    let capability = ctx.compute_capability()?;
    log::debug!(
        "device {} reports sm_{}",
        ctx.device_ordinal(),
        capability.sm()
    );

    let artifact = compiler.compile(source, capability)?;
    let module = ctx.load_module(&artifact)?;
    let function = module.function(entry_point)?;

    if config.element_count == 0 {
        log::debug!("zero-element launch, skipping device work");
        return Ok(Vec::new());
    }

    let buffer = ctx.alloc(config.element_count)?;
    let desc = config.descriptor();
    log::debug!(
        "launching '{}' with grid={:?} block={:?}",
        entry_point,
        desc.grid,
        desc.block
    );
    ctx.launch(
        &function,
        &desc,
        &[
            KernelArg::Int(config.element_count as i32),
            KernelArg::Buffer(&buffer),
        ],
    )?;
    ctx.synchronize()?;

    let mut host = vec![0.0f32; config.element_count];
    buffer.copy_to_host(&mut host)?;
    Ok(host)
}

/// Compare a result against its reference, element-wise and exact.
///
/// A length mismatch is a failure. Verification failure is a verdict,
/// not an error; it never interferes with resource cleanup.
pub fn verify(result: &[f32], reference: &[f32]) -> Verdict {
    if result == reference {
        Verdict::Passed
    } else {
        Verdict::Failed
    }
}

/// Run the pipeline, verify against `reference`, and time the whole
/// sequence.
pub fn run_and_verify<C: Context>(
    ctx: &C,
    compiler: &NvccCompiler,
    source: &Path,
    entry_point: &str,
    config: &LaunchConfig,
    reference: &[f32],
) -> Result<Report, Error> {
    let start = Instant::now();
    let result = run_kernel(ctx, compiler, source, entry_point, config)?;
    let verdict = verify(&result, reference);
    Ok(Report {
        result,
        verdict,
        elapsed_ms: start.elapsed().as_millis(),
    })
}
