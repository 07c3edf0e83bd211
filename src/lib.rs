//! Sparkplug: a compile-and-launch validation harness for CUDA kernels.
//!
//! Sparkplug compiles a device kernel source with nvcc, loads the
//! artifact into an execution context, launches the kernel, copies the
//! result back, and checks it against a host-computed reference. The
//! driver underneath the launch is a trait:
//!
//! - **sim**: in-process software device, always available
//! - **cuda**: real GPU through cudarc (feature `cuda-runtime`)
//!
//! # Feature flags
//!
//! - `cuda-runtime`: enable GPU execution (requires the CUDA SDK)

pub mod compiler;
pub mod demo;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod sim;

#[cfg(feature = "cuda-runtime")]
pub mod cuda;

pub use compiler::{ArtifactKind, NvccCompiler};
pub use error::Error;
pub use pipeline::{run_and_verify, run_kernel, verify, GridPolicy, LaunchConfig, Report, Verdict};
pub use runtime::{
    ComputeCapability, Context, DeviceBuffer, Driver, KernelArg, LaunchDescriptor, Module,
};
