//! Driver abstraction traits.
//!
//! These traits define the interface between the pipeline and the
//! compute driver underneath it, so the same launch logic runs against
//! the real CUDA driver or the in-process software device in [`crate::sim`].

use std::path::Path;

use crate::error::Error;

/// Compute capability of a device, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeCapability {
    /// Hardware-generation major version
    pub major: u32,
    /// Hardware-generation minor version
    pub minor: u32,
}

impl ComputeCapability {
    /// Create a capability from its major/minor attributes.
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Encoded `sm_NN` target number (`major * 10 + minor`).
    pub fn sm(&self) -> u32 {
        self.major * 10 + self.minor
    }
}

/// Grid/block geometry and shared memory for a single launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDescriptor {
    /// Grid dimensions
    pub grid: (u32, u32, u32),
    /// Block dimensions
    pub block: (u32, u32, u32),
    /// Dynamic shared memory per block, in bytes
    pub shared_mem_bytes: u32,
}

/// A single entry in the flat kernel parameter list.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    /// 32-bit signed scalar, passed by value
    Int(i32),
    /// Device buffer, passed as a device pointer
    Buffer(&'a B),
}

/// A compute driver that can open execution contexts on devices.
///
/// Initialization establishes process-wide driver state; implementations
/// must make that idempotent so repeated calls are safe.
pub trait Driver {
    /// Context type produced by this driver
    type Context: Context;

    /// Initialize the driver and create an execution context on the
    /// device with the given ordinal.
    fn initialize(&self, ordinal: usize) -> Result<Self::Context, Error>;
}

/// An execution context owning device-side resources for one run.
///
/// Dropping the context invalidates every buffer and module created
/// through it; resource release is tied to `Drop` on all exit paths.
pub trait Context {
    /// Loaded-module type
    type Module: Module<Function = Self::Function>;
    /// Resolved kernel entry-point type
    type Function;
    /// Device buffer type
    type Buffer: DeviceBuffer;

    /// Ordinal of the device this context was created on.
    fn device_ordinal(&self) -> usize;

    /// Query the device's compute capability.
    fn compute_capability(&self) -> Result<ComputeCapability, Error>;

    /// Load a compiled artifact from disk into the context.
    fn load_module(&self, path: &Path) -> Result<Self::Module, Error>;

    /// Allocate a device buffer of `len` f32 elements.
    fn alloc(&self, len: usize) -> Result<Self::Buffer, Error>;

    /// Submit a kernel launch. Returns as soon as the work is queued;
    /// runtime faults surface at [`Context::synchronize`].
    fn launch(
        &self,
        function: &Self::Function,
        desc: &LaunchDescriptor,
        args: &[KernelArg<'_, Self::Buffer>],
    ) -> Result<(), Error>;

    /// Block until all queued device work has completed.
    fn synchronize(&self) -> Result<(), Error>;
}

/// A loaded unit of compiled device code exposing named entry points.
pub trait Module {
    /// Resolved kernel entry-point type
    type Function;

    /// Resolve the named entry point.
    fn function(&self, name: &str) -> Result<Self::Function, Error>;
}

/// A device-resident buffer of f32 elements.
pub trait DeviceBuffer {
    /// Number of elements in the buffer.
    fn len(&self) -> usize;

    /// Whether the buffer holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the buffer. `data` must match the buffer length.
    fn copy_from_host(&mut self, data: &[f32]) -> Result<(), Error>;

    /// Copy the buffer into `out`. `out` must match the buffer length.
    fn copy_to_host(&self, out: &mut [f32]) -> Result<(), Error>;
}
