//! In-process software driver.
//!
//! Simulates the driver API so the pipeline can be exercised and tested
//! on machines without a GPU or the CUDA SDK. Modules are registered up
//! front, keyed by artifact path; kernel bodies are host closures.
//! Failure injection covers every error arm of the driver boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::runtime::{
    ComputeCapability, Context, DeviceBuffer, Driver, KernelArg, LaunchDescriptor, Module,
};

/// Kernel argument as seen by a simulated kernel body.
#[derive(Clone)]
pub enum SimArg {
    /// 32-bit scalar
    Int(i32),
    /// Shared handle to the buffer's backing storage
    Buffer(Arc<Mutex<Vec<f32>>>),
}

/// Host closure standing in for a device kernel. Returning an error
/// marks the context faulted; the fault surfaces at synchronize, as a
/// real device fault would.
pub type KernelBody =
    Arc<dyn Fn(&LaunchDescriptor, &[SimArg]) -> Result<(), String> + Send + Sync>;

/// Failure injection switches for the simulated device.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    /// Fail driver initialization
    pub fail_init: bool,
    /// Fail the compute-capability query
    pub fail_query: bool,
    /// Fail buffer allocation
    pub fail_alloc: bool,
    /// Reject every launch
    pub fail_launch: bool,
    /// Report a device fault at synchronize
    pub fail_sync: bool,
    /// Fail device-to-host copies
    pub fail_copy: bool,
}

/// Software driver; builds [`SimContext`]s from a registry of modules.
#[derive(Clone)]
pub struct SimDriver {
    capability: ComputeCapability,
    modules: HashMap<PathBuf, HashMap<String, KernelBody>>,
    max_threads_per_block: u32,
    faults: Faults,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self {
            capability: ComputeCapability::new(7, 5),
            modules: HashMap::new(),
            max_threads_per_block: 1024,
            faults: Faults::default(),
        }
    }
}

impl SimDriver {
    /// Create a driver with default capability (sm_75) and limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported compute capability.
    pub fn with_capability(mut self, major: u32, minor: u32) -> Self {
        self.capability = ComputeCapability::new(major, minor);
        self
    }

    /// Set the per-block thread limit used to reject launches.
    pub fn with_max_threads_per_block(mut self, limit: u32) -> Self {
        self.max_threads_per_block = limit;
        self
    }

    /// Enable failure injection.
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Register a loadable module at `path` exposing `entry` backed by
    /// the given host closure.
    pub fn with_kernel<F>(mut self, path: impl Into<PathBuf>, entry: &str, body: F) -> Self
    where
        F: Fn(&LaunchDescriptor, &[SimArg]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.modules
            .entry(path.into())
            .or_default()
            .insert(entry.to_string(), Arc::new(body));
        self
    }
}

impl Driver for SimDriver {
    type Context = SimContext;

    fn initialize(&self, ordinal: usize) -> Result<SimContext, Error> {
        if self.faults.fail_init {
            return Err(Error::Initialization(format!(
                "no compute device at ordinal {ordinal}"
            )));
        }
        Ok(SimContext {
            ordinal,
            capability: self.capability,
            modules: self.modules.clone(),
            max_threads_per_block: self.max_threads_per_block,
            faults: self.faults,
            pending_fault: Mutex::new(None),
            launch_log: Mutex::new(Vec::new()),
        })
    }
}

/// Execution context of the software device.
pub struct SimContext {
    ordinal: usize,
    capability: ComputeCapability,
    modules: HashMap<PathBuf, HashMap<String, KernelBody>>,
    max_threads_per_block: u32,
    faults: Faults,
    pending_fault: Mutex<Option<String>>,
    launch_log: Mutex<Vec<LaunchDescriptor>>,
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("ordinal", &self.ordinal)
            .field("capability", &self.capability)
            .field("max_threads_per_block", &self.max_threads_per_block)
            .finish_non_exhaustive()
    }
}

impl SimContext {
    /// Launch descriptors submitted so far, in order.
    pub fn launches(&self) -> Vec<LaunchDescriptor> {
        self.launch_log.lock().unwrap().clone()
    }
}

impl Context for SimContext {
    type Module = SimModule;
    type Function = SimFunction;
    type Buffer = SimBuffer;

    fn device_ordinal(&self) -> usize {
        self.ordinal
    }

    fn compute_capability(&self) -> Result<ComputeCapability, Error> {
        if self.faults.fail_query {
            return Err(Error::DeviceQuery("attribute query failed".to_string()));
        }
        Ok(self.capability)
    }

    fn load_module(&self, path: &Path) -> Result<SimModule, Error> {
        if !path.exists() {
            return Err(Error::ModuleLoad(format!(
                "no such artifact: {}",
                path.display()
            )));
        }
        let functions = self.modules.get(path).cloned().ok_or_else(|| {
            Error::ModuleLoad(format!("unrecognized binary: {}", path.display()))
        })?;
        Ok(SimModule { functions })
    }

    fn alloc(&self, len: usize) -> Result<SimBuffer, Error> {
        if self.faults.fail_alloc {
            return Err(Error::OutOfMemory {
                bytes: len * std::mem::size_of::<f32>(),
                message: "simulated allocation failure".to_string(),
            });
        }
        Ok(SimBuffer {
            data: Arc::new(Mutex::new(vec![0.0; len])),
            fail_copy: self.faults.fail_copy,
        })
    }

    fn launch(
        &self,
        function: &SimFunction,
        desc: &LaunchDescriptor,
        args: &[KernelArg<'_, SimBuffer>],
    ) -> Result<(), Error> {
        if self.faults.fail_launch {
            return Err(Error::Launch("simulated launch rejection".to_string()));
        }
        let block_threads = desc.block.0 * desc.block.1 * desc.block.2;
        if block_threads > self.max_threads_per_block {
            return Err(Error::Launch(format!(
                "block of {} threads exceeds device limit of {}",
                block_threads, self.max_threads_per_block
            )));
        }

        let sim_args: Vec<SimArg> = args
            .iter()
            .map(|arg| match arg {
                KernelArg::Int(v) => SimArg::Int(*v),
                KernelArg::Buffer(b) => SimArg::Buffer(Arc::clone(&b.data)),
            })
            .collect();
        self.launch_log.lock().unwrap().push(*desc);

        // Kernel faults are asynchronous on real hardware; record them
        // here and report at synchronize.
        if let Err(fault) = (function.body)(desc, &sim_args) {
            *self.pending_fault.lock().unwrap() = Some(fault);
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<(), Error> {
        if self.faults.fail_sync {
            return Err(Error::DeviceExecution(
                "simulated device fault".to_string(),
            ));
        }
        if let Some(fault) = self.pending_fault.lock().unwrap().take() {
            return Err(Error::DeviceExecution(fault));
        }
        Ok(())
    }
}

/// A registered module of the software device.
pub struct SimModule {
    functions: HashMap<String, KernelBody>,
}

impl Module for SimModule {
    type Function = SimFunction;

    fn function(&self, name: &str) -> Result<SimFunction, Error> {
        let body = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))?;
        Ok(SimFunction {
            name: name.to_string(),
            body,
        })
    }
}

/// Resolved entry point of a [`SimModule`].
pub struct SimFunction {
    name: String,
    body: KernelBody,
}

impl SimFunction {
    /// Name this function was resolved under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Buffer of the software device, backed by host memory.
pub struct SimBuffer {
    data: Arc<Mutex<Vec<f32>>>,
    fail_copy: bool,
}

impl DeviceBuffer for SimBuffer {
    fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn copy_from_host(&mut self, data: &[f32]) -> Result<(), Error> {
        let mut guard = self.data.lock().unwrap();
        if data.len() != guard.len() {
            return Err(Error::Transfer(format!(
                "host slice of {} elements does not match buffer of {}",
                data.len(),
                guard.len()
            )));
        }
        guard.copy_from_slice(data);
        Ok(())
    }

    fn copy_to_host(&self, out: &mut [f32]) -> Result<(), Error> {
        if self.fail_copy {
            return Err(Error::Transfer("simulated copy failure".to_string()));
        }
        let guard = self.data.lock().unwrap();
        if out.len() != guard.len() {
            return Err(Error::Transfer(format!(
                "host slice of {} elements does not match buffer of {}",
                out.len(),
                guard.len()
            )));
        }
        out.copy_from_slice(&guard);
        Ok(())
    }
}
