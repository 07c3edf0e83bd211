//! cudarc-backed driver for real GPU execution.
//!
//! Only compiled with the `cuda-runtime` feature. The driver API is
//! fully synchronous here: launches go to the context's default stream
//! and `synchronize` is a blocking barrier on it.

use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{
    CudaContext as RawContext, CudaFunction, CudaModule as RawModule, CudaSlice, CudaStream,
    DevicePtr, LaunchConfig as RawLaunchConfig,
};
use cudarc::nvrtc::Ptx;

use crate::error::Error;
use crate::runtime::{
    ComputeCapability, Context, DeviceBuffer, Driver, KernelArg, LaunchDescriptor, Module,
};

/// Driver backed by the CUDA driver API through cudarc.
///
/// Process-wide driver initialization happens inside context creation
/// and is idempotent; creating a second context on the same ordinal is
/// safe.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaDriver;

impl Driver for CudaDriver {
    type Context = CudaCtx;

    fn initialize(&self, ordinal: usize) -> Result<CudaCtx, Error> {
        let context = RawContext::new(ordinal).map_err(|e| {
            Error::Initialization(format!("device {ordinal}: {e}"))
        })?;
        let stream = context.default_stream();
        Ok(CudaCtx {
            ordinal,
            context,
            stream,
        })
    }
}

/// Execution context on a physical device.
pub struct CudaCtx {
    ordinal: usize,
    context: Arc<RawContext>,
    stream: Arc<CudaStream>,
}

impl Context for CudaCtx {
    type Module = CudaModuleHandle;
    type Function = CudaFunction;
    type Buffer = CudaBuffer;

    fn device_ordinal(&self) -> usize {
        self.ordinal
    }

    fn compute_capability(&self) -> Result<ComputeCapability, Error> {
        let major = self
            .context
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .map_err(|e| Error::DeviceQuery(e.to_string()))?;
        let minor = self
            .context
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .map_err(|e| Error::DeviceQuery(e.to_string()))?;
        Ok(ComputeCapability::new(major as u32, minor as u32))
    }

    fn load_module(&self, path: &Path) -> Result<CudaModuleHandle, Error> {
        let ptx = Ptx::from_file(path);
        let module = self.context.load_module(ptx).map_err(|e| {
            Error::ModuleLoad(format!("{}: {e}", path.display()))
        })?;
        Ok(CudaModuleHandle {
            module: Arc::new(module),
        })
    }

    fn alloc(&self, len: usize) -> Result<CudaBuffer, Error> {
        let data = self.stream.alloc_zeros::<f32>(len).map_err(|e| {
            Error::OutOfMemory {
                bytes: len * std::mem::size_of::<f32>(),
                message: e.to_string(),
            }
        })?;
        Ok(CudaBuffer {
            data,
            stream: Arc::clone(&self.stream),
        })
    }

    fn launch(
        &self,
        function: &CudaFunction,
        desc: &LaunchDescriptor,
        args: &[KernelArg<'_, CudaBuffer>],
    ) -> Result<(), Error> {
        let config = RawLaunchConfig {
            grid_dim: desc.grid,
            block_dim: desc.block,
            shared_mem_bytes: desc.shared_mem_bytes,
        };

        // The argument values must stay alive until launch_raw returns;
        // collect them first, then build the pointer table over them.
        enum Slot {
            Int(usize),
            Ptr(usize),
        }
        let mut ints: Vec<i32> = Vec::new();
        let mut ptrs: Vec<u64> = Vec::new();
        let mut slots: Vec<Slot> = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                KernelArg::Int(v) => {
                    ints.push(*v);
                    slots.push(Slot::Int(ints.len() - 1));
                }
                KernelArg::Buffer(b) => {
                    ptrs.push(b.device_ptr_u64());
                    slots.push(Slot::Ptr(ptrs.len() - 1));
                }
            }
        }
        let mut arg_ptrs: Vec<*mut c_void> = slots
            .iter()
            .map(|slot| match slot {
                Slot::Int(i) => &ints[*i] as *const i32 as *mut c_void,
                Slot::Ptr(i) => &ptrs[*i] as *const u64 as *mut c_void,
            })
            .collect();

        log::debug!(
            "launching with grid={:?} block={:?}, {} args",
            desc.grid,
            desc.block,
            arg_ptrs.len()
        );

        unsafe {
            function
                .launch_raw(config, &mut arg_ptrs)
                .map_err(|e| Error::Launch(e.to_string()))?;
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<(), Error> {
        self.stream
            .synchronize()
            .map_err(|e| Error::DeviceExecution(e.to_string()))
    }
}

/// A module loaded into a [`CudaCtx`].
pub struct CudaModuleHandle {
    module: Arc<RawModule>,
}

impl Module for CudaModuleHandle {
    type Function = CudaFunction;

    fn function(&self, name: &str) -> Result<CudaFunction, Error> {
        self.module.load_function(name).map_err(|e| {
            log::debug!("symbol lookup for '{name}' failed: {e}");
            Error::SymbolNotFound(name.to_string())
        })
    }
}

/// Device-resident f32 buffer, freed when dropped.
pub struct CudaBuffer {
    data: CudaSlice<f32>,
    stream: Arc<CudaStream>,
}

impl CudaBuffer {
    fn device_ptr_u64(&self) -> u64 {
        *self.data.device_ptr() as u64
    }
}

impl DeviceBuffer for CudaBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn copy_from_host(&mut self, data: &[f32]) -> Result<(), Error> {
        if data.len() != self.data.len() {
            return Err(Error::Transfer(format!(
                "host slice of {} elements does not match buffer of {}",
                data.len(),
                self.data.len()
            )));
        }
        self.stream
            .memcpy_htod(data, &mut self.data)
            .map_err(|e| Error::Transfer(e.to_string()))
    }

    fn copy_to_host(&self, out: &mut [f32]) -> Result<(), Error> {
        if out.len() != self.data.len() {
            return Err(Error::Transfer(format!(
                "host slice of {} elements does not match buffer of {}",
                out.len(),
                self.data.len()
            )));
        }
        self.stream
            .memcpy_dtoh(&self.data, out)
            .map_err(|e| Error::Transfer(e.to_string()))
    }
}
