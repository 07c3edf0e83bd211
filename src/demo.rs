//! The dynamic-parallelism demonstration workload.
//!
//! A parent kernel launches one child grid per parent thread; each
//! child thread writes `parent + 0.1 * child` into its slot of the
//! output array. The device source lives in
//! `demos/dynamic_parallelism.cu`; [`parent_kernel_body`] mirrors its
//! arithmetic for the software driver.

use std::path::PathBuf;
use std::sync::Arc;

use crate::runtime::LaunchDescriptor;
use crate::sim::{SimArg, SimDriver};

/// Entry point resolved in the compiled module.
pub const ENTRY_POINT: &str = "parentKernel";

/// Host-side reference: element `(i, j)` holds `i + 0.1 * j`.
pub fn reference(num_parent_threads: usize, num_child_threads: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; num_parent_threads * num_child_threads];
    for i in 0..num_parent_threads {
        for j in 0..num_child_threads {
            data[i * num_child_threads + j] = i as f32 + 0.1f32 * j as f32;
        }
    }
    data
}

/// Software stand-in for the parent kernel.
///
/// Derives the child count the same way the device kernel does: total
/// parent threads come from the launch geometry, and each parent gets
/// `num_elements / parents` children.
pub fn parent_kernel_body(desc: &LaunchDescriptor, args: &[SimArg]) -> Result<(), String> {
    let num_elements = match args.first() {
        Some(SimArg::Int(n)) => *n as usize,
        _ => return Err("expected element count as first argument".to_string()),
    };
    let data = match args.get(1) {
        Some(SimArg::Buffer(b)) => Arc::clone(b),
        _ => return Err("expected output buffer as second argument".to_string()),
    };

    if num_elements == 0 {
        return Ok(());
    }

    let parents = (desc.grid.0 * desc.block.0) as usize;
    let children = num_elements / parents.max(1);
    let mut data = data.lock().unwrap();
    for i in 0..parents {
        for j in 0..children {
            let index = i * children + j;
            if index < data.len() {
                data[index] = i as f32 + 0.1f32 * j as f32;
            }
        }
    }
    Ok(())
}

/// Build a software driver with the demo kernel registered under the
/// given artifact path.
pub fn sim_driver(artifact: impl Into<PathBuf>) -> SimDriver {
    SimDriver::new().with_kernel(artifact, ENTRY_POINT, parent_kernel_body)
}
