//! End-to-end pipeline runs against the software device.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use sparkplug::compiler::{ArtifactKind, NvccCompiler};
use sparkplug::demo;
use sparkplug::error::Error;
use sparkplug::pipeline::{run_and_verify, run_kernel, GridPolicy, LaunchConfig, Verdict};
use sparkplug::runtime::{Context, DeviceBuffer, Driver};
use sparkplug::sim::{Faults, SimDriver};

/// Source and pre-built artifact on disk, so the compile step resolves
/// as a cache hit and never needs nvcc.
fn kernel_files(dir: &TempDir) -> (PathBuf, PathBuf) {
    let source = dir.path().join("demo.cu");
    fs::write(&source, "__global__ void parentKernel() {}").unwrap();
    let artifact = dir.path().join("demo.cubin");
    fs::write(&artifact, "prebuilt artifact").unwrap();
    (source, artifact)
}

fn compiler() -> NvccCompiler {
    NvccCompiler::new(ArtifactKind::Cubin)
}

#[test]
fn zero_elements_passes_without_device_work() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);

    // Allocation is rigged to fail: a zero-element run must never reach it.
    let driver = demo::sim_driver(&artifact).with_faults(Faults {
        fail_alloc: true,
        ..Faults::default()
    });
    let ctx = driver.initialize(0).unwrap();

    let config = LaunchConfig::new(0, 8);
    let report = run_and_verify(
        &ctx,
        &compiler(),
        &source,
        demo::ENTRY_POINT,
        &config,
        &demo::reference(8, 0),
    )
    .expect("zero-element run must succeed");

    assert!(report.result.is_empty());
    assert_eq!(report.verdict, Verdict::Passed);
    assert!(ctx.launches().is_empty());
}

#[test]
fn demo_kernel_matches_reference() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = demo::sim_driver(&artifact);
    let ctx = driver.initialize(0).unwrap();

    // 8 parents with one child each: the launch geometry reproduces the
    // reference layout exactly.
    let config = LaunchConfig::new(8, 8).with_grid_policy(GridPolicy::CeilDiv);
    let report = run_and_verify(
        &ctx,
        &compiler(),
        &source,
        demo::ENTRY_POINT,
        &config,
        &demo::reference(8, 1),
    )
    .unwrap();

    assert_eq!(report.result.len(), 8);
    assert_eq!(report.verdict, Verdict::Passed);
    let launches = ctx.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].grid, (1, 1, 1));
    assert_eq!(launches[0].block, (8, 1, 1));
}

#[test]
fn verification_mismatch_is_a_verdict_not_an_error() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = demo::sim_driver(&artifact);
    let ctx = driver.initialize(0).unwrap();

    // 16 elements over 16 launched parents: the kernel writes i, the
    // 8x2 reference expects i + 0.1 j, so values diverge.
    let config = LaunchConfig::new(16, 8).with_grid_policy(GridPolicy::CeilDiv);
    let report = run_and_verify(
        &ctx,
        &compiler(),
        &source,
        demo::ENTRY_POINT,
        &config,
        &demo::reference(8, 2),
    )
    .expect("a mismatch must not abort the run");

    assert_eq!(report.result.len(), 16);
    assert_eq!(report.verdict, Verdict::Failed);
}

#[test]
fn result_length_always_matches_element_count() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = demo::sim_driver(&artifact);
    let ctx = driver.initialize(0).unwrap();

    for n in [1usize, 8, 64] {
        let config = LaunchConfig::new(n, 8).with_grid_policy(GridPolicy::CeilDiv);
        let result =
            run_kernel(&ctx, &compiler(), &source, demo::ENTRY_POINT, &config).unwrap();
        assert_eq!(result.len(), n);
    }
}

#[test]
fn missing_entry_point_is_symbol_not_found() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = demo::sim_driver(&artifact);
    let ctx = driver.initialize(0).unwrap();

    let config = LaunchConfig::new(8, 8);
    let err = run_kernel(&ctx, &compiler(), &source, "otherKernel", &config).unwrap_err();
    assert!(matches!(err, Error::SymbolNotFound(name) if name == "otherKernel"));
}

#[test]
fn unregistered_artifact_is_module_load_error() {
    let dir = TempDir::new().unwrap();
    let (source, _artifact) = kernel_files(&dir);

    // Artifact file exists on disk but the device does not recognize it.
    let driver = SimDriver::new();
    let ctx = driver.initialize(0).unwrap();

    let config = LaunchConfig::new(8, 8);
    let err = run_kernel(&ctx, &compiler(), &source, demo::ENTRY_POINT, &config).unwrap_err();
    assert!(matches!(err, Error::ModuleLoad(_)));
}

#[test]
fn oversized_block_is_rejected_at_launch() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = demo::sim_driver(&artifact).with_max_threads_per_block(4);
    let ctx = driver.initialize(0).unwrap();

    let config = LaunchConfig::new(8, 8).with_grid_policy(GridPolicy::CeilDiv);
    let err = run_kernel(&ctx, &compiler(), &source, demo::ENTRY_POINT, &config).unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
}

#[test]
fn kernel_fault_surfaces_at_synchronize() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let driver = SimDriver::new().with_kernel(&artifact, demo::ENTRY_POINT, |_, _| {
        Err("an illegal memory access was encountered".to_string())
    });
    let ctx = driver.initialize(0).unwrap();

    let config = LaunchConfig::new(8, 8).with_grid_policy(GridPolicy::CeilDiv);
    let err = run_kernel(&ctx, &compiler(), &source, demo::ENTRY_POINT, &config).unwrap_err();
    match err {
        Error::DeviceExecution(msg) => assert!(msg.contains("illegal memory access")),
        other => panic!("expected DeviceExecution, got {other:?}"),
    }
}

#[test]
fn injected_faults_map_to_their_error_arms() {
    let dir = TempDir::new().unwrap();
    let (source, artifact) = kernel_files(&dir);
    let config = LaunchConfig::new(8, 8).with_grid_policy(GridPolicy::CeilDiv);

    let cases: Vec<(Faults, fn(&Error) -> bool)> = vec![
        (
            Faults {
                fail_query: true,
                ..Faults::default()
            },
            |e| matches!(e, Error::DeviceQuery(_)),
        ),
        (
            Faults {
                fail_alloc: true,
                ..Faults::default()
            },
            |e| matches!(e, Error::OutOfMemory { .. }),
        ),
        (
            Faults {
                fail_launch: true,
                ..Faults::default()
            },
            |e| matches!(e, Error::Launch(_)),
        ),
        (
            Faults {
                fail_sync: true,
                ..Faults::default()
            },
            |e| matches!(e, Error::DeviceExecution(_)),
        ),
        (
            Faults {
                fail_copy: true,
                ..Faults::default()
            },
            |e| matches!(e, Error::Transfer(_)),
        ),
    ];

    for (faults, is_expected) in cases {
        let driver = demo::sim_driver(&artifact).with_faults(faults);
        let ctx = driver.initialize(0).unwrap();
        let err = run_kernel(&ctx, &compiler(), &source, demo::ENTRY_POINT, &config)
            .unwrap_err();
        assert!(is_expected(&err), "faults {faults:?} produced {err:?}");
    }
}

#[test]
fn failed_initialization_is_fatal() {
    let driver = SimDriver::new().with_faults(Faults {
        fail_init: true,
        ..Faults::default()
    });
    let err = driver.initialize(0).unwrap_err();
    assert!(matches!(err, Error::Initialization(_)));
}

#[test]
fn buffer_round_trip_preserves_host_pattern() {
    let driver = SimDriver::new();
    let ctx = driver.initialize(0).unwrap();

    let pattern: Vec<f32> = (0..16).map(|i| i as f32 * 0.5).collect();
    let mut buffer = ctx.alloc(16).unwrap();
    buffer.copy_from_host(&pattern).unwrap();

    let mut out = vec![0.0f32; 16];
    buffer.copy_to_host(&mut out).unwrap();
    assert_eq!(out, pattern);
}

#[test]
fn mismatched_copy_size_is_transfer_error() {
    let driver = SimDriver::new();
    let ctx = driver.initialize(0).unwrap();

    let buffer = ctx.alloc(8).unwrap();
    let mut out = vec![0.0f32; 4];
    let err = buffer.copy_to_host(&mut out).unwrap_err();
    assert!(matches!(err, Error::Transfer(_)));
}

#[test]
fn zero_element_allocation_is_accepted() {
    let driver = SimDriver::new();
    let ctx = driver.initialize(0).unwrap();

    let buffer = ctx.alloc(0).unwrap();
    assert!(buffer.is_empty());
    let mut out: Vec<f32> = Vec::new();
    buffer.copy_to_host(&mut out).unwrap();
    assert!(out.is_empty());
}
