//! Ahead-of-time kernel compilation through nvcc.
//!
//! Compiles a `.cu` source file into a loadable artifact by shelling
//! out to nvcc, with a naive on-disk cache: if the output path already
//! exists the subprocess is skipped entirely.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Error;
use crate::runtime::ComputeCapability;

/// Artifact kind produced by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Device machine code for one architecture
    Cubin,
    /// Intermediate representation, JIT-compiled at load time
    Ptx,
}

impl ArtifactKind {
    /// File extension and nvcc flag name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Cubin => "cubin",
            ArtifactKind::Ptx => "ptx",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CUDA compiler that shells out to nvcc.
pub struct NvccCompiler {
    program: PathBuf,
    target: ArtifactKind,
    force_rebuild: bool,
    extra_args: Vec<String>,
}

impl NvccCompiler {
    /// Create a compiler producing the given artifact kind.
    pub fn new(target: ArtifactKind) -> Self {
        Self {
            program: PathBuf::from("nvcc"),
            target,
            force_rebuild: false,
            // Device-link step, required for dynamic parallelism kernels.
            extra_args: vec!["-dlink".to_string()],
        }
    }

    /// Override the compiler executable (defaults to `nvcc` on PATH).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Recompile even when the output artifact already exists.
    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Replace the extra nvcc arguments (defaults to `-dlink`).
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether the compiler executable is runnable.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Output path for `source`: same path with the extension replaced
    /// by the artifact kind's extension.
    pub fn output_path(&self, source: &Path) -> PathBuf {
        source.with_extension(self.target.as_str())
    }

    fn pointer_width_flag() -> &'static str {
        if cfg!(target_pointer_width = "64") {
            "-m64"
        } else {
            "-m32"
        }
    }

    /// Compile `source` for `arch`, honoring the artifact cache.
    ///
    /// The cache is a bare existence check on the output path, so a
    /// stale artifact from an older source revision is served as a hit;
    /// [`NvccCompiler::force_rebuild`] is the escape hatch.
    pub fn compile(&self, source: &Path, arch: ComputeCapability) -> Result<PathBuf, Error> {
        let output_path = self.output_path(source);
        if output_path.exists() && !self.force_rebuild {
            log::info!(
                "using cached {} artifact {}",
                self.target,
                output_path.display()
            );
            return Ok(output_path);
        }

        if !source.exists() {
            return Err(Error::InputNotFound(source.to_path_buf()));
        }

        log::info!("creating {} file for {}", self.target, source.display());

        let mut command = Command::new(&self.program);
        command
            .arg(Self::pointer_width_flag())
            .arg(format!("-{}", self.target))
            .args(&self.extra_args)
            .arg(format!("-arch=sm_{}", arch.sm()))
            .arg(source)
            .arg("-o")
            .arg(&output_path);
        log::debug!("executing {:?}", command);

        // output() drains stdout and stderr concurrently before reporting
        // the exit status, so a chatty compiler cannot deadlock on a full
        // pipe buffer.
        let output = command.output().map_err(|e| {
            if e.kind() == io::ErrorKind::Interrupted {
                Error::Interrupted(e.to_string())
            } else {
                Error::Compilation {
                    message: format!("could not run {}: {}", self.program.display(), e),
                    stderr: String::new(),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let stdout = String::from_utf8_lossy(&output.stdout);
            log::error!(
                "nvcc exited with {}\nstdout:\n{}\nstderr:\n{}",
                output.status,
                stdout,
                stderr
            );
            return Err(Error::Compilation {
                message: format!(
                    "could not create {} file ({})",
                    self.target, output.status
                ),
                stderr,
            });
        }

        log::info!("finished creating {} file", self.target);
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArtifactKind::Cubin, "kernels/demo.cu", "kernels/demo.cubin")]
    #[case(ArtifactKind::Ptx, "kernels/demo.cu", "kernels/demo.ptx")]
    #[case(ArtifactKind::Cubin, "demo", "demo.cubin")]
    #[case(ArtifactKind::Ptx, "a/b.c.cu", "a/b.c.ptx")]
    fn output_path_replaces_extension(
        #[case] kind: ArtifactKind,
        #[case] source: &str,
        #[case] expected: &str,
    ) {
        let compiler = NvccCompiler::new(kind);
        assert_eq!(compiler.output_path(Path::new(source)), Path::new(expected));
    }

    #[test]
    fn artifact_kind_flag_names() {
        assert_eq!(ArtifactKind::Cubin.to_string(), "cubin");
        assert_eq!(ArtifactKind::Ptx.to_string(), "ptx");
    }
}
