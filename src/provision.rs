use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};
use crate::paths;
use crate::process::{run_to_completion, CommandSpec, Launcher};

pub const DEFAULT_TAR: &str = "/usr/bin/tar";
// tar shells out to gzip for -z.
const TAR_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionTarget {
    pub install_path: PathBuf,
    pub archive: Option<PathBuf>,
    pub executable: String,
    pub tar_program: PathBuf,
}

impl ProvisionTarget {
    pub fn new(install_path: impl Into<PathBuf>, archive: Option<PathBuf>) -> Self {
        Self {
            install_path: install_path.into(),
            archive,
            executable: paths::RUNTIME_EXECUTABLE.to_string(),
            tar_program: PathBuf::from(DEFAULT_TAR),
        }
    }

    pub fn executable_path(&self) -> PathBuf {
        paths::runtime_bin_dir(&self.install_path).join(&self.executable)
    }

    pub fn is_installed(&self) -> bool {
        self.executable_path().exists()
    }

    fn extract_command(&self, archive: &Path) -> CommandSpec {
        CommandSpec::new(&self.tar_program)
            .args(["--strip-components", "1", "-xzf"])
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(self.install_path.to_string_lossy())
            .env("PATH", TAR_PATH)
            .capture_output()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Extracted,
}

/// Makes sure `target` holds a runtime, unpacking the bundled archive the
/// first time. A failed extraction may leave a partial tree behind; callers
/// stop the sequence rather than retry.
pub fn ensure_runtime(target: &ProvisionTarget, launcher: &dyn Launcher) -> Result<Provisioned> {
    if target.is_installed() {
        log::info!(
            "Node.js already exists at {}",
            target.install_path.display()
        );
        return Ok(Provisioned::AlreadyPresent);
    }

    let archive = match target.archive.as_ref() {
        Some(path) if path.exists() => path,
        _ => {
            log::error!("no bundled Node.js archive found");
            return Err(LaunchError::MissingBundledResource(
                paths::RUNTIME_ARCHIVE_NAME.to_string(),
            ));
        }
    };

    if !target.install_path.exists() {
        fs::create_dir_all(&target.install_path).map_err(|source| {
            LaunchError::DirectoryCreationFailure {
                path: target.install_path.clone(),
                source,
            }
        })?;
    }

    log::info!(
        "extracting {} into {}",
        archive.display(),
        target.install_path.display()
    );
    let (status, output) = run_to_completion(launcher, &target.extract_command(archive))?;
    if !output.is_empty() {
        log::debug!("tar: {}", String::from_utf8_lossy(&output).trim_end());
    }
    if !status.success() {
        log::error!("extraction failed: {status}");
        return Err(LaunchError::ExtractionFailure(status.code()));
    }
    log::info!("Node.js bundle extracted");
    Ok(Provisioned::Extracted)
}
