#![allow(dead_code)]

use std::fs;
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use run_expo::process::RunningProcess;
use run_expo::{CommandSpec, LaunchConfig, Launcher, Result, Sequencer, SystemLauncher};
use tempfile::TempDir;

/// Runs commands for real and remembers what it was asked to run.
#[derive(Default)]
pub struct RecordingLauncher {
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingLauncher {
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn first_args(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|spec| spec.args.first().cloned().unwrap_or_default())
            .collect()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<RunningProcess> {
        self.calls.lock().unwrap().push(spec.clone());
        SystemLauncher.launch(spec)
    }
}

pub fn write_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub const BUN_OK: &str = r#"case "$1" in
  create) echo "done"; mkdir -p "$5"; exit 0 ;;
  install) echo "installed"; exit 0 ;;
esac
exit 1"#;

pub const SERVER_OK: &str = r#"echo "Starting project"
sleep 0.3
echo "Server running at http://localhost:8081"
exec sleep 30"#;

pub const SERVER_SILENT: &str = "exec sleep 30";

/// A temp tree with an already-provisioned runtime, a fake bun and a fake
/// `npx` on the runtime's bin path.
pub struct Fixture {
    pub dir: TempDir,
    pub runtime_dir: PathBuf,
    pub bun: PathBuf,
    pub project_dir: PathBuf,
    pub port: u16,
}

impl Fixture {
    pub fn new(bun_script: &str, server_script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime_dir = dir.path().join("node");
        let bin = runtime_dir.join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("node"), "").unwrap();
        write_script(&bin.join("npx"), server_script);

        let bun = dir.path().join("resources").join("bun");
        write_script(&bun, bun_script);

        let project_dir = dir.path().join("proj");
        Self {
            runtime_dir,
            bun,
            project_dir,
            port: free_port(),
            dir,
        }
    }

    pub fn config(&self) -> LaunchConfig {
        LaunchConfig {
            runtime_dir: self.runtime_dir.clone(),
            runtime_archive: None,
            package_manager: Some(self.bun.clone()),
            port: self.port,
            readiness_timeout: Some(Duration::from_secs(10)),
            data_dir: self.dir.path().join("data"),
            ..LaunchConfig::default()
        }
    }

    pub fn sequencer(&self, config: LaunchConfig) -> (Sequencer, Arc<RecordingLauncher>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let sequencer = Sequencer::new(config, launcher.clone());
        (sequencer, launcher)
    }
}
