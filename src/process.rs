use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use crate::error::{LaunchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub capture_output: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            capture_output: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capture_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    pub fn display_line(&self) -> String {
        let mut line = self.program_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// A spawned command. Owned by whoever launched it; the output stream can be
/// handed off once with [`RunningProcess::take_output`].
#[derive(Debug)]
pub struct RunningProcess {
    spec: CommandSpec,
    child: Child,
    output: Option<ChildStdout>,
    exit_status: Option<ExitStatus>,
}

impl RunningProcess {
    pub fn from_child(spec: CommandSpec, mut child: Child) -> Self {
        let output = child.stdout.take();
        Self {
            spec,
            child,
            output,
            exit_status: None,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn wait_for_exit(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.exit_status = Some(status);
        Ok(status)
    }

    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        self.exit_status = status;
        Ok(status)
    }

    /// Reads captured stdout until EOF. Returns nothing if output was not
    /// captured or was already taken. Read before waiting: a child that
    /// fills the pipe never exits otherwise.
    pub fn read_all_output(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut stream) = self.output.take() {
            stream.read_to_end(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    pub fn kill(&mut self) -> Result<()> {
        if self.try_exit()?.is_some() {
            return Ok(());
        }
        self.child.kill()?;
        self.wait_for_exit()?;
        Ok(())
    }
}

pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &CommandSpec) -> Result<RunningProcess>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<RunningProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).env_clear().envs(&spec.env);
        if let Some(dir) = spec.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        if spec.capture_output {
            cmd.stdout(Stdio::piped());
        }
        log::debug!("spawning: {}", spec.display_line());
        let child = cmd.spawn().map_err(|source| LaunchError::SpawnFailure {
            program: spec.program_name(),
            source,
        })?;
        Ok(RunningProcess::from_child(spec.clone(), child))
    }
}

/// Blocking mode: launch, drain captured output, wait.
pub fn run_to_completion(
    launcher: &dyn Launcher,
    spec: &CommandSpec,
) -> Result<(ExitStatus, Vec<u8>)> {
    let mut process = launcher.launch(spec)?;
    let output = process.read_all_output()?;
    let status = process.wait_for_exit()?;
    Ok((status, output))
}

/// Builds the environment for tools that must resolve against the
/// provisioned runtime: `PATH` gets `runtime_bin` prepended, and the named
/// passthrough variables are copied from `inherited` when present.
pub fn runtime_environment<I>(
    runtime_bin: &Path,
    inherited: I,
    passthrough: &[String],
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = BTreeMap::new();
    let mut inherited_path = String::new();
    for (key, value) in inherited {
        if key == "PATH" {
            inherited_path = value;
        } else if passthrough.iter().any(|name| *name == key) {
            env.insert(key, value);
        }
    }
    let bin = runtime_bin.to_string_lossy();
    let path = if inherited_path.is_empty() {
        bin.to_string()
    } else {
        format!("{bin}:{inherited_path}")
    };
    env.insert("PATH".to_string(), path);
    env
}
