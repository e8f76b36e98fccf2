use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::process::{run_to_completion, CommandSpec, Launcher};

pub const DEFAULT_SHELL: &str = "/bin/sh";
const SHELL_PATH: &str = "/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const RELEASE_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Nothing answered on loopback before or after the kill.
    AlreadyFree,
    Reclaimed,
    StillBound,
    Failed(String),
}

pub fn is_port_in_use(port: u16) -> bool {
    let loopbacks = [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
    ];
    loopbacks
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).is_ok())
}

fn wait_for_release(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_port_in_use(port) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(150));
    }
    !is_port_in_use(port)
}

pub fn reclaim_command(shell: &Path, port: u16) -> CommandSpec {
    CommandSpec::new(shell)
        .arg("-c")
        .arg(format!("lsof -ti tcp:{port} | xargs kill -9"))
        .env("PATH", SHELL_PATH)
        .capture_output()
}

/// Kills whatever holds `port`. The kill pipeline always runs; the loopback
/// check only decides whether to wait for the port to come free. Never
/// fails the caller: every problem is folded into the outcome.
pub fn reclaim_port(port: u16, launcher: &dyn Launcher, shell: &Path) -> ReclaimOutcome {
    let was_bound = is_port_in_use(port);
    if was_bound {
        log::info!("killing existing process on port {port}");
    }

    match run_to_completion(launcher, &reclaim_command(shell, port)) {
        // lsof exits nonzero when nothing matched.
        Ok((status, _)) if !status.success() => {
            log::debug!("port reclaim command exited with {status}");
        }
        Ok(_) => {}
        Err(err) => {
            log::warn!("port reclaim failed: {err}");
            return ReclaimOutcome::Failed(err.to_string());
        }
    }

    if !was_bound {
        log::debug!("port {port} is free");
        return ReclaimOutcome::AlreadyFree;
    }
    if wait_for_release(port, RELEASE_TIMEOUT) {
        ReclaimOutcome::Reclaimed
    } else {
        log::warn!("port {port} is still in use");
        ReclaimOutcome::StillBound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::process::{RunningProcess, SystemLauncher};
    use std::fs;
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records each command, then runs a harmless stand-in shell instead.
    struct StandIn {
        shell: PathBuf,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl StandIn {
        fn new(dir: &Path) -> Self {
            let shell = dir.join("sh");
            fs::write(&shell, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&shell, fs::Permissions::from_mode(0o755)).unwrap();
            Self {
                shell,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Launcher for StandIn {
        fn launch(&self, spec: &CommandSpec) -> Result<RunningProcess> {
            self.calls.lock().unwrap().push(spec.clone());
            let mut stand_in = spec.clone();
            stand_in.program = self.shell.clone();
            SystemLauncher.launch(&stand_in)
        }
    }

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn free_port_still_runs_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = StandIn::new(dir.path());
        let port = unused_port();

        assert_eq!(
            reclaim_port(port, &launcher, Path::new("/bin/sh")),
            ReclaimOutcome::AlreadyFree
        );
        let calls = launcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[1], format!("lsof -ti tcp:{port} | xargs kill -9"));
    }

    #[test]
    fn ipv6_only_listener_is_seen_as_bound() {
        let Ok(listener) = TcpListener::bind("[::1]:0") else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port));

        let dir = tempfile::tempdir().unwrap();
        let launcher = StandIn::new(dir.path());
        assert_eq!(
            reclaim_port(port, &launcher, Path::new("/bin/sh")),
            ReclaimOutcome::StillBound
        );
        assert_eq!(launcher.calls().len(), 1);
    }

    #[test]
    fn spawn_failure_is_folded_into_outcome() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let outcome = reclaim_port(port, &SystemLauncher, Path::new("/definitely/not/a/shell"));
        assert!(matches!(outcome, ReclaimOutcome::Failed(_)));
    }

    #[test]
    fn reclaim_command_is_the_lsof_pipeline() {
        let spec = reclaim_command(Path::new("/bin/sh"), 8081);
        assert_eq!(spec.args, vec!["-c", "lsof -ti tcp:8081 | xargs kill -9"]);
    }
}
