#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tauri::State;

use run_expo::diagnostics::{DiagEvent, DiagnosticsJournal};
use run_expo::picker;
use run_expo::{
    CancelToken, DevServer, Flow, LaunchConfig, LaunchRequest, SequenceStatus, Sequencer,
    StatusCell, StatusSink, SystemLauncher,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct LauncherStartRequest {
    flow: Option<String>,
    dir: Option<String>,
    profile_path: Option<String>,
    port: Option<u16>,
    readiness_timeout_secs: Option<u64>,
    data_dir: Option<String>,
}

impl LauncherStartRequest {
    fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            profile_path: self.profile_path.clone(),
            port: self.port,
            readiness_timeout_secs: self.readiness_timeout_secs,
            data_dir: self.data_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct LauncherStatus {
    running: bool,
    status: SequenceStatus,
    address: Option<String>,
    server_pid: Option<u32>,
    port: u16,
    diagnostics_path: String,
}

#[derive(Debug, Clone, Serialize)]
struct LauncherDiagnostics {
    generated_at_ms: u64,
    status: LauncherStatus,
    events: Vec<DiagEvent>,
}

#[derive(Default)]
struct LauncherState {
    sequencer: Option<Arc<Sequencer>>,
    // Present while a sequence runs on its worker thread.
    cancel: Option<CancelToken>,
    server: Option<DevServer>,
}

#[derive(Default)]
struct LauncherManager {
    status: Arc<StatusCell>,
    state: Arc<Mutex<LauncherState>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn lock_state(state: &Mutex<LauncherState>) -> MutexGuard<'_, LauncherState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn parse_flow(raw: Option<&str>, dir: PathBuf) -> Result<Flow, String> {
    match raw.map(str::trim).unwrap_or("fresh") {
        "fresh" | "create" => Ok(Flow::Fresh { target_dir: dir }),
        "existing" | "open" => Ok(Flow::Existing { project_dir: dir }),
        other => Err(format!("unknown flow: {other}")),
    }
}

fn reap_exited_server(state: &mut LauncherState, status: &StatusCell) {
    let exited = match state.server.as_mut().map(DevServer::try_exit) {
        Some(Ok(Some(exit))) => Some(exit.to_string()),
        Some(Err(err)) => Some(err.to_string()),
        Some(Ok(None)) | None => None,
    };
    if let Some(reason) = exited {
        log::warn!("dev server is gone: {reason}");
        state.server = None;
        status.publish(&SequenceStatus::Idle);
    }
}

fn snapshot_status(state: &LauncherState, status: &StatusCell) -> LauncherStatus {
    let fallback;
    let config = match state.sequencer.as_ref() {
        Some(sequencer) => sequencer.config(),
        None => {
            fallback = LaunchConfig::resolve(&LaunchRequest::default());
            &fallback
        }
    };
    let current = status.get();
    LauncherStatus {
        running: state.cancel.is_some() || state.server.is_some(),
        address: current.address().map(str::to_string),
        status: current,
        server_pid: state.server.as_ref().map(DevServer::pid),
        port: config.port,
        diagnostics_path: config.diagnostics_path().to_string_lossy().to_string(),
    }
}

fn run_sequence(
    sequencer: Arc<Sequencer>,
    flow: Flow,
    cancel: CancelToken,
    status: Arc<StatusCell>,
    state: Arc<Mutex<LauncherState>>,
) {
    let result = sequencer.run(&flow, status.as_ref(), &cancel);
    let mut guard = lock_state(&state);
    guard.cancel = None;
    match result {
        Ok(outcome) if cancel.is_cancelled() => {
            if let Err(err) = outcome.server.stop() {
                log::warn!("failed to stop dev server after stop request: {err}");
            }
            status.publish(&SequenceStatus::Idle);
        }
        Ok(outcome) => guard.server = Some(outcome.server),
        Err(err) => log::warn!("launch ended: {err}"),
    }
}

#[tauri::command]
fn launcher_status(manager: State<'_, LauncherManager>) -> LauncherStatus {
    let mut guard = lock_state(&manager.state);
    reap_exited_server(&mut guard, &manager.status);
    snapshot_status(&guard, &manager.status)
}

#[tauri::command]
fn launcher_diagnostics(
    manager: State<'_, LauncherManager>,
    limit: Option<u32>,
) -> LauncherDiagnostics {
    let mut guard = lock_state(&manager.state);
    reap_exited_server(&mut guard, &manager.status);
    let limit = limit.map(|l| l as usize);
    let events = match guard.sequencer.as_ref() {
        Some(sequencer) => sequencer.diagnostics(limit),
        None => {
            let config = LaunchConfig::resolve(&LaunchRequest::default());
            DiagnosticsJournal::open(config.diagnostics_path())
                .recent(limit)
                .to_vec()
        }
    };
    LauncherDiagnostics {
        generated_at_ms: now_ms(),
        status: snapshot_status(&guard, &manager.status),
        events,
    }
}

#[tauri::command]
fn launcher_start(
    manager: State<'_, LauncherManager>,
    request: Option<LauncherStartRequest>,
) -> Result<LauncherStatus, String> {
    let req = request.unwrap_or_default();
    let mut guard = lock_state(&manager.state);
    reap_exited_server(&mut guard, &manager.status);
    if guard.cancel.is_some() || guard.server.is_some() {
        log::info!("Start requested while already running");
        return Ok(snapshot_status(&guard, &manager.status));
    }

    let config = LaunchConfig::resolve(&req.launch_request());
    let dir = picker::accept_dir(req.dir.as_deref().unwrap_or_default())
        .map_err(|err| err.to_string())?;
    let flow = parse_flow(req.flow.as_deref(), dir)?;
    if matches!(flow, Flow::Fresh { .. }) {
        config.require_package_manager().map_err(|err| err.to_string())?;
    }

    let sequencer = Arc::new(Sequencer::new(config, Arc::new(SystemLauncher)));
    let cancel = CancelToken::new();
    guard.sequencer = Some(Arc::clone(&sequencer));
    guard.cancel = Some(cancel.clone());
    manager.status.publish(&SequenceStatus::Idle);

    let status = Arc::clone(&manager.status);
    let state = Arc::clone(&manager.state);
    thread::Builder::new()
        .name("launch-sequence".to_string())
        .spawn(move || run_sequence(sequencer, flow, cancel, status, state))
        .map_err(|err| {
            guard.cancel = None;
            format!("failed to start launch thread: {err}")
        })?;
    Ok(snapshot_status(&guard, &manager.status))
}

#[tauri::command]
fn launcher_stop(manager: State<'_, LauncherManager>) -> Result<LauncherStatus, String> {
    let mut guard = lock_state(&manager.state);
    log::info!("Stop requested");
    if let Some(cancel) = guard.cancel.as_ref() {
        cancel.cancel();
    }
    if let Some(server) = guard.server.take() {
        server
            .stop()
            .map_err(|err| format!("failed to stop dev server: {err}"))?;
        manager.status.publish(&SequenceStatus::Idle);
    }
    Ok(snapshot_status(&guard, &manager.status))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tauri::Builder::default()
        .manage(LauncherManager::default())
        .invoke_handler(tauri::generate_handler![
            launcher_status,
            launcher_diagnostics,
            launcher_start,
            launcher_stop
        ])
        .run(tauri::generate_context!())
        .expect("failed to run Run Expo desktop shell");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flow_names_map_to_flows() {
        let dir = PathBuf::from("/tmp/app");
        assert_eq!(
            parse_flow(None, dir.clone()).unwrap(),
            Flow::Fresh {
                target_dir: dir.clone()
            }
        );
        assert_eq!(
            parse_flow(Some(" existing "), dir.clone()).unwrap(),
            Flow::Existing {
                project_dir: dir.clone()
            }
        );
        assert!(parse_flow(Some("rebuild"), dir).is_err());
    }

    #[test]
    fn idle_snapshot_reports_nothing_running() {
        let state = LauncherState::default();
        let snapshot = snapshot_status(&state, &StatusCell::new());
        assert!(!snapshot.running);
        assert_eq!(snapshot.status, SequenceStatus::Idle);
        assert_eq!(snapshot.address, None);
        assert!(snapshot.diagnostics_path.ends_with("runtime-events.json"));
    }

    #[test]
    fn start_request_carries_overrides() {
        let req: LauncherStartRequest = serde_json::from_value(serde_json::json!({
            "flow": "open",
            "dir": "/tmp/app",
            "port": 19000,
            "readiness_timeout_secs": 0
        }))
        .unwrap();
        let launch = req.launch_request();
        assert_eq!(launch.port, Some(19000));
        assert_eq!(launch.readiness_timeout_secs, Some(0));
        assert_eq!(launch.profile_path, None);
    }
}
