use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LaunchError, Result};
use crate::paths::{self, normalize_path};
use crate::port::DEFAULT_SHELL;
use crate::provision::{ProvisionTarget, DEFAULT_TAR};
use crate::readiness::DEFAULT_PATTERN;

pub const DEFAULT_FRAMEWORK: &str = "expo";
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_ENV_PROGRAM: &str = "/usr/bin/env";
pub const PROFILE_ENV: &str = "RUN_EXPO_PROFILE_PATH";

/// On-disk launch profile. Every field is optional; a missing or broken file
/// behaves like an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LaunchProfile {
    pub runtime_dir: Option<String>,
    pub runtime_archive: Option<String>,
    pub package_manager: Option<String>,
    pub framework: Option<String>,
    pub port: Option<u16>,
    /// `0` disables the timeout.
    pub readiness_timeout_secs: Option<u64>,
    pub readiness_pattern: Option<String>,
    pub data_dir: Option<String>,
    pub passthrough_env: Option<Vec<String>>,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub profile_path: Option<String>,
    pub port: Option<u16>,
    pub readiness_timeout_secs: Option<u64>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub runtime_dir: PathBuf,
    pub runtime_archive: Option<PathBuf>,
    pub package_manager: Option<PathBuf>,
    pub framework: String,
    pub port: u16,
    pub readiness_timeout: Option<Duration>,
    pub readiness_pattern: String,
    pub data_dir: PathBuf,
    pub passthrough_env: Vec<String>,
    pub tar_program: PathBuf,
    pub env_program: PathBuf,
    pub shell_program: PathBuf,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            runtime_dir: paths::default_runtime_dir(),
            runtime_archive: paths::bundled_resource(paths::RUNTIME_ARCHIVE_NAME),
            package_manager: paths::bundled_resource(paths::PACKAGE_MANAGER_NAME),
            framework: DEFAULT_FRAMEWORK.to_string(),
            port: DEFAULT_PORT,
            readiness_timeout: Some(Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS)),
            readiness_pattern: DEFAULT_PATTERN.to_string(),
            data_dir: paths::default_data_dir(),
            passthrough_env: default_passthrough_env(),
            tar_program: PathBuf::from(DEFAULT_TAR),
            env_program: PathBuf::from(DEFAULT_ENV_PROGRAM),
            shell_program: PathBuf::from(DEFAULT_SHELL),
        }
    }
}

fn default_passthrough_env() -> Vec<String> {
    ["HOME", "USER", "LANG", "TMPDIR"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

pub fn load_launch_profile(profile_path: Option<&str>) -> LaunchProfile {
    let Some(path) = profile_path.and_then(normalize_path) else {
        return LaunchProfile::default();
    };
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str::<LaunchProfile>(&raw).unwrap_or_else(|err| {
            log::warn!("ignoring malformed profile {}: {err}", path.display());
            LaunchProfile::default()
        }),
        Err(err) => {
            log::warn!("cannot read profile {}: {err}", path.display());
            LaunchProfile::default()
        }
    }
}

impl LaunchConfig {
    /// Request, then `RUN_EXPO_*` environment, then profile, then defaults.
    pub fn resolve(request: &LaunchRequest) -> Self {
        let profile_path = request
            .profile_path
            .clone()
            .or_else(|| env_value(PROFILE_ENV));
        let profile = load_launch_profile(profile_path.as_deref());
        Self::from_sources(request, &profile, env_value)
    }

    pub fn from_sources<F>(request: &LaunchRequest, profile: &LaunchProfile, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let pick_path = |env_key: &str, from_profile: Option<&String>| {
            lookup(env_key)
                .or_else(|| from_profile.cloned())
                .and_then(|raw| normalize_path(&raw))
        };

        let runtime_dir = pick_path("RUN_EXPO_RUNTIME_DIR", profile.runtime_dir.as_ref())
            .unwrap_or(defaults.runtime_dir);
        let runtime_archive = pick_path("RUN_EXPO_ARCHIVE", profile.runtime_archive.as_ref())
            .or(defaults.runtime_archive);
        let package_manager = pick_path("RUN_EXPO_BUN", profile.package_manager.as_ref())
            .or(defaults.package_manager);
        let port = request
            .port
            .or_else(|| lookup("RUN_EXPO_PORT").and_then(|raw| raw.parse().ok()))
            .or(profile.port)
            .unwrap_or(defaults.port);
        let readiness_timeout = match request
            .readiness_timeout_secs
            .or(profile.readiness_timeout_secs)
        {
            Some(secs) => timeout_from_secs(secs),
            None => defaults.readiness_timeout,
        };
        let data_dir = request
            .data_dir
            .as_deref()
            .and_then(normalize_path)
            .or_else(|| profile.data_dir.as_deref().and_then(normalize_path))
            .unwrap_or(defaults.data_dir);
        let framework = profile
            .framework
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or(defaults.framework);

        Self {
            runtime_dir,
            runtime_archive,
            package_manager,
            framework,
            port,
            readiness_timeout,
            readiness_pattern: profile
                .readiness_pattern
                .clone()
                .unwrap_or(defaults.readiness_pattern),
            data_dir,
            passthrough_env: profile
                .passthrough_env
                .clone()
                .unwrap_or(defaults.passthrough_env),
            ..defaults
        }
    }

    pub fn provision_target(&self) -> ProvisionTarget {
        let mut target = ProvisionTarget::new(&self.runtime_dir, self.runtime_archive.clone());
        target.tar_program = self.tar_program.clone();
        target
    }

    pub fn require_package_manager(&self) -> Result<&Path> {
        self.package_manager.as_deref().ok_or_else(|| {
            LaunchError::MissingBundledResource(paths::PACKAGE_MANAGER_NAME.to_string())
        })
    }

    pub fn runtime_bin_dir(&self) -> PathBuf {
        paths::runtime_bin_dir(&self.runtime_dir)
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_dir.join("runtime").join("runtime-events.json")
    }
}
