use std::env;
use std::path::{Path, PathBuf};

pub const RUNTIME_DIR_NAME: &str = "node";
pub const RUNTIME_EXECUTABLE: &str = "node";
pub const RUNTIME_ARCHIVE_NAME: &str = "node.tar.gz";
pub const PACKAGE_MANAGER_NAME: &str = "bun";
const RESOURCES_DIR_NAME: &str = "resources";
const DATA_DIR_NAME: &str = ".run-expo";

pub fn normalize_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_tilde_path(trimmed))
}

pub fn user_home_dir() -> Option<PathBuf> {
    for key in ["HOME", "USERPROFILE"] {
        if let Ok(raw) = env::var(key) {
            let clean = raw.trim();
            if !clean.is_empty() {
                return Some(PathBuf::from(clean));
            }
        }
    }
    dirs::home_dir()
}

pub fn expand_tilde_path(raw: &str) -> PathBuf {
    let text = raw.trim();
    if text == "~" {
        if let Some(home) = user_home_dir() {
            return home;
        }
    }
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(home) = user_home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(text)
}

pub fn downloads_dir() -> PathBuf {
    if let Some(dir) = dirs::download_dir() {
        return dir;
    }
    match user_home_dir() {
        Some(home) => home.join("Downloads"),
        None => env::temp_dir(),
    }
}

pub fn default_runtime_dir() -> PathBuf {
    downloads_dir().join(RUNTIME_DIR_NAME)
}

pub fn runtime_bin_dir(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("bin")
}

/// `resources/` next to the running executable; bundled files ship there.
pub fn bundled_resources_dir() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    Some(exe.parent()?.join(RESOURCES_DIR_NAME))
}

pub fn bundled_resource(name: &str) -> Option<PathBuf> {
    let path = bundled_resources_dir()?.join(name);
    path.exists().then_some(path)
}

pub fn default_data_dir() -> PathBuf {
    if let Some(home) = user_home_dir() {
        home.join(DATA_DIR_NAME)
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(DATA_DIR_NAME)
    } else {
        PathBuf::from(DATA_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_paths_normalize_to_none() {
        assert_eq!(normalize_path("   "), None);
        assert_eq!(normalize_path(" /tmp/proj "), Some(PathBuf::from("/tmp/proj")));
    }

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = user_home_dir() else {
            return;
        };
        assert_eq!(expand_tilde_path("~"), home);
        assert_eq!(expand_tilde_path("~/Downloads/node"), home.join("Downloads/node"));
        assert_eq!(expand_tilde_path("/opt/~x"), PathBuf::from("/opt/~x"));
    }

    #[test]
    fn runtime_bin_is_under_install_path() {
        assert_eq!(
            runtime_bin_dir(Path::new("/dl/node")),
            PathBuf::from("/dl/node/bin")
        );
        assert!(default_runtime_dir().ends_with(RUNTIME_DIR_NAME));
    }

    #[test]
    fn absent_bundled_resource_is_none() {
        assert_eq!(bundled_resource("definitely-not-bundled.tar.gz"), None);
    }
}
