mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::RecordingLauncher;
use run_expo::provision::{ensure_runtime, ProvisionTarget, Provisioned};
use run_expo::LaunchError;

/// Packs `node-v20/bin/node` the way upstream Node.js tarballs are laid out.
fn build_runtime_archive(root: &Path) -> PathBuf {
    let staging = root.join("staging");
    let bin = staging.join("node-v20").join("bin");
    fs::create_dir_all(&bin).unwrap();
    fs::write(bin.join("node"), "#!/bin/sh\necho v20\n").unwrap();

    let archive = root.join("node.tar.gz");
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(&staging)
        .arg("node-v20")
        .status()
        .unwrap();
    assert!(status.success());
    archive
}

#[test]
fn extracts_once_then_reuses_the_install() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_runtime_archive(dir.path());
    let install = dir.path().join("Downloads").join("node");
    let target = ProvisionTarget::new(&install, Some(archive));
    let launcher = RecordingLauncher::default();

    assert_eq!(ensure_runtime(&target, &launcher).unwrap(), Provisioned::Extracted);
    assert!(install.join("bin").join("node").exists());
    assert_eq!(launcher.calls().len(), 1);

    assert_eq!(
        ensure_runtime(&target, &launcher).unwrap(),
        Provisioned::AlreadyPresent
    );
    assert_eq!(launcher.calls().len(), 1);
}

#[test]
fn corrupt_archive_is_an_extraction_failure() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("node.tar.gz");
    fs::write(&archive, "this is not a tarball").unwrap();
    let install = dir.path().join("node");
    let target = ProvisionTarget::new(&install, Some(archive));
    let launcher = RecordingLauncher::default();

    let err = ensure_runtime(&target, &launcher).unwrap_err();
    assert!(matches!(err, LaunchError::ExtractionFailure(Some(code)) if code != 0));
    assert!(install.exists());
    assert!(!install.join("bin").join("node").exists());
}

#[test]
fn missing_tar_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_runtime_archive(dir.path());
    let mut target = ProvisionTarget::new(dir.path().join("node"), Some(archive));
    target.tar_program = PathBuf::from("/definitely/not/tar");

    let err = ensure_runtime(&target, &RecordingLauncher::default()).unwrap_err();
    assert!(matches!(err, LaunchError::SpawnFailure { .. }));
}

#[test]
fn install_path_under_a_file_is_a_directory_creation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let archive = build_runtime_archive(dir.path());
    let blocker = dir.path().join("file.txt");
    fs::write(&blocker, "not a directory").unwrap();
    let install = blocker.join("node");
    let target = ProvisionTarget::new(&install, Some(archive));
    let launcher = RecordingLauncher::default();

    let err = ensure_runtime(&target, &launcher).unwrap_err();
    match err {
        LaunchError::DirectoryCreationFailure { path, .. } => assert_eq!(path, install),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(launcher.calls().is_empty());
}
