use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};
use crate::paths::normalize_path;

pub const CREATE_PROMPT: &str = "Please select where to create expo project";
pub const OPEN_PROMPT: &str = "Please select the directory of a previous Expo project";

/// Asks for a directory on `output` and reads one line from `input`.
/// A blank answer, EOF, or the filesystem root count as a cancel.
pub fn choose_dir<R, W>(prompt: &str, input: &mut R, output: &mut W) -> Result<PathBuf>
where
    R: BufRead,
    W: Write,
{
    write!(output, "{prompt}: ")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        log::info!("User cancelled");
        return Err(LaunchError::NoDirectorySelected);
    }
    let Some(path) = normalize_path(&line) else {
        log::info!("User cancelled");
        return Err(LaunchError::NoDirectorySelected);
    };
    if path == Path::new("/") {
        log::info!("User didn't select any directory");
        return Err(LaunchError::NoDirectorySelected);
    }
    Ok(path)
}

pub fn accept_dir(raw: &str) -> Result<PathBuf> {
    match normalize_path(raw) {
        Some(path) if path != Path::new("/") => Ok(path),
        _ => Err(LaunchError::NoDirectorySelected),
    }
}
