use std::io::{ErrorKind, Read};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::now_ms;

/// Matches the address Expo prints once the web bundler is listening.
pub const DEFAULT_PATTERN: &str = "http://localhost:[0-9]+";

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessResult {
    pub matched_address: String,
    pub found_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessEvent {
    Found(ReadinessResult),
    Closed,
}

#[derive(Debug, Clone)]
pub struct ReadinessScanner {
    pattern: Regex,
}

impl ReadinessScanner {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn with_default_pattern() -> Result<Self> {
        Self::new(DEFAULT_PATTERN)
    }

    /// Looks for the address inside this one chunk only. A match split over
    /// two reads is not seen.
    pub fn scan_chunk(&self, chunk: &[u8]) -> Option<ReadinessResult> {
        let text = std::str::from_utf8(chunk).ok()?;
        let found = self.pattern.find(text)?;
        Some(ReadinessResult {
            matched_address: found.as_str().to_string(),
            found_at_ms: now_ms(),
        })
    }

    /// Reads `stream` on its own thread and reports the first address found.
    /// The thread keeps draining after the match so the writer never blocks
    /// on a full pipe, and ends with `Closed` at EOF.
    pub fn subscribe<R>(&self, mut stream: R, events: Sender<ReadinessEvent>) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        let scanner = self.clone();
        thread::spawn(move || {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut published = false;
            loop {
                let read = match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        log::warn!("dev server output read failed: {err}");
                        break;
                    }
                };
                let chunk = &buf[..read];
                match std::str::from_utf8(chunk) {
                    Ok(text) => log::debug!("dev server: {}", text.trim_end()),
                    Err(_) => {
                        log::debug!("skipping {read} bytes of non-UTF-8 dev server output");
                        continue;
                    }
                }
                if published {
                    continue;
                }
                match scanner.scan_chunk(chunk) {
                    Some(result) => {
                        log::info!("dev server reachable at {}", result.matched_address);
                        published = true;
                        let _ = events.send(ReadinessEvent::Found(result));
                    }
                    None => log::debug!("URL not found"),
                }
            }
            let _ = events.send(ReadinessEvent::Closed);
        })
    }
}
