use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::now_ms;

const MAX_EVENTS: usize = 200;
const DEFAULT_RECENT: usize = 80;
const MAX_RECENT: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagEvent {
    pub ts_ms: u64,
    pub level: String,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct DiagnosticsJournal {
    path: Option<PathBuf>,
    events: Vec<DiagEvent>,
}

fn trim_to_max(events: &mut Vec<DiagEvent>) {
    if events.len() > MAX_EVENTS {
        let trim = events.len().saturating_sub(MAX_EVENTS);
        events.drain(0..trim);
    }
}

fn load_events_from_path(path: &Path) -> Vec<DiagEvent> {
    let raw = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let mut rows = match serde_json::from_str::<Vec<DiagEvent>>(&raw) {
        Ok(list) => list,
        Err(_) => return Vec::new(),
    };
    trim_to_max(&mut rows);
    rows
}

impl DiagnosticsJournal {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let events = load_events_from_path(&path);
        Self {
            path: Some(path),
            events,
        }
    }

    pub fn push(&mut self, level: &str, source: &str, message: impl Into<String>) {
        self.events.push(DiagEvent {
            ts_ms: now_ms(),
            level: level.trim().to_lowercase(),
            source: source.trim().to_lowercase(),
            message: message.into(),
        });
        trim_to_max(&mut self.events);
        self.persist();
    }

    pub fn info(&mut self, source: &str, message: impl Into<String>) {
        self.push("info", source, message);
    }

    pub fn error(&mut self, source: &str, message: impl Into<String>) {
        self.push("error", source, message);
    }

    pub fn events(&self) -> &[DiagEvent] {
        &self.events
    }

    /// The newest `limit` events (80 when unset, clamped to 1..=300).
    pub fn recent(&self, limit: Option<usize>) -> &[DiagEvent] {
        let max = limit.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);
        let start = self.events.len().saturating_sub(max);
        &self.events[start..]
    }

    fn persist(&self) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string(&self.events) {
            Ok(payload) => {
                if let Err(err) = fs::write(path, payload) {
                    log::warn!("cannot write diagnostics to {}: {err}", path.display());
                }
            }
            Err(err) => log::warn!("cannot encode diagnostics: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_events() {
        let mut journal = DiagnosticsJournal::in_memory();
        for i in 0..(MAX_EVENTS + 25) {
            journal.info("sequencer", format!("event {i}"));
        }
        assert_eq!(journal.events().len(), MAX_EVENTS);
        assert_eq!(journal.events()[0].message, "event 25");
    }

    #[test]
    fn normalizes_level_and_source() {
        let mut journal = DiagnosticsJournal::in_memory();
        journal.push(" WARN ", "Port", "still bound");
        let event = &journal.events()[0];
        assert_eq!(event.level, "warn");
        assert_eq!(event.source, "port");
    }

    #[test]
    fn recent_clamps_its_limit() {
        let mut journal = DiagnosticsJournal::in_memory();
        for i in 0..100 {
            journal.info("sequencer", format!("event {i}"));
        }
        assert_eq!(journal.recent(None).len(), 80);
        assert_eq!(journal.recent(Some(0)).len(), 1);
        assert_eq!(journal.recent(Some(0))[0].message, "event 99");
        assert_eq!(journal.recent(Some(1000)).len(), 100);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime").join("runtime-events.json");
        {
            let mut journal = DiagnosticsJournal::open(&path);
            journal.info("runtime", "Start requested");
            journal.error("runtime", "create exited with code 1");
        }
        let reopened = DiagnosticsJournal::open(&path);
        let messages: Vec<&str> = reopened
            .events()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(messages, vec!["Start requested", "create exited with code 1"]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime-events.json");
        fs::write(&path, "[{broken").unwrap();
        assert!(DiagnosticsJournal::open(&path).events().is_empty());
    }
}
