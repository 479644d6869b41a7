//! Log capture joined with a single controller command.

use crate::adb::Adb;
use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Captured log text per tag. Every requested tag has an entry, possibly
/// empty.
pub type LogMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogTags {
    /// Service diagnostics.
    pub service: String,
    /// Accessibility events, including window content changes.
    pub events: String,
}

impl Default for LogTags {
    fn default() -> Self {
        Self {
            service: "LATTE_SERVICE".to_string(),
            events: "LATTE_A11Y_EVENT_TAG".to_string(),
        }
    }
}

impl LogTags {
    pub fn all(&self) -> Vec<String> {
        vec![self.service.clone(), self.events.clone()]
    }
}

pub trait LogCapture {
    /// Run `action` while collecting logs for `tags`; returns only after
    /// both the action and the collection have finished.
    fn execute_with_log<T>(&mut self, tags: &[String], action: impl FnOnce() -> T)
        -> Result<(LogMap, T)>;
}

pub struct AdbLogcat {
    adb: Adb,
    settle: Duration,
}

impl AdbLogcat {
    pub fn new(adb: Adb, settle: Duration) -> Self {
        Self { adb, settle }
    }
}

impl LogCapture for AdbLogcat {
    fn execute_with_log<T>(
        &mut self,
        tags: &[String],
        action: impl FnOnce() -> T,
    ) -> Result<(LogMap, T)> {
        self.adb.run(&["logcat", "-c"])?;
        let mut child = self.adb.spawn_logcat(tags)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AuditError::Adb("logcat stdout unavailable".to_string()))?;

        let settle = self.settle;
        let (raw, result) = thread::scope(|scope| {
            let reader = scope.spawn(move || {
                let mut buf = Vec::new();
                let mut stdout = stdout;
                let _ = stdout.read_to_end(&mut buf);
                buf
            });
            let result = action();
            thread::sleep(settle);
            let _ = child.kill();
            let _ = child.wait();
            let raw = reader.join().unwrap_or_default();
            (raw, result)
        });

        let text = String::from_utf8_lossy(&raw);
        debug!(bytes = raw.len(), "logcat capture finished");
        Ok((split_by_tag(&text, tags), result))
    }
}

/// Split `logcat -v tag` output (`P/TAG: message`) into per-tag text.
pub fn split_by_tag(raw: &str, tags: &[String]) -> LogMap {
    let mut lines: BTreeMap<String, Vec<&str>> =
        tags.iter().map(|t| (t.clone(), Vec::new())).collect();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        let Some((head, message)) = line.split_once(':') else {
            continue;
        };
        let Some((_, tag)) = head.split_once('/') else {
            continue;
        };
        if let Some(bucket) = lines.get_mut(tag.trim()) {
            bucket.push(message.strip_prefix(' ').unwrap_or(message));
        }
    }

    lines
        .into_iter()
        .map(|(tag, parts)| (tag, parts.join("\n")))
        .collect()
}
