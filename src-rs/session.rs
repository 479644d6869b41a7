//! One exploration pass's handle on its collaborators. Commands go out one
//! at a time, each joined with its log capture.

use crate::command::{Command, CommandResponse};
use crate::controller::Controller;
use crate::error::Result;
use crate::logcat::{LogCapture, LogMap, LogTags};
use crate::node::Node;
use crate::snapshot::{AddressBook, CaptureMode, SnapshotCapture};
use crate::window::is_window_changed;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct Session<'a, C, L, S> {
    pub controller: &'a mut C,
    pub logs: &'a mut L,
    pub snapshots: &'a mut S,
    pub book: &'a AddressBook,
    pub tags: LogTags,
}

impl<'a, C, L, S> Session<'a, C, L, S>
where
    C: Controller,
    L: LogCapture,
    S: SnapshotCapture,
{
    pub fn new(
        controller: &'a mut C,
        logs: &'a mut L,
        snapshots: &'a mut S,
        book: &'a AddressBook,
        tags: LogTags,
    ) -> Self {
        Self {
            controller,
            logs,
            snapshots,
            book,
            tags,
        }
    }

    /// Run one command with its paired log capture. A controller failure
    /// (timeout, malformed result) comes back as `None`; only a broken log
    /// capture is an error.
    pub fn dispatch(&mut self, command: &Command) -> Result<(LogMap, Option<CommandResponse>)> {
        let controller = &mut *self.controller;
        let tags = self.tags.all();
        let (logs, outcome) = self
            .logs
            .execute_with_log(&tags, || controller.execute(command))?;

        if let Some(service_log) = logs.get(&self.tags.service) {
            if !service_log.is_empty() {
                debug!(command = command.name(), log = %service_log, "service log");
            }
        }

        match outcome {
            Ok(response) => Ok((logs, Some(response))),
            Err(err) => {
                warn!(command = command.name(), error = %err, "no usable response");
                Ok((logs, None))
            }
        }
    }

    pub fn window_changed(&self, logs: &LogMap) -> bool {
        is_window_changed(logs, &self.tags.events)
    }

    /// Capture the current state; a failed capture is logged and skipped.
    pub fn snapshot(&mut self, mode: CaptureMode, index: usize) -> Option<PathBuf> {
        match self.snapshots.capture_current_state(self.book, mode, index) {
            Ok(()) => Some(self.book.screenshot_path(mode, index)),
            Err(err) => {
                warn!(mode = mode.dir_name(), index, error = %err, "state capture failed");
                None
            }
        }
    }

    /// Node currently holding accessibility focus, if the service knows one.
    pub fn focused_node(&mut self) -> Result<Option<Node>> {
        let (_, response) = self.dispatch(&Command::info("a11y_focused"))?;
        Ok(response.and_then(|r| r.answer_node()))
    }

    /// Ask the service whether `target` is the focused node.
    pub fn is_focused(&mut self, target: &Node) -> Result<bool> {
        let query = Command::Info {
            question: "is_focused".to_string(),
            extra: Some(target.to_json()),
        };
        let (_, response) = self.dispatch(&query)?;
        Ok(response.map(|r| r.answer_flag()).unwrap_or(false))
    }
}
