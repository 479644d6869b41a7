//! Scripted stand-ins for the device used by the pass tests.

use crate::command::{Command, CommandResponse, LocatableState};
use crate::controller::{Controller, ControllerMode};
use crate::error::{AuditError, Result};
use crate::explore::{explore_linear, ExplorationState, ExploreOptions};
use crate::logcat::{LogCapture, LogMap, LogTags};
use crate::node::{Bounds, Node};
use crate::session::Session;
use crate::snapshot::{AddressBook, CaptureMode, SnapshotCapture};
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use tempfile::TempDir;

const SHOT_SIDE: u32 = 64;

pub fn node_at(xpath: &str, row: i64) -> Node {
    Node {
        xpath: xpath.to_string(),
        bounds: Bounds::new(0, row * 100, 100, 50),
        text: format!("label {xpath}"),
        ..Node::default()
    }
}

pub fn nav(node: &Node) -> CommandResponse {
    CommandResponse::Navigate {
        navigated_node: Some(node.clone()),
    }
}

pub fn nav_none() -> CommandResponse {
    CommandResponse::Navigate {
        navigated_node: None,
    }
}

pub fn focus_ok() -> CommandResponse {
    CommandResponse::Locatable {
        state: LocatableState::Completed,
        raw: json!({ "state": "COMPLETED" }),
    }
}

pub fn focus_failed() -> CommandResponse {
    CommandResponse::Locatable {
        state: LocatableState::FailedLocate,
        raw: json!({ "state": "FAILED_LOCATE" }),
    }
}

pub fn info_node(node: Option<&Node>) -> CommandResponse {
    CommandResponse::Info {
        answer: node.map(Node::to_json),
    }
}

pub fn info_flag(result: bool) -> CommandResponse {
    CommandResponse::Info {
        answer: Some(json!({ "result": result })),
    }
}

/// Replays queued responses in order; an empty queue behaves like a device
/// that never answers.
pub struct ScriptedController {
    mode: ControllerMode,
    script: VecDeque<CommandResponse>,
    pub sent: Vec<Command>,
    pub refuse_setup: bool,
}

impl ScriptedController {
    pub fn new(mode: ControllerMode) -> Self {
        Self {
            mode,
            script: VecDeque::new(),
            sent: Vec::new(),
            refuse_setup: false,
        }
    }

    pub fn push(&mut self, response: CommandResponse) {
        self.script.push_back(response);
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.iter().map(Command::name).collect()
    }
}

impl Controller for ScriptedController {
    fn mode(&self) -> ControllerMode {
        self.mode
    }

    fn setup(&mut self) -> Result<()> {
        if self.refuse_setup {
            return Err(AuditError::Adb("service not installed".to_string()));
        }
        Ok(())
    }

    fn execute(&mut self, command: &Command) -> Result<CommandResponse> {
        self.sent.push(command.clone());
        self.script.pop_front().ok_or(AuditError::Timeout(6000))
    }
}

/// Empty logs for every call, except calls marked to report a change in
/// the active window.
#[derive(Default)]
pub struct FakeLogs {
    calls: usize,
    window_changes: HashSet<usize>,
    /// Capture breaks from this call (1-based) on.
    fail_from: Option<usize>,
}

impl FakeLogs {
    /// Mark the `call`-th dispatch (1-based) as changing the window.
    pub fn change_window_on(&mut self, call: usize) {
        self.window_changes.insert(call);
    }

    pub fn fail_from(&mut self, call: usize) {
        self.fail_from = Some(call);
    }
}

impl LogCapture for FakeLogs {
    fn execute_with_log<T>(
        &mut self,
        tags: &[String],
        action: impl FnOnce() -> T,
    ) -> Result<(LogMap, T)> {
        self.calls += 1;
        if self.fail_from.is_some_and(|from| self.calls >= from) {
            return Err(AuditError::Adb("logcat died".to_string()));
        }
        let out = action();
        let mut logs: LogMap = tags.iter().map(|t| (t.clone(), String::new())).collect();
        if self.window_changes.contains(&self.calls) {
            logs.insert(
                LogTags::default().events,
                "WindowContentChange: {\"changedWindowId\": 3, \"activeWindowId\": 3}".to_string(),
            );
        }
        Ok((logs, out))
    }
}

/// Writes plain PNGs and JSON-lines layouts into the address book.
#[derive(Default)]
pub struct FakeSnapshots {
    captures: usize,
    /// Captures after the first one show a different picture.
    pub flip_after_first: bool,
    /// Layout written for a given capture index; empty otherwise.
    pub layouts: HashMap<usize, Vec<Node>>,
}

impl SnapshotCapture for FakeSnapshots {
    fn capture_current_state(
        &mut self,
        book: &AddressBook,
        mode: CaptureMode,
        index: usize,
    ) -> Result<()> {
        self.captures += 1;
        fs::create_dir_all(book.mode_dir(mode))?;
        let img = if self.flip_after_first && self.captures > 1 {
            half_dark(SHOT_SIDE)
        } else {
            blank(SHOT_SIDE)
        };
        img.save(book.screenshot_path(mode, index))?;

        let mut layout = String::new();
        for node in self.layouts.get(&index).into_iter().flatten() {
            layout.push_str(&serde_json::to_string(node)?);
            layout.push('\n');
        }
        fs::write(book.layout_path(mode, index), layout)?;
        Ok(())
    }
}

pub fn blank(side: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(side, side, Rgba([255, 255, 255, 255])))
}

pub fn half_dark(side: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(side, side, |x, _| {
        if x < side / 2 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    }))
}

/// A screen directory in a temp dir, with its initial screenshot, plus the
/// three scripted collaborators.
pub struct Harness {
    pub controller: ScriptedController,
    pub logs: FakeLogs,
    pub snapshots: FakeSnapshots,
    pub book: AddressBook,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_mode(ControllerMode::TbApi)
    }

    pub fn with_mode(mode: ControllerMode) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let book = AddressBook::new(dir.path());
        book.ensure_dirs().expect("screen dirs");
        blank(SHOT_SIDE)
            .save(book.initial_screenshot())
            .expect("initial screenshot");
        Self {
            controller: ScriptedController::new(mode),
            logs: FakeLogs::default(),
            snapshots: FakeSnapshots::default(),
            book,
            _dir: dir,
        }
    }

    pub fn session(&mut self) -> Session<'_, ScriptedController, FakeLogs, FakeSnapshots> {
        Session::new(
            &mut self.controller,
            &mut self.logs,
            &mut self.snapshots,
            &self.book,
            LogTags::default(),
        )
    }

    pub fn run_linear(&mut self, candidates: &[Node], options: &ExploreOptions) -> ExplorationState {
        explore_linear(&mut self.session(), candidates, options)
    }
}
