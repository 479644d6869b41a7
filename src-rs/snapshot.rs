//! Where a screen's artifacts live, and how screenshots/layouts get there.

use crate::adb::Adb;
use crate::controller::ControllerMode;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Base,
    Unlocatable,
    FarOff,
    Ineffective,
}

impl CaptureMode {
    pub fn dir_name(&self) -> &'static str {
        match self {
            CaptureMode::Base => "base",
            CaptureMode::Unlocatable => "unlocatable",
            CaptureMode::FarOff => "far_off",
            CaptureMode::Ineffective => "ineffective",
        }
    }
}

/// Path layout of one audited screen directory.
#[derive(Debug, Clone)]
pub struct AddressBook {
    root: PathBuf,
}

impl AddressBook {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode_dir(&self, mode: CaptureMode) -> PathBuf {
        self.root.join(mode.dir_name())
    }

    pub fn screenshot_path(&self, mode: CaptureMode, index: usize) -> PathBuf {
        self.mode_dir(mode).join(format!("{index}.png"))
    }

    pub fn layout_path(&self, mode: CaptureMode, index: usize) -> PathBuf {
        self.mode_dir(mode).join(format!("{index}.jsonl"))
    }

    pub fn initial_screenshot(&self) -> PathBuf {
        self.mode_dir(CaptureMode::Base).join("initial.png")
    }

    pub fn initial_layout(&self) -> PathBuf {
        self.mode_dir(CaptureMode::Base).join("initial.jsonl")
    }

    pub fn actions_dir(&self) -> PathBuf {
        self.root.join("actions")
    }

    pub fn selected_actions(&self) -> PathBuf {
        self.actions_dir().join("selected.jsonl")
    }

    pub fn ad_unit(&self, index: usize) -> PathBuf {
        self.actions_dir().join(format!("ad_unit_{index}.jsonl"))
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn error_result(&self) -> PathBuf {
        self.results_dir().join("error_result.jsonl")
    }

    pub fn unlocatable_result(&self, mode: ControllerMode) -> PathBuf {
        self.results_dir().join(format!("{mode}_unlocatable.jsonl"))
    }

    pub fn unvisited_screenshot(&self, mode: ControllerMode) -> PathBuf {
        self.results_dir().join(format!("{mode}_unvisited_nodes.png"))
    }

    pub fn unlocatable_gif(&self, mode: ControllerMode) -> PathBuf {
        self.results_dir().join(format!("{mode}_unlocatable.gif"))
    }

    pub fn unlabelled_screenshot(&self) -> PathBuf {
        self.results_dir().join("unlabelled.png")
    }

    pub fn assertive_screenshot(&self, index: usize) -> PathBuf {
        self.results_dir().join(format!("assertive_nodes_{index}.png"))
    }

    pub fn far_off_screenshot(&self) -> PathBuf {
        self.results_dir().join("far_off_elements.png")
    }

    pub fn far_off_gif(&self) -> PathBuf {
        self.results_dir().join("far_off.gif")
    }

    pub fn ineffective_screenshot(&self) -> PathBuf {
        self.results_dir().join("ineffective.png")
    }

    pub fn swipe_num(&self) -> PathBuf {
        self.results_dir().join("swipe_num.json")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for mode in [
            CaptureMode::Base,
            CaptureMode::Unlocatable,
            CaptureMode::FarOff,
            CaptureMode::Ineffective,
        ] {
            fs::create_dir_all(self.mode_dir(mode))?;
        }
        fs::create_dir_all(self.results_dir())?;
        Ok(())
    }
}

pub trait SnapshotCapture {
    /// Write the current screenshot and layout to
    /// `book.screenshot_path(mode, index)` / `book.layout_path(mode, index)`.
    fn capture_current_state(
        &mut self,
        book: &AddressBook,
        mode: CaptureMode,
        index: usize,
    ) -> Result<()>;
}

pub struct AdbSnapshot {
    adb: Adb,
    device_layout_path: String,
    delay: Duration,
}

impl AdbSnapshot {
    pub fn new(adb: Adb, device_layout_path: &str, delay: Duration) -> Self {
        Self {
            adb,
            device_layout_path: device_layout_path.to_string(),
            delay,
        }
    }
}

impl SnapshotCapture for AdbSnapshot {
    fn capture_current_state(
        &mut self,
        book: &AddressBook,
        mode: CaptureMode,
        index: usize,
    ) -> Result<()> {
        // let pending animations settle
        thread::sleep(self.delay);
        fs::create_dir_all(book.mode_dir(mode))?;

        let screenshot = book.screenshot_path(mode, index);
        self.adb
            .run_to_file(&["exec-out", "screencap", "-p"], &screenshot)?;
        let layout = book.layout_path(mode, index);
        self.adb
            .run_to_file(&["exec-out", "cat", &self.device_layout_path], &layout)?;

        debug!(mode = mode.dir_name(), index, "captured state");
        Ok(())
    }
}
