//! Navigation controllers: the seam between the exploration engine and the
//! on-device assistive service.

use crate::adb::{shell_quote, Adb};
use crate::command::{Command, CommandResponse};
use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which modality a controller drives. Also selects report artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Screen reader driven by touch gestures.
    TbTouch,
    /// Screen reader driven through its API.
    TbApi,
    A11yApi,
    Touch,
}

impl ControllerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerMode::TbTouch => "tb_touch",
            ControllerMode::TbApi => "tb_api",
            ControllerMode::A11yApi => "a11y_api",
            ControllerMode::Touch => "touch",
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Controller {
    fn mode(&self) -> ControllerMode;

    fn setup(&mut self) -> Result<()>;

    /// Dispatch one command and wait for its typed response.
    fn execute(&mut self, command: &Command) -> Result<CommandResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Intent action the on-device service listens to.
    pub broadcast_action: String,
    /// File the service writes each command's result to.
    pub result_path: String,
    /// JSON-lines layout dump the service keeps current.
    pub layout_path: String,
    pub execute_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            broadcast_action: "dev.navaudit.COMMAND".to_string(),
            result_path: "/sdcard/nav_audit_result.json".to_string(),
            layout_path: "/sdcard/nav_audit_layout.jsonl".to_string(),
            execute_timeout_ms: 6000,
            poll_interval_ms: 250,
        }
    }
}

/// Talks to the on-device service over `adb`: the command goes out as a
/// broadcast, the answer comes back as a result file.
pub struct AdbController {
    adb: Adb,
    mode: ControllerMode,
    device: DeviceConfig,
}

impl AdbController {
    pub fn new(adb: Adb, mode: ControllerMode, device: DeviceConfig) -> Self {
        Self { adb, mode, device }
    }

    fn clear_result(&self) -> Result<()> {
        self.adb
            .run(&["shell", "rm", "-f", &self.device.result_path])
            .map(|_| ())
    }

    fn read_result(&self) -> Result<String> {
        let timeout = Duration::from_millis(self.device.execute_timeout_ms);
        let poll = Duration::from_millis(self.device.poll_interval_ms.max(10));
        let deadline = Instant::now() + timeout;
        loop {
            match self.adb.run(&["shell", "cat", &self.device.result_path]) {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {}
                Err(AuditError::Adb(message)) => debug!(%message, "result not ready"),
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Err(AuditError::Timeout(self.device.execute_timeout_ms));
            }
            thread::sleep(poll);
        }
    }
}

impl Controller for AdbController {
    fn mode(&self) -> ControllerMode {
        self.mode
    }

    fn setup(&mut self) -> Result<()> {
        self.clear_result()
    }

    fn execute(&mut self, command: &Command) -> Result<CommandResponse> {
        self.clear_result()?;
        let payload = json!({
            "controller": self.mode.as_str(),
            "command": command.payload(),
        })
        .to_string();
        self.adb.run(&[
            "shell",
            "am",
            "broadcast",
            "-a",
            &self.device.broadcast_action,
            "--es",
            "command",
            &shell_quote(&payload),
        ])?;

        let raw = self.read_result()?;
        if let Err(err) = self.clear_result() {
            warn!(error = %err, "could not remove controller result file");
        }
        CommandResponse::parse(command, &raw)
    }
}
