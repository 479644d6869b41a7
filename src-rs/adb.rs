//! Thin `adb` runner with timeouts.

use crate::error::{AuditError, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    serial: Option<String>,
    timeout: Duration,
}

impl Adb {
    pub fn new(program: &str, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            serial,
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    /// Run `adb <args>` and return its stdout.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        let out = self.finish(cmd, args)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Run `adb <args>` with stdout streamed into `out_path`.
    pub fn run_to_file(&self, args: &[&str], out_path: &Path) -> Result<()> {
        let file = File::create(out_path)?;
        let mut cmd = self.command();
        cmd.args(args)
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped());
        self.finish(cmd, args)?;
        Ok(())
    }

    pub fn spawn_logcat(&self, tags: &[String]) -> Result<Child> {
        let mut cmd = self.command();
        cmd.args(["logcat", "-v", "tag", "-s"]);
        for tag in tags {
            cmd.arg(format!("{tag}:V"));
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        cmd.spawn()
            .map_err(|err| AuditError::Adb(format!("failed to spawn logcat: {err}")))
    }

    fn finish(&self, mut cmd: Command, args: &[&str]) -> Result<Vec<u8>> {
        let label = args.join(" ");
        debug!(command = %label, "adb");
        let mut child = cmd
            .spawn()
            .map_err(|err| AuditError::Adb(format!("failed to spawn `adb {label}`: {err}")))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        thread::scope(|scope| {
            let out_reader = scope.spawn(move || drain(stdout));
            let err_reader = scope.spawn(move || drain(stderr));

            let status = match child.wait_timeout(self.timeout) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AuditError::Timeout(self.timeout.as_millis() as u64));
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            };

            let out = out_reader.join().unwrap_or_default();
            let err = err_reader.join().unwrap_or_default();
            if !status.success() {
                let stderr = String::from_utf8_lossy(&err).trim().to_string();
                return Err(AuditError::Adb(format!(
                    "`adb {label}` exited with status {}: {stderr}",
                    status.code().unwrap_or(1)
                )));
            }
            Ok(out)
        })
    }
}

fn drain<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut source) = source {
        let _ = source.read_to_end(&mut buf);
    }
    buf
}

/// Quote `raw` for the device shell that `adb shell` hands its arguments to.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "'\\''"))
}
