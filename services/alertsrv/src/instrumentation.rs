//! Alert level instrumentation
//!
//! An instrumented alert level runs an external command before it triggers.
//! The command gets exactly one argument: the sensor alert as a JSON object
//! with an additional `instrumentationAlertLevel` field. On exit code 0 its
//! stdout decides:
//!
//! - `{}` suppresses the sensor alert for this level
//! - any other object is the (possibly modified) sensor alert to dispatch;
//!   `sensorId`, `nodeId`, `description`, `timeReceived`, `alertDelay`,
//!   `alertLevels`, `dataType` and `instrumentationAlertLevel` must not change
//!
//! Empty or malformed output, a non-zero exit code, a spawn failure and a
//! timeout are failures. On timeout the process gets SIGTERM, one second to
//! exit, then SIGKILL.

use std::process::Stdio;
use std::time::Duration;

use alertr_model::{AlertLevel, SensorAlert, SensorData};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::InstrumentationError;

/// Time a timed out process gets between SIGTERM and SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Field added to the payload and expected back unchanged
const LEVEL_FIELD: &str = "instrumentationAlertLevel";

/// Decision of a successful instrumentation run
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentationVerdict {
    /// Dispatch this (possibly modified) sensor alert
    Allow(SensorAlert),
    /// Drop the sensor alert for this level; not an error
    Suppress,
}

/// Runs instrumentation commands
#[derive(Debug, Clone)]
pub struct InstrumentationRunner {
    grace: Duration,
}

impl Default for InstrumentationRunner {
    fn default() -> Self {
        Self {
            grace: TERMINATE_GRACE,
        }
    }
}

impl InstrumentationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the level's command for `alert`
    ///
    /// Never blocks longer than the level's timeout plus the termination grace
    /// period. Cancellation kills the process the same way a timeout does.
    pub async fn run(
        &self,
        level: &AlertLevel,
        alert: &SensorAlert,
        cancel: &CancellationToken,
    ) -> Result<InstrumentationVerdict, InstrumentationError> {
        let cmd = level
            .instrumentation_cmd
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| InstrumentationError::Execution("no command configured".to_string()))?;

        let payload = build_payload(level, alert)?;
        debug!(
            "Executing instrumentation '{}' for alert level {}",
            cmd, level.level
        );

        let mut child = Command::new(cmd)
            .arg(&payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(
                    "Executing instrumentation for alert level {} failed: {}",
                    level.level, e
                );
                InstrumentationError::Execution(e.to_string())
            })?;

        let mut stdout_task = spawn_reader(child.stdout.take());
        let mut stderr_task = spawn_reader(child.stderr.take());

        // One deadline for the exit and both pipes; a backgrounded grandchild
        // can keep the pipes open after the command itself has exited
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(level.instrumentation_timeout);
        let finished = tokio::select! {
            res = tokio::time::timeout_at(deadline, async {
                let status = child.wait().await;
                let stdout = (&mut stdout_task).await.unwrap_or_default();
                let stderr = (&mut stderr_task).await.unwrap_or_default();
                (status, stdout, stderr)
            }) => Some(res),
            _ = cancel.cancelled() => None,
        };

        let (status, stdout, stderr) = match finished {
            Some(Ok(output)) => output,
            Some(Err(_)) => {
                error!(
                    "Instrumentation for alert level {} timed out after {}s",
                    level.level, level.instrumentation_timeout
                );
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(InstrumentationError::Timeout);
            },
            None => {
                warn!("Instrumentation for alert level {} cancelled", level.level);
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(InstrumentationError::Cancelled);
            },
        };
        let status = status.map_err(|e| InstrumentationError::Execution(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            error!(
                "Instrumentation for alert level {} exited with code {} (stdout: {}, stderr: {})",
                level.level,
                code,
                stdout.trim(),
                stderr.trim()
            );
            return Err(InstrumentationError::ExitCode(code));
        }

        parse_output(level, alert, &stdout).inspect_err(|e| {
            error!(
                "Unable to process output of instrumentation for alert level {}: {:?} (stderr: {})",
                level.level,
                e,
                stderr.trim()
            );
        })
    }

    /// SIGTERM, wait the grace period, then SIGKILL
    async fn terminate(&self, child: &mut Child) {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is our own child which has not been reaped yet
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                if let Ok(Ok(_)) = tokio::time::timeout(self.grace, child.wait()).await {
                    return;
                }
            }
            warn!("Instrumentation process {} did not terminate, killing it", pid);
        }
        if let Err(e) = child.kill().await {
            warn!("Unable to kill instrumentation process: {}", e);
        }
    }
}

fn spawn_reader<R>(reader: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// JSON argument handed to the command
pub fn build_payload(
    level: &AlertLevel,
    alert: &SensorAlert,
) -> Result<String, InstrumentationError> {
    let mut value = serde_json::to_value(alert)
        .map_err(|e| InstrumentationError::Execution(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove("rulesActivated");
        map.insert(LEVEL_FIELD.to_string(), json!(level.level));
    }
    Ok(value.to_string())
}

/// Interpret the stdout of a successful run
pub fn parse_output(
    level: &AlertLevel,
    original: &SensorAlert,
    stdout: &str,
) -> Result<InstrumentationVerdict, InstrumentationError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(InstrumentationError::EmptyOutput);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| InstrumentationError::IllegalOutput(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(illegal("output is not a JSON object"));
    };
    if map.is_empty() {
        return Ok(InstrumentationVerdict::Suppress);
    }

    match map.remove(LEVEL_FIELD).and_then(|v| v.as_u64()) {
        Some(l) if l == u64::from(level.level) => {},
        Some(_) => return Err(illegal("instrumentationAlertLevel not allowed to change")),
        None => return Err(illegal("instrumentationAlertLevel missing")),
    }

    let raw_data = map.get("data").cloned().unwrap_or(Value::Null);
    map.insert("rulesActivated".to_string(), json!(original.rules_activated));
    let mut candidate: SensorAlert = serde_json::from_value(Value::Object(map))
        .map_err(|e| InstrumentationError::IllegalOutput(e.to_string()))?;

    check_unchanged(original, &candidate)?;
    if candidate.state > 1 {
        return Err(illegal("state must be 0 or 1"));
    }
    candidate.data = SensorData::from_value(candidate.data_type, &raw_data)
        .ok_or_else(|| illegal("data does not match dataType"))?;
    candidate.has_optional_data = candidate.optional_data.is_some();

    Ok(InstrumentationVerdict::Allow(candidate))
}

fn check_unchanged(
    original: &SensorAlert,
    candidate: &SensorAlert,
) -> Result<(), InstrumentationError> {
    let changed = if original.node_id != candidate.node_id {
        Some("nodeId")
    } else if original.sensor_id != candidate.sensor_id {
        Some("sensorId")
    } else if original.description != candidate.description {
        Some("description")
    } else if original.time_received != candidate.time_received {
        Some("timeReceived")
    } else if original.alert_delay != candidate.alert_delay {
        Some("alertDelay")
    } else if original.alert_levels != candidate.alert_levels {
        Some("alertLevels")
    } else if original.data_type != candidate.data_type {
        Some("dataType")
    } else {
        None
    };
    match changed {
        Some(field) => Err(illegal(&format!("{} not allowed to change", field))),
        None => Ok(()),
    }
}

fn illegal(msg: &str) -> InstrumentationError {
    InstrumentationError::IllegalOutput(msg.to_string())
}
