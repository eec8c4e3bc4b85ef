use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DaemonError;
use crate::orchestrator::SyncSnapshot;

/// One control command, e.g. `{"cmd":"status"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// Reply line: `data` on success, `error` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One request line out, one response line back.
#[cfg(unix)]
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    use crate::error::io_err;
    use crate::paths::socket_path;

    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }
    let stream = UnixStream::connect(&socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset => DaemonError::DaemonNotRunning {
            socket: socket.clone(),
        },
        _ => io_err(&socket, err),
    })?;

    let payload = serde_json::to_string(request)?;
    (&stream)
        .write_all(format!("{payload}\n").as_bytes())
        .map_err(|e| io_err(&socket, e))?;

    // `sync` answers only after a full tick, so no read timeout here.
    let mut line = String::new();
    let read = BufReader::new(&stream)
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(format!(
            "agent closed the connection without answering '{}'",
            request.cmd
        )));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(not(unix))]
pub fn send_request(
    _home: &Path,
    _request: &DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    Err(DaemonError::Protocol(
        "the control socket is only available on unix".to_string(),
    ))
}

/// Current snapshot. A missing socket is retried a few times so `status`
/// right after `run` does not race the bind.
pub fn request_status(home: &Path) -> Result<SyncSnapshot, DaemonError> {
    let request = DaemonRequest::new("status");
    let mut attempt = 1;
    loop {
        match send_request(home, &request) {
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                attempt += 1;
                sleep(STATUS_RETRY_DELAY);
            }
            other => return into_snapshot(other?),
        }
    }
}

/// Ask for an immediate tick; answers with the snapshot after it.
pub fn request_sync(home: &Path) -> Result<SyncSnapshot, DaemonError> {
    into_snapshot(send_request(home, &DaemonRequest::new("sync"))?)
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

fn into_snapshot(response: DaemonResponse) -> Result<SyncSnapshot, DaemonError> {
    let data = response_into_data(response)?;
    Ok(serde_json::from_value(data)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown agent error".to_string()),
        ))
    }
}
