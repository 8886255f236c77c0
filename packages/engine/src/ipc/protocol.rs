// packages/engine/src/ipc/protocol.rs
//! Control protocol spoken over the relay
//!
//! Two tiny JSON documents: `{"pid": N}` for the startup handshake and
//! `{"stop": true}` for graceful shutdown. The wire bytes match the worker
//! runtimes this pool interoperates with.

use serde::{Deserialize, Serialize};

use super::frame::{Frame, MAX_PAYLOAD};
use super::relay::{Relay, RelayError};

/// Graceful-stop command sent to a worker before its relay is closed.
#[derive(Debug, Serialize, Deserialize)]
pub struct StopCommand {
    pub stop: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PidCommand {
    pid: i64,
}

/// Encode a command as JSON and send it in a control frame.
pub async fn send_control<T: Serialize>(
    relay: &dyn Relay,
    command: &T,
) -> std::result::Result<(), RelayError> {
    let data =
        serde_json::to_vec(command).map_err(|e| RelayError::InvalidControl(e.to_string()))?;
    if data.len() as u64 > MAX_PAYLOAD {
        return Err(RelayError::PayloadTooLarge);
    }
    relay.send(Frame::control(data)).await
}

/// Send the `{"stop": true}` command.
pub async fn send_stop(relay: &dyn Relay) -> std::result::Result<(), RelayError> {
    send_control(relay, &StopCommand { stop: true }).await
}

/// Run the pid handshake: announce the host pid, await the child's pid.
///
/// The reply must be a control frame with a valid positive pid; anything
/// else fails the handshake and the caller is expected to kill the child.
pub async fn fetch_pid(
    relay: &dyn Relay,
    host_pid: u32,
) -> std::result::Result<u32, RelayError> {
    send_control(relay, &PidCommand { pid: host_pid as i64 }).await?;

    let frame = relay.receive().await?;
    if !frame.is_control() {
        return Err(RelayError::InvalidControl(
            "handshake reply is missing the CONTROL flag".into(),
        ));
    }

    let link: PidCommand = serde_json::from_slice(frame.payload())
        .map_err(|e| RelayError::InvalidControl(e.to_string()))?;
    if link.pid <= 0 {
        return Err(RelayError::InvalidControl(format!(
            "pid must be positive, got {}",
            link.pid
        )));
    }

    Ok(link.pid as u32)
}
