use std::fmt;
use log::debug;

use crate::device::session::Session;
use crate::device::transport::Transport;
use crate::device::types::DeviceState;
use crate::error::DeviceError;

/// Commands understood by the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Left,
    Right,
    Stop,
    ModeAuto,
    ModeManual,
}

impl Command {
    /// The literal token the peripheral firmware expects.
    pub fn token(&self) -> &'static str {
        match self {
            Command::Left => "IZQUIERDA",
            Command::Right => "DERECHA",
            Command::Stop => "DETENER",
            Command::ModeAuto => "MODO_AUTO",
            Command::ModeManual => "MODO_MANUAL",
        }
    }

    /// A whole write payload is one command: no length prefix, no terminator.
    pub fn encode(&self) -> Vec<u8> {
        self.token().as_bytes().to_vec()
    }

    pub fn for_mode(auto_mode: bool) -> Command {
        if auto_mode { Command::ModeAuto } else { Command::ModeManual }
    }

    /// Steering commands are only meaningful while the peripheral is in manual mode.
    pub fn is_steering(&self) -> bool {
        matches!(self, Command::Left | Command::Right)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Writes `command` to the command characteristic of `session`.
///
/// Does not wait for the write to be acknowledged; the acknowledgement arrives later as a
/// transport event and never gates the next send.
pub fn send<T: Transport + ?Sized>(
    transport: &mut T,
    state: DeviceState,
    session: Option<&Session>,
    command: Command,
) -> Result<(), DeviceError> {
    if state != DeviceState::Ready {
        return Err(DeviceError::NotReady(state));
    }

    let session = session.ok_or(DeviceError::NotReady(state))?;
    let channel = session.command_channel().ok_or(DeviceError::NotReady(state))?;

    debug!("Writing {} to {:?} (session {})", command, channel, session.id());
    transport.write(session.id(), channel, command.encode());
    Ok(())
}
