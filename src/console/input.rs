use crate::device::command::Command;
use crate::device::dispatcher::ControlRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Request(ControlRequest),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// Maps one line typed by the user to an intent. Case insensitive, surrounding whitespace ignored.
pub fn parse_input(line: &str) -> ConsoleInput {
    let word = line.trim().to_ascii_lowercase();

    let request = match word.as_str() {
        "" => return ConsoleInput::Empty,
        "help" | "h" | "?" => return ConsoleInput::Help,
        "quit" | "q" | "exit" => return ConsoleInput::Quit,
        "scan" | "connect" | "c" => ControlRequest::StartScan,
        "disconnect" | "d" => ControlRequest::Disconnect,
        "ack" | "reset" => ControlRequest::Acknowledge,
        "mode" | "m" | "toggle" => ControlRequest::ToggleMode,
        "left" | "l" => ControlRequest::Send(Command::Left),
        "right" | "r" => ControlRequest::Send(Command::Right),
        "stop" | "s" => ControlRequest::Send(Command::Stop),
        _ => return ConsoleInput::Unknown(word),
    };

    ConsoleInput::Request(request)
}

pub const HELP: &str = "\
commands:
  scan        search for the peripheral and connect
  left | l    turn left (manual mode only)
  right | r   turn right (manual mode only)
  stop | s    stop the motor
  mode | m    toggle automatic / manual mode
  disconnect  close the connection
  ack         leave the error state
  quit        exit";
