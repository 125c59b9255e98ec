//! Line based presentation layer. It only forwards user intents and prints events; all
//! connection logic stays in the controller.

use futures::StreamExt;
use futures::channel::mpsc::Receiver;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use crate::console::input::{parse_input, ConsoleInput, HELP};
use crate::console::render::render;
use crate::device::dispatcher::ControllerHandle;
use crate::device::types::DeviceEvent;
use crate::error::AppRunError;

pub mod input;
pub mod render;

/// Runs until the user quits or stdin is closed.
pub async fn run_console(
    mut handle: ControllerHandle,
    mut events: Receiver<DeviceEvent>,
    scan_on_start: bool,
) -> Result<(), AppRunError> {
    let mut lines = BufReader::new(stdin()).lines();
    println!("{}", HELP);

    if scan_on_start {
        handle.start_scan().await?;
    }

    'mainloop: loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break 'mainloop;
                };

                match parse_input(&line) {
                    ConsoleInput::Request(request) => {
                        if !handle.try_request(request)? {
                            println!("busy, {:?} dropped", request);
                        }
                    },
                    ConsoleInput::Help => println!("{}", HELP),
                    ConsoleInput::Quit => break 'mainloop,
                    ConsoleInput::Empty => {},
                    ConsoleInput::Unknown(word) => println!("unknown command {:?}, type help", word),
                }
            },
            Some(event) = events.next() => {
                println!("{}", render(&event));
            },
        }
    }

    Ok(())
}
