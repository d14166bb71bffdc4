//! Stdin console feeding command lines to the control loop

use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

/// Lines waiting for the control loop before new input is dropped
pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Longest command kept; the rest of a longer line is cut
pub const MAX_COMMAND_LEN: usize = 64;

pub type CommandLine = heapless::String<MAX_COMMAND_LEN>;

pub type CommandChannel = Channel<CriticalSectionRawMutex, CommandLine, COMMAND_QUEUE_DEPTH>;

fn clip(line: &str) -> CommandLine {
    let mut clipped = CommandLine::new();
    for c in line.chars() {
        if clipped.push(c).is_err() {
            break;
        }
    }
    clipped
}

/// Forward every line of `reader` to `commands` until EOF.
pub fn forward_lines<R: BufRead>(reader: R, commands: &CommandChannel) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if commands.try_send(clip(&line)).is_err() {
                    warn!("Console backlog full, dropping {:?}", line);
                }
            }
            Err(e) => {
                warn!("Console read failed: {}", e);
                break;
            }
        }
    }
    info!("Console input closed");
}

pub fn spawn_console(commands: &'static CommandChannel) -> JoinHandle<()> {
    thread::spawn(move || forward_lines(io::stdin().lock(), commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lines_are_forwarded_in_order() {
        let commands = CommandChannel::new();
        forward_lines(Cursor::new("OFFLINE\n\nonline\n"), &commands);

        assert_eq!(commands.try_receive().unwrap(), "OFFLINE");
        assert_eq!(commands.try_receive().unwrap(), "");
        assert_eq!(commands.try_receive().unwrap(), "online");
        assert!(commands.try_receive().is_err());
    }

    #[test]
    fn test_overflow_and_long_lines() {
        let commands = CommandChannel::new();
        let long = "x".repeat(MAX_COMMAND_LEN + 10);
        let mut input = format!("{}\n", long);
        for i in 0..COMMAND_QUEUE_DEPTH + 3 {
            input.push_str(&format!("cmd{}\n", i));
        }
        forward_lines(Cursor::new(input), &commands);

        assert_eq!(commands.try_receive().unwrap().len(), MAX_COMMAND_LEN);
        let mut kept = 0;
        while commands.try_receive().is_ok() {
            kept += 1;
        }
        assert_eq!(kept, COMMAND_QUEUE_DEPTH - 1);
    }
}
