//! Operator console.

use std::io::{self, BufRead, Write};

use super::lifecycle::Supervisor;

pub const HELP_TEXT: &str = "\
Supervisor commands:
  update                 check for a new release now
  stop | exit | shutdown stop the module and exit
  help                   show this text
Anything else is passed to the module.";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Quit,
    Update,
    /// Print the help text; the line is also forwarded to the module.
    Help,
    Forward(String),
    Empty,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.trim() {
            "" => OperatorCommand::Empty,
            "stop" | "exit" | "shutdown" => OperatorCommand::Quit,
            "update" => OperatorCommand::Update,
            "help" => OperatorCommand::Help,
            _ => OperatorCommand::Forward(line.to_string()),
        }
    }
}

/// How a console session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked to stop.
    Quit,
    /// Input was closed; the supervisor keeps running.
    EndOfInput,
}

/// Read operator lines from `input` until `Quit` or end of input.
///
/// Does not shut the supervisor down; that is left to the caller.
pub fn run_console(
    supervisor: &Supervisor,
    input: impl BufRead,
    output: &mut impl Write,
) -> io::Result<ConsoleExit> {
    for line in input.lines() {
        let line = line?;
        match OperatorCommand::parse(&line) {
            OperatorCommand::Quit => return Ok(ConsoleExit::Quit),
            OperatorCommand::Update => match supervisor.update_now() {
                Ok(outcome) => tracing::info!(?outcome, "update cycle finished"),
                Err(e) => tracing::error!("update cycle failed: {}", e),
            },
            OperatorCommand::Help => {
                writeln!(output, "{HELP_TEXT}")?;
                supervisor.forward_command(&line);
            }
            OperatorCommand::Forward(line) => {
                if !supervisor.forward_command(&line) {
                    writeln!(output, "no module is running")?;
                }
            }
            OperatorCommand::Empty => {}
        }
    }
    Ok(ConsoleExit::EndOfInput)
}
