//! Interactive console commands
//!
//! One command per line, mirroring the bench's front-panel buttons.

use crate::core::bench::BenchCommand;

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Forward to the bench
    Bench(BenchCommand),
    /// Print the current view
    Status,
    /// Print the command list
    Help,
    /// Leave the console
    Quit,
}

/// Help text for the console
pub const HELP: &str = "\
Commands:
  connect            search for the bench and attach it
  start              start a test
  stop               stop the running test
  return | reverse   drive the crosshead back to the start
  tare               zero the load cell
  switchdir          flip the travel direction
  clear              drop the recorded samples
  save <name>        export the samples as <prefix><name>
  status             show state, status and sample count
  disconnect         stop the bench and release the port
  help               show this list
  quit               disconnect and exit";

/// Parse one console line; blank lines yield `Ok(None)`
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    let Some(word) = line.split_whitespace().next() else {
        return Ok(None);
    };
    let rest = line[word.len()..].trim();

    let command = match word.to_ascii_lowercase().as_str() {
        "connect" => ConsoleCommand::Bench(BenchCommand::Connect),
        "start" | "go" => ConsoleCommand::Bench(BenchCommand::Start),
        "stop" => ConsoleCommand::Bench(BenchCommand::Stop),
        "return" | "reverse" => ConsoleCommand::Bench(BenchCommand::Reverse),
        "tare" => ConsoleCommand::Bench(BenchCommand::Tare),
        "switchdir" | "switch" => ConsoleCommand::Bench(BenchCommand::SwitchDirection),
        "clear" => ConsoleCommand::Bench(BenchCommand::Clear),
        "save" => {
            if rest.is_empty() {
                return Err("usage: save <name>".to_string());
            }
            ConsoleCommand::Bench(BenchCommand::Save(rest.to_string()))
        }
        "disconnect" => ConsoleCommand::Bench(BenchCommand::Disconnect),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };

    let takes_argument = matches!(command, ConsoleCommand::Bench(BenchCommand::Save(_)));
    if !takes_argument && !rest.is_empty() {
        return Err(format!("'{word}' takes no arguments"));
    }
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_words() {
        assert_eq!(
            parse_command("connect").unwrap(),
            Some(ConsoleCommand::Bench(BenchCommand::Connect))
        );
        assert_eq!(
            parse_command("  Return ").unwrap(),
            Some(ConsoleCommand::Bench(BenchCommand::Reverse))
        );
        assert_eq!(
            parse_command("switchdir").unwrap(),
            Some(ConsoleCommand::Bench(BenchCommand::SwitchDirection))
        );
        assert_eq!(parse_command("quit").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("").unwrap(), None);
    }

    #[test]
    fn test_save_takes_name() {
        assert_eq!(
            parse_command("save column 3").unwrap(),
            Some(ConsoleCommand::Bench(BenchCommand::Save("column 3".into())))
        );
        assert!(parse_command("save").is_err());
    }

    #[test]
    fn test_rejects_unknown_and_extra_args() {
        assert!(parse_command("launch").is_err());
        assert!(parse_command("start now").is_err());
    }
}
