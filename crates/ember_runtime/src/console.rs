//! Operator console lines

use ember_services::command::{self, AdminCommand, CommandError};

pub const HELP: &str =
    "commands: login <name> | logout <name> | death <killer> <victim> | !script ... | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLine {
    Login(String),
    Logout(String),
    Death { killer: String, victim: String },
    Admin(Result<AdminCommand, CommandError>),
    Quit,
    Empty,
    /// Anything else, kept verbatim for the error message.
    Unknown(String),
}

pub fn parse_line(line: &str) -> ConsoleLine {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleLine::Empty;
    }
    if let Some(admin) = command::parse(line) {
        return ConsoleLine::Admin(admin);
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["login", name] => ConsoleLine::Login(name.to_string()),
        ["logout", name] => ConsoleLine::Logout(name.to_string()),
        ["death", killer, victim] => ConsoleLine::Death {
            killer: killer.to_string(),
            victim: victim.to_string(),
        },
        ["quit"] | ["exit"] => ConsoleLine::Quit,
        _ => ConsoleLine::Unknown(line.to_string()),
    }
}
