//! Operator admin commands (`!script ...`)

use ember_script::{DispatchOutcome, EventName, HookDispatcher, HostValue, GENERIC_BINDING};
use thiserror::Error;

pub const COMMAND_PREFIX: &str = "!script";

pub const USAGE: &str = "usage: !script reload | !script call <function> [args...]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Reload the active script module from its source.
    Reload,
    /// Call an exported script function with text arguments.
    Call { function: String, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{}", USAGE)]
    Usage,

    #[error("unknown subcommand '{0}'; {usage}", usage = USAGE)]
    UnknownSubcommand(String),
}

/// Parse an operator line. Returns `None` when the line is not a `!script` command at all.
pub fn parse(line: &str) -> Option<Result<AdminCommand, CommandError>> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    if !head.eq_ignore_ascii_case(COMMAND_PREFIX) {
        return None;
    }

    let Some(subcommand) = words.next() else {
        return Some(Err(CommandError::Usage));
    };

    let command = match subcommand.to_ascii_lowercase().as_str() {
        "reload" if words.next().is_none() => Ok(AdminCommand::Reload),
        "reload" => Err(CommandError::Usage),
        "call" => match words.next() {
            Some(function) => Ok(AdminCommand::Call {
                function: function.to_string(),
                args: words.map(str::to_string).collect(),
            }),
            None => Err(CommandError::Usage),
        },
        _ => Err(CommandError::UnknownSubcommand(subcommand.to_string())),
    };
    Some(command)
}

/// Route a `call` command to the matching dispatcher entry point.
///
/// The catch-all name goes through the generic path and an event binding name through
/// its event when the argument count fits; anything else is an ad hoc exported call.
pub fn dispatch_call(
    dispatcher: &HookDispatcher,
    function: &str,
    args: &[String],
) -> DispatchOutcome {
    let args: Vec<HostValue> = args.iter().map(|arg| HostValue::from(arg.as_str())).collect();

    if function == GENERIC_BINDING {
        return dispatcher.dispatch_generic(&args);
    }
    match EventName::from_binding_name(function) {
        Some(event) if event.arity() == args.len() => dispatcher.dispatch_event(event, &args),
        _ => dispatcher.call_exported(function, &args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reload_case_insensitively() {
        assert_eq!(parse("!script reload"), Some(Ok(AdminCommand::Reload)));
        assert_eq!(parse("  !SCRIPT Reload  "), Some(Ok(AdminCommand::Reload)));
    }

    #[test]
    fn parses_call_with_arguments() {
        assert_eq!(
            parse("!script call give_item Alice sword"),
            Some(Ok(AdminCommand::Call {
                function: "give_item".to_string(),
                args: vec!["Alice".to_string(), "sword".to_string()],
            }))
        );
        assert_eq!(
            parse("!script CALL some_func"),
            Some(Ok(AdminCommand::Call {
                function: "some_func".to_string(),
                args: Vec::new(),
            }))
        );
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("!scripts reload"), None);
        assert_eq!(parse("login Alice"), None);
    }

    #[test]
    fn reports_usage_errors() {
        assert_eq!(parse("!script"), Some(Err(CommandError::Usage)));
        assert_eq!(parse("!script call"), Some(Err(CommandError::Usage)));
        assert_eq!(parse("!script reload now"), Some(Err(CommandError::Usage)));
        assert_eq!(
            parse("!script restart"),
            Some(Err(CommandError::UnknownSubcommand("restart".to_string())))
        );
    }

    #[test]
    fn errors_include_usage() {
        assert_eq!(CommandError::Usage.to_string(), USAGE);
        assert_eq!(
            CommandError::UnknownSubcommand("restart".to_string()).to_string(),
            format!("unknown subcommand 'restart'; {USAGE}")
        );
    }

    #[test]
    fn call_without_module_is_a_no_op() {
        let dispatcher = HookDispatcher::new();
        let args = vec!["Alice".to_string()];
        assert_eq!(
            dispatch_call(&dispatcher, "on_player_login", &args),
            DispatchOutcome::NoHookDefined
        );
        assert_eq!(
            dispatch_call(&dispatcher, GENERIC_BINDING, &args),
            DispatchOutcome::NoHookDefined
        );
        assert_eq!(
            dispatch_call(&dispatcher, "give_item", &args),
            DispatchOutcome::NoHookDefined
        );
    }

    #[test]
    fn event_binding_with_wrong_arity_does_not_panic() {
        let dispatcher = HookDispatcher::new();
        let outcome = dispatch_call(&dispatcher, "on_creature_death", &["Orc".to_string()]);
        assert_eq!(outcome, DispatchOutcome::NoHookDefined);
    }
}
