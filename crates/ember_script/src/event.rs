//! Known server events and their script binding names

use crate::value::HostValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the catch-all hook used for host-triggered ad hoc calls.
pub const GENERIC_BINDING: &str = "some_func";

/// A lifecycle or game event the host can notify scripts about.
///
/// The set is fixed; scripts cannot introduce new events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    ServerStart,
    ServerStop,
    PlayerLogin,
    PlayerLogout,
    CreatureDeath,
}

impl EventName {
    pub const COUNT: usize = 5;

    pub const ALL: [EventName; Self::COUNT] = [
        EventName::ServerStart,
        EventName::ServerStop,
        EventName::PlayerLogin,
        EventName::PlayerLogout,
        EventName::CreatureDeath,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::ServerStart => "server_start",
            EventName::ServerStop => "server_stop",
            EventName::PlayerLogin => "player_login",
            EventName::PlayerLogout => "player_logout",
            EventName::CreatureDeath => "creature_death",
        }
    }

    /// The top-level script function bound to this event.
    ///
    /// These names are the contract with script authors and must not change.
    pub fn binding_name(self) -> &'static str {
        match self {
            EventName::ServerStart => "on_server_start",
            EventName::ServerStop => "on_server_stop",
            EventName::PlayerLogin => "on_player_login",
            EventName::PlayerLogout => "on_player_logout",
            EventName::CreatureDeath => "on_creature_death",
        }
    }

    /// Parameter names, in the order the hook receives them.
    pub fn parameters(self) -> &'static [&'static str] {
        match self {
            EventName::ServerStart | EventName::ServerStop => &[],
            EventName::PlayerLogin | EventName::PlayerLogout => &["name"],
            EventName::CreatureDeath => &["killer", "victim"],
        }
    }

    pub fn arity(self) -> usize {
        self.parameters().len()
    }

    pub fn from_binding_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.binding_name() == name)
    }

    /// Check that `args` match this event's argument contract: the right count, all text.
    pub fn check_args(self, args: &[HostValue]) -> Result<(), PreconditionViolation> {
        if args.len() != self.arity() {
            return Err(PreconditionViolation::ArityMismatch {
                event: self,
                expected: self.arity(),
                actual: args.len(),
            });
        }

        for (parameter, arg) in self.parameters().iter().zip(args) {
            if arg.as_text().is_none() {
                return Err(PreconditionViolation::NonTextArgument {
                    event: self,
                    parameter: *parameter,
                });
            }
        }

        Ok(())
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for EventName {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// The host passed arguments that do not match an event's contract.
///
/// This is a host programming error, not something a script can cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionViolation {
    #[error("event '{event}' takes {expected} argument(s) but the host passed {actual}")]
    ArityMismatch {
        event: EventName,
        expected: usize,
        actual: usize,
    },

    #[error("event '{event}' expects text for '{parameter}'")]
    NonTextArgument {
        event: EventName,
        parameter: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indices_match_declaration_order() {
        for (position, event) in EventName::ALL.into_iter().enumerate() {
            assert_eq!(event.index(), position);
        }
    }

    #[test]
    fn binding_names_round_trip() {
        for event in EventName::ALL {
            assert_eq!(EventName::from_binding_name(event.binding_name()), Some(event));
            assert_eq!(event.as_str().parse::<EventName>(), Ok(event));
        }
        assert_eq!(EventName::from_binding_name(GENERIC_BINDING), None);
        assert!("player_kick".parse::<EventName>().is_err());
    }

    #[test]
    fn creature_death_takes_killer_then_victim() {
        assert_eq!(EventName::CreatureDeath.parameters(), &["killer", "victim"]);
        assert!(EventName::CreatureDeath
            .check_args(&["Orc".into(), "Hero".into()])
            .is_ok());
    }

    #[test]
    fn wrong_arity_is_a_violation() {
        assert_eq!(
            EventName::PlayerLogin.check_args(&[]),
            Err(PreconditionViolation::ArityMismatch {
                event: EventName::PlayerLogin,
                expected: 1,
                actual: 0,
            })
        );
        assert!(EventName::ServerStart.check_args(&["extra".into()]).is_err());
    }

    #[test]
    fn non_text_argument_is_a_violation() {
        assert_eq!(
            EventName::PlayerLogout.check_args(&[json!(42).into()]),
            Err(PreconditionViolation::NonTextArgument {
                event: EventName::PlayerLogout,
                parameter: "name",
            })
        );
    }
}
