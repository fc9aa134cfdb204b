//! Ember Services Layer
//!
//! Host-side plumbing around the scripting layer: settings files and operator console
//! commands.

pub mod command;
pub mod settings;

pub use command::{AdminCommand, CommandError};
pub use settings::{ScriptingSettings, Settings, SettingsError};
