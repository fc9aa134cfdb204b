//! Ember Scripting Layer
//!
//! Loads an operator-supplied JavaScript module into an embedded QuickJS runtime and
//! dispatches server lifecycle events to the hooks it defines.
//!
//! ## Architecture
//!
//! - **ValueBridge** ([`value`]): host values in, script return values discarded
//! - **ScriptModule** ([`module`]): one loaded and initialized script generation
//! - **HookRegistry** ([`registry`]): closed event-to-callable table, built once per module
//! - **HookDispatcher** ([`dispatcher`]): the API the host calls on every event
//! - **LifecycleController** ([`lifecycle`]): load / reload / shutdown state machine
//!
//! ## Binding convention
//!
//! | Event            | Script function      | Arguments          |
//! |------------------|----------------------|--------------------|
//! | `server_start`   | `on_server_start`    | none               |
//! | `server_stop`    | `on_server_stop`     | none               |
//! | `player_login`   | `on_player_login`    | `name`             |
//! | `player_logout`  | `on_player_logout`   | `name`             |
//! | `creature_death` | `on_creature_death`  | `killer`, `victim` |
//! | catch-all        | `some_func`          | anything           |
//!
//! ## Limitations
//!
//! A hook runs to completion. There is no way to cancel a hook that never returns, and a
//! hook must not dispatch back into the same [`HookDispatcher`] while it runs.

pub mod dispatcher;
pub mod event;
pub mod lifecycle;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod value;

pub use dispatcher::{DispatchFailure, DispatchOutcome, HookDispatcher};
pub use event::{EventName, PreconditionViolation, GENERIC_BINDING};
pub use lifecycle::{LifecycleController, LifecycleError, LifecycleState};
pub use module::{HookCallable, LoadError, LoadOptions, ScriptModule, ScriptSource};
pub use registry::HookRegistry;
pub use runtime::HostApi;
pub use value::HostValue;

pub use rquickjs;
