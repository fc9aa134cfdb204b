//! Hook dispatch
//!
//! The host calls into [`HookDispatcher`] synchronously from its event path. Script
//! failures never propagate out of here: they are logged and returned as
//! [`DispatchOutcome::Invoked`] with an error.

use crate::event::{EventName, GENERIC_BINDING};
use crate::module::{HookCallable, LoadError};
use crate::registry::HookRegistry;
use crate::value::HostValue;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Result of delivering one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The active module does not define a hook for this call.
    NoHookDefined,
    /// A hook ran; `Err` carries what went wrong inside it.
    Invoked(Result<(), DispatchFailure>),
}

impl DispatchOutcome {
    pub fn was_invoked(&self) -> bool {
        matches!(self, DispatchOutcome::Invoked(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Invoked(Ok(())))
    }

    pub fn failure(&self) -> Option<&DispatchFailure> {
        match self {
            DispatchOutcome::Invoked(Err(failure)) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    /// The script threw, or the runtime refused the call.
    #[error("hook '{hook}' raised: {detail}")]
    RuntimeFault { hook: String, detail: String },

    /// Host code reached from the hook panicked.
    #[error("hook '{hook}' panicked in host code: {detail}")]
    HostPanic { hook: String, detail: String },
}

/// Builds a replacement registry from the active module's source.
pub(crate) type Rebuild = Box<dyn Fn() -> Result<HookRegistry, LoadError> + Send + Sync>;

/// Delivers events to the hooks of the currently published registry.
pub struct HookDispatcher {
    active: RwLock<Arc<HookRegistry>>,
    // Serializes every entry into the embedded runtime, and registry swaps against them.
    invocation: Mutex<()>,
    rebuild: Option<Rebuild>,
}

impl HookDispatcher {
    /// A dispatcher with nothing published; every dispatch returns `NoHookDefined`.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(HookRegistry::empty())),
            invocation: Mutex::new(()),
            rebuild: None,
        }
    }

    /// Like [`HookDispatcher::new`], but a generation poisoned by a host panic is replaced
    /// with whatever `rebuild` produces.
    pub(crate) fn with_rebuild(
        rebuild: impl Fn() -> Result<HookRegistry, LoadError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rebuild: Some(Box::new(rebuild)),
            ..Self::new()
        }
    }

    /// The registry in force right now.
    pub fn snapshot(&self) -> Arc<HookRegistry> {
        Arc::clone(&self.active.read())
    }

    /// Deliver `event` with `args` to its hook, if the active module defines one.
    ///
    /// # Panics
    ///
    /// Panics if `args` do not match the event's argument contract (see
    /// [`EventName::check_args`]). That is a host bug, never a script one.
    pub fn dispatch_event(&self, event: EventName, args: &[HostValue]) -> DispatchOutcome {
        if let Err(violation) = event.check_args(args) {
            panic!("hook dispatch precondition violated: {violation}");
        }

        let registry = self.snapshot();
        let Some(hook) = registry.lookup(event) else {
            return DispatchOutcome::NoHookDefined;
        };
        self.invoke(&registry, hook, event.as_str(), args)
    }

    /// Call the catch-all hook with an arbitrary argument list, forwarded in order.
    pub fn dispatch_generic(&self, args: &[HostValue]) -> DispatchOutcome {
        let registry = self.snapshot();
        let Some(hook) = registry.lookup_generic() else {
            return DispatchOutcome::NoHookDefined;
        };
        self.invoke(&registry, hook, GENERIC_BINDING, args)
    }

    /// Call any top-level function the active module exports.
    ///
    /// Used for operator-issued ad hoc calls. No argument contract is enforced.
    pub fn call_exported(&self, name: &str, args: &[HostValue]) -> DispatchOutcome {
        let registry = self.snapshot();
        let Some(hook) = registry.lookup_exported(name) else {
            return DispatchOutcome::NoHookDefined;
        };
        self.invoke(&registry, hook, name, args)
    }

    pub fn on_server_start(&self) -> DispatchOutcome {
        self.dispatch_typed(EventName::ServerStart, Vec::new)
    }

    pub fn on_server_stop(&self) -> DispatchOutcome {
        self.dispatch_typed(EventName::ServerStop, Vec::new)
    }

    pub fn on_player_login(&self, name: &str) -> DispatchOutcome {
        self.dispatch_typed(EventName::PlayerLogin, || vec![name.into()])
    }

    pub fn on_player_logout(&self, name: &str) -> DispatchOutcome {
        self.dispatch_typed(EventName::PlayerLogout, || vec![name.into()])
    }

    pub fn on_creature_death(&self, killer: &str, victim: &str) -> DispatchOutcome {
        self.dispatch_typed(EventName::CreatureDeath, || {
            vec![killer.into(), victim.into()]
        })
    }

    /// Swap in a new registry, waiting for any in-flight invocation to finish first.
    ///
    /// Returns the registry that was active before.
    pub(crate) fn publish(&self, registry: Arc<HookRegistry>) -> Arc<HookRegistry> {
        let _guard = self.invocation.lock();
        std::mem::replace(&mut *self.active.write(), registry)
    }

    /// Arguments are only built when the hook exists.
    fn dispatch_typed(
        &self,
        event: EventName,
        args: impl FnOnce() -> Vec<HostValue>,
    ) -> DispatchOutcome {
        let registry = self.snapshot();
        let Some(hook) = registry.lookup(event) else {
            return DispatchOutcome::NoHookDefined;
        };
        self.invoke(&registry, hook, event.as_str(), &args())
    }

    fn invoke(
        &self,
        registry: &HookRegistry,
        hook: &HookCallable,
        label: &str,
        args: &[HostValue],
    ) -> DispatchOutcome {
        let Some(module) = registry.module() else {
            return DispatchOutcome::NoHookDefined;
        };

        let result = {
            let _guard = self.invocation.lock();
            panic::catch_unwind(AssertUnwindSafe(|| module.invoke(hook, args)))
        };

        let failure = match result {
            Ok(Ok(())) => {
                debug!(target: "scripting", event = label, hook = hook.name(), "Hook completed");
                return DispatchOutcome::Invoked(Ok(()));
            }
            Ok(Err(detail)) => DispatchFailure::RuntimeFault {
                hook: hook.name().to_string(),
                detail,
            },
            Err(payload) => {
                module.mark_poisoned();
                DispatchFailure::HostPanic {
                    hook: hook.name().to_string(),
                    detail: panic_message(payload.as_ref()),
                }
            }
        };

        error!(
            target: "scripting",
            event = label,
            module = module.identity(),
            "{}",
            failure
        );
        if module.is_poisoned() {
            self.retire(registry);
        }
        DispatchOutcome::Invoked(Err(failure))
    }

    /// Replace a generation whose runtime can no longer be entered.
    ///
    /// Does nothing if a reload or shutdown already replaced it.
    fn retire(&self, poisoned: &HookRegistry) {
        let _guard = self.invocation.lock();
        if !std::ptr::eq(Arc::as_ptr(&self.active.read()), poisoned) {
            return;
        }

        let replacement = match &self.rebuild {
            Some(rebuild) => match rebuild() {
                Ok(registry) => {
                    info!(target: "scripting", "Script module rebuilt after a host panic");
                    registry
                }
                Err(err) => {
                    error!(
                        target: "scripting",
                        "Could not rebuild script module after a host panic: {}",
                        err
                    );
                    HookRegistry::empty()
                }
            },
            None => {
                warn!(target: "scripting", "Script module retired after a host panic");
                HookRegistry::empty()
            }
        };
        *self.active.write() = Arc::new(replacement);
    }
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{LoadOptions, ScriptModule};
    use crate::test_support::{inline, recording_options, Recorded};
    use serde_json::json;

    fn dispatcher_with(code: &str) -> (HookDispatcher, Recorded) {
        let (options, recorded) = recording_options();
        (dispatcher_from(code, &options), recorded)
    }

    fn dispatcher_from(code: &str, options: &LoadOptions) -> HookDispatcher {
        let module = ScriptModule::load(&inline(code), options).unwrap();
        let dispatcher = HookDispatcher::new();
        dispatcher.publish(Arc::new(HookRegistry::build(Arc::new(module))));
        dispatcher
    }

    #[test]
    fn nothing_published_means_no_hooks() {
        let dispatcher = HookDispatcher::new();
        for event in EventName::ALL {
            let args: Vec<HostValue> = event.parameters().iter().map(|p| (*p).into()).collect();
            assert_eq!(dispatcher.dispatch_event(event, &args), DispatchOutcome::NoHookDefined);
        }
        assert_eq!(dispatcher.dispatch_generic(&[]), DispatchOutcome::NoHookDefined);
    }

    #[test]
    fn login_only_module() {
        let (dispatcher, recorded) =
            dispatcher_with("function on_player_login(name) { record('login', name); }");

        let outcome = dispatcher.dispatch_event(EventName::PlayerLogin, &["Alice".into()]);
        assert_eq!(outcome, DispatchOutcome::Invoked(Ok(())));
        assert_eq!(
            dispatcher.dispatch_event(EventName::ServerStart, &[]),
            DispatchOutcome::NoHookDefined
        );
        assert_eq!(*recorded.lock(), ["login|Alice"]);
    }

    #[test]
    fn each_dispatch_invokes_exactly_once_with_documented_arguments() {
        let (dispatcher, recorded) = dispatcher_with(
            r#"
            function on_server_start() { record('start', arguments.length); }
            function on_server_stop() { record('stop', arguments.length); }
            function on_player_login(name) { record('login', arguments.length, name); }
            function on_player_logout(name) { record('logout', arguments.length, name); }
            function on_creature_death(killer, victim) {
                record('death', arguments.length, killer, victim);
            }
            "#,
        );

        assert!(dispatcher.on_server_start().is_success());
        assert!(dispatcher.on_player_login("Alice").is_success());
        assert!(dispatcher.on_creature_death("Orc", "Hero").is_success());
        assert!(dispatcher.on_player_logout("Alice").is_success());
        assert!(dispatcher.on_server_stop().is_success());

        assert_eq!(
            *recorded.lock(),
            [
                "start|0",
                "login|1|Alice",
                "death|2|Orc|Hero",
                "logout|1|Alice",
                "stop|0",
            ]
        );
    }

    #[test]
    fn raising_hook_is_isolated() {
        let (dispatcher, recorded) = dispatcher_with(
            r#"
            function on_creature_death(killer, victim) { throw new Error(killer + ' vanished'); }
            function on_player_logout(name) { record('logout', name); }
            "#,
        );

        let outcome =
            dispatcher.dispatch_event(EventName::CreatureDeath, &["Orc".into(), "Hero".into()]);
        match outcome.failure() {
            Some(DispatchFailure::RuntimeFault { hook, detail }) => {
                assert_eq!(hook, "on_creature_death");
                assert!(detail.contains("Orc vanished"), "{detail}");
            }
            other => panic!("expected a runtime fault, got {other:?}"),
        }

        let outcome = dispatcher.dispatch_event(EventName::PlayerLogout, &["Alice".into()]);
        assert!(outcome.is_success());
        assert_eq!(*recorded.lock(), ["logout|Alice"]);
    }

    #[test]
    fn failed_hook_is_not_retried() {
        let (dispatcher, recorded) = dispatcher_with(
            "function on_server_start() { record('start'); throw new Error('once'); }",
        );
        assert!(dispatcher.on_server_start().failure().is_some());
        assert_eq!(recorded.lock().len(), 1);
    }

    #[test]
    fn generic_forwards_arguments_unchanged() {
        let (dispatcher, recorded) =
            dispatcher_with("function some_func(...args) { record(JSON.stringify(args)); }");

        let outcome = dispatcher.dispatch_generic(&["x".into(), "y".into(), "z".into()]);
        assert!(outcome.is_success());

        let outcome = dispatcher.dispatch_generic(&["id".into(), json!({"level": 3}).into()]);
        assert!(outcome.is_success());

        assert_eq!(
            *recorded.lock(),
            [r#"["x","y","z"]"#, r#"["id",{"level":3}]"#]
        );
    }

    #[test]
    fn call_exported_reaches_any_function() {
        let (dispatcher, recorded) =
            dispatcher_with("function give_item(player, item) { record(player, item); }");

        assert!(dispatcher
            .call_exported("give_item", &["Alice".into(), "sword".into()])
            .is_success());
        assert_eq!(
            dispatcher.call_exported("take_item", &[]),
            DispatchOutcome::NoHookDefined
        );
        assert_eq!(*recorded.lock(), ["Alice|sword"]);
    }

    #[test]
    fn host_panic_is_contained() {
        let (dispatcher, _) =
            dispatcher_with("function on_server_stop() { explode('host exploded'); }");

        match dispatcher.on_server_stop().failure() {
            Some(DispatchFailure::HostPanic { detail, .. }) => {
                assert!(detail.contains("host exploded"), "{detail}")
            }
            other => panic!("expected a host panic, got {other:?}"),
        }
    }

    #[test]
    fn host_panic_without_rebuild_retires_the_module() {
        let (dispatcher, recorded) = dispatcher_with(
            r#"
            function on_server_stop() { explode('boom'); }
            function on_player_logout(name) { record('logout', name); }
            "#,
        );
        let poisoned = dispatcher.snapshot();

        assert!(dispatcher.on_server_stop().failure().is_some());
        assert!(poisoned.module().unwrap().is_poisoned());
        assert!(dispatcher.snapshot().is_empty());
        assert_eq!(dispatcher.on_player_logout("Alice"), DispatchOutcome::NoHookDefined);
        assert!(recorded.lock().is_empty());
    }

    #[test]
    fn host_panic_rebuilds_the_module() {
        let (options, recorded) = recording_options();
        let code = r#"
            record('init');
            function on_server_stop() { explode('boom'); }
            function on_player_logout(name) { record('logout', name); }
        "#;
        let rebuild_options = options.clone();
        let dispatcher = HookDispatcher::with_rebuild(move || {
            let module = ScriptModule::load(&inline(code), &rebuild_options)?;
            Ok(HookRegistry::build(Arc::new(module)))
        });
        let module = ScriptModule::load(&inline(code), &options).unwrap();
        dispatcher.publish(Arc::new(HookRegistry::build(Arc::new(module))));

        match dispatcher.on_server_stop().failure() {
            Some(DispatchFailure::HostPanic { hook, detail }) => {
                assert_eq!(hook, "on_server_stop");
                assert_eq!(detail, "boom");
            }
            other => panic!("expected a host panic, got {other:?}"),
        }

        // Unrelated hooks keep working on the rebuilt generation, and so does the same one.
        assert!(dispatcher.on_player_logout("Alice").is_success());
        assert!(dispatcher.on_player_logout("Bob").is_success());
        assert!(matches!(
            dispatcher.on_server_stop().failure(),
            Some(DispatchFailure::HostPanic { .. })
        ));
        assert!(dispatcher.on_player_logout("Carol").is_success());
        assert_eq!(
            *recorded.lock(),
            ["init", "init", "logout|Alice", "logout|Bob", "init", "logout|Carol"]
        );
    }

    #[test]
    #[should_panic(expected = "precondition violated")]
    fn wrong_arity_from_host_panics() {
        let (dispatcher, _) = dispatcher_with("function on_creature_death(k, v) {}");
        dispatcher.dispatch_event(EventName::CreatureDeath, &["Orc".into()]);
    }

    #[test]
    fn publish_returns_previous_registry() {
        let (dispatcher, _) = dispatcher_with("function on_server_start() {}");
        let previous = dispatcher.publish(Arc::new(HookRegistry::empty()));
        assert!(previous.lookup(EventName::ServerStart).is_some());
        assert_eq!(dispatcher.on_server_start(), DispatchOutcome::NoHookDefined);
    }
}
