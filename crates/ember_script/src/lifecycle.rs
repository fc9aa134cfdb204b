//! Load / reload / shutdown state machine
//!
//! ```text
//! Uninitialized ─► Loading ─► Active ─► Reloading ─► Active ─► ... ─► Unloaded
//!                     │                    │
//!                     ▼                    ▼
//!                  Failed            Active (old module kept, error latched)
//! ```
//!
//! [`LifecycleController`] is the only thing that publishes registries to the dispatcher.
//! The one exception is a generation poisoned by a host panic: the dispatcher replaces it
//! with a fresh build from the same source, using the loader the controller gave it.

use crate::dispatcher::HookDispatcher;
use crate::module::{LoadError, LoadOptions, ScriptModule, ScriptSource};
use crate::registry::HookRegistry;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Active,
    Reloading,
    /// The first load failed; no module is active.
    Failed,
    Unloaded,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Loading => "loading",
            LifecycleState::Active => "active",
            LifecycleState::Reloading => "reloading",
            LifecycleState::Failed => "failed",
            LifecycleState::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("a script module is already active; request a reload instead")]
    AlreadyLoaded,

    #[error("the scripting layer has been shut down")]
    ShutDown,
}

struct Status {
    state: LifecycleState,
    last_error: Option<LoadError>,
    generation: u64,
}

/// Owns which script module is active and publishes its registry.
pub struct LifecycleController {
    source: ScriptSource,
    options: LoadOptions,
    dispatcher: Arc<HookDispatcher>,
    status: RwLock<Status>,
    // Held for the whole of a transition so loads and reloads never interleave.
    transition: Mutex<()>,
}

impl LifecycleController {
    pub fn new(source: ScriptSource, options: LoadOptions) -> Self {
        let dispatcher = {
            let source = source.clone();
            let options = options.clone();
            HookDispatcher::with_rebuild(move || build_registry(&source, &options))
        };

        Self {
            source,
            options,
            dispatcher: Arc::new(dispatcher),
            status: RwLock::new(Status {
                state: LifecycleState::Uninitialized,
                last_error: None,
                generation: 0,
            }),
            transition: Mutex::new(()),
        }
    }

    /// The dispatcher the host should call on every event.
    pub fn dispatcher(&self) -> Arc<HookDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    pub fn state(&self) -> LifecycleState {
        self.status.read().state
    }

    /// The most recent load or reload failure, kept until a later load succeeds.
    pub fn last_error(&self) -> Option<LoadError> {
        self.status.read().last_error.clone()
    }

    /// Number of modules successfully published so far.
    pub fn generation(&self) -> u64 {
        self.status.read().generation
    }

    /// Initial load. On failure the layer stays [`LifecycleState::Failed`] and every
    /// dispatch returns `NoHookDefined`.
    pub fn load(&self) -> Result<LifecycleState, LifecycleError> {
        let _transition = self.transition.lock();
        match self.state() {
            LifecycleState::Uninitialized | LifecycleState::Failed => self.load_locked(),
            LifecycleState::Unloaded => Err(LifecycleError::ShutDown),
            LifecycleState::Loading | LifecycleState::Active | LifecycleState::Reloading => {
                Err(LifecycleError::AlreadyLoaded)
            }
        }
    }

    /// Replace the active module with a freshly loaded one from the same source.
    ///
    /// The new registry is only published once the new module has fully loaded; on
    /// failure the previous module stays active and the error is latched. Requesting a
    /// reload before anything loaded performs the initial load.
    pub fn request_reload(&self) -> Result<LifecycleState, LifecycleError> {
        let _transition = self.transition.lock();
        match self.state() {
            LifecycleState::Unloaded => return Err(LifecycleError::ShutDown),
            LifecycleState::Uninitialized | LifecycleState::Failed => return self.load_locked(),
            LifecycleState::Loading | LifecycleState::Active | LifecycleState::Reloading => {}
        }

        self.set_state(LifecycleState::Reloading);
        info!(target: "scripting", source = %self.source.identity(), "Reloading script module");

        match self.build() {
            Ok(registry) => Ok(self.activate(registry)),
            Err(err) => {
                error!(
                    target: "scripting",
                    "Reload failed, keeping the previous module: {}",
                    err
                );
                let mut status = self.status.write();
                status.state = LifecycleState::Active;
                status.last_error = Some(err.clone());
                Err(err.into())
            }
        }
    }

    /// Unpublish the active module. Dispatches afterwards return `NoHookDefined`.
    ///
    /// Does not deliver `server_stop`; the host does that before shutting down.
    pub fn shutdown(&self) -> LifecycleState {
        let _transition = self.transition.lock();
        if self.state() == LifecycleState::Unloaded {
            return LifecycleState::Unloaded;
        }

        let previous = self.dispatcher.publish(Arc::new(HookRegistry::empty()));
        self.set_state(LifecycleState::Unloaded);
        match previous.module() {
            Some(module) => info!(
                target: "scripting",
                module = module.identity(),
                "Script module unloaded"
            ),
            None => info!(target: "scripting", "Scripting shut down with no active module"),
        }
        LifecycleState::Unloaded
    }

    fn load_locked(&self) -> Result<LifecycleState, LifecycleError> {
        self.set_state(LifecycleState::Loading);
        info!(target: "scripting", source = %self.source.identity(), "Loading script module");

        match self.build() {
            Ok(registry) => Ok(self.activate(registry)),
            Err(err) => {
                error!(target: "scripting", "Script module failed to load: {}", err);
                let mut status = self.status.write();
                status.state = LifecycleState::Failed;
                status.last_error = Some(err.clone());
                Err(err.into())
            }
        }
    }

    fn build(&self) -> Result<HookRegistry, LoadError> {
        build_registry(&self.source, &self.options)
    }

    fn activate(&self, registry: HookRegistry) -> LifecycleState {
        let registry = Arc::new(registry);

        let previous = self.dispatcher.publish(Arc::clone(&registry));
        {
            let mut status = self.status.write();
            status.state = LifecycleState::Active;
            status.last_error = None;
            status.generation += 1;
        }
        // The old module is released once the last in-flight dispatch drops its snapshot.
        drop(previous);
        LifecycleState::Active
    }

    fn set_state(&self, state: LifecycleState) {
        self.status.write().state = state;
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("source", &self.source)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn build_registry(
    source: &ScriptSource,
    options: &LoadOptions,
) -> Result<HookRegistry, LoadError> {
    let module = ScriptModule::load(source, options)?;
    let registry = HookRegistry::build(Arc::new(module));
    log_registry(&registry);
    Ok(registry)
}

fn log_registry(registry: &HookRegistry) {
    let Some(module) = registry.module() else {
        return;
    };

    let hooks: Vec<&str> = registry.bound_events().map(|event| event.as_str()).collect();
    info!(
        target: "scripting",
        module = module.identity(),
        exports = module.exports().len(),
        generic = registry.lookup_generic().is_some(),
        "Script module loaded with hooks {:?}",
        hooks
    );

    for (event, hook) in registry.arity_mismatches() {
        warn!(
            target: "scripting",
            "Hook '{}' declares {} parameter(s); '{}' passes {}",
            hook.name(),
            hook.arity(),
            event,
            event.arity()
        );
    }
}
