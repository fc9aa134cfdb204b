//! The game-server side of the scripting layer

use crate::console::{ConsoleLine, HELP};
use anyhow::{Context, Result};
use ember_script::{DispatchOutcome, HookDispatcher, LifecycleController, LifecycleState};
use ember_services::command::{self, AdminCommand};
use ember_services::ScriptingSettings;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Owns the scripting lifecycle and turns console input into dispatches.
pub struct Host {
    scripting: Option<Arc<LifecycleController>>,
    dispatcher: Arc<HookDispatcher>,
}

impl Host {
    /// Build the host and perform the initial load. A module that fails to load is logged
    /// and the server keeps running without hooks.
    pub fn new(settings: &ScriptingSettings) -> Result<Self> {
        if !settings.enabled {
            info!(target: "scripting", "Scripting disabled");
            return Ok(Self::disabled());
        }

        let source = settings.source().context("invalid scripting settings")?;
        let controller = LifecycleController::new(source, settings.load_options());
        let host = Self::with_controller(Arc::new(controller));
        host.load();
        Ok(host)
    }

    pub fn disabled() -> Self {
        Self {
            scripting: None,
            dispatcher: Arc::new(HookDispatcher::new()),
        }
    }

    pub fn with_controller(controller: Arc<LifecycleController>) -> Self {
        Self {
            dispatcher: controller.dispatcher(),
            scripting: Some(controller),
        }
    }

    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.scripting.as_ref().map(|controller| controller.state())
    }

    pub fn start(&self) -> DispatchOutcome {
        report("server_start", self.dispatcher.on_server_start())
    }

    /// Deliver `server_stop`, then unload the module.
    pub fn stop(&self) -> DispatchOutcome {
        let outcome = report("server_stop", self.dispatcher.on_server_stop());
        if let Some(controller) = &self.scripting {
            controller.shutdown();
        }
        outcome
    }

    /// Act on one console line. A reload is started in the background and not awaited.
    pub fn handle(&self, line: ConsoleLine) -> Flow {
        match line {
            ConsoleLine::Login(name) => {
                report("player_login", self.dispatcher.on_player_login(&name));
            }
            ConsoleLine::Logout(name) => {
                report("player_logout", self.dispatcher.on_player_logout(&name));
            }
            ConsoleLine::Death { killer, victim } => {
                report(
                    "creature_death",
                    self.dispatcher.on_creature_death(&killer, &victim),
                );
            }
            ConsoleLine::Admin(Ok(AdminCommand::Reload)) => {
                self.reload();
            }
            ConsoleLine::Admin(Ok(AdminCommand::Call { function, args })) => {
                let outcome = command::dispatch_call(&self.dispatcher, &function, &args);
                if outcome == DispatchOutcome::NoHookDefined {
                    warn!("No script function named '{}'", function);
                } else {
                    report(&function, outcome);
                }
            }
            ConsoleLine::Admin(Err(err)) => warn!("{}", err),
            ConsoleLine::Quit => return Flow::Quit,
            ConsoleLine::Empty => {}
            ConsoleLine::Unknown(line) => warn!("Unknown command '{}'; {}", line, HELP),
        }
        Flow::Continue
    }

    /// Start a reload on a blocking worker. Console events keep dispatching to the old
    /// module until the new one is published. Must be called from within a tokio runtime.
    pub fn reload(&self) -> Option<JoinHandle<()>> {
        let Some(controller) = &self.scripting else {
            warn!(target: "scripting", "Scripting is disabled; nothing to reload");
            return None;
        };

        let controller = Arc::clone(controller);
        let worker = tokio::task::spawn_blocking(move || controller.request_reload());
        Some(tokio::spawn(async move {
            match worker.await {
                Ok(Ok(_)) => info!(target: "scripting", "Script reload complete"),
                // The controller already logged the load error.
                Ok(Err(err)) => debug!(target: "scripting", "Reload rejected: {}", err),
                Err(err) => error!(target: "scripting", "Reload worker failed: {}", err),
            }
        }))
    }

    fn load(&self) {
        if let Some(controller) = &self.scripting {
            if let Err(err) = controller.load() {
                warn!(
                    target: "scripting",
                    "Continuing without script hooks: {}",
                    err
                );
            }
        }
    }
}

fn report(what: &str, outcome: DispatchOutcome) -> DispatchOutcome {
    match &outcome {
        DispatchOutcome::NoHookDefined => debug!(target: "scripting", "No hook for {}", what),
        DispatchOutcome::Invoked(Ok(())) => debug!(target: "scripting", "Dispatched {}", what),
        // Failures are logged by the dispatcher.
        DispatchOutcome::Invoked(Err(_)) => {}
    }
    outcome
}
