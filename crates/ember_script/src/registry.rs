use crate::event::{EventName, GENERIC_BINDING};
use crate::module::{HookCallable, ScriptModule};
use std::sync::Arc;

/// Immutable event-to-hook table for one module generation.
///
/// Entries are indices into the module's callables; the registry keeps the module alive
/// for as long as any snapshot of it is in use.
#[derive(Debug)]
pub struct HookRegistry {
    module: Option<Arc<ScriptModule>>,
    events: [Option<usize>; EventName::COUNT],
    generic: Option<usize>,
}

impl HookRegistry {
    /// A registry with no module behind it. Every lookup misses.
    pub fn empty() -> Self {
        Self {
            module: None,
            events: [None; EventName::COUNT],
            generic: None,
        }
    }

    /// Bind each known event to the function exported under its binding name.
    ///
    /// Only inspects what the module already defined; no script code runs.
    pub fn build(module: Arc<ScriptModule>) -> Self {
        let mut events = [None; EventName::COUNT];
        for event in EventName::ALL {
            events[event.index()] = module.callable_index(event.binding_name());
        }
        let generic = module.callable_index(GENERIC_BINDING);

        Self {
            module: Some(module),
            events,
            generic,
        }
    }

    pub fn lookup(&self, event: EventName) -> Option<&HookCallable> {
        self.resolve(self.events[event.index()])
    }

    pub fn lookup_generic(&self) -> Option<&HookCallable> {
        self.resolve(self.generic)
    }

    /// Any exported top-level function, by name.
    pub fn lookup_exported(&self, name: &str) -> Option<&HookCallable> {
        let module = self.module.as_deref()?;
        module.callable(module.callable_index(name)?)
    }

    pub fn module(&self) -> Option<&Arc<ScriptModule>> {
        self.module.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.module.is_none()
    }

    /// Events that have a hook in this generation.
    pub fn bound_events(&self) -> impl Iterator<Item = EventName> + '_ {
        EventName::ALL
            .into_iter()
            .filter(|event| self.events[event.index()].is_some())
    }

    /// Bound hooks whose declared parameter count differs from the event's argument count.
    pub fn arity_mismatches(&self) -> impl Iterator<Item = (EventName, &HookCallable)> + '_ {
        self.bound_events().filter_map(|event| {
            let hook = self.lookup(event)?;
            (hook.arity() as usize != event.arity()).then_some((event, hook))
        })
    }

    fn resolve(&self, index: Option<usize>) -> Option<&HookCallable> {
        self.module.as_deref()?.callable(index?)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::empty()
    }
}
