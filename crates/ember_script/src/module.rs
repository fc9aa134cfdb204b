//! Script module loading
//!
//! A [`ScriptModule`] is one initialized generation of the operator's script: its own
//! runtime, the top-level functions it defined, and when it was loaded. It is never
//! mutated after [`ScriptModule::load`] returns; a reload builds a new one.

use crate::event::{EventName, GENERIC_BINDING};
use crate::runtime::{self, HostApi, RuntimeLimits, ScriptRuntime};
use crate::value::{self, HostValue};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Persistent, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

/// Where a module's source text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline { name: String, code: String },
}

impl ScriptSource {
    /// Human-readable identity used in logs and errors.
    pub fn identity(&self) -> String {
        match self {
            ScriptSource::File(path) => path.display().to_string(),
            ScriptSource::Inline { name, .. } => name.clone(),
        }
    }

    fn read(&self) -> Result<String, LoadError> {
        match self {
            ScriptSource::File(path) => {
                std::fs::read_to_string(path).map_err(|err| LoadError::SourceUnavailable {
                    identity: self.identity(),
                    detail: err.to_string(),
                })
            }
            ScriptSource::Inline { code, .. } => Ok(code.clone()),
        }
    }
}

/// How each fresh module runtime is set up.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
    /// Installed after the builtins, before the module's top-level code runs.
    pub host_api: Option<HostApi>,
}

impl LoadOptions {
    fn limits(&self) -> RuntimeLimits {
        RuntimeLimits {
            memory_limit: self.memory_limit,
            max_stack_size: self.max_stack_size,
        }
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("memory_limit", &self.memory_limit)
            .field("max_stack_size", &self.max_stack_size)
            .field("host_api", &self.host_api.is_some())
            .finish()
    }
}

/// Why a module could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("script source '{identity}' is unavailable: {detail}")]
    SourceUnavailable { identity: String, detail: String },

    #[error("script '{identity}' failed to compile: {detail}")]
    CompileError { identity: String, detail: String },

    #[error("script '{identity}' failed during initialization: {detail}")]
    InitError { identity: String, detail: String },

    #[error("could not create a script runtime for '{identity}': {detail}")]
    Runtime { identity: String, detail: String },
}

/// A top-level script function discovered at load time.
pub struct HookCallable {
    name: String,
    arity: u32,
    function: Persistent<Function<'static>>,
}

// SAFETY: the persistent function is only restored inside the context of the module that
// owns it, and every such access happens with the dispatcher's invocation lock held.
unsafe impl Send for HookCallable {}
unsafe impl Sync for HookCallable {}

impl HookCallable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter count (`Function.length`) observed at load time.
    pub fn arity(&self) -> u32 {
        self.arity
    }
}

impl fmt::Debug for HookCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCallable")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// One loaded, initialized script unit.
pub struct ScriptModule {
    // Released by hand in `Drop`: callables first, then the runtime that owns them.
    callables: ManuallyDrop<Vec<HookCallable>>,
    by_name: HashMap<String, usize>,
    exports: Vec<String>,
    identity: String,
    loaded_at: SystemTime,
    runtime: ManuallyDrop<ScriptRuntime>,
    poisoned: AtomicBool,
}

impl ScriptModule {
    /// Read, compile and initialize a module, then collect the functions it defined.
    ///
    /// Top-level code runs exactly once, here. A module that defines none of the known
    /// hooks still loads.
    pub fn load(source: &ScriptSource, options: &LoadOptions) -> Result<Self, LoadError> {
        let identity = source.identity();
        let code = source.read()?;

        let runtime =
            ScriptRuntime::new(options.limits()).map_err(|err| LoadError::Runtime {
                identity: identity.clone(),
                detail: err.to_string(),
            })?;

        let (callables, exports) = runtime
            .context
            .with(|ctx| initialize(&ctx, &identity, code, options))?;
        runtime.drain_jobs();

        let by_name = callables
            .iter()
            .enumerate()
            .map(|(index, callable)| (callable.name.clone(), index))
            .collect();

        Ok(Self {
            callables: ManuallyDrop::new(callables),
            by_name,
            exports,
            identity,
            loaded_at: SystemTime::now(),
            runtime: ManuallyDrop::new(runtime),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Top-level names the module put on the global object, callable or not, plus any
    /// hook bound with `let`, `const` or `class`.
    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn callables(&self) -> &[HookCallable] {
        &self.callables
    }

    /// True once a host panic unwound through this module's runtime. A poisoned module
    /// cannot be entered again and is never released.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn mark_poisoned(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub(crate) fn callable_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn callable(&self, index: usize) -> Option<&HookCallable> {
        self.callables.get(index)
    }

    /// Call `hook` with `args`. Script exceptions come back as `Err(detail)`.
    ///
    /// The caller must hold the dispatcher's invocation lock.
    pub(crate) fn invoke(&self, hook: &HookCallable, args: &[HostValue]) -> Result<(), String> {
        let result = self.runtime.context.with(|ctx| -> Result<(), String> {
            let function = hook
                .function
                .clone()
                .restore(&ctx)
                .map_err(|err| err.to_string())?;
            let values =
                value::marshal(&ctx, args).map_err(|err| runtime::take_thrown(&ctx, err).detail)?;

            match function.call::<_, Value>((Rest(values),)) {
                Ok(returned) => {
                    value::discard(returned);
                    Ok(())
                }
                Err(err) => Err(runtime::take_thrown(&ctx, err).detail),
            }
        });
        self.runtime.drain_jobs();
        result
    }
}

impl Drop for ScriptModule {
    fn drop(&mut self) {
        if self.is_poisoned() {
            // Freeing a context whose runtime lock is poisoned panics inside rquickjs.
            warn!(
                target: "scripting",
                module = %self.identity,
                "Leaking poisoned script runtime"
            );
            return;
        }
        // SAFETY: both fields are dropped exactly once, here, and never touched again.
        unsafe {
            ManuallyDrop::drop(&mut self.callables);
            ManuallyDrop::drop(&mut self.runtime);
        }
    }
}

impl fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptModule")
            .field("identity", &self.identity)
            .field("exports", &self.exports)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

fn initialize(
    ctx: &Ctx<'_>,
    identity: &str,
    code: String,
    options: &LoadOptions,
) -> Result<(Vec<HookCallable>, Vec<String>), LoadError> {
    let init_error = |detail: String| LoadError::InitError {
        identity: identity.to_string(),
        detail,
    };

    runtime::install_builtins(ctx, identity).map_err(|err| init_error(err.to_string()))?;
    if let Some(host_api) = &options.host_api {
        host_api(ctx).map_err(|err| init_error(err.to_string()))?;
    }

    // Anything already on the global object belongs to the host, not the module.
    let globals = ctx.globals();
    let host_names = globals
        .keys::<String>()
        .collect::<rquickjs::Result<HashSet<String>>>()
        .map_err(|err| init_error(err.to_string()))?;

    if let Err(err) = ctx.eval::<(), _>(code) {
        let thrown = runtime::take_thrown(ctx, err);
        return Err(if thrown.is_syntax_error() {
            LoadError::CompileError {
                identity: identity.to_string(),
                detail: thrown.detail,
            }
        } else {
            init_error(thrown.detail)
        });
    }

    let mut callables = Vec::new();
    let mut exports = Vec::new();
    for key in globals.keys::<String>() {
        let name = key.map_err(|err| init_error(err.to_string()))?;
        if host_names.contains(&name) {
            continue;
        }

        let value: Value = globals
            .get(name.as_str())
            .map_err(|err| init_error(err.to_string()))?;
        if let Some(function) = value.as_function() {
            let arity = function.get::<_, u32>("length").unwrap_or(0);
            callables.push(HookCallable {
                name: name.clone(),
                arity,
                function: Persistent::save(ctx, function.clone()),
            });
        }
        exports.push(name);
    }

    // Top-level `let`, `const` and `class` bindings live in the global lexical scope,
    // not on the global object, so the hook names are resolved by evaluation.
    let hook_names = EventName::ALL
        .into_iter()
        .map(EventName::binding_name)
        .chain([GENERIC_BINDING]);
    for name in hook_names {
        if host_names.contains(name) || exports.iter().any(|export| export == name) {
            continue;
        }

        let lookup = format!("typeof {name} === 'function' ? {name} : undefined");
        let value: Value = ctx
            .eval(lookup)
            .map_err(|err| init_error(runtime::take_thrown(ctx, err).detail))?;
        if let Some(function) = value.as_function() {
            let arity = function.get::<_, u32>("length").unwrap_or(0);
            callables.push(HookCallable {
                name: name.to_string(),
                arity,
                function: Persistent::save(ctx, function.clone()),
            });
            exports.push(name.to_string());
        }
    }

    Ok((callables, exports))
}
