//! Script runtime management
//!
//! Each script module generation gets its own QuickJS runtime and context, so a reload
//! never shares interpreter state with the generation it replaces.

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Exception, Function, Runtime};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Extra globals the host installs into every fresh context before the module runs.
pub type HostApi = Arc<dyn for<'js> Fn(&Ctx<'js>) -> rquickjs::Result<()> + Send + Sync>;

/// Resource limits applied to a freshly created runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
}

/// Script execution context
pub struct ScriptRuntime {
    pub context: Context,
    // Declared after `context` so the context is released first.
    runtime: Runtime,
}

impl ScriptRuntime {
    pub fn new(limits: RuntimeLimits) -> rquickjs::Result<Self> {
        let runtime = Runtime::new()?;
        if let Some(bytes) = limits.memory_limit {
            runtime.set_memory_limit(bytes);
        }
        if let Some(bytes) = limits.max_stack_size {
            runtime.set_max_stack_size(bytes);
        }
        let context = Context::full(&runtime)?;

        Ok(Self { context, runtime })
    }

    /// Run promise continuations queued by the last call until the queue is empty.
    pub fn drain_jobs(&self) {
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    warn!(target: "scripting", "Pending script job failed: {:?}", err);
                }
            }
        }
    }
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime").finish_non_exhaustive()
    }
}

/// Install the globals every module can rely on.
///
/// `print(...args)` writes one line to the `script` log target, tagged with the module
/// identity.
pub fn install_builtins(ctx: &Ctx<'_>, identity: &str) -> rquickjs::Result<()> {
    let module: Arc<str> = Arc::from(identity);
    let print = Function::new(ctx.clone(), move |parts: Rest<Coerced<String>>| {
        let line = parts
            .0
            .into_iter()
            .map(|Coerced(part)| part)
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "script", module = %module, "{}", line);
    })?;
    ctx.globals().set("print", print)?;
    Ok(())
}

/// An error raised by script code, taken off the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    /// Constructor name of the thrown error (`SyntaxError`, `TypeError`, ...), if any.
    pub name: Option<String>,
    pub detail: String,
}

impl Thrown {
    pub fn is_syntax_error(&self) -> bool {
        self.name.as_deref() == Some("SyntaxError")
    }
}

/// Convert a failed runtime call into a description of what the script threw.
///
/// Must be called before anything else runs on `ctx`, since the pending exception is
/// consumed here.
pub fn take_thrown(ctx: &Ctx<'_>, error: rquickjs::Error) -> Thrown {
    if !matches!(error, rquickjs::Error::Exception) {
        return Thrown {
            name: None,
            detail: error.to_string(),
        };
    }

    let value = ctx.catch();
    if let Some(exception) = value.clone().into_object().and_then(Exception::from_object) {
        let name = exception
            .as_object()
            .get::<_, Option<String>>("name")
            .ok()
            .flatten();
        let message = exception.message().unwrap_or_default();
        let mut detail = match &name {
            Some(name) => format!("{name}: {message}"),
            None => message,
        };
        if let Some(stack) = exception.stack() {
            let stack = stack.trim_end();
            if !stack.is_empty() {
                detail.push('\n');
                detail.push_str(stack);
            }
        }
        return Thrown { name, detail };
    }

    let detail = value
        .get::<Coerced<String>>()
        .map(|Coerced(text)| text)
        .unwrap_or_else(|_| "<unprintable value>".to_string());
    Thrown {
        name: None,
        detail: format!("uncaught {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_error(source: &str) -> Thrown {
        let runtime = ScriptRuntime::new(RuntimeLimits::default()).unwrap();
        runtime.context.with(|ctx| {
            let err = ctx.eval::<(), _>(source).unwrap_err();
            take_thrown(&ctx, err)
        })
    }

    #[test]
    fn syntax_errors_are_classified() {
        let thrown = eval_error("function broken( {");
        assert!(thrown.is_syntax_error());
        assert!(thrown.detail.starts_with("SyntaxError"));
    }

    #[test]
    fn thrown_errors_keep_their_message() {
        let thrown = eval_error("throw new TypeError('bad victim');");
        assert_eq!(thrown.name.as_deref(), Some("TypeError"));
        assert!(!thrown.is_syntax_error());
        assert!(thrown.detail.contains("bad victim"));
    }

    #[test]
    fn non_error_values_are_stringified() {
        let thrown = eval_error("throw 42;");
        assert_eq!(thrown.name, None);
        assert_eq!(thrown.detail, "uncaught 42");
    }

    #[test]
    fn builtins_install_print() {
        let runtime = ScriptRuntime::new(RuntimeLimits::default()).unwrap();
        runtime.context.with(|ctx| {
            install_builtins(&ctx, "test.js").unwrap();
            ctx.eval::<(), _>("print('hello', 1, true);").unwrap();
        });
    }
}
