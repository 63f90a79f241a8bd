//! App lifecycle registrar.
//!
//! [`App::run`] must be the first thing `main` does. It installs the
//! process-wide hook table (once; later attempts fail with
//! [`UpdateError::AlreadyInitialized`]) and then inspects the activation:
//!
//! | Activation | Effect |
//! |------------|--------|
//! | `--updraft-install <ver>` | after-install hook, then exit |
//! | `--updraft-updated <ver>` | after-update hook, then exit |
//! | `--updraft-obsolete <ver>` | before-update hook, then exit |
//! | `--updraft-uninstall <ver>` | before-uninstall hook, then exit |
//! | downloaded update pending | hand off to the updater, then exit |
//! | `UPDRAFT_FIRSTRUN` set | first-run hook |
//! | `UPDRAFT_RESTART` set | restarted hook |
//!
//! Fast hooks do not exit when `UPDRAFT_DEBUG` is set. Hooks and the logger
//! live in the callback bridge; the table holds their handles.

use crate::bridge::{self, Callback, Handle, HookFn, LoggerFn, Registration};
use crate::error::{Result, UpdateError};
use crate::locator::LocatorConfig;
use crate::manager::UpdateManager;
use crate::sources::NoneSource;
use semver::Version;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Set by the updater when launching the app right after install.
pub const ENV_FIRSTRUN: &str = "UPDRAFT_FIRSTRUN";
/// Set by the updater when relaunching the app after applying an update.
pub const ENV_RESTART: &str = "UPDRAFT_RESTART";
/// Keeps fast hooks from exiting the process.
pub const ENV_DEBUG: &str = "UPDRAFT_DEBUG";

/// The six lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs once right after installation.
    AfterInstall,
    /// Runs right before the app is uninstalled.
    BeforeUninstall,
    /// Runs in the old version right before an update replaces it.
    BeforeUpdate,
    /// Runs in the new version right after an update.
    AfterUpdate,
    /// First normal launch after installation.
    FirstRun,
    /// First normal launch after an update restart.
    Restarted,
}

impl HookKind {
    /// Command-line flag that triggers a fast hook, if any.
    pub fn cli_flag(self) -> Option<&'static str> {
        match self {
            Self::AfterInstall => Some("--updraft-install"),
            Self::AfterUpdate => Some("--updraft-updated"),
            Self::BeforeUpdate => Some("--updraft-obsolete"),
            Self::BeforeUninstall => Some("--updraft-uninstall"),
            Self::FirstRun | Self::Restarted => None,
        }
    }

    fn from_cli_flag(flag: &str) -> Option<Self> {
        [
            Self::AfterInstall,
            Self::AfterUpdate,
            Self::BeforeUpdate,
            Self::BeforeUninstall,
        ]
        .into_iter()
        .find(|k| k.cli_flag().is_some_and(|f| f.eq_ignore_ascii_case(flag)))
    }
}

/// Installed hook table. Read-only once [`App::run`] has stored it.
#[derive(Debug, Default)]
pub struct AppHooks {
    hooks: HashMap<HookKind, Registration>,
    logger: Option<Registration>,
}

impl AppHooks {
    fn register(hooks: HashMap<HookKind, HookFn>, logger: Option<LoggerFn>) -> Self {
        Self {
            hooks: hooks
                .into_iter()
                .map(|(k, f)| (k, Registration::new(Callback::LifecycleHook(f))))
                .collect(),
            logger: logger.map(|f| Registration::new(Callback::Logger(f))),
        }
    }

    /// Invoke the hook for `kind` with `version`. Returns `false` when unset.
    pub fn invoke(&self, kind: HookKind, version: &str) -> bool {
        match self.hooks.get(&kind) {
            Some(reg) => {
                bridge::invoke_hook(reg.handle(), version);
                true
            }
            None => false,
        }
    }

    /// Bridge handle of the logger sink, if one was registered.
    pub fn logger(&self) -> Option<Handle> {
        self.logger.as_ref().map(Registration::handle)
    }
}

static HOOKS: OnceLock<AppHooks> = OnceLock::new();

/// Whether [`App::run`] has installed the hook table.
pub fn is_initialized() -> bool {
    HOOKS.get().is_some()
}

/// Logger handle registered through [`App::run`].
pub fn logger_handle() -> Option<Handle> {
    HOOKS.get().and_then(AppHooks::logger)
}

/// What launched this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationContext {
    /// Arguments without the program name.
    pub args: Vec<String>,
    /// Launched by the updater right after install.
    pub first_run: bool,
    /// Relaunched by the updater after applying an update.
    pub restarted: bool,
    /// Fast hooks should not exit.
    pub debug: bool,
}

impl ActivationContext {
    /// Read the activation environment and clear the one-shot variables so
    /// child processes do not inherit them. Only [`App::run`] calls this,
    /// once per process.
    pub(crate) fn from_env(args: Vec<String>) -> Self {
        let first_run = std::env::var_os(ENV_FIRSTRUN).is_some();
        let restarted = std::env::var_os(ENV_RESTART).is_some();
        let debug = std::env::var_os(ENV_DEBUG).is_some();
        // SAFETY: reached only through App::run after it claims the hook
        // table, so at most once per process, at startup before the host
        // spawns threads that read the environment.
        unsafe {
            std::env::remove_var(ENV_FIRSTRUN);
            std::env::remove_var(ENV_RESTART);
        }
        Self {
            args,
            first_run,
            restarted,
            debug,
        }
    }
}

/// Result of handling an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// A fast hook ran; the process should exit unless debugging.
    FastHook(HookKind),
    /// The updater was launched to apply a pending package.
    ApplyingPending(String),
    /// Normal start; lists the hooks that ran.
    Continue(Vec<HookKind>),
}

/// Process startup configuration.
#[derive(Clone)]
pub struct App {
    hooks: HashMap<HookKind, HookFn>,
    logger: Option<LoggerFn>,
    args: Option<Vec<String>>,
    auto_apply: bool,
    locator: Option<LocatorConfig>,
}

impl Default for App {
    fn default() -> Self {
        Self {
            hooks: HashMap::new(),
            logger: None,
            args: None,
            auto_apply: true,
            locator: None,
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("logger", &self.logger.is_some())
            .field("args", &self.args)
            .field("auto_apply", &self.auto_apply)
            .field("locator", &self.locator)
            .finish()
    }
}

impl App {
    /// Start configuring the app. Auto-apply is on by default.
    pub fn build() -> Self {
        Self::default()
    }

    /// Set the hook for `kind`.
    #[must_use]
    pub fn on_hook(mut self, kind: HookKind, hook: HookFn) -> Self {
        self.hooks.insert(kind, hook);
        self
    }

    /// Runs right after installation, then the process exits.
    #[must_use]
    pub fn on_after_install<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::AfterInstall, Arc::new(hook))
    }

    /// Runs right before uninstall, then the process exits.
    #[must_use]
    pub fn on_before_uninstall<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::BeforeUninstall, Arc::new(hook))
    }

    /// Runs in the outgoing version before an update, then the process exits.
    #[must_use]
    pub fn on_before_update<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::BeforeUpdate, Arc::new(hook))
    }

    /// Runs in the incoming version after an update, then the process exits.
    #[must_use]
    pub fn on_after_update<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::AfterUpdate, Arc::new(hook))
    }

    /// Runs on the first normal launch after install.
    #[must_use]
    pub fn on_first_run<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::FirstRun, Arc::new(hook))
    }

    /// Runs on the first launch after an update restart.
    #[must_use]
    pub fn on_restarted<F: Fn(&str) + Send + Sync + 'static>(self, hook: F) -> Self {
        self.on_hook(HookKind::Restarted, Arc::new(hook))
    }

    /// Receive every `(level, message)` log line.
    #[must_use]
    pub fn set_logger(mut self, logger: LoggerFn) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Override the arguments (default: process arguments minus the program).
    #[must_use]
    pub fn set_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    /// Apply a downloaded update on startup. On by default.
    #[must_use]
    pub fn set_auto_apply_on_startup(mut self, apply: bool) -> Self {
        self.auto_apply = apply;
        self
    }

    /// Use an explicit layout instead of locating from the executable.
    #[must_use]
    pub fn set_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Install the hook table and handle this activation. Exits the process
    /// after a fast hook or when handing off a pending update.
    ///
    /// Call this first thing in `main`, before spawning threads: it clears
    /// the one-shot activation variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::AlreadyInitialized`] on a second call.
    pub fn run(self) -> Result<()> {
        let Self {
            hooks,
            logger,
            args,
            auto_apply,
            locator,
        } = self;

        let table = AppHooks::register(hooks, logger);
        if HOOKS.set(table).is_err() {
            return Err(UpdateError::AlreadyInitialized(
                "App::run was already called".to_owned(),
            ));
        }
        let hooks = HOOKS
            .get()
            .ok_or_else(|| UpdateError::AlreadyInitialized("hook table missing".to_owned()))?;

        let args = args.unwrap_or_else(|| std::env::args().skip(1).collect());
        let ctx = ActivationContext::from_env(args);
        tracing::info!(args = ?ctx.args, "app activation");

        match activate(hooks, &ctx, locator, auto_apply) {
            Activation::FastHook(kind) if !ctx.debug => {
                tracing::info!(?kind, "fast hook complete, exiting");
                std::process::exit(0);
            }
            Activation::FastHook(_) => {
                tracing::warn!("debug mode, not exiting after fast hook");
            }
            Activation::ApplyingPending(version) => {
                tracing::info!(version, "exiting to apply pending update");
                std::process::exit(0);
            }
            Activation::Continue(ran) => {
                tracing::debug!(?ran, "startup hooks complete");
            }
        }
        Ok(())
    }
}

/// Handle one activation against a hook table without exiting the process.
pub fn activate(
    hooks: &AppHooks,
    ctx: &ActivationContext,
    locator: Option<LocatorConfig>,
    auto_apply: bool,
) -> Activation {
    if let [flag, version, ..] = ctx.args.as_slice()
        && let Some(kind) = HookKind::from_cli_flag(flag)
    {
        tracing::info!(?kind, version, "fast hook triggered");
        if Version::parse(version).is_ok() {
            hooks.invoke(kind, version);
        } else {
            tracing::warn!(version, "fast hook version is not valid semver, skipping hook");
        }
        return Activation::FastHook(kind);
    }

    let manager = match UpdateManager::new(NoneSource, None, locator) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "cannot load install layout, skipping startup hooks");
            return Activation::Continue(Vec::new());
        }
    };
    let version = manager.current_version();

    if auto_apply && let Some(pending) = manager.get_update_pending_restart() {
        match manager.apply_updates_and_restart(&pending, &ctx.args) {
            Ok(()) => return Activation::ApplyingPending(pending.version),
            Err(e) => tracing::error!(error = %e, "could not apply pending update on startup"),
        }
    }

    let mut ran = Vec::new();
    if ctx.first_run && hooks.invoke(HookKind::FirstRun, &version) {
        ran.push(HookKind::FirstRun);
    }
    if ctx.restarted && hooks.invoke(HookKind::Restarted, &version) {
        ran.push(HookKind::Restarted);
    }
    Activation::Continue(ran)
}
