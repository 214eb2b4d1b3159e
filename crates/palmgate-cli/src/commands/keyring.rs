use std::any::Any;
use std::process::ExitCode;

use tracing::debug;

use crate::cli::{KeyringCommands, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::keyring::{self, KeyringCheckSummary};
use crate::output::render_keyring_check;

pub struct KeyringHandler {
    command: KeyringCommands,
    deps: KeyringHandlerDeps,
}

pub struct KeyringHandlerDeps {
    pub check: Box<dyn Fn(Option<&str>) -> AppResult<KeyringCheckSummary> + Send + Sync>,
    pub render: Box<dyn Fn(&KeyringCheckSummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl Default for KeyringHandlerDeps {
    fn default() -> Self {
        Self {
            check: Box::new(keyring::run_keyring_check),
            render: Box::new(render_keyring_check),
        }
    }
}

impl KeyringHandler {
    pub fn new(command: KeyringCommands) -> Self {
        Self {
            command,
            deps: KeyringHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: KeyringCommands, deps: KeyringHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for KeyringHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            KeyringCommands::Check(args) => {
                let summary = (self.deps.check)(args.user.as_deref())?;
                debug!(
                    user = %summary.user,
                    present = summary.template_key_present,
                    "keyring check finished"
                );
                (self.deps.render)(&summary, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
