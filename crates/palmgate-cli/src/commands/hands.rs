use std::any::Any;
use std::process::ExitCode;

use tracing::debug;

use crate::cli::{HandEnrollArgs, HandRemoveArgs, HandsCommands, OutputMode};
use crate::commands::CommandHandler;
use crate::config::{self, CliSettings};
use crate::errors::AppResult;
use crate::hands::{
    self, HandEnrollmentConfig, HandEnrollmentOutcome, HandExtractionConfig,
    HandExtractionOutcome, HandRemovalConfig, HandRemovalOutcome,
};
use crate::keyring;
use crate::output::{render_hand_enroll, render_hand_extract, render_hand_remove};

type Run<C, O> = Box<dyn Fn(&C) -> AppResult<O> + Send + Sync>;
type Render<T> = Box<dyn Fn(&T, OutputMode) -> AppResult<()> + Send + Sync>;

pub struct HandsHandler {
    command: HandsCommands,
    deps: HandsHandlerDeps,
}

pub struct HandsHandlerDeps {
    pub load_settings: Box<dyn Fn() -> AppResult<CliSettings> + Send + Sync>,
    pub require_secret_service: Box<dyn Fn(&str) -> AppResult<()> + Send + Sync>,
    pub extract: Run<HandExtractionConfig, HandExtractionOutcome>,
    pub enroll: Run<HandEnrollmentConfig, HandEnrollmentOutcome>,
    pub remove: Run<HandRemovalConfig, HandRemovalOutcome>,
    pub render_extract: Render<HandExtractionOutcome>,
    pub render_enroll: Render<HandEnrollmentOutcome>,
    pub render_remove: Render<HandRemovalOutcome>,
}

impl Default for HandsHandlerDeps {
    fn default() -> Self {
        Self {
            load_settings: Box::new(config::load_settings),
            require_secret_service: Box::new(keyring::require_secret_service),
            extract: Box::new(hands::run_hand_extraction),
            enroll: Box::new(hands::run_hand_enrollment),
            remove: Box::new(hands::run_hand_removal),
            render_extract: Box::new(render_hand_extract),
            render_enroll: Box::new(render_hand_enroll),
            render_remove: Box::new(render_hand_remove),
        }
    }
}

impl HandsHandler {
    pub fn new(command: HandsCommands) -> Self {
        Self {
            command,
            deps: HandsHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: HandsCommands, deps: HandsHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for HandsHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            HandsCommands::Extract(args) => {
                let config = HandExtractionConfig {
                    capture: args.capture.clone(),
                    output: args.output.clone(),
                };
                let outcome = (self.deps.extract)(&config)?;
                (self.deps.render_extract)(&outcome, mode)?;
            }
            HandsCommands::Enroll(args) => {
                let settings = (self.deps.load_settings)()?;
                if settings.resolved.require_secret_service {
                    (self.deps.require_secret_service)(&args.user)?;
                }
                let config = build_enrollment_config(args, &settings);
                debug!(
                    user = %config.user,
                    captures = config.captures.len(),
                    min_samples = config.min_samples,
                    "starting enrollment"
                );
                let outcome = (self.deps.enroll)(&config)?;
                (self.deps.render_enroll)(&outcome, mode)?;
            }
            HandsCommands::Remove(args) => {
                let settings = (self.deps.load_settings)()?;
                let config = build_removal_config(args, &settings);
                let outcome = (self.deps.remove)(&config)?;
                (self.deps.render_remove)(&outcome, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn build_enrollment_config(args: &HandEnrollArgs, settings: &CliSettings) -> HandEnrollmentConfig {
    HandEnrollmentConfig {
        user: args.user.clone(),
        captures: args.captures.clone(),
        store_dir: config::resolve_store_dir(args.store_dir.clone(), settings),
        min_samples: args
            .min_samples
            .unwrap_or(settings.resolved.min_enrollment_samples),
    }
}

fn build_removal_config(args: &HandRemoveArgs, settings: &CliSettings) -> HandRemovalConfig {
    HandRemovalConfig {
        user: args.user.clone(),
        sample_ids: args.sample_id.clone(),
        remove_all: args.all,
        store_dir: config::resolve_store_dir(args.store_dir.clone(), settings),
    }
}
