use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, VerifyArgs};
use crate::commands::CommandHandler;
use crate::config::{self, CliSettings};
use crate::errors::AppResult;
use crate::hands::{self, HandVerificationConfig, HandVerificationOutcome};
use crate::keyring;
use crate::output::{decision_exit_code, render_verification};

pub struct VerifyHandler {
    args: VerifyArgs,
    deps: VerifyHandlerDeps,
}

pub struct VerifyHandlerDeps {
    pub load_settings: Box<dyn Fn() -> AppResult<CliSettings> + Send + Sync>,
    pub require_secret_service: Box<dyn Fn(&str) -> AppResult<()> + Send + Sync>,
    pub verify:
        Box<dyn Fn(&HandVerificationConfig) -> AppResult<HandVerificationOutcome> + Send + Sync>,
    pub render: Box<dyn Fn(&HandVerificationOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl Default for VerifyHandlerDeps {
    fn default() -> Self {
        Self {
            load_settings: Box::new(config::load_settings),
            require_secret_service: Box::new(keyring::require_secret_service),
            verify: Box::new(hands::run_hand_verification),
            render: Box::new(render_verification),
        }
    }
}

impl VerifyHandler {
    pub fn new(args: VerifyArgs) -> Self {
        Self {
            args,
            deps: VerifyHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(args: VerifyArgs, deps: VerifyHandlerDeps) -> Self {
        Self { args, deps }
    }
}

impl CommandHandler for VerifyHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let settings = (self.deps.load_settings)()?;
        if settings.resolved.require_secret_service {
            (self.deps.require_secret_service)(&self.args.user)?;
        }
        let config = build_verification_config(&self.args, &settings);
        let outcome = (self.deps.verify)(&config)?;
        (self.deps.render)(&outcome, mode)?;
        Ok(ExitCode::from(decision_exit_code(&outcome.decision)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn build_verification_config(args: &VerifyArgs, settings: &CliSettings) -> HandVerificationConfig {
    HandVerificationConfig {
        user: args.user.clone(),
        capture: args.capture.clone(),
        store_dir: config::resolve_store_dir(args.store_dir.clone(), settings),
        policy: config::resolve_policy(args.preset, settings),
        amount: args.amount,
        pin_tier_min_amount: settings.resolved.pin_tier_min_amount,
        otp_tier_min_amount: settings.resolved.otp_tier_min_amount,
    }
}
