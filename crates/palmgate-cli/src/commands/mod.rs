use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod hands;
mod keyring;
mod verify;

pub use hands::{HandsHandler, HandsHandlerDeps};
pub use keyring::{KeyringHandler, KeyringHandlerDeps};
pub use verify::{VerifyHandler, VerifyHandlerDeps};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Hands(cmd) => Box::new(HandsHandler::new(cmd)),
            Commands::Verify(args) => Box::new(VerifyHandler::new(args)),
            Commands::Keyring(cmd) => Box::new(KeyringHandler::new(cmd)),
        }
    }
}
