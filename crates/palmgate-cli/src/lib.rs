pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod hands;
pub mod keyring;
pub mod output;
