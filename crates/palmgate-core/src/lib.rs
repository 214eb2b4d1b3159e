pub mod errors;
pub mod hands;
pub mod secret_service;
