//! fakebooks: a stateful emulator of an accounting SaaS REST API.
//!
//! Build an [`Emulator`] from a [`Config`], then serve [`Emulator::router`].

pub mod auth;
pub mod collections;
pub mod config;
pub mod error;
pub mod handlers;
pub mod login;
pub mod seed;
pub mod server;
pub mod settlement;
pub mod tokens;

pub use config::{CliArgs, Config};
pub use error::ApiError;
pub use server::{Emulator, StartupError};
pub use tokens::{Clock, SystemClock};
