//! keyhop
//!
//! SSH identities and host aliases for people with several Git accounts on
//! one machine.
//!
//! # Architecture
//!
//! - **SSH Module**: config model and codec, identity registry, key
//!   generation and agent control
//! - **App Module**: command orchestration over the SSH module
//! - **Config Module**: the `~/.keyhop/keyhoprc` settings file
//! - **Error Module**: error taxonomy and exit codes
//!
//! # Usage
//!
//! ```no_run
//! use keyhop::{App, Config};
//! use keyhop::cli::Command;
//!
//! let config = Config::load().expect("Failed to load settings");
//! let mut app = App::from_config(config);
//! app.run(Command::ListHosts { json: false }, &mut std::io::stdout())
//!     .expect("list-hosts failed");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod ssh;

// Re-export main types
pub use app::App;
pub use config::Config;
pub use error::{Error, ErrorKind};
