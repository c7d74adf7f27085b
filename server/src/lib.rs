//! # Seatlock Server
//!
//! Process wiring for the reservation engine: environment configuration, backend
//! selection and the application lifecycle used by the `server` binary.
//!
//! # Backends
//!
//! | `SEATLOCK_STORAGE` | `SEATLOCK_LOCKS`             |
//! |--------------------|------------------------------|
//! | `memory` (default) | `local` (default), `redis`   |
//! | `postgres`         | `local`, `postgres`, `redis` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod lifecycle;

pub use config::Config;
pub use error::StartupError;
pub use lifecycle::Application;
