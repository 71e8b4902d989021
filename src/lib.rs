//! Client for the GAS PASS prepaid-gas program.
//!
//! A session walks a fixed pipeline against one cluster and one program:
//!
//! * [`connection`]: a logical session to the cluster behind the [`connection::Transport`] seam.
//! * [`authority`]: the signing identity bound to that connection.
//! * [`interface`]: the program proxy built from an interface description.
//! * [`orchestrator`]: drives connect → bind → load → initialize → topup → submit → state.
//!
//! [`ledger`] is an in-memory cluster that executes the GAS PASS program, used for offline
//! runs (`--cluster simulated`) and as the network fake in tests.

pub mod authority;
pub mod config;
pub mod connection;
pub mod error;
pub mod interface;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod program;
pub mod wire;

pub use error::{
    AuthorityError, ConfigError, ConnectionError, InterfaceLoadError, ProgramCallError,
    SessionError, StepError, TransportError,
};
