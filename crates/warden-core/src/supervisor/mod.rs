//! Supervisor loop: keeps the hosted module alive across crashes and updates.

pub mod console;
mod lifecycle;
mod state;
mod trigger;

pub use lifecycle::{Supervisor, SupervisorError};
pub use state::ModuleState;
pub use trigger::{TriggerHandle, UpdateTrigger};
