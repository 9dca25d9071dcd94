// Mediator module - session registry and its process-wide instance

pub mod instance;
pub mod registry;

pub use instance::{current_instance, finish, get_instance};
pub use registry::{MediatorRegistry, SharedSession};
