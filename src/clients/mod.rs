//! Clients for downstream collaborator APIs.
//!
//! Both collaborators sit outside this core's correctness contract: the
//! long-term memory store receives persisted conversations, and the
//! agent-profile API is polled to warm the profile cache. Calls are
//! dispatched fire-and-forget after a webhook response is decided.

pub mod memory;
pub mod profile;

pub use memory::MemoryClient;
pub use profile::ProfileClient;
