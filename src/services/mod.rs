//! Domain services behind every workflow operation.
//!
//! ARCHITECTURE
//! ============
//! `identity` and `stage` are pure. `session`, `partner` and `presence` own
//! the shared state in `AppState`. `workflow` composes them into the
//! operations a host exposes and returns `view::SessionView`.

pub mod identity;
pub mod partner;
pub mod presence;
pub mod session;
pub mod stage;
pub mod transcript;
pub mod view;
pub mod workflow;
