//! Collaborative writing sessions: deterministic pairing, shared rooms,
//! a four-stage writing workflow and presence.

pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod roster;
pub mod services;
pub mod state;
pub mod storage;
