//! Follow process management for tailscope
//!
//! Normalizes the divergent behaviors of `tail`, `docker logs` and
//! `kubectl logs` behind one adapter: backend policy tables, banner
//! auto-detection, and a process wrapper that turns stdout into raw
//! lines and stderr into classified lifecycle events.

mod adapter;
mod backend;
mod detect;

pub use adapter::{TailOutput, TailProcessAdapter};
pub use backend::TailBackend;
pub use detect::{DetectError, detect_file_backend};
