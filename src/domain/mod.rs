//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod profile;
pub mod session;

// Re-exports for convenience
pub use profile::SavedProfile;
pub use session::{Lifecycle, LogBuffer, LogEntry, SessionSnapshot, SessionState, Severity};
