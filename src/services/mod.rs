//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod classifier;
pub mod credentials;
pub mod session;
pub mod telemetry;
