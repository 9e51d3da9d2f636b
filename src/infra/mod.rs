//! 基础设施模块
//!
//! 封装外部依赖（进程、文件系统、网卡统计、ping、HTTP client）

pub mod command;
pub mod net_stats;
pub mod probe;
pub mod process;
pub mod profiles;
pub mod public_ip;
pub mod secret;

pub use command::CommandRunner;
pub use net_stats::{InterfaceCounters, InterfaceStats, SysfsInterfaceStats};
pub use probe::{EchoProbe, PingProbe};
pub use process::{LaunchRequest, OpenVpnPlatform, ProcessHandle, ProcessPlatform, SpawnedProcess};
pub use profiles::{FsProfileSource, ProfileSource};
pub use public_ip::{HttpPublicAddressResolver, PublicAddressResolver};
pub use secret::SecretArtifact;
