//! VPN Connect Agent - 本地 OpenVPN 会话代理
//!
//! Usage:
//! - Normal mode: `vpn-connect-agent`
//! - With custom port: `vpn-connect-agent --port 9000` or `--port=9000`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vpn_connect_agent::RuntimeConfig;

/// 解析命令行参数
fn parse_args(args: &[String]) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            arg if arg.starts_with("--port=") => {
                config.port_override = arg["--port=".len()..].parse().ok();
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("VPN Connect Agent - 本地 OpenVPN 会话代理");
    println!();
    println!("USAGE:");
    println!("    vpn-connect-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port (default 8765)");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    VPN_CONNECT_OPENVPN_PATH   openvpn binary (default: openvpn)");
    println!("    VPN_CONNECT_USE_SUDO       run openvpn through sudo (default: true)");
    println!("    VPN_CONNECT_STATIC         built frontend directory");
    println!("    RUST_LOG                   log filter (default: info)");
}

/// 初始化日志
fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args);

    init_logging();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        vpn_connect_agent::init_and_run_agent_with_config(config).await;
    });
}
