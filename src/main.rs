//! Netmon Orchestrator
//!
//! Usage:
//! - Normal mode: `netmon-orchestrator`
//! - With custom port: `netmon-orchestrator --port 19999`

use netmon_orchestrator::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
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
    println!("Netmon Orchestrator - 主机发现与监控组件部署");
    println!();
    println!("USAGE:");
    println!("    netmon-orchestrator [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    PORT                       Listening port (default 8080)");
    println!("    PLATFORM_ENCRYPTION_KEY    Credential encryption key");
    println!("    SSH_HOST_KEY_POLICY        tofu | pinned | insecure");
    println!("    SSH_KNOWN_HOSTS_FILE       Persisted host key fingerprints");
    println!("    RUST_LOG                   Log filter (default info)");
}

fn main() {
    let config = parse_args();

    netmon_orchestrator::init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(netmon_orchestrator::run(config)) {
        tracing::error!("Orchestrator exited with error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
