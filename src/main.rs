//! Flex Deploy
//!
//! Usage:
//! - Normal mode: `flex-deploy`
//! - With custom port: `flex-deploy --port 8080`
//! - Bind to localhost only: `flex-deploy --host 127.0.0.1`

use flex_deploy::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                if config.port_override.is_none() {
                    eprintln!("Ignoring invalid port: {}", args[i + 1]);
                }
                i += 2;
            }
            "--host" if i + 1 < args.len() => {
                config.host_override = Some(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Flex Deploy - detect projects and publish them to GitHub / GHCR");
    println!();
    println!("USAGE:");
    println!("    flex-deploy [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port (PORT, default 9998)");
    println!("    --host <HOST>    Override the listening address (HOST, default 0.0.0.0)");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    WORKSPACE_ROOT   Mounted projects directory (default /workspace)");
    println!("    DOCKER_ENABLED   Allow docker build/push (default true)");
    println!("    REGISTRY         Image registry (default ghcr.io)");
    println!("    LOG_FORMAT=json  Structured log output");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args();
    flex_deploy::run(config).await
}
