//! 回显服务：在给定地址上监听，把收到的字节原样写回。
//!
//! # 使用方法
//! ```bash
//! cargo run -p spark-nio-examples --bin echo_server -- --config crates/spark-nio-examples/config/echo.toml \
//!     --bind 127.0.0.1:7007
//! ```
//! - `--config`：可选，TOML 格式的接入器配置，缺省时使用内置默认值。
//! - `--bind`：可重复，监听地址，缺省为 `127.0.0.1:7007`。
//!
//! 启动后从标准输入读取命令：`stats` 打印会话统计，`quit` 或 EOF 解绑并退出。
//! 日志级别由 `RUST_LOG` 控制。

use std::{
    env,
    io::{self, BufRead},
    net::SocketAddr,
    path::PathBuf,
};

use anyhow::{Context, anyhow, bail};
use spark_nio_core::{IoAcceptor, IoService, LoggingFilter, observability::install_subscriber};
use spark_nio_examples::EchoHandler;
use spark_nio_tcp::{AcceptorConfig, TcpAcceptor};

const DEFAULT_ADDRESS: &str = "127.0.0.1:7007";

fn main() {
    if let Err(error) = run() {
        eprintln!("回显服务失败: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    install_subscriber("info,spark_nio_core=debug").context("安装日志订阅者")?;

    let mut config_path = None;
    let mut addresses = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--config 之后必须提供文件路径"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--bind" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--bind 之后必须提供监听地址"))?;
                addresses.push(parse_address(&value)?);
            }
            flag if flag.trim_start_matches('-') == "quick" => continue,
            unknown => bail!("未知参数: {unknown}"),
        }
    }
    if addresses.is_empty() {
        addresses.push(parse_address(DEFAULT_ADDRESS)?);
    }

    let config = match config_path {
        Some(path) => AcceptorConfig::from_toml_file(&path)
            .with_context(|| format!("读取配置 {}", path.display()))?,
        None => AcceptorConfig::default(),
    };

    let acceptor = TcpAcceptor::with_config(EchoHandler, config).context("创建接入器")?;
    acceptor
        .filter_chain_builder()
        .add_last("logger", LoggingFilter::new())
        .context("安装日志过滤器")?;
    let bound = acceptor.bind_all(&addresses).context("绑定监听地址")?;
    for address in &bound {
        tracing::info!(addr = %address, "echo server listening");
    }

    for line in io::stdin().lock().lines() {
        match line.context("读取标准输入")?.trim() {
            "stats" => {
                let support = acceptor.support();
                println!(
                    "managed={} largest={} cumulative={}",
                    support.managed_session_count(),
                    support.largest_managed_session_count(),
                    support.cumulative_managed_session_count()
                );
            }
            "quit" => break,
            "" => {}
            other => eprintln!("未知命令: {other}（可用: stats, quit）"),
        }
    }

    acceptor.unbind_all().context("解绑监听地址")?;
    acceptor.dispose();
    tracing::info!("echo server stopped");
    Ok(())
}

fn parse_address(raw: &str) -> anyhow::Result<SocketAddr> {
    raw.parse()
        .with_context(|| format!("无法解析监听地址: {raw}"))
}
