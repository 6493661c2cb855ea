//! 进程级 tracing 订阅者安装入口。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装订阅者可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// 本入口已被调用过。
    #[error("tracing subscriber has already been installed by spark-nio")]
    AlreadyInstalled,
    /// 外部已设置全局订阅者。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// `RUST_LOG` 或默认指令无法解析。
    #[error("invalid log directive: {0}")]
    InvalidDirective(String),
    /// 注册全局订阅者失败。
    #[error("failed to install the global subscriber: {0}")]
    SetGlobalSubscriber(String),
}

/// 安装 `fmt + EnvFilter` 订阅者。
///
/// # 教案式说明
/// - **意图 (Why)**：示例程序与集成环境只需调用一次即可获得带线程名、目标与字段的结构化日志；
///   驱动线程的 `selector_processor{name=..}` span 会出现在每一行前缀中。
/// - **逻辑 (How)**：优先读取 `RUST_LOG`，缺省时使用 `default_directive`；
///   `registry().with(filter).with(fmt::layer())` 后 `try_init`。
/// - **契约 (What)**：重复调用返回 [`InstallError::AlreadyInstalled`]；外部已设置订阅者时返回
///   [`InstallError::SubscriberAlreadySet`]。库代码不应调用本函数，交给二进制入口决定。
pub fn install_subscriber(default_directive: &str) -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|err| InstallError::InvalidDirective(err.to_string()))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|err| InstallError::SetGlobalSubscriber(err.to_string()))?;

    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}
