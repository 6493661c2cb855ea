//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义会话、过滤器链、服务与反应器对外暴露的错误语义；
//! - 每个变体都有稳定错误码（[`CoreError::code`]），日志与告警按错误码聚合，不依赖文案。
//!
//! ## 设计要求（What）
//! - `CoreError` 实现 `Clone`：同一个失败可能同时交付给多个等待者（[`IoFuture`](crate::IoFuture)）
//!   以及过滤器链的 `exception_caught`，因此底层 `io::Error` 以 `Arc` 共享；
//! - 缓冲层错误通过 `#[from]` 原样透传，错误码保持 `spark.nio.buffer.*` 前缀。

use std::{io, net::SocketAddr, sync::Arc};

use spark_nio_buffer::BufferError;
use thiserror::Error;

/// 反应器核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：让绑定、会话、过滤器与多路复用器的失败都能沿同一条通道传播，调用方用 `?`
///   即可向上返回，过滤器链则把它作为 `exception_caught` 的载荷。
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`；
///   - [`code`](Self::code) 返回的字符串在版本间保持稳定；
///   - `Io` 变体携带发生失败的操作码，便于区分 bind/accept/read/write。
#[derive(Clone, Debug, Error)]
pub enum CoreError {
    /// 地址已被本进程绑定，或操作系统报告端口占用。
    #[error("address {address} is already bound")]
    AddressInUse { address: SocketAddr },

    /// 解绑的地址从未绑定，或已经解绑。
    #[error("address {address} is not bound")]
    AddressNotBound { address: SocketAddr },

    /// 会话已进入 CLOSING/CLOSED，拒绝新的读写请求。
    #[error("session {session_id} is closed")]
    SessionClosed { session_id: u64 },

    /// 缓冲层错误：容量超限、字符集编解码失败、只读视图写入等。
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// 多路复用器不可恢复，所属处理器已强制关闭全部会话。
    ///
    /// - **风险 (Trade-offs)**：出现该错误时监听器也一并失效，服务需要重新绑定。
    #[error("selector processor `{processor}` failed: {reason}")]
    MultiplexerFailure { processor: String, reason: String },

    /// 过滤器链中已存在同名过滤器。
    #[error("filter `{name}` already exists in the chain")]
    FilterNameConflict { name: String },

    /// 过滤器链中不存在指定名称。
    #[error("filter `{name}` not found in the chain")]
    FilterNotFound { name: String },

    /// 过滤器返回错误或发生 panic；链路会把它作为 `exception_caught` 重新投递。
    #[error("filter `{filter}` failed: {reason}")]
    FilterFailure { filter: String, reason: String },

    /// 业务处理器返回错误或发生 panic。
    #[error("handler failed: {reason}")]
    HandlerFailure { reason: String },

    /// 写请求在抵达传输层之前被过滤器丢弃。
    #[error("write request was discarded before reaching the transport")]
    WriteDiscarded,

    /// 传输层无法直接写出的消息类型，需要在链路中先行编码。
    #[error("message of kind `{kind}` cannot be written by the transport")]
    UnsupportedMessage { kind: &'static str },

    /// 底层 IO 失败，`code` 指明具体操作。
    #[error("{operation}: {source}")]
    Io {
        code: &'static str,
        operation: &'static str,
        #[source]
        source: Arc<io::Error>,
    },

    /// 配置非法或无法解析。
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// 业务自定义失败，供处理器通过 `?` 返回。
    #[error("{reason}")]
    Application { reason: String },
}

impl CoreError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::AddressInUse { .. } => "spark.nio.bind.address_in_use",
            Self::AddressNotBound { .. } => "spark.nio.bind.address_not_bound",
            Self::SessionClosed { .. } => "spark.nio.session.closed",
            Self::Buffer(err) => err.code(),
            Self::MultiplexerFailure { .. } => "spark.nio.reactor.multiplexer_failure",
            Self::FilterNameConflict { .. } => "spark.nio.filter.name_conflict",
            Self::FilterNotFound { .. } => "spark.nio.filter.not_found",
            Self::FilterFailure { .. } => "spark.nio.filter.failed",
            Self::HandlerFailure { .. } => "spark.nio.handler.failed",
            Self::WriteDiscarded => "spark.nio.write.discarded",
            Self::UnsupportedMessage { .. } => "spark.nio.write.unsupported_message",
            Self::Io { code, .. } => code,
            Self::Config { .. } => "spark.nio.config.invalid",
            Self::Application { .. } => "spark.nio.application",
        }
    }

    /// 以操作码包装一次 IO 失败。
    pub fn io(code: &'static str, operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            code,
            operation,
            source: Arc::new(source),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn application(reason: impl Into<String>) -> Self {
        Self::Application {
            reason: reason.into(),
        }
    }

    /// 若为 IO 错误，返回其 [`io::ErrorKind`]。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(source: io::Error) -> Self {
        Self::io("spark.nio.io_failed", "io", source)
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_errors_keep_their_code() {
        let err: CoreError = BufferError::ReadOnly.into();
        assert_eq!(err.code(), "spark.nio.buffer.read_only");
    }

    #[test]
    fn io_errors_are_shareable() {
        let err = CoreError::io(
            "spark.nio.tcp.read_failed",
            "tcp read",
            io::Error::from(io::ErrorKind::ConnectionReset),
        );
        let copy = err.clone();
        assert_eq!(copy.code(), "spark.nio.tcp.read_failed");
        assert_eq!(copy.io_kind(), Some(io::ErrorKind::ConnectionReset));
        assert!(copy.to_string().starts_with("tcp read"));
    }
}
