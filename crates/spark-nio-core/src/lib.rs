//! # spark-nio-core
//!
//! ## 教案式说明
//! - **意图 (Why)**：把“连接之上发生了什么”与“字节怎样在套接字上流动”分开。本 crate 定义前者：
//!   会话与其属性、过滤器链、业务处理器、服务与监听者；后者由反应器实现（如 `spark-nio-tcp`），
//!   只通过 [`SessionIo`] 与 [`ServiceSupport`] 的生命周期入口与本 crate 交互。
//! - **逻辑 (How)**：
//!   - 入站事件：反应器 → [`IoFilterChain`] 链头 → 各过滤器 → [`IoHandler`]；
//!   - 出站请求：[`IoSession::write`]/[`IoSession::close`] → 链尾 → 各过滤器 → 链头 → 反应器；
//!   - 异步结果统一以 [`IoFuture`] 表达，可阻塞等待、注册回调或 `.await`。
//! - **契约 (What)**：
//!   - 会话编号进程内唯一且单调递增；
//!   - 过滤器或处理器的失败不会终止驱动线程，而是以 `exception_caught` 重新投递；
//!   - 所有错误都是 [`CoreError`]，带稳定错误码。

pub mod config;
pub mod error;
pub mod filter;
pub mod future;
pub mod handler;
pub mod message;
pub mod observability;
pub mod service;
pub mod session;

pub use config::SessionConfig;
pub use error::{CoreError, Result};
pub use filter::{
    IoFilter, IoFilterChain, IoFilterChainBuilder, LoggingFilter, NextFilter, SharedFilter,
};
pub use future::{CloseFuture, IoFuture, WriteFuture};
pub use handler::{IoHandler, NoopHandler};
pub use message::{Message, WritePromise, WriteRequest};
pub use service::{IoAcceptor, IoService, IoServiceListener, ServiceSupport};
pub use session::{
    AttributeKey, AttributeMap, IdleStatus, IoSession, SessionIo, SessionState,
};
pub use spark_nio_buffer as buffer;
