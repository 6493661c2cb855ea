//! # spark-nio-tcp
//!
//! ## 教案式说明
//! - **意图 (Why)**：为 `spark-nio-core` 的会话与过滤器链提供真正的套接字驱动：
//!   基于 `mio` 的就绪通知，由少量驱动线程复用大量连接。
//! - **逻辑 (How)**：
//!   - [`TcpAcceptor`] 创建监听套接字并维护已绑定地址；
//!   - [`SelectorStrategy`] 决定监听套接字与新连接由哪个 [`SelectorProcessor`] 服务；
//!   - [`SelectorProcessor`] 拥有多路复用器与驱动线程，按需创建，空闲时自行退出。
//! - **契约 (What)**：跨线程只通过提交队列加唤醒交互，业务线程调用 `write`/`close`
//!   永远不会阻塞在反应器内部的锁上。

mod acceptor;
mod config;
mod error;
mod processor;
mod strategy;

pub use acceptor::TcpAcceptor;
pub use config::{AcceptorConfig, ReactorConfig};
pub use processor::SelectorProcessor;
pub use strategy::{OneThreadSelectorStrategy, RoundRobinSelectorStrategy, SelectorStrategy};
