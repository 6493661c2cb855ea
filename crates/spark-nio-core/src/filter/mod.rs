//! # filter 模块说明
//!
//! ## 角色定位（Why）
//! - 过滤器链是会话事件的拦截流水线：编解码、日志、限流等横切逻辑以过滤器形式插入，
//!   业务处理器只看到处理后的事件。
//!
//! ## 方向（What）
//! - **入站**（created/opened/closed/idle/received/sent/exception）：链头 → 链尾 → [`IoHandler`](crate::IoHandler)；
//! - **出站**（write/close）：链尾 → 链头 → 传输层；
//! - 每个过滤器通过 [`NextFilter`] 决定是否、何时、以什么内容继续传递；不调用即吞掉事件。
//!
//! ## 失败语义（How）
//! - 过滤器返回的错误原样作为 `exception_caught` 从链头重新投递；
//! - panic 被捕获并包装为 [`CoreError::FilterFailure`](crate::CoreError::FilterFailure)；
//! - `exception_caught` 自身失败只记录日志，不再投递，避免无限递归；
//! - 驱动线程不会因过滤器失败而退出。

mod builder;
mod chain;
mod logging;
mod shared;

use std::sync::Arc;

pub use builder::IoFilterChainBuilder;
pub use chain::{IoFilterChain, NextFilter};
pub use logging::LoggingFilter;
pub use shared::SharedFilter;

use crate::{
    error::CoreError,
    message::{Message, WriteRequest},
    session::{IdleStatus, IoSession},
};

/// 过滤器契约。
///
/// # 教案式说明
/// - **意图 (Why)**：所有方法都有“原样转发”的默认实现，具体过滤器只覆写关心的事件。
/// - **生命周期 (What)**：
///   - [`init`](Self::init)：过滤器第一次挂到任意链上之前调用一次；
///   - `on_pre_add` → 链可见 → `on_post_add`；`on_pre_remove` → 链不可见 → `on_post_remove`；
///   - [`destroy`](Self::destroy)：最后一条链摘除它之后调用一次；
///   - `on_pre_add`/`on_pre_remove` 返回错误会中止变更；`on_post_add` 失败时过滤器被撤回。
/// - **线程 (Trade-offs)**：同一个过滤器实例可能被多个会话、多个驱动线程同时调用，
///   可变状态应放在会话属性里而非过滤器字段中。
pub trait IoFilter: Send + Sync + 'static {
    fn init(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn destroy(&self) {}

    fn on_pre_add(&self, chain: &IoFilterChain, name: &str) -> Result<(), CoreError> {
        let _ = (chain, name);
        Ok(())
    }

    fn on_post_add(&self, chain: &IoFilterChain, name: &str) -> Result<(), CoreError> {
        let _ = (chain, name);
        Ok(())
    }

    fn on_pre_remove(&self, chain: &IoFilterChain, name: &str) -> Result<(), CoreError> {
        let _ = (chain, name);
        Ok(())
    }

    fn on_post_remove(&self, chain: &IoFilterChain, name: &str) -> Result<(), CoreError> {
        let _ = (chain, name);
        Ok(())
    }

    fn session_created(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        next.session_created(session);
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        next.session_opened(session);
        Ok(())
    }

    fn session_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        next.session_closed(session);
        Ok(())
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<(), CoreError> {
        next.session_idle(session, status);
        Ok(())
    }

    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        next.message_received(session, message);
        Ok(())
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        next.message_sent(session, message);
        Ok(())
    }

    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        cause: CoreError,
    ) -> Result<(), CoreError> {
        next.exception_caught(session, cause);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<(), CoreError> {
        next.filter_write(session, request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        next.filter_close(session);
        Ok(())
    }
}
