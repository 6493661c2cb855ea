//! 业务处理器：过滤器链入站方向的终点。

use std::sync::Arc;

use crate::{
    error::CoreError,
    message::Message,
    session::{IdleStatus, IoSession},
};

/// 会话事件的最终消费者。
///
/// # 教案式说明
/// - **意图 (Why)**：应用只需实现关心的回调，其余沿用空实现。
/// - **契约 (What)**：
///   - 回调在会话所属的驱动线程上执行，不应长时间阻塞，更不能在其中等待同一会话的 future；
///   - 返回 `Err` 或发生 panic 时，错误被包装为 [`CoreError::HandlerFailure`]，
///     作为 `exception_caught` 从链头重新投递；
///   - `exception_caught` 自身不再返回错误，默认实现只记录日志。
pub trait IoHandler: Send + Sync + 'static {
    fn session_created(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
        let _ = session;
        Ok(())
    }

    fn session_opened(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
        let _ = session;
        Ok(())
    }

    fn session_closed(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
        let _ = session;
        Ok(())
    }

    fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) -> Result<(), CoreError> {
        let _ = (session, status);
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<(), CoreError> {
        let _ = (session, message);
        Ok(())
    }

    fn message_sent(&self, session: &Arc<IoSession>, message: Message) -> Result<(), CoreError> {
        let _ = (session, message);
        Ok(())
    }

    fn exception_caught(&self, session: &Arc<IoSession>, cause: CoreError) {
        tracing::warn!(
            session.id = session.id(),
            error.code = cause.code(),
            error = %cause,
            "unhandled exception reached the handler"
        );
    }
}

/// 什么都不做的处理器，适合只依赖过滤器工作的服务与测试。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl IoHandler for NoopHandler {}
