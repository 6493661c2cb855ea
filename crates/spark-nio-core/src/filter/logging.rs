use std::sync::Arc;

use tracing::Level;

use super::{IoFilter, NextFilter};
use crate::{
    error::CoreError,
    message::{Message, WriteRequest},
    session::{IdleStatus, IoSession},
};

/// 在指定级别输出结构化事件。`tracing` 宏需要编译期级别，这里按运行期配置分派。
macro_rules! event_at {
    ($level:expr, $($field:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!($($field)+);
        } else if level == Level::WARN {
            tracing::warn!($($field)+);
        } else if level == Level::INFO {
            tracing::info!($($field)+);
        } else if level == Level::DEBUG {
            tracing::debug!($($field)+);
        } else {
            tracing::trace!($($field)+);
        }
    }};
}

/// 记录经过它的全部会话事件，随后原样转发。
///
/// 生命周期事件、消息事件与异常分别使用独立级别，默认 INFO / DEBUG / WARN。
/// 日志字段统一带 `session.id` 与过滤器名称，便于按会话检索。
#[derive(Clone, Debug)]
pub struct LoggingFilter {
    lifecycle: Level,
    messages: Level,
    exceptions: Level,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self {
            lifecycle: Level::INFO,
            messages: Level::DEBUG,
            exceptions: Level::WARN,
        }
    }
}

impl LoggingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifecycle_level(mut self, level: Level) -> Self {
        self.lifecycle = level;
        self
    }

    pub fn with_message_level(mut self, level: Level) -> Self {
        self.messages = level;
        self
    }

    pub fn with_exception_level(mut self, level: Level) -> Self {
        self.exceptions = level;
        self
    }
}

impl IoFilter for LoggingFilter {
    fn session_created(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        event_at!(self.lifecycle, session.id = session.id(), filter = next.name(), remote = %session.remote_address(), "session created");
        next.session_created(session);
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        event_at!(self.lifecycle, session.id = session.id(), filter = next.name(), "session opened");
        next.session_opened(session);
        Ok(())
    }

    fn session_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        event_at!(self.lifecycle, session.id = session.id(), filter = next.name(), "session closed");
        next.session_closed(session);
        Ok(())
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<(), CoreError> {
        event_at!(self.lifecycle, session.id = session.id(), filter = next.name(), status = %status, "session idle");
        next.session_idle(session, status);
        Ok(())
    }

    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        event_at!(self.messages, session.id = session.id(), filter = next.name(), payload = ?message, "message received");
        next.message_received(session, message);
        Ok(())
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        event_at!(self.messages, session.id = session.id(), filter = next.name(), payload = ?message, "message sent");
        next.message_sent(session, message);
        Ok(())
    }

    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        cause: CoreError,
    ) -> Result<(), CoreError> {
        event_at!(self.exceptions, session.id = session.id(), filter = next.name(), error.code = cause.code(), error = %cause, "exception caught");
        next.exception_caught(session, cause);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<(), CoreError> {
        event_at!(self.messages, session.id = session.id(), filter = next.name(), payload = ?request.message(), "write requested");
        next.filter_write(session, request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        event_at!(self.lifecycle, session.id = session.id(), filter = next.name(), "close requested");
        next.filter_close(session);
        Ok(())
    }
}
