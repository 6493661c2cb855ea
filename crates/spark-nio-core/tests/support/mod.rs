//! 集成测试共用的桩实现：不做真实 IO 的 `SessionIo` 与记录事件的处理器/过滤器。

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use spark_nio_core::{
    CoreError, IdleStatus, IoFilter, IoHandler, IoSession, Message, NextFilter, ServiceSupport,
    SessionConfig, SessionIo, WriteRequest,
};

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// 只记录调用次数与关闭方式的传输桩。
#[derive(Default)]
pub struct RecordingIo {
    pub flushes: AtomicUsize,
    pub interest_updates: AtomicUsize,
    pub closes: Mutex<Vec<bool>>,
}

impl SessionIo for RecordingIo {
    fn flush(&self, _: &IoSession) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn update_interest(&self, _: &IoSession) {
        self.interest_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, _: &IoSession, immediately: bool) {
        self.closes.lock().push(immediately);
    }
}

/// 把每个回调记成一行文本的处理器。
#[derive(Default)]
pub struct RecordingHandler {
    pub log: EventLog,
}

impl IoHandler for RecordingHandler {
    fn session_created(&self, _: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log.lock().push("handler:created".to_owned());
        Ok(())
    }

    fn session_opened(&self, _: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log.lock().push("handler:opened".to_owned());
        Ok(())
    }

    fn session_closed(&self, _: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log.lock().push("handler:closed".to_owned());
        Ok(())
    }

    fn session_idle(&self, _: &Arc<IoSession>, status: IdleStatus) -> Result<(), CoreError> {
        self.log.lock().push(format!("handler:idle:{status}"));
        Ok(())
    }

    fn message_received(&self, _: &Arc<IoSession>, message: Message) -> Result<(), CoreError> {
        let text = message
            .to_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|| "<user>".to_owned());
        self.log.lock().push(format!("handler:received:{text}"));
        Ok(())
    }

    fn message_sent(&self, _: &Arc<IoSession>, _: Message) -> Result<(), CoreError> {
        self.log.lock().push("handler:sent".to_owned());
        Ok(())
    }

    fn exception_caught(&self, _: &Arc<IoSession>, cause: CoreError) {
        self.log.lock().push(format!("handler:exception:{}", cause.code()));
    }
}

/// 记录经过顺序后原样转发的过滤器。
pub struct Tracer {
    pub label: &'static str,
    pub log: EventLog,
}

impl IoFilter for Tracer {
    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        self.log.lock().push(format!("{}:received", self.label));
        next.message_received(session, message);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<(), CoreError> {
        self.log.lock().push(format!("{}:write", self.label));
        next.filter_write(session, request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log.lock().push(format!("{}:close", self.label));
        next.filter_close(session);
        Ok(())
    }
}

pub fn address(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn service_with(handler: impl IoHandler, config: SessionConfig) -> Arc<ServiceSupport> {
    ServiceSupport::new(Arc::new(handler), config)
}

/// 创建并完成接入一个会话。
pub fn open_session(support: &Arc<ServiceSupport>) -> (Arc<IoSession>, Arc<RecordingIo>) {
    let io = Arc::new(RecordingIo::default());
    let session = IoSession::new(support, address(9000), address(40000), io.clone())
        .expect("创建会话");
    support.open_session(&session);
    (session, io)
}
