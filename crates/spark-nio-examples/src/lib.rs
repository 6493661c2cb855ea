//! 回显服务的业务处理器。
//!
//! # 教案式说明
//! - **意图 (Why)**：用最小的业务逻辑串起接入器、过滤器链与会话生命周期，作为上手示例。
//! - **逻辑 (How)**：收到什么写回什么；读空闲超时后优雅关闭会话，让已排队的回显先写完。
//! - **契约 (What)**：处理器无状态，可被任意多个会话共享。

use std::sync::Arc;

use spark_nio_core::{CoreError, IdleStatus, IoHandler, IoSession, Message};

/// 原样回写收到的数据。
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

impl IoHandler for EchoHandler {
    fn session_opened(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
        tracing::info!(
            session.id = session.id(),
            remote = %session.remote_address(),
            "echo session opened"
        );
        Ok(())
    }

    fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) -> Result<(), CoreError> {
        if status == IdleStatus::ReaderIdle {
            tracing::info!(session.id = session.id(), "closing idle echo session");
            let _closing = session.close(false);
        }
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<(), CoreError> {
        let _pending = session.write(message);
        Ok(())
    }

    fn exception_caught(&self, session: &Arc<IoSession>, cause: CoreError) {
        tracing::warn!(
            session.id = session.id(),
            error.code = cause.code(),
            error = %cause,
            "echo session failed; closing"
        );
        let _closing = session.close(true);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{SocketAddr, TcpStream},
        time::Duration,
    };

    use spark_nio_core::{IoAcceptor, IoService, LoggingFilter, SessionConfig};
    use spark_nio_tcp::{AcceptorConfig, TcpAcceptor};

    use super::*;

    #[test]
    fn echoes_and_closes_idle_clients() {
        let config = AcceptorConfig::default().with_session(
            SessionConfig::default()
                .with_idle_time(IdleStatus::ReaderIdle, Duration::from_millis(200)),
        );
        let acceptor = TcpAcceptor::with_config(EchoHandler, config).expect("创建接入器");
        acceptor
            .filter_chain_builder()
            .add_last("logger", LoggingFilter::new())
            .expect("添加日志过滤器");
        let bound = acceptor
            .bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("绑定");

        let mut client = TcpStream::connect(bound).expect("连接");
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("设置读超时");
        client.write_all(b"ping").expect("发送");
        let mut reply = [0_u8; 4];
        client.read_exact(&mut reply).expect("读取回显");
        assert_eq!(&reply, b"ping");

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).expect("空闲关闭后读到 EOF");
        assert!(rest.is_empty());
    }
}
