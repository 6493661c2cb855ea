#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use spark_nio_core::{CoreError, IdleStatus, IoHandler, IoSession, Message, WriteFuture};

/// 处理器观察到的全部事件，供测试线程断言。
#[derive(Default)]
pub struct Observed {
    pub events: Mutex<Vec<String>>,
    pub received: Mutex<Vec<u8>>,
    pub reader_idle: AtomicUsize,
    pub pending: Mutex<Vec<WriteFuture>>,
}

impl Observed {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().clone()
    }

    pub fn idle_count(&self) -> usize {
        self.reader_idle.load(Ordering::Acquire)
    }
}

/// 收到数据后的动作。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaction {
    Record,
    Echo,
    /// 写出指定字节数后优雅关闭。
    ReplyAndClose(usize),
    /// 挂起写方向、排入一条消息后立即关闭。
    QueueAndAbort,
}

pub struct ObservingHandler {
    pub observed: Arc<Observed>,
    pub reaction: Reaction,
}

impl ObservingHandler {
    pub fn new(reaction: Reaction) -> (Self, Arc<Observed>) {
        let observed = Arc::new(Observed::default());
        let handler = Self {
            observed: Arc::clone(&observed),
            reaction,
        };
        (handler, observed)
    }

    fn log(&self, event: impl Into<String>) {
        self.observed.events.lock().push(event.into());
    }
}

impl IoHandler for ObservingHandler {
    fn session_created(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log(format!("created:{}", session.is_connected()));
        Ok(())
    }

    fn session_opened(&self, _: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log("opened");
        Ok(())
    }

    fn session_closed(&self, _: &Arc<IoSession>) -> Result<(), CoreError> {
        self.log("closed");
        Ok(())
    }

    fn session_idle(&self, _: &Arc<IoSession>, status: IdleStatus) -> Result<(), CoreError> {
        if status == IdleStatus::ReaderIdle {
            self.observed.reader_idle.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<(), CoreError> {
        if let Some(buffer) = message.as_buffer() {
            self.observed.received.lock().extend(buffer.to_vec());
        }
        match self.reaction {
            Reaction::Record => {}
            Reaction::Echo => {
                let _pending = session.write(message);
            }
            Reaction::ReplyAndClose(len) => {
                let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let pending = session.write(payload);
                self.observed.pending.lock().push(pending);
                let _closing = session.close(false);
            }
            Reaction::QueueAndAbort => {
                session.suspend_write();
                let pending = session.write("never sent");
                self.observed.pending.lock().push(pending);
                let _closing = session.close(true);
            }
        }
        Ok(())
    }
}

pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

pub fn connect(address: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(address).expect("连接回环地址");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("设置读超时");
    stream
}

pub fn send(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).expect("发送数据");
    stream.flush().expect("刷新");
}

/// 读到对端关闭为止。
pub fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return collected,
            Ok(read) => collected.extend_from_slice(&chunk[..read]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return collected,
        }
    }
}

/// 在期限内轮询条件，返回条件最终是否成立。
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
