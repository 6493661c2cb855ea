//! # processor 模块说明
//!
//! ## 角色定位（Why）
//! - [`SelectorProcessor`] 拥有一个 `mio::Poll` 与唯一的驱动线程；只有驱动线程调用阻塞的
//!   `poll`，套接字的注册、读写与会话的关闭也都只在该线程上发生。
//! - 其他线程（绑定/解绑的管理线程、写消息的业务线程、别的处理器）只能通过五条提交队列
//!   与驱动线程交互：监听待注册、监听待注销、会话待接入、会话待关闭、会话待更新。
//!
//! ## 驱动循环（How）
//! 1. 取空全部提交队列并逐条应用；
//! 2. 既无监听也无会话时尝试退役；
//! 3. 以最近的空闲截止时刻为上限阻塞在 `poll`；
//! 4. 对就绪的监听套接字循环 `accept`，交由放置策略决定新会话归属；
//!    对就绪的连接读到 `WouldBlock` 或写到 `WouldBlock`；
//! 5. 检查所有会话的空闲状态。
//!
//! ## 生命周期契约（What）
//! - 提交方总是“先入队，再锁住线程槽位”：槽位中有线程则唤醒，没有则就地创建新线程；
//! - 驱动线程退役时持有同一把锁并确认全部队列为空后才清空槽位，
//!   因而恰好在最后一个套接字移除时到达的提交不会丢失；
//! - 会话令牌全局单调分配、从不复用，迟到的关闭/更新请求不会误伤新会话。
//!
//! ## 风险提示（Trade-offs）
//! - `mio` 在 Linux 上是边沿触发，读写都必须推进到 `WouldBlock`；恢复读/写时通过重新注册
//!   兴趣集让内核重新报告当前就绪状态；
//! - 连续 `max_poll_failures` 次 `poll` 失败即视为多路复用器不可用：所属会话全部强制关闭，
//!   监听失效，服务监听者收到 `service_failed`。

use std::{
    cell::Cell,
    collections::HashMap,
    fmt,
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use mio::{
    Events, Interest, Poll, Registry, Token, Waker,
    net::{TcpListener, TcpStream},
};
use parking_lot::Mutex;
use spark_nio_buffer::IoBuffer;
use spark_nio_core::{CoreError, IoSession, Message, ServiceSupport, SessionIo, WritePromise};

use crate::{
    config::ReactorConfig,
    error::{self, map_io_error, timeout_error},
    strategy::SelectorStrategy,
};

const WAKE_TOKEN: Token = Token(0);

thread_local! {
    static IN_DRIVER: Cell<bool> = const { Cell::new(false) };
}

/// 当前线程是否为某个选择器处理器的驱动线程。
///
/// 驱动线程上不能同步等待驱动线程自己的确认，调用方据此跳过等待。
pub(crate) fn on_driver_thread() -> bool {
    IN_DRIVER.with(Cell::get)
}

/// 一个选择器处理器：一个多路复用器加一条按需创建的驱动线程。
///
/// 句柄可廉价克隆，所有克隆共享同一个驱动线程。
#[derive(Clone)]
pub struct SelectorProcessor {
    shared: Arc<ProcessorShared>,
}

impl SelectorProcessor {
    /// 创建处理器；驱动线程在第一次提交时才启动。
    pub fn new(name: impl Into<String>, config: ReactorConfig) -> Self {
        Self {
            shared: Arc::new(ProcessorShared {
                name: name.into(),
                config,
                listeners_to_add: Queue::new(),
                listeners_to_remove: Queue::new(),
                sessions_to_connect: Queue::new(),
                sessions_to_close: Queue::new(),
                sessions_to_update: Queue::new(),
                worker: Mutex::new(None),
                next_token: AtomicUsize::new(1),
                listener_count: AtomicUsize::new(0),
                session_count: AtomicUsize::new(0),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 驱动线程当前是否存活。
    pub fn is_running(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// 驱动线程累计启动的次数。
    pub fn generations(&self) -> u64 {
        self.shared.generations.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listener_count.load(Ordering::Acquire)
    }

    pub fn session_count(&self) -> usize {
        self.shared.session_count.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &SelectorProcessor) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 提交监听套接字并等待驱动线程完成注册。
    ///
    /// 在驱动线程上调用时只入队不等待，注册失败仅记录日志。
    pub(crate) fn add_listener(
        &self,
        address: SocketAddr,
        listener: TcpListener,
        strategy: Arc<dyn SelectorStrategy>,
        support: Arc<ServiceSupport>,
    ) -> Result<(), CoreError> {
        let waiting = !on_driver_thread();
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.shared.listeners_to_add.push(ListenerRegistration {
            address,
            listener,
            strategy,
            support,
            ack: waiting.then_some(ack_tx),
        });
        self.shared.submit()?;
        if !waiting {
            return Ok(());
        }
        match ack_rx.recv_timeout(self.shared.config.ack_timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(timeout_error(error::REGISTER)),
            Err(RecvTimeoutError::Disconnected) => Err(self
                .shared
                .failure("selector thread exited before registering the listener")),
        }
    }

    /// 提交监听注销并等待驱动线程关闭监听套接字，之后地址可立即重新绑定。
    pub(crate) fn remove_listener(&self, address: SocketAddr) -> Result<(), CoreError> {
        let waiting = !on_driver_thread();
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.shared.listeners_to_remove.push(ListenerRemoval {
            address,
            ack: waiting.then_some(ack_tx),
        });
        self.shared.submit()?;
        if !waiting {
            return Ok(());
        }
        match ack_rx.recv_timeout(self.shared.config.ack_timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(timeout_error(error::DEREGISTER)),
            Err(RecvTimeoutError::Disconnected) => Err(self
                .shared
                .failure("selector thread exited before releasing the listener")),
        }
    }

    /// 把另一处理器接受的连接交给本处理器接入。
    fn submit_connection(&self, pending: PendingConnection) {
        let remote = pending.remote;
        self.shared.sessions_to_connect.push(pending);
        if let Err(err) = self.shared.submit() {
            tracing::warn!(
                processor = %self.shared.name,
                remote = %remote,
                error.code = err.code(),
                error = %err,
                "failed to hand over an accepted connection"
            );
        }
    }
}

impl fmt::Debug for SelectorProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorProcessor")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("listeners", &self.listener_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}

struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    fn push(&self, item: T) {
        // 接收端与发送端同属一个结构体，无界通道的发送不会失败。
        let _ = self.tx.send(item);
    }

    fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

struct ListenerRegistration {
    address: SocketAddr,
    listener: TcpListener,
    strategy: Arc<dyn SelectorStrategy>,
    support: Arc<ServiceSupport>,
    ack: Option<Sender<Result<(), CoreError>>>,
}

struct ListenerRemoval {
    address: SocketAddr,
    ack: Option<Sender<()>>,
}

struct PendingConnection {
    stream: TcpStream,
    remote: SocketAddr,
    support: Arc<ServiceSupport>,
}

struct WorkerHandle {
    waker: Waker,
}

struct ProcessorShared {
    name: String,
    config: ReactorConfig,
    listeners_to_add: Queue<ListenerRegistration>,
    listeners_to_remove: Queue<ListenerRemoval>,
    sessions_to_connect: Queue<PendingConnection>,
    sessions_to_close: Queue<(Token, bool)>,
    sessions_to_update: Queue<Token>,
    worker: Mutex<Option<WorkerHandle>>,
    next_token: AtomicUsize,
    listener_count: AtomicUsize,
    session_count: AtomicUsize,
    generations: AtomicU64,
}

impl ProcessorShared {
    /// 唤醒驱动线程；线程不存在时就地创建。调用前必须已经入队。
    fn submit(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut slot = self.worker.lock();
        if let Some(handle) = slot.as_ref() {
            return handle
                .waker
                .wake()
                .map_err(|err| map_io_error(error::WAKE, err));
        }
        *slot = Some(self.spawn()?);
        Ok(())
    }

    /// 仅在驱动线程存活时唤醒它。
    ///
    /// 会话级请求只可能来自仍由某个驱动线程持有的会话；线程不存在说明会话已经关闭。
    fn notify(&self) {
        if let Some(handle) = self.worker.lock().as_ref()
            && let Err(err) = handle.waker.wake()
        {
            tracing::warn!(processor = %self.name, error = %err, "failed to wake the selector thread");
        }
    }

    fn spawn(self: &Arc<Self>) -> Result<WorkerHandle, CoreError> {
        let poll = Poll::new().map_err(|err| map_io_error(error::POLL, err))?;
        let waker =
            Waker::new(poll.registry(), WAKE_TOKEN).map_err(|err| map_io_error(error::WAKE, err))?;
        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let shared = Arc::clone(self);
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                IN_DRIVER.with(|flag| flag.set(true));
                let span = tracing::info_span!("selector_processor", name = %shared.name);
                let _entered = span.enter();
                tracing::debug!(generation, "selector thread started");
                Driver::new(shared, poll).run();
            })
            .map_err(|err| map_io_error(error::SPAWN, err))?;
        Ok(WorkerHandle { waker })
    }

    /// 在持有线程槽位锁的情况下确认队列为空并清空槽位。
    fn try_retire(&self) -> bool {
        let mut slot = self.worker.lock();
        if !self.queues_empty() {
            return false;
        }
        *slot = None;
        true
    }

    fn queues_empty(&self) -> bool {
        self.listeners_to_add.is_empty()
            && self.listeners_to_remove.is_empty()
            && self.sessions_to_connect.is_empty()
            && self.sessions_to_close.is_empty()
            && self.sessions_to_update.is_empty()
    }

    /// 多路复用器失效后放弃全部未处理的提交，并清空线程槽位。
    fn abandon(&self, cause: &CoreError) {
        let mut slot = self.worker.lock();
        while let Some(registration) = self.listeners_to_add.pop() {
            if let Some(ack) = registration.ack {
                let _ = ack.send(Err(cause.clone()));
            }
        }
        while let Some(removal) = self.listeners_to_remove.pop() {
            if let Some(ack) = removal.ack {
                let _ = ack.send(());
            }
        }
        while let Some(pending) = self.sessions_to_connect.pop() {
            tracing::warn!(remote = %pending.remote, "dropping a connection handed to a failed selector");
        }
        while self.sessions_to_close.pop().is_some() {}
        while self.sessions_to_update.pop().is_some() {}
        *slot = None;
    }

    fn allocate_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn failure(&self, reason: &str) -> CoreError {
        CoreError::MultiplexerFailure {
            processor: self.name.clone(),
            reason: reason.to_owned(),
        }
    }
}

/// 会话一侧看到的反应器：把请求放入队列并唤醒驱动线程。
struct SessionHandle {
    shared: Arc<ProcessorShared>,
    token: Token,
}

impl SessionIo for SessionHandle {
    fn flush(&self, _: &IoSession) {
        self.shared.sessions_to_update.push(self.token);
        self.shared.notify();
    }

    fn update_interest(&self, _: &IoSession) {
        self.shared.sessions_to_update.push(self.token);
        self.shared.notify();
    }

    fn close(&self, _: &IoSession, immediately: bool) {
        self.shared.sessions_to_close.push((self.token, immediately));
        self.shared.notify();
    }
}

/// 连续失败计数；成功一次即清零。
#[derive(Debug)]
struct FailureBudget {
    limit: u32,
    consecutive: u32,
}

impl FailureBudget {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
        }
    }

    fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// 记录一次失败；返回预算是否已经耗尽。
    fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive >= self.limit
    }
}

struct ListenerSlot {
    address: SocketAddr,
    listener: TcpListener,
    strategy: Arc<dyn SelectorStrategy>,
    support: Arc<ServiceSupport>,
}

/// 正在写出的请求。`Buffer` 消息在写完后恢复原始位置再交给 `message_sent`。
struct InFlight {
    message: Message,
    promise: WritePromise,
    origin: usize,
    written: usize,
}

impl InFlight {
    /// 开始写一个请求；不可写出的消息直接以失败完成并返回 `None`。
    fn start(session: &IoSession, message: Message, promise: WritePromise) -> Option<Self> {
        let origin = match &message {
            Message::Buffer(buffer) => buffer.position(),
            Message::Bytes(_) => 0,
            Message::User(_) => {
                session.forget_scheduled_write(0);
                promise.fail(CoreError::UnsupportedMessage {
                    kind: message.kind(),
                });
                return None;
            }
        };
        Some(Self {
            message,
            promise,
            origin,
            written: 0,
        })
    }

    fn remaining(&self) -> usize {
        match &self.message {
            Message::Buffer(buffer) => buffer.remaining(),
            Message::Bytes(bytes) => bytes.len().saturating_sub(self.written),
            Message::User(_) => 0,
        }
    }

    fn write_to(&mut self, stream: &mut TcpStream) -> io::Result<usize> {
        let written = match &mut self.message {
            Message::Buffer(buffer) => {
                let written = buffer.with_remaining(|bytes| stream.write(bytes))?;
                buffer.skip(written).map_err(io::Error::other)?;
                written
            }
            Message::Bytes(bytes) => stream.write(&bytes[self.written..])?,
            Message::User(_) => 0,
        };
        self.written += written;
        Ok(written)
    }

    fn complete(self, session: &Arc<IoSession>) {
        let Self {
            mut message,
            promise,
            origin,
            ..
        } = self;
        if let Message::Buffer(buffer) = &mut message
            && buffer.set_position(origin).is_err()
        {
            tracing::debug!(session.id = session.id(), "written buffer could not be rewound");
        }
        promise.succeed();
        session.notify_message_sent(message);
    }
}

enum ReadOutcome {
    Open,
    Eof,
    Failed(CoreError),
}

struct SessionSlot {
    session: Arc<IoSession>,
    support: Arc<ServiceSupport>,
    stream: TcpStream,
    interest: Option<Interest>,
    in_flight: Option<InFlight>,
    read_buffer_size: usize,
    closing: bool,
}

impl SessionSlot {
    /// 读到 `WouldBlock`，每读到一块即沿链投递 `message_received`。
    fn read(&mut self) -> ReadOutcome {
        let config = self.session.config();
        loop {
            if self.session.is_read_suspended() || self.session.is_closing() {
                return ReadOutcome::Open;
            }
            let mut buffer = IoBuffer::allocate(self.read_buffer_size);
            let stream = &mut self.stream;
            let outcome = match buffer.with_remaining_mut(|bytes| stream.read(bytes)) {
                Ok(outcome) => outcome,
                Err(err) => return ReadOutcome::Failed(err.into()),
            };
            match outcome {
                Ok(0) => return ReadOutcome::Eof,
                Ok(read) => {
                    if let Err(err) = buffer.set_position(read) {
                        return ReadOutcome::Failed(err.into());
                    }
                    buffer.flip();
                    self.session.record_read(read, Instant::now());
                    self.read_buffer_size = config.adapt_read_buffer(self.read_buffer_size, read);
                    self.session
                        .filter_chain()
                        .fire_message_received(&self.session, Message::Buffer(buffer));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Open,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return ReadOutcome::Failed(map_io_error(error::READ, err)),
            }
        }
    }

    /// 写到队列为空或 `WouldBlock`；写挂起时不做任何事。
    fn flush(&mut self) -> Result<(), CoreError> {
        if self.session.is_write_suspended() {
            return Ok(());
        }
        loop {
            if self.in_flight.is_none() {
                let Some(request) = self.session.poll_write() else {
                    return Ok(());
                };
                let (message, promise) = request.into_parts();
                self.in_flight = InFlight::start(&self.session, message, promise);
                continue;
            }
            if let Some(in_flight) = self.in_flight.as_mut() {
                while in_flight.remaining() > 0 {
                    match in_flight.write_to(&mut self.stream) {
                        Ok(0) => {
                            return Err(map_io_error(
                                error::WRITE,
                                io::Error::from(io::ErrorKind::WriteZero),
                            ));
                        }
                        Ok(written) => self.session.record_written(written, Instant::now()),
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => return Err(map_io_error(error::WRITE, err)),
                    }
                }
            }
            if let Some(done) = self.in_flight.take() {
                done.complete(&self.session);
            }
        }
    }

    fn drained(&self) -> bool {
        self.in_flight.is_none() && !self.session.has_pending_writes()
    }

    fn desired_interest(&self) -> Option<Interest> {
        let readable = !self.session.is_read_suspended() && !self.session.is_closing();
        let writable = !self.session.is_write_suspended() && !self.drained();
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn apply_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let desired = self.desired_interest();
        if desired == self.interest {
            return Ok(());
        }
        match (self.interest, desired) {
            (None, Some(interest)) => registry.register(&mut self.stream, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut self.stream, token, interest)?,
            (Some(_), None) => registry.deregister(&mut self.stream)?,
            (None, None) => {}
        }
        self.interest = desired;
        Ok(())
    }

    /// 以 `SessionClosed` 失败全部未写出的请求。
    fn discard_writes(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            self.session.forget_scheduled_write(in_flight.remaining());
            in_flight.promise.fail(CoreError::SessionClosed {
                session_id: self.session.id(),
            });
        }
        self.session.fail_pending_writes();
    }
}

/// 驱动线程独占的状态。
struct Driver {
    shared: Arc<ProcessorShared>,
    poll: Poll,
    events: Events,
    listeners: HashMap<Token, ListenerSlot>,
    sessions: HashMap<Token, SessionSlot>,
    failures: FailureBudget,
}

impl Driver {
    fn new(shared: Arc<ProcessorShared>, poll: Poll) -> Self {
        Self {
            events: Events::with_capacity(shared.config.events_capacity),
            failures: FailureBudget::new(shared.config.max_poll_failures),
            shared,
            poll,
            listeners: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn run(mut self) {
        loop {
            self.drain_submissions();
            if self.listeners.is_empty() && self.sessions.is_empty() && self.shared.try_retire() {
                tracing::debug!("selector thread retired with nothing left to serve");
                return;
            }

            let timeout = self.poll_timeout(Instant::now());
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => self.failures.record_success(),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "selector poll failed");
                    if self.failures.record_failure() {
                        self.fail(err);
                        return;
                    }
                    continue;
                }
            }

            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|event| {
                    let readable =
                        event.is_readable() || event.is_read_closed() || event.is_error();
                    (event.token(), readable, event.is_writable())
                })
                .collect();
            for (token, readable, writable) in ready {
                self.dispatch(token, readable, writable);
            }

            let now = Instant::now();
            for slot in self.sessions.values() {
                slot.session.notify_idleness(now);
            }
        }
    }

    fn drain_submissions(&mut self) {
        while let Some(registration) = self.shared.listeners_to_add.pop() {
            self.register_listener(registration);
        }
        while let Some(removal) = self.shared.listeners_to_remove.pop() {
            self.deregister_listener(removal);
        }
        while let Some(pending) = self.shared.sessions_to_connect.pop() {
            self.connect(pending);
        }
        while let Some((token, immediately)) = self.shared.sessions_to_close.pop() {
            self.request_close(token, immediately);
        }
        while let Some(token) = self.shared.sessions_to_update.pop() {
            self.flush(token);
        }
    }

    /// 最近一个已连接会话的空闲截止时刻距今多久；没有时无限等待。
    fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.sessions
            .values()
            .filter(|slot| slot.session.is_connected())
            .filter_map(|slot| slot.session.next_idle_deadline())
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        if token == WAKE_TOKEN {
            return;
        }
        if self.listeners.contains_key(&token) {
            self.accept(token);
            return;
        }
        if readable {
            self.read(token);
        }
        if writable {
            self.flush(token);
        }
    }

    fn register_listener(&mut self, registration: ListenerRegistration) {
        let ListenerRegistration {
            address,
            mut listener,
            strategy,
            support,
            ack,
        } = registration;
        let token = self.shared.allocate_token();
        let outcome = self
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
            .map_err(|err| map_io_error(error::REGISTER, err));
        match &outcome {
            Ok(()) => {
                self.listeners.insert(
                    token,
                    ListenerSlot {
                        address,
                        listener,
                        strategy,
                        support,
                    },
                );
                self.shared.listener_count.fetch_add(1, Ordering::AcqRel);
                tracing::info!(addr = %address, "listening");
            }
            Err(err) => {
                tracing::warn!(addr = %address, error.code = err.code(), error = %err, "failed to register listener");
            }
        }
        if let Some(ack) = ack {
            let _ = ack.send(outcome);
        }
    }

    fn deregister_listener(&mut self, removal: ListenerRemoval) {
        let token = self
            .listeners
            .iter()
            .find(|(_, slot)| slot.address == removal.address)
            .map(|(token, _)| *token);
        if let Some(mut slot) = token.and_then(|token| self.listeners.remove(&token)) {
            if let Err(err) = self.poll.registry().deregister(&mut slot.listener) {
                tracing::debug!(addr = %slot.address, error = %err, "listener deregistration failed");
            }
            drop(slot);
            self.shared.listener_count.fetch_sub(1, Ordering::AcqRel);
            tracing::info!(addr = %removal.address, "listener closed");
        }
        if let Some(ack) = removal.ack {
            let _ = ack.send(());
        }
    }

    fn accept(&mut self, token: Token) {
        let this = SelectorProcessor {
            shared: Arc::clone(&self.shared),
        };
        loop {
            let Some(slot) = self.listeners.get(&token) else {
                return;
            };
            match slot.listener.accept() {
                Ok((stream, remote)) => {
                    let target = slot.strategy.processor_for_accepted(&this, remote);
                    let pending = PendingConnection {
                        stream,
                        remote,
                        support: Arc::clone(&slot.support),
                    };
                    if target.ptr_eq(&this) {
                        self.connect(pending);
                    } else {
                        target.submit_connection(pending);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = map_io_error(error::ACCEPT, err);
                    tracing::warn!(addr = %slot.address, error.code = err.code(), error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    fn connect(&mut self, pending: PendingConnection) {
        let PendingConnection {
            mut stream,
            remote,
            support,
        } = pending;
        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(err) => {
                tracing::warn!(remote = %remote, error = %err, "accepted connection has no local address");
                return;
            }
        };
        let token = self.shared.allocate_token();
        let handle = Arc::new(SessionHandle {
            shared: Arc::clone(&self.shared),
            token,
        });
        let session = match IoSession::new(&support, local, remote, handle) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(remote = %remote, error.code = err.code(), error = %err, "failed to build the session filter chain");
                return;
            }
        };
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            let err = map_io_error(error::REGISTER, err);
            tracing::warn!(session.id = session.id(), error.code = err.code(), error = %err, "failed to register session");
            session.filter_chain().clear();
            return;
        }

        let read_buffer_size = session.config().read_buffer_size;
        self.sessions.insert(
            token,
            SessionSlot {
                session: Arc::clone(&session),
                support: Arc::clone(&support),
                stream,
                interest: Some(Interest::READABLE),
                in_flight: None,
                read_buffer_size,
                closing: false,
            },
        );
        self.shared.session_count.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(session.id = session.id(), remote = %remote, "session registered");
        support.open_session(&session);
    }

    fn request_close(&mut self, token: Token, immediately: bool) {
        let Some(slot) = self.sessions.get_mut(&token) else {
            return;
        };
        if immediately {
            self.close_session(token);
            return;
        }
        slot.closing = true;
        self.flush(token);
    }

    fn read(&mut self, token: Token) {
        let Some(slot) = self.sessions.get_mut(&token) else {
            return;
        };
        match slot.read() {
            ReadOutcome::Open => {}
            ReadOutcome::Eof => self.close_session(token),
            ReadOutcome::Failed(err) => {
                slot.session
                    .filter_chain()
                    .fire_exception_caught(&slot.session, err);
                self.close_session(token);
            }
        }
    }

    /// 写出待写数据，处理优雅关闭，并按需调整兴趣集。
    fn flush(&mut self, token: Token) {
        let Some(slot) = self.sessions.get_mut(&token) else {
            return;
        };
        if let Err(err) = slot.flush() {
            slot.session
                .filter_chain()
                .fire_exception_caught(&slot.session, err);
            self.close_session(token);
            return;
        }
        if slot.closing && slot.drained() {
            self.close_session(token);
            return;
        }
        if let Err(err) = slot.apply_interest(self.poll.registry(), token) {
            let err = map_io_error(error::REGISTER, err);
            slot.session
                .filter_chain()
                .fire_exception_caught(&slot.session, err);
            self.close_session(token);
        }
    }

    /// 注销并关闭套接字，失败全部未写出的请求，然后完成会话关闭。
    fn close_session(&mut self, token: Token) {
        let Some(mut slot) = self.sessions.remove(&token) else {
            return;
        };
        if slot.interest.is_some()
            && let Err(err) = self.poll.registry().deregister(&mut slot.stream)
        {
            tracing::debug!(session.id = slot.session.id(), error = %err, "session deregistration failed");
        }
        slot.discard_writes();
        self.shared.session_count.fetch_sub(1, Ordering::AcqRel);
        slot.support.close_session(&slot.session);
        // 进入 Closed 之后仍在途的入队由写入方自行清理，这里只需再清一次。
        slot.discard_writes();
        tracing::debug!(session.id = slot.session.id(), "session closed");
    }

    fn fail(mut self, cause: io::Error) {
        let error = CoreError::MultiplexerFailure {
            processor: self.shared.name.clone(),
            reason: cause.to_string(),
        };
        tracing::error!(error.code = error.code(), error = %error, "selector is unusable; closing everything it owns");

        let mut supports: Vec<Arc<ServiceSupport>> = Vec::new();
        let tokens: Vec<Token> = self.sessions.keys().copied().collect();
        for token in tokens {
            if let Some(slot) = self.sessions.get(&token) {
                remember_support(&mut supports, &slot.support);
                slot.session
                    .filter_chain()
                    .fire_exception_caught(&slot.session, error.clone());
            }
            self.close_session(token);
        }
        for (_, slot) in self.listeners.drain() {
            remember_support(&mut supports, &slot.support);
        }
        self.shared.listener_count.store(0, Ordering::Release);

        for support in &supports {
            support.fire_service_failed(&error);
        }
        self.shared.abandon(&error);
    }
}

fn remember_support(supports: &mut Vec<Arc<ServiceSupport>>, support: &Arc<ServiceSupport>) {
    if !supports.iter().any(|known| Arc::ptr_eq(known, support)) {
        supports.push(Arc::clone(support));
    }
}
