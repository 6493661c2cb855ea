//! # session 模块说明
//!
//! ## 角色定位（Why）
//! - [`IoSession`] 是一条已建立连接的全部可见状态：地址、统计、属性、过滤器链、待写队列与
//!   关闭结果；业务线程与反应器线程共享同一个 `Arc<IoSession>`。
//! - 会话自身不做 IO，只通过 [`SessionIo`] 把“有数据要写”“兴趣集变化”“请求关闭”通知给
//!   拥有套接字的反应器。
//!
//! ## 状态机（What）
//! - `Connecting → Connected → Closing → Closed`，只能前进；
//! - `close(false)` 在待写队列清空后进入 `Closed`，`close(true)` 在反应器下一轮循环直接关闭并
//!   丢弃待写数据；
//! - 进入 `Closing`/`Closed` 后新的写请求立即以 [`CoreError::SessionClosed`] 失败。
//!
//! ## 并发（How）
//! - 状态、统计与时间戳全部是原子量；时间戳记录为相对创建时刻的纳秒偏移；
//! - 待写队列是无界 `crossbeam` 通道，应用线程入队不会阻塞在反应器内部的锁上；
//!   入队后若发现会话已进入 `Closed`，由入队方自行清空队列，保证每个写 future 都会完成；
//! - 会话配置以 `ArcSwap` 保存，运行期修改空闲时长不会与反应器的读取竞争。

mod attributes;
mod idle;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering, fence},
    },
    time::{Duration, Instant, SystemTime},
};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};

pub use attributes::{AttributeKey, AttributeMap};
pub use idle::IdleStatus;
use idle::IdleCounters;

use crate::{
    config::SessionConfig,
    error::CoreError,
    filter::IoFilterChain,
    future::{CloseFuture, WriteFuture},
    handler::IoHandler,
    message::{Message, WriteRequest},
    service::ServiceSupport,
};

/// 进程级会话编号发生器，从 1 开始单调递增。
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 会话生命周期状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// 反应器一侧的会话钩子。
///
/// # 教案式说明
/// - **意图 (Why)**：会话不持有套接字，所有真正的 IO 都在拥有该套接字的驱动线程上完成；
///   这里的三个方法只负责“投递请求并唤醒”，可从任意线程调用且不阻塞。
/// - **契约 (What)**：实现方必须容忍对已关闭会话的重复调用，直接忽略即可。
pub trait SessionIo: Send + Sync + 'static {
    /// 待写队列出现新数据。
    fn flush(&self, session: &IoSession);

    /// 读/写挂起状态变化，需要重算兴趣集。
    fn update_interest(&self, session: &IoSession);

    /// 请求关闭；`immediately` 为真时丢弃待写数据。
    fn close(&self, session: &IoSession, immediately: bool);
}

/// 一条已接入的连接。
pub struct IoSession {
    id: u64,
    service: Weak<ServiceSupport>,
    handler: Arc<dyn IoHandler>,
    io: Arc<dyn SessionIo>,
    local_address: SocketAddr,
    remote_address: SocketAddr,
    created_at: Instant,
    created_wall: SystemTime,
    state: AtomicU8,
    close_requested: AtomicBool,
    close_immediately: AtomicBool,
    close_future: CloseFuture,
    config: ArcSwap<SessionConfig>,
    chain: IoFilterChain,
    attributes: AttributeMap,
    write_tx: Sender<WriteRequest>,
    write_rx: Receiver<WriteRequest>,
    read_suspended: AtomicBool,
    write_suspended: AtomicBool,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_messages: AtomicU64,
    scheduled_write_bytes: AtomicU64,
    scheduled_write_messages: AtomicU64,
    last_read: AtomicU64,
    last_write: AtomicU64,
    idle: IdleCounters,
}

impl IoSession {
    /// 为刚接入的连接创建会话，并按服务的链构建器装配过滤器链。
    ///
    /// 返回的会话处于 `Connecting`；由传输层调用 [`ServiceSupport::open_session`] 完成接入。
    pub fn new(
        service: &Arc<ServiceSupport>,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        io: Arc<dyn SessionIo>,
    ) -> Result<Arc<Self>, CoreError> {
        let (write_tx, write_rx) = crossbeam_channel::unbounded();
        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            service: Arc::downgrade(service),
            handler: service.handler(),
            io,
            local_address,
            remote_address,
            created_at: Instant::now(),
            created_wall: SystemTime::now(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            close_requested: AtomicBool::new(false),
            close_immediately: AtomicBool::new(false),
            close_future: CloseFuture::new(),
            config: ArcSwap::from_pointee(service.session_config()),
            chain: IoFilterChain::new(),
            attributes: AttributeMap::new(),
            write_tx,
            write_rx,
            read_suspended: AtomicBool::new(false),
            write_suspended: AtomicBool::new(false),
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            read_messages: AtomicU64::new(0),
            written_messages: AtomicU64::new(0),
            scheduled_write_bytes: AtomicU64::new(0),
            scheduled_write_messages: AtomicU64::new(0),
            last_read: AtomicU64::new(0),
            last_write: AtomicU64::new(0),
            idle: IdleCounters::default(),
        });
        service
            .filter_chain_builder()
            .build_into(&session.chain)?;
        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 所属服务；服务已释放时返回 `None`。
    pub fn service(&self) -> Option<Arc<ServiceSupport>> {
        self.service.upgrade()
    }

    pub fn handler(&self) -> &Arc<dyn IoHandler> {
        &self.handler
    }

    pub fn filter_chain(&self) -> &IoFilterChain {
        &self.chain
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// `Closing` 或 `Closed`。
    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    pub fn close_future(&self) -> CloseFuture {
        self.close_future.clone()
    }

    /// 当前配置的快照。
    pub fn config(&self) -> Arc<SessionConfig> {
        self.config.load_full()
    }

    /// 运行期调整空闲时长，下一轮空闲检查即生效。
    pub fn set_idle_time(&self, status: IdleStatus, idle_time: Duration) {
        self.config.rcu(|current| {
            let mut next = SessionConfig::clone(current);
            next.set_idle_time(status, idle_time);
            next
        });
    }

    /// 写出消息。
    ///
    /// # 教案式说明
    /// - **逻辑 (How)**：构造 [`WriteRequest`] 后从链尾出发，经过每个过滤器的 `filter_write`
    ///   抵达链头，再进入待写队列并通知反应器；
    /// - **契约 (What)**：会话不处于 `Connected` 时立即返回以 [`CoreError::SessionClosed`]
    ///   失败的 future；被过滤器丢弃的请求以 [`CoreError::WriteDiscarded`] 完成。
    pub fn write(self: &Arc<Self>, message: impl Into<Message>) -> WriteFuture {
        if self.state() != SessionState::Connected {
            return WriteFuture::failed(self.closed_error());
        }
        let request = WriteRequest::new(message.into());
        let future = request.future();
        self.chain.fire_filter_write(self, request);
        future
    }

    /// 请求关闭。
    ///
    /// - `immediately = false`：已入队的写请求全部写出后再关闭；
    /// - `immediately = true`：反应器下一轮循环即注销套接字，未写出的请求以
    ///   [`CoreError::SessionClosed`] 失败。
    ///
    /// 重复调用返回同一个 future；先优雅关闭、后立即关闭会升级为立即关闭。
    pub fn close(self: &Arc<Self>, immediately: bool) -> CloseFuture {
        if self.state() == SessionState::Closed {
            return self.close_future.clone();
        }
        if immediately {
            let escalated = !self.close_immediately.swap(true, Ordering::AcqRel);
            let first = !self.close_requested.swap(true, Ordering::AcqRel);
            if first || escalated {
                self.chain.fire_filter_close(self);
            }
        } else if !self.close_requested.swap(true, Ordering::AcqRel) {
            self.chain.fire_filter_close(self);
        }
        self.close_future.clone()
    }

    pub fn suspend_read(&self) {
        if !self.read_suspended.swap(true, Ordering::AcqRel) {
            self.io.update_interest(self);
        }
    }

    pub fn resume_read(&self) {
        if self.read_suspended.swap(false, Ordering::AcqRel) {
            self.io.update_interest(self);
        }
    }

    pub fn suspend_write(&self) {
        if !self.write_suspended.swap(true, Ordering::AcqRel) {
            self.io.update_interest(self);
        }
    }

    pub fn resume_write(&self) {
        if self.write_suspended.swap(false, Ordering::AcqRel) {
            self.io.update_interest(self);
        }
    }

    pub fn is_read_suspended(&self) -> bool {
        self.read_suspended.load(Ordering::Acquire)
    }

    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::Acquire)
    }

    pub fn creation_time(&self) -> SystemTime {
        self.created_wall
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_read_time(&self) -> Instant {
        self.instant_of(self.last_read.load(Ordering::Acquire))
    }

    pub fn last_write_time(&self) -> Instant {
        self.instant_of(self.last_write.load(Ordering::Acquire))
    }

    pub fn last_io_time(&self) -> Instant {
        self.instant_of(self.last_io_offset())
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Acquire)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Acquire)
    }

    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::Acquire)
    }

    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::Acquire)
    }

    /// 已入队但尚未写出的字节数。
    pub fn scheduled_write_bytes(&self) -> u64 {
        self.scheduled_write_bytes.load(Ordering::Acquire)
    }

    pub fn scheduled_write_messages(&self) -> u64 {
        self.scheduled_write_messages.load(Ordering::Acquire)
    }

    /// 连续空闲次数；对应方向发生 IO 后归零。
    pub fn idle_count(&self, status: IdleStatus) -> u64 {
        self.idle.count(status)
    }

    pub fn is_idle(&self, status: IdleStatus) -> bool {
        self.idle_count(status) > 0
    }

    /// 最近一次触发 `status` 空闲事件的时刻。
    pub fn last_idle_time(&self, status: IdleStatus) -> Option<Instant> {
        match self.idle.last_fired(status) {
            0 => None,
            offset => Some(self.instant_of(offset)),
        }
    }

    // ----- 以下方法供传输层在驱动线程上调用 -----

    /// 取出下一个待写请求。
    pub fn poll_write(&self) -> Option<WriteRequest> {
        self.write_rx.try_recv().ok()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_rx.is_empty()
    }

    /// 以 [`CoreError::SessionClosed`] 失败队列中的全部请求，返回失败的条数。
    ///
    /// 传输层在关闭会话前后各调用一次；与 [`enqueue_write`](Self::enqueue_write) 的
    /// 关闭后自清理配合，进入 `Closed` 之后不会有请求滞留在队列里。
    pub fn fail_pending_writes(&self) -> usize {
        fence(Ordering::SeqCst);
        let mut failed = 0;
        while let Some(request) = self.poll_write() {
            self.forget_scheduled_write(request.message().byte_len().unwrap_or(0));
            let (_, promise) = request.into_parts();
            promise.fail(self.closed_error());
            failed += 1;
        }
        failed
    }

    /// 关闭请求是否要求丢弃待写数据。
    pub fn close_immediately_requested(&self) -> bool {
        self.close_immediately.load(Ordering::Acquire)
    }

    /// 记录一次读取。
    pub fn record_read(&self, bytes: usize, now: Instant) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::AcqRel);
        self.last_read.store(self.offset_of(now), Ordering::Release);
        self.idle.reset(IdleStatus::ReaderIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    /// 记录一次写出；`bytes` 计入统计并从已调度字节中扣除。
    pub fn record_written(&self, bytes: usize, now: Instant) {
        self.written_bytes.fetch_add(bytes as u64, Ordering::AcqRel);
        decrement(&self.scheduled_write_bytes, bytes as u64);
        self.last_write.store(self.offset_of(now), Ordering::Release);
        self.idle.reset(IdleStatus::WriterIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    /// 一个写请求全部写出：计数并沿链路投递 `message_sent`。
    pub fn notify_message_sent(self: &Arc<Self>, message: Message) {
        self.written_messages.fetch_add(1, Ordering::AcqRel);
        decrement(&self.scheduled_write_messages, 1);
        self.chain.fire_message_sent(self, message);
    }

    /// 一个写请求被放弃（未写出或部分写出）：从已调度计数中扣除剩余量。
    pub fn forget_scheduled_write(&self, remaining_bytes: usize) {
        decrement(&self.scheduled_write_bytes, remaining_bytes as u64);
        decrement(&self.scheduled_write_messages, 1);
    }

    /// 按配置检查三类空闲，每个超时窗口最多触发一次。
    pub fn notify_idleness(self: &Arc<Self>, now: Instant) {
        if self.state() != SessionState::Connected {
            return;
        }
        let config = self.config.load();
        let now_offset = self.offset_of(now);
        for status in IdleStatus::ALL {
            let idle_time = config.idle_time(status);
            if idle_time.is_zero() {
                continue;
            }
            let reference = self.idle_reference(status);
            if now_offset.saturating_sub(reference) >= duration_nanos(idle_time) {
                self.idle.fire(status, now_offset);
                self.chain.fire_session_idle(self, status);
            }
        }
    }

    /// 最早的空闲截止时刻；未开启空闲检测时返回 `None`。
    pub fn next_idle_deadline(&self) -> Option<Instant> {
        let config = self.config.load();
        IdleStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let idle_time = config.idle_time(status);
                if idle_time.is_zero() {
                    return None;
                }
                let reference = self.instant_of(self.idle_reference(status));
                reference.checked_add(idle_time)
            })
            .min()
    }

    pub(crate) fn mark_connected(&self) {
        self.advance_state(SessionState::Connected);
    }

    /// 进入 `Closed`；返回是否由本次调用完成转换。
    pub(crate) fn mark_closed(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::SeqCst) != SessionState::Closed as u8
    }

    pub(crate) fn complete_close(&self) {
        self.close_future.complete(Ok(()));
    }

    /// 链头收到写请求：入队并通知反应器。
    pub(crate) fn enqueue_write(&self, request: WriteRequest) {
        if self.is_closing() {
            let (_, promise) = request.into_parts();
            promise.fail(self.closed_error());
            return;
        }
        let bytes = request.message().byte_len().unwrap_or(0);
        self.scheduled_write_bytes
            .fetch_add(bytes as u64, Ordering::AcqRel);
        self.scheduled_write_messages.fetch_add(1, Ordering::AcqRel);
        if let Err(rejected) = self.write_tx.send(request) {
            self.forget_scheduled_write(bytes);
            let (_, promise) = rejected.into_inner().into_parts();
            promise.fail(self.closed_error());
            return;
        }
        // 入队前的状态检查与入队之间，传输层可能已完成最后一次清理。
        fence(Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) == SessionState::Closed as u8 {
            self.fail_pending_writes();
            return;
        }
        self.io.flush(self);
    }

    /// 链头收到关闭请求：进入 `Closing` 并交给反应器。
    pub(crate) fn close_transport(&self) {
        self.advance_state(SessionState::Closing);
        self.io.close(self, self.close_immediately_requested());
    }

    pub(crate) fn record_message_received(&self) {
        self.read_messages.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn closed_error(&self) -> CoreError {
        CoreError::SessionClosed {
            session_id: self.id,
        }
    }

    fn advance_state(&self, next: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < next as u8).then_some(next as u8)
            });
    }

    fn idle_reference(&self, status: IdleStatus) -> u64 {
        let last_io = match status {
            IdleStatus::ReaderIdle => self.last_read.load(Ordering::Acquire),
            IdleStatus::WriterIdle => self.last_write.load(Ordering::Acquire),
            IdleStatus::BothIdle => self.last_io_offset(),
        };
        last_io.max(self.idle.last_fired(status))
    }

    fn last_io_offset(&self) -> u64 {
        self.last_read
            .load(Ordering::Acquire)
            .max(self.last_write.load(Ordering::Acquire))
    }

    fn offset_of(&self, now: Instant) -> u64 {
        duration_nanos(now.saturating_duration_since(self.created_at))
    }

    fn instant_of(&self, offset: u64) -> Instant {
        self.created_at
            .checked_add(Duration::from_nanos(offset))
            .unwrap_or(self.created_at)
    }
}

impl fmt::Debug for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("local", &self.local_address)
            .field("remote", &self.remote_address)
            .finish()
    }
}

impl fmt::Display for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(0x{:08x}: {} => {})",
            self.id, self.remote_address, self.local_address
        )
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn decrement(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(amount))
    });
}
