//! # service 模块说明
//!
//! ## 角色定位（Why）
//! - [`ServiceSupport`] 汇集一个服务与具体传输无关的部分：处理器、链构建器、会话配置模板、
//!   监听者以及受管会话表；传输层（例如 TCP 接入器）持有一份 `Arc<ServiceSupport>`，
//!   并在会话接入、关闭时调用这里的生命周期入口。
//! - [`IoService`]/[`IoAcceptor`] 是面向应用的服务边界。
//!
//! ## 契约（What）
//! - 受管会话表以会话编号为键，接入时登记、关闭时移除；
//! - `service_activated` 只在非激活 → 激活时触发一次，`service_deactivated` 反之；
//! - 监听者列表写时复制，通知过程不持锁，监听者回调里可以安全地增删监听者；
//! - 监听者 panic 会被捕获并记录，不影响驱动线程。

use std::{
    collections::BTreeSet,
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::{
    config::SessionConfig,
    error::CoreError,
    filter::IoFilterChainBuilder,
    handler::IoHandler,
    session::IoSession,
};

/// 服务与会话生命周期的旁路观察者。
pub trait IoServiceListener: Send + Sync + 'static {
    fn service_activated(&self) {}

    fn service_deactivated(&self) {}

    /// 服务进入不可恢复状态（例如多路复用器失效）。
    fn service_failed(&self, error: &CoreError) {
        let _ = error;
    }

    fn session_created(&self, session: &Arc<IoSession>) {
        let _ = session;
    }

    fn session_destroyed(&self, session: &Arc<IoSession>) {
        let _ = session;
    }
}

/// 面向应用的服务视图。
pub trait IoService: Send + Sync {
    fn support(&self) -> &Arc<ServiceSupport>;

    fn filter_chain_builder(&self) -> &IoFilterChainBuilder {
        self.support().filter_chain_builder()
    }

    fn add_listener(&self, listener: Arc<dyn IoServiceListener>) {
        self.support().add_listener(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn IoServiceListener>) -> bool {
        self.support().remove_listener(listener)
    }

    fn managed_sessions(&self) -> Vec<Arc<IoSession>> {
        self.support().managed_sessions()
    }

    fn managed_session_count(&self) -> usize {
        self.support().managed_session_count()
    }

    fn is_active(&self) -> bool {
        self.support().is_active()
    }

    fn session_config(&self) -> SessionConfig {
        self.support().session_config()
    }

    fn set_session_config(&self, config: SessionConfig) -> Result<(), CoreError> {
        self.support().set_session_config(config)
    }
}

/// 接入器：在本地地址上监听并为每个入站连接创建会话。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 同一地址重复绑定返回 [`CoreError::AddressInUse`]；
///   - 解绑未绑定的地址返回 [`CoreError::AddressNotBound`]；
///   - `bind` 返回实际绑定的地址（端口 0 时为系统分配的端口），解绑时应使用该地址；
///   - 第一次成功绑定激活服务，最后一次解绑使服务失活。
pub trait IoAcceptor: IoService {
    fn bind(&self, address: SocketAddr) -> Result<SocketAddr, CoreError>;

    /// 依次绑定多个地址；任一失败时撤销本次调用已完成的绑定。
    fn bind_all(&self, addresses: &[SocketAddr]) -> Result<Vec<SocketAddr>, CoreError> {
        let mut bound = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.bind(*address) {
                Ok(local) => bound.push(local),
                Err(err) => {
                    for local in bound {
                        if let Err(rollback) = self.unbind(local) {
                            tracing::warn!(
                                address = %local,
                                error.code = rollback.code(),
                                "failed to roll back a partial bind"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(bound)
    }

    fn unbind(&self, address: SocketAddr) -> Result<(), CoreError>;

    fn unbind_all(&self) -> Result<(), CoreError>;

    fn local_addresses(&self) -> BTreeSet<SocketAddr>;
}

/// 与传输无关的服务公共部分。
pub struct ServiceSupport {
    handler: Arc<dyn IoHandler>,
    chain_builder: IoFilterChainBuilder,
    session_config: ArcSwap<SessionConfig>,
    listeners: ArcSwap<Vec<Arc<dyn IoServiceListener>>>,
    managed: DashMap<u64, Arc<IoSession>>,
    active: AtomicBool,
    largest_managed: AtomicUsize,
    cumulative_managed: AtomicU64,
}

impl ServiceSupport {
    pub fn new(handler: Arc<dyn IoHandler>, session_config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            handler,
            chain_builder: IoFilterChainBuilder::new(),
            session_config: ArcSwap::from_pointee(session_config),
            listeners: ArcSwap::from_pointee(Vec::new()),
            managed: DashMap::new(),
            active: AtomicBool::new(false),
            largest_managed: AtomicUsize::new(0),
            cumulative_managed: AtomicU64::new(0),
        })
    }

    pub fn handler(&self) -> Arc<dyn IoHandler> {
        Arc::clone(&self.handler)
    }

    pub fn filter_chain_builder(&self) -> &IoFilterChainBuilder {
        &self.chain_builder
    }

    /// 新会话使用的配置模板。
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::clone(&self.session_config.load())
    }

    /// 替换配置模板；只影响之后创建的会话。
    pub fn set_session_config(&self, config: SessionConfig) -> Result<(), CoreError> {
        config.validate()?;
        self.session_config.store(Arc::new(config));
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn IoServiceListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn remove_listener(&self, listener: &Arc<dyn IoServiceListener>) -> bool {
        let target = Arc::as_ptr(listener).cast::<()>();
        let previous = self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|candidate| Arc::as_ptr(*candidate).cast::<()>() != target)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous
            .iter()
            .any(|candidate| Arc::as_ptr(candidate).cast::<()>() == target)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn managed_sessions(&self) -> Vec<Arc<IoSession>> {
        let mut sessions: Vec<_> = self
            .managed
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.sort_by_key(|session| session.id());
        sessions
    }

    pub fn managed_session(&self, id: u64) -> Option<Arc<IoSession>> {
        self.managed.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn managed_session_count(&self) -> usize {
        self.managed.len()
    }

    /// 受管会话数的历史峰值。
    pub fn largest_managed_session_count(&self) -> usize {
        self.largest_managed.load(Ordering::Acquire)
    }

    /// 累计受管过的会话数。
    pub fn cumulative_managed_session_count(&self) -> u64 {
        self.cumulative_managed.load(Ordering::Acquire)
    }

    /// 非激活 → 激活；返回是否发生了转换。
    pub fn fire_service_activated(&self) -> bool {
        if self.active.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("service activated");
        self.notify(|listener| listener.service_activated());
        true
    }

    /// 激活 → 非激活；返回是否发生了转换。
    pub fn fire_service_deactivated(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("service deactivated");
        self.notify(|listener| listener.service_deactivated());
        true
    }

    pub fn fire_service_failed(&self, error: &CoreError) {
        tracing::error!(error.code = error.code(), error = %error, "service failed");
        self.notify(|listener| listener.service_failed(error));
    }

    /// 完成接入：登记受管会话，进入 `Connected`，依次投递 `session_created`、
    /// `session_opened`，最后通知监听者。
    pub fn open_session(&self, session: &Arc<IoSession>) {
        self.managed.insert(session.id(), Arc::clone(session));
        self.cumulative_managed.fetch_add(1, Ordering::AcqRel);
        self.largest_managed
            .fetch_max(self.managed.len(), Ordering::AcqRel);
        session.mark_connected();

        let chain = session.filter_chain();
        chain.fire_session_created(session);
        chain.fire_session_opened(session);
        self.notify(|listener| listener.session_created(session));
    }

    /// 完成关闭：进入 `Closed`，投递 `session_closed` 并拆除过滤器链，移出受管表，
    /// 通知监听者，最后完成关闭 future。重复调用是空操作。
    pub fn close_session(&self, session: &Arc<IoSession>) {
        if !session.mark_closed() {
            return;
        }
        let chain = session.filter_chain();
        chain.fire_session_closed(session);
        chain.clear();
        session.attributes().clear();
        self.managed.remove(&session.id());
        self.notify(|listener| listener.session_destroyed(session));
        session.complete_close();
    }

    fn notify<F>(&self, event: F)
    where
        F: Fn(&dyn IoServiceListener),
    {
        let listeners = self.listeners.load_full();
        for listener in listeners.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| event(&**listener)));
            if outcome.is_err() {
                tracing::error!("service listener panicked; continuing with the next listener");
            }
        }
    }
}

impl fmt::Debug for ServiceSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSupport")
            .field("active", &self.is_active())
            .field("managed_sessions", &self.managed.len())
            .field("filters", &self.chain_builder.names())
            .finish()
    }
}
