//! TCP 接入器。
//!
//! # 教案式说明
//! - **意图 (Why)**：把“在哪些地址上监听”这一低频管理操作与高频的 IO 驱动分开。接入器只
//!   负责创建监听套接字、维护已绑定地址表并把套接字交给放置策略挑选的处理器；
//!   之后的 accept、读写与空闲检测全部在处理器的驱动线程上进行。
//! - **逻辑 (How)**：
//!   - `bind`：在调用线程上用 `socket2` 创建非阻塞监听套接字（`SO_REUSEADDR` + backlog），
//!     同步拿到端口占用等错误，再提交给处理器并等待注册完成；
//!   - `unbind`：提交注销并等待处理器关闭套接字，地址随即可重新绑定；
//!   - 地址表由一把互斥锁保护，绑定/解绑是低频操作；等待驱动线程确认期间不持锁，
//!     处理器回调里查询 [`local_addresses`](IoAcceptor::local_addresses) 不会卡住；
//!   - 绑定先登记一个未确认的占位项挡住并发的同地址绑定，注册成功后转为确认，失败则撤回。
//! - **契约 (What)**：
//!   - 本进程内重复绑定同一地址返回 [`CoreError::AddressInUse`]，操作系统报告的占用同样映射为该错误；
//!   - 解绑未绑定的地址返回 [`CoreError::AddressNotBound`]；
//!   - 第一个地址绑定成功时服务激活；最后一个地址解绑时服务失活，并按配置关闭全部受管会话；
//!   - 丢弃接入器等价于调用 [`TcpAcceptor::dispose`]。

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use mio::net::TcpListener;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use spark_nio_core::{CoreError, IoAcceptor, IoHandler, IoService, ServiceSupport};

use crate::{
    config::AcceptorConfig,
    error::{self, OperationKind, map_io_error},
    processor::SelectorProcessor,
    strategy::{OneThreadSelectorStrategy, RoundRobinSelectorStrategy, SelectorStrategy},
};

/// 基于选择器处理器的 TCP 接入器。
pub struct TcpAcceptor {
    support: Arc<ServiceSupport>,
    strategy: Arc<dyn SelectorStrategy>,
    config: AcceptorConfig,
    bound: Mutex<BTreeMap<SocketAddr, Binding>>,
    disposed: AtomicBool,
}

/// 地址表中的一项；`confirmed` 为假表示驱动线程尚未确认注册。
struct Binding {
    processor: SelectorProcessor,
    confirmed: bool,
}

impl TcpAcceptor {
    /// 以默认配置创建接入器。
    pub fn new(handler: impl IoHandler) -> Result<Self, CoreError> {
        Self::with_config(handler, AcceptorConfig::default())
    }

    /// 按配置创建接入器：一个处理器时使用单线程策略，否则轮询。
    pub fn with_config(handler: impl IoHandler, config: AcceptorConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let strategy: Arc<dyn SelectorStrategy> = if config.reactor.processor_count == 1 {
            Arc::new(OneThreadSelectorStrategy::new(&config.reactor))
        } else {
            Arc::new(RoundRobinSelectorStrategy::new(&config.reactor)?)
        };
        Self::with_strategy(Arc::new(handler), config, strategy)
    }

    /// 使用自定义放置策略。
    pub fn with_strategy(
        handler: Arc<dyn IoHandler>,
        config: AcceptorConfig,
        strategy: Arc<dyn SelectorStrategy>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            support: ServiceSupport::new(handler, config.session.clone()),
            strategy,
            config,
            bound: Mutex::new(BTreeMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AcceptorConfig {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn SelectorStrategy> {
        &self.strategy
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 解绑全部地址并立即关闭全部受管会话；重复调用是空操作。
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.unbind_all() {
            tracing::warn!(error.code = err.code(), error = %err, "failed to unbind while disposing");
        }
        for session in self.support.managed_sessions() {
            session.close(true);
        }
        tracing::debug!("acceptor disposed");
    }

    fn open_listener(&self, address: SocketAddr) -> Result<(TcpListener, SocketAddr), CoreError> {
        let configure = |err| map_io_error(error::CONFIGURE, err);
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(configure)?;
        socket
            .set_reuse_address(self.config.reuse_address)
            .map_err(configure)?;
        socket.set_nonblocking(true).map_err(configure)?;
        socket
            .bind(&address.into())
            .map_err(|err| in_use_or(error::BIND, address, err))?;
        socket
            .listen(self.config.backlog)
            .map_err(|err| in_use_or(error::LISTEN, address, err))?;
        let local = socket
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?
            .as_socket()
            .ok_or_else(|| {
                map_io_error(
                    error::BIND,
                    io::Error::new(io::ErrorKind::InvalidData, "listener is not an inet socket"),
                )
            })?;
        let listener = TcpListener::from_std(std::net::TcpListener::from(socket));
        Ok((listener, local))
    }

    fn deactivate(&self) {
        if self.support.fire_service_deactivated() && self.config.disconnect_on_unbind {
            for session in self.support.managed_sessions() {
                session.close(true);
            }
        }
    }
}

impl IoService for TcpAcceptor {
    fn support(&self) -> &Arc<ServiceSupport> {
        &self.support
    }
}

impl IoAcceptor for TcpAcceptor {
    fn bind(&self, address: SocketAddr) -> Result<SocketAddr, CoreError> {
        if self.is_disposed() {
            return Err(CoreError::config("acceptor has been disposed"));
        }
        let mut bound = self.bound.lock();
        if address.port() != 0 && bound.contains_key(&address) {
            return Err(CoreError::AddressInUse { address });
        }
        let (listener, local) = self.open_listener(address)?;
        let processor = self.strategy.processor_for_bind(local);
        bound.insert(
            local,
            Binding {
                processor: processor.clone(),
                confirmed: false,
            },
        );
        drop(bound);

        let registered = processor.add_listener(
            local,
            listener,
            Arc::clone(&self.strategy),
            Arc::clone(&self.support),
        );
        if let Err(err) = registered {
            self.bound.lock().remove(&local);
            return Err(err);
        }

        if self.is_disposed() {
            // 等待确认期间接入器已被丢弃，撤回刚完成的注册。
            self.bound.lock().remove(&local);
            if let Err(err) = processor.remove_listener(local) {
                tracing::warn!(addr = %local, error.code = err.code(), "failed to withdraw listener after dispose");
            }
            return Err(CoreError::config("acceptor has been disposed"));
        }
        if let Some(binding) = self.bound.lock().get_mut(&local) {
            binding.confirmed = true;
        }
        tracing::info!(addr = %local, processor = processor.name(), "address bound");

        self.support.fire_service_activated();
        Ok(local)
    }

    fn unbind(&self, address: SocketAddr) -> Result<(), CoreError> {
        let mut bound = self.bound.lock();
        // 仍在注册中的占位项不归解绑方处理。
        if !bound.get(&address).is_some_and(|binding| binding.confirmed) {
            return Err(CoreError::AddressNotBound { address });
        }
        let Some(binding) = bound.remove(&address) else {
            return Err(CoreError::AddressNotBound { address });
        };
        drop(bound);

        let outcome = binding.processor.remove_listener(address);
        let last = !self.bound.lock().values().any(|binding| binding.confirmed);

        tracing::info!(addr = %address, "address unbound");
        if last {
            self.deactivate();
        }
        outcome
    }

    fn unbind_all(&self) -> Result<(), CoreError> {
        let addresses = self.local_addresses();
        let mut first_error = None;
        for address in addresses {
            match self.unbind(address) {
                Ok(()) | Err(CoreError::AddressNotBound { .. }) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn local_addresses(&self) -> BTreeSet<SocketAddr> {
        self.bound
            .lock()
            .iter()
            .filter(|(_, binding)| binding.confirmed)
            .map(|(address, _)| *address)
            .collect()
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for TcpAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpAcceptor")
            .field("local_addresses", &self.local_addresses())
            .field("support", &self.support)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn in_use_or(kind: OperationKind, address: SocketAddr, err: io::Error) -> CoreError {
    if err.kind() == io::ErrorKind::AddrInUse {
        CoreError::AddressInUse { address }
    } else {
        map_io_error(kind, err)
    }
}
