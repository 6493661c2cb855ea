//! 单次赋值的完成单元：关闭、写出等异步结果的统一载体。
//!
//! # 教案式说明
//! - **意图 (Why)**：反应器线程完成操作，业务线程等待结果；等待方式既可以是阻塞
//!   （[`IoFuture::wait`]）、带超时阻塞，也可以是在任意执行器上 `.await`，或注册回调。
//! - **逻辑 (How)**：结果写入受 `parking_lot::Mutex` 保护的槽位，写入后唤醒条件变量、
//!   全部 `Waker` 与回调；回调与 `Waker` 在锁外执行，避免回调内再次访问同一 future 时死锁。
//! - **契约 (What)**：
//!   - 只有第一次 [`complete`](IoFuture::complete) 生效，后续调用返回 `false`；
//!   - 任意数量的等待者都能拿到同一结果的克隆；
//!   - 在结果就绪后注册的回调立即在调用线程执行。

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::error::CoreError;

type Listener<T> = Box<dyn FnOnce(&Result<T, CoreError>) + Send + 'static>;

struct Slot<T> {
    outcome: Option<Result<T, CoreError>>,
    wakers: Vec<Waker>,
    listeners: Vec<Listener<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// 可克隆的完成句柄，克隆体共享同一个结果槽。
pub struct IoFuture<T> {
    shared: Arc<Shared<T>>,
}

/// 会话关闭完成：进入 CLOSED 时以 `Ok(())` 完成。
pub type CloseFuture = IoFuture<()>;

/// 写请求完成：全部字节写入套接字后以 `Ok(())` 完成，丢弃或会话关闭时以错误完成。
pub type WriteFuture = IoFuture<()>;

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for IoFuture<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IoFuture<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    outcome: None,
                    wakers: Vec::new(),
                    listeners: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// 构造一个已经失败的 future。
    pub fn failed(error: CoreError) -> Self {
        let future = Self::new();
        future.complete(Err(error));
        future
    }

    /// 写入结果并唤醒所有等待者；已完成时返回 `false` 且不改变结果。
    pub fn complete(&self, outcome: Result<T, CoreError>) -> bool {
        let (wakers, listeners) = {
            let mut slot = self.shared.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut slot.wakers),
                std::mem::take(&mut slot.listeners),
            )
        };
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            listener(&outcome);
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    /// 非阻塞地读取结果。
    pub fn result(&self) -> Option<Result<T, CoreError>> {
        self.shared.slot.lock().outcome.clone()
    }

    /// 阻塞直到完成。
    ///
    /// 不要在反应器线程（例如处理器回调）里调用：结果往往正需要该线程来产生。
    pub fn wait(&self) -> Result<T, CoreError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(outcome) = slot.outcome.as_ref() {
                return outcome.clone();
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// 最多阻塞 `timeout`；超时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, CoreError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(outcome) = slot.outcome.as_ref() {
                return Some(outcome.clone());
            }
            if self
                .shared
                .ready
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot.outcome.clone();
            }
        }
    }

    /// 注册完成回调；若已完成则立即在当前线程执行。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<T, CoreError>) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.shared.slot.lock();
            match slot.outcome.as_ref() {
                Some(outcome) => outcome.clone(),
                None => {
                    slot.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&outcome);
    }
}

impl<T> std::future::Future for IoFuture<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, CoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(outcome) = slot.outcome.as_ref() {
            return Poll::Ready(outcome.clone());
        }
        if !slot.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.shared.slot.lock().outcome.is_some();
        f.debug_struct("IoFuture").field("done", &done).finish()
    }
}
