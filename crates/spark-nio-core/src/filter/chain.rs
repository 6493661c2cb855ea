//! 会话私有的过滤器链。
//!
//! # 教案式说明
//! - **意图 (Why)**：事件分发发生在驱动线程的热路径上，而链的增删可能来自任意线程
//!   （包括过滤器自己的生命周期回调）；分发不能因此加锁。
//! - **逻辑 (How)**：
//!   1. 链条以 `ArcSwap<Vec<FilterEntry>>` 保存不可变快照，每次分发开始时取一次快照，
//!      整个事件传递期间都沿用它；
//!   2. 变更在可重入互斥锁内复制向量、调整后整体替换，并递增 epoch；
//!   3. 生命周期回调在锁内执行，回调里再次变更同一条链不会死锁。
//! - **契约 (What)**：
//!   - 名称在链内唯一；
//!   - 正在进行的分发看到的是变更前的快照，下一个事件起看到新快照；
//!   - epoch 只增不减，可用来判断变更是否已经发布。

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use parking_lot::ReentrantMutex;

use super::{IoFilter, SharedFilter};
use crate::{
    error::CoreError,
    message::{Message, WriteRequest},
    session::{IdleStatus, IoSession},
};

#[derive(Clone)]
struct FilterEntry {
    name: Arc<str>,
    filter: SharedFilter,
}

/// 过滤器链。
pub struct IoFilterChain {
    entries: ArcSwap<Vec<FilterEntry>>,
    mutation: ReentrantMutex<()>,
    epoch: AtomicU64,
}

impl Default for IoFilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl IoFilterChain {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            mutation: ReentrantMutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// 每次成功变更后递增的逻辑时钟。
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.load().iter().any(|entry| &*entry.name == name)
    }

    pub fn get(&self, name: &str) -> Option<SharedFilter> {
        self.entries
            .load()
            .iter()
            .find(|entry| &*entry.name == name)
            .map(|entry| entry.filter.clone())
    }

    /// 从链头到链尾的名称序列。
    pub fn names(&self) -> Vec<String> {
        self.entries
            .load()
            .iter()
            .map(|entry| entry.name.to_string())
            .collect()
    }

    pub fn add_first(&self, name: &str, filter: impl Into<SharedFilter>) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |_| Ok(0))
    }

    pub fn add_last(&self, name: &str, filter: impl Into<SharedFilter>) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| Ok(entries.len()))
    }

    pub fn add_before(
        &self,
        base: &str,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| position_of(entries, base))
    }

    pub fn add_after(
        &self,
        base: &str,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| {
            position_of(entries, base).map(|index| index + 1)
        })
    }

    /// 摘除过滤器并返回其句柄。
    ///
    /// `on_post_remove` 失败时过滤器仍已摘除，错误原样返回。
    pub fn remove(&self, name: &str) -> Result<SharedFilter, CoreError> {
        let _guard = self.mutation.lock();
        let current = self.entries.load_full();
        let index = position_of(&current, name)?;
        let filter = current[index].filter.clone();
        filter.filter().on_pre_remove(self, name)?;

        let mut next = Vec::clone(&current);
        next.remove(index);
        self.publish(next);

        let post = filter.filter().on_post_remove(self, name);
        filter.detach();
        tracing::debug!(filter = name, epoch = self.epoch(), "filter removed");
        post.map(|()| filter)
    }

    /// 以新过滤器替换同名过滤器，返回旧句柄。
    pub fn replace(
        &self,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<SharedFilter, CoreError> {
        let replacement = filter.into();
        let _guard = self.mutation.lock();
        let current = self.entries.load_full();
        let index = position_of(&current, name)?;
        let previous = current[index].filter.clone();

        replacement.attach()?;
        let prepared = previous
            .filter()
            .on_pre_remove(self, name)
            .and_then(|()| replacement.filter().on_pre_add(self, name));
        if let Err(err) = prepared {
            replacement.detach();
            return Err(err);
        }

        let mut next = Vec::clone(&current);
        next[index] = FilterEntry {
            name: Arc::clone(&current[index].name),
            filter: replacement.clone(),
        };
        self.publish(next);

        let removed = previous.filter().on_post_remove(self, name);
        previous.detach();
        let added = replacement.filter().on_post_add(self, name);
        tracing::debug!(filter = name, epoch = self.epoch(), "filter replaced");
        removed.and(added).map(|()| previous)
    }

    /// 从链尾到链头依次摘除全部过滤器；回调失败只记录日志。
    pub fn clear(&self) {
        let _guard = self.mutation.lock();
        let names: Vec<Arc<str>> = self
            .entries
            .load()
            .iter()
            .rev()
            .map(|entry| Arc::clone(&entry.name))
            .collect();
        for name in names {
            if let Err(err) = self.remove(&name) {
                tracing::warn!(
                    filter = &*name,
                    error.code = err.code(),
                    error = %err,
                    "filter lifecycle hook failed while clearing the chain"
                );
            }
        }
    }

    pub fn fire_session_created(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries.load_full(), 0, session, Inbound::SessionCreated);
    }

    pub fn fire_session_opened(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries.load_full(), 0, session, Inbound::SessionOpened);
    }

    pub fn fire_session_closed(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries.load_full(), 0, session, Inbound::SessionClosed);
    }

    pub fn fire_session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) {
        deliver_inbound(
            &self.entries.load_full(),
            0,
            session,
            Inbound::SessionIdle(status),
        );
    }

    pub fn fire_message_received(&self, session: &Arc<IoSession>, message: Message) {
        deliver_inbound(
            &self.entries.load_full(),
            0,
            session,
            Inbound::MessageReceived(message),
        );
    }

    pub fn fire_message_sent(&self, session: &Arc<IoSession>, message: Message) {
        deliver_inbound(
            &self.entries.load_full(),
            0,
            session,
            Inbound::MessageSent(message),
        );
    }

    pub fn fire_exception_caught(&self, session: &Arc<IoSession>, cause: CoreError) {
        deliver_inbound(
            &self.entries.load_full(),
            0,
            session,
            Inbound::ExceptionCaught(cause),
        );
    }

    pub fn fire_filter_write(&self, session: &Arc<IoSession>, request: WriteRequest) {
        let entries = self.entries.load_full();
        let tail = entries.len();
        deliver_outbound(&entries, tail, session, Outbound::Write(request));
    }

    pub fn fire_filter_close(&self, session: &Arc<IoSession>) {
        let entries = self.entries.load_full();
        let tail = entries.len();
        deliver_outbound(&entries, tail, session, Outbound::Close);
    }

    fn insert<P>(&self, name: &str, filter: SharedFilter, position: P) -> Result<(), CoreError>
    where
        P: FnOnce(&[FilterEntry]) -> Result<usize, CoreError>,
    {
        let _guard = self.mutation.lock();
        let current = self.entries.load_full();
        if current.iter().any(|entry| &*entry.name == name) {
            return Err(CoreError::FilterNameConflict {
                name: name.to_owned(),
            });
        }
        let index = position(&current)?;

        filter.attach()?;
        if let Err(err) = filter.filter().on_pre_add(self, name) {
            filter.detach();
            return Err(err);
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.insert(
            index,
            FilterEntry {
                name: Arc::from(name),
                filter: filter.clone(),
            },
        );
        self.publish(next);

        if let Err(err) = filter.filter().on_post_add(self, name) {
            let withdrawn: Vec<FilterEntry> = self
                .entries
                .load()
                .iter()
                .filter(|entry| &*entry.name != name)
                .cloned()
                .collect();
            self.publish(withdrawn);
            filter.detach();
            return Err(err);
        }
        tracing::debug!(filter = name, epoch = self.epoch(), "filter added");
        Ok(())
    }

    fn publish(&self, entries: Vec<FilterEntry>) {
        self.entries.store(Arc::new(entries));
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for IoFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFilterChain")
            .field("filters", &self.names())
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// 指向链上“下一个”位置的句柄，由链在调用过滤器时传入。
///
/// 入站方法把事件交给更靠近链尾的过滤器（或处理器），出站方法交给更靠近链头的过滤器
/// （或传输层）。句柄持有分发开始时的快照，可以被过滤器保存下来延后使用。
#[derive(Clone)]
pub struct NextFilter {
    entries: Arc<Vec<FilterEntry>>,
    index: usize,
}

impl NextFilter {
    /// 当前过滤器在链中的名称。
    pub fn name(&self) -> &str {
        self.entries
            .get(self.index)
            .map_or("", |entry| &*entry.name)
    }

    pub fn session_created(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries, self.index + 1, session, Inbound::SessionCreated);
    }

    pub fn session_opened(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries, self.index + 1, session, Inbound::SessionOpened);
    }

    pub fn session_closed(&self, session: &Arc<IoSession>) {
        deliver_inbound(&self.entries, self.index + 1, session, Inbound::SessionClosed);
    }

    pub fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) {
        deliver_inbound(
            &self.entries,
            self.index + 1,
            session,
            Inbound::SessionIdle(status),
        );
    }

    pub fn message_received(&self, session: &Arc<IoSession>, message: Message) {
        deliver_inbound(
            &self.entries,
            self.index + 1,
            session,
            Inbound::MessageReceived(message),
        );
    }

    pub fn message_sent(&self, session: &Arc<IoSession>, message: Message) {
        deliver_inbound(
            &self.entries,
            self.index + 1,
            session,
            Inbound::MessageSent(message),
        );
    }

    pub fn exception_caught(&self, session: &Arc<IoSession>, cause: CoreError) {
        deliver_inbound(
            &self.entries,
            self.index + 1,
            session,
            Inbound::ExceptionCaught(cause),
        );
    }

    pub fn filter_write(&self, session: &Arc<IoSession>, request: WriteRequest) {
        deliver_outbound(&self.entries, self.index, session, Outbound::Write(request));
    }

    pub fn filter_close(&self, session: &Arc<IoSession>) {
        deliver_outbound(&self.entries, self.index, session, Outbound::Close);
    }
}

impl fmt::Debug for NextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextFilter")
            .field("filter", &self.name())
            .finish()
    }
}

enum Inbound {
    SessionCreated,
    SessionOpened,
    SessionClosed,
    SessionIdle(IdleStatus),
    MessageReceived(Message),
    MessageSent(Message),
    ExceptionCaught(CoreError),
}

enum Outbound {
    Write(WriteRequest),
    Close,
}

fn position_of(entries: &[FilterEntry], name: &str) -> Result<usize, CoreError> {
    entries
        .iter()
        .position(|entry| &*entry.name == name)
        .ok_or_else(|| CoreError::FilterNotFound {
            name: name.to_owned(),
        })
}

/// 把入站事件交给 `position` 处的过滤器；越过链尾即交给处理器。
fn deliver_inbound(
    entries: &Arc<Vec<FilterEntry>>,
    position: usize,
    session: &Arc<IoSession>,
    event: Inbound,
) {
    let Some(entry) = entries.get(position) else {
        deliver_to_handler(session, event);
        return;
    };
    let handling_exception = matches!(event, Inbound::ExceptionCaught(_));
    let next = NextFilter {
        entries: Arc::clone(entries),
        index: position,
    };
    let filter = entry.filter.filter();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
        Inbound::SessionCreated => filter.session_created(&next, session),
        Inbound::SessionOpened => filter.session_opened(&next, session),
        Inbound::SessionClosed => filter.session_closed(&next, session),
        Inbound::SessionIdle(status) => filter.session_idle(&next, session, status),
        Inbound::MessageReceived(message) => filter.message_received(&next, session, message),
        Inbound::MessageSent(message) => filter.message_sent(&next, session, message),
        Inbound::ExceptionCaught(cause) => filter.exception_caught(&next, session, cause),
    }));
    if let Some(error) = filter_failure(&entry.name, outcome) {
        redeliver(session, error, handling_exception);
    }
}

/// 把出站事件交给 `upper - 1` 处的过滤器；`upper == 0` 即抵达传输层。
fn deliver_outbound(
    entries: &Arc<Vec<FilterEntry>>,
    upper: usize,
    session: &Arc<IoSession>,
    event: Outbound,
) {
    let Some(index) = upper.checked_sub(1) else {
        match event {
            Outbound::Write(request) => session.enqueue_write(request),
            Outbound::Close => session.close_transport(),
        }
        return;
    };
    let entry = &entries[index];
    let closing = matches!(event, Outbound::Close);
    let next = NextFilter {
        entries: Arc::clone(entries),
        index,
    };
    let filter = entry.filter.filter();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
        Outbound::Write(request) => filter.filter_write(&next, session, request),
        Outbound::Close => filter.filter_close(&next, session),
    }));
    if let Some(error) = filter_failure(&entry.name, outcome) {
        // 关闭请求不能被失败的过滤器吞掉；传输层会忽略重复的关闭。
        if closing {
            session.close_transport();
        }
        redeliver(session, error, false);
    }
}

fn deliver_to_handler(session: &Arc<IoSession>, event: Inbound) {
    let handler = session.handler();
    let handling_exception = matches!(event, Inbound::ExceptionCaught(_));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
        Inbound::SessionCreated => handler.session_created(session),
        Inbound::SessionOpened => handler.session_opened(session),
        Inbound::SessionClosed => handler.session_closed(session),
        Inbound::SessionIdle(status) => handler.session_idle(session, status),
        Inbound::MessageReceived(message) => {
            session.record_message_received();
            handler.message_received(session, message)
        }
        Inbound::MessageSent(message) => handler.message_sent(session, message),
        Inbound::ExceptionCaught(cause) => {
            handler.exception_caught(session, cause);
            Ok(())
        }
    }));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(CoreError::HandlerFailure {
            reason: panic_message(payload.as_ref()),
        }),
    };
    if let Some(error) = failure {
        redeliver(session, error, handling_exception);
    }
}

fn filter_failure(
    name: &str,
    outcome: std::thread::Result<Result<(), CoreError>>,
) -> Option<CoreError> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            tracing::debug!(filter = name, error.code = err.code(), "filter returned an error");
            Some(err)
        }
        Err(payload) => Some(CoreError::FilterFailure {
            filter: name.to_owned(),
            reason: panic_message(payload.as_ref()),
        }),
    }
}

fn redeliver(session: &Arc<IoSession>, error: CoreError, handling_exception: bool) {
    if handling_exception {
        tracing::error!(
            session.id = session.id(),
            error.code = error.code(),
            error = %error,
            "exception_caught failed; dropping the error"
        );
        return;
    }
    session.filter_chain().fire_exception_caught(session, error);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
