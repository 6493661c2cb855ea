use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::IoFilter;
use crate::error::CoreError;

/// 可挂到多条链上的过滤器句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：同一个过滤器实例通常由服务的链构建器复制到每个会话的链上，
///   `init`/`destroy` 必须只随第一次挂载和最后一次摘除各执行一次。
/// - **逻辑 (How)**：挂载计数与生命周期回调在同一把互斥锁内执行，挂载与摘除并发时不会
///   出现“已 destroy 又被使用”的窗口。
/// - **契约 (What)**：克隆只复制句柄；[`attachments`](Self::attachments) 为当前引用它的链数量。
#[derive(Clone)]
pub struct SharedFilter {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    filter: Box<dyn IoFilter>,
    attachments: Mutex<usize>,
}

impl SharedFilter {
    pub fn new<F: IoFilter>(filter: F) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                filter: Box::new(filter),
                attachments: Mutex::new(0),
            }),
        }
    }

    pub fn filter(&self) -> &dyn IoFilter {
        self.inner.filter.as_ref()
    }

    pub fn attachments(&self) -> usize {
        *self.inner.attachments.lock()
    }

    pub fn ptr_eq(&self, other: &SharedFilter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self) -> Result<(), CoreError> {
        let mut attachments = self.inner.attachments.lock();
        if *attachments == 0 {
            self.inner.filter.init()?;
        }
        *attachments += 1;
        Ok(())
    }

    pub(crate) fn detach(&self) {
        let mut attachments = self.inner.attachments.lock();
        match *attachments {
            0 => {}
            1 => {
                *attachments = 0;
                self.inner.filter.destroy();
            }
            _ => *attachments -= 1,
        }
    }
}

impl<F: IoFilter> From<F> for SharedFilter {
    fn from(filter: F) -> Self {
        Self::new(filter)
    }
}

impl fmt::Debug for SharedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFilter")
            .field("attachments", &self.attachments())
            .finish()
    }
}
