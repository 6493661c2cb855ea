//! 链路上流动的消息与写请求。
//!
//! 入站方向传输层总是产出 [`Message::Buffer`]；编解码过滤器可以把它替换为
//! [`Message::User`] 携带的任意业务对象。出站方向传输层只认字节形态
//! （`Buffer` 或 `Bytes`），其余形态必须在链路中编码完毕。

use std::{any::Any, fmt};

use bytes::Bytes;
use spark_nio_buffer::IoBuffer;

use crate::{error::CoreError, future::WriteFuture};

/// 不透明消息。
pub enum Message {
    Buffer(IoBuffer),
    Bytes(Bytes),
    User(Box<dyn Any + Send + Sync>),
}

impl Message {
    /// 包装任意业务对象。
    pub fn user<T: Any + Send + Sync>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    /// 形态名称，用于日志与 [`CoreError::UnsupportedMessage`]。
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Bytes(_) => "bytes",
            Self::User(_) => "user",
        }
    }

    pub fn as_buffer(&self) -> Option<&IoBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(value) => value.downcast_ref(),
            _ => None,
        }
    }

    /// 取出业务对象；类型不符时原样返还消息。
    pub fn into_user<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::User(value) => value.downcast::<T>().map(|boxed| *boxed).map_err(Self::User),
            other => Err(other),
        }
    }

    /// 字节形态的可读字节数；业务对象返回 `None`。
    pub fn byte_len(&self) -> Option<usize> {
        match self {
            Self::Buffer(buffer) => Some(buffer.remaining()),
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::User(_) => None,
        }
    }

    /// 复制出可读字节；业务对象返回 `None`。
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Buffer(buffer) => Some(buffer.freeze()),
            Self::Bytes(bytes) => Some(bytes.clone()),
            Self::User(_) => None,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::User(_) => f.write_str("User(..)"),
        }
    }
}

impl From<IoBuffer> for Message {
    fn from(buffer: IoBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

/// 写请求的完成端。
///
/// # 教案式说明
/// - **意图 (Why)**：写请求可能被任意过滤器吞掉；把“必须给出结果”的义务绑定到值的所有权上，
///   谁最后持有它谁负责完成。
/// - **契约 (What)**：未经 [`succeed`](Self::succeed)/[`fail`](Self::fail) 就被丢弃时，
///   关联的 [`WriteFuture`] 以 [`CoreError::WriteDiscarded`] 完成。
pub struct WritePromise {
    future: WriteFuture,
}

impl WritePromise {
    pub fn succeed(self) {
        self.future.complete(Ok(()));
    }

    pub fn fail(self, error: CoreError) {
        self.future.complete(Err(error));
    }

    pub fn future(&self) -> WriteFuture {
        self.future.clone()
    }
}

impl Drop for WritePromise {
    fn drop(&mut self) {
        self.future.complete(Err(CoreError::WriteDiscarded));
    }
}

impl fmt::Debug for WritePromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePromise")
            .field("done", &self.future.is_done())
            .finish()
    }
}

/// 出站写请求：消息加上完成端。
///
/// 过滤器可以通过 [`message_mut`](Self::message_mut) / [`set_message`](Self::set_message)
/// 就地改写消息（例如编码），完成端随请求一起向链头移动。
#[derive(Debug)]
pub struct WriteRequest {
    message: Message,
    promise: WritePromise,
}

impl WriteRequest {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            promise: WritePromise {
                future: WriteFuture::new(),
            },
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// 替换消息并返回旧消息。
    pub fn set_message(&mut self, message: Message) -> Message {
        std::mem::replace(&mut self.message, message)
    }

    pub fn future(&self) -> WriteFuture {
        self.promise.future()
    }

    pub fn into_parts(self) -> (Message, WritePromise) {
        (self.message, self.promise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_request_reports_discard() {
        let request = WriteRequest::new(Message::from("ping"));
        let future = request.future();
        drop(request);
        let err = future.result().expect("已完成").expect_err("被丢弃");
        assert!(matches!(err, CoreError::WriteDiscarded));
    }

    #[test]
    fn completed_promise_is_not_overwritten_on_drop() {
        let (message, promise) = WriteRequest::new(Message::from(vec![1, 2, 3])).into_parts();
        let future = promise.future();
        assert_eq!(message.byte_len(), Some(3));
        promise.succeed();
        assert!(future.result().expect("已完成").is_ok());
    }

    #[test]
    fn user_messages_round_trip_through_downcast() {
        let message = Message::user(42u32);
        assert_eq!(message.downcast_ref::<u32>(), Some(&42));
        let message = message.into_user::<String>().expect_err("类型不符");
        assert_eq!(message.into_user::<u32>().expect("取回"), 42);
    }
}
