//! 过滤器链在真实会话上的分发顺序与失败重投递。

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use proptest::prelude::*;
use spark_nio_core::{
    CoreError, IoFilter, IoFilterChain, IoSession, Message, NextFilter, SessionConfig,
    SharedFilter, WriteRequest,
};
use support::{EventLog, RecordingHandler, Tracer, open_session, service_with};

fn tracer(label: &'static str, log: &EventLog) -> Tracer {
    Tracer {
        label,
        log: Arc::clone(log),
    }
}

#[test]
fn inbound_runs_head_to_tail_and_outbound_tail_to_head() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let support = service_with(handler, SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last("first", tracer("first", &log))
        .expect("添加 first");
    support
        .filter_chain_builder()
        .add_last("second", tracer("second", &log))
        .expect("添加 second");

    let (session, io) = open_session(&support);
    log.lock().clear();

    session
        .filter_chain()
        .fire_message_received(&session, Message::from("ping"));
    let write = session.write("pong");
    assert_eq!(
        *log.lock(),
        [
            "first:received",
            "second:received",
            "handler:received:ping",
            "second:write",
            "first:write",
        ]
    );
    assert!(!write.is_done(), "写请求仍在待写队列中");
    assert_eq!(io.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(session.read_messages(), 1);

    let request = session.poll_write().expect("待写队列中有请求");
    assert_eq!(request.message().to_bytes().expect("字节消息"), "pong");
}

struct Failing {
    panics: bool,
}

impl IoFilter for Failing {
    fn message_received(
        &self,
        _: &NextFilter,
        _: &Arc<IoSession>,
        _: Message,
    ) -> Result<(), CoreError> {
        if self.panics {
            panic!("decoder exploded");
        }
        Err(CoreError::application("malformed frame"))
    }
}

#[test]
fn filter_errors_reach_the_handler_as_exceptions() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let support = service_with(handler, SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last("codec", Failing { panics: false })
        .expect("添加 codec");
    let (session, _) = open_session(&support);
    log.lock().clear();

    session
        .filter_chain()
        .fire_message_received(&session, Message::from("x"));
    assert_eq!(*log.lock(), ["handler:exception:spark.nio.application"]);
}

#[test]
fn filter_panics_are_wrapped_and_redelivered() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let support = service_with(handler, SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last("codec", Failing { panics: true })
        .expect("添加 codec");
    let (session, _) = open_session(&support);
    log.lock().clear();

    session
        .filter_chain()
        .fire_message_received(&session, Message::from("x"));
    assert_eq!(*log.lock(), ["handler:exception:spark.nio.filter.failed"]);
    assert!(session.is_connected(), "过滤器 panic 不影响会话");
}

struct ExplodingExceptionFilter {
    calls: Arc<AtomicUsize>,
}

impl IoFilter for ExplodingExceptionFilter {
    fn exception_caught(
        &self,
        _: &NextFilter,
        _: &Arc<IoSession>,
        _: CoreError,
    ) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::application("exception handling failed"))
    }
}

#[test]
fn failures_while_handling_exceptions_do_not_recurse() {
    let calls = Arc::new(AtomicUsize::new(0));
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last(
            "guard",
            ExplodingExceptionFilter {
                calls: Arc::clone(&calls),
            },
        )
        .expect("添加 guard");
    let (session, _) = open_session(&support);

    session
        .filter_chain()
        .fire_exception_caught(&session, CoreError::application("boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct Swallow;

impl IoFilter for Swallow {
    fn filter_write(
        &self,
        _: &NextFilter,
        _: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<(), CoreError> {
        drop(request);
        Ok(())
    }
}

#[test]
fn swallowed_write_requests_complete_as_discarded() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last("swallow", Swallow)
        .expect("添加 swallow");
    let (session, io) = open_session(&support);

    let future = session.write("lost");
    let err = future.result().expect("已完成").expect_err("被丢弃");
    assert!(matches!(err, CoreError::WriteDiscarded));
    assert_eq!(io.flushes.load(Ordering::SeqCst), 0);
    assert_eq!(session.scheduled_write_messages(), 0);
}

struct Counting {
    inits: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
}

impl IoFilter for Counting {
    fn init(&self) -> Result<(), CoreError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn shared_filter_is_initialised_once_and_destroyed_after_the_last_session() {
    let inits = Arc::new(AtomicUsize::new(0));
    let destroys = Arc::new(AtomicUsize::new(0));
    let shared = SharedFilter::new(Counting {
        inits: Arc::clone(&inits),
        destroys: Arc::clone(&destroys),
    });
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last("counting", shared.clone())
        .expect("添加 counting");

    let (first, _) = open_session(&support);
    let (second, _) = open_session(&support);
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(shared.attachments(), 2);

    support.close_session(&first);
    assert_eq!(destroys.load(Ordering::SeqCst), 0);
    support.close_session(&second);
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
    assert_eq!(shared.attachments(), 0);

    let (_third, _) = open_session(&support);
    assert_eq!(inits.load(Ordering::SeqCst), 2, "全部摘除后再次挂载会重新 init");
}

struct SelfRemoving {
    removed: Arc<Mutex<bool>>,
}

impl IoFilter for SelfRemoving {
    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<(), CoreError> {
        let name = next.name().to_owned();
        session.filter_chain().remove(&name)?;
        *self.removed.lock() = true;
        next.message_received(session, message);
        Ok(())
    }
}

#[test]
fn filters_may_remove_themselves_during_dispatch() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let removed = Arc::new(Mutex::new(false));
    let support = service_with(handler, SessionConfig::default());
    support
        .filter_chain_builder()
        .add_last(
            "once",
            SelfRemoving {
                removed: Arc::clone(&removed),
            },
        )
        .expect("添加 once");
    let (session, _) = open_session(&support);
    log.lock().clear();

    let chain = session.filter_chain();
    chain.fire_message_received(&session, Message::from("a"));
    chain.fire_message_received(&session, Message::from("b"));
    assert!(*removed.lock());
    assert!(chain.is_empty());
    assert_eq!(*log.lock(), ["handler:received:a", "handler:received:b"]);
}

#[derive(Clone, Debug)]
enum ChainOp {
    AddFirst(u8),
    AddLast(u8),
    AddBefore(u8, u8),
    AddAfter(u8, u8),
    Remove(u8),
}

struct Marker;

impl IoFilter for Marker {}

fn name_of(id: u8) -> String {
    format!("f{id}")
}

fn chain_op() -> impl Strategy<Value = ChainOp> {
    let id = 0u8..6;
    prop_oneof![
        id.clone().prop_map(ChainOp::AddFirst),
        id.clone().prop_map(ChainOp::AddLast),
        (id.clone(), id.clone()).prop_map(|(base, new)| ChainOp::AddBefore(base, new)),
        (id.clone(), id.clone()).prop_map(|(base, new)| ChainOp::AddAfter(base, new)),
        id.prop_map(ChainOp::Remove),
    ]
}

proptest! {
    #[test]
    fn chain_mutations_match_a_vector_model(ops in prop::collection::vec(chain_op(), 1..40)) {
        let chain = IoFilterChain::new();
        let mut model: Vec<String> = Vec::new();
        let mut epoch = 0;

        for op in ops {
            let (outcome, expected) = match op {
                ChainOp::AddFirst(id) => {
                    let name = name_of(id);
                    let expected = (!model.contains(&name)).then_some(0);
                    (chain.add_first(&name, Marker).map(|_| ()), expected.map(|at| (at, name)))
                }
                ChainOp::AddLast(id) => {
                    let name = name_of(id);
                    let expected = (!model.contains(&name)).then_some(model.len());
                    (chain.add_last(&name, Marker).map(|_| ()), expected.map(|at| (at, name)))
                }
                ChainOp::AddBefore(base, id) => {
                    let (base, name) = (name_of(base), name_of(id));
                    let expected = if model.contains(&name) {
                        None
                    } else {
                        model.iter().position(|entry| *entry == base)
                    };
                    (chain.add_before(&base, &name, Marker).map(|_| ()), expected.map(|at| (at, name)))
                }
                ChainOp::AddAfter(base, id) => {
                    let (base, name) = (name_of(base), name_of(id));
                    let expected = if model.contains(&name) {
                        None
                    } else {
                        model.iter().position(|entry| *entry == base).map(|at| at + 1)
                    };
                    (chain.add_after(&base, &name, Marker).map(|_| ()), expected.map(|at| (at, name)))
                }
                ChainOp::Remove(id) => {
                    let name = name_of(id);
                    let outcome = chain.remove(&name).map(|_| ());
                    match model.iter().position(|entry| *entry == name) {
                        Some(at) => {
                            prop_assert!(outcome.is_ok());
                            model.remove(at);
                            epoch += 1;
                        }
                        None => prop_assert!(outcome.is_err()),
                    }
                    prop_assert_eq!(chain.names(), model.clone());
                    prop_assert_eq!(chain.epoch(), epoch);
                    continue;
                }
            };
            match expected {
                Some((at, name)) => {
                    prop_assert!(outcome.is_ok());
                    model.insert(at, name);
                    epoch += 1;
                }
                None => prop_assert!(outcome.is_err()),
            }
            prop_assert_eq!(chain.names(), model.clone());
            prop_assert_eq!(chain.epoch(), epoch);
        }
    }
}
