//! 回环地址上的端到端行为：绑定登记、事件顺序、空闲检测、关闭语义与驱动线程生命周期。

mod support;

use std::{
    collections::BTreeSet,
    io::Read,
    net::{SocketAddr, TcpListener},
    sync::{
        Arc, Barrier, OnceLock, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use futures::executor::block_on;
use parking_lot::Mutex;
use spark_nio_core::{
    CoreError, IdleStatus, IoAcceptor, IoHandler, IoService, IoServiceListener, IoSession, Message,
    SessionConfig,
};
use spark_nio_tcp::{AcceptorConfig, ReactorConfig, TcpAcceptor};
use support::{ObservingHandler, Reaction, connect, eventually, loopback, read_to_end, send};

const PATIENCE: Duration = Duration::from_secs(5);

fn acceptor(reaction: Reaction) -> (TcpAcceptor, Arc<support::Observed>) {
    acceptor_with(reaction, AcceptorConfig::default())
}

fn acceptor_with(
    reaction: Reaction,
    config: AcceptorConfig,
) -> (TcpAcceptor, Arc<support::Observed>) {
    let (handler, observed) = ObservingHandler::new(reaction);
    let acceptor = TcpAcceptor::with_config(handler, config).expect("创建接入器");
    (acceptor, observed)
}

#[test]
fn binding_an_address_twice_is_rejected() {
    let (acceptor, _) = acceptor(Reaction::Record);
    let bound = acceptor.bind(loopback()).expect("首次绑定");
    assert_ne!(bound.port(), 0, "端口 0 应替换为系统分配的端口");

    let err = acceptor.bind(bound).expect_err("重复绑定必须失败");
    assert!(matches!(err, CoreError::AddressInUse { address } if address == bound));
    assert_eq!(err.code(), "spark.nio.bind.address_in_use");
    assert_eq!(acceptor.local_addresses().len(), 1);
}

#[test]
fn unbinding_unknown_address_fails_and_rebind_succeeds() {
    let (acceptor, _) = acceptor(Reaction::Record);
    let stranger = SocketAddr::from(([127, 0, 0, 1], 9));
    assert!(matches!(
        acceptor.unbind(stranger),
        Err(CoreError::AddressNotBound { .. })
    ));

    let bound = acceptor.bind(loopback()).expect("绑定");
    acceptor.unbind(bound).expect("解绑");
    assert!(acceptor.local_addresses().is_empty());
    assert!(matches!(
        acceptor.unbind(bound),
        Err(CoreError::AddressNotBound { .. })
    ));

    let again = acceptor.bind(bound).expect("解绑后同一地址可以再次绑定");
    assert_eq!(again, bound);
    let mut client = connect(again);
    send(&mut client, b"x");
}

#[test]
fn concurrent_binds_of_one_address_admit_exactly_one() {
    let port = {
        let scratch = TcpListener::bind(loopback()).expect("探测空闲端口");
        scratch.local_addr().expect("本地地址").port()
    };
    let target = SocketAddr::from(([127, 0, 0, 1], port));
    let (acceptor, _) = acceptor(Reaction::Record);
    let acceptor = Arc::new(acceptor);
    let barrier = Arc::new(Barrier::new(4));

    let outcomes: Vec<_> = (0..4)
        .map(|_| {
            let acceptor = Arc::clone(&acceptor);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                acceptor.bind(target)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| worker.join().expect("绑定线程"))
        .collect();

    let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(admitted, 1, "并发绑定同一地址只能成功一次: {outcomes:?}");
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|err| matches!(err, CoreError::AddressInUse { .. }))
    );
}

#[test]
fn sessions_are_connected_before_created_and_echo_bytes() {
    let (acceptor, observed) = acceptor(Reaction::Echo);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let mut client = connect(bound);
    send(&mut client, b"hello spark");
    let mut reply = [0_u8; 11];
    client.read_exact(&mut reply).expect("读取回显");
    assert_eq!(&reply, b"hello spark");

    let events = observed.events();
    assert_eq!(&events[..2], ["created:true", "opened"]);

    drop(client);
    assert!(eventually(PATIENCE, || observed.events().last().map(String::as_str) == Some("closed")));
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 0));
}

#[test]
fn reader_idle_fires_once_per_window_despite_other_traffic() {
    let window = Duration::from_millis(300);
    let config = AcceptorConfig::default()
        .with_session(SessionConfig::default().with_idle_time(IdleStatus::ReaderIdle, window));
    let (acceptor, observed) = acceptor_with(Reaction::Record, config);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let _quiet = connect(bound);
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 1));
    let quiet = acceptor.managed_sessions().remove(0);

    // 另一个连接持续发送数据，驱动线程因此被频繁唤醒。
    let stop = Arc::new(AtomicBool::new(false));
    let chatter = {
        let stop = Arc::clone(&stop);
        let mut chatty = connect(bound);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                send(&mut chatty, b".");
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    // 每跨过一个窗口边界，计数恰好加一；在窗口中点取样避开边界抖动。
    for expected in 1..=3_u32 {
        let checkpoint = quiet.created_at() + window * expected + window / 2;
        if let Some(wait) = checkpoint.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        assert_eq!(
            quiet.idle_count(IdleStatus::ReaderIdle),
            u64::from(expected),
            "第 {expected} 个窗口后空闲计数不符"
        );
    }
    stop.store(true, Ordering::Release);
    chatter.join().expect("发送线程");

    assert!(observed.idle_count() >= 3, "处理器也应收到每次空闲通知");
}

#[test]
fn graceful_close_flushes_pending_writes() {
    const LEN: usize = 1 << 20;
    let (acceptor, observed) = acceptor(Reaction::ReplyAndClose(LEN));
    let bound = acceptor.bind(loopback()).expect("绑定");

    let mut client = connect(bound);
    send(&mut client, b"go");
    let reply = read_to_end(&mut client);
    assert_eq!(reply.len(), LEN);
    assert!(reply.iter().enumerate().all(|(i, byte)| *byte == (i % 251) as u8));

    let pending = observed.pending.lock()[0].clone();
    assert!(matches!(pending.wait_timeout(PATIENCE), Some(Ok(()))));
}

#[test]
fn immediate_close_fails_unsent_writes() {
    let (acceptor, observed) = acceptor(Reaction::QueueAndAbort);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let mut client = connect(bound);
    send(&mut client, b"go");
    assert!(read_to_end(&mut client).is_empty(), "挂起写方向后不应有数据到达");

    assert!(eventually(PATIENCE, || !observed.pending.lock().is_empty()));
    let pending = observed.pending.lock()[0].clone();
    assert!(matches!(
        pending.wait_timeout(PATIENCE),
        Some(Err(CoreError::SessionClosed { .. }))
    ));
}

#[test]
fn suspended_reads_hold_data_until_resumed() {
    let (acceptor, observed) = acceptor(Reaction::Record);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let mut client = connect(bound);
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 1));
    let session = acceptor.managed_sessions().remove(0);
    session.suspend_read();
    thread::sleep(Duration::from_millis(50));

    send(&mut client, b"held");
    thread::sleep(Duration::from_millis(200));
    assert!(observed.received().is_empty(), "挂起期间不应投递读事件");

    session.resume_read();
    assert!(eventually(PATIENCE, || observed.received() == b"held"));
}

#[test]
fn round_robin_spreads_sessions_across_processors() {
    let config = AcceptorConfig::default()
        .with_reactor(ReactorConfig::default().with_processor_count(2));
    let (acceptor, _) = acceptor_with(Reaction::Record, config);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let _clients: Vec<_> = (0..4).map(|_| connect(bound)).collect();
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 4));

    let processors = acceptor.strategy().processors();
    assert_eq!(processors.len(), 2);
    assert!(eventually(PATIENCE, || {
        processors.iter().all(|processor| processor.session_count() == 2)
    }));
}

#[test]
fn idle_processor_retires_and_respawns_on_demand() {
    let (acceptor, _) = acceptor(Reaction::Echo);
    let processor = acceptor.strategy().processors().remove(0);
    assert!(!processor.is_running(), "未绑定前不应启动驱动线程");

    let bound = acceptor.bind(loopback()).expect("绑定");
    assert!(processor.is_running());
    let client = connect(bound);
    assert!(eventually(PATIENCE, || processor.session_count() == 1));
    drop(client);
    assert!(eventually(PATIENCE, || processor.session_count() == 0));

    acceptor.unbind(bound).expect("解绑");
    assert!(eventually(PATIENCE, || !processor.is_running()), "空闲后驱动线程应自行退出");
    assert_eq!(processor.generations(), 1);

    let rebound = acceptor.bind(bound).expect("重新绑定");
    assert!(processor.is_running());
    assert_eq!(processor.generations(), 2);

    let mut client = connect(rebound);
    send(&mut client, b"again");
    let mut reply = [0_u8; 5];
    client.read_exact(&mut reply).expect("读取回显");
    assert_eq!(&reply, b"again");
}

#[test]
fn rapid_bind_unbind_cycles_stay_consistent() {
    let (acceptor, _) = acceptor(Reaction::Record);
    for _ in 0..50 {
        let bound = acceptor.bind(loopback()).expect("绑定");
        acceptor.unbind(bound).expect("解绑");
    }
    assert!(acceptor.local_addresses().is_empty());
    let processor = acceptor.strategy().processors().remove(0);
    assert!(eventually(PATIENCE, || !processor.is_running()));
}

#[derive(Default)]
struct Transitions {
    activated: AtomicUsize,
    deactivated: AtomicUsize,
}

impl IoServiceListener for Transitions {
    fn service_activated(&self) {
        self.activated.fetch_add(1, Ordering::AcqRel);
    }

    fn service_deactivated(&self) {
        self.deactivated.fetch_add(1, Ordering::AcqRel);
    }
}

#[test]
fn service_activation_follows_first_bind_and_last_unbind() {
    let (acceptor, _) = acceptor(Reaction::Record);
    let transitions = Arc::new(Transitions::default());
    acceptor.add_listener(transitions.clone());

    let first = acceptor.bind(loopback()).expect("绑定");
    let second = acceptor.bind(loopback()).expect("绑定");
    assert!(acceptor.is_active());
    assert_eq!(transitions.activated.load(Ordering::Acquire), 1);

    acceptor.unbind(first).expect("解绑");
    assert!(acceptor.is_active());
    acceptor.unbind(second).expect("解绑");
    assert!(!acceptor.is_active());
    assert_eq!(transitions.deactivated.load(Ordering::Acquire), 1);
}

#[test]
fn unbind_disconnects_sessions_when_configured() {
    let (acceptor, observed) = acceptor(Reaction::Record);
    let bound = acceptor.bind(loopback()).expect("绑定");
    let mut client = connect(bound);
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 1));
    let session = acceptor.managed_sessions().remove(0);

    acceptor.unbind(bound).expect("解绑");
    block_on(session.close_future()).expect("会话关闭完成");
    assert!(read_to_end(&mut client).is_empty());
    assert!(eventually(PATIENCE, || observed.events().contains(&"closed".to_owned())));
}

#[test]
fn dispose_is_idempotent_and_refuses_new_binds() {
    let (acceptor, _) = acceptor(Reaction::Record);
    acceptor.bind(loopback()).expect("绑定");
    acceptor.dispose();
    acceptor.dispose();
    assert!(acceptor.is_disposed());
    assert!(acceptor.local_addresses().is_empty());
    assert!(acceptor.bind(loopback()).is_err());
}

#[test]
fn writes_from_foreign_threads_wake_the_driver() {
    const WRITERS: usize = 4;
    const MESSAGES: usize = 200;
    let (acceptor, _) = acceptor(Reaction::Record);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let mut client = connect(bound);
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 1));
    let session = acceptor.managed_sessions().remove(0);

    // 每条写请求都从驱动线程之外提交，覆盖驱动线程阻塞前后两个时间窗口。
    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut last = None;
                for sent in 0..MESSAGES {
                    last = Some(session.write("0123456789"));
                    if sent % 7 == 0 {
                        thread::yield_now();
                    }
                }
                last
            })
        })
        .collect();
    for writer in writers {
        let last = writer.join().expect("写线程").expect("至少一次写入");
        assert!(matches!(last.wait_timeout(PATIENCE), Some(Ok(()))));
    }

    let mut received = vec![0_u8; WRITERS * MESSAGES * 10];
    client.read_exact(&mut received).expect("读取全部数据");
    assert!(received.chunks(10).all(|chunk| chunk == b"0123456789"));
    assert!(eventually(PATIENCE, || session.written_messages() == (WRITERS * MESSAGES) as u64));
    assert!(eventually(PATIENCE, || session.scheduled_write_messages() == 0));
}

#[test]
fn writes_racing_with_immediate_close_all_complete() {
    const WRITERS: usize = 3;
    let (acceptor, _) = acceptor(Reaction::Record);
    let bound = acceptor.bind(loopback()).expect("绑定");

    let _client = connect(bound);
    assert!(eventually(PATIENCE, || acceptor.managed_session_count() == 1));
    let session = acceptor.managed_sessions().remove(0);

    let stop = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let session = Arc::clone(&session);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut futures = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    futures.push(session.write("0123456789"));
                }
                futures
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    let closed = session.close(true).wait_timeout(PATIENCE);
    assert!(matches!(closed, Some(Ok(()))), "立即关闭应在期限内完成");
    stop.store(true, Ordering::Release);

    for writer in writers {
        for future in writer.join().expect("写线程") {
            assert!(
                future.wait_timeout(Duration::from_millis(200)).is_some(),
                "关闭后每个写 future 都必须完成"
            );
        }
    }
    assert!(!session.has_pending_writes());
}

/// 在驱动线程上回查接入器地址表的处理器。
struct AddressQueryingHandler {
    acceptor: Arc<OnceLock<Weak<TcpAcceptor>>>,
    entered: Arc<AtomicBool>,
    answered: Arc<Mutex<Option<BTreeSet<SocketAddr>>>>,
}

impl IoHandler for AddressQueryingHandler {
    fn message_received(&self, _: &Arc<IoSession>, _: Message) -> Result<(), CoreError> {
        self.entered.store(true, Ordering::Release);
        thread::sleep(Duration::from_millis(300));
        if let Some(acceptor) = self.acceptor.get().and_then(Weak::upgrade) {
            *self.answered.lock() = Some(acceptor.local_addresses());
        }
        Ok(())
    }
}

#[test]
fn handlers_can_query_addresses_while_unbind_waits_for_the_driver() {
    let slot = Arc::new(OnceLock::new());
    let entered = Arc::new(AtomicBool::new(false));
    let answered = Arc::new(Mutex::new(None));
    let handler = AddressQueryingHandler {
        acceptor: Arc::clone(&slot),
        entered: Arc::clone(&entered),
        answered: Arc::clone(&answered),
    };
    let acceptor = Arc::new(TcpAcceptor::new(handler).expect("创建接入器"));
    slot.set(Arc::downgrade(&acceptor)).expect("只设置一次");

    let first = acceptor.bind(loopback()).expect("绑定第一个地址");
    let second = acceptor.bind(loopback()).expect("绑定第二个地址");

    let mut client = connect(first);
    send(&mut client, b"x");
    assert!(eventually(PATIENCE, || entered.load(Ordering::Acquire)));

    // 驱动线程此时正在回调里，稍后会去读地址表。
    let started = Instant::now();
    acceptor.unbind(second).expect("解绑不应超时");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "解绑等待确认时不应挡住回调里的地址查询"
    );

    assert!(eventually(PATIENCE, || answered.lock().is_some()));
    let seen = answered.lock().clone().expect("回调已完成查询");
    assert!(seen.contains(&first));
    assert_eq!(acceptor.local_addresses(), BTreeSet::from([first]));
}
