//! 会话状态机、关闭语义、空闲检测与服务级统计。

mod support;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use futures::executor::block_on;
use spark_nio_core::{
    AttributeKey, CoreError, IdleStatus, IoServiceListener, IoSession, SessionConfig, SessionState,
};
use support::{RecordingHandler, RecordingIo, address, open_session, service_with};

#[test]
fn sessions_are_connected_before_created_fires() {
    struct StateWitness {
        seen: Arc<parking_lot::Mutex<Option<SessionState>>>,
    }

    impl spark_nio_core::IoHandler for StateWitness {
        fn session_created(&self, session: &Arc<IoSession>) -> Result<(), CoreError> {
            *self.seen.lock() = Some(session.state());
            let _pending = session.write("hello");
            Ok(())
        }
    }

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let support = service_with(
        StateWitness {
            seen: Arc::clone(&seen),
        },
        SessionConfig::default(),
    );
    let (session, _) = open_session(&support);
    assert_eq!(*seen.lock(), Some(SessionState::Connected));
    assert!(session.has_pending_writes(), "sessionCreated 中的写请求已入队");
}

#[test]
fn writes_after_close_fail_with_session_closed() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    let (session, io) = open_session(&support);

    session.close(false);
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(*io.closes.lock(), [false]);

    let err = session
        .write("late")
        .result()
        .expect("立即完成")
        .expect_err("关闭中拒绝写入");
    assert!(matches!(err, CoreError::SessionClosed { session_id } if session_id == session.id()));
}

#[test]
fn graceful_close_escalates_to_immediate_once() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    let (session, io) = open_session(&support);

    let first = session.close(false);
    session.close(false);
    let second = session.close(true);
    session.close(true);
    assert_eq!(*io.closes.lock(), [false, true]);
    assert!(session.close_immediately_requested());
    assert!(!first.is_done());

    support.close_session(&session);
    assert!(first.is_done() && second.is_done());
    block_on(session.close_future()).expect("关闭 future 成功完成");
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn close_session_notifies_handler_and_listeners_once() {
    #[derive(Default)]
    struct Listener {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl IoServiceListener for Listener {
        fn session_created(&self, _: &Arc<IoSession>) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn session_destroyed(&self, _: &Arc<IoSession>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let support = service_with(handler, SessionConfig::default());
    let listener = Arc::new(Listener::default());
    support.add_listener(listener.clone());

    let (session, _) = open_session(&support);
    const USER: AttributeKey<String> = AttributeKey::new("user");
    session.attributes().set(&USER, "alice".to_owned());
    assert_eq!(support.managed_session_count(), 1);

    support.close_session(&session);
    support.close_session(&session);

    assert_eq!(listener.created.load(Ordering::SeqCst), 1);
    assert_eq!(listener.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(
        *log.lock(),
        ["handler:created", "handler:opened", "handler:closed"]
    );
    assert_eq!(support.managed_session_count(), 0);
    assert_eq!(support.largest_managed_session_count(), 1);
    assert_eq!(support.cumulative_managed_session_count(), 1);
    assert!(session.attributes().is_empty());
}

#[test]
fn concurrent_sessions_receive_unique_ids() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let support = Arc::clone(&support);
            thread::spawn(move || {
                (0..50)
                    .map(|_| {
                        IoSession::new(
                            &support,
                            address(9000),
                            address(40000),
                            Arc::new(RecordingIo::default()),
                        )
                        .expect("创建会话")
                        .id()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().expect("线程正常结束") {
            assert!(ids.insert(id), "会话编号重复: {id}");
        }
    }
    assert_eq!(ids.len(), 400);
}

#[test]
fn idle_fires_once_per_window_and_resets_on_read() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let config =
        SessionConfig::default().with_idle_time(IdleStatus::ReaderIdle, Duration::from_secs(1));
    let support = service_with(handler, config);
    let (session, _) = open_session(&support);
    log.lock().clear();
    let start = session.created_at();

    session.notify_idleness(start + Duration::from_millis(500));
    assert!(log.lock().is_empty());

    session.notify_idleness(start + Duration::from_millis(1_000));
    session.notify_idleness(start + Duration::from_millis(1_200));
    session.notify_idleness(start + Duration::from_millis(1_999));
    assert_eq!(*log.lock(), ["handler:idle:read idle"]);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 1);

    session.notify_idleness(start + Duration::from_millis(2_000));
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 2);
    assert_eq!(
        session.next_idle_deadline(),
        Some(start + Duration::from_millis(3_000))
    );

    session.record_read(16, start + Duration::from_millis(2_100));
    assert!(!session.is_idle(IdleStatus::ReaderIdle));
    session.notify_idleness(start + Duration::from_millis(3_000));
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 0);
    session.notify_idleness(start + Duration::from_millis(3_100));
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 1);
    assert_eq!(session.read_bytes(), 16);
}

#[test]
fn idle_detection_is_disabled_by_default() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    let (session, _) = open_session(&support);
    assert_eq!(session.next_idle_deadline(), None);
    session.notify_idleness(Instant::now() + Duration::from_secs(3600));
    for status in IdleStatus::ALL {
        assert_eq!(session.idle_count(status), 0);
    }
}

#[test]
fn scheduled_counters_follow_the_write_queue() {
    let handler = RecordingHandler::default();
    let log = Arc::clone(&handler.log);
    let support = service_with(handler, SessionConfig::default());
    let (session, io) = open_session(&support);
    log.lock().clear();

    let first = session.write(vec![0u8; 10]);
    let second = session.write(vec![0u8; 6]);
    assert_eq!(session.scheduled_write_bytes(), 16);
    assert_eq!(session.scheduled_write_messages(), 2);
    assert_eq!(io.flushes.load(Ordering::SeqCst), 2);

    let request = session.poll_write().expect("第一个请求");
    let (message, promise) = request.into_parts();
    session.record_written(10, Instant::now());
    promise.succeed();
    session.notify_message_sent(message);
    assert!(first.result().expect("已完成").is_ok());
    assert_eq!(session.scheduled_write_bytes(), 6);
    assert_eq!(session.scheduled_write_messages(), 1);
    assert_eq!(session.written_messages(), 1);
    assert_eq!(*log.lock(), ["handler:sent"]);

    let request = session.poll_write().expect("第二个请求");
    session.forget_scheduled_write(6);
    let (_, promise) = request.into_parts();
    promise.fail(CoreError::SessionClosed {
        session_id: session.id(),
    });
    assert!(second.result().expect("已完成").is_err());
    assert_eq!(session.scheduled_write_bytes(), 0);
    assert_eq!(session.scheduled_write_messages(), 0);
}

#[test]
fn suspend_and_resume_only_report_transitions() {
    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    let (session, io) = open_session(&support);

    session.suspend_read();
    session.suspend_read();
    session.suspend_write();
    session.resume_read();
    session.resume_write();
    session.resume_write();
    assert_eq!(io.interest_updates.load(Ordering::SeqCst), 4);
    assert!(!session.is_read_suspended() && !session.is_write_suspended());
}

#[test]
fn writes_racing_with_close_always_complete() {
    const ROUNDS: usize = 50;
    const WRITERS: usize = 3;

    let support = service_with(RecordingHandler::default(), SessionConfig::default());
    for _ in 0..ROUNDS {
        let (session, _) = open_session(&support);
        let stop = Arc::new(AtomicBool::new(false));
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let session = Arc::clone(&session);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut futures = Vec::new();
                    while !stop.load(Ordering::Acquire) {
                        futures.push(session.write("race"));
                    }
                    futures
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(2));
        session.close(true);
        // 模拟传输层：关闭前后各清一次队列。
        session.fail_pending_writes();
        support.close_session(&session);
        session.fail_pending_writes();
        thread::sleep(Duration::from_millis(1));
        stop.store(true, Ordering::Release);

        for writer in writers {
            for future in writer.join().expect("写线程不应 panic") {
                assert!(
                    future.wait_timeout(Duration::from_millis(200)).is_some(),
                    "与关闭竞争的写 future 必须完成"
                );
            }
        }
        assert!(!session.has_pending_writes(), "关闭后队列为空");
    }
}
