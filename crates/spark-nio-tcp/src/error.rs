use std::io;

use spark_nio_core::CoreError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.nio.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const LISTEN: OperationKind = OperationKind {
    code: "spark.nio.tcp.listen_failed",
    message: "tcp listen",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.nio.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.nio.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.nio.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.nio.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const REGISTER: OperationKind = OperationKind {
    code: "spark.nio.tcp.register_failed",
    message: "selector register",
};
pub(crate) const DEREGISTER: OperationKind = OperationKind {
    code: "spark.nio.tcp.deregister_failed",
    message: "selector deregister",
};
pub(crate) const POLL: OperationKind = OperationKind {
    code: "spark.nio.tcp.poll_failed",
    message: "selector poll",
};
pub(crate) const WAKE: OperationKind = OperationKind {
    code: "spark.nio.tcp.wake_failed",
    message: "selector wake",
};
pub(crate) const SPAWN: OperationKind = OperationKind {
    code: "spark.nio.tcp.spawn_failed",
    message: "selector thread spawn",
};

/// 将 IO 错误映射为框架级 [`CoreError`]，保留原始错误作为 `source`。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    CoreError::io(kind.code, kind.message, error)
}

/// 驱动线程没有在期限内确认请求。
pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    map_io_error(
        kind,
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} was not acknowledged by the selector thread in time", kind.message),
        ),
    )
}
