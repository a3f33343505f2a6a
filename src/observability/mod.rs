//! 可观测性：tracing 订阅者初始化（EnvFilter + fmt），RUST_LOG 可覆盖默认级别

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅者；重复调用时静默忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
