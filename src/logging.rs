use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "cmdplus=info";

/// 初始化日志，`RUST_LOG` 优先
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // 重复初始化（例如测试里）直接忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
