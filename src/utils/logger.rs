use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter(level: Option<&str>, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = match (verbose, level) {
            (true, _) => "beneficiary_enrollment=debug,info".to_string(),
            (false, Some(level)) => format!("beneficiary_enrollment={}", level),
            (false, None) => "beneficiary_enrollment=info".to_string(),
        };
        EnvFilter::new(directive)
    })
}

pub fn init_cli_logger(verbose: bool, level: Option<&str>) {
    tracing_subscriber::registry()
        .with(default_filter(level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// 結構化輸出，供集中式日誌收集使用
pub fn init_json_logger(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(default_filter(level, false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}
