use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber. `filter` takes the usual
/// `EnvFilter` syntax; `RCT_LOG` overrides it when set.
pub fn init_tracing(filter: &str) {
    let directives = std::env::var("RCT_LOG").unwrap_or_else(|_| filter.to_string());
    let env_filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    Registry::default().with(env_filter).with(fmt_layer).init();
}
