use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "avadeck_core=debug,tokio_tungstenite=info,reqwest=info,info";
const LOG_FILE_NAME: &str = "avadeck.log";

/// Installs the process-wide subscriber. Called first thing in `FfiApp::new()`.
///
/// Every platform also appends to `<data_dir>/avadeck.log`. On top of that,
/// iOS logs to os_log, Android to logcat and everything else to stderr.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(data_dir: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer(data_dir));

    #[cfg(target_os = "ios")]
    let _ = registry
        .with(tracing_oslog::OsLogger::new("app.avadeck", "core"))
        .try_init();

    #[cfg(target_os = "android")]
    let _ = registry.with(paranoid_android::layer("avadeck")).try_init();

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    let _ = registry
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn file_layer<S>(data_dir: &str) -> Option<impl tracing_subscriber::Layer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let _ = std::fs::create_dir_all(data_dir);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(std::path::Path::new(data_dir).join(LOG_FILE_NAME))
        .ok()?;
    Some(
        tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_target(true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");
        let data_dir = data_dir.to_str().unwrap();
        init_logging(data_dir);
        tracing::info!("hello from test");
        assert!(std::path::Path::new(data_dir).join(LOG_FILE_NAME).exists());
    }
}
