pub mod logging {
    use std::fs::OpenOptions;
    use std::path::{Path, PathBuf};
    use std::sync::OnceLock;

    use clap::ValueEnum;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::EnvFilter;

    /// Full `EnvFilter` directive that overrides `--log-level` when set.
    pub const ENV_LOG_FILTER: &str = "OUTLINE_LOG_FILTER";

    const OWN_CRATES: &[&str] = &["outline_mirror", "outline_proto", "transport_port"];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl From<LogLevel> for LevelFilter {
        fn from(level: LogLevel) -> Self {
            match level {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    // Holding the guard keeps the background writer flushing until exit.
    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if WRITER_GUARD.get().is_some() {
            return Ok(());
        }

        let (writer, guard) = open_writer(config.file.as_deref())?;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(build_env_filter(config.level.into()))
            .with_target(false)
            .with_thread_names(config.level == LogLevel::Trace)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = WRITER_GUARD.set(guard);
        Ok(())
    }

    fn open_writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), InitError> {
        let Some(path) = file else {
            return Ok(tracing_appender::non_blocking(std::io::stderr()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(tracing_appender::non_blocking(file))
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        match std::env::var(ENV_LOG_FILTER) {
            Ok(filter) if !filter.trim().is_empty() => EnvFilter::new(filter),
            _ => EnvFilter::new(default_filter_for(level)),
        }
    }

    /// Debug and trace only open up this workspace's crates; everything else
    /// stays at info.
    pub(crate) fn default_filter_for(level: LevelFilter) -> String {
        if level < LevelFilter::DEBUG {
            return level.to_string().to_lowercase();
        }
        let scoped = level.to_string().to_lowercase();
        OWN_CRATES.iter().fold(String::from("info"), |mut filter, krate| {
            filter.push_str(&format!(",{krate}={scoped}"));
            filter
        })
    }

}
