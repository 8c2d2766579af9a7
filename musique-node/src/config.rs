use std::fmt;

/// Minimum severity that will reach the configured log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Builder for the process-wide log sink. `apply()` installs an
/// `env_logger` instance honoring `default_level` as the fallback filter
/// (overridden per-module by `RUST_LOG` as usual) and, if set, redirects
/// output to a file opened append-only with mode 0640, matching the
/// `-logs` flag semantics of the command-line binary.
pub struct LoggingConfig {
    default_level: LogLevel,
    file_path: Option<String>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self {
            default_level: LogLevel::Info,
            file_path: None,
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Install this configuration as the process's global logger.
    ///
    /// Returns `FatalStartup` if the log file cannot be opened -- a bind
    /// or config error at this stage is fatal.
    pub fn apply(self) -> crate::error::Result<()> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.default_level.as_filter());

        if let Some(path) = self.file_path {
            let file = open_append_log(&path)
                .map_err(|e| crate::error::NodeError::FatalStartup(e.to_string()))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        // A second call to `apply()` (e.g. in tests that set up several
        // nodes in one process) would panic on a duplicate global logger;
        // swallow that case rather than aborting the test binary.
        let _ = builder.try_init();
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn open_append_log(path: &str) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o640)
        .open(path)
}

#[cfg(not(unix))]
fn open_append_log(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Protocol version embedded in every outgoing request. Peers exchange but
/// do not reject on mismatch.
pub const PROTOCOL_VERSION: &str = "musique/1";

/// mDNS service type this node advertises and browses for.
pub const SERVICE_TYPE: &str = "_musique._tcp.local.";

/// Instance name used when registering the mDNS service.
pub const INSTANCE_NAME: &str = "Musique";

/// Configuration for a single [`crate::MusiqueNode`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub nick: String,
    pub bind_ip: String,
    pub bind_port: u16,
    pub max_reaction_time_ms: i64,
    pub instance_name: String,
    pub service_type: String,
}

impl NodeConfig {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            bind_ip: String::new(),
            bind_port: 8081,
            max_reaction_time_ms: 1_000,
            instance_name: INSTANCE_NAME.to_string(),
            service_type: SERVICE_TYPE.to_string(),
        }
    }

    pub fn with_bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.bind_ip = ip.into();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_max_reaction_time_ms(mut self, ms: i64) -> Self {
        self.max_reaction_time_ms = ms;
        self
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeConfig {{ nick: {}, bind: {}:{}, max_reaction_time_ms: {} }}",
            self.nick, self.bind_ip, self.bind_port, self.max_reaction_time_ms
        )
    }
}
