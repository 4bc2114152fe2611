use thiserror::Error;

/// Invalid static configuration. Always fatal: the stage does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown stage role: {0}")]
    UnknownRole(String),

    #[error("Stage {stage}: role {role} requires a downstream stage")]
    MissingNext { stage: String, role: String },

    #[error("Stage {stage}: consumers are terminal and cannot forward to {next}")]
    UnexpectedNext { stage: String, next: String },

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Speed factor must be positive, got {0}")]
    InvalidSpeed(f64),

    #[error("Invalid {name} distribution: {reason}")]
    InvalidDistribution { name: &'static str, reason: String },

    #[error("Invalid wear parameter: {0}")]
    InvalidWear(String),

    #[error("Telemetry backend `{0}` is missing its url, org or token")]
    IncompleteTelemetry(String),
}

/// Failures of the queue or signal channel backends.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue {0} is disconnected")]
    Disconnected(String),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis pool setup failed: {0}")]
    Setup(String),
}

/// Failures of the time-series telemetry sink.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink rejected write with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Telemetry buffer full, event dropped")]
    BufferFull,

    #[error("Telemetry writer stopped")]
    WriterStopped,
}

/// Failures of the remote maintenance oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle request timed out")]
    Timeout,

    #[error("Oracle returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Everything that can abort a single stage cycle.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed item on queue {queue}: {raw:?}")]
    MalformedItem { queue: String, raw: String },
}

/// How the actor loop reacts to a [`StageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Queue or channel trouble: log, skip the cycle, keep running.
    Transport,
    /// Oracle trouble: treated as "no maintenance".
    Oracle,
    /// The actor cannot continue.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transport => write!(f, "Transport"),
            ErrorClass::Oracle => write!(f, "Oracle"),
            ErrorClass::Fatal => write!(f, "Fatal"),
        }
    }
}

impl StageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Transport(_) | StageError::MalformedItem { .. } => ErrorClass::Transport,
            StageError::Oracle(_) => ErrorClass::Oracle,
            StageError::Config(_) => ErrorClass::Fatal,
        }
    }
}
