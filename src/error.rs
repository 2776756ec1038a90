use thiserror::Error;

/// Errors raised while decoding a raw message into an `EvidenceRecord`.
///
/// Every variant here is "poison": the ingest supervisor counts it, logs a
/// preview of the offending payload, and acks the message away rather than
/// propagating it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    SchemaViolation(String),
    #[error("unparseable timestamp: {0}")]
    BadTimestamp(String),
    #[error("network frame matches neither the Zeek nor the Suricata schema")]
    UnknownSchema,
    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// Errors raised by a `Broker` port implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker error: {0}")]
    Transient(String),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
}

/// Errors raised by the judge worker's supporting ports (cache, provider).
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge call exceeded its deadline")]
    Timeout,
    #[error("judge provider error: {0}")]
    Provider(String),
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
}

/// Errors raised by the registry and analytic-store ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("analytic store write failed: {0}")]
    WriteFailed(String),
}

/// Configuration errors. Any `FatalConfigError` aborts the process before it
/// binds a single consumer.
#[derive(Debug, Error)]
pub enum FatalConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnvVar(String),
    #[error("environment variable {0} has an invalid value: {1}")]
    InvalidEnvVar(String, String),
    #[error("failed to load rule corpus from {path}: {source}")]
    RuleCorpus {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}
