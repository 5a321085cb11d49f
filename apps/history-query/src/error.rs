use std::fmt;
use std::time::Duration;

/// Storage round-trip that produced a query error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    PartitionCheck,
    Data,
    Metadata,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PartitionCheck => "partition check",
            Self::Data => "data",
            Self::Metadata => "metadata",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Rejected before any storage access.
    #[error("invalid history request: {0}")]
    Configuration(String),
    #[error("unable to open history database {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{stage} query failed: {source}")]
    Query {
        stage: QueryStage,
        #[source]
        source: rusqlite::Error,
    },
    #[error("history query exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("history query worker failed: {0}")]
    Internal(String),
}

impl HistoryError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn query(stage: QueryStage, source: rusqlite::Error) -> Self {
        Self::Query { stage, source }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;
