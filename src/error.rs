use thiserror::Error;

/// Failure to obtain a JSON document from the upstream API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("http {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid json from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Transport failures, throttling and server errors may succeed on a later
    /// attempt. Client errors and bad bodies will not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode { .. } | FetchError::RetriesExhausted { .. } => false,
        }
    }
}

/// An upstream team the correction table cannot place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "no canonical identity for team {team_name:?} (abbreviation {abbreviation:?}, school {school_name:?})"
)]
pub struct UnmappedTeam {
    pub team_name: String,
    pub abbreviation: String,
    pub school_name: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    UnmappedTeam(#[from] UnmappedTeam),

    #[error("invalid trend value {0:?}")]
    InvalidTrend(String),

    #[error("malformed rank entry: {0}")]
    MalformedRank(String),

    #[error("malformed team document: {0}")]
    MalformedTeam(String),

    #[error("unknown column {column:?} for table {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("get_or_create on {0} needs at least one attribute")]
    EmptyAttributes(&'static str),

    #[error("invalid sql identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to build fetch pool: {0}")]
    FetchPool(#[from] rayon::ThreadPoolBuildError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
