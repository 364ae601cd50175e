use thiserror::Error;

/// Rejections surfaced to API callers.
///
/// Everything except `Storage` is raised before any state is touched, so a
/// rejected call never leaves a partial mutation behind.
#[derive(Error, Debug)]
pub enum StationError {
    #[error("media not found: {0}")]
    MediaNotFound(String),

    #[error("schedule entry not found: {0}")]
    ScheduleEntryNotFound(String),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("listener id is required")]
    MissingListener,

    #[error("invalid run_at: {0}")]
    InvalidRunAt(String),

    #[error("{0} was deleted and cannot be imported again")]
    Tombstoned(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StationError>;
