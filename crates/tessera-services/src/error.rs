use tessera_core::AppError;

use crate::pipeline::Stage;

/// A pipeline failure and the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct IngestError {
    pub stage: Stage,
    #[source]
    pub source: AppError,
}

impl IngestError {
    pub fn new(stage: Stage, source: impl Into<AppError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, AppError::Cancelled)
    }

    pub fn into_app_error(self) -> AppError {
        self.source
    }
}

/// Attach a stage to any error convertible into [`AppError`].
pub trait StageResultExt<T> {
    fn at(self, stage: Stage) -> Result<T, IngestError>;
}

impl<T, E: Into<AppError>> StageResultExt<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, IngestError> {
        self.map_err(|e| IngestError::new(stage, e))
    }
}
