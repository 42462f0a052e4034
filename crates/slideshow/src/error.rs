use snafu::Snafu;

use super::ports::RenderError;
use super::types::ActionOutcome;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SlideshowError {
    #[snafu(display("no catalog items available for language '{language}'"))]
    ContentUnavailable {
        stage: &'static str,
        language: String,
    },
    #[snafu(display("render bridge failed on `{stage}`: {source}"))]
    Render {
        stage: &'static str,
        source: RenderError,
    },
}

pub type SlideshowResult<T> = Result<T, SlideshowError>;

impl SlideshowError {
    pub fn outcome(&self) -> ActionOutcome {
        match self {
            Self::ContentUnavailable { .. } => ActionOutcome::ContentUnavailable,
            Self::Render { .. } => ActionOutcome::RenderFailed,
        }
    }
}
