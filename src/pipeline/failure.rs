use thiserror::Error;

use crate::{
    archive::ArchiveError,
    extractor::{IsolateError, MarkdownError},
    fetcher::FetchError,
};

/// Why a single page was not archived. Never aborts the run.
#[derive(Error, Debug)]
pub enum PageFailure {
    #[error("unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },

    #[error("http error {0}")]
    HttpError(u16),

    #[error("page does not exist")]
    Deleted,

    #[error("no content found")]
    NotFound,

    #[error("nothing to archive")]
    Empty,

    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error(transparent)]
    Convert(#[from] MarkdownError),

    #[error("could not write output: {0}")]
    Io(ArchiveError),

    #[error("page task panicked: {0}")]
    Panicked(String),
}

impl From<FetchError> for PageFailure {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unreachable { attempts, last } => Self::Unreachable { attempts, last },
            FetchError::Http { status, .. } => Self::HttpError(status.as_u16()),
            other => Self::Fetch(other),
        }
    }
}

impl From<IsolateError> for PageFailure {
    fn from(err: IsolateError) -> Self {
        match err {
            IsolateError::NotFound => Self::NotFound,
        }
    }
}

impl From<ArchiveError> for PageFailure {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::EmptyBody => Self::Empty,
            other => Self::Io(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn maps_fetch_errors() {
        let http = FetchError::Http {
            status: StatusCode::NOT_FOUND,
            retriable: false,
        };
        assert!(matches!(PageFailure::from(http), PageFailure::HttpError(404)));

        let unreachable = FetchError::Unreachable {
            attempts: 3,
            last: "connect timeout".into(),
        };
        assert!(matches!(
            PageFailure::from(unreachable),
            PageFailure::Unreachable { attempts: 3, .. }
        ));

        let large = FetchError::BodyTooLarge(10);
        assert!(matches!(PageFailure::from(large), PageFailure::Fetch(_)));
    }

    #[test]
    fn empty_body_is_empty() {
        assert!(matches!(
            PageFailure::from(ArchiveError::EmptyBody),
            PageFailure::Empty
        ));
        assert_eq!(PageFailure::HttpError(503).to_string(), "http error 503");
    }
}
