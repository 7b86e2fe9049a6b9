#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown job status '{0}'")]
    UnknownStatus(String),

    #[error("Malformed analysis result: {0}")]
    MalformedResult(String),
}
