use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid identifier: {0}")]
    #[diagnostic(help("input must be one positive decimal PMID per line"))]
    InvalidIdentifier(String),

    #[error("failed to read identifiers: {0}")]
    InputRead(String),

    #[error("remote request failed: {0}")]
    RemoteHttp(String),

    #[error("remote service returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("output archive error: {0}")]
    Output(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarvestError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            HarvestError::RemoteHttp(_)
                | HarvestError::RemoteStatus { .. }
                | HarvestError::MalformedResponse(_)
        )
    }
}
