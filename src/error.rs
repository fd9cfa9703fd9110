use std::path::PathBuf;

pub type Result<T> = anyhow::Result<T>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown reasoning template: {0}")]
    UnknownTemplate(String),

    #[error("request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to read settings from {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
