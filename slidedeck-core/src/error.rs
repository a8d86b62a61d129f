use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeckError {
    #[error("failed to open document {source_id}")]
    Open {
        source_id: String,
        #[source]
        cause: anyhow::Error,
    },
    #[error("failed to render page {page}")]
    Render {
        page: usize,
        #[source]
        cause: anyhow::Error,
    },
    #[error("display surface rejected page {page}")]
    Surface {
        page: usize,
        #[source]
        cause: anyhow::Error,
    },
    #[error("invalid deck configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("tab list has no tabs")]
    NoTabs,
    #[error("tab {0} does not exist")]
    UnknownTab(usize),
}
