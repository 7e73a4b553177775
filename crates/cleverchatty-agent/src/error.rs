use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] cleverchatty_llm::ProviderError),

    #[error(transparent)]
    Tools(#[from] cleverchatty_tools::ToolsError),

    #[error(transparent)]
    Core(#[from] cleverchatty_core::error::CoreError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("engine already finished")]
    Finished,
}

pub type Result<T> = std::result::Result<T, EngineError>;
