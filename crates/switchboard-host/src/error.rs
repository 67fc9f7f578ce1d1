/// Startup-time failures while populating the tool registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
    #[error("invalid pattern for {tool}.{field}: {message}")]
    InvalidPattern {
        tool: String,
        field: String,
        message: String,
    },
    #[error("pattern on non-string parameter {tool}.{field}")]
    PatternOnNonString { tool: String, field: String },
}

/// Failure loading a customer data fixture.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read data file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid data file: {0}")]
    Json(#[from] serde_json::Error),
}
