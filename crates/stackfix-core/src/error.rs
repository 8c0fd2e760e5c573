use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("template parse failed: {0}")]
    Template(#[from] serde_yaml::Error),

    #[error("identity lookup failed: {0}")]
    Resolver(String),

    #[error("resource {logical_id} has a missing or malformed {property} property")]
    Property {
        logical_id: String,
        property: String,
    },

    #[error("assume role into {account} failed: {message}")]
    AssumeRole { account: String, message: String },

    #[error("change set error: {0}")]
    ChangeSet(String),

    #[error("timed out waiting for {operation}: {message}")]
    Waiter { operation: String, message: String },

    #[error("cloud control update failed: {0}")]
    UpdateResource(String),

    #[error("operation reached terminal status {status}: {message}")]
    OperationTerminal { status: String, message: String },

    #[error("expected value at {path} is not valid JSON: {source}")]
    PatchValue {
        path: String,
        source: serde_json::Error,
    },

    #[error("AWS error: {0}")]
    Aws(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Walk the full error chain and join all causes into one string.
///
/// AWS SDK errors often have terse `Display` impls (e.g. "service error")
/// but useful detail in the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
