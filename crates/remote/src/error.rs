/// Errors from talking to the remote benchmark service.
///
/// No retries happen at this layer; callers decide.
#[derive(Debug, thiserror::Error)]
pub enum RemoteServiceError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx HTTP status.
    #[error("Benchmark API error ({status}): {body}")]
    Http { status: u16, body: String },

    /// 2xx response whose embedded `statusCode` reports a failure.
    #[error("Benchmark service error ({code}): {text}")]
    Service { code: u16, text: String },

    /// A successful response lacked a field the call needs.
    #[error("Malformed benchmark response: {0}")]
    Malformed(String),
}
