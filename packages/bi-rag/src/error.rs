use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	/// Concurrent requests contended for the retrieval index's shared namespace data.
	#[error("Retrieval namespace conflict: {message}")]
	NamespaceConflict { message: String },
	#[error("{operation} timed out after {timeout:?}.")]
	Timeout { operation: &'static str, timeout: Duration },
	#[error("Illegal state: {message}")]
	IllegalState { message: String },
	#[error("Initialization failed: {message}")]
	Initialization { message: String },
	#[error("Background operation finished without producing a result.")]
	OperationDropped,
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
}
impl Error {
	/// Stable tag recorded as the error kind of a failed request.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "invalid_request",
			Self::Provider { .. } => "provider",
			Self::NamespaceConflict { .. } => "namespace_conflict",
			Self::Timeout { .. } => "timeout",
			Self::IllegalState { .. } => "illegal_state",
			Self::Initialization { .. } => "initialization",
			Self::OperationDropped => "operation_dropped",
			Self::Io(_) => "io",
			Self::SerdeJson(_) => "serde_json",
		}
	}
}

impl From<bi_providers::Error> for Error {
	fn from(err: bi_providers::Error) -> Self {
		match err {
			bi_providers::Error::Conflict { message } => Self::NamespaceConflict { message },
			other => Self::Provider { message: other.to_string() },
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn busy_provider_maps_to_namespace_conflict() {
		let err = Error::from(bi_providers::Error::Conflict { message: "423 Locked".to_string() });

		assert!(matches!(err, Error::NamespaceConflict { .. }));
		assert_eq!(err.kind(), "namespace_conflict");
	}

	#[test]
	fn other_provider_errors_keep_their_message() {
		let err = Error::from(bi_providers::Error::InvalidResponse {
			message: "Chat response is missing choices.".to_string(),
		});

		assert_eq!(err.kind(), "provider");
		assert!(err.to_string().contains("missing choices"));
	}
}
