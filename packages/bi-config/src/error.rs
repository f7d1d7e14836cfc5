use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read the RAG service config at {}: {source}.", path.display())]
	ReadConfig { path: PathBuf, source: std::io::Error },
	#[error("Cannot parse the RAG service config at {}: {source}", path.display())]
	ParseConfig { path: PathBuf, source: toml::de::Error },
	/// A setting is out of range. The message names the offending key.
	#[error("Invalid RAG service config: {message}")]
	Validation { message: String },
}
