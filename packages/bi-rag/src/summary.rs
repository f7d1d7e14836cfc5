use std::{fs, path::Path};

use serde_json::{Map, Value};

/// Pre-computed, dataset-wide summary used as baseline context for every answer. Loaded once
/// at startup and never mutated.
#[derive(Clone, Debug, Default)]
pub struct DatasetSummary {
	data: Option<Map<String, Value>>,
}
impl DatasetSummary {
	/// A missing path, unreadable file, or non-object document yields an empty summary.
	pub fn load(path: Option<&Path>) -> Self {
		let Some(path) = path else {
			tracing::info!("No dataset summary configured.");

			return Self::default();
		};

		match fs::read_to_string(path) {
			Ok(raw) => match serde_json::from_str::<Value>(&raw) {
				Ok(Value::Object(map)) => {
					tracing::info!(
						path = %path.display(),
						keys = map.len(),
						"Dataset summary loaded."
					);

					Self::from_map(map)
				},
				Ok(_) => {
					tracing::warn!(path = %path.display(), "Dataset summary is not a JSON object.");

					Self::default()
				},
				Err(err) => {
					tracing::warn!(
						path = %path.display(),
						error = %err,
						"Failed to parse dataset summary."
					);

					Self::default()
				},
			},
			Err(err) => {
				tracing::warn!(
					path = %path.display(),
					error = %err,
					"Could not load dataset summary."
				);

				Self::default()
			},
		}
	}

	pub fn from_value(value: Value) -> Self {
		match value {
			Value::Object(map) => Self::from_map(map),
			_ => Self::default(),
		}
	}

	fn from_map(map: Map<String, Value>) -> Self {
		if map.is_empty() { Self::default() } else { Self { data: Some(map) } }
	}

	pub fn is_available(&self) -> bool {
		self.data.is_some()
	}

	/// Pretty JSON, two-space indented.
	pub fn render(&self) -> Option<String> {
		let data = self.data.as_ref()?;

		serde_json::to_string_pretty(data).ok()
	}
}
