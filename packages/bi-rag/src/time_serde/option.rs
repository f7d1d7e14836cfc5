use serde::Serializer;
use time::OffsetDateTime;

pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	match value {
		Some(value) => super::serialize(value, serializer),
		None => serializer.serialize_none(),
	}
}
