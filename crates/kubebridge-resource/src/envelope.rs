//! Generic metadata/spec/status envelope

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Free-form JSON object used for extensible field bags
pub type FieldBag = serde_json::Map<String, serde_json::Value>;

/// A domain entity rendered as a versioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<S, T = GenericStatus> {
    /// Identity and provenance
    pub metadata: ResourceMetadata,
    /// User-facing fields mapped from the entity
    pub spec: S,
    /// Server-computed state
    pub status: T,
}

/// Identity and provenance section of a resource
///
/// Every field is serialized, even when empty. Timestamps are UTC with
/// second precision (`2000-01-01T08:00:00Z`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// Unique resource identifier
    pub uid: String,
    /// Optimistic-concurrency token
    pub resource_version: String,
    /// When the entity was created
    #[serde(with = "rfc3339_seconds")]
    pub creation_timestamp: DateTime<Utc>,
    /// When the entity was last updated
    #[serde(with = "rfc3339_seconds")]
    pub update_timestamp: DateTime<Utc>,
    /// Identity that created the entity
    pub created_by: String,
    /// Identity that last updated the entity
    pub updated_by: String,
    /// Free-form labels
    pub labels: Option<BTreeMap<String, String>>,
    /// Finalizers blocking deletion
    pub finalizers: Option<Vec<String>>,
    /// Extensible field bag
    pub extra_fields: Option<FieldBag>,
}

impl ResourceMetadata {
    /// Metadata carrying only the entity's timestamps, normalized to UTC.
    ///
    /// All other fields keep their empty representation.
    pub fn with_timestamps<Tz: TimeZone>(created: &DateTime<Tz>, updated: &DateTime<Tz>) -> Self {
        Self {
            creation_timestamp: created.with_timezone(&Utc),
            update_timestamp: updated.with_timezone(&Utc),
            ..Default::default()
        }
    }
}

/// Status section for entities without computed state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericStatus {
    /// Extensible field bag
    pub additional_fields: Option<FieldBag>,
}

/// API coordinates of a resource type
pub trait ResourceKind {
    /// API group (e.g. `iam.grafana.app`)
    const GROUP: &'static str;
    /// API version within the group
    const VERSION: &'static str;
    /// Singular kind name
    const KIND: &'static str;
    /// Plural path segment
    const PLURAL: &'static str;

    /// `group/version` string
    fn api_version() -> String {
        format!("{}/{}", Self::GROUP, Self::VERSION)
    }
}

/// Conversion from a domain entity into its resource envelope
///
/// Conversions are total and side-effect free: the entity is only read, and
/// concepts the entity does not carry stay empty rather than being invented.
pub trait ToResource {
    /// Spec section type
    type Spec: Serialize;
    /// Status section type
    type Status: Serialize + Default;

    /// Build the envelope for this entity
    fn to_resource(&self) -> Resource<Self::Spec, Self::Status>;
}

/// List response wrapping several resources of one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList<S, T = GenericStatus> {
    /// `group/version` of the items
    pub api_version: String,
    /// `<Kind>List`
    pub kind: String,
    /// The resources
    pub items: Vec<Resource<S, T>>,
}

impl<S, T> ResourceList<S, T> {
    /// Wrap `items` as a list of kind `K`
    pub fn of<K: ResourceKind>(items: Vec<Resource<S, T>>) -> Self {
        Self {
            api_version: K::api_version(),
            kind: format!("{}List", K::KIND),
            items,
        }
    }
}

mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
