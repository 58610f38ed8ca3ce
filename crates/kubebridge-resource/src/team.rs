//! Team entity and its resource form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{GenericStatus, Resource, ResourceKind, ResourceMetadata, ToResource};

/// A team owned by an organization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Numeric identifier
    pub id: i64,
    /// Stable external identifier
    pub uid: String,
    /// Display name
    pub name: String,
    /// Contact address
    #[serde(default)]
    pub email: String,
    /// Owning organization
    pub org_id: i64,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Last update time
    pub updated: DateTime<Utc>,
}

/// User-facing fields of a team
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSpec {
    /// Display name
    pub name: String,
    /// Contact address
    pub email: String,
}

/// A team as exposed through the API
pub type TeamResource = Resource<TeamSpec, GenericStatus>;

impl ResourceKind for Team {
    const GROUP: &'static str = "iam.grafana.app";
    const VERSION: &'static str = "v0alpha1";
    const KIND: &'static str = "Team";
    const PLURAL: &'static str = "teams";
}

impl ToResource for Team {
    type Spec = TeamSpec;
    type Status = GenericStatus;

    // id, uid and org_id have no metadata counterpart yet and are dropped
    fn to_resource(&self) -> TeamResource {
        Resource {
            metadata: ResourceMetadata::with_timestamps(&self.created, &self.updated),
            spec: TeamSpec {
                name: self.name.clone(),
                email: self.email.clone(),
            },
            status: GenericStatus::default(),
        }
    }
}
