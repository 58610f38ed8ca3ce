//! Resource envelopes for kubebridge
//!
//! Domain entities are exposed through the embedded API endpoint as versioned
//! resources made of three independently evolving sections:
//!
//! ```text
//! Resource
//! ├── metadata   identity and provenance (uid, timestamps, labels, ...)
//! ├── spec       user-intended, mutable fields of the entity
//! └── status     server-computed state
//! ```
//!
//! The JSON key set of each section is a compatibility surface: every key is
//! always serialized, absent optional values render as `null`.

#![deny(missing_docs)]

mod envelope;
mod team;

pub use envelope::{
    FieldBag, GenericStatus, Resource, ResourceKind, ResourceList, ResourceMetadata, ToResource,
};
pub use team::{Team, TeamResource, TeamSpec};
