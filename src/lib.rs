pub mod api;
pub mod error;
pub mod groups;
pub mod images;
pub mod intent;
pub mod models;
pub mod mutations;
pub mod permissions;
pub mod queries;
pub mod sharing;
pub mod store;

pub mod prelude {
    pub use crate::api::{GraphApi, GraphOperation, GraphOperationResult};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::images::{ImageStore, NoopImageStore};
    pub use crate::intent::{ClassifierConfig, IntentClassifier, IntentPrediction};
    pub use crate::models::{
        Access, Collaboration, CollaborationId, CollaborationStatus, CollaboratorRole,
        FamilyGraphView, FamilyGroup, Gender, GraphKey, GraphScope, GroupId, GroupInvitation,
        GroupMember, GroupRole, NewPersonPayload, Person, PersonId, PersonView, ShareLink,
        ShareToken, UpdatePersonPayload, UserId, UserRecord,
    };
    pub use crate::permissions::{require_edit, resolve_access};
    pub use crate::queries::{Intent, QueryAnswer};
    pub use crate::store::GraphStore;
}
