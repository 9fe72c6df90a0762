use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LibError, Result};

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(GroupId);
uuid_id!(PersonId);
uuid_id!(CollaborationId);

/// Short URL-safe token addressing a public read-only share of an owner's graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShareToken(pub String);

impl fmt::Display for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    /// Free-text relation label as entered by the user, e.g. "father".
    pub relation: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub notes: String,
    pub photo_url: String,
    /// Image-store handle for the cover photo; empty when no photo is set.
    pub photo_asset_id: String,
    pub created_by: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub parent_id: Option<PersonId>,
    pub partners: BTreeSet<PersonId>,
    pub children: BTreeSet<PersonId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Which stored graph a request resolved to: one owner's personal graph or a
/// shared group graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphKey {
    Owner(UserId),
    Group(GroupId),
}

/// Caller-supplied addressing context for a graph operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum GraphScope {
    /// The caller's own personal graph.
    SelfGraph,
    /// Another owner's graph, reached through an accepted collaboration.
    Owned { owner_id: UserId },
    /// A family-group graph.
    Grouped { group_id: GroupId },
    /// A graph reached through a public share token.
    Shared { token: ShareToken },
}

/// Access decision computed by the permission resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub graph: GraphKey,
    pub can_read: bool,
    pub can_edit: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPersonPayload {
    pub name: String,
    pub relation: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub notes: Option<String>,
    pub photo_url: Option<String>,
    pub photo_asset_id: Option<String>,
    pub parent_id: Option<PersonId>,
    pub partners: Option<Vec<PersonId>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePersonPayload {
    pub name: String,
    pub relation: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub notes: Option<String>,
    pub photo_url: Option<String>,
    pub photo_asset_id: Option<String>,
    pub parent_id: Option<PersonId>,
    pub partners: Option<Vec<PersonId>>,
}

/// Normalized person fields ready for reference validation and insertion.
#[derive(Debug, Clone)]
pub struct PersonDraft {
    pub name: String,
    pub relation: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub notes: String,
    pub photo_url: String,
    pub photo_asset_id: String,
    pub parent_id: Option<PersonId>,
    pub partners: BTreeSet<PersonId>,
}

impl NewPersonPayload {
    pub fn normalize(self) -> Result<PersonDraft> {
        normalize_person_fields(
            self.name,
            self.relation,
            self.gender,
            self.date_of_birth,
            self.notes,
            self.photo_url,
            self.photo_asset_id,
            self.parent_id,
            self.partners,
        )
    }
}

impl UpdatePersonPayload {
    pub fn normalize(self) -> Result<PersonDraft> {
        normalize_person_fields(
            self.name,
            self.relation,
            self.gender,
            self.date_of_birth,
            self.notes,
            self.photo_url,
            self.photo_asset_id,
            self.parent_id,
            self.partners,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn normalize_person_fields(
    name: String,
    relation: String,
    gender: Option<Gender>,
    date_of_birth: Option<NaiveDate>,
    notes: Option<String>,
    photo_url: Option<String>,
    photo_asset_id: Option<String>,
    parent_id: Option<PersonId>,
    partners: Option<Vec<PersonId>>,
) -> Result<PersonDraft> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Person name is required",
            anyhow!("empty person name"),
        ));
    }

    let relation = relation.trim().to_string();
    if relation.is_empty() {
        return Err(LibError::invalid(
            "Relation label is required",
            anyhow!("empty relation label for {name}"),
        ));
    }

    // Duplicate partner ids collapse silently; a self-partner cannot be
    // expressed at draft time and is re-checked against the stored id later.
    let partners: BTreeSet<PersonId> = partners.unwrap_or_default().into_iter().collect();

    Ok(PersonDraft {
        name,
        relation,
        gender: gender.unwrap_or_default(),
        date_of_birth,
        notes: notes.unwrap_or_default(),
        photo_url: photo_url.unwrap_or_default(),
        photo_asset_id: photo_asset_id.unwrap_or_default(),
        parent_id,
        partners,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorRole {
    Viewer,
    Contributor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
    Cancelled,
}

impl CollaborationStatus {
    /// Terminal records free the (owner, collaborator) pair for a fresh invite
    /// and may be permanently deleted by the owner.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Revoked | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Revoked => "revoked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl CollaboratorRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Contributor => "contributor",
        }
    }
}

/// Permission grant from a graph owner to another user, unique per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaboration {
    pub id: CollaborationId,
    pub owner: UserId,
    pub collaborator: UserId,
    pub role: CollaboratorRole,
    pub status: CollaborationStatus,
    /// Pending invitations past this instant are treated as declined on accept.
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub token: ShareToken,
    pub owner: UserId,
    /// None means the link never expires.
    pub expires_at: Option<NaiveDateTime>,
    pub description: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user: UserId,
    pub role: GroupRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInvitation {
    pub email: String,
    pub invited_by: UserId,
    /// Cleared once the invitation leaves the pending state.
    pub token: Option<String>,
    pub expires: Option<NaiveDateTime>,
    pub status: InvitationStatus,
    pub role: GroupRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyGroup {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub created_by: UserId,
    pub members: Vec<GroupMember>,
    pub invitations: Vec<GroupInvitation>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl FamilyGroup {
    pub fn member(&self, user: UserId) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.user == user)
    }
}

/// Minimal user directory entry used to resolve invitation emails and chat
/// lookups; populated by the external authentication provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyGraphView {
    pub people: Vec<Person>,
    pub can_edit: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    #[serde(flatten)]
    pub person: Person,
    pub can_edit: bool,
    pub is_owner: bool,
}
