use anyhow::anyhow;
use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    FamilyGroup, GroupId, GroupInvitation, GroupMember, GroupRole, InvitationStatus, UserId,
};
use crate::store::{now, GraphStore};

/// Email invitations go stale quickly; the token is only good for this long.
const INVITATION_TTL_HOURS: i64 = 1;

/// Pending group invitation joined with the group it belongs to.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvitation {
    pub group_id: GroupId,
    pub group_name: String,
    #[serde(flatten)]
    pub invitation: GroupInvitation,
}

pub fn create_group(
    store: &GraphStore,
    creator: UserId,
    name: &str,
    description: &str,
) -> Result<FamilyGroup> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Group name is required",
            anyhow!("empty group name from {creator}"),
        ));
    }

    store.write(|inner| {
        let taken = inner
            .groups
            .values()
            .any(|group| group.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(LibError::conflict(
                "A family group with this name already exists",
                anyhow!("group name collision"),
            ));
        }

        let id = GroupId(Uuid::new_v4());
        let group = FamilyGroup {
            id,
            name: name.to_string(),
            description: description.trim().to_string(),
            created_by: creator,
            members: vec![GroupMember {
                user: creator,
                role: GroupRole::Owner,
            }],
            invitations: Vec::new(),
            created_at: now(),
            updated_at: now(),
        };
        inner.groups.insert(id, group.clone());
        info!(group = %id, creator = %creator, "family group created");
        Ok(group)
    })
}

/// Fetch a group; membership is required, a non-member learns only not-found.
pub fn get_group(store: &GraphStore, caller: UserId, id: GroupId) -> Result<FamilyGroup> {
    store.read(|inner| {
        let group = inner.groups.get(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        if group.member(caller).is_none() {
            return Err(LibError::not_found(
                "Family group not found",
                anyhow!("user {caller} is not a member of group {id}"),
            ));
        }
        Ok(group.clone())
    })
}

pub fn update_group(
    store: &GraphStore,
    caller: UserId,
    id: GroupId,
    name: &str,
    description: &str,
) -> Result<FamilyGroup> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Group name is required",
            anyhow!("empty group name in update of {id}"),
        ));
    }

    store.write(|inner| {
        let taken = inner
            .groups
            .values()
            .any(|group| group.id != id && group.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(LibError::conflict(
                "A family group with this name already exists",
                anyhow!("group name collision on update of {id}"),
            ));
        }

        let group = inner.groups.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        require_role(group, caller, &[GroupRole::Owner, GroupRole::Admin])?;

        group.name = name.to_string();
        group.description = description.trim().to_string();
        group.updated_at = now();
        Ok(group.clone())
    })
}

/// Invite by email. Only the owner can invite; an address that is already a
/// member or already holds a pending invitation conflicts.
pub fn invite_to_group(
    store: &GraphStore,
    caller: UserId,
    id: GroupId,
    email: &str,
    role: GroupRole,
) -> Result<GroupInvitation> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(LibError::invalid(
            "Invitation email is required",
            anyhow!("empty invite email for group {id}"),
        ));
    }

    let member_id = store.user_by_email(&email).map(|user| user.id);

    store.write(|inner| {
        let group = inner.groups.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        require_role(group, caller, &[GroupRole::Owner])?;

        if member_id.is_some_and(|user| group.member(user).is_some()) {
            return Err(LibError::conflict(
                "This user is already a member of the group",
                anyhow!("invitee already a member of group {id}"),
            ));
        }
        let pending = group.invitations.iter().any(|inv| {
            inv.status == InvitationStatus::Pending
                && inv.email == email
                && !inv.expires.is_some_and(|expiry| expiry < now())
        });
        if pending {
            return Err(LibError::conflict(
                "An invitation is already pending for this email",
                anyhow!("duplicate pending invitation for group {id}"),
            ));
        }

        let invitation = GroupInvitation {
            email,
            invited_by: caller,
            token: Some(Uuid::new_v4().simple().to_string()),
            expires: Some(now() + Duration::hours(INVITATION_TTL_HOURS)),
            status: InvitationStatus::Pending,
            role,
        };
        group.invitations.push(invitation.clone());
        group.updated_at = now();
        info!(group = %id, "group invitation issued");
        Ok(invitation)
    })
}

/// Redeem an invitation token. The token must be pending, unexpired, and
/// addressed to the caller's email.
pub fn accept_group_invitation(
    store: &GraphStore,
    caller: UserId,
    token: &str,
) -> Result<FamilyGroup> {
    respond_to_invitation(store, caller, token, true)
}

pub fn decline_group_invitation(
    store: &GraphStore,
    caller: UserId,
    token: &str,
) -> Result<FamilyGroup> {
    respond_to_invitation(store, caller, token, false)
}

fn respond_to_invitation(
    store: &GraphStore,
    caller: UserId,
    token: &str,
    accept: bool,
) -> Result<FamilyGroup> {
    let caller_email = store
        .user(caller)
        .map(|user| user.email.to_lowercase())
        .ok_or_else(|| {
            LibError::access_denied(anyhow!("unknown user {caller} redeeming invitation"))
        })?;

    store.write(|inner| {
        let group = inner
            .groups
            .values_mut()
            .find(|group| {
                group
                    .invitations
                    .iter()
                    .any(|inv| inv.token.as_deref() == Some(token))
            })
            .ok_or_else(|| {
                LibError::not_found(
                    "Invitation not found or already used",
                    anyhow!("no group holds invitation token"),
                )
            })?;

        let invitation = group
            .invitations
            .iter_mut()
            .find(|inv| inv.token.as_deref() == Some(token))
            .expect("invitation present under the same write guard");

        if invitation.status != InvitationStatus::Pending {
            return Err(LibError::conflict(
                "This invitation has already been responded to",
                anyhow!("invitation token is not pending"),
            ));
        }
        if invitation.email != caller_email {
            return Err(LibError::access_denied(anyhow!(
                "invitation email does not match user {caller}"
            )));
        }
        if invitation.expires.is_some_and(|expiry| expiry < now()) {
            return Err(LibError::conflict(
                "This invitation has expired",
                anyhow!("invitation token expired"),
            ));
        }

        invitation.status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };
        let role = invitation.role;
        invitation.token = None;
        invitation.expires = None;

        if accept && group.member(caller).is_none() {
            group.members.push(GroupMember { user: caller, role });
        }
        group.updated_at = now();
        debug!(group = %group.id, accepted = accept, "group invitation resolved");
        Ok(group.clone())
    })
}

/// Remove a member. Owners and admins may remove, the creator never leaves
/// this way.
pub fn remove_member(
    store: &GraphStore,
    caller: UserId,
    id: GroupId,
    member: UserId,
) -> Result<FamilyGroup> {
    store.write(|inner| {
        let group = inner.groups.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        require_role(group, caller, &[GroupRole::Owner, GroupRole::Admin])?;

        if member == group.created_by {
            return Err(LibError::forbidden(
                "The group creator cannot be removed",
                anyhow!("attempt to remove creator from group {id}"),
            ));
        }
        let before = group.members.len();
        group.members.retain(|m| m.user != member);
        if group.members.len() == before {
            return Err(LibError::not_found(
                "Member not found in this group",
                anyhow!("user {member} is not a member of group {id}"),
            ));
        }
        group.updated_at = now();
        Ok(group.clone())
    })
}

/// Change a member's role. Owner-only, and the creator's owner role is fixed.
pub fn update_member_role(
    store: &GraphStore,
    caller: UserId,
    id: GroupId,
    member: UserId,
    role: GroupRole,
) -> Result<FamilyGroup> {
    store.write(|inner| {
        let group = inner.groups.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        require_role(group, caller, &[GroupRole::Owner])?;

        if member == group.created_by {
            return Err(LibError::forbidden(
                "The group creator's role cannot be changed",
                anyhow!("attempt to change creator role in group {id}"),
            ));
        }
        let entry = group
            .members
            .iter_mut()
            .find(|m| m.user == member)
            .ok_or_else(|| {
                LibError::not_found(
                    "Member not found in this group",
                    anyhow!("user {member} is not a member of group {id}"),
                )
            })?;
        entry.role = role;
        group.updated_at = now();
        Ok(group.clone())
    })
}

/// Delete a group and the person nodes bound to it. Creator-only.
pub fn delete_group(store: &GraphStore, caller: UserId, id: GroupId) -> Result<()> {
    store.write(|inner| {
        let group = inner.groups.get(&id).ok_or_else(|| {
            LibError::not_found("Family group not found", anyhow!("no group {id}"))
        })?;
        if group.created_by != caller {
            return Err(LibError::forbidden(
                "Only the group creator can delete the group",
                anyhow!("user {caller} is not the creator of group {id}"),
            ));
        }

        inner.groups.remove(&id);
        inner.people.retain(|_, person| person.group != Some(id));
        info!(group = %id, "family group deleted");
        Ok(())
    })
}

/// Groups the caller belongs to, name-sorted.
pub fn my_groups(store: &GraphStore, caller: UserId) -> Vec<FamilyGroup> {
    store.read(|inner| {
        let mut groups: Vec<FamilyGroup> = inner
            .groups
            .values()
            .filter(|group| group.member(caller).is_some())
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    })
}

/// Unexpired pending invitations addressed to the caller's email.
pub fn my_invitations(store: &GraphStore, caller: UserId) -> Vec<PendingInvitation> {
    let Some(email) = store.user(caller).map(|user| user.email.to_lowercase()) else {
        return Vec::new();
    };
    store.read(|inner| {
        inner
            .groups
            .values()
            .flat_map(|group| {
                group
                    .invitations
                    .iter()
                    .filter(|inv| {
                        inv.status == InvitationStatus::Pending
                            && inv.email == email
                            && !inv.expires.is_some_and(|expiry| expiry < now())
                    })
                    .map(|inv| PendingInvitation {
                        group_id: group.id,
                        group_name: group.name.clone(),
                        invitation: inv.clone(),
                    })
            })
            .collect()
    })
}

fn require_role(group: &FamilyGroup, caller: UserId, allowed: &[GroupRole]) -> Result<()> {
    let member = group.member(caller).ok_or_else(|| {
        LibError::access_denied(anyhow!(
            "user {caller} is not a member of group {}",
            group.id
        ))
    })?;
    if !allowed.contains(&member.role) {
        return Err(LibError::access_denied(anyhow!(
            "user {caller} lacks the required role in group {}",
            group.id
        )));
    }
    Ok(())
}
