use anyhow::anyhow;
use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Collaboration, CollaborationId, CollaborationStatus, CollaboratorRole, ShareLink, ShareToken,
    UserId, UserRecord,
};
use crate::store::{now, GraphStore};

/// Pending invitations expire after this long; accepting a stale one flips it
/// to declined instead.
const INVITATION_TTL_DAYS: i64 = 7;

const SHARE_TOKEN_LEN: usize = 8;

/// Collaboration record joined with the counterpart's directory entry.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationView {
    #[serde(flatten)]
    pub collaboration: Collaboration,
    pub user: Option<UserRecord>,
}

/// Invite a user, addressed by email, to collaborate on the caller's graph.
///
/// The (owner, collaborator) pair is unique: a pending or accepted record
/// blocks a new invite, while a terminal record is reset in place to a fresh
/// pending invitation with the newly requested role.
pub fn invite_collaborator(
    store: &GraphStore,
    owner: UserId,
    email: &str,
    role: CollaboratorRole,
) -> Result<Collaboration> {
    let email = email.trim();
    if email.is_empty() {
        return Err(LibError::invalid(
            "Collaborator email is required",
            anyhow!("empty invite email from {owner}"),
        ));
    }
    let invited = store.user_by_email(email).ok_or_else(|| {
        LibError::not_found(
            "No user found with that email address",
            anyhow!("invite email does not resolve to a user"),
        )
    })?;
    if invited.id == owner {
        return Err(LibError::invalid(
            "You cannot invite yourself as a collaborator",
            anyhow!("self-invite by {owner}"),
        ));
    }

    store.write(|inner| {
        let existing = inner
            .collaboration_for_pair(owner, invited.id)
            .map(|c| (c.id, c.status));
        match existing {
            Some((_, CollaborationStatus::Pending)) => Err(LibError::conflict(
                "An invitation is already pending for this user",
                anyhow!("pending collaboration for pair ({owner}, {})", invited.id),
            )),
            Some((_, CollaborationStatus::Accepted)) => Err(LibError::conflict(
                "This user is already a collaborator",
                anyhow!("accepted collaboration for pair ({owner}, {})", invited.id),
            )),
            Some((id, _)) => {
                // Terminal record: reuse it as a fresh invitation.
                let record = inner
                    .collaborations
                    .get_mut(&id)
                    .expect("record present under the same write guard");
                record.role = role;
                record.status = CollaborationStatus::Pending;
                record.expires_at = Some(now() + Duration::days(INVITATION_TTL_DAYS));
                record.updated_at = now();
                info!(collaboration = %id, owner = %owner, "re-invited collaborator");
                Ok(record.clone())
            }
            None => {
                let id = CollaborationId(Uuid::new_v4());
                let record = Collaboration {
                    id,
                    owner,
                    collaborator: invited.id,
                    role,
                    status: CollaborationStatus::Pending,
                    expires_at: Some(now() + Duration::days(INVITATION_TTL_DAYS)),
                    created_at: now(),
                    updated_at: now(),
                };
                inner.collaborations.insert(id, record.clone());
                info!(collaboration = %id, owner = %owner, "invited collaborator");
                Ok(record)
            }
        }
    })
}

/// Accept a pending invitation addressed to `collaborator`. An expired
/// invitation is flipped to declined and the accept fails.
pub fn accept_invitation(
    store: &GraphStore,
    collaborator: UserId,
    id: CollaborationId,
) -> Result<Collaboration> {
    respond(store, collaborator, id, true)
}

pub fn decline_invitation(
    store: &GraphStore,
    collaborator: UserId,
    id: CollaborationId,
) -> Result<Collaboration> {
    respond(store, collaborator, id, false)
}

fn respond(
    store: &GraphStore,
    collaborator: UserId,
    id: CollaborationId,
    accept: bool,
) -> Result<Collaboration> {
    store.write(|inner| {
        let record = inner.collaborations.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Invitation not found", anyhow!("no collaboration {id}"))
        })?;
        if record.collaborator != collaborator {
            return Err(LibError::access_denied(anyhow!(
                "user {collaborator} is not the invitee of collaboration {id}"
            )));
        }
        if record.status != CollaborationStatus::Pending {
            return Err(LibError::conflict(
                "This invitation has already been responded to",
                anyhow!("collaboration {id} is {}", record.status.as_str()),
            ));
        }
        if accept && record.expires_at.is_some_and(|expiry| expiry < now()) {
            record.status = CollaborationStatus::Declined;
            record.updated_at = now();
            return Err(LibError::conflict(
                "This invitation has expired",
                anyhow!("collaboration {id} expired before accept"),
            ));
        }

        record.status = if accept {
            CollaborationStatus::Accepted
        } else {
            CollaborationStatus::Declined
        };
        record.expires_at = None;
        record.updated_at = now();
        info!(collaboration = %id, accepted = accept, "invitation response recorded");
        Ok(record.clone())
    })
}

/// Withdraw an accepted collaborator's access.
pub fn revoke_collaboration(
    store: &GraphStore,
    owner: UserId,
    id: CollaborationId,
) -> Result<Collaboration> {
    transition_as_owner(
        store,
        owner,
        id,
        CollaborationStatus::Accepted,
        CollaborationStatus::Revoked,
        "Only an accepted collaboration can be revoked",
    )
}

/// Withdraw a still-pending invitation.
pub fn cancel_invitation(
    store: &GraphStore,
    owner: UserId,
    id: CollaborationId,
) -> Result<Collaboration> {
    transition_as_owner(
        store,
        owner,
        id,
        CollaborationStatus::Pending,
        CollaborationStatus::Cancelled,
        "Only a pending invitation can be cancelled",
    )
}

fn transition_as_owner(
    store: &GraphStore,
    owner: UserId,
    id: CollaborationId,
    from: CollaborationStatus,
    to: CollaborationStatus,
    conflict_msg: &'static str,
) -> Result<Collaboration> {
    store.write(|inner| {
        let record = inner.collaborations.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Collaboration not found", anyhow!("no collaboration {id}"))
        })?;
        if record.owner != owner {
            return Err(LibError::access_denied(anyhow!(
                "user {owner} does not own collaboration {id}"
            )));
        }
        if record.status != from {
            return Err(LibError::conflict(
                conflict_msg,
                anyhow!("collaboration {id} is {}", record.status.as_str()),
            ));
        }
        record.status = to;
        record.updated_at = now();
        debug!(collaboration = %id, status = to.as_str(), "collaboration transitioned");
        Ok(record.clone())
    })
}

/// Change an accepted collaborator's role.
pub fn update_collaborator_role(
    store: &GraphStore,
    owner: UserId,
    id: CollaborationId,
    role: CollaboratorRole,
) -> Result<Collaboration> {
    store.write(|inner| {
        let record = inner.collaborations.get_mut(&id).ok_or_else(|| {
            LibError::not_found("Collaboration not found", anyhow!("no collaboration {id}"))
        })?;
        if record.owner != owner {
            return Err(LibError::access_denied(anyhow!(
                "user {owner} does not own collaboration {id}"
            )));
        }
        if record.status != CollaborationStatus::Accepted {
            return Err(LibError::conflict(
                "Role can only be changed on an accepted collaboration",
                anyhow!("collaboration {id} is {}", record.status.as_str()),
            ));
        }
        record.role = role;
        record.updated_at = now();
        Ok(record.clone())
    })
}

/// Delete a terminal collaboration record for good.
pub fn delete_collaboration(store: &GraphStore, owner: UserId, id: CollaborationId) -> Result<()> {
    store.write(|inner| {
        let record = inner.collaborations.get(&id).ok_or_else(|| {
            LibError::not_found("Collaboration not found", anyhow!("no collaboration {id}"))
        })?;
        if record.owner != owner {
            return Err(LibError::access_denied(anyhow!(
                "user {owner} does not own collaboration {id}"
            )));
        }
        if !record.status.is_terminal() {
            return Err(LibError::conflict(
                "Only a declined, revoked, or cancelled record can be deleted",
                anyhow!("collaboration {id} is {}", record.status.as_str()),
            ));
        }
        inner.collaborations.remove(&id);
        Ok(())
    })
}

/// Collaborations on the caller's own graph, newest first, with the invitee's
/// directory entry joined in.
pub fn list_collaborators(store: &GraphStore, owner: UserId) -> Vec<CollaborationView> {
    let mut records = store.read(|inner| {
        inner
            .collaborations
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect::<Vec<_>>()
    });
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
        .into_iter()
        .map(|c| {
            let user = store.user(c.collaborator);
            CollaborationView {
                collaboration: c,
                user,
            }
        })
        .collect()
}

/// Graphs shared with the caller, newest first, with the owner's directory
/// entry joined in.
pub fn list_shared_with_me(store: &GraphStore, collaborator: UserId) -> Vec<CollaborationView> {
    let mut records = store.read(|inner| {
        inner
            .collaborations
            .values()
            .filter(|c| c.collaborator == collaborator)
            .cloned()
            .collect::<Vec<_>>()
    });
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
        .into_iter()
        .map(|c| {
            let user = store.user(c.owner);
            CollaborationView {
                collaboration: c,
                user,
            }
        })
        .collect()
}

// ── Share links ──────────────────────────────────────────────────────────

/// Create the owner's public share link, or return the existing live one.
/// Generation is idempotent: one live link per owner.
pub fn generate_share_link(
    store: &GraphStore,
    owner: UserId,
    expires_in: Option<Duration>,
) -> Result<ShareLink> {
    store.write(|inner| {
        let live = inner
            .share_links
            .values()
            .find(|link| {
                link.owner == owner && !link.expires_at.is_some_and(|expiry| expiry < now())
            })
            .cloned();
        if let Some(link) = live {
            return Ok(link);
        }

        let mut token = new_token();
        while inner.share_links.contains_key(&token) {
            token = new_token();
        }
        let link = ShareLink {
            token: token.clone(),
            owner,
            expires_at: expires_in.map(|ttl| now() + ttl),
            description: String::new(),
            created_at: now(),
        };
        inner.share_links.insert(token.clone(), link.clone());
        info!(owner = %owner, token = %token, "share link generated");
        Ok(link)
    })
}

pub fn get_share_link(store: &GraphStore, owner: UserId) -> Option<ShareLink> {
    store.read(|inner| {
        inner
            .share_links
            .values()
            .find(|link| {
                link.owner == owner && !link.expires_at.is_some_and(|expiry| expiry < now())
            })
            .cloned()
    })
}

/// Revoking deletes the record; the token stops resolving immediately.
pub fn revoke_share_link(store: &GraphStore, owner: UserId) -> Result<()> {
    store.write(|inner| {
        let token = inner
            .share_links
            .values()
            .find(|link| link.owner == owner)
            .map(|link| link.token.clone())
            .ok_or_else(|| {
                LibError::not_found(
                    "No active share link to revoke",
                    anyhow!("owner {owner} has no share link"),
                )
            })?;
        inner.share_links.remove(&token);
        info!(owner = %owner, "share link revoked");
        Ok(())
    })
}

fn new_token() -> ShareToken {
    let hex = Uuid::new_v4().simple().to_string();
    ShareToken(hex[..SHARE_TOKEN_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_user(store: &GraphStore, name: &str, email: &str) -> UserId {
        let id = UserId(Uuid::new_v4());
        store.upsert_user(UserRecord {
            id,
            full_name: name.to_string(),
            email: email.to_string(),
        });
        id
    }

    #[test]
    fn invite_requires_a_known_email() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");

        let err = invite_collaborator(&store, owner, "ghost@example.com", CollaboratorRole::Viewer)
            .expect_err("unknown email");
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn self_invite_is_rejected() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");

        let err = invite_collaborator(&store, owner, "owner@example.com", CollaboratorRole::Viewer)
            .expect_err("self invite");
        assert_eq!(err.code, "invalid_input");
    }

    #[test]
    fn duplicate_invites_conflict_until_terminal() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");
        seed_user(&store, "Pat", "pat@example.com");

        let first = invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect("first invite");
        let err = invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect_err("pending blocks re-invite");
        assert_eq!(err.code, "conflict");

        cancel_invitation(&store, owner, first.id).expect("cancel");
        let again =
            invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Contributor)
                .expect("terminal record is reusable");
        assert_eq!(again.id, first.id, "pair record is reused, not duplicated");
        assert_eq!(again.status, CollaborationStatus::Pending);
        assert_eq!(again.role, CollaboratorRole::Contributor);
    }

    #[test]
    fn accept_and_decline_are_invitee_only() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");
        let pat = seed_user(&store, "Pat", "pat@example.com");
        let other = seed_user(&store, "Other", "other@example.com");

        let invite = invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect("invite");

        let err = accept_invitation(&store, other, invite.id).expect_err("wrong invitee");
        assert_eq!(err.code, "forbidden");

        let accepted = accept_invitation(&store, pat, invite.id).expect("accept");
        assert_eq!(accepted.status, CollaborationStatus::Accepted);
        assert!(accepted.expires_at.is_none());

        let err = decline_invitation(&store, pat, invite.id).expect_err("already responded");
        assert_eq!(err.code, "conflict");
    }

    #[test]
    fn expired_invitation_declines_on_accept() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");
        let pat = seed_user(&store, "Pat", "pat@example.com");

        let invite = invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect("invite");
        store.write(|inner| {
            if let Some(record) = inner.collaborations.get_mut(&invite.id) {
                record.expires_at = Some(now() - Duration::hours(1));
            }
        });

        let err = accept_invitation(&store, pat, invite.id).expect_err("expired");
        assert_eq!(err.code, "conflict");
        let status = store.read(|inner| inner.collaborations[&invite.id].status);
        assert_eq!(status, CollaborationStatus::Declined);
    }

    #[test]
    fn lifecycle_transitions_enforce_current_status() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");
        let pat = seed_user(&store, "Pat", "pat@example.com");

        let invite = invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect("invite");

        // Revoke needs accepted, role change needs accepted, delete needs terminal.
        assert_eq!(
            revoke_collaboration(&store, owner, invite.id)
                .expect_err("pending cannot be revoked")
                .code,
            "conflict"
        );
        assert_eq!(
            update_collaborator_role(&store, owner, invite.id, CollaboratorRole::Contributor)
                .expect_err("pending cannot change role")
                .code,
            "conflict"
        );
        assert_eq!(
            delete_collaboration(&store, owner, invite.id)
                .expect_err("pending cannot be deleted")
                .code,
            "conflict"
        );

        accept_invitation(&store, pat, invite.id).expect("accept");
        let updated =
            update_collaborator_role(&store, owner, invite.id, CollaboratorRole::Contributor)
                .expect("role change on accepted");
        assert_eq!(updated.role, CollaboratorRole::Contributor);

        let revoked = revoke_collaboration(&store, owner, invite.id).expect("revoke accepted");
        assert_eq!(revoked.status, CollaborationStatus::Revoked);

        delete_collaboration(&store, owner, invite.id).expect("delete terminal");
        assert!(store.read(|inner| !inner.collaborations.contains_key(&invite.id)));
    }

    #[test]
    fn listings_are_split_by_side() {
        let store = GraphStore::new();
        let owner = seed_user(&store, "Owner", "owner@example.com");
        let pat = seed_user(&store, "Pat", "pat@example.com");
        invite_collaborator(&store, owner, "pat@example.com", CollaboratorRole::Viewer)
            .expect("invite");

        let mine = list_collaborators(&store, owner);
        assert_eq!(mine.len(), 1);
        assert_eq!(
            mine[0].user.as_ref().map(|u| u.email.as_str()),
            Some("pat@example.com")
        );

        let theirs = list_shared_with_me(&store, pat);
        assert_eq!(theirs.len(), 1);
        assert_eq!(
            theirs[0].user.as_ref().map(|u| u.email.as_str()),
            Some("owner@example.com")
        );
        assert!(list_shared_with_me(&store, owner).is_empty());
    }

    #[test]
    fn share_link_generation_is_idempotent() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());

        let first = generate_share_link(&store, owner, None).expect("generate");
        assert_eq!(first.token.0.len(), SHARE_TOKEN_LEN);

        let second = generate_share_link(&store, owner, None).expect("regenerate");
        assert_eq!(first.token, second.token, "same live link returned");
        assert_eq!(store.read(|inner| inner.share_links.len()), 1);
    }

    #[test]
    fn expired_link_is_replaced_on_generate() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        let first = generate_share_link(&store, owner, Some(Duration::hours(1))).expect("generate");
        store.write(|inner| {
            if let Some(link) = inner.share_links.get_mut(&first.token) {
                link.expires_at = Some(now() - Duration::hours(1));
            }
        });

        let second = generate_share_link(&store, owner, None).expect("regenerate");
        assert_ne!(first.token, second.token);
        assert!(get_share_link(&store, owner).is_some());
    }

    #[test]
    fn revoke_deletes_the_link() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        generate_share_link(&store, owner, None).expect("generate");

        revoke_share_link(&store, owner).expect("revoke");
        assert!(get_share_link(&store, owner).is_none());
        assert_eq!(
            revoke_share_link(&store, owner).expect_err("nothing left").code,
            "not_found"
        );
    }
}
