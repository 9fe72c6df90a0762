use anyhow::anyhow;
use tracing::debug;

use crate::error::{LibError, Result};
use crate::models::{
    Access, CollaborationStatus, CollaboratorRole, GraphKey, GraphScope, GroupRole, UserId,
};
use crate::store::{now, GraphStore};

/// Compute the access decision for one request.
///
/// This is the single authority for graph access: every facade read and write
/// resolves its scope here first, and no other component re-derives
/// permissions. The four scope variants are evaluated as alternatives, first
/// match wins.
pub fn resolve_access(
    store: &GraphStore,
    requester: Option<UserId>,
    scope: &GraphScope,
) -> Result<Access> {
    match scope {
        GraphScope::Shared { token } => {
            let link = store
                .read(|inner| inner.share_links.get(token).cloned())
                .ok_or_else(|| {
                    LibError::not_found(
                        "Invalid or expired share link",
                        anyhow!("no share link for token {token}"),
                    )
                })?;
            if link.expires_at.is_some_and(|expiry| expiry < now()) {
                return Err(LibError::not_found(
                    "Invalid or expired share link",
                    anyhow!("share link {token} expired"),
                ));
            }

            let mut access = Access {
                graph: GraphKey::Owner(link.owner),
                can_read: true,
                can_edit: false,
                is_owner: false,
            };
            if let Some(user) = requester {
                if user == link.owner {
                    access.can_edit = true;
                    access.is_owner = true;
                } else if accepted_role(store, link.owner, user)
                    == Some(CollaboratorRole::Contributor)
                {
                    access.can_edit = true;
                }
            }
            Ok(access)
        }

        GraphScope::Owned { owner_id } => {
            let user = authenticated(requester, "owner-id access")?;
            if user == *owner_id {
                return Ok(Access {
                    graph: GraphKey::Owner(user),
                    can_read: true,
                    can_edit: true,
                    is_owner: true,
                });
            }
            let role = accepted_role(store, *owner_id, user).ok_or_else(|| {
                debug!(%user, owner = %owner_id, "no accepted collaboration");
                LibError::access_denied(anyhow!(
                    "user {user} has no accepted collaboration with owner {owner_id}"
                ))
            })?;
            Ok(Access {
                graph: GraphKey::Owner(*owner_id),
                can_read: true,
                can_edit: role == CollaboratorRole::Contributor,
                is_owner: false,
            })
        }

        GraphScope::Grouped { group_id } => {
            let user = authenticated(requester, "group access")?;
            let member = store.read(|inner| {
                inner
                    .groups
                    .get(group_id)
                    .map(|group| group.member(user).copied())
            });
            let member = member.ok_or_else(|| {
                LibError::not_found("Family group not found", anyhow!("no group {group_id}"))
            })?;
            let member = member.ok_or_else(|| {
                debug!(%user, group = %group_id, "requester is not a group member");
                LibError::access_denied(anyhow!("user {user} is not a member of group {group_id}"))
            })?;
            // Group editing is open to every member; roles below owner are not
            // gated in the current model.
            Ok(Access {
                graph: GraphKey::Group(*group_id),
                can_read: true,
                can_edit: true,
                is_owner: member.role == GroupRole::Owner,
            })
        }

        GraphScope::SelfGraph => {
            let user = authenticated(requester, "personal graph access")?;
            Ok(Access {
                graph: GraphKey::Owner(user),
                can_read: true,
                can_edit: true,
                is_owner: true,
            })
        }
    }
}

/// Shortcut for writes: resolve and require edit rights in one step.
pub fn require_edit(
    store: &GraphStore,
    requester: Option<UserId>,
    scope: &GraphScope,
) -> Result<Access> {
    let access = resolve_access(store, requester, scope)?;
    if !access.can_edit {
        return Err(LibError::access_denied(anyhow!(
            "scope {scope:?} resolved read-only"
        )));
    }
    Ok(access)
}

fn authenticated(requester: Option<UserId>, context: &'static str) -> Result<UserId> {
    requester.ok_or_else(|| {
        LibError::access_denied(anyhow!("authentication required for {context}"))
    })
}

fn accepted_role(store: &GraphStore, owner: UserId, user: UserId) -> Option<CollaboratorRole> {
    store.read(|inner| {
        inner
            .collaboration_for_pair(owner, user)
            .filter(|c| c.status == CollaborationStatus::Accepted)
            .map(|c| c.role)
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::models::{Collaboration, CollaborationId, ShareLink, ShareToken};
    use crate::store::now;

    fn seed_link(store: &GraphStore, owner: UserId, token: &str) {
        store.write(|inner| {
            inner.share_links.insert(
                ShareToken(token.to_string()),
                ShareLink {
                    token: ShareToken(token.to_string()),
                    owner,
                    expires_at: None,
                    description: String::new(),
                    created_at: now(),
                },
            );
        });
    }

    fn seed_collab(
        store: &GraphStore,
        owner: UserId,
        collaborator: UserId,
        role: CollaboratorRole,
        status: CollaborationStatus,
    ) {
        let id = CollaborationId(Uuid::new_v4());
        store.write(|inner| {
            inner.collaborations.insert(
                id,
                Collaboration {
                    id,
                    owner,
                    collaborator,
                    role,
                    status,
                    expires_at: None,
                    created_at: now(),
                    updated_at: now(),
                },
            );
        });
    }

    #[test]
    fn self_scope_requires_authentication() {
        let store = GraphStore::new();
        let err = resolve_access(&store, None, &GraphScope::SelfGraph)
            .expect_err("anonymous self access should fail");
        assert_eq!(err.code, "forbidden");

        let user = UserId(Uuid::new_v4());
        let access =
            resolve_access(&store, Some(user), &GraphScope::SelfGraph).expect("owner access");
        assert!(access.can_read && access.can_edit && access.is_owner);
        assert_eq!(access.graph, GraphKey::Owner(user));
    }

    #[test]
    fn share_token_grants_anonymous_read_only() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        seed_link(&store, owner, "abc123de");

        let scope = GraphScope::Shared {
            token: ShareToken("abc123de".to_string()),
        };
        let access = resolve_access(&store, None, &scope).expect("public read");
        assert!(access.can_read);
        assert!(!access.can_edit);
        assert!(!access.is_owner);

        let err = require_edit(&store, None, &scope).expect_err("anonymous edit should fail");
        assert_eq!(err.code, "forbidden");
    }

    #[test]
    fn share_token_upgrades_for_owner_and_contributor() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        let contributor = UserId(Uuid::new_v4());
        let viewer = UserId(Uuid::new_v4());
        seed_link(&store, owner, "abc123de");
        seed_collab(
            &store,
            owner,
            contributor,
            CollaboratorRole::Contributor,
            CollaborationStatus::Accepted,
        );
        seed_collab(
            &store,
            owner,
            viewer,
            CollaboratorRole::Viewer,
            CollaborationStatus::Accepted,
        );

        let scope = GraphScope::Shared {
            token: ShareToken("abc123de".to_string()),
        };
        let access = resolve_access(&store, Some(owner), &scope).expect("owner");
        assert!(access.can_edit && access.is_owner);

        let access = resolve_access(&store, Some(contributor), &scope).expect("contributor");
        assert!(access.can_edit && !access.is_owner);

        let access = resolve_access(&store, Some(viewer), &scope).expect("viewer");
        assert!(!access.can_edit);
    }

    #[test]
    fn expired_share_token_is_not_found() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        seed_link(&store, owner, "abc123de");
        store.write(|inner| {
            if let Some(link) = inner.share_links.get_mut(&ShareToken("abc123de".to_string())) {
                link.expires_at = Some(now() - Duration::hours(1));
            }
        });

        let err = resolve_access(
            &store,
            None,
            &GraphScope::Shared {
                token: ShareToken("abc123de".to_string()),
            },
        )
        .expect_err("expired link should fail");
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn owner_id_path_requires_accepted_collaboration() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        let outsider = UserId(Uuid::new_v4());
        let viewer = UserId(Uuid::new_v4());
        seed_collab(
            &store,
            owner,
            viewer,
            CollaboratorRole::Viewer,
            CollaborationStatus::Accepted,
        );

        let scope = GraphScope::Owned { owner_id: owner };
        let err = resolve_access(&store, Some(outsider), &scope)
            .expect_err("outsider should be denied");
        assert_eq!(err.code, "forbidden");

        let access = resolve_access(&store, Some(viewer), &scope).expect("viewer reads");
        assert!(access.can_read && !access.can_edit);

        let access = resolve_access(&store, Some(owner), &scope).expect("owner");
        assert!(access.can_edit && access.is_owner);
    }

    #[test]
    fn pending_collaboration_grants_nothing() {
        let store = GraphStore::new();
        let owner = UserId(Uuid::new_v4());
        let invited = UserId(Uuid::new_v4());
        seed_collab(
            &store,
            owner,
            invited,
            CollaboratorRole::Contributor,
            CollaborationStatus::Pending,
        );

        let err = resolve_access(&store, Some(invited), &GraphScope::Owned { owner_id: owner })
            .expect_err("pending invite grants nothing");
        assert_eq!(err.code, "forbidden");
    }
}
