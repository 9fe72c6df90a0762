use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ErrorKind, LibError, Result};
use crate::groups::{self, PendingInvitation};
use crate::images::ImageStore;
use crate::intent::{IntentClassifier, IntentPrediction};
use crate::models::{
    Collaboration, CollaborationId, CollaboratorRole, FamilyGraphView, FamilyGroup, GraphKey,
    GraphScope, GroupId, GroupInvitation, GroupRole, NewPersonPayload, Person, PersonId,
    PersonView, ShareLink, UpdatePersonPayload, UserId,
};
use crate::mutations;
use crate::permissions;
use crate::queries::{self, Intent, QueryAnswer};
use crate::sharing::{self, CollaborationView};
use crate::store::GraphStore;

/// High-level graph actions in one serializable surface.
///
/// Callers must provide a trusted `requester` sourced from validated
/// auth/session state, not from payload fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphOperation {
    CreatePerson {
        scope: GraphScope,
        payload: NewPersonPayload,
    },
    UpdatePerson {
        scope: GraphScope,
        person_id: PersonId,
        payload: UpdatePersonPayload,
    },
    DeletePerson {
        scope: GraphScope,
        person_id: PersonId,
    },
    GetGraph {
        scope: GraphScope,
    },
    GetPerson {
        scope: GraphScope,
        person_id: PersonId,
    },
    SearchPeople {
        scope: GraphScope,
        query: String,
    },
    ResolveQuery {
        scope: GraphScope,
        prediction: IntentPrediction,
    },
    GenerateShareLink {
        expires_in_hours: Option<i64>,
    },
    RevokeShareLink,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GraphOperationResult {
    Person { person: PersonView },
    Graph { graph: FamilyGraphView },
    People { items: Vec<Person> },
    Answer { answer: QueryAnswer },
    ShareLink { link: ShareLink },
    Deleted,
}

/// Facade over the store, permission resolver, mutation engine, and query
/// resolver. Every public entry resolves its scope through the permission
/// resolver before touching the graph.
#[derive(Clone)]
pub struct GraphApi {
    store: Arc<GraphStore>,
    images: Arc<dyn ImageStore>,
    classifier: Arc<IntentClassifier>,
}

impl GraphApi {
    pub fn new(
        store: Arc<GraphStore>,
        images: Arc<dyn ImageStore>,
        classifier: IntentClassifier,
    ) -> Self {
        Self {
            store,
            images,
            classifier: Arc::new(classifier),
        }
    }

    pub fn store(&self) -> Arc<GraphStore> {
        Arc::clone(&self.store)
    }

    pub fn execute(
        &self,
        requester: Option<UserId>,
        operation: GraphOperation,
    ) -> Result<GraphOperationResult> {
        match operation {
            GraphOperation::CreatePerson { scope, payload } => {
                let person = self.create_person(requester, &scope, payload)?;
                Ok(GraphOperationResult::Person { person })
            }
            GraphOperation::UpdatePerson {
                scope,
                person_id,
                payload,
            } => {
                let person = self.update_person(requester, &scope, person_id, payload)?;
                Ok(GraphOperationResult::Person { person })
            }
            GraphOperation::DeletePerson { scope, person_id } => {
                self.delete_person(requester, &scope, person_id)?;
                Ok(GraphOperationResult::Deleted)
            }
            GraphOperation::GetGraph { scope } => {
                let graph = self.get_graph(requester, &scope)?;
                Ok(GraphOperationResult::Graph { graph })
            }
            GraphOperation::GetPerson { scope, person_id } => {
                let person = self.get_person(requester, &scope, person_id)?;
                Ok(GraphOperationResult::Person { person })
            }
            GraphOperation::SearchPeople { scope, query } => {
                let items = self.search_people(requester, &scope, &query)?;
                Ok(GraphOperationResult::People { items })
            }
            GraphOperation::ResolveQuery { scope, prediction } => {
                let answer = self.resolve_query(requester, &scope, &prediction)?;
                Ok(GraphOperationResult::Answer { answer })
            }
            GraphOperation::GenerateShareLink { expires_in_hours } => {
                let owner = authenticated(requester)?;
                let link = sharing::generate_share_link(
                    &self.store,
                    owner,
                    expires_in_hours.map(Duration::hours),
                )?;
                Ok(GraphOperationResult::ShareLink { link })
            }
            GraphOperation::RevokeShareLink => {
                let owner = authenticated(requester)?;
                sharing::revoke_share_link(&self.store, owner)?;
                Ok(GraphOperationResult::Deleted)
            }
        }
    }

    // ── People ───────────────────────────────────────────────────────────

    pub fn create_person(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        payload: NewPersonPayload,
    ) -> Result<PersonView> {
        let access = permissions::require_edit(&self.store, requester, scope)?;
        let actor = authenticated(requester)?;
        let person = mutations::create_person(&self.store, access.graph, actor, payload)?;
        Ok(PersonView {
            person,
            can_edit: access.can_edit,
            is_owner: access.is_owner,
        })
    }

    pub fn update_person(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        id: PersonId,
        payload: UpdatePersonPayload,
    ) -> Result<PersonView> {
        let access = permissions::require_edit(&self.store, requester, scope)?;
        let person = mutations::update_person(&self.store, access.graph, id, payload)?;
        Ok(PersonView {
            person,
            can_edit: access.can_edit,
            is_owner: access.is_owner,
        })
    }

    /// Delete a person and release the cover-photo asset. A failed release is
    /// logged and does not undo the deletion.
    pub fn delete_person(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        id: PersonId,
    ) -> Result<()> {
        let access = permissions::require_edit(&self.store, requester, scope)?;
        let removed = mutations::delete_person(&self.store, access.graph, id)?;
        if !removed.photo_asset_id.is_empty() {
            if let Err(err) = self.images.release(&removed.photo_asset_id) {
                warn!(person = %id, error = %err, "failed to release photo asset");
            }
        }
        Ok(())
    }

    pub fn get_graph(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
    ) -> Result<FamilyGraphView> {
        let access = permissions::resolve_access(&self.store, requester, scope)?;
        Ok(FamilyGraphView {
            people: self.scope_people(access.graph),
            can_edit: access.can_edit,
            is_owner: access.is_owner,
        })
    }

    /// Group tree for the UI: group-bound nodes plus everything transitively
    /// linked in through `parent_id` or `partners`.
    pub fn get_group_graph(
        &self,
        requester: Option<UserId>,
        group_id: GroupId,
    ) -> Result<FamilyGraphView> {
        self.get_graph(requester, &GraphScope::Grouped { group_id })
    }

    pub fn get_person(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        id: PersonId,
    ) -> Result<PersonView> {
        let access = permissions::resolve_access(&self.store, requester, scope)?;
        let person = self
            .scope_people(access.graph)
            .into_iter()
            .find(|person| person.id == id)
            .ok_or_else(|| {
                LibError::not_found(
                    "Family member not found",
                    anyhow!("person {id} not visible in scope {scope:?}"),
                )
            })?;
        Ok(PersonView {
            person,
            can_edit: access.can_edit,
            is_owner: access.is_owner,
        })
    }

    /// Case-insensitive substring search over the resolved graph's people.
    pub fn search_people(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        query: &str,
    ) -> Result<Vec<Person>> {
        let access = permissions::resolve_access(&self.store, requester, scope)?;
        let needle = query.trim().to_lowercase();
        let mut people = self.scope_people(access.graph);
        if !needle.is_empty() {
            people.retain(|person| person.name.to_lowercase().contains(&needle));
        }
        Ok(people)
    }

    // ── Queries and chat ─────────────────────────────────────────────────

    /// Answer an already-classified question. An unrecognized intent label
    /// degrades to the not-understood answer.
    pub fn resolve_query(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        prediction: &IntentPrediction,
    ) -> Result<QueryAnswer> {
        let access = permissions::resolve_access(&self.store, requester, scope)?;
        let Ok(intent) = Intent::from_str(&prediction.intent) else {
            return Ok(QueryAnswer::not_understood());
        };
        Ok(queries::resolve(
            &self.store,
            requester,
            access.graph,
            intent,
            prediction.entity.as_deref(),
            prediction.relation.as_deref(),
        ))
    }

    /// Free-text chat: classify the message, then resolve. A disabled or
    /// unreachable classifier degrades to a canned reply instead of an error.
    pub async fn chat(
        &self,
        requester: Option<UserId>,
        scope: &GraphScope,
        message: &str,
    ) -> Result<QueryAnswer> {
        permissions::resolve_access(&self.store, requester, scope)?;
        match self.classifier.classify(message).await {
            Ok(prediction) => self.resolve_query(requester, scope, &prediction),
            Err(err) if err.kind == ErrorKind::Unavailable => {
                warn!(error = %err, "chat degraded to canned reply");
                let response = if self.classifier.is_enabled() {
                    "AI insights are temporarily unavailable. Please try again later."
                } else {
                    "AI insights are currently unavailable. You can still browse and edit \
                     your family tree directly."
                };
                Ok(QueryAnswer {
                    response: response.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    // ── Collaborations ───────────────────────────────────────────────────

    pub fn invite_collaborator(
        &self,
        requester: Option<UserId>,
        email: &str,
        role: CollaboratorRole,
    ) -> Result<Collaboration> {
        sharing::invite_collaborator(&self.store, authenticated(requester)?, email, role)
    }

    pub fn accept_invitation(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
    ) -> Result<Collaboration> {
        sharing::accept_invitation(&self.store, authenticated(requester)?, id)
    }

    pub fn decline_invitation(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
    ) -> Result<Collaboration> {
        sharing::decline_invitation(&self.store, authenticated(requester)?, id)
    }

    pub fn revoke_collaboration(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
    ) -> Result<Collaboration> {
        sharing::revoke_collaboration(&self.store, authenticated(requester)?, id)
    }

    pub fn cancel_invitation(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
    ) -> Result<Collaboration> {
        sharing::cancel_invitation(&self.store, authenticated(requester)?, id)
    }

    pub fn update_collaborator_role(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
        role: CollaboratorRole,
    ) -> Result<Collaboration> {
        sharing::update_collaborator_role(&self.store, authenticated(requester)?, id, role)
    }

    pub fn delete_collaboration(
        &self,
        requester: Option<UserId>,
        id: CollaborationId,
    ) -> Result<()> {
        sharing::delete_collaboration(&self.store, authenticated(requester)?, id)
    }

    pub fn list_collaborators(&self, requester: Option<UserId>) -> Result<Vec<CollaborationView>> {
        Ok(sharing::list_collaborators(
            &self.store,
            authenticated(requester)?,
        ))
    }

    pub fn list_shared_with_me(&self, requester: Option<UserId>) -> Result<Vec<CollaborationView>> {
        Ok(sharing::list_shared_with_me(
            &self.store,
            authenticated(requester)?,
        ))
    }

    // ── Family groups ────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        requester: Option<UserId>,
        name: &str,
        description: &str,
    ) -> Result<FamilyGroup> {
        groups::create_group(&self.store, authenticated(requester)?, name, description)
    }

    pub fn get_group(&self, requester: Option<UserId>, id: GroupId) -> Result<FamilyGroup> {
        groups::get_group(&self.store, authenticated(requester)?, id)
    }

    pub fn update_group(
        &self,
        requester: Option<UserId>,
        id: GroupId,
        name: &str,
        description: &str,
    ) -> Result<FamilyGroup> {
        groups::update_group(&self.store, authenticated(requester)?, id, name, description)
    }

    pub fn invite_to_group(
        &self,
        requester: Option<UserId>,
        id: GroupId,
        email: &str,
        role: GroupRole,
    ) -> Result<GroupInvitation> {
        groups::invite_to_group(&self.store, authenticated(requester)?, id, email, role)
    }

    pub fn accept_group_invitation(
        &self,
        requester: Option<UserId>,
        token: &str,
    ) -> Result<FamilyGroup> {
        groups::accept_group_invitation(&self.store, authenticated(requester)?, token)
    }

    pub fn decline_group_invitation(
        &self,
        requester: Option<UserId>,
        token: &str,
    ) -> Result<FamilyGroup> {
        groups::decline_group_invitation(&self.store, authenticated(requester)?, token)
    }

    pub fn remove_group_member(
        &self,
        requester: Option<UserId>,
        id: GroupId,
        member: UserId,
    ) -> Result<FamilyGroup> {
        groups::remove_member(&self.store, authenticated(requester)?, id, member)
    }

    pub fn update_group_member_role(
        &self,
        requester: Option<UserId>,
        id: GroupId,
        member: UserId,
        role: GroupRole,
    ) -> Result<FamilyGroup> {
        groups::update_member_role(&self.store, authenticated(requester)?, id, member, role)
    }

    pub fn delete_group(&self, requester: Option<UserId>, id: GroupId) -> Result<()> {
        groups::delete_group(&self.store, authenticated(requester)?, id)
    }

    pub fn my_groups(&self, requester: Option<UserId>) -> Result<Vec<FamilyGroup>> {
        Ok(groups::my_groups(&self.store, authenticated(requester)?))
    }

    pub fn my_group_invitations(
        &self,
        requester: Option<UserId>,
    ) -> Result<Vec<PendingInvitation>> {
        Ok(groups::my_invitations(&self.store, authenticated(requester)?))
    }

    fn scope_people(&self, key: GraphKey) -> Vec<Person> {
        match key {
            GraphKey::Owner(_) => self.store.people_in(key),
            GraphKey::Group(group) => self.store.group_graph(group),
        }
    }
}

fn authenticated(requester: Option<UserId>) -> Result<UserId> {
    requester.ok_or_else(|| LibError::access_denied(anyhow!("authentication required")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;
    use crate::images::NoopImageStore;
    use crate::models::UserRecord;

    #[derive(Default)]
    struct RecordingImageStore {
        released: Mutex<Vec<String>>,
    }

    impl ImageStore for RecordingImageStore {
        fn release(&self, asset_id: &str) -> Result<()> {
            self.released
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(asset_id.to_string());
            Ok(())
        }
    }

    fn api() -> GraphApi {
        GraphApi::new(
            Arc::new(GraphStore::new()),
            Arc::new(NoopImageStore),
            IntentClassifier::disabled(),
        )
    }

    fn seed_user(api: &GraphApi, name: &str, email: &str) -> UserId {
        let id = UserId(Uuid::new_v4());
        api.store().upsert_user(UserRecord {
            id,
            full_name: name.to_string(),
            email: email.to_string(),
        });
        id
    }

    fn payload(name: &str) -> NewPersonPayload {
        NewPersonPayload {
            name: name.to_string(),
            relation: "relative".to_string(),
            gender: None,
            date_of_birth: None,
            notes: None,
            photo_url: None,
            photo_asset_id: None,
            parent_id: None,
            partners: None,
        }
    }

    fn update_from(person: &Person) -> UpdatePersonPayload {
        UpdatePersonPayload {
            name: person.name.clone(),
            relation: person.relation.clone(),
            gender: Some(person.gender),
            date_of_birth: person.date_of_birth,
            notes: Some(person.notes.clone()),
            photo_url: Some(person.photo_url.clone()),
            photo_asset_id: Some(person.photo_asset_id.clone()),
            parent_id: person.parent_id,
            partners: Some(person.partners.iter().copied().collect()),
        }
    }

    #[test]
    fn contributor_edits_and_viewer_reads() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        let contributor = seed_user(&api, "Con", "con@example.com");
        let viewer = seed_user(&api, "View", "view@example.com");

        let alice = api
            .create_person(Some(owner), &GraphScope::SelfGraph, payload("Alice"))
            .expect("owner creates");

        let invite = api
            .invite_collaborator(Some(owner), "con@example.com", CollaboratorRole::Contributor)
            .expect("invite contributor");
        api.accept_invitation(Some(contributor), invite.id)
            .expect("accept");
        let invite = api
            .invite_collaborator(Some(owner), "view@example.com", CollaboratorRole::Viewer)
            .expect("invite viewer");
        api.accept_invitation(Some(viewer), invite.id).expect("accept");

        let scope = GraphScope::Owned { owner_id: owner };

        // Contributor edits land in the owner's graph.
        let mut rename = update_from(&alice.person);
        rename.name = "Alice Smith".to_string();
        let updated = api
            .update_person(Some(contributor), &scope, alice.person.id, rename)
            .expect("contributor edit");
        assert_eq!(updated.person.name, "Alice Smith");
        assert_eq!(updated.person.created_by, owner);
        assert!(!updated.is_owner);

        // Viewer reads but cannot write.
        let graph = api.get_graph(Some(viewer), &scope).expect("viewer read");
        assert_eq!(graph.people.len(), 1);
        assert!(!graph.can_edit);
        let err = api
            .create_person(Some(viewer), &scope, payload("Intruder"))
            .expect_err("viewer write denied");
        assert_eq!(err.code, "forbidden");
        assert_eq!(
            err.public,
            "You are not authorized to access this family graph"
        );
    }

    #[test]
    fn share_link_grants_anonymous_read_only() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        api.create_person(Some(owner), &GraphScope::SelfGraph, payload("Alice"))
            .expect("create");

        let link = match api
            .execute(Some(owner), GraphOperation::GenerateShareLink { expires_in_hours: None })
            .expect("generate link")
        {
            GraphOperationResult::ShareLink { link } => link,
            other => panic!("unexpected result {other:?}"),
        };

        let scope = GraphScope::Shared { token: link.token };
        let graph = api.get_graph(None, &scope).expect("anonymous read");
        assert_eq!(graph.people.len(), 1);
        assert!(!graph.can_edit);

        let err = api
            .create_person(None, &scope, payload("Intruder"))
            .expect_err("anonymous write denied");
        assert_eq!(err.code, "forbidden");
    }

    #[test]
    fn revoked_share_link_stops_resolving() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        let link = match api
            .execute(Some(owner), GraphOperation::GenerateShareLink { expires_in_hours: None })
            .expect("generate link")
        {
            GraphOperationResult::ShareLink { link } => link,
            other => panic!("unexpected result {other:?}"),
        };
        api.execute(Some(owner), GraphOperation::RevokeShareLink)
            .expect("revoke");

        let err = api
            .get_graph(None, &GraphScope::Shared { token: link.token })
            .expect_err("token no longer resolves");
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn delete_releases_the_photo_asset() {
        let images = Arc::new(RecordingImageStore::default());
        let api = GraphApi::new(
            Arc::new(GraphStore::new()),
            Arc::clone(&images) as Arc<dyn ImageStore>,
            IntentClassifier::disabled(),
        );
        let owner = seed_user(&api, "Owner", "owner@example.com");

        let mut with_photo = payload("Alice");
        with_photo.photo_asset_id = Some("asset-42".to_string());
        let alice = api
            .create_person(Some(owner), &GraphScope::SelfGraph, with_photo)
            .expect("create");
        api.delete_person(Some(owner), &GraphScope::SelfGraph, alice.person.id)
            .expect("delete");

        let released = images.released.lock().expect("lock");
        assert_eq!(released.as_slice(), ["asset-42"]);
    }

    #[test]
    fn search_is_scoped_to_the_callers_graph() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        let other = seed_user(&api, "Other", "other@example.com");
        api.create_person(Some(owner), &GraphScope::SelfGraph, payload("Alice Smith"))
            .expect("create");
        api.create_person(Some(other), &GraphScope::SelfGraph, payload("Alice Jones"))
            .expect("create");

        let hits = api
            .search_people(Some(owner), &GraphScope::SelfGraph, "alice")
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Alice Smith");
    }

    #[test]
    fn unknown_intent_label_degrades_to_not_understood() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        let answer = api
            .resolve_query(
                Some(owner),
                &GraphScope::SelfGraph,
                &IntentPrediction {
                    intent: "order_pizza".to_string(),
                    entity: None,
                    relation: None,
                },
            )
            .expect("degrades, not errors");
        assert_eq!(answer, QueryAnswer::not_understood());
    }

    #[tokio::test]
    async fn chat_degrades_when_classifier_is_disabled() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");

        let answer = api
            .chat(Some(owner), &GraphScope::SelfGraph, "who is Bob's mother")
            .await
            .expect("canned reply");
        assert!(answer.response.contains("AI insights are currently unavailable"));
    }

    #[test]
    fn execute_dispatches_graph_reads() {
        let api = api();
        let owner = seed_user(&api, "Owner", "owner@example.com");
        api.create_person(Some(owner), &GraphScope::SelfGraph, payload("Alice"))
            .expect("create");

        let result = api
            .execute(
                Some(owner),
                GraphOperation::GetGraph {
                    scope: GraphScope::SelfGraph,
                },
            )
            .expect("dispatch");
        match result {
            GraphOperationResult::Graph { graph } => {
                assert_eq!(graph.people.len(), 1);
                assert!(graph.is_owner);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
