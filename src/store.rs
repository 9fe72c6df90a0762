use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{NaiveDateTime, Utc};

use crate::models::{
    Collaboration, CollaborationId, FamilyGroup, GraphKey, GroupId, Person, PersonId, ShareLink,
    ShareToken, UserId, UserRecord,
};

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// In-process graph store: an arena of `Person` nodes keyed by id plus the
/// collaboration, share-link, group, and user-directory tables.
///
/// All reads and writes go through one lock, which doubles as the owner-scoped
/// mutual exclusion for multi-step edge propagation: a mutation and its
/// propagation are applied under a single write guard, so readers never observe
/// a graph mid-propagation.
#[derive(Default)]
pub struct GraphStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub people: HashMap<PersonId, Person>,
    pub collaborations: HashMap<CollaborationId, Collaboration>,
    pub share_links: HashMap<ShareToken, ShareLink>,
    pub groups: HashMap<GroupId, FamilyGroup>,
    pub users: HashMap<UserId, UserRecord>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn person(&self, id: PersonId) -> Option<Person> {
        self.read(|inner| inner.people.get(&id).cloned())
    }

    /// All nodes belonging to one graph, name-sorted for deterministic output.
    pub fn people_in(&self, key: GraphKey) -> Vec<Person> {
        self.read(|inner| {
            let mut people: Vec<Person> = inner
                .people
                .values()
                .filter(|person| inner.in_scope(person, key))
                .cloned()
                .collect();
            people.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            people
        })
    }

    /// Group graph with transitive expansion: nodes bound to the group plus any
    /// node linked into that set through `parent_id` or `partners`, walked to a
    /// fixpoint.
    pub fn group_graph(&self, group_id: GroupId) -> Vec<Person> {
        self.read(|inner| {
            let mut tree: HashSet<PersonId> = inner
                .people
                .values()
                .filter(|person| person.group == Some(group_id))
                .map(|person| person.id)
                .collect();

            let mut grew = !tree.is_empty();
            while grew {
                grew = false;
                for person in inner.people.values() {
                    if tree.contains(&person.id) {
                        continue;
                    }
                    let linked = person
                        .parent_id
                        .is_some_and(|parent| tree.contains(&parent))
                        || person.partners.iter().any(|p| tree.contains(p));
                    if linked {
                        tree.insert(person.id);
                        grew = true;
                    }
                }
            }

            let mut people: Vec<Person> = tree
                .iter()
                .filter_map(|id| inner.people.get(id).cloned())
                .collect();
            people.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            people
        })
    }

    pub fn upsert_user(&self, user: UserRecord) {
        self.write(|inner| {
            inner.users.insert(user.id, user);
        });
    }

    pub fn user(&self, id: UserId) -> Option<UserRecord> {
        self.read(|inner| inner.users.get(&id).cloned())
    }

    pub fn user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.read(|inner| {
            inner
                .users
                .values()
                .find(|user| user.email.eq_ignore_ascii_case(email))
                .cloned()
        })
    }

    pub fn user_by_full_name(&self, name: &str) -> Option<UserRecord> {
        self.read(|inner| {
            inner
                .users
                .values()
                .find(|user| user.full_name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }
}

impl Inner {
    pub fn in_scope(&self, person: &Person, key: GraphKey) -> bool {
        match key {
            GraphKey::Owner(owner) => person.created_by == owner && person.group.is_none(),
            GraphKey::Group(group) => person.group == Some(group),
        }
    }

    pub fn scope_ids(&self, key: GraphKey) -> Vec<PersonId> {
        self.people
            .values()
            .filter(|person| self.in_scope(person, key))
            .map(|person| person.id)
            .collect()
    }

    pub fn person_in_scope(&self, id: PersonId, key: GraphKey) -> bool {
        self.people
            .get(&id)
            .is_some_and(|person| self.in_scope(person, key))
    }

    /// Recompute every `children` set in the scope from the forward pointers.
    ///
    /// `children` is a derived index, never an independently-writable field:
    ///
    /// ```text
    /// children(Q) = { P : P.parent_id == Q }
    ///             ∪ { P : P.parent_id ∈ partners(Q) }
    ///             ∪ { P ∈ partners(Q) : P.parent_id is set }
    /// ```
    ///
    /// The third clause keeps the create-time rule that a node with a parent
    /// also appears in its partners' children.
    pub fn rebuild_children(&mut self, key: GraphKey) {
        let ids = self.scope_ids(key);
        let snapshot: HashMap<PersonId, (Option<PersonId>, BTreeSet<PersonId>)> = ids
            .iter()
            .filter_map(|id| {
                self.people
                    .get(id)
                    .map(|p| (p.id, (p.parent_id, p.partners.clone())))
            })
            .collect();

        for q in &ids {
            let mut derived = BTreeSet::new();
            let partners_of_q = snapshot
                .get(q)
                .map(|(_, partners)| partners.clone())
                .unwrap_or_default();

            for (pid, (parent, _)) in &snapshot {
                let Some(parent) = parent else { continue };
                if parent == q || partners_of_q.contains(parent) {
                    derived.insert(*pid);
                }
            }
            for partner in &partners_of_q {
                if snapshot
                    .get(partner)
                    .is_some_and(|(parent, _)| parent.is_some())
                {
                    derived.insert(*partner);
                }
            }

            if let Some(person) = self.people.get_mut(q) {
                person.children = derived;
            }
        }
    }

    pub fn collaboration_for_pair(
        &self,
        owner: UserId,
        collaborator: UserId,
    ) -> Option<&Collaboration> {
        self.collaborations
            .values()
            .find(|c| c.owner == owner && c.collaborator == collaborator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;
    use uuid::Uuid;

    fn person(owner: UserId, name: &str) -> Person {
        Person {
            id: PersonId(Uuid::new_v4()),
            name: name.to_string(),
            relation: "relative".to_string(),
            gender: Gender::Unspecified,
            date_of_birth: None,
            notes: String::new(),
            photo_url: String::new(),
            photo_asset_id: String::new(),
            created_by: owner,
            group: None,
            parent_id: None,
            partners: BTreeSet::new(),
            children: BTreeSet::new(),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn rebuild_children_derives_parent_and_partner_links() {
        let owner = UserId(Uuid::new_v4());
        let store = GraphStore::new();

        let alice = person(owner, "Alice");
        let mut carol = person(owner, "Carol");
        let mut bob = person(owner, "Bob");
        carol.partners.insert(alice.id);
        bob.parent_id = Some(alice.id);
        let (alice_id, carol_id, bob_id) = (alice.id, carol.id, bob.id);

        store.write(|inner| {
            let mut alice = alice;
            alice.partners.insert(carol_id);
            inner.people.insert(alice.id, alice);
            inner.people.insert(carol.id, carol);
            inner.people.insert(bob.id, bob);
            inner.rebuild_children(GraphKey::Owner(owner));
        });

        let alice = store.person(alice_id).expect("alice");
        let carol = store.person(carol_id).expect("carol");
        assert!(alice.children.contains(&bob_id), "direct child");
        assert!(carol.children.contains(&bob_id), "partner gains child");
    }

    #[test]
    fn rebuild_children_drops_stale_entries() {
        let owner = UserId(Uuid::new_v4());
        let store = GraphStore::new();

        let alice = person(owner, "Alice");
        let mut bob = person(owner, "Bob");
        bob.parent_id = Some(alice.id);
        let (alice_id, bob_id) = (alice.id, bob.id);

        store.write(|inner| {
            inner.people.insert(alice.id, alice);
            inner.people.insert(bob.id, bob);
            inner.rebuild_children(GraphKey::Owner(owner));
        });
        assert!(store.person(alice_id).expect("alice").children.contains(&bob_id));

        store.write(|inner| {
            if let Some(bob) = inner.people.get_mut(&bob_id) {
                bob.parent_id = None;
            }
            inner.rebuild_children(GraphKey::Owner(owner));
        });
        assert!(store.person(alice_id).expect("alice").children.is_empty());
    }

    #[test]
    fn group_graph_expands_to_linked_personal_nodes() {
        let owner = UserId(Uuid::new_v4());
        let group = GroupId(Uuid::new_v4());
        let store = GraphStore::new();

        let mut root = person(owner, "Root");
        root.group = Some(group);
        let mut child = person(owner, "Child");
        child.parent_id = Some(root.id);
        let stranger = person(owner, "Stranger");
        let (root_id, child_id, stranger_id) = (root.id, child.id, stranger.id);

        store.write(|inner| {
            inner.people.insert(root.id, root);
            inner.people.insert(child.id, child);
            inner.people.insert(stranger.id, stranger);
        });

        let graph = store.group_graph(group);
        let ids: Vec<PersonId> = graph.iter().map(|p| p.id).collect();
        assert!(ids.contains(&root_id));
        assert!(ids.contains(&child_id), "transitively linked child included");
        assert!(!ids.contains(&stranger_id));
    }
}
