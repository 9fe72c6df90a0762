use std::collections::BTreeSet;

use anyhow::anyhow;
use tracing::debug;

use crate::error::{LibError, Result};
use crate::models::{
    GraphKey, NewPersonPayload, Person, PersonDraft, PersonId, UpdatePersonPayload, UserId,
};
use crate::store::{now, Inner, GraphStore};

/// Graph mutations with edge propagation.
///
/// Callers must have validated the scope through the permission resolver
/// already; these functions trust the supplied `GraphKey`. Each operation and
/// its propagation run under one store write guard, so the partner-symmetry
/// and children-derivation invariants hold whenever the lock is released.
pub fn create_person(
    store: &GraphStore,
    key: GraphKey,
    actor: UserId,
    payload: NewPersonPayload,
) -> Result<Person> {
    let draft = payload.normalize()?;

    store.write(|inner| {
        validate_references(inner, key, &draft, None)?;

        let (created_by, group) = match key {
            GraphKey::Owner(owner) => (owner, None),
            GraphKey::Group(group) => (actor, Some(group)),
        };

        let person = Person {
            id: PersonId(uuid::Uuid::new_v4()),
            name: draft.name,
            relation: draft.relation,
            gender: draft.gender,
            date_of_birth: draft.date_of_birth,
            notes: draft.notes,
            photo_url: draft.photo_url,
            photo_asset_id: draft.photo_asset_id,
            created_by,
            group,
            parent_id: draft.parent_id,
            partners: draft.partners,
            children: BTreeSet::new(),
            created_at: now(),
            updated_at: now(),
        };
        let id = person.id;
        let partner_count = person.partners.len();
        let partners = person.partners.clone();
        inner.people.insert(id, person);

        // Partner reciprocity, then the derived children rebuild picks up the
        // parent-side and partner-side child links in one pass.
        for partner in &partners {
            if let Some(partner) = inner.people.get_mut(partner) {
                partner.partners.insert(id);
            }
        }
        inner.rebuild_children(key);

        debug!(person = %id, partners = partner_count, "created person");
        Ok(fetch(inner, id))
    })
}

pub fn update_person(
    store: &GraphStore,
    key: GraphKey,
    id: PersonId,
    payload: UpdatePersonPayload,
) -> Result<Person> {
    let draft = payload.normalize()?;

    store.write(|inner| {
        if !inner.person_in_scope(id, key) {
            return Err(LibError::not_found(
                "Family member not found",
                anyhow!("person {id} not in scope {key:?}"),
            ));
        }
        validate_references(inner, key, &draft, Some(id))?;

        let old_partners = inner
            .people
            .get(&id)
            .map(|person| person.partners.clone())
            .unwrap_or_default();
        let added: Vec<PersonId> = draft.partners.difference(&old_partners).copied().collect();
        let removed: Vec<PersonId> = old_partners.difference(&draft.partners).copied().collect();

        if let Some(person) = inner.people.get_mut(&id) {
            person.name = draft.name;
            person.relation = draft.relation;
            person.gender = draft.gender;
            person.date_of_birth = draft.date_of_birth;
            person.notes = draft.notes;
            person.photo_url = draft.photo_url;
            person.photo_asset_id = draft.photo_asset_id;
            person.parent_id = draft.parent_id;
            person.partners = draft.partners;
            person.updated_at = now();
        }

        for partner in &added {
            if let Some(partner) = inner.people.get_mut(partner) {
                partner.partners.insert(id);
            }
        }
        for partner in &removed {
            if let Some(partner) = inner.people.get_mut(partner) {
                partner.partners.remove(&id);
            }
        }
        inner.rebuild_children(key);

        debug!(
            person = %id,
            added = added.len(),
            removed = removed.len(),
            "updated person and reconciled partner links"
        );
        Ok(fetch(inner, id))
    })
}

/// Delete a node, blocked while any node still names it as parent. Returns the
/// removed record so the caller can release the associated image asset.
pub fn delete_person(store: &GraphStore, key: GraphKey, id: PersonId) -> Result<Person> {
    store.write(|inner| {
        if !inner.person_in_scope(id, key) {
            return Err(LibError::not_found(
                "Family member not found",
                anyhow!("person {id} not in scope {key:?}"),
            ));
        }

        let has_dependents = inner
            .people
            .values()
            .any(|person| inner.in_scope(person, key) && person.parent_id == Some(id));
        if has_dependents {
            return Err(LibError::has_dependents(
                "Cannot delete a family member that has children. Please delete the children first.",
                anyhow!("person {id} still has dependent children"),
            ));
        }

        let partners = inner
            .people
            .get(&id)
            .map(|person| person.partners.clone())
            .unwrap_or_default();
        for partner in &partners {
            if let Some(partner) = inner.people.get_mut(partner) {
                partner.partners.remove(&id);
            }
        }

        let removed = inner.people.remove(&id).ok_or_else(|| {
            LibError::not_found("Family member not found", anyhow!("person {id} vanished"))
        })?;
        inner.rebuild_children(key);

        debug!(person = %id, scrubbed_partners = partners.len(), "deleted person");
        Ok(removed)
    })
}

/// Reference validation: `parent_id` and every partner must resolve to an
/// existing node of the same graph. Any failure aborts the whole operation
/// before the first write.
fn validate_references(
    inner: &Inner,
    key: GraphKey,
    draft: &PersonDraft,
    updating: Option<PersonId>,
) -> Result<()> {
    if let Some(parent) = draft.parent_id {
        if updating == Some(parent) {
            return Err(LibError::invalid_with_code(
                "invalid_reference",
                "A person cannot be their own parent",
                anyhow!("self-parenting on {parent}"),
            ));
        }
        if !inner.person_in_scope(parent, key) {
            return Err(LibError::invalid_with_code(
                "invalid_reference",
                "Parent not found in this family graph",
                anyhow!("parent {parent} does not resolve in scope {key:?}"),
            ));
        }
    }
    for partner in &draft.partners {
        if updating == Some(*partner) {
            return Err(LibError::invalid_with_code(
                "invalid_reference",
                "A person cannot be their own partner",
                anyhow!("self-partnering on {partner}"),
            ));
        }
        if !inner.person_in_scope(*partner, key) {
            return Err(LibError::invalid_with_code(
                "invalid_reference",
                "Partner not found in this family graph",
                anyhow!("partner {partner} does not resolve in scope {key:?}"),
            ));
        }
    }
    Ok(())
}

fn fetch(inner: &Inner, id: PersonId) -> Person {
    inner
        .people
        .get(&id)
        .cloned()
        .expect("person should exist under the same write guard")
}
