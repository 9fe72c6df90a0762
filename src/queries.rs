use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Gender, GraphKey, Person, PersonId, UserId};
use crate::store::GraphStore;

/// Deterministic natural-language answer. An entity that does not resolve is a
/// business answer ("No record found…"), never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnswer {
    pub response: String,
}

impl QueryAnswer {
    fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    pub fn not_understood() -> Self {
        Self::new("I'm sorry, I couldn't understand your query.")
    }
}

/// Typed relationship question produced from the classifier's intent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GetParent,
    GetChildren,
    GetSibling,
    GetRelation,
    GetDetails,
    GetDob,
    GetBio,
    CountBrothers,
    CountSisters,
    GetCollaborators,
    GetCollaboratorStatus,
    GetGroupMembers,
}

impl FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_parent" => Ok(Self::GetParent),
            "get_children" => Ok(Self::GetChildren),
            "get_sibling" => Ok(Self::GetSibling),
            "get_relation" => Ok(Self::GetRelation),
            "get_details" => Ok(Self::GetDetails),
            "get_dob" => Ok(Self::GetDob),
            "get_bio" => Ok(Self::GetBio),
            "count_brothers" => Ok(Self::CountBrothers),
            "count_sisters" => Ok(Self::CountSisters),
            "get_collaborators" => Ok(Self::GetCollaborators),
            "get_collaborator_status" => Ok(Self::GetCollaboratorStatus),
            "get_group_members" => Ok(Self::GetGroupMembers),
            _ => Err(()),
        }
    }
}

/// Answer a resolved relationship question against the caller's graph scope.
pub fn resolve(
    store: &GraphStore,
    caller: Option<UserId>,
    key: GraphKey,
    intent: Intent,
    entity: Option<&str>,
    relation: Option<&str>,
) -> QueryAnswer {
    let people = match key {
        GraphKey::Group(group) => store.group_graph(group),
        GraphKey::Owner(_) => store.people_in(key),
    };

    match intent {
        Intent::GetParent => match (entity, relation) {
            (Some(entity), Some(relation)) => get_parent(&people, entity, relation),
            _ => QueryAnswer::not_understood(),
        },
        Intent::GetChildren => match entity {
            Some(entity) => get_children(&people, entity),
            None => QueryAnswer::not_understood(),
        },
        Intent::GetSibling => match (entity, relation) {
            (Some(entity), Some(relation)) => get_sibling(&people, entity, relation),
            _ => QueryAnswer::not_understood(),
        },
        Intent::GetRelation => match (entity, relation) {
            (Some(entity), Some(relation)) => get_aunt_uncle(&people, entity, relation),
            _ => QueryAnswer::not_understood(),
        },
        Intent::GetDetails => match entity {
            Some(entity) => get_details(&people, entity),
            None => QueryAnswer::not_understood(),
        },
        Intent::GetDob => match entity {
            Some(entity) => get_dob(&people, entity),
            None => QueryAnswer::not_understood(),
        },
        Intent::GetBio => match entity {
            Some(entity) => get_bio(&people, entity),
            None => QueryAnswer::not_understood(),
        },
        Intent::CountBrothers => match entity {
            Some(entity) => count_siblings(&people, entity, Gender::Male, "brother"),
            None => QueryAnswer::not_understood(),
        },
        Intent::CountSisters => match entity {
            Some(entity) => count_siblings(&people, entity, Gender::Female, "sister"),
            None => QueryAnswer::not_understood(),
        },
        Intent::GetCollaborators => match caller {
            Some(caller) => get_collaborators(store, caller),
            None => QueryAnswer::not_understood(),
        },
        Intent::GetCollaboratorStatus => match (caller, entity) {
            (Some(caller), Some(entity)) => get_collaborator_status(store, caller, entity),
            _ => QueryAnswer::not_understood(),
        },
        Intent::GetGroupMembers => {
            QueryAnswer::new("This feature is not yet implemented. Please try a different query.")
        }
    }
}

// ── Name resolution ──────────────────────────────────────────────────────

fn find_exact<'a>(people: &'a [Person], name: &str) -> Option<&'a Person> {
    let name = name.trim();
    people.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

fn find_loose<'a>(people: &'a [Person], name: &str) -> Option<&'a Person> {
    find_exact(people, name).or_else(|| {
        let needle = name.trim().to_lowercase();
        people
            .iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
    })
}

fn by_id(people: &[Person], id: PersonId) -> Option<&Person> {
    people.iter().find(|p| p.id == id)
}

fn join_names(people: &[&Person]) -> String {
    people
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── get_parent ───────────────────────────────────────────────────────────

fn expected_parent_gender(relation: &str) -> Option<Gender> {
    match relation {
        "father" | "grandfather" => Some(Gender::Male),
        "mother" | "grandmother" => Some(Gender::Female),
        _ => None,
    }
}

/// One parent-finding heuristic: graph + subject + expected gender to a
/// candidate. The cascade tries these in strict priority order and the first
/// hit wins; there is no scoring across candidates.
type ParentHeuristic = fn(&[Person], &Person, &str, Gender) -> Option<PersonId>;

fn primary_parent(people: &[Person], member: &Person, _: &str, expected: Gender) -> Option<PersonId> {
    let parent = member.parent_id.and_then(|id| by_id(people, id))?;
    (parent.gender == expected).then_some(parent.id)
}

fn partner_of_parent(
    people: &[Person],
    member: &Person,
    _: &str,
    expected: Gender,
) -> Option<PersonId> {
    let parent = member.parent_id.and_then(|id| by_id(people, id))?;
    parent
        .partners
        .iter()
        .filter_map(|id| by_id(people, *id))
        .find(|partner| partner.gender == expected)
        .map(|partner| partner.id)
}

fn reverse_children_lookup(
    people: &[Person],
    member: &Person,
    _: &str,
    expected: Gender,
) -> Option<PersonId> {
    people
        .iter()
        .find(|p| p.children.contains(&member.id) && p.gender == expected)
        .map(|p| p.id)
}

fn notes_match(people: &[Person], member: &Person, relation: &str, _: Gender) -> Option<PersonId> {
    let relation = relation.to_lowercase();
    let name = member.name.to_lowercase();
    people
        .iter()
        .find(|p| {
            p.relation.to_lowercase().contains(&relation) && p.notes.to_lowercase().contains(&name)
        })
        .map(|p| p.id)
}

const DIRECT_PARENT_CASCADE: &[ParentHeuristic] = &[
    primary_parent,
    partner_of_parent,
    reverse_children_lookup,
    notes_match,
];

fn get_parent(people: &[Person], entity: &str, relation: &str) -> QueryAnswer {
    let relation = relation.trim().to_lowercase();
    let Some(expected) = expected_parent_gender(&relation) else {
        return QueryAnswer::not_understood();
    };
    let Some(member) = find_exact(people, entity) else {
        return QueryAnswer::new(format!("No record found for {}.", entity.trim()));
    };

    let target = if relation.starts_with("grand") {
        find_grandparent(people, member, &relation, expected)
    } else {
        DIRECT_PARENT_CASCADE
            .iter()
            .find_map(|heuristic| heuristic(people, member, &relation, expected))
    };

    match target.and_then(|id| by_id(people, id)) {
        Some(target) => QueryAnswer::new(format!(
            "{}'s {} is {}.",
            member.name, relation, target.name
        )),
        None => QueryAnswer::new(format!("No {} listed for {}.", relation, member.name)),
    }
}

/// Grandparent search: ascend through `parent_id` twice, then through a
/// gender-matching partner of the parent, then a reverse children lookup on
/// the parent, then a notes match; finally validate the candidate's gender or
/// try one of its partners once.
fn find_grandparent(
    people: &[Person],
    member: &Person,
    relation: &str,
    expected: Gender,
) -> Option<PersonId> {
    let parent = member.parent_id.and_then(|id| by_id(people, id));

    let mut candidate = parent
        .and_then(|p| p.parent_id)
        .and_then(|id| by_id(people, id));

    if candidate.is_none() {
        if let Some(parent) = parent {
            candidate = parent
                .partners
                .iter()
                .filter_map(|id| by_id(people, *id))
                .find(|partner| partner.gender == expected)
                .and_then(|partner| partner.parent_id)
                .and_then(|id| by_id(people, id));
        }
    }

    if candidate.is_none() {
        if let Some(parent) = parent {
            candidate = people
                .iter()
                .find(|p| p.children.contains(&parent.id) && p.gender == expected);
        }
    }

    if candidate.is_none() {
        candidate = notes_match(people, member, relation, expected).and_then(|id| by_id(people, id));
    }

    let candidate = candidate?;
    if candidate.gender == expected {
        return Some(candidate.id);
    }
    candidate
        .partners
        .iter()
        .filter_map(|id| by_id(people, *id))
        .find(|partner| partner.gender == expected)
        .map(|partner| partner.id)
}

// ── get_children ─────────────────────────────────────────────────────────

fn are_siblings(a: &Person, b: &Person) -> bool {
    matches!((a.parent_id, b.parent_id), (Some(x), Some(y)) if x == y)
}

/// Word-anchored phrase search, so "stepchild of Alice" and
/// "child of Alicea" do not count as mentions of Alice.
fn notes_mention(notes: &str, phrase: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = notes[from..].find(phrase) {
        let begin = from + pos;
        let end = begin + phrase.len();
        let open = !matches!(notes[..begin].chars().next_back(), Some(c) if c.is_alphanumeric());
        let close = !matches!(notes[end..].chars().next(), Some(c) if c.is_alphanumeric());
        if open && close {
            return true;
        }
        from = end;
    }
    false
}

fn get_children(people: &[Person], entity: &str) -> QueryAnswer {
    let Some(member) = find_exact(people, entity) else {
        return QueryAnswer::new(format!("No record found for {}.", entity.trim()));
    };

    let mut partner_ids: Vec<PersonId> = Vec::new();
    for partner in member.partners.iter().filter_map(|id| by_id(people, *id)) {
        if !are_siblings(member, partner) {
            partner_ids.push(partner.id);
        }
    }
    for partner in people.iter().filter(|p| p.partners.contains(&member.id)) {
        if !are_siblings(member, partner) && !partner_ids.contains(&partner.id) {
            partner_ids.push(partner.id);
        }
    }

    let name = member.name.to_lowercase();
    let phrases = [
        format!("child of {name}"),
        format!("mother is {name}"),
        format!("father is {name}"),
    ];

    let mut children: Vec<&Person> = Vec::new();
    for person in people {
        let direct = person.parent_id == Some(member.id);
        let via_partner = person
            .parent_id
            .is_some_and(|parent| partner_ids.contains(&parent));
        let inferred = {
            let notes = person.notes.to_lowercase();
            phrases.iter().any(|phrase| notes_mention(&notes, phrase))
        };
        if (direct || via_partner || inferred) && !children.iter().any(|c| c.id == person.id) {
            children.push(person);
        }
    }

    if children.is_empty() {
        QueryAnswer::new(format!("{} has no children listed.", member.name))
    } else {
        QueryAnswer::new(format!(
            "{}'s children: {}",
            member.name,
            join_names(&children)
        ))
    }
}

// ── get_sibling / counts ─────────────────────────────────────────────────

/// Case-insensitive prefix match on free text, slicing only at char
/// boundaries.
fn strip_word_prefix<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    if text.len() >= word.len()
        && text.is_char_boundary(word.len())
        && text[..word.len()].eq_ignore_ascii_case(word)
    {
        Some(&text[word.len()..])
    } else {
        None
    }
}

/// Strip a leading "sister of" / "brother of" the classifier sometimes leaves
/// on the entity.
fn strip_sibling_prefix(entity: &str) -> String {
    let mut rest = entity.trim();
    for prefix in ["sister", "brother"] {
        if let Some(tail) = strip_word_prefix(rest, prefix) {
            rest = tail.trim_start();
            break;
        }
    }
    if let Some(tail) = strip_word_prefix(rest, "of") {
        rest = tail.trim_start();
    }
    rest.to_string()
}

enum SiblingLookup<'a> {
    Found(&'a Person, Vec<&'a Person>),
    NoRecord(String),
    NoParent(&'a Person),
    MissingParentRecord(&'a Person),
}

fn collect_siblings<'a>(people: &'a [Person], entity: &str) -> SiblingLookup<'a> {
    let entity_name = strip_sibling_prefix(entity);
    let Some(member) = find_loose(people, &entity_name) else {
        return SiblingLookup::NoRecord(entity_name);
    };
    let Some(parent_id) = member.parent_id else {
        return SiblingLookup::NoParent(member);
    };
    let Some(parent) = by_id(people, parent_id) else {
        return SiblingLookup::MissingParentRecord(member);
    };

    let mut parent_ids: Vec<PersonId> = vec![parent.id];
    parent_ids.extend(parent.partners.iter().copied());

    let siblings: Vec<&Person> = people
        .iter()
        .filter(|p| {
            p.id != member.id
                && p.parent_id
                    .is_some_and(|parent| parent_ids.contains(&parent))
        })
        .collect();
    SiblingLookup::Found(member, siblings)
}

fn sibling_gender(relation: &str) -> Option<Gender> {
    match relation {
        "brother" => Some(Gender::Male),
        "sister" => Some(Gender::Female),
        _ => None,
    }
}

fn get_sibling(people: &[Person], entity: &str, relation: &str) -> QueryAnswer {
    let relation = relation.trim().to_lowercase();
    match collect_siblings(people, entity) {
        SiblingLookup::NoRecord(name) => {
            QueryAnswer::new(format!("No record found for {name}."))
        }
        SiblingLookup::NoParent(member) => QueryAnswer::new(format!(
            "{} has no parent listed, so no siblings can be found. Try adding a parent friend.",
            member.name
        )),
        SiblingLookup::MissingParentRecord(member) => {
            QueryAnswer::new(format!("{}'s parent record is missing.", member.name))
        }
        SiblingLookup::Found(member, siblings) => {
            let filtered: Vec<&Person> = match sibling_gender(&relation) {
                Some(gender) => siblings.into_iter().filter(|s| s.gender == gender).collect(),
                None => siblings,
            };
            if filtered.is_empty() {
                QueryAnswer::new(format!("{} has no {} listed.", member.name, relation))
            } else {
                QueryAnswer::new(format!(
                    "{}'s {}(s): {}",
                    member.name,
                    relation,
                    join_names(&filtered)
                ))
            }
        }
    }
}

fn count_siblings(people: &[Person], entity: &str, gender: Gender, label: &str) -> QueryAnswer {
    match collect_siblings(people, entity) {
        SiblingLookup::NoRecord(name) => QueryAnswer::new(format!("No record found for {name}.")),
        SiblingLookup::NoParent(member) | SiblingLookup::MissingParentRecord(member) => {
            QueryAnswer::new(format!("{} has 0 {label}(s).", member.name))
        }
        SiblingLookup::Found(member, siblings) => {
            let count = siblings.iter().filter(|s| s.gender == gender).count();
            QueryAnswer::new(format!("{} has {count} {label}(s).", member.name))
        }
    }
}

// ── get_relation (aunt/uncle) ────────────────────────────────────────────

fn get_aunt_uncle(people: &[Person], entity: &str, relation: &str) -> QueryAnswer {
    let relation = relation.trim().to_lowercase();
    let expected = match relation.as_str() {
        "uncle" => Gender::Male,
        "aunt" => Gender::Female,
        _ => return QueryAnswer::not_understood(),
    };

    let member = find_exact(people, entity);
    let Some(member) = member else {
        return QueryAnswer::new(format!("{} has no parent listed.", entity.trim()));
    };
    let Some(parent_id) = member.parent_id else {
        return QueryAnswer::new(format!("{} has no parent listed.", entity.trim()));
    };
    let Some(parent) = by_id(people, parent_id) else {
        return QueryAnswer::new(format!("{}'s parent record is missing.", member.name));
    };

    // Second-order sibling search: siblings of the parent and of every
    // partner-linked co-parent.
    let mut co_parents: Vec<&Person> = vec![parent];
    for candidate in people.iter().filter(|p| p.partners.contains(&parent.id)) {
        if !co_parents.iter().any(|p| p.id == candidate.id) {
            co_parents.push(candidate);
        }
    }

    let mut relatives: Vec<&Person> = Vec::new();
    for co_parent in &co_parents {
        let Some(grandparent) = co_parent.parent_id else {
            continue;
        };
        for sibling in people
            .iter()
            .filter(|p| p.id != co_parent.id && p.parent_id == Some(grandparent))
        {
            if !relatives.iter().any(|r| r.id == sibling.id) {
                relatives.push(sibling);
            }
        }
    }

    let filtered: Vec<&Person> = relatives
        .into_iter()
        .filter(|r| r.gender == expected)
        .collect();
    if filtered.is_empty() {
        QueryAnswer::new(format!("{} has no {} listed.", member.name, relation))
    } else {
        QueryAnswer::new(format!(
            "{}'s {}(s): {}",
            member.name,
            relation,
            join_names(&filtered)
        ))
    }
}

// ── field lookups ────────────────────────────────────────────────────────

fn format_dob(person: &Person) -> String {
    person
        .date_of_birth
        .map(|dob| dob.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "an unknown date".to_string())
}

fn get_details(people: &[Person], entity: &str) -> QueryAnswer {
    let Some(member) = find_exact(people, entity) else {
        return QueryAnswer::new(format!("No record found for {}.", entity.trim()));
    };

    let mut parents: Vec<String> = Vec::new();
    if let Some(primary) = member.parent_id.and_then(|id| by_id(people, id)) {
        parents.push(primary.name.clone());
        if let Some(partner) = primary.partners.iter().find_map(|id| by_id(people, *id)) {
            parents.push(partner.name.clone());
        }
    }

    let mut sibling_names: Vec<String> = Vec::new();
    if let Some(parent_id) = member.parent_id {
        for sibling in people
            .iter()
            .filter(|p| p.id != member.id && p.parent_id == Some(parent_id))
        {
            if !sibling_names.contains(&sibling.name) {
                sibling_names.push(sibling.name.clone());
            }
        }
    }

    let (pronoun, possessive, object) = match member.gender {
        Gender::Female => ("She", "Her", "her"),
        _ => ("He", "His", "him"),
    };
    let description = if member.notes.is_empty() {
        "No description available"
    } else {
        member.notes.as_str()
    };
    let parent_text = if parents.is_empty() {
        "to unknown parents".to_string()
    } else {
        format!("to {}", parents.join(" and "))
    };
    let sibling_text = if sibling_names.is_empty() {
        format!("{pronoun} has no siblings listed. ")
    } else if sibling_names.len() == 1 {
        format!(
            "{pronoun} has a sibling named {}. ",
            sibling_names.join(", ")
        )
    } else {
        format!(
            "{pronoun} has {} siblings named {}. ",
            sibling_names.len(),
            sibling_names.join(", ")
        )
    };

    QueryAnswer::new(format!(
        "{} was born on {} {}. {}{} notes describe {} as \"{}\".",
        member.name,
        format_dob(member),
        parent_text,
        sibling_text,
        possessive,
        object,
        description
    ))
}

fn get_dob(people: &[Person], entity: &str) -> QueryAnswer {
    match find_exact(people, entity) {
        Some(member) if member.date_of_birth.is_some() => {
            QueryAnswer::new(format!("{} was born on {}.", member.name, format_dob(member)))
        }
        _ => QueryAnswer::new(format!("Birthdate not listed for {}.", entity.trim())),
    }
}

fn get_bio(people: &[Person], entity: &str) -> QueryAnswer {
    match find_exact(people, entity) {
        Some(member) if !member.notes.is_empty() => {
            QueryAnswer::new(format!("{}'s bio: {}", member.name, member.notes))
        }
        _ => QueryAnswer::new(format!("No bio available for {}.", entity.trim())),
    }
}

// ── collaboration lookups ────────────────────────────────────────────────

fn get_collaborators(store: &GraphStore, caller: UserId) -> QueryAnswer {
    let mut collaborations = store.read(|inner| {
        inner
            .collaborations
            .values()
            .filter(|c| c.owner == caller)
            .cloned()
            .collect::<Vec<_>>()
    });
    if collaborations.is_empty() {
        return QueryAnswer::new("You have no collaborators on your map yet.");
    }
    collaborations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let formatted: Vec<String> = collaborations
        .iter()
        .map(|c| {
            let (name, email) = store
                .user(c.collaborator)
                .map(|user| {
                    let name = if user.full_name.is_empty() {
                        user.email.clone()
                    } else {
                        user.full_name.clone()
                    };
                    (name, user.email)
                })
                .unwrap_or_else(|| (c.collaborator.to_string(), "unknown".to_string()));
            format!(
                "{name}->{email} ({}, {})",
                c.role.as_str(),
                c.status.as_str()
            )
        })
        .collect();
    QueryAnswer::new(format!("Your collaborators: {}", formatted.join(", ")))
}

fn get_collaborator_status(store: &GraphStore, caller: UserId, entity: &str) -> QueryAnswer {
    let name = entity.trim();
    let Some(user) = store.user_by_full_name(name) else {
        return QueryAnswer::new(format!("I couldn't find a user named {name}."));
    };
    let status = store.read(|inner| {
        inner
            .collaboration_for_pair(caller, user.id)
            .map(|c| c.status)
    });
    match status {
        Some(status) => QueryAnswer::new(format!(
            "{name}'s collaboration status is: {}.",
            status.as_str()
        )),
        None => QueryAnswer::new(format!("{name} is not a collaborator on your map.")),
    }
}
