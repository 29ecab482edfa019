//! Matching parsed scenarios against the identities stored for a file.
//!
//! Matching order for each parsed scenario, in file order:
//!
//! 1. by identity tag, when it names a scenario of this file
//! 2. by exact name among the scenarios not matched yet (lowest ID wins)
//! 3. otherwise a new identity is assigned
//!
//! Stored scenarios left unmatched are retired: scenarios with status
//! history get a `removed` event, the rest are hard-deleted.

use super::tags::TagInsertion;
use crate::Result;
use crate::models::{
    ActionKind, STATUS_MODIFIED, STATUS_REMOVED, STATUS_RESTORED, Scenario, ScenarioAction,
};
use crate::parser::{ParsedFile, ParsedScenario};
use crate::storage::Storage;
use std::collections::BTreeMap;
use tracing::debug;

/// Reconcile a tracked file's parsed scenarios with its stored identities.
pub fn reconcile(
    storage: &Storage,
    file_id: i64,
    parsed: &ParsedFile,
) -> Result<(Vec<ScenarioAction>, Vec<TagInsertion>)> {
    let mut remaining: BTreeMap<i64, Scenario> = storage
        .scenarios_for_file(file_id)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
    let mut actions = Vec::new();
    let mut insertions = Vec::new();

    for scenario in &parsed.scenarios {
        if let Some(id) = scenario.tagged_id()
            && let Some(stored) = remaining.remove(&id)
        {
            actions.push(update_tagged(storage, &stored, scenario)?);
            continue;
        }

        let by_name = remaining
            .values()
            .find(|stored| stored.name == scenario.name)
            .map(|stored| stored.id);
        if let Some(id) = by_name {
            remaining.remove(&id);
            if storage.latest_status(id)?.as_deref() == Some(STATUS_REMOVED) {
                storage.append_status(id, STATUS_RESTORED)?;
            }
            storage.update_scenario(id, &scenario.name, &scenario.content)?;
            debug!(id, name = %scenario.name, "matched scenario by name");
            insertions.push(TagInsertion::new(scenario.line, id));
            actions.push(ScenarioAction::new(ActionKind::Modified, id, &scenario.name));
            continue;
        }

        let id = storage.insert_scenario(file_id, &scenario.name, &scenario.content)?;
        insertions.push(TagInsertion::new(scenario.line, id));
        actions.push(ScenarioAction::new(ActionKind::New, id, &scenario.name));
    }

    for stored in remaining.into_values() {
        if let Some(action) = retire(storage, &stored)? {
            actions.push(action);
        }
    }

    Ok((actions, insertions))
}

/// Register every scenario of a file seen for the first time. Existing tags
/// in the text are ignored and overwritten by the insertions.
pub fn insert_all(
    storage: &Storage,
    file_id: i64,
    parsed: &ParsedFile,
) -> Result<(Vec<ScenarioAction>, Vec<TagInsertion>)> {
    let mut actions = Vec::with_capacity(parsed.scenarios.len());
    let mut insertions = Vec::with_capacity(parsed.scenarios.len());
    for scenario in &parsed.scenarios {
        let id = storage.insert_scenario(file_id, &scenario.name, &scenario.content)?;
        insertions.push(TagInsertion::new(scenario.line, id));
        actions.push(ScenarioAction::new(ActionKind::New, id, &scenario.name));
    }
    Ok((actions, insertions))
}

/// Retire all scenarios of a file that vanished from disk, then soft-delete
/// the file itself.
pub fn handle_deleted_file(storage: &Storage, file_id: i64) -> Result<Vec<ScenarioAction>> {
    let mut actions = Vec::new();
    for stored in storage.scenarios_for_file(file_id)? {
        if let Some(action) = retire(storage, &stored)? {
            actions.push(action);
        }
    }
    storage.set_file_deleted(file_id, true)?;
    Ok(actions)
}

fn update_tagged(
    storage: &Storage,
    stored: &Scenario,
    scenario: &ParsedScenario,
) -> Result<ScenarioAction> {
    let id = stored.id;
    let restored = storage.latest_status(id)?.as_deref() == Some(STATUS_REMOVED);
    if restored {
        storage.append_status(id, STATUS_RESTORED)?;
    }

    let kind = match stored.content.as_deref() {
        None => {
            storage.update_scenario(id, &scenario.name, &scenario.content)?;
            ActionKind::Unchanged
        }
        Some(content)
            if stored.name != scenario.name || steps_of(content) != steps_of(&scenario.content) =>
        {
            storage.update_scenario(id, &scenario.name, &scenario.content)?;
            if let Some(latest) = storage.latest_status(id)?
                && latest != STATUS_MODIFIED
            {
                storage.append_status(id, STATUS_MODIFIED)?;
            }
            ActionKind::Modified
        }
        Some(_) => ActionKind::Unchanged,
    };

    let kind = match kind {
        ActionKind::Unchanged if restored => ActionKind::Restored,
        other => other,
    };
    Ok(ScenarioAction::new(kind, id, &scenario.name))
}

/// Retire a scenario that is no longer present. Returns `None` when it was
/// already marked removed.
fn retire(storage: &Storage, stored: &Scenario) -> Result<Option<ScenarioAction>> {
    match storage.latest_status(stored.id)?.as_deref() {
        Some(STATUS_REMOVED) => return Ok(None),
        Some(_) => {
            storage.append_status(stored.id, STATUS_REMOVED)?;
        }
        None => {
            storage.delete_scenario(stored.id)?;
        }
    }
    Ok(Some(ScenarioAction::new(
        ActionKind::Removed,
        stored.id,
        &stored.name,
    )))
}

/// Scenario text without its header line.
fn steps_of(content: &str) -> &str {
    content.split_once('\n').map_or("", |(_, steps)| steps)
}
