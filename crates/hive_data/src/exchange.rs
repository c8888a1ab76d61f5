//! Import and export between [`EntityStore`] and [`DataEntity`] records.

use std::collections::{HashMap, HashSet};

use hive_component::Entity;
use hive_ecs::EntityStore;
use serde_json::error::Category;
use serde_json::value::RawValue;
use tracing::warn;

use crate::data_entity::DataEntity;
use crate::error::DataError;

/// Parses a JSON array of records.
///
/// Errors carry the byte offset of the problem: for malformed JSON the
/// position the parser stopped at, for a bad record the start of that
/// record's text. An empty input yields an empty batch.
pub fn parse_data_entities(input: &str) -> Result<Vec<DataEntity>, DataError> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<Vec<&RawValue>>();
    let items = match stream.next() {
        Some(Ok(items)) => items,
        Some(Err(source)) if source.classify() == Category::Data => {
            return Err(DataError::NotAnArray);
        }
        Some(Err(source)) => {
            return Err(DataError::Parse {
                offset: stream.byte_offset(),
                source,
            });
        }
        None => return Ok(Vec::new()),
    };
    items
        .into_iter()
        .map(|raw| {
            // The raw slice borrows from `input`, so its start is the
            // record's byte offset in the document.
            serde_json::from_str(raw.get()).map_err(|source| DataError::Parse {
                offset: raw.get().as_ptr() as usize - input.as_ptr() as usize,
                source,
            })
        })
        .collect()
}

/// Creates one entity per record, wires up tags, components, and child
/// links, and attaches the document's roots under `parent` when given.
///
/// Imported entities get fresh store-assigned IDs and persistent IDs; the
/// record `id`s only resolve references within the batch. Per-record
/// problems are collected as `"pid N: ..."` strings and do not stop the
/// rest of the batch. Returns the number of entities created and the
/// collected problems.
pub fn add_data_entities_to(
    store: &mut EntityStore,
    parent: Option<Entity>,
    records: &[DataEntity],
) -> (usize, Vec<String>) {
    let mut errors = Vec::new();
    let mut by_pid: HashMap<i64, Entity> = HashMap::new();
    let mut created = Vec::with_capacity(records.len());
    for record in records {
        let entity = store.create_entity();
        created.push(entity);
        if record.pid != 0 && by_pid.insert(record.pid, entity).is_some() {
            errors.push(format!("pid {}: duplicate id in input", record.pid));
        }
    }

    for (record, &entity) in records.iter().zip(&created) {
        for tag in &record.tags {
            if let Err(err) = store.add_tag_by_name(entity, tag) {
                errors.push(format!("pid {}: {err}", record.pid));
            }
        }
        for (name, value) in &record.components {
            if let Err(err) = store.add_component_json(entity, name, value) {
                errors.push(format!("pid {}: {err}", record.pid));
            }
        }
    }

    let mut attached: HashSet<Entity> = HashSet::new();
    for (record, &entity) in records.iter().zip(&created) {
        for &child_pid in &record.children {
            match by_pid.get(&child_pid) {
                Some(&child) => match store.add_child(entity, child) {
                    Ok(()) => {
                        attached.insert(child);
                    }
                    Err(err) => errors.push(format!("pid {}: {err}", record.pid)),
                },
                None => errors.push(format!(
                    "pid {}: child pid {child_pid} not present in input",
                    record.pid
                )),
            }
        }
    }

    // Records nobody claimed as a child are the document's roots.
    if let Some(parent) = parent {
        for (record, &entity) in records.iter().zip(&created) {
            if attached.contains(&entity) {
                continue;
            }
            if let Err(err) = store.add_child(parent, entity) {
                errors.push(format!("pid {}: {err}", record.pid));
            }
        }
    }

    (created.len(), errors)
}

/// Parses `input` and imports it in one step.
pub fn add_json_to(
    store: &mut EntityStore,
    parent: Option<Entity>,
    input: &str,
) -> Result<(usize, Vec<String>), DataError> {
    let records = parse_data_entities(input)?;
    Ok(add_data_entities_to(store, parent, &records))
}

/// Exports the given entities and their descendants, pre-order, each
/// entity at most once no matter how often it is reached.
pub fn export_data_entities(store: &EntityStore, roots: &[Entity]) -> Vec<DataEntity> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &root in roots {
        export_subtree(store, root, &mut seen, &mut out);
    }
    out
}

/// Pretty-printed JSON document for the given entities and descendants.
pub fn export_json(store: &EntityStore, roots: &[Entity]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&export_data_entities(store, roots))
}

fn export_subtree(
    store: &EntityStore,
    entity: Entity,
    seen: &mut HashSet<Entity>,
    out: &mut Vec<DataEntity>,
) {
    if !seen.insert(entity) {
        return;
    }
    let Some(signature) = store.signature_of(entity) else {
        return;
    };

    let mut record = DataEntity {
        pid: store.pid_of(entity).unwrap_or(0),
        ..DataEntity::default()
    };
    record.tags = store
        .tag_names_of(entity)
        .iter()
        .map(|name| (*name).to_string())
        .collect();
    for &index in signature.components() {
        let name = store.registry().schema(index).name;
        match store.component_json(entity, index) {
            Ok(value) => {
                record.components.insert(name.to_string(), value);
            }
            Err(err) => warn!(entity = entity.0, component = name, %err, "component skipped on export"),
        }
    }
    record.children = store
        .children_of(entity)
        .iter()
        .filter_map(|&child| store.pid_of(child))
        .collect();
    out.push(record);

    let children: Vec<Entity> = store.children_of(entity).to_vec();
    for child in children {
        export_subtree(store, child, seen, out);
    }
}
