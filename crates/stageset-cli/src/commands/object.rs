use crate::cli::{ObjectCommands, StageArg};
use crate::support::{CommandError, Context, parse_fields};
use serde_json::{Value, json};
use stageset_kernel::{Capability, ChangeType, ObjectKey, ObjectRecord, Stage};
use stageset_store::{MemoryStore, MemoryStoreError, StoredObject, Version};

pub fn run(ctx: &Context, command: ObjectCommands) -> Result<(), CommandError> {
    match command {
        ObjectCommands::Create {
            object_type,
            fields,
        } => run_create(ctx, object_type, fields),

        ObjectCommands::Edit {
            object_type,
            id,
            fields,
        } => run_edit(ctx, object_type, id, fields),

        ObjectCommands::Delete {
            object_type,
            id,
            stage,
        } => run_delete(ctx, object_type, id, stage),

        ObjectCommands::Publish { object_type, id } => run_publish(ctx, object_type, id),

        ObjectCommands::Show { object_type, id } => run_show(ctx, object_type, id),

        ObjectCommands::List {
            object_type,
            pending,
        } => run_list(ctx, object_type, pending),
    }
}

fn run_create(ctx: &Context, class_name: String, fields: Vec<String>) -> Result<(), CommandError> {
    let fields = parse_fields(&fields)?;
    let base = ctx.engine.schema().base_type(&class_name)?.to_string();
    let proposed = ObjectRecord {
        key: ObjectKey::new(&base, 0),
        class_name: class_name.clone(),
        revision: 0,
        fields: fields.clone(),
    };
    require(ctx, &proposed, Capability::Create)?;

    let key = ctx.mutate(|store, _| {
        let key = store.create(&base, &class_name, fields)?;
        Ok((key, true))
    })?;
    tracing::info!(target: "stageset.cli", object = %key, class = %class_name, "object created");

    ctx.emit(
        json!({
            "action": "object.create",
            "objectsPath": ctx.objects.display().to_string(),
            "object": {
                "key": key.to_string(),
                "objectType": key.object_type,
                "id": key.id,
                "className": class_name,
                "draftRevision": 1
            }
        }),
        || {
            format!(
                "stageset object create\n  Created: {key} [{class_name}]\n  Path: {}",
                ctx.objects.display()
            )
        },
    );
    Ok(())
}

fn run_edit(
    ctx: &Context,
    object_type: String,
    id: u64,
    fields: Vec<String>,
) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let fields = parse_fields(&fields)?;
    let revision = ctx.mutate(|store, _| {
        require(ctx, &current_record(store, &key)?, Capability::Edit)?;
        let revision = store.update_draft(&key, fields)?;
        Ok((revision, true))
    })?;

    ctx.emit(
        json!({
            "action": "object.edit",
            "objectsPath": ctx.objects.display().to_string(),
            "object": key.to_string(),
            "draftRevision": revision
        }),
        || format!("stageset object edit\n  Edited: {key}\n  Draft revision: {revision}"),
    );
    Ok(())
}

fn run_delete(
    ctx: &Context,
    object_type: String,
    id: u64,
    stage: StageArg,
) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let stage = match stage {
        StageArg::Draft => Stage::Draft,
        StageArg::Live => Stage::Live,
    };
    ctx.mutate(|store, _| {
        require(ctx, &current_record(store, &key)?, Capability::Delete)?;
        match stage {
            Stage::Draft => store.delete_from_draft(&key)?,
            Stage::Live => store.delete_from_live(&key)?,
        }
        Ok(((), true))
    })?;
    tracing::info!(target: "stageset.cli", object = %key, %stage, "object stage deleted");

    ctx.emit(
        json!({
            "action": "object.delete",
            "objectsPath": ctx.objects.display().to_string(),
            "object": key.to_string(),
            "stage": stage.as_str()
        }),
        || format!("stageset object delete\n  Deleted: {key} from {stage}"),
    );
    Ok(())
}

fn run_publish(ctx: &Context, object_type: String, id: u64) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let revision = ctx.mutate(|store, _| {
        require(ctx, &current_record(store, &key)?, Capability::Publish)?;
        let revision = store.publish_single(&key)?;
        Ok((revision, true))
    })?;
    tracing::info!(target: "stageset.cli", object = %key, revision, "object published");

    ctx.emit(
        json!({
            "action": "object.publish",
            "objectsPath": ctx.objects.display().to_string(),
            "object": key.to_string(),
            "liveRevision": revision
        }),
        || format!("stageset object publish\n  Published: {key}\n  Live revision: {revision}"),
    );
    Ok(())
}

fn run_show(ctx: &Context, object_type: String, id: u64) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let (store, _) = ctx.load()?;
    require(ctx, &current_record(&store, &key)?, Capability::View)?;
    let object = stored(&store, &key)?;
    let change = change_type(object);

    ctx.emit(
        json!({
            "action": "object.show",
            "object": object_json(object),
            "draft": object.draft.as_ref().map(version_json),
            "live": object.live.as_ref().map(version_json)
        }),
        || {
            let mut lines = vec![
                "stageset object show".to_string(),
                format!("  Object: {key} [{}]", object.class_name),
                format!("  Change: {change}"),
            ];
            for (label, version) in [("Draft", &object.draft), ("Live", &object.live)] {
                match version {
                    Some(version) => {
                        lines.push(format!("  {label}: r{}", version.revision));
                        for (field, value) in &version.fields {
                            lines.push(format!("    {field} = {value}"));
                        }
                    }
                    None => lines.push(format!("  {label}: (none)")),
                }
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn run_list(ctx: &Context, object_type: Option<String>, pending: bool) -> Result<(), CommandError> {
    let base = match &object_type {
        Some(object_type) => Some(ctx.engine.schema().base_type(object_type)?.to_string()),
        None => None,
    };
    let (store, _) = ctx.load()?;

    let mut rows = Vec::new();
    for object in store.objects() {
        if base.as_ref().is_some_and(|base| object.object_type != *base) {
            continue;
        }
        if pending && !change_type(object).is_pending() {
            continue;
        }
        let Some(record) = object
            .record(Stage::Draft)
            .or_else(|| object.record(Stage::Live))
        else {
            continue;
        };
        if ctx
            .engine
            .object_allowed(&record, Capability::View, &ctx.actor)?
        {
            rows.push(object);
        }
    }

    ctx.emit(
        json!({
            "action": "object.list",
            "objectsPath": ctx.objects.display().to_string(),
            "count": rows.len(),
            "items": rows.iter().map(|object| object_json(object)).collect::<Vec<_>>()
        }),
        || {
            let mut lines = vec![
                "stageset object list".to_string(),
                format!("  Path: {}", ctx.objects.display()),
                format!("  Count: {}", rows.len()),
            ];
            for object in &rows {
                lines.push(format!(
                    "  - {} [{}] {}",
                    object.key(),
                    object.class_name,
                    change_type(object)
                ));
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn require(ctx: &Context, record: &ObjectRecord, capability: Capability) -> Result<(), CommandError> {
    if ctx.engine.object_allowed(record, capability, &ctx.actor)? {
        Ok(())
    } else {
        Err(CommandError::ObjectDenied {
            actor: ctx.actor.id.clone(),
            action: capability.as_str(),
            object: record.key.to_string(),
        })
    }
}

fn stored<'a>(store: &'a MemoryStore, key: &ObjectKey) -> Result<&'a StoredObject, CommandError> {
    store
        .object(key)
        .ok_or_else(|| MemoryStoreError::ObjectNotFound(key.clone()).into())
}

/// Draft if present, else live: what policies see for an object.
fn current_record(store: &MemoryStore, key: &ObjectKey) -> Result<ObjectRecord, CommandError> {
    let object = stored(store, key)?;
    object
        .record(Stage::Draft)
        .or_else(|| object.record(Stage::Live))
        .ok_or_else(|| MemoryStoreError::ObjectNotFound(key.clone()).into())
}

fn change_type(object: &StoredObject) -> ChangeType {
    let revision = |version: &Option<Version>| version.as_ref().map_or(0, |v| v.revision);
    ChangeType::from_revisions(revision(&object.draft), revision(&object.live))
}

fn object_json(object: &StoredObject) -> Value {
    json!({
        "key": object.key().to_string(),
        "objectType": object.object_type,
        "id": object.id,
        "className": object.class_name,
        "changeType": change_type(object).as_str(),
        "draftRevision": object.draft.as_ref().map_or(0, |v| v.revision),
        "liveRevision": object.live.as_ref().map_or(0, |v| v.revision)
    })
}

fn version_json(version: &Version) -> Value {
    json!({
        "revision": version.revision,
        "fields": version.fields
    })
}
