use crate::cli::ChangesetCommands;
use crate::support::{CommandError, Context};
use serde_json::{Value, json};
use stageset_kernel::{ChangeSet, ChangeSetError, ItemStatus, ObjectKey};
use stageset_store::{ChangeSetLedger, LedgerError};

pub fn run(ctx: &Context, command: ChangesetCommands) -> Result<(), CommandError> {
    match command {
        ChangesetCommands::Create { title } => run_create(ctx, title),

        ChangesetCommands::Add {
            changeset,
            object_type,
            id,
        } => run_add(ctx, changeset, object_type, id),

        ChangesetCommands::Remove {
            changeset,
            object_type,
            id,
        } => run_remove(ctx, changeset, object_type, id),

        ChangesetCommands::Sync { changeset } => run_sync(ctx, changeset),

        ChangesetCommands::Status { changeset } => run_status(ctx, changeset),

        ChangesetCommands::Can { changeset } => run_can(ctx, changeset),

        ChangesetCommands::Plan { changeset } => run_plan(ctx, changeset),

        ChangesetCommands::Publish { changeset } => run_publish(ctx, changeset),

        ChangesetCommands::List { state } => run_list(ctx, state),
    }
}

fn run_create(ctx: &Context, title: String) -> Result<(), CommandError> {
    let cs = ctx.engine.create(title, &ctx.actor)?;
    ctx.mutate(|_, ledger| {
        ledger.insert(cs.clone());
        Ok(((), true))
    })?;

    ctx.emit(
        json!({
            "action": "changeset.create",
            "changesetsPath": ctx.changesets.display().to_string(),
            "changeset": summary_json(&cs)
        }),
        || {
            format!(
                "stageset changeset create\n  Created: {} [{}] {}\n  Path: {}",
                cs.id,
                cs.state,
                cs.title,
                ctx.changesets.display()
            )
        },
    );
    Ok(())
}

fn run_add(
    ctx: &Context,
    reference: String,
    object_type: String,
    id: u64,
) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let (added, cs) = ctx.mutate(|store, ledger| {
        let cs = changeset_mut(ledger, &reference)?;
        let added = ctx.engine.add_object(&*store, cs, &key, &ctx.actor)?;
        Ok(((added, cs.clone()), true))
    })?;

    ctx.emit(
        json!({
            "action": "changeset.add",
            "changesetId": cs.id.to_string(),
            "object": key.to_string(),
            "added": added,
            "itemCount": cs.len()
        }),
        || {
            let verb = if added { "Added" } else { "Already explicit" };
            format!(
                "stageset changeset add\n  {verb}: {key}\n  Changeset: {}\n  Items: {}",
                cs.id,
                cs.len()
            )
        },
    );
    Ok(())
}

fn run_remove(
    ctx: &Context,
    reference: String,
    object_type: String,
    id: u64,
) -> Result<(), CommandError> {
    let key = ctx.object_key(&object_type, id)?;
    let (removed, cs) = ctx.mutate(|store, ledger| {
        let cs = changeset_mut(ledger, &reference)?;
        let removed = ctx.engine.remove_object(&*store, cs, &key, &ctx.actor)?;
        Ok(((removed, cs.clone()), removed))
    })?;

    ctx.emit(
        json!({
            "action": "changeset.remove",
            "changesetId": cs.id.to_string(),
            "object": key.to_string(),
            "removed": removed,
            "itemCount": cs.len()
        }),
        || {
            let verb = if removed { "Removed" } else { "Not present" };
            format!(
                "stageset changeset remove\n  {verb}: {key}\n  Changeset: {}\n  Items: {}",
                cs.id,
                cs.len()
            )
        },
    );
    Ok(())
}

fn run_sync(ctx: &Context, reference: String) -> Result<(), CommandError> {
    let (report, cs) = ctx.mutate(|store, ledger| {
        let cs = changeset_mut(ledger, &reference)?;
        let report = ctx.engine.sync(&*store, cs, &ctx.actor)?;
        let changed = !report.is_noop();
        Ok(((report, cs.clone()), changed))
    })?;

    ctx.emit(
        json!({
            "action": "changeset.sync",
            "changesetId": cs.id.to_string(),
            "added": keys_json(&report.added),
            "removed": keys_json(&report.removed),
            "updated": keys_json(&report.updated),
            "itemCount": cs.len()
        }),
        || {
            format!(
                "stageset changeset sync\n  Changeset: {}\n  Added: {}\n  Removed: {}\n  Updated: {}\n  Items: {}",
                cs.id,
                report.added.len(),
                report.removed.len(),
                report.updated.len(),
                cs.len()
            )
        },
    );
    Ok(())
}

fn run_status(ctx: &Context, reference: String) -> Result<(), CommandError> {
    let (store, ledger) = ctx.load()?;
    let cs = changeset(&ledger, &reference)?;
    require_view(ctx, cs)?;
    let items = ctx.engine.items(&store, cs)?;
    let diff = ctx.engine.diff(&store, cs)?;

    ctx.emit(
        json!({
            "action": "changeset.status",
            "changeset": summary_json(cs),
            "synced": diff.is_clean(),
            "missing": keys_json(&diff.missing),
            "extra": keys_json(&diff.extra),
            "drifted": keys_json(&diff.drifted),
            "items": items.iter().map(item_json).collect::<Vec<_>>()
        }),
        || {
            let mut lines = vec![
                "stageset changeset status".to_string(),
                format!("  Changeset: {} [{}] {}", cs.id, cs.state, cs.title),
                format!("  Synced: {}", diff.is_clean()),
                format!("  Items: {}", items.len()),
            ];
            for item in &items {
                lines.push(format!(
                    "  - {} {} {} {} draft={} live={}",
                    item.id,
                    item.object,
                    item.added.as_str(),
                    item.change_type,
                    item.draft_revision,
                    item.live_revision
                ));
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn run_can(ctx: &Context, reference: String) -> Result<(), CommandError> {
    let (store, ledger) = ctx.load()?;
    let cs = changeset(&ledger, &reference)?;
    let rights = [
        ("view", ctx.engine.can_view(cs, &ctx.actor)),
        ("edit", ctx.engine.can_edit(cs, &ctx.actor)),
        ("delete", ctx.engine.can_delete(cs, &ctx.actor)),
        ("publish", ctx.engine.can_publish(&store, cs, &ctx.actor)?),
        (
            "revert",
            matches!(ctx.engine.can_revert(cs, &ctx.actor), Ok(true)),
        ),
    ];

    ctx.emit(
        json!({
            "action": "changeset.can",
            "changesetId": cs.id.to_string(),
            "actor": ctx.actor.id,
            "canView": rights[0].1,
            "canEdit": rights[1].1,
            "canDelete": rights[2].1,
            "canPublish": rights[3].1,
            "canRevert": rights[4].1
        }),
        || {
            let mut lines = vec![
                "stageset changeset can".to_string(),
                format!("  Changeset: {}", cs.id),
                format!("  Actor: {}", ctx.actor.id),
            ];
            for (right, allowed) in rights {
                lines.push(format!("  {right}: {}", if allowed { "yes" } else { "no" }));
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn run_plan(ctx: &Context, reference: String) -> Result<(), CommandError> {
    let (store, ledger) = ctx.load()?;
    let cs = changeset(&ledger, &reference)?;
    require_view(ctx, cs)?;
    let plan = ctx.engine.plan(&store, cs)?;

    ctx.emit(
        json!({
            "action": "changeset.plan",
            "changesetId": cs.id.to_string(),
            "steps": plan
                .steps
                .iter()
                .map(|step| json!({
                    "object": step.object.to_string(),
                    "action": step.action,
                    "versionBefore": step.version_before
                }))
                .collect::<Vec<_>>()
        }),
        || {
            let mut lines = vec![
                "stageset changeset plan".to_string(),
                format!("  Changeset: {}", cs.id),
                format!("  Steps: {}", plan.steps.len()),
            ];
            for (n, step) in plan.steps.iter().enumerate() {
                lines.push(format!("  {}. {:?} {}", n + 1, step.action, step.object));
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn run_publish(ctx: &Context, reference: String) -> Result<(), CommandError> {
    let report = ctx.mutate(|store, ledger| {
        let cs = changeset_mut(ledger, &reference)?;
        let report = ctx.engine.publish(store, cs, &ctx.actor)?;
        Ok((report, true))
    })?;

    ctx.emit(
        json!({
            "action": "changeset.publish",
            "changesetId": report.change_set_id.to_string(),
            "order": keys_json(&report.order),
            "published": keys_json(&report.published),
            "unpublished": keys_json(&report.unpublished),
            "unlinked": report
                .unlinked
                .iter()
                .map(|link| json!({
                    "object": link.object.to_string(),
                    "field": link.field,
                    "formerOwner": link.former_owner.to_string()
                }))
                .collect::<Vec<_>>(),
            "resynced": report.resync.as_ref().is_some_and(|sync| !sync.is_noop())
        }),
        || {
            format!(
                "stageset changeset publish\n  Changeset: {}\n  Published: {}\n  Unpublished: {}\n  Unlinked: {}",
                report.change_set_id,
                report.published.len(),
                report.unpublished.len(),
                report.unlinked.len()
            )
        },
    );
    Ok(())
}

fn run_list(ctx: &Context, state: Option<String>) -> Result<(), CommandError> {
    let (_, ledger) = ctx.load()?;
    let rows: Vec<&ChangeSet> = ledger
        .list()
        .into_iter()
        .filter(|cs| state.as_ref().is_none_or(|s| *s == cs.state.as_str()))
        .filter(|cs| ctx.engine.can_view(cs, &ctx.actor))
        .collect();

    ctx.emit(
        json!({
            "action": "changeset.list",
            "changesetsPath": ctx.changesets.display().to_string(),
            "count": rows.len(),
            "items": rows.iter().map(|cs| summary_json(cs)).collect::<Vec<_>>()
        }),
        || {
            let mut lines = vec![
                "stageset changeset list".to_string(),
                format!("  Path: {}", ctx.changesets.display()),
                format!("  Count: {}", rows.len()),
            ];
            for cs in &rows {
                lines.push(format!(
                    "  - {} [{}] {} ({} items)",
                    cs.id,
                    cs.state,
                    cs.title,
                    cs.len()
                ));
            }
            lines.join("\n")
        },
    );
    Ok(())
}

fn changeset<'a>(ledger: &'a ChangeSetLedger, reference: &str) -> Result<&'a ChangeSet, CommandError> {
    let id = ledger.resolve(reference)?;
    ledger
        .get(&id)
        .ok_or_else(|| LedgerError::NotFound(reference.to_string()).into())
}

fn changeset_mut<'a>(
    ledger: &'a mut ChangeSetLedger,
    reference: &str,
) -> Result<&'a mut ChangeSet, CommandError> {
    let id = ledger.resolve(reference)?;
    ledger
        .get_mut(&id)
        .ok_or_else(|| LedgerError::NotFound(reference.to_string()).into())
}

fn require_view(ctx: &Context, cs: &ChangeSet) -> Result<(), CommandError> {
    if ctx.engine.can_view(cs, &ctx.actor) {
        Ok(())
    } else {
        Err(ChangeSetError::PermissionDenied {
            change_set_id: cs.id,
            actor: ctx.actor.id.clone(),
            action: "view",
        }
        .into())
    }
}

fn keys_json(keys: &[ObjectKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

fn summary_json(cs: &ChangeSet) -> Value {
    json!({
        "id": cs.id.to_string(),
        "title": cs.title,
        "state": cs.state.as_str(),
        "createdBy": cs.created_by,
        "createdAt": cs.created_at.to_rfc3339(),
        "publishedAt": cs.published_at.map(|at| at.to_rfc3339()),
        "publishedBy": cs.published_by,
        "itemCount": cs.len()
    })
}

fn item_json(item: &ItemStatus) -> Value {
    json!({
        "id": item.id,
        "object": item.object.to_string(),
        "added": item.added.as_str(),
        "changeType": item.change_type.as_str(),
        "draftRevision": item.draft_revision,
        "liveRevision": item.live_revision,
        "versionBefore": item.version_before,
        "versionAfter": item.version_after,
        "referencedBy": item.referenced_by
    })
}
