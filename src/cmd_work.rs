//! Item and work subcommand handlers.

use tracing::info;

use annoqueue_workqueue::{
    Item, ItemFilter, ItemId, NewItem, QueueStats, ScoreInput, WorkerId,
};

use crate::app::{App, CmdResult, scope_of};
use crate::cli::{ItemAction, ScopeArgs};

/// Handle item subcommands.
pub(crate) async fn handle_item_command(app: &App, action: ItemAction) -> CmdResult {
    match action {
        ItemAction::Add {
            scope,
            object_ids,
            object_type,
            priority,
        } => {
            let requested = object_ids.len();
            let items = object_ids
                .into_iter()
                .map(|id| NewItem::new(id, object_type).with_priority(priority))
                .collect();
            let inserted = app.engine.add_items(scope_of(scope), items).await?;
            info!("Added {} of {} items to queue {}", inserted, requested, scope.queue);
            app.emit(&serde_json::json!({ "inserted": inserted, "requested": requested }), |_| {
                println!("Added {} item(s), {} already present", inserted, requested - inserted)
            })
        }
        ItemAction::List {
            scope,
            status,
            limit,
            offset,
        } => {
            let filter = ItemFilter { status, limit, offset };
            let items = app.engine.list_items(scope_of(scope), &filter).await?;
            app.emit(&items, |items| {
                if items.is_empty() {
                    println!("No items found.");
                    return;
                }
                println!(
                    "{:<36}  {:<24}  {:<6}  {:>4}  {:<10}  {}",
                    "ID", "OBJECT", "TYPE", "PRIO", "STATUS", "LOCKED BY"
                );
                for item in items {
                    println!(
                        "{:<36}  {:<24}  {:<6}  {:>4}  {:<10}  {}",
                        item.id,
                        item.object_id,
                        item.object_type,
                        item.priority,
                        item.status,
                        item.locked_by.as_ref().map(|w| w.as_str()).unwrap_or("-")
                    );
                }
            })
        }
        ItemAction::Delete { scope, item } => {
            app.engine.delete_item(scope_of(scope), item).await?;
            app.emit(&serde_json::json!({ "deleted": item }), |_| println!("Deleted item {}", item))
        }
    }
}

/// Claim the next item.
pub(crate) async fn claim(app: &App, scope: ScopeArgs, worker: WorkerId, exclude: Vec<ItemId>) -> CmdResult {
    let scope = app.authorize(scope, &worker).await?;
    match app.engine.claim_next(scope, &worker, &exclude).await {
        Ok(item) => app.emit(&item, print_item),
        Err(e) if e.is_empty_result() => app.emit(&serde_json::Value::Null, |_| println!("No items available.")),
        Err(e) => Err(e.into()),
    }
}

/// Complete an item with optional scores.
pub(crate) async fn complete(
    app: &App,
    scope: ScopeArgs,
    item: ItemId,
    worker: WorkerId,
    scores: Vec<ScoreInput>,
) -> CmdResult {
    let scope = app.authorize(scope, &worker).await?;
    let item = app.engine.complete(scope, item, &worker, scores).await?;
    app.emit(&item, print_item)
}

/// Skip an item.
pub(crate) async fn skip(
    app: &App,
    scope: ScopeArgs,
    item: ItemId,
    worker: WorkerId,
    reason: Option<String>,
) -> CmdResult {
    let scope = app.authorize(scope, &worker).await?;
    let item = app.engine.skip(scope, item, &worker, reason.as_deref()).await?;
    app.emit(&item, print_item)
}

/// Release a held lock.
pub(crate) async fn release(app: &App, scope: ScopeArgs, item: ItemId, worker: WorkerId) -> CmdResult {
    let item = app.engine.release_lock(scope_of(scope), item, &worker).await?;
    app.emit(&item, print_item)
}

/// Show queue statistics.
pub(crate) async fn stats(app: &App, scope: ScopeArgs) -> CmdResult {
    let stats = app.engine.stats(scope_of(scope)).await?;
    app.emit(&stats, print_stats)
}

fn print_item(item: &Item) {
    println!("ID:        {}", item.id);
    println!("Object:    {} ({})", item.object_id, item.object_type);
    println!("Priority:  {}", item.priority);
    println!("Status:    {}", item.status);
    if let (Some(by), Some(at)) = (&item.locked_by, item.locked_at) {
        println!("Locked by: {} at {}", by, at.to_rfc3339());
    }
    if let Some(annotator) = &item.annotator {
        println!("Annotator: {}", annotator);
    }
}

fn print_stats(stats: &QueueStats) {
    println!("Total:       {}", stats.total);
    println!("Pending:     {}", stats.pending);
    println!("  available: {}", stats.available());
    println!("  in use:    {}", stats.in_progress);
    println!("Completed:   {}", stats.completed);
    println!("Skipped:     {}", stats.skipped);
}
