//! Queue and assignment subcommand handlers.

use chrono::Utc;
use tracing::info;

use annoqueue_workqueue::{AccessGate, AssignmentRole, NewQueue, Queue, QueueDirectory, WorkerId};

use crate::app::{App, CmdResult};
use crate::cli::{QueueAction, ScopeArgs};

/// Handle queue subcommands.
pub(crate) async fn handle_queue_command(app: &App, action: QueueAction) -> CmdResult {
    match action {
        QueueAction::Create {
            project,
            name,
            description,
            lease_secs,
            auto_assign,
        } => {
            let mut new_queue = NewQueue::new(project, name)
                .with_lease_secs(lease_secs.unwrap_or(app.config.queue.default_lease_secs))
                .with_auto_assign(auto_assign);
            if let Some(description) = description {
                new_queue = new_queue.with_description(description);
            }
            let queue = app.store.create_queue(new_queue, Utc::now()).await?;
            info!("Created queue {} ({})", queue.name, queue.id);
            app.emit(&queue, print_queue)
        }
        QueueAction::List { project } => {
            let queues = app.store.list_queues(project).await?;
            app.emit(&queues, |queues| {
                if queues.is_empty() {
                    println!("No queues found.");
                    return;
                }
                println!("{:<36}  {:<24}  {:<8}  {:>7}", "ID", "NAME", "STATUS", "LEASE");
                for q in queues {
                    println!(
                        "{:<36}  {:<24}  {:<8}  {:>6}s",
                        q.id, q.name, q.status, q.lease_duration_secs
                    );
                }
            })
        }
        QueueAction::Status { scope, set } => {
            let queue = match set {
                Some(status) => {
                    let queue = app
                        .store
                        .set_queue_status(scope.queue, scope.project, status, Utc::now())
                        .await?;
                    info!("Queue {} is now {}", queue.id, queue.status);
                    queue
                }
                None => app.queue(scope).await?,
            };
            app.emit(&queue, print_queue)
        }
        QueueAction::Lease { scope, secs } => {
            if secs <= 0 {
                return Err("lease must be a positive number of seconds".into());
            }
            let queue = app
                .store
                .set_lease_duration(scope.queue, scope.project, secs, Utc::now())
                .await?;
            app.emit(&queue, print_queue)
        }
        QueueAction::Delete { scope } => {
            app.store.delete_queue(scope.queue, scope.project).await?;
            info!("Deleted queue {}", scope.queue);
            app.emit(&serde_json::json!({ "deleted": scope.queue }), |_| {
                println!("Deleted queue {}", scope.queue)
            })
        }
    }
}

/// Grant a role on a queue.
pub(crate) async fn assign(app: &App, scope: ScopeArgs, worker: WorkerId, role: AssignmentRole) -> CmdResult {
    let queue = app.queue(scope).await?;
    let assignment = app.store.assign(queue.id, &worker, role, Utc::now()).await?;
    app.emit(&assignment, |a| {
        println!("Assigned {} to queue {} as {}", a.worker, a.queue_id, a.role)
    })
}

/// Revoke an assignment.
pub(crate) async fn unassign(app: &App, scope: ScopeArgs, worker: WorkerId) -> CmdResult {
    let queue = app.queue(scope).await?;
    let removed = app.store.unassign(queue.id, &worker).await?;
    app.emit(&serde_json::json!({ "removed": removed }), |_| {
        if removed {
            println!("Unassigned {} from queue {}", worker, queue.id);
        } else {
            println!("{} was not assigned to queue {}", worker, queue.id);
        }
    })
}

fn print_queue(queue: &Queue) {
    println!("ID:          {}", queue.id);
    println!("Project:     {}", queue.project_id);
    println!("Name:        {}", queue.name);
    if let Some(description) = &queue.description {
        println!("Description: {}", description);
    }
    println!("Status:      {}", queue.status);
    println!("Lease:       {}s", queue.lease_duration_secs);
    println!("Auto-assign: {}", queue.auto_assign);
}
