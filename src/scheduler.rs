//! Two-loop coordination: one task pumps the IMAP thread's job
//! queue and idles on IDLE/poll, the other pumps the SMTP thread's job
//! queue and idles on a notify channel.
//!
//! Each thread is a `tokio::task` woken either by new work or by its own
//! idle timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::job::{self, Outcome, RetryMode, Thread};
use crate::{error, info};

/// How long the IMAP loop waits between polls when idling isn't
/// available (falls back to polling when the server lacks the IDLE
/// capability).
const IMAP_IDLE_FALLBACK: Duration = Duration::from_secs(30);

pub enum Scheduler {
    Stopped,
    Running {
        imap: JoinHandle<()>,
        smtp: JoinHandle<()>,
        imap_notify: Arc<Notify>,
        smtp_notify: Arc<Notify>,
    },
}

impl Scheduler {
    pub fn is_running(&self) -> bool {
        matches!(self, Scheduler::Running { .. })
    }
}

/// Starts both loops if not already running (starting an already-running
/// context is a no-op, not an error).
pub async fn start(context: &Context) {
    let mut guard = context.scheduler().write().await;
    if guard.is_running() {
        return;
    }
    let imap_notify = Arc::new(Notify::new());
    let smtp_notify = Arc::new(Notify::new());

    let imap = tokio::spawn(imap_loop(context.clone(), imap_notify.clone()));
    let smtp = tokio::spawn(smtp_loop(context.clone(), smtp_notify.clone()));

    *guard = Scheduler::Running {
        imap,
        smtp,
        imap_notify,
        smtp_notify,
    };
}

/// Aborts both loop tasks. Jobs left in the queue are picked up again on
/// the next `start`.
pub async fn stop(context: &Context) {
    let mut guard = context.scheduler().write().await;
    if let Scheduler::Running { imap, smtp, .. } = &*guard {
        imap.abort();
        smtp.abort();
    }
    *guard = Scheduler::Stopped;
}

/// Wakes the SMTP loop, e.g. right after a message was queued for
/// sending, so it doesn't wait out its idle timer.
pub async fn interrupt_smtp(context: &Context) {
    if let Scheduler::Running { smtp_notify, .. } = &*context.scheduler().read().await {
        smtp_notify.notify_one();
    }
}

pub async fn interrupt_imap(context: &Context) {
    if let Scheduler::Running { imap_notify, .. } = &*context.scheduler().read().await {
        imap_notify.notify_one();
    }
}

async fn imap_loop(context: Context, notify: Arc<Notify>) {
    loop {
        match job::load_next_due(&context, Thread::Imap).await {
            Ok(Some(due_job)) => {
                run_one(&context, due_job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => error!(context, "imap job queue error: {err:#}"),
        }
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(IMAP_IDLE_FALLBACK) => {}
        }
    }
}

async fn smtp_loop(context: Context, notify: Arc<Notify>) {
    loop {
        match job::load_next_due(&context, Thread::Smtp).await {
            Ok(Some(due_job)) => {
                run_one(&context, due_job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => error!(context, "smtp job queue error: {err:#}"),
        }
        notify.notified().await;
    }
}

/// Dispatches one due job to its action handler and applies the outcome
/// to the queue. Each handler module reports its own
/// [`Outcome`]; network errors map to [`RetryMode::StandardDelay`] so a
/// transient server hiccup doesn't burn through the retry cap in one
/// loop pass.
async fn run_one(context: &Context, due_job: job::Job) {
    info!(context, "executing job {} ({:?})", due_job.id, due_job.action);
    let is_online = !context.is_offline().await;
    let (outcome, foreign_id) = (dispatch(context, &due_job).await, due_job.foreign_id);
    match job::apply_outcome(context, due_job, outcome, is_online).await {
        Ok(Some(final_error)) => error!(context, "job for {foreign_id} gave up: {final_error}"),
        Ok(None) => {}
        Err(err) => error!(context, "job queue update failed: {err:#}"),
    }
}

async fn dispatch(context: &Context, due_job: &job::Job) -> Outcome {
    use crate::job::Action::*;
    let result: anyhow::Result<()> = match due_job.action {
        SendMsgToSmtp | SendMdn => crate::smtp::send_job(context, due_job).await,
        SendMsgToImap | MarkseenMsgOnImap | MarkseenMdnOnImap | DeleteMsgOnImap => {
            crate::imap::run_job(context, due_job).await
        }
        ConfigureImap => crate::configure::run_job(context, due_job).await,
        ImexImap => crate::imex::run_job(context, due_job).await,
    };
    match result {
        Ok(()) => Outcome::Done,
        Err(err) => {
            error!(context, "job {} failed: {err:#}", due_job.id);
            Outcome::Retry {
                mode: RetryMode::StandardDelay,
                error: Some(err.to_string()),
            }
        }
    }
}
