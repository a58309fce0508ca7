//! Job engine: a durable job queue with per-thread retry/backoff
//! and exclusive maintenance jobs.

use anyhow::Result;

use crate::context::Context;
use crate::param::Params;
use crate::tools::now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thread {
    Imap,
    Smtp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum Action {
    // IMAP thread, lowest priority first.
    DeleteMsgOnImap = 100,
    MarkseenMdnOnImap = 110,
    MarkseenMsgOnImap = 130,
    SendMsgToImap = 900,
    /// Exclusive: kills duplicate pending jobs, suspends the SMTP loop.
    ConfigureImap = 900_000,
    /// Exclusive, same priority tier as configure.
    ImexImap = 900_000,

    // SMTP thread.
    SendMdn = 5_000,
    SendMsgToSmtp = 5_010,
}

impl Action {
    pub fn thread(self) -> Thread {
        use Action::*;
        match self {
            DeleteMsgOnImap | MarkseenMdnOnImap | MarkseenMsgOnImap | SendMsgToImap
            | ConfigureImap | ImexImap => Thread::Imap,
            SendMdn | SendMsgToSmtp => Thread::Smtp,
        }
    }

    pub fn is_exclusive(self) -> bool {
        matches!(self, Action::ConfigureImap | Action::ImexImap)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub added_timestamp: i64,
    pub action: Action,
    pub foreign_id: i64,
    pub param: Params,
    pub desired_timestamp: i64,
    pub try_count: u32,
}

/// The three retry modes a job handler can request.
#[derive(Debug, Clone, Copy)]
pub enum RetryMode {
    /// Retried inline once per loop pass.
    AtOnce,
    /// Re-examined on the next loop pass, roughly 3s out.
    StandardDelay,
    /// An outbound attachment is still being encoded; doesn't count as a
    /// real try.
    InCreationPoll,
}

impl RetryMode {
    fn delay_secs(self) -> i64 {
        match self {
            RetryMode::AtOnce => 0,
            RetryMode::StandardDelay => 3,
            RetryMode::InCreationPoll => 2,
        }
    }

    fn counts_as_try(self) -> bool {
        !matches!(self, RetryMode::InCreationPoll)
    }
}

/// What a job handler returns: either it finished (success or permanent
/// failure, in which case it is removed from the queue) or it wants to be
/// retried.
pub enum Outcome {
    Done,
    Retry { mode: RetryMode, error: Option<String> },
}

/// Enqueues a new job. `desired_timestamp` of 0 means
/// "as soon as possible".
pub async fn add(
    context: &Context,
    action: Action,
    foreign_id: i64,
    param: Params,
    desired_timestamp: i64,
) -> Result<i64> {
    let added = now();
    let param_packed = param.pack();
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (added_timestamp, thread, action, foreign_id, param, desired_timestamp, try_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                rusqlite::params![
                    added,
                    thread_to_i64(action.thread()),
                    action as i64,
                    foreign_id,
                    param_packed,
                    desired_timestamp,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
}

fn thread_to_i64(thread: Thread) -> i64 {
    match thread {
        Thread::Imap => 0,
        Thread::Smtp => 1,
    }
}

/// Loads the next due job for `thread`, in the priority order of
/// Ordering: due timestamp first, then higher action value wins, then
/// oldest `added_timestamp`.
pub async fn load_next_due(context: &Context, thread: Thread) -> Result<Option<Job>> {
    let thread_val = thread_to_i64(thread);
    let wall = now();
    context
        .sql()
        .with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, added_timestamp, action, foreign_id, param, desired_timestamp, try_count
                   FROM jobs
                  WHERE thread = ?1 AND desired_timestamp <= ?2
                  ORDER BY action DESC, added_timestamp ASC
                  LIMIT 1",
            )?;
            let job = stmt
                .query_row(rusqlite::params![thread_val, wall], |row| {
                    let action_raw: i64 = row.get(2)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        action_raw,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                })
                .ok();
            Ok(job.and_then(|(id, added, action_raw, foreign_id, param, desired, tries)| {
                action_from_i64(action_raw).map(|action| Job {
                    id,
                    added_timestamp: added,
                    action,
                    foreign_id,
                    param: Params::unpack(&param),
                    desired_timestamp: desired,
                    try_count: tries as u32,
                })
            }))
        })
        .await
}

fn action_from_i64(v: i64) -> Option<Action> {
    use Action::*;
    for action in [
        DeleteMsgOnImap,
        MarkseenMdnOnImap,
        MarkseenMsgOnImap,
        SendMsgToImap,
        ConfigureImap,
        ImexImap,
        SendMdn,
        SendMsgToSmtp,
    ] {
        if action as i64 == v {
            return Some(action);
        }
    }
    None
}

/// Applies the outcome of attempting `job`: on success, deletes it; on
/// retry, either reschedules it (bumping `try_count` if `is_online` and
/// the mode counts as a real try) or, once [`crate::constants::MAX_JOB_RETRIES`]
/// online tries are exhausted, deletes it and returns the final error so
/// the caller can mark the underlying message `OUT_FAILED`.
pub async fn apply_outcome(
    context: &Context,
    job: Job,
    outcome: Outcome,
    is_online: bool,
) -> Result<Option<String>> {
    match outcome {
        Outcome::Done => {
            delete(context, job.id).await?;
            Ok(None)
        }
        Outcome::Retry { mode, error } => {
            let new_tries = if is_online && mode.counts_as_try() {
                job.try_count + 1
            } else {
                job.try_count
            };
            if new_tries >= crate::constants::MAX_JOB_RETRIES {
                delete(context, job.id).await?;
                return Ok(error);
            }
            let desired = now() + mode.delay_secs();
            let job_id = job.id;
            context
                .sql()
                .with_conn(move |conn| {
                    conn.execute(
                        "UPDATE jobs SET try_count=?1, desired_timestamp=?2 WHERE id=?3",
                        rusqlite::params![new_tries, desired, job_id],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(None)
        }
    }
}

pub async fn delete(context: &Context, job_id: i64) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute("DELETE FROM jobs WHERE id=?1", [job_id])?;
            Ok(())
        })
        .await
}

/// Removes any other pending job with the same exclusive action, so a
/// freshly enqueued `CONFIGURE_IMAP`/`IMEX_IMAP` supersedes stale ones
///.
pub async fn kill_duplicate_exclusive_jobs(context: &Context, action: Action, keep: i64) -> Result<()> {
    debug_assert!(action.is_exclusive());
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "DELETE FROM jobs WHERE action=?1 AND id != ?2",
                rusqlite::params![action as i64, keep],
            )?;
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::FakeCrypto;
    use std::sync::Arc;

    async fn test_context() -> Context {
        let dir = tempfile::tempdir().unwrap();
        Context::new_in_memory(Arc::new(FakeCrypto::default()), dir.path().to_path_buf())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn priority_picks_exclusive_job_over_normal_send() {
        let ctx = test_context().await;
        add(&ctx, Action::SendMsgToImap, 1, Params::new(), 0).await.unwrap();
        add(&ctx, Action::ConfigureImap, 0, Params::new(), 0).await.unwrap();
        let job = load_next_due(&ctx, Thread::Imap).await.unwrap().unwrap();
        assert_eq!(job.action, Action::ConfigureImap);
    }

    #[tokio::test]
    async fn oldest_wins_among_equal_priority() {
        let ctx = test_context().await;
        let first = add(&ctx, Action::SendMsgToSmtp, 1, Params::new(), 0).await.unwrap();
        add(&ctx, Action::SendMsgToSmtp, 2, Params::new(), 0).await.unwrap();
        let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
        assert_eq!(job.foreign_id, 1);
        assert_eq!(job.id, first);
    }

    #[tokio::test]
    async fn retry_cap_deletes_job_after_three_online_tries() {
        let ctx = test_context().await;
        add(&ctx, Action::SendMsgToSmtp, 1, Params::new(), 0).await.unwrap();
        for i in 0..3 {
            let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
            let result = apply_outcome(
                &ctx,
                job,
                Outcome::Retry {
                    mode: RetryMode::AtOnce,
                    error: Some(format!("boom {i}")),
                },
                true,
            )
            .await
            .unwrap();
            if i < 2 {
                assert!(result.is_none());
            } else {
                assert_eq!(result.as_deref(), Some("boom 2"));
            }
        }
        assert!(load_next_due(&ctx, Thread::Smtp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_creation_poll_never_counts_as_a_try() {
        let ctx = test_context().await;
        add(&ctx, Action::SendMsgToSmtp, 1, Params::new(), 0).await.unwrap();
        for _ in 0..10 {
            let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
            apply_outcome(
                &ctx,
                job,
                Outcome::Retry {
                    mode: RetryMode::InCreationPoll,
                    error: None,
                },
                true,
            )
            .await
            .unwrap();
        }
        let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
        assert_eq!(job.try_count, 0);
    }

    #[tokio::test]
    async fn offline_retries_do_not_consume_the_cap() {
        let ctx = test_context().await;
        add(&ctx, Action::SendMsgToSmtp, 1, Params::new(), 0).await.unwrap();
        for _ in 0..10 {
            let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
            apply_outcome(
                &ctx,
                job,
                Outcome::Retry {
                    mode: RetryMode::StandardDelay,
                    error: None,
                },
                false,
            )
            .await
            .unwrap();
        }
        let job = load_next_due(&ctx, Thread::Smtp).await.unwrap().unwrap();
        assert_eq!(job.try_count, 0);
    }
}
