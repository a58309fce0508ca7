//! The engine instance. One [`Context`] = one configured account, holding
//! the shared state every component needs: storage, blob directory, the
//! event/log channel, the crypto capability, and the ongoing-process slot.
//! `Context` is a cheaply `Arc`-cloneable handle onto an inner struct so
//! every task shares the same state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{oneshot, RwLock};

use crate::config::{get_config_bool, get_config_int, Config};
use crate::crypto::Crypto;
use crate::events::{Event, EventEmitter, Events};
use crate::scheduler::Scheduler;
use crate::sql::Sql;
use crate::tools::Smearer;

pub struct Context {
    inner: Arc<Inner>,
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Context {
            inner: self.inner.clone(),
        }
    }
}

struct Inner {
    dbfile: PathBuf,
    blobdir: PathBuf,
    sql: Sql,
    events: Events,
    crypto: Arc<dyn Crypto>,
    smearer: Smearer,
    scheduler: RwLock<Scheduler>,
    ongoing: RwLock<OngoingSlot>,
}

#[derive(Default)]
struct OngoingSlot {
    running: bool,
    cancel: Option<oneshot::Sender<()>>,
}

impl Context {
    pub async fn new(dbfile: PathBuf, blobdir: PathBuf, crypto: Arc<dyn Crypto>) -> Result<Self> {
        if !blobdir.is_dir() {
            std::fs::create_dir_all(&blobdir)?;
        }
        let sql = Sql::open(&dbfile)?;
        let inner = Inner {
            dbfile,
            blobdir,
            sql,
            events: Events::default(),
            crypto,
            smearer: Smearer::new(),
            scheduler: RwLock::new(Scheduler::Stopped),
            ongoing: RwLock::new(OngoingSlot::default()),
        };
        Ok(Context { inner: Arc::new(inner) })
    }

    /// An in-memory context, for tests: no on-disk database or blob dir.
    #[cfg(test)]
    pub async fn new_in_memory(crypto: Arc<dyn Crypto>, blobdir: PathBuf) -> Result<Self> {
        let sql = Sql::open_in_memory()?;
        let inner = Inner {
            dbfile: PathBuf::from(":memory:"),
            blobdir,
            sql,
            events: Events::default(),
            crypto,
            smearer: Smearer::new(),
            scheduler: RwLock::new(Scheduler::Stopped),
            ongoing: RwLock::new(OngoingSlot::default()),
        };
        Ok(Context { inner: Arc::new(inner) })
    }

    pub fn sql(&self) -> &Sql {
        &self.inner.sql
    }

    pub fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.inner.crypto
    }

    pub fn blobdir(&self) -> &Path {
        &self.inner.blobdir
    }

    pub fn dbfile(&self) -> &Path {
        &self.inner.dbfile
    }

    pub fn emit_event(&self, event: Event) {
        self.inner.events.emit(event);
    }

    pub fn event_emitter(&self) -> EventEmitter {
        self.inner.events.emitter()
    }

    /// A timestamp guaranteed to be strictly greater than any previously
    /// returned by this context.
    pub fn smeared_time(&self) -> i64 {
        self.inner.smearer.smeared_time()
    }

    pub async fn get_config(&self, key: Config) -> Option<String> {
        self.inner
            .sql
            .get_raw_config(&key.to_string())
            .await
            .or_else(|| key.default_value().map(str::to_string))
    }

    pub async fn set_config(&self, key: Config, value: Option<&str>) -> Result<()> {
        self.inner.sql.set_raw_config(&key.to_string(), value).await
    }

    pub async fn get_config_int(&self, key: Config, default: i64) -> i64 {
        get_config_int(&self.inner.sql, key, default).await
    }

    pub async fn get_config_bool(&self, key: Config, default: bool) -> bool {
        get_config_bool(&self.inner.sql, key, default).await
    }

    pub async fn is_configured(&self) -> bool {
        self.get_config_bool(Config::Configured, false).await
    }

    /// Asks the host whether the device is currently offline. No host has
    /// answered yet in this crate, so
    /// this conservatively reports online; a real host wires this to its
    /// own connectivity check before emitting [`crate::events::Event::IsOffline`].
    pub async fn is_offline(&self) -> bool {
        false
    }

    /// Fetches `url` on the host's behalf (used by the autoconfig
    /// ladder). No host has answered this event in-process
    /// yet, so this always reports "no body" — a real host intercepts
    /// [`crate::events::Event::HttpGet`] and feeds the response back
    /// through whatever side channel it wires up.
    pub async fn http_get(&self, url: &str) -> Option<String> {
        self.emit_event(crate::events::Event::HttpGet(url.to_string()));
        None
    }

    /// Claims the single "ongoing process" slot: configure
    /// and import/export jobs are mutually exclusive and cooperative
    /// cancellation is signaled through the returned receiver's drop, not
    /// the receiver's value.
    pub async fn alloc_ongoing(&self) -> Result<OngoingGuard> {
        let mut slot = self.inner.ongoing.write().await;
        if slot.running {
            bail!("another long-running operation (configure or import/export) is already in progress");
        }
        let (tx, rx) = oneshot::channel();
        slot.running = true;
        slot.cancel = Some(tx);
        Ok(OngoingGuard {
            ctx: self.clone(),
            cancel_rx: Some(rx),
        })
    }

    pub async fn has_ongoing(&self) -> bool {
        self.inner.ongoing.read().await.running
    }

    /// Signals the ongoing process (if any) to stop at its next
    /// checkpoint.
    pub async fn stop_ongoing(&self) {
        let mut slot = self.inner.ongoing.write().await;
        if let Some(cancel) = slot.cancel.take() {
            let _ = cancel.send(());
        }
    }

    async fn free_ongoing(&self) {
        let mut slot = self.inner.ongoing.write().await;
        slot.running = false;
        slot.cancel = None;
    }

    pub(crate) fn scheduler(&self) -> &RwLock<Scheduler> {
        &self.inner.scheduler
    }
}

/// RAII guard for the ongoing-process slot: `shall_stop()` samples the
/// cooperative-cancellation signal, and the slot is always freed on drop
/// even if the operation returns early via `?`.
pub struct OngoingGuard {
    ctx: Context,
    cancel_rx: Option<oneshot::Receiver<()>>,
}

impl OngoingGuard {
    pub fn shall_stop(&mut self) -> bool {
        match &mut self.cancel_rx {
            Some(rx) => match rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => true,
                Err(oneshot::error::TryRecvError::Empty) => false,
            },
            None => true,
        }
    }
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move { ctx.free_ongoing().await });
    }
}
