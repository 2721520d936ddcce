// Copyright 2024 Paul Adamson
// Licensed under the Apache License, Version 2.0
//
// SessionController - lifecycle and recovery for automation sessions.
//
// At most one session exists per mode (normal, incognito). The controller
// is the single place that decides "is a session already running, and is
// it actually usable": callers racing to start share one underlying
// session, and a cached session whose remote end silently died is
// replaced transparently instead of failing the caller.

use crate::events::EventWaiter;
use crate::session::{Session, SessionEvent};
use bext_protocol::{SessionMode, StartOptions};
use bext_runtime::channel::{Channel, RemoteRef};
use bext_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use bext_runtime::connection::ConnectionLike;
use bext_runtime::{Error, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long to wait for the session object referenced by a start response.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// One controller slot: a start in flight, or a running session.
///
/// A slot is non-empty from the moment a start is claimed until the start
/// fails or the session closes; it is never replaced while non-empty
/// except through a forced reset.
#[derive(Clone)]
enum Slot {
    /// Start in progress. The watch settles to `Some(session)` on
    /// success; the sender is dropped without a value on failure.
    Starting(watch::Receiver<Option<Session>>),
    /// Session up and cached.
    Ready(Session),
}

/// Slot map plus a reset epoch.
///
/// The epoch invalidates in-flight starts: a forced reset bumps it, and a
/// start that settles under a stale epoch must not write its slot back.
struct SlotTable {
    entries: HashMap<SessionMode, Slot>,
    epoch: u64,
}

/// Exclusive right to run the remote start for one mode.
struct StartClaim {
    mode: SessionMode,
    epoch: u64,
    tx: watch::Sender<Option<Session>>,
}

/// Outcome of claiming a slot.
enum Acquired {
    /// Slot was empty; the caller must run the start.
    Claimed(StartClaim),
    /// Slot held a pending-or-ready session, now settled.
    Cached(Session),
}

/// Manages at most one automation session per mode.
///
/// Obtained from [`connect`]; cheap to clone, and all clones share the
/// same slots.
///
/// # Example
///
/// ```ignore
/// let controller = bext::connect(outbound, inbound).await?;
///
/// // Idempotent: both calls yield the same running session.
/// let a = controller.start(StartOptions::new()).await?;
/// let b = controller.start(StartOptions::new()).await?;
/// assert_eq!(a.guid(), b.guid());
///
/// // Independent incognito session.
/// let private = controller.start(StartOptions::new().incognito(true)).await?;
/// ```
///
/// [`connect`]: crate::connect
#[derive(Clone)]
pub struct SessionController {
    base: ChannelOwnerImpl,
    slots: Arc<Mutex<SlotTable>>,
}

impl SessionController {
    /// Creates the controller from protocol initialization.
    ///
    /// The controller is the root service object, so its parent is the
    /// connection itself.
    pub(crate) fn new(
        connection: Arc<dyn ConnectionLike>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Result<Self> {
        let base = ChannelOwnerImpl::new(
            ParentOrConnection::Connection(connection),
            type_name,
            guid,
            initializer,
        );

        Ok(Self {
            base,
            slots: Arc::new(Mutex::new(SlotTable {
                entries: HashMap::new(),
                epoch: 0,
            })),
        })
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    /// Starts a session, or returns the running one for the same mode.
    ///
    /// If the slot for the mode is empty, the remote start runs and the
    /// session is cached. If the slot is occupied, the cached session is
    /// liveness-probed (its page list is requested): a healthy session is
    /// shared with the caller, and a dead one triggers a forced reset
    /// followed by exactly one fresh start attempt. A failure of that
    /// retry is terminal for this call.
    ///
    /// Two concurrent starts for the same mode never issue two remote
    /// start requests: the second caller waits on the first one's slot.
    ///
    /// # Errors
    ///
    /// Remote start failures propagate verbatim once no retry applies.
    /// Errors from closing stale sessions during recovery are swallowed.
    pub async fn start(&self, options: StartOptions) -> Result<Session> {
        let mode = options.mode();
        match self.acquire(mode).await {
            Acquired::Claimed(claim) => self.launch(claim, &options).await,
            Acquired::Cached(session) => match session.pages().await {
                Ok(_) => Ok(session),
                Err(probe) => {
                    tracing::warn!(
                        %mode,
                        error = %probe,
                        "cached session failed liveness probe, resetting"
                    );
                    self.force_reset().await;
                    match self.acquire(mode).await {
                        Acquired::Claimed(claim) => self.launch(claim, &options).await,
                        // Lost the post-reset race to another starter; its
                        // session postdates the reset, so share it.
                        Acquired::Cached(session) => Ok(session),
                    }
                }
            },
        }
    }

    /// Returns the session for `mode`, if one is pending or running.
    ///
    /// Awaits an in-flight start internally; a start that failed (and
    /// cleared its slot) yields `None`.
    pub async fn get(&self, mode: SessionMode) -> Option<Session> {
        let slot = {
            let table = self.slots.lock();
            table.entries.get(&mode).cloned()?
        };

        match slot {
            Slot::Ready(session) => Some(session),
            Slot::Starting(mut pending) => match pending.wait_for(|slot| slot.is_some()).await {
                Ok(settled) => (*settled).clone(),
                Err(_) => None,
            },
        }
    }

    /// Unconditionally discards both slots and closes the sessions they
    /// held, best-effort.
    ///
    /// The slots are cleared (and the reset epoch bumped) before any
    /// close runs, so new starts are unblocked immediately while the old
    /// sessions are still winding down. An in-flight start is abandoned
    /// by discarding its slot; if its remote start still completes, the
    /// orphaned session is closed here. Close failures are swallowed:
    /// the sessions are being discarded anyway.
    pub async fn force_reset(&self) {
        let drained: Vec<Slot> = {
            let mut table = self.slots.lock();
            table.epoch += 1;
            table.entries.drain().map(|(_, slot)| slot).collect()
        };

        for slot in drained {
            let session = match slot {
                Slot::Ready(session) => Some(session),
                Slot::Starting(mut pending) => {
                    match pending.wait_for(|slot| slot.is_some()).await {
                        Ok(settled) => (*settled).clone(),
                        Err(_) => None,
                    }
                }
            };

            if let Some(session) = session {
                if let Err(e) = session.close().await {
                    tracing::debug!(
                        error = %e,
                        guid = session.guid(),
                        "ignoring close failure during forced reset"
                    );
                }
            }
        }
    }

    /// Claims the slot for `mode`, or waits out whoever holds it.
    async fn acquire(&self, mode: SessionMode) -> Acquired {
        loop {
            let mut pending = {
                let mut table = self.slots.lock();
                match table.entries.get(&mode) {
                    None => {
                        // Mark in-progress under the lock, before any
                        // await: a second caller must find this marker
                        // rather than issue its own remote start.
                        let (tx, rx) = watch::channel(None);
                        table.entries.insert(mode, Slot::Starting(rx));
                        return Acquired::Claimed(StartClaim {
                            mode,
                            epoch: table.epoch,
                            tx,
                        });
                    }
                    Some(Slot::Ready(session)) => return Acquired::Cached(session.clone()),
                    Some(Slot::Starting(pending)) => pending.clone(),
                }
            };

            match pending.wait_for(|slot| slot.is_some()).await {
                Ok(settled) => {
                    if let Some(session) = (*settled).clone() {
                        return Acquired::Cached(session);
                    }
                }
                // The starter failed and cleared the slot; re-check.
                Err(_) => {}
            }
        }
    }

    /// Runs the remote start for a claimed slot and publishes the result.
    async fn launch(&self, claim: StartClaim, options: &StartOptions) -> Result<Session> {
        match self.request_start(options).await {
            Ok(session) => {
                // One-shot close handler, registered before the session
                // becomes visible to anyone else.
                let closed = session.closed();

                let superseded = {
                    let mut table = self.slots.lock();
                    if table.epoch == claim.epoch {
                        table
                            .entries
                            .insert(claim.mode, Slot::Ready(session.clone()));
                        false
                    } else {
                        true
                    }
                };

                if superseded {
                    // A forced reset ran while this start was in flight.
                    // The reset is draining our Starting slot and closes
                    // the session once it is published below.
                    tracing::debug!(
                        mode = %claim.mode,
                        guid = session.guid(),
                        "start superseded by forced reset"
                    );
                } else {
                    self.clear_slot_on_close(claim.mode, &session, closed);
                }

                let _ = claim.tx.send(Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                {
                    let mut table = self.slots.lock();
                    if table.epoch == claim.epoch {
                        table.entries.remove(&claim.mode);
                    }
                }
                // claim.tx drops here, waking anyone sharing the slot;
                // they observe the cleared slot and proceed on their own.
                Err(e)
            }
        }
    }

    /// Issues the remote start call and resolves the session it created.
    async fn request_start(&self, options: &StartOptions) -> Result<Session> {
        #[derive(Deserialize)]
        struct StartResponse {
            session: RemoteRef,
        }

        let response: StartResponse = self.channel().send("start", options).await?;

        let object = self
            .connection()
            .wait_for_object(&response.session.guid, RESOLVE_TIMEOUT)
            .await?;

        object
            .downcast_ref::<Session>()
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                guid: response.session.guid.to_string(),
                expected: Some("Session"),
            })
    }

    /// Clears the slot for `mode` when this exact session closes.
    ///
    /// Identity-checked by GUID: a slot that was reset and restarted in
    /// the meantime belongs to a newer session and is left alone.
    fn clear_slot_on_close(
        &self,
        mode: SessionMode,
        session: &Session,
        closed: EventWaiter<SessionEvent>,
    ) {
        let slots = Arc::clone(&self.slots);
        let guid: Arc<str> = Arc::from(session.guid());

        tokio::spawn(async move {
            if closed.await.is_err() {
                // Session dropped without ever closing.
                return;
            }

            let mut table = slots.lock();
            let is_current = matches!(
                table.entries.get(&mode),
                Some(Slot::Ready(current)) if current.guid() == &*guid
            );
            if is_current {
                table.entries.remove(&mode);
                tracing::debug!(%mode, %guid, "cleared session slot after close");
            }
        });
    }
}

impl bext_runtime::channel_owner::private::Sealed for SessionController {}

impl ChannelOwner for SessionController {
    fn guid(&self) -> &str {
        self.base.guid()
    }

    fn type_name(&self) -> &str {
        self.base.type_name()
    }

    fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
        self.base.parent()
    }

    fn connection(&self) -> Arc<dyn ConnectionLike> {
        self.base.connection()
    }

    fn initializer(&self) -> &Value {
        self.base.initializer()
    }

    fn channel(&self) -> &Channel {
        self.base.channel()
    }

    fn dispose(&self) {
        self.base.dispose()
    }

    fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>) {
        self.base.add_child(guid, child)
    }

    fn remove_child(&self, guid: &str) {
        self.base.remove_child(guid)
    }

    fn on_event(&self, method: &str, params: Value) {
        self.base.on_event(method, params)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.slots.lock();
        let slots: Vec<String> = table
            .entries
            .iter()
            .map(|(mode, slot)| {
                let state = match slot {
                    Slot::Starting(_) => "starting",
                    Slot::Ready(_) => "ready",
                };
                format!("{mode}: {state}")
            })
            .collect();
        f.debug_struct("SessionController")
            .field("guid", &self.guid())
            .field("slots", &slots)
            .finish()
    }
}
