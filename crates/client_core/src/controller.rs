use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{
    domain::{Session, Severity, SystemStatus},
    error::ApiFailure,
};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    activity::{ActivityLog, LogEntry},
    events::{Action, ControllerError, ControllerEvent, SessionView},
    polling::PollingScheduler,
    session_store::SessionStore,
    status_client::{resolve_sensor_source, StatusApi},
};

pub const CONNECT_FAILURE_MESSAGE: &str =
    "Cannot connect to the server. Please make sure the backend service is running.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
const SERVER_UNREACHABLE_TOAST: &str = "Cannot connect to the server";
const SERVER_UNREACHABLE_LOG: &str = "Server connection error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    /// Delay before the one-off refresh that follows a trigger or reset.
    pub refresh_delay: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            refresh_delay: Duration::from_millis(500),
        }
    }
}

struct ControllerState {
    session: Option<Session>,
    /// Bumped on every login/logout. Replies requested under an older epoch
    /// are dropped.
    epoch: u64,
    polling: PollingScheduler,
    status: SystemStatus,
    activity: ActivityLog,
}

/// Owns the session and keeps polling in lockstep with it: the scheduler runs
/// exactly while a session is held.
pub struct SessionController {
    api: Arc<dyn StatusApi>,
    store: Arc<dyn SessionStore>,
    settings: ControllerSettings,
    inner: Mutex<ControllerState>,
    /// Taken before `inner` is released so store writes land in transition
    /// order without holding `inner` during file I/O.
    persist: Mutex<()>,
    busy: [AtomicBool; 3],
    events: broadcast::Sender<ControllerEvent>,
}

enum StoreWrite {
    Save(Session),
    Clear,
}

/// Holds an action's busy flag; releasing it announces `busy: false`.
struct BusyGuard<'a> {
    controller: &'a SessionController,
    action: Action,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.controller.busy[self.action.index()].store(false, Ordering::Release);
        self.controller.emit(ControllerEvent::BusyChanged {
            action: self.action,
            busy: false,
        });
    }
}

impl SessionController {
    pub fn new(
        api: Arc<dyn StatusApi>,
        store: Arc<dyn SessionStore>,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            api,
            store,
            settings,
            inner: Mutex::new(ControllerState {
                session: None,
                epoch: 0,
                polling: PollingScheduler::new(),
                status: SystemStatus::default(),
                activity: ActivityLog::default(),
            }),
            persist: Mutex::new(()),
            busy: Default::default(),
            events,
        })
    }

    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    pub async fn is_polling(&self) -> bool {
        self.inner.lock().await.polling.is_polling()
    }

    pub async fn last_status(&self) -> SystemStatus {
        self.inner.lock().await.status
    }

    /// Activity log snapshot, newest first.
    pub async fn activity(&self) -> Vec<LogEntry> {
        self.inner.lock().await.activity.entries().cloned().collect()
    }

    pub fn is_busy(&self, action: Action) -> bool {
        self.busy[action.index()].load(Ordering::Acquire)
    }

    /// Restores a persisted session, if any, without re-authenticating. The
    /// stored token is trusted until the server rejects it.
    pub async fn start(self: &Arc<Self>) {
        let restored = match self.store.load() {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "failed to load persisted session");
                None
            }
        };

        let mut state = self.inner.lock().await;
        self.record(&mut state, "System started and ready", Severity::Info);

        match restored {
            Some(session) if state.session.is_none() => {
                let username = session.username.clone();
                let epoch = self.enter_session(&mut state, session);
                drop(state);
                info!(%username, "restored persisted session");
                self.emit(ControllerEvent::SessionChanged(SessionView::LoggedIn {
                    username,
                }));
                self.spawn_refresh(epoch, Duration::ZERO);
            }
            Some(_) => {}
            None => {
                drop(state);
                self.emit(ControllerEvent::SessionChanged(SessionView::LoggedOut));
            }
        }
    }

    pub async fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
    ) -> Result<(), ControllerError> {
        let epoch = {
            let state = self.inner.lock().await;
            if let Some(session) = &state.session {
                return Err(ControllerError::AlreadyLoggedIn {
                    username: session.username.clone(),
                });
            }
            state.epoch
        };
        let _busy = self.acquire_busy(Action::Login)?;

        let result = self.api.login(username, password).await;

        let mut state = self.inner.lock().await;
        if state.epoch != epoch || state.session.is_some() {
            debug!("discarding stale login reply");
            return Ok(());
        }

        match result {
            Ok(grant) => {
                let session = Session::new(grant.token, grant.username);
                let username = session.username.clone();
                let epoch = self.enter_session(&mut state, session.clone());
                self.release_and_persist(state, StoreWrite::Save(session))
                    .await;

                info!(%username, "signed in");
                self.emit(ControllerEvent::SessionChanged(SessionView::LoggedIn {
                    username,
                }));
                self.toast("Login successful! Welcome.", Severity::Success);
                self.spawn_refresh(epoch, Duration::ZERO);
            }
            Err(ApiFailure::Network { reason }) => {
                warn!(%reason, "login request did not reach the server");
                self.toast(CONNECT_FAILURE_MESSAGE, Severity::Error);
            }
            Err(ApiFailure::AuthFailed { message } | ApiFailure::Failed { message }) => {
                info!(%message, "login rejected");
                self.toast(message, Severity::Error);
            }
            Err(ApiFailure::Unauthorized) => {
                self.toast("Login failed", Severity::Error);
            }
        }
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ControllerError> {
        let mut state = self.inner.lock().await;
        if !self.end_session(&mut state) {
            return Err(ControllerError::NotLoggedIn);
        }
        self.release_and_persist(state, StoreWrite::Clear).await;

        self.emit(ControllerEvent::SessionChanged(SessionView::LoggedOut));
        self.toast("Logged out", Severity::Success);
        Ok(())
    }

    pub async fn trigger_protocol(self: &Arc<Self>, source: &str) -> Result<(), ControllerError> {
        let (epoch, token) = self.current_session().await?;
        let _busy = self.acquire_busy(Action::TriggerProtocol)?;
        let source = resolve_sensor_source(source).to_string();

        let result = self.api.trigger_protocol(&source, &token).await;

        let mut state = self.inner.lock().await;
        if state.epoch != epoch {
            debug!("discarding stale trigger reply");
            return Ok(());
        }

        match result {
            Ok(receipt) => {
                info!(%source, acting_user = %receipt.acting_user, "fire protocol started");
                self.toast("Fire protocol started!", Severity::Warning);
                self.record(
                    &mut state,
                    format!("Fire protocol started - Source: {source}"),
                    Severity::Warning,
                );
                self.record(
                    &mut state,
                    format!("Performed by: {}", receipt.acting_user),
                    Severity::Info,
                );
                if let Some(message) = receipt.alarm_message {
                    self.record(&mut state, format!("Alarm: {message}"), Severity::Success);
                }
                if let Some(message) = receipt.sprinkler_message {
                    self.record(&mut state, format!("Sprinkler: {message}"), Severity::Success);
                }
                drop(state);
                self.spawn_refresh(epoch, self.settings.refresh_delay);
            }
            Err(ApiFailure::Unauthorized) => {
                warn!("trigger rejected as unauthorized; ending session");
                self.end_session(&mut state);
                self.release_and_persist(state, StoreWrite::Clear).await;
                self.emit(ControllerEvent::SessionChanged(SessionView::LoggedOut));
                self.toast(SESSION_EXPIRED_MESSAGE, Severity::Error);
            }
            Err(failure) => self.record_action_failure(&mut state, failure),
        }
        Ok(())
    }

    /// The reset endpoint is called without a token even though the action is
    /// only offered to a signed-in operator.
    pub async fn reset_system(self: &Arc<Self>) -> Result<(), ControllerError> {
        let (epoch, _) = self.current_session().await?;
        let _busy = self.acquire_busy(Action::Reset)?;

        let result = self.api.reset_system().await;

        let mut state = self.inner.lock().await;
        if state.epoch != epoch {
            debug!("discarding stale reset reply");
            return Ok(());
        }

        match result {
            Ok(()) => {
                info!("system reset");
                self.toast("System reset", Severity::Success);
                self.record(
                    &mut state,
                    "System reset - all components ready",
                    Severity::Success,
                );
                drop(state);
                self.spawn_refresh(epoch, self.settings.refresh_delay);
            }
            Err(failure) => self.record_action_failure(&mut state, failure),
        }
        Ok(())
    }

    /// Fetches status right away instead of waiting for the next tick.
    pub async fn refresh_now(&self) -> Result<(), ControllerError> {
        let (epoch, _) = self.current_session().await?;
        self.refresh_for_epoch(epoch).await;
        Ok(())
    }

    async fn current_session(&self) -> Result<(u64, String), ControllerError> {
        let state = self.inner.lock().await;
        let session = state.session.as_ref().ok_or(ControllerError::NotLoggedIn)?;
        Ok((state.epoch, session.token.clone()))
    }

    fn acquire_busy(&self, action: Action) -> Result<BusyGuard<'_>, ControllerError> {
        self.busy[action.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ControllerError::Busy(action))?;
        self.emit(ControllerEvent::BusyChanged { action, busy: true });
        Ok(BusyGuard {
            controller: self,
            action,
        })
    }

    /// Installs `session` and starts polling under the same lock, so the two
    /// can never be observed apart. Returns the new epoch.
    fn enter_session(self: &Arc<Self>, state: &mut ControllerState, session: Session) -> u64 {
        state.epoch += 1;
        let epoch = state.epoch;
        state.session = Some(session);

        let controller = Arc::downgrade(self);
        state.polling.start(self.settings.poll_interval, move || {
            let controller = controller.clone();
            async move {
                if let Some(controller) = controller.upgrade() {
                    controller.refresh_for_epoch(epoch).await;
                }
            }
        });
        epoch
    }

    /// Drops the session, stops polling and forgets its status. Returns false
    /// when there was no session to end. The caller clears the store.
    fn end_session(&self, state: &mut ControllerState) -> bool {
        let Some(session) = state.session.take() else {
            return false;
        };
        state.epoch += 1;
        state.polling.stop();
        state.status = SystemStatus::default();
        info!(username = %session.username, "session ended");
        true
    }

    /// Store failures are logged only; the transition already happened.
    async fn release_and_persist(
        &self,
        state: MutexGuard<'_, ControllerState>,
        write: StoreWrite,
    ) {
        let _persist = self.persist.lock().await;
        drop(state);
        match write {
            StoreWrite::Save(session) => {
                if let Err(err) = self.store.save(&session) {
                    warn!(error = %err, "failed to persist session");
                }
            }
            StoreWrite::Clear => {
                if let Err(err) = self.store.clear() {
                    warn!(error = %err, "failed to clear persisted session");
                }
            }
        }
    }

    fn spawn_refresh(self: &Arc<Self>, epoch: u64, delay: Duration) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            controller.refresh_for_epoch(epoch).await;
        });
    }

    async fn refresh_for_epoch(&self, epoch: u64) -> bool {
        let result = self.api.fetch_status().await;

        let mut state = self.inner.lock().await;
        if state.epoch != epoch || state.session.is_none() {
            debug!("discarding stale status reply");
            return false;
        }

        match result {
            Ok(report) => {
                state.status = state.status.merged(report.alarm, report.sprinkler);
                self.emit(ControllerEvent::StatusUpdated(state.status));
                true
            }
            Err(err) => {
                debug!(error = %err, "status refresh failed");
                false
            }
        }
    }

    fn record_action_failure(&self, state: &mut ControllerState, failure: ApiFailure) {
        match failure {
            ApiFailure::Network { reason } => {
                warn!(%reason, "action request did not reach the server");
                self.toast(SERVER_UNREACHABLE_TOAST, Severity::Error);
                self.record(state, SERVER_UNREACHABLE_LOG, Severity::Error);
            }
            ApiFailure::Failed { message } | ApiFailure::AuthFailed { message } => {
                warn!(%message, "server rejected action");
                self.toast(message.clone(), Severity::Error);
                self.record(state, format!("Error: {message}"), Severity::Error);
            }
            ApiFailure::Unauthorized => {
                self.toast("Operation failed", Severity::Error);
                self.record(state, "Error: unauthorized", Severity::Error);
            }
        }
    }

    fn record(&self, state: &mut ControllerState, message: impl Into<String>, severity: Severity) {
        let entry = state.activity.record(message, severity);
        self.emit(ControllerEvent::LogEntry(entry));
    }

    fn toast(&self, message: impl Into<String>, severity: Severity) {
        self.emit(ControllerEvent::Toast {
            message: message.into(),
            severity,
        });
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
