use super::*;
use std::sync::{atomic::AtomicUsize, Mutex as StdMutex};

use async_trait::async_trait;
use shared::domain::SubsystemState;
use tokio::{sync::broadcast::error::TryRecvError, time};

use crate::{
    session_store::MemorySessionStore,
    status_client::{LoginGrant, ProtocolReceipt, StatusReport},
};

struct FakeApi {
    login_result: StdMutex<Result<LoginGrant, ApiFailure>>,
    trigger_result: StdMutex<Result<ProtocolReceipt, ApiFailure>>,
    reset_result: StdMutex<Result<(), ApiFailure>>,
    status_report: StdMutex<StatusReport>,
    status_delay: StdMutex<Duration>,
    login_calls: AtomicUsize,
    trigger_calls: StdMutex<Vec<(String, String)>>,
    reset_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            login_result: StdMutex::new(Ok(LoginGrant {
                token: "T1".into(),
                username: "alice".into(),
            })),
            trigger_result: StdMutex::new(Ok(ProtocolReceipt {
                acting_user: "alice".into(),
                alarm_message: Some("Alarm activated".into()),
                sprinkler_message: Some("Water flow started".into()),
            })),
            reset_result: StdMutex::new(Ok(())),
            status_report: StdMutex::new(StatusReport {
                alarm: Some(SubsystemState::Active),
                sprinkler: Some(SubsystemState::Active),
            }),
            status_delay: StdMutex::new(Duration::ZERO),
            login_calls: AtomicUsize::new(0),
            trigger_calls: StdMutex::new(Vec::new()),
            reset_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        })
    }

    fn fail_login(&self, failure: ApiFailure) {
        *self.login_result.lock().expect("lock") = Err(failure);
    }

    fn fail_trigger(&self, failure: ApiFailure) {
        *self.trigger_result.lock().expect("lock") = Err(failure);
    }

    fn fail_reset(&self, failure: ApiFailure) {
        *self.reset_result.lock().expect("lock") = Err(failure);
    }

    fn delay_status(&self, delay: Duration) {
        *self.status_delay.lock().expect("lock") = delay;
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusApi for FakeApi {
    async fn login(&self, _username: &str, _password: &str) -> Result<LoginGrant, ApiFailure> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_result.lock().expect("lock").clone()
    }

    async fn trigger_protocol(
        &self,
        source: &str,
        token: &str,
    ) -> Result<ProtocolReceipt, ApiFailure> {
        self.trigger_calls
            .lock()
            .expect("lock")
            .push((source.to_string(), token.to_string()));
        self.trigger_result.lock().expect("lock").clone()
    }

    async fn reset_system(&self) -> Result<(), ApiFailure> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        self.reset_result.lock().expect("lock").clone()
    }

    async fn fetch_status(&self) -> Result<StatusReport, ApiFailure> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().expect("lock");
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        Ok(*self.status_report.lock().expect("lock"))
    }
}

fn controller_with(
    api: &Arc<FakeApi>,
    store: &Arc<MemorySessionStore>,
) -> Arc<SessionController> {
    SessionController::new(api.clone(), store.clone(), ControllerSettings::default())
}

/// Lets spawned tasks that are already runnable make progress.
async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}

fn drain(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
        }
    }
}

fn toasts(events: &[ControllerEvent]) -> Vec<(String, Severity)> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::Toast { message, severity } => Some((message.clone(), *severity)),
            _ => None,
        })
        .collect()
}

fn log_messages(events: &[ControllerEvent]) -> Vec<(String, Severity)> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::LogEntry(entry) => Some((entry.message.clone(), entry.severity)),
            _ => None,
        })
        .collect()
}

async fn logged_in_controller(
    api: &Arc<FakeApi>,
    store: &Arc<MemorySessionStore>,
) -> Arc<SessionController> {
    let controller = controller_with(api, store);
    controller.login("alice", "pw").await.expect("login");
    settle().await;
    controller
}

#[tokio::test(start_paused = true)]
async fn login_persists_session_fetches_once_and_polls_every_interval() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    controller.login("alice", "pw").await.expect("login");
    settle().await;

    assert_eq!(controller.session().await, Some(Session::new("T1", "alice")));
    assert_eq!(store.load().expect("load"), Some(Session::new("T1", "alice")));
    assert!(controller.is_polling().await);
    assert_eq!(api.status_calls(), 1, "immediate fetch after login");

    let events = drain(&mut rx);
    assert!(events.contains(&ControllerEvent::SessionChanged(SessionView::LoggedIn {
        username: "alice".into(),
    })));
    assert_eq!(
        toasts(&events),
        vec![("Login successful! Welcome.".to_string(), Severity::Success)]
    );
    assert!(events.contains(&ControllerEvent::StatusUpdated(SystemStatus {
        alarm: SubsystemState::Active,
        sprinkler: SubsystemState::Active,
    })));

    time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(api.status_calls(), 1);
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_login_persists_nothing() {
    let api = FakeApi::new();
    api.fail_login(ApiFailure::auth_failed("Invalid username or password"));
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    controller.login("alice", "wrong").await.expect("login call");
    settle().await;

    assert_eq!(controller.session().await, None);
    assert_eq!(store.load().expect("load"), None);
    assert!(!controller.is_polling().await);
    assert_eq!(api.status_calls(), 0);
    assert_eq!(
        toasts(&drain(&mut rx)),
        vec![("Invalid username or password".to_string(), Severity::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_on_login_surfaces_connectivity_message() {
    let api = FakeApi::new();
    api.fail_login(ApiFailure::network("connection refused"));
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    controller.login("alice", "pw").await.expect("login call");

    assert_eq!(controller.session().await, None);
    assert_eq!(
        toasts(&drain(&mut rx)),
        vec![(CONNECT_FAILURE_MESSAGE.to_string(), Severity::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn polling_follows_session_across_login_logout_cycles() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);

    for _ in 0..3 {
        assert!(!controller.is_polling().await);
        assert!(controller.session().await.is_none());

        controller.login("alice", "pw").await.expect("login");
        assert!(controller.is_polling().await);
        assert!(controller.session().await.is_some());

        controller.logout().await.expect("logout");
    }
    assert!(!controller.is_polling().await);
    assert_eq!(store.load().expect("load"), None);
}

#[tokio::test(start_paused = true)]
async fn no_status_fetch_after_logout() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    let mut rx = controller.subscribe_events();

    controller.logout().await.expect("logout");
    let calls_at_logout = api.status_calls();

    time::sleep(controller.settings().poll_interval * 2).await;
    assert_eq!(api.status_calls(), calls_at_logout);

    let events = drain(&mut rx);
    assert!(events.contains(&ControllerEvent::SessionChanged(SessionView::LoggedOut)));
    assert_eq!(
        toasts(&events),
        vec![("Logged out".to_string(), Severity::Success)]
    );
}

#[tokio::test(start_paused = true)]
async fn unauthorized_trigger_forces_logout_with_one_expired_notice() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    api.fail_trigger(ApiFailure::Unauthorized);
    let mut rx = controller.subscribe_events();

    controller
        .trigger_protocol("Sensor_1")
        .await
        .expect("trigger call");

    assert_eq!(controller.session().await, None);
    assert_eq!(store.load().expect("load"), None);
    assert!(!controller.is_polling().await);
    assert_eq!(
        api.trigger_calls.lock().expect("lock").as_slice(),
        &[("Sensor_1".to_string(), "T1".to_string())]
    );

    let events = drain(&mut rx);
    assert_eq!(
        toasts(&events),
        vec![(SESSION_EXPIRED_MESSAGE.to_string(), Severity::Error)]
    );
    assert!(events.contains(&ControllerEvent::SessionChanged(SessionView::LoggedOut)));

    let calls_after = api.status_calls();
    time::sleep(controller.settings().poll_interval * 2).await;
    assert_eq!(api.status_calls(), calls_after);
}

#[tokio::test(start_paused = true)]
async fn successful_trigger_logs_flow_and_refreshes_after_delay() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    let mut rx = controller.subscribe_events();
    let calls_before = api.status_calls();

    controller.trigger_protocol("  ").await.expect("trigger");

    let events = drain(&mut rx);
    assert_eq!(
        log_messages(&events),
        vec![
            (
                format!("Fire protocol started - Source: {DEFAULT_SENSOR}"),
                Severity::Warning
            ),
            ("Performed by: alice".to_string(), Severity::Info),
            ("Alarm: Alarm activated".to_string(), Severity::Success),
            ("Sprinkler: Water flow started".to_string(), Severity::Success),
        ]
    );
    assert_eq!(
        toasts(&events),
        vec![("Fire protocol started!".to_string(), Severity::Warning)]
    );

    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(api.status_calls(), calls_before);
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.status_calls(), calls_before + 1);
}

const DEFAULT_SENSOR: &str = crate::status_client::DEFAULT_SENSOR_SOURCE;

#[tokio::test(start_paused = true)]
async fn failed_trigger_keeps_session_and_logs_once() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    api.fail_trigger(ApiFailure::failed("Alarm is already running."));
    let mut rx = controller.subscribe_events();

    controller.trigger_protocol("Sensor_1").await.expect("trigger");

    assert_eq!(controller.session().await, Some(Session::new("T1", "alice")));
    assert!(controller.is_polling().await);
    let events = drain(&mut rx);
    assert_eq!(
        toasts(&events),
        vec![("Alarm is already running.".to_string(), Severity::Error)]
    );
    assert_eq!(
        log_messages(&events),
        vec![("Error: Alarm is already running.".to_string(), Severity::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn network_failure_on_trigger_is_reported_without_state_change() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    api.fail_trigger(ApiFailure::network("timed out"));
    let mut rx = controller.subscribe_events();

    controller.trigger_protocol("Sensor_1").await.expect("trigger");

    assert!(controller.session().await.is_some());
    let events = drain(&mut rx);
    assert_eq!(toasts(&events).len(), 1);
    assert_eq!(
        log_messages(&events),
        vec![("Server connection error".to_string(), Severity::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn reset_success_logs_once_and_refreshes_after_delay() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    let mut rx = controller.subscribe_events();
    let calls_before = api.status_calls();

    controller.reset_system().await.expect("reset");

    assert_eq!(api.reset_calls.load(Ordering::SeqCst), 1);
    let events = drain(&mut rx);
    assert_eq!(
        log_messages(&events),
        vec![(
            "System reset - all components ready".to_string(),
            Severity::Success
        )]
    );

    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(api.status_calls(), calls_before);
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(api.status_calls(), calls_before + 1);
}

#[tokio::test(start_paused = true)]
async fn failed_reset_only_surfaces_message() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    api.fail_reset(ApiFailure::failed("Reset failed"));
    let mut rx = controller.subscribe_events();
    let calls_before = api.status_calls();

    controller.reset_system().await.expect("reset");
    time::sleep(Duration::from_millis(600)).await;

    assert!(controller.session().await.is_some());
    assert_eq!(api.status_calls(), calls_before);
    let events = drain(&mut rx);
    assert_eq!(
        toasts(&events),
        vec![("Reset failed".to_string(), Severity::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn startup_restores_persisted_session_without_login() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::with_session(Session::new("T0", "bob")));
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    controller.start().await;
    settle().await;

    assert_eq!(controller.session().await, Some(Session::new("T0", "bob")));
    assert!(controller.is_polling().await);
    assert_eq!(api.login_calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.status_calls(), 1);

    let events = drain(&mut rx);
    assert!(events.contains(&ControllerEvent::SessionChanged(SessionView::LoggedIn {
        username: "bob".into(),
    })));
    assert_eq!(
        log_messages(&events),
        vec![("System started and ready".to_string(), Severity::Info)]
    );
}

#[tokio::test(start_paused = true)]
async fn startup_without_persisted_session_stays_logged_out() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    controller.start().await;
    time::sleep(controller.settings().poll_interval * 2).await;

    assert!(!controller.is_polling().await);
    assert_eq!(api.status_calls(), 0);
    assert!(drain(&mut rx).contains(&ControllerEvent::SessionChanged(SessionView::LoggedOut)));
}

#[tokio::test(start_paused = true)]
async fn status_reply_arriving_after_logout_is_discarded() {
    let api = FakeApi::new();
    api.delay_status(Duration::from_millis(1_000));
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);

    controller.login("alice", "pw").await.expect("login");
    settle().await;
    assert_eq!(api.status_calls(), 1, "fetch is in flight");

    controller.logout().await.expect("logout");
    let mut rx = controller.subscribe_events();
    time::sleep(Duration::from_millis(1_500)).await;

    assert!(!drain(&mut rx)
        .iter()
        .any(|event| matches!(event, ControllerEvent::StatusUpdated(_))));
    assert_eq!(controller.last_status().await, SystemStatus::default());
}

#[tokio::test(start_paused = true)]
async fn status_reply_from_previous_session_is_not_applied_to_the_next() {
    let api = FakeApi::new();
    api.delay_status(Duration::from_millis(1_000));
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);

    controller.login("alice", "pw").await.expect("login");
    settle().await;
    controller.logout().await.expect("logout");
    api.delay_status(Duration::from_millis(3_000));
    controller.login("alice", "pw").await.expect("login again");
    let mut rx = controller.subscribe_events();

    // The first session's reply lands at ~1s; the second session's at ~3s.
    time::sleep(Duration::from_millis(1_500)).await;
    assert!(!drain(&mut rx)
        .iter()
        .any(|event| matches!(event, ControllerEvent::StatusUpdated(_))));

    time::sleep(Duration::from_millis(2_000)).await;
    assert!(drain(&mut rx)
        .iter()
        .any(|event| matches!(event, ControllerEvent::StatusUpdated(_))));
}

#[tokio::test(start_paused = true)]
async fn calls_out_of_state_are_rejected_without_network() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);

    assert_eq!(
        controller.trigger_protocol("Sensor_1").await,
        Err(ControllerError::NotLoggedIn)
    );
    assert_eq!(
        controller.reset_system().await,
        Err(ControllerError::NotLoggedIn)
    );
    assert_eq!(controller.logout().await, Err(ControllerError::NotLoggedIn));
    assert!(api.trigger_calls.lock().expect("lock").is_empty());
    assert_eq!(api.reset_calls.load(Ordering::SeqCst), 0);

    controller.login("alice", "pw").await.expect("login");
    assert_eq!(
        controller.login("alice", "pw").await,
        Err(ControllerError::AlreadyLoggedIn {
            username: "alice".into(),
        })
    );
    assert_eq!(api.login_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn busy_flag_is_released_on_every_outcome() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = controller_with(&api, &store);
    let mut rx = controller.subscribe_events();

    api.fail_login(ApiFailure::network("down"));
    controller.login("alice", "pw").await.expect("login call");
    *api.login_result.lock().expect("lock") = Ok(LoginGrant {
        token: "T1".into(),
        username: "alice".into(),
    });
    controller.login("alice", "pw").await.expect("login");
    api.fail_trigger(ApiFailure::failed("nope"));
    controller.trigger_protocol("Sensor_1").await.expect("trigger");
    api.fail_reset(ApiFailure::network("down"));
    controller.reset_system().await.expect("reset");

    let busy: Vec<(Action, bool)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::BusyChanged { action, busy } => Some((action, busy)),
            _ => None,
        })
        .collect();
    assert_eq!(
        busy,
        vec![
            (Action::Login, true),
            (Action::Login, false),
            (Action::Login, true),
            (Action::Login, false),
            (Action::TriggerProtocol, true),
            (Action::TriggerProtocol, false),
            (Action::Reset, true),
            (Action::Reset, false),
        ]
    );
    for action in Action::ALL {
        assert!(!controller.is_busy(action));
    }
}

#[tokio::test(start_paused = true)]
async fn partial_status_report_keeps_previous_subsystem_state() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    assert_eq!(
        controller.last_status().await,
        SystemStatus {
            alarm: SubsystemState::Active,
            sprinkler: SubsystemState::Active,
        }
    );

    *api.status_report.lock().expect("lock") = StatusReport {
        alarm: Some(SubsystemState::Ready),
        sprinkler: None,
    };
    controller.refresh_now().await.expect("refresh");

    assert_eq!(
        controller.last_status().await,
        SystemStatus {
            alarm: SubsystemState::Ready,
            sprinkler: SubsystemState::Active,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn status_does_not_carry_over_into_the_next_session() {
    let api = FakeApi::new();
    let store = Arc::new(MemorySessionStore::new());
    let controller = logged_in_controller(&api, &store).await;
    assert_eq!(
        controller.last_status().await,
        SystemStatus {
            alarm: SubsystemState::Active,
            sprinkler: SubsystemState::Active,
        }
    );

    controller.logout().await.expect("logout");
    assert_eq!(controller.last_status().await, SystemStatus::default());

    *api.login_result.lock().expect("lock") = Ok(LoginGrant {
        token: "T2".into(),
        username: "bob".into(),
    });
    *api.status_report.lock().expect("lock") = StatusReport {
        alarm: Some(SubsystemState::Ready),
        sprinkler: None,
    };
    controller.login("bob", "pw").await.expect("login");
    settle().await;

    assert_eq!(
        controller.last_status().await,
        SystemStatus {
            alarm: SubsystemState::Ready,
            sprinkler: SubsystemState::Ready,
        }
    );
}

struct FailingStore;

impl SessionStore for FailingStore {
    fn load(&self) -> anyhow::Result<Option<Session>> {
        Err(anyhow::anyhow!("disk unavailable"))
    }

    fn save(&self, _session: &Session) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }

    fn clear(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("read-only file system"))
    }
}

#[tokio::test(start_paused = true)]
async fn store_failures_do_not_block_session_transitions() {
    let api = FakeApi::new();
    let controller =
        SessionController::new(api.clone(), Arc::new(FailingStore), ControllerSettings::default());
    let mut rx = controller.subscribe_events();

    controller.start().await;
    assert_eq!(controller.session().await, None);

    controller.login("alice", "pw").await.expect("login");
    settle().await;
    assert_eq!(controller.session().await, Some(Session::new("T1", "alice")));
    assert!(controller.is_polling().await);

    controller.logout().await.expect("logout");
    assert_eq!(controller.session().await, None);
    assert!(!controller.is_polling().await);

    let events = drain(&mut rx);
    assert_eq!(
        toasts(&events),
        vec![
            ("Login successful! Welcome.".to_string(), Severity::Success),
            ("Logged out".to_string(), Severity::Success),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn forced_logout_survives_a_failing_store() {
    let api = FakeApi::new();
    let controller =
        SessionController::new(api.clone(), Arc::new(FailingStore), ControllerSettings::default());
    controller.login("alice", "pw").await.expect("login");
    settle().await;

    api.fail_trigger(ApiFailure::Unauthorized);
    controller.trigger_protocol("Sensor_1").await.expect("trigger");

    assert_eq!(controller.session().await, None);
    assert!(!controller.is_polling().await);
}
