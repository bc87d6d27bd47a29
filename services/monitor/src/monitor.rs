//! Runtime orchestration: one [`Monitor`] owns the ingestion channel, the
//! read aggregator, the case book, the device client and the two periodic
//! timers, and answers every question the control API asks.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tag_core::{ReadSet, Reconciliation, TagId, read_set_from, reconcile};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::case_book::{CaseBook, CaseBookError};
use crate::channel::{
    ChannelEndpoints, ChannelError, EventChannel, HealthSnapshot, MessageHandler,
};
use crate::config::MonitorConfig;
use crate::devices::{Antenna, DeviceClient, DeviceError, Reader, ReaderAction, ReaderStatus};
use crate::reads::{
    EventLogEntry, ReadAggregator, SharedAggregator, TagReadRecord, lock_aggregator,
};
use crate::store::{KvStore, StoreError};
use crate::timers::TimerSlot;
use crate::ui_events::MonitorUiEvent;

/// Key-value entry that overrides the configured upstream base URL.
pub const BASE_URL_KEY: &str = "upstream.base_url";

/// Device command that resets a reader's antennas rather than the reader.
pub const RESET_ANTENNAS_COMMAND: &str = "reset-antennas";

const UI_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cases(#[from] CaseBookError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub connected: bool,
    pub health: HealthSnapshot,
    pub reader_id: Option<String>,
    pub base_url: String,
    pub events_received: u64,
    pub total_reads: u64,
    pub unique_tags: usize,
    pub event_log_len: usize,
    pub cases: usize,
    /// True while reconciliation runs against a simulated read set.
    pub simulation: bool,
    pub reader_status: Option<ReaderStatus>,
}

pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn KvStore>,
    aggregator: SharedAggregator,
    cases: CaseBook,
    channel: EventChannel,
    /// Held for the whole of `connect` and `disconnect` so the channel, the
    /// timers and the reader id always change together.
    lifecycle: Mutex<()>,
    devices: RwLock<DeviceClient>,
    reader_id: Mutex<Option<String>>,
    reader_status: Mutex<Option<ReaderStatus>>,
    simulation: RwLock<Option<ReadSet>>,
    status_poll: TimerSlot,
    refresh: TimerSlot,
    ui_tx: broadcast::Sender<MonitorUiEvent>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, store: Arc<dyn KvStore>) -> Result<Self, MonitorError> {
        let aggregator: SharedAggregator = Arc::new(Mutex::new(ReadAggregator::new()));
        let handler: MessageHandler = {
            let aggregator = Arc::clone(&aggregator);
            Arc::new(move |raw: &str| {
                lock_aggregator(&aggregator).on_message(raw);
            })
        };

        let cases = CaseBook::load(Arc::clone(&store))?;
        let channel = EventChannel::new(handler)?;
        let stored_base = store.get(BASE_URL_KEY)?;
        let base_url = stored_base.unwrap_or_else(|| config.upstream.base_url.clone());
        let devices = DeviceClient::new(device_base(&config, &base_url))?;
        let (ui_tx, _) = broadcast::channel(UI_CHANNEL_CAPACITY);

        info!(cases = cases.len(), base_url = %base_url, "monitor ready");
        Ok(Self {
            config,
            store,
            aggregator,
            cases,
            channel,
            lifecycle: Mutex::new(()),
            devices: RwLock::new(devices),
            reader_id: Mutex::new(None),
            reader_status: Mutex::new(None),
            simulation: RwLock::new(None),
            status_poll: TimerSlot::new("status_poll"),
            refresh: TimerSlot::new("refresh"),
            ui_tx,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn cases(&self) -> &CaseBook {
        &self.cases
    }

    pub fn subscribe_ui(&self) -> broadcast::Receiver<MonitorUiEvent> {
        self.ui_tx.subscribe()
    }

    /// Forward every change of the merged connected signal to UI
    /// subscribers. The task ends when the monitor is dropped.
    pub fn forward_connection_changes(&self) -> JoinHandle<()> {
        let mut rx = self.channel.subscribe();
        let ui_tx = self.ui_tx.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let connected = *rx.borrow_and_update();
                info!(connected, "connection state changed");
                let _ = ui_tx.send(MonitorUiEvent::ConnectionChanged { connected });
            }
        })
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Open both transports, replacing any existing connection, and start
    /// the refresh tick. With a reader id (given, or the configured default)
    /// the reader's status is polled as well.
    pub fn connect(self: &Arc<Self>, reader_id: Option<&str>) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let reader_id = reader_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned)
            .or_else(|| self.config.reader_id.clone());

        let endpoints = ChannelEndpoints {
            base_url: self.base_url(),
            sse_path: self.config.upstream.sse_path.clone(),
            ws_path: self.config.upstream.ws_path.clone(),
        };
        info!(base_url = %endpoints.base_url, reader_id = ?reader_id, "connecting");
        self.channel.connect(&endpoints, reader_id.as_deref());

        let weak = Arc::downgrade(self);
        self.refresh
            .schedule(Duration::from_millis(self.config.control.refresh_ms), move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(monitor) = weak.upgrade() {
                        monitor.publish_snapshot();
                    }
                }
            });

        self.set_reader_status(None);
        match &reader_id {
            Some(reader) => {
                let weak = Arc::downgrade(self);
                let reader = reader.clone();
                let period = Duration::from_secs(self.config.device.status_poll_secs);
                self.status_poll.schedule(period, move || {
                    let weak = Weak::clone(&weak);
                    let reader = reader.clone();
                    async move {
                        if let Some(monitor) = weak.upgrade() {
                            monitor.poll_reader_status(&reader).await;
                        }
                    }
                });
            }
            None => {
                self.status_poll.cancel();
            }
        }

        if let Ok(mut current) = self.reader_id.lock() {
            *current = reader_id;
        }
    }

    /// Close both transports and stop both timers. Idempotent.
    pub fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.channel.disconnect();
        self.status_poll.cancel();
        self.refresh.cancel();
        if let Ok(mut current) = self.reader_id.lock() {
            *current = None;
        }
        self.set_reader_status(None);
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn timers_active(&self) -> (bool, bool) {
        (self.status_poll.is_active(), self.refresh.is_active())
    }

    pub fn reader_id(&self) -> Option<String> {
        self.reader_id.lock().ok().and_then(|r| r.clone())
    }

    // -----------------------------------------------------------------------
    // Upstream address
    // -----------------------------------------------------------------------

    /// The stored override, else the configured base URL.
    pub fn base_url(&self) -> String {
        match self.store.get(BASE_URL_KEY) {
            Ok(Some(url)) => url,
            Ok(None) => self.config.upstream.base_url.clone(),
            Err(e) => {
                warn!(error = %e, "cannot read stored base URL, using configured one");
                self.config.upstream.base_url.clone()
            }
        }
    }

    /// Persist a new upstream base URL. Takes effect on the next connect.
    pub fn set_base_url(&self, url: &str) -> Result<String, MonitorError> {
        let url = url.trim();
        let parsed =
            reqwest::Url::parse(url).map_err(|_| MonitorError::InvalidBaseUrl(url.to_owned()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
            return Err(MonitorError::InvalidBaseUrl(url.to_owned()));
        }

        let devices = DeviceClient::new(device_base(&self.config, url))?;
        self.store.set(BASE_URL_KEY, url)?;
        if let Ok(mut current) = self.devices.write() {
            *current = devices;
        }
        info!(base_url = %url, "base URL updated");
        Ok(url.to_owned())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn reads(&self) -> Vec<TagReadRecord> {
        lock_aggregator(&self.aggregator).records()
    }

    pub fn events(&self) -> Vec<EventLogEntry> {
        lock_aggregator(&self.aggregator).event_log()
    }

    pub fn clear_reads(&self) {
        lock_aggregator(&self.aggregator).clear_tags();
        info!("read table cleared");
    }

    pub fn clear_events(&self) {
        lock_aggregator(&self.aggregator).clear();
        info!("event log cleared");
    }

    /// Feed one raw message as if it had arrived on a transport.
    pub fn ingest(&self, raw: &str) -> Vec<TagId> {
        lock_aggregator(&self.aggregator).on_message(raw)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Replace the live read set with `tags` until cleared. Returns the
    /// number of distinct tags in the simulated set.
    pub fn set_simulation<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = read_set_from(tags);
        let len = set.len();
        if let Ok(mut sim) = self.simulation.write() {
            *sim = Some(set);
        }
        info!(tags = len, "simulation enabled");
        len
    }

    /// Return to the live read set. Returns whether a simulation was active.
    pub fn clear_simulation(&self) -> bool {
        let was_active = self
            .simulation
            .write()
            .map(|mut sim| sim.take().is_some())
            .unwrap_or(false);
        if was_active {
            info!("simulation cleared");
        }
        was_active
    }

    pub fn simulation_active(&self) -> bool {
        self.simulation
            .read()
            .map(|sim| sim.is_some())
            .unwrap_or(false)
    }

    /// The simulated set when one is active, else the live reads.
    pub fn read_set(&self) -> ReadSet {
        if let Ok(sim) = self.simulation.read()
            && let Some(set) = sim.as_ref()
        {
            return set.clone();
        }
        lock_aggregator(&self.aggregator).read_set()
    }

    pub fn reconciliation(&self) -> Reconciliation {
        reconcile(&self.cases.list(), &self.read_set())
    }

    pub fn status(&self) -> MonitorStatus {
        let (events_received, total_reads, unique_tags, event_log_len) = {
            let a = lock_aggregator(&self.aggregator);
            (
                a.events_received(),
                a.total_reads(),
                a.unique_tags(),
                a.event_log_len(),
            )
        };
        let health = self.channel.health();
        MonitorStatus {
            connected: health.connected,
            health,
            reader_id: self.reader_id(),
            base_url: self.base_url(),
            events_received,
            total_reads,
            unique_tags,
            event_log_len,
            cases: self.cases.len(),
            simulation: self.simulation_active(),
            reader_status: self.reader_status(),
        }
    }

    /// Broadcast the current status and reconciliation to UI subscribers.
    pub fn publish_snapshot(&self) {
        let event = MonitorUiEvent::Snapshot {
            status: self.status(),
            reconciliation: self.reconciliation(),
        };
        let _ = self.ui_tx.send(event);
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    fn devices(&self) -> Option<DeviceClient> {
        self.devices.read().ok().map(|d| d.clone())
    }

    fn device_client(&self) -> Result<DeviceClient, MonitorError> {
        self.devices()
            .ok_or_else(|| MonitorError::InvalidBaseUrl("device client unavailable".to_owned()))
    }

    pub async fn list_readers(&self) -> Result<Vec<Reader>, MonitorError> {
        Ok(self.device_client()?.list_readers().await?)
    }

    pub async fn list_antennas(&self) -> Result<Vec<Antenna>, MonitorError> {
        Ok(self.device_client()?.list_antennas().await?)
    }

    /// Run a device command (`start`, `stop`, `reset`, `reboot` or
    /// [`RESET_ANTENNAS_COMMAND`]) against one reader.
    pub async fn reader_command(&self, reader_id: &str, command: &str) -> Result<(), MonitorError> {
        let devices = self.device_client()?;
        if command.eq_ignore_ascii_case(RESET_ANTENNAS_COMMAND) {
            devices.reset_antennas(reader_id).await?;
        } else {
            let action = ReaderAction::try_from(command)?;
            devices.reader_action(reader_id, action).await?;
        }
        info!(reader_id, command, "reader command sent");
        Ok(())
    }

    pub fn reader_status(&self) -> Option<ReaderStatus> {
        self.reader_status.lock().ok().and_then(|s| *s)
    }

    fn set_reader_status(&self, status: Option<ReaderStatus>) -> Option<ReaderStatus> {
        self.reader_status
            .lock()
            .ok()
            .and_then(|mut current| std::mem::replace(&mut *current, status))
    }

    /// One status poll. Failures are logged and leave the last status alone.
    pub async fn poll_reader_status(&self, reader_id: &str) {
        let Some(devices) = self.devices() else {
            return;
        };
        match devices.reader_status(reader_id).await {
            Ok(status) => {
                let previous = self.set_reader_status(Some(status));
                if previous != Some(status) {
                    info!(
                        reader_id,
                        connected = status.connected,
                        reading = status.reading,
                        "reader status changed"
                    );
                }
            }
            Err(e) => warn!(reader_id, error = %e, "reader status poll failed"),
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn device_base<'a>(config: &'a MonitorConfig, upstream_base: &'a str) -> &'a str {
    config
        .device
        .api_base_url
        .as_deref()
        .unwrap_or(upstream_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::store::MemoryStore;
    use tag_core::CaseStatus;

    fn config() -> MonitorConfig {
        load_config_from_str(
            r#"
schema_version = 1

[upstream]
base_url = "http://127.0.0.1:9"

[control]
refresh_ms = 500
"#,
        )
        .unwrap()
    }

    fn monitor() -> Arc<Monitor> {
        Arc::new(Monitor::new(config(), Arc::new(MemoryStore::new())).unwrap())
    }

    #[test]
    fn stored_base_url_overrides_config() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store.set(BASE_URL_KEY, "http://gw.stored:8080").unwrap();
        let monitor = Monitor::new(config(), store).unwrap();
        assert_eq!(monitor.base_url(), "http://gw.stored:8080");
    }

    #[test]
    fn set_base_url_validates_and_persists() {
        let monitor = monitor();
        assert_eq!(monitor.base_url(), "http://127.0.0.1:9");
        assert!(matches!(
            monitor.set_base_url("gw.local"),
            Err(MonitorError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            monitor.set_base_url("ftp://gw.local"),
            Err(MonitorError::InvalidBaseUrl(_))
        ));
        assert_eq!(monitor.base_url(), "http://127.0.0.1:9");

        assert!(matches!(
            monitor.set_base_url("wss://gw.local"),
            Err(MonitorError::InvalidBaseUrl(_))
        ));
        monitor.set_base_url(" https://gw.local/rfid ").unwrap();
        assert_eq!(monitor.base_url(), "https://gw.local/rfid");
    }

    #[test]
    fn simulation_replaces_live_reads_until_cleared() {
        let monitor = monitor();
        monitor.cases().add("MASTER01", &["PROD0001".to_owned()]).unwrap();
        monitor.ingest(r#"{"epc":"MASTER01"}"#);
        assert_eq!(monitor.reconciliation().status, CaseStatus::Incomplete);

        assert_eq!(monitor.set_simulation(["MASTER01", " PROD0001 ", ""]), 2);
        assert!(monitor.simulation_active());
        assert_eq!(monitor.reconciliation().status, CaseStatus::Complete);
        assert!(monitor.status().simulation);

        assert!(monitor.clear_simulation());
        assert!(!monitor.clear_simulation());
        assert_eq!(monitor.reconciliation().status, CaseStatus::Incomplete);
    }

    #[test]
    fn clearing_reads_and_events_is_independent() {
        let monitor = monitor();
        monitor.ingest(r#"{"epc":"E2801160600002084E2C0001"}"#);
        monitor.ingest("not json");

        let status = monitor.status();
        assert_eq!(status.events_received, 2);
        assert_eq!(status.total_reads, 2);
        assert_eq!(status.unique_tags, 2);

        monitor.clear_events();
        assert!(monitor.events().is_empty());
        assert_eq!(monitor.reads().len(), 2);

        monitor.clear_reads();
        let status = monitor.status();
        assert_eq!(status.total_reads, 0);
        assert_eq!(status.unique_tags, 0);
        assert_eq!(status.events_received, 2);
    }

    #[tokio::test]
    async fn snapshot_is_broadcast_to_subscribers() {
        let monitor = monitor();
        let mut rx = monitor.subscribe_ui();
        monitor.publish_snapshot();
        match rx.recv().await.unwrap() {
            MonitorUiEvent::Snapshot { status, reconciliation } => {
                assert!(!status.connected);
                assert_eq!(reconciliation.status, CaseStatus::Complete);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_reader_command_is_rejected_before_any_request() {
        let monitor = monitor();
        let err = monitor.reader_command("R1", "explode").await.unwrap_err();
        assert!(matches!(err, MonitorError::Device(DeviceError::UnknownAction(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_both_timers() {
        let monitor = monitor();
        monitor.connect(Some("R1"));
        assert_eq!(monitor.timers_active(), (true, true));
        assert_eq!(monitor.reader_id().as_deref(), Some("R1"));

        monitor.disconnect();
        assert_eq!(monitor.timers_active(), (false, false));
        assert_eq!(monitor.reader_id(), None);
        assert!(!monitor.is_connected());

        monitor.disconnect();
        assert_eq!(monitor.timers_active(), (false, false));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_without_reader_skips_status_poll() {
        let monitor = monitor();
        monitor.connect(Some("R1"));
        monitor.connect(None);
        assert_eq!(monitor.timers_active(), (false, true));
        monitor.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_tick_publishes_snapshots() {
        let monitor = monitor();
        let mut rx = monitor.subscribe_ui();
        monitor.connect(None);

        tokio::time::advance(Duration::from_millis(500)).await;
        let event = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(event @ MonitorUiEvent::Snapshot { .. }) = rx.recv().await {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.name(), "snapshot");
        monitor.disconnect();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connect_and_disconnect_never_tear_state() {
        let monitor = monitor();
        for _ in 0..300 {
            let connecting = Arc::clone(&monitor);
            let disconnecting = Arc::clone(&monitor);
            let a = tokio::task::spawn_blocking(move || connecting.connect(Some("R1")));
            let b = tokio::task::spawn_blocking(move || disconnecting.disconnect());
            a.await.unwrap();
            b.await.unwrap();

            let timers = monitor.timers_active();
            let reader = monitor.reader_id();
            let connected_state = timers == (true, true) && reader.as_deref() == Some("R1");
            let disconnected_state = timers == (false, false) && reader.is_none();
            assert!(
                connected_state || disconnected_state,
                "torn state: timers={timers:?} reader_id={reader:?}"
            );
            monitor.disconnect();
        }
    }
}
