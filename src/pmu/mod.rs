//! PMU endpoint (C4): a TCP server that accepts multiple PDC clients, each tracked through its own
//! Connected/Streaming/Disconnecting session state (§4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::EndpointConfig;
use crate::config_store::ConfigurationStore;
use crate::error::Error;
use crate::frame::command::Command;
use crate::frame::configuration::{ConfigVersion, ConfigurationFrame};
use crate::frame::data::DataFrame;
use crate::frame::header::HeaderFrame;
use crate::frame::{self, time, Frame, StreamDecoder};
use crate::transport;

/// Identifies one connected client for the lifetime of its session.
pub type ClientId = u64;

/// A client's position in the per-connection state machine (§4.4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, transmission not yet requested.
    Connected,
    /// `send`/`send_to` with a Data frame reaches this client.
    Streaming,
    /// Draining queued writes before close; no further sends are accepted.
    Disconnecting,
}

struct ClientHandle {
    state: Arc<Mutex<ClientState>>,
    outbound: tokio::sync::mpsc::Sender<Vec<u8>>,
}

/// A callback invoked with a new client's id right after it connects.
pub type ConnectHook = dyn Fn(ClientId) + Send + Sync;

/// A callback invoked with a client's id and its new state on every transition.
pub type StateHook = dyn Fn(ClientId, ClientState) + Send + Sync;

struct Shared {
    pmu_id: u16,
    /// The live, mutable configuration. Routed through [`ConfigurationStore`] rather than a bare
    /// `Option<ConfigurationFrame>` so that [`Pmu::set_configuration`] gets C3's `cfg_count`
    /// bump-after-transmission bookkeeping (§4.3's I5) instead of silently swapping frames.
    config_store: Mutex<ConfigurationStore>,
    header: Mutex<Option<String>>,
    sample: Mutex<Option<DataFrame>>,
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_client_id: AtomicU64,
    endpoint: EndpointConfig,
    /// Invoked with the new client's id right after it's registered. Used by
    /// [`crate::splitter`] to push its cached header/config to each newcomer (§4.6); `None` for
    /// a standalone PMU.
    on_connect: Mutex<Option<Arc<ConnectHook>>>,
    /// Invoked whenever a client's state transitions. Used by [`crate::splitter`] to track how
    /// many downstream clients are streaming, so it can keep the upstream PDC's transmission on
    /// continuously while any are attached (§4.6).
    on_state_change: Mutex<Option<Arc<StateHook>>>,
}

/// A TCP server advertising one PMU's configuration and header, and streaming data frames to
/// whichever clients have requested them.
pub struct Pmu {
    shared: Arc<Shared>,
    bind_addr: String,
    data_rate: i16,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl Pmu {
    /// `station_name` seeds the default single-station configuration (Annex D Table D.2);
    /// override it with [`Pmu::set_configuration`] before [`Pmu::run`].
    pub fn new(pmu_id: u16, ip: &str, port: u16, station_name: &str, data_rate: i16) -> Self {
        let mut store = ConfigurationStore::new(ConfigVersion::V2, pmu_id);
        store.set_data_rate(data_rate);
        if let Some(station) = store.stations().first_mut() {
            let _ = station.set_name(station_name);
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                pmu_id,
                config_store: Mutex::new(store),
                header: Mutex::new(None),
                sample: Mutex::new(None),
                clients: Mutex::new(HashMap::new()),
                next_client_id: AtomicU64::new(0),
                endpoint: EndpointConfig::default(),
                on_connect: Mutex::new(None),
                on_state_change: Mutex::new(None),
            }),
            bind_addr: format!("{ip}:{port}"),
            data_rate,
            stop_tx,
            stop_rx,
            listener_handle: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Replace the advertised configuration. `None` restores the Annex D Table D.2 default for
    /// a single station. Per §4.3's I5, this bumps `cfg_count` if the prior configuration had
    /// already been transmitted to a client.
    pub async fn set_configuration(&self, cfg: Option<ConfigurationFrame>) {
        let mut store = self.shared.config_store.lock().await;
        match cfg {
            Some(frame) => store.set_frame(frame),
            None => *store = ConfigurationStore::new(ConfigVersion::V2, self.shared.pmu_id),
        }
    }

    /// Replace the advertised configuration without touching `cfg_count`. Used by
    /// [`crate::splitter::Splitter`] to mirror an upstream PMU's configuration exactly as
    /// received — the splitter isn't the configuration's author, so it must not layer its own
    /// versioning on top of an already-versioned external frame.
    pub(crate) async fn set_configuration_verbatim(&self, cfg: Option<ConfigurationFrame>) {
        let mut store = self.shared.config_store.lock().await;
        match cfg {
            Some(frame) => store.set_frame_verbatim(frame),
            None => *store = ConfigurationStore::new(ConfigVersion::V2, self.shared.pmu_id),
        }
    }

    pub async fn set_header(&self, text: Option<String>) {
        *self.shared.header.lock().await = text;
    }

    pub fn set_data_rate(&mut self, data_rate: i16) {
        self.data_rate = data_rate;
    }

    /// Store a template data sample. The simulated periodic producer that would tick this out
    /// automatically is an out-of-scope example CLI concern (§1); callers drive actual
    /// broadcasts explicitly through [`Pmu::send`].
    pub async fn set_ieee_data_sample(&self, sample: DataFrame) {
        *self.shared.sample.lock().await = Some(sample);
    }

    /// Bind the listening socket and begin accepting clients.
    pub async fn run(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        *self.local_addr.lock().await = listener.local_addr().ok();
        info!("PMU {} listening on {}", self.shared.pmu_id, self.bind_addr);

        let shared = self.shared.clone();
        let mut stop_rx = self.stop_rx.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let _ = stream.set_nodelay(true);
                                let (read_half, write_half) = stream.into_split();
                                spawn_client(shared.clone(), read_half, write_half, stop_rx.clone());
                                debug!("accepted PDC client from {peer}");
                            }
                            Err(err) => warn!("accept failed: {err}"),
                        }
                    }
                }
            }
        });

        *self.listener_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Broadcast `frame` to every client currently in [`ClientState::Streaming`]. Clients still
    /// in `Connected` are skipped, per §4.4.
    ///
    /// Within one client, frame order equals call order; across clients there is no ordering
    /// guarantee (§4.4).
    pub async fn send(&self, frame: &Frame) -> Result<(), Error> {
        let bytes = self.encode_for_broadcast(frame).await?;
        let clients = self.shared.clients.lock().await;

        for handle in clients.values() {
            if *handle.state.lock().await != ClientState::Streaming {
                continue;
            }
            if handle.outbound.try_send(bytes.clone()).is_err() {
                // Full queue or closed receiver: a write failure to one client must not block
                // sends to others (§4.4). The reader/writer tasks will tear this client down.
                warn!("dropping slow PMU client");
            }
        }
        Ok(())
    }

    /// Unicast `frame` to one client regardless of its streaming state (used to answer
    /// header/config/command requests).
    pub async fn send_to(&self, client_id: ClientId, frame: &Frame) -> Result<(), Error> {
        let bytes = self.encode_for_broadcast(frame).await?;
        let clients = self.shared.clients.lock().await;
        if let Some(handle) = clients.get(&client_id) {
            let _ = handle.outbound.try_send(bytes);
        }
        Ok(())
    }

    async fn encode_for_broadcast(&self, frame: &Frame) -> Result<Vec<u8>, Error> {
        match frame {
            Frame::Data(data) => {
                let store = self.shared.config_store.lock().await;
                let config = store.build(0, 0, 0)?;
                Ok(frame::encode_data_for(data, &config)?)
            }
            other => Ok(frame::encode(other)?),
        }
    }

    /// Snapshot of connected client ids and their current state.
    pub async fn clients(&self) -> Vec<(ClientId, ClientState)> {
        let clients = self.shared.clients.lock().await;
        let mut out = Vec::with_capacity(clients.len());
        for (id, handle) in clients.iter() {
            out.push((*id, *handle.state.lock().await));
        }
        out
    }

    /// Register a callback invoked with each new client's id right after it connects. Used by
    /// [`crate::splitter`] to push a cached header/config without re-encoding it (§4.6).
    pub async fn set_on_connect(&self, hook: Arc<ConnectHook>) {
        *self.shared.on_connect.lock().await = Some(hook);
    }

    /// Register a callback invoked with a client's id and new state on every transition,
    /// including the final transition to [`ClientState::Disconnecting`]. Used by
    /// [`crate::splitter`] to track how many downstream clients are streaming (§4.6).
    pub async fn set_on_state_change(&self, hook: Arc<StateHook>) {
        *self.shared.on_state_change.lock().await = Some(hook);
    }

    /// Broadcast already-encoded bytes verbatim, bypassing the codec entirely. Used by
    /// [`crate::splitter`] to resend upstream frames without re-encoding them (§4.6).
    pub async fn broadcast_raw(&self, bytes: &[u8], only_streaming: bool) {
        let clients = self.shared.clients.lock().await;
        for handle in clients.values() {
            if only_streaming && *handle.state.lock().await != ClientState::Streaming {
                continue;
            }
            let _ = handle.outbound.try_send(bytes.to_vec());
        }
    }

    /// Unicast already-encoded bytes verbatim to one client.
    pub async fn send_to_raw(&self, client_id: ClientId, bytes: &[u8]) {
        let clients = self.shared.clients.lock().await;
        if let Some(handle) = clients.get(&client_id) {
            let _ = handle.outbound.try_send(bytes.to_vec());
        }
    }

    /// Forcibly close one client's connection. Dropping its outbound sender here ends its writer
    /// task, which shuts down the socket's write half; the client's own reader task notices the
    /// closed channel had no bearing on it directly, but the peer seeing its read half close is
    /// what ultimately ends the session. Used by [`crate::splitter`] when upstream is lost (§4.6).
    pub async fn disconnect_client(&self, client_id: ClientId) {
        self.shared.clients.lock().await.remove(&client_id);
    }

    /// The socket address [`Pmu::run`] actually bound, once known. Useful for tests and for
    /// callers that construct a `Pmu` with port `0` to let the OS pick a free port.
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Idempotent: closes the listening socket first, then signals every session to drain and
    /// close (§5).
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Block until [`Pmu::run`]'s listener task has exited.
    pub async fn join(&self) {
        let handle = self.listener_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn spawn_client(
    shared: Arc<Shared>,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    write_half: tokio::net::tcp::OwnedWriteHalf,
    mut stop_rx: watch::Receiver<bool>,
) {
    let client_id = shared.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (outbound, writer_handle) =
        transport::spawn_writer(write_half, shared.endpoint.outbound_queue_depth);
    let state = Arc::new(Mutex::new(ClientState::Connected));

    {
        let state = state.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let mut decoder = StreamDecoder::new();
            shared
                .clients
                .lock()
                .await
                .insert(client_id, ClientHandle { state: state.clone(), outbound });

            if let Some(hook) = shared.on_connect.lock().await.as_ref() {
                hook(client_id);
            }

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    read = transport::fill(&mut read_half, &mut decoder) => {
                        match read {
                            Ok(0) => {
                                if let Err(err) = decoder.close() {
                                    warn!("PDC client {client_id} disconnected with {err}");
                                }
                                break;
                            }
                            Ok(_) => {
                                while let Some(result) = pop_command(&mut decoder) {
                                    match result {
                                        Ok(frame) => {
                                            handle_client_frame(&shared, client_id, &state, frame).await;
                                        }
                                        Err(err) => warn!("PDC client {client_id} sent malformed frame: {err}"),
                                    }
                                }
                            }
                            Err(err) => {
                                warn!("PDC client {client_id} read error: {err}");
                                break;
                            }
                        }
                    }
                }
            }

            *state.lock().await = ClientState::Disconnecting;
            shared.clients.lock().await.remove(&client_id);
            notify_state_change(&shared, client_id, ClientState::Disconnecting).await;
            writer_handle.abort();
        });
    }
}

fn pop_command(decoder: &mut StreamDecoder) -> Option<Result<Frame, crate::error::CodecError>> {
    match decoder.next_frame(None) {
        Ok(Some(frame)) => Some(Ok(frame)),
        Ok(None) => None,
        Err(err) => Some(Err(err)),
    }
}

async fn handle_client_frame(
    shared: &Arc<Shared>,
    client_id: ClientId,
    state: &Arc<Mutex<ClientState>>,
    frame: Frame,
) {
    let Frame::Command(cmd) = frame else {
        return;
    };

    match cmd.command {
        Command::TurnOnTransmission => {
            *state.lock().await = ClientState::Streaming;
            notify_state_change(shared, client_id, ClientState::Streaming).await;
        }
        Command::TurnOffTransmission => {
            *state.lock().await = ClientState::Connected;
            notify_state_change(shared, client_id, ClientState::Connected).await;
        }
        Command::SendHeader => {
            let (soc, frac_sec) =
                time::encode(std::time::SystemTime::now(), 1_000_000).unwrap_or((0, 0));
            let text = shared.header.lock().await.clone().unwrap_or_default();
            let reply = Frame::Header(HeaderFrame {
                pmu_id: shared.pmu_id,
                soc,
                frac_sec,
                time_quality: 0,
                text,
            });
            send_unicast(shared, client_id, &reply).await;
        }
        Command::SendConfig1 | Command::SendConfig2 => {
            let mut store = shared.config_store.lock().await;
            let (soc, frac_sec) =
                time::encode(std::time::SystemTime::now(), store.time_base()).unwrap_or((0, 0));
            match store.build(soc, frac_sec, 0) {
                Ok(mut config) => {
                    config.version = if matches!(cmd.command, Command::SendConfig1) {
                        ConfigVersion::V1
                    } else {
                        ConfigVersion::V2
                    };
                    store.mark_transmitted();
                    drop(store);
                    send_unicast(shared, client_id, &Frame::Configuration(config)).await;
                }
                Err(err) => warn!("PMU {} failed to build configuration reply: {err}", shared.pmu_id),
            }
        }
        Command::SendConfig3 => {
            let (soc, frac_sec) =
                time::encode(std::time::SystemTime::now(), 1_000_000).unwrap_or((0, 0));
            send_unicast(
                shared,
                client_id,
                &Frame::negative_ack(shared.pmu_id, soc, frac_sec, 0),
            )
            .await;
        }
        Command::ExtendedFrame => {
            debug!("ignoring extended-frame command from client {client_id}");
        }
    }
}

async fn notify_state_change(shared: &Arc<Shared>, client_id: ClientId, new_state: ClientState) {
    if let Some(hook) = shared.on_state_change.lock().await.as_ref() {
        hook(client_id, new_state);
    }
}

async fn send_unicast(shared: &Arc<Shared>, client_id: ClientId, frame: &Frame) {
    let Ok(bytes) = frame::encode(frame) else {
        return;
    };
    let clients = shared.clients.lock().await;
    if let Some(handle) = clients.get(&client_id) {
        let _ = handle.outbound.try_send(bytes);
    }
}
