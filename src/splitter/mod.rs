//! Stream Splitter (C6): one upstream PDC session fanned out to many downstream PMU-facing
//! clients (§4.6). Composition, not inheritance — the splitter owns a [`Pdc`] and a [`Pmu`] and
//! wires their events together; neither endpoint knows about the other.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{EndpointConfig, ReconnectBackoff};
use crate::error::Error;
use crate::frame::Frame;
use crate::pdc::{Pdc, RawFrame};
use crate::pmu::{ClientId, ClientState, Pmu};

struct Cache {
    header: Mutex<Option<Vec<u8>>>,
    config: Mutex<Option<Vec<u8>>>,
}

/// Composes a PDC (upstream) with a PMU (downstream) to fan one source out to many sinks.
pub struct Splitter {
    source_addr: (String, u16),
    pmu_id: u16,
    downstream: Arc<Pmu>,
    cache: Arc<Cache>,
    active_downstream: Arc<AtomicUsize>,
    /// Client ids currently in [`ClientState::Streaming`], so the state-change hook can tell a
    /// repeated "turn on transmission" from an actual 0-to-1 transition.
    streaming: Arc<Mutex<HashSet<ClientId>>>,
    /// Whichever upstream `Pdc` is currently connected, swapped out by `run_upstream_loop` on
    /// every reconnect. The downstream attach/detach hook reads this to decide which session to
    /// start/stop (§4.6).
    current_pdc: Arc<Mutex<Option<Arc<Pdc>>>>,
    cfg: EndpointConfig,
    upstream_task: Mutex<Option<JoinHandle<()>>>,
}

impl Splitter {
    pub fn new(source_ip: &str, source_port: u16, listen_ip: &str, listen_port: u16, pmu_id: u16) -> Self {
        Self {
            source_addr: (source_ip.to_string(), source_port),
            pmu_id,
            downstream: Arc::new(Pmu::new(pmu_id, listen_ip, listen_port, "SPLITTER", 30)),
            cache: Arc::new(Cache {
                header: Mutex::new(None),
                config: Mutex::new(None),
            }),
            active_downstream: Arc::new(AtomicUsize::new(0)),
            streaming: Arc::new(Mutex::new(HashSet::new())),
            current_pdc: Arc::new(Mutex::new(None)),
            cfg: EndpointConfig::default(),
            upstream_task: Mutex::new(None),
        }
    }

    /// Connect upstream, retrieve header + config, bind the downstream listener, and start the
    /// forward-and-reconnect loop.
    pub async fn run(&self) -> Result<(), Error> {
        let downstream = self.downstream.clone();
        let cache = self.cache.clone();
        downstream
            .set_on_connect(Arc::new(move |client_id: ClientId| {
                let cache = cache.clone();
                let downstream = downstream.clone();
                tokio::spawn(async move {
                    if let Some(bytes) = cache.header.lock().await.clone() {
                        downstream.send_to_raw(client_id, &bytes).await;
                    }
                    if let Some(bytes) = cache.config.lock().await.clone() {
                        downstream.send_to_raw(client_id, &bytes).await;
                    }
                });
            }))
            .await;

        let downstream = self.downstream.clone();
        let streaming = self.streaming.clone();
        let active_downstream = self.active_downstream.clone();
        let current_pdc = self.current_pdc.clone();
        self.downstream
            .set_on_state_change(Arc::new(move |client_id: ClientId, new_state: ClientState| {
                let streaming = streaming.clone();
                let active_downstream = active_downstream.clone();
                let current_pdc = current_pdc.clone();
                tokio::spawn(async move {
                    let mut set = streaming.lock().await;
                    let was_streaming = set.contains(&client_id);
                    let is_streaming = new_state == ClientState::Streaming;
                    if is_streaming == was_streaming {
                        return;
                    }
                    if is_streaming {
                        set.insert(client_id);
                        drop(set);
                        if active_downstream.fetch_add(1, Ordering::SeqCst) == 0 {
                            if let Some(pdc) = current_pdc.lock().await.as_ref() {
                                let _ = pdc.start().await;
                            }
                        }
                    } else {
                        set.remove(&client_id);
                        drop(set);
                        if active_downstream.fetch_sub(1, Ordering::SeqCst) == 1 {
                            if let Some(pdc) = current_pdc.lock().await.as_ref() {
                                let _ = pdc.stop().await;
                            }
                        }
                    }
                });
            }))
            .await;

        self.downstream.run().await?;

        let downstream = self.downstream.clone();
        let cache = self.cache.clone();
        let source_addr = self.source_addr.clone();
        let pmu_id = self.pmu_id;
        let timeouts = self.cfg.timeouts;
        let current_pdc = self.current_pdc.clone();

        let handle = tokio::spawn(async move {
            run_upstream_loop(pmu_id, source_addr, downstream, cache, current_pdc, timeouts).await;
        });

        *self.upstream_task.lock().await = Some(handle);
        Ok(())
    }

    /// The downstream listener's bound address, once [`Splitter::run`] has completed binding it.
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.downstream.local_addr().await
    }

    pub fn stop(&self) {
        self.downstream.stop();
    }

    pub async fn join(&self) {
        self.downstream.join().await;
        let upstream = self.upstream_task.lock().await.take();
        if let Some(handle) = upstream {
            handle.abort();
        }
    }
}

async fn run_upstream_loop(
    pmu_id: u16,
    source_addr: (String, u16),
    downstream: Arc<Pmu>,
    cache: Arc<Cache>,
    current_pdc: Arc<Mutex<Option<Arc<Pdc>>>>,
    timeouts: crate::config::Timeouts,
) {
    loop {
        let pdc = Arc::new(Pdc::new(pmu_id, &source_addr.0, source_addr.1));
        if let Err(err) = pdc.run().await {
            warn!("splitter failed to connect upstream: {err}");
        } else {
            activate(&pdc, &current_pdc, &downstream).await;
            connect_and_forward(&pdc, &downstream, &cache).await;
        }

        warn!("splitter lost upstream connection, dropping downstream clients");
        *current_pdc.lock().await = None;
        for (client_id, _) in downstream.clients().await {
            downstream.disconnect_client(client_id).await;
        }
        *cache.header.lock().await = None;
        *cache.config.lock().await = None;
        downstream.set_header(None).await;
        downstream.set_configuration_verbatim(None).await;

        let mut backoff = ReconnectBackoff::new(timeouts);
        loop {
            tokio::time::sleep(backoff.next()).await;
            let candidate = Arc::new(Pdc::new(pmu_id, &source_addr.0, source_addr.1));
            match candidate.run().await {
                Ok(()) => {
                    info!("splitter reconnected upstream");
                    activate(&candidate, &current_pdc, &downstream).await;
                    connect_and_forward(&candidate, &downstream, &cache).await;
                    *current_pdc.lock().await = None;
                    break;
                }
                Err(err) => warn!("splitter reconnect attempt failed: {err}"),
            }
        }
    }
}

/// Register a freshly connected `Pdc` as the live upstream session, and immediately start its
/// transmission if a downstream client was already attached before this (re)connect happened.
async fn activate(pdc: &Arc<Pdc>, current_pdc: &Mutex<Option<Arc<Pdc>>>, downstream: &Arc<Pmu>) {
    *current_pdc.lock().await = Some(pdc.clone());
    let already_streaming = downstream
        .clients()
        .await
        .iter()
        .any(|(_, state)| *state == ClientState::Streaming);
    if already_streaming {
        let _ = pdc.start().await;
    }
}

/// Fetch header/config, cache them, then forward every subsequent upstream frame downstream
/// verbatim until the connection drops. Returns once disconnected.
async fn connect_and_forward(pdc: &Arc<Pdc>, downstream: &Arc<Pmu>, cache: &Arc<Cache>) -> bool {
    if let Some(header) = pdc.get_header().await {
        if let Ok(bytes) = crate::frame::encode(&Frame::Header(header.clone())) {
            *cache.header.lock().await = Some(bytes);
        }
        downstream.set_header(Some(header.text)).await;
    }
    if let Some(config) = pdc.get_config().await {
        if let Ok(bytes) = crate::frame::encode(&Frame::Configuration(config.clone())) {
            *cache.config.lock().await = Some(bytes);
        }
        downstream.set_configuration_verbatim(Some(config)).await;
    }

    let mut raw_rx = pdc.subscribe_raw();
    let mut connected_rx = pdc.subscribe_connected();

    loop {
        tokio::select! {
            biased;
            changed = connected_rx.changed() => {
                if changed.is_err() || !*connected_rx.borrow() {
                    return true;
                }
            }
            received = raw_rx.recv() => {
                match received {
                    Ok(RawFrame { bytes, frame }) => forward(downstream, cache, &bytes, &frame).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return true,
                }
            }
        }
    }
}

async fn forward(downstream: &Arc<Pmu>, cache: &Arc<Cache>, bytes: &[u8], frame: &Frame) {
    match frame {
        Frame::Header(header) => {
            *cache.header.lock().await = Some(bytes.to_vec());
            downstream.set_header(Some(header.text.clone())).await;
            downstream.broadcast_raw(bytes, false).await;
        }
        Frame::Configuration(config) => {
            *cache.config.lock().await = Some(bytes.to_vec());
            downstream.set_configuration_verbatim(Some(config.clone())).await;
            downstream.broadcast_raw(bytes, false).await;
        }
        Frame::Data(_) => {
            downstream.broadcast_raw(bytes, true).await;
        }
        Frame::Command(_) => {
            // Upstream never sends commands; nothing to forward.
        }
    }
}
