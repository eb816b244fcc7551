//! PDC endpoint (C5): a TCP client for exactly one PMU, with request/response helpers layered
//! over a single authoritative read loop (§4.5).

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::EndpointConfig;
use crate::error::Error;
use crate::frame::command::{Command, CommandFrame};
use crate::frame::configuration::ConfigurationFrame;
use crate::frame::data::DataFrame;
use crate::frame::header::HeaderFrame;
use crate::frame::{self, time, ConfigLookup, Frame, StreamDecoder};
use crate::transport;

/// One frame as received from the upstream PMU: the parsed value plus the exact bytes it was
/// decoded from, for callers (the splitter, §4.6) that forward verbatim rather than re-encode.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub frame: Frame,
}

/// A PDC's view of a single upstream PMU's last-known configuration, used as the [`ConfigLookup`]
/// context when decoding Data frames off the wire.
struct ConfigCache(Mutex<Option<ConfigurationFrame>>);

impl ConfigCache {
    fn new() -> Self {
        Self(Mutex::new(None))
    }
}

struct Shared {
    pdc_id: u16,
    config: ConfigCache,
    header: Mutex<Option<HeaderFrame>>,
    config_tx: watch::Sender<Option<ConfigurationFrame>>,
    header_tx: watch::Sender<Option<HeaderFrame>>,
    data_tx: mpsc::Sender<DataFrame>,
    raw_tx: broadcast::Sender<RawFrame>,
    /// `true` while the read loop is actively connected; flips to `false` on EOF or a read
    /// error. [`crate::splitter`] watches this to notice upstream loss (§4.6).
    connected_tx: watch::Sender<bool>,
}

/// A TCP client bound to exactly one upstream PMU.
pub struct Pdc {
    shared: Arc<Shared>,
    pmu_addr: String,
    cfg: EndpointConfig,
    command_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    data_rx: Mutex<mpsc::Receiver<DataFrame>>,
    config_rx: watch::Receiver<Option<ConfigurationFrame>>,
    header_rx: watch::Receiver<Option<HeaderFrame>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Pdc {
    pub fn new(pdc_id: u16, pmu_ip: &str, pmu_port: u16) -> Self {
        let (config_tx, config_rx) = watch::channel(None);
        let (header_tx, header_rx) = watch::channel(None);
        let (data_tx, data_rx) = mpsc::channel(EndpointConfig::default().outbound_queue_depth);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (raw_tx, _) = broadcast::channel(EndpointConfig::default().outbound_queue_depth);
        let (connected_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                pdc_id,
                config: ConfigCache::new(),
                header: Mutex::new(None),
                config_tx,
                header_tx,
                data_tx,
                raw_tx,
                connected_tx,
            }),
            pmu_addr: format!("{pmu_ip}:{pmu_port}"),
            cfg: EndpointConfig::default(),
            command_tx: Mutex::new(None),
            data_rx: Mutex::new(data_rx),
            config_rx,
            header_rx,
            stop_tx,
            stop_rx,
            read_task: Mutex::new(None),
        }
    }

    /// Connect to the upstream PMU and start the authoritative read loop.
    pub async fn run(&self) -> Result<(), Error> {
        let (read_half, write_half) = transport::connect(&self.pmu_addr).await?;
        info!("PDC {} connected to {}", self.shared.pdc_id, self.pmu_addr);

        let (outbound, writer_handle) =
            transport::spawn_writer(write_half, self.cfg.outbound_queue_depth);
        *self.command_tx.lock().await = Some(outbound);
        let _ = self.shared.connected_tx.send(true);

        let shared = self.shared.clone();
        let mut stop_rx = self.stop_rx.clone();

        let handle = tokio::spawn(async move {
            read_loop(shared.clone(), read_half, &mut stop_rx).await;
            let _ = shared.connected_tx.send(false);
            writer_handle.abort();
        });

        *self.read_task.lock().await = Some(handle);
        Ok(())
    }

    /// Request the header frame and wait up to the configured response timeout for it.
    ///
    /// Any data frames that arrive in the interim are discarded to preserve request/response
    /// semantics (§4.5); this should only be called before `start()`.
    pub async fn get_header(&self) -> Option<HeaderFrame> {
        self.send_command(Command::SendHeader).await.ok()?;
        let mut rx = self.header_rx.clone();
        wait_for_change(&mut rx, self.cfg.timeouts.response)
            .await
            .flatten()
    }

    /// Request configuration v2 and wait up to the configured response timeout for it.
    pub async fn get_config(&self) -> Option<ConfigurationFrame> {
        self.send_command(Command::SendConfig2).await.ok()?;
        let mut rx = self.config_rx.clone();
        wait_for_change(&mut rx, self.cfg.timeouts.response)
            .await
            .flatten()
    }

    pub async fn start(&self) -> Result<(), Error> {
        self.send_command(Command::TurnOnTransmission).await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.send_command(Command::TurnOffTransmission).await
    }

    /// Return the next data frame, or `None` once the connection has closed.
    pub async fn get(&self) -> Option<DataFrame> {
        self.data_rx.lock().await.recv().await
    }

    /// Subscribe to every frame as received, bytes included. Used by [`crate::splitter`] to
    /// forward upstream frames downstream without re-encoding them.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawFrame> {
        self.shared.raw_tx.subscribe()
    }

    /// Watch connection liveness: `true` once [`Pdc::run`] has connected, `false` again once the
    /// read loop sees EOF or a read error. Used by [`crate::splitter`] to notice upstream loss.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    /// Close the connection.
    pub async fn quit(&self) {
        let _ = self.stop_tx.send(true);
        *self.command_tx.lock().await = None;
        let task = self.read_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn send_command(&self, command: Command) -> Result<(), Error> {
        let (soc, frac_sec) = time::encode(std::time::SystemTime::now(), 1_000_000)
            .unwrap_or((0, 0));
        let frame = Frame::Command(CommandFrame {
            pmu_id: self.shared.pdc_id,
            soc,
            frac_sec,
            time_quality: 0,
            command,
            extframe: Vec::new(),
        });
        let bytes = frame::encode(&frame)?;

        let guard = self.command_tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(Error::NotReady);
        };
        tx.send(bytes).await.map_err(|_| Error::ConnectionLost)
    }
}

async fn wait_for_change<T: Clone>(
    rx: &mut watch::Receiver<T>,
    bound: std::time::Duration,
) -> Option<T> {
    match timeout(bound, rx.changed()).await {
        Ok(Ok(())) => Some(rx.borrow().clone()),
        _ => None,
    }
}

async fn read_loop(shared: Arc<Shared>, mut read_half: OwnedReadHalf, stop_rx: &mut watch::Receiver<bool>) {
    let mut decoder = StreamDecoder::new();

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
                            warn!("PDC {} disconnected with {err}", shared.pdc_id);
                        }
                        break;
                    }
                    Ok(_) => drain_decoded_frames(&shared, &mut decoder).await,
                    Err(err) => {
                        warn!("PDC {} read error: {err}", shared.pdc_id);
                        break;
                    }
                }
            }
        }
    }
}

async fn drain_decoded_frames(shared: &Arc<Shared>, decoder: &mut StreamDecoder) {
    loop {
        let context = shared.config.0.lock().await;
        let lookup: Option<&dyn ConfigLookup> = context.as_ref().map(|c| c as &dyn ConfigLookup);
        let next = decoder.next_frame_raw(lookup);
        drop(context);

        match next {
            Ok(Some((bytes, frame))) => dispatch(shared, bytes, frame).await,
            Ok(None) => break,
            Err(err) => warn!("PDC {} discarding malformed frame: {err}", shared.pdc_id),
        }
    }
}

async fn dispatch(shared: &Arc<Shared>, bytes: Vec<u8>, frame: Frame) {
    let _ = shared.raw_tx.send(RawFrame {
        bytes,
        frame: frame.clone(),
    });

    match frame {
        Frame::Header(header) => {
            *shared.header.lock().await = Some(header.clone());
            let _ = shared.header_tx.send(Some(header));
        }
        Frame::Configuration(cfg) => {
            *shared.config.0.lock().await = Some(cfg.clone());
            let _ = shared.config_tx.send(Some(cfg));
        }
        Frame::Data(data) => {
            let _ = shared.data_tx.try_send(data);
        }
        Frame::Command(_) => {
            // A PMU does not send commands; ignore per the closed-role model in §4.5.
        }
    }
}
