//! Lambda Provider
//!
//! [`LambdaProvider`] is the uniform face of every vendor. The single
//! implementation, [`WidebandProvider`], is generic over the decoder and
//! owns every task it spawns: the serial reader, the conversational driver
//! and any bridge forwarders. `stop` cancels them and waits for all of
//! them, so nothing outlives the provider.

use crate::bridge::BridgeFrame;
use crate::cell::DecoderCell;
use crate::config::Logger;
use crate::conversation::{Conversation, REPLY_QUEUE};
use crate::error::WblError;
use crate::transport::{self, SerialSettings};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wbl_protocol::{Decoder, FeedOutcome, Reading, Vendor};

/// Provider lifecycle; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Unstarted,
    Running,
    Stopped,
}

/// Uniform interface over every wideband vendor
#[async_trait]
pub trait LambdaProvider: Send + Sync {
    fn vendor(&self) -> Vendor;

    /// Open the transport and spawn the reader; returns once it runs
    async fn start(&mut self, cancel: CancellationToken) -> Result<(), WblError>;

    /// Cancel and await every task; later calls do nothing
    async fn stop(&mut self);

    /// Last lambda, or the initial sentinel; never blocks on I/O
    fn get_lambda(&self) -> f64;

    /// Last complete reading
    fn reading(&self) -> Reading;

    /// Push bytes as if they came from the transport
    fn set_data(&self, data: &[u8]);

    /// Push one identified CAN frame
    fn set_frame(&self, id: u32, data: &[u8]);

    fn describe(&self) -> String;

    fn state(&self) -> ProviderState;
}

/// How subscription frames are handed to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Payload only, as `set_data`
    Payload,
    /// Identified frames, as `set_frame`
    Frames,
    /// Identified frames, skipping 11-bit identifiers
    ExtendedFrames,
}

/// Where the provider's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Serial(SerialSettings),
    /// Everything arrives through `set_data` / `set_frame` or subscriptions
    Push,
}

/// A provider for any decoder
pub struct WidebandProvider<D: Decoder> {
    cell: Arc<DecoderCell<D>>,
    source: Source,
    read_timeout: Duration,
    pacing: Duration,
    logger: Logger,
    state: Arc<Mutex<ProviderState>>,
    cancel: Option<CancellationToken>,
    pending: Vec<(mpsc::Receiver<BridgeFrame>, ForwardMode)>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl<D: Decoder> WidebandProvider<D> {
    pub fn new(decoder: D, source: Source, logger: Logger) -> Self {
        let vendor = decoder.vendor();
        Self {
            cell: Arc::new(DecoderCell::new(decoder)),
            source,
            read_timeout: vendor.read_timeout(),
            pacing: Duration::from_millis(100),
            logger,
            state: Arc::new(Mutex::new(ProviderState::Unstarted)),
            cancel: None,
            pending: Vec::new(),
            tasks: Vec::new(),
            closed: false,
        }
    }

    /// Delay before every conversational send
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Run `f` against the decoder for vendor-specific accessors
    pub fn with_decoder<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        self.cell.with(f)
    }

    /// Forward frames from a bridge subscription into the decoder.
    ///
    /// The forwarder is spawned on `start` (or now, if running) and ends
    /// with the provider or when the subscription closes.
    pub fn attach_subscription(&mut self, rx: mpsc::Receiver<BridgeFrame>, mode: ForwardMode) {
        match (&self.cancel, self.state()) {
            (Some(cancel), ProviderState::Running) => {
                let task = self.spawn_forwarder(rx, mode, cancel.clone());
                self.tasks.push(task);
            }
            _ => self.pending.push((rx, mode)),
        }
    }

    /// Start on an already open byte stream instead of the configured source
    pub async fn start_with_io<T>(&mut self, io: T, cancel: CancellationToken) -> Result<(), WblError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = self.begin(cancel)?;
        self.spawn_io(io, cancel.clone());
        self.spawn_pending(&cancel);
        self.running(&cancel);
        Ok(())
    }

    fn begin(&mut self, parent: CancellationToken) -> Result<CancellationToken, WblError> {
        match self.state() {
            ProviderState::Unstarted => {}
            ProviderState::Running => return Err(WblError::AlreadyStarted),
            ProviderState::Stopped => return Err(WblError::Stopped),
        }
        let cancel = parent.child_token();
        self.cancel = Some(cancel.clone());
        Ok(cancel)
    }

    /// Mark the provider running and watch `cancel` for the end of its life.
    ///
    /// Whoever cancels the token (the caller's parent, a failed reader or
    /// a failed conversation), the state ends up `Stopped`.
    fn running(&mut self, cancel: &CancellationToken) {
        self.set_state(ProviderState::Running);
        (self.logger)(&format!("{}: started", self.vendor().product_string()));

        let state = self.state.clone();
        let cancel = cancel.clone();
        let product = self.vendor().product_string();
        self.tasks.push(tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("{}: cancelled", product);
            mark_stopped(&state);
        }));
    }

    fn spawn_io<T>(&mut self, io: T, cancel: CancellationToken)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);

        let replies = match self.cell.kickoff() {
            Some(kickoff) => {
                let (tx, rx) = mpsc::channel(REPLY_QUEUE);
                let driver = Conversation::new(kickoff, self.pacing);
                let logger = self.logger.clone();
                let cancel = cancel.clone();
                self.tasks.push(tokio::spawn(async move {
                    if let Err(e) = driver.run(writer, rx, cancel.clone()).await {
                        warn!("conversation ended: {}", e);
                        logger(&format!("conversation ended: {}", e));
                        cancel.cancel();
                    }
                }));
                Some(tx)
            }
            None => None,
        };

        let cell = self.cell.clone();
        let logger = self.logger.clone();
        let state = self.state.clone();
        let read_timeout = self.read_timeout;
        let product = self.vendor().product_string();
        self.tasks.push(tokio::spawn(async move {
            let result = transport::read_loop(reader, read_timeout, cancel.clone(), |bytes| {
                let outcome = cell.ingest(bytes);
                report(&logger, &outcome);
                if let Some(tx) = &replies {
                    for reply in outcome.replies {
                        if tx.try_send(reply).is_err() {
                            warn!("{}: reply queue full, command dropped", product);
                        }
                    }
                }
            })
            .await;

            if let Err(e) = result {
                error!("{}: reader stopped: {}", product, e);
                logger(&format!("{}: reader stopped: {}", product, e));
            }
            mark_stopped(&state);
            cancel.cancel();
        }));
    }

    fn spawn_pending(&mut self, cancel: &CancellationToken) {
        for (rx, mode) in std::mem::take(&mut self.pending) {
            let task = self.spawn_forwarder(rx, mode, cancel.clone());
            self.tasks.push(task);
        }
    }

    fn spawn_forwarder(
        &self,
        mut rx: mpsc::Receiver<BridgeFrame>,
        mode: ForwardMode,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cell = self.cell.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => frame,
                };
                let Some(frame) = frame else {
                    logger("wbl channel closed");
                    break;
                };
                let outcome = match mode {
                    ForwardMode::Payload => cell.ingest(&frame.data),
                    ForwardMode::Frames => cell.ingest_frame(frame.id, &frame.data),
                    ForwardMode::ExtendedFrames if frame.extended => {
                        cell.ingest_frame(frame.id, &frame.data)
                    }
                    ForwardMode::ExtendedFrames => {
                        debug!("skipping standard frame {:03X}", frame.id);
                        continue;
                    }
                };
                report(&logger, &outcome);
            }
        })
    }

    fn set_state(&self, next: ProviderState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Hand decoder notices to the user's logger
fn report(logger: &Logger, outcome: &FeedOutcome) {
    for notice in &outcome.notices {
        logger(notice);
    }
}

fn mark_stopped(state: &Mutex<ProviderState>) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = ProviderState::Stopped;
}

#[async_trait]
impl<D: Decoder> LambdaProvider for WidebandProvider<D> {
    fn vendor(&self) -> Vendor {
        self.cell.vendor()
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), WblError> {
        let cancel = self.begin(cancel)?;
        if let Source::Serial(settings) = &self.source {
            let port = match transport::open_serial(settings) {
                Ok(port) => port,
                Err(e) => {
                    self.cancel = None;
                    return Err(e);
                }
            };
            info!("{}: reading {}", self.vendor(), settings.device);
            self.spawn_io(port, cancel.clone());
        }
        self.spawn_pending(&cancel);
        self.running(&cancel);
        Ok(())
    }

    async fn stop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("provider task failed: {}", e);
            }
        }
        self.pending.clear();
        self.set_state(ProviderState::Stopped);
        (self.logger)(&format!("{}: stopped", self.vendor().product_string()));
    }

    fn get_lambda(&self) -> f64 {
        self.cell.lambda()
    }

    fn reading(&self) -> Reading {
        self.cell.reading()
    }

    fn set_data(&self, data: &[u8]) {
        report(&self.logger, &self.cell.ingest(data));
    }

    fn set_frame(&self, id: u32, data: &[u8]) {
        report(&self.logger, &self.cell.ingest_frame(id, data));
    }

    fn describe(&self) -> String {
        if !self.cell.reading().has_data() {
            return format!("{}: no data received", self.vendor().product_string());
        }
        self.cell.describe()
    }

    fn state(&self) -> ProviderState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
