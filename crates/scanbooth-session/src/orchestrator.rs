// SPDX-License-Identifier: MIT
//
// Session orchestrator.
//
// A single event loop owns every state transition. Long-running work
// (scanner subprocess, crop/encode, payment polling, outbound mail) runs
// in spawned tasks that report back as events tagged with the session or
// payment-attempt id; stale events from a superseded session are matched
// by id and dropped, never assumed stale by timing alone.

use std::path::PathBuf;
use std::sync::Arc;

use scanbooth_core::config::KioskConfig;
use scanbooth_core::error::{classify, FailureKind, KioskError, Result};
use scanbooth_core::types::{ScanArtifact, Session, SessionId, SessionState};
use scanbooth_payment::{PaymentEvent, PaymentFlow, PaymentProvider, QrEncoder};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::delivery::{deliver, DeliveryOutcome};
use crate::mailer::Mailer;
use crate::scanner::ScannerDriver;

/// UI-originated events. The UI layer validates inputs (phone format,
/// offered quantities) before submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskEvent {
    PhoneEntered(String),
    PackageSelected(u32),
    ScanRequested,
    DoneAcknowledged,
    Cancel,
}

/// Notifications pushed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiNotice {
    StateChanged(SessionState),
    /// Buyer phone digits as currently held by the session.
    PhoneChanged(String),
    /// Purchase terms the checkout screen renders.
    PurchaseTerms { credits: u32, price_cents: u32 },
    /// Checkout link ready to show. The QR data URL is empty when
    /// encoding failed; the link itself is still usable.
    PaymentLink {
        checkout_url: String,
        qr_data_url: String,
    },
    ScanProgress { completed: u32, total: u32 },
    /// The session resolved. `delivered: false` means the artifacts were
    /// saved locally instead of mailed; the session still completed.
    SessionComplete { delivered: bool },
    /// A surfaced failure. `kind` tells the UI whether the step is
    /// retry-eligible.
    Error { kind: FailureKind, message: String },
}

/// Observer interface the embedding UI implements.
pub trait UiSink: Send + Sync {
    fn notify(&self, notice: UiNotice);
}

/// Completion events from background work, tagged for staleness checks.
#[derive(Debug)]
enum WorkEvent {
    ScanFinished {
        session: SessionId,
        index: u32,
        result: Result<PathBuf>,
    },
    ProcessingFinished {
        session: SessionId,
        index: u32,
        result: Result<ScanArtifact>,
    },
    DeliveryFinished {
        session: SessionId,
        outcome: DeliveryOutcome,
    },
}

/// Handle on an in-flight capture so cancellation can terminate the
/// scanner subprocess and clean up its output.
struct PendingCapture {
    task: tokio::task::JoinHandle<()>,
    raw_path: PathBuf,
}

/// Drives one customer interaction at a time from phone entry through
/// payment, scanning, processing, and delivery.
pub struct SessionOrchestrator {
    config: KioskConfig,
    scanner: Arc<dyn ScannerDriver>,
    mailer: Arc<dyn Mailer>,
    ui: Arc<dyn UiSink>,
    payment: PaymentFlow,
    payment_rx: mpsc::Receiver<PaymentEvent>,
    ui_rx: mpsc::Receiver<KioskEvent>,
    work_tx: mpsc::Sender<WorkEvent>,
    work_rx: mpsc::Receiver<WorkEvent>,
    session: Session,
    scan_in_flight: bool,
    capture: Option<PendingCapture>,
    idle_deadline: Instant,
}

impl SessionOrchestrator {
    pub fn new(
        config: KioskConfig,
        scanner: Arc<dyn ScannerDriver>,
        mailer: Arc<dyn Mailer>,
        provider: Arc<dyn PaymentProvider>,
        qr: Arc<dyn QrEncoder>,
        ui: Arc<dyn UiSink>,
    ) -> (Self, mpsc::Sender<KioskEvent>) {
        let (ui_tx, ui_rx) = mpsc::channel(32);
        let (work_tx, work_rx) = mpsc::channel(32);
        let (payment_tx, payment_rx) = mpsc::channel(32);
        let payment = PaymentFlow::new(provider, qr, config.payment.clone(), payment_tx);
        let idle_deadline = Instant::now() + config.idle_timeout();
        let orchestrator = Self {
            config,
            scanner,
            mailer,
            ui,
            payment,
            payment_rx,
            ui_rx,
            work_tx,
            work_rx,
            session: Session::new(),
            scan_in_flight: false,
            capture: None,
            idle_deadline,
        };
        (orchestrator, ui_tx)
    }

    /// Startup check: log scanner availability so an operator notices a
    /// disconnected device before the first customer does.
    pub async fn initialize(&self) {
        match self.scanner.list_devices().await {
            Ok(devices) if devices.is_empty() => {
                warn!("no scanner detected; captures will fail until one is attached");
            }
            Ok(devices) => info!(?devices, "scanner available"),
            Err(err) => warn!(%err, "scanner discovery failed"),
        }
    }

    /// Run the event loop until the UI event channel closes.
    pub async fn run(mut self) {
        if let Err(err) = self.config.ensure_directories() {
            warn!(%err, "could not prepare scan directories");
        }
        loop {
            let deadline = self.idle_deadline;
            tokio::select! {
                maybe = self.ui_rx.recv() => {
                    match maybe {
                        Some(event) => self.handle_ui(event).await,
                        None => break,
                    }
                }
                Some(event) = self.work_rx.recv() => self.handle_work(event).await,
                Some(event) = self.payment_rx.recv() => self.handle_payment(event).await,
                _ = tokio::time::sleep_until(deadline),
                    if self.session.state != SessionState::Idle =>
                {
                    info!("idle timeout, cancelling session");
                    self.cancel().await;
                }
            }
        }
    }

    fn touch(&mut self) {
        self.idle_deadline = Instant::now() + self.config.idle_timeout();
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state != state {
            debug!(from = ?self.session.state, to = ?state, "session transition");
            self.session.state = state;
            self.ui.notify(UiNotice::StateChanged(state));
        }
    }

    fn notify_error(&self, err: &KioskError) {
        self.ui.notify(UiNotice::Error {
            kind: classify(err),
            message: err.to_string(),
        });
    }

    #[instrument(skip(self, event), fields(session = %self.session.id, state = ?self.session.state))]
    async fn handle_ui(&mut self, event: KioskEvent) {
        self.touch();
        match event {
            KioskEvent::PhoneEntered(phone) => self.handle_phone(phone),
            KioskEvent::PackageSelected(quantity) => self.handle_purchase(quantity),
            KioskEvent::ScanRequested => self.handle_scan_request(),
            KioskEvent::DoneAcknowledged => {
                if self.session.state == SessionState::Confirmed {
                    self.reset_to_idle();
                }
            }
            KioskEvent::Cancel => self.cancel().await,
        }
    }

    fn handle_phone(&mut self, phone: String) {
        match self.session.state {
            SessionState::Idle => {
                let mut session = Session::new();
                session.phone = phone;
                info!(session = %session.id, "session started");
                self.session = session;
                self.ui
                    .notify(UiNotice::PhoneChanged(self.session.phone.clone()));
                self.set_state(SessionState::PhoneCaptured);
            }
            SessionState::PhoneCaptured => {
                // Re-entry before a package was chosen.
                self.session.phone = phone;
                self.ui
                    .notify(UiNotice::PhoneChanged(self.session.phone.clone()));
            }
            other => warn!(state = ?other, "phone entry ignored"),
        }
    }

    fn handle_purchase(&mut self, quantity: u32) {
        if self.session.state != SessionState::PhoneCaptured {
            warn!(state = ?self.session.state, "package selection ignored");
            return;
        }
        let Some(price_cents) = self.config.payment.prices.price_cents(quantity) else {
            self.notify_error(&KioskError::InvalidQuantity(quantity));
            return;
        };
        self.session.credits = quantity;
        self.session.price_cents = price_cents;
        self.ui.notify(UiNotice::PurchaseTerms {
            credits: quantity,
            price_cents,
        });
        self.set_state(SessionState::PurchaseSelected);
        self.payment.create_link(quantity, &self.session.phone);
    }

    fn handle_scan_request(&mut self) {
        if self.session.state != SessionState::Scanning {
            debug!(state = ?self.session.state, "scan request ignored");
            return;
        }
        if self.scan_in_flight {
            debug!("scan already in flight, request ignored");
            return;
        }
        if self.session.scans_complete() {
            // Every purchased scan is already captured.
            self.begin_delivery();
            return;
        }

        self.scan_in_flight = true;
        let index = self.session.current_scan + 1;
        let raw_path = self
            .config
            .scans_root
            .join(self.session.raw_scan_filename(index, &self.config.scanner.format));
        info!(index, path = %raw_path.display(), "capture started");

        let scanner = Arc::clone(&self.scanner);
        let work_tx = self.work_tx.clone();
        let session_id = self.session.id;
        let capture_path = raw_path.clone();
        let task = tokio::spawn(async move {
            let result = scanner.capture(&capture_path).await.map(|()| capture_path);
            let _ = work_tx
                .send(WorkEvent::ScanFinished {
                    session: session_id,
                    index,
                    result,
                })
                .await;
        });
        self.capture = Some(PendingCapture { task, raw_path });
    }

    async fn handle_work(&mut self, event: WorkEvent) {
        match event {
            WorkEvent::ScanFinished {
                session,
                index,
                result,
            } => {
                if session != self.session.id {
                    debug!(%session, "dropping capture event for superseded session");
                    if let Ok(raw_path) = result {
                        let _ = tokio::fs::remove_file(&raw_path).await;
                    }
                    return;
                }
                self.capture = None;
                match result {
                    Ok(raw_path) => self.start_processing(index, raw_path),
                    Err(err) => {
                        warn!(index, %err, "capture failed");
                        self.scan_in_flight = false;
                        self.notify_error(&err);
                    }
                }
            }
            WorkEvent::ProcessingFinished {
                session,
                index,
                result,
            } => {
                if session != self.session.id {
                    debug!(%session, "dropping processing event for superseded session");
                    if let Ok(artifact) = result {
                        let _ = tokio::fs::remove_file(&artifact.processed_path).await;
                        let _ = tokio::fs::remove_file(&artifact.raw_path).await;
                    }
                    return;
                }
                self.finish_processing(index, result).await;
            }
            WorkEvent::DeliveryFinished { session, outcome } => {
                if session != self.session.id {
                    debug!(%session, "dropping delivery event for superseded session");
                    return;
                }
                info!(delivered = outcome.delivered, dir = %outcome.final_dir.display(), "delivery resolved");
                self.set_state(SessionState::Confirmed);
                self.ui.notify(UiNotice::SessionComplete {
                    delivered: outcome.delivered,
                });
            }
        }
    }

    fn start_processing(&mut self, index: u32, raw_path: PathBuf) {
        self.set_state(SessionState::Processing);
        let output_path = self
            .config
            .scans_root
            .join(self.session.strip_filename(index));
        let threshold = self.config.crop.detection_threshold;
        let manual_rect = self.config.crop.manual_rect;
        let quality = self.config.crop.jpeg_quality;
        let work_tx = self.work_tx.clone();
        let session_id = self.session.id;

        tokio::spawn(async move {
            let raw = raw_path.clone();
            let output = output_path.clone();
            let joined = tokio::task::spawn_blocking(move || {
                scanbooth_vision::pipeline::process(&raw, &output, threshold, manual_rect, quality)
            })
            .await;

            let result = match joined {
                Ok(Ok(processed)) => {
                    if let Some(reason) = processed.degraded {
                        debug!(index, %reason, "crop used a fallback region");
                    }
                    Ok(ScanArtifact {
                        raw_path,
                        processed_path: output_path,
                    })
                }
                Ok(Err(err)) => Err(err),
                Err(join_err) => Err(KioskError::ImageError(format!(
                    "processing task failed: {join_err}"
                ))),
            };
            let _ = work_tx
                .send(WorkEvent::ProcessingFinished {
                    session: session_id,
                    index,
                    result,
                })
                .await;
        });
    }

    async fn finish_processing(&mut self, index: u32, result: Result<ScanArtifact>) {
        self.scan_in_flight = false;
        let artifact = match result {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(index, %err, "crop processing failed");
                self.notify_error(&err);
                self.set_state(SessionState::Scanning);
                return;
            }
        };

        if !tokio::fs::try_exists(&artifact.processed_path)
            .await
            .unwrap_or(false)
        {
            warn!(path = %artifact.processed_path.display(), "processed artifact missing");
            self.notify_error(&KioskError::ImageError("processed artifact missing".into()));
            self.set_state(SessionState::Scanning);
            return;
        }

        // The raw capture is transient; only the processed artifact is kept.
        if let Err(err) = tokio::fs::remove_file(&artifact.raw_path).await {
            warn!(path = %artifact.raw_path.display(), %err, "raw capture not removed");
        }

        self.session.artifacts.push(artifact);
        self.session.current_scan += 1;
        self.ui.notify(UiNotice::ScanProgress {
            completed: self.session.current_scan,
            total: self.session.credits,
        });

        if self.session.scans_complete() {
            self.begin_delivery();
        } else {
            self.set_state(SessionState::Scanning);
        }
    }

    fn begin_delivery(&mut self) {
        self.set_state(SessionState::Delivering);
        let mailer = Arc::clone(&self.mailer);
        let config = self.config.clone();
        let session = self.session.clone();
        let work_tx = self.work_tx.clone();
        tokio::spawn(async move {
            let outcome = deliver(mailer.as_ref(), &config, &session).await;
            let _ = work_tx
                .send(WorkEvent::DeliveryFinished {
                    session: session.id,
                    outcome,
                })
                .await;
        });
    }

    async fn handle_payment(&mut self, event: PaymentEvent) {
        if self.payment.active_attempt() != Some(event.attempt()) {
            debug!(attempt = %event.attempt(), "dropping event for superseded payment attempt");
            return;
        }
        match event {
            PaymentEvent::LinkReady {
                checkout_url,
                qr_data_url,
                ..
            } => {
                self.set_state(SessionState::AwaitingPayment);
                self.ui.notify(UiNotice::PaymentLink {
                    checkout_url,
                    qr_data_url,
                });
            }
            PaymentEvent::Verified { order_id, .. } => {
                info!(%order_id, "payment verified");
                self.set_state(SessionState::Scanning);
            }
            PaymentEvent::Failed { reason, .. } => {
                warn!(%reason, "payment failed");
                self.payment.reset();
                // Provider-side failure: the operator may retry the purchase.
                self.ui.notify(UiNotice::Error {
                    kind: FailureKind::TransientIo,
                    message: reason,
                });
                self.set_state(SessionState::PhoneCaptured);
            }
            PaymentEvent::TimedOut { .. } => {
                warn!("payment timed out");
                self.payment.reset();
                self.notify_error(&KioskError::PaymentTimeout);
                self.set_state(SessionState::PhoneCaptured);
            }
        }
    }

    /// Abandon the session: stop payment timers, discard unsent artifacts
    /// without archiving, return to idle. Late completion events for this
    /// session are dropped by id.
    async fn cancel(&mut self) {
        if self.session.state == SessionState::Idle {
            return;
        }
        info!(session = %self.session.id, "session cancelled");
        self.payment.reset();
        self.scan_in_flight = false;
        // Terminate any in-flight capture; aborting the task kills the
        // scanner subprocess, and a partial raw file must not linger.
        if let Some(pending) = self.capture.take() {
            pending.task.abort();
            let _ = tokio::fs::remove_file(&pending.raw_path).await;
        }
        for artifact in &self.session.artifacts {
            let _ = tokio::fs::remove_file(&artifact.processed_path).await;
            let _ = tokio::fs::remove_file(&artifact.raw_path).await;
        }
        self.reset_to_idle();
    }

    fn reset_to_idle(&mut self) {
        self.session = Session::new();
        self.scan_in_flight = false;
        self.ui.notify(UiNotice::StateChanged(SessionState::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::RecordingMailer;
    use crate::scanner::SyntheticScanner;
    use async_trait::async_trait;
    use scanbooth_core::types::PaymentMode;
    use scanbooth_payment::{FakeProvider, FakeQrEncoder};
    use std::time::Duration;

    /// Forwards every notice onto a channel the test awaits.
    struct ChannelUi(mpsc::UnboundedSender<UiNotice>);

    impl UiSink for ChannelUi {
        fn notify(&self, notice: UiNotice) {
            let _ = self.0.send(notice);
        }
    }

    /// A capture that never completes, for cancellation tests.
    struct HangingScanner;

    #[async_trait]
    impl ScannerDriver for HangingScanner {
        async fn list_devices(&self) -> Result<Vec<String>> {
            Ok(vec!["hanging:device".into()])
        }

        async fn capture(&self, _output: &std::path::Path) -> Result<()> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    /// A capture that completes after a fixed delay, writing its output.
    struct SlowScanner {
        delay: Duration,
    }

    #[async_trait]
    impl ScannerDriver for SlowScanner {
        async fn list_devices(&self) -> Result<Vec<String>> {
            Ok(vec!["slow:device".into()])
        }

        async fn capture(&self, output: &std::path::Path) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(output, b"raw-bytes").await?;
            Ok(())
        }
    }

    struct Harness {
        events: mpsc::Sender<KioskEvent>,
        notices: mpsc::UnboundedReceiver<UiNotice>,
        mailer: Arc<RecordingMailer>,
        config: KioskConfig,
        _dir: tempfile::TempDir,
    }

    fn spawn_kiosk(mode: PaymentMode, scanner: Arc<dyn ScannerDriver>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = KioskConfig::rooted_at(dir.path());
        config.payment.mode = mode;
        // Keep the idle timer clear of test timing.
        config.idle_timeout_secs = 3600;

        let mailer = Arc::new(RecordingMailer::succeeding());
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (orchestrator, events) = SessionOrchestrator::new(
            config.clone(),
            scanner,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );
        tokio::spawn(orchestrator.run());
        Harness {
            events,
            notices,
            mailer,
            config,
            _dir: dir,
        }
    }

    async fn wait_for_state(harness: &mut Harness, wanted: SessionState) {
        loop {
            match harness.notices.recv().await.expect("notice stream open") {
                UiNotice::StateChanged(state) if state == wanted => return,
                UiNotice::Error { message, .. } => panic!("unexpected error notice: {message}"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_simulated_purchase_scan_and_delivery() {
        let mut harness = spawn_kiosk(PaymentMode::Simulated, Arc::new(SyntheticScanner));

        harness
            .events
            .send(KioskEvent::PhoneEntered("5551234567".into()))
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::PhoneCaptured).await;

        harness
            .events
            .send(KioskEvent::PackageSelected(1))
            .await
            .expect("send");
        // Simulated mode auto-verifies after its fixed delay.
        wait_for_state(&mut harness, SessionState::Scanning).await;

        harness
            .events
            .send(KioskEvent::ScanRequested)
            .await
            .expect("send");

        let delivered = loop {
            match harness.notices.recv().await.expect("notice stream open") {
                UiNotice::SessionComplete { delivered } => break delivered,
                UiNotice::Error { message, .. } => panic!("unexpected error notice: {message}"),
                _ => {}
            }
        };
        assert!(delivered);

        // Exactly one mailed message with one JPEG attachment.
        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "5551234567@sms.kiosk.local");
        assert_eq!(sent[0].attachments.len(), 1);

        // One archived artifact, zero raw captures left behind.
        let archive_root = harness.config.archive_dir();
        let session_dirs: Vec<_> = std::fs::read_dir(&archive_root)
            .expect("archive dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(session_dirs.len(), 1);
        let archived: Vec<_> = std::fs::read_dir(session_dirs[0].path())
            .expect("session dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(archived.len(), 1);

        let leftover_raws: Vec<_> = std::fs::read_dir(&harness.config.scans_root)
            .expect("scans root")
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name().to_string_lossy().contains("_scan_")
            })
            .collect();
        assert!(leftover_raws.is_empty(), "raw captures left behind");

        harness
            .events
            .send(KioskEvent::DoneAcknowledged)
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::Idle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_scan_returns_to_idle_without_delivery() {
        let mut harness = spawn_kiosk(PaymentMode::PassThrough, Arc::new(HangingScanner));

        harness
            .events
            .send(KioskEvent::PhoneEntered("5559876543".into()))
            .await
            .expect("send");
        harness
            .events
            .send(KioskEvent::PackageSelected(1))
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::Scanning).await;

        harness
            .events
            .send(KioskEvent::ScanRequested)
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;

        harness.events.send(KioskEvent::Cancel).await.expect("send");
        wait_for_state(&mut harness, SessionState::Idle).await;

        assert!(harness.mailer.sent().is_empty(), "delivery must not run");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_terminates_pending_capture_and_leaves_no_raw_files() {
        let mut harness = spawn_kiosk(
            PaymentMode::PassThrough,
            Arc::new(SlowScanner {
                delay: Duration::from_millis(200),
            }),
        );

        harness
            .events
            .send(KioskEvent::PhoneEntered("5554443333".into()))
            .await
            .expect("send");
        harness
            .events
            .send(KioskEvent::PackageSelected(1))
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::Scanning).await;

        harness
            .events
            .send(KioskEvent::ScanRequested)
            .await
            .expect("send");
        // Cancel while the capture is still sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.events.send(KioskEvent::Cancel).await.expect("send");
        wait_for_state(&mut harness, SessionState::Idle).await;

        // Let the capture's original completion time pass; the aborted
        // task must not resurface and write its raw file.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let raws: Vec<_> = std::fs::read_dir(&harness.config.scans_root)
            .expect("scans root")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_scan_"))
            .collect();
        assert!(
            raws.is_empty(),
            "cancelled capture left raw files: {:?}",
            raws.iter().map(|e| e.file_name()).collect::<Vec<_>>()
        );
        assert!(harness.mailer.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn phone_and_purchase_terms_are_pushed_to_the_ui() {
        let mut harness = spawn_kiosk(PaymentMode::PassThrough, Arc::new(SyntheticScanner));

        harness
            .events
            .send(KioskEvent::PhoneEntered("5551234567".into()))
            .await
            .expect("send");
        let phone = loop {
            match harness.notices.recv().await.expect("notice") {
                UiNotice::PhoneChanged(phone) => break phone,
                UiNotice::Error { message, .. } => panic!("unexpected error: {message}"),
                _ => {}
            }
        };
        assert_eq!(phone, "5551234567");

        harness
            .events
            .send(KioskEvent::PackageSelected(4))
            .await
            .expect("send");
        let (credits, price_cents) = loop {
            match harness.notices.recv().await.expect("notice") {
                UiNotice::PurchaseTerms {
                    credits,
                    price_cents,
                } => break (credits, price_cents),
                UiNotice::Error { message, .. } => panic!("unexpected error: {message}"),
                _ => {}
            }
        };
        assert_eq!(credits, 4);
        assert_eq!(price_cents, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_cancels_like_an_explicit_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = KioskConfig::rooted_at(dir.path());
        config.payment.mode = PaymentMode::PassThrough;
        config.idle_timeout_secs = 60;

        let mailer = Arc::new(RecordingMailer::succeeding());
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let (orchestrator, events) = SessionOrchestrator::new(
            config,
            Arc::new(HangingScanner),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );
        tokio::spawn(orchestrator.run());

        events
            .send(KioskEvent::PhoneEntered("5550001111".into()))
            .await
            .expect("send");

        // No interaction for longer than the idle window.
        let mut saw_idle = false;
        while let Some(notice) = notices.recv().await {
            if notice == UiNotice::StateChanged(SessionState::Idle) {
                saw_idle = true;
                break;
            }
        }
        assert!(saw_idle, "idle timeout must reset the session");
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_quantity_is_rejected_without_side_effects() {
        let mut harness = spawn_kiosk(PaymentMode::PassThrough, Arc::new(SyntheticScanner));

        harness
            .events
            .send(KioskEvent::PhoneEntered("5551230000".into()))
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::PhoneCaptured).await;

        harness
            .events
            .send(KioskEvent::PackageSelected(3))
            .await
            .expect("send");

        let kind = loop {
            match harness.notices.recv().await.expect("notice") {
                UiNotice::Error { kind, .. } => break kind,
                _ => {}
            }
        };
        assert_eq!(kind, FailureKind::Input);

        // A valid selection still works afterwards.
        harness
            .events
            .send(KioskEvent::PackageSelected(1))
            .await
            .expect("send");
        wait_for_state(&mut harness, SessionState::Scanning).await;
    }

    #[tokio::test(start_paused = true)]
    async fn scan_request_at_full_credit_count_is_a_no_op_that_delivers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = KioskConfig::rooted_at(dir.path());
        config.ensure_directories().expect("dirs");
        let mailer = Arc::new(RecordingMailer::succeeding());
        let (notice_tx, _notices) = mpsc::unbounded_channel();
        let (mut orchestrator, _events) = SessionOrchestrator::new(
            config,
            Arc::new(SyntheticScanner),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );

        orchestrator.session.credits = 1;
        orchestrator.session.current_scan = 1;
        orchestrator.session.state = SessionState::Scanning;

        orchestrator.handle_ui(KioskEvent::ScanRequested).await;

        assert_eq!(orchestrator.session.current_scan, 1, "index must not move");
        assert_eq!(orchestrator.session.state, SessionState::Delivering);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_request_mid_capture_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = KioskConfig::rooted_at(dir.path());
        let (notice_tx, _notices) = mpsc::unbounded_channel();
        let (mut orchestrator, _events) = SessionOrchestrator::new(
            config,
            Arc::new(HangingScanner),
            Arc::new(RecordingMailer::succeeding()) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );

        orchestrator.session.credits = 2;
        orchestrator.session.state = SessionState::Scanning;
        orchestrator.scan_in_flight = true;

        orchestrator.handle_ui(KioskEvent::ScanRequested).await;

        assert_eq!(orchestrator.session.current_scan, 0);
        assert_eq!(orchestrator.session.state, SessionState::Scanning);
        assert!(orchestrator.scan_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_completion_for_a_superseded_session_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = KioskConfig::rooted_at(dir.path());
        let (notice_tx, _notices) = mpsc::unbounded_channel();
        let (mut orchestrator, _events) = SessionOrchestrator::new(
            config,
            Arc::new(SyntheticScanner),
            Arc::new(RecordingMailer::succeeding()) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );

        orchestrator.session.credits = 1;
        orchestrator.session.state = SessionState::Processing;

        let stale = WorkEvent::ProcessingFinished {
            session: SessionId::new(),
            index: 1,
            result: Err(KioskError::ImageError("late".into())),
        };
        orchestrator.handle_work(stale).await;

        // The current session is untouched.
        assert_eq!(orchestrator.session.state, SessionState::Processing);
        assert_eq!(orchestrator.session.current_scan, 0);
    }

    #[tokio::test]
    async fn delivery_failure_still_completes_the_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = KioskConfig::rooted_at(dir.path());
        config.payment.mode = PaymentMode::PassThrough;
        config.idle_timeout_secs = 3600;
        config.ensure_directories().expect("dirs");

        let mailer = Arc::new(RecordingMailer::failing());
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let (orchestrator, events) = SessionOrchestrator::new(
            config.clone(),
            Arc::new(SyntheticScanner),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(FakeProvider::never_settling()),
            Arc::new(FakeQrEncoder),
            Arc::new(ChannelUi(notice_tx)),
        );
        tokio::spawn(orchestrator.run());

        events
            .send(KioskEvent::PhoneEntered("5552223333".into()))
            .await
            .expect("send");
        events
            .send(KioskEvent::PackageSelected(1))
            .await
            .expect("send");

        // Wait for Scanning, then request the one scan.
        loop {
            match notices.recv().await.expect("notice") {
                UiNotice::StateChanged(SessionState::Scanning) => break,
                UiNotice::Error { message, .. } => panic!("unexpected error: {message}"),
                _ => {}
            }
        }
        events.send(KioskEvent::ScanRequested).await.expect("send");

        let delivered = loop {
            match notices.recv().await.expect("notice") {
                UiNotice::SessionComplete { delivered } => break delivered,
                _ => {}
            }
        };
        assert!(!delivered);

        // Artifacts landed under failed_deliveries, not archive.
        let failed_root = config.failed_deliveries_dir();
        let saved: Vec<_> = std::fs::read_dir(&failed_root)
            .expect("failed dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(saved.len(), 1);
    }
}
