//! Upload driver.
//!
//! Binds an [`UploadSession`] to the connection: frames go out through
//! [`Connection::send_binary`], `uploadack` messages and `close` events come
//! in through the [`EventBus`].
//!
//! ```text
//! start ──► send window ──► uploadack(n) ──► send more ──► ... ──► Completed
//!                │                                                    ▲
//!                └──────────────── close ──────► Failed ──────────────┘
//!                                                 (callback runs once)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, Topic};
use crate::identifiers::SubscriptionId;
use crate::protocol::{BinaryFrame, DeviceMessage, UploadAck};

use super::session::{AckOutcome, UploadProgress, UploadSession};

// ============================================================================
// UploadOutcome
// ============================================================================

/// How an upload ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Every frame was acknowledged.
    Completed {
        /// Frames transferred.
        frames: usize,
        /// Bytes transferred.
        bytes: usize,
    },
    /// The connection closed before the device acknowledged everything.
    Failed {
        /// Close reason.
        reason: String,
    },
}

impl UploadOutcome {
    /// Returns `true` for [`UploadOutcome::Completed`].
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Completion callback, called exactly once per upload.
pub type CompletionCallback = Box<dyn FnOnce(UploadOutcome) + Send>;

// ============================================================================
// UploadController
// ============================================================================

struct ActiveUpload {
    session: UploadSession,
    subscriptions: [SubscriptionId; 2],
    on_complete: CompletionCallback,
}

struct Inner {
    connection: Connection,
    bus: Arc<EventBus>,
    active: Mutex<Option<ActiveUpload>>,
}

/// Runs at most one upload at a time.
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<Inner>,
}

impl UploadController {
    pub(crate) fn new(connection: Connection, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                bus,
                active: Mutex::new(None),
            }),
        }
    }

    /// Starts uploading `data`; the first window is sent immediately.
    ///
    /// `on_complete` runs exactly once, on the connection task, when the
    /// device has acknowledged every frame or the connection closes.
    ///
    /// # Errors
    ///
    /// - [`Error::Usage`] if an upload is already running or `data` is empty
    /// - [`Error::NotOpen`] if the connection is not open
    pub fn start<F>(&self, data: Vec<u8>, on_complete: F) -> Result<()>
    where
        F: FnOnce(UploadOutcome) + Send + 'static,
    {
        let mut active = self.inner.active.lock();
        if active.is_some() {
            return Err(Error::usage("an upload is already in progress"));
        }

        let mut session = UploadSession::new(data)?;

        let weak = Arc::downgrade(&self.inner);
        let ack = self
            .inner
            .bus
            .subscribe(Topic::message(UploadAck::NAME), move |event| {
                if let Event::Message { payload, .. } = event {
                    with_inner(&weak, |inner| inner.on_ack(payload));
                }
            })?;

        let weak = Arc::downgrade(&self.inner);
        let close = self.inner.bus.subscribe(Topic::Close, move |event| {
            if let Event::Close { reason, .. } = event {
                with_inner(&weak, |inner| inner.on_close(reason));
            }
        })?;

        // Checked only once the close listener is in place: the connection
        // task leaves Open before it dispatches close.
        let state = self.inner.connection.status();
        if !state.is_open() {
            for id in [ack, close] {
                if let Err(e) = self.inner.bus.unsubscribe(id) {
                    debug!(error = %e, "Upload listener already removed");
                }
            }
            return Err(Error::not_open(state));
        }

        info!(
            bytes = session.progress().total_bytes,
            frames = session.total_frames(),
            "Upload started"
        );

        let frames = session.next_frames();
        *active = Some(ActiveUpload {
            session,
            subscriptions: [ack, close],
            on_complete: Box::new(on_complete),
        });

        // Written under the lock so acks cannot interleave with the first window.
        self.inner.transmit(frames);
        Ok(())
    }

    /// Returns progress of the running upload, if any.
    #[must_use]
    pub fn progress(&self) -> Option<UploadProgress> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.session.progress())
    }

    /// Returns `true` while an upload is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }
}

impl std::fmt::Debug for UploadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadController")
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

fn with_inner(weak: &Weak<Inner>, f: impl FnOnce(&Inner)) {
    if let Some(inner) = weak.upgrade() {
        f(&inner);
    }
}

impl Inner {
    fn on_ack(&self, payload: &Value) {
        let Some(count) = payload.as_u64() else {
            warn!(%payload, "Malformed upload ack");
            return;
        };

        let mut active = self.active.lock();
        let Some(upload) = active.as_mut() else {
            debug!(count, "Upload ack without active upload");
            return;
        };

        match upload.session.acknowledge(count) {
            AckOutcome::Progress => {
                let frames = upload.session.next_frames();
                self.transmit(frames);
            }
            AckOutcome::Complete => {
                let finished = active.take();
                drop(active);
                if let Some(upload) = finished {
                    let progress = upload.session.progress();
                    self.finish(
                        upload,
                        UploadOutcome::Completed {
                            frames: progress.total_frames,
                            bytes: progress.total_bytes,
                        },
                    );
                }
            }
            AckOutcome::Ignored => {}
        }
    }

    fn on_close(&self, reason: &str) {
        let finished = self.active.lock().take();
        if let Some(upload) = finished {
            self.finish(
                upload,
                UploadOutcome::Failed {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Writes frames; a failed write is left to the `close` event.
    fn transmit(&self, frames: Vec<BinaryFrame>) {
        for frame in &frames {
            if let Err(e) = self.connection.send_binary(frame) {
                warn!(error = %e, "Upload frame not sent");
                return;
            }
        }
    }

    fn finish(&self, upload: ActiveUpload, outcome: UploadOutcome) {
        for id in upload.subscriptions {
            if let Err(e) = self.bus.unsubscribe(id) {
                debug!(error = %e, "Upload listener already removed");
            }
        }

        match &outcome {
            UploadOutcome::Completed { frames, bytes } => {
                info!(frames, bytes, "Upload complete");
            }
            UploadOutcome::Failed { reason } => {
                let progress = upload.session.progress();
                warn!(
                    %reason,
                    acked = progress.frames_acked,
                    total = progress.total_frames,
                    "Upload failed"
                );
            }
        }

        (upload.on_complete)(outcome);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::connection::{ConnectionCommand, ConnectionState};
    use crate::events::Lifecycle;
    use crate::protocol::FrameTag;
    use crate::rpc::RpcChannel;
    use crate::upload::{FRAME_SIZE, WINDOW};

    struct Fixture {
        connection: Connection,
        rx: UnboundedReceiver<ConnectionCommand>,
        bus: Arc<EventBus>,
        uploads: UploadController,
        outcomes: Arc<Mutex<Vec<UploadOutcome>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let (connection, rx) = Connection::open_for_test();
            let rpc = Arc::new(RpcChannel::new(connection.clone()));
            let bus = Arc::new(EventBus::new(rpc));
            let uploads = UploadController::new(connection.clone(), Arc::clone(&bus));
            Self {
                connection,
                rx,
                bus,
                uploads,
                outcomes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn start(&self, data: Vec<u8>) -> Result<()> {
            let outcomes = Arc::clone(&self.outcomes);
            self.uploads
                .start(data, move |outcome| outcomes.lock().push(outcome))
        }

        fn sent_frames(&mut self) -> Vec<BinaryFrame> {
            let mut frames = Vec::new();
            while let Ok(command) = self.rx.try_recv() {
                match command {
                    ConnectionCommand::Binary(bytes) => {
                        frames.push(BinaryFrame::decode(&bytes).expect("frame"));
                    }
                    other => panic!("unexpected command: {other:?}"),
                }
            }
            frames
        }

        fn ack(&self, count: u64) {
            self.bus.dispatch_incoming(&format!(r#"["uploadack",{count}]"#));
        }
    }

    #[test]
    fn test_small_upload_completes() {
        let mut fx = Fixture::new();
        fx.start(vec![3; 2801]).expect("start");

        let frames = fx.sent_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].tag, FrameTag::UploadEof);
        assert!(fx.outcomes.lock().is_empty());

        fx.ack(3);

        assert_eq!(
            *fx.outcomes.lock(),
            vec![UploadOutcome::Completed {
                frames: 3,
                bytes: 2801
            }]
        );
        assert!(!fx.uploads.is_active());
        assert_eq!(fx.bus.handler_count(&Topic::message("uploadack")), 0);
        assert_eq!(fx.bus.handler_count(&Topic::Close), 0);
    }

    #[test]
    fn test_acks_reopen_the_window() {
        let mut fx = Fixture::new();
        fx.start(vec![0; FRAME_SIZE * 30]).expect("start");
        assert_eq!(fx.sent_frames().len(), WINDOW);

        fx.ack(10);
        assert_eq!(fx.sent_frames().len(), 10);
        assert_eq!(fx.uploads.progress().map(|p| p.frames_sent), Some(30));

        fx.ack(20);
        assert!(fx.sent_frames().is_empty());
        assert!(fx.outcomes.lock().is_empty());

        fx.ack(30);
        assert!(fx.outcomes.lock()[0].is_success());
    }

    #[test]
    fn test_close_fails_upload_once() {
        let mut fx = Fixture::new();
        fx.start(vec![0; FRAME_SIZE * 5]).expect("start");
        fx.sent_frames();

        fx.bus.dispatch_lifecycle(&Lifecycle::Close {
            will_reconnect: true,
            reason: "link dropped".to_string(),
        });
        fx.bus.dispatch_lifecycle(&Lifecycle::Close {
            will_reconnect: false,
            reason: "again".to_string(),
        });
        fx.ack(5);

        assert_eq!(
            *fx.outcomes.lock(),
            vec![UploadOutcome::Failed {
                reason: "link dropped".to_string()
            }]
        );
    }

    #[test]
    fn test_double_start_rejected() {
        let fx = Fixture::new();
        fx.start(vec![1; 10]).expect("start");
        assert!(fx.start(vec![1; 10]).unwrap_err().is_usage_error());
    }

    #[test]
    fn test_start_requires_open_connection() {
        let fx = Fixture::new();
        fx.connection.set_state(ConnectionState::Connecting);
        assert!(matches!(fx.start(vec![1]), Err(Error::NotOpen { .. })));
        assert!(!fx.uploads.is_active());
        assert_eq!(fx.bus.handler_count(&Topic::message("uploadack")), 0);
        assert_eq!(fx.bus.handler_count(&Topic::Close), 0);
    }

    #[test]
    fn test_start_racing_connection_loss_reports_once() {
        for _ in 0..200 {
            let fx = Fixture::new();
            let connection = fx.connection.clone();
            let bus = Arc::clone(&fx.bus);
            let loss = std::thread::spawn(move || {
                connection.set_state(ConnectionState::Connecting);
                bus.dispatch_lifecycle(&Lifecycle::Close {
                    will_reconnect: true,
                    reason: "lost".to_string(),
                });
            });

            let started = fx.start(vec![0; FRAME_SIZE * 3]);
            loss.join().expect("loss thread");

            let outcomes = fx.outcomes.lock().clone();
            match started {
                Ok(()) => assert_eq!(
                    outcomes,
                    vec![UploadOutcome::Failed {
                        reason: "lost".to_string()
                    }]
                ),
                Err(e) => {
                    assert!(matches!(e, Error::NotOpen { .. }), "{e}");
                    assert!(outcomes.is_empty());
                }
            }
            assert!(!fx.uploads.is_active());
            assert_eq!(fx.bus.handler_count(&Topic::Close), 0);
        }
    }

    #[test]
    fn test_new_upload_after_completion() {
        let mut fx = Fixture::new();
        fx.start(vec![1; 10]).expect("start");
        fx.ack(1);
        fx.start(vec![2; 10]).expect("second start");
        assert_eq!(fx.sent_frames().len(), 2);
    }

    #[test]
    fn test_malformed_ack_ignored() {
        let mut fx = Fixture::new();
        fx.start(vec![1; 10]).expect("start");
        fx.sent_frames();

        fx.bus.dispatch_incoming(r#"["uploadack","one"]"#);
        assert!(fx.uploads.is_active());
    }
}
