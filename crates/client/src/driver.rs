//! Client-side transfer state machine.
//!
//! A [`TransferDriver`] runs one upload: `open`, a strictly sequential
//! `append` loop, then `close`. Pause and stop are cooperative: they are
//! observed only between requests, never preempting one in flight. The
//! confirmed offset is always the size the server reports.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use chunkline_protocol::{
    AppendHeader, CloseRequest, OpenRequest, RemoveRequest, SessionId, checksum_bytes,
};

use crate::chunking::{ChunkSizer, throughput};
use crate::config::ClientConfig;
use crate::connection::{RequestFuture, UploadConnection};
use crate::error::{RequestError, SizeMismatch, UploadError};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::ChunkSource;
use crate::status::{StatusReporter, TransferClock, TransferStatus};
use crate::types::{TransferEvent, TransferOutcome, TransferPhase, TransferState, UploadTarget};

/// Capacity of the event channel.
///
/// The driver never waits on it. Events that do not fit are dropped,
/// except the terminal event, for which a slot is always kept free.
const EVENT_BUFFER: usize = 64;

/// Slots left for lifecycle events once `Progress` fills the channel.
const LIFECYCLE_RESERVE: usize = 8;

/// Control flags shared between a driver and its handles.
struct Control {
    pause: AtomicBool,
    resume: Notify,
    stop: CancellationToken,
}

/// Cloneable remote control for a running transfer.
#[derive(Clone)]
pub struct TransferHandle {
    control: Arc<Control>,
    status: watch::Receiver<TransferStatus>,
}

impl TransferHandle {
    /// Requests a pause once the in-flight request completes.
    pub fn pause(&self) {
        self.control.pause.store(true, Ordering::SeqCst);
    }

    /// Continues a paused transfer from the last confirmed offset.
    pub fn resume(&self) {
        if self.control.pause.swap(false, Ordering::SeqCst) {
            self.control.resume.notify_one();
        }
    }

    /// Aborts the transfer and removes its session on the server.
    ///
    /// Takes effect immediately when paused or waiting to retry, otherwise
    /// once the in-flight request completes. Has no effect while closing.
    pub fn stop(&self) {
        self.control.stop.cancel();
    }

    pub fn is_pause_requested(&self) -> bool {
        self.control.pause.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> TransferPhase {
        self.status.borrow().phase
    }

    pub fn status(&self) -> TransferStatus {
        *self.status.borrow()
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.status.clone()
    }
}

/// Why a request loop ended without a response.
enum Halt {
    Stopped,
    Failed(UploadError),
}

/// State, clock, retry counter and notification plumbing of one driver.
struct Tracker {
    state: TransferState,
    clock: TransferClock,
    declared_size: u64,
    retry: RetryPolicy,
    request_timeout: Duration,
    control: Arc<Control>,
    status_tx: watch::Sender<TransferStatus>,
    events_tx: mpsc::Sender<TransferEvent>,
}

impl Tracker {
    fn publish(&self) -> TransferStatus {
        let elapsed = self.clock.elapsed(Instant::now());
        let status = StatusReporter::report(&self.state, self.declared_size, elapsed);
        self.status_tx.send_replace(status);
        status
    }

    fn set_phase(&mut self, phase: TransferPhase) {
        self.state.phase = phase;
        self.publish();
    }

    fn emit(&self, event: TransferEvent) {
        let reserve = match &event {
            TransferEvent::Progress(_) => LIFECYCLE_RESERVE,
            e if e.is_terminal() => 0,
            _ => 1,
        };
        if self.events_tx.capacity() > reserve {
            let _ = self.events_tx.try_send(event);
        } else {
            trace!(?event, "event channel full, dropping event");
        }
    }

    fn emit_progress(&self) {
        let status = self.publish();
        self.emit(TransferEvent::Progress(status));
    }

    /// Issues a request until it succeeds, fails for good, or is stopped.
    ///
    /// Every attempt is bounded by the request timeout; a timeout counts as
    /// a connectivity fault. When `cancellable`, a stop during the backoff
    /// wait suppresses the retry.
    async fn call<'x, T>(
        &mut self,
        op: &'static str,
        cancellable: bool,
        mut request: impl FnMut() -> RequestFuture<'x, T>,
    ) -> Result<T, Halt> {
        loop {
            let result = match tokio::time::timeout(self.request_timeout, request()).await {
                Ok(result) => result,
                Err(_) => Err(RequestError::Connectivity(format!(
                    "{op} timed out after {:?}",
                    self.request_timeout
                ))),
            };

            let err = match result {
                Ok(value) => {
                    self.retry.on_success();
                    if self.state.retry_count != 0 {
                        self.state.retry_count = 0;
                        self.publish();
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match self.retry.on_failure(&err) {
                RetryDecision::Retry { attempt, delay } => {
                    warn!(op, attempt, ?delay, "request failed, retrying: {err}");
                    self.state.retry_count = attempt;
                    self.publish();
                    self.emit(TransferEvent::Retrying { attempt, delay });

                    let cancel = cancellable.then_some(&self.control.stop);
                    if !RetryPolicy::wait(delay, cancel).await {
                        debug!(op, "retry cancelled by stop");
                        return Err(Halt::Stopped);
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    error!(op, attempts, "retries exhausted: {err}");
                    self.state.retry_count = 0;
                    return Err(Halt::Failed(UploadError::Timeout {
                        attempts,
                        last: err.to_string(),
                    }));
                }
                RetryDecision::Fail => {
                    warn!(op, "request rejected: {err}");
                    return Err(Halt::Failed(UploadError::from_request(err)));
                }
            }
        }
    }
}

/// Drives one upload through open, append and close.
pub struct TransferDriver<C: UploadConnection> {
    conn: C,
    source: Box<dyn ChunkSource>,
    target: UploadTarget,
    overwrite: bool,
    session_id: Option<SessionId>,
    size_limit: Option<u64>,
    verify_chunks: bool,
    sizer: ChunkSizer,
    tracker: Tracker,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl<C: UploadConnection> TransferDriver<C> {
    /// Creates a driver that opens a new session.
    pub fn new(
        conn: C,
        source: impl ChunkSource + 'static,
        target: UploadTarget,
        config: &ClientConfig,
    ) -> Self {
        let sizer = ChunkSizer::new(config.chunk_min(), config.chunk_step(), config.chunk_max());
        let state = TransferState::new(sizer.current());
        let status = StatusReporter::report(&state, target.declared_size, Duration::ZERO);
        let (status_tx, _) = watch::channel(status);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let tracker = Tracker {
            state,
            clock: TransferClock::default(),
            declared_size: target.declared_size,
            retry: RetryPolicy::new(config.retry_limit(), config.retry_interval()),
            request_timeout: config.request_timeout(),
            control: Arc::new(Control {
                pause: AtomicBool::new(false),
                resume: Notify::new(),
                stop: CancellationToken::new(),
            }),
            status_tx,
            events_tx,
        };

        Self {
            conn,
            source: Box::new(source),
            target,
            overwrite: false,
            session_id: None,
            size_limit: config.size_limit(),
            verify_chunks: config.verify_chunks(),
            sizer,
            tracker,
            events_rx: Some(events_rx),
        }
    }

    /// Creates a driver that continues an existing session.
    ///
    /// No `open` is sent. The first append claims offset 0, so the server
    /// answers with the size it already holds and the transfer carries on
    /// from there.
    pub fn resume_session(
        conn: C,
        source: impl ChunkSource + 'static,
        target: UploadTarget,
        config: &ClientConfig,
        session_id: SessionId,
    ) -> Self {
        let mut driver = Self::new(conn, source, target, config);
        driver.session_id = Some(session_id);
        driver
    }

    /// Allows replacing an existing file of the same name.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn handle(&self) -> TransferHandle {
        TransferHandle {
            control: Arc::clone(&self.tracker.control),
            status: self.tracker.status_tx.subscribe(),
        }
    }

    /// Takes the event receiver. Events are discarded if it is never taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn phase(&self) -> TransferPhase {
        self.tracker.state.phase
    }

    /// Runs the transfer to a terminal phase.
    ///
    /// Emits exactly one terminal event and returns the same outcome.
    pub async fn start(mut self) -> Result<TransferOutcome, UploadError> {
        self.events_rx = None;
        self.tracker.clock.start(Instant::now());

        match self.run().await {
            Ok(outcome) => {
                self.tracker.set_phase(TransferPhase::Done);
                let event = if outcome.stopped {
                    info!(name = %self.target.file_name, "transfer stopped");
                    TransferEvent::Stopped
                } else {
                    info!(
                        name = %self.target.file_name,
                        size = outcome.final_size,
                        "transfer complete"
                    );
                    TransferEvent::Completed {
                        final_size: outcome.final_size,
                    }
                };
                self.tracker.emit(event);
                Ok(outcome)
            }
            Err(e) => {
                error!(name = %self.target.file_name, "transfer failed: {e}");
                self.tracker.set_phase(TransferPhase::Failed);
                self.tracker.emit(TransferEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> Result<TransferOutcome, UploadError> {
        let declared = self.target.declared_size;
        if let Some(limit) = self.size_limit
            && declared > limit
        {
            return Err(UploadError::TooLarge {
                size: declared,
                limit,
            });
        }

        let (session_id, resumed) = match self.session_id {
            Some(id) => (id, true),
            None => {
                self.tracker.set_phase(TransferPhase::Opening);
                let req = OpenRequest {
                    name: self.target.file_name.clone(),
                    overwrite: self.overwrite,
                };
                match self.tracker.call("open", true, || self.conn.open(&req)).await {
                    Ok(resp) => (resp.session_id, false),
                    Err(Halt::Stopped) => return Ok(self.stopped_outcome(None)),
                    Err(Halt::Failed(e)) => return Err(e),
                }
            }
        };
        self.session_id = Some(session_id);

        info!(session = %session_id, name = %self.target.file_name, resumed, "session opened");
        self.tracker.emit(TransferEvent::Opened {
            session_id,
            resumed,
        });
        self.tracker.set_phase(TransferPhase::Appending);

        loop {
            if self.tracker.control.stop.is_cancelled() {
                return self.abort(session_id).await;
            }
            if self.tracker.control.pause.load(Ordering::SeqCst) && !self.wait_paused().await {
                return self.abort(session_id).await;
            }

            let offset = self.tracker.state.offset;
            if offset >= declared {
                break;
            }

            let len = (self.sizer.current() as u64).min(declared - offset) as usize;
            let data = self.source.read_at(offset, len).await?;
            if data.is_empty() {
                return Err(UploadError::SourceTruncated {
                    offset,
                    expected: declared,
                });
            }

            let header = AppendHeader {
                id: String::new(),
                name: self.target.file_name.clone(),
                session_id,
                offset,
                checksum: if self.verify_chunks {
                    checksum_bytes(&data)
                } else {
                    String::new()
                },
            };

            let started = Instant::now();
            let size = match self
                .tracker
                .call("append", true, || self.conn.append(&header, &data))
                .await
            {
                Ok(resp) => resp.size,
                Err(Halt::Stopped) => return self.abort(session_id).await,
                Err(Halt::Failed(e)) => return Err(e),
            };
            let elapsed = started.elapsed();

            let expected = offset + data.len() as u64;
            if size != expected {
                debug!(
                    session = %session_id,
                    expected,
                    size,
                    "server size differs, resynchronizing"
                );
            }

            self.tracker.state.speed = throughput(data.len(), elapsed);
            self.tracker.state.chunk_size = self.sizer.observe(data.len(), elapsed);
            self.tracker.state.offset = size;
            debug!(
                session = %session_id,
                offset = size,
                chunk_size = self.tracker.state.chunk_size,
                "chunk confirmed"
            );
            self.tracker.emit_progress();
        }

        self.tracker.set_phase(TransferPhase::Closing);
        let req = CloseRequest {
            name: self.target.file_name.clone(),
            session_id,
            mtime: self.target.declared_modified_time,
            overwrite: self.overwrite,
        };
        let final_size = match self.tracker.call("close", false, || self.conn.close(&req)).await {
            Ok(resp) => resp.size,
            Err(Halt::Failed(e)) => return Err(e),
            Err(Halt::Stopped) => return self.abort(session_id).await,
        };
        self.tracker.state.offset = final_size;

        let size_mismatch = (final_size != declared).then_some(SizeMismatch {
            declared,
            actual: final_size,
        });
        if let Some(mismatch) = size_mismatch {
            warn!(session = %session_id, %mismatch, "finalized with unexpected size");
            self.tracker.emit(TransferEvent::Warning {
                message: mismatch.to_string(),
            });
        }

        Ok(TransferOutcome {
            session_id: Some(session_id),
            final_size,
            size_mismatch,
            stopped: false,
        })
    }

    /// Parks the driver until resumed. Returns `false` if stopped instead.
    async fn wait_paused(&mut self) -> bool {
        let control = Arc::clone(&self.tracker.control);

        self.tracker.state.speed = 0.0;
        self.tracker.clock.pause(Instant::now());
        self.tracker.set_phase(TransferPhase::Paused);
        info!(offset = self.tracker.state.offset, "transfer paused");
        self.tracker.emit(TransferEvent::Paused);

        loop {
            tokio::select! {
                _ = control.stop.cancelled() => return false,
                _ = control.resume.notified() => {
                    // A stale permit may wake us while still paused.
                    if !control.pause.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        self.tracker.clock.resume(Instant::now());
        self.tracker.set_phase(TransferPhase::Appending);
        info!(offset = self.tracker.state.offset, "transfer resumed");
        self.tracker.emit(TransferEvent::Resumed);
        true
    }

    /// Removes the session after a stop.
    async fn abort(&mut self, session_id: SessionId) -> Result<TransferOutcome, UploadError> {
        self.tracker.set_phase(TransferPhase::Stopping);
        let req = RemoveRequest {
            name: self.target.file_name.clone(),
            session_id,
        };
        match self.tracker.call("remove", false, || self.conn.remove(&req)).await {
            Ok(_) | Err(Halt::Stopped) => {
                info!(session = %session_id, "session removed");
            }
            Err(Halt::Failed(e)) => return Err(e),
        }
        Ok(self.stopped_outcome(Some(session_id)))
    }

    fn stopped_outcome(&self, session_id: Option<SessionId>) -> TransferOutcome {
        TransferOutcome {
            session_id,
            final_size: self.tracker.state.offset,
            size_mismatch: None,
            stopped: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use chunkline_protocol::{
        ErrorKind, OpenResponse, RemoveResponse, SizeResponse,
    };
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Fault {
        /// The request never reaches the server.
        Drop,
        /// The server applies the request but the reply is lost.
        LoseReply,
        Reject(ErrorKind),
        /// The chunk is damaged in transit.
        Corrupt,
        Delay(Duration),
    }

    #[derive(Default)]
    struct MockState {
        files: HashMap<String, Vec<u8>>,
        sessions: HashMap<SessionId, Vec<u8>>,
        append_faults: VecDeque<Fault>,
        always_drop: bool,
        close_size: Option<u64>,
        /// The next close is applied but its reply is lost.
        lose_close_reply: bool,
        finalized: HashMap<SessionId, u64>,
        calls: Vec<&'static str>,
        append_lens: Vec<usize>,
    }

    /// In-memory server with the store's append semantics.
    #[derive(Default)]
    struct MockServer {
        state: Mutex<MockState>,
    }

    fn rejected(kind: ErrorKind) -> RequestError {
        RequestError::Rejected {
            kind,
            message: "injected".into(),
        }
    }

    impl MockServer {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }

        fn count(&self, call: &str) -> usize {
            self.with(|s| s.calls.iter().filter(|c| **c == call).count())
        }

        fn file(&self, name: &str) -> Option<Vec<u8>> {
            self.with(|s| s.files.get(name).cloned())
        }

        fn apply_append(
            &self,
            header: &AppendHeader,
            data: &[u8],
            corrupt: bool,
        ) -> Result<SizeResponse, RequestError> {
            let mut state = self.state.lock().unwrap();
            let Some(session) = state.sessions.get_mut(&header.session_id) else {
                return Err(rejected(ErrorKind::UnknownSession));
            };
            let current = session.len() as u64;
            if current != header.offset {
                return Ok(SizeResponse { size: current });
            }
            if !header.checksum.is_empty() {
                let mut received = data.to_vec();
                if corrupt && !received.is_empty() {
                    received[0] ^= 0xff;
                }
                if checksum_bytes(&received) != header.checksum {
                    return Err(rejected(ErrorKind::ChecksumMismatch));
                }
            }
            session.extend_from_slice(data);
            Ok(SizeResponse {
                size: session.len() as u64,
            })
        }
    }

    impl UploadConnection for MockServer {
        fn open<'a>(&'a self, req: &'a OpenRequest) -> RequestFuture<'a, OpenResponse> {
            let result = self.with(|s| {
                s.calls.push("open");
                if s.files.contains_key(&req.name) && !req.overwrite {
                    return Err(rejected(ErrorKind::AlreadyExists));
                }
                let session_id = SessionId::generate();
                s.sessions.insert(session_id, Vec::new());
                Ok(OpenResponse { session_id })
            });
            Box::pin(async move { result })
        }

        fn append<'a>(
            &'a self,
            header: &'a AppendHeader,
            data: &'a [u8],
        ) -> RequestFuture<'a, SizeResponse> {
            let fault = self.with(|s| {
                s.calls.push("append");
                s.append_lens.push(data.len());
                if s.always_drop {
                    Some(Fault::Drop)
                } else {
                    s.append_faults.pop_front()
                }
            });
            Box::pin(async move {
                match &fault {
                    Some(Fault::Drop) => {
                        return Err(RequestError::Connectivity("dropped".into()));
                    }
                    Some(Fault::Reject(kind)) => return Err(rejected(*kind)),
                    Some(Fault::Delay(d)) => tokio::time::sleep(*d).await,
                    _ => {}
                }
                let result =
                    self.apply_append(header, data, matches!(fault, Some(Fault::Corrupt)));
                if matches!(fault, Some(Fault::LoseReply)) {
                    return Err(RequestError::Connectivity("reply lost".into()));
                }
                result
            })
        }

        fn close<'a>(&'a self, req: &'a CloseRequest) -> RequestFuture<'a, SizeResponse> {
            let result = self.with(|s| {
                s.calls.push("close");
                if let Some(size) = s.finalized.get(&req.session_id) {
                    return Ok(SizeResponse { size: *size });
                }
                if s.files.contains_key(&req.name) && !req.overwrite {
                    return Err(rejected(ErrorKind::AlreadyExists));
                }
                let Some(bytes) = s.sessions.remove(&req.session_id) else {
                    return Err(rejected(ErrorKind::UnknownSession));
                };
                let size = s.close_size.unwrap_or(bytes.len() as u64);
                s.files.insert(req.name.clone(), bytes);
                s.finalized.insert(req.session_id, size);
                if std::mem::take(&mut s.lose_close_reply) {
                    return Err(RequestError::Connectivity("reply lost".into()));
                }
                Ok(SizeResponse { size })
            });
            Box::pin(async move { result })
        }

        fn remove<'a>(&'a self, req: &'a RemoveRequest) -> RequestFuture<'a, RemoveResponse> {
            self.with(|s| {
                s.calls.push("remove");
                s.sessions.remove(&req.session_id);
            });
            Box::pin(async { Ok(RemoveResponse {}) })
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .chunk_min(1000)
            .chunk_step(500)
            .chunk_max(4000)
            .retry_limit(3)
            .retry_interval(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn driver(
        mock: &Arc<MockServer>,
        data: &[u8],
        config: &ClientConfig,
    ) -> TransferDriver<Arc<MockServer>> {
        let target = UploadTarget::new("a.bin", data.len() as u64);
        TransferDriver::new(
            Arc::clone(mock),
            MemorySource::new(data.to_vec()),
            target,
            config,
        )
    }

    async fn drain(mut rx: mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    fn without_progress(events: &[TransferEvent]) -> Vec<TransferEvent> {
        events
            .iter()
            .filter(|e| !matches!(e, TransferEvent::Progress(_)))
            .cloned()
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_whole_file() {
        let mock = MockServer::new();
        let data = payload(10_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();

        let outcome = d.start().await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.final_size, 10_000);
        assert_eq!(outcome.size_mismatch, None);
        assert_eq!(mock.file("a.bin").unwrap(), data);
        assert_eq!(handle.phase(), TransferPhase::Done);
        assert_eq!(handle.status().offset, 10_000);

        let events = drain(events).await;
        assert!(matches!(
            events.first(),
            Some(TransferEvent::Opened { resumed: false, .. })
        ));
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed { final_size: 10_000 })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.iter().any(|e| matches!(e, TransferEvent::Progress(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_sizes_stay_in_bounds() {
        let mock = MockServer::new();
        let data = payload(50_000);
        let d = driver(&mock, &data, &config());
        d.start().await.unwrap();

        let lens = mock.with(|s| s.append_lens.clone());
        let (last, rest) = lens.split_last().unwrap();
        assert!(rest.iter().all(|l| (1000..=4000).contains(l)), "{lens:?}");
        assert!(*last <= 4000);
        assert_eq!(lens.iter().sum::<usize>(), 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_file_is_opened_and_closed() {
        let mock = MockServer::new();
        let d = driver(&mock, &[], &config());
        let outcome = d.start().await.unwrap();
        assert_eq!(outcome.final_size, 0);
        assert_eq!(mock.count("append"), 0);
        assert_eq!(mock.file("a.bin").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_reply_is_retried_idempotently() {
        let mock = MockServer::new();
        mock.with(|s| {
            s.append_faults.extend([Fault::Drop, Fault::LoseReply, Fault::LoseReply])
        });
        let data = payload(5_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();

        let outcome = d.start().await.unwrap();
        assert_eq!(outcome.final_size, 5_000);
        assert_eq!(mock.file("a.bin").unwrap(), data);

        let events = drain(events).await;
        let retries = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Retrying { .. }))
            .count();
        assert_eq!(retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn checksum_mismatch_is_retried() {
        let mock = MockServer::new();
        mock.with(|s| s.append_faults.push_back(Fault::Corrupt));
        let data = payload(3_000);
        let d = driver(&mock, &data, &config());

        d.start().await.unwrap();
        assert_eq!(mock.file("a.bin").unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out_and_retries() {
        let mock = MockServer::new();
        mock.with(|s| {
            s.append_faults
                .push_back(Fault::Delay(Duration::from_secs(60)))
        });
        let data = payload(2_000);
        let d = driver(&mock, &data, &config());

        d.start().await.unwrap();
        assert_eq!(mock.file("a.bin").unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_limit() {
        let mock = MockServer::new();
        mock.with(|s| s.always_drop = true);
        let data = payload(2_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();

        let err = d.start().await.unwrap_err();
        assert!(matches!(err, UploadError::Timeout { attempts: 4, .. }), "{err}");
        assert_eq!(mock.count("append"), 4);
        assert_eq!(handle.phase(), TransferPhase::Failed);

        let events = drain(events).await;
        assert!(matches!(events.last(), Some(TransferEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn server_fault_is_not_retried() {
        let mock = MockServer::new();
        mock.with(|s| s.append_faults.push_back(Fault::Reject(ErrorKind::Internal)));
        let d = driver(&mock, &payload(2_000), &config());

        let err = d.start().await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Server {
                kind: ErrorKind::Internal,
                ..
            }
        ));
        assert_eq!(mock.count("append"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_file_aborts_on_open() {
        let mock = MockServer::new();
        mock.with(|s| s.files.insert("a.bin".into(), b"old".to_vec()));
        let d = driver(&mock, &payload(2_000), &config());

        let err = d.start().await.unwrap_err();
        assert!(matches!(err, UploadError::AlreadyExists(_)));
        assert_eq!(mock.count("append"), 0);
        assert_eq!(mock.file("a.bin").unwrap(), b"old");
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_replaces_existing_file() {
        let mock = MockServer::new();
        mock.with(|s| s.files.insert("a.bin".into(), b"old".to_vec()));
        let data = payload(1_500);
        let d = driver(&mock, &data, &config()).with_overwrite(true);

        d.start().await.unwrap();
        assert_eq!(mock.file("a.bin").unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn file_over_size_limit_is_refused() {
        let mock = MockServer::new();
        let config = ClientConfig::builder().size_limit(1_000).build().unwrap();
        let d = driver(&mock, &payload(2_000), &config);

        let err = d.start().await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::TooLarge {
                size: 2_000,
                limit: 1_000
            }
        ));
        assert_eq!(mock.count("open"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn size_mismatch_completes_with_warning() {
        let mock = MockServer::new();
        mock.with(|s| s.close_size = Some(1_999));
        let mut d = driver(&mock, &payload(2_000), &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();

        let outcome = d.start().await.unwrap();
        assert_eq!(
            outcome.size_mismatch,
            Some(SizeMismatch {
                declared: 2_000,
                actual: 1_999
            })
        );
        assert_eq!(handle.phase(), TransferPhase::Done);

        let events = without_progress(&drain(events).await);
        let n = events.len();
        assert!(matches!(events[n - 2], TransferEvent::Warning { .. }));
        assert_eq!(events[n - 1], TransferEvent::Completed { final_size: 1_999 });
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume() {
        let mock = MockServer::new();
        let data = payload(6_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();
        handle.pause();

        let task = tokio::spawn(d.start());
        let mut status = handle.subscribe();
        status
            .wait_for(|s| s.phase == TransferPhase::Paused)
            .await
            .unwrap();
        assert_eq!(mock.count("append"), 0);
        assert_eq!(handle.status().speed, 0.0);

        handle.resume();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.final_size, 6_000);
        assert_eq!(mock.file("a.bin").unwrap(), data);

        let events = without_progress(&drain(events).await);
        assert!(matches!(events[0], TransferEvent::Opened { .. }));
        assert_eq!(events[1], TransferEvent::Paused);
        assert_eq!(events[2], TransferEvent::Resumed);
        assert!(matches!(events[3], TransferEvent::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_removes_session() {
        let mock = MockServer::new();
        let mut d = driver(&mock, &payload(6_000), &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();
        handle.pause();

        let task = tokio::spawn(d.start());
        handle
            .subscribe()
            .wait_for(|s| s.phase == TransferPhase::Paused)
            .await
            .unwrap();

        handle.stop();
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.stopped);
        assert!(!outcome.is_complete());
        assert_eq!(mock.count("remove"), 1);
        assert_eq!(mock.count("close"), 0);
        assert!(mock.with(|s| s.sessions.is_empty()));
        assert_eq!(handle.phase(), TransferPhase::Done);

        let events = drain(events).await;
        assert_eq!(events.last(), Some(&TransferEvent::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_retry() {
        let mock = MockServer::new();
        mock.with(|s| s.always_drop = true);
        let config = ClientConfig::builder()
            .retry_limit(100)
            .retry_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let mut d = driver(&mock, &payload(2_000), &config);
        let mut events = d.take_events().unwrap();
        let handle = d.handle();

        let task = tokio::spawn(d.start());
        loop {
            match events.recv().await {
                Some(TransferEvent::Retrying { .. }) => break,
                Some(_) => continue,
                None => panic!("driver ended before retrying"),
            }
        }

        handle.stop();
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.stopped);
        assert_eq!(mock.count("append"), 1);
        assert_eq!(mock.count("remove"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_session_continues_from_server_size() {
        let mock = MockServer::new();
        let data = payload(9_000);
        let session_id = SessionId::generate();
        mock.with(|s| s.sessions.insert(session_id, data[..3_500].to_vec()));

        let target = UploadTarget::new("a.bin", data.len() as u64);
        let mut d = TransferDriver::resume_session(
            Arc::clone(&mock),
            MemorySource::new(data.clone()),
            target,
            &config(),
            session_id,
        );
        let events = d.take_events().unwrap();

        let outcome = d.start().await.unwrap();
        assert_eq!(outcome.session_id, Some(session_id));
        assert_eq!(mock.file("a.bin").unwrap(), data);
        assert_eq!(mock.count("open"), 0);

        let events = drain(events).await;
        assert!(matches!(
            events[0],
            TransferEvent::Opened { resumed: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn undrained_events_never_block() {
        let mock = MockServer::new();
        let config = ClientConfig::builder()
            .chunk_min(100)
            .chunk_step(100)
            .chunk_max(100)
            .build()
            .unwrap();
        let data = payload(20_000);
        let mut d = driver(&mock, &data, &config);
        // Held but not read until the run is over.
        let events = d.take_events().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), d.start())
            .await
            .expect("start waited on the event channel")
            .unwrap();
        assert_eq!(outcome.final_size, 20_000);
        assert_eq!(mock.count("append"), 200);

        let events = drain(events).await;
        assert!(events.len() <= EVENT_BUFFER);
        assert!(matches!(events[0], TransferEvent::Opened { .. }));
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed { final_size: 20_000 })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_reported_after_retry_flood() {
        let mock = MockServer::new();
        mock.with(|s| s.always_drop = true);
        let config = ClientConfig::builder()
            .retry_limit(200)
            .retry_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let mut d = driver(&mock, &payload(2_000), &config);
        let events = d.take_events().unwrap();

        let err = tokio::time::timeout(Duration::from_secs(60), d.start())
            .await
            .expect("start waited on the event channel")
            .unwrap_err();
        assert!(matches!(err, UploadError::Timeout { attempts: 201, .. }), "{err}");

        let events = drain(events).await;
        assert_eq!(events.len(), EVENT_BUFFER);
        assert!(matches!(events.last(), Some(TransferEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_close_reply_still_completes() {
        let mock = MockServer::new();
        mock.with(|s| s.lose_close_reply = true);
        let data = payload(3_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();

        let outcome = d.start().await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.final_size, 3_000);
        assert_eq!(mock.count("close"), 2);
        assert_eq!(mock.file("a.bin").unwrap(), data);

        let events = without_progress(&drain(events).await);
        assert!(matches!(events[1], TransferEvent::Retrying { attempt: 1, .. }));
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed { final_size: 3_000 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_append_waits_for_reply() {
        let mock = MockServer::new();
        mock.with(|s| {
            s.append_faults
                .push_back(Fault::Delay(Duration::from_secs(5)))
        });
        let data = payload(6_000);
        let mut d = driver(&mock, &data, &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();

        let task = tokio::spawn(d.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.count("append"), 1);
        handle.pause();

        handle
            .subscribe()
            .wait_for(|s| s.phase == TransferPhase::Paused)
            .await
            .unwrap();
        // The delayed chunk landed and counts; nothing else was sent.
        let first = mock.with(|s| s.append_lens[0]) as u64;
        assert_eq!(mock.count("append"), 1);
        assert_eq!(handle.status().offset, first);
        assert_eq!(
            mock.with(|s| s.sessions.values().next().map(Vec::len)),
            Some(first as usize)
        );

        handle.resume();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.final_size, 6_000);
        assert_eq!(mock.file("a.bin").unwrap(), data);

        let events = drain(events).await;
        let paused_at = events
            .iter()
            .position(|e| *e == TransferEvent::Paused)
            .unwrap();
        assert!(matches!(
            events[paused_at - 1],
            TransferEvent::Progress(status) if status.offset == first
        ));
        assert_eq!(events[paused_at + 1], TransferEvent::Resumed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_append_removes_after_reply() {
        let mock = MockServer::new();
        mock.with(|s| {
            s.append_faults
                .push_back(Fault::Delay(Duration::from_secs(5)))
        });
        let mut d = driver(&mock, &payload(6_000), &config());
        let events = d.take_events().unwrap();
        let handle = d.handle();

        let task = tokio::spawn(d.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.count("append"), 1);
        handle.stop();

        let outcome = task.await.unwrap().unwrap();
        let first = mock.with(|s| s.append_lens[0]) as u64;
        assert!(outcome.stopped);
        assert_eq!(outcome.final_size, first);
        assert_eq!(mock.count("append"), 1);
        assert_eq!(mock.count("remove"), 1);
        assert_eq!(mock.count("close"), 0);
        assert!(mock.with(|s| s.sessions.is_empty()));

        let events = drain(events).await;
        assert!(events.iter().any(
            |e| matches!(e, TransferEvent::Progress(status) if status.offset == first)
        ));
        assert_eq!(events.last(), Some(&TransferEvent::Stopped));
    }
}
