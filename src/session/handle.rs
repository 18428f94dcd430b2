//! Session Handle
//!
//! Cheap cloneable front end to a session driver task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use super::bus::{EventBus, Subscription};
use super::completion::CommandHandle;
use super::driver::{Control, PendingCommand, SessionDriver};
use super::error::{CommandError, SessionError};
use super::events::{EventKind, SessionEvent};
use super::options::SessionOptions;
use super::state::{SessionInfo, SessionStatus};
use crate::command::types::generate_command_id;
use crate::command::{CancelReason, CommandSpec, HostId};
use crate::transport::Connector;

/// One host's session.
///
/// All clones drive the same task. When the last clone is dropped the
/// session disposes itself.
#[derive(Clone)]
pub struct Session {
    host_id: HostId,
    tx: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<SessionStatus>,
    disposed: Arc<AtomicBool>,
    bus: EventBus,
    concurrency: usize,
}

impl Session {
    /// Spawn the driver task for `host_id`. Must be called inside a tokio runtime.
    pub fn spawn(
        host_id: impl Into<HostId>,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        bus: EventBus,
    ) -> Self {
        let host_id = host_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::Closed);
        let disposed = Arc::new(AtomicBool::new(false));
        let concurrency = options.concurrency_limit();

        let driver = SessionDriver::new(
            host_id.clone(),
            options,
            connector,
            bus.clone(),
            tx.downgrade(),
            status_tx,
            disposed.clone(),
        );
        tokio::spawn(driver.run(rx));

        Self {
            host_id,
            tx,
            status,
            disposed,
            bus,
            concurrency,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether both handles drive the same session
    pub fn same_session(&self, other: &Session) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Connect, or join the attempt already in flight. No-op when ready.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Control::Connect { reply }).is_err() {
            return Err(SessionError::Disposed);
        }
        rx.await.unwrap_or(Err(SessionError::Disposed))
    }

    /// Queue a command. The returned handle settles exactly once.
    pub fn enqueue(&self, mut spec: CommandSpec) -> CommandHandle {
        let id = spec.id.take().unwrap_or_else(generate_command_id);

        if self.is_disposed() {
            return CommandHandle::settled(id, Err(SessionError::Disposed.into()));
        }

        if spec.abort.as_ref().is_some_and(|signal| signal.is_aborted()) {
            self.bus.emit(&SessionEvent::Cancelled {
                host_id: self.host_id.clone(),
                command_id: id.clone(),
                reason: CancelReason::Abort,
            });
            let err = CommandError::cancelled(id.clone(), CancelReason::Abort);
            return CommandHandle::settled(id, Err(err));
        }

        let (reply, rx) = oneshot::channel();
        let pending = PendingCommand::new(id.clone(), spec, reply);
        // A closed driver drops `pending`, which resolves the handle as disposed
        let _ = self.tx.send(Control::Enqueue { pending });
        CommandHandle::new(id, rx)
    }

    /// Cancel a queued or running command. Returns false if it is unknown.
    pub async fn cancel(&self, command_id: &str, reason: CancelReason) -> bool {
        let (reply, rx) = oneshot::channel();
        let control = Control::Cancel {
            command_id: command_id.to_string(),
            reason,
            reply: Some(reply),
        };
        if self.tx.send(control).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Settle everything as `session-disposed`, close the connection and stop.
    /// Idempotent.
    pub async fn dispose(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Control::Dispose { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Snapshot of the session's state
    pub async fn info(&self) -> SessionInfo {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Control::Snapshot { reply }).is_err() {
            return SessionInfo::stopped(self.host_id.clone(), self.concurrency);
        }
        rx.await
            .unwrap_or_else(|_| SessionInfo::stopped(self.host_id.clone(), self.concurrency))
    }

    /// Listen to one event kind, limited to this session's host
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let host_id = self.host_id.clone();
        self.bus.subscribe(kind, move |event| {
            if event.host_id() == host_id {
                handler(event);
            }
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host_id", &self.host_id)
            .field("status", &self.status())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AbortController;
    use crate::session::testing::{eventually, options, wait_for_status, Recorder};
    use crate::transport::mock::MockConnector;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn spawn(connector: &Arc<MockConnector>, options: SessionOptions) -> (Session, Recorder) {
        let bus = EventBus::new();
        let recorder = Recorder::attach(&bus);
        let session = Session::spawn("web-1", options, connector.clone(), bus);
        (session, recorder)
    }

    #[tokio::test]
    async fn test_connect_and_run() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());
        assert_eq!(session.status(), SessionStatus::Closed);

        session.connect().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Ready);

        let handle = session.enqueue(
            CommandSpec::new("echo hi")
                .with_cwd("/tmp")
                .with_env("LANG", "C"),
        );
        let channel = connector.next_channel().await;
        assert_eq!(channel.command, "cd '/tmp' && echo hi");
        assert_eq!(channel.env.get("LANG").map(String::as_str), Some("C"));

        channel.stdout("hi\n");
        channel.stderr("warning\n");
        channel.finish(0);

        let result = handle.await.unwrap();
        assert_eq!(result.code, Some(0));
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "warning\n");
        assert!(!result.truncated);

        assert_eq!(
            recorder.statuses(),
            vec![SessionStatus::Connecting, SessionStatus::Ready]
        );
        assert_eq!(recorder.count(EventKind::CommandQueued), 1);
        assert_eq!(recorder.count(EventKind::CommandStdout), 1);
        assert_eq!(recorder.count(EventKind::CommandEnd), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_resolves() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("false"));
        connector.next_channel().await.finish(1);

        let result = handle.await.unwrap();
        assert_eq!(result.code, Some(1));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_connect_is_single_flight() {
        let connector = MockConnector::new();
        connector.set_connect_delay(Duration::from_millis(50));
        let (session, _recorder) = spawn(&connector, options());

        let (a, b) = tokio::join!(session.connect(), session.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connector.connect_count(), 1);

        session.connect().await.unwrap();
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_reconnects_and_keeps_queue() {
        let connector = MockConnector::new();
        connector.fail_next_connect("connection refused");
        let (session, recorder) = spawn(&connector, options());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.info().await.reconnect_attempts, 1);

        let handle = session.enqueue(CommandSpec::new("uptime"));
        let channel = connector.next_channel().await;
        assert_eq!(connector.connect_count(), 2);
        channel.finish(0);
        handle.await.unwrap();

        assert_eq!(session.info().await.reconnect_attempts, 0);
        assert_eq!(
            recorder.statuses(),
            vec![
                SessionStatus::Connecting,
                SessionStatus::Error,
                SessionStatus::Connecting,
                SessionStatus::Ready,
            ]
        );
    }

    #[tokio::test]
    async fn test_priority_drain_order() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let a = session.enqueue(CommandSpec::new("A").with_priority(0));
        let b = session.enqueue(CommandSpec::new("B").with_priority(5));

        let first = connector.next_channel().await;
        assert_eq!(first.command, "B");
        first.finish(0);
        b.await.unwrap();

        let second = connector.next_channel().await;
        assert_eq!(second.command, "A");
        second.finish(0);
        a.await.unwrap();

        assert_eq!(recorder.started(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_limit_one_serializes_commands() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());
        session.connect().await.unwrap();

        let handles: Vec<_> = ["one", "two", "three"]
            .into_iter()
            .map(|c| session.enqueue(CommandSpec::new(c).with_id(c)))
            .collect();

        for name in ["one", "two", "three"] {
            let channel = connector.next_channel().await;
            assert_eq!(channel.command, name);
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(connector.try_next_channel().is_none());
            assert_eq!(session.info().await.in_flight, 1);
            channel.finish(0);
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let end_one = recorder.position(EventKind::CommandEnd, "one").unwrap();
        let start_two = recorder.position(EventKind::CommandStart, "two").unwrap();
        let end_two = recorder.position(EventKind::CommandEnd, "two").unwrap();
        let start_three = recorder.position(EventKind::CommandStart, "three").unwrap();
        assert!(end_one < start_two);
        assert!(end_two < start_three);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let connector = MockConnector::new();
        let bus = EventBus::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe_many(&[EventKind::CommandStart, EventKind::CommandEnd], {
            let running = running.clone();
            let peak = peak.clone();
            move |event| match event.kind() {
                EventKind::CommandStart => {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                }
                _ => {
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });
        let session = Session::spawn("web-1", options().with_concurrency(2), connector.clone(), bus);

        let handles: Vec<_> = (0..5)
            .map(|i| session.enqueue(CommandSpec::new(format!("job-{}", i))))
            .collect();

        let mut open = vec![connector.next_channel().await, connector.next_channel().await];
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(connector.try_next_channel().is_none());

        for _ in 0..3 {
            open.remove(0).finish(0);
            open.push(connector.next_channel().await);
        }
        for channel in open {
            channel.finish(0);
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_command() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let running = session.enqueue(CommandSpec::new("sleep 10"));
        let queued = session.enqueue(CommandSpec::new("ls").with_id("queued"));
        let channel = connector.next_channel().await;

        assert!(session.cancel("queued", CancelReason::User).await);
        let err = queued.now_or_never().expect("settled on cancel").unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::User));
        assert!(err.partial_result().is_none());

        channel.finish(0);
        running.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(connector.try_next_channel().is_none());
        assert_eq!(recorder.started(), vec!["sleep 10"]);
        assert_eq!(recorder.count(EventKind::CommandCancelled), 1);
        assert!(!session.cancel("queued", CancelReason::User).await);
    }

    #[tokio::test]
    async fn test_cancel_running_command_force_closes() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("tail -f log").with_id("tail"));
        let channel = connector.next_channel().await;
        channel.stdout("line 1\n");

        assert!(session.cancel("tail", CancelReason::User).await);
        assert!(session.cancel("tail", CancelReason::Other).await);

        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::User));
        let partial = err.partial_result().unwrap();
        assert_eq!(partial.stdout, "line 1\n");
        assert!(partial.stderr.contains("Command cancelled (user)."));

        assert_eq!(channel.interrupts(), 1);
        assert!(channel.closed_by_client());
        assert_eq!(recorder.count(EventKind::CommandCancelled), 1);
        assert_eq!(recorder.count(EventKind::CommandEnd), 1);
    }

    #[tokio::test]
    async fn test_cancelled_command_that_exits_keeps_exit_code() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("make").with_id("make"));
        let channel = connector.next_channel().await;

        assert!(session.cancel("make", CancelReason::User).await);
        channel.finish(130);

        let err = handle.await.unwrap_err();
        assert_eq!(err.partial_result().unwrap().code, Some(130));
        assert!(!channel.closed_by_client());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("sleep 100").with_timeout(Duration::from_secs(5)));
        let channel = connector.next_channel().await;

        let started = tokio::time::Instant::now();
        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(channel.interrupts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables_timer() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options().with_default_timeout(Duration::from_secs(1)));

        let mut handle = session.enqueue(CommandSpec::new("long job").with_timeout_ms(0));
        let channel = connector.next_channel().await;

        let waited = tokio::time::timeout(Duration::from_secs(3600), &mut handle).await;
        assert!(waited.is_err());

        channel.finish(0);
        assert_eq!(handle.await.unwrap().code, Some(0));
    }

    #[tokio::test]
    async fn test_error_and_close_settle_once() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("cat /dev/urandom").with_id("cat"));
        let channel = connector.next_channel().await;
        channel.stdout("partial");
        channel.error("channel exploded");
        channel.close();
        channel.close();

        match handle.await {
            Err(CommandError::Execution { message, result, .. }) => {
                assert_eq!(message, "channel exploded");
                let result = result.unwrap();
                assert_eq!(result.stdout, "partial");
                assert!(result.stderr.contains("channel exploded"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.count(EventKind::CommandEnd), 1);
    }

    #[tokio::test]
    async fn test_exec_failure_resumes_drain() {
        let connector = MockConnector::new();
        connector.fail_next_exec("administratively prohibited");
        let (session, _recorder) = spawn(&connector, options());

        let failing = session.enqueue(CommandSpec::new("first"));
        let next = session.enqueue(CommandSpec::new("second"));

        match failing.await {
            Err(CommandError::Execution { message, result, .. }) => {
                assert!(message.contains("administratively prohibited"));
                assert_eq!(result.unwrap().code, None);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let channel = connector.next_channel().await;
        assert_eq!(channel.command, "second");
        channel.finish(0);
        next.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_lost_fails_in_flight_and_reconnects() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());
        session.connect().await.unwrap();

        let handle = session.enqueue(CommandSpec::new("deploy.sh"));
        let channel = connector.next_channel().await;
        channel.stdout("step 1\n");
        eventually(|| recorder.count(EventKind::CommandStdout) == 1).await;

        connector.fail_next_connect("no route to host");
        connector.fail_next_connect("no route to host");
        connector.drop_connection();

        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::ConnectionLost));
        assert_eq!(err.partial_result().unwrap().stdout, "step 1\n");

        eventually(|| connector.connect_count() == 4).await;
        wait_for_status(&session, SessionStatus::Ready).await;

        assert_eq!(recorder.reconnect_attempts(), vec![1, 2, 3]);
        assert_eq!(session.info().await.reconnect_attempts, 0);
        eventually(|| channel.closed_by_client()).await;

        let statuses = recorder.statuses();
        assert_eq!(
            &statuses[2..],
            &[
                SessionStatus::Degraded,
                SessionStatus::Connecting,
                SessionStatus::Error,
                SessionStatus::Connecting,
                SessionStatus::Error,
                SessionStatus::Connecting,
                SessionStatus::Ready,
            ]
        );

        // Nothing is resubmitted after the loss
        assert_eq!(recorder.started(), vec!["deploy.sh"]);
    }

    #[tokio::test]
    async fn test_connection_error_counts_as_loss() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("rsync -a src dst"));
        let _channel = connector.next_channel().await;
        connector.connection_error("broken pipe");

        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::ConnectionLost));
        assert!(err.partial_result().unwrap().stderr.contains("broken pipe"));

        eventually(|| connector.connect_count() == 2).await;
        wait_for_status(&session, SessionStatus::Ready).await;
    }

    #[tokio::test]
    async fn test_dispose_settles_everything() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let running = session.enqueue(CommandSpec::new("A"));
        let queued_b = session.enqueue(CommandSpec::new("B"));
        let queued_c = session.enqueue(CommandSpec::new("C"));
        let _channel = connector.next_channel().await;

        session.dispose().await;
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(session.is_disposed());
        assert_eq!(connector.close_count(), 1);

        for handle in [running, queued_b, queued_c] {
            let err = handle.await.unwrap_err();
            assert_eq!(err.cancel_reason(), Some(CancelReason::SessionDisposed));
        }
        assert_eq!(recorder.count(EventKind::CommandCancelled), 3);
        assert_eq!(recorder.count(EventKind::CommandEnd), 1);

        let late = session.enqueue(CommandSpec::new("D"));
        assert_eq!(
            late.now_or_never(),
            Some(Err(CommandError::Session(SessionError::Disposed)))
        );
        assert_eq!(session.connect().await, Err(SessionError::Disposed));
        assert!(!session.cancel("anything", CancelReason::User).await);

        session.dispose().await;
        assert_eq!(connector.close_count(), 1);
        assert!(session.info().await.disposed);
    }

    #[tokio::test]
    async fn test_running_command_disposed_note() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("top"));
        let channel = connector.next_channel().await;
        session.dispose().await;

        let err = handle.await.unwrap_err();
        assert!(err.partial_result().unwrap().stderr.contains("Session disposed."));
        eventually(|| channel.closed_by_client()).await;
    }

    #[tokio::test]
    async fn test_dropping_last_handle_disposes() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let handle = session.enqueue(CommandSpec::new("A"));
        let _channel = connector.next_channel().await;
        drop(session);

        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::SessionDisposed));
        eventually(|| connector.close_count() == 1).await;
    }

    #[tokio::test]
    async fn test_abort_signal() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options());

        let already = AbortController::new();
        already.abort();
        let rejected = session.enqueue(CommandSpec::new("never").with_abort(already.signal()));
        let err = rejected.now_or_never().unwrap().unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::Abort));
        assert_eq!(recorder.count(EventKind::CommandQueued), 0);

        let controller = AbortController::new();
        let handle = session.enqueue(CommandSpec::new("watch df").with_abort(controller.signal()));
        let channel = connector.next_channel().await;
        controller.abort();

        let err = handle.await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::Abort));
        assert_eq!(channel.interrupts(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let connector = MockConnector::new();
        let (session, _recorder) = spawn(&connector, options());

        let first = session.enqueue(CommandSpec::new("one").with_id("job"));
        let channel = connector.next_channel().await;
        let second = session.enqueue(CommandSpec::new("two").with_id("job"));

        assert_eq!(second.await, Err(CommandError::DuplicateId("job".to_string())));
        channel.finish(0);
        assert_eq!(first.await.unwrap().id, "job");
    }

    #[tokio::test]
    async fn test_output_cap_truncates_buffer_not_events() {
        let connector = MockConnector::new();
        let (session, recorder) = spawn(&connector, options().with_max_output_bytes(4));

        let handle = session.enqueue(CommandSpec::new("yes"));
        let channel = connector.next_channel().await;
        channel.stdout("abcdef");
        channel.finish(0);

        let result = handle.await.unwrap();
        assert_eq!(result.stdout, "abcd");
        assert!(result.truncated);
        assert!(recorder.events().iter().any(|e| matches!(
            e,
            SessionEvent::Stdout { chunk, .. } if chunk == "abcdef"
        )));
    }

    #[tokio::test]
    async fn test_subscribe_is_host_scoped() {
        let connector = MockConnector::new();
        let bus = EventBus::new();
        let web = Session::spawn("web-1", options(), connector.clone(), bus.clone());
        let db = Session::spawn("db-1", options(), connector.clone(), bus);

        let seen = Arc::new(AtomicUsize::new(0));
        let sub = web.subscribe(EventKind::SessionStatus, {
            let seen = seen.clone();
            move |event| {
                assert_eq!(event.host_id(), "web-1");
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        db.connect().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        web.connect().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        sub.unsubscribe();
    }
}
