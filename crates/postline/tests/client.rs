//! Integration tests for the send queue.
//!
//! A scripted transport records every call the worker makes and refuses the
//! ones it is told to, so ordering, recovery and idle shutdown can be checked
//! without a server. Tests run on a paused clock; the scripted calls never
//! sleep, so time only moves when a test waits for the idle timer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use postline::message::BodyStream;
use postline::{Client, ClientConfig, ConnectionState, Draft, Email, Error, Message, Step, Transport};
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect,
    Login,
    Greet,
    Mail(String),
    Rcpt(String),
    Data,
    Chunk(String),
    EndData,
    Reset,
    Quit,
    ForceClose,
}

use Call::{Connect, Data, EndData, ForceClose, Greet, Login, Quit, Reset};

fn mail(path: &str) -> Call {
    Call::Mail(path.to_string())
}

fn rcpt(path: &str) -> Call {
    Call::Rcpt(path.to_string())
}

/// Refusal pattern matching any body chunk.
fn any_chunk() -> Call {
    Call::Chunk(String::new())
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Refused(String);

#[derive(Debug, Default)]
struct Server {
    calls: Vec<Call>,
    connected: bool,
    logged_in: bool,
    needs_login: bool,
    /// A refused connect still leaves the socket open.
    half_open: bool,
    /// How long `QUIT` takes to be answered.
    quit_delay: Option<Duration>,
    refusals: Vec<Call>,
}

#[derive(Debug, Clone, Default)]
struct Mock {
    server: Arc<Mutex<Server>>,
}

impl Mock {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Self::default()
    }

    fn with_login() -> Self {
        let mock = Self::new();
        mock.server.lock().unwrap().needs_login = true;
        mock
    }

    /// Makes the next call matching `call` fail.
    fn refuse(&self, call: Call) {
        self.server.lock().unwrap().refusals.push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.server.lock().unwrap().calls.clone()
    }

    /// Calls without body chunks.
    fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Chunk(_)))
            .collect()
    }

    fn body(&self) -> String {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Chunk(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) -> Result<(), Refused> {
        let mut server = self.server.lock().unwrap();
        let refused = server.refusals.iter().position(|pattern| {
            *pattern == call || (*pattern == any_chunk() && matches!(call, Call::Chunk(_)))
        });
        server.calls.push(call.clone());
        match refused {
            Some(index) => {
                server.refusals.remove(index);
                Err(Refused(format!("{call:?} refused")))
            }
            None => Ok(()),
        }
    }

    fn exchange(&self, call: Call) -> Result<(), Refused> {
        if !self.server.lock().unwrap().connected {
            return Err(Refused("not connected".into()));
        }
        self.record(call)
    }

    fn set_connected(&self, connected: bool) {
        let mut server = self.server.lock().unwrap();
        server.connected = connected;
        server.logged_in = false;
    }
}

impl Transport for Mock {
    type Error = Refused;

    fn state(&self) -> ConnectionState {
        if self.server.lock().unwrap().connected {
            ConnectionState::Connected
        } else {
            ConnectionState::NotConnected
        }
    }

    fn is_authorized(&self) -> bool {
        let server = self.server.lock().unwrap();
        !server.needs_login || server.logged_in
    }

    async fn connect(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        let result = self.record(Connect);
        if result.is_ok() || self.server.lock().unwrap().half_open {
            self.set_connected(true);
        }
        result
    }

    async fn login(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(Login)?;
        self.server.lock().unwrap().logged_in = true;
        Ok(())
    }

    async fn greet_if_needed(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(Greet)
    }

    async fn mail(&mut self, reverse_path: &str) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(mail(reverse_path))
    }

    async fn rcpt(&mut self, forward_path: &str) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(rcpt(forward_path))
    }

    async fn data(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(Data)
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(Call::Chunk(String::from_utf8_lossy(&chunk).into_owned()))
    }

    async fn end_data(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(EndData)
    }

    async fn reset(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        self.exchange(Reset)
    }

    async fn quit(&mut self) -> Result<(), Refused> {
        tokio::task::yield_now().await;
        let delay = self.server.lock().unwrap().quit_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let result = self.exchange(Quit);
        self.set_connected(false);
        result
    }

    fn force_close(&mut self) {
        let _ = self.record(ForceClose);
        self.set_connected(false);
    }
}

/// A message whose body can be made to fail after its first chunk, and
/// whose validation can be made to never finish.
struct Note {
    from: &'static str,
    to: &'static str,
    failure: Option<&'static str>,
    stalled: bool,
}

impl Note {
    const fn new(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            to,
            failure: None,
            stalled: false,
        }
    }

    const fn failing(mut self, reason: &'static str) -> Self {
        self.failure = Some(reason);
        self
    }

    const fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

impl Message for Note {
    async fn validate(&self) -> Result<(), String> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn from(&self) -> Option<&str> {
        Some(self.from)
    }

    fn to(&self) -> Option<&str> {
        Some(self.to)
    }

    fn cc(&self) -> Option<&str> {
        None
    }

    fn bcc(&self) -> Option<&str> {
        None
    }

    fn return_path(&self) -> Option<&str> {
        None
    }

    fn body(&self) -> BodyStream {
        let (writer, body) = BodyStream::channel(4);
        let failure = self.failure;
        tokio::spawn(async move {
            let _ = writer.chunk("Subject: note\r\n\r\n").await;
            match failure {
                Some(reason) => writer.fail(io::Error::other(reason)).await,
                None => {
                    let _ = writer.chunk("all good\r\n").await;
                }
            }
        });
        body
    }
}

fn email(from: &str, to: &str) -> Email {
    Email::new(Draft::new(from).to(to).subject("test").text("Hello there"))
}

fn client(mock: &Mock) -> Client {
    Client::new(mock.clone(), ClientConfig::default())
}

fn envelope(from: &str, to: &str) -> Vec<Call> {
    vec![mail(&format!("<{from}>")), rcpt(&format!("<{to}>")), Data, EndData]
}

#[tokio::test(start_paused = true)]
async fn delivers_and_idles_out() {
    let mock = Mock::new();
    let client = client(&mock);

    client.send(email("a@x.com", "b@y.com")).await.unwrap();

    let mut expected = vec![Connect, Greet];
    expected.extend(envelope("a@x.com", "b@y.com"));
    assert_eq!(mock.commands(), expected);
    assert!(mock.body().contains("Subject: test\r\n"));
    assert!(mock.body().ends_with("Hello there\r\n"));

    sleep(Duration::from_millis(999)).await;
    assert_eq!(mock.count(&Quit), 0);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(mock.count(&Quit), 1);
    assert_eq!(mock.state(), ConnectionState::NotConnected);

    // The next message opens a fresh connection.
    client.send(email("a@x.com", "c@y.com")).await.unwrap();
    assert_eq!(mock.count(&Connect), 2);
}

#[tokio::test(start_paused = true)]
async fn new_message_cancels_idle_shutdown() {
    let mock = Mock::new();
    let client = client(&mock);

    client.send(email("a@x.com", "b@y.com")).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    client.send(email("a@x.com", "c@y.com")).await.unwrap();

    // The first timer would have fired at 1s.
    sleep(Duration::from_millis(900)).await;
    assert_eq!(mock.count(&Quit), 0);
    assert_eq!(mock.count(&Connect), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.count(&Quit), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_is_configurable() {
    let mock = Mock::new();
    let client: Client = Client::new(
        mock.clone(),
        ClientConfig::default().idle_timeout(Duration::from_secs(30)),
    );

    client.send(email("a@x.com", "b@y.com")).await.unwrap();
    sleep(Duration::from_secs(29)).await;
    assert_eq!(mock.count(&Quit), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(mock.count(&Quit), 1);
}

#[tokio::test(start_paused = true)]
async fn draft_without_recipients_is_rejected_synchronously() {
    let mock = Mock::new();
    let client = client(&mock);
    let seen = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&seen);
    client.submit_draft(Draft::new("a@x.com").text("hi"), move |result, _| {
        *slot.lock().unwrap() = Some(result);
    });

    let result = seen.lock().unwrap().take().expect("callback ran before submit_draft returned");
    match result {
        Err(Error::Validation(reason)) => assert_eq!(reason, "no recipients"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.backlog_len().await, 0);
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_message_never_reaches_the_queue() {
    let mock = Mock::new();
    let client = client(&mock);

    let err = client
        .send(Email::new(Draft::new("a@x.com").to("undisclosed-recipients:;").text("hi")))
        .await
        .unwrap_err();
    assert!(err.is_validation(), "{err}");

    let err = client.send(email("a@x.com", "broken address")).await.unwrap_err();
    assert!(err.is_validation(), "{err}");

    assert_eq!(client.backlog_len().await, 0);
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn messages_are_sent_in_order_one_at_a_time() {
    let mock = Mock::new();
    let client = client(&mock);
    let log = Arc::new(Mutex::new(Vec::new()));

    for sender in ["a@x.com", "b@x.com", "c@x.com"] {
        let log = Arc::clone(&log);
        client.submit(email(sender, "r@y.com"), move |result, _| {
            log.lock().unwrap().push((sender, result.is_ok()));
        });
    }

    let backlog = client.backlog().await;
    assert_eq!(backlog.len(), 3);
    assert_eq!(backlog[0].sender, "a@x.com");
    assert_eq!(backlog[0].recipients, ["r@y.com"]);

    client.send(email("d@x.com", "r@y.com")).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        [("a@x.com", true), ("b@x.com", true), ("c@x.com", true)]
    );

    let mut expected = vec![Connect, Greet];
    for sender in ["a@x.com", "b@x.com", "c@x.com", "d@x.com"] {
        expected.extend(envelope(sender, "r@y.com"));
    }
    assert_eq!(mock.commands(), expected);
    assert_eq!(client.backlog_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn recipients_follow_to_cc_bcc_order() {
    let mock = Mock::new();
    let client = client(&mock);

    let draft = Draft::new("Sender <s@x.com>")
        .to("t1@y.com, Second <t2@y.com>")
        .cc("c1@y.com")
        .bcc("t1@y.com")
        .text("hi");
    client.send(Email::new(draft)).await.unwrap();

    let rcpts: Vec<Call> = mock
        .commands()
        .into_iter()
        .filter(|call| matches!(call, Call::Rcpt(_)))
        .collect();
    assert_eq!(
        rcpts,
        [rcpt("<t1@y.com>"), rcpt("<t2@y.com>"), rcpt("<c1@y.com>"), rcpt("<t1@y.com>")]
    );
    assert!(!mock.body().contains("Bcc"));
}

#[tokio::test(start_paused = true)]
async fn return_path_overrides_sender() {
    let mock = Mock::new();
    let client = client(&mock);

    let draft = Draft::new("a@x.com").to("b@y.com").return_path("<bounces@x.com>").text("hi");
    client.send(Email::new(draft)).await.unwrap();
    assert_eq!(mock.commands()[2], mail("<bounces@x.com>"));
}

#[tokio::test(start_paused = true)]
async fn rejected_recipient_resets_and_keeps_the_connection() {
    let mock = Mock::new();
    mock.refuse(rcpt("<nobody@y.com>"));
    let client = client(&mock);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for to in ["nobody@y.com", "b@y.com"] {
        let tx = tx.clone();
        client.submit(email("a@x.com", to), move |result, _| tx.send(result).unwrap());
    }

    let err = rx.recv().await.unwrap().unwrap_err();
    assert_eq!(err.step(), Some(Step::Rcpt));
    assert!(err.to_string().contains("refused"));
    rx.recv().await.unwrap().unwrap();

    let mut expected = vec![Connect, Greet, mail("<a@x.com>"), rcpt("<nobody@y.com>"), Reset];
    expected.extend(envelope("a@x.com", "b@y.com"));
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn every_envelope_step_recovers_the_same_way() {
    for (refusal, step) in [
        (mail("<a@x.com>"), Step::Mail),
        (Data, Step::Data),
        (EndData, Step::EndData),
    ] {
        let mock = Mock::new();
        mock.refuse(refusal);
        let client = client(&mock);

        let err = client.send(email("a@x.com", "b@y.com")).await.unwrap_err();
        assert_eq!(err.step(), Some(step));
        client.send(email("a@x.com", "b@y.com")).await.unwrap();

        assert_eq!(mock.count(&Reset), 1);
        assert_eq!(mock.count(&Connect), 1);
        assert_eq!(mock.count(&ForceClose), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn body_failure_closes_the_connection() {
    let mock = Mock::new();
    let client: Client<Note> = Client::new(mock.clone(), ClientConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for note in [
        Note::new("a@x.com", "b@y.com").failing("attachment unreadable"),
        Note::new("a@x.com", "c@y.com"),
    ] {
        let tx = tx.clone();
        client.submit(note, move |result, _| tx.send(result).unwrap());
    }

    match rx.recv().await.unwrap() {
        Err(Error::Stream(err)) => assert_eq!(err.to_string(), "attachment unreadable"),
        other => panic!("unexpected result: {other:?}"),
    }
    rx.recv().await.unwrap().unwrap();

    let mut expected = vec![Connect, Greet, mail("<a@x.com>"), rcpt("<b@y.com>"), Data, ForceClose];
    expected.extend([Connect, Greet]);
    expected.extend(envelope("a@x.com", "c@y.com"));
    assert_eq!(mock.commands(), expected);
    assert_eq!(mock.count(&Reset), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_attachment_is_a_stream_error() {
    let mock = Mock::new();
    let client = client(&mock);

    let draft = Draft::new("a@x.com")
        .to("b@y.com")
        .text("see attached")
        .attach(postline::Attachment::path("/nonexistent/postline/q3.pdf", "application/pdf"));
    let err = client.send(Email::new(draft)).await.unwrap_err();
    assert!(matches!(err, Error::Stream(ref e) if e.kind() == io::ErrorKind::NotFound), "{err}");
    assert!(mock.body().contains("see attached"));
    assert_eq!(mock.count(&ForceClose), 1);
    assert_eq!(mock.state(), ConnectionState::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn chunk_write_failure_closes_the_connection() {
    let mock = Mock::new();
    mock.refuse(any_chunk());
    let client = client(&mock);

    let err = client.send(email("a@x.com", "b@y.com")).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{err}");
    assert_eq!(mock.count(&ForceClose), 1);

    client.send(email("a@x.com", "b@y.com")).await.unwrap();
    assert_eq!(mock.count(&Connect), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_only_fails_the_head() {
    let mock = Mock::new();
    mock.refuse(Connect);
    let client = client(&mock);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for to in ["b@y.com", "c@y.com"] {
        let tx = tx.clone();
        client.submit(email("a@x.com", to), move |result, email| {
            tx.send((email.draft().to.clone(), result)).unwrap();
        });
    }

    let (to, result) = rx.recv().await.unwrap();
    assert_eq!(to.as_deref(), Some("b@y.com"));
    assert!(matches!(result, Err(Error::Connection(_))));

    let (to, result) = rx.recv().await.unwrap();
    assert_eq!(to.as_deref(), Some("c@y.com"));
    result.unwrap();

    let mut expected = vec![Connect, Connect, Greet];
    expected.extend(envelope("a@x.com", "c@y.com"));
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_that_leaves_a_socket_is_closed() {
    let mock = Mock::new();
    mock.server.lock().unwrap().half_open = true;
    mock.refuse(Connect);
    let client = client(&mock);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for to in ["b@y.com", "c@y.com"] {
        let tx = tx.clone();
        client.submit(email("a@x.com", to), move |result, _| tx.send(result).unwrap());
    }

    let err = rx.recv().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{err}");
    rx.recv().await.unwrap().unwrap();

    let mut expected = vec![Connect, ForceClose, Connect, Greet];
    expected.extend(envelope("a@x.com", "c@y.com"));
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn submission_during_idle_quit_reconnects_afterwards() {
    let mock = Mock::new();
    mock.server.lock().unwrap().quit_delay = Some(Duration::from_millis(100));
    let client = client(&mock);

    client.send(email("a@x.com", "b@y.com")).await.unwrap();
    // The idle timer fired at 1s; QUIT is answered at 1.1s.
    sleep(Duration::from_millis(1050)).await;
    assert_eq!(mock.count(&Quit), 0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.submit(email("a@x.com", "c@y.com"), move |result, _| tx.send(result).unwrap());
    assert_eq!(client.backlog_len().await, 1);
    assert_eq!(mock.count(&Connect), 1);

    rx.recv().await.unwrap().unwrap();

    let mut expected = vec![Connect, Greet];
    expected.extend(envelope("a@x.com", "b@y.com"));
    expected.extend([Quit, Connect, Greet]);
    expected.extend(envelope("a@x.com", "c@y.com"));
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn slow_validation_holds_back_only_later_messages() {
    let mock = Mock::new();
    let client: Client<Note> = Client::new(mock.clone(), ClientConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for note in [
        Note::new("a@x.com", "b@y.com"),
        Note::new("a@x.com", "c@y.com").stalled(),
    ] {
        let tx = tx.clone();
        client.submit(note, move |result, note| tx.send((note.to, result)).unwrap());
    }

    let (to, result) = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("first message completes while the second is still validating")
        .unwrap();
    assert_eq!(to, "b@y.com");
    result.unwrap();
    assert_eq!(client.backlog_len().await, 0);

    sleep(Duration::from_secs(2)).await;
    let mut expected = vec![Connect, Greet];
    expected.extend(envelope("a@x.com", "b@y.com"));
    expected.push(Quit);
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn line_breaks_in_custom_headers_are_rejected() {
    let mock = Mock::new();
    let client: Client<Note> = Client::new(mock.clone(), ClientConfig::default());

    let err = client.send(Note::new("a@x.com", "b@y.com\r\nRSET")).await.unwrap_err();
    assert!(err.is_validation(), "{err}");
    let err = client.send(Note::new("a@x.com", "b@y.com>\r\nRCPT TO:<victim@z.com>")).await.unwrap_err();
    assert!(err.is_validation(), "{err}");

    assert_eq!(client.backlog_len().await, 0);
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_stop_the_queue() {
    let mock = Mock::new();
    let client = client(&mock);

    client.submit(email("a@x.com", "b@y.com"), |_, _| panic!("callback bug"));
    client.send(email("a@x.com", "c@y.com")).await.unwrap();

    assert!(!client.is_closed());
    assert_eq!(mock.count(&EndData), 2);
}

#[tokio::test(start_paused = true)]
async fn login_failure_drops_the_connection() {
    let mock = Mock::with_login();
    mock.refuse(Login);
    let client = client(&mock);

    let err = client.send(email("a@x.com", "b@y.com")).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{err}");
    client.send(email("a@x.com", "b@y.com")).await.unwrap();

    let mut expected = vec![Connect, Login, ForceClose, Connect, Login];
    expected.extend(envelope("a@x.com", "b@y.com"));
    assert_eq!(mock.commands(), expected);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_client_drains_then_quits() {
    let mock = Mock::new();
    let client = client(&mock);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for to in ["b@y.com", "c@y.com"] {
        let tx = tx.clone();
        client.submit(email("a@x.com", to), move |result, _| tx.send(result).unwrap());
    }
    drop(tx);
    drop(client);

    rx.recv().await.unwrap().unwrap();
    rx.recv().await.unwrap().unwrap();
    assert!(rx.recv().await.is_none());

    sleep(Duration::from_millis(1)).await;
    assert_eq!(mock.calls().last(), Some(&Quit));
    assert_eq!(mock.count(&Quit), 1);
}

#[test]
fn submit_after_shutdown_reports_closed() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let client: Client = runtime.block_on(async { Client::new(Mock::new(), ClientConfig::default()) });
    drop(runtime);
    assert!(client.is_closed());

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    client.submit(email("a@x.com", "b@y.com"), move |result, _| {
        *slot.lock().unwrap() = Some(result);
    });
    assert!(matches!(seen.lock().unwrap().take(), Some(Err(Error::Closed))));

    let result = tokio_test::block_on(client.send(email("a@x.com", "b@y.com")));
    assert!(matches!(result, Err(Error::Closed)));
    assert!(tokio_test::block_on(client.backlog()).is_empty());
}
