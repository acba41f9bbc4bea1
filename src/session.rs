//! Session state machine, registries, callback dispatch and the run loop.

use std::collections::{HashMap, HashSet};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep_until};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::error::StompError;
use crate::frame::{Command, Frame};
use crate::header::Version;
use crate::heartbeat::{HeartbeatMonitor, negotiate_heartbeats, parse_heartbeat_header};

/// Byte stream the session talks STOMP over. Blanket-implemented for every
/// async stream, so a `TcpStream`, a TLS stream or an in-memory duplex all
/// qualify.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Freshly created, no transport attached.
    Init,
    /// CONNECT sent, waiting for CONNECTED.
    Connecting,
    /// Handshake complete; request operations are accepted.
    Connected,
    /// DISCONNECT sent, waiting for the matching RECEIPT.
    Disconnecting,
    /// Terminated cleanly (disconnect receipt or server close).
    Closed,
    /// Terminated by an ERROR frame, protocol violation or timeout.
    Failed,
}

/// Events a callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Server sent CONNECTED.
    Connected = 0,
    /// Server sent ERROR, or the connection failed (heartbeat timeout).
    Error = 1,
    /// Server sent MESSAGE.
    Message = 2,
    /// Server sent RECEIPT.
    Receipt = 3,
    /// Invoked on every timer wake of the run loop.
    User = 4,
}

impl CallbackKind {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        self as usize
    }
}

/// Callback invoked by the run loop. The frame is `None` for the User slot
/// and for synthesized error events (heartbeat timeout).
pub type Callback<C> = Box<dyn FnMut(&mut Session<C>, Option<&Frame>) + Send>;

struct CallbackTable<C> {
    slots: [Option<Callback<C>>; CallbackKind::COUNT],
    /// Set by `callback_del` so a slot emptied from inside its own dispatch
    /// stays empty; an empty slot alone also means "taken out for dispatch".
    cleared: [bool; CallbackKind::COUNT],
}

impl<C> CallbackTable<C> {
    fn new() -> Self {
        Self {
            slots: [None, None, None, None, None],
            cleared: [false; CallbackKind::COUNT],
        }
    }
}

/// A STOMP client session.
///
/// The session is exclusively owned by the application: request operations
/// take `&mut self` and only append to the outbound buffer, while
/// [`Session::run`] is the single suspension point that flushes writes,
/// reads the transport and dispatches callbacks. Callbacks receive
/// `&mut Session` and may issue any request operation, including
/// [`Session::disconnect`].
pub struct Session<C> {
    state: SessionState,
    version: Version,
    context: C,
    transport: Option<Box<dyn Transport>>,
    codec: StompCodec,
    parse_buf: BytesMut,
    out_buf: BytesMut,
    heartbeat: HeartbeatMonitor,
    /// subscription id -> snapshot of the SUBSCRIBE headers
    subscriptions: HashMap<String, Vec<(String, String)>>,
    /// receipt ids awaiting a server RECEIPT
    pending_receipts: HashSet<String>,
    /// receipt id that completes the disconnect handshake
    disconnect_receipt: Option<String>,
    callbacks: CallbackTable<C>,
    next_subscription_id: u64,
    next_receipt_id: u64,
    /// client's heart-beat wish (cx, cy) as sent on CONNECT
    client_heartbeat: (u64, u64),
}

impl<C> Session<C> {
    /// Create a session in the `Init` state holding the given user context.
    pub fn new(context: C) -> Self {
        Self {
            state: SessionState::Init,
            version: Version::V1_0,
            context,
            transport: None,
            codec: StompCodec::new(),
            parse_buf: BytesMut::new(),
            out_buf: BytesMut::new(),
            heartbeat: HeartbeatMonitor::disabled(),
            subscriptions: HashMap::new(),
            pending_receipts: HashSet::new(),
            disconnect_receipt: None,
            callbacks: CallbackTable::new(),
            next_subscription_id: 1,
            next_receipt_id: 1,
            client_heartbeat: (0, 0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version negotiated on CONNECTED; `1.0` before that.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Consume the session and recover the user context.
    pub fn into_context(self) -> C {
        self.context
    }

    /// Register a callback for an event kind, replacing any previous one.
    pub fn callback_set(&mut self, kind: CallbackKind, cb: Callback<C>) {
        self.callbacks.slots[kind.index()] = Some(cb);
    }

    /// Clear the callback slot for an event kind. Effective immediately,
    /// including from inside the slot's own callback.
    pub fn callback_del(&mut self, kind: CallbackKind) {
        self.callbacks.slots[kind.index()] = None;
        self.callbacks.cleared[kind.index()] = true;
    }

    /// Connect to a broker over TCP and send the CONNECT frame.
    ///
    /// `service` is the TCP port. Caller headers are sent as-is;
    /// `accept-version` and `heart-beat` are injected when absent. The
    /// server's answer is delivered through the Connected (or Error)
    /// callback once [`Session::run`] drives the handshake.
    pub async fn connect(
        &mut self,
        host: &str,
        service: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        if self.state != SessionState::Init {
            return Err(StompError::NotConnected(self.state));
        }
        let stream = TcpStream::connect(format!("{host}:{service}")).await?;
        self.connect_with(stream, headers)?;
        self.flush().await
    }

    /// Like [`Session::connect`], but over a caller-supplied transport
    /// (e.g. a TLS stream). The CONNECT frame is buffered; the run loop
    /// flushes it.
    pub fn connect_with<T>(
        &mut self,
        transport: T,
        mut headers: Vec<(String, String)>,
    ) -> Result<(), StompError>
    where
        T: Transport + 'static,
    {
        if self.state != SessionState::Init {
            return Err(StompError::NotConnected(self.state));
        }
        if !headers.iter().any(|(k, _)| k == "accept-version") {
            headers.push(("accept-version".to_string(), "1.0,1.1,1.2".to_string()));
        }
        if !headers.iter().any(|(k, _)| k == "heart-beat") {
            headers.push(("heart-beat".to_string(), "0,0".to_string()));
        }
        self.client_heartbeat = headers
            .iter()
            .find(|(k, _)| k == "heart-beat")
            .map(|(_, v)| parse_heartbeat_header(v))
            .unwrap_or((0, 0));
        self.transport = Some(Box::new(transport));
        self.state = SessionState::Connecting;
        debug!("connecting");
        self.enqueue(Frame {
            command: Command::Connect,
            headers,
            body: Vec::new(),
        })
    }

    /// Subscribe to a destination.
    ///
    /// Headers MUST contain a `destination`. When no `id` header is given
    /// one is generated from the session counter and injected; an absent
    /// `ack` header defaults to `auto`. Returns the (possibly generated)
    /// subscription id. A caller-supplied id is not checked for uniqueness.
    pub fn subscribe(&mut self, mut headers: Vec<(String, String)>) -> Result<String, StompError> {
        self.require_connected()?;
        require_header(&headers, "destination")?;
        let id = match headers.iter().find(|(k, _)| k == "id") {
            Some((_, v)) => v.clone(),
            None => {
                let id = self.next_subscription_id.to_string();
                self.next_subscription_id += 1;
                headers.push(("id".to_string(), id.clone()));
                id
            }
        };
        if !headers.iter().any(|(k, _)| k == "ack") {
            headers.push(("ack".to_string(), "auto".to_string()));
        }
        self.subscriptions.insert(id.clone(), headers.clone());
        self.enqueue(Frame {
            command: Command::Subscribe,
            headers,
            body: Vec::new(),
        })?;
        Ok(id)
    }

    /// Unsubscribe from a destination.
    ///
    /// Headers MUST contain a `destination`. On 1.1+ the id must match a
    /// tracked subscription and an `id` header is injected when absent. The
    /// registry entry is removed on success.
    pub fn unsubscribe(
        &mut self,
        id: &str,
        mut headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.require_connected()?;
        require_header(&headers, "destination")?;
        if self.version >= Version::V1_1 {
            if !self.subscriptions.contains_key(id) {
                return Err(StompError::InvalidArgument(format!(
                    "unknown subscription id {id:?}"
                )));
            }
            if !headers.iter().any(|(k, _)| k == "id") {
                headers.push(("id".to_string(), id.to_string()));
            }
        }
        self.subscriptions.remove(id);
        self.enqueue(Frame {
            command: Command::Unsubscribe,
            headers,
            body: Vec::new(),
        })
    }

    /// Send a message. Headers MUST contain a `destination`; the codec sets
    /// `content-length` to the exact body length.
    pub fn send(
        &mut self,
        headers: Vec<(String, String)>,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), StompError> {
        self.require_connected()?;
        require_header(&headers, "destination")?;
        self.enqueue(Frame {
            command: Command::Send,
            headers,
            body: body.into(),
        })
    }

    /// Start a transaction. Headers MUST contain a non-empty `transaction`.
    pub fn begin(&mut self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.transaction_op(Command::Begin, headers)
    }

    /// Commit a transaction. Headers MUST contain a non-empty `transaction`.
    pub fn commit(&mut self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.transaction_op(Command::Commit, headers)
    }

    /// Abort a transaction. Headers MUST contain a non-empty `transaction`.
    pub fn abort(&mut self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.transaction_op(Command::Abort, headers)
    }

    /// Acknowledge a message. The mandated headers depend on the negotiated
    /// version: `message-id` (1.0), `message-id` + `subscription` (1.1), or
    /// `id` (1.2).
    pub fn ack(&mut self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.ack_op(Command::Ack, headers)
    }

    /// Negative-acknowledge a message. Header requirements as for
    /// [`Session::ack`]; not available on a 1.0 session.
    pub fn nack(&mut self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.require_connected()?;
        if self.version == Version::V1_0 {
            return Err(StompError::InvalidArgument(
                "NACK is not part of STOMP 1.0".to_string(),
            ));
        }
        self.ack_op(Command::Nack, headers)
    }

    /// Request an orderly disconnect.
    ///
    /// A `receipt` header is taken from the caller or generated. The
    /// session moves to `Disconnecting`; the run loop returns once the
    /// matching RECEIPT (or transport EOF) arrives.
    pub fn disconnect(&mut self, mut headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.require_connected()?;
        let receipt = match headers.iter().find(|(k, _)| k == "receipt") {
            Some((_, v)) => v.clone(),
            None => {
                let receipt = format!("rcpt-{}", self.next_receipt_id);
                self.next_receipt_id += 1;
                headers.push(("receipt".to_string(), receipt.clone()));
                receipt
            }
        };
        self.disconnect_receipt = Some(receipt);
        self.state = SessionState::Disconnecting;
        debug!("disconnecting");
        self.enqueue(Frame {
            command: Command::Disconnect,
            headers,
            body: Vec::new(),
        })
    }

    /// Drive the session until termination.
    ///
    /// Flushes buffered writes, waits on transport readability bounded by
    /// the heartbeat/user deadline, parses and dispatches inbound frames in
    /// arrival order, emits outgoing no-ops and invokes the User callback
    /// on timer wakes. Returns `Ok` on the disconnect receipt or when the
    /// server closes the connection; returns an error on protocol
    /// violations, I/O failure or heartbeat timeout. On exit the transport
    /// is released and all registries are cleared.
    pub async fn run(&mut self) -> Result<(), StompError> {
        loop {
            match self.state {
                SessionState::Init => return Err(StompError::NotConnected(self.state)),
                SessionState::Closed => {
                    self.teardown();
                    return Ok(());
                }
                _ => {}
            }

            if let Err(e) = self.flush().await {
                return Err(self.fail(e));
            }

            let deadline = self.heartbeat.next_deadline(Instant::now());
            let mut transport = match self.transport.take() {
                Some(t) => t,
                None => return Err(StompError::NotConnected(self.state)),
            };
            let io_result = tokio::select! {
                res = transport.read_buf(&mut self.parse_buf) => Some(res),
                _ = sleep_until(deadline) => None,
            };
            self.transport = Some(transport);

            match io_result {
                Some(Ok(0)) => {
                    debug!("transport closed by peer");
                    if self.state != SessionState::Failed {
                        self.state = SessionState::Closed;
                    }
                    self.teardown();
                    return Ok(());
                }
                Some(Ok(n)) => {
                    trace!(bytes = n, "read");
                    self.heartbeat.record_receive();
                    if let Err(e) = self.drain_inbound() {
                        return Err(self.fail(e));
                    }
                }
                Some(Err(e)) => return Err(self.fail(StompError::Transport(e))),
                None => {
                    let now = Instant::now();
                    if self.heartbeat.receive_expired(now) {
                        let timeout = self.heartbeat.incoming_timeout().unwrap_or_default();
                        warn!(?timeout, "heartbeat timeout, presuming connection dead");
                        self.state = SessionState::Failed;
                        self.dispatch(CallbackKind::Error, None);
                        self.teardown();
                        return Err(StompError::HeartbeatTimeout(timeout));
                    }
                    if self.heartbeat.send_due(now) {
                        trace!("sending heartbeat");
                        self.codec
                            .encode(StompItem::Heartbeat, &mut self.out_buf)
                            .map_err(StompError::Transport)?;
                        self.heartbeat.record_send();
                    }
                    self.dispatch(CallbackKind::User, None);
                }
            }
        }
    }

    /// Decode and dispatch every complete item in the parse buffer.
    fn drain_inbound(&mut self) -> Result<(), StompError> {
        loop {
            if self.state == SessionState::Closed {
                return Ok(());
            }
            match self.codec.decode(&mut self.parse_buf) {
                Ok(Some(StompItem::Heartbeat)) => trace!("inbound heartbeat"),
                Ok(Some(StompItem::Frame(frame))) => self.handle_frame(frame)?,
                Ok(None) => return Ok(()),
                Err(e) => return Err(StompError::Protocol(e.to_string())),
            }
        }
    }

    /// Update session state for one inbound frame and dispatch it.
    fn handle_frame(&mut self, frame: Frame) -> Result<(), StompError> {
        trace!(command = %frame.command, "inbound frame");
        match frame.command {
            Command::Connected => {
                if self.state == SessionState::Connecting {
                    let version = match frame.get_header("version") {
                        Some(v) => Version::from_header(v).ok_or_else(|| {
                            StompError::Protocol(format!("unsupported version {v:?}"))
                        })?,
                        // 1.0 servers do not send a version header
                        None => Version::V1_0,
                    };
                    self.version = version;
                    self.codec.set_version(version);
                    let (sx, sy) = frame
                        .get_header("heart-beat")
                        .map(parse_heartbeat_header)
                        .unwrap_or((0, 0));
                    let (outgoing, incoming) = negotiate_heartbeats(
                        self.client_heartbeat.0,
                        self.client_heartbeat.1,
                        sx,
                        sy,
                    );
                    self.heartbeat.start(outgoing, incoming);
                    self.state = SessionState::Connected;
                    debug!(version = %self.version, ?outgoing, ?incoming, "connected");
                }
                self.dispatch(CallbackKind::Connected, Some(&frame));
            }
            Command::Message => self.dispatch(CallbackKind::Message, Some(&frame)),
            Command::Receipt => {
                let matched = frame
                    .get_header("receipt-id")
                    .map(|id| (id.to_string(), self.pending_receipts.remove(id)));
                match &matched {
                    Some((_, true)) => {}
                    other => {
                        // delivered anyway: suppressing it could hide a bug
                        warn!(receipt = ?other, "unexpected RECEIPT");
                    }
                }
                self.dispatch(CallbackKind::Receipt, Some(&frame));
                if let Some((id, true)) = matched {
                    if self.state == SessionState::Disconnecting
                        && self.disconnect_receipt.as_deref() == Some(id.as_str())
                    {
                        debug!("disconnect receipt received");
                        self.state = SessionState::Closed;
                    }
                }
            }
            Command::Error => {
                warn!(message = ?frame.get_header("message"), "server sent ERROR");
                // advisory per spec: keep reading until the server closes
                self.state = SessionState::Failed;
                self.dispatch(CallbackKind::Error, Some(&frame));
            }
            other => {
                return Err(StompError::Protocol(format!(
                    "unexpected {other} frame from server"
                )));
            }
        }
        Ok(())
    }

    /// Invoke the callback registered for `kind`, if any. The slot is taken
    /// out for the duration of the call so the callback may mutate the
    /// session; a replacement installed from within the callback sticks,
    /// and a `callback_del` from within the callback clears the slot for
    /// good.
    fn dispatch(&mut self, kind: CallbackKind, frame: Option<&Frame>) {
        let idx = kind.index();
        if let Some(mut cb) = self.callbacks.slots[idx].take() {
            self.callbacks.cleared[idx] = false;
            cb(self, frame);
            if self.callbacks.slots[idx].is_none() && !self.callbacks.cleared[idx] {
                self.callbacks.slots[idx] = Some(cb);
            }
        }
    }

    /// Serialize a frame into the outbound buffer and update bookkeeping.
    /// Never blocks; the run loop owns flushing.
    fn enqueue(&mut self, frame: Frame) -> Result<(), StompError> {
        if let Some(receipt) = frame.get_header("receipt") {
            self.pending_receipts.insert(receipt.to_string());
        }
        trace!(command = %frame.command, "outbound frame");
        self.codec
            .encode(StompItem::Frame(frame), &mut self.out_buf)
            .map_err(StompError::Transport)?;
        self.heartbeat.record_send();
        Ok(())
    }

    /// Write the outbound buffer to the transport, retrying partial writes.
    async fn flush(&mut self) -> Result<(), StompError> {
        if self.out_buf.is_empty() {
            return Ok(());
        }
        let Some(mut transport) = self.transport.take() else {
            return Err(StompError::NotConnected(self.state));
        };
        let result = transport.write_all_buf(&mut self.out_buf).await;
        self.transport = Some(transport);
        result?;
        Ok(())
    }

    fn require_connected(&self) -> Result<(), StompError> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(StompError::NotConnected(self.state))
        }
    }

    fn transaction_op(
        &mut self,
        command: Command,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.require_connected()?;
        require_header(&headers, "transaction")?;
        self.enqueue(Frame {
            command,
            headers,
            body: Vec::new(),
        })
    }

    fn ack_op(
        &mut self,
        command: Command,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.require_connected()?;
        match self.version {
            Version::V1_0 => {
                require_header(&headers, "message-id")?;
            }
            Version::V1_1 => {
                require_header(&headers, "message-id")?;
                require_header(&headers, "subscription")?;
            }
            Version::V1_2 => {
                require_header(&headers, "id")?;
            }
        }
        self.enqueue(Frame {
            command,
            headers,
            body: Vec::new(),
        })
    }

    fn fail(&mut self, err: StompError) -> StompError {
        self.state = SessionState::Failed;
        self.teardown();
        err
    }

    /// Release the transport and clear all registries and buffers.
    fn teardown(&mut self) {
        self.transport = None;
        self.subscriptions.clear();
        self.pending_receipts.clear();
        self.disconnect_receipt = None;
        self.parse_buf.clear();
        self.out_buf.clear();
    }
}

fn require_header(headers: &[(String, String)], key: &str) -> Result<(), StompError> {
    match headers.iter().find(|(k, _)| k == key) {
        Some((_, v)) if !v.is_empty() => Ok(()),
        Some(_) => Err(StompError::InvalidArgument(format!("empty {key} header"))),
        None => Err(StompError::InvalidArgument(format!("missing {key} header"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    /// Session driven to `Connected` by feeding a CONNECTED frame straight
    /// into the state machine, no I/O involved.
    fn connected_session(version: &str) -> Session<()> {
        let (client, server) = tokio::io::duplex(1024);
        // keep the peer half alive so writes during the test cannot fail
        std::mem::forget(server);
        let mut session = Session::new(());
        session
            .connect_with(client, vec![hdr("accept-version", "1.0,1.1,1.2")])
            .unwrap();
        session
            .handle_frame(Frame::new(Command::Connected).header("version", version))
            .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        session.out_buf.clear();
        session
    }

    #[test]
    fn connect_injects_accept_version_and_heartbeat() {
        let (client, server) = tokio::io::duplex(64);
        std::mem::forget(server);
        let mut session = Session::new(());
        session.connect_with(client, Vec::new()).unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        let wire = String::from_utf8(session.out_buf.to_vec()).unwrap();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("accept-version:1.0,1.1,1.2\n"));
        assert!(wire.contains("heart-beat:0,0\n"));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let (a, b) = tokio::io::duplex(64);
        std::mem::forget(b);
        let mut session = Session::new(());
        session.connect_with(a, Vec::new()).unwrap();
        let (c, d) = tokio::io::duplex(64);
        std::mem::forget(d);
        let err = session.connect_with(c, Vec::new()).unwrap_err();
        assert!(matches!(err, StompError::NotConnected(SessionState::Connecting)));
    }

    #[test]
    fn requests_before_connected_fail_without_buffering() {
        let mut session = Session::<()>::new(());
        let err = session
            .send(vec![hdr("destination", "/queue/a")], b"x".to_vec())
            .unwrap_err();
        assert!(matches!(err, StompError::NotConnected(SessionState::Init)));
        assert!(session.out_buf.is_empty());
    }

    #[test]
    fn subscribe_generates_distinct_ids_and_defaults_ack() {
        let mut session = connected_session("1.2");
        let a = session
            .subscribe(vec![hdr("destination", "/queue/a")])
            .unwrap();
        let b = session
            .subscribe(vec![hdr("destination", "/queue/a")])
            .unwrap();
        assert_ne!(a, b);
        let wire = String::from_utf8(session.out_buf.to_vec()).unwrap();
        assert!(wire.contains(&format!("id:{a}\n")));
        assert!(wire.contains("ack:auto\n"));
    }

    #[test]
    fn subscribe_requires_destination() {
        let mut session = connected_session("1.2");
        let err = session.subscribe(vec![hdr("ack", "client")]).unwrap_err();
        assert!(matches!(err, StompError::InvalidArgument(_)));
        assert!(session.out_buf.is_empty());
    }

    #[test]
    fn subscribe_keeps_caller_id() {
        let mut session = connected_session("1.2");
        let id = session
            .subscribe(vec![hdr("destination", "/queue/a"), hdr("id", "mine")])
            .unwrap();
        assert_eq!(id, "mine");
    }

    #[test]
    fn unsubscribe_removes_entry_and_second_attempt_fails() {
        let mut session = connected_session("1.2");
        let id = session
            .subscribe(vec![hdr("destination", "/queue/a")])
            .unwrap();
        session
            .unsubscribe(&id, vec![hdr("destination", "/queue/a")])
            .unwrap();
        let err = session
            .unsubscribe(&id, vec![hdr("destination", "/queue/a")])
            .unwrap_err();
        assert!(matches!(err, StompError::InvalidArgument(_)));
    }

    #[test]
    fn unsubscribe_unknown_id_allowed_on_1_0() {
        let mut session = connected_session("1.0");
        session
            .unsubscribe("whatever", vec![hdr("destination", "/queue/a")])
            .unwrap();
    }

    #[test]
    fn begin_with_empty_transaction_buffers_nothing() {
        let mut session = connected_session("1.2");
        let err = session.begin(vec![hdr("transaction", "")]).unwrap_err();
        assert!(matches!(err, StompError::InvalidArgument(_)));
        assert!(session.out_buf.is_empty());
    }

    #[test]
    fn ack_headers_are_version_mandated() {
        let mut session = connected_session("1.1");
        // 1.1 needs message-id and subscription
        assert!(session.ack(vec![hdr("message-id", "m1")]).is_err());
        session
            .ack(vec![hdr("message-id", "m1"), hdr("subscription", "s1")])
            .unwrap();

        let mut session = connected_session("1.2");
        assert!(session.ack(vec![hdr("message-id", "m1")]).is_err());
        session.ack(vec![hdr("id", "a7")]).unwrap();
    }

    #[test]
    fn nack_is_rejected_on_1_0() {
        let mut session = connected_session("1.0");
        let err = session.nack(vec![hdr("message-id", "m1")]).unwrap_err();
        assert!(matches!(err, StompError::InvalidArgument(_)));

        let mut session = connected_session("1.2");
        session.nack(vec![hdr("id", "a7")]).unwrap();
    }

    #[test]
    fn connected_negotiates_version_and_heartbeats() {
        let (client, server) = tokio::io::duplex(1024);
        std::mem::forget(server);
        let mut session = Session::new(());
        session
            .connect_with(client, vec![hdr("heart-beat", "10000,5000")])
            .unwrap();
        session
            .handle_frame(
                Frame::new(Command::Connected)
                    .header("version", "1.2")
                    .header("heart-beat", "4000,0"),
            )
            .unwrap();
        assert_eq!(session.version(), Version::V1_2);
        // server refuses to receive (sy = 0), will send every 4000ms
        assert_eq!(session.heartbeat().outgoing_interval(), None);
        assert_eq!(
            session.heartbeat().incoming_timeout(),
            Some(std::time::Duration::from_millis(5000))
        );
    }

    #[test]
    fn receipt_matches_and_clears_pending() {
        let mut session = connected_session("1.2");
        session
            .send(
                vec![hdr("destination", "/queue/a"), hdr("receipt", "r1")],
                b"hi".to_vec(),
            )
            .unwrap();
        assert!(session.pending_receipts.contains("r1"));
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen2 = seen.clone();
        session.callback_set(
            CallbackKind::Receipt,
            Box::new(move |_, frame| {
                assert_eq!(frame.unwrap().get_header("receipt-id"), Some("r1"));
                seen2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        session
            .handle_frame(Frame::new(Command::Receipt).header("receipt-id", "r1"))
            .unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(session.pending_receipts.is_empty());
    }

    #[test]
    fn unexpected_receipt_is_still_dispatched() {
        let mut session = connected_session("1.2");
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen2 = seen.clone();
        session.callback_set(
            CallbackKind::Receipt,
            Box::new(move |_, _| {
                seen2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        session
            .handle_frame(Frame::new(Command::Receipt).header("receipt-id", "nobody"))
            .unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_receipt_closes_session() {
        let mut session = connected_session("1.2");
        session.disconnect(Vec::new()).unwrap();
        assert_eq!(session.state(), SessionState::Disconnecting);
        let wire = String::from_utf8(session.out_buf.to_vec()).unwrap();
        assert!(wire.contains("receipt:rcpt-1\n"));
        session
            .handle_frame(Frame::new(Command::Receipt).header("receipt-id", "rcpt-1"))
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn error_frame_marks_session_failed() {
        let mut session = connected_session("1.2");
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen2 = seen.clone();
        session.callback_set(
            CallbackKind::Error,
            Box::new(move |s, frame| {
                assert_eq!(s.state(), SessionState::Failed);
                assert_eq!(frame.unwrap().get_header("message"), Some("bad"));
                seen2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        session
            .handle_frame(
                Frame::new(Command::Error)
                    .header("message", "bad")
                    .set_body(b"details".to_vec()),
            )
            .unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn client_command_from_server_is_a_protocol_error() {
        let mut session = connected_session("1.2");
        let err = session
            .handle_frame(Frame::new(Command::Send).header("destination", "/queue/a"))
            .unwrap_err();
        assert!(matches!(err, StompError::Protocol(_)));
    }

    #[test]
    fn callback_replacement_from_within_callback_sticks() {
        let mut session = connected_session("1.2");
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        session.callback_set(
            CallbackKind::Message,
            Box::new(move |s, _| {
                let count3 = count2.clone();
                s.callback_set(
                    CallbackKind::Message,
                    Box::new(move |_, _| {
                        count3.fetch_add(10, std::sync::atomic::Ordering::SeqCst);
                    }),
                );
                count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m1"))
            .unwrap();
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m2"))
            .unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 11);
    }

    #[test]
    fn one_shot_callback_can_remove_itself() {
        let mut session = connected_session("1.2");
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        session.callback_set(
            CallbackKind::Message,
            Box::new(move |session, _| {
                count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                session.callback_del(CallbackKind::Message);
            }),
        );
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m1"))
            .unwrap();
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m2"))
            .unwrap();
        // fires once; the deletion survives dispatch
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_of_other_slot_does_not_drop_running_callback() {
        let mut session = connected_session("1.2");
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        session.callback_set(
            CallbackKind::Message,
            Box::new(move |session, _| {
                count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                session.callback_del(CallbackKind::Receipt);
            }),
        );
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m1"))
            .unwrap();
        session
            .handle_frame(Frame::new(Command::Message).header("message-id", "m2"))
            .unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
