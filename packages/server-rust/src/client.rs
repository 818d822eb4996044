//! Per-connection state machine for client sessions.
//!
//! One [`Client`] exists per transport session. Inbound frames go through
//! [`Client::handle`]: decode, dispatch under the connection's exclusive
//! lock, handle, encode, enqueue. A dedicated send loop drains the
//! outbound queue onto the transport. Timers (stale, presence ping,
//! expiration) fire into the same lock discipline and may close the
//! connection. [`Client::close`] is terminal and idempotent: it stops the
//! send loop, flushes a final disconnect frame, and detaches from the
//! node.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use surge_core::protocol::{
    ConnectBody, ConnectParams, HistoryBody, HistoryParams, PingBody, PingParams, PresenceBody,
    PresenceParams, PublishBody, PublishParams, RefreshParams, SubscribeBody, SubscribeParams,
    UnsubscribeBody, UnsubscribeParams,
};
use surge_core::{
    commands_from_slice, encode_replies, AdminMessage, ClientCommand, ClientError, ClientInfo,
    DisconnectAdvice, ErrorAdvice, JoinMessage, LeaveMessage, Message, PresenceData, Response,
    ResponseError,
};

use crate::metrics::{
    CLIENT_API, CLIENT_API_NUM_REQUESTS, CLIENT_BYTES_IN, CLIENT_BYTES_OUT, CLIENT_NUM_CONNECT,
    CLIENT_NUM_MSG_PUBLISHED, CLIENT_NUM_MSG_QUEUED, CLIENT_NUM_MSG_SENT, CLIENT_NUM_SUBSCRIBE,
};
use crate::auth;
use crate::node::Node;
use crate::queue::OutboundQueue;
use crate::traits::ClientConn;
use crate::transport::Transport;

/// Selects the messages a resubscribing client missed.
///
/// `messages` is the channel history, newest first. An empty `last` means
/// the client has never seen a message in the channel: the whole history
/// is returned without a recovery guarantee. If `last` is found, the
/// strictly newer prefix is returned and the backfill is complete. If it
/// is not found the client missed more than the history holds; the whole
/// history is returned as a best effort.
#[must_use]
pub fn recover_messages(last: &str, messages: Vec<Message>) -> (Vec<Message>, bool) {
    if last.is_empty() {
        return (messages, false);
    }
    if let Some(position) = messages.iter().position(|msg| msg.uid == last) {
        return (messages.into_iter().take(position).collect(), true);
    }
    (messages, false)
}

/// Mutable connection state, guarded by the connection's exclusive lock.
#[derive(Debug, Default)]
struct ConnState {
    user: String,
    timestamp: i64,
    authenticated: bool,
    ping: bool,
    closed: bool,
    default_info: Option<Value>,
    channels: HashSet<String>,
    channel_info: HashMap<String, Value>,
}

/// Cancellable timer tasks; at most one of each kind is live at a time.
#[derive(Debug, Default)]
struct TimerHandles {
    stale: Option<JoinHandle<()>>,
    expire: Option<JoinHandle<()>>,
    presence: Option<JoinHandle<()>>,
}

/// A client connection: command dispatch, subscriptions, timers, and the
/// outbound send loop over one transport session.
pub struct Client {
    uid: String,
    node: Arc<dyn Node>,
    transport: Arc<dyn Transport>,
    queue: OutboundQueue,
    state: RwLock<ConnState>,
    timers: Mutex<TimerHandles>,
    /// Unix seconds of the most recent inbound frame; written on every
    /// frame, read from the presence timer.
    last_seen: AtomicI64,
    close_tx: watch::Sender<bool>,
    send_finished_rx: watch::Receiver<bool>,
    send_timeout: Duration,
    max_queue_size: usize,
    max_request_size: usize,
    self_ref: Weak<Client>,
}

impl Client {
    /// Creates a connection over `transport`, starts its send loop, and
    /// arms the stale timer. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(node: Arc<dyn Node>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let config = node.config();
        let (close_tx, _) = watch::channel(false);
        let (send_finished_tx, send_finished_rx) = watch::channel(false);

        let client = Arc::new_cyclic(|weak: &Weak<Client>| Self {
            uid: Uuid::new_v4().to_string(),
            node,
            transport,
            queue: OutboundQueue::new(config.client_queue_initial_capacity),
            state: RwLock::new(ConnState::default()),
            timers: Mutex::new(TimerHandles::default()),
            last_seen: AtomicI64::new(unix_seconds()),
            close_tx,
            send_finished_rx,
            send_timeout: config.message_send_timeout,
            max_queue_size: config.client_queue_max_size,
            max_request_size: config.client_request_max_size,
            self_ref: weak.clone(),
        });

        tokio::spawn(Self::send_loop(Arc::clone(&client), send_finished_tx));

        if config.stale_connection_close_delay > Duration::ZERO {
            let delay = config.stale_connection_close_delay;
            let timer = Arc::clone(&client);
            client.timers.lock().stale = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                timer.close_unauthenticated().await;
            }));
        }

        client
    }

    /// Connection uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    // -----------------------------------------------------------------------
    // Inbound path
    // -----------------------------------------------------------------------

    /// Handles one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns the connection-fatal error when the frame was rejected; the
    /// connection has already been closed with a matching disconnect
    /// advice by the time this returns.
    pub async fn handle(&self, frame: &[u8]) -> Result<(), ClientError> {
        self.last_seen.store(unix_seconds(), Ordering::Relaxed);

        let started = Instant::now();
        counter!(CLIENT_API_NUM_REQUESTS).increment(1);
        counter!(CLIENT_BYTES_IN).increment(frame.len() as u64);

        let result = self.handle_frame(frame).await;
        histogram!(CLIENT_API).record(started.elapsed().as_secs_f64() * 1_000_000.0);
        result
    }

    async fn handle_frame(&self, frame: &[u8]) -> Result<(), ClientError> {
        if frame.is_empty() {
            tracing::error!(uid = %self.uid, "empty client request received");
            self.close_with_error(ClientError::InvalidMessage).await;
            return Err(ClientError::InvalidMessage);
        }
        if frame.len() > self.max_request_size {
            tracing::error!(uid = %self.uid, size = frame.len(), "client request exceeds max size");
            self.close_with_error(ClientError::LimitExceeded).await;
            return Err(ClientError::LimitExceeded);
        }

        let commands = match commands_from_slice(frame) {
            Ok(commands) => commands,
            Err(err) => {
                tracing::error!(uid = %self.uid, "cannot decode client frame");
                self.close_with_error(err).await;
                return Err(err);
            }
        };
        if commands.is_empty() {
            tracing::error!(uid = %self.uid, "client frame without commands");
            self.close_with_error(ClientError::InvalidMessage).await;
            return Err(ClientError::InvalidMessage);
        }

        if let Err(err) = self.handle_commands(commands).await {
            // Only internal errors invite the client back.
            let reconnect = err == ClientError::InternalServerError;
            self.close(Some(DisconnectAdvice::new(err.to_string(), reconnect)))
                .await;
            return Err(err);
        }
        Ok(())
    }

    async fn close_with_error(&self, err: ClientError) {
        self.close(Some(DisconnectAdvice::new(err.to_string(), false)))
            .await;
    }

    /// Runs each command in order, aborting on the first handler error,
    /// then enqueues one response frame for the whole batch.
    async fn handle_commands(&self, commands: Vec<ClientCommand>) -> Result<(), ClientError> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let uid = command.uid.clone();
            let mut state = self.state.write().await;
            let mut reply = self.dispatch(&mut state, command).await?;
            drop(state);
            reply.set_uid(uid);
            replies.push(reply);
        }
        let frame = encode_replies(&replies)?;
        self.enqueue(Bytes::from(frame))
    }

    /// Routes one command to its handler. Runs under the exclusive lock.
    async fn dispatch(
        &self,
        state: &mut ConnState,
        command: ClientCommand,
    ) -> Result<Response, ClientError> {
        if state.closed {
            return Err(ClientError::ClientClosed);
        }
        if command.method != "connect" && !state.authenticated {
            return Err(ClientError::Unauthorized);
        }

        match command.method.as_str() {
            "connect" => {
                let params = decode_params::<ConnectParams>(command.params)?;
                self.connect_cmd(state, params).await
            }
            "refresh" => {
                let params = decode_params::<RefreshParams>(command.params)?;
                self.refresh_cmd(state, &params)
            }
            "subscribe" => {
                let params = decode_params::<SubscribeParams>(command.params)?;
                self.subscribe_cmd(state, params).await
            }
            "unsubscribe" => {
                let params = decode_params::<UnsubscribeParams>(command.params)?;
                self.unsubscribe_channel(state, &params.channel).await
            }
            "publish" => {
                let params = decode_params::<PublishParams>(command.params)?;
                self.publish_cmd(state, params).await
            }
            "ping" => {
                let params = if command.params.is_null() {
                    PingParams::default()
                } else {
                    decode_params::<PingParams>(command.params)?
                };
                Ok(Self::ping_cmd(&params))
            }
            "presence" => {
                let params = decode_params::<PresenceParams>(command.params)?;
                self.presence_cmd(state, params).await
            }
            "history" => {
                let params = decode_params::<HistoryParams>(command.params)?;
                self.history_cmd(state, params).await
            }
            _ => Err(ClientError::MethodNotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Command handlers (all run under the exclusive lock)
    // -----------------------------------------------------------------------

    async fn connect_cmd(
        &self,
        state: &mut ConnState,
        params: ConnectParams,
    ) -> Result<Response, ClientError> {
        counter!(CLIENT_NUM_CONNECT).increment(1);

        if state.authenticated {
            tracing::error!(uid = %self.uid, "connect on already authenticated connection");
            return Err(ClientError::InvalidMessage);
        }

        let config = self.node.config();
        let conn_lifetime = config.conn_lifetime;

        if config.insecure {
            state.timestamp = unix_seconds();
        } else {
            let valid = auth::check_client_token(
                &config.secret,
                &params.user,
                &params.timestamp,
                &params.info,
                &params.token,
            );
            if !valid {
                tracing::error!(user = %params.user, "invalid connect token");
                return Err(ClientError::InvalidToken);
            }
            state.timestamp = params
                .timestamp
                .parse::<i64>()
                .map_err(|_| ClientError::InvalidMessage)?;
        }

        if config.user_connection_limit > 0
            && !params.user.is_empty()
            && self.node.user_connections(&params.user) >= config.user_connection_limit
        {
            tracing::error!(
                user = %params.user,
                limit = config.user_connection_limit,
                "user connection limit reached"
            );
            return Err(ClientError::LimitExceeded);
        }

        if let Some(mediator) = self.node.mediator() {
            if !mediator.connect(&self.uid, &params.user) {
                return Err(ClientError::PermissionDenied);
            }
        }

        state.user = params.user;
        state.ping = params.ping;

        let mut body = ConnectBody {
            version: self.node.version(),
            expires: conn_lifetime > 0,
            ttl: conn_lifetime,
            ..ConnectBody::default()
        };

        let mut time_to_expire = 0_i64;
        if conn_lifetime > 0 && !config.insecure {
            time_to_expire = state.timestamp + conn_lifetime - unix_seconds();
            if time_to_expire <= 0 {
                body.expired = true;
                return Ok(Response::connect(body));
            }
        }

        state.authenticated = true;
        state.default_info = parse_info(&params.info);
        state.channels = HashSet::new();
        state.channel_info = HashMap::new();

        if let Some(stale) = self.timers.lock().stale.take() {
            stale.abort();
        }
        self.arm_presence_timer(state);

        let conn = self
            .self_ref
            .upgrade()
            .ok_or(ClientError::InternalServerError)?;
        if let Err(err) = self.node.add_client_conn(&state.user, conn).await {
            tracing::error!(uid = %self.uid, error = %err, "cannot register connection");
            return Err(ClientError::InternalServerError);
        }

        if time_to_expire > 0 {
            let expire_in = config.expired_connection_close_delay
                + Duration::from_secs(u64::try_from(time_to_expire).unwrap_or(0));
            self.arm_expire_timer(expire_in);
        }

        body.client = self.uid.clone();
        Ok(Response::connect(body))
    }

    /// Updates the connection deadline from fresh credentials. Never
    /// touches `authenticated` or `user`.
    fn refresh_cmd(
        &self,
        state: &mut ConnState,
        params: &RefreshParams,
    ) -> Result<Response, ClientError> {
        let config = self.node.config();

        let valid = auth::check_client_token(
            &config.secret,
            &params.user,
            &params.timestamp,
            &params.info,
            &params.token,
        );
        if !valid {
            tracing::error!(user = %params.user, "invalid refresh token");
            return Err(ClientError::InvalidToken);
        }
        let timestamp = params
            .timestamp
            .parse::<i64>()
            .map_err(|_| ClientError::InvalidMessage)?;

        let conn_lifetime = config.conn_lifetime;
        let mut body = ConnectBody {
            version: self.node.version(),
            client: self.uid.clone(),
            expires: conn_lifetime > 0,
            ttl: conn_lifetime,
            ..ConnectBody::default()
        };

        if conn_lifetime > 0 {
            let time_to_expire = timestamp + conn_lifetime - unix_seconds();
            if time_to_expire > 0 {
                state.timestamp = timestamp;
                state.default_info = parse_info(&params.info);
                let expire_in = config.expired_connection_close_delay
                    + Duration::from_secs(u64::try_from(time_to_expire).unwrap_or(0));
                self.arm_expire_timer(expire_in);
            } else {
                body.expired = true;
            }
        }

        Ok(Response::refresh(body))
    }

    #[allow(clippy::too_many_lines)]
    async fn subscribe_cmd(
        &self,
        state: &mut ConnState,
        params: SubscribeParams,
    ) -> Result<Response, ClientError> {
        counter!(CLIENT_NUM_SUBSCRIBE).increment(1);

        let channel = params.channel.clone();
        if channel.is_empty() {
            return Err(ClientError::InvalidMessage);
        }

        let config = self.node.config();
        let mut body = SubscribeBody {
            channel: channel.clone(),
            ..SubscribeBody::default()
        };

        if channel.len() > config.max_channel_length {
            tracing::error!(
                max = config.max_channel_length,
                got = channel.len(),
                "channel name too long"
            );
            return Ok(err_reply(
                Response::subscribe(body),
                ClientError::LimitExceeded,
                ErrorAdvice::Fix,
            ));
        }

        if state.channels.len() >= config.client_channel_limit {
            tracing::error!(
                limit = config.client_channel_limit,
                "channel limit per connection reached"
            );
            return Ok(err_reply(
                Response::subscribe(body),
                ClientError::LimitExceeded,
                ErrorAdvice::Fix,
            ));
        }

        if state.channels.contains(&channel) {
            return Ok(err_reply(
                Response::subscribe(body),
                ClientError::AlreadySubscribed,
                ErrorAdvice::Fix,
            ));
        }

        if !self.node.user_allowed(&channel, &state.user)
            || !self.node.client_allowed(&channel, &self.uid)
        {
            return Ok(err_reply(
                Response::subscribe(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        let opts = match self.node.channel_opts(&channel) {
            Ok(opts) => opts,
            Err(err) => {
                return Ok(err_reply(Response::subscribe(body), err, ErrorAdvice::Fix));
            }
        };

        if !opts.anonymous && state.user.is_empty() && !config.insecure {
            return Ok(err_reply(
                Response::subscribe(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        if self.node.private_channel(&channel) {
            // Private channel: the subscription must carry a valid sign
            // minted for this exact connection.
            if self.uid != params.client
                || !auth::check_channel_sign(
                    &config.secret,
                    &params.client,
                    &channel,
                    &params.info,
                    &params.sign,
                )
            {
                return Ok(err_reply(
                    Response::subscribe(body),
                    ClientError::PermissionDenied,
                    ErrorAdvice::Fix,
                ));
            }
            if let Some(info) = parse_info(&params.info) {
                state.channel_info.insert(channel.clone(), info);
            }
        }

        if let Some(mediator) = self.node.mediator() {
            if !mediator.subscribe(&channel, &self.uid, &state.user) {
                return Ok(err_reply(
                    Response::subscribe(body),
                    ClientError::PermissionDenied,
                    ErrorAdvice::Fix,
                ));
            }
        }

        state.channels.insert(channel.clone());

        let conn = self
            .self_ref
            .upgrade()
            .ok_or(ClientError::InternalServerError)?;
        if let Err(err) = self.node.add_client_sub(&channel, conn).await {
            tracing::error!(channel = %channel, error = %err, "cannot register subscription");
            return Err(ClientError::InternalServerError);
        }

        let info = self.client_info(state, &channel);

        if opts.presence {
            if let Err(err) = self.node.add_presence(&channel, &self.uid, info.clone()).await {
                tracing::error!(channel = %channel, error = %err, "cannot add presence");
                return Err(ClientError::InternalServerError);
            }
        }

        if opts.recover {
            if params.recover {
                // The client asked to recover messages missed since its
                // last seen uid.
                match self.node.history(&channel).await {
                    Ok(messages) => {
                        let (messages, recovered) = recover_messages(&params.last, messages);
                        body.messages = messages;
                        body.recovered = recovered;
                    }
                    Err(err) => {
                        tracing::error!(channel = %channel, error = %err, "cannot recover messages");
                        body.messages = Vec::new();
                    }
                }
            } else {
                // Hand back the current position so the client can recover
                // on a later resubscribe.
                match self.node.last_message_id(&channel).await {
                    Ok(last) => body.last = last,
                    Err(err) => {
                        tracing::error!(channel = %channel, error = %err, "cannot read last message id");
                    }
                }
            }
        }

        if opts.join_leave {
            let node = Arc::clone(&self.node);
            let join = JoinMessage {
                channel: channel.clone(),
                data: info,
            };
            tokio::spawn(async move {
                if let Err(err) = node.publish_join(join, &opts).await {
                    tracing::error!(error = %err, "cannot publish join message");
                }
            });
        }

        body.status = true;
        Ok(Response::subscribe(body))
    }

    /// Detaches the connection from a channel. Shared by the in-band
    /// unsubscribe command, the server-initiated unsubscribe, and `close`.
    /// Returns `status=true` whether or not the channel was subscribed.
    async fn unsubscribe_channel(
        &self,
        state: &mut ConnState,
        channel: &str,
    ) -> Result<Response, ClientError> {
        if channel.is_empty() {
            return Err(ClientError::InvalidMessage);
        }

        let mut body = UnsubscribeBody {
            channel: channel.to_string(),
            status: false,
        };

        let opts = match self.node.channel_opts(channel) {
            Ok(opts) => opts,
            Err(err) => {
                return Ok(err_reply(Response::unsubscribe(body), err, ErrorAdvice::Fix));
            }
        };

        let info = self.client_info(state, channel);

        if state.channels.remove(channel) {
            if let Err(err) = self.node.remove_presence(channel, &self.uid).await {
                tracing::error!(channel = %channel, error = %err, "cannot remove presence");
            }

            if opts.join_leave {
                let leave = LeaveMessage {
                    channel: channel.to_string(),
                    data: info,
                };
                if let Err(err) = self.node.publish_leave(leave, &opts).await {
                    tracing::error!(channel = %channel, error = %err, "cannot publish leave message");
                }
            }

            if let Err(err) = self.node.remove_client_sub(channel, &self.uid).await {
                tracing::error!(channel = %channel, error = %err, "cannot remove subscription");
                return Ok(err_reply(
                    Response::unsubscribe(body),
                    ClientError::InternalServerError,
                    ErrorAdvice::None,
                ));
            }

            state.channel_info.remove(channel);

            if let Some(mediator) = self.node.mediator() {
                mediator.unsubscribe(channel, &self.uid, &state.user);
            }
        }

        body.status = true;
        Ok(Response::unsubscribe(body))
    }

    async fn publish_cmd(
        &self,
        state: &mut ConnState,
        params: PublishParams,
    ) -> Result<Response, ClientError> {
        let channel = params.channel;
        let body = PublishBody {
            channel: channel.clone(),
            status: false,
        };

        if channel.is_empty() || params.data.is_null() {
            return Ok(err_reply(
                Response::publish(body),
                ClientError::InvalidMessage,
                ErrorAdvice::Fix,
            ));
        }

        if !state.channels.contains(&channel) {
            return Ok(err_reply(
                Response::publish(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        let info = self.client_info(state, &channel);

        let opts = match self.node.channel_opts(&channel) {
            Ok(opts) => opts,
            Err(err) => {
                tracing::error!(channel = %channel, error = %err, "cannot resolve channel options");
                return Ok(err_reply(
                    Response::publish(body),
                    ClientError::InternalServerError,
                    ErrorAdvice::Retry,
                ));
            }
        };

        let config = self.node.config();
        if !opts.publish && !config.insecure {
            return Ok(err_reply(
                Response::publish(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        if let Some(mediator) = self.node.mediator() {
            if !mediator.message(&channel, &params.data, &self.uid, &info) {
                return Ok(err_reply(
                    Response::publish(body),
                    ClientError::PermissionDenied,
                    ErrorAdvice::Fix,
                ));
            }
        }

        counter!(CLIENT_NUM_MSG_PUBLISHED).increment(1);

        let message = Message::new(
            channel.clone(),
            params.data,
            Some(self.uid.clone()),
            Some(info),
        );

        if opts.watch {
            match serde_json::to_value(&message) {
                Ok(data) => {
                    let admin = AdminMessage {
                        op: "message".to_string(),
                        data,
                    };
                    if let Err(err) = self.node.publish_admin(admin).await {
                        tracing::error!(error = %err, "cannot publish to admin channel");
                    }
                }
                Err(err) => tracing::error!(error = %err, "cannot serialize watched message"),
            }
        }

        if let Err(err) = self.node.publish(message, &opts).await {
            return Ok(err_reply(Response::publish(body), err, ErrorAdvice::Retry));
        }

        Ok(Response::publish(PublishBody {
            channel,
            status: true,
        }))
    }

    async fn presence_cmd(
        &self,
        state: &ConnState,
        params: PresenceParams,
    ) -> Result<Response, ClientError> {
        let channel = params.channel;
        let body = PresenceBody {
            channel: channel.clone(),
            data: PresenceData::new(),
        };

        if !state.channels.contains(&channel) {
            return Ok(err_reply(
                Response::presence(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        match self.node.presence(&channel).await {
            Ok(data) => Ok(Response::presence(PresenceBody { channel, data })),
            Err(err) => Ok(err_reply(Response::presence(body), err, ErrorAdvice::Retry)),
        }
    }

    async fn history_cmd(
        &self,
        state: &ConnState,
        params: HistoryParams,
    ) -> Result<Response, ClientError> {
        let channel = params.channel;
        let body = HistoryBody {
            channel: channel.clone(),
            data: Vec::new(),
        };

        if !state.channels.contains(&channel) {
            return Ok(err_reply(
                Response::history(body),
                ClientError::PermissionDenied,
                ErrorAdvice::Fix,
            ));
        }

        match self.node.history(&channel).await {
            Ok(data) => Ok(Response::history(HistoryBody { channel, data })),
            Err(err) => Ok(err_reply(Response::history(body), err, ErrorAdvice::Retry)),
        }
    }

    fn ping_cmd(params: &PingParams) -> Response {
        Response::ping(PingBody {
            data: params.data.clone(),
        })
    }

    fn client_info(&self, state: &ConnState, channel: &str) -> ClientInfo {
        ClientInfo::new(
            state.user.clone(),
            self.uid.clone(),
            state.default_info.clone(),
            state.channel_info.get(channel).cloned(),
        )
    }

    // -----------------------------------------------------------------------
    // Outbound path
    // -----------------------------------------------------------------------

    /// Enqueues a frame for the send loop. Trips the slow-client close
    /// when the queue depth exceeds the configured maximum.
    fn enqueue(&self, frame: Bytes) -> Result<(), ClientError> {
        if !self.queue.add(frame) {
            return Err(ClientError::ClientClosed);
        }
        counter!(CLIENT_NUM_MSG_QUEUED).increment(1);
        if self.queue.size() > self.max_queue_size {
            // Close asynchronously so broadcast fan-out is never stalled.
            self.spawn_close(DisconnectAdvice::new("slow", false));
            return Err(ClientError::ClientClosed);
        }
        Ok(())
    }

    async fn send_loop(self: Arc<Self>, finished: watch::Sender<bool>) {
        while let Some(frame) = self.queue.wait().await {
            match self.write_frame(&frame).await {
                Ok(()) => {
                    counter!(CLIENT_NUM_MSG_SENT).increment(1);
                    counter!(CLIENT_BYTES_OUT).increment(frame.len() as u64);
                }
                Err(ClientError::ClientClosed) => break,
                Err(err) => {
                    tracing::debug!(uid = %self.uid, error = %err, "error sending message");
                    self.spawn_close(DisconnectAdvice::new("error sending message", true));
                    break;
                }
            }
        }
        let _ = finished.send(true);
    }

    /// Writes one frame to the transport, bounded by the send timeout and
    /// cancelled by the close signal.
    async fn write_frame(&self, frame: &[u8]) -> Result<(), ClientError> {
        let result = if self.send_timeout > Duration::ZERO {
            let mut close_rx = self.close_tx.subscribe();
            tokio::select! {
                result = self.transport.send(frame) => result,
                () = tokio::time::sleep(self.send_timeout) => return Err(ClientError::SendTimeout),
                _ = close_rx.changed() => return Err(ClientError::ClientClosed),
            }
        } else {
            self.transport.send(frame).await
        };
        result.map_err(|err| {
            tracing::debug!(uid = %self.uid, error = %err, "transport send failed");
            ClientError::InternalServerError
        })
    }

    fn spawn_close(&self, advice: DisconnectAdvice) {
        if let Some(client) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                client.close(Some(advice)).await;
            });
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    async fn close_unauthenticated(&self) {
        let (authenticated, closed) = {
            let state = self.state.read().await;
            (state.authenticated, state.closed)
        };
        if !authenticated && !closed {
            self.close(Some(DisconnectAdvice::new("stale", false))).await;
        }
    }

    /// Arms the presence timer. Caller holds the exclusive lock.
    fn arm_presence_timer(&self, state: &ConnState) {
        if state.closed {
            return;
        }
        let interval = self.node.config().presence_ping_interval;
        let Some(client) = self.self_ref.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            client.update_presence().await;
        });
        if let Some(old) = self.timers.lock().presence.replace(handle) {
            old.abort();
        }
    }

    /// Presence timer tick: close idle ping connections, refresh presence
    /// for every subscribed channel, re-arm.
    async fn update_presence(&self) {
        let idle = {
            let state = self.state.read().await;
            state.ping && !state.closed && self.is_idle()
        };
        if idle {
            self.close(None).await;
            return;
        }

        let state = self.state.write().await;
        if state.closed {
            return;
        }
        for channel in &state.channels {
            let Ok(opts) = self.node.channel_opts(channel) else {
                continue;
            };
            if !opts.presence {
                continue;
            }
            let info = self.client_info(&state, channel);
            if let Err(err) = self.node.add_presence(channel, &self.uid, info).await {
                tracing::error!(channel = %channel, error = %err, "cannot refresh presence");
            }
        }
        self.arm_presence_timer(&state);
    }

    fn is_idle(&self) -> bool {
        let max_idle = self.node.config().client_max_idle_timeout;
        let max_idle = i64::try_from(max_idle.as_secs()).unwrap_or(i64::MAX);
        unix_seconds() - self.last_seen.load(Ordering::Relaxed) > max_idle
    }

    /// (Re-)arms the expiration timer, cancelling any previous one.
    fn arm_expire_timer(&self, delay: Duration) {
        let Some(client) = self.self_ref.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.expire().await;
        });
        if let Some(old) = self.timers.lock().expire.replace(handle) {
            old.abort();
        }
    }

    /// Expiration timer fire: close unless a refresh moved the deadline.
    async fn expire(&self) {
        let conn_lifetime = self.node.config().conn_lifetime;
        if conn_lifetime <= 0 {
            return;
        }
        let time_to_expire = {
            let state = self.state.read().await;
            if state.closed {
                return;
            }
            state.timestamp + conn_lifetime - unix_seconds()
        };
        if time_to_expire > 0 {
            // Connection was refreshed in the meantime.
            return;
        }
        self.close(Some(DisconnectAdvice::new("expired", true))).await;
    }

    // -----------------------------------------------------------------------
    // Close protocol
    // -----------------------------------------------------------------------

    /// Closes the connection. Idempotent.
    ///
    /// Ordering is load-bearing: raise the close signal and close the
    /// queue first, wait for the send loop to exit (bounded), and only
    /// then write the final disconnect frame directly on the transport.
    pub async fn close(&self, advice: Option<DisconnectAdvice>) {
        let mut state = self.state.write().await;
        if state.closed {
            return;
        }
        let _ = self.close_tx.send(true);
        state.closed = true;
        self.queue.close();

        let channels: Vec<String> = state.channels.iter().cloned().collect();
        for channel in channels {
            if let Err(err) = self.unsubscribe_channel(&mut state, &channel).await {
                tracing::error!(uid = %self.uid, channel = %channel, error = %err, "unsubscribe on close failed");
            }
        }

        if state.authenticated {
            if let Err(err) = self.node.remove_client_conn(&state.user, &self.uid).await {
                tracing::error!(uid = %self.uid, error = %err, "cannot remove connection");
            }
        }

        if let Some(advice) = &advice {
            let mut finished = self.send_finished_rx.clone();
            let send_loop_done =
                tokio::time::timeout(Duration::from_secs(1), finished.wait_for(|done| *done))
                    .await
                    .is_ok();
            if send_loop_done {
                if let Err(err) = self.send_disconnect(advice).await {
                    tracing::debug!(uid = %self.uid, error = %err, "error sending disconnect");
                }
            } else {
                tracing::debug!(uid = %self.uid, "timeout waiting for send loop exit");
            }
        }

        {
            let mut timers = self.timers.lock();
            for timer in [
                timers.stale.take(),
                timers.expire.take(),
                timers.presence.take(),
            ]
            .into_iter()
            .flatten()
            {
                timer.abort();
            }
        }

        if state.authenticated {
            if let Some(mediator) = self.node.mediator() {
                mediator.disconnect(&self.uid, &state.user);
            }
        }

        let advice = advice.unwrap_or_default();
        if !advice.reason.is_empty() {
            tracing::debug!(uid = %self.uid, reason = %advice.reason, "closing connection");
        }
        if let Err(err) = self.transport.close(&advice).await {
            tracing::debug!(uid = %self.uid, error = %err, "transport close failed");
        }
    }

    /// Writes the disconnect frame directly on the transport. Safe only
    /// after the send loop has exited.
    async fn send_disconnect(&self, advice: &DisconnectAdvice) -> Result<(), ClientError> {
        let reply = Response::disconnect(advice);
        let frame = encode_replies(std::slice::from_ref(&reply))?;
        match tokio::time::timeout(Duration::from_secs(1), self.transport.send(&frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::InternalServerError),
            Err(_) => Err(ClientError::SendTimeout),
        }
    }
}

#[async_trait]
impl ClientConn for Client {
    fn uid(&self) -> &str {
        &self.uid
    }

    async fn channels(&self) -> Vec<String> {
        self.state.read().await.channels.iter().cloned().collect()
    }

    fn send(&self, frame: Bytes) -> Result<(), ClientError> {
        self.enqueue(frame)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }
        let reply = self.unsubscribe_channel(&mut state, channel).await?;
        drop(state);
        let frame = encode_replies(std::slice::from_ref(&reply))?;
        self.enqueue(Bytes::from(frame))
    }

    async fn close(&self, advice: Option<DisconnectAdvice>) {
        Client::close(self, advice).await;
    }
}

fn err_reply(mut reply: Response, err: impl std::fmt::Display, advice: ErrorAdvice) -> Response {
    reply.set_err(ResponseError::new(err, advice));
    reply
}

fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, ClientError> {
    serde_json::from_value(params).map_err(|_| ClientError::InvalidMessage)
}

/// Info payloads arrive as raw JSON text covered by the token signature;
/// empty or non-JSON payloads carry no info.
fn parse_info(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        None
    } else {
        serde_json::from_str(raw).ok()
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
