//! Crate root: wires `FrameCodec` → `ProtocolHandler` → `SessionState` →
//! `SendQueue` → `Transport` into one spawned connection task per `Client`,
//! and folds the reconnect supervisor (§4.8) into that task's outer loop —
//! matching the teacher's `main_loop`/`'connect: loop` shape rather than a
//! separate scheduler.
//!
//! `Client` is the handle a caller holds: commands go in over an `mpsc`
//! channel, events come out over another. `SessionState`/`EventBus` never
//! leave the connection task, so there's exactly one writer, matching the
//! single-threaded cooperative model this crate assumes throughout.

mod client;
mod codec;
mod config;
mod error;
mod events;
mod handler;
mod send_queue;
mod state;
mod stream;
mod transport;
mod utils;

pub use config::{Options, Secure, WebIrc};
pub use error::SessionError;
pub use events::Value;

use irc_wire::encode;
use tokio::sync::mpsc;

use client::CommandApi;
use codec::FrameCodec;
use events::EventBus;
use handler::{CapState, ProtocolHandler};
use send_queue::SendQueue;
use state::SessionState;
use stream::TlsTrust;
use transport::{TlsOptions, TransportEvent, TransportWriter};

/// One emitted domain event, forwarded out of the connection task. The pair
/// is exactly what `EventBus::emit` records; there's no richer `Event` enum
/// because the event *names* are themselves data (`join#rust`, `who<nick>`),
/// per the design note on the dynamic event bus.
pub type Event = (String, Vec<Value>);

/// Commands a caller can submit, mirroring the `CommandAPI` surface in
/// `client.rs`. `Join`/`Part` don't carry a callback across the channel the
/// way `CommandApi::join`/`part` do in-process — a caller watches for the
/// matching `join<channel>`/`part<channel>` event on the event receiver
/// instead, which fires from the exact same one-shot subscription either way.
#[derive(Debug, Clone)]
pub enum Cmd {
    Join(String, Option<String>),
    Part(String, Option<String>),
    Say(String, String),
    Notice(String, String),
    Action(String, String),
    Ctcp(String, String, String),
    Whois(String),
    List(Vec<String>),
    Who(String, Option<String>),
    SetChanMode(String, char, char, Vec<String>),
    Raw(String),
    Disconnect(Option<String>),
    Quit(Option<String>),
}

/// Handle to a running session. Cloning shares the same underlying
/// connection task; dropping every clone leaves the task running until its
/// command channel closes, at which point it sends `QUIT` and returns.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl Client {
    /// Spawn the connection task and return a handle plus its event stream.
    /// Must be called from within a `LocalSet` (the teacher's `main_loop`
    /// convention — `SessionState`/`EventBus` are `!Send` by policy, not by
    /// type, but keeping them on one task is the single-writer contract §5
    /// requires).
    pub fn connect(opt: Options) -> (Client, mpsc::UnboundedReceiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_local(run(opt, cmd_rx, ev_tx));
        (Client { cmd_tx }, ev_rx)
    }

    pub fn join(&self, channel: impl Into<String>, key: Option<String>) {
        self.send(Cmd::Join(channel.into(), key));
    }

    pub fn part(&self, channel: impl Into<String>, message: Option<String>) {
        self.send(Cmd::Part(channel.into(), message));
    }

    pub fn say(&self, target: impl Into<String>, text: impl Into<String>) {
        self.send(Cmd::Say(target.into(), text.into()));
    }

    pub fn notice(&self, target: impl Into<String>, text: impl Into<String>) {
        self.send(Cmd::Notice(target.into(), text.into()));
    }

    pub fn action(&self, target: impl Into<String>, text: impl Into<String>) {
        self.send(Cmd::Action(target.into(), text.into()));
    }

    pub fn whois(&self, nick: impl Into<String>) {
        self.send(Cmd::Whois(nick.into()));
    }

    pub fn who(&self, target: impl Into<String>, format: Option<String>) {
        self.send(Cmd::Who(target.into(), format));
    }

    pub fn quit(&self, message: Option<String>) {
        self.send(Cmd::Quit(message));
    }

    pub fn disconnect(&self, message: Option<String>) {
        self.send(Cmd::Disconnect(message));
    }

    pub fn send(&self, cmd: Cmd) {
        // The receiver only goes away once the connection task has quit for
        // good (channel closed on `Cmd::Quit`/`None`), so a failed send here
        // just means the session is already over; nothing to report back.
        let _ = self.cmd_tx.send(cmd);
    }
}

fn forward(events: &mut EventBus, ev_tx: &mpsc::UnboundedSender<Event>) {
    for entry in events.drain_log() {
        let _ = ev_tx.send(entry);
    }
}

fn tls_options(opt: &Options) -> Option<TlsOptions> {
    let trust = match &opt.secure {
        Secure::No => return None,
        Secure::Plain => TlsTrust::default(),
        Secure::Tls { self_signed, cert_expired } => TlsTrust {
            self_signed: *self_signed,
            cert_expired: *cert_expired,
        },
    };
    Some(TlsOptions { host_name: opt.server.clone(), trust })
}

async fn connect_once(opt: &Options) -> Result<stream::Stream, SessionError> {
    let addrs =
        transport::resolve_addr(&opt.server, opt.port).map_err(SessionError::Io)?;
    let addr = addrs.into_iter().next().ok_or_else(|| SessionError::Resolve {
        host: opt.server.clone(),
        port: opt.port,
    })?;
    let tls = tls_options(opt);
    transport::connect(addr, tls.as_ref())
        .await
        .map_err(|e| match e {
            stream::StreamError::IoError(io) => SessionError::Io(io),
            #[cfg(feature = "tls-rustls")]
            stream::StreamError::TlsError(tls_err) => SessionError::Tls(tls_err),
            #[cfg(all(feature = "tls-native", not(feature = "tls-rustls")))]
            stream::StreamError::TlsError(tls_err) => SessionError::NativeTls(tls_err),
        })
}

/// Handshake lines sent the instant the transport opens (§4.6 `connect`):
/// WEBIRC, then PASS (skipped when SASL will authenticate instead), then
/// `CAP LS 302`, then NICK/USER. SASL's actual exchange happens later, driven
/// by the CAP ACK/AUTHENTICATE frames the server sends back.
fn handshake_lines(opt: &Options) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(webirc) = opt.webirc_line() {
        lines.push(webirc);
    }
    if !opt.sasl {
        if let Some(password) = &opt.password {
            lines.push(encode("PASS", &[password]));
        }
    }
    lines.push(encode("CAP", &["LS", "302"]));
    lines.push(encode("NICK", &[&opt.nick]));
    lines.push(encode("USER", &[&opt.user_name, "0", "*", &opt.real_name]));
    lines
}

enum LoopControl {
    Continue,
    Quit,
}

/// Apply one user command through `CommandApi` (everything except
/// `Disconnect`/`Quit`, which need direct write-side access the API doesn't
/// have) and return the serialized lines it produced.
fn run_command_api(cmd: Cmd, state: &mut SessionState, events: &mut EventBus, opt: &Options) -> Vec<String> {
    let mut api = CommandApi { state, events, opt, outgoing: Vec::new() };
    match cmd {
        Cmd::Join(channel, key) => api.join(&channel, key.as_deref(), |_| {}),
        Cmd::Part(channel, message) => api.part(&channel, message.as_deref(), |_| {}),
        Cmd::Say(target, text) => api.say(&target, &text),
        Cmd::Notice(target, text) => api.notice(&target, &text),
        Cmd::Action(target, text) => api.action(&target, &text),
        Cmd::Ctcp(target, ctcp_type, text) => api.ctcp(&target, &ctcp_type, &text),
        Cmd::Whois(nick) => api.whois(&nick),
        Cmd::List(args) => {
            let refs: Vec<&str> = args.iter().map(String::as_str).collect();
            api.list(&refs);
        }
        Cmd::Who(target, format) => api.who(&target, format.as_deref()),
        Cmd::SetChanMode(channel, sign, mode, nicks) => {
            let refs: Vec<&str> = nicks.iter().map(String::as_str).collect();
            api.set_chan_mode(&channel, sign, mode, &refs);
        }
        Cmd::Raw(line) => api.outgoing.push(line),
        Cmd::Disconnect(_) | Cmd::Quit(_) => unreachable!("handled by the caller before dispatch"),
    }
    api.outgoing
}

/// Flush `lines` through the `SendQueue` (pacing them if flood-protected)
/// and onto the wire. Returns `Quit` if the write side failed, since a dead
/// socket can't carry anything further this connection.
async fn flush(lines: Vec<String>, send_queue: &mut SendQueue, writer: &mut TransportWriter) -> LoopControl {
    for line in lines {
        for out in send_queue.enqueue(line) {
            if writer.write(out.as_bytes()).await.is_err() {
                return LoopControl::Quit;
            }
        }
    }
    LoopControl::Continue
}

async fn handle_cmd(
    cmd: Cmd,
    opt: &Options,
    state: &mut SessionState,
    events: &mut EventBus,
    send_queue: &mut SendQueue,
    writer: &mut TransportWriter,
) -> LoopControl {
    match cmd {
        Cmd::Disconnect(message) | Cmd::Quit(message) => {
            // Bypass pacing so QUIT isn't stuck behind a flood-protection
            // delay the caller no longer cares about (§4.6 `disconnect`).
            send_queue.clear_queue();
            let args: Vec<&str> = message.as_deref().into_iter().collect();
            let line = encode("QUIT", &args);
            for out in send_queue.send_immediate(line) {
                let _ = writer.write(out.as_bytes()).await;
            }
            state.requested_disconnect = true;
            writer.request_disconnect();
            writer.shutdown().await;
            let _ = events.emit("end", &[], true);
            LoopControl::Quit
        }
        other => {
            let lines = run_command_api(other, state, events, opt);
            flush(lines, send_queue, writer).await
        }
    }
}

/// Drive one live connection until it closes (cleanly or not) or the caller
/// quits. Returns whether the outer loop should attempt a reconnect.
async fn session(
    opt: &Options,
    state: &mut SessionState,
    events: &mut EventBus,
    send_queue: &mut SendQueue,
    stream: stream::Stream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    ev_tx: &mpsc::UnboundedSender<Event>,
) -> LoopControl {
    let (mut reader, mut writer) = transport::split(stream);
    let mut codec = FrameCodec::new(opt.strip_colors);
    let mut cap_state = CapState::default();
    let mut cap_ls_buffer: Vec<String> = Vec::new();

    for line in handshake_lines(opt) {
        if writer.write(line.as_bytes()).await.is_err() {
            return LoopControl::Continue;
        }
    }

    let mut tick = if send_queue.is_flood_protected() {
        Some(tokio::time::interval(send_queue.flood_protection_delay()))
    } else {
        None
    };

    loop {
        let tick_fut = async {
            match &mut tick {
                Some(t) => {
                    t.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let control = match cmd {
                    None => {
                        state.requested_disconnect = true;
                        writer.shutdown().await;
                        LoopControl::Quit
                    }
                    Some(cmd) => handle_cmd(cmd, opt, state, events, send_queue, &mut writer).await,
                };
                forward(events, ev_tx);
                if matches!(control, LoopControl::Quit) {
                    return control;
                }
            }
            event = reader.next_event() => {
                match event {
                    TransportEvent::Close => {
                        let _ = events.emit("close", &[], state.requested_disconnect);
                        forward(events, ev_tx);
                        return LoopControl::Continue;
                    }
                    TransportEvent::Error(err) => {
                        let _ = events.emit(
                            "netError",
                            &[Value::from(err.to_string())],
                            state.requested_disconnect,
                        );
                        forward(events, ev_tx);
                        return LoopControl::Continue;
                    }
                    TransportEvent::Data(bytes) => {
                        let frames = codec.push_bytes(&bytes);
                        for frame in frames {
                            let mut handler = ProtocolHandler {
                                state,
                                events,
                                opt,
                                cap_state: &mut cap_state,
                                cap_ls_buffer: &mut cap_ls_buffer,
                                outgoing: Vec::new(),
                            };
                            if let Err(err) = handler.handle(&frame) {
                                log::error!("protocol handler error: {err}");
                            }
                            let outgoing = handler.outgoing;
                            if matches!(flush(outgoing, send_queue, &mut writer).await, LoopControl::Quit) {
                                forward(events, ev_tx);
                                return LoopControl::Continue;
                            }
                        }
                        forward(events, ev_tx);
                    }
                }
            }
            _ = tick_fut => {
                let lines = send_queue.tick();
                if matches!(flush(lines, send_queue, &mut writer).await, LoopControl::Quit) {
                    forward(events, ev_tx);
                    return LoopControl::Continue;
                }
            }
        }
    }
}

/// The spawned connection task: resolve, connect, run one session, and on
/// an unrequested close retry per `opt.retry_count`/`opt.retry_delay_ms`
/// (§4.8). `attempt` resets to zero after every session that actually
/// reached the wire, matching "bounded retry count" rather than a lifetime
/// cap on reconnects.
async fn run(opt: Options, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>, ev_tx: mpsc::UnboundedSender<Event>) {
    let mut state = SessionState::new(&opt.nick, &opt.channel_prefixes);
    let mut events = EventBus::new();
    let mut send_queue = SendQueue::new(opt.flood_protection, opt.flood_protection_delay_ms);
    let mut attempt: u32 = 0;

    loop {
        let _ = events.emit("connecting", &[], state.requested_disconnect);
        forward(&mut events, &ev_tx);

        match connect_once(&opt).await {
            Ok(stream) => {
                attempt = 0;
                state.requested_disconnect = false;
                let control = session(
                    &opt,
                    &mut state,
                    &mut events,
                    &mut send_queue,
                    stream,
                    &mut cmd_rx,
                    &ev_tx,
                )
                .await;
                if matches!(control, LoopControl::Quit) {
                    return;
                }
            }
            Err(err) => {
                let _ = events.emit("netError", &[Value::from(err.to_string())], state.requested_disconnect);
                forward(&mut events, &ev_tx);
            }
        }

        if state.requested_disconnect {
            return;
        }

        if let Some(max) = opt.retry_count {
            if attempt >= max {
                let _ = events.emit("abort", &[Value::from(max as i64)], true);
                forward(&mut events, &ev_tx);
                return;
            }
        }
        attempt += 1;
        let _ = events.emit("reconnecting", &[Value::from(attempt as i64)], state.requested_disconnect);
        forward(&mut events, &ev_tx);
        tokio::time::sleep(std::time::Duration::from_millis(opt.retry_delay_ms)).await;
    }
}
