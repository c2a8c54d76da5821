//! Websocket client for a rosbridge server fronting the behavior tree runtime.
//!
//! The socket lives on its own IO thread. Outgoing frames and decoded events
//! cross over mpsc channels, so the UI thread only ever polls and never blocks.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::{Error as WsError, WebSocket, protocol::Message, stream::MaybeTlsStream};
use url::Url;

use super::protocol::{self, Topics};
use super::{BridgeEvent, CallId, RuntimeCall, RuntimeClient, TransportError};

// How long a read may block before the IO thread checks for outgoing frames
const READ_POLL: Duration = Duration::from_millis(20);

enum Outgoing {
    Frame(String),
    Close,
}

pub struct RosbridgeClient {
    namespace: String,
    next_id: CallId,
    connected: bool,
    tx: Sender<Outgoing>,
    rx: Receiver<BridgeEvent>,
    // Failures produced locally, delivered on the next poll
    local: VecDeque<BridgeEvent>,
    io: Option<JoinHandle<()>>,
}

fn is_idle(e: &WsError) -> bool {
    match e {
        WsError::Io(ioe) => matches!(
            ioe.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

fn set_read_timeout(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) -> std::io::Result<()> {
    #[allow(unreachable_patterns)]
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(READ_POLL)),
        _ => Ok(()),
    }
}

pub fn connect(url: &str, namespace: &str) -> anyhow::Result<RosbridgeClient> {
    let url = Url::parse(url)?;
    let (mut socket, _resp) = tungstenite::connect(url.as_str())?;
    set_read_timeout(&mut socket)?;

    let topics = Topics::new(namespace);
    for (topic, msg_type) in topics.subscriptions() {
        socket.send(Message::Text(protocol::subscribe(topic, msg_type, 0)))?;
    }
    log::info!("connected to rosbridge at {} (namespace '{}')", url, namespace);

    let (tx, out_rx) = mpsc::channel();
    let (ev_tx, rx) = mpsc::channel();
    let io = thread::Builder::new()
        .name("rosbridge-io".to_string())
        .spawn(move || io_loop(socket, topics, out_rx, ev_tx))?;

    let mut local = VecDeque::new();
    local.push_back(BridgeEvent::Connected);
    Ok(RosbridgeClient {
        namespace: namespace.to_string(),
        next_id: 0,
        connected: true,
        tx,
        rx,
        local,
        io: Some(io),
    })
}

fn io_loop(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    topics: Topics,
    out_rx: Receiver<Outgoing>,
    ev_tx: Sender<BridgeEvent>,
) {
    let disconnect = |reason: String| {
        log::warn!("rosbridge connection lost: {}", reason);
        let _ = ev_tx.send(BridgeEvent::Disconnected(reason));
    };
    loop {
        loop {
            match out_rx.try_recv() {
                Ok(Outgoing::Frame(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        if !is_idle(&e) {
                            disconnect(e.to_string());
                            return;
                        }
                    }
                }
                Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    log::info!("rosbridge connection closed");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => match protocol::decode(&text, &topics) {
                Ok(Some(event)) => {
                    if ev_tx.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("dropping bridge frame: {}", e),
            },
            Ok(Message::Close(frame)) => {
                disconnect(frame.map(|f| f.reason.to_string()).unwrap_or_else(|| "closed by server".to_string()));
                return;
            }
            Ok(_) => { /* pings and binary frames */ }
            Err(e) if is_idle(&e) => {}
            Err(e) => {
                disconnect(e.to_string());
                return;
            }
        }
    }
}

impl RuntimeClient for RosbridgeClient {
    fn call(&mut self, call: RuntimeCall) -> CallId {
        self.next_id += 1;
        let id = self.next_id;
        let frame = protocol::call_service(id, &call.service(&self.namespace), call.args());
        if !self.connected || self.tx.send(Outgoing::Frame(frame)).is_err() {
            self.connected = false;
            self.local.push_back(BridgeEvent::Response { id, result: Err(TransportError::Disconnected) });
        }
        id
    }

    fn poll(&mut self) -> Vec<BridgeEvent> {
        let mut events: Vec<BridgeEvent> = self.local.drain(..).collect();
        events.extend(self.rx.try_iter());
        if events.iter().any(|e| matches!(e, BridgeEvent::Disconnected(_))) {
            self.connected = false;
        }
        events
    }

    fn is_connected(&self) -> bool { self.connected }
}

impl Drop for RosbridgeClient {
    fn drop(&mut self) {
        let _ = self.tx.send(Outgoing::Close);
        if let Some(io) = self.io.take() {
            let _ = io.join();
        }
    }
}
