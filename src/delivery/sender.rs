//! Reliable delivery of a single command.
//!
//! A transaction sends `<id>,<command>` to the hub and waits for
//! `<id>,OK`. Every failed attempt is retried with the same id until the
//! attempt budget is spent:
//!
//! | reply                      | attempt outcome                          |
//! |----------------------------|------------------------------------------|
//! | `<id>,OK`                  | success, transaction ends                |
//! | `<id>,ERR...`              | failure, retried                         |
//! | `Not yet registered.`      | failure, registration sent once, retried |
//! | nothing before deadline    | failure, retried                         |
//! | anything else              | ignored                                  |
//!
//! Replies are read on a private socket in [`ResponseMode::Synchronous`].
//! While the link's state collector is running it owns the replies, so
//! transactions fall back to [`ResponseMode::SharedListener`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::collector::LinkState;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{
    Command, MAX_DATAGRAM_SIZE, REGISTER, Reply, TransactionIdAllocator, encode_frame,
};
use crate::transport::{LinkConfig, ResponseMode, bind_receive_socket, bind_send_socket};

/// Outcome of a successful transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Transaction id the hub acknowledged.
    pub transaction_id: u16,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl Delivery {
    /// Returns the number of retries before success.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Something that can deliver commands to a hub.
pub trait Deliver: Send + Sync {
    /// Delivers one command, retrying as needed.
    fn deliver<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery>> + Send + 'a>>;
}

/// Delivers commands with the transaction retry protocol.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    config: LinkConfig,
    ids: Arc<TransactionIdAllocator>,
    state: LinkState,
    events: Option<EventDispatcher>,
}

impl ReliableSender {
    /// Creates a sender for the configured hub.
    ///
    /// `state` supplies replies in [`ResponseMode::SharedListener`] and
    /// tells whether a collector is running.
    #[must_use]
    pub const fn new(
        config: LinkConfig,
        ids: Arc<TransactionIdAllocator>,
        state: LinkState,
    ) -> Self {
        Self {
            config,
            ids,
            state,
            events: None,
        }
    }

    /// Publishes [`Event::NotRegistered`] on `dispatcher`.
    #[must_use]
    pub fn with_events(mut self, dispatcher: EventDispatcher) -> Self {
        self.events = Some(dispatcher);
        self
    }

    /// Returns how replies are read for the next transaction.
    #[must_use]
    pub fn response_mode(&self) -> ResponseMode {
        if self.state.is_listening() {
            ResponseMode::SharedListener
        } else {
            self.config.response_mode
        }
    }

    /// Runs one transaction to completion.
    pub async fn send(&self, command: &Command) -> Result<Delivery> {
        let transaction_id = self.ids.next_id();
        let frame = encode_frame(transaction_id, command.text());

        let socket = bind_send_socket().await?;
        // Bound before the first send so no reply is missed
        let receiver = match self.response_mode() {
            ResponseMode::Synchronous => Some(bind_receive_socket(self.config.receive_port)?),
            ResponseMode::SharedListener => None,
        };

        let mut registration_sent = false;

        for attempt in 1..=self.config.max_attempts {
            tracing::debug!(
                "transaction {} attempt {}/{}: {}",
                transaction_id,
                attempt,
                self.config.max_attempts,
                command.label()
            );

            let outcome = match &receiver {
                Some(receiver) => {
                    self.attempt_direct(&socket, receiver, &frame, transaction_id)
                        .await
                }
                None => self.attempt_shared(&socket, &frame, transaction_id).await,
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!("transaction {} acknowledged", transaction_id);
                    return Ok(Delivery {
                        transaction_id,
                        attempts: attempt,
                    });
                }
                Err(Error::NotRegistered) => {
                    tracing::error!("not yet registered with hub {}", self.config.hub);
                    if let Some(events) = &self.events {
                        events.dispatch(Event::NotRegistered);
                    }
                    if !registration_sent {
                        self.send_registration(&socket).await?;
                        registration_sent = true;
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(
                        "transaction {} attempt {} failed: {}",
                        transaction_id,
                        attempt,
                        e
                    );
                }
                Err(e) => {
                    tracing::error!("transaction {} aborted: {}", transaction_id, e);
                    return Err(e);
                }
            }

            if receiver.is_some() && attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        Err(Error::RetriesExhausted {
            transaction_id,
            attempts: self.config.max_attempts,
        })
    }

    /// Sends the frame and reads replies until one resolves the attempt.
    ///
    /// Late replies to earlier attempts are discarded before sending.
    async fn attempt_direct(
        &self,
        socket: &UdpSocket,
        receiver: &UdpSocket,
        frame: &Bytes,
        transaction_id: u16,
    ) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        while let Ok((n, from)) = receiver.try_recv_from(&mut buf) {
            tracing::trace!(
                "discarding stale reply from {}: {}",
                from,
                String::from_utf8_lossy(&buf[..n]).trim_end()
            );
        }

        socket.send_to(frame, self.config.hub_addr()).await?;

        let deadline = Instant::now() + self.config.read_timeout;

        loop {
            let (n, from) = tokio::time::timeout_at(deadline, receiver.recv_from(&mut buf))
                .await
                .map_err(|_| Error::timeout(self.config.read_timeout))??;

            let response = String::from_utf8_lossy(&buf[..n]);
            tracing::trace!("reply from {}: {}", from, response.trim_end());

            match Reply::classify(&response, transaction_id) {
                Reply::Ok => return Ok(()),
                Reply::Err(message) => return Err(Error::Protocol { message }),
                Reply::NotRegistered => return Err(Error::NotRegistered),
                Reply::Unrelated => {}
            }
        }
    }

    /// Sends the frame and checks what the state collector saw meanwhile.
    async fn attempt_shared(
        &self,
        socket: &UdpSocket,
        frame: &Bytes,
        transaction_id: u16,
    ) -> Result<()> {
        self.state.clear_last_response().await;
        socket.send_to(frame, self.config.hub_addr()).await?;

        tokio::time::sleep(self.config.listener_wait).await;

        let Some(response) = self.state.last_response().await else {
            return Err(Error::timeout(self.config.listener_wait));
        };

        match Reply::classify(&response, transaction_id) {
            Reply::Ok => Ok(()),
            Reply::Err(message) => Err(Error::Protocol { message }),
            Reply::NotRegistered => Err(Error::NotRegistered),
            Reply::Unrelated => Err(Error::timeout(self.config.listener_wait)),
        }
    }

    /// Asks the hub to pair with this client.
    ///
    /// The hub only accepts after the pairing is confirmed on the device, so
    /// the registration itself is not awaited.
    async fn send_registration(&self, socket: &UdpSocket) -> Result<()> {
        let frame = encode_frame(self.ids.next_id(), REGISTER);
        tracing::warn!("sending registration, confirm pairing on the hub");
        socket.send_to(&frame, self.config.hub_addr()).await?;
        Ok(())
    }
}

impl Deliver for ReliableSender {
    fn deliver<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery>> + Send + 'a>> {
        Box::pin(self.send(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::collector::StateCollector;

    type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

    /// Records every frame it receives and answers on the client's port.
    struct FakeHub {
        port: u16,
        frames: Arc<Mutex<Vec<String>>>,
        task: tokio::task::JoinHandle<()>,
    }

    impl FakeHub {
        async fn start(reply_port: u16, mut respond: Responder) -> Self {
            let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            let port = socket.local_addr().unwrap().port();
            let frames = Arc::new(Mutex::new(Vec::new()));
            let recorded = Arc::clone(&frames);

            let task = tokio::spawn(async move {
                let mut buf = [0u8; MAX_DATAGRAM_SIZE];
                loop {
                    let (n, _) = socket.recv_from(&mut buf).await.unwrap();
                    let frame = String::from_utf8_lossy(&buf[..n]).into_owned();
                    recorded.lock().unwrap().push(frame.clone());
                    if let Some(reply) = respond(&frame) {
                        socket
                            .send_to(reply.as_bytes(), (Ipv4Addr::LOCALHOST, reply_port))
                            .await
                            .unwrap();
                    }
                }
            });

            Self { port, frames, task }
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Drop for FakeHub {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    fn transaction_id(frame: &str) -> &str {
        frame.split(',').next().unwrap()
    }

    fn free_port() -> u16 {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket.local_addr().unwrap().port()
    }

    fn config(hub_port: u16, receive_port: u16) -> LinkConfig {
        LinkConfig::new(Ipv4Addr::LOCALHOST)
            .send_port(hub_port)
            .receive_port(receive_port)
            .read_timeout(Duration::from_millis(50))
            .retry_backoff(Duration::ZERO)
            .listener_wait(Duration::from_millis(50))
    }

    /// Shows the attempt log with `RUST_LOG=lightwave=debug`.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn sender(config: LinkConfig) -> ReliableSender {
        init_tracing();
        ReliableSender::new(config, Arc::new(TransactionIdAllocator::new()), LinkState::new())
    }

    #[test]
    fn test_delivery_retries() {
        let delivery = Delivery {
            transaction_id: 4,
            attempts: 3,
        };
        assert_eq!(delivery.retries(), 2);
    }

    #[tokio::test]
    async fn test_ok_on_first_attempt() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| Some(format!("{},OK", transaction_id(frame)))),
        )
        .await;

        let delivery = sender(config(hub.port, receive_port))
            .send(&Command::turn_off("R1D3", "Wall Lights"))
            .await
            .unwrap();

        assert_eq!(delivery.transaction_id, 1);
        assert_eq!(delivery.retries(), 0);
        assert_eq!(hub.frames(), vec!["1,!R1D3F0|Turn Off|Wall Lights"]);
    }

    #[tokio::test]
    async fn test_unrelated_replies_ignored() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| Some(format!("9{},OK", transaction_id(frame)))),
        )
        .await;

        let err = sender(config(hub.port, receive_port).max_attempts(2))
            .send(&Command::register())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted {
                transaction_id: 1,
                attempts: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_err_exhausts_fifteen_attempts() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| {
                Some(format!("{},ERR,1,\"Transmit fail\"", transaction_id(frame)))
            }),
        )
        .await;

        let err = sender(config(hub.port, receive_port))
            .send(&Command::turn_on_switch("R1D1", "Fan"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 15, .. }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let frames = hub.frames();
        assert_eq!(frames.len(), 15);
        // Every retry reuses the transaction id
        assert!(frames.iter().all(|f| f == "1,!R1D1F1|Turn On|Fan"));
    }

    #[tokio::test]
    async fn test_timeouts_retry_then_succeed() {
        let receive_port = free_port();
        let mut seen = 0;
        let hub = FakeHub::start(
            receive_port,
            Box::new(move |frame: &str| {
                seen += 1;
                (seen >= 3).then(|| format!("{},OK", transaction_id(frame)))
            }),
        )
        .await;

        let delivery = sender(config(hub.port, receive_port))
            .send(&Command::register())
            .await
            .unwrap();

        assert_eq!(delivery.attempts, 3);
        assert_eq!(hub.frames().len(), 3);
    }

    #[tokio::test]
    async fn test_not_registered_sends_one_registration() {
        let receive_port = free_port();
        let mut commands = 0;
        let hub = FakeHub::start(
            receive_port,
            Box::new(move |frame: &str| {
                if frame.ends_with(REGISTER) {
                    return None;
                }
                commands += 1;
                if commands <= 2 {
                    Some("ERR,2,\"Not yet registered. See LightwaveLink\"".to_owned())
                } else {
                    Some(format!("{},OK", transaction_id(frame)))
                }
            }),
        )
        .await;

        let dispatcher = EventDispatcher::new(16);
        let mut events = dispatcher.subscribe();

        let delivery = sender(config(hub.port, receive_port))
            .with_events(dispatcher)
            .send(&Command::turn_on_light("R2D1", "Lamp"))
            .await
            .unwrap();

        assert_eq!(delivery.transaction_id, 1);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(
            hub.frames(),
            vec![
                "1,!R2D1FdP32|Turn On|Lamp",
                "2,!F*p",
                "1,!R2D1FdP32|Turn On|Lamp",
                "1,!R2D1FdP32|Turn On|Lamp",
            ]
        );

        // One event per notice, one registration per transaction
        for _ in 0..2 {
            let event = events
                .wait_for(Duration::from_millis(100), |e| {
                    matches!(e, Event::NotRegistered)
                })
                .await;
            assert_eq!(event, Some(Event::NotRegistered));
        }
    }

    #[tokio::test]
    async fn test_stale_reply_discarded_before_resend() {
        let receive_port = free_port();
        let mut seen = 0;
        let hub = FakeHub::start(
            receive_port,
            Box::new(move |frame: &str| {
                seen += 1;
                (seen >= 2).then(|| format!("{},OK", transaction_id(frame)))
            }),
        )
        .await;

        // Answer to attempt 1, arriving during the backoff
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            socket
                .send_to(
                    b"1,ERR,1,\"Transmit fail\"",
                    (Ipv4Addr::LOCALHOST, receive_port),
                )
                .await
                .unwrap();
        });

        let delivery = sender(
            config(hub.port, receive_port).retry_backoff(Duration::from_millis(250)),
        )
        .send(&Command::register())
        .await
        .unwrap();
        late.await.unwrap();

        assert_eq!(delivery.attempts, 2);
        assert_eq!(hub.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_running_collector_takes_replies() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| Some(format!("{},OK", transaction_id(frame)))),
        )
        .await;

        let state = LinkState::new();
        let sender = ReliableSender::new(
            config(hub.port, receive_port).max_attempts(3),
            Arc::new(TransactionIdAllocator::new()),
            state.clone(),
        );
        assert_eq!(sender.response_mode(), ResponseMode::Synchronous);

        let mut collector =
            StateCollector::start(receive_port, state, EventDispatcher::new(16)).unwrap();
        assert_eq!(sender.response_mode(), ResponseMode::SharedListener);

        for expected in 1..=5 {
            let delivery = sender
                .send(&Command::turn_off("R1D1", "Lamp"))
                .await
                .unwrap();
            assert_eq!(delivery.transaction_id, expected);
            assert_eq!(delivery.attempts, 1);
        }

        collector.stop();
        assert_eq!(sender.response_mode(), ResponseMode::Synchronous);
    }

    #[tokio::test]
    async fn test_shared_listener_mode() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| Some(format!("{},OK", transaction_id(frame)))),
        )
        .await;

        let state = LinkState::new();
        let _collector =
            StateCollector::start(receive_port, state.clone(), EventDispatcher::new(16)).unwrap();

        let sender = ReliableSender::new(
            config(hub.port, receive_port)
                .response_mode(ResponseMode::SharedListener)
                .listener_wait(Duration::from_millis(200)),
            Arc::new(TransactionIdAllocator::new()),
            state,
        );

        let delivery = sender.send(&Command::register()).await.unwrap();
        assert_eq!(delivery.attempts, 1);
    }

    #[tokio::test]
    async fn test_shared_listener_err_retried() {
        let receive_port = free_port();
        let hub = FakeHub::start(
            receive_port,
            Box::new(|frame: &str| {
                Some(format!("{},ERR,1,\"Transmit fail\"", transaction_id(frame)))
            }),
        )
        .await;

        let state = LinkState::new();
        let _collector =
            StateCollector::start(receive_port, state.clone(), EventDispatcher::new(16)).unwrap();

        let sender = ReliableSender::new(
            config(hub.port, receive_port)
                .response_mode(ResponseMode::SharedListener)
                .listener_wait(Duration::from_millis(200))
                .max_attempts(3),
            Arc::new(TransactionIdAllocator::new()),
            state,
        );

        let err = sender
            .send(&Command::turn_on_switch("R1D1", "Fan"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hub.frames(), vec!["1,!R1D1F1|Turn On|Fan"; 3]);
    }

    #[tokio::test]
    async fn test_shared_listener_not_registered_sends_one_registration() {
        let receive_port = free_port();
        let mut commands = 0;
        let hub = FakeHub::start(
            receive_port,
            Box::new(move |frame: &str| {
                if frame.ends_with(REGISTER) {
                    return None;
                }
                commands += 1;
                if commands <= 2 {
                    Some("*!ERR,2,\"Not yet registered. See LightwaveLink\"".to_owned())
                } else {
                    Some(format!("{},OK", transaction_id(frame)))
                }
            }),
        )
        .await;

        let state = LinkState::new();
        let _collector =
            StateCollector::start(receive_port, state.clone(), EventDispatcher::new(16)).unwrap();

        let dispatcher = EventDispatcher::new(16);
        let mut events = dispatcher.subscribe();
        let sender = ReliableSender::new(
            config(hub.port, receive_port)
                .response_mode(ResponseMode::SharedListener)
                .listener_wait(Duration::from_millis(200)),
            Arc::new(TransactionIdAllocator::new()),
            state,
        )
        .with_events(dispatcher);

        let delivery = sender
            .send(&Command::turn_on_light("R2D1", "Lamp"))
            .await
            .unwrap();

        assert_eq!(delivery.transaction_id, 1);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(
            hub.frames(),
            vec![
                "1,!R2D1FdP32|Turn On|Lamp",
                "2,!F*p",
                "1,!R2D1FdP32|Turn On|Lamp",
                "1,!R2D1FdP32|Turn On|Lamp",
            ]
        );
        let event = events
            .wait_for(Duration::from_millis(100), |e| {
                matches!(e, Event::NotRegistered)
            })
            .await;
        assert_eq!(event, Some(Event::NotRegistered));
    }

    #[tokio::test]
    async fn test_shared_listener_without_response() {
        let receive_port = free_port();
        let hub = FakeHub::start(receive_port, Box::new(|_: &str| None)).await;

        let sender = ReliableSender::new(
            config(hub.port, receive_port)
                .response_mode(ResponseMode::SharedListener)
                .max_attempts(3),
            Arc::new(TransactionIdAllocator::new()),
            LinkState::new(),
        );

        let err = sender.send(&Command::register()).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(hub.frames().len(), 3);
    }
}
