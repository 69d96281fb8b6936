//! In-process channel used as a loopback and as a test double

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Channel, ChannelState, ListenerRegistry, OpenOptions};
use crate::error::ChannelError;

/// Scripted device behaviour: given a received payload and how many payloads
/// the channel has accepted so far (1-based), optionally produce a reply
pub type Responder = Arc<dyn Fn(&[u8], usize) -> Option<Vec<u8>> + Send + Sync>;

/// Builder for [`MemoryChannel`]
pub struct MemoryChannelBuilder {
    name: String,
    responder: Option<Responder>,
    reply_delay: Duration,
    open_delay: Duration,
    open_error: Option<String>,
    failing_sends: usize,
}

impl MemoryChannelBuilder {
    /// Reply to sent payloads using the given function
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[u8], usize) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Delay between accepting a payload and delivering its reply
    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Time a successful open takes
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make every open attempt fail with the given reason
    pub fn fail_open(mut self, reason: impl Into<String>) -> Self {
        self.open_error = Some(reason.into());
        self
    }

    /// Make the first `count` sends fail with a write error
    pub fn fail_first_sends(mut self, count: usize) -> Self {
        self.failing_sends = count;
        self
    }

    pub fn build(self) -> Arc<MemoryChannel> {
        Arc::new_cyclic(|this| MemoryChannel {
            name: self.name,
            state: Mutex::new(ChannelState::Unopened),
            open_lock: tokio::sync::Mutex::new(()),
            listeners: ListenerRegistry::new(),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            last_open: Mutex::new(None),
            responder: self.responder,
            reply_delay: self.reply_delay,
            open_delay: self.open_delay,
            open_error: self.open_error,
            failing_sends: self.failing_sends,
            this: this.clone(),
        })
    }
}

/// Channel whose "device" is a closure in the same process
///
/// Records every accepted payload. Replies produced by the responder are
/// delivered to listeners from a spawned task, like a transport's reader
/// thread would.
pub struct MemoryChannel {
    name: String,
    state: Mutex<ChannelState>,
    open_lock: tokio::sync::Mutex<()>,
    listeners: ListenerRegistry,
    sent: Mutex<Vec<Vec<u8>>>,
    send_attempts: AtomicUsize,
    opens: AtomicUsize,
    last_open: Mutex<Option<OpenOptions>>,
    responder: Option<Responder>,
    reply_delay: Duration,
    open_delay: Duration,
    open_error: Option<String>,
    failing_sends: usize,
    this: Weak<MemoryChannel>,
}

impl MemoryChannel {
    pub fn builder(name: impl Into<String>) -> MemoryChannelBuilder {
        MemoryChannelBuilder {
            name: name.into(),
            responder: None,
            reply_delay: Duration::ZERO,
            open_delay: Duration::ZERO,
            open_error: None,
            failing_sends: 0,
        }
    }

    /// Inject bytes as if the device had sent them
    ///
    /// Returns how many listeners handled the buffer. Nothing is delivered
    /// unless the channel is open.
    pub fn deliver(&self, data: &[u8]) -> usize {
        if !self.is_open() {
            debug!(channel = %self.name, "MemoryChannel::deliver: channel not open, dropping data");
            return 0;
        }
        self.listeners.dispatch(&self.name, data)
    }

    /// Payloads accepted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sends attempted while open, including failed ones
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Number of physical opens performed
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_open_options(&self) -> Option<OpenOptions> {
        self.last_open.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn schedule_reply(&self, reply: Vec<u8>) {
        let this = self.this.clone();
        let delay = self.reply_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(channel) = this.upgrade() {
                channel.deliver(&reply);
            }
        });
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, options: &OpenOptions) -> Result<(), ChannelError> {
        debug!(channel = %self.name, ?options, "MemoryChannel::open: called");
        // One physical open at a time
        let _guard = self.open_lock.lock().await;

        match self.state() {
            ChannelState::Open => return Ok(()),
            ChannelState::Closed => {
                return Err(ChannelError::Closed {
                    channel: self.name.clone(),
                });
            }
            ChannelState::Unopened => {}
        }

        if self.open_delay > options.timeout {
            tokio::time::sleep(options.timeout).await;
            return Err(ChannelError::Open {
                channel: self.name.clone(),
                reason: format!("timed out after {:?}", options.timeout),
            });
        }
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        if let Some(reason) = &self.open_error {
            return Err(ChannelError::Open {
                channel: self.name.clone(),
                reason: reason.clone(),
            });
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_open.lock().unwrap_or_else(PoisonError::into_inner) = Some(options.clone());
        self.set_state(ChannelState::Open);
        debug!(channel = %self.name, "MemoryChannel::open: opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        debug!(channel = %self.name, "MemoryChannel::close: called");
        self.set_state(ChannelState::Closed);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Open => {}
            ChannelState::Closed => {
                return Err(ChannelError::Closed {
                    channel: self.name.clone(),
                });
            }
            ChannelState::Unopened => {
                return Err(ChannelError::NotOpen {
                    channel: self.name.clone(),
                });
            }
        }

        let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failing_sends {
            return Err(ChannelError::Write {
                channel: self.name.clone(),
                reason: format!("simulated write failure {attempt}"),
            });
        }

        let count = {
            let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
            sent.push(data.to_vec());
            sent.len()
        };
        debug!(channel = %self.name, bytes = data.len(), count, "MemoryChannel::send: accepted");

        if let Some(responder) = &self.responder
            && let Some(reply) = responder(data, count)
        {
            self.schedule_reply(reply);
        }
        Ok(())
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}
