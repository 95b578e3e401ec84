//! The accept loop and per-connection I/O driver (SPEC_FULL.md §5).
//!
//! Everything here runs on one task, on one OS thread: a single
//! `tokio::select_all` call multiplexes the listener accept futures, each
//! open connection's next read-or-write, a periodic silence-GC wakeup, and
//! Ctrl-C. Nothing is ever `tokio::spawn`ed — the registries
//! ([`ConversationRegistry`], [`PersonRegistry`]) are owned outright by
//! this loop and mutated synchronously between awaits, so there is
//! nothing to lock.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerListenerConfig;
use crate::game::{Clock, ConversationEvent, ConversationRegistry, PersonRegistry, SystemClock, SILENCE_TIMEOUT_US};
use crate::protocol::types::ConversationId;

use super::connection::ServerConnection;

/// How often the person registry is swept for silent connections
/// (spec.md §3.6, §4.6; SPEC_FULL.md §5).
const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

const READ_BUF_SIZE: usize = 4096;

enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl Transport {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf).await,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.write_all(buf).await,
        }
    }
}

struct Acceptor {
    address: SocketAddr,
    listener: TcpListener,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
}

impl Acceptor {
    async fn accept(&self) -> std::io::Result<(Transport, SocketAddr)> {
        let (tcp, peer) = self.listener.accept().await?;
        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            let stream = tls.accept(tcp).await?;
            return Ok((Transport::Tls(Box::new(stream)), peer));
        }
        Ok((Transport::Plain(tcp), peer))
    }
}

struct Slot {
    transport: Transport,
    conn: ServerConnection,
    inbuf: [u8; READ_BUF_SIZE],
    outbox: Vec<u8>,
}

enum LoopEvent {
    Accepted(usize, std::io::Result<(Transport, SocketAddr)>),
    Read(usize, std::io::Result<usize>),
    Written(usize, std::io::Result<()>),
    Tick,
    Shutdown,
}

/// Owns the registries and drives the non-blocking event loop over one or
/// more configured listeners.
pub struct Listener {
    conversations: ConversationRegistry,
    persons: PersonRegistry,
    clock: Arc<dyn Clock>,
}

impl Listener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: ConversationRegistry::new(),
            persons: PersonRegistry::new(),
            clock: SystemClock::shared(),
        }
    }

    /// Binds every configured listener and runs the accept/read/write loop
    /// until Ctrl-C is received.
    pub async fn serve(mut self, configs: &[ServerListenerConfig]) -> anyhow::Result<()> {
        let mut acceptors = Vec::with_capacity(configs.len());
        for cfg in configs {
            let listener = TcpListener::bind(cfg.address)
                .await
                .with_context(|| format!("failed to bind listener on {}", cfg.address))?;

            #[cfg(feature = "tls")]
            let tls = match &cfg.tls {
                Some(tls_cfg) => {
                    let server_config = crate::security::build_server_config(tls_cfg)
                        .with_context(|| format!("failed to configure TLS for {}", cfg.address))?;
                    Some(tokio_rustls::TlsAcceptor::from(Arc::new(server_config)))
                }
                None => None,
            };
            #[cfg(not(feature = "tls"))]
            if cfg.tls.is_some() {
                anyhow::bail!(
                    "listener on {} configures TLS but this binary was built without the `tls` feature",
                    cfg.address
                );
            }

            tracing::info!(
                address = %cfg.address,
                tls = cfg.tls.is_some(),
                "listening"
            );

            acceptors.push(Acceptor {
                address: cfg.address,
                listener,
                #[cfg(feature = "tls")]
                tls,
            });
        }

        let mut slots: Vec<Slot> = Vec::new();
        let mut next_gc = tokio::time::Instant::now() + GC_INTERVAL;

        loop {
            let now_us = self.clock.now_us();
            let mut futs: Vec<Pin<Box<dyn Future<Output = LoopEvent> + '_>>> = Vec::new();

            for (i, acceptor) in acceptors.iter().enumerate() {
                futs.push(Box::pin(async move { LoopEvent::Accepted(i, acceptor.accept().await) }));
            }

            for (i, slot) in slots.iter_mut().enumerate() {
                if slot.outbox.is_empty() {
                    futs.push(Box::pin(async move {
                        let n = slot.transport.read(&mut slot.inbuf).await;
                        LoopEvent::Read(i, n)
                    }));
                } else {
                    futs.push(Box::pin(async move {
                        let r = slot.transport.write_all(&slot.outbox).await;
                        LoopEvent::Written(i, r)
                    }));
                }
            }

            futs.push(Box::pin(async move {
                tokio::time::sleep_until(next_gc).await;
                LoopEvent::Tick
            }));
            futs.push(Box::pin(async move {
                let _ = tokio::signal::ctrl_c().await;
                LoopEvent::Shutdown
            }));

            let (event, _idx, _rest) = future::select_all(futs).await;
            drop(_rest);

            match event {
                LoopEvent::Accepted(listener_idx, Ok((transport, peer))) => {
                    tracing::debug!(peer = %peer, listener = %acceptors[listener_idx].address, "accepted connection");
                    slots.push(Slot {
                        transport,
                        conn: ServerConnection::new(peer, now_us),
                        inbuf: [0u8; READ_BUF_SIZE],
                        outbox: Vec::new(),
                    });
                }
                LoopEvent::Accepted(listener_idx, Err(err)) => {
                    tracing::warn!(
                        listener = %acceptors[listener_idx].address,
                        error = %err,
                        "failed to accept a connection"
                    );
                }
                LoopEvent::Read(i, Ok(0)) => {
                    self.close_slot_on_eof(&mut slots, i);
                }
                LoopEvent::Read(i, Ok(n)) => {
                    let bytes = slots[i].inbuf[..n].to_vec();
                    slots[i].conn.feed_bytes(
                        &bytes,
                        now_us,
                        &mut self.conversations,
                        &mut self.persons,
                        self.clock.as_ref(),
                    );
                    self.fan_out_and_refill(&mut slots, i);
                }
                LoopEvent::Read(i, Err(err)) => {
                    tracing::debug!(error = %err, "read error, closing connection");
                    self.close_slot(&mut slots, i);
                }
                LoopEvent::Written(i, Ok(())) => {
                    slots[i].outbox.clear();
                    self.fan_out_and_refill(&mut slots, i);
                }
                LoopEvent::Written(i, Err(err)) => {
                    tracing::debug!(error = %err, "write error, closing connection");
                    self.close_slot(&mut slots, i);
                }
                LoopEvent::Tick => {
                    self.run_silence_gc(&mut slots, now_us);
                    next_gc = tokio::time::Instant::now() + GC_INTERVAL;
                }
                LoopEvent::Shutdown => {
                    tracing::info!("received shutdown signal, stopping");
                    return Ok(());
                }
            }

            slots.retain(|slot| {
                let done = slot.conn.is_done() && slot.outbox.is_empty();
                !done
            });
        }
    }

    /// Pulls the events the connection's own command produced, fans them
    /// out to every connection following the same conversation (including
    /// itself), then refills the outbox from the priority-ordered drain.
    fn fan_out_and_refill(&self, slots: &mut [Slot], i: usize) {
        let events = slots[i].conn.take_events();
        if let Some(conv_id) = slots[i].conn.conversation_id() {
            if !events.is_empty() {
                notify_conversation(slots, conv_id, &events);
            }
        }
        refill_outbox(slots, i, &self.conversations);
    }

    fn close_slot(&mut self, slots: &mut Vec<Slot>, i: usize) {
        slots[i].conn.force_leave(&mut self.conversations);
        let events = slots[i].conn.take_events();
        if let Some(conv_id) = slots[i].conn.conversation_id() {
            notify_conversation(slots, conv_id, &events);
        }
        slots.swap_remove(i);
    }

    /// Like [`Self::close_slot`], but for a clean peer-initiated EOF —
    /// classifies the disconnect against spec.md §7's three literal
    /// "Client closed the connection ..." contracts.
    fn close_slot_on_eof(&mut self, slots: &mut Vec<Slot>, i: usize) {
        slots[i].conn.peer_closed(&mut self.conversations);
        let events = slots[i].conn.take_events();
        if let Some(conv_id) = slots[i].conn.conversation_id() {
            notify_conversation(slots, conv_id, &events);
        }
        slots.swap_remove(i);
    }

    /// Evicts every person silent for `SILENCE_TIMEOUT_US`, making each one
    /// leave its conversation and closing its connection (spec.md §3.6).
    fn run_silence_gc(&mut self, slots: &mut [Slot], now_us: i64) {
        let silent = self.persons.collect_silent(now_us, SILENCE_TIMEOUT_US);
        for person in silent {
            if let Some(conv) = self.conversations.get_mut(person.conversation_id) {
                let events = conv.leave(person.player_num);
                self.conversations.apply_events(person.conversation_id, &events);
                notify_conversation(slots, person.conversation_id, &events);
            }
            for slot in slots.iter_mut() {
                if slot.conn.person_id() == Some(person.id) {
                    slot.conn.force_leave(&mut self.conversations);
                }
            }
        }
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

fn notify_conversation(slots: &mut [Slot], conv_id: ConversationId, events: &[ConversationEvent]) {
    for slot in slots.iter_mut() {
        if slot.conn.conversation_id() == Some(conv_id) {
            for &event in events {
                slot.conn.notify(event);
            }
        }
    }
}

fn refill_outbox(slots: &mut [Slot], i: usize, conversations: &ConversationRegistry) {
    while let Some(frame) = slots[i].conn.drain_one(conversations) {
        slots[i].outbox.extend_from_slice(&frame);
    }
}

/// Loads the configured listeners and runs them to completion. Intended to
/// be called from a `current_thread` Tokio runtime (SPEC_FULL.md §5).
pub async fn run(configs: &[ServerListenerConfig]) -> anyhow::Result<()> {
    Listener::new().serve(configs).await
}
