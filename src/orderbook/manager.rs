/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/10/25
******************************************************************************/

//! Multi-symbol book management with one processing task per symbol.
//!
//! Each symbol gets a [`SequenceGate`] moved into its own tokio task. The
//! task is the only consumer of the symbol's feed channel, which makes it
//! the single writer of that book without any locking around callbacks.
//! Removing a symbol signals its task to close the feed channel, so feed
//! senders still held elsewhere never keep a task alive.
//! Resync requests raised by any task are forwarded to one shared channel
//! that the feed collaborator drains.

use super::error::SyncError;
use super::feed::FeedMessage;
use super::sequence::{
    BookHandle, ContiguityRule, GateCounters, ResyncReason, ResyncRequest, SequenceGate,
};
use super::store::{PriceLevelStore, SkipListStore, StoreConfig};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Span, error, info, info_span, warn};

/// Default capacity of each symbol's feed channel.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Input of a per-symbol processing task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A decoded snapshot or delta.
    Message(FeedMessage),
    /// The feed connection dropped.
    Disconnected,
}

/// Sending half of a symbol's feed channel.
pub type FeedSender = mpsc::Sender<FeedEvent>;

struct SymbolEntry<S> {
    handle: BookHandle<S>,
    sender: FeedSender,
    stop: oneshot::Sender<()>,
    task: JoinHandle<GateCounters>,
}

/// Owns one gated book per symbol.
///
/// Must be used from within a tokio runtime: adding a symbol spawns its
/// processing task.
pub struct BookManager<S = SkipListStore> {
    /// Registered symbols
    books: HashMap<String, SymbolEntry<S>>,
    /// Contiguity rule for new gates
    rule: ContiguityRule,
    /// Store tuning for new books
    store_config: StoreConfig,
    /// Feed channel capacity for new symbols
    capacity: usize,
    /// Sender shared by every task for resync requests
    resync_sender: mpsc::UnboundedSender<ResyncRequest>,
    /// Receiver for resync requests (taken by the feed collaborator)
    resync_receiver: Option<mpsc::UnboundedReceiver<ResyncRequest>>,
    span: Span,
}

impl<S: PriceLevelStore + 'static> BookManager<S> {
    /// Creates an empty manager.
    pub fn new(rule: ContiguityRule, store_config: StoreConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            books: HashMap::new(),
            rule,
            store_config,
            capacity: DEFAULT_FEED_CAPACITY,
            resync_sender: sender,
            resync_receiver: Some(receiver),
            span: info_span!("book_manager"),
        }
    }

    /// Sets the feed channel capacity used for symbols added afterwards.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Replaces the logging span. Gates are created as its children.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Takes the receiver of resync requests. Returns `None` once taken.
    pub fn take_resync_requests(&mut self) -> Option<mpsc::UnboundedReceiver<ResyncRequest>> {
        self.resync_receiver.take()
    }

    /// Registers `symbol` and spawns its processing task.
    ///
    /// Returns the read handle and the feed sender. Adding a symbol twice
    /// returns the existing pair.
    pub fn add_symbol(&mut self, symbol: &str) -> (BookHandle<S>, FeedSender) {
        if let Some(entry) = self.books.get(symbol) {
            return (entry.handle.clone(), entry.sender.clone());
        }

        let gate_span = info_span!(parent: &self.span, "sequence_gate", symbol = %symbol);
        let gate: SequenceGate<S> =
            SequenceGate::new(symbol, self.rule, &self.store_config).with_span(gate_span.clone());
        let handle = gate.handle();
        let (sender, receiver) = mpsc::channel(self.capacity);
        let (stop, stop_signal) = oneshot::channel();
        let task = tokio::spawn(run_gate(
            gate,
            receiver,
            stop_signal,
            self.resync_sender.clone(),
            gate_span,
        ));

        self.books.insert(
            symbol.to_string(),
            SymbolEntry {
                handle: handle.clone(),
                sender: sender.clone(),
                stop,
                task,
            },
        );
        info!(parent: &self.span, "added order book for symbol: {}", symbol);
        (handle, sender)
    }

    /// Read handle for `symbol`.
    pub fn handle(&self, symbol: &str) -> Option<BookHandle<S>> {
        self.books.get(symbol).map(|entry| entry.handle.clone())
    }

    /// Feed sender for `symbol`.
    pub fn sender(&self, symbol: &str) -> Option<FeedSender> {
        self.books.get(symbol).map(|entry| entry.sender.clone())
    }

    /// Queues an event for `symbol`, waiting if its channel is full.
    ///
    /// # Errors
    /// [`SyncError::UnknownSymbol`] if not registered,
    /// [`SyncError::ChannelClosed`] if its task has stopped.
    pub async fn send(&self, symbol: &str, event: FeedEvent) -> Result<(), SyncError> {
        let entry = self
            .books
            .get(symbol)
            .ok_or_else(|| SyncError::UnknownSymbol(symbol.to_string()))?;
        entry
            .sender
            .send(event)
            .await
            .map_err(|_| SyncError::ChannelClosed(symbol.to_string()))
    }

    /// Registered symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    /// Whether `symbol` is registered.
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.books.contains_key(symbol)
    }

    /// Number of registered symbols.
    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    /// Stops the symbol's task after it drains its queue.
    ///
    /// The feed channel is closed even while [`FeedSender`] clones are
    /// still held; sends on them fail afterwards. Existing [`BookHandle`]s
    /// keep serving the final book.
    ///
    /// # Errors
    /// [`SyncError::UnknownSymbol`] if not registered,
    /// [`SyncError::ChannelClosed`] if the task panicked.
    pub async fn remove_symbol(&mut self, symbol: &str) -> Result<GateCounters, SyncError> {
        let entry = self
            .books
            .remove(symbol)
            .ok_or_else(|| SyncError::UnknownSymbol(symbol.to_string()))?;
        let SymbolEntry {
            sender, stop, task, ..
        } = entry;
        drop(sender);
        // the task may already be gone if every sender was dropped
        let _ = stop.send(());
        let counters = task.await.map_err(|err| {
            error!(parent: &self.span, "task for {} failed: {}", symbol, err);
            SyncError::ChannelClosed(symbol.to_string())
        })?;
        info!(parent: &self.span, "removed order book for symbol: {}", symbol);
        Ok(counters)
    }

    /// Stops every task and returns their final counters.
    pub async fn shutdown(mut self) -> HashMap<String, GateCounters> {
        let mut totals = HashMap::with_capacity(self.books.len());
        for symbol in self.symbols() {
            match self.remove_symbol(&symbol).await {
                Ok(counters) => {
                    totals.insert(symbol, counters);
                }
                Err(err) => warn!(parent: &self.span, "shutdown of {}: {}", symbol, err),
            }
        }
        totals
    }
}

impl<S: PriceLevelStore + 'static> Default for BookManager<S> {
    fn default() -> Self {
        Self::new(ContiguityRule::default(), StoreConfig::default())
    }
}

async fn run_gate<S: PriceLevelStore>(
    mut gate: SequenceGate<S>,
    mut receiver: mpsc::Receiver<FeedEvent>,
    mut stop: oneshot::Receiver<()>,
    resync: mpsc::UnboundedSender<ResyncRequest>,
    span: Span,
) -> GateCounters {
    info!(parent: &span, "feed processor started");
    let mut stopping = false;

    loop {
        let event = tokio::select! {
            event = receiver.recv() => event,
            // a dropped manager stops the task as well
            _ = &mut stop, if !stopping => {
                stopping = true;
                receiver.close();
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };

        let request = match event {
            FeedEvent::Message(message) => match gate.on_message(&message) {
                Ok(_) => None,
                Err(SyncError::SequenceGap { seq, prev_seq, .. }) => {
                    Some(gate.request_resync(ResyncReason::Gap { seq, prev_seq }))
                }
                Err(err) => {
                    error!(parent: &span, "feed message rejected: {}", err);
                    None
                }
            },
            FeedEvent::Disconnected => Some(gate.on_connection_lost()),
        };

        if let Some(request) = request {
            if let Some(err) = request.error() {
                warn!(parent: &span, "{}, book not fresh until next snapshot", err);
            }
            if resync.send(request).is_err() {
                warn!(parent: &span, "resync receiver dropped");
            }
        }
    }

    info!(parent: &span, "feed processor stopped");
    gate.counters()
}
