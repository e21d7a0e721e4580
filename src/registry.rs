use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::GLOBAL_CHANNEL;
use crate::Result;
use crate::channel::Channel;
use crate::types::response::Message;

#[derive(Default)]
struct Entries {
    /// Subscription order
    ordered: Vec<Arc<Channel>>,
    /// Name to position in `ordered`
    index: HashMap<String, usize>,
}

/// Channels of one connection, keyed by name, in subscription order.
///
/// Insertion and lookup share one lock, so dispatch never observes a channel
/// that is only partly registered and two concurrent subscriptions to the
/// same name produce a single entry.
pub(crate) struct ChannelRegistry {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl ChannelRegistry {
    /// Create a registry holding only the global channel.
    pub(crate) fn new(capacity: usize) -> Self {
        let registry = Self {
            entries: RwLock::new(Entries::default()),
            capacity,
        };
        {
            let mut entries = registry.write();
            Self::push(&mut entries, Arc::new(Channel::new(GLOBAL_CHANNEL, capacity)));
        }
        registry
    }

    /// Look up a channel by exact name.
    pub(crate) fn get(&self, name: &str) -> Option<Arc<Channel>> {
        let entries = self.read();
        entries
            .index
            .get(name)
            .map(|&position| Arc::clone(&entries.ordered[position]))
    }

    /// Return the channel named `name`, creating it if needed.
    ///
    /// `on_insert` runs under the registry lock before a new channel is recorded;
    /// if it fails nothing is recorded. The boolean is `true` when the channel was
    /// created by this call.
    pub(crate) fn get_or_insert_with<F>(
        &self,
        name: &str,
        on_insert: F,
    ) -> Result<(Arc<Channel>, bool)>
    where
        F: FnOnce() -> Result<()>,
    {
        if let Some(channel) = self.get(name) {
            return Ok((channel, false));
        }

        let mut entries = self.write();
        // Another caller may have inserted between the read and write locks.
        if let Some(&position) = entries.index.get(name) {
            return Ok((Arc::clone(&entries.ordered[position]), false));
        }

        on_insert()?;

        let channel = Arc::new(Channel::new(name, self.capacity));
        Self::push(&mut entries, Arc::clone(&channel));
        Ok((channel, true))
    }

    /// Route a message to the channel whose name equals its channel field.
    ///
    /// Returns `false` if no channel matched and the message was dropped.
    pub(crate) fn dispatch(&self, message: Message) -> bool {
        // Release the lock before running handlers so they may subscribe.
        let Some(channel) = self.get(&message.channel) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                channel = %message.channel,
                event = %message.event,
                "Dropping message for unknown channel"
            );
            return false;
        };

        channel.process_message(message);
        true
    }

    /// Channel names in subscription order, starting with the global channel.
    pub(crate) fn names(&self) -> Vec<String> {
        self.read()
            .ordered
            .iter()
            .map(|channel| channel.name().to_owned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().ordered.len()
    }

    fn push(entries: &mut Entries, channel: Arc<Channel>) {
        entries
            .index
            .insert(channel.name().to_owned(), entries.ordered.len());
        entries.ordered.push(channel);
    }

    // The registry never holds partially applied updates, so a poisoned lock is safe to reuse.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
