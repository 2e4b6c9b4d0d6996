//! Minimal decoding driver: feeds decoded transactions through a callback table.

use crate::callbacks::{DecodingContext, Lsn, OriginId, OutputPluginCallbacks, Transaction};

pub struct DecodingSession {
    callbacks: OutputPluginCallbacks,
    ctx: DecodingContext,
}

impl DecodingSession {
    /// Runs the plugin's startup callback.
    pub fn start(callbacks: OutputPluginCallbacks, mut ctx: DecodingContext) -> Self {
        if let Some(startup) = callbacks.startup {
            startup(&mut ctx, true);
        }
        tracing::debug!("decoding session started on slot {}", ctx.slot_name);
        Self { callbacks, ctx }
    }

    pub fn context(&self) -> &DecodingContext {
        &self.ctx
    }

    pub fn filtered_by_origin(&self, origin_id: OriginId) -> bool {
        self.callbacks
            .filter_by_origin
            .is_some_and(|filter| !filter(&self.ctx, origin_id))
    }

    /// Streams one committed transaction. Returns `false` when the whole
    /// transaction was skipped because of its origin.
    pub fn decode(&mut self, txn: &Transaction) -> bool {
        if self.filtered_by_origin(txn.origin_id) {
            tracing::trace!("skipping xid {} from origin {}", txn.xid, txn.origin_id);
            return false;
        }
        if let Some(begin) = self.callbacks.begin {
            begin(&mut self.ctx, txn);
        }
        if let Some(change) = self.callbacks.change {
            for row in &txn.changes {
                change(&mut self.ctx, txn, row);
            }
        }
        if !txn.truncated.is_empty() {
            if let Some(truncate) = self.callbacks.truncate {
                truncate(&mut self.ctx, txn, &txn.truncated);
            }
        }
        if let Some(commit) = self.callbacks.commit {
            commit(&mut self.ctx, txn, txn.final_lsn);
        }
        true
    }

    /// Streams a non-transactional logical message.
    pub fn message(&mut self, origin_id: OriginId, lsn: Lsn, prefix: &str, payload: &[u8]) -> bool {
        if self.filtered_by_origin(origin_id) {
            return false;
        }
        if let Some(message) = self.callbacks.message {
            message(&mut self.ctx, None, lsn, prefix, payload);
        }
        true
    }

    /// Runs the shutdown callback and hands back the context.
    pub fn finish(mut self) -> DecodingContext {
        if let Some(shutdown) = self.callbacks.shutdown {
            shutdown(&mut self.ctx);
        }
        self.ctx
    }
}
