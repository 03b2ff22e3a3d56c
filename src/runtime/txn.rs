//! Transactions: writes buffered per call, applied atomically at commit.
//!
//! Each operation is resolved and routed when it is issued, against the
//! last committed state; nothing touches a store until the whole body has
//! run without error. A body that returns an error discards the buffer, so
//! observers never see a partial batch.

use serde_json::Value;

use crate::core::{Context, Reference, Route, StoreKind, Tag};

use super::engine::{Runtime, RuntimeError};

/// One buffered operation, fully resolved and routed.
pub(crate) struct PendingWrite {
    pub(crate) tag: Tag,
    pub(crate) context: Context,
    pub(crate) reference: Reference,
    pub(crate) kind: StoreKind,
    pub(crate) route: Option<Route>,
    pub(crate) value: Option<Value>,
}

/// Write buffer handed to a transaction body.
pub struct Transaction<'rt> {
    runtime: &'rt Runtime,
    ops: Vec<PendingWrite>,
}

impl<'rt> Transaction<'rt> {
    pub(crate) fn new(runtime: &'rt Runtime) -> Self {
        Self {
            runtime,
            ops: Vec::new(),
        }
    }

    pub(crate) fn into_ops(self) -> Vec<PendingWrite> {
        self.ops
    }

    /// Buffer a write of `value` at the location `tag` resolves to.
    pub fn set(&mut self, tag: &Tag, context: &Context, value: Value) -> Result<(), RuntimeError> {
        self.push(tag, context, Some(value))
    }

    /// Buffer a removal. Clearing a bare collection clears every member.
    pub fn clear(&mut self, tag: &Tag, context: &Context) -> Result<(), RuntimeError> {
        self.push(tag, context, None)
    }

    /// Nested transactions flatten into their parent: the inner body writes
    /// into the same buffer and the whole batch still commits (or fails) as
    /// one unit.
    pub fn transaction<F>(&mut self, body: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Transaction<'rt>) -> Result<(), RuntimeError>,
    {
        body(self)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push(
        &mut self,
        tag: &Tag,
        context: &Context,
        value: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let limit = self.runtime.limits().max_ops_per_txn;
        if self.ops.len() >= limit {
            let err = RuntimeError::TransactionTooLarge { limit };
            self.runtime.post_write_failure(tag, context, &err);
            return Err(err);
        }
        let (reference, kind, route) = match self.runtime.resolve_write(tag, context) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.runtime.post_write_failure(tag, context, &err);
                return Err(err);
            }
        };
        self.ops.push(PendingWrite {
            tag: tag.clone(),
            context: context.clone(),
            reference,
            kind,
            route,
            value,
        });
        Ok(())
    }
}
