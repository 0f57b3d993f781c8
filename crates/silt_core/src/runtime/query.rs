use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

/// Identity and cancellation state shared by all operators of a running
/// query.
#[derive(Debug)]
pub struct QueryContext {
    query_id: Uuid,
    canceled: AtomicBool,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::with_query_id(Uuid::new_v4())
    }

    pub fn with_query_id(query_id: Uuid) -> Self {
        QueryContext {
            query_id,
            canceled: AtomicBool::new(false),
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Request cancellation. Background work polls this flag and exits at
    /// the next safe point.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        tracing::debug!(query_id = %self.query_id, "query canceled");
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky() {
        let ctx = QueryContext::new();
        assert!(!ctx.is_canceled());
        ctx.cancel();
        assert!(ctx.is_canceled());
        ctx.cancel();
        assert!(ctx.is_canceled());
    }
}
