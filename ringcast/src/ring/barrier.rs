//! Reader-side wait handle bound to a cursor.

use crate::error::WaitError;
use crate::ring::cursor::Cursor;
use crate::ring::pointer::PositionSource;
use crate::ring::wait::Alertable;
use crate::ring::{Position, NO_POSITION};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-reader wait handle: resolves to the highest position safe to read.
///
/// Consumer barriers trail the cursor and report completion as
/// `NO_POSITION` once everything published has been handed out. Trailing
/// barriers (the GC task) follow another position source and only stop when
/// closed.
pub struct PointerBarrier {
    cursor: Arc<dyn Cursor>,
    dependent: Option<Arc<dyn PositionSource>>,
    alert_on_complete: bool,
    closed: AtomicBool,
}

impl PointerBarrier {
    pub(crate) fn new(cursor: Arc<dyn Cursor>) -> Self {
        Self {
            cursor,
            dependent: None,
            alert_on_complete: true,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn trailing(cursor: Arc<dyn Cursor>, dependent: Arc<dyn PositionSource>) -> Self {
        Self {
            cursor,
            dependent: Some(dependent),
            alert_on_complete: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Block until `position` is readable.
    ///
    /// Returns the highest readable position (`>= position`), `NO_POSITION`
    /// when closed or when the cursor is complete and nothing at or beyond
    /// `position` was published, or a value below `position` on a spurious
    /// wake-up (callers simply wait again).
    pub fn wait_for(&self, position: Position) -> Result<Position, WaitError> {
        if self.is_closed() {
            return Ok(NO_POSITION);
        }

        let cursor_pointer = self.cursor.current_pointer();
        let dependent: &dyn PositionSource = match &self.dependent {
            Some(dependent) => dependent.as_ref(),
            None => &**cursor_pointer,
        };

        let available = self
            .cursor
            .wait_strategy()
            .wait_for(position, cursor_pointer, dependent, self)?;
        if available >= position {
            // A publish racing complete() can move the cursor past the final
            // position; entries beyond it were rejected and stay hidden.
            let mut upper = available;
            if self.alert_on_complete && self.cursor.confirm_complete() {
                upper = upper.min(self.cursor.await_final_position());
                if upper < position {
                    return Ok(NO_POSITION);
                }
            }
            return Ok(self.cursor.highest_published_position(position, upper));
        }
        if self.is_closed() {
            return Ok(NO_POSITION);
        }
        if self.alert_on_complete && self.cursor.is_complete() {
            let last = self.cursor.await_final_position();
            if last >= position {
                return Ok(self.cursor.highest_published_position(position, last));
            }
            return Ok(NO_POSITION);
        }
        Ok(available)
    }

    /// Stop waiting. Any thread blocked in `wait_for` returns promptly.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cursor.signal_consumers();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closed, or (for consumer barriers) the cursor is complete.
    pub fn is_complete(&self) -> bool {
        self.is_closed() || (self.alert_on_complete && self.cursor.is_complete())
    }

    pub fn cursor(&self) -> &Arc<dyn Cursor> {
        &self.cursor
    }
}

impl Alertable for PointerBarrier {
    #[inline]
    fn is_alerted(&self) -> bool {
        self.is_complete()
    }
}
