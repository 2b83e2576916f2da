//! Interrupt-safe shared cell
//!
//! [`ChannelState`](crate::ChannelState) and the parameter store are
//! read and written from both the main-loop command handlers and the
//! 50 µs interrupt context. Wrapping the whole engine in one `Shared`
//! cell makes every multi-field update a single critical section, so
//! the interrupt can never observe a half-updated state.

use core::cell::RefCell;

use critical_section::Mutex;

/// A value shared between the main loop and interrupt contexts
///
/// Access goes through [`Shared::with`], which masks interrupts for the
/// duration of the closure. Closures must stay short; the pulse
/// scheduler runs every 50 µs.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    /// Create a new shared cell
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}
