//! Ambient per-thread RLS context.
//!
//! Explicit context passing is the primary API. The scope exists for code
//! paths that cannot thread a context through, such as hooks invoked by a
//! query builder. A scope covers the dynamic extent of one closure on the
//! current thread; the previous context is restored on exit, including exit
//! by unwinding.
//!
//! The scope does not follow a future across threads. Async hosts should
//! resolve the context up front and pass it explicitly.

use std::cell::RefCell;
use std::sync::Arc;

use rowguard_types::RlsContext;

thread_local! {
    static CURRENT: RefCell<Option<Arc<RlsContext>>> = const { RefCell::new(None) };
}

/// Restores the previously installed context on drop.
struct ScopeGuard {
    previous: Option<Arc<RlsContext>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Runs `f` with `ctx` installed as the current context.
pub fn with_context<T>(ctx: impl Into<Arc<RlsContext>>, f: impl FnOnce() -> T) -> T {
    let previous = CURRENT.with(|slot| slot.borrow_mut().replace(ctx.into()));
    let _guard = ScopeGuard { previous };
    f()
}

/// The innermost installed context, if any.
pub fn current() -> Option<Arc<RlsContext>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

pub fn has_context() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}
