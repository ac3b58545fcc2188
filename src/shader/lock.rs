//! Process wide graphics critical section.
//!
//! GPU object lifecycle calls (program compile, texture create/destroy) run
//! while this section is held. It is reentrant so a render pass that already
//! holds it can call helpers that enter it again.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;
use std::sync::LazyLock;

static GRAPHICS: LazyLock<ReentrantMutex<()>> = LazyLock::new(|| ReentrantMutex::new(()));

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Scoped ownership of the graphics context. Released on drop.
pub struct GraphicsGuard {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl Drop for GraphicsGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Enter the graphics context, blocking while another thread holds it.
pub fn enter_graphics() -> GraphicsGuard {
    let guard = GRAPHICS.lock();
    DEPTH.with(|depth| depth.set(depth.get() + 1));
    GraphicsGuard { _guard: guard }
}

/// Whether the current thread holds the graphics context.
pub fn graphics_entered() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}
