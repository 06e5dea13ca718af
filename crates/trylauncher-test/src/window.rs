//! Scripted framebuffer source.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use trylauncher_gpu::FramebufferSource;

/// Window double whose framebuffer size follows a script.
///
/// Each [`framebuffer_size`](FramebufferSource::framebuffer_size) call
/// consumes the next scripted size; once the script runs out the last size
/// sticks.
#[derive(Debug)]
pub struct MockWindow {
    current: Mutex<(u32, u32)>,
    script: Mutex<VecDeque<(u32, u32)>>,
    waits: AtomicUsize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            current: Mutex::new((width, height)),
            script: Mutex::new(VecDeque::new()),
            waits: AtomicUsize::new(0),
        }
    }

    /// Change the size immediately.
    pub fn resize(&self, width: u32, height: u32) {
        self.script.lock().clear();
        *self.current.lock() = (width, height);
    }

    /// Queue sizes returned by upcoming queries, e.g. a minimize followed
    /// by a restore: `[(0, 0), (0, 0), (800, 600)]`.
    pub fn script_sizes(&self, sizes: impl IntoIterator<Item = (u32, u32)>) {
        self.script.lock().extend(sizes);
    }

    /// Number of times the caller blocked on window events.
    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::Relaxed)
    }
}

impl FramebufferSource for MockWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let mut current = self.current.lock();
        if let Some(next) = self.script.lock().pop_front() {
            *current = next;
        }
        *current
    }

    fn wait_events(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_consumed_then_last_size_sticks() {
        let window = MockWindow::new(640, 480);
        window.script_sizes([(0, 0), (800, 600)]);

        assert_eq!(window.framebuffer_size(), (0, 0));
        assert_eq!(window.framebuffer_size(), (800, 600));
        assert_eq!(window.framebuffer_size(), (800, 600));
    }
}
