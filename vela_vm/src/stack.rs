//! Per-thread execution-module stack.
//!
//! The augmentation resolver's `CallStack` scope needs the modules of
//! the functions currently executing on this thread. The dispatcher
//! pushes a frame around every invocation whose target has a known
//! defining module; generated code may also push frames explicitly
//! around host-to-runtime entry points.

use std::cell::RefCell;
use vela_core::intern::InternedString;

thread_local! {
    static MODULE_STACK: RefCell<Vec<InternedString>> = const { RefCell::new(Vec::new()) };
}

/// RAII frame on the execution-module stack.
#[derive(Debug)]
pub struct ExecutionFrame {
    _private: (),
}

impl ExecutionFrame {
    /// Push `module` for the lifetime of the returned frame.
    pub fn enter(module: InternedString) -> Self {
        MODULE_STACK.with(|stack| stack.borrow_mut().push(module));
        Self { _private: () }
    }
}

impl Drop for ExecutionFrame {
    fn drop(&mut self) {
        MODULE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Snapshot of the stack, most recent frame first.
pub fn current_modules() -> Vec<InternedString> {
    MODULE_STACK.with(|stack| {
        let stack = stack.borrow();
        stack.iter().rev().copied().collect()
    })
}
