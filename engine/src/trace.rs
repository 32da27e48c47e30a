// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Optional per-worker call-stack tracing of gate traversal.
//!
//! Enabled with the `trace-modules` feature; otherwise every hook is an
//! empty inline function and the dispatch path pays nothing.

#[cfg(feature = "trace-modules")]
mod imp {
    use std::cell::RefCell;
    use std::fmt::Write;

    use tracing::debug;

    use crate::WorkerId;

    const MAX_TRACE_DEPTH: usize = 32;
    const MAX_TRACE_BUFSIZE: usize = 4096;

    #[derive(Default)]
    struct CallStack {
        depth: usize,
        newlined: bool,
        indent: [usize; MAX_TRACE_DEPTH],
        curr_indent: usize,
        buf: String,
    }

    thread_local! {
        static CALLSTACK: RefCell<CallStack> = RefCell::new(CallStack::default());
    }

    pub(crate) fn start(wid: WorkerId, module: &str, kind: &str) {
        CALLSTACK.with_borrow_mut(|s| {
            debug_assert_eq!(s.depth, 0);
            s.buf.clear();
            let _ = write!(s.buf, "Worker {wid} {kind:<8} | {module}");
            s.curr_indent = s.buf.len();
            s.newlined = false;
        });
    }

    pub(crate) fn before_call(next: &str, cnt: usize) {
        CALLSTACK.with_borrow_mut(|s| {
            if s.depth >= MAX_TRACE_DEPTH || s.buf.len() >= MAX_TRACE_BUFSIZE {
                s.depth += 1;
                return;
            }
            s.indent[s.depth] = s.curr_indent;
            if s.newlined {
                let pad = s.curr_indent;
                let _ = write!(s.buf, "{:pad$}", "");
            }
            let before = s.buf.len();
            let _ = write!(s.buf, " ---({cnt})--> {next}");
            s.curr_indent += s.buf.len() - before;
            s.depth += 1;
            s.newlined = false;
        });
    }

    pub(crate) fn after_call() {
        CALLSTACK.with_borrow_mut(|s| {
            s.depth = s.depth.saturating_sub(1);
            if !s.newlined {
                s.newlined = true;
                s.buf.push('\n');
            }
            if s.depth < MAX_TRACE_DEPTH {
                s.curr_indent = s.indent[s.depth];
            }
        });
    }

    pub(crate) fn end(print_out: bool) {
        CALLSTACK.with_borrow_mut(|s| {
            debug_assert_eq!(s.depth, 0);
            if print_out {
                debug!("{}", s.buf.trim_end());
            }
            s.buf.clear();
            s.newlined = false;
            s.depth = 0;
        });
    }
}

#[cfg(feature = "trace-modules")]
pub(crate) use imp::{after_call, before_call, end, start};

#[cfg(not(feature = "trace-modules"))]
mod imp {
    use crate::WorkerId;

    #[inline(always)]
    pub(crate) fn start(_wid: WorkerId, _module: &str, _kind: &str) {}
    #[inline(always)]
    pub(crate) fn before_call(_next: &str, _cnt: usize) {}
    #[inline(always)]
    pub(crate) fn after_call() {}
    #[inline(always)]
    pub(crate) fn end(_print_out: bool) {}
}

#[cfg(not(feature = "trace-modules"))]
pub(crate) use imp::{after_call, before_call, end, start};
