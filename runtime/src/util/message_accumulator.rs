// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

/// Collects invariant violations so a check can report all of them instead of stopping at
/// the first.
#[derive(Default, Debug)]
pub struct MessageAccumulator {
    msgs: Rc<RefCell<Vec<String>>>,
    prefix: String,
}

impl MessageAccumulator {
    /// An accumulator writing into the same collection, with `prefix` appended to this one's.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self { msgs: Rc::clone(&self.msgs), prefix: format!("{}{}", self.prefix, prefix) }
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.borrow().is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.msgs.borrow().clone()
    }

    pub fn add(&self, msg: &str) {
        let line = format!("{}{}", self.prefix, msg);
        self.msgs.borrow_mut().push(line);
    }

    /// Adds `msg` unless `predicate` holds.
    pub fn require(&self, predicate: bool, msg: &str) {
        if !predicate {
            self.add(msg)
        }
    }

    /// Adds `msg` with the error appended when `result` failed.
    pub fn require_no_error<V, E: Display>(&self, result: Result<V, E>, msg: &str) {
        if let Err(e) = result {
            self.add(&format!("{}: {}", msg, e))
        }
    }

    pub fn assert_empty(&self) {
        assert!(self.is_empty(), "{}", self.messages().join("\n"));
    }
}
