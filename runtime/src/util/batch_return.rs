use fvm_ipld_encoding::tuple::*;
use fvm_shared::error::ExitCode;

#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct FailCode {
    pub idx: u32,
    pub code: ExitCode,
}

/// Per-item outcome of a batch in which items succeed or fail independently.
/// Only failures are listed; every other index succeeded.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, PartialEq, Eq, Debug)]
pub struct BatchReturn {
    pub success_count: u32,
    /// Failures in ascending index order.
    pub fail_codes: Vec<FailCode>,
}

impl BatchReturn {
    pub const fn ok(n: u32) -> Self {
        Self { success_count: n, fail_codes: Vec::new() }
    }

    pub fn size(&self) -> usize {
        self.success_count as usize + self.fail_codes.len()
    }

    pub fn all_ok(&self) -> bool {
        self.fail_codes.is_empty()
    }

    /// The exit code of every item in input order, `OK` for successes.
    pub fn codes(&self) -> Vec<ExitCode> {
        let mut codes = vec![ExitCode::OK; self.size()];
        for FailCode { idx, code } in &self.fail_codes {
            codes[*idx as usize] = *code;
        }
        codes
    }
}

/// Builds a [`BatchReturn`] by recording each item's outcome in input order.
pub struct BatchReturnGen {
    expect_count: usize,
    success_count: usize,
    fail_codes: Vec<FailCode>,
}

impl BatchReturnGen {
    pub fn new(expect_count: usize) -> Self {
        Self { expect_count, success_count: 0, fail_codes: Vec::new() }
    }

    fn next_idx(&self) -> u32 {
        (self.success_count + self.fail_codes.len()) as u32
    }

    pub fn add_success(&mut self) -> &mut Self {
        self.success_count += 1;
        self
    }

    pub fn add_fail(&mut self, code: ExitCode) -> &mut Self {
        let idx = self.next_idx();
        self.fail_codes.push(FailCode { idx, code });
        self
    }

    /// Panics unless an outcome was recorded for every expected item.
    pub fn gen(&self) -> BatchReturn {
        assert_eq!(
            self.expect_count,
            self.next_idx() as usize,
            "outcomes recorded for {} of {} batch items",
            self.next_idx(),
            self.expect_count
        );
        BatchReturn {
            success_count: self.success_count as u32,
            fail_codes: self.fail_codes.clone(),
        }
    }
}
