// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circulation commands and their outcomes.

use std::fmt;
use std::str::FromStr;

use crate::codec::CodecError;

/// The three circulation operations.
///
/// The wire name doubles as the pub/sub topic for the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Loan,
    Return,
    Renew,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Loan, Operation::Return, Operation::Renew];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Loan => "LOAN",
            Operation::Return => "RETURN",
            Operation::Renew => "RENEW",
        }
    }

    /// Topic on which the coordinator publishes this operation.
    pub fn topic(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOAN" => Ok(Operation::Loan),
            "RETURN" => Ok(Operation::Return),
            "RENEW" => Ok(Operation::Renew),
            other => Err(CodecError::UnknownOperation(other.to_string())),
        }
    }
}

/// One circulation command addressed to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Envelope {
    pub operation: Operation,
    pub branch_id: String,
    pub user_id: String,
    pub book_code: String,
}

impl Envelope {
    pub fn new(
        operation: Operation,
        branch_id: impl Into<String>,
        user_id: impl Into<String>,
        book_code: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            branch_id: branch_id.into(),
            user_id: user_id.into(),
            book_code: book_code.into(),
        }
    }

    pub fn loan(branch_id: &str, user_id: &str, book_code: &str) -> Self {
        Self::new(Operation::Loan, branch_id, user_id, book_code)
    }

    pub fn return_book(branch_id: &str, user_id: &str, book_code: &str) -> Self {
        Self::new(Operation::Return, branch_id, user_id, book_code)
    }

    pub fn renew(branch_id: &str, user_id: &str, book_code: &str) -> Self {
        Self::new(Operation::Renew, branch_id, user_id, book_code)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} branch={} user={} book={}",
            self.operation, self.branch_id, self.user_id, self.book_code
        )
    }
}

/// Outcome of a storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }

    pub(crate) fn status_tag(&self) -> &'static str {
        if self.ok { "OK" } else { "ERR" }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status_tag(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(op.topic(), op.as_str());
        }
    }

    #[test]
    fn test_operation_is_case_sensitive() {
        assert!(matches!(
            "loan".parse::<Operation>(),
            Err(CodecError::UnknownOperation(name)) if name == "loan"
        ));
    }

    #[test]
    fn test_envelope_display() {
        let env = Envelope::loan("B1", "U1", "BK1");
        assert_eq!(env.to_string(), "LOAN branch=B1 user=U1 book=BK1");
    }

    #[test]
    fn test_result_display() {
        assert_eq!(CommandResult::success("done").to_string(), "OK: done");
        assert_eq!(CommandResult::failure("nope").to_string(), "ERR: nope");
    }
}
