use std::fmt::Display;

use fvm_shared::error::ExitCode;
use thiserror::Error;

/// The error an actor method aborts with: an exit code and a message for debugging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ActorError(exit_code: {exit_code:?}, msg: {msg})")]
pub struct ActorError {
    exit_code: ExitCode,
    msg: String,
}

macro_rules! exit_code_constructors {
    ($($name:ident => $code:ident,)*) => {
        $(
            pub fn $name(msg: String) -> Self {
                Self::unchecked(ExitCode::$code, msg)
            }
        )*
    };
}

impl ActorError {
    /// Creates an error with any exit code, including ones the VM reserves.
    pub fn unchecked(exit_code: ExitCode, msg: String) -> Self {
        Self { exit_code, msg }
    }

    exit_code_constructors! {
        illegal_argument => USR_ILLEGAL_ARGUMENT,
        not_found => USR_NOT_FOUND,
        forbidden => USR_FORBIDDEN,
        insufficient_funds => USR_INSUFFICIENT_FUNDS,
        illegal_state => USR_ILLEGAL_STATE,
        serialization => USR_SERIALIZATION,
        unhandled_message => USR_UNHANDLED_MESSAGE,
        assertion_failed => USR_ASSERTION_FAILED,
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Whether the error means actor state is inconsistent, as opposed to a rejected request.
    /// Batch operations abort on these instead of skipping the offending item.
    pub fn is_fatal(&self) -> bool {
        matches!(self.exit_code, ExitCode::USR_ILLEGAL_STATE | ExitCode::USR_ASSERTION_FAILED)
    }

    /// Prefixes the message with `context`, keeping the exit code.
    pub fn wrap(mut self, context: impl AsRef<str>) -> Self {
        self.msg = prefixed(context.as_ref(), &self.msg);
        self
    }
}

fn prefixed(context: impl Display, msg: impl Display) -> String {
    format!("{}: {}", context, msg)
}

impl From<fvm_ipld_encoding::Error> for ActorError {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Builds an [`ActorError`] from a constructor name and a message or format string.
///
/// ```ignore
/// actor_error!(not_found, "no such deal {}", id)
/// actor_error!(forbidden; "caller may not move funds")
/// ```
#[macro_export]
macro_rules! actor_error {
    ( $code:ident; $msg:expr ) => { $crate::ActorError::$code($msg.to_string()) };

    ( $code:ident; $msg:literal $(, $ex:expr)+ ) => {
        $crate::ActorError::$code(format!($msg, $($ex,)*))
    };

    ( $code:ident, $msg:expr ) => { $crate::actor_error!($code; $msg) };

    ( $code:ident, $msg:literal $(, $ex:expr)+ ) => {
        $crate::actor_error!($code; $msg $(, $ex)*)
    };
}

/// Adds context to the message of an [`ActorError`] result.
pub trait ActorContext<T> {
    fn context<C>(self, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static;

    fn with_context<C, F>(self, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C;
}

impl<T> ActorContext<T> for Result<T, ActorError> {
    fn context<C>(self, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.with_context(|| context)
    }

    fn with_context<C, F>(self, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| err.wrap(f().to_string()))
    }
}

/// Converts foreign errors and missing values into an [`ActorError`] with a chosen exit code.
pub trait AsActorError<T>: Sized {
    fn exit_code(self, code: ExitCode) -> Result<T, ActorError>;

    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.with_context_code(code, || context)
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C;
}

// Storage libraries return anyhow or their own error types.
impl<T, E: Display> AsActorError<T> for Result<T, E> {
    fn exit_code(self, code: ExitCode) -> Result<T, ActorError> {
        self.map_err(|err| ActorError::unchecked(code, err.to_string()))
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| ActorError::unchecked(code, prefixed(f(), err)))
    }
}

impl<T> AsActorError<T> for Option<T> {
    fn exit_code(self, code: ExitCode) -> Result<T, ActorError> {
        self.with_context_code(code, || "None")
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| ActorError::unchecked(code, f().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_prefixes_message() {
        let res: Result<(), ActorError> = Err(actor_error!(not_found; "deal {} missing", 7));
        let err = res.context("activating deals").unwrap_err();
        assert_eq!(ExitCode::USR_NOT_FOUND, err.exit_code());
        assert_eq!("activating deals: deal 7 missing", err.msg());
    }

    #[test]
    fn foreign_error_takes_chosen_code() {
        let res: Result<(), String> = Err("hamt node missing".to_string());
        let err = res.context_code(ExitCode::USR_ILLEGAL_STATE, "loading escrow").unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_STATE, err.exit_code());
        assert_eq!("loading escrow: hamt node missing", err.msg());
    }

    #[test]
    fn option_context_code() {
        let missing: Option<u64> = None;
        let err = missing.context_code(ExitCode::USR_ILLEGAL_STATE, "no state").unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_STATE, err.exit_code());
        assert_eq!("no state", err.msg());
        assert!(err.is_fatal());
        assert!(!ActorError::forbidden("nope".to_string()).is_fatal());
    }
}
