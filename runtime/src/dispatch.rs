use std::marker::PhantomData;

use castaway::cast;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use serde::{Deserialize, Serialize};

use crate::ActorError;

/// Generates `ActorCode::invoke_method` from a table of method variants and handlers.
///
/// ```ignore
/// #[derive(FromPrimitive)]
/// #[repr(u64)]
/// enum Method {
///     Constructor = 1,
///     AddBalance = 2,
/// }
/// impl ActorCode for Actor {
///     type Methods = Method;
///     actor_dispatch! {
///         Constructor => constructor,
///         AddBalance => add_balance,
///     }
/// }
/// ```
///
/// A handler takes the runtime and at most one parameter, which is decoded from the
/// message's parameter block. A `()` return produces no return block.
#[macro_export]
macro_rules! actor_dispatch {
    ($($(#[$m:meta])* $method:ident => $func:ident,)*) => {
        fn invoke_method<RT>(
            rt: &RT,
            method: fvm_shared::MethodNum,
            args: Option<fvm_ipld_encoding::ipld_block::IpldBlock>,
        ) -> Result<Option<fvm_ipld_encoding::ipld_block::IpldBlock>, $crate::ActorError>
        where
            RT: $crate::runtime::Runtime,
        {
            match <Self::Methods as num_traits::FromPrimitive>::from_u64(method) {
                $($(#[$m])*
                  Some(Self::Methods::$method) => {
                      log::trace!("{}: invoking {}", Self::name(), stringify!($method));
                      $crate::dispatch(rt, Self::$func, &args)
                  })*
                None => Err($crate::actor_error!(unhandled_message; "invalid method: {}", method)),
            }
        }
    };
}

pub trait Dispatch<'de, RT> {
    fn call(self, rt: &RT, args: &'de Option<IpldBlock>) -> Result<Option<IpldBlock>, ActorError>;
}

/// A handler together with its parameter list, `()` or `(A,)`.
pub struct Dispatcher<F, A> {
    func: F,
    _params: PhantomData<fn(A)>,
}

/// Decodes the parameters for `func`, calls it and encodes its return value.
#[doc(hidden)]
pub fn dispatch<'de, F, A, RT>(
    rt: &RT,
    func: F,
    arg: &'de Option<IpldBlock>,
) -> Result<Option<IpldBlock>, ActorError>
where
    Dispatcher<F, A>: Dispatch<'de, RT>,
{
    Dispatcher { func, _params: PhantomData }.call(rt, arg)
}

fn encode_return<T: Serialize>(v: T) -> Result<Option<IpldBlock>, ActorError> {
    match cast!(&v, &()) {
        Ok(_) => Ok(None),
        Err(_) => Ok(IpldBlock::serialize_cbor(&v)?),
    }
}

impl<'de, F, R, RT> Dispatch<'de, RT> for Dispatcher<F, ()>
where
    F: FnOnce(&RT) -> Result<R, ActorError>,
    R: Serialize,
{
    fn call(self, rt: &RT, args: &'de Option<IpldBlock>) -> Result<Option<IpldBlock>, ActorError> {
        if args.is_some() {
            return Err(ActorError::illegal_argument("method expects no arguments".into()));
        }
        encode_return((self.func)(rt)?)
    }
}

impl<'de, F, A, R, RT> Dispatch<'de, RT> for Dispatcher<F, (A,)>
where
    F: FnOnce(&RT, A) -> Result<R, ActorError>,
    A: Deserialize<'de>,
    R: Serialize,
{
    fn call(self, rt: &RT, args: &'de Option<IpldBlock>) -> Result<Option<IpldBlock>, ActorError> {
        let params = args
            .as_ref()
            .ok_or_else(|| ActorError::illegal_argument("method expects arguments".into()))?
            .deserialize()?;
        encode_return((self.func)(rt, params)?)
    }
}

#[cfg(test)]
mod tests {
    use fvm_ipld_encoding::ipld_block::IpldBlock;
    use fvm_ipld_encoding::tuple::*;
    use fvm_shared::error::ExitCode;

    use super::dispatch;
    use crate::ActorError;

    #[derive(Serialize_tuple, Deserialize_tuple, Debug, PartialEq)]
    struct Withdraw {
        account: u64,
        amount: u64,
    }

    struct StubRuntime;

    fn withdraw(_: &StubRuntime, params: Withdraw) -> Result<(), ActorError> {
        assert_eq!(Withdraw { account: 101, amount: 5 }, params);
        Ok(())
    }

    fn withdraw_all(_: &StubRuntime, params: Withdraw) -> Result<u64, ActorError> {
        Ok(params.amount)
    }

    fn cron_tick(_: &StubRuntime) -> Result<(), ActorError> {
        Ok(())
    }

    #[test]
    fn unit_return_produces_no_block() {
        let arg = IpldBlock::serialize_cbor(&Withdraw { account: 101, amount: 5 }).unwrap();
        assert!(dispatch(&StubRuntime, withdraw, &arg).unwrap().is_none());
        assert!(dispatch(&StubRuntime, cron_tick, &None).unwrap().is_none());
    }

    #[test]
    fn return_value_is_encoded() {
        let arg = IpldBlock::serialize_cbor(&Withdraw { account: 101, amount: 5 }).unwrap();
        let ret = dispatch(&StubRuntime, withdraw_all, &arg).unwrap();
        assert_eq!(IpldBlock::serialize_cbor(&5u64).unwrap(), ret);
    }

    #[test]
    fn parameter_count_mismatch_is_illegal_argument() {
        let arg = IpldBlock::serialize_cbor(&Withdraw { account: 101, amount: 5 }).unwrap();
        let err = dispatch(&StubRuntime, withdraw, &None).unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_ARGUMENT, err.exit_code());
        let err = dispatch(&StubRuntime, cron_tick, &arg).unwrap_err();
        assert_eq!(ExitCode::USR_ILLEGAL_ARGUMENT, err.exit_code());
    }

    #[test]
    fn undecodable_parameters_are_rejected() {
        let arg = IpldBlock::serialize_cbor(&"not a withdrawal").unwrap();
        let err = dispatch(&StubRuntime, withdraw, &arg).unwrap_err();
        assert_eq!(ExitCode::USR_SERIALIZATION, err.exit_code());
    }
}
