// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed state machine transitions
//!
//! The protocol state machines in this workspace (connection lifecycle,
//! congestion state, ECN state) are enums whose transitions are generated
//! by the [`event`] macro. Illegal transitions are reported as
//! [`Error::InvalidTransition`] values rather than asserts, so a
//! misbehaving peer can never abort the process.

use core::fmt;

pub type Result<T> = core::result::Result<(), Error<T>>;

#[doc(hidden)]
pub use tracing::debug as _debug;

#[macro_export]
#[doc(hidden)]
macro_rules! __state_transition__ {
    ($state:ident, $valid:pat => $target:expr) => {
        $crate::state::transition!(@build [], _, $state, [$valid => $target])
    };
    (@build [$($targets:expr),*], $event:ident, $state:ident, [$valid:pat => $target:expr] $($remaining:tt)*) => {{
        // if the transition is valid, then perform it
        if matches!($state, $valid) {
            $crate::state::_debug!(event = stringify!($event), prev = ?$state, next = ?$target);
            *$state = $target;
            Ok(())
        } else {
            $crate::state::transition!(
                @build [$($targets,)* $target],
                $event,
                $state,
                $($remaining)*
            )
        }
    }};
    (@build [$($targets:expr),*], $event:ident, $state:ident $(,)?) => {{
        let targets = [$($targets),*];

        // if we only have a single target and the current state matches it, then return a no-op
        if targets.len() == 1 && targets[0].eq($state) {
            let current = targets[0].clone();
            Err($crate::state::Error::NoOp { current })
        } else {
            // if we didn't get a valid match then error out
            Err($crate::state::Error::InvalidTransition {
                current: $state.clone(),
                event: stringify!($event),
            })
        }
    }};
}

pub use crate::__state_transition__ as transition;

#[macro_export]
#[doc(hidden)]
macro_rules! __state_event__ {
    ($(
        $(#[doc = $doc:literal])*
        $event:ident (
            $(
                $($valid:ident)|* => $target:ident
            ),*
            $(,)?
        );
    )*) => {
        $(
            $(
                #[doc = $doc]
            )*
            #[inline]
            pub fn $event(&mut self) -> $crate::state::Result<Self> {
                $crate::state::transition!(
                    @build [],
                    $event,
                    self,
                    $(
                        [$(Self::$valid)|* => Self::$target]
                    )*
                )
            }
        )*
    };
}

pub use crate::__state_event__ as event;

#[macro_export]
#[doc(hidden)]
macro_rules! __state_is__ {
    ($(#[doc = $doc:literal])* $function:ident, $($state:ident)|+) => {
        $(
            #[doc = $doc]
        )*
        #[inline]
        pub fn $function(&self) -> bool {
            matches!(self, $(Self::$state)|*)
        }
    };
}

pub use crate::__state_is__ as is;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error<T> {
    NoOp { current: T },
    InvalidTransition { current: T, event: &'static str },
}

impl<T: fmt::Debug> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp { current } => {
                write!(f, "state is already set to {current:?}")
            }
            Self::InvalidTransition { current, event } => {
                write!(f, "invalid event {event:?} for state {current:?}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl<T: fmt::Debug> std::error::Error for Error<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    enum State {
        #[default]
        Idle,
        Active,
        Draining,
        Finished,
    }

    impl State {
        event! {
            on_activate(Idle => Active);
            on_drain(Active => Draining);
            on_finish(Active | Draining => Finished);
        }

        is!(is_finished, Finished);
    }

    #[test]
    fn valid_transitions() {
        let mut state = State::Idle;

        state.on_activate().unwrap();
        assert_eq!(state, State::Active);

        state.on_drain().unwrap();
        state.on_finish().unwrap();
        assert!(state.is_finished());
    }

    #[test]
    fn invalid_transition() {
        let mut state = State::Idle;

        assert_eq!(
            state.on_drain(),
            Err(Error::InvalidTransition {
                current: State::Idle,
                event: "on_drain",
            })
        );
        assert_eq!(state, State::Idle);
    }

    #[test]
    fn no_op_transition() {
        let mut state = State::Active;
        state.on_activate().unwrap_err();

        let mut state = State::Idle;
        state.on_activate().unwrap();
        assert_eq!(
            state.on_activate(),
            Err(Error::NoOp {
                current: State::Active
            })
        );
    }
}
