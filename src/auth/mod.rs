//! Registration and login orchestration.

mod flow;
mod reservations;

pub use flow::{
    AuthFlow, Components, Credentials, FlowError, LoginOutcome, Registration, TokenSource,
    MAX_NAME_LEN,
};
pub use reservations::Reservations;
