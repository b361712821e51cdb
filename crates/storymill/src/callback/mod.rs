//! Asynchronous-callback plumbing: per-job secrets and the correlator
//! that maps inbound deliveries back to their waiting job.

pub mod correlator;
pub mod secret;

pub use correlator::{
    CallbackCorrelator, CallbackCredentials, CallbackData, CallbackOutcome, CallbackPayload,
    ProcessRef,
};
pub use secret::{hash_token, CallbackSecret};
