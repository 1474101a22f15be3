#![forbid(unsafe_code)]

//! HTTP transport used by the lyra playlist and fragment loaders.
//!
//! [`HttpClient`] is the base implementation; [`TimeoutNet`] and [`RetryNet`]
//! wrap any [`Net`] and can be layered through [`NetExt`].

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    retry::{DefaultRetryClassifier, DefaultRetryPolicy, RetryClassifier, RetryNet, RetryPolicyTrait},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Headers, NetOptions, RangeSpec, RetryPolicy},
};
