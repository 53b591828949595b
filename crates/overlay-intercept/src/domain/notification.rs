//! The consumer-facing notification protocol.
//!
//! A consumer that starts an intercepted request receives, in order:
//!
//! 1. `did_receive_response` once, when the response head arrives;
//! 2. `did_load_data` zero or more times;
//! 3. exactly one of `did_finish_loading` or `did_fail`.
//!
//! A request that fails before its head arrives gets only `did_fail`.
//! Every call runs on the consumer thread recorded when the request started,
//! and none runs after `stop_loading` returned on that thread.

use bytes::Bytes;
use overlay_core::{RequestFailure, ResponseHead};

use crate::domain::request::RequestId;

#[cfg_attr(test, mockall::automock)]
pub trait RequestClient: Send + Sync {
    fn did_receive_response(&self, request: RequestId, head: &ResponseHead);

    fn did_load_data(&self, request: RequestId, data: &Bytes);

    fn did_finish_loading(&self, request: RequestId);

    fn did_fail(&self, request: RequestId, failure: &RequestFailure);
}
