//! # overlay-intercept
//!
//! Routes selected HTTP(S) requests over overlay connections instead of the
//! regular network.
//!
//! A service whose configuration carries an intercept address
//! (`hostname`, `port`) makes both `http://hostname:port` and
//! `https://hostname:port` interceptable.  Requests to those origins are
//! written as HTTP/1.1 to a connection dialed to the service, and the
//! response is reported through the four [`RequestClient`] notifications on
//! the thread that started the request.
//!
//! ```text
//!  consumer thread                 loop thread
//!  ───────────────                 ───────────
//!  start_loading ──perform──────▶  dispatch → OverlayHttpClient
//!                                   │  dial / write / parse
//!  did_receive_response ◀─deliver── Head
//!  did_load_data        ◀─deliver── Data
//!  did_finish_loading   ◀─deliver── End
//! ```
//!
//! Requests with no matching intercept are refused with an error for which
//! [`InterceptError::is_fallback`] is `true`; the caller loads them normally.

pub mod application;
pub mod domain;

pub use application::dispatcher::{
    consumer_channel, ConsumerHandle, ConsumerLoop, DeliveryOutcome, DeliveryTarget,
    NotificationDispatcher, RunLoopMode,
};
pub use application::http_client::{ExchangeCallback, ExchangeEvent, ExchangeHandle, OverlayHttpClient};
pub use application::interceptor::Interceptor;
pub use application::table::{Intercept, InterceptTable};
pub use domain::config::InterceptorConfig;
pub use domain::error::InterceptError;
pub use domain::notification::RequestClient;
pub use domain::request::{RequestId, RequestLifecycle, RequestState};
