//! Application layer: the interception table, the overlay HTTP client, the
//! consumer notification dispatcher and the interceptor that ties them
//! together.

pub mod dispatcher;
pub mod http_client;
pub mod interceptor;
pub mod table;
