//! Self-contained demonstration of request interception.
//!
//! Two loops share an in-process [`LoopbackNetwork`].  The server loop binds
//! a service and answers every HTTP request on it with a fixed body.  The
//! client loop has an [`Interceptor`] installed; the service's intercept
//! address is the origin of the demo URL, so fetching that URL through the
//! interceptor travels over the overlay instead of the regular network.  The
//! calling thread is the consumer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use bytes::{Bytes, BytesMut};
use http::{StatusCode, Uri};
use overlay_core::{
    HttpRequest, Identity, OriginKey, Permissions, RequestFailure, ResponseHead, ServiceDescriptor,
};
use overlay_intercept::{
    consumer_channel, DeliveryTarget, Interceptor, InterceptorConfig, RequestClient, RequestId,
    RunLoopMode,
};
use overlay_loop::{ConnectionHandle, DataEvent, LoopConfig, LoopContext, LoopRunner, LoopbackNetwork};
use parking_lot::Mutex;
use tracing::{debug, info};

const SERVICE: &str = "demo-web";

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub url: Uri,
    /// Body the demo service answers with.
    pub body: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoOutcome {
    pub status: Option<StatusCode>,
    pub body: Bytes,
    pub failure: Option<RequestFailure>,
}

/// Runs the demo and returns what the consumer observed.
///
/// # Errors
///
/// Fails if the URL has no interceptable origin, a loop cannot start, the
/// request is not intercepted, or it does not finish within the timeout.
pub fn run(
    identity: Identity,
    loop_config: LoopConfig,
    intercept_config: InterceptorConfig,
    options: &DemoOptions,
) -> anyhow::Result<DemoOutcome> {
    let origin = OriginKey::from_uri(&options.url).context("demo url has no http(s) origin")?;
    let network = LoopbackNetwork::new();
    network.publish(
        ServiceDescriptor::new("demo", SERVICE)
            .with_intercept(origin.host(), origin.port())
            .with_permissions(Permissions::dial_and_bind()),
    );

    let server_config = LoopConfig {
        thread_name: format!("{}-server", loop_config.thread_name),
        ..loop_config.clone()
    };
    let server = LoopRunner::start(server_config, identity.clone(), network.client())
        .context("failed to start server loop")?;
    let client = match LoopRunner::start(loop_config, identity, network.client()) {
        Ok(client) => client,
        Err(e) => {
            stop(&server, options.timeout);
            return Err(e).context("failed to start client loop");
        }
    };

    let result = fetch(&server, &client, &origin, intercept_config, options);
    stop(&client, options.timeout);
    stop(&server, options.timeout);
    result
}

fn fetch(
    server: &LoopContext,
    client: &LoopContext,
    origin: &OriginKey,
    intercept_config: InterceptorConfig,
    options: &DemoOptions,
) -> anyhow::Result<DemoOutcome> {
    let deadline = Instant::now() + options.timeout;
    let _listener = serve(server, &options.body);

    let interceptor = Interceptor::install(client, intercept_config);
    // The service is announced just after init.
    while !interceptor.table().can_intercept(origin) {
        if Instant::now() >= deadline {
            bail!("service '{SERVICE}' was never announced");
        }
        thread::sleep(Duration::from_millis(5));
    }
    info!("intercepting {origin} via '{SERVICE}'");

    let (handle, mut consumer) = consumer_channel(16);
    let collector = Arc::new(Collector::default());
    let id = interceptor
        .start_loading(
            HttpRequest::get(options.url.clone()),
            collector.clone(),
            DeliveryTarget::default_mode(handle),
        )
        .context("request was not intercepted")?;
    debug!("request {id} started");

    if !consumer.run_until(&RunLoopMode::Default, deadline, || collector.is_done()) {
        interceptor.stop_loading(id);
        bail!("request did not finish within {:?}", options.timeout);
    }
    interceptor.uninstall();
    Ok(collector.outcome())
}

fn stop(ctx: &LoopContext, timeout: Duration) {
    ctx.shutdown();
    if !ctx.wait_closed(timeout) {
        tracing::warn!("loop did not close within {timeout:?}");
    }
}

/// Binds the demo service and answers each request head with `body`.
fn serve(ctx: &LoopContext, body: &str) -> ConnectionHandle {
    let response = Bytes::from(format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    ));
    let listener = ConnectionHandle::new(ctx);
    listener.listen(
        SERVICE,
        |result| match result {
            Ok(()) => debug!("demo service bound"),
            Err(e) => tracing::error!("demo service failed to bind: {e}"),
        },
        move |child: ConnectionHandle| {
            let me = child.clone();
            let response = response.clone();
            let pending = Mutex::new(BytesMut::new());
            child.accept(
                |_| {},
                move |event| match event {
                    DataEvent::Data(bytes) => {
                        let mut pending = pending.lock();
                        pending.extend_from_slice(&bytes);
                        while let Some(end) = head_end(&pending) {
                            let _ = pending.split_to(end);
                            me.write(response.clone(), |_| {});
                        }
                    }
                    DataEvent::Eof | DataEvent::Error(_) => me.close(),
                },
            );
        },
    );
    listener
}

fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[derive(Default)]
struct Collected {
    status: Option<StatusCode>,
    body: BytesMut,
    failure: Option<RequestFailure>,
    done: bool,
}

/// Consumer that keeps everything it is told.
#[derive(Default)]
struct Collector {
    inner: Mutex<Collected>,
}

impl Collector {
    fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    fn outcome(&self) -> DemoOutcome {
        let inner = self.inner.lock();
        DemoOutcome {
            status: inner.status,
            body: Bytes::copy_from_slice(&inner.body),
            failure: inner.failure.clone(),
        }
    }
}

impl RequestClient for Collector {
    fn did_receive_response(&self, _: RequestId, head: &ResponseHead) {
        self.inner.lock().status = Some(head.status);
    }

    fn did_load_data(&self, _: RequestId, data: &Bytes) {
        self.inner.lock().body.extend_from_slice(data);
    }

    fn did_finish_loading(&self, _: RequestId) {
        self.inner.lock().done = true;
    }

    fn did_fail(&self, _: RequestId, failure: &RequestFailure) {
        let mut inner = self.inner.lock();
        inner.failure = Some(failure.clone());
        inner.done = true;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
