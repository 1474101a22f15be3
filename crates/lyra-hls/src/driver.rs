//! Tokio host for [`Hls`].
//!
//! The player core never performs I/O. [`Driver`] owns it, runs each
//! [`LoadRequest`] as a task over a [`Net`] transport, feeds progress and
//! outcomes back on its own task and fires the player timers when they are
//! due.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use lyra_net::{Net, NetError, NetExt, RangeSpec};
use lyra_platform::SharedClock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    loader::{LoadOutcome, LoadRequest, LoadStats, Loader, RequestId},
    player::{Hls, HlsBuilder},
};

enum Command {
    Load(LoadRequest),
    Abort(RequestId),
}

/// [`Loader`] handing requests over to the driver loop.
struct ChannelLoader {
    tx: mpsc::UnboundedSender<Command>,
}

impl Loader for ChannelLoader {
    fn load(&mut self, request: LoadRequest) {
        let _ = self.tx.send(Command::Load(request));
    }

    fn abort(&mut self, id: RequestId) {
        let _ = self.tx.send(Command::Abort(id));
    }
}

enum Completion {
    Progress(RequestId, LoadStats),
    Done(RequestId, LoadOutcome),
}

pub struct Driver<N> {
    hls: Hls,
    net: Arc<N>,
    clock: SharedClock,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    in_flight: HashMap<RequestId, CancellationToken>,
}

impl<N: Net + 'static> Driver<N> {
    pub fn new(builder: HlsBuilder, net: N) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let hls = builder.build(ChannelLoader { tx });
        let clock = hls.clock();
        Self {
            hls,
            net: Arc::new(net),
            clock,
            commands,
            completions_tx,
            completions,
            in_flight: HashMap::new(),
        }
    }

    pub fn hls(&self) -> &Hls {
        &self.hls
    }

    pub fn hls_mut(&mut self) -> &mut Hls {
        &mut self.hls
    }

    /// Drive the player until `cancel` fires. Requests still running are
    /// aborted on return.
    pub async fn run(&mut self, cancel: CancellationToken) {
        debug!("driver started");
        loop {
            self.dispatch_commands();
            let wait = self
                .hls
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(self.clock.now()));

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(completion) = self.completions.recv() => match completion {
                    Completion::Progress(id, stats) => self.hls.on_load_progress(id, &stats),
                    Completion::Done(id, outcome) => {
                        self.in_flight.remove(&id);
                        self.hls.on_load_complete(id, outcome);
                    }
                },
                () = sleep_for(wait) => self.hls.advance(),
            }
        }
        for (_, token) in self.in_flight.drain() {
            token.cancel();
        }
        debug!("driver stopped");
    }

    fn dispatch_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Load(request) => self.spawn(request),
                Command::Abort(id) => {
                    if let Some(token) = self.in_flight.remove(&id) {
                        trace!(id = id.0, "cancelling request");
                        token.cancel();
                    }
                }
            }
        }
    }

    fn spawn(&mut self, request: LoadRequest) {
        let token = CancellationToken::new();
        self.in_flight.insert(request.id, token.clone());
        let net = Arc::clone(&self.net);
        let clock = Arc::clone(&self.clock);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let id = request.id;
            tokio::select! {
                () = token.cancelled() => trace!(id = id.0, "request cancelled"),
                outcome = fetch(net, &clock, request, &tx) => {
                    let _ = tx.send(Completion::Done(id, outcome));
                }
            }
        });
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

async fn fetch<N: Net>(
    net: Arc<N>,
    clock: &SharedClock,
    request: LoadRequest,
    tx: &mpsc::UnboundedSender<Completion>,
) -> LoadOutcome {
    let mut stats = LoadStats::new(clock.now());
    let policy = request.policy;
    let net = net
        .with_timeout(policy.timeout)
        .with_retry(policy.retry_policy());
    let body = tokio::time::timeout(policy.timeout, read_body(&net, &request, clock, &mut stats, tx)).await;
    match body {
        Ok(Ok(data)) => {
            stats.tload = Some(clock.now());
            stats.total = Some(stats.loaded);
            trace!(id = request.id.0, bytes = stats.loaded, "request complete");
            LoadOutcome::Success { data, stats }
        }
        Ok(Err(err)) if err.is_timeout() => LoadOutcome::Timeout { stats },
        Ok(Err(err)) => {
            debug!(id = request.id.0, url = %request.url, %err, "request failed");
            LoadOutcome::Error {
                code: err.status_code(),
                text: err.to_string(),
            }
        }
        Err(_) => {
            debug!(id = request.id.0, url = %request.url, timeout = ?policy.timeout, "request timed out");
            LoadOutcome::Timeout { stats }
        }
    }
}

async fn read_body<N: Net>(
    net: &N,
    request: &LoadRequest,
    clock: &SharedClock,
    stats: &mut LoadStats,
    tx: &mpsc::UnboundedSender<Completion>,
) -> Result<Bytes, NetError> {
    let url = request.url.clone();
    let mut stream = match request.byte_range {
        Some(range) => {
            net.get_range(url, RangeSpec::from_half_open(range.start, range.end), None)
                .await?
        }
        None => net.stream(url, None).await?,
    };
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if stats.tfirst.is_none() {
            stats.tfirst = Some(clock.now());
        }
        body.extend_from_slice(&chunk);
        stats.loaded = body.len() as u64;
        let _ = tx.send(Completion::Progress(request.id, *stats));
    }
    Ok(body.freeze())
}
