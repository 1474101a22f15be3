//! Synchronous event hub.
//!
//! Components subscribe to [`EventKind`]s and react through a [`Context`]
//! that lends them the shared [`Session`], the event queue, their own timers
//! and the request table. Events are processed strictly in emission order:
//! an event emitted while handling another is queued, never dispatched
//! re-entrantly.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use lyra_events::{AbrEvent, EventBus};
use lyra_platform::{Instant, MaybeSend};
use tracing::{trace, warn};
use url::Url;

use crate::{
    HlsResult,
    config::LoadPolicy,
    error::ErrorData,
    events::{Event, EventKind},
    loader::{LoadOutcome, LoadRequest, LoadStats, Loader, RequestId, ResponseKind},
    model::ByteRange,
    session::Session,
};

/// Index of a component inside the hub.
pub(crate) type ComponentId = usize;

/// Timer slots; every component owns at most one timer per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    Reload,
    Tick,
    AbandonCheck,
    Retry,
    CapLevel,
    FpsCheck,
    AudioReload,
    SubtitleReload,
}

pub(crate) trait Component: MaybeSend {
    fn name(&self) -> &'static str;

    fn subscriptions(&self) -> &'static [EventKind];

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()>;

    fn on_timer(&mut self, _timer: TimerKind, _cx: &mut Context<'_>) -> HlsResult<()> {
        Ok(())
    }

    fn on_load_progress(
        &mut self,
        _id: RequestId,
        _stats: &LoadStats,
        _cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        Ok(())
    }

    fn on_load(
        &mut self,
        _id: RequestId,
        _outcome: LoadOutcome,
        _cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct Timer {
    deadline: Instant,
    period: Option<Duration>,
    seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    slots: HashMap<(ComponentId, TimerKind), Timer>,
    next_seq: u64,
}

impl Timers {
    fn set(&mut self, owner: ComponentId, kind: TimerKind, deadline: Instant, period: Option<Duration>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            (owner, kind),
            Timer {
                deadline,
                period,
                seq,
            },
        );
    }

    fn clear(&mut self, owner: ComponentId, kind: TimerKind) {
        self.slots.remove(&(owner, kind));
    }

    fn has(&self, owner: ComponentId, kind: TimerKind) -> bool {
        self.slots.contains_key(&(owner, kind))
    }

    fn clear_owner(&mut self, owner: ComponentId) {
        self.slots.retain(|(o, _), _| *o != owner);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|t| t.deadline).min()
    }

    /// Timers due at `now`, earliest first.
    fn due(&self, now: Instant) -> Vec<(ComponentId, TimerKind, u64)> {
        let mut due: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(&(owner, kind), t)| (t.deadline, t.seq, owner, kind))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter()
            .map(|(_, seq, owner, kind)| (owner, kind, seq))
            .collect()
    }

    /// Consume a due timer. Intervals stay armed for the next period.
    fn fire(&mut self, owner: ComponentId, kind: TimerKind, seq: u64, now: Instant) -> bool {
        let Some(timer) = self.slots.get_mut(&(owner, kind)) else {
            return false;
        };
        if timer.seq != seq {
            return false;
        }
        match timer.period {
            Some(period) => timer.deadline = now + period,
            None => {
                self.slots.remove(&(owner, kind));
            }
        }
        true
    }
}

pub(crate) struct Requests {
    loader: Box<dyn Loader>,
    owners: HashMap<RequestId, ComponentId>,
    next_id: u64,
}

impl Requests {
    fn new(loader: Box<dyn Loader>) -> Self {
        Self {
            loader,
            owners: HashMap::new(),
            next_id: 1,
        }
    }

    fn abort_owner(&mut self, owner: ComponentId) {
        let ids: Vec<RequestId> = self
            .owners
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.owners.remove(&id);
            self.loader.abort(id);
        }
    }
}

/// What a component may touch while handling an event.
pub(crate) struct Context<'a> {
    pub session: &'a mut Session,
    owner: ComponentId,
    queue: &'a mut VecDeque<Event>,
    timers: &'a mut Timers,
    requests: &'a mut Requests,
    bus: &'a EventBus,
}

impl Context<'_> {
    /// Queue `event` behind everything already pending.
    pub fn emit(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn error(&mut self, data: ErrorData) {
        self.emit(Event::Error(data));
    }

    pub fn now(&self) -> Instant {
        self.session.clock.now()
    }

    pub fn set_timeout(&mut self, kind: TimerKind, delay: Duration) {
        let deadline = self.now() + delay;
        self.timers.set(self.owner, kind, deadline, None);
    }

    /// First fire after one `period`.
    pub fn set_interval(&mut self, kind: TimerKind, period: Duration) {
        let deadline = self.now() + period;
        self.timers.set(self.owner, kind, deadline, Some(period));
    }

    pub fn clear_timer(&mut self, kind: TimerKind) {
        self.timers.clear(self.owner, kind);
    }

    pub fn has_timer(&self, kind: TimerKind) -> bool {
        self.timers.has(self.owner, kind)
    }

    pub fn load(
        &mut self,
        url: Url,
        kind: ResponseKind,
        byte_range: Option<ByteRange>,
        policy: LoadPolicy,
    ) -> RequestId {
        let id = RequestId(self.requests.next_id);
        self.requests.next_id += 1;
        self.requests.owners.insert(id, self.owner);
        trace!(id = id.0, %url, "load");
        self.requests.loader.load(LoadRequest {
            id,
            url,
            kind,
            byte_range,
            policy,
        });
        id
    }

    /// Outcomes of an aborted request are dropped.
    pub fn abort(&mut self, id: RequestId) {
        if self.requests.owners.remove(&id).is_some() {
            trace!(id = id.0, "abort");
            self.requests.loader.abort(id);
        }
    }

    pub fn publish(&self, event: AbrEvent) {
        self.bus.publish(event);
    }
}

pub(crate) struct Hub {
    session: Session,
    components: Vec<Box<dyn Component>>,
    /// Subscribers per event kind, in registration order.
    routes: HashMap<EventKind, Vec<ComponentId>>,
    queue: VecDeque<Event>,
    timers: Timers,
    requests: Requests,
    bus: EventBus,
}

impl Hub {
    pub fn new(session: Session, loader: Box<dyn Loader>, bus: EventBus) -> Self {
        Self {
            session,
            components: Vec::new(),
            routes: HashMap::new(),
            queue: VecDeque::new(),
            timers: Timers::default(),
            requests: Requests::new(loader),
            bus,
        }
    }

    pub fn register(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = self.components.len();
        for &kind in component.subscriptions() {
            let owners = self.routes.entry(kind).or_default();
            if !owners.contains(&id) {
                owners.push(id);
            }
        }
        self.components.push(component);
        id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Queue `event` and dispatch until the queue is empty.
    pub fn emit(&mut self, event: Event) {
        self.queue.push_back(event);
        self.drain();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due now.
    pub fn advance(&mut self) {
        let now = self.session.clock.now();
        for (owner, kind, seq) in self.timers.due(now) {
            if !self.timers.fire(owner, kind, seq, now) {
                continue;
            }
            self.run(owner, None, |component, cx| component.on_timer(kind, cx));
            self.drain();
        }
    }

    pub fn on_load_progress(&mut self, id: RequestId, stats: &LoadStats) {
        let Some(&owner) = self.requests.owners.get(&id) else {
            return;
        };
        self.run(owner, None, |component, cx| {
            component.on_load_progress(id, stats, cx)
        });
        self.drain();
    }

    pub fn on_load_complete(&mut self, id: RequestId, outcome: LoadOutcome) {
        let Some(owner) = self.requests.owners.remove(&id) else {
            trace!(id = id.0, "outcome of unknown or aborted request dropped");
            return;
        };
        self.run(owner, None, |component, cx| component.on_load(id, outcome, cx));
        self.drain();
    }

    /// Forget the timers and requests of every component.
    pub fn reset_all(&mut self) {
        for owner in 0..self.components.len() {
            self.timers.clear_owner(owner);
            self.requests.abort_owner(owner);
        }
    }

    fn drain(&mut self) {
        let routes = std::mem::take(&mut self.routes);
        while let Some(event) = self.queue.pop_front() {
            if let Some(public) = event.to_public() {
                self.bus.publish(public);
            }
            let kind = event.kind();
            for &owner in routes.get(&kind).into_iter().flatten() {
                self.run(owner, Some(kind), |component, cx| component.handle(&event, cx));
            }
        }
        self.routes = routes;
    }

    fn run<F>(&mut self, owner: ComponentId, trigger: Option<EventKind>, f: F)
    where
        F: FnOnce(&mut dyn Component, &mut Context<'_>) -> HlsResult<()>,
    {
        let Self {
            session,
            components,
            queue,
            timers,
            requests,
            bus,
            ..
        } = self;
        let component = components[owner].as_mut();
        let mut cx = Context {
            session,
            owner,
            queue,
            timers,
            requests,
            bus,
        };
        if let Err(err) = f(&mut *component, &mut cx) {
            warn!(component = component.name(), ?trigger, %err, "handler failed");
            if trigger != Some(EventKind::Error) {
                queue_internal_error(&mut cx, &err);
            }
        }
    }
}

fn queue_internal_error(cx: &mut Context<'_>, err: &crate::HlsError) {
    cx.error(ErrorData::internal(err));
}
