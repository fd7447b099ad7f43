//! The per-worker engine: one session, one runner set, one task queue.
//!
//! Everything asynchronous funnels through the task queue. A capability
//! never resumes a coroutine synchronously — it queues a wake, the
//! current call unwinds, and the queue turn delivers the resume. Reactor
//! events enter through `deliver`, which routes them to the owning object
//! and then drains the queue.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::{debug, info, trace, warn};

use ember_value::{Function, Table, Value};

use crate::caps::{self, Capability};
use crate::error::RuntimeError;
use crate::object::{CallOutcome, CapabilityKind, Ctx, Object, ObjectId, Objects, Task};
use crate::reactor::{Delivery, HandleId, Reactor, ReactorEvent, Route, Routes};
use crate::runner::{ResumeToken, RunnerId, RunnerSet, Status};
use crate::session::Session;
use crate::vm::{NativeCall, ScriptSource, ScriptVm, Step};

pub struct Engine {
    session: Session,
    reactor: Box<dyn Reactor>,
    runners: RunnerSet,
    objects: Objects,
    tasks: VecDeque<Task>,
    routes: Routes,
    streams: HashMap<HandleId, ObjectId>,
    success: bool,
    started: bool,
    closed: bool,
}

impl Engine {
    /// Build an engine over a VM and reactor, installing the host
    /// singletons (`main`, `make`, `util`) and the flow router.
    pub fn new(
        vm: Box<dyn ScriptVm>,
        reactor: Box<dyn Reactor>,
        script: ScriptSource,
        worker: u32,
    ) -> Result<Engine, RuntimeError> {
        let mut session = Session::new(vm, script, worker);
        let mut objects = Objects::new();

        let singletons = [
            Capability::Main(caps::host::MainCap::new()),
            Capability::Make(caps::host::MakeCap::new()),
            Capability::Util(caps::host::UtilCap::new()),
        ];
        for capability in singletons {
            let kind = capability.core().kind();
            let id = objects.insert(capability);
            session.bind(kind, caps::calls(kind), Some(id))?;
        }
        // Flows are only ever built by the engine itself (spawn), so the
        // router must exist before the first one is materialized.
        session.bind(CapabilityKind::Flow, caps::calls(CapabilityKind::Flow), None)?;

        Ok(Engine {
            session,
            reactor,
            runners: RunnerSet::new(),
            objects,
            tasks: VecDeque::new(),
            routes: Routes::new(),
            streams: HashMap::new(),
            success: true,
            started: false,
            closed: false,
        })
    }

    /// Top-level script invocation: spawn a coroutine for `function` and
    /// drive it until it suspends or finishes.
    pub fn start(&mut self, function: Function) -> Result<RunnerId, RuntimeError> {
        self.session.ensure_open()?;
        self.started = true;
        let coroutine = self.session.vm_mut().spawn(function)?;
        let id = self.runners.create(coroutine);
        self.drive(id, Vec::new());
        self.pump();
        Ok(id)
    }

    /// Feed one reactor event in and drain the resulting work.
    pub fn deliver(&mut self, event: ReactorEvent) {
        match event {
            ReactorEvent::Timer { payload, .. } => match self.routes.fired(payload) {
                Some(Route::Timeout { object, runner }) => self.fire_timeout(object, runner),
                // Anchors never fire; a late fire of a disarmed timer is
                // dropped here too.
                Some(Route::Anchor { .. }) | None => {}
            },
            ReactorEvent::Readable { handle } => self.route_stream(handle, Delivery::Readable),
            ReactorEvent::Data {
                handle,
                channel,
                bytes,
            } => self.route_stream(handle, Delivery::Data { channel, bytes }),
            ReactorEvent::Closed { handle } => self.route_stream(handle, Delivery::Closed),
            ReactorEvent::Exited { handle, status } => {
                self.route_stream(handle, Delivery::Exited { status })
            }
        }
        self.pump();
    }

    /// Whether every runner that ever ran stopped without error.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn idle(&self) -> bool {
        self.runners.is_empty() && self.tasks.is_empty()
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn runner_status(&self, id: RunnerId) -> Option<Status> {
        self.runners.status(id)
    }

    pub fn object(&self, id: ObjectId) -> Option<&Capability> {
        self.objects.get(id)
    }

    /// Tear everything down: cleanup every object, close the VM.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for id in self.objects.ids() {
            self.teardown_object(id);
        }
        self.session.close();
        info!(success = self.success, "engine closed");
    }

    fn pump(&mut self) {
        while let Some(task) = self.tasks.pop_front() {
            match task {
                Task::Run { runner, from, args } => self.run_task(runner, from, args),
                Task::Event { object, event } => self.deliver_to(object, event),
                Task::Start { function, waiter } => self.spawn_task(function, waiter),
                Task::Stop { runner } => self.finish(runner, Status::Stopped),
            }
        }
        if self.started && self.runners.is_empty() {
            self.close();
        }
    }

    fn run_task(
        &mut self,
        id: RunnerId,
        from: Option<(ObjectId, ResumeToken)>,
        args: Vec<Value>,
    ) {
        if let Some((object, token)) = from {
            let current = self
                .runners
                .get(id)
                .map_or(false, |runner| runner.accepts(object, token));
            if !current {
                trace!(runner = %id, object = %object, "stale wake dropped");
                return;
            }
        }
        self.drive(id, args);
    }

    /// Resume a coroutine and keep serving its native calls until it
    /// suspends, finishes, or fails.
    fn drive(&mut self, id: RunnerId, mut args: Vec<Value>) {
        let mut failing = false;
        match self.runners.get_mut(id) {
            None => return,
            Some(runner) => {
                if runner.stopped() {
                    return;
                }
                // Pending exception: deliver it as a synthetic error table
                // so script-level handlers can observe it, then the runner
                // ends in Error below.
                if let Some(message) = runner.take_exception() {
                    debug!(runner = %id, message, "delivering exception");
                    let mut table = Table::new();
                    table.set("error", Value::string(&message));
                    args = vec![Value::Table(table)];
                    failing = true;
                }
            }
        }

        loop {
            let coroutine = match self.runners.get_mut(id) {
                Some(runner) => {
                    runner.status = Status::Running;
                    runner.coroutine
                }
                None => return,
            };
            let step = self.session.vm_mut().resume(coroutine, std::mem::take(&mut args));
            match step {
                Err(error) => {
                    warn!(runner = %id, %error, "vm failure");
                    self.finish(id, Status::Error);
                    return;
                }
                Ok(Step::Failed(message)) => {
                    debug!(runner = %id, message, "coroutine failed");
                    self.finish(id, Status::Error);
                    return;
                }
                Ok(Step::Done(_)) => {
                    self.finish(id, if failing { Status::Error } else { Status::Stopped });
                    return;
                }
                Ok(Step::Call(native)) => match self.dispatch(id, native) {
                    Ok(CallOutcome::Return(values)) => {
                        args = values;
                    }
                    Ok(CallOutcome::Suspend) => {
                        if failing {
                            self.finish(id, Status::Error);
                        }
                        return;
                    }
                    Err(message) => {
                        // Script-visible error: resume the call with an
                        // error table instead of results.
                        debug!(runner = %id, message, "native call failed");
                        let mut table = Table::new();
                        table.set("error", Value::string(&message));
                        args = vec![Value::Table(table)];
                    }
                },
            }
        }
    }

    /// Resolve and invoke one native call. Errors come back as the
    /// composed script-visible message.
    fn dispatch(&mut self, runner: RunnerId, native: NativeCall) -> Result<CallOutcome, String> {
        let resolved = self
            .session
            .resolve(native)
            .map_err(|error| format!("{runner}: {error}"))?;
        let id = resolved.receiver;
        let mut capability = self
            .objects
            .take(id)
            .ok_or_else(|| format!("{runner}: {}", RuntimeError::NoInstance))?;
        {
            let core = capability.core_mut();
            core.current = Some(runner);
            core.current_call = Some(resolved.call);
        }
        self.runners.enter_call(runner, id, resolved.call);
        trace!(runner = %runner, object = %id, call = resolved.call.name, "dispatch");
        let mut ctx = Ctx {
            session: &mut self.session,
            reactor: self.reactor.as_mut(),
            runners: &mut self.runners,
            objects: &mut self.objects,
            tasks: &mut self.tasks,
            routes: &mut self.routes,
            streams: &mut self.streams,
            runner,
            object: id,
        };
        let outcome = capability.invoke(resolved.call, resolved.args, &mut ctx);
        self.objects.put(id, capability);
        outcome.map_err(|error| {
            format!(
                "{}: {}.{} error: {}",
                runner,
                id.kind.name(),
                resolved.call.name,
                error
            )
        })
    }

    fn route_stream(&mut self, handle: HandleId, delivery: Delivery) {
        match self.streams.get(&handle) {
            Some(object) => self.deliver_to(*object, delivery),
            None => trace!(?handle, "event for unknown handle dropped"),
        }
    }

    fn deliver_to(&mut self, id: ObjectId, event: Delivery) {
        let Some(mut capability) = self.objects.take(id) else {
            return;
        };
        let runner = {
            let core = capability.core();
            core.parked
                .map(|parked| parked.runner)
                .or(core.current)
                .or(core.assigned)
                .unwrap_or(RunnerId(u32::MAX))
        };
        let mut ctx = Ctx {
            session: &mut self.session,
            reactor: self.reactor.as_mut(),
            runners: &mut self.runners,
            objects: &mut self.objects,
            tasks: &mut self.tasks,
            routes: &mut self.routes,
            streams: &mut self.streams,
            runner,
            object: id,
        };
        capability.on_event(event, &mut ctx);
        self.objects.put(id, capability);
    }

    fn fire_timeout(&mut self, id: ObjectId, runner: RunnerId) {
        let Some(mut capability) = self.objects.take(id) else {
            return;
        };
        let mut ctx = Ctx {
            session: &mut self.session,
            reactor: self.reactor.as_mut(),
            runners: &mut self.runners,
            objects: &mut self.objects,
            tasks: &mut self.tasks,
            routes: &mut self.routes,
            streams: &mut self.streams,
            runner,
            object: id,
        };
        let handled = capability.on_timeout(runner, &mut ctx);
        if !handled {
            ctx.fail(runner, &RuntimeError::Timeout.to_string());
        }
        self.objects.put(id, capability);
    }

    /// Spawn a coroutine for `function` and hand the waiting runner a
    /// flow instance tracking it. The spawned runner gets its first turn
    /// before the waiter resumes.
    fn spawn_task(
        &mut self,
        function: Function,
        waiter: Option<(RunnerId, ObjectId, ResumeToken)>,
    ) {
        let coroutine = match self.session.vm_mut().spawn(function) {
            Ok(coroutine) => coroutine,
            Err(error) => {
                if let Some((runner, _, _)) = waiter {
                    let message = format!("{runner}: main.start error: {error}");
                    self.runners.set_exception(runner, message);
                    self.tasks.push_back(Task::Run {
                        runner,
                        from: None,
                        args: Vec::new(),
                    });
                }
                return;
            }
        };
        let spawned = self.runners.create(coroutine);
        let flow = self
            .objects
            .insert(Capability::Flow(caps::flow::FlowCap::track(spawned)));
        debug!(runner = %spawned, flow = %flow, "spawned");
        self.drive(spawned, Vec::new());
        if let Some((runner, object, token)) = waiter {
            let instance = match self.objects.get_mut(flow) {
                Some(placed) => self.session.materialize(placed.core_mut(), runner),
                None => Value::Nil,
            };
            self.tasks.push_back(Task::Run {
                runner,
                from: Some((object, token)),
                args: vec![instance],
            });
        }
    }

    /// Terminal transition: set status, broadcast the stop, release the
    /// coroutine, and give the collector a safe point.
    fn finish(&mut self, id: RunnerId, status: Status) {
        match self.runners.get_mut(id) {
            None => return,
            Some(runner) => {
                if runner.stopped() {
                    return;
                }
                // Error is sticky.
                runner.status = if runner.status == Status::Error {
                    Status::Error
                } else {
                    status
                };
                runner.way = None;
            }
        }
        trace!(runner = %id, ?status, "runner finished");
        self.broadcast_stop(id);
        if let Some(runner) = self.runners.remove(id) {
            if !runner.success() {
                self.success = false;
            }
            self.session.vm_mut().release(runner.coroutine);
            self.session.vm_mut().collect();
        }
    }

    /// Tell every object about a stopped runner; objects assigned to it
    /// are torn down.
    fn broadcast_stop(&mut self, stopped: RunnerId) {
        for id in self.objects.ids() {
            let Some(mut capability) = self.objects.take(id) else {
                continue;
            };
            let mut ctx = Ctx {
                session: &mut self.session,
                reactor: self.reactor.as_mut(),
                runners: &mut self.runners,
                objects: &mut self.objects,
                tasks: &mut self.tasks,
                routes: &mut self.routes,
                streams: &mut self.streams,
                runner: stopped,
                object: id,
            };
            capability.on_runner_stopped(stopped, &mut ctx);
            let torn_down = capability.core().assigned == Some(stopped);
            if torn_down {
                capability.cleanup(&mut ctx);
            }
            self.objects.put(id, capability);
            if torn_down {
                trace!(object = %id, "object released with its runner");
                self.objects.release(id);
            }
        }
    }

    fn teardown_object(&mut self, id: ObjectId) {
        let Some(mut capability) = self.objects.take(id) else {
            return;
        };
        let mut ctx = Ctx {
            session: &mut self.session,
            reactor: self.reactor.as_mut(),
            runners: &mut self.runners,
            objects: &mut self.objects,
            tasks: &mut self.tasks,
            routes: &mut self.routes,
            streams: &mut self.streams,
            runner: RunnerId(u32::MAX),
            object: id,
        };
        capability.cleanup(&mut ctx);
        self.objects.put(id, capability);
        self.objects.release(id);
    }
}
