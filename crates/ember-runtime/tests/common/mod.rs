//! Scripted fake VM and manual-clock reactor for driving the engine in
//! integration tests.
//!
//! The fake VM runs tiny instruction-list "scripts" over a bank of
//! registers shared across coroutines (standing in for script globals).
//! The fake reactor arms timers against a virtual millisecond clock and
//! hands back the events the test should feed into `Engine::deliver`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use hashbrown::HashMap;

use ember_runtime::error::RuntimeError;
use ember_runtime::reactor::{
    HandleId, Peer, Reactor, ReactorEvent, ResourceKind, ResourceOptions, TimerId,
};
use ember_runtime::vm::{BindingId, BindingSpec, CoroutineId, NativeCall, ScriptSource, ScriptVm, Step};
use ember_value::{Function, Value};

/// Build a fake "compiled" function whose bytecode names a program.
pub fn func(program: &str) -> Function {
    Function {
        bytecode: program.as_bytes().to_vec(),
        upvalues: Vec::new(),
        reference: None,
    }
}

#[derive(Clone, Debug)]
pub enum Arg {
    Lit(Value),
    Reg(usize),
}

#[derive(Clone, Debug)]
pub enum Ins {
    /// Call `__ember.<table>.<call>(args…)`, storing the first result.
    Global {
        table: &'static str,
        call: &'static str,
        args: Vec<Arg>,
        out: usize,
    },
    /// Method call on the instance held in register `recv`.
    Method {
        recv: usize,
        call: &'static str,
        args: Vec<Arg>,
        out: usize,
    },
    /// Finish the coroutine.
    Done,
}

struct Co {
    program: Vec<Ins>,
    pc: usize,
    pending_out: Option<usize>,
    done: bool,
}

#[derive(Default)]
struct VmState {
    programs: HashMap<Vec<u8>, Vec<Ins>>,
    tables: HashMap<String, Vec<BindingSpec>>,
    coroutines: Vec<Co>,
    registers: Vec<Value>,
    /// Every resume delivered, in order, with its payload.
    resumes: Vec<(CoroutineId, Vec<Value>)>,
    released: Vec<CoroutineId>,
    collects: usize,
    opened: bool,
    closed: bool,
}

impl VmState {
    fn binding(&self, table: &str, call: &str) -> Option<BindingId> {
        self.tables
            .get(table)?
            .iter()
            .find(|spec| spec.name == call)
            .map(|spec| spec.id)
    }

    fn eval(&self, args: &[Arg]) -> Vec<Value> {
        args.iter()
            .map(|arg| match arg {
                Arg::Lit(value) => value.clone(),
                Arg::Reg(slot) => self.registers[*slot].clone(),
            })
            .collect()
    }
}

/// Dispatch-table name an instance's metatable `__index` points at.
fn table_path(receiver: &Value) -> Option<String> {
    let table = receiver.as_table()?;
    let meta = table.metatable.as_ref()?;
    let path = meta.get_str("__index")?.as_bytes()?;
    let path = std::str::from_utf8(path).ok()?;
    Some(path.rsplit('.').next()?.to_string())
}

pub struct FakeVm {
    state: Rc<RefCell<VmState>>,
}

/// Test-side view into the fake VM's state.
#[derive(Clone)]
pub struct VmHandle {
    state: Rc<RefCell<VmState>>,
}

impl FakeVm {
    pub fn new() -> (FakeVm, VmHandle) {
        let state = Rc::new(RefCell::new(VmState {
            registers: vec![Value::Nil; 16],
            ..VmState::default()
        }));
        (
            FakeVm {
                state: state.clone(),
            },
            VmHandle { state },
        )
    }
}

impl VmHandle {
    pub fn define(&self, name: &str, program: Vec<Ins>) {
        self.state
            .borrow_mut()
            .programs
            .insert(name.as_bytes().to_vec(), program);
    }

    pub fn register(&self, slot: usize) -> Value {
        self.state.borrow().registers[slot].clone()
    }

    pub fn resumes_of(&self, coroutine: CoroutineId) -> Vec<Vec<Value>> {
        self.state
            .borrow()
            .resumes
            .iter()
            .filter(|(co, _)| *co == coroutine)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn resume_count(&self) -> usize {
        self.state.borrow().resumes.len()
    }

    pub fn released(&self) -> Vec<CoroutineId> {
        self.state.borrow().released.clone()
    }

    pub fn collects(&self) -> usize {
        self.state.borrow().collects
    }

    pub fn closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl ScriptVm for FakeVm {
    fn open(&mut self, _script: &ScriptSource) -> Result<(), RuntimeError> {
        self.state.borrow_mut().opened = true;
        Ok(())
    }

    fn install(
        &mut self,
        _global: &str,
        name: &str,
        calls: &[BindingSpec],
    ) -> Result<(), RuntimeError> {
        self.state
            .borrow_mut()
            .tables
            .insert(name.to_string(), calls.to_vec());
        Ok(())
    }

    fn spawn(&mut self, start: Function) -> Result<CoroutineId, RuntimeError> {
        let mut st = self.state.borrow_mut();
        let program = st
            .programs
            .get(&start.bytecode)
            .cloned()
            .ok_or_else(|| RuntimeError::VmFailure("unknown program".into()))?;
        st.coroutines.push(Co {
            program,
            pc: 0,
            pending_out: None,
            done: false,
        });
        Ok((st.coroutines.len() - 1) as CoroutineId)
    }

    fn resume(&mut self, coroutine: CoroutineId, args: Vec<Value>) -> Result<Step, RuntimeError> {
        let mut st = self.state.borrow_mut();
        st.resumes.push((coroutine, args.clone()));
        let index = coroutine as usize;
        if st.coroutines[index].done {
            return Ok(Step::Done(Vec::new()));
        }
        if let Some(out) = st.coroutines[index].pending_out.take() {
            let first = args.into_iter().next().unwrap_or(Value::Nil);
            st.registers[out] = first;
        }
        loop {
            let pc = st.coroutines[index].pc;
            let ins = match st.coroutines[index].program.get(pc) {
                Some(ins) => ins.clone(),
                None => {
                    st.coroutines[index].done = true;
                    return Ok(Step::Done(Vec::new()));
                }
            };
            st.coroutines[index].pc += 1;
            match ins {
                Ins::Global {
                    table,
                    call,
                    args,
                    out,
                } => {
                    let Some(binding) = st.binding(table, call) else {
                        return Ok(Step::Failed(format!("no native call {table}.{call}")));
                    };
                    let call_args = st.eval(&args);
                    st.coroutines[index].pending_out = Some(out);
                    return Ok(Step::Call(NativeCall {
                        binding,
                        args: call_args,
                    }));
                }
                Ins::Method {
                    recv,
                    call,
                    args,
                    out,
                } => {
                    let receiver = st.registers[recv].clone();
                    let Some(table) = table_path(&receiver) else {
                        return Ok(Step::Failed("method call on a non-instance".into()));
                    };
                    let Some(binding) = st.binding(&table, call) else {
                        return Ok(Step::Failed(format!("no native call {table}.{call}")));
                    };
                    let mut call_args = vec![receiver];
                    call_args.extend(st.eval(&args));
                    st.coroutines[index].pending_out = Some(out);
                    return Ok(Step::Call(NativeCall {
                        binding,
                        args: call_args,
                    }));
                }
                Ins::Done => {
                    st.coroutines[index].done = true;
                    return Ok(Step::Done(Vec::new()));
                }
            }
        }
    }

    fn release(&mut self, coroutine: CoroutineId) {
        self.state.borrow_mut().released.push(coroutine);
    }

    fn collect(&mut self) {
        self.state.borrow_mut().collects += 1;
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

struct FakeTimer {
    id: TimerId,
    payload: u64,
    due: Option<u64>,
    cancelled: bool,
    fired: bool,
}

struct FakeStream {
    buffered: Vec<u8>,
    written: Vec<u8>,
    peer: Option<Peer>,
    watched: bool,
    closed: bool,
}

#[derive(Default)]
struct ReactorState {
    now: u64,
    timers: Vec<FakeTimer>,
    next_timer: u64,
    streams: HashMap<u64, FakeStream>,
    next_handle: u64,
    opened: Vec<(ResourceKind, ResourceOptions)>,
}

pub struct FakeReactor {
    state: Rc<RefCell<ReactorState>>,
}

#[derive(Clone)]
pub struct ReactorHandle {
    state: Rc<RefCell<ReactorState>>,
}

impl FakeReactor {
    pub fn new() -> (FakeReactor, ReactorHandle) {
        let state = Rc::new(RefCell::new(ReactorState::default()));
        (
            FakeReactor {
                state: state.clone(),
            },
            ReactorHandle { state },
        )
    }
}

impl ReactorHandle {
    /// Move the virtual clock and collect the timer events now due.
    pub fn advance(&self, millis: u64) -> Vec<ReactorEvent> {
        let mut st = self.state.borrow_mut();
        st.now += millis;
        let now = st.now;
        let mut fired = Vec::new();
        for timer in &mut st.timers {
            if timer.cancelled || timer.fired {
                continue;
            }
            if let Some(due) = timer.due {
                if due <= now {
                    timer.fired = true;
                    fired.push(ReactorEvent::Timer {
                        timer: timer.id,
                        payload: timer.payload,
                    });
                }
            }
        }
        fired
    }

    /// Opened handles, in creation order.
    pub fn handles(&self) -> Vec<HandleId> {
        (0..self.state.borrow().next_handle).map(HandleId).collect()
    }

    pub fn push_bytes(&self, handle: HandleId, bytes: &[u8]) {
        let mut st = self.state.borrow_mut();
        if let Some(stream) = st.streams.get_mut(&handle.0) {
            stream.buffered.extend_from_slice(bytes);
        }
    }

    pub fn written(&self, handle: HandleId) -> Vec<u8> {
        self.state
            .borrow()
            .streams
            .get(&handle.0)
            .map(|stream| stream.written.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, handle: HandleId) -> bool {
        self.state
            .borrow()
            .streams
            .get(&handle.0)
            .map_or(true, |stream| stream.closed)
    }

    pub fn armed_timers(&self) -> usize {
        self.state
            .borrow()
            .timers
            .iter()
            .filter(|timer| !timer.cancelled && !timer.fired)
            .count()
    }
}

impl Reactor for FakeReactor {
    fn timer(&mut self, delay: Option<Duration>, payload: u64) -> TimerId {
        let mut st = self.state.borrow_mut();
        let id = TimerId(st.next_timer);
        st.next_timer += 1;
        let due = delay.map(|d| st.now + d.as_millis() as u64);
        st.timers.push(FakeTimer {
            id,
            payload,
            due,
            cancelled: false,
            fired: false,
        });
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        let mut st = self.state.borrow_mut();
        if let Some(found) = st.timers.iter_mut().find(|t| t.id == timer) {
            found.cancelled = true;
        }
    }

    fn open(
        &mut self,
        kind: ResourceKind,
        options: &ResourceOptions,
    ) -> Result<HandleId, RuntimeError> {
        let mut st = self.state.borrow_mut();
        let handle = HandleId(st.next_handle);
        st.next_handle += 1;
        let host = options
            .iter()
            .find(|(key, _)| key == "host")
            .map(|(_, value)| value.clone());
        let port = options
            .iter()
            .find(|(key, _)| key == "port")
            .and_then(|(_, value)| value.parse().ok());
        st.streams.insert(
            handle.0,
            FakeStream {
                buffered: Vec::new(),
                written: Vec::new(),
                peer: host.map(|host| Peer {
                    host,
                    port: port.unwrap_or(0),
                }),
                watched: false,
                closed: false,
            },
        );
        st.opened.push((kind, options.clone()));
        Ok(handle)
    }

    fn watch(&mut self, handle: HandleId) {
        let mut st = self.state.borrow_mut();
        if let Some(stream) = st.streams.get_mut(&handle.0) {
            stream.watched = true;
        }
    }

    fn buffered(&self, handle: HandleId) -> usize {
        self.state
            .borrow()
            .streams
            .get(&handle.0)
            .map_or(0, |stream| stream.buffered.len())
    }

    fn read(&mut self, handle: HandleId, max: usize) -> Vec<u8> {
        let mut st = self.state.borrow_mut();
        let Some(stream) = st.streams.get_mut(&handle.0) else {
            return Vec::new();
        };
        let count = if max == 0 {
            stream.buffered.len()
        } else {
            max.min(stream.buffered.len())
        };
        stream.buffered.drain(..count).collect()
    }

    fn write(&mut self, handle: HandleId, bytes: &[u8]) {
        let mut st = self.state.borrow_mut();
        if let Some(stream) = st.streams.get_mut(&handle.0) {
            stream.written.extend_from_slice(bytes);
        }
    }

    fn close(&mut self, handle: HandleId) {
        let mut st = self.state.borrow_mut();
        if let Some(stream) = st.streams.get_mut(&handle.0) {
            stream.closed = true;
        }
    }

    fn peer(&self, handle: HandleId) -> Option<Peer> {
        self.state
            .borrow()
            .streams
            .get(&handle.0)?
            .peer
            .clone()
    }
}

/// Engine wired to fresh fakes, plus the test-side handles.
pub fn engine() -> (ember_runtime::Engine, VmHandle, ReactorHandle) {
    let (vm, vm_handle) = FakeVm::new();
    let (reactor, reactor_handle) = FakeReactor::new();
    let engine = ember_runtime::Engine::new(
        Box::new(vm),
        Box::new(reactor),
        ScriptSource {
            path: "test.es".into(),
            args: Vec::new(),
        },
        0,
    )
    .expect("engine construction");
    (engine, vm_handle, reactor_handle)
}
