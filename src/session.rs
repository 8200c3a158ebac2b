//! Mode/state controller: owns the machine and the open log, and drives the
//! record/replay transitions on the virtual-CPU thread.
//!
//! The monitor thread and signal handlers never touch the session directly;
//! they set [`RequestFlags`], which the main loop drains at its safe point
//! via [`Session::poll_requests`].

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::machine::Machine;
use crate::record::{Callsite, HdTransferKind, MemType, NetTransferKind, ProgPoint};
use crate::replay::{ReplayEngine, ReplayStats};
use crate::writer::LogWriter;
use crate::{nondet_log_path, snapshot_path, Error};

/// Current record/replay mode. Readable from any thread through
/// [`ModeCell`]; transitions happen only on the virtual-CPU thread.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    Off = 0,
    Record = 1,
    Replay = 2,
}

/// Word-sized atomic holding the current [`Mode`], written with release and
/// read with acquire.
pub struct ModeCell(AtomicU32);

impl ModeCell {
    fn new() -> Self {
        Self(AtomicU32::new(Mode::Off as u32))
    }

    pub fn get(&self) -> Mode {
        match self.0.load(Ordering::Acquire) {
            1 => Mode::Record,
            2 => Mode::Replay,
            _ => Mode::Off,
        }
    }

    fn set(&self, mode: Mode) {
        self.0.store(mode as u32, Ordering::Release);
    }

    pub fn in_record(&self) -> bool {
        self.get() == Mode::Record
    }

    pub fn in_replay(&self) -> bool {
        self.get() == Mode::Replay
    }
}

const REQ_NONE: u32 = 0;
const REQ_FRESH: u32 = 1;
const REQ_FROM_SNAPSHOT: u32 = 2;

/// A begin-record request drained from the flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRequest {
    Fresh { base: PathBuf },
    FromSnapshot { snapshot: PathBuf, base: PathBuf },
}

#[derive(Default)]
struct PendingNames {
    base: Option<PathBuf>,
    snapshot: Option<PathBuf>,
}

/// Cross-thread request channel. The `end_*` setters touch only word-sized
/// atomics and are safe to call from signal handlers; the `begin_record`
/// setters take a lock for the names and belong to the monitor thread.
pub struct RequestFlags {
    record_requested: AtomicU32,
    end_record_requested: AtomicU32,
    end_replay_requested: AtomicU32,
    replay_error: AtomicU32,
    names: Mutex<PendingNames>,
}

impl RequestFlags {
    fn new() -> Self {
        Self {
            record_requested: AtomicU32::new(REQ_NONE),
            end_record_requested: AtomicU32::new(0),
            end_replay_requested: AtomicU32::new(0),
            replay_error: AtomicU32::new(0),
            names: Mutex::new(PendingNames::default()),
        }
    }

    pub fn request_begin_record(&self, base: impl Into<PathBuf>) {
        let mut names = self.names.lock().expect("request flags lock poisoned");
        names.base = Some(base.into());
        names.snapshot = None;
        self.record_requested.store(REQ_FRESH, Ordering::Release);
    }

    pub fn request_begin_record_from(
        &self,
        snapshot: impl Into<PathBuf>,
        base: impl Into<PathBuf>,
    ) {
        let mut names = self.names.lock().expect("request flags lock poisoned");
        names.base = Some(base.into());
        names.snapshot = Some(snapshot.into());
        self.record_requested
            .store(REQ_FROM_SNAPSHOT, Ordering::Release);
    }

    /// Signal-safe.
    pub fn request_end_record(&self) {
        self.end_record_requested.store(1, Ordering::Release);
    }

    /// Signal-safe.
    pub fn request_end_replay(&self, error: bool) {
        if error {
            self.replay_error.store(1, Ordering::Release);
        }
        self.end_replay_requested.store(1, Ordering::Release);
    }

    fn take_record_request(&self) -> Option<RecordRequest> {
        let req = self.record_requested.swap(REQ_NONE, Ordering::AcqRel);
        if req == REQ_NONE {
            return None;
        }
        let mut names = self.names.lock().expect("request flags lock poisoned");
        let base = names.base.take()?;
        match req {
            REQ_FROM_SNAPSHOT => Some(RecordRequest::FromSnapshot {
                snapshot: names.snapshot.take()?,
                base,
            }),
            _ => Some(RecordRequest::Fresh { base }),
        }
    }

    fn take_end_record(&self) -> bool {
        self.end_record_requested.swap(0, Ordering::AcqRel) != 0
    }

    fn take_end_replay(&self) -> Option<bool> {
        if self.end_replay_requested.swap(0, Ordering::AcqRel) == 0 {
            return None;
        }
        Some(self.replay_error.swap(0, Ordering::AcqRel) != 0)
    }
}

enum State {
    Off,
    Record(LogWriter),
    Replay(ReplayEngine),
}

/// One process-wide record/replay session.
///
/// Owns the machine and whichever log is open. All methods run on the
/// virtual-CPU thread; the shared [`ModeCell`] and [`RequestFlags`] are the
/// only cross-thread surface.
pub struct Session<M: Machine> {
    machine: M,
    state: State,
    mode: Arc<ModeCell>,
    flags: Arc<RequestFlags>,
    started: Option<Instant>,
}

impl<M: Machine> Session<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            state: State::Off,
            mode: Arc::new(ModeCell::new()),
            flags: Arc::new(RequestFlags::new()),
            started: None,
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    /// Shared mode word for other threads.
    pub fn mode_cell(&self) -> Arc<ModeCell> {
        Arc::clone(&self.mode)
    }

    /// Shared request flags for the monitor thread and signal handlers.
    pub fn request_flags(&self) -> Arc<RequestFlags> {
        Arc::clone(&self.flags)
    }

    /// Drain pending requests at the main loop's safe point.
    pub fn poll_requests(&mut self) -> Result<(), Error> {
        match self.mode() {
            Mode::Off => match self.flags.take_record_request() {
                Some(RecordRequest::Fresh { base }) => self.begin_record(&base)?,
                Some(RecordRequest::FromSnapshot { snapshot, base }) => {
                    self.begin_record_from(&snapshot, &base)?
                }
                None => {}
            },
            Mode::Record => {
                if self.flags.take_end_record() {
                    self.end_record()?;
                }
            }
            Mode::Replay => {
                if let Some(error) = self.flags.take_end_replay() {
                    self.end_replay(error);
                }
            }
        }
        Ok(())
    }

    /// Begin a fresh recording anchored at a snapshot taken now.
    pub fn begin_record(&mut self, base: &Path) -> Result<(), Error> {
        assert!(
            matches!(self.state, State::Off),
            "begin_record while a session is active"
        );
        let snapshot = snapshot_path(base);
        tracing::info!(path = %snapshot.display(), "writing snapshot");
        self.machine.save_snapshot(&snapshot)?;
        let writer = LogWriter::create(&nondet_log_path(base))?;
        self.machine.reset_instr_count();
        self.started = Some(Instant::now());
        self.state = State::Record(writer);
        self.mode.set(Mode::Record);
        Ok(())
    }

    /// Begin a recording from a previously saved snapshot: load it, then
    /// proceed as a fresh recording.
    pub fn begin_record_from(&mut self, snapshot: &Path, base: &Path) -> Result<(), Error> {
        assert!(
            matches!(self.state, State::Off),
            "begin_record_from while a session is active"
        );
        tracing::info!(path = %snapshot.display(), "loading snapshot");
        self.machine.load_snapshot(snapshot)?;
        self.begin_record(base)
    }

    /// Write the end-of-log sentinel, finalize the header, and close.
    pub fn end_record(&mut self) -> Result<ProgPoint, Error> {
        assert!(
            matches!(self.state, State::Record(_)),
            "end_record while not recording"
        );
        let State::Record(writer) = std::mem::replace(&mut self.state, State::Off) else {
            unreachable!();
        };
        let last = writer.finish(self.machine.prog_point())?;
        if let Some(started) = self.started.take() {
            tracing::info!(seconds = started.elapsed().as_secs(), "record finished");
        }
        self.mode.set(Mode::Off);
        Ok(last)
    }

    /// Load the companion snapshot, open the log, and pre-fill the queue.
    pub fn begin_replay(&mut self, base: &Path) -> Result<(), Error> {
        assert!(
            matches!(self.state, State::Off),
            "begin_replay while a session is active"
        );
        let snapshot = snapshot_path(base);
        tracing::info!(path = %snapshot.display(), "loading snapshot");
        self.machine.load_snapshot(&snapshot)?;
        let mut engine = ReplayEngine::open(&nondet_log_path(base))?;
        self.machine.reset_instr_count();
        self.started = Some(Instant::now());
        self.mode.set(Mode::Replay);
        engine.fill_queue(&self.machine)?;
        self.state = State::Replay(engine);
        Ok(())
    }

    /// Report statistics, free the queue and recycle pool, and close the
    /// log. An error outcome aborts the process: there is no partial-replay
    /// recovery.
    pub fn end_replay(&mut self, error: bool) -> ReplayStats {
        assert!(
            matches!(self.state, State::Replay(_)),
            "end_replay while not replaying"
        );
        let State::Replay(engine) = std::mem::replace(&mut self.state, State::Off) else {
            unreachable!();
        };
        let clean = engine.replay_finished(&self.machine);
        let stats = engine.finish();
        if let Some(started) = self.started.take() {
            tracing::info!(seconds = started.elapsed().as_secs(), "replay finished");
        }
        self.mode.set(Mode::Off);
        if error {
            tracing::error!("replay failed");
            process::abort();
        }
        if clean {
            tracing::info!("replay completed successfully");
        } else {
            tracing::info!("replay terminated at user request");
        }
        stats
    }

    fn writer(&mut self) -> &mut LogWriter {
        match &mut self.state {
            State::Record(writer) => writer,
            _ => panic!("record entry point called while not recording"),
        }
    }

    fn fatal_write(err: Error) -> ! {
        tracing::error!(%err, "nondet log write failed");
        process::abort();
    }

    pub fn record_input_1(&mut self, callsite: Callsite, value: u8) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_input_1(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_input_2(&mut self, callsite: Callsite, value: u16) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_input_2(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_input_4(&mut self, callsite: Callsite, value: u32) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_input_4(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_input_8(&mut self, callsite: Callsite, value: u64) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_input_8(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_interrupt_request(&mut self, callsite: Callsite, value: u32) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_interrupt_request(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_exit_request(&mut self, callsite: Callsite, value: u32) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_exit_request(point, callsite, value) {
            Self::fatal_write(err);
        }
    }

    pub fn record_cpu_mem_rw(&mut self, callsite: Callsite, addr: u64, data: &[u8]) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_cpu_mem_rw(point, callsite, addr, data) {
            Self::fatal_write(err);
        }
    }

    pub fn record_cpu_mem_unmap(&mut self, callsite: Callsite, addr: u64, data: &[u8]) {
        let point = self.machine.prog_point();
        if let Err(err) = self
            .writer()
            .record_cpu_mem_unmap(point, callsite, addr, data)
        {
            Self::fatal_write(err);
        }
    }

    pub fn record_memory_region_change(
        &mut self,
        callsite: Callsite,
        start: u64,
        size: u64,
        mtype: MemType,
        name: &str,
        added: bool,
    ) {
        let point = self.machine.prog_point();
        if let Err(err) = self
            .writer()
            .record_memory_region_change(point, callsite, start, size, mtype, name, added)
        {
            Self::fatal_write(err);
        }
    }

    pub fn record_hd_transfer(
        &mut self,
        callsite: Callsite,
        kind: HdTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    ) {
        let point = self.machine.prog_point();
        if let Err(err) = self
            .writer()
            .record_hd_transfer(point, callsite, kind, src, dest, num_bytes)
        {
            Self::fatal_write(err);
        }
    }

    pub fn record_net_transfer(
        &mut self,
        callsite: Callsite,
        kind: NetTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    ) {
        let point = self.machine.prog_point();
        if let Err(err) = self
            .writer()
            .record_net_transfer(point, callsite, kind, src, dest, num_bytes)
        {
            Self::fatal_write(err);
        }
    }

    pub fn record_handle_packet(&mut self, callsite: Callsite, direction: u8, data: &[u8]) {
        let point = self.machine.prog_point();
        if let Err(err) = self
            .writer()
            .record_handle_packet(point, callsite, direction, data)
        {
            Self::fatal_write(err);
        }
    }

    pub fn record_debug(&mut self, callsite: Callsite) {
        let point = self.machine.prog_point();
        if let Err(err) = self.writer().record_debug(point, callsite) {
            Self::fatal_write(err);
        }
    }

    fn engine(&mut self) -> (&mut ReplayEngine, &mut M) {
        match &mut self.state {
            State::Replay(engine) => (engine, &mut self.machine),
            _ => panic!("replay entry point called while not replaying"),
        }
    }

    pub fn replay_input_1(&mut self, callsite: Callsite) -> Result<u8, Error> {
        let (engine, machine) = self.engine();
        engine.replay_input_1(machine, callsite)
    }

    pub fn replay_input_2(&mut self, callsite: Callsite) -> Result<u16, Error> {
        let (engine, machine) = self.engine();
        engine.replay_input_2(machine, callsite)
    }

    pub fn replay_input_4(&mut self, callsite: Callsite) -> Result<u32, Error> {
        let (engine, machine) = self.engine();
        engine.replay_input_4(machine, callsite)
    }

    pub fn replay_input_8(&mut self, callsite: Callsite) -> Result<u64, Error> {
        let (engine, machine) = self.engine();
        engine.replay_input_8(machine, callsite)
    }

    pub fn replay_interrupt_request(&mut self, callsite: Callsite) -> Result<u32, Error> {
        let (engine, machine) = self.engine();
        engine.replay_interrupt_request(machine, callsite)
    }

    pub fn replay_exit_request(&mut self, callsite: Callsite) -> Result<u32, Error> {
        let (engine, machine) = self.engine();
        engine.replay_exit_request(machine, callsite)
    }

    pub fn replay_debug(&mut self, callsite: Callsite) {
        let (engine, machine) = self.engine();
        engine.replay_debug(machine, callsite);
    }

    pub fn replay_skipped_calls(&mut self, callsite: Callsite) -> Result<(), Error> {
        let (engine, machine) = self.engine();
        engine.replay_skipped_calls(machine, callsite)
    }

    pub fn replay_finished(&self) -> bool {
        match &self.state {
            State::Replay(engine) => engine.replay_finished(&self.machine),
            _ => false,
        }
    }

    /// Total guest instructions in the open recording, or zero when no
    /// replay is active.
    pub fn total_instructions(&self) -> u64 {
        match &self.state {
            State::Replay(engine) => engine.total_instructions(),
            _ => 0,
        }
    }
}
