//! End-to-end record/replay scenarios over real log files.

use std::path::{Path, PathBuf};

use replay_log::machine::Machine;
use replay_log::record::{
    Callsite, EntryKind, HdTransferKind, MemType, NetTransferKind, ProgPoint,
};
use replay_log::replay::{LogReader, ReplayEngine, MAX_QUEUE_LEN};
use replay_log::session::Session;
use replay_log::{nondet_log_path, Error};
use tempfile::TempDir;

#[derive(Default)]
struct ReplayMachine {
    instr: u64,
    mem_writes: Vec<(u64, Vec<u8>)>,
    unmaps: Vec<(u64, Vec<u8>)>,
    region_changes: Vec<(u64, u64, MemType, String, bool)>,
    hd_transfers: Vec<(HdTransferKind, u64, u64, u32)>,
    net_transfers: Vec<(NetTransferKind, u64, u64, u32)>,
    packets: Vec<(u8, Vec<u8>)>,
    quit: bool,
}

impl Machine for ReplayMachine {
    fn prog_point(&self) -> ProgPoint {
        ProgPoint::new(self.instr, 0, 0)
    }

    fn apply_cpu_mem_rw(&mut self, addr: u64, data: &[u8]) {
        self.mem_writes.push((addr, data.to_vec()));
    }

    fn apply_cpu_mem_unmap(&mut self, addr: u64, data: &[u8]) {
        self.unmaps.push((addr, data.to_vec()));
    }

    fn apply_memory_region_change(
        &mut self,
        start: u64,
        size: u64,
        mtype: MemType,
        name: &str,
        added: bool,
    ) {
        self.region_changes
            .push((start, size, mtype, name.to_owned(), added));
    }

    fn apply_hd_transfer(&mut self, kind: HdTransferKind, src: u64, dest: u64, num_bytes: u32) {
        self.hd_transfers.push((kind, src, dest, num_bytes));
    }

    fn apply_net_transfer(&mut self, kind: NetTransferKind, src: u64, dest: u64, num_bytes: u32) {
        self.net_transfers.push((kind, src, dest, num_bytes));
    }

    fn deliver_packet(&mut self, direction: u8, data: &[u8]) {
        self.packets.push((direction, data.to_vec()));
    }

    fn quit_cpu_loop(&mut self) {
        self.quit = true;
    }

    fn save_snapshot(&mut self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn load_snapshot(&mut self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn reset_instr_count(&mut self) {
        self.instr = 0;
    }
}

fn record_base(dir: &TempDir) -> PathBuf {
    dir.path().join("run")
}

/// Record a single 1-byte input, close, and replay it; a consumer arriving
/// early must leave the queue intact.
#[test]
fn single_input_roundtrip() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 100;
    session.record_input_1(Callsite::CpuLoop, 0x42);
    session.end_record().unwrap();

    // Too early: the head is in the future, nothing is consumed.
    let mut machine = ReplayMachine {
        instr: 99,
        ..Default::default()
    };
    let mut engine = ReplayEngine::open(&nondet_log_path(&base)).unwrap();
    engine.fill_queue(&machine).unwrap();
    let before = engine.queue_len();
    let got = engine
        .get_next(&mut machine, EntryKind::Input1, Callsite::CpuLoop, false)
        .unwrap();
    assert!(got.is_none());
    assert_eq!(engine.queue_len(), before);

    // On time: the input comes back byte-identical.
    machine.instr = 100;
    assert_eq!(
        engine.replay_input_1(&mut machine, Callsite::CpuLoop).unwrap(),
        0x42
    );
}

/// Four interrupt observations with three transitions produce three entries,
/// and replay returns the right value between transitions.
#[test]
fn interrupt_compression_and_replay() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    for (instr, value) in [(200u64, 0x1u32), (201, 0x1), (210, 0x3), (300, 0x0)] {
        session.machine_mut().instr = instr;
        session.record_interrupt_request(Callsite::CpuLoop, value);
    }
    session.end_record().unwrap();

    let mut reader = LogReader::open(&nondet_log_path(&base)).unwrap();
    let mut transitions = 0;
    while !reader.is_drained() {
        let entry = reader.read_entry().unwrap();
        if entry.kind() == EntryKind::InterruptRequest {
            transitions += 1;
        }
    }
    assert_eq!(transitions, 3);

    session.begin_replay(&base).unwrap();
    for (instr, expect) in [(205u64, 0x1u32), (220, 0x3), (310, 0x0)] {
        session.machine_mut().instr = instr;
        assert_eq!(
            session.replay_interrupt_request(Callsite::CpuLoop).unwrap(),
            expect,
            "at instruction {instr}"
        );
    }
    session.end_replay(false);
}

/// The mem-rw fixed struct is followed by the raw write bytes, and replay
/// hands them to the memory applier verbatim.
#[test]
fn cpu_mem_rw_bytes_on_disk_and_dispatch() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 500;
    session.record_cpu_mem_rw(Callsite::PhysMemIo, 0x1000, b"ABCD");
    session.end_record().unwrap();

    let raw = std::fs::read(nondet_log_path(&base)).unwrap();
    // 24-byte log header, 32-byte entry header, 4-byte sub-kind tag,
    // 8-byte address, 8-byte dead pointer, 4-byte length, then the data.
    let data_at = 24 + 32 + 4 + 8 + 8 + 4;
    assert_eq!(&raw[data_at..data_at + 4], b"ABCD");
    let dead_ptr = &raw[24 + 32 + 4 + 8..][..8];
    assert_eq!(dead_ptr, &[0u8; 8]);

    session.begin_replay(&base).unwrap();
    session.machine_mut().instr = 500;
    session.replay_skipped_calls(Callsite::MainLoopWait).unwrap();
    session.end_replay(false);
    assert_eq!(session.machine().mem_writes, vec![(0x1000, b"ABCD".to_vec())]);
}

/// A packet and a mem-rw recorded back-to-back replay in order, the packet
/// buffer freshly allocated and byte-identical.
#[test]
fn packet_then_mem_rw() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);
    let payload = vec![0x50u8; 64];

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 700;
    session.record_handle_packet(Callsite::HandlePacket, 0, &payload);
    session.machine_mut().instr = 701;
    session.record_cpu_mem_rw(Callsite::PhysMemIo, 0x2000, b"WXYZ");
    session.end_record().unwrap();

    session.begin_replay(&base).unwrap();
    session.machine_mut().instr = 700;
    session.replay_skipped_calls(Callsite::MainLoopWait).unwrap();
    assert_eq!(session.machine().packets, vec![(0, payload)]);
    assert!(session.machine().mem_writes.is_empty());

    session.machine_mut().instr = 701;
    session.replay_skipped_calls(Callsite::MainLoopWait).unwrap();
    assert_eq!(session.machine().mem_writes, vec![(0x2000, b"WXYZ".to_vec())]);
    session.end_replay(false);
}

/// All skipped-call variants survive a full roundtrip.
#[test]
fn skipped_call_variants_roundtrip() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 10;
    session.record_cpu_mem_unmap(Callsite::PhysMemIo, 0x4000, b"unmap");
    session.machine_mut().instr = 11;
    session.record_memory_region_change(
        Callsite::MainLoopWait,
        0xfee0_0000,
        0x1000,
        MemType::Io,
        "apic",
        true,
    );
    session.machine_mut().instr = 12;
    session.record_hd_transfer(
        Callsite::HdTransfer,
        HdTransferKind::HdToRam,
        0x10,
        0x9000,
        512,
    );
    session.machine_mut().instr = 13;
    session.record_net_transfer(
        Callsite::NetTransfer,
        NetTransferKind::IoBufferToRam,
        0x20,
        0xa000,
        128,
    );
    session.end_record().unwrap();

    session.begin_replay(&base).unwrap();
    for instr in 10..=13u64 {
        session.machine_mut().instr = instr;
        session.replay_skipped_calls(Callsite::MainLoopWait).unwrap();
    }
    session.end_replay(false);

    let machine = session.machine();
    assert_eq!(machine.unmaps, vec![(0x4000, b"unmap".to_vec())]);
    assert_eq!(
        machine.region_changes,
        vec![(0xfee0_0000, 0x1000, MemType::Io, "apic".to_string(), true)]
    );
    assert_eq!(
        machine.hd_transfers,
        vec![(HdTransferKind::HdToRam, 0x10, 0x9000, 512)]
    );
    assert_eq!(
        machine.net_transfers,
        vec![(NetTransferKind::IoBufferToRam, 0x20, 0xa000, 128)]
    );
}

/// An empty recording is finished as soon as replay reaches the sentinel's
/// program point.
#[test]
fn empty_log_replay_finished_immediately() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.end_record().unwrap();

    session.begin_replay(&base).unwrap();
    assert!(session.replay_finished());
    session.end_replay(false);
}

/// Instruction counts never decrease across a well-formed log.
#[test]
fn log_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    for instr in [5u64, 5, 9, 30, 30, 31] {
        session.machine_mut().instr = instr;
        session.record_input_4(Callsite::IoRead, instr as u32);
    }
    session.end_record().unwrap();

    let mut reader = LogReader::open(&nondet_log_path(&base)).unwrap();
    let mut previous = 0u64;
    while !reader.is_drained() {
        let entry = reader.read_entry().unwrap();
        assert!(entry.prog_point.guest_instr_count >= previous);
        previous = entry.prog_point.guest_instr_count;
    }
}

/// The full record-call sequence comes back byte-identical and in order.
#[test]
fn mixed_sequence_roundtrip() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 1;
    session.record_input_1(Callsite::IoRead, 0x11);
    session.machine_mut().instr = 2;
    session.record_input_2(Callsite::IoRead, 0x2222);
    session.machine_mut().instr = 3;
    session.record_input_4(Callsite::MmioRead, 0x4444_4444);
    session.machine_mut().instr = 4;
    session.record_input_8(Callsite::MmioRead, 0x8888_8888_8888_8888);
    session.machine_mut().instr = 5;
    session.record_exit_request(Callsite::CpuLoop, 3);
    session.end_record().unwrap();

    session.begin_replay(&base).unwrap();
    session.machine_mut().instr = 1;
    assert_eq!(session.replay_input_1(Callsite::IoRead).unwrap(), 0x11);
    session.machine_mut().instr = 2;
    assert_eq!(session.replay_input_2(Callsite::IoRead).unwrap(), 0x2222);
    session.machine_mut().instr = 3;
    assert_eq!(
        session.replay_input_4(Callsite::MmioRead).unwrap(),
        0x4444_4444
    );
    session.machine_mut().instr = 4;
    assert_eq!(
        session.replay_input_8(Callsite::MmioRead).unwrap(),
        0x8888_8888_8888_8888
    );
    session.machine_mut().instr = 5;
    assert_eq!(session.replay_exit_request(Callsite::CpuLoop).unwrap(), 3);
    assert!(session.replay_finished());
    session.end_replay(false);
}

/// A consumer that outran the log is a fatal divergence and escapes the CPU
/// loop.
#[test]
fn divergence_escapes_cpu_loop() {
    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    session.machine_mut().instr = 100;
    session.record_input_4(Callsite::IoRead, 1);
    session.end_record().unwrap();

    session.begin_replay(&base).unwrap();
    session.machine_mut().instr = 200;
    let err = session.replay_input_4(Callsite::IoRead).unwrap_err();
    assert!(matches!(err, Error::Divergence(_)));
    assert!(session.machine().quit);
}

/// 200k inputs force repeated queue refills, each bounded by the queue cap.
#[test]
fn stress_queue_refills() {
    const TOTAL: u64 = 200_000;

    let dir = TempDir::new().unwrap();
    let base = record_base(&dir);

    let mut session = Session::new(ReplayMachine::default());
    session.begin_record(&base).unwrap();
    for i in 0..TOTAL {
        session.machine_mut().instr = i + 1;
        session.record_input_4(Callsite::IoRead, i as u32);
    }
    session.end_record().unwrap();

    let mut machine = ReplayMachine::default();
    let mut engine = ReplayEngine::open(&nondet_log_path(&base)).unwrap();
    engine.fill_queue(&machine).unwrap();
    assert!(engine.queue_len() <= MAX_QUEUE_LEN + 1);
    assert!(!engine.reader().is_drained());

    for i in 0..TOTAL {
        machine.instr = i + 1;
        let value = engine.replay_input_4(&mut machine, Callsite::IoRead).unwrap();
        assert_eq!(value, i as u32);
        assert!(engine.queue_len() <= MAX_QUEUE_LEN + 1);
    }
    assert!(engine.replay_finished(&machine));

    let stats = engine.finish();
    assert_eq!(stats.counts[EntryKind::Input4.index()], TOTAL);
    assert!(stats.max_queue_len <= MAX_QUEUE_LEN + 1);
}
