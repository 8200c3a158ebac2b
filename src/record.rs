//! Log entry model and its on-disk encoding.
//!
//! Every entry in a nondet log is `| prog_point: 24B | kind: le32 |
//! callsite: le32 |` followed by a kind-specific payload. There is no
//! framing and no checksum; the kind tag is the only type witness, so the
//! write and read paths below must stay exactly symmetric.

use std::fmt;
use std::io::{self, Read};

/// Number of entry kinds; sizes the per-kind accounting arrays.
pub const NUM_ENTRY_KINDS: usize = 9;

/// A deterministic moment in the guest's execution.
///
/// `guest_instr_count` is the authoritative replay clock; `pc` and
/// `secondary` are advisory and carried through unchanged.
///
/// # Format
///
/// `| guest_instr_count: le64 | pc: le64 | secondary: le64 |`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProgPoint {
    pub guest_instr_count: u64,
    pub pc: u64,
    pub secondary: u64,
}

/// Encoded size of a [`ProgPoint`]; also the size of the log header.
pub const PROG_POINT_SIZE: usize = 24;

impl ProgPoint {
    pub fn new(guest_instr_count: u64, pc: u64, secondary: u64) -> Self {
        Self {
            guest_instr_count,
            pc,
            secondary,
        }
    }

    pub(crate) fn emit(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.guest_instr_count.to_le_bytes());
        buffer.extend_from_slice(&self.pc.to_le_bytes());
        buffer.extend_from_slice(&self.secondary.to_le_bytes());
    }

    pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        Ok(Self {
            guest_instr_count: read_le64(reader)?,
            pc: read_le64(reader)?,
            secondary: read_le64(reader)?,
        })
    }
}

impl fmt::Display for ProgPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{instr={} pc={:#010x} secondary={:#010x}}}",
            self.guest_instr_count, self.pc, self.secondary
        )
    }
}

/// Enumeration of log entry kinds.
///
/// This tag is the first field after the program point in every entry.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    Input1 = 0,
    Input2 = 1,
    Input4 = 2,
    Input8 = 3,
    InterruptRequest = 4,
    ExitRequest = 5,
    SkippedCall = 6,
    Debug = 7,
    Last = 8,
}

impl EntryKind {
    /// Index into the per-kind accounting arrays.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Input1 => "input-1",
            Self::Input2 => "input-2",
            Self::Input4 => "input-4",
            Self::Input8 => "input-8",
            Self::InterruptRequest => "interrupt-request",
            Self::ExitRequest => "exit-request",
            Self::SkippedCall => "skipped-call",
            Self::Debug => "debug",
            Self::Last => "end-of-log",
        }
    }

    pub fn all() -> [EntryKind; NUM_ENTRY_KINDS] {
        [
            Self::Input1,
            Self::Input2,
            Self::Input4,
            Self::Input8,
            Self::InterruptRequest,
            Self::ExitRequest,
            Self::SkippedCall,
            Self::Debug,
            Self::Last,
        ]
    }
}

impl TryFrom<u32> for EntryKind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::Input1),
            1 => Ok(Self::Input2),
            2 => Ok(Self::Input4),
            3 => Ok(Self::Input8),
            4 => Ok(Self::InterruptRequest),
            5 => Ok(Self::ExitRequest),
            6 => Ok(Self::SkippedCall),
            7 => Ok(Self::Debug),
            8 => Ok(Self::Last),
            n => Err(FormatError::UnknownKind(n)),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies where in the emulator's control flow an event was recorded.
///
/// Carried verbatim in every entry; checked on consumption only when the
/// consumer asks.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Callsite {
    /// Inside the CPU execution loop.
    CpuLoop = 0,
    /// Inside the main-loop wait (device/timer servicing between CPU runs).
    MainLoopWait = 1,
    /// An I/O port read returning data to the guest.
    IoRead = 2,
    /// An MMIO read returning data to the guest.
    MmioRead = 3,
    /// Device DMA through the physical-memory API.
    PhysMemIo = 4,
    /// A block-device transfer.
    HdTransfer = 5,
    /// A network-device transfer.
    NetTransfer = 6,
    /// Packet delivery into the guest NIC.
    HandlePacket = 7,
    /// End-of-log marker written at close.
    EndOfLog = 8,
}

impl Callsite {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CpuLoop => "cpu-loop",
            Self::MainLoopWait => "main-loop-wait",
            Self::IoRead => "io-read",
            Self::MmioRead => "mmio-read",
            Self::PhysMemIo => "phys-mem-io",
            Self::HdTransfer => "hd-transfer",
            Self::NetTransfer => "net-transfer",
            Self::HandlePacket => "handle-packet",
            Self::EndOfLog => "end-of-log",
        }
    }
}

impl TryFrom<u32> for Callsite {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::CpuLoop),
            1 => Ok(Self::MainLoopWait),
            2 => Ok(Self::IoRead),
            3 => Ok(Self::MmioRead),
            4 => Ok(Self::PhysMemIo),
            5 => Ok(Self::HdTransfer),
            6 => Ok(Self::NetTransfer),
            7 => Ok(Self::HandlePacket),
            8 => Ok(Self::EndOfLog),
            n => Err(FormatError::UnknownCallsite(n)),
        }
    }
}

impl fmt::Display for Callsite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Discriminates the skipped-call payload variants.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SkippedCallKind {
    CpuMemRw = 0,
    CpuMemUnmap = 1,
    MemRegionChange = 2,
    HdTransfer = 3,
    NetTransfer = 4,
    HandlePacket = 5,
}

impl SkippedCallKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CpuMemRw => "cpu-mem-rw",
            Self::CpuMemUnmap => "cpu-mem-unmap",
            Self::MemRegionChange => "mem-region-change",
            Self::HdTransfer => "hd-transfer",
            Self::NetTransfer => "net-transfer",
            Self::HandlePacket => "handle-packet",
        }
    }
}

impl TryFrom<u32> for SkippedCallKind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::CpuMemRw),
            1 => Ok(Self::CpuMemUnmap),
            2 => Ok(Self::MemRegionChange),
            3 => Ok(Self::HdTransfer),
            4 => Ok(Self::NetTransfer),
            5 => Ok(Self::HandlePacket),
            n => Err(FormatError::UnknownSkippedCall(n)),
        }
    }
}

impl fmt::Display for SkippedCallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of memory region installed or removed by a topology change.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemType {
    Ram = 0,
    Io = 1,
}

impl TryFrom<u32> for MemType {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::Ram),
            1 => Ok(Self::Io),
            n => Err(FormatError::UnknownMemType(n)),
        }
    }
}

/// Direction of a block-device transfer.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HdTransferKind {
    HdToIoBuffer = 0,
    IoBufferToHd = 1,
    PortToIoBuffer = 2,
    IoBufferToPort = 3,
    HdToRam = 4,
    RamToHd = 5,
}

impl TryFrom<u32> for HdTransferKind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::HdToIoBuffer),
            1 => Ok(Self::IoBufferToHd),
            2 => Ok(Self::PortToIoBuffer),
            3 => Ok(Self::IoBufferToPort),
            4 => Ok(Self::HdToRam),
            5 => Ok(Self::RamToHd),
            n => Err(FormatError::UnknownHdTransfer(n)),
        }
    }
}

/// Direction of a network-device transfer.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NetTransferKind {
    RamToIoBuffer = 0,
    IoBufferToRam = 1,
    IoBufferToIoBuffer = 2,
}

impl TryFrom<u32> for NetTransferKind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Self::RamToIoBuffer),
            1 => Ok(Self::IoBufferToRam),
            2 => Ok(Self::IoBufferToIoBuffer),
            n => Err(FormatError::UnknownNetTransfer(n)),
        }
    }
}

/// A side-effecting host call elided on replay and re-applied from the log.
///
/// These are the only payloads that carry variable-length trailing data. On
/// disk each begins with the sub-kind tag (le32). The fixed structs retain a
/// dead buffer-pointer field from the original layout: it is written as
/// eight zero bytes and ignored on read; the trailing bytes fill the owning
/// container instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkippedCall {
    /// Device write into guest physical memory.
    ///
    /// # Format
    ///
    /// `| addr: le64 | buf: le64 (zero) | len: le32 | data: [u8; len] |`
    CpuMemRw { addr: u64, data: Vec<u8> },
    /// Device write through the map/copy/unmap path.
    ///
    /// # Format
    ///
    /// `| addr: le64 | buf: le64 (zero) | len: le32 | data: [u8; len] |`
    CpuMemUnmap { addr: u64, data: Vec<u8> },
    /// An I/O memory region was installed or removed.
    ///
    /// # Format
    ///
    /// `| start: le64 | size: le64 | name: le64 (zero) | name_len: le32 |
    ///  mtype: le32 | added: u8 | name: [u8; name_len] |`
    MemRegionChange {
        start: u64,
        size: u64,
        mtype: MemType,
        name: String,
        added: bool,
    },
    /// A block-device transfer between host-side buffers.
    ///
    /// # Format
    ///
    /// `| type: le32 | src: le64 | dest: le64 | num_bytes: le32 |`
    HdTransfer {
        kind: HdTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    },
    /// A network-device transfer between host-side buffers.
    ///
    /// # Format
    ///
    /// `| type: le32 | src: le64 | dest: le64 | num_bytes: le32 |`
    NetTransfer {
        kind: NetTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    },
    /// A packet handed to the guest NIC.
    ///
    /// # Format
    ///
    /// `| buf: le64 (zero) | size: le32 | direction: u8 | data: [u8; size] |`
    HandlePacket { direction: u8, data: Vec<u8> },
}

impl SkippedCall {
    pub fn kind(&self) -> SkippedCallKind {
        match self {
            Self::CpuMemRw { .. } => SkippedCallKind::CpuMemRw,
            Self::CpuMemUnmap { .. } => SkippedCallKind::CpuMemUnmap,
            Self::MemRegionChange { .. } => SkippedCallKind::MemRegionChange,
            Self::HdTransfer { .. } => SkippedCallKind::HdTransfer,
            Self::NetTransfer { .. } => SkippedCallKind::NetTransfer,
            Self::HandlePacket { .. } => SkippedCallKind::HandlePacket,
        }
    }

    fn emit(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&(self.kind() as u32).to_le_bytes());
        match self {
            Self::CpuMemRw { addr, data } | Self::CpuMemUnmap { addr, data } => {
                buffer.extend_from_slice(&addr.to_le_bytes());
                buffer.extend_from_slice(&0u64.to_le_bytes());
                buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buffer.extend_from_slice(data);
            }
            Self::MemRegionChange {
                start,
                size,
                mtype,
                name,
                added,
            } => {
                buffer.extend_from_slice(&start.to_le_bytes());
                buffer.extend_from_slice(&size.to_le_bytes());
                buffer.extend_from_slice(&0u64.to_le_bytes());
                buffer.extend_from_slice(&(name.len() as u32).to_le_bytes());
                buffer.extend_from_slice(&(*mtype as u32).to_le_bytes());
                buffer.push(u8::from(*added));
                buffer.extend_from_slice(name.as_bytes());
            }
            Self::HdTransfer {
                kind,
                src,
                dest,
                num_bytes,
            } => {
                buffer.extend_from_slice(&(*kind as u32).to_le_bytes());
                buffer.extend_from_slice(&src.to_le_bytes());
                buffer.extend_from_slice(&dest.to_le_bytes());
                buffer.extend_from_slice(&num_bytes.to_le_bytes());
            }
            Self::NetTransfer {
                kind,
                src,
                dest,
                num_bytes,
            } => {
                buffer.extend_from_slice(&(*kind as u32).to_le_bytes());
                buffer.extend_from_slice(&src.to_le_bytes());
                buffer.extend_from_slice(&dest.to_le_bytes());
                buffer.extend_from_slice(&num_bytes.to_le_bytes());
            }
            Self::HandlePacket { direction, data } => {
                buffer.extend_from_slice(&0u64.to_le_bytes());
                buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buffer.push(*direction);
                buffer.extend_from_slice(data);
            }
        }
    }

    fn parse<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let kind = SkippedCallKind::try_from(read_le32(reader)?)?;
        match kind {
            SkippedCallKind::CpuMemRw | SkippedCallKind::CpuMemUnmap => {
                let addr = read_le64(reader)?;
                let _dead_buf = read_le64(reader)?;
                let len = read_le32(reader)? as usize;
                let mut data = vec![0u8; len];
                reader.read_exact(&mut data)?;
                Ok(match kind {
                    SkippedCallKind::CpuMemRw => Self::CpuMemRw { addr, data },
                    _ => Self::CpuMemUnmap { addr, data },
                })
            }
            SkippedCallKind::MemRegionChange => {
                let start = read_le64(reader)?;
                let size = read_le64(reader)?;
                let _dead_name = read_le64(reader)?;
                let name_len = read_le32(reader)? as usize;
                let mtype = MemType::try_from(read_le32(reader)?)?;
                let added = read_u8(reader)? != 0;
                let mut raw = vec![0u8; name_len];
                reader.read_exact(&mut raw)?;
                let name = String::from_utf8(raw).map_err(|_| FormatError::BadRegionName)?;
                Ok(Self::MemRegionChange {
                    start,
                    size,
                    mtype,
                    name,
                    added,
                })
            }
            SkippedCallKind::HdTransfer => Ok(Self::HdTransfer {
                kind: HdTransferKind::try_from(read_le32(reader)?)?,
                src: read_le64(reader)?,
                dest: read_le64(reader)?,
                num_bytes: read_le32(reader)?,
            }),
            SkippedCallKind::NetTransfer => Ok(Self::NetTransfer {
                kind: NetTransferKind::try_from(read_le32(reader)?)?,
                src: read_le64(reader)?,
                dest: read_le64(reader)?,
                num_bytes: read_le32(reader)?,
            }),
            SkippedCallKind::HandlePacket => {
                let _dead_buf = read_le64(reader)?;
                let size = read_le32(reader)? as usize;
                let direction = read_u8(reader)?;
                let mut data = vec![0u8; size];
                reader.read_exact(&mut data)?;
                Ok(Self::HandlePacket { direction, data })
            }
        }
    }
}

/// The kind-specific payload of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    /// Fixed-width value returned to the guest by a port or MMIO read.
    Input1(u8),
    Input2(u16),
    Input4(u32),
    Input8(u64),
    /// New value of the CPU's pending-interrupt bitmask (transitions only).
    InterruptRequest(u32),
    /// Nonzero exit code observed by the CPU loop.
    ExitRequest(u32),
    SkippedCall(SkippedCall),
    /// Checkpoint marker used to cross-check program-point drift.
    Debug,
    /// End-of-log sentinel; always the final entry.
    Last,
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Input1(_) => EntryKind::Input1,
            Self::Input2(_) => EntryKind::Input2,
            Self::Input4(_) => EntryKind::Input4,
            Self::Input8(_) => EntryKind::Input8,
            Self::InterruptRequest(_) => EntryKind::InterruptRequest,
            Self::ExitRequest(_) => EntryKind::ExitRequest,
            Self::SkippedCall(_) => EntryKind::SkippedCall,
            Self::Debug => EntryKind::Debug,
            Self::Last => EntryKind::Last,
        }
    }
}

/// One parsed log entry.
///
/// `file_pos` is the byte offset of the entry's first header byte, filled in
/// by the reader for per-kind accounting; the writer leaves it zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub prog_point: ProgPoint,
    pub callsite: Callsite,
    pub payload: EntryPayload,
    pub file_pos: u64,
}

impl LogEntry {
    pub fn new(prog_point: ProgPoint, callsite: Callsite, payload: EntryPayload) -> Self {
        Self {
            prog_point,
            callsite,
            payload,
            file_pos: 0,
        }
    }

    /// An empty shell, used by the recycle pool.
    pub fn empty() -> Self {
        Self {
            prog_point: ProgPoint::default(),
            callsite: Callsite::CpuLoop,
            payload: EntryPayload::Debug,
            file_pos: 0,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    /// Serialize header tuple, payload, and any trailing buffer.
    pub fn emit(&self, buffer: &mut Vec<u8>) {
        self.prog_point.emit(buffer);
        buffer.extend_from_slice(&(self.kind() as u32).to_le_bytes());
        buffer.extend_from_slice(&(self.callsite as u32).to_le_bytes());
        match &self.payload {
            EntryPayload::Input1(v) => buffer.push(*v),
            EntryPayload::Input2(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            EntryPayload::Input4(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            EntryPayload::Input8(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            EntryPayload::InterruptRequest(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            EntryPayload::ExitRequest(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            EntryPayload::SkippedCall(call) => call.emit(buffer),
            EntryPayload::Debug | EntryPayload::Last => {}
        }
    }

    /// Parse one entry, mirroring [`LogEntry::emit`] exactly.
    ///
    /// `file_pos` should be the stream offset at which the header starts.
    pub fn parse<R: Read>(reader: &mut R, file_pos: u64) -> Result<Self, FormatError> {
        let prog_point = ProgPoint::parse(reader)?;
        let kind = EntryKind::try_from(read_le32(reader)?)?;
        let callsite = Callsite::try_from(read_le32(reader)?)?;
        let payload = match kind {
            EntryKind::Input1 => EntryPayload::Input1(read_u8(reader)?),
            EntryKind::Input2 => EntryPayload::Input2(read_le16(reader)?),
            EntryKind::Input4 => EntryPayload::Input4(read_le32(reader)?),
            EntryKind::Input8 => EntryPayload::Input8(read_le64(reader)?),
            EntryKind::InterruptRequest => EntryPayload::InterruptRequest(read_le32(reader)?),
            EntryKind::ExitRequest => EntryPayload::ExitRequest(read_le32(reader)?),
            EntryKind::SkippedCall => EntryPayload::SkippedCall(SkippedCall::parse(reader)?),
            EntryKind::Debug => EntryPayload::Debug,
            EntryKind::Last => EntryPayload::Last,
        };
        Ok(Self {
            prog_point,
            callsite,
            payload,
            file_pos,
        })
    }

    /// Reset the shell for reuse; drops any owned buffers.
    pub fn clear(&mut self) {
        self.prog_point = ProgPoint::default();
        self.callsite = Callsite::CpuLoop;
        self.payload = EntryPayload::Debug;
        self.file_pos = 0;
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.prog_point)?;
        match &self.payload {
            EntryPayload::Input1(v) => write!(f, "input-1 {:#04x}", v)?,
            EntryPayload::Input2(v) => write!(f, "input-2 {:#06x}", v)?,
            EntryPayload::Input4(v) => write!(f, "input-4 {:#010x}", v)?,
            EntryPayload::Input8(v) => write!(f, "input-8 {:#018x}", v)?,
            EntryPayload::InterruptRequest(v) => write!(f, "interrupt-request {:#x}", v)?,
            EntryPayload::ExitRequest(v) => write!(f, "exit-request {:#x}", v)?,
            EntryPayload::SkippedCall(call) => match call {
                SkippedCall::CpuMemRw { addr, data } => {
                    write!(f, "skipped cpu-mem-rw addr={:#x} len={}", addr, data.len())?
                }
                SkippedCall::CpuMemUnmap { addr, data } => write!(
                    f,
                    "skipped cpu-mem-unmap addr={:#x} len={}",
                    addr,
                    data.len()
                )?,
                SkippedCall::MemRegionChange {
                    start,
                    size,
                    name,
                    added,
                    ..
                } => write!(
                    f,
                    "skipped mem-region-change {} {:?} start={:#x} size={:#x}",
                    if *added { "add" } else { "del" },
                    name,
                    start,
                    size
                )?,
                SkippedCall::HdTransfer {
                    kind,
                    src,
                    dest,
                    num_bytes,
                } => write!(
                    f,
                    "skipped hd-transfer type={:?} src={:#x} dest={:#x} bytes={}",
                    kind, src, dest, num_bytes
                )?,
                SkippedCall::NetTransfer {
                    kind,
                    src,
                    dest,
                    num_bytes,
                } => write!(
                    f,
                    "skipped net-transfer type={:?} src={:#x} dest={:#x} bytes={}",
                    kind, src, dest, num_bytes
                )?,
                SkippedCall::HandlePacket { direction, data } => write!(
                    f,
                    "skipped handle-packet direction={} size={}",
                    direction,
                    data.len()
                )?,
            },
            EntryPayload::Debug => write!(f, "debug")?,
            EntryPayload::Last => write!(f, "end-of-log")?,
        }
        write!(f, " from {}", self.callsite)
    }
}

/// Errors produced while decoding a log.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unknown entry kind {0:#x}")]
    UnknownKind(u32),

    #[error("unknown callsite id {0:#x}")]
    UnknownCallsite(u32),

    #[error("unknown skipped-call kind {0:#x}")]
    UnknownSkippedCall(u32),

    #[error("unknown memory-region type {0:#x}")]
    UnknownMemType(u32),

    #[error("unknown hd-transfer type {0:#x}")]
    UnknownHdTransfer(u32),

    #[error("unknown net-transfer type {0:#x}")]
    UnknownNetTransfer(u32),

    #[error("memory-region name is not valid utf-8")]
    BadRegionName,

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_le16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_le32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_le64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
