//! The RECORD path: typed entry points serializing events to the open log.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::record::{
    Callsite, EntryPayload, HdTransferKind, LogEntry, MemType, NetTransferKind, ProgPoint,
    SkippedCall, PROG_POINT_SIZE,
};
use crate::Error;

/// Writes one nondet log.
///
/// Created with a zeroed header placeholder; [`LogWriter::finish`] rewinds
/// and rewrites the header with the program point of the last non-sentinel
/// entry, so a log that is not closed cleanly reports no progress total.
pub struct LogWriter {
    file: BufWriter<File>,
    path: PathBuf,
    scratch: Vec<u8>,
    last_prog_point: ProgPoint,
    entries_written: u64,
    // Last pending-interrupt value observed; transitions only are logged.
    current_interrupt_request: u32,
}

impl LogWriter {
    /// Create `path` and write the 24-byte header placeholder.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&[0u8; PROG_POINT_SIZE])?;
        tracing::info!(path = %path.display(), "opened nondet log for write");
        Ok(Self {
            file,
            path: path.to_owned(),
            scratch: Vec::with_capacity(4096),
            last_prog_point: ProgPoint::default(),
            entries_written: 0,
            current_interrupt_request: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Program point of the most recent non-sentinel entry.
    pub fn last_prog_point(&self) -> ProgPoint {
        self.last_prog_point
    }

    fn write_entry(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        payload: EntryPayload,
    ) -> Result<(), Error> {
        let entry = LogEntry::new(prog_point, callsite, payload);
        self.scratch.clear();
        entry.emit(&mut self.scratch);
        self.file.write_all(&self.scratch)?;
        // The header reports the highest program point of real events; the
        // end-of-log sentinel does not advance it.
        if entry.kind() != crate::record::EntryKind::Last {
            self.last_prog_point = prog_point;
        }
        self.entries_written += 1;
        Ok(())
    }

    pub fn record_input_1(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u8,
    ) -> Result<(), Error> {
        self.write_entry(prog_point, callsite, EntryPayload::Input1(value))
    }

    pub fn record_input_2(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u16,
    ) -> Result<(), Error> {
        self.write_entry(prog_point, callsite, EntryPayload::Input2(value))
    }

    pub fn record_input_4(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u32,
    ) -> Result<(), Error> {
        self.write_entry(prog_point, callsite, EntryPayload::Input4(value))
    }

    pub fn record_input_8(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u64,
    ) -> Result<(), Error> {
        self.write_entry(prog_point, callsite, EntryPayload::Input8(value))
    }

    /// Log the pending-interrupt bitmask, but only when it changed since the
    /// last observation. Runs of identical values produce nothing.
    pub fn record_interrupt_request(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u32,
    ) -> Result<(), Error> {
        if value == self.current_interrupt_request {
            return Ok(());
        }
        self.current_interrupt_request = value;
        self.write_entry(prog_point, callsite, EntryPayload::InterruptRequest(value))
    }

    /// Log an exit request; zero values are elided.
    pub fn record_exit_request(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        value: u32,
    ) -> Result<(), Error> {
        if value == 0 {
            return Ok(());
        }
        self.write_entry(prog_point, callsite, EntryPayload::ExitRequest(value))
    }

    pub fn record_cpu_mem_rw(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        addr: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::CpuMemRw {
                addr,
                data: data.to_vec(),
            }),
        )
    }

    pub fn record_cpu_mem_unmap(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        addr: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::CpuMemUnmap {
                addr,
                data: data.to_vec(),
            }),
        )
    }

    pub fn record_memory_region_change(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        start: u64,
        size: u64,
        mtype: MemType,
        name: &str,
        added: bool,
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::MemRegionChange {
                start,
                size,
                mtype,
                name: name.to_owned(),
                added,
            }),
        )
    }

    pub fn record_hd_transfer(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        kind: HdTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::HdTransfer {
                kind,
                src,
                dest,
                num_bytes,
            }),
        )
    }

    pub fn record_net_transfer(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        kind: NetTransferKind,
        src: u64,
        dest: u64,
        num_bytes: u32,
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::NetTransfer {
                kind,
                src,
                dest,
                num_bytes,
            }),
        )
    }

    pub fn record_handle_packet(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
        direction: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        self.write_entry(
            prog_point,
            callsite,
            EntryPayload::SkippedCall(SkippedCall::HandlePacket {
                direction,
                data: data.to_vec(),
            }),
        )
    }

    /// Write a checkpoint marker at the current program point.
    pub fn record_debug(
        &mut self,
        prog_point: ProgPoint,
        callsite: Callsite,
    ) -> Result<(), Error> {
        self.write_entry(prog_point, callsite, EntryPayload::Debug)
    }

    /// Write the end-of-log sentinel, rewrite the header with the final
    /// program point, and close the file.
    pub fn finish(mut self, prog_point: ProgPoint) -> Result<ProgPoint, Error> {
        self.write_entry(prog_point, Callsite::EndOfLog, EntryPayload::Last)?;
        let mut file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        self.scratch.clear();
        self.last_prog_point.emit(&mut self.scratch);
        file.write_all(&self.scratch)?;
        tracing::info!(
            path = %self.path.display(),
            entries = self.entries_written,
            last_instr = self.last_prog_point.guest_instr_count,
            "closed nondet log"
        );
        Ok(self.last_prog_point)
    }
}
