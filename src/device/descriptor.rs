//! DMA descriptor layout. Two shapes exist in the field (basic,
//! extended-timestamp); they are modeled here as distinct types rather
//! than unified at runtime, selected once via the driver's `D` type
//! parameter at construction.

use core::sync::atomic::{fence, Ordering};

use memory_addr::PhysAddr;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescStatus: u32 {
        /// Ownership bit: 1 = DMA owns, 0 = CPU owns.
        const OWN        = 1 << 31;
        /// Error summary (direction-specific meaning below it).
        const ES         = 1 << 15;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescCtrl: u32 {
        const END_OF_RING  = 1 << 25;
        const CHAINED      = 1 << 24;
        const FIRST_SEG    = 1 << 29;
        const LAST_SEG     = 1 << 28;
        const INTERRUPT    = 1 << 30;
        const CHECKSUM_INS = 1 << 27;
    }
}

/// Mask over the control word isolating the buffer-1 length field.
pub const BUFFER1_SIZE_MASK: u32 = 0x0000_1FFF;

/// Behavior common to both descriptor shapes: the fields the driver reads
/// and writes while walking a ring. Kept as a trait (rather than unifying
/// the two layouts into one struct) so each variant can place its extra
/// words exactly where its hardware expects them.
pub trait DmaDescriptor: Sized + Copy {
    fn status(&self) -> DescStatus;
    fn set_status(&mut self, status: DescStatus);
    fn ctrl(&self) -> DescCtrl;
    fn set_len_ctrl(&mut self, len: u32, ctrl: DescCtrl);
    fn buf_addr(&self) -> PhysAddr;
    fn set_buf_addr(&mut self, addr: PhysAddr);

    fn is_dma_owned(&self) -> bool {
        self.status().contains(DescStatus::OWN)
    }

    /// Hands ownership to the DMA engine. Callers must issue a memory
    /// barrier before kicking the poll-demand register, so the DMA
    /// engine never observes the ownership bit before the rest of the
    /// descriptor write has landed.
    fn give_to_dma(&mut self) {
        let mut status = self.status();
        status.insert(DescStatus::OWN);
        self.set_status(status);
        fence(Ordering::Release);
    }

    fn frame_len(&self) -> u32 {
        self.ctrl().bits() & BUFFER1_SIZE_MASK
    }
}

/// Four 32-bit words: status, control/length, buffer-1 address,
/// buffer-2-or-next-descriptor address.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct BasicDescriptor {
    pub status: u32,
    pub ctrl: u32,
    pub buf1_addr: u32,
    pub buf2_or_next: u32,
}

impl BasicDescriptor {
    pub const fn empty() -> Self {
        Self {
            status: 0,
            ctrl: 0,
            buf1_addr: 0,
            buf2_or_next: 0,
        }
    }
}

impl DmaDescriptor for BasicDescriptor {
    fn status(&self) -> DescStatus {
        DescStatus::from_bits_truncate(self.status)
    }

    fn set_status(&mut self, status: DescStatus) {
        self.status = status.bits();
    }

    fn ctrl(&self) -> DescCtrl {
        DescCtrl::from_bits_truncate(self.ctrl)
    }

    fn set_len_ctrl(&mut self, len: u32, ctrl: DescCtrl) {
        self.ctrl = (len & BUFFER1_SIZE_MASK) | ctrl.bits();
    }

    fn buf_addr(&self) -> PhysAddr {
        PhysAddr::from(self.buf1_addr as usize)
    }

    fn set_buf_addr(&mut self, addr: PhysAddr) {
        self.buf1_addr = addr.as_usize() as u32;
    }
}

/// Basic layout plus two trailing 32-bit timestamp words, for MACs that
/// support IEEE 1588 hardware timestamping.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct ExtendedDescriptor {
    pub status: u32,
    pub ctrl: u32,
    pub buf1_addr: u32,
    pub buf2_or_next: u32,
    pub timestamp_lo: u32,
    pub timestamp_hi: u32,
}

impl ExtendedDescriptor {
    pub const fn empty() -> Self {
        Self {
            status: 0,
            ctrl: 0,
            buf1_addr: 0,
            buf2_or_next: 0,
            timestamp_lo: 0,
            timestamp_hi: 0,
        }
    }

    pub fn timestamp_ns(&self) -> u64 {
        ((self.timestamp_hi as u64) << 32) | self.timestamp_lo as u64
    }
}

impl DmaDescriptor for ExtendedDescriptor {
    fn status(&self) -> DescStatus {
        DescStatus::from_bits_truncate(self.status)
    }

    fn set_status(&mut self, status: DescStatus) {
        self.status = status.bits();
    }

    fn ctrl(&self) -> DescCtrl {
        DescCtrl::from_bits_truncate(self.ctrl)
    }

    fn set_len_ctrl(&mut self, len: u32, ctrl: DescCtrl) {
        self.ctrl = (len & BUFFER1_SIZE_MASK) | ctrl.bits();
    }

    fn buf_addr(&self) -> PhysAddr {
        PhysAddr::from(self.buf1_addr as usize)
    }

    fn set_buf_addr(&mut self, addr: PhysAddr) {
        self.buf1_addr = addr.as_usize() as u32;
    }
}
