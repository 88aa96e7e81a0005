//! CPU-related operations: IRQ masking and cache/barrier maintenance for
//! DMA-visible memory.

use aarch64_cpu::registers::DAIF;
use core::arch::asm;
use memory_addr::VirtAddr;
use tock_registers::interfaces::Readable;

/// Enables interrupts by clearing the DAIF I bit.
#[inline]
pub fn enable_irqs() {
    unsafe { asm!("msr daifclr, #2") };
}

/// Disables interrupts by setting the DAIF I bit.
#[inline]
pub fn disable_irqs() {
    unsafe { asm!("msr daifset, #2") };
}

/// Returns `true` if the DAIF I bit is set (IRQs masked).
#[inline]
pub fn irqs_disabled() -> bool {
    DAIF.matches_all(DAIF::I::Masked)
}

/// Data synchronization barrier, full system.
#[inline]
pub fn dsb_sy() {
    unsafe { asm!("dsb sy") };
}

/// Instruction synchronization barrier.
#[inline]
pub fn isb() {
    unsafe { asm!("isb") };
}

/// Cache line size assumed for the targets this crate runs on. Descriptor
/// rings and DMA buffers are aligned to this so clean/invalidate ranges
/// never touch unrelated data.
pub const CACHE_LINE_SIZE: usize = 64;

/// Cleans (writes back) the data cache for `[addr, addr+len)`, rounded
/// outward to cache-line boundaries. Must be called after the CPU writes a
/// descriptor or buffer a DMA engine will read, and before handing
/// ownership to that engine.
pub fn clean_dcache_range(addr: VirtAddr, len: usize) {
    for line in cache_lines(addr, len) {
        unsafe { asm!("dc cvac, {0}", in(reg) line) };
    }
    dsb_sy();
}

/// Invalidates the data cache for `[addr, addr+len)`, rounded outward to
/// cache-line boundaries. Must be called before the CPU reads a descriptor
/// or buffer a DMA engine has just written, so stale cached data is not
/// observed.
pub fn invalidate_dcache_range(addr: VirtAddr, len: usize) {
    for line in cache_lines(addr, len) {
        unsafe { asm!("dc ivac, {0}", in(reg) line) };
    }
    dsb_sy();
}

fn cache_lines(addr: VirtAddr, len: usize) -> impl Iterator<Item = usize> {
    let start = addr.as_usize() & !(CACHE_LINE_SIZE - 1);
    let end = if len == 0 {
        start
    } else {
        (addr.as_usize() + len + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
    };
    (start..end).step_by(CACHE_LINE_SIZE)
}
