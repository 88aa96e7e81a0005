//! DMA-descriptor Ethernet driver: ring ownership, ISR-to-worker
//! coordination, PHY/MII access, and multicast hash filtering.

pub mod descriptor;

use alloc::vec::Vec;
use core::ptr::{read_volatile, write_volatile};

use memory_addr::VirtAddr;

use crate::bufpool::{BufferPool, BufferType, DataRegion, Flags, NetBufHandle, Transaction};
use crate::config::{InterfaceConfig, MacVariant};
use crate::error::{Classify, ErrorClass};
use crate::hal::cpu::{clean_dcache_range, invalidate_dcache_range};
use crate::sync::{DeallocEntry, Notify};
use descriptor::{DescCtrl, DescStatus, DmaDescriptor};

/// Minimum Ethernet frame size excluding CRC, as seen by software.
const MIN_ETH_FRAME: u32 = 60;
const CRC_LEN: u32 = 4;

/// Errors raised by the device driver.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    #[error("invalid device configuration: {0}")]
    InvalidCfg(&'static str),
    #[error("timed out waiting for a register read to settle")]
    TimeoutRegRead,
    #[error("timed out waiting for a register write to settle")]
    TimeoutRegWrite,
    #[error("no free transmit descriptor")]
    TxBusy,
    #[error("current receive descriptor is still DMA-owned")]
    RxNotReady,
    #[error("DMA reported a fatal bus error")]
    FatalBusError,
}

impl Classify for DevError {
    fn class(&self) -> ErrorClass {
        match self {
            DevError::InvalidCfg(_) => ErrorClass::Configuration,
            DevError::TimeoutRegRead | DevError::TimeoutRegWrite | DevError::FatalBusError => {
                ErrorClass::Hardware
            }
            DevError::TxBusy | DevError::RxNotReady => ErrorClass::ResourceExhaustion,
        }
    }
}

/// Hardware bring-up hooks the driver consumes from the board support
/// package; none of these are this crate's concern to implement.
pub trait NetBsp {
    fn cfg_clk(&self, if_nbr: usize);
    fn cfg_interrupt_controller(&self, if_nbr: usize);
    fn cfg_gpio(&self, if_nbr: usize);
    fn clk_freq_get(&self, if_nbr: usize) -> u64;
}

/// Sink for completed-transmit data regions, posted from ISR-safe context.
/// `post` must never block; returning `false` means the queue was full and
/// the driver retries the post on the next interrupt rather than losing the
/// region.
pub trait TxDeallocSink {
    fn post(&mut self, entry: DeallocEntry) -> bool;
}

/// Submits a framed buffer for transmission. Implemented by `DeviceDriver`
/// over any descriptor shape, so the link layer can hold a `&mut dyn
/// TxDevice` without naming `D`.
pub trait TxDevice {
    fn submit(&mut self, region: DataRegion, size: usize) -> Result<(), DevError>;
}

impl<D: DmaDescriptor> TxDevice for DeviceDriver<D> {
    fn submit(&mut self, region: DataRegion, size: usize) -> Result<(), DevError> {
        self.tx(region, size)
    }
}

/// Joins/leaves a multicast hash bucket. Implemented by `DeviceDriver` over
/// any descriptor shape for the same reason as `TxDevice`.
pub trait McFilter {
    fn addr_multicast_add(&mut self, hw_addr: &[u8; 6]);
    fn addr_multicast_remove(&mut self, hw_addr: &[u8; 6]);
}

impl<D: DmaDescriptor> McFilter for DeviceDriver<D> {
    fn addr_multicast_add(&mut self, hw_addr: &[u8; 6]) {
        DeviceDriver::addr_multicast_add(self, hw_addr)
    }

    fn addr_multicast_remove(&mut self, hw_addr: &[u8; 6]) {
        DeviceDriver::addr_multicast_remove(self, hw_addr)
    }
}

/// Backs `io_ctrl`'s `GetLinkStateInfo` operation, which defers to the
/// PHY rather than tracking link state itself. Implemented by
/// `DeviceDriver` over any descriptor shape for the same reason as
/// `TxDevice`/`McFilter`, so `LinkLayer::link_state_poll` can hold one
/// without naming `D`.
pub trait LinkStatus {
    fn link_state_get(&self, phy_addr: u8) -> Result<bool, DevError>;
}

impl<D: DmaDescriptor> LinkStatus for DeviceDriver<D> {
    fn link_state_get(&self, phy_addr: u8) -> Result<bool, DevError> {
        DeviceDriver::link_state_get(self, phy_addr)
    }
}

/// Duplex setting for `io_ctrl`'s `SetLinkState` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Link speed in Mbps for `io_ctrl`'s `SetLinkState` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    M10,
    M100,
    M1000,
}

/// Six CSR-clock-range buckets mapped to MDC divide ratios, recovered
/// from `net_dev_gmac.c`.
pub fn mdio_clock_divisor(clk_hz: u64) -> u8 {
    match clk_hz {
        0..=35_000_000 => 0,
        35_000_001..=60_000_000 => 1,
        60_000_001..=100_000_000 => 2,
        100_000_001..=150_000_000 => 3,
        150_000_001..=250_000_000 => 4,
        _ => 5,
    }
}

/// Register offsets within the MAC block (Synopsys DesignWare GMAC
/// layout, matching `net_dev_gmac.c`'s register naming).
mod mac_reg {
    pub const CONFIG: usize = 0x0000;
    pub const FRAME_FILTER: usize = 0x0004;
    pub const HASH_TABLE_HIGH: usize = 0x0008;
    pub const HASH_TABLE_LOW: usize = 0x000C;
    pub const GMII_ADDR: usize = 0x0010;
    pub const GMII_DATA: usize = 0x0014;
    pub const FLOW_CONTROL: usize = 0x0018;
    pub const ADDR0_HIGH: usize = 0x0040;
    pub const ADDR0_LOW: usize = 0x0044;
}

/// Register offsets within the DMA block (relative to
/// `base + mac_variant.dma_reg_offset()`).
mod dma_reg {
    pub const BUS_MODE: usize = 0x00;
    pub const TX_POLL_DEMAND: usize = 0x04;
    pub const RX_POLL_DEMAND: usize = 0x08;
    pub const RX_DESC_LIST_ADDR: usize = 0x0C;
    pub const TX_DESC_LIST_ADDR: usize = 0x10;
    pub const STATUS: usize = 0x14;
    pub const OP_MODE: usize = 0x18;
    pub const INTERRUPT_ENABLE: usize = 0x1C;
}

mod mac_config_bits {
    pub const WATCHDOG_DISABLE: u32 = 1 << 23;
    pub const IFG_96BIT: u32 = 0; // 96-bit is encoded as 000 in the IFG field
    pub const FULL_DUPLEX: u32 = 1 << 11;
    pub const SPEED_100: u32 = 1 << 14;
    pub const BACK_OFF_10: u32 = 0; // 0b00 selects the standard 1-10 slot range
    pub const TX_ENABLE: u32 = 1 << 3;
    pub const RX_ENABLE: u32 = 1 << 2;
}

mod filter_bits {
    pub const HASH_UNICAST: u32 = 1 << 9;
    pub const HASH_MULTICAST: u32 = 1 << 2;
}

mod dma_op_bits {
    pub const STORE_FORWARD_TX: u32 = 1 << 21;
    pub const STORE_FORWARD_RX: u32 = 1 << 25;
    pub const START_TX: u32 = 1 << 13;
    pub const START_RX: u32 = 1 << 1;
    pub const FLUSH_TX_FIFO: u32 = 1 << 20;
}

/// Interrupt bits in the DMA status/enable registers, named by the union
/// `start()` enables.
mod dma_int_bits {
    pub const RX_DONE: u32 = 1 << 6;
    pub const TX_DONE: u32 = 1 << 0;
    pub const RX_FIFO_OVERFLOW: u32 = 1 << 4;
    pub const RX_BUFFER_UNAVAIL: u32 = 1 << 7;
    pub const RX_PROCESS_STOPPED: u32 = 1 << 8;
    pub const FATAL_BUS_ERROR: u32 = 1 << 13;
    pub const NORMAL_SUMMARY: u32 = 1 << 16;
    pub const ABNORMAL_SUMMARY: u32 = 1 << 15;

    pub const RX_WAKE_MASK: u32 = RX_DONE | RX_FIFO_OVERFLOW | RX_BUFFER_UNAVAIL | RX_PROCESS_STOPPED;
}

struct Mmio {
    base: VirtAddr,
}

impl Mmio {
    fn read32(&self, offset: usize) -> u32 {
        unsafe { read_volatile((self.base.as_usize() + offset) as *const u32) }
    }

    fn write32(&self, offset: usize, val: u32) {
        unsafe { write_volatile((self.base.as_usize() + offset) as *mut u32, val) }
    }
}

/// Standard 32-bit reflected Ethernet CRC, used both by the multicast hash
/// filter, and required to be its own inverse when reflection is applied
/// twice.
fn ethernet_crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// The bounded busy-wait loop count used for reset and MII-access timeouts.
/// Each iteration sleeps `POLL_STEP_US`, so this is (very roughly) a
/// 200ms ceiling.
const POLL_ITERATIONS: u32 = 2000;
const POLL_STEP_US: u32 = 100;

fn busy_wait_us(_us: u32) {
    for _ in 0..100 {
        core::hint::spin_loop();
    }
}

/// Owns the descriptor rings and MMIO register block for one interface.
/// Generic over the descriptor shape (`descriptor::BasicDescriptor` or
/// `descriptor::ExtendedDescriptor`); the register-map family
/// (`MacVariant`) is a runtime field since, unlike the descriptor layout,
/// two otherwise-identical boards can differ only in that one offset.
pub struct DeviceDriver<D: DmaDescriptor> {
    mmio: Mmio,
    mac_variant: MacVariant,
    rx_ring: Vec<D>,
    tx_ring: Vec<D>,
    /// Which typed pool each live Tx descriptor's buffer was drawn from,
    /// since a descriptor's region may be `TxSmall` or `TxLarge` depending
    /// on what `LinkLayer::tx` handed it. `None` for a descriptor that has
    /// never carried a buffer.
    tx_buf_type: Vec<Option<BufferType>>,
    current_rx: usize,
    current_tx: usize,
    completion_tx: usize,
    avail_tx: usize,
    tx_desc_count: usize,
    rx_buf_size: usize,
    mac_addr: [u8; 6],
    mc_hash_refcount: [u16; 64],
    pub rx_notify: Notify,
    fatal_bus_errors: usize,
}

impl<D: DmaDescriptor> DeviceDriver<D> {
    fn dma_read(&self, offset: usize) -> u32 {
        self.mmio.read32(self.mac_variant.dma_reg_offset() + offset)
    }

    fn dma_write(&self, offset: usize, val: u32) {
        self.mmio.write32(self.mac_variant.dma_reg_offset() + offset, val)
    }

    /// Validates config, resets the MAC, configures the MII clock divider,
    /// MAC-control bits, Rx filter, and DMA mode. Does not allocate
    /// descriptor rings yet (that happens in `start`).
    pub fn init(
        cfg: &InterfaceConfig,
        bsp: &dyn NetBsp,
        base: VirtAddr,
    ) -> Result<Self, DevError> {
        cfg.validate_device()?;
        bsp.cfg_clk(cfg.if_nbr);
        bsp.cfg_gpio(cfg.if_nbr);
        bsp.cfg_interrupt_controller(cfg.if_nbr);

        let mmio = Mmio { base };
        log::info!("[NET] Initializing interface {} at {:#x}", cfg.if_nbr, base.as_usize());

        // Soft-reset: the reset bit here is modeled on the DMA bus-mode
        // register's SWR bit, polled with a bounded timeout.
        mmio.write32(0, 1);
        let mut reset_ok = false;
        for _ in 0..POLL_ITERATIONS {
            if mmio.read32(0) & 1 == 0 {
                reset_ok = true;
                break;
            }
            busy_wait_us(POLL_STEP_US);
        }
        if !reset_ok {
            log::warn!("[NET] interface {} did not come out of soft reset", cfg.if_nbr);
            return Err(DevError::TimeoutRegWrite);
        }

        let clk = bsp.clk_freq_get(cfg.if_nbr);
        let divisor = mdio_clock_divisor(clk);
        mmio.write32(mac_reg::GMII_ADDR, (divisor as u32) << 2);

        let mac_config = mac_config_bits::WATCHDOG_DISABLE
            | mac_config_bits::IFG_96BIT
            | mac_config_bits::SPEED_100
            | mac_config_bits::FULL_DUPLEX
            | mac_config_bits::BACK_OFF_10;
        mmio.write32(mac_reg::CONFIG, mac_config);

        mmio.write32(
            mac_reg::FRAME_FILTER,
            filter_bits::HASH_UNICAST | filter_bits::HASH_MULTICAST,
        );

        // Disable pause-frame auto-generation.
        mmio.write32(mac_reg::FLOW_CONTROL, 0);

        let mut driver = Self {
            mmio,
            mac_variant: cfg.mac_variant,
            rx_ring: Vec::new(),
            tx_ring: Vec::new(),
            tx_buf_type: Vec::new(),
            current_rx: 0,
            current_tx: 0,
            completion_tx: 0,
            avail_tx: cfg.tx_desc_count,
            tx_desc_count: cfg.tx_desc_count,
            rx_buf_size: cfg.rx_buf_large_size,
            mac_addr: [0; 6],
            mc_hash_refcount: [0; 64],
            rx_notify: Notify::new(),
            fatal_bus_errors: 0,
        };

        let op_mode = dma_op_bits::STORE_FORWARD_TX | dma_op_bits::STORE_FORWARD_RX;
        driver.dma_write(dma_reg::OP_MODE, op_mode);

        Ok(driver)
    }

    pub fn fatal_bus_errors(&self) -> usize {
        self.fatal_bus_errors
    }

    pub fn available_tx_desc(&self) -> usize {
        self.avail_tx
    }

    pub fn outstanding_tx_desc(&self) -> usize {
        self.tx_desc_count - self.avail_tx
    }

    /// Determines the MAC address by precedence {explicit config string →
    /// administratively set → device autoloaded}, writes it into the
    /// address registers, builds the descriptor rings, enables MAC/DMA
    /// Tx/Rx, and unmasks the full interrupt set this driver relies on.
    pub fn start(
        &mut self,
        hw_addr_string: Option<[u8; 6]>,
        hw_addr_admin: Option<[u8; 6]>,
        pool: &mut BufferPool,
        make_descriptor: impl Fn() -> D,
        rx_count: usize,
    ) -> Result<(), DevError> {
        self.mac_addr = hw_addr_string
            .or(hw_addr_admin)
            .unwrap_or_else(|| self.read_autoloaded_mac_address());

        let lo = u32::from_le_bytes([
            self.mac_addr[0],
            self.mac_addr[1],
            self.mac_addr[2],
            self.mac_addr[3],
        ]);
        let hi = u16::from_le_bytes([self.mac_addr[4], self.mac_addr[5]]);
        self.mmio.write32(mac_reg::ADDR0_LOW, lo);
        self.mmio.write32(mac_reg::ADDR0_HIGH, hi as u32);

        self.rx_ring = (0..rx_count).map(|_| make_descriptor()).collect();
        self.tx_ring = (0..self.tx_desc_count).map(|_| make_descriptor()).collect();
        self.tx_buf_type = alloc::vec![None; self.tx_desc_count];

        for slot in self.rx_ring.iter_mut() {
            let region = pool
                .get_data_ptr(0, Transaction::Rx, self.rx_buf_size, 0)
                .map_err(|_| DevError::InvalidCfg("no rx regions available at start"))?;
            slot.set_buf_addr(region.phys_addr);
            slot.set_len_ctrl(region.size as u32, DescCtrl::CHAINED);
            slot.give_to_dma();
        }
        self.current_rx = 0;
        self.current_tx = 0;
        self.completion_tx = 0;
        self.avail_tx = self.tx_desc_count;

        // Rings are laid out contiguously as one allocation each; the DMA
        // engine walks them starting from the address programmed here
        // (physical and virtual coincide for memory drawn from the global
        // allocator).
        self.dma_write(dma_reg::RX_DESC_LIST_ADDR, self.rx_ring.as_ptr() as u32);
        self.dma_write(dma_reg::TX_DESC_LIST_ADDR, self.tx_ring.as_ptr() as u32);

        let mac_config = self.mmio.read32(mac_reg::CONFIG);
        self.mmio.write32(
            mac_reg::CONFIG,
            mac_config | mac_config_bits::TX_ENABLE | mac_config_bits::RX_ENABLE,
        );

        let op_mode = self.dma_read(dma_reg::OP_MODE);
        self.dma_write(
            dma_reg::OP_MODE,
            op_mode | dma_op_bits::START_TX | dma_op_bits::START_RX | dma_op_bits::FLUSH_TX_FIFO,
        );

        let int_mask = dma_int_bits::RX_DONE
            | dma_int_bits::TX_DONE
            | dma_int_bits::RX_FIFO_OVERFLOW
            | dma_int_bits::RX_BUFFER_UNAVAIL
            | dma_int_bits::RX_PROCESS_STOPPED
            | dma_int_bits::FATAL_BUS_ERROR
            | dma_int_bits::NORMAL_SUMMARY
            | dma_int_bits::ABNORMAL_SUMMARY;
        self.dma_write(dma_reg::INTERRUPT_ENABLE, int_mask);

        Ok(())
    }

    fn read_autoloaded_mac_address(&self) -> [u8; 6] {
        let lo = self.mmio.read32(mac_reg::ADDR0_LOW);
        let hi = self.mmio.read32(mac_reg::ADDR0_HIGH);
        let lo = lo.to_le_bytes();
        let hi = (hi as u16).to_le_bytes();
        [lo[0], lo[1], lo[2], lo[3], hi[0], hi[1]]
    }

    /// Disables Tx then Rx (flushing the Tx FIFO between), disables DMA,
    /// masks interrupts, and releases every outstanding descriptor's
    /// buffer regardless of transmission state.
    pub fn stop(&mut self, pool: &mut BufferPool, dealloc: &mut dyn TxDeallocSink, if_nbr: usize) {
        log::info!("[NET] Stopping interface {}", if_nbr);
        let mac_config = self.mmio.read32(mac_reg::CONFIG);
        self.mmio
            .write32(mac_reg::CONFIG, mac_config & !mac_config_bits::TX_ENABLE);
        let op_mode = self.dma_read(dma_reg::OP_MODE);
        self.dma_write(dma_reg::OP_MODE, op_mode | dma_op_bits::FLUSH_TX_FIFO);
        let mac_config = self.mmio.read32(mac_reg::CONFIG);
        self.mmio
            .write32(mac_reg::CONFIG, mac_config & !mac_config_bits::RX_ENABLE);

        self.dma_write(dma_reg::OP_MODE, 0);
        self.dma_write(dma_reg::INTERRUPT_ENABLE, 0);
        self.dma_write(dma_reg::STATUS, u32::MAX);

        for (desc, buf_type) in self.tx_ring.iter().zip(self.tx_buf_type.iter()) {
            let addr = desc.buf_addr();
            if let Some(buf_type) = buf_type {
                let _ = dealloc.post(DeallocEntry {
                    if_nbr,
                    buf_type: *buf_type,
                    data_addr: addr.as_usize(),
                });
            }
        }
        for desc in self.rx_ring.iter() {
            pool.reclaim_rx_region(desc.buf_addr());
        }
        self.rx_ring.clear();
        self.tx_ring.clear();
        self.tx_buf_type.clear();
    }

    /// Called by the Rx worker for each signal.
    /// Always installs a fresh replacement buffer and re-arms the current
    /// descriptor, whether or not the completed frame is usable; only the
    /// disposition of the old region (wrapped into a handle, or silently
    /// reclaimed) depends on its validity.
    pub fn rx(&mut self, pool: &mut BufferPool) -> Result<NetBufHandle, DevError> {
        let idx = self.current_rx;
        if self.rx_ring[idx].is_dma_owned() {
            self.rx_enable_interrupts();
            return Err(DevError::RxNotReady);
        }

        let desc = &self.rx_ring[idx];
        let frame_len = desc.frame_len();
        let errored = desc.status().contains(DescStatus::ES) || frame_len < MIN_ETH_FRAME + CRC_LEN;
        let old_phys = desc.buf_addr();

        let replacement = pool
            .get_data_ptr(0, Transaction::Rx, self.rx_buf_size, 0)
            .map_err(|_| DevError::RxNotReady)?;

        // The DMA engine wrote this region directly; invalidate the data
        // cache over it before the CPU (or the link layer, right after)
        // reads a single byte, or it may observe stale pre-DMA contents.
        invalidate_dcache_range(VirtAddr::from(old_phys.as_usize()), self.rx_buf_size);

        let result = if errored {
            pool.reclaim_rx_region(old_phys);
            Err(DevError::RxNotReady)
        } else {
            pool.wrap_rx_region(
                0,
                old_phys,
                VirtAddr::from(old_phys.as_usize()),
                (frame_len - CRC_LEN) as usize,
                Flags::empty(),
            )
            .map_err(|_| DevError::RxNotReady)
        };

        let desc = &mut self.rx_ring[idx];
        desc.set_buf_addr(replacement.phys_addr);
        desc.set_len_ctrl(replacement.size as u32, DescCtrl::CHAINED);
        desc.give_to_dma();

        self.dma_write(dma_reg::RX_POLL_DEMAND, 1);
        self.advance_rx();

        if !self.rx_ring[self.current_rx].is_dma_owned() {
            self.rx_notify.signal();
        } else {
            self.rx_enable_interrupts();
        }

        result
    }

    fn advance_rx(&mut self) {
        self.current_rx = (self.current_rx + 1) % self.rx_ring.len();
    }

    fn rx_enable_interrupts(&self) {
        let mask = self.dma_read(dma_reg::INTERRUPT_ENABLE);
        self.dma_write(dma_reg::INTERRUPT_ENABLE, mask | dma_int_bits::RX_WAKE_MASK);
    }

    /// Places `region` into the next free Tx descriptor. Returns `TxBusy`
    /// if the current descriptor is still DMA-owned, or if every
    /// descriptor is already accounted as outstanding (guards the
    /// `usize` decrement below against underflow should the available
    /// count and the ring's actual ownership bits ever disagree).
    pub fn tx(&mut self, region: DataRegion, size: usize) -> Result<(), DevError> {
        let idx = self.current_tx;
        if self.avail_tx == 0 || self.tx_ring[idx].is_dma_owned() {
            return Err(DevError::TxBusy);
        }

        self.avail_tx -= 1;
        self.tx_buf_type[idx] = Some(region.buf_type);

        let desc = &mut self.tx_ring[idx];
        desc.set_buf_addr(region.phys_addr);
        let ctrl = DescCtrl::CHAINED
            | DescCtrl::FIRST_SEG
            | DescCtrl::LAST_SEG
            | DescCtrl::INTERRUPT;
        desc.set_len_ctrl(size as u32, ctrl);

        // The CPU just wrote the frame into this region; flush it out of
        // the data cache before DMA is told to own it, or the engine may
        // read stale memory.
        clean_dcache_range(VirtAddr::from(region.phys_addr.as_usize()), size);

        desc.give_to_dma();
        self.current_tx = (idx + 1) % self.tx_ring.len();

        self.dma_write(dma_reg::STATUS, dma_int_bits::TX_DONE);
        self.dma_write(dma_reg::TX_POLL_DEMAND, 1);
        Ok(())
    }

    /// Clears the active interrupt sources and runs the per-source handling
    /// an interrupt can raise.
    pub fn isr(&mut self, dealloc: &mut dyn TxDeallocSink, if_nbr: usize) {
        let status = self.dma_read(dma_reg::STATUS);
        self.dma_write(dma_reg::STATUS, status);

        if status & dma_int_bits::FATAL_BUS_ERROR != 0 {
            self.fatal_bus_errors += 1;
            log::warn!("[NET] fatal DMA bus error, status={:#x}", status);
        }

        if status & dma_int_bits::TX_DONE != 0 {
            let mut idx = self.completion_tx;
            // Drive termination off the outstanding count, not `idx !=
            // self.current_tx`: on a fully-submitted ring completion_tx
            // and current_tx coincide even though every descriptor still
            // wants reclaiming, and that index comparison would stop the
            // loop before it walks a single entry.
            let mut outstanding = self.outstanding_tx_desc();
            while outstanding > 0 {
                let owned = self.tx_ring[idx].is_dma_owned();
                if owned {
                    break;
                }
                self.avail_tx += 1;
                outstanding -= 1;
                let addr = self.tx_ring[idx].buf_addr();
                if let Some(buf_type) = self.tx_buf_type[idx].take() {
                    let _ = dealloc.post(DeallocEntry {
                        if_nbr,
                        buf_type,
                        data_addr: addr.as_usize(),
                    });
                }
                idx = (idx + 1) % self.tx_ring.len();
            }
            self.completion_tx = idx;
        }

        if status & dma_int_bits::RX_WAKE_MASK != 0 {
            let mask = self.dma_read(dma_reg::INTERRUPT_ENABLE);
            self.dma_write(dma_reg::INTERRUPT_ENABLE, mask & !dma_int_bits::RX_WAKE_MASK);
            if !self.rx_notify.signal() {
                self.rx_enable_interrupts();
            }
        }

        let mask = self.dma_read(dma_reg::INTERRUPT_ENABLE);
        self.dma_write(
            dma_reg::INTERRUPT_ENABLE,
            mask | dma_int_bits::NORMAL_SUMMARY | dma_int_bits::ABNORMAL_SUMMARY,
        );
    }

    fn hash_index(hw_addr: &[u8; 6]) -> usize {
        (ethernet_crc32(hw_addr) >> 26) as usize
    }

    /// Adds one reference to `hw_addr`'s hash bucket; sets the hardware bit
    /// only on the 0→1 transition so multiple addresses can share a bucket.
    pub fn addr_multicast_add(&mut self, hw_addr: &[u8; 6]) {
        let index = Self::hash_index(hw_addr);
        self.mc_hash_refcount[index] += 1;
        if self.mc_hash_refcount[index] == 1 {
            self.set_hash_bit(index, true);
        }
    }

    /// Removes one reference; clears the hardware bit only on the 1→0
    /// transition.
    pub fn addr_multicast_remove(&mut self, hw_addr: &[u8; 6]) {
        let index = Self::hash_index(hw_addr);
        if self.mc_hash_refcount[index] == 0 {
            return;
        }
        self.mc_hash_refcount[index] -= 1;
        if self.mc_hash_refcount[index] == 0 {
            self.set_hash_bit(index, false);
        }
    }

    fn set_hash_bit(&self, index: usize, set: bool) {
        let (reg, bit) = if index & 0x20 != 0 {
            (mac_reg::HASH_TABLE_HIGH, index & 0x1F)
        } else {
            (mac_reg::HASH_TABLE_LOW, index & 0x1F)
        };
        let mut val = self.mmio.read32(reg);
        if set {
            val |= 1 << bit;
        } else {
            val &= !(1 << bit);
        }
        self.mmio.write32(reg, val);
    }

    /// `io_ctrl`'s `GetLinkStateInfo` operation: reads the PHY's Basic
    /// Status Register (MII register 1) and reports its link-status bit
    /// (bit 2), rather than tracking link state in the MAC driver itself.
    pub fn link_state_get(&self, phy_addr: u8) -> Result<bool, DevError> {
        const PHY_BMSR: u8 = 1;
        const BMSR_LINK_STATUS: u16 = 1 << 2;
        let bmsr = self.mii_read(phy_addr, PHY_BMSR)?;
        Ok(bmsr & BMSR_LINK_STATUS != 0)
    }

    pub fn set_link_state(&mut self, duplex: Duplex, speed: Speed) {
        let mut config = self.mmio.read32(mac_reg::CONFIG);
        config &= !(mac_config_bits::FULL_DUPLEX | mac_config_bits::SPEED_100);
        if duplex == Duplex::Full {
            config |= mac_config_bits::FULL_DUPLEX;
        }
        if matches!(speed, Speed::M100 | Speed::M1000) {
            config |= mac_config_bits::SPEED_100;
        }
        self.mmio.write32(mac_reg::CONFIG, config);
    }

    /// Composes the MII-address register, preserving the clock-divisor
    /// bits, polling the busy bit with a bounded timeout.
    pub fn mii_read(&self, phy_addr: u8, reg_addr: u8) -> Result<u16, DevError> {
        let existing = self.mmio.read32(mac_reg::GMII_ADDR);
        let divisor_bits = existing & 0b11100;
        let request = ((phy_addr as u32) << 11) | ((reg_addr as u32) << 6) | divisor_bits | 1;
        self.mmio.write32(mac_reg::GMII_ADDR, request);
        for _ in 0..POLL_ITERATIONS {
            if self.mmio.read32(mac_reg::GMII_ADDR) & 1 == 0 {
                return Ok((self.mmio.read32(mac_reg::GMII_DATA) & 0xFFFF) as u16);
            }
            busy_wait_us(POLL_STEP_US);
        }
        Err(DevError::TimeoutRegRead)
    }

    pub fn mii_write(&self, phy_addr: u8, reg_addr: u8, value: u16) -> Result<(), DevError> {
        let existing = self.mmio.read32(mac_reg::GMII_ADDR);
        let divisor_bits = existing & 0b11100;
        self.mmio.write32(mac_reg::GMII_DATA, value as u32);
        let request = ((phy_addr as u32) << 11) | ((reg_addr as u32) << 6) | divisor_bits | 1 | 2;
        self.mmio.write32(mac_reg::GMII_ADDR, request);
        for _ in 0..POLL_ITERATIONS {
            if self.mmio.read32(mac_reg::GMII_ADDR) & 1 == 0 {
                return Ok(());
            }
            busy_wait_us(POLL_STEP_US);
        }
        Err(DevError::TimeoutRegWrite)
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.mac_addr
    }
}
