//! Per-interface configuration: pool sizing, descriptor counts, and the
//! register-map/MAC variant selected at init. None of these are
//! reconfigurable once an interface has started.

use memory_addr::PhysAddr;

/// Minimum Ethernet frame size excluding the 4-octet CRC, as seen by
/// software (see `linklayer::PKT_SIZE_MIN`).
pub const MIN_FRAME_SIZE: usize = 60;

/// Selects the MAC register-map family. Two families are known to exist in
/// the field; everything else about the driver is identical between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacVariant {
    /// `dma_reg_offset = 0x0C00`.
    Compact,
    /// `dma_reg_offset = 0x1000` (default).
    Standard,
}

impl MacVariant {
    /// Offset of the DMA register block from the MAC base address.
    pub const fn dma_reg_offset(self) -> usize {
        match self {
            MacVariant::Compact => 0x0C00,
            MacVariant::Standard => 0x1000,
        }
    }
}

impl Default for MacVariant {
    fn default() -> Self {
        MacVariant::Standard
    }
}

/// Selects the DMA descriptor layout. Chosen once at driver construction
/// (`DeviceDriver<D, M>`'s `D` type parameter); the two shapes are never
/// mixed on one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorVariant {
    Basic,
    ExtendedTimestamp,
}

/// A 6-octet colon-hex hardware address, or "unset" meaning defer to the
/// administrative-set or device-autoloaded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwAddrCfg(pub Option<[u8; 6]>);

/// All configuration accepted by `BufferPool::pool_init` and
/// `DeviceDriver::init` for one interface. Supplied once at init; there is
/// no runtime reconfiguration of any of these fields.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub if_nbr: usize,

    pub rx_buf_large_count: usize,
    pub rx_buf_large_size: usize,
    pub rx_buf_align_octets: usize,
    pub rx_buf_ix_offset: usize,

    pub tx_buf_large_count: usize,
    pub tx_buf_large_size: usize,
    pub tx_buf_small_count: usize,
    pub tx_buf_small_size: usize,
    pub tx_buf_align_octets: usize,
    pub tx_buf_ix_offset: usize,

    pub rx_desc_count: usize,
    pub tx_desc_count: usize,

    pub base_addr: PhysAddr,
    pub mac_variant: MacVariant,
    pub descriptor_variant: DescriptorVariant,

    /// When present, descriptor rings and data regions are carved from this
    /// dedicated region instead of drawn from a system allocator.
    pub dedicated_mem: Option<(PhysAddr, usize)>,

    pub hw_addr: HwAddrCfg,
}

impl InterfaceConfig {
    /// Config-validation preconditions a device `init` must hold:
    /// descriptor counts `>= 2`, alignment `>= 16`, receive buffer size a
    /// multiple of 16.
    pub fn validate_device(&self) -> Result<(), crate::device::DevError> {
        use crate::device::DevError;
        if self.rx_desc_count < 2 || self.tx_desc_count < 2 {
            return Err(DevError::InvalidCfg("descriptor count below minimum of 2"));
        }
        if self.rx_buf_align_octets < 16 || self.tx_buf_align_octets < 16 {
            return Err(DevError::InvalidCfg("alignment below minimum of 16"));
        }
        if self.rx_buf_large_size % 16 != 0 {
            return Err(DevError::InvalidCfg("rx buffer size not a multiple of 16"));
        }
        Ok(())
    }

    /// Rejection conditions a pool `pool_init` must hold: minimum
    /// frame size, small-vs-large ordering, and nonzero receive/transmit
    /// counts.
    pub fn validate_pool(&self) -> Result<(), crate::bufpool::PoolError> {
        use crate::bufpool::PoolError;
        if self.rx_buf_large_size < MIN_FRAME_SIZE {
            return Err(PoolError::BlockTooSmall);
        }
        if self.tx_buf_small_count > 0 && self.tx_buf_small_size < MIN_FRAME_SIZE {
            return Err(PoolError::BlockTooSmall);
        }
        if self.tx_buf_small_count > 0
            && self.tx_buf_large_count > 0
            && self.tx_buf_small_size > self.tx_buf_large_size
        {
            return Err(PoolError::SmallExceedsLarge);
        }
        if self.rx_buf_large_count < 1 {
            return Err(PoolError::ZeroRxCount);
        }
        if self.tx_buf_large_count + self.tx_buf_small_count < 1 {
            return Err(PoolError::ZeroTxCount);
        }
        Ok(())
    }
}
