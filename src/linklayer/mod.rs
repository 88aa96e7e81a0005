//! 802.x frame engine: Ethernet-II/IEEE-802.3 receive demux and transmit
//! framing, grounded on `examples/original_source/IF/net_if_802x.c`'s
//! `NetIF_802x_Rx`/`NetIF_802x_Tx`.
//!
//! The link layer never allocates or frees a buffer itself — it only reads
//! and rewrites header fields on a buffer `BufferPool` already owns, and
//! hands a `NetBufHandle` onward to an upper-layer handler or a device.

use crate::bufpool::{BufError, BufferPool, BufferType, Flags, NetBufHandle, SubProtocol};
use crate::device::{DevError, LinkStatus, McFilter, TxDevice};
use crate::error::{Classify, ErrorClass};

/// Null (all-zero) hardware address.
const NULL_ADDR: [u8; 6] = [0; 6];
/// Broadcast hardware address.
const BROADCAST_ADDR: [u8; 6] = [0xFF; 6];

/// Ethernet-header length, also the minimum the IEEE 802.3 LLC/SNAP variant
/// folds into its own 22-octet total.
pub const PKT_SIZE_HDR: usize = 14;
/// Minimum frame size excluding CRC, as seen by software.
pub const PKT_SIZE_MIN: usize = crate::config::MIN_FRAME_SIZE;
/// Largest frame this layer will ever build or accept (1500-octet payload
/// plus the 14-octet Ethernet header, untagged).
pub const PKT_SIZE_MAX: usize = 1518;

const LLC_DSAP: u8 = 0xAA;
const LLC_SSAP: u8 = 0xAA;
const LLC_CTRL: u8 = 0x03;
const SNAP_OUI: [u8; 3] = [0x00, 0x00, 0x00];
const IEEE_802_HDR_LEN: usize = 22;
/// Minimum frame size including CRC; the IEEE 802.3 declared-length check is
/// only meaningful once a frame is at least this big (net_if_802x.c's guard
/// on the same comparison).
const MIN_CRC_INCLUSIVE: usize = 64;

/// Errors raised while parsing, classifying, or framing a buffer. All are
/// discard-and-count conditions at the interface boundary rather than
/// conditions the upper layers need to see (framing/addressing mistakes
/// are local to this layer).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("interface is administratively disabled")]
    InterfaceDisabled,
    #[error("frame length is below the 60-octet minimum")]
    InvalidLenFrame,
    #[error("destination address matches neither broadcast, a joined multicast group, nor this interface")]
    InvalidAddrDest,
    #[error("source address is null or broadcast")]
    InvalidAddrSrc,
    #[error("unrecognized Ethernet II type field")]
    InvalidEtherType,
    #[error("malformed IEEE 802.3 LLC/SNAP header")]
    InvalidSnapType,
    #[error("no upper-layer handler registered for this protocol")]
    InvalidProtocol,
    #[error("hardware address must be exactly 6 octets")]
    InvalidAddrLen,
    #[error("hardware address is null or broadcast")]
    InvalidAddr,
    #[error("buffer has no interface header space reserved for framing")]
    InvalidHandle,
    #[error("buffer pool rejected the request: {0}")]
    Buf(BufError),
    #[error("device rejected the transmit")]
    DeviceBusy,
    #[error("device reported a fault while transmitting")]
    DeviceFault,
}

impl Classify for LinkError {
    fn class(&self) -> ErrorClass {
        match self {
            LinkError::InterfaceDisabled
            | LinkError::InvalidLenFrame
            | LinkError::InvalidAddrDest
            | LinkError::InvalidAddrSrc
            | LinkError::InvalidEtherType
            | LinkError::InvalidSnapType
            | LinkError::InvalidProtocol => ErrorClass::ProtocolFraming,
            LinkError::InvalidAddrLen | LinkError::InvalidAddr => ErrorClass::Configuration,
            LinkError::InvalidHandle | LinkError::Buf(_) => ErrorClass::ResourceExhaustion,
            LinkError::DeviceBusy => ErrorClass::ResourceExhaustion,
            LinkError::DeviceFault => ErrorClass::Hardware,
        }
    }
}

/// The 16-bit Ethernet II type field / IEEE 802.3 SNAP protocol id space
/// this layer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: EtherType = EtherType(0x0800);
    pub const IPV6: EtherType = EtherType(0x86DD);
    pub const ARP: EtherType = EtherType(0x0806);
}

fn sub_protocol_for_ethertype(value: u16) -> Option<SubProtocol> {
    match value {
        0x0800 => Some(SubProtocol::Ipv4),
        0x86DD => Some(SubProtocol::Ipv6),
        0x0806 => Some(SubProtocol::Arp),
        _ => None,
    }
}

fn ethertype_for_sub_protocol(sub: SubProtocol) -> u16 {
    match sub {
        SubProtocol::Ipv4 => EtherType::IPV4.0,
        SubProtocol::Ipv6 => EtherType::IPV6.0,
        SubProtocol::Arp => EtherType::ARP.0,
    }
}

fn sub_protocol_index(sub: SubProtocol) -> usize {
    match sub {
        SubProtocol::Ipv4 => 0,
        SubProtocol::Ipv6 => 1,
        SubProtocol::Arp => 2,
    }
}

/// Protocol family tag for `LinkLayer::addr_multicast_protocol_to_hw`
/// (IPv4/IPv6 only — ARP has no multicast group of its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

/// Receives a classified, de-headered buffer handed to it by `LinkLayer::rx`.
/// Implementations live above this layer (ARP, IPv4, IPv6); none of them are
/// this crate's concern to implement, only the dispatch seam is.
pub trait UpperLayer {
    fn rx(&self, if_nbr: usize, handle: NetBufHandle, pool: &mut BufferPool) -> Result<(), LinkError>;
}

/// Resolves (or defers resolution of) a hardware destination address for a
/// buffer the link layer could not fully frame on its own — the IPv4 ARP
/// cache, or (by the same seam) an IPv6 neighbor cache.
pub trait AddrResolver {
    fn resolve_or_pend(&mut self, if_nbr: usize, handle: NetBufHandle, pool: &mut BufferPool) -> CacheOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The destination address is known; the buffer may be sent now.
    Resolved,
    /// Resolution is in flight. `resolve_or_pend` takes ownership of the
    /// buffer (queues it against the pending resolution) and the link layer
    /// must not touch it further.
    Pend,
}

/// What `LinkLayer::tx` did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Caller had already framed the buffer itself; handed to the device
    /// unchanged.
    Ready,
    /// Framed as a broadcast and handed to the device.
    Broadcast,
    /// Framed as a multicast (MAC computed in place) and handed to the
    /// device.
    Multicast,
    /// Resolution of the destination address is pending; the buffer is now
    /// owned by the `AddrResolver` and was not handed to the device.
    AddrPend,
}

/// Frame engine for one interface: validates and classifies received
/// frames, dispatches them to the registered upper-layer handler, and frames
/// outgoing buffers before handing them to the device.
pub struct LinkLayer {
    if_nbr: usize,
    enabled: bool,
    hw_addr: [u8; 6],
    link_up: bool,
    mtu: usize,
    dispatch: [Option<&'static dyn UpperLayer>; 3],
}

impl LinkLayer {
    pub fn new(if_nbr: usize, hw_addr: [u8; 6]) -> Self {
        Self {
            if_nbr,
            enabled: true,
            hw_addr,
            link_up: false,
            mtu: PKT_SIZE_MAX - PKT_SIZE_HDR,
            dispatch: [None; 3],
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Supplements `rx`'s "any received frame implies link up" rule: the
    /// source never reconsiders link state other than on Rx, which means
    /// it can never observe a link going down while no frames arrive. This
    /// hook lets a caller (typically a periodic watchdog task) ask the PHY
    /// directly and have that answer override the cached state in either
    /// direction — the Rx-implies-up behavior stays as-is; this is the
    /// supplementing mechanism for the other direction.
    pub fn link_state_poll(&mut self, device: &dyn LinkStatus, phy_addr: u8) -> Result<bool, LinkError> {
        let up = device.link_state_get(phy_addr).map_err(|_| LinkError::DeviceFault)?;
        self.link_up = up;
        Ok(up)
    }

    /// Registers the handler `rx` dispatches to for one sub-protocol.
    /// Populated once at setup; the dispatch table is fixed-size and
    /// never reallocated.
    pub fn register_upper(&mut self, sub: SubProtocol, handler: &'static dyn UpperLayer) {
        self.dispatch[sub_protocol_index(sub)] = Some(handler);
    }

    pub fn addr_hw_get(&self) -> [u8; 6] {
        self.hw_addr
    }

    pub fn addr_hw_set(&mut self, addr: [u8; 6]) -> Result<(), LinkError> {
        if addr == NULL_ADDR || addr == BROADCAST_ADDR {
            return Err(LinkError::InvalidAddr);
        }
        self.hw_addr = addr;
        Ok(())
    }

    /// Clamps `mtu` to what the smallest configured Tx pool block can carry,
    /// ("never advertise an MTU no Tx buffer can honor").
    pub fn mtu_set(&mut self, mtu: usize, pool: &BufferPool) -> Result<(), LinkError> {
        let usable = pool
            .smallest_tx_block_size()
            .ok_or(LinkError::Buf(BufError::PoolNotConfigured))?
            .saturating_sub(PKT_SIZE_HDR);
        self.mtu = mtu.min(usable).min(PKT_SIZE_MAX - PKT_SIZE_HDR);
        Ok(())
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Maps a protocol multicast address to its Ethernet hardware address:
    /// IPv4 224.0.0.0/4 maps to `01:00:5E` plus the low 23 bits of the
    /// address; IPv6 multicast maps to `33:33` plus the low 32 bits.
    /// Returns `None` for an address outside either family's multicast
    /// range.
    pub fn addr_multicast_protocol_to_hw(proto_addr: &[u8], family: AddrFamily) -> Option<[u8; 6]> {
        match family {
            AddrFamily::Ipv4 => {
                if proto_addr.len() != 4 || proto_addr[0] & 0xF0 != 0xE0 {
                    return None;
                }
                Some([0x01, 0x00, 0x5E, proto_addr[1] & 0x7F, proto_addr[2], proto_addr[3]])
            }
            AddrFamily::Ipv6 => {
                if proto_addr.len() != 16 {
                    return None;
                }
                Some([0x33, 0x33, proto_addr[12], proto_addr[13], proto_addr[14], proto_addr[15]])
            }
        }
    }

    /// Joins the hardware multicast group for `proto_addr`, delegating the
    /// actual hash-bucket bookkeeping to the device.
    pub fn addr_multicast_add(
        &self,
        device: &mut dyn McFilter,
        proto_addr: &[u8],
        family: AddrFamily,
    ) -> Result<(), LinkError> {
        let hw = Self::addr_multicast_protocol_to_hw(proto_addr, family).ok_or(LinkError::InvalidProtocol)?;
        device.addr_multicast_add(&hw);
        Ok(())
    }

    pub fn addr_multicast_remove(
        &self,
        device: &mut dyn McFilter,
        proto_addr: &[u8],
        family: AddrFamily,
    ) -> Result<(), LinkError> {
        let hw = Self::addr_multicast_protocol_to_hw(proto_addr, family).ok_or(LinkError::InvalidProtocol)?;
        device.addr_multicast_remove(&hw);
        Ok(())
    }

    /// Validates, classifies, and demultiplexes a received frame, then
    /// dispatches it to the registered upper-layer handler for its
    /// sub-protocol. See net_if_802x.c's `NetIF_802x_Rx` for the original
    /// step ordering this follows.
    pub fn rx(&mut self, handle: NetBufHandle, pool: &mut BufferPool) -> Result<(), LinkError> {
        if !self.enabled {
            return Err(LinkError::InterfaceDisabled);
        }
        // Any received frame — valid or not — means the physical link is up.
        self.link_up = true;

        let total_len = pool.buffer(handle).data_len;
        if total_len < PKT_SIZE_MIN {
            return Err(LinkError::InvalidLenFrame);
        }

        let (dst, src, third) = {
            let data = pool.buffer(handle).data();
            let mut dst = [0u8; 6];
            let mut src = [0u8; 6];
            dst.copy_from_slice(&data[0..6]);
            src.copy_from_slice(&data[6..12]);
            let third = u16::from_be_bytes([data[12], data[13]]);
            (dst, src, third)
        };

        let mut flags = Flags::empty();
        if dst == BROADCAST_ADDR {
            flags |= Flags::RX_BROADCAST;
        } else if dst[0] & 0x01 != 0 {
            flags |= Flags::RX_MULTICAST;
        } else if dst != self.hw_addr {
            return Err(LinkError::InvalidAddrDest);
        }

        if src == NULL_ADDR || src == BROADCAST_ADDR {
            return Err(LinkError::InvalidAddrSrc);
        }

        let (hdr_len, ethertype) = if third > 1500 {
            (PKT_SIZE_HDR, third)
        } else {
            if total_len < IEEE_802_HDR_LEN {
                return Err(LinkError::InvalidLenFrame);
            }
            let data = pool.buffer(handle).data();
            if data[14] != LLC_DSAP || data[15] != LLC_SSAP || data[16] != LLC_CTRL {
                return Err(LinkError::InvalidSnapType);
            }
            if data[17..20] != SNAP_OUI {
                return Err(LinkError::InvalidSnapType);
            }
            let snap_type = u16::from_be_bytes([data[20], data[21]]);
            // Declared 802.3 frame length (the "third" field) must equal
            // total_len - 14, but only once the frame is at least
            // CRC-inclusive-minimum sized (net_if_802x.c preserves this
            // guard verbatim rather than always enforcing it).
            if total_len + 4 >= MIN_CRC_INCLUSIVE && third as usize != total_len - PKT_SIZE_HDR {
                return Err(LinkError::InvalidLenFrame);
            }
            (IEEE_802_HDR_LEN, snap_type)
        };

        let sub_protocol = sub_protocol_for_ethertype(ethertype).ok_or_else(|| {
            if hdr_len == PKT_SIZE_HDR {
                LinkError::InvalidEtherType
            } else {
                LinkError::InvalidSnapType
            }
        })?;

        {
            let hdr = pool.buffer_mut(handle);
            hdr.protocol.if_idx = hdr_len as u16;
            hdr.protocol.if_len = hdr_len as u16;
            hdr.data_len -= hdr_len;
            hdr.protocol.sub_protocol = Some(sub_protocol);
            hdr.flags |= flags;
        }

        match self.dispatch[sub_protocol_index(sub_protocol)] {
            Some(handler) => handler.rx(self.if_nbr, handle, pool),
            None => Err(LinkError::InvalidProtocol),
        }
    }

    /// Frames an outgoing buffer and hands it to the device, or defers to
    /// `resolver` when the hardware destination is not yet known. Mirrors
    /// net_if_802x.c's `NetIF_802x_Tx`: broadcast and IPv6 multicast frame
    /// and send immediately; an address request or an IPv4 multicast defer
    /// to the address resolver, which may return the buffer to sender
    /// (`Resolved`) or take ownership of it pending resolution (`Pend`).
    pub fn tx(
        &self,
        handle: NetBufHandle,
        pool: &mut BufferPool,
        device: &mut dyn TxDevice,
        resolver: &mut dyn AddrResolver,
    ) -> Result<TxOutcome, LinkError> {
        // A buffer with no sub-protocol tag has nothing for us to compute a
        // frame type from: the caller must have already built the Ethernet
        // header itself (a forwarding path, or a raw-frame send).
        let preframed = pool.buffer(handle).protocol.sub_protocol.is_none();
        if preframed {
            self.submit(handle, pool, device)?;
            return Ok(TxOutcome::Ready);
        }

        let sub_protocol = pool.buffer(handle).protocol.sub_protocol.unwrap();
        let ethertype = ethertype_for_sub_protocol(sub_protocol);

        let if_idx = pool.buffer(handle).protocol.if_idx as usize;
        if if_idx < PKT_SIZE_HDR {
            return Err(LinkError::InvalidHandle);
        }
        let eth_off = if_idx - PKT_SIZE_HDR;

        {
            let hw_addr = self.hw_addr;
            let data = pool.buffer_mut(handle).data_mut();
            data[eth_off + 6..eth_off + 12].copy_from_slice(&hw_addr);
            data[eth_off + 12..eth_off + 14].copy_from_slice(&ethertype.to_be_bytes());
        }

        let flags = pool.buffer(handle).flags;
        let needs_resolution = if flags.contains(Flags::TX_BROADCAST) {
            let data = pool.buffer_mut(handle).data_mut();
            data[eth_off..eth_off + 6].copy_from_slice(&BROADCAST_ADDR);
            false
        } else if flags.contains(Flags::TX_MULTICAST) {
            match sub_protocol {
                SubProtocol::Ipv6 => {
                    let proto_ptr = pool.buffer(handle).addr_protocol_ptr.ok_or(LinkError::InvalidHandle)?;
                    let last4 = {
                        let data = pool.buffer(handle).data();
                        [data[proto_ptr + 12], data[proto_ptr + 13], data[proto_ptr + 14], data[proto_ptr + 15]]
                    };
                    let mac = [0x33, 0x33, last4[0], last4[1], last4[2], last4[3]];
                    pool.buffer_mut(handle).data_mut()[eth_off..eth_off + 6].copy_from_slice(&mac);
                    false
                }
                SubProtocol::Ipv4 => {
                    // Hardware-address slot for the ARP/multicast-translation
                    // helper to write into, in place, once it resolves.
                    pool.buffer_mut(handle).addr_hw_ptr = Some(eth_off);
                    true
                }
                SubProtocol::Arp => return Err(LinkError::InvalidProtocol),
            }
        } else {
            pool.buffer_mut(handle).addr_hw_ptr = Some(eth_off);
            true
        };

        {
            let hdr = pool.buffer_mut(handle);
            hdr.protocol.if_idx = eth_off as u16;
            hdr.protocol.if_len = PKT_SIZE_HDR as u16;
            hdr.data_len += PKT_SIZE_HDR;
        }

        if needs_resolution {
            return match resolver.resolve_or_pend(self.if_nbr, handle, pool) {
                CacheOutcome::Pend => Ok(TxOutcome::AddrPend),
                CacheOutcome::Resolved => {
                    self.pad_and_submit(handle, pool, device)?;
                    Ok(if flags.contains(Flags::TX_MULTICAST) {
                        TxOutcome::Multicast
                    } else {
                        TxOutcome::Ready
                    })
                }
            };
        }

        self.pad_and_submit(handle, pool, device)?;
        Ok(if flags.contains(Flags::TX_BROADCAST) {
            TxOutcome::Broadcast
        } else {
            TxOutcome::Multicast
        })
    }

    /// Pads a too-short frame up to `PKT_SIZE_MIN` (zeroing the pad unless
    /// `ClrMem` already guarantees the region is zero) and hands the region
    /// to the device.
    fn pad_and_submit(&self, handle: NetBufHandle, pool: &mut BufferPool, device: &mut dyn TxDevice) -> Result<(), LinkError> {
        let (flags, if_idx, data_len) = {
            let hdr = pool.buffer(handle);
            (hdr.flags, hdr.protocol.if_idx as usize, hdr.data_len)
        };
        if data_len < PKT_SIZE_MIN {
            if !flags.contains(Flags::CLR_MEM) {
                let data = pool.buffer_mut(handle).data_mut();
                for b in &mut data[if_idx + data_len..if_idx + PKT_SIZE_MIN] {
                    *b = 0;
                }
            }
            pool.buffer_mut(handle).data_len = PKT_SIZE_MIN;
        }
        self.submit(handle, pool, device)
    }

    fn submit(&self, handle: NetBufHandle, pool: &mut BufferPool, device: &mut dyn TxDevice) -> Result<(), LinkError> {
        let size = pool.buffer(handle).data_len;
        let region = pool.detach_for_tx(handle).ok_or(LinkError::InvalidHandle)?;
        match device.submit(region, size) {
            Ok(()) => Ok(()),
            Err(DevError::TxBusy) => Err(LinkError::DeviceBusy),
            Err(_) => Err(LinkError::DeviceFault),
        }
    }
}

/// Returns a completed Tx region to its pool by address, for the
/// transmit-deallocation task consuming `sync::DeallocEntry` values posted
/// from the driver's ISR.
pub fn free_tx_completion(pool: &mut BufferPool, buf_type: BufferType, data_addr: memory_addr::PhysAddr) {
    pool.free_data_region(buf_type, data_addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use crate::bufpool::Transaction;
    use crate::config::{DescriptorVariant, HwAddrCfg, InterfaceConfig, MacVariant};
    use memory_addr::PhysAddr;

    fn test_cfg() -> InterfaceConfig {
        InterfaceConfig {
            if_nbr: 0,
            rx_buf_large_count: 4,
            rx_buf_large_size: 1536,
            rx_buf_align_octets: 16,
            rx_buf_ix_offset: 0,
            tx_buf_large_count: 2,
            tx_buf_large_size: 1536,
            tx_buf_small_count: 2,
            tx_buf_small_size: 256,
            tx_buf_align_octets: 16,
            tx_buf_ix_offset: 0,
            rx_desc_count: 4,
            tx_desc_count: 2,
            base_addr: PhysAddr::from(0x4000_0000),
            mac_variant: MacVariant::Standard,
            descriptor_variant: DescriptorVariant::Basic,
            dedicated_mem: None,
            hw_addr: HwAddrCfg(None),
        }
    }

    struct RecordingUpper {
        seen: core::cell::RefCell<alloc::vec::Vec<(usize, u16, u16)>>,
    }

    impl UpperLayer for RecordingUpper {
        fn rx(&self, if_nbr: usize, handle: NetBufHandle, pool: &mut BufferPool) -> Result<(), LinkError> {
            let hdr = pool.buffer(handle);
            self.seen.borrow_mut().push((if_nbr, hdr.protocol.if_idx, hdr.protocol.if_len));
            Ok(())
        }
    }

    fn write_ethernet_ii_frame(pool: &mut BufferPool, handle: NetBufHandle, dst: [u8; 6], src: [u8; 6], ethertype: u16, payload_len: usize) {
        let hdr = pool.buffer_mut(handle);
        let total = PKT_SIZE_HDR + payload_len;
        hdr.data_len = total;
        let data = hdr.data_mut();
        data[0..6].copy_from_slice(&dst);
        data[6..12].copy_from_slice(&src);
        data[12..14].copy_from_slice(&ethertype.to_be_bytes());
    }

    #[test]
    fn broadcast_rx_dispatches_to_upper_layer() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        write_ethernet_ii_frame(&mut pool, handle, BROADCAST_ADDR, [0x02, 0, 0, 0, 0, 1], EtherType::ARP.0, 46);

        let upper = RecordingUpper { seen: core::cell::RefCell::new(alloc::vec::Vec::new()) };
        let upper: &'static RecordingUpper = Box::leak(alloc::boxed::Box::new(upper));
        let mut link = LinkLayer::new(0, [0xAA; 6]);
        link.register_upper(SubProtocol::Arp, upper);

        assert!(link.rx(handle, &mut pool).is_ok());
        assert!(link.link_up());
        assert_eq!(pool.buffer(handle).protocol.if_idx, PKT_SIZE_HDR as u16);
        assert!(pool.buffer(handle).flags.contains(Flags::RX_BROADCAST));
        assert_eq!(upper.seen.borrow().len(), 1);
    }

    #[test]
    fn unknown_ethertype_is_discarded() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        write_ethernet_ii_frame(&mut pool, handle, [0xAA; 6], [0x02, 0, 0, 0, 0, 1], 0x1234, 46);

        let mut link = LinkLayer::new(0, [0xAA; 6]);
        assert_eq!(link.rx(handle, &mut pool), Err(LinkError::InvalidEtherType));
    }

    #[test]
    fn short_frame_is_rejected_before_parsing() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        pool.buffer_mut(handle).data_len = 40;

        let mut link = LinkLayer::new(0, [0xAA; 6]);
        assert_eq!(link.rx(handle, &mut pool), Err(LinkError::InvalidLenFrame));
    }

    #[test]
    fn null_source_address_is_rejected() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        write_ethernet_ii_frame(&mut pool, handle, [0xAA; 6], NULL_ADDR, EtherType::IPV4.0, 46);

        let mut link = LinkLayer::new(0, [0xAA; 6]);
        assert_eq!(link.rx(handle, &mut pool), Err(LinkError::InvalidAddrSrc));
    }

    #[test]
    fn disabled_interface_rejects_before_touching_link_state() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        write_ethernet_ii_frame(&mut pool, handle, BROADCAST_ADDR, [0x02, 0, 0, 0, 0, 1], EtherType::IPV4.0, 46);

        let mut link = LinkLayer::new(0, [0xAA; 6]);
        link.set_enabled(false);
        assert_eq!(link.rx(handle, &mut pool), Err(LinkError::InterfaceDisabled));
        assert!(!link.link_up());
    }

    #[test]
    fn ieee_802_3_snap_frame_classifies_by_trailing_type() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let payload_len = 46;
        let hdr = pool.buffer_mut(handle);
        hdr.data_len = IEEE_802_HDR_LEN + payload_len;
        let data = hdr.data_mut();
        data[0..6].copy_from_slice(&[0xAA; 6]);
        data[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        let declared_len = (IEEE_802_HDR_LEN + payload_len - PKT_SIZE_HDR) as u16;
        data[12..14].copy_from_slice(&declared_len.to_be_bytes());
        data[14] = LLC_DSAP;
        data[15] = LLC_SSAP;
        data[16] = LLC_CTRL;
        data[17..20].copy_from_slice(&SNAP_OUI);
        data[20..22].copy_from_slice(&EtherType::IPV4.0.to_be_bytes());

        let upper = RecordingUpper { seen: core::cell::RefCell::new(alloc::vec::Vec::new()) };
        let upper: &'static RecordingUpper = Box::leak(alloc::boxed::Box::new(upper));
        let mut link = LinkLayer::new(0, [0xAA; 6]);
        link.register_upper(SubProtocol::Ipv4, upper);

        assert!(link.rx(handle, &mut pool).is_ok());
        assert_eq!(pool.buffer(handle).protocol.if_idx, IEEE_802_HDR_LEN as u16);
    }

    #[test]
    fn multicast_protocol_to_hw_ipv4_matches_well_known_mapping() {
        let mac = LinkLayer::addr_multicast_protocol_to_hw(&[224, 0, 0, 1], AddrFamily::Ipv4).unwrap();
        assert_eq!(mac, [0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn multicast_protocol_to_hw_ipv6_matches_well_known_mapping() {
        let addr = [0xFFu8, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01];
        let mac = LinkLayer::addr_multicast_protocol_to_hw(&addr, AddrFamily::Ipv6).unwrap();
        assert_eq!(mac, [0x33, 0x33, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn non_multicast_ipv4_address_is_rejected() {
        assert!(LinkLayer::addr_multicast_protocol_to_hw(&[10, 0, 0, 1], AddrFamily::Ipv4).is_none());
    }

    #[test]
    fn addr_hw_set_rejects_null_and_broadcast() {
        let mut link = LinkLayer::new(0, [0xAA; 6]);
        assert_eq!(link.addr_hw_set(NULL_ADDR), Err(LinkError::InvalidAddr));
        assert_eq!(link.addr_hw_set(BROADCAST_ADDR), Err(LinkError::InvalidAddr));
        assert!(link.addr_hw_set([1, 2, 3, 4, 5, 6]).is_ok());
        assert_eq!(link.addr_hw_get(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mtu_set_clamps_to_smallest_tx_pool() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let mut link = LinkLayer::new(0, [0xAA; 6]);
        link.mtu_set(10_000, &pool).unwrap();
        assert_eq!(link.mtu(), cfg.tx_buf_small_size - PKT_SIZE_HDR);
    }

    struct MockLinkStatus(bool);

    impl LinkStatus for MockLinkStatus {
        fn link_state_get(&self, _phy_addr: u8) -> Result<bool, DevError> {
            Ok(self.0)
        }
    }

    #[test]
    fn link_state_poll_can_bring_link_down_again() {
        let mut link = LinkLayer::new(0, [0xAA; 6]);
        let up = MockLinkStatus(true);
        assert_eq!(link.link_state_poll(&up, 0).unwrap(), true);
        assert!(link.link_up());

        let down = MockLinkStatus(false);
        assert_eq!(link.link_state_poll(&down, 0).unwrap(), false);
        assert!(!link.link_up());
    }

    #[derive(Default)]
    struct RecordingDevice {
        calls: alloc::vec::Vec<(usize, alloc::vec::Vec<u8>)>,
    }

    impl TxDevice for RecordingDevice {
        fn submit(&mut self, region: crate::bufpool::DataRegion, size: usize) -> Result<(), DevError> {
            let bytes = unsafe { core::slice::from_raw_parts(region.virt_addr.as_usize() as *const u8, size) }.to_vec();
            self.calls.push((size, bytes));
            Ok(())
        }
    }

    struct FixedResolver(CacheOutcome);

    impl AddrResolver for FixedResolver {
        fn resolve_or_pend(&mut self, _if_nbr: usize, _handle: NetBufHandle, _pool: &mut BufferPool) -> CacheOutcome {
            self.0
        }
    }

    /// Builds a Tx buffer already populated the way an upper layer would
    /// leave it before handing off to `LinkLayer::tx`: payload written
    /// starting at the reserved `PKT_SIZE_HDR`-octet header gap, `if_idx`
    /// marking that gap's end, `data_len` set to the payload length alone
    /// (tx() adds the header length back in once it frames the buffer).
    fn prep_tx_buffer(pool: &mut BufferPool, payload_len: usize, sub: SubProtocol, flags: Flags) -> NetBufHandle {
        let handle = pool.get(0, Transaction::Tx, payload_len, PKT_SIZE_HDR, flags).unwrap();
        let hdr = pool.buffer_mut(handle);
        hdr.protocol.sub_protocol = Some(sub);
        hdr.protocol.if_idx = PKT_SIZE_HDR as u16;
        hdr.data_len = payload_len;
        handle
    }

    #[test]
    fn tx_pads_short_frame_to_minimum_and_reports_broadcast() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let payload_len = 10;
        let handle = prep_tx_buffer(&mut pool, payload_len, SubProtocol::Ipv4, Flags::TX_BROADCAST);

        let link = LinkLayer::new(0, [0x02, 0, 0, 0, 0, 1]);
        let mut device = RecordingDevice::default();
        let mut resolver = FixedResolver(CacheOutcome::Resolved);

        let outcome = link.tx(handle, &mut pool, &mut device, &mut resolver).unwrap();
        assert_eq!(outcome, TxOutcome::Broadcast);

        assert_eq!(device.calls.len(), 1);
        let (size, bytes) = &device.calls[0];
        assert_eq!(*size, PKT_SIZE_MIN);
        assert_eq!(&bytes[0..6], &BROADCAST_ADDR);
        assert_eq!(&bytes[6..12], &[0x02, 0, 0, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([bytes[12], bytes[13]]), EtherType::IPV4.0);
        assert!(bytes[PKT_SIZE_HDR + payload_len..PKT_SIZE_MIN].iter().all(|&b| b == 0));
    }

    #[test]
    fn tx_preframed_buffer_is_submitted_directly_as_ready() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Tx, 64, 0, Flags::empty()).unwrap();
        pool.buffer_mut(handle).data_len = 64;

        let link = LinkLayer::new(0, [0x02, 0, 0, 0, 0, 1]);
        let mut device = RecordingDevice::default();
        let mut resolver = FixedResolver(CacheOutcome::Resolved);

        let outcome = link.tx(handle, &mut pool, &mut device, &mut resolver).unwrap();
        assert_eq!(outcome, TxOutcome::Ready);
        assert_eq!(device.calls.len(), 1);
        assert_eq!(device.calls[0].0, 64);
    }

    #[test]
    fn tx_unicast_request_resolved_reports_ready() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let payload_len = 46;
        let handle = prep_tx_buffer(&mut pool, payload_len, SubProtocol::Ipv4, Flags::empty());

        let link = LinkLayer::new(0, [0x02, 0, 0, 0, 0, 1]);
        let mut device = RecordingDevice::default();
        let mut resolver = FixedResolver(CacheOutcome::Resolved);

        let outcome = link.tx(handle, &mut pool, &mut device, &mut resolver).unwrap();
        assert_eq!(outcome, TxOutcome::Ready);
        assert_eq!(device.calls.len(), 1);
        assert_eq!(device.calls[0].0, PKT_SIZE_HDR + payload_len);
    }

    #[test]
    fn tx_unicast_request_pending_reports_addrpend_without_touching_device() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let payload_len = 46;
        let handle = prep_tx_buffer(&mut pool, payload_len, SubProtocol::Ipv4, Flags::empty());

        let link = LinkLayer::new(0, [0x02, 0, 0, 0, 0, 1]);
        let mut device = RecordingDevice::default();
        let mut resolver = FixedResolver(CacheOutcome::Pend);

        let outcome = link.tx(handle, &mut pool, &mut device, &mut resolver).unwrap();
        assert_eq!(outcome, TxOutcome::AddrPend);
        assert!(device.calls.is_empty());
    }

    #[test]
    fn tx_multicast_ipv4_resolved_reports_multicast() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let payload_len = 46;
        let handle = prep_tx_buffer(&mut pool, payload_len, SubProtocol::Ipv4, Flags::TX_MULTICAST);

        let link = LinkLayer::new(0, [0x02, 0, 0, 0, 0, 1]);
        let mut device = RecordingDevice::default();
        let mut resolver = FixedResolver(CacheOutcome::Resolved);

        let outcome = link.tx(handle, &mut pool, &mut device, &mut resolver).unwrap();
        assert_eq!(outcome, TxOutcome::Multicast);
        assert_eq!(device.calls.len(), 1);
        assert_eq!(device.calls[0].0, PKT_SIZE_HDR + payload_len);
    }
}
