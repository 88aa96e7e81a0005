//! Bounded, preallocated `NetBuffer` pool.
//!
//! Every pool (header arena, `RxLarge`, `TxLarge`, `TxSmall` data regions) is
//! sized once at `pool_init` and never grows; `get`/`free` only move blocks
//! between an in-use and a free state. List membership is index-linked
//! rather than pointer-linked because the arena is one contiguous,
//! preallocated `Vec` whose nodes have no stable address of their own.

pub mod list;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use memory_addr::{PhysAddr, VirtAddr};

use crate::config::InterfaceConfig;
use crate::error::{Classify, ErrorClass};
use list::{ListKind, ListLinks};

bitflags! {
    /// Per-buffer status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const USED          = 1 << 0;
        const CLR_MEM       = 1 << 1;
        const RX_BROADCAST  = 1 << 2;
        const RX_MULTICAST  = 1 << 3;
        const TX_BROADCAST  = 1 << 4;
        const TX_MULTICAST  = 1 << 5;
    }
}

/// Which typed data-region pool a buffer's region is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    RxLarge,
    TxLarge,
    TxSmall,
}

/// Direction of a `get` request, used to pick the size-selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    Rx,
    Tx,
}

/// The link-layer sub-protocol a buffer carries, set by `LinkLayer::rx`
/// before dispatch and read back by `LinkLayer::tx` to compute the
/// Ethernet frame type for a buffer the link layer itself is framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubProtocol {
    Ipv4,
    Ipv6,
    Arp,
}

/// Byte offsets into a buffer's data region marking where each protocol
/// header begins, plus the overall and per-protocol lengths. `None` means
/// "not present in this buffer".
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolIndices {
    pub if_idx: u16,
    pub if_len: u16,
    pub sub_protocol: Option<SubProtocol>,
    pub arp_idx: Option<u16>,
    pub ip_idx: Option<u16>,
    pub icmp_idx: Option<u16>,
    pub igmp_idx: Option<u16>,
    pub transport_idx: Option<u16>,
    pub total_len: u16,
}

/// Opaque handle to a live `NetBuffer` header. The only way callers
/// reference a buffer; indices are not reused while `ref_count > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetBufHandle(pub u32);

/// A callback invoked exactly once when a buffer's refcount reaches zero,
/// to detach it from a secondary queue with custom semantics. `token` is an
/// opaque value meaningful only to the registering layer (e.g. a queue id),
/// carried because this crate has no trait-object allocator to spare for a
/// boxed closure per buffer.
#[derive(Debug, Clone, Copy)]
pub struct UnlinkHook {
    pub func: fn(NetBufHandle, usize),
    pub token: usize,
}

/// The central transport unit. Owns exactly one data region drawn from a
/// typed pool for as long as `flags.USED` is set.
pub struct NetBuffer {
    pub buf_type: BufferType,
    pub phys_addr: PhysAddr,
    pub virt_addr: VirtAddr,
    pub size: usize,
    pub data_len: usize,
    ref_count: AtomicU32,
    pub flags: Flags,
    pub id: u32,
    pub if_nbr: usize,
    pub if_nbr_tx: usize,
    pub protocol: ProtocolIndices,
    /// Pointer (byte offset into the data region) exposed to ARP/NDP for
    /// in-place hardware-address binding.
    pub addr_hw_ptr: Option<usize>,
    /// Pointer (byte offset into the data region) exposed to ARP/NDP for
    /// in-place protocol-address binding.
    pub addr_protocol_ptr: Option<usize>,
    unlink: Option<UnlinkHook>,
    /// At most one IP-options auxiliary buffer may be chained to this one;
    /// freeing this buffer also frees that one.
    ip_opt_aux: Option<NetBufHandle>,
    data_region_index: u16,
}

impl NetBuffer {
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Upper layers retaining a buffer beyond the current call increment
    /// the refcount. Protected by the pool's caller-held critical section;
    /// `Relaxed` here is sufficient because all mutation of non-count
    /// fields happens while the pool lock is held.
    pub fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_used(&self) -> bool {
        self.flags.contains(Flags::USED)
    }

    /// Raw view of the frame currently held, from `virt_addr` for `data_len`
    /// octets. Used by the link layer to parse/write header fields in
    /// place; the buffer's owning pool guarantees this range stays valid
    /// for as long as `Used` is set.
    pub fn data(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.virt_addr.as_usize() as *const u8, self.data_len) }
    }

    /// Mutable view over the buffer's full physical capacity (`size`), wider
    /// than `data()` so callers can write a header into space reserved
    /// ahead of the current payload (see `linklayer::LinkLayer::tx`).
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.virt_addr.as_usize() as *mut u8, self.size) }
    }
}

/// One fixed-size, fixed-count data-region pool (`RxLarge`, `TxLarge`, or
/// `TxSmall`).
struct DataRegionPool {
    base_phys: PhysAddr,
    base_virt: VirtAddr,
    block_size: usize,
    count: usize,
    free_list: Vec<u16>,
    in_use: usize,
    /// Blocks that failed to return to this pool due to detected
    /// corruption. Never reclaimed; see spec's discard policy.
    lost: usize,
}

/// Snapshot of one typed pool's block accounting, exposed so the "total
/// buffers in circulation (free + in-use + lost) equals configured count"
/// invariant (spec.md §8) can be audited from outside the pool, and so the
/// "lost" counter the discard policy relies on is a first-class observable
/// rather than a number nothing ever reads (spec.md §9 design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub in_use: usize,
    pub lost: usize,
    pub configured: usize,
}

impl DataRegionPool {
    fn stats(&self) -> PoolStats {
        PoolStats {
            free: self.free_list.len(),
            in_use: self.in_use,
            lost: self.lost,
            configured: self.count,
        }
    }

    fn region_addr(&self, index: u16) -> (PhysAddr, VirtAddr) {
        let offset = index as usize * self.block_size;
        (
            PhysAddr::from(self.base_phys.as_usize() + offset),
            VirtAddr::from(self.base_virt.as_usize() + offset),
        )
    }

    fn alloc(&mut self) -> Option<(u16, PhysAddr, VirtAddr)> {
        let index = self.free_list.pop()?;
        self.in_use += 1;
        let (phys, virt) = self.region_addr(index);
        Some((index, phys, virt))
    }

    /// Recovers the index of an already-allocated block from its physical
    /// address. Used when a caller (the device driver) holds only the
    /// address it installed into a descriptor and needs to either attach a
    /// header to it or return it to the free list.
    fn index_for_addr(&self, phys: PhysAddr) -> Option<u16> {
        let offset = phys.as_usize().checked_sub(self.base_phys.as_usize())?;
        if self.block_size == 0 || offset % self.block_size != 0 {
            return None;
        }
        let index = offset / self.block_size;
        if index >= self.count {
            return None;
        }
        Some(index as u16)
    }

    /// Returns a block to the free list. `corrupted` models the discard
    /// policy: a corrupted block is never returned, only counted as lost,
    /// so a single detected corruption costs exactly one slot permanently.
    fn free(&mut self, index: u16, corrupted: bool) {
        self.in_use = self.in_use.saturating_sub(1);
        if corrupted {
            self.lost += 1;
        } else {
            self.free_list.push(index);
        }
    }
}

/// Errors raised by `pool_init`. All are configuration errors: reported at
/// init, the interface never enters operational state.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("block size below minimum frame size for this interface type")]
    BlockTooSmall,
    #[error("small transmit block size exceeds large transmit block size")]
    SmallExceedsLarge,
    #[error("receive buffer count must be at least 1")]
    ZeroRxCount,
    #[error("total transmit buffer count must be at least 1")]
    ZeroTxCount,
    #[error("dedicated memory region too small for requested blocks")]
    RegionTooSmall,
    #[error("pool already initialized for this slot")]
    AlreadyInit,
}

impl Classify for PoolError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Errors raised by per-call buffer operations.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufError {
    #[error("no buffers available in the requested pool")]
    NoneAvail,
    #[error("requested size exceeds the largest configured pool for this direction")]
    InvalidSize,
    #[error("pool for this buffer type was never initialized")]
    PoolNotConfigured,
    #[error("buffer handle does not refer to a live buffer")]
    InvalidHandle,
}

impl Classify for BufError {
    fn class(&self) -> ErrorClass {
        ErrorClass::ResourceExhaustion
    }
}

/// A raw data-region handle returned by `get_data_ptr`, used when the
/// driver needs a replacement region without a paired `NetBuffer` header
/// (e.g. installing a fresh Rx descriptor buffer).
#[derive(Debug, Clone, Copy)]
pub struct DataRegion {
    pub buf_type: BufferType,
    pub phys_addr: PhysAddr,
    pub virt_addr: VirtAddr,
    pub size: usize,
    index: u16,
}

/// The bounded buffer-pool subsystem for one interface.
pub struct BufferPool {
    if_nbr: usize,
    headers: Vec<NetBuffer>,
    links: Vec<ListLinks>,
    header_free: Vec<u32>,
    lost_headers: usize,
    next_id: u32,

    rx_large: Option<DataRegionPool>,
    tx_large: Option<DataRegionPool>,
    tx_small: Option<DataRegionPool>,

    pub primary: list::List,
    pub secondary: list::List,
    pub tx: list::List,
}

impl BufferPool {
    pub fn new(if_nbr: usize) -> Self {
        Self {
            if_nbr,
            headers: Vec::new(),
            links: Vec::new(),
            header_free: Vec::new(),
            lost_headers: 0,
            next_id: 0,
            rx_large: None,
            tx_large: None,
            tx_small: None,
            primary: list::List::new(ListKind::Primary),
            secondary: list::List::new(ListKind::Secondary),
            tx: list::List::new(ListKind::Tx),
        }
    }

    /// Allocates the header arena big enough for `count` simultaneously
    /// live `NetBuffer`s, plus the three typed data-region pools, per
    /// `cfg`. Rejects undersized blocks, a small pool larger than the
    /// large pool, and a zero receive or transmit count; see
    /// `InterfaceConfig::validate_pool`.
    pub fn pool_init(&mut self, cfg: &InterfaceConfig) -> Result<(), PoolError> {
        if !self.headers.is_empty() {
            return Err(PoolError::AlreadyInit);
        }
        cfg.validate_pool()?;

        let header_count = cfg.rx_buf_large_count + cfg.tx_buf_large_count + cfg.tx_buf_small_count;
        self.headers.reserve(header_count);
        self.links.reserve(header_count);
        self.header_free.reserve(header_count);
        for i in 0..header_count {
            self.headers.push(NetBuffer {
                buf_type: BufferType::RxLarge,
                phys_addr: PhysAddr::from(0),
                virt_addr: VirtAddr::from(0),
                size: 0,
                data_len: 0,
                ref_count: AtomicU32::new(0),
                flags: Flags::empty(),
                id: 0,
                if_nbr: self.if_nbr,
                if_nbr_tx: self.if_nbr,
                protocol: ProtocolIndices::default(),
                addr_hw_ptr: None,
                addr_protocol_ptr: None,
                unlink: None,
                ip_opt_aux: None,
                data_region_index: 0,
            });
            self.links.push(ListLinks::default());
            self.header_free.push(i as u32);
        }

        self.rx_large = Some(alloc_region_pool(cfg.rx_buf_large_count, cfg.rx_buf_large_size, cfg.rx_buf_align_octets)?);
        if cfg.tx_buf_large_count > 0 {
            self.tx_large = Some(alloc_region_pool(cfg.tx_buf_large_count, cfg.tx_buf_large_size, cfg.tx_buf_align_octets)?);
        }
        if cfg.tx_buf_small_count > 0 {
            self.tx_small = Some(alloc_region_pool(cfg.tx_buf_small_count, cfg.tx_buf_small_size, cfg.tx_buf_align_octets)?);
        }
        Ok(())
    }

    fn pool_for_mut(&mut self, buf_type: BufferType) -> Option<&mut DataRegionPool> {
        match buf_type {
            BufferType::RxLarge => self.rx_large.as_mut(),
            BufferType::TxLarge => self.tx_large.as_mut(),
            BufferType::TxSmall => self.tx_small.as_mut(),
        }
    }

    /// Size-selection algorithm for `Tx`: prefer the small pool when
    /// configured and sufficient, else the large pool, else `InvalidSize`.
    /// `Rx` always selects `RxLarge`.
    fn select_pool(&self, txn: Transaction, total: usize) -> Result<BufferType, BufError> {
        match txn {
            Transaction::Rx => Ok(BufferType::RxLarge),
            Transaction::Tx => {
                if let Some(small) = &self.tx_small {
                    if small.block_size >= total {
                        return Ok(BufferType::TxSmall);
                    }
                }
                if let Some(large) = &self.tx_large {
                    if large.block_size >= total {
                        return Ok(BufferType::TxLarge);
                    }
                }
                if self.tx_small.is_none() && self.tx_large.is_none() {
                    Err(BufError::PoolNotConfigured)
                } else {
                    Err(BufError::InvalidSize)
                }
            }
        }
    }

    /// Returns a buffer whose data region holds at least
    /// `start_index + requested_size` octets, with `ref_count = 1` and
    /// `flags.USED` set.
    pub fn get(
        &mut self,
        if_nbr: usize,
        txn: Transaction,
        requested_size: usize,
        start_index: usize,
        flags: Flags,
    ) -> Result<NetBufHandle, BufError> {
        let total = requested_size + start_index;
        let buf_type = self.select_pool(txn, total)?;
        let header_index = self.header_free.pop().ok_or(BufError::NoneAvail)?;
        let pool = self.pool_for_mut(buf_type).ok_or(BufError::PoolNotConfigured)?;
        let block_size = pool.block_size;
        let (data_index, phys, virt) = match pool.alloc() {
            Some(region) => region,
            None => {
                self.header_free.push(header_index);
                return Err(BufError::NoneAvail);
            }
        };

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        let hdr = &mut self.headers[header_index as usize];
        hdr.buf_type = buf_type;
        hdr.phys_addr = phys;
        hdr.virt_addr = virt;
        hdr.size = block_size;
        hdr.data_region_index = data_index;
        hdr.data_len = 0;
        hdr.ref_count = AtomicU32::new(1);
        hdr.flags = flags | Flags::USED;
        hdr.id = id;
        hdr.if_nbr = if_nbr;
        hdr.if_nbr_tx = if_nbr;
        hdr.protocol = ProtocolIndices::default();
        hdr.addr_hw_ptr = None;
        hdr.addr_protocol_ptr = None;
        hdr.unlink = None;
        hdr.ip_opt_aux = None;
        Ok(NetBufHandle(header_index))
    }

    /// Identical sizing logic to `get`, but returns only the raw region
    /// (no paired header), for the driver's Rx-replacement path.
    pub fn get_data_ptr(
        &mut self,
        _if_nbr: usize,
        txn: Transaction,
        requested_size: usize,
        start_index: usize,
    ) -> Result<DataRegion, BufError> {
        let total = requested_size + start_index;
        let buf_type = self.select_pool(txn, total)?;
        let pool = self.pool_for_mut(buf_type).ok_or(BufError::PoolNotConfigured)?;
        let block_size = pool.block_size;
        let (index, phys, virt) = pool.alloc().ok_or(BufError::NoneAvail)?;
        Ok(DataRegion {
            buf_type,
            phys_addr: phys,
            virt_addr: virt,
            size: block_size,
            index,
        })
    }

    /// Attaches a fresh header to an `RxLarge` region already drawn via
    /// `get_data_ptr` (the descriptor it was installed into has since been
    /// filled by DMA). Does not allocate a new region; the block is already
    /// accounted as in-use since the original `get_data_ptr` call.
    pub fn wrap_rx_region(
        &mut self,
        if_nbr: usize,
        phys_addr: PhysAddr,
        virt_addr: VirtAddr,
        data_len: usize,
        flags: Flags,
    ) -> Result<NetBufHandle, BufError> {
        let pool = self.rx_large.as_ref().ok_or(BufError::PoolNotConfigured)?;
        let index = pool.index_for_addr(phys_addr).ok_or(BufError::InvalidHandle)?;
        let block_size = pool.block_size;
        let header_index = self.header_free.pop().ok_or(BufError::NoneAvail)?;

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        let hdr = &mut self.headers[header_index as usize];
        hdr.buf_type = BufferType::RxLarge;
        hdr.phys_addr = phys_addr;
        hdr.virt_addr = virt_addr;
        hdr.size = block_size;
        hdr.data_region_index = index;
        hdr.data_len = data_len;
        hdr.ref_count = AtomicU32::new(1);
        hdr.flags = flags | Flags::USED;
        hdr.id = id;
        hdr.if_nbr = if_nbr;
        hdr.if_nbr_tx = if_nbr;
        hdr.protocol = ProtocolIndices::default();
        hdr.addr_hw_ptr = None;
        hdr.addr_protocol_ptr = None;
        hdr.unlink = None;
        hdr.ip_opt_aux = None;
        Ok(NetBufHandle(header_index))
    }

    /// Returns an `RxLarge` region to its free list by address, without a
    /// paired header. Used to discard a frame DMA flagged as errored, and
    /// to release in-flight descriptor buffers on `stop`.
    pub fn reclaim_rx_region(&mut self, phys_addr: PhysAddr) {
        if let Some(pool) = self.rx_large.as_mut() {
            if let Some(index) = pool.index_for_addr(phys_addr) {
                pool.free(index, false);
            }
        }
    }

    pub fn buffer(&self, handle: NetBufHandle) -> &NetBuffer {
        &self.headers[handle.0 as usize]
    }

    pub fn buffer_mut(&mut self, handle: NetBufHandle) -> &mut NetBuffer {
        &mut self.headers[handle.0 as usize]
    }

    pub fn register_unlink(&mut self, handle: NetBufHandle, hook: UnlinkHook) {
        self.headers[handle.0 as usize].unlink = Some(hook);
    }

    pub fn set_ip_opt_aux(&mut self, handle: NetBufHandle, aux: NetBufHandle) {
        self.headers[handle.0 as usize].ip_opt_aux = Some(aux);
    }

    /// Decrements `ref_count`; the physical release happens only when it
    /// reaches zero. On release: invokes `unlink` if set, clears `USED`,
    /// returns the data region and header to their pools, and frees a
    /// chained `ip_opt_aux` buffer if present.
    pub fn free(&mut self, handle: NetBufHandle) {
        let prev = self.headers[handle.0 as usize].ref_count.fetch_sub(1, Ordering::Release);
        if prev != 1 {
            return;
        }
        self.release(handle);
    }

    fn release(&mut self, handle: NetBufHandle) {
        let index = handle.0;
        let unlink = self.headers[index as usize].unlink.take();
        if let Some(hook) = unlink {
            (hook.func)(handle, hook.token);
        }
        self.primary.remove(&mut self.links, index);
        self.secondary.remove(&mut self.links, index);
        self.tx.remove(&mut self.links, index);

        let buf_type = self.headers[index as usize].buf_type;
        let data_index = self.headers[index as usize].data_region_index;
        let aux = self.headers[index as usize].ip_opt_aux.take();
        self.headers[index as usize].flags.remove(Flags::USED);

        if let Some(pool) = self.pool_for_mut(buf_type) {
            pool.free(data_index, false);
        }
        self.header_free.push(index);

        if let Some(aux) = aux {
            self.free(aux);
        }
    }

    /// Marks the header at `index` as lost (pool-return failure detected):
    /// the header is not returned to `header_free` and is permanently
    /// removed from circulation, per the discard policy.
    pub fn mark_header_lost(&mut self, handle: NetBufHandle) {
        self.lost_headers += 1;
        let _ = handle;
    }

    pub fn lost_headers(&self) -> usize {
        self.lost_headers
    }

    /// Chains `next` onto the tail of `prev`'s fragment list, so the pair
    /// can later be freed (or queued) as a single multi-segment buffer via
    /// `free_list`.
    pub fn frag_link(&mut self, prev: NetBufHandle, next: NetBufHandle) {
        list::link_after(&mut self.links, ListKind::Frag, prev.0, next.0);
    }

    /// Walks the fragment chain starting at `head`, decrementing each
    /// segment's refcount. A segment still referenced elsewhere (e.g. an
    /// `ip_opt_aux` alias held by an upper layer) survives the call; per
    /// spec.md §4.1's compaction rule, surviving segments are relinked to
    /// each other in their original order so the chain contains no
    /// dangling references to the freed segments between them.
    ///
    /// Reads the links already present on `head` rather than building a
    /// throwaway `List` and calling `push_front(head)`, which would
    /// overwrite `head`'s own chain pointers before they could be walked.
    pub fn free_list(&mut self, head: NetBufHandle) {
        let chain: Vec<u32> = list::ListIter::from_node(&self.links, ListKind::Frag, head.0).collect();
        let mut last_survivor: Option<u32> = None;
        for index in chain {
            let survives = self.headers[index as usize].ref_count() > 1;
            self.free(NetBufHandle(index));
            if survives {
                self.links[index as usize].frag.prev = last_survivor;
                self.links[index as usize].frag.next = None;
                if let Some(prev_index) = last_survivor {
                    self.links[prev_index as usize].frag.next = Some(index);
                }
                last_survivor = Some(index);
            }
        }
    }

    /// Walks the top-level primary queue starting at `queue_head`, and for
    /// each entry runs the fragment-chain free above.
    pub fn free_queue_primary(&mut self, queue_head: NetBufHandle) {
        let chain: Vec<u32> = self.primary.iter(&self.links).collect();
        let _ = queue_head;
        for index in chain {
            self.free_list(NetBufHandle(index));
        }
    }

    /// Walks the secondary queue; before freeing a node whose registered
    /// unlink hook's token matches `token`, clears that hook so `free`
    /// doesn't re-enter this same walk.
    pub fn free_queue_secondary(&mut self, queue_head: NetBufHandle, token: usize) {
        let chain: Vec<u32> = self.secondary.iter(&self.links).collect();
        let _ = queue_head;
        for index in chain {
            if let Some(hook) = self.headers[index as usize].unlink {
                if hook.token == token {
                    self.headers[index as usize].unlink = None;
                }
            }
            self.free(NetBufHandle(index));
        }
    }

    /// Returns a raw region to its pool when the header has already been
    /// detached for upper-layer processing (e.g. the driver's Rx swap).
    pub fn free_buf_data_area_rx(&mut self, region: DataRegion) {
        if let Some(pool) = self.pool_for_mut(region.buf_type) {
            pool.free(region.index, false);
        }
    }

    /// Returns a typed region to its pool by address alone, for a caller
    /// that holds neither a `NetBufHandle` nor a `DataRegion` — just what a
    /// Tx-completion dealloc entry carries.
    pub fn free_data_region(&mut self, buf_type: BufferType, phys_addr: PhysAddr) {
        if let Some(pool) = self.pool_for_mut(buf_type) {
            if let Some(index) = pool.index_for_addr(phys_addr) {
                pool.free(index, false);
            }
        }
    }

    /// Decrements `handle`'s refcount same as `free`, but on reaching zero
    /// returns the data region to the caller instead of back to its pool —
    /// the link layer's Tx path needs the raw region to hand to the device;
    /// the region only rejoins its pool once the transmit completes (via
    /// `free_data_region`, driven by the completion entry the driver posts).
    /// Returns `None` if the buffer is still referenced elsewhere.
    pub fn detach_for_tx(&mut self, handle: NetBufHandle) -> Option<DataRegion> {
        let prev = self.headers[handle.0 as usize].ref_count.fetch_sub(1, Ordering::Release);
        if prev != 1 {
            return None;
        }
        let index = handle.0;
        let unlink = self.headers[index as usize].unlink.take();
        if let Some(hook) = unlink {
            (hook.func)(handle, hook.token);
        }
        self.primary.remove(&mut self.links, index);
        self.secondary.remove(&mut self.links, index);
        self.tx.remove(&mut self.links, index);

        let aux = self.headers[index as usize].ip_opt_aux.take();
        self.headers[index as usize].flags.remove(Flags::USED);
        let region = {
            let hdr = &self.headers[index as usize];
            DataRegion {
                buf_type: hdr.buf_type,
                phys_addr: hdr.phys_addr,
                virt_addr: hdr.virt_addr,
                size: hdr.size,
                index: hdr.data_region_index,
            }
        };
        self.header_free.push(index);

        if let Some(aux) = aux {
            self.free(aux);
        }
        Some(region)
    }

    /// Block accounting for one typed data-region pool, or `None` if that
    /// pool was never configured. `free + in_use + lost == configured`
    /// holds at every call site (spec.md §8).
    pub fn pool_stats(&self, buf_type: BufferType) -> Option<PoolStats> {
        match buf_type {
            BufferType::RxLarge => self.rx_large.as_ref(),
            BufferType::TxLarge => self.tx_large.as_ref(),
            BufferType::TxSmall => self.tx_small.as_ref(),
        }
        .map(DataRegionPool::stats)
    }

    /// Smallest configured `Tx` block size (`TxSmall` if present, else
    /// `TxLarge`), used by `LinkLayer::mtu_set` to clamp the advertised MTU
    /// to what a single Tx buffer can actually carry.
    pub fn smallest_tx_block_size(&self) -> Option<usize> {
        match (&self.tx_small, &self.tx_large) {
            (Some(small), _) => Some(small.block_size),
            (None, Some(large)) => Some(large.block_size),
            (None, None) => None,
        }
    }
}

fn alloc_region_pool(count: usize, block_size: usize, alignment: usize) -> Result<DataRegionPool, PoolError> {
    use alloc::alloc::{alloc_zeroed, Layout};

    let total = count
        .checked_mul(block_size)
        .ok_or(PoolError::RegionTooSmall)?;
    let layout = Layout::from_size_align(total.max(1), alignment.max(1))
        .map_err(|_| PoolError::RegionTooSmall)?;
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(PoolError::RegionTooSmall);
    }
    let base = ptr as usize;
    // This crate carries no paging subsystem; physical and virtual
    // addresses coincide for memory obtained from the global allocator on
    // the targets it runs on.
    let mut free_list = Vec::with_capacity(count);
    for i in (0..count).rev() {
        free_list.push(i as u16);
    }
    Ok(DataRegionPool {
        base_phys: PhysAddr::from(base),
        base_virt: VirtAddr::from(base),
        block_size,
        count,
        free_list,
        in_use: 0,
        lost: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> InterfaceConfig {
        use crate::config::{DescriptorVariant, HwAddrCfg, MacVariant};
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

    #[test]
    fn init_rejects_small_exceeding_large() {
        let mut cfg = test_cfg();
        cfg.tx_buf_small_size = 4096;
        let mut pool = BufferPool::new(0);
        assert_eq!(pool.pool_init(&cfg), Err(PoolError::SmallExceedsLarge));
    }

    #[test]
    fn get_prefers_small_pool_when_sufficient() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Tx, 128, 2, Flags::empty()).unwrap();
        assert_eq!(pool.buffer(handle).buf_type, BufferType::TxSmall);
    }

    #[test]
    fn get_falls_back_to_large_when_small_insufficient() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Tx, 1000, 2, Flags::empty()).unwrap();
        assert_eq!(pool.buffer(handle).buf_type, BufferType::TxLarge);
    }

    #[test]
    fn rx_always_selects_rx_large() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        assert_eq!(pool.buffer(handle).buf_type, BufferType::RxLarge);
    }

    #[test]
    fn refcount_survives_one_free_when_shared() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let handle = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        pool.buffer(handle).acquire();
        assert_eq!(pool.buffer(handle).ref_count(), 2);
        pool.free(handle);
        assert!(pool.buffer(handle).is_used());
        pool.free(handle);
        assert!(!pool.buffer(handle).is_used());
    }

    #[test]
    fn exhausted_pool_returns_none_avail() {
        let mut cfg = test_cfg();
        cfg.rx_buf_large_count = 1;
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        let _h = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        assert_eq!(
            pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap_err(),
            BufError::NoneAvail
        );
    }

    #[test]
    fn circulation_invariant_holds_across_alloc_and_free() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();

        let h1 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let h2 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let stats = pool.pool_stats(BufferType::RxLarge).unwrap();
        assert_eq!(stats.free + stats.in_use + stats.lost, stats.configured);
        assert_eq!(stats.in_use, 2);

        pool.free(h1);
        pool.free(h2);
        let stats = pool.pool_stats(BufferType::RxLarge).unwrap();
        assert_eq!(stats.free + stats.in_use + stats.lost, stats.configured);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.free, cfg.rx_buf_large_count);
    }

    #[test]
    fn oversized_tx_request_is_invalid_size() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();
        assert_eq!(
            pool.get(0, Transaction::Tx, 4096, 0, Flags::empty()).unwrap_err(),
            BufError::InvalidSize
        );
    }

    #[test]
    fn free_list_frees_every_segment_of_a_fragment_chain() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();

        let h0 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let h1 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let h2 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        pool.frag_link(h0, h1);
        pool.frag_link(h1, h2);

        pool.free_list(h0);

        assert!(!pool.buffer(h0).is_used());
        assert!(!pool.buffer(h1).is_used());
        assert!(!pool.buffer(h2).is_used());
        let stats = pool.pool_stats(BufferType::RxLarge).unwrap();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.free, cfg.rx_buf_large_count);
    }

    #[test]
    fn free_list_relinks_surviving_segments_around_freed_ones() {
        let cfg = test_cfg();
        let mut pool = BufferPool::new(0);
        pool.pool_init(&cfg).unwrap();

        let h0 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let h1 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        let h2 = pool.get(0, Transaction::Rx, 64, 0, Flags::empty()).unwrap();
        pool.frag_link(h0, h1);
        pool.frag_link(h1, h2);
        pool.buffer(h1).acquire(); // a second owner keeps h1 alive past this free_list call

        pool.free_list(h0);

        assert!(!pool.buffer(h0).is_used());
        assert!(pool.buffer(h1).is_used());
        assert!(!pool.buffer(h2).is_used());

        let remaining: Vec<u32> = list::ListIter::from_node(&pool.links, ListKind::Frag, h1.0).collect();
        assert_eq!(remaining, alloc::vec![h1.0]);

        pool.free(h1);
        assert!(!pool.buffer(h1).is_used());
    }
}
