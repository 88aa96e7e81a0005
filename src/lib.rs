//! Embedded network-stack core: a bounded buffer pool, a DMA-descriptor
//! Ethernet driver, and an 802.x link layer. IP, ARP, ICMP, TCP/UDP,
//! sockets, timers, and statistics all live above this crate's boundary —
//! see the module docs on `bufpool`, `device`, and `linklayer` for the
//! seams where they attach.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bufpool;
pub mod config;
pub mod device;
pub mod error;
pub mod hal;
pub mod linklayer;
pub mod sync;

pub use bufpool::{BufError, BufferPool, BufferType, Flags, NetBufHandle, PoolError, PoolStats, SubProtocol, Transaction};
pub use config::{DescriptorVariant, HwAddrCfg, InterfaceConfig, MacVariant};
pub use device::{DevError, DeviceDriver, Duplex, LinkStatus, McFilter, NetBsp, Speed, TxDeallocSink, TxDevice};
pub use error::{Classify, ErrorClass};
pub use linklayer::{AddrFamily, AddrResolver, CacheOutcome, EtherType, LinkError, LinkLayer, TxOutcome, UpperLayer};
pub use sync::{DeallocEntry, DeallocQueue, Notify};
