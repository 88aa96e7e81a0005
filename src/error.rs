//! Shared error taxonomy. Each subsystem (`bufpool`, `device`, `linklayer`)
//! defines its own `thiserror`-derived error enum; this module only carries
//! the cross-cutting classification those enums map into, so a caller can
//! decide propagation policy (surface vs. count-and-discard) generically.

/// The five error kinds named in the error-handling design, independent of
/// which subsystem raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad sizes, unaligned addresses, insufficient descriptor counts,
    /// invalid hardware address. Reported at init only.
    Configuration,
    /// Pool empty, no free Tx descriptor. Non-fatal, caller retries.
    ResourceExhaustion,
    /// Bad frame length, unknown EtherType, bad LLC/SNAP constants. Frame
    /// discarded and counted; interface continues.
    ProtocolFraming,
    /// MII timeout, MAC reset timeout, DMA fatal bus error.
    Hardware,
    /// Unresolvable destination, ARP pend. Not itself a failure.
    ProtocolAddressing,
}

/// Implemented by each subsystem's error enum so generic counting/logging
/// code can classify an error without matching on subsystem-specific
/// variants.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Propagation policy: only configuration-time and MII-access
    /// (hardware) errors are surfaced to upper layers; everything else is a
    /// local discard-and-count.
    fn should_surface(&self) -> bool {
        matches!(self.class(), ErrorClass::Configuration | ErrorClass::Hardware)
    }
}
