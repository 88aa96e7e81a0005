//! Hardware abstraction layer: IRQ control, cache maintenance, and the
//! spin-lock primitive the rest of the crate builds on.

pub mod cpu;
pub mod spin;

pub use cpu::{clean_dcache_range, disable_irqs, enable_irqs, invalidate_dcache_range, irqs_disabled};
pub use spin::{Mutex, SpinNoIrq};
