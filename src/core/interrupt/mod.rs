use tracing::debug;

/// The six MI interrupt sources, bit positions per the MI.intr register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Sp = 0,
    Si = 1,
    Ai = 2,
    Vi = 3,
    Pi = 4,
    Dp = 5,
}

/// MIPS-interface interrupt word and mask. A source is active iff its bit is
/// set in both; any change feeds Cause.IP2 on the CPU.
#[derive(Debug, Default)]
pub struct Mi {
    pub intr: u32,
    pub intr_mask: u32,
}

impl Mi {
    pub fn new() -> Self {
        Mi::default()
    }

    pub fn raise(&mut self, source: InterruptSource) {
        debug!("Raising {:?} interrupt", source);
        self.intr |= 1 << source as u32;
    }

    pub fn lower(&mut self, source: InterruptSource) {
        debug!("Lowering {:?} interrupt", source);
        self.intr &= !(1 << source as u32);
    }

    pub fn set_mask(&mut self, mask: u32) {
        self.intr_mask = mask & 0x3F;
    }

    pub fn active(&self) -> bool {
        self.intr & self.intr_mask != 0
    }
}
