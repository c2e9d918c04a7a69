use crate::core::memory::Bus;
use crate::core::memory::bus::SP_IMEM_BASE;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct RspStatus {
    pub halt: bool,
    pub broke: bool,
}

pub struct RspRun {
    pub consumed: u32,
    pub hit_break: bool,
}

/// The vector unit itself lives behind this seam; only its scheduling
/// coupling belongs to the core. Backends must reject unaligned DMEM
/// accesses rather than emulate a rotation for them.
pub trait RspBackend {
    /// The RSP was taken out of halt at `pc`.
    fn start(&mut self, _pc: u32) {}

    /// Execute up to `steps` RSP instructions against the shared bus.
    fn run(&mut self, bus: &mut dyn Bus, steps: u32) -> RspRun;

    /// Check one golden-log line against backend state. Backends without
    /// replay support accept everything.
    fn compare_log_line(&mut self, _line: &str) -> bool {
        true
    }
}

/// Stand-in backend: consumes its budget without executing vector code.
pub struct NullRspBackend;

impl RspBackend for NullRspBackend {
    fn run(&mut self, _bus: &mut dyn Bus, steps: u32) -> RspRun {
        RspRun {
            consumed: steps,
            hit_break: false,
        }
    }
}

/// Harness stand-in: fetches from IMEM and retires every instruction as a
/// no-op until it reaches BREAK. Scalar and vector semantics stay external;
/// this keeps the halt coupling honest so test programs can finish.
pub struct NopRspBackend {
    pc: u32,
}

impl NopRspBackend {
    pub fn new() -> Self {
        NopRspBackend { pc: 0 }
    }
}

impl RspBackend for NopRspBackend {
    fn start(&mut self, pc: u32) {
        self.pc = pc;
    }

    fn run(&mut self, bus: &mut dyn Bus, steps: u32) -> RspRun {
        let mut consumed = 0;
        while consumed < steps {
            let word = bus.read_word(SP_IMEM_BASE + (self.pc & 0xFFC));
            self.pc = self.pc.wrapping_add(4);
            consumed += 1;
            // SPECIAL with the BREAK funct
            if word >> 26 == 0 && word & 0x3F == 0x0D {
                return RspRun {
                    consumed,
                    hit_break: true,
                };
            }
        }
        RspRun {
            consumed,
            hit_break: false,
        }
    }
}

pub struct Rsp {
    pub status: RspStatus,
    /// Steps credited by the scheduler at the 2:3 RSP/CPU ratio.
    pub steps: u32,
    pub pc: u32,
    backend: Box<dyn RspBackend>,
}

impl Rsp {
    pub fn new(backend: Box<dyn RspBackend>) -> Self {
        Rsp {
            status: RspStatus {
                halt: true, // the RSP starts halted
                broke: false,
            },
            steps: 0,
            pc: 0,
            backend,
        }
    }

    pub fn credit(&mut self, steps: u32) {
        self.steps += steps;
    }

    pub fn start(&mut self, pc: u32) {
        self.pc = pc;
        self.status.halt = false;
        self.status.broke = false;
        self.steps = 0;
        self.backend.start(pc);
    }

    /// Drain credited steps through the backend. Returns true when BREAK was
    /// hit; the caller raises the SP interrupt.
    pub fn run(&mut self, bus: &mut dyn Bus) -> bool {
        if self.status.halt || self.steps == 0 {
            return false;
        }
        let result = self.backend.run(bus, self.steps);
        self.steps -= result.consumed.min(self.steps);
        if result.hit_break {
            debug!("RSP BREAK");
            self.status.halt = true;
            self.status.broke = true;
            self.steps = 0;
            return true;
        }
        false
    }

    pub fn compare_log_line(&mut self, line: &str) -> bool {
        self.backend.compare_log_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dynarec::BlockCache;
    use crate::core::memory::bus::SystemBus;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct BreakAfter(u32);

    impl RspBackend for BreakAfter {
        fn run(&mut self, _bus: &mut dyn Bus, steps: u32) -> RspRun {
            let consumed = steps.min(self.0);
            self.0 -= consumed;
            RspRun {
                consumed,
                hit_break: self.0 == 0,
            }
        }
    }

    #[test]
    fn break_halts_and_reports() {
        let mut bus = SystemBus::new(Rc::new(RefCell::new(BlockCache::new())));
        let mut rsp = Rsp::new(Box::new(BreakAfter(4)));
        rsp.start(0);
        rsp.credit(2);
        assert!(!rsp.run(&mut bus));
        rsp.credit(2);
        assert!(rsp.run(&mut bus));
        assert!(rsp.status.halt);
        assert!(rsp.status.broke);
    }

    #[test]
    fn halted_rsp_ignores_credit() {
        let mut bus = SystemBus::new(Rc::new(RefCell::new(BlockCache::new())));
        let mut rsp = Rsp::new(Box::new(NullRspBackend));
        rsp.credit(10);
        assert!(!rsp.run(&mut bus));
        assert!(rsp.status.halt);
    }

    #[test]
    fn nop_backend_walks_imem_until_break() {
        let mut bus = SystemBus::new(Rc::new(RefCell::new(BlockCache::new())));
        bus.write_word(SP_IMEM_BASE + 8, 0x0000_000D); // break after two no-ops
        let mut rsp = Rsp::new(Box::new(NopRspBackend::new()));
        rsp.start(0);
        rsp.credit(2);
        assert!(!rsp.run(&mut bus));
        rsp.credit(2);
        assert!(rsp.run(&mut bus));
        assert!(rsp.status.halt);
        assert!(rsp.status.broke);
    }
}
