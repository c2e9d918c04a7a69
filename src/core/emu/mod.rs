use crate::core::CPU_CLOCK;
use crate::core::config::{Config, ExecutionMode};
use crate::core::cpu::{CYCLES_PER_INSTR, Cpu};
use crate::core::cpu::cop0::ExceptionCode;
use crate::core::dynarec::Dynarec;
use crate::core::interrupt::{InterruptSource, Mi};
use crate::core::memory::bus::SystemBus;
use crate::core::rsp::{NullRspBackend, Rsp, RspBackend};
use build_time::build_time_utc;
use tracing::info;

pub const EMU_NAME: &str = "r-n64";
pub const EMU_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const EMU_BUILD_DATE_TIME: &str = build_time_utc!();

// 60 frames per second over 262 lines does not divide evenly, so some lines
// run one cycle longer: 68 * 5963 + 194 * 5964 = 1562500 = CPU_CLOCK / 60.
pub const NUM_SHORTLINES: u32 = 68;
pub const NUM_LONGLINES: u32 = 194;
pub const SHORTLINE_CYCLES: u64 = 5963;
pub const LONGLINE_CYCLES: u64 = 5964;
const _: () = assert!(
    NUM_SHORTLINES as u64 * SHORTLINE_CYCLES + NUM_LONGLINES as u64 * LONGLINE_CYCLES
        == CPU_CLOCK / 60
);

/// Video-interface registers the scheduler reads and writes; the rasteriser
/// behind them is an external collaborator.
pub struct Vi {
    pub vsync: u32,
    pub vi_v_intr: u32,
    pub v_current: u32,
}

impl Vi {
    fn new() -> Self {
        Vi {
            vsync: 0,
            vi_v_intr: 256,
            v_current: 0,
        }
    }
}

/// Screen update hook, driven once per frame at vsync/2.
pub trait VideoSink {
    fn update_screen(&mut self);
}

pub struct NullVideo;

impl VideoSink for NullVideo {
    fn update_screen(&mut self) {}
}

/// DAC consumption hook; receives every line's cycle budget.
pub trait AudioSink {
    fn ai_step(&mut self, cycles: u64);
}

pub struct NullAudio;

impl AudioSink for NullAudio {
    fn ai_step(&mut self, _cycles: u64) {}
}

/// The whole machine: CPU + RSP against the VI/AI cycle budget.
pub struct System {
    pub cpu: Cpu,
    pub bus: SystemBus,
    pub rsp: Rsp,
    pub mi: Mi,
    pub vi: Vi,
    dynarec: Dynarec,
    mode: ExecutionMode,
    video: Box<dyn VideoSink>,
    audio: Box<dyn AudioSink>,
    /// Accumulator maintaining the 2 RSP : 3 CPU step ratio.
    cpu_steps: u64,
    should_quit: bool,
}

impl System {
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            config,
            Box::new(NullVideo),
            Box::new(NullAudio),
            Box::new(NullRspBackend),
        )
    }

    pub fn with_collaborators(
        config: &Config,
        video: Box<dyn VideoSink>,
        audio: Box<dyn AudioSink>,
        rsp_backend: Box<dyn RspBackend>,
    ) -> Self {
        info!("Building system, {:?} mode", config.mode);
        let dynarec = Dynarec::new(config.arena_capacity);
        let bus = SystemBus::new(dynarec.cache_handle());

        System {
            cpu: Cpu::new(),
            bus,
            rsp: Rsp::new(rsp_backend),
            mi: Mi::new(),
            vi: Vi::new(),
            dynarec,
            mode: config.mode,
            video,
            audio,
            cpu_steps: 0,
            should_quit: false,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    // ==========================================================================
    // exposed core surface

    /// One CPU work unit plus its RSP coupling; returns the cycles taken.
    pub fn step(&mut self) -> u64 {
        let taken = match self.mode {
            ExecutionMode::Interpreter => self.cpu.step(&mut self.bus),
            ExecutionMode::Jit => {
                self.cpu.update_count();
                if self.cpu.take_pending_interrupt() {
                    CYCLES_PER_INSTR
                } else {
                    self.dynarec.step(&mut self.cpu, &mut self.bus)
                }
            }
        };
        self.cpu_steps += taken;

        if !self.rsp.status.halt {
            // 2 RSP steps per 3 CPU steps
            self.rsp.credit((self.cpu_steps / 3 * 2) as u32);
            self.cpu_steps %= 3;
            if self.rsp.run(&mut self.bus) {
                self.interrupt_raise(InterruptSource::Sp);
            }
        }

        taken
    }

    /// Drop the compiled-code page owning `physical`; the bus collaborator
    /// calls this on every committed write.
    pub fn invalidate(&mut self, physical: u32) {
        self.dynarec.cache_handle().borrow_mut().invalidate(physical);
    }

    /// Direct exception entry for collaborators that detect faults
    /// asynchronously.
    pub fn handle_exception(&mut self, pc: u64, code: ExceptionCode, coprocessor_error: u32) {
        self.cpu.handle_exception(pc, code, coprocessor_error);
    }

    pub fn interrupt_raise(&mut self, source: InterruptSource) {
        self.mi.raise(source);
        self.on_interrupt_change();
    }

    pub fn interrupt_lower(&mut self, source: InterruptSource) {
        self.mi.lower(source);
        self.on_interrupt_change();
    }

    pub fn set_interrupt_mask(&mut self, mask: u32) {
        self.mi.set_mask(mask);
        self.on_interrupt_change();
    }

    fn on_interrupt_change(&mut self) {
        let active = self.mi.active();
        self.cpu.cp0.cause.set_ip2(active);
        self.cpu.update_interrupts();
    }

    // ==========================================================================
    // frame loop

    fn check_vi_interrupt(&mut self) {
        if self.vi.v_current == self.vi.vi_v_intr {
            self.interrupt_raise(InterruptSource::Vi);
        }
    }

    fn check_vsync(&mut self) {
        if self.vi.v_current == self.vi.vsync >> 1 {
            self.video.update_screen();
        }
    }

    fn run_line(&mut self, budget: u64, cycles: &mut u64) {
        self.check_vi_interrupt();
        self.check_vsync();
        while *cycles <= budget {
            *cycles += self.step();
        }
        *cycles -= budget;
        self.audio.ai_step(budget);
    }

    /// One video frame: the short lines, then the long ones.
    pub fn run_frame(&mut self, cycles: &mut u64) {
        self.vi.v_current = 0;
        while self.vi.v_current < NUM_SHORTLINES {
            self.run_line(SHORTLINE_CYCLES, cycles);
            self.vi.v_current += 1;
        }
        while self.vi.v_current < NUM_SHORTLINES + NUM_LONGLINES {
            self.run_line(LONGLINE_CYCLES, cycles);
            self.vi.v_current += 1;
        }
        self.check_vi_interrupt();
        self.check_vsync();
    }

    pub fn run(&mut self) {
        let mut cycles = 0;
        // the quit flag is only polled at the frame boundary
        while !self.should_quit {
            self.run_frame(&mut cycles);
        }
    }

    pub fn request_quit(&mut self) {
        self.should_quit = true;
    }
}
