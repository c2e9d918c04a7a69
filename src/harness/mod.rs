use crate::core::config::Config;
use crate::core::emu::{NullAudio, NullVideo, System};
use crate::core::memory::Bus;
use crate::core::memory::bus::{SP_DMEM_BASE, SP_IMEM_BASE};
use crate::core::rsp::RspBackend;
use bzip2::read::BzDecoder;
use std::fs;
use std::fs::File;
use std::io::Read;
use tracing::{error, info};

// Golden logs are bzip2-compressed ASCII, one fixed-width line per RSP step.
// This is a little brittle, but the logs never change.
pub const LOG_LINE_LENGTH: usize = 1468;

// RSP test convention: inputs start at DMEM 0x000, outputs at 0x800
pub const OUTPUT_BASE: u32 = 0x800;

/// Golden-master regression run: `<test_name>.bin` is loaded into SP IMEM,
/// each subtest's input blob into DMEM, and the DMEM output region is
/// compared against the golden file once the RSP halts.
pub struct Harness {
    pub test_name: String,
    pub input_size: usize,
    pub output_size: usize,
    pub rom: Option<Vec<u8>>,
    pub config: Config,
}

impl Harness {
    /// Run every subtest with a fresh backend each; the returned value is
    /// the process exit code, 0 iff all passed.
    pub fn run<F>(&self, subtests: &[String], mut backend: F) -> i32
    where
        F: FnMut() -> Box<dyn RspBackend>,
    {
        let program = match fs::read(format!("{}.bin", self.test_name)) {
            Ok(program) => program,
            Err(err) => {
                error!("Cannot read {}.bin: {}", self.test_name, err);
                return 2;
            }
        };
        info!(
            "Test program {}: {} bytes, MD5 {:x}",
            self.test_name,
            program.len(),
            md5::compute(&program)
        );

        let mut failed = 0;
        for subtest in subtests {
            match self.run_subtest(&program, subtest, backend()) {
                Ok(()) => info!("[PASS] {}.{}", self.test_name, subtest),
                Err(err) => {
                    error!("[FAIL] {}.{}: {}", self.test_name, subtest, err);
                    failed += 1;
                }
            }
        }

        if failed > 0 { 1 } else { 0 }
    }

    pub fn run_subtest(
        &self,
        program: &[u8],
        subtest: &str,
        backend: Box<dyn RspBackend>,
    ) -> Result<(), String> {
        let input = fs::read(format!("{}.{}.input", self.test_name, subtest))
            .map_err(|e| format!("cannot read input: {}", e))?;
        if input.len() < self.input_size {
            return Err(format!(
                "input file holds {} bytes, {} expected",
                input.len(),
                self.input_size
            ));
        }

        let mut system = System::with_collaborators(
            &self.config,
            Box::new(NullVideo),
            Box::new(NullAudio),
            backend,
        );
        if let Some(rom) = &self.rom {
            system.bus.load_cartridge(rom.clone());
        }
        // run the CPU out of kseg0 while the RSP test executes
        system.cpu.set_pc(0xFFFF_FFFF_8000_0000);

        for (offset, chunk) in program.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            system
                .bus
                .write_word(SP_IMEM_BASE + offset as u32 * 4, u32::from_be_bytes(word));
        }
        for (offset, chunk) in input[..self.input_size].chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            system
                .bus
                .write_word(SP_DMEM_BASE + offset as u32 * 4, u32::from_be_bytes(word));
        }

        let mut log_reader = self.open_log(subtest)?;

        system.rsp.start(0);
        let mut cycles = 0u64;
        while !system.rsp.status.halt {
            if cycles >= self.config.max_harness_cycles {
                // guests are untrusted; a runaway test is an infinite loop
                return Err(String::from("test ran too long and was killed"));
            }
            cycles += system.step();

            if let Some(reader) = log_reader.as_mut() {
                if let Some(line) = read_log_line(reader)? {
                    if !system.rsp.compare_log_line(&line) {
                        return Err(String::from("golden log mismatch"));
                    }
                }
            }
        }

        let golden = fs::read(format!("{}.{}.golden", self.test_name, subtest))
            .map_err(|e| format!("cannot read golden output: {}", e))?;
        if golden.len() < self.output_size {
            return Err(format!(
                "golden file holds {} bytes, {} expected",
                golden.len(),
                self.output_size
            ));
        }

        for offset in 0..self.output_size {
            let actual = system.bus.read_byte(SP_DMEM_BASE + OUTPUT_BASE + offset as u32);
            let expected = golden[offset];
            if actual != expected {
                return Err(format!(
                    "output byte {}: expected {:02X}, actual {:02X}",
                    offset, expected, actual
                ));
            }
        }

        Ok(())
    }

    fn open_log(&self, subtest: &str) -> Result<Option<BzDecoder<File>>, String> {
        let path = format!("{}.{}.log.bz2", self.test_name, subtest);
        match File::open(&path) {
            Ok(file) => Ok(Some(BzDecoder::new(file))),
            Err(_) => Ok(None), // replay log is optional
        }
    }
}

/// One fixed-width log line, newline excluded; None at end of stream.
fn read_log_line(reader: &mut BzDecoder<File>) -> Result<Option<String>, String> {
    let mut line = vec![0u8; LOG_LINE_LENGTH - 1];
    match reader.read_exact(&mut line) {
        Ok(()) => {}
        Err(_) => return Ok(None),
    }
    let mut newline = [0u8; 1];
    let _ = reader.read_exact(&mut newline);
    String::from_utf8(line)
        .map(Some)
        .map_err(|e| format!("golden log is not ASCII: {}", e))
}
