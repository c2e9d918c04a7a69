use crate::core::cpu::instruction::{Category, Instruction, Opcode};
use crate::core::cpu::tlb::BusAccess;
use crate::core::cpu::{CYCLES_PER_INSTR, Cpu, CpuException, OpHandler};
use crate::core::dynarec::arena::{BlockRef, CodeArena};
use crate::core::memory::Bus;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

pub mod arena;

pub const BLOCKCACHE_OUTER_SHIFT: u32 = 12;
pub const BLOCKCACHE_PAGE_SIZE: u32 = 1 << BLOCKCACHE_OUTER_SHIFT;
pub const BLOCKCACHE_INNER_SIZE: usize = (BLOCKCACHE_PAGE_SIZE >> 2) as usize;
const BLOCKCACHE_OUTER_SIZE: usize = 1 << (32 - BLOCKCACHE_OUTER_SHIFT);

pub const DEFAULT_ARENA_CAPACITY: usize = 1 << 22;

/// One compiled instruction. The handler is the same function the
/// interpreter dispatches through, so the two execution modes cannot drift.
/// prev_pc needs no explicit flush before exception-possible ops: the
/// per-step PC advance keeps it correct at all times.
#[derive(Clone, Copy)]
pub struct BlockStep {
    pub handler: OpHandler,
    pub instr: u32,
    /// Return from the block early when the op raised an exception.
    pub check_exception: bool,
    /// Set on a branch-likely op: leaving the block when the branch was not
    /// taken keeps the nullified delay slot from executing.
    pub exit_if_branch_not_taken: bool,
}

/// Cache slot state machine. `Missing` is the compile-on-demand trampoline;
/// invalidation drops the whole owning page back to it.
#[derive(Clone, Copy)]
enum BlockSlot {
    Missing,
    Compiled(BlockRef),
}

/// Two-level sparse table keyed by physical address, one slot per 4-byte
/// instruction on a page. Outer slots allocate lazily on first touch.
pub struct BlockCache {
    outer: Vec<Option<Box<[BlockSlot]>>>,
    /// Dual registration for blocks that cross into the next page to pick
    /// up a delay slot: a marked page co-owns a block rooted on its
    /// predecessor, so invalidating it must drop the predecessor too.
    crossed_into: Vec<bool>,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache {
            outer: (0..BLOCKCACHE_OUTER_SIZE).map(|_| None).collect(),
            crossed_into: vec![false; BLOCKCACHE_OUTER_SIZE],
        }
    }

    #[inline(always)]
    fn indices(physical: u32) -> (usize, usize) {
        let outer = (physical >> BLOCKCACHE_OUTER_SHIFT) as usize;
        let inner = ((physical & (BLOCKCACHE_PAGE_SIZE - 1)) >> 2) as usize;
        (outer, inner)
    }

    fn lookup(&self, physical: u32) -> Option<BlockRef> {
        let (outer, inner) = Self::indices(physical);
        match self.outer[outer].as_ref()? [inner] {
            BlockSlot::Missing => None,
            BlockSlot::Compiled(block) => Some(block),
        }
    }

    fn insert(&mut self, physical: u32, block: BlockRef, instructions: usize) {
        let (outer, inner) = Self::indices(physical);
        let page = self.outer[outer]
            .get_or_insert_with(|| vec![BlockSlot::Missing; BLOCKCACHE_INNER_SIZE].into());
        page[inner] = BlockSlot::Compiled(block);

        // a block that picked up its delay slot from the next page is
        // registered with both owners
        let last = physical.wrapping_add((instructions as u32 - 1) * 4);
        let last_outer = (last >> BLOCKCACHE_OUTER_SHIFT) as usize;
        if last_outer != outer {
            self.crossed_into[last_outer] = true;
        }
    }

    /// Drop the whole outer page owning `physical`. Over-invalidation is
    /// fine; keeping stale code is not.
    pub fn invalidate(&mut self, physical: u32) {
        let outer = (physical >> BLOCKCACHE_OUTER_SHIFT) as usize;
        self.outer[outer] = None;
        if outer > 0 && self.crossed_into[outer] {
            // a block rooted on the previous page ends in this one
            self.crossed_into[outer] = false;
            self.outer[outer - 1] = None;
        }
    }
}

pub struct Dynarec {
    cache: Rc<RefCell<BlockCache>>,
    arena: CodeArena,
}

impl Dynarec {
    pub fn new(arena_capacity: usize) -> Self {
        Dynarec {
            cache: Rc::new(RefCell::new(BlockCache::new())),
            arena: CodeArena::new(arena_capacity),
        }
    }

    /// The invalidation hook handed to the bus collaborator.
    pub fn cache_handle(&self) -> Rc<RefCell<BlockCache>> {
        self.cache.clone()
    }

    pub fn arena_used(&self) -> usize {
        self.arena.used()
    }

    /// One block of CPU work: resolve the PC, compile on a missing slot,
    /// run the block, return the cycles taken.
    pub fn step(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) -> u64 {
        let physical = match crate::core::cpu::tlb::resolve_virtual_address(
            cpu.pc,
            BusAccess::Load,
            &cpu.cp0,
        ) {
            Ok(physical) => physical,
            Err(err) => {
                let pc = cpu.pc;
                cpu.raise_at(pc, CpuException::Tlb(err));
                cpu.exception = false;
                return CYCLES_PER_INSTR;
            }
        };

        let block = self.cache.borrow().lookup(physical);
        let block = match block {
            Some(block) => block,
            None => {
                debug!("Compiling new block at {:016X} / {:08X}", cpu.pc, physical);
                let block = compile_block(&mut self.arena, cpu, bus, physical);
                let instructions = self.arena.block(block).len();
                self.cache.borrow_mut().insert(physical, block, instructions);
                block
            }
        };

        let mut cycles = 0;
        for step in self.arena.block(block) {
            cpu.advance_pc();
            cycles += CYCLES_PER_INSTR;
            let result = (step.handler)(cpu, bus, &Instruction(step.instr));
            cpu.dispatch_result(result);
            if step.check_exception && cpu.exception {
                cpu.exception = false;
                return cycles;
            }
            if step.exit_if_branch_not_taken && !cpu.branch {
                return cycles;
            }
        }
        cycles
    }
}

/// Walk the decoder from `start` and emit one straight-line block, with the
/// single-delay-slot discipline on branch terminators.
fn compile_block(
    arena: &mut CodeArena,
    cpu: &Cpu,
    bus: &mut dyn Bus,
    start: u32,
) -> BlockRef {
    let mut steps: Vec<BlockStep> = Vec::new();
    let mut physical = start;
    let mut instructions_left_in_block: i32 = -1;
    let mut prev_category = Category::Normal;

    loop {
        let raw = bus.read_word(physical);
        let next_physical = physical.wrapping_add(4);
        let instr = Instruction(raw);
        let opcode = Opcode::from_instruction(&instr);
        let category = opcode.category();

        instructions_left_in_block -= 1;

        let mut step = BlockStep {
            handler: cpu.handler(opcode),
            instr: raw,
            check_exception: opcode.exception_possible(),
            exit_if_branch_not_taken: false,
        };

        let instr_ends_block = match category {
            Category::Normal => instructions_left_in_block == 0,
            Category::Branch => {
                if prev_category == Category::Branch || prev_category == Category::BranchLikely {
                    panic!(
                        "branch in a branch delay slot at physical 0x{:08X} (instruction 0x{:08X})",
                        physical, raw
                    );
                }
                instructions_left_in_block = 1; // emit the delay slot
                false
            }
            Category::BranchLikely => {
                if prev_category == Category::Branch || prev_category == Category::BranchLikely {
                    panic!(
                        "branch in a branch likely delay slot at physical 0x{:08X} (instruction 0x{:08X})",
                        physical, raw
                    );
                }
                // not taken nullifies the slot, so the block must be left
                // before the emitted delay slot runs
                step.exit_if_branch_not_taken = true;
                instructions_left_in_block = 1;
                false
            }
            // stores may invalidate the page this block lives on; TLB writes
            // change translation; ERET takes next_pc from CP0
            Category::Eret | Category::TlbWrite | Category::Store => true,
        };

        steps.push(step);

        let mut page_boundary_ends_block = next_physical & (BLOCKCACHE_PAGE_SIZE - 1) == 0;
        // A delay slot that is the first word of the next page is pulled
        // into this block anyway; the cache dual-registers the block so a
        // write to either page drops it.
        if instructions_left_in_block == 1 {
            page_boundary_ends_block = false;
        }

        if instr_ends_block || page_boundary_ends_block {
            break;
        }

        physical = next_physical;
        prev_category = category;
    }

    debug!(
        "Compiled {} instruction block at {:08X}, arena use {}",
        steps.len(),
        start,
        arena.used() + steps.len()
    );
    arena.alloc(&steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cpu::OperationException;

    fn nop_handler(_: &mut Cpu, _: &mut dyn Bus, _: &Instruction) -> OperationException {
        Ok(())
    }

    #[test]
    fn outer_indexing_is_page_granular() {
        let (o1, i1) = BlockCache::indices(0x0000_1000);
        let (o2, i2) = BlockCache::indices(0x0000_1FFC);
        assert_eq!(o1, o2);
        assert_eq!(i1, 0);
        assert_eq!(i2, BLOCKCACHE_INNER_SIZE - 1);
        let (o3, _) = BlockCache::indices(0x0000_2000);
        assert_ne!(o1, o3);
    }

    fn nop_step() -> BlockStep {
        BlockStep {
            handler: nop_handler,
            instr: 0,
            check_exception: false,
            exit_if_branch_not_taken: false,
        }
    }

    #[test]
    fn invalidate_drops_whole_page() {
        let mut cache = BlockCache::new();
        let mut arena = CodeArena::new(16);
        let block = arena.alloc(&[nop_step()]);
        cache.insert(0x1000, block, 1);
        cache.insert(0x1100, block, 1);
        assert!(cache.lookup(0x1000).is_some());
        cache.invalidate(0x1104);
        assert!(cache.lookup(0x1000).is_none());
        assert!(cache.lookup(0x1100).is_none());
    }

    #[test]
    fn cross_page_block_is_registered_with_both_owners() {
        let mut cache = BlockCache::new();
        let mut arena = CodeArena::new(16);
        // three instructions from 0xFF8: the last lands on the next page
        let block = arena.alloc(&[nop_step(), nop_step(), nop_step()]);
        cache.insert(0xFF8, block, 3);
        assert!(cache.lookup(0xFF8).is_some());

        // writing the delay-slot page must drop the owning page too
        cache.invalidate(0x1000);
        assert!(cache.lookup(0xFF8).is_none());

        // the co-ownership mark is consumed: the next page-1 invalidation
        // stands alone
        let block = arena.alloc(&[nop_step()]);
        cache.insert(0xFF8, block, 1);
        cache.invalidate(0x1000);
        assert!(cache.lookup(0xFF8).is_some());
    }
}
