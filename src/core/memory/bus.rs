use crate::core::dynarec::BlockCache;
use crate::core::memory::Bus;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

pub const RDRAM_SIZE: usize = 8 * 1024 * 1024; // with expansion pak
pub const SP_DMEM_BASE: u32 = 0x0400_0000;
pub const SP_IMEM_BASE: u32 = 0x0400_1000;
pub const SP_MEM_SIZE: usize = 0x1000;
pub const CART_BASE: u32 = 0x1000_0000;

/// RAM-backed physical bus: RDRAM, SP DMEM/IMEM and the cartridge image.
/// Everything is big-endian, as the guest sees it. MMIO devices are external
/// collaborators and are not modeled here; unmapped reads return zero.
///
/// Every write lands in the shared block cache's invalidation hook, so
/// self-modifying guests force recompilation.
pub struct SystemBus {
    rdram: Vec<u8>,
    sp_dmem: Vec<u8>,
    sp_imem: Vec<u8>,
    cart: Vec<u8>,
    blockcache: Rc<RefCell<BlockCache>>,
}

impl SystemBus {
    pub fn new(blockcache: Rc<RefCell<BlockCache>>) -> Self {
        SystemBus {
            rdram: vec![0; RDRAM_SIZE],
            sp_dmem: vec![0; SP_MEM_SIZE],
            sp_imem: vec![0; SP_MEM_SIZE],
            cart: Vec::new(),
            blockcache,
        }
    }

    /// Map a guest image at the cartridge base.
    pub fn load_cartridge(&mut self, image: Vec<u8>) {
        info!(
            "Loaded cartridge image: {} bytes, MD5 {:x}",
            image.len(),
            md5::compute(&image)
        );
        self.cart = image;
    }

    fn backing(&mut self, address: u32) -> Option<(&mut Vec<u8>, usize)> {
        let address = address as usize;
        if address < RDRAM_SIZE {
            return Some((&mut self.rdram, address));
        }
        let sp_base = SP_DMEM_BASE as usize;
        if (sp_base..sp_base + SP_MEM_SIZE).contains(&address) {
            return Some((&mut self.sp_dmem, address - sp_base));
        }
        let imem_base = SP_IMEM_BASE as usize;
        if (imem_base..imem_base + SP_MEM_SIZE).contains(&address) {
            return Some((&mut self.sp_imem, address - imem_base));
        }
        let cart_base = CART_BASE as usize;
        if address >= cart_base && address - cart_base < self.cart.len() {
            return Some((&mut self.cart, address - cart_base));
        }
        None
    }

    fn read_bytes<const N: usize>(&mut self, address: u32) -> [u8; N] {
        let mut out = [0u8; N];
        match self.backing(address) {
            Some((backing, offset)) if offset + N <= backing.len() => {
                out.copy_from_slice(&backing[offset..offset + N]);
            }
            _ => warn!("Read of unmapped physical address {:08X}", address),
        }
        out
    }

    fn write_bytes(&mut self, address: u32, bytes: &[u8]) {
        if address >= CART_BASE {
            warn!("Write to read-only cartridge address {:08X}", address);
            return;
        }
        let len = bytes.len();
        match self.backing(address) {
            Some((backing, offset)) if offset + len <= backing.len() => {
                backing[offset..offset + len].copy_from_slice(bytes);
            }
            _ => {
                warn!("Write to unmapped physical address {:08X}", address);
                return;
            }
        }
        self.blockcache.borrow_mut().invalidate(address);
    }
}

impl Bus for SystemBus {
    fn read_byte(&mut self, address: u32) -> u8 {
        self.read_bytes::<1>(address)[0]
    }

    fn read_half(&mut self, address: u32) -> u16 {
        u16::from_be_bytes(self.read_bytes(address))
    }

    fn read_word(&mut self, address: u32) -> u32 {
        u32::from_be_bytes(self.read_bytes(address))
    }

    fn read_dword(&mut self, address: u32) -> u64 {
        u64::from_be_bytes(self.read_bytes(address))
    }

    fn write_byte(&mut self, address: u32, value: u8) {
        self.write_bytes(address, &[value]);
    }

    fn write_half(&mut self, address: u32, value: u16) {
        self.write_bytes(address, &value.to_be_bytes());
    }

    fn write_word(&mut self, address: u32, value: u32) {
        self.write_bytes(address, &value.to_be_bytes());
    }

    fn write_dword(&mut self, address: u32, value: u64) {
        self.write_bytes(address, &value.to_be_bytes());
    }
}
