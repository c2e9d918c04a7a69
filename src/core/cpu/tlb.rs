use crate::core::cpu::cop0::{Cop0, EntryLo};
use tracing::debug;

pub const TLB_ENTRIES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAccess {
    Load,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbErrorKind {
    /// No entry matched: take the refill vector.
    Refill,
    /// An entry matched but its valid bit is clear.
    Invalid,
    /// A store hit an entry whose dirty bit is clear.
    Modification,
}

#[derive(Debug, Clone, Copy)]
pub struct TlbError {
    pub kind: TlbErrorKind,
    pub vaddr: u64,
    pub access: BusAccess,
}

/// One of the 32 entries. `entry_hi` keeps the VPN2+ASID exactly as written,
/// already stripped of the bits covered by `page_mask`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TlbEntry {
    pub entry_hi: u64,
    pub page_mask: u32,
    pub entry_lo0: u32,
    pub entry_lo1: u32,
    pub global: bool,
    pub initialized: bool,
}

impl TlbEntry {
    #[inline(always)]
    fn asid(&self) -> u8 {
        self.entry_hi as u8
    }
}

pub struct Tlb {
    entries: [TlbEntry; TLB_ENTRIES],
}

impl Tlb {
    pub fn new() -> Self {
        Tlb {
            entries: [TlbEntry::default(); TLB_ENTRIES],
        }
    }

    pub fn entry(&self, index: usize) -> &TlbEntry {
        &self.entries[index & (TLB_ENTRIES - 1)]
    }

    /// TLBWI/TLBWR: build an entry from the CP0 staging registers. The VPN
    /// bits covered by the page mask are stripped; the ASID is kept.
    pub fn write_entry(&mut self, index: usize, cp0_view: TlbWriteView) {
        let entry = TlbEntry {
            entry_hi: cp0_view.entry_hi & !(cp0_view.page_mask as u64),
            page_mask: cp0_view.page_mask,
            entry_lo0: cp0_view.entry_lo0 & !1,
            entry_lo1: cp0_view.entry_lo1 & !1,
            global: cp0_view.entry_lo0 & 1 != 0 && cp0_view.entry_lo1 & 1 != 0,
            initialized: true,
        };
        debug!(
            "TLB[{}] <- hi={:016X} mask={:08X} lo0={:08X} lo1={:08X} g={}",
            index & (TLB_ENTRIES - 1),
            entry.entry_hi,
            entry.page_mask,
            entry.entry_lo0,
            entry.entry_lo1,
            entry.global
        );
        self.entries[index & (TLB_ENTRIES - 1)] = entry;
    }

    /// TLBP: index of the entry matching EntryHi's VPN2+ASID, or None.
    pub fn probe(&self, entry_hi: u64) -> Option<usize> {
        let asid = entry_hi as u8;
        for (i, e) in self.entries.iter().enumerate() {
            if !e.initialized {
                continue;
            }
            let mask = e.page_mask as u64 | 0x1FFF;
            let vpn_match = (entry_hi & !mask & 0xC000_00FF_FFFF_E000)
                == (e.entry_hi & 0xC000_00FF_FFFF_E000);
            if vpn_match && (e.global || e.asid() == asid) {
                return Some(i);
            }
        }
        None
    }
}

/// Snapshot of the CP0 registers a TLB write consumes.
#[derive(Debug, Clone, Copy)]
pub struct TlbWriteView {
    pub entry_hi: u64,
    pub page_mask: u32,
    pub entry_lo0: u32,
    pub entry_lo1: u32,
}

/// Virtual to physical resolution with the fixed-mapping segment rules.
/// kseg0/kseg1 bypass the TLB; everything else probes it. The caller owns
/// latching BadVAddr/EntryHi and mapping the error into an exception code.
pub fn resolve_virtual_address(
    vaddr: u64,
    access: BusAccess,
    cp0: &Cop0,
) -> Result<u32, TlbError> {
    let va = vaddr as u32;
    match va >> 29 {
        // 0x80000000..=0x9FFFFFFF kseg0, 0xA0000000..=0xBFFFFFFF kseg1
        0b100 | 0b101 => Ok(va & 0x1FFF_FFFF),
        // kuseg / ksseg / kseg3 are mapped
        _ => resolve_mapped(vaddr, access, cp0),
    }
}

fn resolve_mapped(vaddr: u64, access: BusAccess, cp0: &Cop0) -> Result<u32, TlbError> {
    let asid = cp0.entry_hi.asid();
    for e in cp0.tlb.entries.iter() {
        if !e.initialized {
            continue;
        }
        let mask = e.page_mask as u64 | 0x1FFF;
        let vpn_match =
            (vaddr & !mask & 0xC000_00FF_FFFF_E000) == (e.entry_hi & 0xC000_00FF_FFFF_E000);
        if !vpn_match || (!e.global && e.asid() != asid) {
            continue;
        }
        // even/odd half selected by the bit just above the page offset
        let offset_mask = (mask >> 1) as u32;
        let odd = vaddr & (offset_mask as u64 + 1) != 0;
        let lo = EntryLo {
            raw: if odd { e.entry_lo1 } else { e.entry_lo0 },
        };
        if !lo.valid() {
            return Err(TlbError {
                kind: TlbErrorKind::Invalid,
                vaddr,
                access,
            });
        }
        if access == BusAccess::Store && !lo.dirty() {
            return Err(TlbError {
                kind: TlbErrorKind::Modification,
                vaddr,
                access,
            });
        }
        return Ok(lo.pfn() << 12 | vaddr as u32 & offset_mask);
    }
    Err(TlbError {
        kind: TlbErrorKind::Refill,
        vaddr,
        access,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp0_with_entry(vpn2: u64, asid: u8, pfn0: u32, pfn1: u32, flags: u32) -> Cop0 {
        let mut cp0 = Cop0::new();
        cp0.tlb.write_entry(
            0,
            TlbWriteView {
                entry_hi: vpn2 << 13 | asid as u64,
                page_mask: 0,
                entry_lo0: pfn0 << 6 | flags,
                entry_lo1: pfn1 << 6 | flags,
            },
        );
        cp0.entry_hi.raw = asid as u64;
        cp0
    }

    #[test]
    fn kseg_bypasses_tlb() {
        let cp0 = Cop0::new();
        assert_eq!(
            resolve_virtual_address(0xFFFF_FFFF_8000_1000, BusAccess::Load, &cp0).unwrap(),
            0x1000
        );
        assert_eq!(
            resolve_virtual_address(0xFFFF_FFFF_A000_1000, BusAccess::Load, &cp0).unwrap(),
            0x1000
        );
    }

    #[test]
    fn mapped_hit_selects_even_odd_half() {
        // valid + dirty + global
        let cp0 = cp0_with_entry(0, 0, 0x100, 0x200, 0b111);
        let even = resolve_virtual_address(0x0000_0123, BusAccess::Load, &cp0).unwrap();
        let odd = resolve_virtual_address(0x0000_1123, BusAccess::Load, &cp0).unwrap();
        assert_eq!(even, 0x100 << 12 | 0x123);
        assert_eq!(odd, 0x200 << 12 | 0x123);
    }

    #[test]
    fn miss_reports_refill() {
        let cp0 = Cop0::new();
        let err = resolve_virtual_address(0x0000_1000, BusAccess::Load, &cp0).unwrap_err();
        assert_eq!(err.kind, TlbErrorKind::Refill);
        assert_eq!(err.vaddr, 0x1000);
    }

    #[test]
    fn invalid_and_modification_reported() {
        // valid bit clear
        let cp0 = cp0_with_entry(0, 0, 0x100, 0x100, 0b001);
        let err = resolve_virtual_address(0x10, BusAccess::Load, &cp0).unwrap_err();
        assert_eq!(err.kind, TlbErrorKind::Invalid);

        // valid but clean: stores fault, loads succeed
        let cp0 = cp0_with_entry(0, 0, 0x100, 0x100, 0b011);
        assert!(resolve_virtual_address(0x10, BusAccess::Load, &cp0).is_ok());
        let err = resolve_virtual_address(0x10, BusAccess::Store, &cp0).unwrap_err();
        assert_eq!(err.kind, TlbErrorKind::Modification);
    }

    #[test]
    fn asid_mismatch_misses_unless_global() {
        let mut cp0 = cp0_with_entry(0, 7, 0x100, 0x100, 0b110); // valid+dirty, not global
        cp0.entry_hi.raw = 3; // running ASID differs
        let err = resolve_virtual_address(0x10, BusAccess::Load, &cp0).unwrap_err();
        assert_eq!(err.kind, TlbErrorKind::Refill);

        let cp0 = cp0_with_entry(0, 7, 0x100, 0x100, 0b111); // global
        assert!(resolve_virtual_address(0x10, BusAccess::Load, &cp0).is_ok());
    }

    #[test]
    fn probe_finds_matching_entry() {
        let cp0 = cp0_with_entry(0x40, 5, 0x100, 0x100, 0b110);
        assert_eq!(cp0.tlb.probe(0x40 << 13 | 5), Some(0));
        assert_eq!(cp0.tlb.probe(0x41 << 13 | 5), None);
        assert_eq!(cp0.tlb.probe(0x40 << 13 | 6), None);
    }
}
