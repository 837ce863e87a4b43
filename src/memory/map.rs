//! Firmware memory map normalization.
//!
//! Grounded in `original_source/kernel/page.c`'s `union e820` handling:
//! convert `{base, length, type}` triples into inclusive page-number
//! ranges, rounding usable regions *inward* (so a partial page at either
//! end is never claimed as free) and unusable regions *outward* (so a
//! partial page touching a reserved region is never claimed as usable).

use alloc::vec::Vec;

use super::prelude::*;

/// One entry of the firmware-supplied memory map (§6 "External interfaces").
/// The boot collaborator is expected to have already translated raw
/// `{base, length, type}` triples into this (`type == 1` => `usable`).
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub usable: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizedRange {
    pub first: PageNumber,
    pub last: PageNumber,
    pub usable: bool,
}

fn addr_to_pgno_floor(addr: u64) -> u64 {
    addr / PAGE_SIZE_BYTES
}

/// Normalizes the firmware map into inclusive page-number ranges.
/// Entries entirely below 4 KiB are dropped (frame 0 is reserved as the
/// "no page" sentinel regardless of what the firmware says about it).
pub fn normalize(entries: &[MemoryMapEntry]) -> Vec<NormalizedRange> {
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.length == 0 {
            continue;
        }
        let end = entry.base + entry.length;
        if end <= PAGE_SIZE_BYTES {
            continue;
        }

        let (first, last) = if entry.usable {
            // Round inward: skip a partial leading or trailing page.
            let first = addr_to_pgno_floor(entry.base + PAGE_SIZE_BYTES - 1);
            let last_plus_one = addr_to_pgno_floor(end);
            if last_plus_one == 0 || last_plus_one <= first {
                continue;
            }
            (first, last_plus_one - 1)
        } else {
            // Round outward: a partial page anywhere in range is unusable.
            let first = addr_to_pgno_floor(entry.base);
            let last = addr_to_pgno_floor(end - 1);
            (first, last)
        };

        out.push(NormalizedRange {
            first: PageNumber(first),
            last: PageNumber(last),
            usable: entry.usable,
        });
    }

    out
}

/// Highest usable page number named by any entry, or 0 if none usable.
pub fn highest_usable(ranges: &[NormalizedRange]) -> u64 {
    ranges
        .iter()
        .filter(|r| r.usable)
        .map(|r| r.last.0)
        .max()
        .unwrap_or(0)
}

/// Categorizes a single frame against the normalized map: a page is
/// considered usable only if some usable range covers it and no
/// unusable range also covers it ("unusable wins on overlap").
pub fn is_usable(ranges: &[NormalizedRange], pgno: PageNumber) -> bool {
    let mut usable = false;
    for r in ranges {
        if pgno >= r.first && pgno <= r.last {
            if r.usable {
                usable = true;
            } else {
                return false;
            }
        }
    }
    usable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_4kib_is_dropped() {
        let ranges = normalize(&[MemoryMapEntry { base: 0, length: 0x800, usable: true }]);
        assert!(ranges.is_empty());
    }

    #[test]
    fn usable_rounds_inward() {
        // [0, 0x3000): pages 0,1,2 fully covered -> first=0 last=2
        let ranges = normalize(&[MemoryMapEntry { base: 0, length: 0x3000, usable: true }]);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].first, PageNumber(0));
        assert_eq!(ranges[0].last, PageNumber(2));
    }

    #[test]
    fn unusable_wins_on_overlap() {
        let ranges = normalize(&[
            MemoryMapEntry { base: 0, length: 0x10000, usable: true },
            MemoryMapEntry { base: 0x4000, length: 0x1000, usable: false },
        ]);
        assert!(is_usable(&ranges, PageNumber(3)));
        assert!(!is_usable(&ranges, PageNumber(4)));
        assert!(is_usable(&ranges, PageNumber(5)));
    }
}
