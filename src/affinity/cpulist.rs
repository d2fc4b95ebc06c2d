//! CPU list and mask text parsing
//!
//! Accepts the familiar `0-3,8-11` list format and mask text entered as
//! `0x`-prefixed hex or plain decimal.

use super::mask::AffinityMask;
use crate::error::{AffinityError, Result};
use std::collections::BTreeSet;

/// Largest CPU id accepted by the list parser (Linux `NR_CPUS` ceiling)
pub const MAX_CPU_ID: usize = 8191;

/// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
///
/// Malformed tokens are skipped. Ranges with a start above their end add
/// nothing. The result is ascending and de-duplicated.
pub fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = BTreeSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            if let (Some(start), Some(end)) = (parse_cpu_id(start), parse_cpu_id(end)) {
                cpus.extend(start..=end);
            }
        } else if let Some(cpu) = parse_cpu_id(part) {
            cpus.insert(cpu);
        }
    }

    cpus.into_iter().collect()
}

fn parse_cpu_id(s: &str) -> Option<usize> {
    let s = s.trim();
    // usize::from_str accepts a leading '+', which is not a valid list token
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<usize>().ok().filter(|&cpu| cpu <= MAX_CPU_ID)
}

/// Parse mask text: `0x`/`0X`-prefixed hexadecimal or plain decimal
pub fn parse_mask_text(s: &str) -> Result<AffinityMask> {
    let text = s.trim();

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AffinityError::format(s, "expected hexadecimal digits after 0x"));
        }
        return u64::from_str_radix(hex, 16)
            .map(AffinityMask::from_bits)
            .map_err(|e| AffinityError::format(s, e.to_string()));
    }

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AffinityError::format(s, "expected 0x-prefixed hex or decimal"));
    }

    text.parse::<u64>()
        .map(AffinityMask::from_bits)
        .map_err(|e| AffinityError::format(s, e.to_string()))
}

/// Emit a CPU id list in compact range form (e.g., [0,1,2,5] -> "0-2,5")
pub fn format_cpu_list(cpus: &[usize]) -> String {
    let mut sorted: Vec<usize> = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }

    parts.join(",")
}
