//! Hint stream tables.
//!
//! Three bit-packed tables, MSB-first, each aligned to a byte boundary:
//! the page-offset table, the shared-object table, and (when the document
//! has outlines) a generic table locating them. Built after pass 1 of the
//! linearized write, once every object offset and length is known.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Inputs gathered by the linearizer.
pub(crate) struct HintInputs<'a> {
    /// Top-level item ids per page; index 0 is the first-page section.
    pub page_item_ids: &'a [Vec<u32>],
    /// Shared-object identifiers referenced by each page.
    pub page_shared: &'a [Vec<u32>],
    /// Item ids of the first-page section (the leading shared entries).
    pub part6_ids: &'a [u32],
    /// Item ids of the shared-object section.
    pub part8_ids: &'a [u32],
    /// Item ids of the outline objects, if any.
    pub outline_ids: &'a [u32],
    /// New id of the first page's page object.
    pub first_page_id: u32,
    /// Final byte offset of every uncompressed object.
    pub offsets: &'a HashMap<u32, u64>,
    /// Byte length of every uncompressed object.
    pub lengths: &'a HashMap<u32, u64>,
}

/// Packed hint data plus the byte offsets stored in the hint stream
/// dictionary.
pub(crate) struct HintTables {
    /// The concatenated tables.
    pub data: Vec<u8>,
    /// Offset of the shared-object table (/S).
    pub shared_offset: u64,
    /// Offset of the outline table (/O), when present.
    pub outline_offset: Option<u64>,
}

/// Bits needed to represent a value.
pub(crate) fn bits_needed(value: u64) -> u32 {
    if value == 0 {
        0
    } else {
        64 - value.leading_zeros()
    }
}

/// Minimum and delta bit width for a set of values.
pub(crate) fn delta_encoding(values: &[u64]) -> (u64, u32) {
    let Some(&min) = values.iter().min() else {
        return (0, 0);
    };
    let max_delta = values.iter().map(|&v| v - min).max().unwrap_or(0);
    (min, bits_needed(max_delta))
}

/// MSB-first bit packer.
pub(crate) struct BitWriter {
    buffer: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current: 0,
            filled: 0,
        }
    }

    pub fn write_bits(&mut self, value: u64, num_bits: u32) {
        for i in (0..num_bits).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.current = (self.current << 1) | bit;
            self.filled += 1;
            if self.filled == 8 {
                self.buffer.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    /// Pad to the next byte boundary with zero bits.
    pub fn align(&mut self) {
        if self.filled > 0 {
            self.current <<= 8 - self.filled;
            self.buffer.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len() + usize::from(self.filled > 0)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.buffer
    }
}

struct Span {
    offset: u64,
    length: u64,
    nobjects: u64,
}

fn span_of(ids: &[u32], inputs: &HintInputs<'_>) -> Result<Span> {
    let first = ids
        .first()
        .ok_or_else(|| Error::Internal("empty page span in hint data".to_string()))?;
    let last = ids.last().expect("non-empty");
    let start = *inputs
        .offsets
        .get(first)
        .ok_or_else(|| Error::Internal(format!("no offset recorded for object {}", first)))?;
    let end = inputs.offsets.get(last).copied().unwrap_or(start)
        + inputs.lengths.get(last).copied().unwrap_or(0);
    Ok(Span {
        offset: start,
        length: end.saturating_sub(start),
        nobjects: ids.len() as u64,
    })
}

/// Build the packed hint tables.
pub(crate) fn build_hint_tables(inputs: &HintInputs<'_>) -> Result<HintTables> {
    let npages = inputs.page_item_ids.len();
    let mut spans = Vec::with_capacity(npages);
    for ids in inputs.page_item_ids {
        spans.push(span_of(ids, inputs)?);
    }

    let nobject_values: Vec<u64> = spans.iter().map(|s| s.nobjects).collect();
    let length_values: Vec<u64> = spans.iter().map(|s| s.length).collect();
    let (min_nobjects, nbits_nobjects) = delta_encoding(&nobject_values);
    let (min_page_length, nbits_page_length) = delta_encoding(&length_values);

    let max_nshared = inputs
        .page_shared
        .iter()
        .map(|s| s.len() as u64)
        .max()
        .unwrap_or(0);
    let nbits_nshared = bits_needed(max_nshared);
    let max_identifier = inputs
        .page_shared
        .iter()
        .flat_map(|s| s.iter().map(|&v| v as u64))
        .max()
        .unwrap_or(0);
    let nbits_identifier = bits_needed(max_identifier);

    let first_page_offset = inputs
        .offsets
        .get(&inputs.first_page_id)
        .copied()
        .unwrap_or(0);

    let mut w = BitWriter::new();

    // Page-offset header: 13 fields. The content-stream columns mirror the
    // page columns and the shared denominator is fixed at 4, matching what
    // established viewers emit.
    w.write_bits(min_nobjects, 32);
    w.write_bits(first_page_offset, 32);
    w.write_bits(nbits_nobjects as u64, 16);
    w.write_bits(min_page_length, 32);
    w.write_bits(nbits_page_length as u64, 16);
    w.write_bits(0, 32); // least content-stream offset
    w.write_bits(0, 16); // bits for content-stream offset deltas
    w.write_bits(min_page_length, 32);
    w.write_bits(nbits_page_length as u64, 16);
    w.write_bits(nbits_nshared as u64, 16);
    w.write_bits(nbits_identifier as u64, 16);
    w.write_bits(0, 16); // bits for shared-object numerators
    w.write_bits(4, 16); // shared-object fraction denominator

    for (i, span) in spans.iter().enumerate() {
        w.write_bits(span.nobjects - min_nobjects, nbits_nobjects);
        w.write_bits(span.length - min_page_length, nbits_page_length);
        let shared: &[u32] = if i == 0 { &[] } else { &inputs.page_shared[i] };
        w.write_bits(shared.len() as u64, nbits_nshared);
        for &identifier in shared {
            w.write_bits(identifier as u64, nbits_identifier);
            w.write_bits(0, 0); // numerator
        }
        w.write_bits(0, 0); // content-stream offset delta
        w.write_bits(span.length - min_page_length, nbits_page_length);
    }
    w.align();

    let shared_offset = w.byte_len() as u64;

    // Shared-object table: first-page entries (part 6) followed by the
    // shared section (part 8). Every group holds exactly one object.
    let shared_ids: Vec<u32> = inputs
        .part6_ids
        .iter()
        .chain(inputs.part8_ids.iter())
        .copied()
        .collect();
    let group_lengths: Vec<u64> = shared_ids
        .iter()
        .map(|id| inputs.lengths.get(id).copied().unwrap_or(0))
        .collect();
    let (min_group_length, nbits_group_length) = delta_encoding(&group_lengths);

    let first_shared = inputs.part8_ids.first().copied().unwrap_or(0);
    let first_shared_offset = inputs
        .offsets
        .get(&first_shared)
        .copied()
        .unwrap_or(0);

    w.write_bits(first_shared as u64, 32);
    w.write_bits(first_shared_offset, 32);
    w.write_bits(inputs.part6_ids.len() as u64, 32);
    w.write_bits(shared_ids.len() as u64, 32);
    w.write_bits(0, 16); // bits for object counts: every group has one
    w.write_bits(min_group_length, 32);
    w.write_bits(nbits_group_length as u64, 16);

    for length in &group_lengths {
        w.write_bits(length - min_group_length, nbits_group_length);
        w.write_bits(0, 1); // no signature
        w.write_bits(0, 0); // nobjects minus one
    }
    w.align();

    // Outline table, only when outlines exist.
    let outline_offset = if inputs.outline_ids.is_empty() {
        None
    } else {
        let offset = w.byte_len() as u64;
        let first = inputs.outline_ids[0];
        let first_offset = inputs.offsets.get(&first).copied().unwrap_or(0);
        let total: u64 = inputs
            .outline_ids
            .iter()
            .map(|id| inputs.lengths.get(id).copied().unwrap_or(0))
            .sum();
        w.write_bits(first as u64, 32);
        w.write_bits(first_offset, 32);
        w.write_bits(inputs.outline_ids.len() as u64, 32);
        w.write_bits(total, 32);
        w.align();
        Some(offset)
    };

    Ok(HintTables {
        data: w.finish(),
        shared_offset,
        outline_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_needed() {
        assert_eq!(bits_needed(0), 0);
        assert_eq!(bits_needed(1), 1);
        assert_eq!(bits_needed(2), 2);
        assert_eq!(bits_needed(3), 2);
        assert_eq!(bits_needed(255), 8);
        assert_eq!(bits_needed(256), 9);
    }

    #[test]
    fn test_delta_encoding() {
        let (min, bits) = delta_encoding(&[10, 15, 20, 25]);
        assert_eq!(min, 10);
        assert_eq!(bits, 4);
        assert_eq!(delta_encoding(&[]), (0, 0));
    }

    #[test]
    fn test_bit_writer_packing() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0b1100, 4);
        w.write_bits(0b1, 1);
        assert_eq!(w.finish(), vec![0b1011_1001]);
    }

    #[test]
    fn test_bit_writer_align_pads_with_zeros() {
        let mut w = BitWriter::new();
        w.write_bits(0b1, 1);
        w.align();
        w.write_bits(0xAB, 8);
        assert_eq!(w.finish(), vec![0b1000_0000, 0xAB]);
    }

    fn sample_inputs() -> (
        Vec<Vec<u32>>,
        Vec<Vec<u32>>,
        Vec<u32>,
        Vec<u32>,
        Vec<u32>,
        HashMap<u32, u64>,
        HashMap<u32, u64>,
    ) {
        // Two pages: first-page span objects 10, 11; second page span 1, 2.
        // Object 3 is shared between the pages.
        let page_item_ids = vec![vec![10, 11], vec![1, 2]];
        let page_shared = vec![vec![], vec![2]];
        let part6_ids = vec![10, 11];
        let part8_ids = vec![3];
        let outline_ids = vec![];
        let mut offsets = HashMap::new();
        let mut lengths = HashMap::new();
        for (id, offset, length) in [
            (1u32, 500u64, 40u64),
            (2, 540, 60),
            (3, 600, 30),
            (10, 100, 120),
            (11, 220, 80),
        ] {
            offsets.insert(id, offset);
            lengths.insert(id, length);
        }
        (page_item_ids, page_shared, part6_ids, part8_ids, outline_ids, offsets, lengths)
    }

    #[test]
    fn test_hint_tables_shape() {
        let (page_item_ids, page_shared, part6_ids, part8_ids, outline_ids, offsets, lengths) =
            sample_inputs();
        let inputs = HintInputs {
            page_item_ids: &page_item_ids,
            page_shared: &page_shared,
            part6_ids: &part6_ids,
            part8_ids: &part8_ids,
            outline_ids: &outline_ids,
            first_page_id: 10,
            offsets: &offsets,
            lengths: &lengths,
        };
        let tables = build_hint_tables(&inputs).unwrap();
        // Page-offset header alone is 36 bytes; entries follow.
        assert!(tables.shared_offset >= 36);
        assert!(tables.data.len() as u64 > tables.shared_offset);
        assert_eq!(tables.outline_offset, None);
    }

    #[test]
    fn test_shared_identifiers_in_bounds() {
        let (page_item_ids, page_shared, part6_ids, part8_ids, outline_ids, offsets, lengths) =
            sample_inputs();
        let nshared_total = part6_ids.len() + part8_ids.len();
        for shared in &page_shared {
            for &id in shared {
                assert!((id as usize) < nshared_total);
            }
        }
        let inputs = HintInputs {
            page_item_ids: &page_item_ids,
            page_shared: &page_shared,
            part6_ids: &part6_ids,
            part8_ids: &part8_ids,
            outline_ids: &outline_ids,
            first_page_id: 10,
            offsets: &offsets,
            lengths: &lengths,
        };
        assert!(build_hint_tables(&inputs).is_ok());
    }

    #[test]
    fn test_page_span_object_counts() {
        let (page_item_ids, page_shared, part6_ids, part8_ids, outline_ids, offsets, lengths) =
            sample_inputs();
        let inputs = HintInputs {
            page_item_ids: &page_item_ids,
            page_shared: &page_shared,
            part6_ids: &part6_ids,
            part8_ids: &part8_ids,
            outline_ids: &outline_ids,
            first_page_id: 10,
            offsets: &offsets,
            lengths: &lengths,
        };
        // min_nobjects + delta must reconstruct each span's object count.
        let spans: Vec<u64> = page_item_ids.iter().map(|ids| ids.len() as u64).collect();
        let (min, _) = delta_encoding(&spans);
        for span in spans {
            assert_eq!(min + (span - min), span);
        }
        assert!(build_hint_tables(&inputs).is_ok());
    }

    #[test]
    fn test_outline_table_present_when_outlines_exist() {
        let (page_item_ids, page_shared, part6_ids, part8_ids, _, offsets, mut lengths) =
            sample_inputs();
        let outline_ids = vec![4u32];
        lengths.insert(4, 25);
        let mut offsets = offsets;
        offsets.insert(4, 700);
        let inputs = HintInputs {
            page_item_ids: &page_item_ids,
            page_shared: &page_shared,
            part6_ids: &part6_ids,
            part8_ids: &part8_ids,
            outline_ids: &outline_ids,
            first_page_id: 10,
            offsets: &offsets,
            lengths: &lengths,
        };
        let tables = build_hint_tables(&inputs).unwrap();
        let outline_offset = tables.outline_offset.unwrap();
        assert!(outline_offset > tables.shared_offset);
        // Four 32-bit fields.
        assert_eq!(tables.data.len() as u64, outline_offset + 16);
    }
}
