// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal LZMA1 range-coder decoder, sized for one compressed
//! block's worth of output (at most [`crate::layout::DECOMPRESSED_WINDOW`]
//! bytes) and reset fresh for every block — the "micro" in micro-LZMA:
//! no `.lzma` container, no external dictionary carried across
//! blocks, literal/length/distance probabilities fixed at standard
//! defaults (`lc=3, lp=0, pb=2`) rather than read from a properties
//! byte, since the on-disk format never stores one.

use crate::result::{Error, Result};
use alloc::vec::Vec;

const TOP_VALUE: u32 = 1 << 24;
const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
const NUM_MOVE_BITS: u32 = 5;
const PROB_INIT: u16 = (BIT_MODEL_TOTAL / 2) as u16;

const NUM_STATES: usize = 12;
const NUM_POS_SLOTS: usize = 64;
const NUM_LEN_TO_POS_STATES: usize = 4;
const END_POS_MODEL_INDEX: u32 = 14;
const NUM_ALIGN_BITS: u32 = 4;
const NUM_FULL_DISTANCES: u32 = 1 << (END_POS_MODEL_INDEX / 2);
const POS_DECODERS_LEN: usize = (NUM_FULL_DISTANCES - END_POS_MODEL_INDEX + 1) as usize;
const MATCH_MIN_LEN: u32 = 2;
const EOS_DISTANCE: u32 = 0xFFFF_FFFF;

/// Fixed LZMA coder parameters. The format never stores a properties
/// byte, so every block is decoded with the conventional defaults.
#[derive(Clone, Copy, Debug)]
pub struct Params {
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
}

impl Default for Params {
    fn default() -> Params {
        Params { lc: 3, lp: 0, pb: 2 }
    }
}

struct RangeDecoder<'a> {
    input: &'a [u8],
    pos: usize,
    code: u32,
    range: u32,
}

impl<'a> RangeDecoder<'a> {
    fn new(input: &'a [u8]) -> Result<RangeDecoder<'a>> {
        if input.len() < 5 {
            return Err(Error::Corrupt);
        }
        let mut code = 0u32;
        for &b in &input[1..5] {
            code = (code << 8) | b as u32;
        }
        Ok(RangeDecoder { input, pos: 5, code, range: 0xFFFF_FFFF })
    }

    fn next_byte(&mut self) -> u8 {
        let b = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    fn normalize(&mut self) {
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.code = (self.code << 8) | self.next_byte() as u32;
        }
    }

    fn decode_direct_bits(&mut self, num_bits: u32) -> u32 {
        let mut result = 0u32;
        for _ in 0..num_bits {
            self.range >>= 1;
            self.code = self.code.wrapping_sub(self.range);
            let t = 0u32.wrapping_sub(self.code >> 31);
            self.code = self.code.wrapping_add(self.range & t);
            self.normalize();
            result = (result << 1).wrapping_add(t.wrapping_add(1));
        }
        result
    }

    fn decode_bit(&mut self, prob: &mut u16) -> u32 {
        let bound = (self.range >> NUM_BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        let bit;
        if self.code < bound {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> NUM_MOVE_BITS) as u16;
            bit = 0;
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> NUM_MOVE_BITS;
            bit = 1;
        }
        self.normalize();
        bit
    }

    fn decode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32) -> u32 {
        let mut m = 1usize;
        for _ in 0..num_bits {
            m = (m << 1) | self.decode_bit(&mut probs[m]) as usize;
        }
        m as u32 - (1 << num_bits)
    }

    fn decode_bit_tree_reverse_at(&mut self, probs: &mut [u16], offset: usize, num_bits: u32) -> u32 {
        let mut m = 1usize;
        let mut symbol = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[offset + m]);
            m = (m << 1) | bit as usize;
            symbol |= bit << i;
        }
        symbol
    }
}

struct LenDecoder {
    choice: u16,
    choice2: u16,
    low: [[u16; 8]; 16],
    mid: [[u16; 8]; 16],
    high: [u16; 256],
}

impl LenDecoder {
    fn new() -> LenDecoder {
        LenDecoder {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; 16],
            mid: [[PROB_INIT; 8]; 16],
            high: [PROB_INIT; 256],
        }
    }

    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> u32 {
        if rc.decode_bit(&mut self.choice) == 0 {
            return rc.decode_bit_tree(&mut self.low[pos_state], 3);
        }
        if rc.decode_bit(&mut self.choice2) == 0 {
            return 8 + rc.decode_bit_tree(&mut self.mid[pos_state], 3);
        }
        16 + rc.decode_bit_tree(&mut self.high, 8)
    }
}

fn state_after_literal(state: u32) -> u32 {
    if state < 4 {
        0
    } else if state < 10 {
        state - 3
    } else {
        state - 6
    }
}

fn state_after_match(state: u32) -> u32 {
    if state < 7 { 7 } else { 10 }
}

fn state_after_rep(state: u32) -> u32 {
    if state < 7 { 8 } else { 11 }
}

fn state_after_short_rep(state: u32) -> u32 {
    if state < 7 { 9 } else { 11 }
}

fn literal_state_index(lp: u32, lc: u32, pos: u32, prev_byte: u8) -> usize {
    let pos_mask = (1u32 << lp) - 1;
    (((pos & pos_mask) << lc) + ((prev_byte as u32) >> (8 - lc))) as usize
}

fn decode_literal_normal(rc: &mut RangeDecoder<'_>, probs: &mut [u16]) -> u8 {
    let mut symbol = 1usize;
    while symbol < 0x100 {
        symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol]) as usize;
    }
    (symbol & 0xFF) as u8
}

fn decode_literal_matched(rc: &mut RangeDecoder<'_>, probs: &mut [u16], match_byte: u8) -> u8 {
    let mut symbol = 1usize;
    let mut match_byte = match_byte as u32;
    while symbol < 0x100 {
        match_byte <<= 1;
        let match_bit = (match_byte >> 8) & 1;
        let bit = rc.decode_bit(&mut probs[(((1 + match_bit) << 8) + symbol as u32) as usize]);
        symbol = (symbol << 1) | bit as usize;
        if match_bit != bit {
            while symbol < 0x100 {
                symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol]) as usize;
            }
            break;
        }
    }
    (symbol & 0xFF) as u8
}

struct Probs {
    is_match: [[u16; 16]; NUM_STATES],
    is_rep: [u16; NUM_STATES],
    is_rep_g0: [u16; NUM_STATES],
    is_rep_g1: [u16; NUM_STATES],
    is_rep_g2: [u16; NUM_STATES],
    is_rep0_long: [[u16; 16]; NUM_STATES],
    pos_slot: [[u16; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
    pos_decoders: [u16; POS_DECODERS_LEN],
    align_decoder: [u16; 16],
    len_decoder: LenDecoder,
    rep_len_decoder: LenDecoder,
    literal: Vec<u16>,
}

impl Probs {
    fn new(lc: u32, lp: u32) -> Result<Probs> {
        let mut literal = Vec::new();
        let literal_len = 0x300usize * (1usize << (lc + lp));
        literal.try_reserve_exact(literal_len).map_err(|_| Error::OutOfMemory)?;
        literal.resize(literal_len, PROB_INIT);
        Ok(Probs {
            is_match: [[PROB_INIT; 16]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; 16]; NUM_STATES],
            pos_slot: [[PROB_INIT; NUM_POS_SLOTS]; NUM_LEN_TO_POS_STATES],
            pos_decoders: [PROB_INIT; POS_DECODERS_LEN],
            align_decoder: [PROB_INIT; 16],
            len_decoder: LenDecoder::new(),
            rep_len_decoder: LenDecoder::new(),
            literal,
        })
    }
}

/// Decodes exactly `out_size` bytes (or fails) from a single,
/// independently-reset micro-LZMA block.
pub fn decompress(input: &[u8], out_size: usize, params: Params) -> Result<Vec<u8>> {
    let mut rc = RangeDecoder::new(input)?;
    let mut probs = Probs::new(params.lc, params.lp)?;
    let mut out = Vec::new();
    out.try_reserve_exact(out_size).map_err(|_| Error::OutOfMemory)?;

    let pb_mask = (1u32 << params.pb) - 1;
    let mut state = 0u32;
    let mut rep0 = 0u32;
    let mut rep1 = 0u32;
    let mut rep2 = 0u32;
    let mut rep3 = 0u32;

    while out.len() < out_size {
        let pos_state = (out.len() as u32 & pb_mask) as usize;
        if rc.decode_bit(&mut probs.is_match[state as usize][pos_state]) == 0 {
            let prev_byte = out.last().copied().unwrap_or(0);
            let lit_idx =
                literal_state_index(params.lp, params.lc, out.len() as u32, prev_byte);
            let slice = &mut probs.literal[lit_idx * 0x300..(lit_idx + 1) * 0x300];
            let byte = if state < 7 {
                decode_literal_normal(&mut rc, slice)
            } else {
                if rep0 as usize >= out.len() {
                    return Err(Error::Corrupt);
                }
                let match_byte = out[out.len() - rep0 as usize - 1];
                decode_literal_matched(&mut rc, slice, match_byte)
            };
            out.push(byte);
            state = state_after_literal(state);
            continue;
        }

        let len;
        if rc.decode_bit(&mut probs.is_rep[state as usize]) != 0 {
            if out.is_empty() {
                return Err(Error::Corrupt);
            }
            if rc.decode_bit(&mut probs.is_rep_g0[state as usize]) == 0 {
                if rc.decode_bit(&mut probs.is_rep0_long[state as usize][pos_state]) == 0 {
                    state = state_after_short_rep(state);
                    if rep0 as usize >= out.len() {
                        return Err(Error::Corrupt);
                    }
                    let byte = out[out.len() - rep0 as usize - 1];
                    out.push(byte);
                    continue;
                }
            } else {
                let dist;
                if rc.decode_bit(&mut probs.is_rep_g1[state as usize]) == 0 {
                    dist = rep1;
                } else if rc.decode_bit(&mut probs.is_rep_g2[state as usize]) == 0 {
                    dist = rep2;
                    rep2 = rep1;
                } else {
                    dist = rep3;
                    rep3 = rep2;
                    rep2 = rep1;
                }
                rep1 = rep0;
                rep0 = dist;
            }
            len = MATCH_MIN_LEN + probs.rep_len_decoder.decode(&mut rc, pos_state);
            state = state_after_rep(state);
        } else {
            rep3 = rep2;
            rep2 = rep1;
            rep1 = rep0;
            len = MATCH_MIN_LEN + probs.len_decoder.decode(&mut rc, pos_state);
            state = state_after_match(state);
            let len_state =
                core::cmp::min(len - MATCH_MIN_LEN, NUM_LEN_TO_POS_STATES as u32 - 1) as usize;
            let pos_slot = rc.decode_bit_tree(&mut probs.pos_slot[len_state], 6);
            if pos_slot < 4 {
                rep0 = pos_slot;
            } else {
                let num_direct_bits = (pos_slot >> 1) - 1;
                rep0 = (2 | (pos_slot & 1)) << num_direct_bits;
                if pos_slot < END_POS_MODEL_INDEX {
                    let offset = (rep0 - pos_slot) as usize;
                    rep0 += rc.decode_bit_tree_reverse_at(
                        &mut probs.pos_decoders,
                        offset,
                        num_direct_bits,
                    );
                } else {
                    rep0 += rc.decode_direct_bits(num_direct_bits - NUM_ALIGN_BITS) << NUM_ALIGN_BITS;
                    rep0 += rc.decode_bit_tree_reverse_at(
                        &mut probs.align_decoder,
                        0,
                        NUM_ALIGN_BITS,
                    );
                }
            }
            if rep0 == EOS_DISTANCE {
                break;
            }
        }

        if rep0 as usize >= out.len() {
            return Err(Error::Corrupt);
        }
        let mut src = out.len() - rep0 as usize - 1;
        let mut remaining = len;
        while remaining > 0 && out.len() < out_size {
            let byte = out[src];
            out.push(byte);
            src += 1;
            remaining -= 1;
        }
    }
    Ok(out)
}
