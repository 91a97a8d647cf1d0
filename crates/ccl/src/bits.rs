//! MSB-first bit packing into byte buffers.
//!
//! Fields are placed at absolute bit positions with bit 0 being the most
//! significant bit of byte 0. Nothing here depends on the host's native word
//! size or byte order.

use crate::error::{CclError, Result};

#[inline(always)]
fn check_field(buf: &[u8], start_bit: usize, num_bits: u32) -> Result<()> {
    if num_bits == 0 || num_bits > 32 {
        return Err(CclError::InvalidBitWidth(num_bits));
    }

    if start_bit + num_bits as usize > buf.len() * 8 {
        return Err(CclError::Truncated("bit field"));
    }

    Ok(())
}

/// Pack the low `num_bits` of `value` into `buf` starting at `start_bit`.
///
/// Bits outside the field are left untouched. Higher bits of `value` beyond
/// `num_bits` are ignored, so callers size the field before packing.
pub fn bit_pack(buf: &mut [u8], start_bit: usize, num_bits: u32, value: u32) -> Result<()> {
    check_field(buf, start_bit, num_bits)?;

    let mut pos = start_bit;
    let mut remaining = num_bits;

    while remaining > 0 {
        let byte = pos / 8;
        let used = (pos % 8) as u32;
        let room = 8 - used;
        let take = room.min(remaining);

        // Next `take` bits of the value, MSB first.
        let chunk = ((value >> (remaining - take)) & ((1u32 << take) - 1)) as u8;
        let shift = room - take;
        let mask = (((1u16 << take) - 1) as u8) << shift;

        buf[byte] = (buf[byte] & !mask) | (chunk << shift);

        pos += take as usize;
        remaining -= take;
    }

    Ok(())
}

/// Read `num_bits` from `buf` starting at `start_bit`.
pub fn bit_unpack(buf: &[u8], start_bit: usize, num_bits: u32) -> Result<u32> {
    check_field(buf, start_bit, num_bits)?;

    let mut pos = start_bit;
    let mut remaining = num_bits;
    let mut out = 0u32;

    while remaining > 0 {
        let byte = pos / 8;
        let used = (pos % 8) as u32;
        let room = 8 - used;
        let take = room.min(remaining);
        let shift = room - take;

        let chunk = (buf[byte] >> shift) as u32 & ((1u32 << take) - 1);
        out = (out << take) | chunk;

        pos += take as usize;
        remaining -= take;
    }

    Ok(out)
}

/// Sequential writer over a zeroed buffer.
pub struct BitWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn put(&mut self, num_bits: u32, value: u32) -> Result<()> {
        bit_pack(self.buf, self.pos, num_bits, value)?;
        self.pos += num_bits as usize;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader, the counterpart of [`BitWriter`].
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn get(&mut self, num_bits: u32) -> Result<u32> {
        let v = bit_unpack(self.buf, self.pos, num_bits)?;
        self.pos += num_bits as usize;
        Ok(v)
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
