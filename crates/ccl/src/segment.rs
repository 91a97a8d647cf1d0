//! Delta-coded, bit-packed segment buffers.
//!
//! Segment layout (MSB first, no alignment between fields):
//!
//! ```text
//!   5 bits            count_bits
//!   5 bits            lon_offset_bits
//!   5 bits            lat_offset_bits
//!   count_bits        vertex count N
//!   18 bits           lon bias + 131071
//!   18 bits           lat bias + 131071
//!   26 bits           start x
//!   25 bits           start y
//!   (N-1) times       lon offset (lon_offset_bits), lat offset (lat_offset_bits)
//! ```
//!
//! Offsets are `delta + bias`, where the bias is minus the smallest delta, so
//! every stored offset is non-negative.

use crate::bits::{BitReader, BitWriter};
use crate::cell::{Segment, Vertex};
use crate::error::{Axis, CclError, Result};

/// Largest bias magnitude the 18-bit biased fields can carry (2^17 - 1).
pub const MAX_BIAS: i64 = 131_071;

pub const WIDTH_FIELD_BITS: u32 = 5;
pub const BIAS_BITS: u32 = 18;
pub const START_X_BITS: u32 = 26;
pub const START_Y_BITS: u32 = 25;

/// Widths above this cannot be written into a 5-bit field.
pub const MAX_FIELD_WIDTH: u32 = 31;

/// Bits of every segment header that do not depend on the data.
const FIXED_BITS: u64 =
    (3 * WIDTH_FIELD_BITS + 2 * BIAS_BITS + START_X_BITS + START_Y_BITS) as u64;

/// Minimal unsigned width of `v` (`floor(log2(v)) + 1`), for `v >= 1`.
#[inline]
fn bit_width(v: u64) -> u32 {
    64 - v.leading_zeros()
}

fn check_width(field: &'static str, bits: u32) -> Result<u32> {
    if bits == 0 || bits > MAX_FIELD_WIDTH {
        return Err(CclError::WidthOverflow { field, bits });
    }

    Ok(bits)
}

/// Every derived quantity needed to pack one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub vertex_count: u32,
    pub count_bits: u32,
    pub lon_offset_bits: u32,
    pub lat_offset_bits: u32,
    pub bias_x: i64,
    pub bias_y: i64,
    pub range_x: i64,
    pub range_y: i64,
}

impl SegmentLayout {
    pub fn for_segment(segment: &Segment) -> Result<Self> {
        let vertices = segment.vertices();

        if vertices.len() < 2 {
            return Err(CclError::DegenerateSegment {
                len: vertices.len(),
            });
        }

        let (mut min_dx, mut max_dx) = (i64::MAX, i64::MIN);
        let (mut min_dy, mut max_dy) = (i64::MAX, i64::MIN);

        for pair in vertices.windows(2) {
            let dx = pair[1].x as i64 - pair[0].x as i64;
            let dy = pair[1].y as i64 - pair[0].y as i64;

            min_dx = min_dx.min(dx);
            max_dx = max_dx.max(dx);
            min_dy = min_dy.min(dy);
            max_dy = max_dy.max(dy);
        }

        let bias_x = -min_dx;
        let bias_y = -min_dy;

        if bias_x.abs() > MAX_BIAS {
            return Err(CclError::BiasOutOfRange {
                axis: Axis::Lon,
                bias: bias_x,
                max: MAX_BIAS,
            });
        }

        if bias_y.abs() > MAX_BIAS {
            return Err(CclError::BiasOutOfRange {
                axis: Axis::Lat,
                bias: bias_y,
                max: MAX_BIAS,
            });
        }

        // A zero range still needs one bit per offset.
        let range_x = (max_dx - min_dx).max(1);
        let range_y = (max_dy - min_dy).max(1);

        let vertex_count = u32::try_from(vertices.len()).map_err(|_| CclError::WidthOverflow {
            field: "count",
            bits: bit_width(vertices.len() as u64),
        })?;

        let count_bits = check_width("count", bit_width(vertex_count as u64))?;
        let lon_offset_bits = check_width("lon offset", bit_width(range_x as u64))?;
        let lat_offset_bits = check_width("lat offset", bit_width(range_y as u64))?;

        let start = vertices[0];
        check_start(Axis::Lon, start.x, START_X_BITS)?;
        check_start(Axis::Lat, start.y, START_Y_BITS)?;

        Ok(Self {
            vertex_count,
            count_bits,
            lon_offset_bits,
            lat_offset_bits,
            bias_x,
            bias_y,
            range_x,
            range_y,
        })
    }

    /// Buffer length in bytes for this layout.
    pub fn encoded_len(&self) -> usize {
        encoded_len(
            self.count_bits,
            self.lon_offset_bits,
            self.lat_offset_bits,
            self.vertex_count,
        )
    }
}

fn check_start(axis: Axis, value: i32, bits: u32) -> Result<()> {
    if value < 0 || (value as u64) >= (1u64 << bits) {
        return Err(CclError::CoordinateOutOfRange { axis, value, bits });
    }

    Ok(())
}

/// Byte length of a packed segment.
///
/// The bit total counts one (lon, lat) offset pair per vertex, one more than
/// is written, and then adds a byte on top of the truncating division. Readers
/// step over each buffer with this exact formula; the tail is always zero.
pub fn encoded_len(
    count_bits: u32,
    lon_offset_bits: u32,
    lat_offset_bits: u32,
    vertex_count: u32,
) -> usize {
    let pair = (lon_offset_bits + lat_offset_bits) as u64;
    let deltas = (vertex_count as u64).saturating_sub(1) * pair;
    let bits = FIXED_BITS + count_bits as u64 + pair + deltas;

    (bits / 8 + 1) as usize
}

/// A packed segment ready to be appended to a cell block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSegment {
    pub bytes: Vec<u8>,
    pub vertex_count: u32,
}

/// Pack one segment.
pub fn encode_segment(segment: &Segment) -> Result<EncodedSegment> {
    let layout = SegmentLayout::for_segment(segment)?;
    let vertices = segment.vertices();

    let mut bytes = vec![0u8; layout.encoded_len()];
    let mut w = BitWriter::new(&mut bytes);

    w.put(WIDTH_FIELD_BITS, layout.count_bits)?;
    w.put(WIDTH_FIELD_BITS, layout.lon_offset_bits)?;
    w.put(WIDTH_FIELD_BITS, layout.lat_offset_bits)?;
    w.put(layout.count_bits, layout.vertex_count)?;
    w.put(BIAS_BITS, (layout.bias_x + MAX_BIAS) as u32)?;
    w.put(BIAS_BITS, (layout.bias_y + MAX_BIAS) as u32)?;
    w.put(START_X_BITS, vertices[0].x as u32)?;
    w.put(START_Y_BITS, vertices[0].y as u32)?;

    for pair in vertices.windows(2) {
        let x_off = pair[1].x as i64 - pair[0].x as i64 + layout.bias_x;
        let y_off = pair[1].y as i64 - pair[0].y as i64 + layout.bias_y;

        w.put(layout.lon_offset_bits, x_off as u32)?;
        w.put(layout.lat_offset_bits, y_off as u32)?;
    }

    Ok(EncodedSegment {
        bytes,
        vertex_count: layout.vertex_count,
    })
}

/// Unpack the segment at the start of `buf`, returning it with the number of
/// bytes it occupied.
pub fn decode_segment(buf: &[u8]) -> Result<(Segment, usize)> {
    let mut r = BitReader::new(buf);

    let count_bits = r.get(WIDTH_FIELD_BITS)?;
    let lon_offset_bits = r.get(WIDTH_FIELD_BITS)?;
    let lat_offset_bits = r.get(WIDTH_FIELD_BITS)?;

    if count_bits == 0 || lon_offset_bits == 0 || lat_offset_bits == 0 {
        return Err(CclError::InvalidData("zero bit width in segment header".into()));
    }

    let vertex_count = r.get(count_bits)?;
    if vertex_count < 2 {
        return Err(CclError::InvalidData(format!(
            "segment with {} vertices",
            vertex_count
        )));
    }

    let len = encoded_len(count_bits, lon_offset_bits, lat_offset_bits, vertex_count);
    if len > buf.len() {
        return Err(CclError::Truncated("segment"));
    }

    let bias_x = r.get(BIAS_BITS)? as i64 - MAX_BIAS;
    let bias_y = r.get(BIAS_BITS)? as i64 - MAX_BIAS;

    let mut x = r.get(START_X_BITS)? as i64;
    let mut y = r.get(START_Y_BITS)? as i64;

    let mut vertices = Vec::with_capacity(vertex_count as usize);
    vertices.push(Vertex::new(x as i32, y as i32));

    for _ in 1..vertex_count {
        x += r.get(lon_offset_bits)? as i64 - bias_x;
        y += r.get(lat_offset_bits)? as i64 - bias_y;

        let (xi, yi) = match (i32::try_from(x), i32::try_from(y)) {
            (Ok(xi), Ok(yi)) => (xi, yi),
            _ => return Err(CclError::InvalidData("decoded vertex out of range".into())),
        };
        vertices.push(Vertex::new(xi, yi));
    }

    Ok((Segment::new(vertices), len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn seg(points: &[(i32, i32)]) -> Segment {
        Segment::new(points.iter().map(|&(x, y)| Vertex::new(x, y)).collect())
    }

    fn random_segment(rng: &mut StdRng, n: usize, max_step: i32) -> Segment {
        let mut x = rng.gen_range(1_000_000..35_000_000);
        let mut y = rng.gen_range(1_000_000..17_000_000);
        let mut vertices = vec![Vertex::new(x, y)];

        for _ in 1..n {
            x += rng.gen_range(-max_step..=max_step);
            y += rng.gen_range(-max_step..=max_step);
            vertices.push(Vertex::new(x, y));
        }

        Segment::new(vertices)
    }

    #[test]
    fn test_two_point_segment_bytes() {
        let s = seg(&[(100_000, 10_000_000), (100_005, 9_999_998)]);
        let layout = SegmentLayout::for_segment(&s).unwrap();

        assert_eq!(layout.count_bits, 2);
        assert_eq!(layout.lon_offset_bits, 1);
        assert_eq!(layout.lat_offset_bits, 1);
        assert_eq!(layout.bias_x, -5);
        assert_eq!(layout.bias_y, 2);

        let enc = encode_segment(&s).unwrap();
        assert_eq!(enc.vertex_count, 2);
        // 102 fixed + 2 count + 2 spare + 2 offset bits = 108 -> 108 / 8 + 1.
        assert_eq!(enc.bytes.len(), 14);
        // 00010 00001 00001 1(0)...
        assert_eq!(enc.bytes[0], 0x10);
        assert_eq!(enc.bytes[1], 0x43);

        let (back, used) = decode_segment(&enc.bytes).unwrap();
        assert_eq!(back, s);
        assert_eq!(used, 14);
    }

    #[test]
    fn test_round_trip_random_segments() {
        let mut rng = StdRng::seed_from_u64(0x5eed_c0a5);

        for &(n, step) in &[(2usize, 10i32), (3, 1), (17, 500), (300, 40_000), (1025, 131_071)] {
            let s = random_segment(&mut rng, n, step);
            let enc = encode_segment(&s).unwrap();
            let (back, used) = decode_segment(&enc.bytes).unwrap();

            assert_eq!(back, s, "n={} step={}", n, step);
            assert_eq!(used, enc.bytes.len());
            assert_eq!(enc.vertex_count as usize, n);
        }
    }

    #[test]
    fn test_widths_are_minimal() {
        let mut rng = StdRng::seed_from_u64(42);

        for n in [2usize, 3, 4, 7, 8, 255, 256, 1000] {
            let s = random_segment(&mut rng, n, 3000);
            let l = SegmentLayout::for_segment(&s).unwrap();

            assert!(1u64 << (l.count_bits - 1) <= n as u64);
            assert!((n as u64) < 1u64 << l.count_bits);
            assert!(1i64 << (l.lon_offset_bits - 1) <= l.range_x);
            assert!(l.range_x < 1i64 << l.lon_offset_bits);
            assert!(1i64 << (l.lat_offset_bits - 1) <= l.range_y);
            assert!(l.range_y < 1i64 << l.lat_offset_bits);
        }
    }

    #[test]
    fn test_biased_offsets_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let s = random_segment(&mut rng, 500, 20_000);
        let l = SegmentLayout::for_segment(&s).unwrap();

        for pair in s.vertices().windows(2) {
            let ox = pair[1].x as i64 - pair[0].x as i64 + l.bias_x;
            let oy = pair[1].y as i64 - pair[0].y as i64 + l.bias_y;

            assert!((0..=l.range_x).contains(&ox));
            assert!((0..=l.range_y).contains(&oy));
        }
    }

    #[test]
    fn test_constant_deltas_use_one_bit() {
        let s = seg(&[(500, 500), (510, 490), (520, 480), (530, 470)]);
        let l = SegmentLayout::for_segment(&s).unwrap();

        assert_eq!((l.range_x, l.range_y), (1, 1));
        assert_eq!((l.lon_offset_bits, l.lat_offset_bits), (1, 1));
        assert_eq!(decode_segment(&encode_segment(&s).unwrap().bytes).unwrap().0, s);
    }

    #[test]
    fn test_large_step_is_fatal() {
        let s = seg(&[(1_000_000, 5_000_000), (1_150_000, 5_000_000)]);

        match encode_segment(&s) {
            Err(CclError::BiasOutOfRange { axis, bias, .. }) => {
                assert_eq!(axis, Axis::Lon);
                assert_eq!(bias, -150_000);
            }
            other => panic!("expected bias overflow, got {:?}", other),
        }

        let s = seg(&[(1_000_000, 5_000_000), (1_000_010, 4_850_000)]);
        assert!(matches!(
            encode_segment(&s),
            Err(CclError::BiasOutOfRange { axis: Axis::Lat, .. })
        ));
    }

    #[test]
    fn test_bias_limit_is_inclusive() {
        let s = seg(&[(1_000_000, 5_000_000), (1_131_071, 4_868_929)]);
        let enc = encode_segment(&s).unwrap();
        assert_eq!(decode_segment(&enc.bytes).unwrap().0, s);
    }

    #[test]
    fn test_degenerate_and_out_of_range_start() {
        assert!(matches!(
            encode_segment(&seg(&[(1, 1)])),
            Err(CclError::DegenerateSegment { len: 1 })
        ));
        assert!(matches!(
            encode_segment(&seg(&[])),
            Err(CclError::DegenerateSegment { len: 0 })
        ));
        assert!(matches!(
            encode_segment(&seg(&[(-5, 10), (0, 10)])),
            Err(CclError::CoordinateOutOfRange { axis: Axis::Lon, .. })
        ));
        assert!(matches!(
            encode_segment(&seg(&[(5, 1 << 25), (6, 1 << 25)])),
            Err(CclError::CoordinateOutOfRange { axis: Axis::Lat, .. })
        ));
    }

    #[test]
    fn test_width_field_limits() {
        assert_eq!(check_width("count", 1).unwrap(), 1);
        assert_eq!(check_width("count", MAX_FIELD_WIDTH).unwrap(), 31);
        assert!(matches!(
            check_width("count", 32),
            Err(CclError::WidthOverflow { field: "count", bits: 32 })
        ));
        assert!(matches!(
            check_width("lon", 0),
            Err(CclError::WidthOverflow { field: "lon", bits: 0 })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let s = seg(&[(100, 100), (200, 300), (250, 280)]);
        let enc = encode_segment(&s).unwrap();

        assert!(decode_segment(&enc.bytes[..enc.bytes.len() - 1]).is_err());
        assert!(decode_segment(&[0u8; 20]).is_err());
    }
}
