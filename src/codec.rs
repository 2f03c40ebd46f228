use bytemuck::Pod;
use dicom::core::VR;
use std::fmt::Display;

/// Whether multi-byte fields read from a file must be swapped
/// before being interpreted in host order.
///
/// The decision is taken from the host byte order alone,
/// the transfer syntax byte order is never consulted.
pub const HOST_NEEDS_SWAP: bool = cfg!(target_endian = "big");

/// Reverse the byte order of `count` consecutive groups of `n` bytes,
/// starting at `offset`.
///
/// # Panics
///
/// Panics if the described region exceeds the buffer.
pub fn swap_bytes(buf: &mut [u8], offset: usize, n: usize, count: usize) {
    if n < 2 {
        return;
    }
    buf[offset..offset + n * count]
        .chunks_exact_mut(n)
        .for_each(<[u8]>::reverse);
}

/// Complement every byte of the buffer.
pub fn invert_bytes(buf: &mut [u8]) {
    buf.iter_mut().for_each(|b| *b = !*b);
}

/// Clear the bits above `bits_stored` in `count` 8-bit samples.
pub fn mask_bits8(bits_stored: u16, count: usize, buf: &mut [u8], offset: usize) {
    mask_lanes(bits_stored, 1, count, buf, offset);
}

/// Clear the bits above `bits_stored` in `count` 16-bit samples
/// stored in host byte order.
pub fn mask_bits16(bits_stored: u16, count: usize, buf: &mut [u8], offset: usize) {
    mask_lanes(bits_stored, 2, count, buf, offset);
}

/// Clear the bits above `bits_stored` in `count` 32-bit samples
/// stored in host byte order.
pub fn mask_bits32(bits_stored: u16, count: usize, buf: &mut [u8], offset: usize) {
    mask_lanes(bits_stored, 4, count, buf, offset);
}

/// Each byte lane is shifted left then right by the number of its bits
/// lying above the stored bit boundary. Lanes entirely below the boundary
/// use a shift of zero, lanes entirely above it are cleared.
fn mask_lanes(bits_stored: u16, lanes: usize, count: usize, buf: &mut [u8], offset: usize) {
    let bits_stored = u32::from(bits_stored);
    if bits_stored as usize >= lanes * 8 {
        return;
    }
    for sample in buf[offset..offset + lanes * count].chunks_exact_mut(lanes) {
        for significance in 0..lanes {
            let shift = ((significance as u32 + 1) * 8).saturating_sub(bits_stored);
            let index = if cfg!(target_endian = "little") {
                significance
            } else {
                lanes - 1 - significance
            };
            sample[index] = if shift >= 8 {
                0
            } else {
                (sample[index] << shift) >> shift
            };
        }
    }
}

/// Decode the `length` bytes at `offset` as a string, according to `vr`.
///
/// Binary values are rendered in decimal, multiple values joined by `\`.
/// Text values have their trailing NUL and space padding removed.
/// Sequences and unknown values decode to an empty string.
///
/// # Panics
///
/// Panics if the described region exceeds the buffer.
pub fn decode_value_as_string(
    buf: &[u8],
    offset: usize,
    vr: VR,
    length: usize,
    needs_swap: bool,
) -> String {
    let bytes = &buf[offset..offset + length];
    match vr {
        VR::US | VR::OW => join_values::<u16>(bytes, needs_swap),
        VR::SS => join_values::<i16>(bytes, needs_swap),
        VR::UL | VR::OL => join_values::<u32>(bytes, needs_swap),
        VR::SL => join_values::<i32>(bytes, needs_swap),
        VR::FL | VR::OF => join_values::<f32>(bytes, needs_swap),
        VR::FD | VR::OD => join_values::<f64>(bytes, needs_swap),
        VR::SV => join_values::<i64>(bytes, needs_swap),
        VR::UV | VR::OV => join_values::<u64>(bytes, needs_swap),
        VR::OB => join_values::<u8>(bytes, false),
        VR::AT => decode_tags(bytes, needs_swap),
        VR::SQ | VR::UN => String::new(),
        _ => decode_text(bytes),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_owned()
}

fn read_value<T: Pod>(chunk: &[u8], needs_swap: bool) -> T {
    if needs_swap {
        let mut owned = chunk.to_vec();
        owned.reverse();
        bytemuck::pod_read_unaligned(&owned)
    } else {
        bytemuck::pod_read_unaligned(chunk)
    }
}

fn join_values<T: Pod + Display>(bytes: &[u8], needs_swap: bool) -> String {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(|chunk| read_value::<T>(chunk, needs_swap).to_string())
        .collect::<Vec<_>>()
        .join("\\")
}

fn decode_tags(bytes: &[u8], needs_swap: bool) -> String {
    bytes
        .chunks_exact(4)
        .map(|pair| {
            let group: u16 = read_value(&pair[..2], needs_swap);
            let element: u16 = read_value(&pair[2..], needs_swap);
            format!("{group:04X},{element:04X}")
        })
        .collect::<Vec<_>>()
        .join("\\")
}
