use std::io::{Read, Write};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Packs a switch vector into bytes: 8 switches per byte, bit 0 of each byte
/// holds the lowest index. The final byte is zero-padded.
pub fn pack_switches(switches: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; switches.len().div_ceil(8)];
    for (index, &on) in switches.iter().enumerate() {
        if on {
            bytes[index / 8] |= 1 << (index % 8);
        }
    }
    bytes
}

/// Unpacks bytes produced by [`pack_switches`]. N bytes always yield exactly
/// 8*N booleans; callers that know the original count truncate the padding.
pub fn unpack_switches(bytes: &[u8]) -> Vec<bool> {
    let mut switches = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for bit in 0..8 {
            switches.push(byte & (1 << bit) != 0);
        }
    }
    switches
}

/// Framed switch bank for save blobs: a little-endian u32 switch count
/// followed by the packed bits. The framing is bit-exact across versions;
/// save compatibility depends on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchBlock {
    pub switches: Vec<bool>,
}

impl SwitchBlock {
    pub fn new(switches: Vec<bool>) -> Self {
        SwitchBlock { switches }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_u32::<LittleEndian>(self.switches.len() as u32)
            .context("writing switch count")?;
        writer
            .write_all(&pack_switches(&self.switches))
            .context("writing packed switch bits")?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<SwitchBlock> {
        let count = reader
            .read_u32::<LittleEndian>()
            .context("reading switch count")? as usize;
        let mut bytes = vec![0u8; count.div_ceil(8)];
        reader
            .read_exact(&mut bytes)
            .context("reading packed switch bits")?;
        let mut switches = unpack_switches(&bytes);
        switches.truncate(count);
        Ok(SwitchBlock { switches })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{pack_switches, unpack_switches, SwitchBlock};

    #[test]
    fn lowest_index_lands_in_bit_zero() {
        let packed = pack_switches(&[true, false, false, false, false, false, false, false]);
        assert_eq!(packed, vec![0b0000_0001]);

        let packed = pack_switches(&[false, true, false, false, false, false, false, true]);
        assert_eq!(packed, vec![0b1000_0010]);
    }

    #[test]
    fn unpack_yields_eight_per_byte() {
        for len in 0..4 {
            let bytes = vec![0xA5u8; len];
            assert_eq!(unpack_switches(&bytes).len(), len * 8);
        }
    }

    #[test]
    fn round_trip_preserves_every_prefix_length() {
        // Lengths straddling the byte boundaries are the interesting cases.
        for len in 0..=19usize {
            let switches: Vec<bool> = (0..len).map(|i| i % 3 == 0 || i % 7 == 2).collect();
            let mut unpacked = unpack_switches(&pack_switches(&switches));
            unpacked.truncate(len);
            assert_eq!(unpacked, switches, "length {len}");
        }
    }

    #[test]
    fn switch_block_frames_count_and_bits() {
        let block = SwitchBlock::new(vec![true, false, true, true, false, false, false, false, true]);
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).expect("write succeeds");
        // 4-byte LE count, then two bytes of bits.
        assert_eq!(&buffer[..4], &[9, 0, 0, 0]);
        assert_eq!(buffer.len(), 4 + 2);

        let restored =
            SwitchBlock::read_from(&mut Cursor::new(&buffer)).expect("read succeeds");
        assert_eq!(restored, block);
    }

    #[test]
    fn empty_block_round_trips() {
        let block = SwitchBlock::default();
        let mut buffer = Vec::new();
        block.write_to(&mut buffer).expect("write succeeds");
        assert_eq!(buffer, vec![0, 0, 0, 0]);
        let restored =
            SwitchBlock::read_from(&mut Cursor::new(&buffer)).expect("read succeeds");
        assert!(restored.switches.is_empty());
    }
}
