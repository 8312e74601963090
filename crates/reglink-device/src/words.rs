//! Little-endian packing between byte payloads and 32-bit data-buffer
//! words. Both bus cores expose their data buffers one word per four
//! payload bytes, zero-padding the trailing partial word.

/// Pack up to four bytes into one word, low byte first.
pub(crate) fn pack_word_le(bytes: &[u8]) -> u32 {
    let mut word = 0u32;
    for (index, byte) in bytes.iter().take(4).enumerate() {
        word |= u32::from(*byte) << (index * 8);
    }
    word
}

/// Append a word's four bytes, low byte first.
pub(crate) fn unpack_word_le(word: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&word.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_pads_partial_words_with_zeroes() {
        assert_eq!(pack_word_le(&[]), 0);
        assert_eq!(pack_word_le(&[0xAA]), 0x0000_00AA);
        assert_eq!(pack_word_le(&[0x01, 0x02, 0x03]), 0x0003_0201);
        assert_eq!(pack_word_le(&[0x01, 0x02, 0x03, 0x04]), 0x0403_0201);
    }

    #[test]
    fn unpack_is_the_inverse_of_pack() {
        let mut out = Vec::new();
        unpack_word_le(0x0403_0201, &mut out);
        assert_eq!(out, vec![0x01, 0x02, 0x03, 0x04]);
    }
}
