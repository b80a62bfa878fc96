//! RC4 stream cipher.
//!
//! RC4 is the cipher used by the PDF standard security handler for V1, V2,
//! and the non-AES V4 crypt filters. Cryptographically weak by modern
//! standards, but required for compatibility with existing documents.

/// RC4 cipher state.
///
/// The cipher is symmetric; applying the keystream twice restores the
/// plaintext. The state is incremental so that stream data can be fed
/// through in chunks.
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Initialize the cipher with a key (5-16 bytes for PDF use).
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, val) in s.iter_mut().enumerate() {
            *val = i as u8;
        }

        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }

        Self { s, i: 0, j: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[k as usize]
    }

    /// XOR the keystream over `data` in place.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.next_byte();
        }
    }
}

/// One-shot encrypt/decrypt with a fresh cipher state.
pub fn rc4_crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut cipher = Rc4::new(key);
    let mut result = data.to_vec();
    cipher.apply_keystream(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc4_symmetric() {
        let key = b"testkey";
        let plaintext = b"Hello, World!";

        let ciphertext = rc4_crypt(key, plaintext);
        let decrypted = rc4_crypt(key, &ciphertext);

        assert_eq!(plaintext, &decrypted[..]);
        assert_ne!(plaintext, &ciphertext[..]);
    }

    #[test]
    fn test_rc4_known_vector() {
        // RFC 6229-style vector: key "Key", plaintext "Plaintext".
        let ciphertext = rc4_crypt(b"Key", b"Plaintext");
        assert_eq!(
            ciphertext,
            vec![0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]
        );
    }

    #[test]
    fn test_rc4_incremental_matches_one_shot() {
        let key = b"chunked";
        let data = b"split across several writes";

        let whole = rc4_crypt(key, data);

        let mut cipher = Rc4::new(key);
        let mut chunked = data.to_vec();
        let (a, b) = chunked.split_at_mut(7);
        cipher.apply_keystream(a);
        cipher.apply_keystream(b);

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_rc4_empty() {
        assert!(rc4_crypt(b"testkey", b"").is_empty());
    }
}
