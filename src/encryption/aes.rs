//! AES encryption for PDF streams and strings.
//!
//! PDF uses AES in CBC mode with PKCS#7-style padding; the 16-byte IV is
//! prepended to the ciphertext. Key wrapping for AES-256 (the /OE, /UE and
//! /Perms values) additionally uses CBC without padding and single-block
//! encryption, both provided here.

use aes::cipher::{
    generic_array::GenericArray, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes256};
use cbc::{Decryptor, Encryptor};
use rand::RngCore;

use crate::error::{Error, Result};

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes128CbcDec = Decryptor<Aes128>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Where stream/string IVs come from.
///
/// Production writes use fresh random IVs; tests that need reproducible
/// output may pin a fixed IV. This is an explicit per-writer setting, not a
/// process-wide switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvSource {
    /// Fresh random IV for every encryption operation.
    #[default]
    Random,
    /// Fixed IV, identical for every operation.
    Static([u8; 16]),
}

impl IvSource {
    /// Produce the next IV.
    pub fn next_iv(&self) -> [u8; 16] {
        match self {
            IvSource::Random => {
                let mut iv = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut iv);
                iv
            }
            IvSource::Static(iv) => *iv,
        }
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != 16 && key.len() != 32 {
        return Err(Error::Internal(format!(
            "AES key must be 16 or 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

/// Encrypt with AES-CBC, PDF style: pad with PKCS#7 and prepend the IV.
///
/// Output length is always `input + (16 - input % 16) + 16`.
pub fn encrypt_cbc(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let padding_len = 16 - (data.len() % 16);
    let mut buffer = Vec::with_capacity(16 + data.len() + padding_len);
    buffer.extend_from_slice(iv);
    buffer.extend_from_slice(data);
    buffer.extend(std::iter::repeat(padding_len as u8).take(padding_len));

    let body_len = data.len() + padding_len;
    let body = &mut buffer[16..];
    match key.len() {
        16 => {
            Aes128CbcEnc::new(key.into(), iv.into())
                .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(body, body_len)
                .map_err(|_| Error::Internal("AES encryption failed".to_string()))?;
        }
        _ => {
            Aes256CbcEnc::new(key.into(), iv.into())
                .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(body, body_len)
                .map_err(|_| Error::Internal("AES encryption failed".to_string()))?;
        }
    }
    Ok(buffer)
}

/// Decrypt AES-CBC data whose first 16 bytes are the IV, removing padding.
pub fn decrypt_cbc(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    if data.len() < 32 || data.len() % 16 != 0 {
        return Err(Error::Decode(format!(
            "AES data of {} bytes is not IV plus whole blocks",
            data.len()
        )));
    }

    let (iv, body) = data.split_at(16);
    let mut buffer = body.to_vec();
    match key.len() {
        16 => {
            Aes128CbcDec::new(key.into(), iv.into())
                .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer)
                .map_err(|_| Error::Decode("AES decryption failed".to_string()))?;
        }
        _ => {
            Aes256CbcDec::new(key.into(), iv.into())
                .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer)
                .map_err(|_| Error::Decode("AES decryption failed".to_string()))?;
        }
    }

    let padding_len = *buffer.last().unwrap_or(&0) as usize;
    if padding_len == 0 || padding_len > 16 || padding_len > buffer.len() {
        return Err(Error::Decode("invalid AES padding".to_string()));
    }
    buffer.truncate(buffer.len() - padding_len);
    Ok(buffer)
}

/// AES-CBC without padding or IV handling, as used for /OE, /UE and the
/// intermediate steps of the AES-256 password hash.
pub fn encrypt_cbc_no_pad(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    if data.len() % 16 != 0 {
        return Err(Error::Internal(
            "unpadded AES input must be a whole number of blocks".to_string(),
        ));
    }
    let mut buffer = data.to_vec();
    let len = buffer.len();
    match key.len() {
        16 => {
            Aes128CbcEnc::new(key.into(), iv.into())
                .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer, len)
                .map_err(|_| Error::Internal("AES encryption failed".to_string()))?;
        }
        _ => {
            Aes256CbcEnc::new(key.into(), iv.into())
                .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer, len)
                .map_err(|_| Error::Internal("AES encryption failed".to_string()))?;
        }
    }
    Ok(buffer)
}

/// Decrypt a no-padding CBC blob with a zero IV (for /OE and /UE checks).
pub fn decrypt_cbc_no_pad_zero_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    if data.len() % 16 != 0 {
        return Err(Error::Decode(
            "unpadded AES input must be a whole number of blocks".to_string(),
        ));
    }
    let iv = [0u8; 16];
    let mut buffer = data.to_vec();
    match key.len() {
        16 => {
            Aes128CbcDec::new(key.into(), (&iv).into())
                .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer)
                .map_err(|_| Error::Decode("AES decryption failed".to_string()))?;
        }
        _ => {
            Aes256CbcDec::new(key.into(), (&iv).into())
                .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buffer)
                .map_err(|_| Error::Decode("AES decryption failed".to_string()))?;
        }
    }
    Ok(buffer)
}

/// Encrypt a single 16-byte block with AES-256 in ECB mode (the /Perms value).
pub fn encrypt_block_256(key: &[u8], block: &[u8; 16]) -> Result<[u8; 16]> {
    if key.len() != 32 {
        return Err(Error::Internal("AES-256 key must be 32 bytes".to_string()));
    }
    let cipher = Aes256::new_from_slice(key)
        .map_err(|_| Error::Internal("AES-256 key setup failed".to_string()))?;
    let mut b = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut b);
    Ok(b.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbc_round_trip_128() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plaintext = b"Hello, AES encryption!";

        let ciphertext = encrypt_cbc(&key, &iv, plaintext).unwrap();
        assert_eq!(&ciphertext[..16], &iv);
        let decrypted = decrypt_cbc(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_cbc_round_trip_256() {
        let key = [3u8; 32];
        let iv = [1u8; 16];
        let plaintext = b"thirty-two byte key round trip";

        let ciphertext = encrypt_cbc(&key, &iv, plaintext).unwrap();
        let decrypted = decrypt_cbc(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_output_length_formula() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            let data = vec![0x5Au8; len];
            let out = encrypt_cbc(&key, &iv, &data).unwrap();
            assert_eq!(out.len(), len + (16 - len % 16) + 16, "input length {}", len);
        }
    }

    #[test]
    fn test_block_aligned_input_gains_full_pad_block() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let data = [1u8; 16];
        let out = encrypt_cbc(&key, &iv, &data).unwrap();
        assert_eq!(out.len(), 48);
    }

    #[test]
    fn test_no_pad_round_trip() {
        let key = [4u8; 32];
        let iv = [0u8; 16];
        let data = [0xABu8; 32];
        let enc = encrypt_cbc_no_pad(&key, &iv, &data).unwrap();
        assert_eq!(enc.len(), 32);
        let dec = decrypt_cbc_no_pad_zero_iv(&key, &enc).unwrap();
        assert_eq!(dec, data);
    }

    #[test]
    fn test_static_iv_source() {
        let iv = IvSource::Static([0x42; 16]);
        assert_eq!(iv.next_iv(), [0x42; 16]);
        assert_eq!(iv.next_iv(), [0x42; 16]);
    }

    #[test]
    fn test_bad_key_length() {
        assert!(encrypt_cbc(&[0u8; 7], &[0u8; 16], b"x").is_err());
    }
}
