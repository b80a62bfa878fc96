//! PDF standard security handler, write side.
//!
//! Holds the encryption parameters (V/R/P/Length and the O, U, OE, UE and
//! Perms strings), derives per-object data keys, encrypts strings and
//! streams, and emits the encryption dictionary.
//!
//! Key derivation algorithms live in [`keys`], the ciphers in [`rc4`] and
//! [`aes`].

pub mod aes;
pub mod keys;
pub mod rc4;

pub use aes::IvSource;

use bitflags::bitflags;

use crate::error::Result;
use crate::object::{Dict, Object};
use crate::pipeline::StreamFilter;

bitflags! {
    /// User permissions granted by the document (the /P mask).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        /// Print the document (bit 3).
        const PRINT = 1 << 2;
        /// Modify contents (bit 4).
        const MODIFY = 1 << 3;
        /// Copy text and graphics (bit 5).
        const EXTRACT = 1 << 4;
        /// Add or modify annotations (bit 6).
        const ANNOTATE = 1 << 5;
        /// Fill in form fields (bit 9).
        const FILL_FORMS = 1 << 8;
        /// Extract for accessibility (bit 10).
        const EXTRACT_ACCESSIBILITY = 1 << 9;
        /// Assemble the document (bit 11).
        const ASSEMBLE = 1 << 10;
        /// Print at full resolution (bit 12).
        const PRINT_HIGH_RES = 1 << 11;
    }
}

impl Permissions {
    /// The signed 32-bit /P value, with the reserved bits fixed as the
    /// specification requires.
    pub fn p_value(&self) -> i32 {
        (self.bits() | 0xFFFF_F0C0) as i32
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::all()
    }
}

/// Parameters of the standard security handler, either imported from the
/// parsed input (`preserve_encryption`) or freshly generated from passwords.
#[derive(Debug, Clone, Default)]
pub struct EncryptionParams {
    /// Algorithm version (/V): 1, 2, 4, or 5.
    pub v: i32,
    /// Revision (/R): 2-6.
    pub r: i32,
    /// File key length in bytes (5-32).
    pub key_length: usize,
    /// Permission mask (/P), signed.
    pub p: i32,
    /// Owner password hash (/O).
    pub o: Vec<u8>,
    /// User password hash (/U).
    pub u: Vec<u8>,
    /// Owner-encrypted file key (/OE), V5 only.
    pub oe: Vec<u8>,
    /// User-encrypted file key (/UE), V5 only.
    pub ue: Vec<u8>,
    /// Encrypted permission block (/Perms), V5 only.
    pub perms: Vec<u8>,
    /// Whether the metadata stream is encrypted (/EncryptMetadata).
    pub encrypt_metadata: bool,
    /// Whether streams and strings use AES rather than RC4.
    pub use_aes: bool,
    /// The file encryption key. For imported parameters this comes from the
    /// parser's successful password authentication.
    pub file_key: Vec<u8>,
}

impl EncryptionParams {
    /// 40-bit RC4 encryption (V1/R2), PDF 1.1.
    pub fn r2(user_password: &[u8], owner_password: &[u8], permissions: Permissions, id1: &[u8]) -> Self {
        let p = permissions.p_value();
        let o = keys::compute_owner_key(owner_password, user_password, 2, 5);
        let file_key = keys::compute_encryption_key(user_password, &o, p, id1, 2, 5, true);
        let u = keys::compute_user_key_r2(&file_key);
        Self {
            v: 1,
            r: 2,
            key_length: 5,
            p,
            o,
            u,
            encrypt_metadata: true,
            use_aes: false,
            file_key,
            ..Self::default()
        }
    }

    /// 128-bit RC4 encryption (V2/R3), PDF 1.4.
    pub fn r3(user_password: &[u8], owner_password: &[u8], permissions: Permissions, id1: &[u8]) -> Self {
        let p = permissions.p_value();
        let o = keys::compute_owner_key(owner_password, user_password, 3, 16);
        let file_key = keys::compute_encryption_key(user_password, &o, p, id1, 3, 16, true);
        let u = keys::compute_user_key_r3(&file_key, id1);
        Self {
            v: 2,
            r: 3,
            key_length: 16,
            p,
            o,
            u,
            encrypt_metadata: true,
            use_aes: false,
            file_key,
            ..Self::default()
        }
    }

    /// 128-bit crypt-filter encryption (V4/R4), RC4 or AES, PDF 1.5/1.6.
    pub fn r4(
        user_password: &[u8],
        owner_password: &[u8],
        permissions: Permissions,
        id1: &[u8],
        use_aes: bool,
        encrypt_metadata: bool,
    ) -> Self {
        let p = permissions.p_value();
        let o = keys::compute_owner_key(owner_password, user_password, 4, 16);
        let file_key =
            keys::compute_encryption_key(user_password, &o, p, id1, 4, 16, encrypt_metadata);
        let u = keys::compute_user_key_r3(&file_key, id1);
        Self {
            v: 4,
            r: 4,
            key_length: 16,
            p,
            o,
            u,
            encrypt_metadata,
            use_aes,
            file_key,
            ..Self::default()
        }
    }

    /// 256-bit AES encryption (V5/R6), PDF 2.0 / PDF 1.7 extension level 3.
    pub fn r6(
        user_password: &[u8],
        owner_password: &[u8],
        permissions: Permissions,
        encrypt_metadata: bool,
    ) -> Result<Self> {
        let p = permissions.p_value();
        let creds = keys::generate_r6(user_password, owner_password, p, encrypt_metadata)?;
        Ok(Self {
            v: 5,
            r: 6,
            key_length: 32,
            p,
            o: creds.o,
            u: creds.u,
            oe: creds.oe,
            ue: creds.ue,
            perms: creds.perms,
            encrypt_metadata,
            use_aes: true,
            file_key: creds.key,
            ..Self::default()
        })
    }

    /// Whether streams and strings are AES-encrypted. V5 is always AES.
    pub fn aes(&self) -> bool {
        self.v >= 5 || self.use_aes
    }

    /// Key length in bits, as stored in the /Length entry.
    pub fn key_length_bits(&self) -> i64 {
        (self.key_length * 8) as i64
    }
}

/// Writer-side encryption state: the parameters plus the IV policy and the
/// file key in use for this write.
#[derive(Debug, Clone)]
pub struct EncryptionState {
    params: EncryptionParams,
    iv_source: IvSource,
}

impl EncryptionState {
    /// Wrap parameters for a write.
    pub fn new(params: EncryptionParams, iv_source: IvSource) -> Self {
        Self { params, iv_source }
    }

    /// The underlying parameters.
    pub fn params(&self) -> &EncryptionParams {
        &self.params
    }

    /// Derive the data key for one indirect object.
    pub fn object_key(&self, id: u32, gen: u16) -> Vec<u8> {
        keys::object_key(&self.params.file_key, id, gen, self.params.aes(), self.params.r)
    }

    /// Encrypt a string belonging to object (id, gen).
    pub fn encrypt_string(&self, data: &[u8], id: u32, gen: u16) -> Result<Vec<u8>> {
        let key = self.object_key(id, gen);
        if self.params.aes() {
            aes::encrypt_cbc(&key, &self.iv_source.next_iv(), data)
        } else {
            Ok(rc4::rc4_crypt(&key, data))
        }
    }

    /// Pipeline filter that encrypts stream data for object (id, gen).
    pub fn stream_filter(&self, id: u32, gen: u16) -> StreamFilter {
        let key = self.object_key(id, gen);
        if self.params.aes() {
            StreamFilter::Aes {
                key,
                iv: self.iv_source.next_iv(),
            }
        } else {
            StreamFilter::Rc4 { key }
        }
    }

    /// Length of a stream after encryption.
    ///
    /// AES output grows by the padding and the prepended IV:
    /// `len + (16 - len % 16) + 16`. RC4 preserves length.
    pub fn encrypted_stream_length(&self, len: u64) -> u64 {
        if self.params.aes() {
            len + (16 - len % 16) + 16
        } else {
            len
        }
    }

    /// Build the encryption dictionary for the output file.
    pub fn dictionary(&self) -> Dict {
        let p = &self.params;
        let mut dict = Dict::new();
        dict.insert("Filter".to_string(), Object::name("Standard"));
        dict.insert("V".to_string(), Object::Integer(p.v as i64));
        if p.v >= 2 {
            dict.insert("Length".to_string(), Object::Integer(p.key_length_bits()));
        }
        dict.insert("R".to_string(), Object::Integer(p.r as i64));
        dict.insert("O".to_string(), Object::String(p.o.clone()));
        dict.insert("U".to_string(), Object::String(p.u.clone()));
        if p.v >= 5 {
            dict.insert("OE".to_string(), Object::String(p.oe.clone()));
            dict.insert("UE".to_string(), Object::String(p.ue.clone()));
            dict.insert("Perms".to_string(), Object::String(p.perms.clone()));
        }
        dict.insert("P".to_string(), Object::Integer(p.p as i64));
        if p.r >= 4 && !p.encrypt_metadata {
            dict.insert("EncryptMetadata".to_string(), Object::Boolean(false));
        }
        if p.v >= 4 {
            let cfm = if !p.aes() {
                "V2"
            } else if p.v >= 5 {
                "AESV3"
            } else {
                "AESV2"
            };
            let std_cf = Object::dict(vec![
                ("AuthEvent", Object::name("DocOpen")),
                ("CFM", Object::name(cfm)),
                ("Length", Object::Integer(p.key_length as i64)),
            ]);
            dict.insert("CF".to_string(), Object::dict(vec![("StdCF", std_cf)]));
            dict.insert("StmF".to_string(), Object::name("StdCF"));
            dict.insert("StrF".to_string(), Object::name("StdCF"));
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_value_reserved_bits() {
        let p = Permissions::PRINT | Permissions::EXTRACT;
        let value = p.p_value() as u32;
        // Reserved-one bits set, reserved-zero bits clear.
        assert_eq!(value & 0xFFFF_F0C0, 0xFFFF_F0C0);
        assert_eq!(value & 0b11, 0);
        assert!(p.p_value() < 0);
    }

    #[test]
    fn test_r2_params() {
        let params = EncryptionParams::r2(b"user", b"owner", Permissions::all(), b"id1-bytes");
        assert_eq!((params.v, params.r), (1, 2));
        assert_eq!(params.key_length, 5);
        assert_eq!(params.o.len(), 32);
        assert_eq!(params.u.len(), 32);
        assert!(!params.aes());
    }

    #[test]
    fn test_r4_aes_params() {
        let params =
            EncryptionParams::r4(b"user", b"owner", Permissions::all(), b"id1-bytes", true, true);
        assert_eq!((params.v, params.r), (4, 4));
        assert!(params.aes());
        assert_eq!(params.key_length_bits(), 128);
    }

    #[test]
    fn test_r6_params() {
        let params = EncryptionParams::r6(b"user", b"owner", Permissions::all(), true).unwrap();
        assert_eq!((params.v, params.r), (5, 6));
        assert_eq!(params.file_key.len(), 32);
        assert!(params.aes());
    }

    #[test]
    fn test_string_encryption_round_trip_rc4() {
        let params = EncryptionParams::r3(b"user", b"owner", Permissions::all(), b"xyz");
        let state = EncryptionState::new(params, IvSource::Random);
        let plain = b"a secret string";
        let cipher = state.encrypt_string(plain, 4, 0).unwrap();
        assert_ne!(&cipher, plain);
        // RC4 is symmetric under the same object key.
        let key = state.object_key(4, 0);
        assert_eq!(rc4::rc4_crypt(&key, &cipher), plain);
    }

    #[test]
    fn test_string_encryption_round_trip_aes() {
        let params =
            EncryptionParams::r4(b"user", b"owner", Permissions::all(), b"xyz", true, true);
        let state = EncryptionState::new(params, IvSource::Static([7; 16]));
        let plain = b"a secret string";
        let cipher = state.encrypt_string(plain, 4, 0).unwrap();
        let key = state.object_key(4, 0);
        assert_eq!(aes::decrypt_cbc(&key, &cipher).unwrap(), plain);
    }

    #[test]
    fn test_stream_length_arithmetic() {
        let params =
            EncryptionParams::r4(b"u", b"o", Permissions::all(), b"id", true, true);
        let state = EncryptionState::new(params, IvSource::Random);
        assert_eq!(state.encrypted_stream_length(0), 32);
        assert_eq!(state.encrypted_stream_length(15), 32);
        assert_eq!(state.encrypted_stream_length(16), 48);
        assert_eq!(state.encrypted_stream_length(100), 128);

        let rc4_params = EncryptionParams::r3(b"u", b"o", Permissions::all(), b"id");
        let rc4_state = EncryptionState::new(rc4_params, IvSource::Random);
        assert_eq!(rc4_state.encrypted_stream_length(100), 100);
    }

    #[test]
    fn test_dictionary_v4_aes() {
        let params =
            EncryptionParams::r4(b"u", b"o", Permissions::all(), b"id", true, true);
        let state = EncryptionState::new(params, IvSource::Random);
        let dict = state.dictionary();
        assert_eq!(dict.get("V").unwrap().as_integer(), Some(4));
        assert_eq!(dict.get("Length").unwrap().as_integer(), Some(128));
        let cf = dict.get("CF").unwrap().as_dict().unwrap();
        let std_cf = cf.get("StdCF").unwrap().as_dict().unwrap();
        assert_eq!(std_cf.get("CFM").unwrap().as_name(), Some("AESV2"));
        assert_eq!(std_cf.get("Length").unwrap().as_integer(), Some(16));
        assert_eq!(dict.get("StmF").unwrap().as_name(), Some("StdCF"));
        assert_eq!(dict.get("StrF").unwrap().as_name(), Some("StdCF"));
    }

    #[test]
    fn test_dictionary_v5() {
        let params = EncryptionParams::r6(b"u", b"o", Permissions::all(), false).unwrap();
        let state = EncryptionState::new(params, IvSource::Random);
        let dict = state.dictionary();
        assert_eq!(dict.get("V").unwrap().as_integer(), Some(5));
        assert_eq!(dict.get("R").unwrap().as_integer(), Some(6));
        assert!(dict.contains_key("OE"));
        assert!(dict.contains_key("UE"));
        assert!(dict.contains_key("Perms"));
        assert_eq!(dict.get("EncryptMetadata").and_then(Object::as_bool), Some(false));
        let cf = dict.get("CF").unwrap().as_dict().unwrap();
        let std_cf = cf.get("StdCF").unwrap().as_dict().unwrap();
        assert_eq!(std_cf.get("CFM").unwrap().as_name(), Some("AESV3"));
    }
}
