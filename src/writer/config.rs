//! Writer configuration.
//!
//! Options mirror the configuration surface of the writer: output mode
//! selection (standard, QDF, PCLm, linearized), stream handling, object
//! stream policy, encryption, and ID generation. Incompatible combinations
//! are rejected when the offending option is set.

use std::path::PathBuf;

use crate::decoders::DecodeLevel;
use crate::encryption::{IvSource, Permissions};
use crate::error::{Error, Result};

/// Object stream policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectStreamMode {
    /// Never write object streams.
    Disable,
    /// Keep the input's object stream membership.
    #[default]
    Preserve,
    /// Regroup all eligible objects into object streams.
    Generate,
}

/// Stream data policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamDataMode {
    /// Keep stream data exactly as stored.
    Preserve,
    /// Decode streams and store them uncompressed.
    Uncompress,
    /// Decode streams and recompress with Flate.
    #[default]
    Compress,
}

/// Encryption to install on the output file.
#[derive(Debug, Clone)]
pub enum EncryptionSpec {
    /// 40-bit RC4 (V1/R2).
    R2 {
        /// User password.
        user_password: Vec<u8>,
        /// Owner password.
        owner_password: Vec<u8>,
        /// Permission flags.
        permissions: Permissions,
    },
    /// 128-bit RC4 (V2/R3).
    R3 {
        /// User password.
        user_password: Vec<u8>,
        /// Owner password.
        owner_password: Vec<u8>,
        /// Permission flags.
        permissions: Permissions,
    },
    /// 128-bit crypt filters (V4/R4), RC4 or AES.
    R4 {
        /// User password.
        user_password: Vec<u8>,
        /// Owner password.
        owner_password: Vec<u8>,
        /// Permission flags.
        permissions: Permissions,
        /// Use AES-128 rather than RC4.
        use_aes: bool,
        /// Encrypt the document metadata stream.
        encrypt_metadata: bool,
    },
    /// 256-bit AES (V5/R6).
    R6 {
        /// User password.
        user_password: Vec<u8>,
        /// Owner password.
        owner_password: Vec<u8>,
        /// Permission flags.
        permissions: Permissions,
        /// Encrypt the document metadata stream.
        encrypt_metadata: bool,
    },
}

/// Configuration for one write.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub(crate) object_streams: ObjectStreamMode,
    pub(crate) stream_data: StreamDataMode,
    pub(crate) decode_level: DecodeLevel,
    pub(crate) decode_level_set: bool,
    pub(crate) compress_streams: bool,
    pub(crate) compress_streams_set: bool,
    pub(crate) recompress_flate: bool,
    pub(crate) normalize_content: bool,
    pub(crate) normalize_content_set: bool,
    pub(crate) qdf: bool,
    pub(crate) linearize: bool,
    pub(crate) pclm: bool,
    pub(crate) preserve_unreferenced: bool,
    pub(crate) preserve_encryption: bool,
    pub(crate) preserve_encryption_set: bool,
    pub(crate) newline_before_endstream: bool,
    pub(crate) deterministic_id: bool,
    pub(crate) static_id: bool,
    pub(crate) no_original_object_ids: bool,
    pub(crate) direct_stream_lengths: bool,
    pub(crate) encrypt_use_aes: bool,
    pub(crate) forced_pdf_version: Option<String>,
    pub(crate) forced_extension_level: i32,
    pub(crate) extra_header_text: String,
    pub(crate) linearize_pass1: Option<PathBuf>,
    pub(crate) encryption: Option<EncryptionSpec>,
    pub(crate) iv_source: IvSource,
    pub(crate) output_name: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            object_streams: ObjectStreamMode::default(),
            stream_data: StreamDataMode::default(),
            decode_level: DecodeLevel::Generalized,
            decode_level_set: false,
            compress_streams: true,
            compress_streams_set: false,
            recompress_flate: false,
            normalize_content: false,
            normalize_content_set: false,
            qdf: false,
            linearize: false,
            pclm: false,
            preserve_unreferenced: false,
            preserve_encryption: true,
            preserve_encryption_set: false,
            newline_before_endstream: false,
            deterministic_id: false,
            static_id: false,
            no_original_object_ids: false,
            direct_stream_lengths: true,
            encrypt_use_aes: false,
            forced_pdf_version: None,
            forced_extension_level: 0,
            extra_header_text: String::new(),
            linearize_pass1: None,
            encryption: None,
            iv_source: IvSource::Random,
            output_name: String::new(),
        }
    }
}

impl WriterConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the object stream policy.
    pub fn object_streams(&mut self, mode: ObjectStreamMode) -> &mut Self {
        self.object_streams = mode;
        self
    }

    /// Set the stream data policy. Unless overridden explicitly, this also
    /// selects the decode level and Flate compression.
    pub fn stream_data(&mut self, mode: StreamDataMode) -> &mut Self {
        self.stream_data = mode;
        if !self.decode_level_set {
            self.decode_level = match mode {
                StreamDataMode::Preserve => DecodeLevel::None,
                StreamDataMode::Uncompress | StreamDataMode::Compress => DecodeLevel::Generalized,
            };
        }
        if !self.compress_streams_set {
            self.compress_streams = matches!(mode, StreamDataMode::Compress);
        }
        self
    }

    /// Set how far input filters are decoded.
    pub fn decode_level(&mut self, level: DecodeLevel) -> Result<&mut Self> {
        if self.pclm {
            return Err(Error::Usage(
                "decode level cannot be specified for PCLm output".to_string(),
            ));
        }
        self.decode_level = level;
        self.decode_level_set = true;
        Ok(self)
    }

    /// Enable or disable Flate compression of output streams.
    pub fn compress_streams(&mut self, on: bool) -> Result<&mut Self> {
        if self.pclm {
            return Err(Error::Usage(
                "stream compression cannot be specified for PCLm output".to_string(),
            ));
        }
        self.compress_streams = on;
        self.compress_streams_set = true;
        Ok(self)
    }

    /// Re-compress streams that are already Flate-compressed.
    pub fn recompress_flate(&mut self, on: bool) -> &mut Self {
        self.recompress_flate = on;
        self
    }

    /// Normalize end-of-line conventions inside page content streams.
    pub fn normalize_content(&mut self, on: bool) -> &mut Self {
        self.normalize_content = on;
        self.normalize_content_set = true;
        self
    }

    /// Select QDF output: uncompressed, indented, annotated with original
    /// object IDs, with indirect stream lengths.
    pub fn qdf(&mut self, on: bool) -> Result<&mut Self> {
        if on && self.linearize {
            return Err(Error::Usage("QDF output cannot be linearized".to_string()));
        }
        if on && self.pclm {
            return Err(Error::Usage("QDF output cannot be combined with PCLm".to_string()));
        }
        if on && self.preserve_encryption_set && self.preserve_encryption {
            return Err(Error::Usage(
                "QDF output cannot preserve input encryption".to_string(),
            ));
        }
        self.qdf = on;
        if on {
            self.preserve_encryption = false;
            if !self.normalize_content_set {
                self.normalize_content = true;
            }
            if !self.compress_streams_set {
                self.compress_streams = false;
            }
            if !self.decode_level_set {
                self.decode_level = DecodeLevel::Generalized;
            }
            self.direct_stream_lengths = false;
        }
        Ok(self)
    }

    /// Select linearized ("fast web view") output.
    pub fn linearize(&mut self, on: bool) -> Result<&mut Self> {
        if on && self.qdf {
            return Err(Error::Usage("QDF output cannot be linearized".to_string()));
        }
        if on && self.pclm {
            return Err(Error::Usage("PCLm output cannot be linearized".to_string()));
        }
        self.linearize = on;
        Ok(self)
    }

    /// Select PCLm output.
    pub fn pclm(&mut self, on: bool) -> Result<&mut Self> {
        if on && self.linearize {
            return Err(Error::Usage("PCLm output cannot be linearized".to_string()));
        }
        if on && self.qdf {
            return Err(Error::Usage("QDF output cannot be combined with PCLm".to_string()));
        }
        if on && (self.decode_level_set || self.compress_streams_set) {
            return Err(Error::Usage(
                "stream options cannot be specified for PCLm output".to_string(),
            ));
        }
        self.pclm = on;
        Ok(self)
    }

    /// Enqueue every input object, referenced or not.
    pub fn preserve_unreferenced(&mut self, on: bool) -> &mut Self {
        self.preserve_unreferenced = on;
        self
    }

    /// Carry the input file's encryption into the output.
    pub fn preserve_encryption(&mut self, on: bool) -> Result<&mut Self> {
        if on && self.qdf {
            return Err(Error::Usage(
                "QDF output cannot preserve input encryption".to_string(),
            ));
        }
        self.preserve_encryption = on;
        self.preserve_encryption_set = true;
        Ok(self)
    }

    /// Always put a newline before `endstream`.
    pub fn newline_before_endstream(&mut self, on: bool) -> &mut Self {
        self.newline_before_endstream = on;
        self
    }

    /// Derive /ID from the file content rather than from the clock.
    pub fn deterministic_id(&mut self, on: bool) -> Result<&mut Self> {
        if on && self.encryption.is_some() {
            return Err(Error::Usage(
                "unable to generate a deterministic ID because the file to be written is encrypted"
                    .to_string(),
            ));
        }
        self.deterministic_id = on;
        Ok(self)
    }

    /// Use a fixed /ID. Intended for test suites only.
    pub fn static_id(&mut self, on: bool) -> &mut Self {
        self.static_id = on;
        self
    }

    /// Suppress the original-object-ID comments in QDF output.
    pub fn no_original_object_ids(&mut self, on: bool) -> &mut Self {
        self.no_original_object_ids = on;
        self
    }

    /// Store stream lengths inline rather than as companion objects.
    pub fn direct_stream_lengths(&mut self, on: bool) -> &mut Self {
        self.direct_stream_lengths = on;
        self
    }

    /// Upgrade preserved V4 encryption from RC4 to AES.
    pub fn encrypt_use_aes(&mut self, on: bool) -> &mut Self {
        self.encrypt_use_aes = on;
        self
    }

    /// Override the header version. An unparsable string is silently
    /// ignored at write time.
    pub fn forced_pdf_version(&mut self, version: &str, extension_level: i32) -> &mut Self {
        self.forced_pdf_version = Some(version.to_string());
        self.forced_extension_level = extension_level;
        self
    }

    /// Append extra text after the header line.
    pub fn extra_header_text(&mut self, text: &str) -> &mut Self {
        self.extra_header_text = text.to_string();
        self
    }

    /// Dump the first linearization pass to a file, for debugging.
    pub fn linearize_pass1(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.linearize_pass1 = Some(path.into());
        self
    }

    /// Install encryption on the output file.
    pub fn encrypt(&mut self, spec: EncryptionSpec) -> Result<&mut Self> {
        if self.deterministic_id {
            return Err(Error::Usage(
                "unable to generate a deterministic ID because the file to be written is encrypted"
                    .to_string(),
            ));
        }
        self.encryption = Some(spec);
        self.preserve_encryption = false;
        self.preserve_encryption_set = true;
        Ok(self)
    }

    /// Configure where AES initialization vectors come from.
    pub fn iv_source(&mut self, source: IvSource) -> &mut Self {
        self.iv_source = source;
        self
    }

    /// Name mixed into non-deterministic /ID generation.
    pub fn output_name(&mut self, name: &str) -> &mut Self {
        self.output_name = name.to_string();
        self
    }
}
