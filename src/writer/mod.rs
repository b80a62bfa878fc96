//! PDF writing.
//!
//! ## Architecture
//!
//! ```text
//! Document (object graph from a parser)
//!     ↓
//! [PdfWriter] (setup, enqueue/renumber, drive the output mode)
//!     ↓
//! [object_serializer] (recursive unparse, encryption, stream filtering)
//!     ↓                          ↘
//! [objstm] / [xref]          [linearization] + [hints] (two-pass layout)
//!     ↓
//! PipelineStack → PDF bytes
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use pdf_scribe::writer::{PdfWriter, WriterConfig};
//!
//! let mut config = WriterConfig::new();
//! config.linearize(true)?;
//! let bytes = PdfWriter::new(&document, config).write()?;
//! ```

pub mod config;
pub(crate) mod hints;
pub(crate) mod linearization;
pub(crate) mod objstm;
pub(crate) mod object_serializer;
pub mod pdf_writer;
pub(crate) mod xref;

pub use config::{EncryptionSpec, ObjectStreamMode, StreamDataMode, WriterConfig};
pub use pdf_writer::PdfWriter;
