//! # pdf_scribe
//!
//! A PDF document **writer and linearizer**. Given an in-memory object
//! graph (a cross-reference map of objects, a trailer, and an ordered page
//! list, as produced by a PDF parser), it serializes the document back to a
//! conforming byte stream in one of four modes:
//!
//! - **Standard** - single pass, cross-reference table or stream at the end
//! - **QDF** - normalized, human-editable output with indirect stream
//!   lengths and original-object-ID annotations
//! - **PCLm** - a restricted raster-only subset for print pipelines
//! - **Linearized** - "fast web view" layout with bit-packed hint tables,
//!   written in two byte-reconciled passes
//!
//! All four share one serialization core: the pipeline stack of byte
//! sinks, the renumbering tables, the recursive unparser, the object
//! stream packer, and the standard-security-handler encryption layer
//! (RC4 and AES-CBC, revisions 2 through 6).
//!
//! ## Quick start
//!
//! ```ignore
//! use pdf_scribe::{Document, PdfWriter, WriterConfig};
//!
//! # fn example(document: Document) -> pdf_scribe::error::Result<()> {
//! let mut config = WriterConfig::new();
//! config.linearize(true)?;
//! let bytes = PdfWriter::new(&document, config).write()?;
//! std::fs::write("out.pdf", bytes)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Object model and input graph
pub mod document;
pub mod object;

// Output plumbing
pub mod pipeline;

// Stream filters
pub mod decoders;

// Encryption support
pub mod encryption;

// The writer itself
pub mod writer;

pub use document::Document;
pub use error::{Error, Result};
pub use object::{Object, ObjectRef};
pub use writer::{EncryptionSpec, ObjectStreamMode, PdfWriter, StreamDataMode, WriterConfig};
