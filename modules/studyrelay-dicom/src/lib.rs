//! Tag-level DICOM model: numeric tags, value representations, an
//! attribute container ordered by tag, and a part-10 file codec that can
//! read full datasets, read headers without touching pixel data, and
//! re-emit datasets with a regenerated file meta group.
//!
//! The network protocol lives behind the seams in `studyrelay-protocol`;
//! this crate only deals with decoded attributes and file bytes.

pub mod attributes;
pub mod codec;
pub mod dictionary;
pub mod error;
pub mod syntax;
pub mod tag;
pub mod vr;

pub use attributes::{Attribute, AttributeSet, AttributeValue};
pub use codec::{DicomFile, FileMeta, HeaderReadout};
pub use error::{DicomError, Result};
pub use tag::Tag;
pub use vr::Vr;
