//! Workbook I/O and the two-tier (section, field) header model

pub mod codec;
pub mod header;
pub mod record;
pub mod workbook;

pub use codec::{DecodedSheet, HeaderMode, decode, decode_with_mode, write_records};
pub use header::{COMPOSITE_SEPARATOR, GENERAL_INFORMATION, HeaderPair};
pub use record::Record;
pub use workbook::{Sheet, Workbook};
