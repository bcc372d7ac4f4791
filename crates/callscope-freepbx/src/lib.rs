//! FreePBX-side discovery sources: the CDR MySQL database, the REST
//! recording archive, and the voicemail spool.

pub mod archive;
pub mod cdr;
pub mod error;
pub mod voicemail;

pub use error::{FreePbxError, Result};
