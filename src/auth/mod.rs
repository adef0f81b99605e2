//! Request signing and shared access signatures.

pub mod sas;
pub mod shared_key;

pub use sas::{format_sas_datetime, BlobSasParameters, SasPermissions, SasWindow};
pub use shared_key::SharedKeyCredential;
