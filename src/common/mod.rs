mod bin_serde;
mod error;

pub(crate) use bin_serde::{BinPipe, DeSerialize, TlvHeader};
pub(crate) use error::{Error, ErrorKind, Result};
