//! LTM Protocol - Wire contract of the local language-server backend
//!
//! This crate provides the method table, headers and request bodies of the
//! backend's JSON-over-HTTPS API, plus tolerant parsing of its responses
//! into `ltm_core` records.

pub mod method;
pub mod parse;

pub use method::{Method, PageRequest, CREDENTIAL_FLAG, PORT_FLAG};
pub use parse::{
    coerce_u64, parse_metadata_page, parse_steps_page, ProtocolError, RawSessionList,
};
