//! Backend RPC methods, headers and request payloads.
//!
//! The backend speaks Connect-style JSON over HTTPS on a loopback port:
//! every call is a `POST` to `/<service>/<Method>` with a JSON body.

use serde::Serialize;
use serde_json::{json, Value};

use ltm_core::SessionId;

/// Fully-qualified service all methods belong to.
pub const SERVICE_PATH: &str = "exa.language_server_pb.LanguageServerService";

/// Header carrying the per-process credential.
pub const CSRF_HEADER: &str = "X-Codeium-Csrf-Token";

/// Header carrying the Connect protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "Connect-Protocol-Version";

/// Connect protocol version sent with every request.
pub const PROTOCOL_VERSION: &str = "1";

/// Loopback host the backend binds to.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Command-line flag carrying the backend's extension port.
pub const PORT_FLAG: &str = "--extension_server_port";

/// Command-line flag carrying the backend's credential.
pub const CREDENTIAL_FLAG: &str = "--csrf_token";

/// Backend methods used by LTM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Lists every tracked session (no parameters).
    GetAllSessions,
    /// One page of usage metadata for a session, from an offset.
    GetMetadataPage,
    /// One page of trajectory steps for a session, from an offset.
    GetStepsPage,
    /// Cheap authenticated call used only to check reachability.
    Probe,
}

impl Method {
    /// Returns the wire name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetAllSessions => "GetAllCascadeTrajectories",
            Self::GetMetadataPage => "GetCascadeTrajectoryGeneratorMetadata",
            Self::GetStepsPage => "GetCascadeTrajectorySteps",
            Self::Probe => "GetUnleashData",
        }
    }

    /// Returns the URL path of the method (leading slash included).
    pub fn path(&self) -> String {
        format!("/{SERVICE_PATH}/{}", self.name())
    }
}

/// Builds the base URL for a loopback port.
pub fn base_url(port: u16) -> String {
    format!("https://{LOOPBACK_HOST}:{port}")
}

/// Request body for paginated methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest<'a> {
    pub cascade_id: &'a str,
    pub offset: usize,
}

impl<'a> PageRequest<'a> {
    pub fn new(session_id: &'a SessionId, offset: usize) -> Self {
        Self {
            cascade_id: session_id.as_str(),
            offset,
        }
    }

    /// Serializes the request into a JSON body.
    pub fn to_value(&self) -> Value {
        json!({ "cascadeId": self.cascade_id, "offset": self.offset })
    }
}

/// Body for methods that take no parameters.
pub fn empty_body() -> Value {
    json!({})
}
