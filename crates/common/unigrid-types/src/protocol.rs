use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// File transfer protocols a storage endpoint may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferProtocol {
    /// Baseline file transfer over HTTPS
    Bft,
    /// Random byte I/O
    Rbyteio,
    /// Streamable byte I/O
    Sbyteio,
    /// UNICORE FTP
    Uftp,
    /// GridFTP
    Gridftp,
}

impl TransferProtocol {
    /// Wire name of the protocol, as used in staging URIs
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProtocol::Bft => "BFT",
            TransferProtocol::Rbyteio => "RBYTEIO",
            TransferProtocol::Sbyteio => "SBYTEIO",
            TransferProtocol::Uftp => "UFTP",
            TransferProtocol::Gridftp => "GRIDFTP",
        }
    }
}

impl fmt::Display for TransferProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ProtocolParseError {
    #[error("Unknown transfer protocol: {0}")]
    UnknownProtocol(String),

    #[error("Malformed staging URI: {0}")]
    MalformedStagingUri(String),
}

impl FromStr for TransferProtocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BFT" => Ok(TransferProtocol::Bft),
            "RBYTEIO" => Ok(TransferProtocol::Rbyteio),
            "SBYTEIO" => Ok(TransferProtocol::Sbyteio),
            "UFTP" => Ok(TransferProtocol::Uftp),
            "GRIDFTP" => Ok(TransferProtocol::Gridftp),
            other => Err(ProtocolParseError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Location of a file inside a job's remote storage.
///
/// Rendered as `<PROTOCOL>:<storage endpoint>#/<path>`, the form UNICORE
/// expects in JSDL data staging elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingUri {
    pub protocol: TransferProtocol,
    pub endpoint: String,
    pub path: String,
}

impl StagingUri {
    pub fn new(protocol: TransferProtocol, endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            protocol,
            endpoint: endpoint.into(),
            path: path.into().trim_start_matches('/').to_string(),
        }
    }

    /// Parse a rendered staging URI
    pub fn parse(uri: &str) -> Result<Self, ProtocolParseError> {
        let malformed = || ProtocolParseError::MalformedStagingUri(uri.to_string());
        let (protocol, rest) = uri.split_once(':').ok_or_else(malformed)?;
        let (endpoint, path) = rest.rsplit_once("#/").ok_or_else(malformed)?;
        if endpoint.is_empty() || path.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(protocol.parse()?, endpoint, path))
    }
}

impl fmt::Display for StagingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#/{}", self.protocol, self.endpoint, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_uri_format_and_parse() {
        let uri = StagingUri::new(
            TransferProtocol::Bft,
            "https://grid.example.org:8080/SITE/services/StorageManagement?res=abc",
            "/inputs/data.csv",
        );
        let rendered = uri.to_string();
        assert_eq!(
            rendered,
            "BFT:https://grid.example.org:8080/SITE/services/StorageManagement?res=abc#/inputs/data.csv"
        );
        assert_eq!(StagingUri::parse(&rendered).unwrap(), uri);
    }

    #[test]
    fn test_staging_uri_rejects_garbage() {
        assert!(StagingUri::parse("no-separator").is_err());
        assert!(matches!(
            StagingUri::parse("FOO:https://x#/a"),
            Err(ProtocolParseError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_protocol_names_are_case_insensitive() {
        assert_eq!("bft".parse::<TransferProtocol>().unwrap(), TransferProtocol::Bft);
        assert_eq!("RByteIO".parse::<TransferProtocol>().unwrap(), TransferProtocol::Rbyteio);
    }
}
