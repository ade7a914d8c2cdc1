//! Backend code adapter
//!
//! Maps key-value protocol status codes, client-side transport conditions
//! and query service error codes onto [`EngineError`]. This is the only
//! place numeric codes are interpreted.

use super::errors::{EngineError, EngineResult};

/// Key-value binary protocol response status codes.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const KEY_ENOENT: u16 = 0x0001;
    pub const KEY_EEXISTS: u16 = 0x0002;
    pub const NOT_STORED: u16 = 0x0005;
    pub const NOT_MY_VBUCKET: u16 = 0x0007;
    pub const LOCKED: u16 = 0x0009;
    pub const ENOMEM: u16 = 0x0082;
    pub const EBUSY: u16 = 0x0085;
    pub const ETMPFAIL: u16 = 0x0086;
    pub const DURABILITY_INVALID_LEVEL: u16 = 0x00a0;
    pub const DURABILITY_IMPOSSIBLE: u16 = 0x00a1;
    pub const SYNC_WRITE_IN_PROGRESS: u16 = 0x00a2;
    pub const SYNC_WRITE_AMBIGUOUS: u16 = 0x00a3;
    pub const SYNC_WRITE_RECOMMIT_IN_PROGRESS: u16 = 0x00a4;
}

/// Query service error codes that mean the index cannot serve the request.
pub mod query {
    pub const SYNTAX_ERROR: u32 = 3000;
    pub const NO_INDEX_AVAILABLE: u32 = 4000;
    pub const PRIMARY_INDEX_MISSING: u32 = 12004;
    pub const INDEX_NOT_FOUND: u32 = 12016;
}

/// Conditions detected by the client rather than reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFault {
    TimedOut,
    ConnectionRefused,
    ConnectionReset,
    HostUnreachable,
}

impl ClientFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimedOut => "timed out",
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::HostUnreachable => "no route to host",
        }
    }
}

/// Classify a key-value response status.
pub fn from_kv_status(code: u16) -> EngineResult<()> {
    match code {
        status::SUCCESS => Ok(()),
        status::KEY_ENOENT => Err(EngineError::KeyNotFound),
        status::KEY_EEXISTS => Err(EngineError::CasConflict),
        status::NOT_MY_VBUCKET => Err(EngineError::Temporary("topology changed".into())),
        status::LOCKED => Err(EngineError::Temporary("document locked".into())),
        status::ENOMEM | status::EBUSY | status::ETMPFAIL => {
            Err(EngineError::Temporary(format!("server busy ({:#06x})", code)))
        }
        status::SYNC_WRITE_IN_PROGRESS | status::SYNC_WRITE_RECOMMIT_IN_PROGRESS => Err(
            EngineError::Temporary("synchronous write in progress".into()),
        ),
        // The server cannot tell whether the write committed.
        status::SYNC_WRITE_AMBIGUOUS => Err(EngineError::Timeout),
        status::DURABILITY_INVALID_LEVEL | status::DURABILITY_IMPOSSIBLE => Err(
            EngineError::DurabilityFailure(format!("status {:#06x}", code)),
        ),
        other => Err(EngineError::backend(
            u32::from(other),
            "unexpected key-value status",
        )),
    }
}

/// Classify a client-side transport condition.
pub fn from_client_fault(fault: ClientFault) -> EngineError {
    match fault {
        ClientFault::TimedOut => EngineError::Timeout,
        other => EngineError::Network(other.as_str().to_string()),
    }
}

/// Classify a query service error.
pub fn from_query_code(code: u32, message: &str) -> EngineError {
    match code {
        query::NO_INDEX_AVAILABLE | query::PRIMARY_INDEX_MISSING | query::INDEX_NOT_FOUND => {
            EngineError::IndexUnavailable(message.to_string())
        }
        other => EngineError::backend(other, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_status() {
        assert!(from_kv_status(status::SUCCESS).is_ok());
    }

    #[test]
    fn test_not_found_and_exists() {
        assert_eq!(from_kv_status(status::KEY_ENOENT), Err(EngineError::KeyNotFound));
        assert_eq!(from_kv_status(status::KEY_EEXISTS), Err(EngineError::CasConflict));
    }

    #[test]
    fn test_temporary_statuses() {
        for code in [
            status::ETMPFAIL,
            status::EBUSY,
            status::ENOMEM,
            status::NOT_MY_VBUCKET,
            status::LOCKED,
            status::SYNC_WRITE_IN_PROGRESS,
        ] {
            let err = from_kv_status(code).unwrap_err();
            assert!(matches!(err, EngineError::Temporary(_)), "code {:#x}", code);
        }
    }

    #[test]
    fn test_durability_statuses() {
        assert!(matches!(
            from_kv_status(status::DURABILITY_IMPOSSIBLE),
            Err(EngineError::DurabilityFailure(_))
        ));
        assert_eq!(
            from_kv_status(status::SYNC_WRITE_AMBIGUOUS),
            Err(EngineError::Timeout)
        );
    }

    #[test]
    fn test_unknown_status_is_backend() {
        assert_eq!(
            from_kv_status(status::NOT_STORED),
            Err(EngineError::backend(5, "unexpected key-value status"))
        );
    }

    #[test]
    fn test_client_faults() {
        assert_eq!(from_client_fault(ClientFault::TimedOut), EngineError::Timeout);
        assert_eq!(
            from_client_fault(ClientFault::ConnectionReset),
            EngineError::Network("connection reset".into())
        );
    }

    #[test]
    fn test_query_codes() {
        assert!(matches!(
            from_query_code(query::INDEX_NOT_FOUND, "idx_airportname"),
            EngineError::IndexUnavailable(_)
        ));
        assert!(matches!(
            from_query_code(query::NO_INDEX_AVAILABLE, "no index"),
            EngineError::IndexUnavailable(_)
        ));
        assert_eq!(
            from_query_code(query::SYNTAX_ERROR, "syntax error"),
            EngineError::backend(3000, "syntax error")
        );
    }
}
