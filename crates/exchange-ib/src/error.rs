//! Error types for the IB protocol client.
//!
//! Gateway error codes are classified once here so every component treats
//! informational notices, missing contracts and missing market-data
//! entitlements the same way.

use thiserror::Error;

/// Errors surfaced by the IB client.
#[derive(Debug, Clone, Error)]
pub enum IbError {
    /// Handshake or transport failure while establishing the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation attempted while no connection is attached.
    #[error("not connected to gateway")]
    NotConnected,

    /// Connection dropped while the request was in flight.
    #[error("gateway connection closed")]
    Disconnected,

    /// A correlated request exceeded its deadline with nothing usable.
    #[error("request {req_id} ({request}) timed out")]
    RequestTimeout {
        /// Correlation id of the request.
        req_id: i64,
        /// Request kind, for logs.
        request: &'static str,
    },

    /// Gateway has no security definition for the contract.
    #[error("contract not found: {0}")]
    ContractNotFound(String),

    /// Account lacks the market-data subscription for the instrument.
    #[error("no market data entitlement ({code}): {message}")]
    NoMarketDataEntitlement {
        /// Gateway error code.
        code: i32,
        /// Gateway message.
        message: String,
    },

    /// Any other gateway error tied to a request.
    #[error("gateway error {code}: {message}")]
    Gateway {
        /// Gateway error code.
        code: i32,
        /// Gateway message.
        message: String,
    },

    /// Gateway rejected a previously placed order.
    #[error("order {order_id} rejected: {reason}")]
    OrderRejected {
        /// Broker order id.
        order_id: i64,
        /// Reason reported by the gateway.
        reason: String,
    },

    /// Broker-issued state (order id counter, account) is not known yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// A request on the same sentinel id is still pending.
    #[error("request {0} already in flight")]
    RequestInFlight(i64),

    /// Order parameters cannot be turned into a gateway order.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Execution store failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl IbError {
    /// Builds the typed error for a gateway error code.
    pub fn from_gateway(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match classify(code) {
            Notice::ContractNotFound => Self::ContractNotFound(message),
            Notice::NoEntitlement => Self::NoMarketDataEntitlement { code, message },
            Notice::Informational | Notice::Other => Self::Gateway { code, message },
        }
    }

    /// True for errors fatal to the whole session until reconnect.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected | Self::Disconnected)
    }
}

impl From<sqlx::Error> for IbError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result alias for IB operations.
pub type Result<T> = std::result::Result<T, IbError>;

/// Data-farm connectivity notices and the delayed-data notice.
pub const INFORMATIONAL_CODES: &[i32] = &[2103, 2104, 2105, 2106, 2107, 2108, 2119, 2157, 2158, 10167];

/// "No security definition has been found for the request."
pub const CONTRACT_NOT_FOUND_CODES: &[i32] = &[200];

/// Market-data subscription / entitlement failures.
pub const NO_ENTITLEMENT_CODES: &[i32] = &[354, 10089, 10090, 10168, 10186, 10197];

/// Coarse classification of a gateway error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Informational,
    ContractNotFound,
    NoEntitlement,
    Other,
}

/// Classify a gateway error code.
pub fn classify(code: i32) -> Notice {
    if INFORMATIONAL_CODES.contains(&code) {
        Notice::Informational
    } else if CONTRACT_NOT_FOUND_CODES.contains(&code) {
        Notice::ContractNotFound
    } else if NO_ENTITLEMENT_CODES.contains(&code) {
        Notice::NoEntitlement
    } else {
        Notice::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(classify(2104), Notice::Informational);
        assert_eq!(classify(10167), Notice::Informational);
        assert_eq!(classify(200), Notice::ContractNotFound);
        assert_eq!(classify(354), Notice::NoEntitlement);
        assert_eq!(classify(201), Notice::Other);
    }

    #[test]
    fn test_from_gateway_maps_to_typed_error() {
        assert!(matches!(
            IbError::from_gateway(200, "No security definition"),
            IbError::ContractNotFound(_)
        ));
        assert!(matches!(
            IbError::from_gateway(10168, "not subscribed"),
            IbError::NoMarketDataEntitlement { code: 10168, .. }
        ));
        let err = IbError::from_gateway(321, "bad request");
        assert!(err.to_string().contains("321"));
    }

    #[test]
    fn test_connection_errors() {
        assert!(IbError::Disconnected.is_connection_error());
        assert!(!IbError::NotReady("ids".into()).is_connection_error());
    }
}
