//! Multi-endpoint connection selection.
//!
//! Endpoints are tried in configured order. An endpoint that reports itself
//! unavailable is skipped; any other connect error aborts selection without
//! trying the remaining endpoints.

use exchange_runtime::{Connection, Connector, Endpoint, TransportError};
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors raised while selecting endpoints
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("No endpoints configured")]
    NoEndpointsConfigured,

    #[error("No endpoint available; attempted: {}", attempted.join(", "))]
    NoEndpointAvailable { attempted: Vec<String> },

    #[error("Connection to {endpoint} failed: {source}")]
    Fatal {
        endpoint: String,
        #[source]
        source: TransportError,
    },
}

/// Connect to the first endpoint that is available
pub async fn connect_first_available(
    connector: &dyn Connector,
    endpoints: &[Endpoint],
) -> Result<(Endpoint, Box<dyn Connection>), ConnectError> {
    if endpoints.is_empty() {
        return Err(ConnectError::NoEndpointsConfigured);
    }

    let mut attempted = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        if let Some(connection) = try_endpoint(connector, endpoint, &mut attempted).await? {
            return Ok((endpoint.clone(), connection));
        }
    }

    Err(ConnectError::NoEndpointAvailable { attempted })
}

/// Connect to every available endpoint, one connection each.
///
/// Used to run one independent responder loop per endpoint.
pub async fn connect_all_available(
    connector: &dyn Connector,
    endpoints: &[Endpoint],
) -> Result<Vec<(Endpoint, Box<dyn Connection>)>, ConnectError> {
    if endpoints.is_empty() {
        return Err(ConnectError::NoEndpointsConfigured);
    }

    let mut attempted = Vec::with_capacity(endpoints.len());
    let mut connections = Vec::new();
    for endpoint in endpoints {
        if let Some(connection) = try_endpoint(connector, endpoint, &mut attempted).await? {
            connections.push((endpoint.clone(), connection));
        }
    }

    if connections.is_empty() {
        return Err(ConnectError::NoEndpointAvailable { attempted });
    }
    Ok(connections)
}

async fn try_endpoint(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    attempted: &mut Vec<String>,
) -> Result<Option<Box<dyn Connection>>, ConnectError> {
    let name = endpoint.connection_name();
    attempted.push(name.clone());

    match connector.connect(endpoint).await {
        Ok(connection) => {
            info!(endpoint = %name, queue_manager = %endpoint.queue_manager, "Endpoint selected");
            Ok(Some(connection))
        }
        Err(e) if e.is_endpoint_unavailable() => {
            warn!(endpoint = %name, error = %e, "Endpoint unavailable; trying next");
            Ok(None)
        }
        Err(source) => {
            error!(endpoint = %name, error = %source, "Endpoint connection failed");
            Err(ConnectError::Fatal {
                endpoint: name,
                source,
            })
        }
    }
}

#[cfg(test)]
#[path = "failover_tests.rs"]
mod tests;
