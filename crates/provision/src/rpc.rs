//! JSON-RPC plumbing shared by the remote contract client.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProvisionError;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, ProvisionError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProvisionError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Make a JSON-RPC 2.0 call and deserialize the result.
///
/// Transport failures (connect, timeout, malformed body) surface as
/// [`ProvisionError::Transient`]; an error object in the response body is
/// a [`ProvisionError::ChainRejection`] for the attempted method.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, ProvisionError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| ProvisionError::Transient(format!("failed to send {method}: {e}")))?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| ProvisionError::Transient(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = body.get("error") {
        let reason = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        return Err(ProvisionError::ChainRejection {
            operation: method.to_string(),
            reason,
        });
    }

    // eth_getTransactionReceipt legitimately returns null while pending,
    // so a missing result is only an error if T cannot absorb it.
    let result = body.get("result").cloned().unwrap_or(Value::Null);

    serde_json::from_value(result).map_err(|e| {
        ProvisionError::Transient(format!("failed to deserialize {method} result: {e}"))
    })
}
