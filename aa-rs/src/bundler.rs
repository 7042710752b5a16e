use crate::encoding::{fmt_address, fmt_h256, parse_h256, user_op_to_json};
use crate::error::{Error, Result};
use crate::types::UserOperation;
use ethers::types::{Address, H256};
use serde_json::Value;

/// What the bundler said about a submitted operation.
///
/// A rejection is a normal answer, not a transport failure, so it is returned as a
/// value rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Accepted(H256),
    Rejected {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl SubmissionOutcome {
    pub fn user_op_hash(&self) -> Option<H256> {
        match self {
            SubmissionOutcome::Accepted(hash) => Some(*hash),
            SubmissionOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    /// `eth_sendUserOperation`. The operation must already be signed.
    pub async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<SubmissionOutcome> {
        let params = serde_json::json!([user_op_to_json(user_op), fmt_address(entry_point)]);
        let body = self.rpc("eth_sendUserOperation", params).await?;
        let outcome = submission_outcome(&body)?;
        match &outcome {
            SubmissionOutcome::Accepted(hash) => {
                tracing::info!(user_op_hash = ?hash, bundler = %self.url, "userOp accepted")
            }
            SubmissionOutcome::Rejected { code, message, .. } => {
                tracing::warn!(code, %message, bundler = %self.url, "userOp rejected")
            }
        }
        Ok(outcome)
    }

    /// Single `eth_getUserOperationReceipt` lookup; `None` while the op is not yet included.
    pub async fn get_user_operation_receipt(&self, user_op_hash: H256) -> Result<Option<Value>> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let body = self.rpc("eth_getUserOperationReceipt", params).await?;
        user_operation_receipt(&body)
    }

    /// Posts a JSON-RPC request and returns the whole response body.
    async fn rpc(&self, method: &'static str, params: Value) -> Result<Value> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::rpc(method, format!("POST {} failed: {e}", self.url)))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::rpc(method, format!("failed to decode JSON: {e}")))?;

        // bundlers report JSON-RPC errors with non-2xx codes too; keep those bodies
        if !status.is_success() && body.get("error").is_none() {
            return Err(Error::rpc(method, format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

/// Interprets an `eth_sendUserOperation` response body.
pub fn submission_outcome(body: &Value) -> Result<SubmissionOutcome> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = err.get("data").filter(|d| !d.is_null()).cloned();
        return Ok(SubmissionOutcome::Rejected {
            code,
            message,
            data,
        });
    }

    let result = body
        .get("result")
        .ok_or_else(|| Error::rpc("eth_sendUserOperation", "missing result field"))?;
    parse_userop_hash(result).map(SubmissionOutcome::Accepted)
}

/// Interprets an `eth_getUserOperationReceipt` response body.
pub fn user_operation_receipt(body: &Value) -> Result<Option<Value>> {
    if let Some(err) = body.get("error") {
        return Err(Error::rpc("eth_getUserOperationReceipt", err));
    }
    match body.get("result") {
        None | Some(Value::Null) => Ok(None),
        Some(receipt) => Ok(Some(receipt.clone())),
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Usually a bare string; some bundlers wrap it in an object.
    let hash_str = ["result", "userOpHash", "userOperationHash"]
        .iter()
        .find_map(|key| res.get(key).and_then(Value::as_str))
        .or_else(|| res.as_str())
        .ok_or_else(|| {
            Error::rpc(
                "eth_sendUserOperation",
                format!("unexpected result shape: {res}"),
            )
        })?;

    parse_h256(hash_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn parse_userop_hash_from_string() {
        let hash = parse_userop_hash(&json!(HASH)).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_wrapping_objects() {
        for key in ["result", "userOpHash", "userOperationHash"] {
            let hash = parse_userop_hash(&json!({ key: HASH })).unwrap();
            assert_eq!(hash, parse_h256(HASH).unwrap(), "key {key}");
        }
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        assert!(parse_userop_hash(&json!({ "foo": "bar" })).is_err());
        assert!(matches!(
            parse_userop_hash(&json!("0x1234")),
            Err(Error::MalformedHex { .. })
        ));
    }

    #[test]
    fn accepted_submission() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": HASH });
        let outcome = submission_outcome(&body).unwrap();
        assert_eq!(outcome, SubmissionOutcome::Accepted(parse_h256(HASH).unwrap()));
        assert_eq!(outcome.user_op_hash(), Some(parse_h256(HASH).unwrap()));
    }

    #[test]
    fn rejected_submission_is_a_value() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": -32500,
                "message": "AA23 reverted",
                "data": { "reason": "0x08c379a0" }
            }
        });
        let outcome = submission_outcome(&body).unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Rejected {
                code: -32500,
                message: "AA23 reverted".to_string(),
                data: Some(json!({ "reason": "0x08c379a0" })),
            }
        );
        assert_eq!(outcome.user_op_hash(), None);
    }

    #[test]
    fn rejection_without_data() {
        let body = json!({ "error": { "code": -32602, "message": "invalid params", "data": null } });
        assert!(matches!(
            submission_outcome(&body).unwrap(),
            SubmissionOutcome::Rejected { code: -32602, data: None, .. }
        ));
    }

    #[test]
    fn receipt_not_yet_available() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": null });
        assert_eq!(user_operation_receipt(&body).unwrap(), None);
    }

    #[test]
    fn receipt_object_is_returned_as_is() {
        let receipt = json!({
            "userOpHash": HASH,
            "success": true,
            "actualGasUsed": "0xc350",
            "receipt": { "transactionHash": HASH }
        });
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": receipt.clone() });
        assert_eq!(user_operation_receipt(&body).unwrap(), Some(receipt));
    }

    #[test]
    fn receipt_error_body_is_an_rpc_error() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "method not found" } });
        let err = user_operation_receipt(&body).unwrap_err();
        assert!(matches!(err, Error::Rpc { context: "eth_getUserOperationReceipt", .. }));
        assert!(err.to_string().contains("method not found"));
    }

    #[test]
    fn missing_result_is_an_rpc_error() {
        let err = submission_outcome(&json!({ "jsonrpc": "2.0", "id": 1 })).unwrap_err();
        assert!(matches!(err, Error::Rpc { .. }));
    }
}
