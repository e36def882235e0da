//! Ledger transaction events
//!
//! Only three things about a transaction matter for invalidation: who sent it,
//! which contract address received it, and which function it called with what
//! arguments. Upstream publishers emit either a decoded `function` object or
//! the raw `data` form `name@hexarg@hexarg...`.

use serde::{Deserialize, Serialize};

use crate::types::{GatewayError, Result};

/// Decoded contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,

    /// Hex-encoded arguments, in call order
    #[serde(default)]
    pub args: Vec<String>,
}

impl FunctionCall {
    pub fn new(name: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }

    /// Parse `name@hex@hex...`
    pub fn parse(data: &str) -> Result<Self> {
        let mut parts = data.split('@');
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                GatewayError::Serialization(format!("no function name in data '{}'", data))
            })?;

        Ok(Self {
            name: name.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    /// Raw hex of argument `index`
    pub fn arg_hex(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Argument `index` decoded as UTF-8 text, or its raw hex when the bytes
    /// are not text
    pub fn arg_text(&self, index: usize) -> Option<String> {
        let raw = self.args.get(index)?;
        let text = hex::decode(raw)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| raw.clone());
        Some(text)
    }
}

/// Wire form of a transaction event
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEvent {
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionCall>,
}

/// Processed ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionEvent")]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
}

impl TryFrom<TransactionEvent> for Transaction {
    type Error = GatewayError;

    fn try_from(event: TransactionEvent) -> Result<Self> {
        let function = match (event.function, event.data) {
            (Some(function), _) => Some(function),
            (None, Some(data)) if !data.is_empty() => Some(FunctionCall::parse(&data)?),
            _ => None,
        };

        Ok(Self {
            sender: event.sender,
            receiver: event.receiver,
            function,
        })
    }
}

impl Transaction {
    pub fn new(sender: &str, receiver: &str, function: Option<FunctionCall>) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            function,
        }
    }

    /// Name of the called function, if any
    pub fn function_name(&self) -> Option<&str> {
        self.function.as_ref().map(|f| f.name.as_str())
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(GatewayError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_field() {
        let call = FunctionCall::parse("setSpecialRole@544b4e2d613162326333@61646472").unwrap();
        assert_eq!(call.name, "setSpecialRole");
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.arg_text(0).as_deref(), Some("TKN-a1b2c3"));
        assert_eq!(call.arg_text(1).as_deref(), Some("addr"));
        assert_eq!(call.arg_hex(1), Some("61646472"));
        assert_eq!(call.arg_text(2), None);
    }

    #[test]
    fn test_non_text_arg_falls_back_to_hex() {
        let call = FunctionCall::parse("transfer@ff00fe").unwrap();
        assert_eq!(call.arg_text(0).as_deref(), Some("ff00fe"));

        let call = FunctionCall::parse("transfer@zz").unwrap();
        assert_eq!(call.arg_text(0).as_deref(), Some("zz"));
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        assert!(FunctionCall::parse("").is_err());
        assert!(FunctionCall::parse("@00").is_err());
    }

    #[test]
    fn test_transaction_from_data() {
        let json = br#"{"sender":"addr1alice","receiver":"addr1token","data":"issue@544b4e"}"#;
        let tx = Transaction::from_bytes(json).unwrap();
        assert_eq!(tx.sender, "addr1alice");
        assert_eq!(tx.function_name(), Some("issue"));
        assert_eq!(tx.function.unwrap().arg_text(0).as_deref(), Some("TKN"));
    }

    #[test]
    fn test_transaction_function_object_wins() {
        let json = br#"{
            "sender": "a",
            "receiver": "b",
            "data": "ignored@00",
            "function": {"name": "transfer", "args": ["61"]}
        }"#;
        let tx = Transaction::from_bytes(json).unwrap();
        assert_eq!(tx.function, Some(FunctionCall::new("transfer", vec!["61".into()])));
    }

    #[test]
    fn test_plain_transfer_has_no_function() {
        let tx = Transaction::from_bytes(br#"{"sender":"a","receiver":"b","data":""}"#).unwrap();
        assert_eq!(tx.function, None);
        let tx = Transaction::from_bytes(br#"{"sender":"a","receiver":"b"}"#).unwrap();
        assert_eq!(tx.function_name(), None);
    }

    #[test]
    fn test_serialized_form_reads_back() {
        let tx = Transaction::new("a", "b", Some(FunctionCall::new("burn", vec!["01".into()])));
        let bytes = serde_json::to_vec(&tx).unwrap();
        assert_eq!(Transaction::from_bytes(&bytes).unwrap(), tx);
    }
}
