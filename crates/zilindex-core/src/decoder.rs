//! Payload decoder: raw RPC transaction bodies into [`Transaction`]s.
//!
//! The RPC returns loosely-typed JSON. Serde handles the fixed envelope
//! (`RawTransaction`), and every contract value inside it goes through
//! [`Value::from_json`], which rejects unknown shapes instead of coercing them.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::address;
use crate::error::DecodeError;
use crate::types::{EventLog, Receipt, Transaction, Transition, TransitionMsg, TxData};
use crate::value::Param;

// ─── Raw wire types ───────────────────────────────────────────────────────────

/// A transaction body as returned by `GetTxnBodiesForTxBlock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub gas_limit: String,
    #[serde(default)]
    pub gas_price: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub receipt: RawReceipt,
    #[serde(default)]
    pub sender_pub_key: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub to_addr: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub cumulative_gas: String,
    #[serde(default)]
    pub epoch_num: String,
    #[serde(default)]
    pub event_logs: Vec<RawEventLog>,
    #[serde(default)]
    pub transitions: Vec<RawTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventLog {
    #[serde(rename = "_eventname")]
    pub event_name: String,
    pub address: String,
    #[serde(default)]
    pub params: Vec<RawParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParam {
    pub vname: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransition {
    pub addr: String,
    #[serde(default)]
    pub depth: u32,
    pub msg: RawMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "_tag", default)]
    pub tag: String,
    #[serde(rename = "_recipient", default)]
    pub recipient: String,
    #[serde(rename = "_amount", default)]
    pub amount: String,
    #[serde(default)]
    pub params: Vec<RawParam>,
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

/// Decode a raw transaction body from JSON.
pub fn decode_transaction_json(raw: &Json, height: u64) -> Result<Transaction, DecodeError> {
    let raw: RawTransaction = serde_json::from_value(raw.clone())?;
    decode_transaction(&raw, height)
}

/// Decode a raw transaction body observed at `height`.
///
/// Execution is detected from the receipt (any transition or event log);
/// creation from non-empty deployed code. The contract address of a
/// creation is not part of the body and is resolved separately.
pub fn decode_transaction(raw: &RawTransaction, height: u64) -> Result<Transaction, DecodeError> {
    decode_inner(raw, height).map_err(|e| e.in_transaction(&raw.id))
}

fn decode_inner(raw: &RawTransaction, height: u64) -> Result<Transaction, DecodeError> {
    let receipt = decode_receipt(&raw.receipt)?;
    let code = raw.code.clone().unwrap_or_default();
    let data = match raw.data.as_deref() {
        Some(data) => decode_data(data)?,
        None => None,
    };

    let is_contract_execution = !receipt.transitions.is_empty() || !receipt.event_logs.is_empty();
    let is_contract_creation = !code.trim().is_empty();

    let (to_addr, to_bech32) = if raw.to_addr.is_empty() {
        (String::new(), String::new())
    } else {
        address::both(&raw.to_addr)?
    };

    let (contract_address, contract_address_bech32) = if is_contract_execution {
        (Some(to_addr.clone()), Some(to_bech32.clone()))
    } else {
        (None, None)
    };

    let (sender_addr, sender_bech32) = if raw.sender_pub_key.is_empty() {
        (String::new(), String::new())
    } else {
        let sender = address::from_public_key(&raw.sender_pub_key)?;
        let bech32 = address::to_bech32(&sender)?;
        (sender, bech32)
    };

    Ok(Transaction {
        id: raw.id.clone(),
        block_num: height,
        index: 0,
        amount: raw.amount.clone(),
        gas_limit: raw.gas_limit.clone(),
        gas_price: raw.gas_price.clone(),
        nonce: raw.nonce.clone(),
        version: raw.version.clone(),
        signature: raw.signature.clone(),
        sender_pub_key: raw.sender_pub_key.clone(),
        sender_addr,
        sender_bech32,
        to_addr,
        to_bech32,
        code,
        data,
        receipt,
        is_contract_creation,
        is_contract_execution,
        contract_address,
        contract_address_bech32,
    })
}

/// Decode a list of raw params, tagging failures with the param name.
pub fn decode_params(raw: &[RawParam]) -> Result<Vec<Param>, DecodeError> {
    raw.iter()
        .map(|p| Param::decode(&p.vname, &p.ty, &p.value))
        .collect()
}

/// Decode the `data` field: an init-param array, or an object carrying
/// `_tag` and `params`. An empty string means no data.
pub fn decode_data(data: &str) -> Result<Option<TxData>, DecodeError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let json: Json = serde_json::from_str(trimmed).map_err(|e| DecodeError::InvalidData {
        reason: e.to_string(),
    })?;

    match json {
        Json::Array(items) => Ok(Some(TxData {
            tag: String::new(),
            params: decode_param_array(&items)?,
        })),
        Json::Object(map) => {
            let tag = match map.get("_tag") {
                Some(Json::String(tag)) => tag.clone(),
                _ => {
                    return Err(DecodeError::MissingField {
                        field: "_tag".into(),
                    })
                }
            };
            let params = match map.get("params") {
                None | Some(Json::Null) => Vec::new(),
                Some(Json::Array(items)) => decode_param_array(items)?,
                Some(_) => {
                    return Err(DecodeError::InvalidData {
                        reason: "params is not an array".into(),
                    })
                }
            };
            Ok(Some(TxData { tag, params }))
        }
        _ => Err(DecodeError::InvalidData {
            reason: "expected an array or an object".into(),
        }),
    }
}

/// Decode deploy-time init values (`GetSmartContractInit`).
pub fn decode_init(raw: &Json) -> Result<Vec<Param>, DecodeError> {
    match raw {
        Json::Array(items) => decode_param_array(items),
        _ => Err(DecodeError::InvalidData {
            reason: "contract init is not an array".into(),
        }),
    }
}

fn decode_param_array(items: &[Json]) -> Result<Vec<Param>, DecodeError> {
    items
        .iter()
        .map(|item| {
            let raw: RawParam =
                serde_json::from_value(item.clone()).map_err(|e| DecodeError::InvalidData {
                    reason: e.to_string(),
                })?;
            Param::decode(&raw.vname, &raw.ty, &raw.value)
        })
        .collect()
}

fn decode_receipt(raw: &RawReceipt) -> Result<Receipt, DecodeError> {
    let event_logs = raw
        .event_logs
        .iter()
        .map(|log| {
            Ok(EventLog {
                event_name: log.event_name.clone(),
                address: address::normalize(&log.address)?,
                params: decode_params(&log.params)?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let transitions = raw
        .transitions
        .iter()
        .map(|t| {
            Ok(Transition {
                addr: address::normalize(&t.addr)?,
                depth: t.depth,
                msg: TransitionMsg {
                    tag: t.msg.tag.clone(),
                    recipient: normalize_or_empty(&t.msg.recipient)?,
                    amount: t.msg.amount.clone(),
                    params: decode_params(&t.msg.params)?,
                },
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(Receipt {
        success: raw.success,
        accepted: raw.accepted,
        cumulative_gas: raw.cumulative_gas.clone(),
        epoch_num: raw.epoch_num.clone(),
        event_logs,
        transitions,
    })
}

fn normalize_or_empty(addr: &str) -> Result<String, DecodeError> {
    if addr.is_empty() {
        Ok(String::new())
    } else {
        address::normalize(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Params, Value};
    use serde_json::json;

    const PUB_KEY: &str = "0x0246E7178DC8253201101E18FD6F6EB9972451D121FC57AA2A06DD5C111E58DC6A";
    const CONTRACT: &str = "0x1111111111111111111111111111111111111111";

    fn exec_tx() -> Json {
        json!({
            "ID": "aa01",
            "amount": "0",
            "data": "{\"_tag\":\"Mint\",\"params\":[{\"vname\":\"to\",\"type\":\"ByStr20\",\"value\":\"0xabc\"}]}",
            "gasLimit": "10000",
            "gasPrice": "2000000000",
            "nonce": "12",
            "receipt": {
                "success": true,
                "cumulative_gas": "780",
                "epoch_num": "100",
                "event_logs": [{
                    "_eventname": "Mint",
                    "address": CONTRACT,
                    "params": [
                        {"vname": "to", "type": "ByStr20", "value": "0xabc"},
                        {"vname": "token_id", "type": "Uint256", "value": "7"}
                    ]
                }],
                "transitions": [{
                    "addr": CONTRACT,
                    "depth": 0,
                    "msg": {
                        "_tag": "ZRC6_RecipientAcceptMint",
                        "_recipient": "0x2222222222222222222222222222222222222222",
                        "_amount": "0",
                        "params": []
                    }
                }]
            },
            "senderPubKey": PUB_KEY,
            "signature": "0xsig",
            "toAddr": "1111111111111111111111111111111111111111",
            "version": "65537"
        })
    }

    #[test]
    fn decodes_execution() {
        let tx = decode_transaction_json(&exec_tx(), 100).unwrap();
        assert_eq!(tx.id, "aa01");
        assert_eq!(tx.block_num, 100);
        assert!(tx.is_contract_execution);
        assert!(!tx.is_contract_creation);
        assert_eq!(tx.contract_address.as_deref(), Some(CONTRACT));
        assert!(tx.contract_address_bech32.as_deref().unwrap().starts_with("zil1"));
        assert_eq!(tx.sender_addr, "0x9bfec715a6bd658fcb62b0f8cc9bfa2ade71434a");
        assert_eq!(tx.sender_bech32, "zil1n0lvw9dxh4jcljmzkruvexl69t08zs62ds9ats");

        let data = tx.data.as_ref().unwrap();
        assert_eq!(data.tag, "Mint");
        assert_eq!(data.params.str_value("to"), Some("0xabc"));

        let log = &tx.receipt.event_logs[0];
        assert_eq!(log.event_name, "Mint");
        assert_eq!(log.params.str_value("token_id"), Some("7"));
        assert_eq!(tx.receipt.transitions[0].msg.tag, "ZRC6_RecipientAcceptMint");
        assert!(tx.has_event("Mint"));
        assert!(tx.has_transition("ZRC6_RecipientAcceptMint"));
    }

    #[test]
    fn decodes_creation() {
        let raw = json!({
            "ID": "bb02",
            "code": "scilla_version 0\ncontract Foo()\n",
            "data": "[{\"vname\":\"_scilla_version\",\"type\":\"Uint32\",\"value\":\"0\"}]",
            "receipt": {"success": true},
            "senderPubKey": PUB_KEY,
            "toAddr": "0000000000000000000000000000000000000000"
        });
        let tx = decode_transaction_json(&raw, 5).unwrap();
        assert!(tx.is_contract_creation);
        assert!(!tx.is_contract_execution);
        assert!(tx.contract_address.is_none());
        let data = tx.data.unwrap();
        assert!(data.tag.is_empty());
        assert_eq!(data.params[0].vname, "_scilla_version");
    }

    #[test]
    fn plain_payment_has_no_contract() {
        let raw = json!({
            "ID": "cc03",
            "amount": "1000",
            "receipt": {"success": true},
            "toAddr": "2222222222222222222222222222222222222222"
        });
        let tx = decode_transaction_json(&raw, 1).unwrap();
        assert!(!tx.is_contract_execution);
        assert!(!tx.is_contract_creation);
        assert!(tx.contract_address.is_none());
        assert!(tx.sender_addr.is_empty());
        assert!(tx.data.is_none());
    }

    #[test]
    fn adt_event_param_decodes() {
        let mut raw = exec_tx();
        raw["receipt"]["event_logs"][0]["params"] = json!([{
            "vname": "to_token_uri_pair_list",
            "type": "List (Pair ByStr20 String)",
            "value": [
                {"constructor": "Pair", "argtypes": ["ByStr20", "String"], "arguments": ["0xabc", "ipfs://1"]}
            ]
        }]);
        let tx = decode_transaction_json(&raw, 1).unwrap();
        let value = tx.receipt.event_logs[0].params.value("to_token_uri_pair_list").unwrap();
        let pairs = value.as_list().unwrap();
        assert_eq!(pairs[0].as_adt().unwrap().str_arg(1), Some("ipfs://1"));
    }

    #[test]
    fn malformed_value_is_reported_with_context() {
        let mut raw = exec_tx();
        raw["receipt"]["event_logs"][0]["params"] = json!([
            {"vname": "flag", "type": "Bool", "value": {"constructor": "True"}}
        ]);
        let err = decode_transaction_json(&raw, 1).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("aa01"), "{msg}");
        match err {
            DecodeError::Transaction { source, .. } => {
                assert!(matches!(*source, DecodeError::InvalidParam { ref param, .. } if param == "flag"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn data_shapes() {
        assert!(decode_data("").unwrap().is_none());
        assert!(decode_data("  ").unwrap().is_none());
        assert!(matches!(decode_data("42"), Err(DecodeError::InvalidData { .. })));
        assert!(matches!(decode_data("not json"), Err(DecodeError::InvalidData { .. })));
        assert!(matches!(
            decode_data("{\"params\":[]}"),
            Err(DecodeError::MissingField { .. })
        ));
        let d = decode_data("{\"_tag\":\"Burn\"}").unwrap().unwrap();
        assert_eq!(d.tag, "Burn");
        assert!(d.params.is_empty());
    }

    #[test]
    fn init_values_decode() {
        let init = json!([
            {"vname": "initial_base_uri", "type": "String", "value": "ipfs://base/"},
            {"vname": "_this_address", "type": "ByStr20", "value": CONTRACT}
        ]);
        let params = decode_init(&init).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(
            params[0].value,
            Some(Value::Str("ipfs://base/".into()))
        );
        assert!(decode_init(&json!({"a": 1})).is_err());
    }
}
