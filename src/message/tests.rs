use serde_json::{Value, json};

use crate::{
    ErrorCode, ErrorObject, Message, MessageBatch, MethodType, Params, RawMessage, RequestId,
};

#[test]
fn raw_message_deserialize_request() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":1,"method":"test_method","params":{"param1":"value1"}}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.jsonrpc, "2.0");
    assert_eq!(m.id, Some(Some(RequestId::Number(1))));
    assert_eq!(m.method.as_deref(), Some("test_method"));
    assert_eq!(m.params, Some(json!({"param1": "value1"})));
    assert!(m.is_request());
    Ok(())
}

#[test]
fn raw_message_deserialize_request_string_id() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":"abc","method":"test_method"}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.id, Some(Some(RequestId::from("abc"))));
    assert_eq!(m.params, None);
    Ok(())
}

#[test]
fn raw_message_deserialize_result() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":1,"result":{"result1":"value1"}}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.id, Some(Some(RequestId::Number(1))));
    assert_eq!(m.result, Some(json!({"result1": "value1"})));
    assert_eq!(m.error, None);
    assert!(m.is_response());
    Ok(())
}

#[test]
fn raw_message_deserialize_null_result() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.result, Some(Value::Null));
    assert!(m.is_response());
    Ok(())
}

#[test]
fn raw_message_deserialize_error() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":1,"error":{"code":1,"message":"error message"}}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.result, None);
    assert_eq!(
        m.error,
        Some(ErrorObject {
            code: ErrorCode(1),
            message: "error message".to_string(),
            data: None
        })
    );
    Ok(())
}

#[test]
fn raw_message_deserialize_null_id() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.id, Some(None));
    let Ok(Message::Response(r)) = m.classify() else {
        panic!("expected response");
    };
    assert_eq!(r.id, None);
    assert_eq!(r.result.map_err(|e| e.code), Err(ErrorCode::PARSE_ERROR));
    Ok(())
}

#[test]
fn raw_message_deserialize_notification() -> anyhow::Result<()> {
    let input = r#"{"jsonrpc":"2.0","method":"あ","params":[1,2]}"#;
    let m = serde_json::from_str::<RawMessage>(input)?;
    assert_eq!(m.id, None);
    assert_eq!(m.method.as_deref(), Some("あ"));
    assert!(m.is_notification());
    Ok(())
}

#[test]
fn raw_message_serialize_response() -> anyhow::Result<()> {
    let m = RawMessage::response(Some(RequestId::Number(0)), Ok(json!("hi")));
    assert_eq!(
        serde_json::to_value(&m)?,
        json!({"jsonrpc":"2.0","id":0,"result":"hi"})
    );
    let m = RawMessage::response(None, Ok(Value::Null));
    assert_eq!(
        serde_json::to_value(&m)?,
        json!({"jsonrpc":"2.0","id":null,"result":null})
    );
    Ok(())
}

#[test]
fn raw_message_serialize_notification() -> anyhow::Result<()> {
    let m = RawMessage::notification("n", None);
    assert_eq!(
        serde_json::to_value(&m)?,
        json!({"jsonrpc":"2.0","method":"n"})
    );
    Ok(())
}

#[test]
fn batch_deserialize() -> anyhow::Result<()> {
    let input = r#"[{"jsonrpc":"2.0","method":"a"},{"jsonrpc":"2.0","method":"b"}]"#;
    let b = serde_json::from_str::<MessageBatch>(input)?;
    let methods: Vec<_> = b.into_iter().filter_map(|m| m.method).collect();
    assert_eq!(methods, vec!["a", "b"]);
    Ok(())
}

#[test]
fn lenient_batch_keeps_id_of_malformed_message() -> anyhow::Result<()> {
    let b = MessageBatch::from_value_lenient(json!([
        {"jsonrpc":"2.0","method":"a"},
        {"jsonrpc":"2.0","id":3,"error":"boom"},
    ]))?;
    let ms: Vec<_> = b.into_iter().collect();
    assert_eq!(ms[0].method.as_deref(), Some("a"));
    assert_eq!(
        ms[1],
        RawMessage {
            id: Some(Some(RequestId::Number(3))),
            ..RawMessage::default()
        }
    );
    assert!(ms[1].clone().classify().is_err());
    Ok(())
}

#[test]
fn lenient_without_id_fails() {
    assert!(MessageBatch::from_value_lenient(json!({"jsonrpc":"2.0","method":5})).is_err());
    assert!(MessageBatch::from_value_lenient(json!({"id":null,"error":"boom"})).is_err());
    assert!(MessageBatch::from_value_lenient(json!(5)).is_err());
}

#[test]
fn classify_error_wins_over_result() {
    let m = RawMessage {
        id: Some(Some(RequestId::Number(3))),
        result: Some(json!(1)),
        error: Some(ErrorObject {
            code: ErrorCode::INTERNAL_ERROR,
            message: "x".to_string(),
            data: None,
        }),
        ..RawMessage::default()
    };
    let Ok(Message::Response(r)) = m.classify() else {
        panic!("expected response");
    };
    assert!(r.result.is_err());
}

#[test]
fn classify_invalid() {
    let m = RawMessage {
        id: Some(Some(RequestId::Number(3))),
        ..RawMessage::default()
    };
    assert!(m.clone().classify().is_err());
    assert!(!m.is_empty());
    assert!(RawMessage::default().is_empty());
}

#[test]
fn compute_params_untyped() {
    let m = MethodType::from("m");
    assert_eq!(m.compute_params(vec![]), None);
    assert_eq!(m.compute_params(vec![json!(1)]), Some(json!(1)));
    assert_eq!(m.compute_params(vec![json!([1])]), Some(json!([1])));
    assert_eq!(
        m.compute_params(vec![json!(1), json!("a")]),
        Some(json!([1, "a"]))
    );
}

#[test]
fn compute_params_typed() {
    assert_eq!(MethodType::typed("m", 0).compute_params(vec![json!(1)]), None);
    assert_eq!(
        MethodType::typed("m", 1).compute_params(vec![]),
        Some(Value::Null)
    );
    assert_eq!(
        MethodType::typed("m", 1).compute_params(vec![json!([1, 2])]),
        Some(json!([1, 2]))
    );
    assert_eq!(
        MethodType::typed("m", 3).compute_params(vec![json!("arg")]),
        Some(json!(["arg", null, null]))
    );
}

#[test]
fn params_spread() -> anyhow::Result<()> {
    let value = json!([1, "a"]);
    let p = Params::new(Some(&value), None);
    assert_eq!(p.len(), 2);
    assert_eq!(p.arg::<i32>(0)?, 1);
    assert_eq!(p.arg::<String>(1)?, "a");
    assert_eq!(p.arg::<Option<i32>>(2)?, None);
    Ok(())
}

#[test]
fn params_single_array() -> anyhow::Result<()> {
    let value = json!([1, 2]);
    let p = Params::new(Some(&value), Some(1));
    assert_eq!(p.len(), 1);
    assert_eq!(p.arg::<Vec<i32>>(0)?, vec![1, 2]);
    Ok(())
}

#[test]
fn params_zero_arity_drops_params() {
    let value = json!({"a": 1});
    let p = Params::new(Some(&value), Some(0));
    assert!(p.is_empty());
    assert_eq!(p.len(), 0);
}

#[test]
fn params_invalid() {
    let value = json!({"a": 1});
    let p = Params::new(Some(&value), None);
    let e = p.arg::<i32>(0).unwrap_err();
    assert_eq!(
        e.response_error().map(|e| e.code),
        Some(ErrorCode::INVALID_PARAMS)
    );
    let e = Params::new(None, None).to::<i32>().unwrap_err();
    assert_eq!(e.to_string(), "Params is missing.");
}
