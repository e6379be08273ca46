use anyhow::Context;
use history::{
    MicroOp,
    MicroOpResult,
    Value,
};
use serde_json::Value as JsonValue;

use crate::BackendError;

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Decodes a response body that must be a list parallel to `ops`. Anything
/// else means the backend acknowledged something we cannot interpret, so the
/// outcome is indefinite.
pub fn decode_results(
    ops: &[MicroOp],
    body: JsonValue,
) -> Result<Vec<MicroOpResult>, BackendError> {
    decode_results_inner(ops, body)
        .map_err(|e| BackendError::Indefinite(format!("malformed response: {e:#}")))
}

fn decode_results_inner(ops: &[MicroOp], body: JsonValue) -> anyhow::Result<Vec<MicroOpResult>> {
    let JsonValue::Array(items) = body else {
        anyhow::bail!("expected a list, got {body}");
    };
    anyhow::ensure!(
        items.len() == ops.len(),
        "expected {} results, got {}",
        ops.len(),
        items.len()
    );
    ops.iter()
        .zip(items)
        .enumerate()
        .map(|(i, (op, item))| {
            let result = decode_result(item).with_context(|| format!("result {i}"))?;
            anyhow::ensure!(
                result.answers(op),
                "result {i} {result:?} does not answer {op:?}"
            );
            Ok(result)
        })
        .collect()
}

fn decode_result(item: JsonValue) -> anyhow::Result<MicroOpResult> {
    let JsonValue::Object(mut fields) = item else {
        anyhow::bail!("expected an object, got {item}");
    };
    let ty = fields
        .remove("type")
        .context("missing \"type\"")?;
    let key = match fields.remove("key") {
        Some(JsonValue::String(key)) => key,
        other => anyhow::bail!("expected a string key, got {other:?}"),
    };
    let value = fields.remove("value").unwrap_or(JsonValue::Null);
    match ty.as_str() {
        Some("read") => {
            let value = match value {
                // A key that was never written reads as the empty list.
                JsonValue::Null => vec![],
                JsonValue::Array(elements) => elements
                    .iter()
                    .map(decode_number)
                    .collect::<anyhow::Result<_>>()?,
                other => anyhow::bail!("expected a list for read of {key}, got {other}"),
            };
            Ok(MicroOpResult::Read { key, value })
        },
        Some("append") => Ok(MicroOpResult::Append {
            value: decode_number(&value)?,
            key,
        }),
        _ => anyhow::bail!("unknown micro-op type {ty}"),
    }
}

/// Numbers cross JavaScript backends as f64, so integral floats are accepted.
fn decode_number(value: &JsonValue) -> anyhow::Result<Value> {
    let JsonValue::Number(n) = value else {
        anyhow::bail!("expected a number, got {value}");
    };
    if let Some(n) = n.as_u64() {
        return Ok(n);
    }
    let f = n
        .as_f64()
        .with_context(|| format!("{n} is not representable"))?;
    anyhow::ensure!(
        f.fract() == 0.0 && (0.0..=MAX_SAFE_INTEGER).contains(&f),
        "{n} is not a non-negative integer"
    );
    Ok(f as u64)
}

#[cfg(test)]
mod tests {
    use history::{
        MicroOp,
        MicroOpResult,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::decode_results;
    use crate::BackendError;

    fn ops() -> Vec<MicroOp> {
        vec![
            MicroOp::Read {
                key: "foo".to_string(),
            },
            MicroOp::Append {
                key: "foo".to_string(),
                value: 1,
            },
        ]
    }

    #[test]
    fn test_decode_parallel_results() -> anyhow::Result<()> {
        let body = json!([
            {"type": "read", "key": "foo", "value": [3, 4.0]},
            {"type": "append", "key": "foo", "value": 1.0},
        ]);
        assert_eq!(
            decode_results(&ops(), body)?,
            vec![
                MicroOpResult::Read {
                    key: "foo".to_string(),
                    value: vec![3, 4]
                },
                MicroOpResult::Append {
                    key: "foo".to_string(),
                    value: 1
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_null_read_is_empty_list() -> anyhow::Result<()> {
        let body = json!([
            {"type": "read", "key": "foo", "value": null},
            {"type": "append", "key": "foo", "value": 1},
        ]);
        let results = decode_results(&ops(), body)?;
        assert_eq!(
            results[0],
            MicroOpResult::Read {
                key: "foo".to_string(),
                value: vec![]
            }
        );
        Ok(())
    }

    #[test]
    fn test_malformed_bodies_are_indefinite() {
        let cases = [
            json!({"status": "ok"}),
            json!([{"type": "read", "key": "foo", "value": []}]),
            json!([
                {"type": "append", "key": "foo", "value": 1},
                {"type": "read", "key": "foo", "value": []},
            ]),
            json!([
                {"type": "read", "key": "foo", "value": [1.5]},
                {"type": "append", "key": "foo", "value": 1},
            ]),
            json!([
                {"type": "read", "key": "foo", "value": []},
                {"type": "append", "key": "foo", "value": 2},
            ]),
            json!([
                {"type": "read", "key": "bar", "value": []},
                {"type": "append", "key": "foo", "value": 1},
            ]),
        ];
        for body in cases {
            let err = decode_results(&ops(), body.clone()).unwrap_err();
            assert!(
                matches!(err, BackendError::Indefinite(_)),
                "{body} decoded to {err:?}"
            );
        }
    }
}
