//! 任务与 Redis Stream 条目字段之间的转换

use std::collections::HashMap;

use application::tasks::TaskEnvelope;
use chrono::{DateTime, Utc};
use domain::TaskId;
use redis::Value;
use thiserror::Error;
use uuid::Uuid;

pub(crate) const FIELD_ID: &str = "id";
pub(crate) const FIELD_KIND: &str = "kind";
pub(crate) const FIELD_PAYLOAD: &str = "payload";
pub(crate) const FIELD_QUEUE: &str = "queue";
pub(crate) const FIELD_RETRY_COUNT: &str = "retry_count";
pub(crate) const FIELD_MAX_RETRY: &str = "max_retry";
pub(crate) const FIELD_ENQUEUED_AT: &str = "enqueued_at";
pub(crate) const FIELD_LAST_ERROR: &str = "last_error";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid field `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl ToString) -> CodecError {
    CodecError::Invalid {
        field,
        message: message.to_string(),
    }
}

/// 条目字段列表，字段值保持二进制
pub(crate) fn encode_fields(envelope: &TaskEnvelope) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        (FIELD_ID, envelope.id.to_string().into_bytes()),
        (FIELD_KIND, envelope.kind.clone().into_bytes()),
        (FIELD_PAYLOAD, envelope.payload.clone()),
        (FIELD_QUEUE, envelope.queue.clone().into_bytes()),
        (FIELD_RETRY_COUNT, envelope.retry_count.to_string().into_bytes()),
        (FIELD_MAX_RETRY, envelope.max_retry.to_string().into_bytes()),
        (
            FIELD_ENQUEUED_AT,
            envelope.enqueued_at.to_rfc3339().into_bytes(),
        ),
        (
            FIELD_LAST_ERROR,
            envelope.last_error.clone().unwrap_or_default().into_bytes(),
        ),
    ]
}

fn bytes_of(value: &Value) -> Option<&[u8]> {
    match value {
        Value::BulkString(bytes) => Some(bytes),
        Value::SimpleString(text) => Some(text.as_bytes()),
        _ => None,
    }
}

fn field<'a>(fields: &'a HashMap<String, Value>, name: &'static str) -> Result<&'a [u8], CodecError> {
    fields
        .get(name)
        .and_then(bytes_of)
        .ok_or(CodecError::Missing(name))
}

fn text_field(fields: &HashMap<String, Value>, name: &'static str) -> Result<String, CodecError> {
    let bytes = field(fields, name)?;
    String::from_utf8(bytes.to_vec()).map_err(|err| invalid(name, err))
}

fn number_field(fields: &HashMap<String, Value>, name: &'static str) -> Result<u32, CodecError> {
    text_field(fields, name)?
        .parse()
        .map_err(|err| invalid(name, err))
}

pub(crate) fn decode_fields(fields: &HashMap<String, Value>) -> Result<TaskEnvelope, CodecError> {
    let id = text_field(fields, FIELD_ID)?
        .parse::<Uuid>()
        .map_err(|err| invalid(FIELD_ID, err))?;
    let enqueued_at = DateTime::parse_from_rfc3339(&text_field(fields, FIELD_ENQUEUED_AT)?)
        .map_err(|err| invalid(FIELD_ENQUEUED_AT, err))?
        .with_timezone(&Utc);
    let last_error = match fields.get(FIELD_LAST_ERROR).and_then(bytes_of) {
        Some(bytes) if !bytes.is_empty() => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    };

    Ok(TaskEnvelope {
        id: TaskId::from(id),
        kind: text_field(fields, FIELD_KIND)?,
        payload: field(fields, FIELD_PAYLOAD)?.to_vec(),
        queue: text_field(fields, FIELD_QUEUE)?,
        retry_count: number_field(fields, FIELD_RETRY_COUNT)?,
        max_retry: number_field(fields, FIELD_MAX_RETRY)?,
        enqueued_at,
        last_error,
    })
}

/// 把扁平的 `[field, value, ...]` 数组转成字段表
fn pairs_to_map(values: Vec<Value>) -> HashMap<String, Value> {
    let mut map = HashMap::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        if let Some(name) = bytes_of(&name) {
            map.insert(String::from_utf8_lossy(name).into_owned(), value);
        }
    }
    map
}

/// 解析 `XAUTOCLAIM` 的回复：`[next_cursor, [[id, [field, value, ...]], ...], deleted_ids]`。
///
/// 已被删除的条目在部分 Redis 版本中以空值出现，直接跳过。
pub(crate) fn parse_autoclaim(reply: Value) -> Vec<(String, HashMap<String, Value>)> {
    let Value::Array(mut parts) = reply else {
        return Vec::new();
    };
    if parts.len() < 2 {
        return Vec::new();
    }
    let Value::Array(entries) = parts.swap_remove(1) else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let Value::Array(mut entry) = entry else {
                return None;
            };
            if entry.len() != 2 {
                return None;
            }
            let fields = match entry.pop() {
                Some(Value::Array(fields)) => pairs_to_map(fields),
                _ => return None,
            };
            let id = entry
                .pop()
                .as_ref()
                .and_then(bytes_of)
                .map(|id| String::from_utf8_lossy(id).into_owned())?;
            Some((id, fields))
        })
        .collect()
}

/// 解析单条 `XPENDING key group start end 1` 的回复：`[[id, consumer, idle_ms, delivery_count]]`
pub(crate) fn parse_delivery_count(reply: Value) -> Option<u64> {
    let Value::Array(entries) = reply else {
        return None;
    };
    let Some(Value::Array(entry)) = entries.into_iter().next() else {
        return None;
    };
    match entry.get(3)? {
        Value::Int(count) => u64::try_from(*count).ok(),
        other => std::str::from_utf8(bytes_of(other)?).ok()?.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::tasks::TaskKind;

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    fn as_stream_fields(envelope: &TaskEnvelope) -> HashMap<String, Value> {
        encode_fields(envelope)
            .into_iter()
            .map(|(name, value)| (name.to_owned(), Value::BulkString(value)))
            .collect()
    }

    #[test]
    fn stream_fields_preserve_binary_payload_and_retry_state() {
        let mut envelope = TaskEnvelope::new(TaskKind::SendEmail, vec![0, 159, 146, 150], "default", 5);
        envelope.retry_count = 2;
        envelope.last_error = Some("smtp timeout".into());

        let decoded = decode_fields(&as_stream_fields(&envelope)).unwrap();
        assert_eq!(decoded.payload, vec![0, 159, 146, 150]);
        assert_eq!(decoded.retry_count, 2);
        assert_eq!(decoded.last_error.as_deref(), Some("smtp timeout"));
        assert_eq!(decoded.id, envelope.id);
    }

    #[test]
    fn empty_last_error_means_none() {
        let envelope = TaskEnvelope::new(TaskKind::SendMessage, b"{}".to_vec(), "critical", 1);
        let decoded = decode_fields(&as_stream_fields(&envelope)).unwrap();
        assert_eq!(decoded.last_error, None);
    }

    #[test]
    fn missing_and_invalid_fields_are_reported() {
        let envelope = TaskEnvelope::new(TaskKind::SendMessage, b"{}".to_vec(), "critical", 1);
        let mut fields = as_stream_fields(&envelope);
        fields.remove(FIELD_QUEUE);
        assert_eq!(decode_fields(&fields).unwrap_err(), CodecError::Missing("queue"));

        let mut fields = as_stream_fields(&envelope);
        fields.insert(FIELD_MAX_RETRY.to_owned(), bulk("lots"));
        assert!(matches!(
            decode_fields(&fields).unwrap_err(),
            CodecError::Invalid { field: "max_retry", .. }
        ));
    }

    #[test]
    fn autoclaim_reply_skips_deleted_entries() {
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                Value::Array(vec![
                    bulk("1700000000000-0"),
                    Value::Array(vec![bulk("kind"), bulk("send-email")]),
                ]),
                Value::Nil,
            ]),
            Value::Array(vec![]),
        ]);

        let claimed = parse_autoclaim(reply);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].0, "1700000000000-0");
        assert_eq!(claimed[0].1.get("kind"), Some(&bulk("send-email")));
    }

    #[test]
    fn pending_reply_yields_delivery_count() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("1700000000000-0"),
            bulk("consumer-a"),
            Value::Int(31_000),
            Value::Int(3),
        ])]);
        assert_eq!(parse_delivery_count(reply), Some(3));
    }

    #[test]
    fn empty_pending_reply_has_no_count() {
        assert_eq!(parse_delivery_count(Value::Array(Vec::new())), None);
        assert_eq!(parse_delivery_count(Value::Nil), None);
    }
}
