use chrono::{ DateTime, Local, NaiveDateTime, TimeZone, Utc };
use log::warn;
use serde::de::Error as DeError;
use serde::{ Deserialize, Deserializer, Serialize };
use serde_json::Value as JsonValue;
use std::fmt;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Server-assigned message identifier. The API hands out integers today but
/// nothing on this side depends on that.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Int(id) => write!(f, "{}", id),
            MessageId::Text(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "user_username")]
    pub author_name: String,
    #[serde(rename = "is_host", default)]
    pub is_author_privileged: bool,
    pub content: String,
    /// `None` when the server sent something that is not a recognisable time.
    #[serde(rename = "timestamp", default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// RFC 3339 first; offset-less values (`USE_TZ = False` backends) are read as
/// local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where D: Deserializer<'de>
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    let parsed = match &raw {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => parse_timestamp(s),
        Some(_) => None,
    };
    if parsed.is_none() {
        if let Some(value) = raw.filter(|v| !v.is_null()) {
            warn!("Unrecognised message timestamp {}", value);
        }
    }
    Ok(parsed)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: String,
}

/// List endpoint payload: a bare array or a paginated `{"results": [...]}`
/// object. An object without `results` is an empty list.
#[derive(Debug)]
pub struct MessageListResponse(Vec<Message>);

impl MessageListResponse {
    pub fn into_messages(self) -> Vec<Message> {
        self.0
    }
}

impl<'de> Deserialize<'de> for MessageListResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: Deserializer<'de>
    {
        let items = match JsonValue::deserialize(deserializer)? {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut page) => match page.remove("results") {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(JsonValue::Array(items)) => items,
                Some(other) => {
                    return Err(D::Error::custom(format!("`results` is not an array: {}", other)));
                }
            },
            other => {
                return Err(D::Error::custom(format!("expected a message list, got {}", other)));
            }
        };

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                Message::deserialize(item).map_err(|e| D::Error::custom(format!("message {}: {}", index, e)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(MessageListResponse)
    }
}

#[derive(Debug, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub content: &'a str,
}

/// Pulls a display message out of an error body: `detail` wins, then the first
/// `content` validation error. Anything unparseable yields `None`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let root: JsonValue = serde_json::from_str(body).ok()?;

    let detail = root
        .get("detail")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty());
    if let Some(detail) = detail {
        return Some(detail.to_string());
    }

    root.get("content")
        .and_then(|c| c.get(0))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": 7,
        "user_username": "maria",
        "is_host": true,
        "content": "Doors open at six",
        "timestamp": "2024-05-01T18:02:11.532000Z"
    }"#;

    #[test]
    fn decodes_server_field_names() {
        let msg: Message = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(msg.id, MessageId::Int(7));
        assert_eq!(msg.author_name, "maria");
        assert!(msg.is_author_privileged);
        assert_eq!(msg.content, "Doors open at six");
        assert_eq!(msg.created_at.unwrap().to_rfc3339(), "2024-05-01T18:02:11.532+00:00");
    }

    #[test]
    fn missing_host_flag_defaults_to_false() {
        let json = r#"{"id":"a1","user_username":"bo","content":"hi","timestamp":"2024-05-01T18:02:11+02:00"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, MessageId::Text("a1".into()));
        assert!(!msg.is_author_privileged);
        assert_eq!(msg.created_at.unwrap().to_rfc3339(), "2024-05-01T16:02:11+00:00");
    }

    #[test]
    fn list_accepts_plain_and_paged_shapes() {
        let plain = format!("[{}]", SAMPLE);
        let paged = format!(r#"{{"count":1,"next":null,"results":[{}]}}"#, SAMPLE);

        let a = serde_json::from_str::<MessageListResponse>(&plain).unwrap().into_messages();
        let b = serde_json::from_str::<MessageListResponse>(&paged).unwrap().into_messages();
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn object_without_results_is_empty() {
        let list = serde_json::from_str::<MessageListResponse>(r#"{"count":0}"#).unwrap();
        assert!(list.into_messages().is_empty());

        let list = serde_json::from_str::<MessageListResponse>("[]").unwrap();
        assert!(list.into_messages().is_empty());
    }

    #[test]
    fn naive_timestamp_is_read_as_local_time() {
        let plain = format!(
            r#"[{}, {{"id":8,"user_username":"bo","content":"hi","timestamp":"2024-05-01T18:02:11"}}]"#,
            SAMPLE
        );
        let messages = serde_json::from_str::<MessageListResponse>(&plain).unwrap().into_messages();
        assert_eq!(messages.len(), 2);

        let expected = Local.with_ymd_and_hms(2024, 5, 1, 18, 2, 11).earliest().unwrap();
        assert_eq!(messages[1].created_at, Some(expected.with_timezone(&Utc)));

        let spaced = parse_timestamp("2024-05-01 18:02:11.250").unwrap();
        assert_eq!(spaced.with_timezone(&Local).format("%H:%M:%S%.3f").to_string(), "18:02:11.250");
    }

    #[test]
    fn unreadable_timestamp_keeps_the_message() {
        let plain = r#"[
            {"id":1,"user_username":"bo","content":"a","timestamp":"yesterday-ish"},
            {"id":2,"user_username":"bo","content":"b","timestamp":null},
            {"id":3,"user_username":"bo","content":"c"},
            {"id":4,"user_username":"bo","content":"d","timestamp":1714586531}
        ]"#;
        let messages = serde_json::from_str::<MessageListResponse>(plain).unwrap().into_messages();
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| m.created_at.is_none()));
    }

    #[test]
    fn decode_error_names_message_and_field() {
        let plain = format!(r#"[{}, {{"id":8,"content":"hi","timestamp":"2024-05-01T18:02:11Z"}}]"#, SAMPLE);
        let err = serde_json::from_str::<MessageListResponse>(&plain).unwrap_err().to_string();
        assert!(err.contains("message 1"), "{}", err);
        assert!(err.contains("user_username"), "{}", err);

        let err = serde_json::from_str::<MessageListResponse>(r#"{"results":"nope"}"#).unwrap_err();
        assert!(err.to_string().contains("results"), "{}", err);
    }

    #[test]
    fn error_message_prefers_detail() {
        let body = r#"{"detail":"Authentication credentials were not provided.","content":["x"]}"#;
        assert_eq!(
            extract_error_message(body).as_deref(),
            Some("Authentication credentials were not provided.")
        );
    }

    #[test]
    fn error_message_falls_back_to_first_content_error() {
        let body = r#"{"content":["This field may not be blank.","other"]}"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("This field may not be blank."));
    }

    #[test]
    fn error_message_tolerates_garbage() {
        assert_eq!(extract_error_message("<html>502</html>"), None);
        assert_eq!(extract_error_message(""), None);
        assert_eq!(extract_error_message(r#"{"content":[]}"#), None);
        assert_eq!(extract_error_message(r#"{"detail":42}"#), None);
    }
}
