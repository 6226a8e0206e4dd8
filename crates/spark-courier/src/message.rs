//! # message 模块说明
//!
//! ## 角色定位（Why）
//! - 消息是协议的基本单元：`id` 用于请求/回复关联，`path` 用于处理器路由，`body` 承载业务数据；
//! - `id` 与 `path` 在构造时校验并冻结，之后没有任何修改入口，由类型而非运行时守卫保证不可变。
//!
//! ## 生命周期（What）
//! - 入站帧经 [`Message::decode`] 构造，随后绑定到所属端点并记录来源连接；
//! - 本地消息（无来源连接）可以发送、可以作为请求发出，但不能被回复；
//! - 回复标志在同一条入站消息的所有克隆间共享，保证至多回复一次。
//!
//! ## 线上形态（How）
//! - 序列化结果恰为 `{"id", "path", "body"}`，来源、回复标志、所属端点与 `locals` 均不上线。

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use serde_json::{Map, Value};

use crate::{
    correlator::ResponseFuture,
    endpoint::EndpointCore,
    error::{DecodeError, ParseError, RequestError, RespondError, SendError, ValidationError},
    id::{ConnectionId, IdGenerator, UuidGenerator},
};

/// JSON 对象。
pub type Body = Map<String, Value>;

/// 发送目的地。
///
/// - [`Destination::All`]：广播到端点上的每条存活连接；
/// - [`Destination::One`]：仅发往指定连接；
/// - [`Destination::Many`]：发往存活连接中 ID 在列表内的子集。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Destination {
    #[default]
    All,
    One(ConnectionId),
    Many(Vec<ConnectionId>),
}

impl From<ConnectionId> for Destination {
    fn from(id: ConnectionId) -> Self {
        Destination::One(id)
    }
}

impl From<&ConnectionId> for Destination {
    fn from(id: &ConnectionId) -> Self {
        Destination::One(id.clone())
    }
}

impl From<&str> for Destination {
    fn from(id: &str) -> Self {
        Destination::One(ConnectionId::from(id))
    }
}

impl From<Vec<ConnectionId>> for Destination {
    fn from(ids: Vec<ConnectionId>) -> Self {
        Destination::Many(ids)
    }
}

impl From<Option<ConnectionId>> for Destination {
    fn from(id: Option<ConnectionId>) -> Self {
        id.map_or(Destination::All, Destination::One)
    }
}

/// 预先组装的消息数据 `{id?, path, body?}`。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl MessageSeed {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// [`Message::copy`] 的覆盖项，未给出的字段沿用原消息。
#[derive(Clone, Debug, Default)]
pub struct MessageOverrides {
    id: Option<String>,
    path: Option<String>,
    body: Option<Value>,
}

impl MessageOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// 协议消息。
///
/// # 教案式说明
/// - **意图 (Why)**：把“身份不可变、内容可变、至多回复一次”三条规则收进一个值类型；
/// - **契约 (What)**：
///   - 构造成功即具备非空 `id`、非空 `path` 与对象 `body`；
///   - [`Message::is_valid`] 还要求消息已绑定到仍然存活的端点；
///   - `locals` 是处理链内部共享的暂存区，不参与序列化；
/// - **风险 (Trade-offs)**：消息只持有端点的弱引用与来源连接的 ID，
///   不会延长端点或连接的生命周期；端点释放后的发送返回 [`SendError::EndpointGone`]。
#[derive(Clone, Debug)]
pub struct Message {
    id: Arc<str>,
    path: Arc<str>,
    body: Body,
    locals: Body,
    origin: Option<ConnectionId>,
    replied: Arc<AtomicBool>,
    owner: Option<Weak<EndpointCore>>,
}

impl Message {
    /// 由一帧的原始字节构造（未绑定）消息。
    ///
    /// - 非 UTF-8、非 JSON 或顶层不是对象：[`ParseError`]；
    /// - `path` 缺失、为空或不是字符串：[`ValidationError::MissingPath`]；
    /// - `id` 缺失或非法时由生成器补发；`body` 缺失或不是对象时为空对象。
    pub fn decode(raw: &[u8], ids: &dyn IdGenerator) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(ParseError::from)?;
        let value: Value = serde_json::from_str(text).map_err(ParseError::from)?;
        let Value::Object(mut object) = value else {
            return Err(ParseError::NotAnObject.into());
        };
        let seed = MessageSeed {
            id: match object.remove("id") {
                Some(Value::String(id)) => Some(id),
                _ => None,
            },
            path: match object.remove("path") {
                Some(Value::String(path)) => path,
                _ => String::new(),
            },
            body: object.remove("body"),
        };
        Ok(Self::from_seed(seed, ids)?)
    }

    /// 由数据记录构造（未绑定）消息。
    pub fn from_seed(seed: MessageSeed, ids: &dyn IdGenerator) -> Result<Self, ValidationError> {
        if seed.path.is_empty() {
            return Err(ValidationError::MissingPath);
        }
        let id = match seed.id {
            Some(id) if !id.is_empty() => id,
            _ => ids.generate(),
        };
        Ok(Self {
            id: Arc::from(id),
            path: Arc::from(seed.path),
            body: normalize_body(seed.body),
            locals: Body::new(),
            origin: None,
            replied: Arc::new(AtomicBool::new(false)),
            owner: None,
        })
    }

    /// 绑定所属端点与来源连接。
    pub(crate) fn bind(mut self, owner: Weak<EndpointCore>, origin: Option<ConnectionId>) -> Self {
        self.owner = Some(owner);
        self.origin = origin;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// 处理链内共享的暂存区。
    pub fn locals(&self) -> &Body {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Body {
        &mut self.locals
    }

    /// 来源连接；本地消息为 `None`。
    pub fn origin(&self) -> Option<&ConnectionId> {
        self.origin.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.origin.is_none()
    }

    pub fn is_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// 已绑定到存活端点。
    pub fn is_valid(&self) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| owner.strong_count() > 0)
    }

    /// 线上形态 `{id, path, body}`。
    pub fn to_wire(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".to_owned(), Value::String(self.id.to_string()));
        object.insert("path".to_owned(), Value::String(self.path.to_string()));
        object.insert("body".to_owned(), Value::Object(self.body.clone()));
        Value::Object(object)
    }

    /// 编码为一帧的负载（不含分隔符）。
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 以本消息的线上形态为底、应用覆盖项构造新消息。
    ///
    /// 新消息归属同一端点，但是本地消息，且拥有独立的回复标志与空的 `locals`。
    pub fn copy(&self, overrides: MessageOverrides) -> Result<Self, ValidationError> {
        let seed = MessageSeed {
            id: Some(overrides.id.unwrap_or_else(|| self.id.to_string())),
            path: overrides.path.unwrap_or_else(|| self.path.to_string()),
            body: Some(
                overrides
                    .body
                    .unwrap_or_else(|| Value::Object(self.body.clone())),
            ),
        };
        let copy = match self.core() {
            Ok(core) => Self::from_seed(seed, core.ids())?,
            Err(_) => Self::from_seed(seed, &UuidGenerator)?,
        };
        Ok(Self {
            owner: self.owner.clone(),
            ..copy
        })
    }

    /// 发送消息；所有目标都会尝试，返回最后一个失败。
    pub fn send(&self, destination: impl Into<Destination>) -> Result<(), SendError> {
        let core = self.core().inspect_err(|err| {
            tracing::debug!(message_id = %self.id, code = err.code(), "cannot send message");
        })?;
        core.send_message(self, &destination.into())
    }

    /// 作为请求发送，返回等待回复的 future。
    ///
    /// 目的地未给出或不存在时发往端点的第一条连接；超时未给出时使用端点的默认超时。
    /// 需在 Tokio 运行时内调用（超时计时器是一个任务）。
    pub fn send_as_request(
        &self,
        destination: Option<ConnectionId>,
        timeout: Option<Duration>,
    ) -> ResponseFuture {
        match self.core() {
            Ok(core) => core.issue_request(self, destination, timeout),
            Err(err) => {
                tracing::debug!(message_id = %self.id, code = err.code(), "cannot issue request");
                ResponseFuture::settled(self.id(), Err(RequestError::Send(err)))
            }
        }
    }

    /// 回复来源连接：新消息沿用本消息的 `id`，正文为 `body`（非对象按空对象处理）。
    ///
    /// 已回复、本地消息或未绑定时返回错误且不做任何发送；
    /// 只有回复成功入队才会标记已回复。
    pub fn respond(&self, body: impl Into<Value>) -> Result<(), RespondError> {
        let result = self.try_respond(body.into());
        if let Err(err) = &result {
            tracing::debug!(
                message_id = %self.id,
                path = %self.path,
                error = %err,
                "reply rejected"
            );
        }
        result
    }

    fn try_respond(&self, body: Value) -> Result<(), RespondError> {
        if self.is_replied() {
            return Err(RespondError::AlreadyReplied);
        }
        if !self.is_valid() {
            return Err(RespondError::Unbound);
        }
        let Some(origin) = self.origin.clone() else {
            return Err(RespondError::Local);
        };
        if self
            .replied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RespondError::AlreadyReplied);
        }
        let reply = Self {
            body: normalize_body(Some(body)),
            locals: Body::new(),
            origin: None,
            replied: Arc::new(AtomicBool::new(false)),
            ..self.clone()
        };
        reply.send(Destination::One(origin)).map_err(|err| {
            self.replied.store(false, Ordering::Release);
            RespondError::from(err)
        })
    }

    fn core(&self) -> Result<Arc<EndpointCore>, SendError> {
        self.owner
            .as_ref()
            .ok_or(SendError::Unbound)?
            .upgrade()
            .ok_or(SendError::EndpointGone)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 3)?;
        state.serialize_field("id", &*self.id)?;
        state.serialize_field("path", &*self.path)?;
        state.serialize_field("body", &self.body)?;
        state.end()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[{}:{}]", self.id, self.path)
    }
}

fn normalize_body(body: Option<Value>) -> Body {
    match body {
        Some(Value::Object(body)) => body,
        _ => Body::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_ids() -> impl IdGenerator {
        || "generated".to_owned()
    }

    #[test]
    fn decode_keeps_wire_fields() {
        let message = Message::decode(
            br#"{"id":"r1","path":"echo","body":{"data":"x"}}"#,
            &fixed_ids(),
        )
        .expect("valid frame");
        assert_eq!(message.id(), "r1");
        assert_eq!(message.path(), "echo");
        assert_eq!(message.body()["data"], "x");
        assert!(message.is_local());
        assert!(!message.is_valid());
    }

    #[test]
    fn decode_fills_missing_id_and_body() {
        let message =
            Message::decode(br#"{"id":"","path":"p","body":[1,2]}"#, &fixed_ids()).expect("valid");
        assert_eq!(message.id(), "generated");
        assert!(message.body().is_empty());

        let message = Message::decode(br#"{"id":7,"path":"p"}"#, &fixed_ids()).expect("valid");
        assert_eq!(message.id(), "generated");
    }

    #[test]
    fn decode_rejects_bad_frames() {
        let ids = fixed_ids();
        assert!(matches!(
            Message::decode(b"{not json", &ids),
            Err(DecodeError::Parse(ParseError::Malformed(_)))
        ));
        assert!(matches!(
            Message::decode(b"[1]", &ids),
            Err(DecodeError::Parse(ParseError::NotAnObject))
        ));
        assert!(matches!(
            Message::decode(&[0xff, 0xfe], &ids),
            Err(DecodeError::Parse(ParseError::InvalidUtf8(_)))
        ));
        assert!(matches!(
            Message::decode(br#"{"id":"a","path":""}"#, &ids),
            Err(DecodeError::Validation(ValidationError::MissingPath))
        ));
        assert!(matches!(
            Message::decode(br#"{"id":"a","path":3}"#, &ids),
            Err(DecodeError::Validation(ValidationError::MissingPath))
        ));
    }

    #[test]
    fn wire_form_excludes_bookkeeping() {
        let mut message = Message::from_seed(
            MessageSeed::new("chat:room")
                .with_id("m1")
                .with_body(json!({"text": "hi"})),
            &fixed_ids(),
        )
        .expect("valid seed");
        message.locals_mut().insert("seen".into(), json!(true));

        let encoded: Value = serde_json::from_slice(&message.encode().expect("encode"))
            .expect("encoded message is json");
        assert_eq!(
            encoded,
            json!({"id": "m1", "path": "chat:room", "body": {"text": "hi"}})
        );
        assert_eq!(message.to_wire(), encoded);
        assert_eq!(message.to_string(), "Message[m1:chat:room]");
    }

    #[test]
    fn copy_applies_overrides_and_resets_state() {
        let mut original = Message::from_seed(
            MessageSeed::new("a").with_id("m1").with_body(json!({"k": 1})),
            &fixed_ids(),
        )
        .expect("valid seed");
        original.locals_mut().insert("x".into(), json!(1));

        let copy = original
            .copy(MessageOverrides::new().body(json!({"k": 2})))
            .expect("copy");
        assert_eq!(copy.id(), "m1");
        assert_eq!(copy.path(), "a");
        assert_eq!(copy.body()["k"], 2);
        assert!(copy.locals().is_empty());

        let err = original
            .copy(MessageOverrides::new().path(""))
            .expect_err("empty path");
        assert_eq!(err, ValidationError::MissingPath);
    }

    #[test]
    fn unbound_messages_cannot_be_sent_or_replied() {
        let message = Message::from_seed(MessageSeed::new("a"), &fixed_ids()).expect("valid seed");
        assert!(matches!(
            message.send(Destination::All),
            Err(SendError::Unbound)
        ));
        assert!(matches!(
            message.respond(json!({})),
            Err(RespondError::Unbound)
        ));
        assert!(!message.is_replied());
    }

    #[test]
    fn seeds_deserialize_from_data_records() {
        let seed: MessageSeed =
            serde_json::from_value(json!({"path": "p", "body": {"a": 1}})).expect("seed");
        assert_eq!(seed.id, None);
        assert_eq!(seed.body, Some(json!({"a": 1})));
    }
}
