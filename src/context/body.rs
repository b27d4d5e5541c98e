//! リクエストボディの解析
//!
//! 生のペイロードとコンテント種別からフィールド名→値のフラットな
//! マップ（Body Map）を構築する。解析はリクエストごとに最大1回で、
//! 結果は`RequestCtx`側でメモ化される。

use std::collections::HashMap;

use log::warn;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use crate::common::utils::{parse_raw_query, percent_decode_bytes};
use crate::context::encoding;
use crate::error::Error;

/// 解析済みボディのマップ型
pub type BodyMap = HashMap<String, Value>;

/// ボディのコンテント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// application/x-www-form-urlencoded
    UrlEncoded,
    /// application/json および *+json
    Json,
    /// application/xml、text/xml および *+xml
    Xml,
    /// 上記以外（解析対象外）
    Unknown,
}

impl BodyKind {
    /// Content-Typeヘッダーから種別を判定
    pub fn from_content_type(ct: &str) -> Self {
        let main_type = ct
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if main_type == "application/x-www-form-urlencoded" {
            BodyKind::UrlEncoded
        } else if main_type == "application/json" || main_type.ends_with("+json") {
            BodyKind::Json
        } else if main_type == "application/xml"
            || main_type == "text/xml"
            || main_type.ends_with("+xml")
        {
            BodyKind::Xml
        } else {
            BodyKind::Unknown
        }
    }
}

/// ペイロードを解析してBody Mapを構築する
///
/// 空のペイロードはエラーではなく空のマップ。不正なペイロードは
/// `Error::BodyParse`となる。値はここで文字コードまで正規化され、
/// 取得時に再デコードされることはない。
pub fn parse(payload: &[u8], kind: BodyKind, charset: &str) -> Result<BodyMap, Error> {
    if payload.is_empty() {
        return Ok(BodyMap::new());
    }

    match kind {
        BodyKind::UrlEncoded => parse_urlencoded(payload, charset),
        BodyKind::Json => {
            let text = decode_or_lossy(payload, charset);
            parse_json(&text)
        }
        BodyKind::Xml => {
            let text = decode_or_lossy(payload, charset);
            parse_xml(&text)
        }
        BodyKind::Unknown => Ok(BodyMap::new()),
    }
}

/// 文字コードをデコードし、失敗時は損失ありUTF-8へフォールバック
fn decode_or_lossy(raw: &[u8], charset: &str) -> String {
    match encoding::decode(raw, charset) {
        Ok(text) => text,
        Err(e) => {
            warn!("Body charset decode failed, falling back to lossy UTF-8: {}", e);
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

fn parse_urlencoded(payload: &[u8], charset: &str) -> Result<BodyMap, Error> {
    // エスケープ列はASCIIなので、ペアの分解自体は損失なく行える
    let text = String::from_utf8_lossy(payload);
    let mut map = BodyMap::new();
    for (key, values) in parse_raw_query(&text) {
        // 複数値は先頭値を採用
        if let Some(raw) = values.into_iter().next() {
            let bytes = percent_decode_bytes(&raw);
            let value = match encoding::decode(&bytes, charset) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Form value decode failed for '{}': {}", key, e);
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            };
            map.insert(key, Value::String(value));
        }
    }
    Ok(map)
}

fn parse_json(text: &str) -> Result<BodyMap, Error> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::BodyParse(format!("malformed json body: {}", e)))?;
    match value {
        Value::Object(obj) => Ok(obj.into_iter().collect()),
        other => Err(Error::BodyParse(format!(
            "json body must be an object, got: {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// ルート要素直下の子要素テキストをフラットなマップへ展開する
fn parse_xml(text: &str) -> Result<BodyMap, Error> {
    let mut reader = Reader::from_str(text);

    let mut map = BodyMap::new();
    let mut depth = 0usize;
    let mut field: Option<String> = None;
    let mut content = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == 2 {
                    field = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    content.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 1 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    map.insert(name, Value::String(String::new()));
                }
            }
            Ok(Event::Text(t)) => {
                if depth == 2 {
                    let piece = t
                        .unescape()
                        .map_err(|e| Error::BodyParse(format!("malformed xml body: {}", e)))?;
                    content.push_str(&piece);
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some(name) = field.take() {
                        let text = std::mem::take(&mut content);
                        map.insert(name, Value::String(text.trim().to_string()));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::BodyParse(format!("malformed xml body: {}", e))),
        }
    }
    Ok(map)
}
