//! リクエストコンテキスト
//!
//! ルートセグメント・クエリ・フォーム・ボディを横断する統一的な
//! パラメータ取得を提供する。クエリ・フォーム値は取得時にURL
//! アンエスケープと文字コード変換を行い、ボディ由来の値は解析時に
//! 正規化済みのためそのまま返す。

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::common::traits::{TransportRequest, Validate};
use crate::common::utils::{self, percent_decode_bytes};
use crate::context::body::{self, BodyMap};
use crate::context::encoding;
use crate::context::path::Rpath;
use crate::error::Error;

/// 1つのインフライトリクエストに束ねられたパラメータ取得面
///
/// リクエストと運命を共にする単一所有のインスタンスで、共有されない。
/// ボディ解析は最初のアクセスで1回だけ行われ、以後はメモ化された
/// 結果を返す。
pub struct RequestCtx {
    transport: Box<dyn TransportRequest>,
    path: Rpath,
    body_cache: OnceLock<Result<BodyMap, Error>>,
}

impl RequestCtx {
    /// トランスポートと解決済みパス情報からコンテキストを構築
    pub fn new(transport: Box<dyn TransportRequest>, path: Rpath) -> Self {
        Self {
            transport,
            path,
            body_cache: OnceLock::new(),
        }
    }

    /// 解決済みのパス情報
    pub fn path(&self) -> &Rpath {
        &self.path
    }

    /// ルートセグメントのパラメータを取得（デコードなしの直接参照）
    pub fn param(&self, key: &str) -> String {
        self.transport.param(key).unwrap_or_default().to_string()
    }

    /// 解析済みのBody Mapを取得する
    ///
    /// 解析はリクエストにつき最大1回。失敗もメモ化され、再解析は
    /// 行われない。
    pub fn body_map(&self) -> Result<&BodyMap, Error> {
        let cached = self.body_cache.get_or_init(|| {
            let payload = self.transport.body().unwrap_or(&[]);
            body::parse(payload, self.transport.content_kind(), self.path.encoding())
        });
        match cached {
            Ok(map) => Ok(map),
            Err(e) => Err(e.clone()),
        }
    }

    /// フィールド値の統合取得
    ///
    /// クエリ・フォームを先に調べ、なければBody Mapへフォールバック
    /// する。クエリ・フォーム値はここでアンエスケープと文字コード
    /// 変換を行い、変換失敗時はアンエスケープ済みテキストへ
    /// フォールバックする。ボディ値は再デコードしない。
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(raw) = self.transport.form_value(name) {
            let bytes = percent_decode_bytes(raw);
            return Some(match encoding::decode(&bytes, self.path.encoding()) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Charset decode failed for field '{}': {}", name, e);
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            });
        }

        let map = self.body_map().ok()?;
        map.get(name).map(value_to_string)
    }

    /// 文字列値を取得。なければデフォルト
    pub fn get_string(&self, name: &str, def: &str) -> String {
        self.get(name).unwrap_or_else(|| def.to_string())
    }

    /// 整数値を取得。なければ、または変換できなければデフォルト
    pub fn get_int(&self, name: &str, def: i32) -> i32 {
        self.get(name)
            .and_then(|v| utils::to_i64(&v))
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(def)
    }

    /// 64bit整数値を取得。なければ、または変換できなければデフォルト
    pub fn get_int64(&self, name: &str, def: i64) -> i64 {
        self.get(name)
            .and_then(|v| utils::to_i64(&v))
            .unwrap_or(def)
    }

    /// 32bit浮動小数点値を取得。なければ、または変換できなければデフォルト
    pub fn get_float32(&self, name: &str, def: f32) -> f32 {
        self.get(name)
            .and_then(|v| utils::to_f64(&v))
            .map(|v| v as f32)
            .unwrap_or(def)
    }

    /// 64bit浮動小数点値を取得。なければ、または変換できなければデフォルト
    pub fn get_float64(&self, name: &str, def: f64) -> f64 {
        self.get(name)
            .and_then(|v| utils::to_f64(&v))
            .unwrap_or(def)
    }

    /// 真偽値を取得。なければ、または変換できなければデフォルト
    pub fn get_bool(&self, name: &str, def: bool) -> bool {
        self.get(name)
            .and_then(|v| utils::to_bool(&v))
            .unwrap_or(def)
    }

    /// 日時値を取得。書式未指定時は`%Y/%m/%d %H:%M:%S`
    pub fn get_datetime(
        &self,
        name: &str,
        format: Option<&str>,
    ) -> Result<NaiveDateTime, Error> {
        let v = self.get(name).unwrap_or_default();
        utils::to_datetime(&v, format)
            .ok_or_else(|| Error::Datetime(format!("field '{}' value {:?}", name, v)))
    }

    /// 上限つき整数取得。値が上限を超えた場合は上限に丸める
    pub fn get_max(&self, name: &str, bound: i64) -> i64 {
        self.get_int64(name, bound).min(bound)
    }

    /// 下限つき整数取得。値が下限を下回る場合は下限に丸める
    pub fn get_min(&self, name: &str, bound: i64) -> i64 {
        self.get_int64(name, bound).max(bound)
    }

    /// フィールドがいずれかのソースに存在するかどうか
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 必須フィールドの存在チェック
    ///
    /// クエリ・フォーム・Body Mapのいずれにも空でない値がない最初の
    /// フィールドで即座にエラーを返す。欠落の集約は行わない。
    pub fn check(&self, fields: &[&str]) -> Result<(), Error> {
        let body = self.body_map().ok();
        for &key in fields {
            if self
                .transport
                .form_value(key)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
            {
                continue;
            }
            let present_in_body = body
                .and_then(|m| m.get(key))
                .map(|v| !value_to_string(v).is_empty())
                .unwrap_or(false);
            if !present_in_body {
                return Err(Error::MissingField(key.to_string()));
            }
        }
        Ok(())
    }

    /// フォームフィールド名とBody Mapキーの和集合
    pub fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.transport.form().keys().cloned().collect();
        if let Ok(map) = self.body_map() {
            keys.extend(map.keys().cloned());
        }
        keys.into_iter().collect()
    }

    /// 全ソースを統合したデータマップ
    ///
    /// フォームは先頭値を採用し、キー衝突時はボディ値が優先される。
    pub fn all_data(&self) -> Result<HashMap<String, Value>, Error> {
        let mut data: HashMap<String, Value> = self
            .transport
            .form()
            .iter()
            .filter_map(|(k, vs)| {
                vs.first()
                    .map(|v| (k.clone(), Value::String(v.clone())))
            })
            .collect();
        for (k, v) in self.body_map()? {
            data.insert(k.clone(), v.clone());
        }
        Ok(data)
    }

    /// 供給された全データの診断用スナップショット
    ///
    /// シリアライズ失敗時は空文字列を返す（診断専用のため非致命）。
    pub fn trace(&self) -> String {
        match self.all_data() {
            Ok(data) => serde_json::to_string(&data).unwrap_or_default(),
            Err(e) => e.to_string(),
        }
    }

    /// 統合データを対象型へ構造束縛し、フィールド検証を行う
    ///
    /// 束縛の失敗はそのまま返し、検証は行わない。検証の失敗は
    /// 原因を`Error::Validation`で包んで返す。
    pub fn bind<T: DeserializeOwned + Validate>(&self) -> Result<T, Error> {
        // 束縛にはデコード済みのフォーム値を使い、キー衝突はボディ優先
        let body = self.body_map()?;
        let mut data = serde_json::Map::new();
        let mut form_keys: Vec<String> = Vec::new();
        for key in self.transport.form().keys() {
            if body.contains_key(key) {
                continue;
            }
            if let Some(decoded) = self.get(key) {
                data.insert(key.clone(), Value::String(decoded));
                form_keys.push(key.clone());
            }
        }
        for (k, v) in body {
            data.insert(k.clone(), v.clone());
        }

        // フォーム値は文字列で届くため、文字列のままでは数値・真偽の
        // フィールドへ束縛できない。まず文字列のまま試し、失敗時は
        // フォーム由来の値だけスカラーへ寄せて再束縛する
        let target: T = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(t) => t,
            Err(first) => {
                for key in &form_keys {
                    if let Some(Value::String(s)) = data.get(key) {
                        if let Some(scalar) = coerce_scalar(s) {
                            data.insert(key.clone(), scalar);
                        }
                    }
                }
                serde_json::from_value(Value::Object(data))
                    .map_err(|_| Error::BodyParse(format!("failed to bind input: {}", first)))?
            }
        };

        target.validate().map_err(Error::Validation)?;
        Ok(target)
    }
}

/// フォーム文字列をJSONスカラーへ寄せる。該当しなければNone
fn coerce_scalar(s: &str) -> Option<Value> {
    if let Some(i) = utils::to_i64(s) {
        return Some(Value::from(i));
    }
    if let Some(f) = utils::to_f64(s) {
        return Some(Value::from(f));
    }
    utils::to_bool(s).map(Value::Bool)
}

/// Body Mapの値を表示用文字列へ変換する
fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;
    use crate::common::http::{MemoryRequest, Method};
    use crate::context::body::BodyKind;
    use crate::router::Routers;

    fn ctx_for(req: MemoryRequest) -> RequestCtx {
        let table = Routers::default();
        let rpath = Rpath::new(&req.matched_pattern, req.method, &table).unwrap();
        RequestCtx::new(Box::new(req), rpath)
    }

    fn ctx_with_encoding(req: MemoryRequest, charset: &str) -> RequestCtx {
        let mut table = Routers::default();
        table.routers[0].encoding = Some(charset.to_string());
        let rpath = Rpath::new(&req.matched_pattern, req.method, &table).unwrap();
        RequestCtx::new(Box::new(req), rpath)
    }

    #[test]
    fn test_param_passthrough() {
        let req = MemoryRequest::new(Method::GET, "/items/42").with_param("id", "42");
        let ctx = ctx_for(req);
        assert_eq!(ctx.param("id"), "42");
        assert_eq!(ctx.param("missing"), "");
    }

    #[test]
    fn test_get_decodes_query_values() {
        let req =
            MemoryRequest::new(Method::GET, "/hello").with_query_string("name=J%C3%B6rg");
        let ctx = ctx_for(req);
        assert_eq!(ctx.get("name"), Some("Jörg".to_string()));
    }

    #[test]
    fn test_get_decodes_with_declared_charset() {
        // GBKの「你好」
        let req = MemoryRequest::new(Method::GET, "/hello")
            .with_query_string("greeting=%C4%E3%BA%C3");
        let ctx = ctx_with_encoding(req, "gbk");
        assert_eq!(ctx.get("greeting"), Some("你好".to_string()));
    }

    #[test]
    fn test_get_falls_back_on_decode_failure() {
        // UTF-8として不正なバイト列はアンエスケープ済みテキストへフォールバック
        let req = MemoryRequest::new(Method::GET, "/hello")
            .with_query_string("v=%C4%E3");
        let ctx = ctx_for(req);
        let got = ctx.get("v").unwrap();
        assert!(!got.is_empty());
    }

    #[test]
    fn test_get_checks_form_before_body() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_query_string("name=from_query")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"name": "from_body"}"#.to_vec());
        let ctx = ctx_for(req);
        assert_eq!(ctx.get("name"), Some("from_query".to_string()));
    }

    #[test]
    fn test_get_body_value_not_redecoded() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"memo": "a+b%20c"}"#.to_vec());
        let ctx = ctx_for(req);
        // ボディ値は解析時点で正規化済みのため、そのまま返る
        assert_eq!(ctx.get("memo"), Some("a+b%20c".to_string()));
    }

    #[test]
    fn test_typed_getters_never_fail() {
        let req = MemoryRequest::new(Method::GET, "/q")
            .with_query_string("num=15&bad=abc&flag=on&pi=3.5");
        let ctx = ctx_for(req);

        assert_eq!(ctx.get_int("num", 0), 15);
        assert_eq!(ctx.get_int("missing", 7), 7);
        assert_eq!(ctx.get_int("bad", 7), 7);
        assert_eq!(ctx.get_int64("num", 0), 15);
        assert_eq!(ctx.get_float32("pi", 0.0), 3.5);
        assert_eq!(ctx.get_float64("pi", 0.0), 3.5);
        assert!(ctx.get_bool("flag", false));
        // 値もデフォルトもない場合はゼロ値
        assert!(!ctx.get_bool("x", false));
        assert_eq!(ctx.get_string("missing", ""), "");
        assert_eq!(ctx.get_string("missing", "dflt"), "dflt");
    }

    #[test]
    fn test_get_int_from_json_body() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"age": 5}"#.to_vec());
        let ctx = ctx_for(req);
        assert_eq!(ctx.get_int("age", 0), 5);
    }

    #[test]
    fn test_get_max_and_min() {
        let req = MemoryRequest::new(Method::GET, "/q").with_query_string("big=15&small=5");
        let ctx = ctx_for(req);

        assert_eq!(ctx.get_max("big", 10), 10);
        assert_eq!(ctx.get_max("small", 10), 5);
        assert_eq!(ctx.get_min("small", 10), 10);
        assert_eq!(ctx.get_min("big", 10), 15);
        // 欠落時は境界値がそのままデフォルトになる
        assert_eq!(ctx.get_max("missing", 10), 10);
        assert_eq!(ctx.get_min("missing", 10), 10);
    }

    #[test]
    fn test_get_datetime() {
        let req = MemoryRequest::new(Method::GET, "/q")
            .with_query_string("at=2026%2F08%2F29+12%3A00%3A00");
        let ctx = ctx_for(req);
        let dt = ctx.get_datetime("at", None).unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "12:00");

        assert!(ctx.get_datetime("missing", None).is_err());
    }

    #[test]
    fn test_check_fails_fast_on_first_missing() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_query_string("name=a")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"age": 1}"#.to_vec());
        let ctx = ctx_for(req);

        assert!(ctx.check(&["name", "age"]).is_ok());

        let err = ctx.check(&["name", "email", "phone"]).unwrap_err();
        assert!(matches!(err, Error::MissingField(ref f) if f == "email"));
    }

    #[test]
    fn test_check_rejects_empty_value() {
        let req = MemoryRequest::new(Method::GET, "/q").with_form_value("name", "");
        let ctx = ctx_for(req);
        let err = ctx.check(&["name"]).unwrap_err();
        assert!(matches!(err, Error::MissingField(ref f) if f == "name"));
    }

    #[test]
    fn test_keys_union() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_query_string("q=1&shared=query")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"b": 2, "shared": "body"}"#.to_vec());
        let ctx = ctx_for(req);

        let keys = ctx.keys();
        assert_eq!(keys, vec!["b", "q", "shared"]);
    }

    #[test]
    fn test_all_data_body_precedence_and_first_value() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_form_value("tag", "first")
            .with_form_value("tag", "second")
            .with_query_string("shared=query")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"shared": "body"}"#.to_vec());
        let ctx = ctx_for(req);

        let data = ctx.all_data().unwrap();
        // 複数値フォームは先頭値
        assert_eq!(data.get("tag"), Some(&Value::from("first")));
        // キー衝突はボディ優先
        assert_eq!(data.get("shared"), Some(&Value::from("body")));
    }

    #[test]
    fn test_trace() {
        let req = MemoryRequest::new(Method::POST, "/submit")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"age": 5}"#.to_vec());
        let ctx = ctx_for(req);
        assert_eq!(ctx.trace(), r#"{"age":5}"#);

        let broken = MemoryRequest::new(Method::POST, "/submit")
            .with_header("Content-Type", "application/json")
            .with_body(b"{broken".to_vec());
        let ctx = ctx_for(broken);
        // ボディ解析の失敗はエラーメッセージとして描画する
        assert!(ctx.trace().contains("Failed to parse request body"));
    }

    /// ボディ読み出し回数を数えるトランスポートラッパー
    struct CountingTransport {
        inner: MemoryRequest,
        body_hits: Arc<AtomicUsize>,
    }

    impl crate::common::traits::TransportRequest for CountingTransport {
        fn method(&self) -> Method {
            self.inner.method
        }
        fn path(&self) -> &str {
            &self.inner.path
        }
        fn matched_pattern(&self) -> &str {
            &self.inner.matched_pattern
        }
        fn param(&self, key: &str) -> Option<&str> {
            self.inner.params.get(key).map(|s| s.as_str())
        }
        fn form_value(&self, name: &str) -> Option<&str> {
            self.inner
                .form
                .get(name)
                .and_then(|vs| vs.first())
                .map(|s| s.as_str())
        }
        fn form(&self) -> &std::collections::HashMap<String, Vec<String>> {
            &self.inner.form
        }
        fn header(&self, name: &str) -> Option<&str> {
            self.inner.headers.get(name).map(|s| s.as_str())
        }
        fn body(&self) -> Option<&[u8]> {
            self.body_hits.fetch_add(1, Ordering::SeqCst);
            self.inner.body.as_deref()
        }
        fn content_kind(&self) -> BodyKind {
            BodyKind::Json
        }
    }

    #[test]
    fn test_body_parse_memoized() {
        let hits = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            inner: MemoryRequest::new(Method::POST, "/submit")
                .with_body(br#"{"age": 5}"#.to_vec()),
            body_hits: hits.clone(),
        };
        let table = Routers::default();
        let rpath = Rpath::new("/submit", Method::POST, &table).unwrap();
        let ctx = RequestCtx::new(Box::new(transport), rpath);

        let first = ctx.body_map().unwrap().clone();
        let second = ctx.body_map().unwrap().clone();
        assert_eq!(first, second);
        // ペイロードの読み出しは1回だけ
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, Deserialize)]
    struct Signup {
        email: String,
        age: i64,
    }

    impl Validate for Signup {
        fn validate(&self) -> Result<(), String> {
            if self.email.is_empty() {
                return Err("email must not be empty".to_string());
            }
            if self.age < 0 {
                return Err("age must not be negative".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_bind_with_validation() {
        let req = MemoryRequest::new(Method::POST, "/signup")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"email": "a@example.com", "age": 20}"#.to_vec());
        let ctx = ctx_for(req);
        let signup: Signup = ctx.bind().unwrap();
        assert_eq!(signup.email, "a@example.com");
        assert_eq!(signup.age, 20);
    }

    #[test]
    fn test_bind_validation_failure_is_wrapped() {
        let req = MemoryRequest::new(Method::POST, "/signup")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"email": "", "age": 20}"#.to_vec());
        let ctx = ctx_for(req);
        let err = ctx.bind::<Signup>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("invalid input parameters"));
    }

    #[test]
    fn test_bind_failure_skips_validation() {
        // 型が合わないペイロードは束縛エラーをそのまま返す
        let req = MemoryRequest::new(Method::POST, "/signup")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"email": "a@example.com", "age": "not a number"}"#.to_vec());
        let ctx = ctx_for(req);
        let err = ctx.bind::<Signup>().unwrap_err();
        assert!(matches!(err, Error::BodyParse(_)));
    }

    #[test]
    fn test_bind_coerces_form_scalars() {
        // クエリ由来の値は文字列だが、数値フィールドへも束縛できる
        let req = MemoryRequest::new(Method::POST, "/signup")
            .with_query_string("email=a%40example.com&age=20");
        let ctx = ctx_for(req);
        let signup: Signup = ctx.bind().unwrap();
        assert_eq!(signup.email, "a@example.com");
        assert_eq!(signup.age, 20);
    }

    #[derive(Debug, Deserialize)]
    struct Toggle {
        rate: f64,
        active: bool,
    }

    impl Validate for Toggle {
        fn validate(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn test_bind_coerces_float_and_bool() {
        let req =
            MemoryRequest::new(Method::GET, "/q").with_query_string("rate=2.5&active=true");
        let ctx = ctx_for(req);
        let toggle: Toggle = ctx.bind().unwrap();
        assert_eq!(toggle.rate, 2.5);
        assert!(toggle.active);
    }

    #[test]
    fn test_bind_body_overrides_form_value() {
        let req = MemoryRequest::new(Method::POST, "/signup")
            .with_query_string("age=5")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"email": "a@example.com", "age": 20}"#.to_vec());
        let ctx = ctx_for(req);
        let signup: Signup = ctx.bind().unwrap();
        assert_eq!(signup.age, 20);
    }

    #[test]
    fn test_has() {
        let req = MemoryRequest::new(Method::GET, "/q").with_query_string("name=a");
        let ctx = ctx_for(req);
        assert!(ctx.has("name"));
        assert!(!ctx.has("missing"));
    }
}
