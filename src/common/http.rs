//! HTTP関連の基本型とインメモリトランスポート

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::common::traits::{TransportRequest, TransportResponse};
use crate::common::utils::parse_raw_query;
use crate::context::body::BodyKind;
use crate::error::Error;

/// HTTPステータスコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    // 2xx Success
    Ok = 200,
    Created = 201,
    NoContent = 204,

    // 3xx Redirection
    Found = 302,

    // 4xx Client Error
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,

    // 5xx Server Error
    InternalServerError = 500,
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// u16の値を取得
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// 成功ステータスかどうか判定
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// クライアントエラーかどうか判定
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    /// サーバーエラーかどうか判定
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> u16 {
        status.as_u16()
    }
}

/// HTTPメソッド
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
    TRACE,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
            Method::PUT => write!(f, "PUT"),
            Method::DELETE => write!(f, "DELETE"),
            Method::PATCH => write!(f, "PATCH"),
            Method::HEAD => write!(f, "HEAD"),
            Method::OPTIONS => write!(f, "OPTIONS"),
            Method::TRACE => write!(f, "TRACE"),
        }
    }
}

impl Method {
    /// 文字列からMethodに変換
    pub fn from_str(method: &str) -> Option<Self> {
        match method.to_uppercase().as_str() {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "PATCH" => Some(Method::PATCH),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }
}

/// インメモリのリクエストトランスポート
///
/// テストおよび、既にデコード済みのリクエストを持つ組込み先が
/// `TransportRequest`として渡すための実装。クエリ・フォーム値は
/// エスケープされたまま保持する。
#[derive(Debug, Clone)]
pub struct MemoryRequest {
    /// HTTPメソッド
    pub method: Method,
    /// リクエストパス
    pub path: String,
    /// マッチしたルートパターン
    pub matched_pattern: String,
    /// ルートセグメントのパラメータ
    pub params: HashMap<String, String>,
    /// クエリ・フォーム値（生のまま、複数値対応）
    pub form: HashMap<String, Vec<String>>,
    /// HTTPヘッダー（キーは小文字）
    pub headers: HashMap<String, String>,
    /// リクエストボディ
    pub body: Option<Vec<u8>>,
}

impl MemoryRequest {
    /// 新しいリクエストを作成
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            matched_pattern: path.clone(),
            path,
            params: HashMap::new(),
            form: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// マッチしたルートパターンを設定
    pub fn with_matched_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = pattern.into();
        self
    }

    /// ルートセグメントのパラメータを追加
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// クエリ文字列を解析してフォーム値に取り込む（値はエスケープされたまま）
    pub fn with_query_string(mut self, query: &str) -> Self {
        for (k, vs) in parse_raw_query(query) {
            self.form.entry(k).or_default().extend(vs);
        }
        self
    }

    /// フォーム値を1件追加（生のまま）
    pub fn with_form_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.entry(key.into()).or_default().push(value.into());
        self
    }

    /// ヘッダーを追加（キーは小文字化して保持）
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// ボディを追加
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

impl TransportRequest for MemoryRequest {
    fn method(&self) -> Method {
        self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn matched_pattern(&self) -> &str {
        &self.matched_pattern
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .and_then(|vs| vs.first())
            .map(|s| s.as_str())
    }

    fn form(&self) -> &HashMap<String, Vec<String>> {
        &self.form
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    fn content_kind(&self) -> BodyKind {
        BodyKind::from_content_type(self.header("content-type").unwrap_or(""))
    }
}

/// インメモリのレスポンストランスポート
#[derive(Debug, Clone, Default)]
pub struct MemoryResponse {
    /// HTTPステータスコード
    pub status: u16,
    /// HTTPヘッダー
    pub headers: HashMap<String, String>,
    /// レスポンスボディ
    pub body: Vec<u8>,
    /// 送信を指示されたファイルパス
    pub file: Option<String>,
    /// リダイレクト指示（ステータス、宛先）
    pub redirect: Option<(u16, String)>,
    /// 中断済みステータス
    pub aborted: Option<u16>,
}

impl MemoryResponse {
    /// 新しいレスポンスを作成
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok.as_u16(),
            ..Self::default()
        }
    }

    /// ボディをUTF-8文字列として取得
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl TransportResponse for MemoryResponse {
    fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    fn header(&self, key: &str) -> Option<String> {
        self.headers.get(key).cloned()
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn write_body(&mut self, content: &[u8]) -> Result<(), Error> {
        self.body.extend_from_slice(content);
        Ok(())
    }

    fn send_file(&mut self, path: &str) -> Result<(), Error> {
        self.file = Some(path.to_string());
        Ok(())
    }

    fn redirect(&mut self, status: u16, target: &str) {
        self.status = status;
        self.redirect = Some((status, target.to_string()));
    }

    fn abort(&mut self, status: u16) {
        self.status = status;
        self.aborted = Some(status);
    }
}

/// 共有可能なインメモリレスポンス
///
/// ディスパッチにムーブした後でも呼び出し側が結果を検分できるよう、
/// `MemoryResponse`をロック越しに共有するハンドル。
#[derive(Debug, Clone, Default)]
pub struct SharedResponse(Arc<Mutex<MemoryResponse>>);

impl SharedResponse {
    /// 新しい共有レスポンスを作成
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(MemoryResponse::new())))
    }

    /// 現時点の内容の複製を取得
    pub fn snapshot(&self) -> MemoryResponse {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryResponse> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TransportResponse for SharedResponse {
    fn set_header(&mut self, key: &str, value: &str) {
        self.lock().set_header(key, value);
    }

    fn header(&self, key: &str) -> Option<String> {
        self.lock().header(key)
    }

    fn status(&self) -> u16 {
        self.lock().status()
    }

    fn set_status(&mut self, status: u16) {
        self.lock().set_status(status);
    }

    fn write_body(&mut self, content: &[u8]) -> Result<(), Error> {
        self.lock().write_body(content)
    }

    fn send_file(&mut self, path: &str) -> Result<(), Error> {
        self.lock().send_file(path)
    }

    fn redirect(&mut self, status: u16, target: &str) {
        self.lock().redirect(status, target);
    }

    fn abort(&mut self, status: u16) {
        self.lock().abort(status);
    }
}
