//! パスリゾルバー
//!
//! マッチしたルートパターンから、対応するルーターエントリと
//! 有効なレスポンス文字コードを構築時に一度だけ解決する。
//! 以降リクエストの生存期間を通じて読み取り専用。

use crate::common::http::Method;
use crate::context::encoding::DEFAULT_CHARSET;
use crate::error::Error;
use crate::router::{Router, Routers};

/// 解決済みのリクエストパス情報
#[derive(Debug, Clone)]
pub struct Rpath {
    pattern: String,
    method: Method,
    router: Router,
    encoding: String,
}

impl Rpath {
    /// ルーターテーブルからパス情報を解決する
    pub fn new(pattern: &str, method: Method, routers: &Routers) -> Result<Self, Error> {
        let router = routers
            .find(pattern, method)
            .cloned()
            .ok_or_else(|| Error::RouteNotFound(format!("{} {}", method, pattern)))?;

        let encoding = router
            .encoding
            .clone()
            .unwrap_or_else(|| DEFAULT_CHARSET.to_string());

        Ok(Self {
            pattern: pattern.to_string(),
            method,
            router,
            encoding,
        })
    }

    /// マッチしたルートパターン
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// リクエストのHTTPメソッド
    pub fn method(&self) -> Method {
        self.method
    }

    /// マッチしたルーターエントリ
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// 有効なレスポンス文字コード
    pub fn encoding(&self) -> &str {
        &self.encoding
    }
}
