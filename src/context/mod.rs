//! リクエスト／レスポンスコンテキスト（分割モジュール）

pub mod body;
pub mod dispatch;
pub mod encoding;
pub mod path;
pub mod request;
pub mod response;

pub use body::{BodyKind, BodyMap};
pub use dispatch::dispatch;
pub use path::Rpath;
pub use request::RequestCtx;
pub use response::{Reply, ResponseCtx};

use std::fmt;

use crate::common::traits::{TransportRequest, TransportResponse};
use crate::error::Error;
use crate::router::Routers;

/// 1つのインフライトリクエストに対するコンテキストの束
///
/// トランスポートが引き渡した不透明なリクエスト／レスポンス能力を
/// 包み、ハンドラーへ統一的なパラメータ／応答契約を見せる。
/// インスタンスはリクエストと同じ寿命を持ち、共有されない。
pub struct Context {
    request: RequestCtx,
    response: ResponseCtx,
}

impl Context {
    /// トランスポートとルーターテーブルからコンテキストを構築
    ///
    /// パス解決はここで一度だけ行われる。マッチする有効なエントリが
    /// ない場合は`Error::RouteNotFound`となる。
    pub fn new(
        req: Box<dyn TransportRequest>,
        res: Box<dyn TransportResponse>,
        routers: &Routers,
    ) -> Result<Self, Error> {
        let rpath = Rpath::new(req.matched_pattern(), req.method(), routers)?;
        Ok(Self {
            request: RequestCtx::new(req, rpath),
            response: ResponseCtx::new(res),
        })
    }

    /// リクエスト側コンテキスト
    pub fn request(&self) -> &RequestCtx {
        &self.request
    }

    /// レスポンス側コンテキスト（読み取り）
    pub fn response(&self) -> &ResponseCtx {
        &self.response
    }

    /// レスポンス側コンテキスト（書き込み）
    pub fn response_mut(&mut self) -> &mut ResponseCtx {
        &mut self.response
    }
}

// トランスポートは不透明なため、解決済みパスと書き込み状態のみ出す
impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("pattern", &self.request.path().pattern())
            .field("written", &self.response.written())
            .finish()
    }
}
