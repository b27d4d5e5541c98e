//! ReqBridge: トランスポート非依存のリクエスト／レスポンスコンテキスト層
//!
//! 具体的なHTTP系トランスポートとビジネスハンドラーの間に置き、
//! パラメータの読み取り（ルートセグメント・クエリ・フォーム・
//! 構造化ボディの統合、文字コード変換、型付き取得、検証）と
//! 応答の書き込み（単一書き込み規律、特殊マーカー）を統一する
//! ためのライブラリ。トランスポート自体・レジストリクライアント・
//! ルーティングロジックは実装しない。

pub mod common;
pub mod context;
pub mod error;
pub mod router;

pub use common::{
    MemoryRequest, MemoryResponse, Method, Service, SharedResponse, StatusCode,
    TransportRequest, TransportResponse, Validate,
};
pub use context::{dispatch, BodyKind, BodyMap, Context, Reply, RequestCtx, ResponseCtx, Rpath};
pub use error::Error;
pub use router::{Router, RouterTable, Routers};
