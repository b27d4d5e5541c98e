//! エラー型の定義

use thiserror::Error;

/// クレート全体のエラー型
///
/// ボディ解析結果をリクエスト内でメモ化するため`Clone`を実装する。
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// マッチするルーターエントリが存在しない
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// リクエストボディの解析エラー
    #[error("Failed to parse request body: {0}")]
    BodyParse(String),

    /// 文字コードの変換エラー（呼び出し側でフォールバック可能）
    #[error("Failed to decode charset: {0}")]
    Decode(String),

    /// 構造化入力の検証エラー
    #[error("invalid input parameters: {0}")]
    Validation(String),

    /// 必須フィールドの欠落
    #[error("required field must not be empty: {0}")]
    MissingField(String),

    /// 日時値の変換エラー
    #[error("Invalid datetime value: {0}")]
    Datetime(String),

    /// レスポンスのシリアライズエラー
    #[error("Failed to serialize response: {0}")]
    ResponseSerialization(String),

    /// レスポンスストリームへの書き込みエラー
    #[error("Failed to write response: {0}")]
    ResponseWrite(String),

    /// ルーター設定の構造エラー（サーバー起動を中断させる）
    #[error("Invalid router configuration: {0}")]
    RouterConfig(String),
}

impl Error {
    /// エラーからHTTPステータスコードを取得
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => 404,
            Error::BodyParse(_) => 400,
            Error::Decode(_) => 400,
            Error::Validation(_) => 400,
            Error::MissingField(_) => 400,
            Error::Datetime(_) => 400,
            Error::ResponseSerialization(_) => 500,
            Error::ResponseWrite(_) => 500,
            Error::RouterConfig(_) => 500,
        }
    }

    /// クライアント起因のエラーかどうか判定
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
