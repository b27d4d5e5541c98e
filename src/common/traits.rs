//! コアトレイト定義（トランスポート能力、検証、Service）

use std::collections::HashMap;

use async_trait::async_trait;

use crate::common::http::Method;
use crate::context::body::BodyKind;
use crate::context::response::Reply;
use crate::context::Context;
use crate::error::Error;

/// トランスポートがリクエスト側に提供する能力
///
/// 本クレートはこの能力を適合させるだけで、トランスポート自体は
/// 実装しない。クエリ・フォーム値はエスケープされたまま渡すこと。
/// デコードは取得時にルーターの文字コード設定と合わせて行う。
pub trait TransportRequest: Send {
    /// HTTPメソッド
    fn method(&self) -> Method;

    /// リクエストパス
    fn path(&self) -> &str;

    /// マッチしたルートパターン
    fn matched_pattern(&self) -> &str;

    /// ルートセグメントのパラメータ（デコードなし）
    fn param(&self, key: &str) -> Option<&str>;

    /// クエリ・フォーム値の先頭値（生のまま）
    fn form_value(&self, name: &str) -> Option<&str>;

    /// クエリ・フォームの全フィールド（複数値、生のまま）
    fn form(&self) -> &HashMap<String, Vec<String>>;

    /// ヘッダー値を取得
    fn header(&self, name: &str) -> Option<&str>;

    /// 生のリクエストボディ
    fn body(&self) -> Option<&[u8]>;

    /// ボディのコンテント種別
    fn content_kind(&self) -> BodyKind;
}

/// トランスポートがレスポンス側に提供する能力
pub trait TransportResponse: Send {
    /// ヘッダーを設定
    fn set_header(&mut self, key: &str, value: &str);

    /// 設定済みヘッダーを取得
    fn header(&self, key: &str) -> Option<String>;

    /// 現在のステータスコード
    fn status(&self) -> u16;

    /// ステータスコードを設定
    fn set_status(&mut self, status: u16);

    /// ボディを書き込む
    fn write_body(&mut self, content: &[u8]) -> Result<(), Error>;

    /// ファイルの内容を応答として送る
    fn send_file(&mut self, path: &str) -> Result<(), Error>;

    /// リダイレクトを指示
    fn redirect(&mut self, status: u16, target: &str);

    /// 処理を中断してステータスのみ返す
    fn abort(&mut self, status: u16);
}

/// フィールド検証能力
///
/// `bind`は束縛後、対象型が宣言するこのトレイトで検証を行う。
/// 実行時の型検査は行わない。制約を持たないスカラー型には
/// 無条件にOkを返す実装を用意してある。
pub trait Validate {
    /// フィールド制約を検証し、違反内容をメッセージで返す
    fn validate(&self) -> Result<(), String>;
}

macro_rules! impl_validate_ok {
    ($($t:ty),* $(,)?) => {
        $(
            impl Validate for $t {
                fn validate(&self) -> Result<(), String> {
                    Ok(())
                }
            }
        )*
    };
}

// スカラーには検証すべきフィールドがない
impl_validate_ok!(
    i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool, String, serde_json::Value
);

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<(), String> {
        match self {
            Some(v) => v.validate(),
            None => Ok(()),
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), String> {
        for v in self {
            v.validate()?;
        }
        Ok(())
    }
}

/// ビジネスハンドラーの特性
///
/// コンテキスト経由でパラメータを読み、結果を`Reply`として返す。
/// ハンドラー内で直接`write`した場合、返したReplyは書き込まれない
/// （ディスパッチ側が書き込み済みフラグを確認する）。
#[async_trait]
pub trait Service: Send + Sync {
    /// リクエストを処理
    async fn handle(&self, ctx: &mut Context) -> Result<Reply, Error>;
}
