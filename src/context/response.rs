//! レスポンスコンテキスト
//!
//! 送出ストリームへの単一書き込み規律を担う。二重書き込みは
//! ハンドラー側のプログラミング誤りとして当該リクエストの処理を
//! 即時中断させる（ディスパッチ境界で捕捉され、素の5xxへ変換される）。

use log::error;
use serde_json::Value;

use crate::common::http::StatusCode;
use crate::common::traits::TransportResponse;
use crate::error::Error;

/// 書き込み時にContent-Typeが未設定の場合に補われる既定値
pub const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// ハンドラーが返しうる結果の閉じた直和型
///
/// 異種の結果形を動的な型検査なしで書き分けるための表現。
#[derive(Debug)]
pub enum Reply {
    /// ステータスと内容を持つ成功結果
    Result {
        /// HTTPステータスコード
        status: u16,
        /// 応答内容
        content: String,
    },
    /// ステータスとメッセージを持つエラー結果
    Fault {
        /// HTTPステータスコード
        status: u16,
        /// エラーメッセージ
        message: String,
    },
    /// 素のエラー（慣例として400で描画される）
    Error(Error),
    /// 任意の値（既定の成功経路でJSONとして描画される）
    Value(Value),
}

/// 1つのインフライトリクエストに束ねられた応答面
///
/// `written`フラグは単調で、一度trueになったら戻らない。
pub struct ResponseCtx {
    transport: Box<dyn TransportResponse>,
    written: bool,
    specials: Vec<String>,
}

impl ResponseCtx {
    /// トランスポートから応答コンテキストを構築
    pub fn new(transport: Box<dyn TransportResponse>) -> Self {
        Self {
            transport,
            written: false,
            specials: Vec::new(),
        }
    }

    /// ステータスと内容をストリームへ書き込む
    ///
    /// Content-Typeが未設定の場合のみ既定値を補う。書き込み済みの
    /// 応答への再書き込みは誤用であり、パニックで当該リクエストの
    /// 処理を中断させる。
    pub fn write(&mut self, status: u16, content: impl AsRef<str>) -> Result<(), Error> {
        if self.written {
            panic!(
                "response stream already written, refusing second write: status {}",
                status
            );
        }
        if self.transport.header("Content-Type").is_none() {
            self.transport.set_header("Content-Type", DEFAULT_CONTENT_TYPE);
        }
        self.transport.set_status(status);
        self.transport.write_body(content.as_ref().as_bytes())?;
        self.written = true;
        Ok(())
    }

    /// ファイルの内容を応答として送る。`write`と同じ単一書き込み規律に従う
    pub fn file(&mut self, path: &str) -> Result<(), Error> {
        if self.written {
            panic!(
                "response stream already written, refusing to send file: {}",
                path
            );
        }
        self.transport.send_file(path)?;
        self.written = true;
        Ok(())
    }

    /// 結果の形に応じてステータスと内容を書き分ける
    ///
    /// `Reply::Error`はクライアント起因の失敗を表す腕で、慣例として
    /// 一律400で描画する。エラー自身のステータスで描画したい場合は
    /// `handle`から`Err`を返せば、ディスパッチ側が`status_code()`に
    /// 従って描画する。空の値（null・空配列・空オブジェクト・
    /// 空文字列）は204で内容なしとして描画する。
    pub fn write_any(&mut self, reply: Reply) -> Result<(), Error> {
        match reply {
            Reply::Result { status, content } => self.write(status, content),
            Reply::Fault { status, message } => self.write(status, message),
            Reply::Error(err) => self.write(StatusCode::BadRequest.as_u16(), err.to_string()),
            Reply::Value(value) => {
                if is_empty_value(&value) {
                    self.write(StatusCode::NoContent.as_u16(), "")
                } else {
                    let content = serde_json::to_string(&value)
                        .map_err(|e| Error::ResponseSerialization(e.to_string()))?;
                    self.write(StatusCode::Ok.as_u16(), content)
                }
            }
        }
    }

    /// ヘッダーを設定
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.transport.set_header(key, value);
    }

    /// 現在のステータスコードを取得
    pub fn get_status_code(&self) -> u16 {
        self.transport.status()
    }

    /// ステータスコードを設定
    pub fn set_status_code(&mut self, status: u16) {
        self.transport.set_status(status);
    }

    /// 応答が書き込み済みかどうか
    pub fn written(&self) -> bool {
        self.written
    }

    /// ステータスコードを指定して処理を中断
    pub fn abort(&mut self, status: u16) {
        self.transport.abort(status);
    }

    /// エラーを記録して処理を中断
    pub fn abort_with_error(&mut self, status: u16, err: &Error) {
        error!("Aborting request with status {}: {}", status, err);
        self.transport.abort(status);
    }

    /// リダイレクトを指示
    pub fn redirect(&mut self, status: u16, target: &str) {
        self.transport.redirect(status, target);
    }

    /// 応答の特殊マーカーを追加
    pub fn add_special(&mut self, marker: impl Into<String>) {
        self.specials.push(marker.into());
    }

    /// 蓄積された特殊マーカーをスペース区切りで取得
    pub fn specials(&self) -> String {
        self.specials.join(" ")
    }
}

/// 内容なしとして扱う値かどうか
fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
