//! 文字コードアダプター
//!
//! ルーターに宣言された文字コード（gbk、gb2312等のレガシーエンコーディング）
//! からUTF-8の内部表現へデコードする。宣言が誤っている可能性のある
//! ユーザー入力を扱うため、呼び出し側は失敗時に未変換テキストへ
//! フォールバックしてよい。

use encoding_rs::Encoding;

use crate::error::Error;

/// 宣言がない場合の既定文字コード
pub const DEFAULT_CHARSET: &str = "utf-8";

/// バイト列を指定の文字コードからUTF-8文字列へデコードする
///
/// 未対応のラベルおよび不正なバイト列は`Error::Decode`となる。
pub fn decode(raw: &[u8], label: &str) -> Result<String, Error> {
    let enc = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Error::Decode(format!("unsupported charset label: {}", label)))?;

    let (text, _, had_errors) = enc.decode(raw);
    if had_errors {
        return Err(Error::Decode(format!(
            "malformed byte sequence for charset: {}",
            label
        )));
    }
    Ok(text.into_owned())
}

/// 指定ラベルがUTF-8系かどうか（変換不要の判定に使う）
pub fn is_default_charset(label: &str) -> bool {
    matches!(
        Encoding::for_label(label.as_bytes()),
        Some(enc) if enc == encoding_rs::UTF_8
    )
}
