//! 共通ユーティリティ関数群（URLデコード、クエリ解析、スカラー変換 等）

use std::collections::HashMap;

use chrono::NaiveDateTime;

/// URLエンコーディングをバイト列へデコードする
///
/// 文字コード変換の前段として使うため、UTF-8を仮定せず生のバイト列を返す。
/// `+`はスペースに変換する。
pub fn percent_decode_bytes(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (from_hex(bytes[i + 1]), from_hex(bytes[i + 2])) {
                result.push(h * 16 + l);
                i += 3;
                continue;
            }
        } else if bytes[i] == b'+' {
            result.push(b' ');
            i += 1;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }
    result
}

/// URLエンコーディングのデコード関数（UTF-8前提の文字列版）
pub fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&percent_decode_bytes(input)).into_owned()
}

/// 16進数文字をバイト値に変換するヘルパー関数
fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// クエリ文字列を複数値対応のペアに分解する
///
/// 値はエスケープされたまま保持する。デコードは取得時に文字コードと
/// 合わせて行うため、ここでは行わない。
pub fn parse_raw_query(query_string: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    if query_string.is_empty() {
        return params;
    }

    for pair in query_string.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        if let Some(key) = parts.next() {
            let value = parts.next().unwrap_or("");
            params
                .entry(percent_decode(key))
                .or_default()
                .push(value.to_string());
        }
    }

    params
}

/// 文字列を整数へ変換する。失敗時はNone
pub fn to_i64(v: &str) -> Option<i64> {
    v.trim().parse::<i64>().ok()
}

/// 文字列を浮動小数点へ変換する。失敗時はNone
pub fn to_f64(v: &str) -> Option<f64> {
    v.trim().parse::<f64>().ok()
}

/// 文字列を真偽値へ変換する。失敗時はNone
///
/// 許容表現: true/false, t/f, yes/no, y/n, on/off, 1/0（大文字小文字不問）
pub fn to_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 日時のデフォルト書式
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// 文字列を日時へ変換する
pub fn to_datetime(v: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(v.trim(), format.unwrap_or(DEFAULT_DATETIME_FORMAT)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("Hello%20World"), "Hello World");
        assert_eq!(percent_decode("test%2Bvalue"), "test+value");
        assert_eq!(percent_decode("normal"), "normal");
        assert_eq!(percent_decode("plus+space"), "plus space"); // +もスペースに変換
        assert_eq!(
            percent_decode("%E3%81%82%E3%81%84%E3%81%86%E3%81%88%E3%81%8A"),
            "あいうえお"
        );
    }

    #[test]
    fn test_percent_decode_bytes_keeps_raw_bytes() {
        // GBKの「你好」。UTF-8として不正なバイト列もそのまま返す
        assert_eq!(
            percent_decode_bytes("%C4%E3%BA%C3"),
            vec![0xC4, 0xE3, 0xBA, 0xC3]
        );
    }

    #[test]
    fn test_parse_raw_query_keeps_escapes() {
        let params = parse_raw_query("name=J%C3%B6rg&city=Tokyo");
        // 値はエスケープされたまま
        assert_eq!(params.get("name"), Some(&vec!["J%C3%B6rg".to_string()]));
        assert_eq!(params.get("city"), Some(&vec!["Tokyo".to_string()]));
    }

    #[test]
    fn test_parse_raw_query_multi_value() {
        let params = parse_raw_query("tag=a&tag=b&empty=");
        assert_eq!(
            params.get("tag"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(params.get("empty"), Some(&vec![String::new()]));
        assert!(parse_raw_query("").is_empty());
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(to_i64("42"), Some(42));
        assert_eq!(to_i64(" 42 "), Some(42));
        assert_eq!(to_i64("abc"), None);
        assert_eq!(to_f64("3.5"), Some(3.5));
        assert_eq!(to_bool("true"), Some(true));
        assert_eq!(to_bool("ON"), Some(true));
        assert_eq!(to_bool("0"), Some(false));
        assert_eq!(to_bool("maybe"), None);
    }

    #[test]
    fn test_to_datetime() {
        let dt = to_datetime("2026/08/29 12:34:56", None).unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2026-08-29");
        assert!(to_datetime("not a date", None).is_none());
        assert!(to_datetime("2026-08-29T12:34:56", Some("%Y-%m-%dT%H:%M:%S")).is_some());
    }
}
