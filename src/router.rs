//! ルーターテーブル
//!
//! レジストリから供給されるルーティング設定の読み込みと構造検証。
//! テーブルは不変スナップショットとして扱い、更新はポインタの
//! 差し替えで行う。リクエスト処理中にエントリが書き換わることはない。

use std::sync::{Arc, RwLock};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::http::Method;
use crate::error::Error;

/// 許可される動詞の全集合
pub const VALID_ACTIONS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "TRACE", "OPTIONS"];

/// 既定のキャッチオールエントリが持つ動詞
const DEFAULT_ACTIONS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];

/// ルーターエントリ
///
/// 1つのパスパターンと、許可動詞・転送先サービス・レスポンス文字コード。
/// 読み込み後は不変。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Router {
    /// パスパターン
    pub path: String,
    /// 許可する動詞。空の場合は全動詞を許可
    #[serde(default)]
    pub action: Vec<String>,
    /// 転送先サービス識別子
    pub service: String,
    /// 無効化フラグ
    #[serde(default)]
    pub disable: bool,
    /// レスポンスの文字コード。未指定はUTF-8
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Router {
    /// 新しいエントリを作成
    pub fn new(path: impl Into<String>, service: impl Into<String>, action: &[&str]) -> Self {
        Self {
            path: path.into(),
            action: action.iter().map(|s| s.to_string()).collect(),
            service: service.into(),
            disable: false,
            encoding: None,
        }
    }

    /// 指定メソッドを受け付けるかどうか
    pub fn allows(&self, method: Method) -> bool {
        self.action.is_empty() || self.action.iter().any(|a| a == &method.to_string())
    }

    /// 指定パターンにマッチするかどうか（完全一致またはワイルドカード）
    pub fn matches(&self, pattern: &str) -> bool {
        if self.path == pattern {
            return true;
        }
        // "/*name" 形式のキャッチオール
        self.path.starts_with("/*")
    }

    fn validate(&self) -> Result<(), Error> {
        if self.path.is_empty() || !self.path.is_ascii() || !self.path.starts_with('/') {
            return Err(Error::RouterConfig(format!(
                "path must be a non-empty ascii pattern starting with '/': {:?}",
                self.path
            )));
        }
        if self.service.is_empty() || !self.service.is_ascii() {
            return Err(Error::RouterConfig(format!(
                "service must be a non-empty ascii identifier: {:?}",
                self.service
            )));
        }
        for action in &self.action {
            if !VALID_ACTIONS.contains(&action.as_str()) {
                return Err(Error::RouterConfig(format!(
                    "action '{}' for path '{}' is not one of {:?}",
                    action, self.path, VALID_ACTIONS
                )));
            }
        }
        Ok(())
    }
}

/// ルーターエントリの集合
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Routers {
    /// ルーティングエントリ
    #[serde(default)]
    pub routers: Vec<Router>,
}

impl Default for Routers {
    fn default() -> Self {
        // 設定がない場合のフォールバック: 任意パス・任意動詞を
        // 同名サービスへ転送する単一エントリ
        Self {
            routers: vec![Router::new("/*name", "/@name", DEFAULT_ACTIONS)],
        }
    }
}

impl Routers {
    /// 空のテーブルを作成
    pub fn new() -> Self {
        Self {
            routers: Vec::new(),
        }
    }

    /// エントリを追加
    pub fn append(
        mut self,
        path: impl Into<String>,
        service: impl Into<String>,
        action: &[&str],
    ) -> Self {
        self.routers.push(Router::new(path, service, action));
        self
    }

    /// レジストリ供給の設定値からテーブルを構築する
    ///
    /// 設定が存在しない、またはエントリが空の場合は既定のキャッチオールへ
    /// フォールバックする。構造検証に失敗したエントリはサーバー起動を
    /// 中断させるエラーになる。
    pub fn from_conf(conf: Option<&Value>) -> Result<Self, Error> {
        let table = match conf {
            None | Some(Value::Null) => Self::default(),
            Some(value) => {
                let table: Routers = serde_json::from_value(value.clone())
                    .map_err(|e| Error::RouterConfig(format!("malformed router conf: {}", e)))?;
                if table.routers.is_empty() {
                    Self::default()
                } else {
                    table
                }
            }
        };
        table.validated()
    }

    /// 全エントリを構造検証して自身を返す
    pub fn validated(self) -> Result<Self, Error> {
        for router in &self.routers {
            router.validate()?;
        }
        debug!("Router table loaded with {} entries", self.routers.len());
        Ok(self)
    }

    /// パターンとメソッドにマッチする有効なエントリを検索
    pub fn find(&self, pattern: &str, method: Method) -> Option<&Router> {
        self.routers
            .iter()
            .find(|r| !r.disable && r.matches(pattern) && r.allows(method))
    }
}

/// ルーターテーブルのスナップショットホルダー
///
/// 読み手はロックを保持せず`Arc`のクローンを受け取る。レジストリの
/// 更新はテーブル全体の差し替えであり、エントリのインプレース変更は
/// 行わない。
#[derive(Debug)]
pub struct RouterTable {
    current: RwLock<Arc<Routers>>,
}

impl RouterTable {
    /// 初期テーブルからホルダーを作成
    pub fn new(routers: Routers) -> Self {
        Self {
            current: RwLock::new(Arc::new(routers)),
        }
    }

    /// 現在のスナップショットを取得
    pub fn load(&self) -> Arc<Routers> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// テーブル全体を新しいスナップショットへ差し替える
    pub fn store(&self, routers: Routers) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(routers);
    }
}

impl Default for RouterTable {
    fn default() -> Self {
        Self::new(Routers::default())
    }
}
