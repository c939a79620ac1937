// ゲートウェイAPIのエラー分類
//
// 分類は「見つからない」と「それ以外」の2つだけ。
// NotFoundは呼び出し側でデフォルト状態に置き換えて回復し、
// Otherは常に呼び出し元へ返す。

use thiserror::Error;

/// ゲートウェイ呼び出しのエラー
#[derive(Debug, Error)]
pub enum ApiError {
    /// リソースが存在しない（削除・リネームされたプロジェクトなど）
    #[error("リソースが見つかりません: {resource}")]
    NotFound {
        /// 見つからなかったリソース
        resource: String,
    },

    /// 通信・認証・サーバーエラーなど
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }

    /// NotFoundかどうか
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Other(e.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Other(e.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
