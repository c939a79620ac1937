// ゲートウェイクライアントモジュール
//
// コーディネーターはProjectClientトレイト越しにしかゲートウェイを知らない。

pub mod gateway;
pub mod lfs;
pub mod schemas;

use std::future::Future;

use crate::error::ApiResult;
use schemas::{
    Branch, Envelope, FolderListing, Job, MergeRequest, ModifiedFiles, ProjectData, Readme,
    ServerSnapshot,
};

pub use gateway::GatewayClient;

/// プロジェクト関連のゲートウェイ操作
///
/// 成功時は正規化済みの値、失敗時は`ApiError::NotFound`か`ApiError::Other`を返す。
pub trait ProjectClient: Send + Sync + 'static {
    /// プロジェクト取得（`statistics`で統計情報も含める）
    fn get_project(
        &self,
        id: &str,
        statistics: bool,
    ) -> impl Future<Output = ApiResult<Envelope<ProjectData>>> + Send;

    /// フォルダ1階層分の一覧。`open_folder`がNoneならルート。
    fn get_project_files_tree(
        &self,
        id: &str,
        path: &str,
        open_folder: Option<&str>,
        lfs_patterns: &[String],
    ) -> impl Future<Output = ApiResult<FolderListing>> + Send;

    fn get_notebook_servers(
        &self,
        id: &str,
    ) -> impl Future<Output = ApiResult<Envelope<ServerSnapshot>>> + Send;

    fn stop_notebook_server(&self, name: &str) -> impl Future<Output = ApiResult<()>> + Send;

    fn get_project_readme(&self, id: &str) -> impl Future<Output = ApiResult<Readme>> + Send;

    fn get_modified_files(&self, id: &str)
    -> impl Future<Output = ApiResult<ModifiedFiles>> + Send;

    fn get_merge_requests(
        &self,
        id: &str,
    ) -> impl Future<Output = ApiResult<Envelope<Vec<MergeRequest>>>> + Send;

    fn get_branches(&self, id: &str)
    -> impl Future<Output = ApiResult<Envelope<Vec<Branch>>>> + Send;

    fn get_jobs(&self, id: &str) -> impl Future<Output = ApiResult<Envelope<Vec<Job>>>> + Send;

    fn set_tags(
        &self,
        id: &str,
        name: &str,
        tags: &[String],
    ) -> impl Future<Output = ApiResult<()>> + Send;

    fn set_description(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> impl Future<Output = ApiResult<()>> + Send;

    /// `starred`は現在の状態。trueならスター解除。
    fn star_project(&self, id: &str, starred: bool) -> impl Future<Output = ApiResult<()>> + Send;
}
