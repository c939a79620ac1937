// プロジェクト1件分の状態を持つコーディネーター
//
// 状態ツリーへの書き込みはすべてここを通る。
// 同じリソースの取得が重なったら後から来た方は何もしない。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::watch;

use crate::client::ProjectClient;
use crate::client::schemas::{
    Branch, Job, MergeRequest, ModifiedFiles, ProjectData, ServerSnapshot,
};
use crate::error::ApiResult;
use crate::poller::{NotebookPoller, PollingIntervals};
use crate::request::{RequestGuard, RequestTracker, Resource};
use crate::state::{StatePath, StateStore, paths};
use crate::tree::{FilesTree, TreeFetcher};

pub const README_NOT_FOUND: &str = "No readme file found.";

pub struct ProjectCoordinator<C> {
    client: Arc<C>,
    project_id: String,
    store: Arc<Mutex<StateStore>>,
    requests: Arc<Mutex<RequestTracker>>,
    tree: TreeFetcher<C>,
    poller: NotebookPoller<C>,
}

impl<C: ProjectClient> ProjectCoordinator<C> {
    pub fn new(client: Arc<C>, project_id: impl Into<String>, intervals: PollingIntervals) -> Self {
        let project_id = project_id.into();
        let store = Arc::new(Mutex::new(StateStore::new()));
        let requests = Arc::new(Mutex::new(RequestTracker::new()));

        let tree = TreeFetcher::new(Arc::clone(&client), project_id.clone(), Arc::clone(&requests));
        let poller = NotebookPoller::new(
            Arc::clone(&client),
            project_id.clone(),
            intervals,
            Arc::clone(&store),
            Arc::clone(&requests),
        );

        ProjectCoordinator {
            client,
            project_id,
            store,
            requests,
            tree,
            poller,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    // ---- 状態ツリー ----

    pub fn get(&self, path: StatePath) -> Option<Value> {
        self.store.lock().get(path).cloned()
    }

    /// # Panics
    ///
    /// パスが状態ツリーに存在しない場合
    pub fn set(&self, path: StatePath, value: Value) {
        self.store.lock().set(path, value);
    }

    pub fn set_object(&self, partial: Value) {
        self.store.lock().set_object(partial);
    }

    pub fn snapshot(&self) -> Value {
        self.store.lock().snapshot().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.lock().subscribe()
    }

    // ---- プロジェクト ----

    /// プロジェクトを取得して core/system/visibility/statistics を書き込む
    ///
    /// 見つからない場合は `core.available = false` にしてNoneを返す。
    pub async fn fetch_project(&self) -> ApiResult<Option<ProjectData>> {
        // 取得中は不明
        self.set(paths::CORE_AVAILABLE, Value::Null);

        let project = match self.client.get_project(&self.project_id, true).await {
            Ok(response) => response.data,
            Err(e) if e.is_not_found() => {
                warn!("⚠️ プロジェクトが見つかりません: {}", self.project_id);
                self.set(paths::CORE_AVAILABLE, json!(false));
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let metadata = &project.metadata;
        let mut core = serde_json::to_value(&metadata.core)?;
        if let Some(core) = core.as_object_mut() {
            core.insert("available".to_string(), json!(true));
        }

        let mut partial = Map::new();
        partial.insert("core".to_string(), core);
        partial.insert("system".to_string(), serde_json::to_value(&metadata.system)?);
        partial.insert(
            "visibility".to_string(),
            serde_json::to_value(&metadata.visibility)?,
        );
        if let Some(statistics) = &metadata.statistics {
            partial.insert("statistics".to_string(), serde_json::to_value(statistics)?);
        }
        self.set_object(Value::Object(partial));

        info!(
            "📦 プロジェクト取得: {}",
            metadata.core.display_id.as_deref().unwrap_or(&self.project_id)
        );
        Ok(Some(project))
    }

    pub async fn set_tags(&self, name: &str, tags: &[String]) -> ApiResult<Option<ProjectData>> {
        self.client.set_tags(&self.project_id, name, tags).await?;
        info!("🏷️ タグ更新: {}", tags.join(", "));
        self.fetch_project().await
    }

    pub async fn set_description(
        &self,
        name: &str,
        description: &str,
    ) -> ApiResult<Option<ProjectData>> {
        self.client
            .set_description(&self.project_id, name, description)
            .await?;
        info!("📝 説明を更新");
        self.fetch_project().await
    }

    /// `starred`は現在の状態（trueならスターを外す）
    pub async fn star(&self, starred: bool) -> ApiResult<Option<ProjectData>> {
        self.client.star_project(&self.project_id, starred).await?;
        info!("⭐ スター切り替え: {} → {}", starred, !starred);
        self.fetch_project().await
    }

    // ---- ファイルツリー ----

    pub async fn fetch_files_tree(
        &self,
        target_path: &str,
        open_folder: Option<&str>,
    ) -> ApiResult<Option<Arc<FilesTree>>> {
        self.tree.fetch_tree(target_path, open_folder).await
    }

    pub async fn toggle_folder(&self, folder: &str) -> ApiResult<Option<Arc<FilesTree>>> {
        self.tree.toggle_folder(folder).await
    }

    pub fn files_tree(&self) -> Option<Arc<FilesTree>> {
        self.tree.cached()
    }

    // ---- ノートブックサーバー ----

    pub fn polling_intervals(&self) -> PollingIntervals {
        self.poller.intervals()
    }

    pub fn start_notebook_polling(&self, interval: Duration) {
        self.poller.start(interval);
    }

    pub fn stop_notebook_polling(&self) {
        self.poller.stop();
    }

    pub fn polling_interval(&self) -> Option<Duration> {
        self.poller.interval()
    }

    pub async fn fetch_notebook_servers(&self) -> ApiResult<Option<ServerSnapshot>> {
        self.poller.fetch_once().await
    }

    /// 応答を待たずに停止中として表示してから停止を要求する
    pub async fn stop_notebook_server(&self, name: &str) -> ApiResult<()> {
        self.set_object(json!({
            "notebooks": { "all": { name: { "ready": false, "pending": "stop" } } },
        }));
        info!("🛑 サーバー停止要求: {}", name);
        self.client.stop_notebook_server(name).await
    }

    // ---- その他のリソース ----

    pub async fn fetch_readme(&self) -> ApiResult<Option<String>> {
        let Some(guard) = RequestGuard::begin(&self.requests, Resource::Readme) else {
            return Ok(None);
        };

        let text = match self.client.get_project_readme(&self.project_id).await {
            Ok(readme) => readme.text,
            Err(e) if e.is_not_found() => README_NOT_FOUND.to_string(),
            Err(e) => return Err(e),
        };
        self.set(paths::README_TEXT, json!(text));
        guard.finish();
        Ok(Some(text))
    }

    pub async fn fetch_branches(&self) -> ApiResult<Option<Vec<Branch>>> {
        self.guarded(Resource::Branches, paths::SYSTEM_BRANCHES, async {
            self.client.get_branches(&self.project_id).await.map(|r| r.data)
        })
        .await
    }

    pub async fn fetch_merge_requests(&self) -> ApiResult<Option<Vec<MergeRequest>>> {
        self.guarded(Resource::MergeRequests, paths::SYSTEM_MERGE_REQUESTS, async {
            self.client.get_merge_requests(&self.project_id).await.map(|r| r.data)
        })
        .await
    }

    pub async fn fetch_modified_files(&self) -> ApiResult<Option<ModifiedFiles>> {
        self.guarded(
            Resource::ModifiedFiles,
            paths::FILES_MODIFIED,
            self.client.get_modified_files(&self.project_id),
        )
        .await
    }

    /// CIジョブは取得できなくても空として扱う
    pub async fn fetch_ci_jobs(&self) -> Option<Vec<Job>> {
        let result = self
            .guarded(Resource::CiJobs, paths::SYSTEM_CI_JOBS, async {
                self.client.get_jobs(&self.project_id).await.map(|r| r.data)
            })
            .await;

        match result {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("⚠️ CIジョブ取得失敗: {}", e);
                self.set(paths::SYSTEM_CI_JOBS, json!([]));
                Some(Vec::new())
            }
        }
    }

    // 取得中フラグを立ててから取得し、結果をpathへ書き込む
    async fn guarded<T, F>(&self, resource: Resource, path: StatePath, fetch: F) -> ApiResult<Option<T>>
    where
        T: Serialize,
        F: Future<Output = ApiResult<T>>,
    {
        let Some(guard) = RequestGuard::begin(&self.requests, resource) else {
            return Ok(None);
        };

        let value = fetch.await?;
        self.set(path, serde_json::to_value(&value)?);
        guard.finish();
        Ok(Some(value))
    }
}
