// テスト用のインメモリクライアント

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::ProjectClient;
use crate::client::schemas::{
    Branch, Envelope, FolderListing, Job, MergeRequest, ModifiedBy, ModifiedFiles,
    NotebookServer, ProjectData, Readme, ServerSnapshot, TreeEntry, carve_project,
};
use crate::error::{ApiError, ApiResult};

pub fn file(path: &str) -> TreeEntry {
    entry(path, "blob")
}

pub fn folder(path: &str) -> TreeEntry {
    entry(path, "tree")
}

fn entry(path: &str, item_type: &str) -> TreeEntry {
    TreeEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        item_type: item_type.to_string(),
        lfs: false,
    }
}

pub fn snapshot(servers: &[(&str, bool)]) -> ServerSnapshot {
    servers
        .iter()
        .map(|(name, ready)| {
            (
                name.to_string(),
                NotebookServer {
                    ready: *ready,
                    ..Default::default()
                },
            )
        })
        .collect()
}

// 破棄されたら数える（中断された取得の検出用）
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeClient {
    project: Mutex<Option<Value>>,
    project_fails: AtomicBool,
    folders: Mutex<HashMap<String, Vec<TreeEntry>>>,
    failing_folders: Mutex<HashSet<String>>,
    snapshots: Mutex<VecDeque<ServerSnapshot>>,
    servers_fail: AtomicBool,
    servers_hang: AtomicBool,
    readme: Mutex<Option<String>>,
    readme_fails: AtomicBool,
    branches: Mutex<Vec<Branch>>,
    jobs_fail: AtomicBool,

    tree_calls: Mutex<Vec<String>>,
    server_calls: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
    project_calls: AtomicUsize,
    readme_calls: AtomicUsize,
    mutations: Mutex<Vec<String>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, raw: Value) -> Self {
        *self.project.lock() = Some(raw);
        self
    }

    /// ""はルート
    pub fn with_folder(self, path: &str, entries: Vec<TreeEntry>) -> Self {
        self.folders.lock().insert(path.to_string(), entries);
        self
    }

    pub fn with_failing_folder(self, path: &str) -> Self {
        self.failing_folders.lock().insert(path.to_string());
        self
    }

    /// 順に返し、最後の1つは繰り返す
    pub fn with_snapshots(self, snapshots: Vec<ServerSnapshot>) -> Self {
        *self.snapshots.lock() = snapshots.into();
        self
    }

    pub fn with_readme(self, text: &str) -> Self {
        *self.readme.lock() = Some(text.to_string());
        self
    }

    pub fn with_branches(self, names: &[&str]) -> Self {
        *self.branches.lock() = names
            .iter()
            .map(|name| Branch {
                name: name.to_string(),
                merged: false,
                commit: None,
            })
            .collect();
        self
    }

    pub fn fail_project(&self, fail: bool) {
        self.project_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_servers(&self, fail: bool) {
        self.servers_fail.store(fail, Ordering::SeqCst);
    }

    pub fn hang_servers(&self, hang: bool) {
        self.servers_hang.store(hang, Ordering::SeqCst);
    }

    pub fn fail_readme(&self, fail: bool) {
        self.readme_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_jobs(&self, fail: bool) {
        self.jobs_fail.store(fail, Ordering::SeqCst);
    }

    /// 取得したフォルダ（ルートは"/"）
    pub fn tree_calls(&self) -> Vec<String> {
        self.tree_calls.lock().clone()
    }

    pub fn server_calls(&self) -> usize {
        self.server_calls.load(Ordering::SeqCst)
    }

    pub fn abandoned_fetches(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn project_calls(&self) -> usize {
        self.project_calls.load(Ordering::SeqCst)
    }

    pub fn readme_calls(&self) -> usize {
        self.readme_calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    fn next_snapshot(&self) -> ServerSnapshot {
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() > 1 {
            snapshots.pop_front().unwrap_or_default()
        } else {
            snapshots.front().cloned().unwrap_or_default()
        }
    }
}

impl ProjectClient for FakeClient {
    async fn get_project(&self, id: &str, _statistics: bool) -> ApiResult<Envelope<ProjectData>> {
        self.project_calls.fetch_add(1, Ordering::SeqCst);
        if self.project_fails.load(Ordering::SeqCst) {
            return Err(ApiError::Other(anyhow!("502 Bad Gateway")));
        }
        let raw = self.project.lock().clone();
        match raw {
            Some(raw) => Ok(Envelope::new(carve_project(raw)?)),
            None => Err(ApiError::not_found(format!("projects/{}", id))),
        }
    }

    async fn get_project_files_tree(
        &self,
        _id: &str,
        _path: &str,
        open_folder: Option<&str>,
        lfs_patterns: &[String],
    ) -> ApiResult<FolderListing> {
        let key = open_folder.unwrap_or("");
        self.tree_calls
            .lock()
            .push(open_folder.unwrap_or("/").to_string());

        if self.failing_folders.lock().contains(key) {
            return Err(ApiError::Other(anyhow!("500 Internal Server Error")));
        }
        let entries = self.folders.lock().get(key).cloned();
        match entries {
            Some(entries) => Ok(FolderListing {
                entries,
                lfs_patterns: lfs_patterns.to_vec(),
            }),
            None => Err(ApiError::not_found(key.to_string())),
        }
    }

    async fn get_notebook_servers(&self, _id: &str) -> ApiResult<Envelope<ServerSnapshot>> {
        self.server_calls.fetch_add(1, Ordering::SeqCst);
        if self.servers_hang.load(Ordering::SeqCst) {
            let _counter = DropCounter(Arc::clone(&self.abandoned));
            std::future::pending::<()>().await;
        }
        if self.servers_fail.load(Ordering::SeqCst) {
            return Err(ApiError::Other(anyhow!("503 Service Unavailable")));
        }
        Ok(Envelope::new(self.next_snapshot()))
    }

    async fn stop_notebook_server(&self, name: &str) -> ApiResult<()> {
        self.mutations.lock().push(format!("stop:{}", name));
        Ok(())
    }

    async fn get_project_readme(&self, _id: &str) -> ApiResult<Readme> {
        self.readme_calls.fetch_add(1, Ordering::SeqCst);
        if self.readme_fails.load(Ordering::SeqCst) {
            return Err(ApiError::Other(anyhow!("401 Unauthorized")));
        }
        let text = self.readme.lock().clone();
        text.map(|text| Readme { text })
            .ok_or_else(|| ApiError::not_found("README.md"))
    }

    async fn get_modified_files(&self, _id: &str) -> ApiResult<ModifiedFiles> {
        let mut files = ModifiedFiles::new();
        files.insert(
            "notebooks/Analysis.ipynb".to_string(),
            vec![ModifiedBy {
                mr_iid: 3,
                source_branch: "cleanup".to_string(),
            }],
        );
        Ok(files)
    }

    async fn get_merge_requests(&self, _id: &str) -> ApiResult<Envelope<Vec<MergeRequest>>> {
        Ok(Envelope::new(vec![MergeRequest {
            iid: 3,
            title: Some("Cleanup".to_string()),
            source_branch: "cleanup".to_string(),
            target_branch: Some("master".to_string()),
        }]))
    }

    async fn get_branches(&self, _id: &str) -> ApiResult<Envelope<Vec<Branch>>> {
        Ok(Envelope::new(self.branches.lock().clone()))
    }

    async fn get_jobs(&self, _id: &str) -> ApiResult<Envelope<Vec<Job>>> {
        if self.jobs_fail.load(Ordering::SeqCst) {
            return Err(ApiError::Other(anyhow!("403 Forbidden")));
        }
        Ok(Envelope::new(vec![Job {
            id: 1,
            name: "image_build".to_string(),
            git_ref: Some("master".to_string()),
            status: Some("success".to_string()),
            finished_at: None,
        }]))
    }

    async fn set_tags(&self, _id: &str, _name: &str, tags: &[String]) -> ApiResult<()> {
        self.mutations.lock().push(format!("tags:{}", tags.join(",")));
        Ok(())
    }

    async fn set_description(&self, _id: &str, _name: &str, description: &str) -> ApiResult<()> {
        self.mutations
            .lock()
            .push(format!("description:{}", description));
        Ok(())
    }

    async fn star_project(&self, _id: &str, starred: bool) -> ApiResult<()> {
        let action = if starred { "unstar" } else { "star" };
        self.mutations.lock().push(action.to_string());
        Ok(())
    }
}
