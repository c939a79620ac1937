// フォルダ単位の段階的なツリー取得
//
// 深いパスへのリンクは、残りのセグメントを1つずつ辿るループで開く。

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::FilesTree;
use crate::client::ProjectClient;
use crate::client::schemas::FolderListing;
use crate::error::{ApiError, ApiResult};
use crate::request::{RequestGuard, RequestTracker, Resource};

// 1回分の取得結果
enum Step {
    /// 取得済み（またはキャッシュ）のツリー。続きがあれば辿る。
    Tree(Arc<FilesTree>),
    /// これ以上辿れない
    Stop(Arc<FilesTree>),
    /// 他の取得が進行中
    Busy(Option<Arc<FilesTree>>),
}

pub struct TreeFetcher<C> {
    client: Arc<C>,
    project_id: String,
    cache: Mutex<Option<Arc<FilesTree>>>,
    requests: Arc<Mutex<RequestTracker>>,
}

impl<C: ProjectClient> TreeFetcher<C> {
    pub fn new(
        client: Arc<C>,
        project_id: impl Into<String>,
        requests: Arc<Mutex<RequestTracker>>,
    ) -> Self {
        TreeFetcher {
            client,
            project_id: project_id.into(),
            cache: Mutex::new(None),
            requests,
        }
    }

    /// キャッシュ済みのツリー
    pub fn cached(&self) -> Option<Arc<FilesTree>> {
        self.cache.lock().clone()
    }

    /// `target_path`が見えるところまでフォルダを1階層ずつ取得する
    ///
    /// 取得中に呼ばれた場合は何もせず、最後に分かっているツリー
    /// （まだ無ければNone）を返す。
    pub async fn fetch_tree(
        &self,
        target_path: &str,
        open_folder: Option<&str>,
    ) -> ApiResult<Option<Arc<FilesTree>>> {
        let mut remaining = clean_path(target_path).to_string();
        let mut folder = open_folder.map(str::to_string);

        loop {
            let tree = match self.fetch_step(&remaining, folder.as_deref()).await? {
                Step::Tree(tree) => tree,
                Step::Stop(tree) => return Ok(Some(tree)),
                Step::Busy(last) => return Ok(last),
            };

            // 残りが1セグメントなら完了
            let Some((head, rest)) = remaining.split_once('/') else {
                return Ok(Some(tree));
            };

            let next = match folder {
                Some(current) => format!("{}/{}", current, head),
                None => head.to_string(),
            };
            debug!("次のフォルダへ: {} (残り: {})", next, rest);
            folder = Some(next);
            remaining = rest.to_string();
        }
    }

    /// フォルダの展開状態を切り替える。未取得なら取得して開く。
    pub async fn toggle_folder(&self, folder: &str) -> ApiResult<Option<Arc<FilesTree>>> {
        let Some(tree) = self.cached() else {
            return Ok(None);
        };

        match tree.node(folder) {
            None => return Ok(Some(tree)),
            Some(node) if !node.children_loaded => {
                return self.fetch_tree("", Some(folder)).await;
            }
            Some(_) => {}
        }
        // キャッシュ以外の参照を残すとmake_mutが全体を複製する
        drop(tree);

        let mut cache = self.cache.lock();
        if let Some(current) = cache.as_mut() {
            if let Some(node) = Arc::make_mut(current).hash.get_mut(folder) {
                node.children_open = !node.children_open;
            }
        }
        Ok(cache.clone())
    }

    async fn fetch_step(&self, target: &str, folder: Option<&str>) -> ApiResult<Step> {
        if self.requests.lock().is_in_flight(Resource::FilesTree) {
            return Ok(Step::Busy(self.cached()));
        }

        let Some(tree) = self.cached() else {
            return self.fetch_root(target).await;
        };

        let Some(folder) = folder else {
            return Ok(Step::Tree(tree));
        };

        match tree.node(folder) {
            None => {
                warn!("⚠️ ツリーに存在しないフォルダ: {}", folder);
                return Ok(Step::Stop(tree));
            }
            Some(node) if !node.is_folder() => {
                warn!("⚠️ フォルダではありません: {}", folder);
                return Ok(Step::Stop(tree));
            }
            // 取得済みならネットワークに出ない
            Some(node) if node.children_loaded => return Ok(Step::Tree(tree)),
            Some(_) => {}
        }

        let Some(guard) = RequestGuard::begin(&self.requests, Resource::FilesTree) else {
            return Ok(Step::Busy(Some(tree)));
        };

        let listing = empty_if_not_found(
            self.client
                .get_project_files_tree(&self.project_id, target, Some(folder), &tree.lfs_patterns)
                .await,
        )?;
        info!("📂 フォルダ取得: {} ({}件)", folder, listing.entries.len());

        let merged = {
            let mut cache = self.cache.lock();
            let mut current = cache.take().unwrap_or(tree);
            Arc::make_mut(&mut current).insert_children(folder, listing);
            *cache = Some(Arc::clone(&current));
            current
        };
        guard.finish();
        Ok(Step::Tree(merged))
    }

    async fn fetch_root(&self, target: &str) -> ApiResult<Step> {
        let Some(guard) = RequestGuard::begin(&self.requests, Resource::FilesTree) else {
            return Ok(Step::Busy(self.cached()));
        };

        let listing = empty_if_not_found(
            self.client
                .get_project_files_tree(&self.project_id, target, None, &[])
                .await,
        )?;
        info!("🌲 ルートツリー取得: {}件", listing.entries.len());

        let tree = Arc::new(FilesTree::from_listing(listing));
        *self.cache.lock() = Some(Arc::clone(&tree));
        guard.finish();
        Ok(Step::Tree(tree))
    }
}

// 見つからないフォルダは空フォルダとして扱う
fn empty_if_not_found(result: ApiResult<FolderListing>) -> ApiResult<FolderListing> {
    match result {
        Err(ApiError::NotFound { resource }) => {
            debug!("空フォルダとして扱う: {}", resource);
            Ok(FolderListing::default())
        }
        other => other,
    }
}

fn clean_path(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
