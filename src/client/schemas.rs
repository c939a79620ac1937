// ゲートウェイ(GitLab)応答のスキーマ定義

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 正規化されたレスポンス封筒
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Envelope { data }
    }
}

// ---- プロジェクト ----

/// GitLabのプロジェクトAPI応答（必要な項目のみ）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GitlabProject {
    pub id: Value,
    pub name: Option<String>,
    pub description: Option<String>,
    pub path_with_namespace: Option<String>,
    pub web_url: Option<String>,
    pub created_at: Option<String>,
    pub last_activity_at: Option<String>,
    pub owner: Option<Value>,
    pub visibility: Option<String>,
    pub permissions: Option<Permissions>,
    #[serde(default)]
    pub tag_list: Vec<String>,
    pub star_count: Option<u64>,
    pub forks_count: Option<u64>,
    pub ssh_url_to_repo: Option<String>,
    pub http_url_to_repo: Option<String>,
    pub forked_from_project: Option<Box<GitlabProject>>,
    pub statistics: Option<ProjectStatistics>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Permissions {
    pub project_access: Option<AccessLevel>,
    pub group_access: Option<AccessLevel>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccessLevel {
    pub access_level: u32,
}

/// 画面表示用に整形したプロジェクト
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectData {
    pub metadata: ProjectMetadata,
    /// 元のJSON
    pub all: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectMetadata {
    pub core: ProjectCore,
    pub visibility: ProjectVisibility,
    pub system: ProjectSystem,
    pub statistics: Option<ProjectStatistics>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectCore {
    pub id: Value,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "displayId")]
    pub display_id: Option<String>,
    pub path_with_namespace: Option<String>,
    pub external_url: Option<String>,
    pub created_at: Option<String>,
    pub last_activity_at: Option<String>,
    pub owner: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectVisibility {
    pub level: Option<String>,
    #[serde(rename = "accessLevel")]
    pub access_level: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectSystem {
    pub tag_list: Vec<String>,
    pub star_count: Option<u64>,
    pub forks_count: Option<u64>,
    pub ssh_url: Option<String>,
    pub http_url: Option<String>,
    pub forked_from_project: Option<Box<ProjectData>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatistics {
    pub commit_count: Option<u64>,
    pub storage_size: Option<u64>,
    pub repository_size: Option<u64>,
    pub lfs_objects_size: Option<u64>,
    pub job_artifacts_size: Option<u64>,
}

/// GitLabのプロジェクトJSONをcore/visibility/system/statisticsに切り分ける
pub fn carve_project(raw: Value) -> serde_json::Result<ProjectData> {
    let project: GitlabProject = serde_json::from_value(raw.clone())?;
    Ok(carve(project, raw))
}

fn carve(project: GitlabProject, all: Value) -> ProjectData {
    // プロジェクト権限とグループ権限の大きい方
    let access_level = project
        .permissions
        .as_ref()
        .map(|p| {
            let project_level = p.project_access.as_ref().map_or(0, |a| a.access_level);
            let group_level = p.group_access.as_ref().map_or(0, |a| a.access_level);
            project_level.max(group_level)
        })
        .unwrap_or(0);

    let forked_from_project = project.forked_from_project.map(|parent| {
        let parent_json = all.get("forked_from_project").cloned().unwrap_or(Value::Null);
        Box::new(carve(*parent, parent_json))
    });

    ProjectData {
        metadata: ProjectMetadata {
            core: ProjectCore {
                id: project.id,
                title: project.name,
                description: project.description,
                display_id: project.path_with_namespace.clone(),
                path_with_namespace: project.path_with_namespace,
                external_url: project.web_url,
                created_at: project.created_at,
                last_activity_at: project.last_activity_at,
                owner: project.owner,
            },
            visibility: ProjectVisibility {
                level: project.visibility,
                access_level,
            },
            system: ProjectSystem {
                tag_list: project.tag_list,
                star_count: project.star_count,
                forks_count: project.forks_count,
                ssh_url: project.ssh_url_to_repo,
                http_url: project.http_url_to_repo,
                forked_from_project,
            },
            statistics: project.statistics,
        },
        all,
    }
}

// ---- ファイルツリー ----

/// リポジトリツリーAPIのアイテム
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    /// "tree"（フォルダ）か"blob"（ファイル）
    #[serde(rename = "type")]
    pub item_type: String,
    /// Git LFSで管理されているか（クライアント側で判定）
    #[serde(default)]
    pub lfs: bool,
}

impl TreeEntry {
    pub fn is_folder(&self) -> bool {
        self.item_type == "tree"
    }
}

/// 1フォルダ分のツリー取得結果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListing {
    pub entries: Vec<TreeEntry>,
    /// .gitattributesから読み取ったLFSパターン
    pub lfs_patterns: Vec<String>,
}

/// ファイルの分類
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedFiles {
    pub data: Vec<String>,
    pub notebooks: Vec<String>,
    pub workflows: Vec<String>,
    pub all: Vec<String>,
}

impl GroupedFiles {
    pub fn from_paths(paths: Vec<String>) -> Self {
        let pick = |f: fn(&str) -> bool| {
            paths
                .iter()
                .filter(|p| f(p.as_str()))
                .cloned()
                .collect::<Vec<_>>()
        };
        GroupedFiles {
            data: pick(|p| p.starts_with("data")),
            notebooks: pick(|p| p.ends_with("ipynb")),
            workflows: pick(|p| p.starts_with(".renku/workflow/")),
            all: paths.clone(),
        }
    }
}

// ---- ノートブックサーバー ----

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookServer {
    #[serde(default)]
    pub ready: bool,
    pub url: Option<String>,
    pub pending: Option<String>,
}

/// サーバー名 → 状態
pub type ServerSnapshot = BTreeMap<String, NotebookServer>;

#[derive(Debug, Deserialize)]
pub struct ServersResponse {
    #[serde(default)]
    pub servers: ServerSnapshot,
}

// ---- その他 ----

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Readme {
    pub text: String,
}

/// GitLabのファイルAPI応答
#[derive(Debug, Deserialize)]
pub struct RepositoryFile {
    pub content: String,
    pub encoding: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub merged: bool,
    pub commit: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub status: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: Option<String>,
    pub source_branch: String,
    pub target_branch: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MergeRequestChanges {
    pub iid: u64,
    pub source_branch: String,
    #[serde(default)]
    pub changes: Vec<FileChange>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileChange {
    pub old_path: String,
    pub new_path: String,
}

/// ファイルを変更しているマージリクエスト
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedBy {
    #[serde(rename = "mrIid")]
    pub mr_iid: u64,
    pub source_branch: String,
}

/// パス → そのファイルを変更しているオープンなMR
pub type ModifiedFiles = BTreeMap<String, Vec<ModifiedBy>>;

/// MRごとの変更をファイル単位にまとめる（リネームは除外）
pub fn group_modified_files(changes: Vec<MergeRequestChanges>) -> ModifiedFiles {
    let mut files = ModifiedFiles::new();
    for mr in changes {
        let info = ModifiedBy {
            mr_iid: mr.iid,
            source_branch: mr.source_branch.clone(),
        };
        for change in mr.changes.iter().filter(|c| c.old_path == c.new_path) {
            files
                .entry(change.old_path.clone())
                .or_default()
                .push(info.clone());
        }
    }
    files
}
