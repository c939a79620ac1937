// プロジェクト画面用の入れ子状態ツリー
//
// パスは文字列ではなくStatePath定数で指定する。
// 存在しないパスへのsetはプログラムのバグなのでpanicする。

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::watch;

/// ドット区切りの状態パス
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatePath(&'static str);

impl StatePath {
    pub const fn new(path: &'static str) -> Self {
        StatePath(path)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    fn segments(&self) -> impl Iterator<Item = &'static str> {
        self.0.split('.')
    }
}

/// 状態ツリーで使うパス一覧
pub mod paths {
    use super::StatePath;

    pub const CORE: StatePath = StatePath::new("core");
    pub const CORE_AVAILABLE: StatePath = StatePath::new("core.available");
    pub const SYSTEM_BRANCHES: StatePath = StatePath::new("system.branches");
    pub const SYSTEM_MERGE_REQUESTS: StatePath = StatePath::new("system.merge_requests");
    pub const SYSTEM_CI_JOBS: StatePath = StatePath::new("system.ci_jobs");
    pub const FILES_MODIFIED: StatePath = StatePath::new("files.modified_files");
    pub const README_TEXT: StatePath = StatePath::new("data.readme.text");
    pub const NOTEBOOKS_ALL: StatePath = StatePath::new("notebooks.all");
    pub const NOTEBOOKS_POLLING_INTERVAL: StatePath = StatePath::new("notebooks.polling_interval");
    pub const NOTEBOOKS_ERROR: StatePath = StatePath::new("notebooks.error");
}

// 初期状態。setできるのはここに存在するパスだけ。
fn initial_state() -> Value {
    json!({
        "core": { "available": null },
        "visibility": {},
        "statistics": {},
        "system": {
            "branches": [],
            "merge_requests": [],
            "ci_jobs": [],
        },
        "files": { "modified_files": {} },
        "data": { "readme": { "text": null } },
        "notebooks": {
            "all": {},
            "polling_interval": null,
            "error": null,
        },
    })
}

pub struct StateStore {
    root: Value,
    revision: watch::Sender<u64>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        StateStore {
            root: initial_state(),
            revision,
        }
    }

    pub fn get(&self, path: StatePath) -> Option<&Value> {
        path.segments()
            .try_fold(&self.root, |node, key| node.as_object()?.get(key))
    }

    /// 型付きで取得（null・型不一致はNone）
    pub fn get_as<T: DeserializeOwned>(&self, path: StatePath) -> Option<T> {
        self.get(path)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// # Panics
    ///
    /// パスが状態ツリーに存在しない場合
    pub fn set(&mut self, path: StatePath, value: Value) {
        let mut node = &mut self.root;
        for key in path.segments() {
            node = match node.as_object_mut().and_then(|obj| obj.get_mut(key)) {
                Some(child) => child,
                None => panic!("状態パスが存在しません: {}", path.as_str()),
            };
        }
        *node = value;
        self.bump();
    }

    /// 部分ツリーを再帰的にマージ（オブジェクト同士のみ入れ子でマージ）
    pub fn set_object(&mut self, partial: Value) {
        merge(&mut self.root, partial);
        self.bump();
    }

    pub fn snapshot(&self) -> &Value {
        &self.root
    }

    /// 書き込みごとにリビジョンが進む
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

fn merge(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => merge_objects(target, partial),
        (target, partial) => *target = partial,
    }
}

fn merge_objects(target: &mut Map<String, Value>, partial: Map<String, Value>) {
    for (key, value) in partial {
        match target.get_mut(&key) {
            Some(existing) => merge(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}
