// 遅延読み込みするファイルツリー
//
// ノードはパスをキーにhashへ格納し、子はパスの列で参照する。
// children_loadedがfalseのノードのchildrenは空で、網羅的ではない。

pub mod fetcher;

use std::collections::HashMap;

use serde::Serialize;

use crate::client::schemas::{FolderListing, GroupedFiles, TreeEntry};

pub use fetcher::TreeFetcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    File,
    Folder,
}

/// ツリー内の1エントリ
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub lfs: bool,
    /// 子の一覧を取得済みか
    pub children_loaded: bool,
    /// UI上で展開されているか
    pub children_open: bool,
    /// 子ノードのパス（取得順）
    pub children: Vec<String>,
}

impl TreeNode {
    fn from_entry(entry: TreeEntry) -> Self {
        let kind = if entry.is_folder() {
            NodeKind::Folder
        } else {
            NodeKind::File
        };
        TreeNode {
            path: entry.path,
            name: entry.name,
            kind,
            lfs: entry.lfs,
            children_loaded: false,
            children_open: false,
            children: Vec::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// キャッシュされたツリー全体
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilesTree {
    /// パス → ノード
    pub hash: HashMap<String, TreeNode>,
    /// ルート直下のパス
    pub root: Vec<String>,
    /// 既知のLFSパターン（以降のフォルダ取得で再利用）
    pub lfs_patterns: Vec<String>,
}

impl FilesTree {
    /// ルート一覧からツリーを作る
    pub fn from_listing(listing: FolderListing) -> Self {
        let mut tree = FilesTree {
            lfs_patterns: listing.lfs_patterns,
            ..Default::default()
        };
        tree.root = tree.insert_entries(listing.entries);
        tree
    }

    pub fn node(&self, path: &str) -> Option<&TreeNode> {
        self.hash.get(path)
    }

    /// フォルダの子を差し込み、読み込み済み・展開済みにする
    ///
    /// フォルダがhashに無い場合は何もしない。
    pub fn insert_children(&mut self, folder: &str, listing: FolderListing) {
        if !self.hash.contains_key(folder) {
            return;
        }
        let children = self.insert_entries(listing.entries);
        if let Some(node) = self.hash.get_mut(folder) {
            node.children = children;
            node.children_loaded = true;
            node.children_open = true;
        }
    }

    fn insert_entries(&mut self, entries: Vec<TreeEntry>) -> Vec<String> {
        entries
            .into_iter()
            .map(|entry| {
                let node = TreeNode::from_entry(entry);
                let path = node.path.clone();
                self.hash.insert(path.clone(), node);
                path
            })
            .collect()
    }

    /// 取得済みのファイルを種類ごとに分類する（パス順）
    pub fn grouped_files(&self) -> GroupedFiles {
        let mut paths: Vec<String> = self
            .hash
            .values()
            .filter(|node| !node.is_folder())
            .map(|node| node.path.clone())
            .collect();
        paths.sort();
        GroupedFiles::from_paths(paths)
    }

    /// 展開中のフォルダだけを辿ったインデント表示
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_level(&self.root, 0, &mut out);
        out
    }

    fn render_level(&self, paths: &[String], depth: usize, out: &mut String) {
        for node in paths.iter().filter_map(|p| self.hash.get(p)) {
            let marker = match (node.kind, node.lfs) {
                (NodeKind::Folder, _) if node.children_open => "📂",
                (NodeKind::Folder, _) => "📁",
                (NodeKind::File, true) => "📦",
                (NodeKind::File, false) => "📄",
            };
            out.push_str(&format!("{}{} {}\n", "  ".repeat(depth), marker, node.name));
            if node.is_folder() && node.children_open {
                self.render_level(&node.children, depth + 1, out);
            }
        }
    }
}
