// Git LFS管理ファイルの判定
//
// .gitattributesの `filter=lfs` 行をgitignore形式のパターンとして扱う。

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log::warn;

/// .gitattributesからLFS対象のパターンを取り出す
pub fn parse_gitattributes(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pattern = parts.next()?;
            parts
                .any(|attr| attr == "filter=lfs")
                .then(|| pattern.to_string())
        })
        .collect()
}

pub struct LfsMatcher {
    matcher: Option<Gitignore>,
}

impl LfsMatcher {
    pub fn new(patterns: &[String]) -> Self {
        if patterns.is_empty() {
            return LfsMatcher { matcher: None };
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("⚠️ LFSパターンを無視: {} - {}", pattern, e);
            }
        }

        let matcher = match builder.build() {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                warn!("⚠️ LFSパターンの構築に失敗: {}", e);
                None
            }
        };
        LfsMatcher { matcher }
    }

    pub fn is_lfs(&self, path: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|m| m.matched(path, false).is_ignore())
    }
}
