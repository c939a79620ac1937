// ユーザーごとの最近開いたプロジェクト

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVisit {
    pub project: String,
    pub visited_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// JWTのペイロードから`sub`を取り出す（署名は検証しない）
pub fn user_id_from_token(token: &str) -> Result<String> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("JWTの形式ではありません"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("JWTペイロードのデコードに失敗")?;
    let claims: Claims = serde_json::from_slice(&bytes).context("JWTペイロードの解析に失敗")?;
    Ok(claims.sub)
}

#[derive(Debug)]
pub struct RecentProjects {
    limit: usize,
    visits: HashMap<String, Vec<ProjectVisit>>,
}

impl Default for RecentProjects {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl RecentProjects {
    pub fn new(limit: usize) -> Self {
        RecentProjects {
            limit,
            visits: HashMap::new(),
        }
    }

    /// プロジェクト表示の応答ごとに呼ぶ。記録したらtrue。
    ///
    /// 200/304の応答で、トークンがあり、do_not_trackでないときだけ記録する。
    pub fn track(
        &mut self,
        token: Option<&str>,
        project: &str,
        status: u16,
        do_not_track: bool,
    ) -> bool {
        if do_not_track || !matches!(status, 200 | 304) {
            return false;
        }
        let Some(token) = token else {
            return false;
        };

        match user_id_from_token(token) {
            Ok(user) => {
                self.record(&user, project, Utc::now());
                true
            }
            Err(e) => {
                debug!("ユーザーを特定できないため記録しない: {:#}", e);
                false
            }
        }
    }

    /// 新しい順に並べ、重複を除いて上限で切る
    pub fn record(&mut self, user: &str, project: &str, visited_at: DateTime<Utc>) {
        let visits = self.visits.entry(user.to_string()).or_default();
        visits.retain(|v| v.project != project);
        visits.push(ProjectVisit {
            project: project.to_string(),
            visited_at,
        });
        visits.sort_by(|a, b| b.visited_at.cmp(&a.visited_at));
        visits.truncate(self.limit);
    }

    pub fn list(&self, user: &str) -> &[ProjectVisit] {
        self.visits.get(user).map(Vec::as_slice).unwrap_or_default()
    }
}
