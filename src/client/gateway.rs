// ゲートウェイ（GitLab API互換）クライアント

use anyhow::anyhow;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, info};
use reqwest::{self, RequestBuilder, Response, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::ProjectClient;
use super::lfs::{LfsMatcher, parse_gitattributes};
use super::schemas::{
    Branch, Envelope, FolderListing, Job, MergeRequest, MergeRequestChanges, ModifiedFiles,
    ProjectData, Readme, RepositoryFile, ServerSnapshot, ServersResponse, TreeEntry,
    carve_project, group_modified_files,
};
use crate::config::TokenType;
use crate::error::{ApiError, ApiResult};

// 1ページあたりの件数
const PER_PAGE: &str = "100";
const DEFAULT_REF: &str = "master";

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        token_type: TokenType,
    ) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        // トークン種別ごとに認証ヘッダーを切り替える
        if let Some(token) = token {
            match token_type {
                TokenType::Private => {
                    headers.insert("Private-Token", header::HeaderValue::from_str(&token)?);
                }
                TokenType::Bearer => {
                    headers.insert(
                        header::AUTHORIZATION,
                        header::HeaderValue::from_str(&format!("Bearer {}", token))?,
                    );
                }
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(GatewayClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    // namespace/name形式のIDはエンコードする
    fn project_url(&self, id: &str, suffix: &str) -> String {
        format!("{}/projects/{}{}", self.base_url, id.replace('/', "%2F"), suffix)
    }

    // ステータスコードをエラー分類に変換
    async fn send(&self, request: RequestBuilder, resource: &str) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::not_found(resource));
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(ApiError::Other(anyhow!(
            "ゲートウェイエラー: {} ステータス {}, レスポンス: {}",
            resource,
            status,
            error_text
        )))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<T> {
        let response = self.send(self.client.get(url).query(query), url).await?;
        Ok(response.json().await?)
    }

    // X-Next-Pageを辿ってフォルダ直下の一覧をすべて取得
    async fn get_repository_tree(&self, id: &str, path: &str) -> ApiResult<Vec<TreeEntry>> {
        let url = self.project_url(id, "/repository/tree");
        let mut entries = Vec::new();
        let mut page = "1".to_string();

        loop {
            let request = self.client.get(&url).query(&[
                ("path", path),
                ("recursive", "false"),
                ("per_page", PER_PAGE),
                ("page", page.as_str()),
            ]);
            let response = self.send(request, &url).await?;

            let next_page = response
                .headers()
                .get("X-Next-Page")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            let mut items: Vec<TreeEntry> = response.json().await?;
            entries.append(&mut items);

            match next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(entries)
    }

    // ファイルAPIから取得してBase64をデコード
    async fn get_repository_file(&self, id: &str, path: &str) -> ApiResult<String> {
        let mut url = Url::parse(&self.project_url(id, "/repository/files"))
            .map_err(|e| ApiError::Other(e.into()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Other(anyhow!("URLにパスを追加できません: {}", path)))?
            .push(path);

        let file: RepositoryFile = self
            .get_json(url.as_str(), &[("ref", DEFAULT_REF)])
            .await?;

        if file.encoding != "base64" {
            return Err(ApiError::Other(anyhow!(
                "未対応のエンコーディング: {}",
                file.encoding
            )));
        }

        let decoded = BASE64
            .decode(file.content.replace('\n', ""))
            .map_err(|e| ApiError::Other(e.into()))?;
        Ok(String::from_utf8_lossy(&decoded).to_string())
    }

    async fn get_merge_request_changes(
        &self,
        id: &str,
        iid: u64,
    ) -> ApiResult<MergeRequestChanges> {
        let url = self.project_url(id, &format!("/merge_requests/{}/changes", iid));
        self.get_json(&url, &[]).await
    }

    async fn put_project_field(&self, id: &str, name: &str, field: &str, value: Value) -> ApiResult<()> {
        let url = self.project_url(id, "");
        let mut body = Map::new();
        body.insert("id".to_string(), json!(id));
        body.insert("name".to_string(), json!(name));
        body.insert(field.to_string(), value);
        self.send(self.client.put(&url).json(&body), &url).await?;
        Ok(())
    }
}

impl ProjectClient for GatewayClient {
    async fn get_project(&self, id: &str, statistics: bool) -> ApiResult<Envelope<ProjectData>> {
        let url = self.project_url(id, "");
        let statistics = statistics.to_string();
        let raw: Value = self
            .get_json(&url, &[("statistics", statistics.as_str())])
            .await?;
        Ok(Envelope::new(carve_project(raw)?))
    }

    async fn get_project_files_tree(
        &self,
        id: &str,
        path: &str,
        open_folder: Option<&str>,
        lfs_patterns: &[String],
    ) -> ApiResult<FolderListing> {
        debug!("ツリー取得: {} (対象: {:?})", open_folder.unwrap_or("/"), path);
        let entries = self
            .get_repository_tree(id, open_folder.unwrap_or(""))
            .await?;

        // LFSパターンは最初のルート取得時だけ読み込む
        let lfs_patterns = if lfs_patterns.is_empty() && open_folder.is_none() {
            match self.get_repository_file(id, ".gitattributes").await {
                Ok(text) => parse_gitattributes(&text),
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            }
        } else {
            lfs_patterns.to_vec()
        };

        let matcher = LfsMatcher::new(&lfs_patterns);
        let entries = entries
            .into_iter()
            .map(|mut entry| {
                entry.lfs = !entry.is_folder() && matcher.is_lfs(&entry.path);
                entry
            })
            .collect();

        Ok(FolderListing {
            entries,
            lfs_patterns,
        })
    }

    async fn get_notebook_servers(&self, id: &str) -> ApiResult<Envelope<ServerSnapshot>> {
        let url = format!("{}/notebooks/servers", self.base_url);
        let response: ServersResponse = self.get_json(&url, &[("project", id)]).await?;
        Ok(Envelope::new(response.servers))
    }

    async fn stop_notebook_server(&self, name: &str) -> ApiResult<()> {
        let url = format!("{}/notebooks/servers/{}", self.base_url, name);
        self.send(self.client.delete(&url), &url).await?;
        info!("🛑 ノートブックサーバー停止要求: {}", name);
        Ok(())
    }

    async fn get_project_readme(&self, id: &str) -> ApiResult<Readme> {
        let text = self.get_repository_file(id, "README.md").await?;
        Ok(Readme { text })
    }

    async fn get_modified_files(&self, id: &str) -> ApiResult<ModifiedFiles> {
        let merge_requests = self.get_merge_requests(id).await?.data;

        // 同時に5件までMRの変更を取得
        let changes = stream::iter(merge_requests)
            .map(|mr| self.get_merge_request_changes(id, mr.iid))
            .buffer_unordered(5)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(group_modified_files(changes))
    }

    async fn get_merge_requests(&self, id: &str) -> ApiResult<Envelope<Vec<MergeRequest>>> {
        let url = self.project_url(id, "/merge_requests");
        let data = self
            .get_json(
                &url,
                &[("scope", "all"), ("state", "opened"), ("per_page", PER_PAGE)],
            )
            .await?;
        Ok(Envelope::new(data))
    }

    async fn get_branches(&self, id: &str) -> ApiResult<Envelope<Vec<Branch>>> {
        let url = self.project_url(id, "/repository/branches");
        let data = self.get_json(&url, &[("per_page", PER_PAGE)]).await?;
        Ok(Envelope::new(data))
    }

    async fn get_jobs(&self, id: &str) -> ApiResult<Envelope<Vec<Job>>> {
        let url = self.project_url(id, "/jobs");
        let data = self.get_json(&url, &[("per_page", PER_PAGE)]).await?;
        Ok(Envelope::new(data))
    }

    async fn set_tags(&self, id: &str, name: &str, tags: &[String]) -> ApiResult<()> {
        self.put_project_field(id, name, "tag_list", json!(tags)).await
    }

    async fn set_description(&self, id: &str, name: &str, description: &str) -> ApiResult<()> {
        self.put_project_field(id, name, "description", json!(description))
            .await
    }

    async fn star_project(&self, id: &str, starred: bool) -> ApiResult<()> {
        // すでにスター済みなら解除
        let endpoint = if starred { "unstar" } else { "star" };
        let url = self.project_url(id, &format!("/{}", endpoint));
        self.send(self.client.post(&url), &url).await?;
        Ok(())
    }
}
