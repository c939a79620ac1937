// renku-project-sync - ゲートウェイからRenkuプロジェクトの状態を取得して表示するツール

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use log::{error, info, warn};
use serde_json::Value;
use simple_logger::SimpleLogger;
use tokio::time;

use renku_project_sync::client::GatewayClient;
use renku_project_sync::config::{Args, Config};
use renku_project_sync::coordinator::ProjectCoordinator;
use renku_project_sync::state::paths;

// 取得結果をログに出す
fn report<T>(label: &str, result: renku_project_sync::ApiResult<Option<T>>, show: impl Fn(&T) -> String) {
    match result {
        Ok(Some(value)) => info!("✅ {}: {}", label, show(&value)),
        Ok(None) => warn!("⏭️ {}: 取得中のためスキップ", label),
        Err(e) => error!("❌ {}の取得に失敗: {}", label, e),
    }
}

fn describe_servers(all: &Value) -> String {
    let Some(servers) = all.as_object().filter(|s| !s.is_empty()) else {
        return "なし".to_string();
    };
    servers
        .iter()
        .map(|(name, server)| {
            let status = match (server["ready"].as_bool(), server["pending"].as_str()) {
                (_, Some(pending)) => pending.to_string(),
                (Some(true), _) => "ready".to_string(),
                _ => "starting".to_string(),
            };
            format!("{} ({})", name, status)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ノートブックサーバーを一定時間ポーリングして変化を表示する
async fn watch_servers(coordinator: &ProjectCoordinator<GatewayClient>, config: &Config) {
    let mut revisions = coordinator.subscribe();
    coordinator.start_notebook_polling(coordinator.polling_intervals().starting);
    info!("👀 ノートブックサーバーを{}秒間監視", config.watch.as_secs());

    let deadline = time::sleep(config.watch);
    tokio::pin!(deadline);
    let mut last = Value::Null;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 中断");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let all = coordinator.get(paths::NOTEBOOKS_ALL).unwrap_or_default();
                if all != last {
                    info!("🖥️ サーバー: {}", describe_servers(&all));
                    last = all;
                }
                if let Some(Value::String(e)) = coordinator.get(paths::NOTEBOOKS_ERROR) {
                    warn!("⚠️ サーバー状態の取得エラー: {}", e);
                }
                if coordinator.polling_interval().is_none() {
                    info!("💤 追跡するサーバーがありません");
                    break;
                }
            }
        }
    }

    coordinator.stop_notebook_polling();
}

#[tokio::main]
async fn main() -> Result<()> {
    // .envファイルを読み込み
    dotenv().ok();

    let args = Args::parse();

    // ロガー初期化
    SimpleLogger::new().with_level(args.log_level).init()?;

    let config = Config::from(args);
    info!("🚀 プロジェクト同期開始: {} ({})", config.project_id, config.gateway_url);

    let client = Arc::new(GatewayClient::new(
        config.gateway_url.clone(),
        config.token.clone(),
        config.token_type,
    )?);
    let coordinator = ProjectCoordinator::new(client, config.project_id.clone(), config.polling);

    let Some(project) = coordinator.fetch_project().await? else {
        warn!("🚫 プロジェクトが見つかりません（削除または名前変更）");
        return Ok(());
    };
    let core = &project.metadata.core;
    info!(
        "📦 {} / {}",
        core.display_id.as_deref().unwrap_or("-"),
        core.title.as_deref().unwrap_or("-")
    );

    // 指定パスが見えるところまでツリーを開く
    if let Some(tree) = coordinator.fetch_files_tree(&config.open_path, None).await? {
        println!("{}", tree.render());
        let grouped = tree.grouped_files();
        info!(
            "🗂️ ファイル {}件 (data {}, notebooks {}, workflows {})",
            grouped.all.len(),
            grouped.data.len(),
            grouped.notebooks.len(),
            grouped.workflows.len()
        );
    }

    // 独立したリソースは並行して取得
    let (readme, branches, merge_requests, jobs) = futures::join!(
        coordinator.fetch_readme(),
        coordinator.fetch_branches(),
        coordinator.fetch_merge_requests(),
        coordinator.fetch_ci_jobs(),
    );
    report("README", readme, |text| {
        text.lines().next().unwrap_or_default().to_string()
    });
    report("ブランチ", branches, |b| format!("{}件", b.len()));
    report("マージリクエスト", merge_requests, |m| format!("{}件", m.len()));
    if let Some(jobs) = jobs {
        info!("🔧 CIジョブ: {}件", jobs.len());
    }
    report(
        "変更中ファイル",
        coordinator.fetch_modified_files().await,
        |files| format!("{}件", files.len()),
    );

    if config.watch.is_zero() {
        report(
            "ノートブックサーバー",
            coordinator.fetch_notebook_servers().await,
            |_| describe_servers(&coordinator.get(paths::NOTEBOOKS_ALL).unwrap_or_default()),
        );
    } else {
        watch_servers(&coordinator, &config).await;
    }

    info!("✅ 完了");
    Ok(())
}
