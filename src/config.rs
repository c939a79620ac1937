// コマンドライン引数と設定

use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::poller::PollingIntervals;

/// アクセストークンの種類
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// GitLabのPrivate-Tokenヘッダー
    #[default]
    Private,
    /// Authorization: Bearer
    Bearer,
}

#[derive(Parser, Debug)]
#[clap(
    name = "renku-project-sync",
    about = "Renkuプロジェクトの状態をゲートウェイから同期して表示するツール",
    version = "0.1.0"
)]
pub struct Args {
    /// ゲートウェイのベースURL
    #[clap(long, env = "GATEWAY_URL")]
    pub gateway_url: String,

    /// アクセストークン（無ければ匿名）
    #[clap(long, env = "GATEWAY_TOKEN")]
    pub token: Option<String>,

    /// トークンの種類
    #[clap(long, env = "TOKEN_TYPE", value_enum, default_value = "private")]
    pub token_type: TokenType,

    /// プロジェクトIDまたは namespace/name
    #[clap(long, env = "PROJECT_ID")]
    pub project_id: String,

    /// 最初に開くパス（例: data/raw/flights.csv）
    #[clap(long, env = "OPEN_PATH", default_value = "")]
    pub open_path: String,

    /// 起動待ちサーバーがあるときのポーリング間隔(ms)
    #[clap(
        long,
        env = "POLL_STARTING_MS",
        default_value = "3000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_starting_ms: u64,

    /// すべて起動済みのときのポーリング間隔(ms)
    #[clap(
        long,
        env = "POLL_READY_MS",
        default_value = "60000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_ready_ms: u64,

    /// ノートブックサーバーを監視する秒数（0なら1回だけ取得）
    #[clap(long, env = "WATCH_SECS", default_value = "0")]
    pub watch_secs: u64,

    /// ログレベル
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
}

/// 解決済みの設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub gateway_url: String,
    pub token: Option<String>,
    pub token_type: TokenType,
    pub project_id: String,
    pub open_path: String,
    pub polling: PollingIntervals,
    pub watch: Duration,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            gateway_url: args.gateway_url,
            // 空文字は未設定扱い
            token: args.token.filter(|t| !t.is_empty()),
            token_type: args.token_type,
            project_id: args.project_id,
            open_path: args.open_path,
            polling: PollingIntervals {
                starting: Duration::from_millis(args.poll_starting_ms),
                ready: Duration::from_millis(args.poll_ready_ms),
            },
            watch: Duration::from_secs(args.watch_secs),
        }
    }
}
