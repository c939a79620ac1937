// ノートブックサーバー状態の適応ポーリング
//
// STOPPED → STARTING（短い間隔）→ READY（長い間隔）→ STOPPED
// 間隔は最新のスナップショットだけで決まる。タイマーは常に1つまで。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::client::ProjectClient;
use crate::client::schemas::ServerSnapshot;
use crate::error::ApiResult;
use crate::request::{RequestGuard, RequestTracker, Resource};
use crate::state::{StateStore, paths};

pub const STARTING_INTERVAL: Duration = Duration::from_millis(3_000);
pub const READY_INTERVAL: Duration = Duration::from_millis(60_000);

/// ポーリング間隔の2段階
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingIntervals {
    /// 起動待ちのサーバーがあるとき
    pub starting: Duration,
    /// すべて起動済みのとき
    pub ready: Duration,
}

impl Default for PollingIntervals {
    fn default() -> Self {
        PollingIntervals {
            starting: STARTING_INTERVAL,
            ready: READY_INTERVAL,
        }
    }
}

impl PollingIntervals {
    /// 0の段は既定値に置き換える
    pub fn non_zero(self) -> Self {
        let defaults = PollingIntervals::default();
        let pick = |value: Duration, fallback: Duration| {
            if value.is_zero() {
                warn!("⚠️ ポーリング間隔0は使えないため既定値 {:?} を使用", fallback);
                fallback
            } else {
                value
            }
        };
        PollingIntervals {
            starting: pick(self.starting, defaults.starting),
            ready: pick(self.ready, defaults.ready),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollDecision {
    Keep,
    Reschedule(Duration),
    Stop,
}

// 状態ツリーに書く間隔(ms)
fn millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// スナップショットから次の間隔を決める
pub fn next_decision(
    snapshot: &ServerSnapshot,
    current: Duration,
    intervals: &PollingIntervals,
) -> PollDecision {
    if snapshot.is_empty() {
        return PollDecision::Stop;
    }

    let all_ready = snapshot.values().all(|server| server.ready);
    let wanted = if all_ready {
        intervals.ready
    } else {
        intervals.starting
    };

    if wanted == current {
        PollDecision::Keep
    } else {
        PollDecision::Reschedule(wanted)
    }
}

struct ActivePoller {
    interval: Duration,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PollerSlot {
    active: Option<ActivePoller>,
    generation: u64,
    last_result: BTreeMap<String, bool>,
}

// ポーリングタスクと共有する部分
struct PollerContext<C> {
    client: Arc<C>,
    project_id: String,
    intervals: PollingIntervals,
    store: Arc<Mutex<StateStore>>,
    requests: Arc<Mutex<RequestTracker>>,
    slot: Mutex<PollerSlot>,
}

pub struct NotebookPoller<C> {
    ctx: Arc<PollerContext<C>>,
}

impl<C: ProjectClient> NotebookPoller<C> {
    pub fn new(
        client: Arc<C>,
        project_id: impl Into<String>,
        intervals: PollingIntervals,
        store: Arc<Mutex<StateStore>>,
        requests: Arc<Mutex<RequestTracker>>,
    ) -> Self {
        NotebookPoller {
            ctx: Arc::new(PollerContext {
                client,
                project_id: project_id.into(),
                intervals: intervals.non_zero(),
                store,
                requests,
                slot: Mutex::new(PollerSlot::default()),
            }),
        }
    }

    pub fn intervals(&self) -> PollingIntervals {
        self.ctx.intervals
    }

    /// ポーリング開始。最初の取得はすぐに行う。
    ///
    /// 別の間隔で動いていれば止めてから張り直す。同じ間隔なら何もしない。
    /// 0の間隔は受け付けない。
    pub fn start(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("⚠️ ポーリング間隔が0のため開始しません");
            return;
        }

        let mut slot = self.ctx.slot.lock();
        if let Some(active) = slot.active.take() {
            if active.interval == interval {
                slot.active = Some(active);
                return;
            }
            info!(
                "🔁 ポーリング間隔変更: {:?} → {:?}",
                active.interval, interval
            );
            active.handle.abort();
        } else {
            info!("▶️ ポーリング開始: {:?}", interval);
        }

        slot.generation += 1;
        let generation = slot.generation;
        let handle = tokio::spawn(run(Arc::clone(&self.ctx), generation, interval));
        slot.active = Some(ActivePoller {
            interval,
            generation,
            handle,
        });
        drop(slot);

        self.ctx.store.lock().set(
            paths::NOTEBOOKS_POLLING_INTERVAL,
            json!(millis(interval)),
        );
    }

    /// 停止（停止済みなら何もしない）
    pub fn stop(&self) {
        self.ctx.stop();
    }

    /// 現在の間隔（停止中はNone）
    pub fn interval(&self) -> Option<Duration> {
        self.ctx.slot.lock().active.as_ref().map(|a| a.interval)
    }

    pub fn is_running(&self) -> bool {
        self.ctx.slot.lock().active.is_some()
    }

    /// 最後に取得したサーバー名 → 起動済みか
    pub fn last_result(&self) -> BTreeMap<String, bool> {
        self.ctx.slot.lock().last_result.clone()
    }

    /// タイマーとは別に1回だけ取得する（取得中ならNone）
    pub async fn fetch_once(&self) -> ApiResult<Option<ServerSnapshot>> {
        self.ctx.fetch_servers().await
    }
}

impl<C> Drop for NotebookPoller<C> {
    fn drop(&mut self) {
        // 取得中でもタスクごと止める
        self.ctx.stop();
    }
}

impl<C> PollerContext<C> {
    fn stop(&self) {
        let active = self.slot.lock().active.take();
        if let Some(active) = active {
            active.handle.abort();
            info!("⏹️ ポーリング停止");
            self.store
                .lock()
                .set(paths::NOTEBOOKS_POLLING_INTERVAL, Value::Null);
        }
    }

    // 自分の世代のときだけ間隔を書き換える
    fn retier(&self, generation: u64, interval: Duration) -> bool {
        let mut slot = self.slot.lock();
        match slot.active.as_mut() {
            Some(active) if active.generation == generation => {
                info!(
                    "🔁 ポーリング間隔変更: {:?} → {:?}",
                    active.interval, interval
                );
                active.interval = interval;
            }
            _ => return false,
        }
        drop(slot);

        self.store.lock().set(
            paths::NOTEBOOKS_POLLING_INTERVAL,
            json!(millis(interval)),
        );
        true
    }

    // サーバーが無くなったときにタスク側から終了する
    fn finish(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation)
        {
            slot.active = None;
            drop(slot);
            info!("⏹️ 追跡するサーバーが無いためポーリング停止");
            self.store
                .lock()
                .set(paths::NOTEBOOKS_POLLING_INTERVAL, Value::Null);
        }
    }
}

impl<C: ProjectClient> PollerContext<C> {
    async fn fetch_servers(&self) -> ApiResult<Option<ServerSnapshot>> {
        let Some(guard) = RequestGuard::begin(&self.requests, Resource::NotebookServers) else {
            return Ok(None);
        };

        match self.client.get_notebook_servers(&self.project_id).await {
            Ok(response) => {
                let snapshot = response.data;
                self.slot.lock().last_result = snapshot
                    .iter()
                    .map(|(name, server)| (name.clone(), server.ready))
                    .collect();

                let all = serde_json::to_value(&snapshot)?;
                {
                    let mut store = self.store.lock();
                    store.set(paths::NOTEBOOKS_ALL, all);
                    store.set(paths::NOTEBOOKS_ERROR, Value::Null);
                }
                guard.finish();
                Ok(Some(snapshot))
            }
            Err(e) => {
                self.store
                    .lock()
                    .set(paths::NOTEBOOKS_ERROR, json!(e.to_string()));
                Err(e)
            }
        }
    }
}

async fn run<C: ProjectClient>(ctx: Arc<PollerContext<C>>, generation: u64, interval: Duration) {
    let mut current = interval;
    // 最初のtickは即時
    let mut ticker = time::interval(current);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = match ctx.fetch_servers().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => continue,
            Err(e) => {
                // 失敗しても次のtickは続ける
                error!("❌ ノートブックサーバー取得エラー: {}", e);
                continue;
            }
        };

        match next_decision(&snapshot, current, &ctx.intervals) {
            PollDecision::Keep => {
                debug!("サーバー数: {} (間隔 {:?})", snapshot.len(), current);
            }
            PollDecision::Reschedule(next) => {
                if !ctx.retier(generation, next) {
                    return;
                }
                current = next;
                ticker = time::interval_at(Instant::now() + next, next);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
            PollDecision::Stop => {
                ctx.finish(generation);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::schemas::NotebookServer;
    use crate::testing::{FakeClient, snapshot};

    fn poller(client: &Arc<FakeClient>) -> (NotebookPoller<FakeClient>, Arc<Mutex<StateStore>>) {
        let store = Arc::new(Mutex::new(StateStore::new()));
        let poller = NotebookPoller::new(
            Arc::clone(client),
            "42",
            PollingIntervals::default(),
            Arc::clone(&store),
            Arc::new(Mutex::new(RequestTracker::new())),
        );
        (poller, store)
    }

    // ポーリングタスクを進める
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn all_ready_switches_to_ready_tier() {
        let snap = snapshot(&[("serverA", true), ("serverB", true)]);
        assert_eq!(
            next_decision(&snap, STARTING_INTERVAL, &PollingIntervals::default()),
            PollDecision::Reschedule(READY_INTERVAL)
        );
        assert_eq!(
            next_decision(&snap, READY_INTERVAL, &PollingIntervals::default()),
            PollDecision::Keep
        );
    }

    #[test]
    fn any_not_ready_switches_back_to_starting() {
        let snap = snapshot(&[("serverA", false)]);
        assert_eq!(
            next_decision(&snap, READY_INTERVAL, &PollingIntervals::default()),
            PollDecision::Reschedule(STARTING_INTERVAL)
        );
    }

    #[test]
    fn empty_snapshot_stops() {
        assert_eq!(
            next_decision(&ServerSnapshot::new(), READY_INTERVAL, &PollingIntervals::default()),
            PollDecision::Stop
        );
    }

    #[test]
    fn zero_tiers_fall_back_to_defaults() {
        let intervals = PollingIntervals {
            starting: Duration::from_millis(500),
            ready: Duration::ZERO,
        }
        .non_zero();
        assert_eq!(intervals.starting, Duration::from_millis(500));
        assert_eq!(intervals.ready, READY_INTERVAL);
    }

    #[test]
    fn interval_millis_saturate() {
        assert_eq!(millis(STARTING_INTERVAL), 3000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", false)])]));
        let (poller, store) = poller(&client);

        poller.start(Duration::ZERO);
        settle().await;

        assert!(!poller.is_running());
        assert_eq!(poller.interval(), None);
        assert_eq!(client.server_calls(), 0);
        assert_eq!(
            store.lock().get(paths::NOTEBOOKS_POLLING_INTERVAL),
            Some(&Value::Null)
        );

        // 正しい間隔なら通常どおり始まる
        poller.start(STARTING_INTERVAL);
        settle().await;
        assert_eq!(client.server_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_fetches_immediately() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", false)])]));
        let (poller, store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;

        assert_eq!(client.server_calls(), 1);
        assert_eq!(poller.interval(), Some(STARTING_INTERVAL));
        assert_eq!(
            store.lock().get(paths::NOTEBOOKS_POLLING_INTERVAL),
            Some(&json!(3000))
        );
        assert_eq!(poller.last_result().get("a"), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_servers_slow_down_then_speed_up() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![
            snapshot(&[("serverA", true), ("serverB", true)]),
            snapshot(&[("serverA", false)]),
        ]));
        let (poller, _store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;
        assert_eq!(poller.interval(), Some(READY_INTERVAL));

        // READYの間隔が経つまで次の取得は無い
        time::sleep(STARTING_INTERVAL).await;
        assert_eq!(client.server_calls(), 1);

        time::sleep(READY_INTERVAL - STARTING_INTERVAL).await;
        assert_eq!(client.server_calls(), 2);
        assert_eq!(poller.interval(), Some(STARTING_INTERVAL));
    }

    #[tokio::test(start_paused = true)]
    async fn no_servers_stops_polling() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![ServerSnapshot::new()]));
        let (poller, store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;

        assert!(!poller.is_running());
        assert_eq!(
            store.lock().get(paths::NOTEBOOKS_POLLING_INTERVAL),
            Some(&Value::Null)
        );

        time::sleep(READY_INTERVAL * 2).await;
        assert_eq!(client.server_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_with_other_interval_replaces_timer() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", false)])]));
        let (poller, _store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;
        poller.start(STARTING_INTERVAL);
        settle().await;
        // 同じ間隔なら張り直さない
        assert_eq!(client.server_calls(), 1);

        poller.start(Duration::from_millis(10_000));
        settle().await;
        assert_eq!(client.server_calls(), 2);
        // 起動待ちのサーバーがあるのでSTARTINGに戻る
        assert_eq!(poller.interval(), Some(STARTING_INTERVAL));

        // 古いタイマーが残っていれば2回増える
        time::sleep(STARTING_INTERVAL).await;
        assert_eq!(client.server_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_keeps_polling() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", false)])]));
        client.fail_servers(true);
        let (poller, store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;
        assert!(poller.is_running());
        assert!(store.lock().get(paths::NOTEBOOKS_ERROR).unwrap().is_string());

        client.fail_servers(false);
        time::sleep(STARTING_INTERVAL).await;
        assert_eq!(client.server_calls(), 2);
        assert_eq!(
            store.lock().get(paths::NOTEBOOKS_ERROR),
            Some(&Value::Null)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", true)])]));
        let (poller, _store) = poller(&client);

        poller.stop();
        poller.start(STARTING_INTERVAL);
        settle().await;
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());

        time::sleep(READY_INTERVAL * 3).await;
        assert_eq!(client.server_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_timer_with_fetch_in_flight() {
        let client = Arc::new(FakeClient::new().with_snapshots(vec![snapshot(&[("a", false)])]));
        client.hang_servers(true);
        let (poller, _store) = poller(&client);

        poller.start(STARTING_INTERVAL);
        settle().await;
        assert_eq!(client.server_calls(), 1);
        assert_eq!(client.abandoned_fetches(), 0);

        drop(poller);
        settle().await;
        // 取得中のフューチャーも破棄される
        assert_eq!(client.abandoned_fetches(), 1);
    }

    #[test]
    fn server_readiness_defaults_to_false() {
        let server: NotebookServer = serde_json::from_value(json!({ "url": "http://x" })).unwrap();
        assert!(!server.ready);
    }
}
