// リソースごとの取得状態（同時取得の重複防止）
//
// 取得中に同じリソースを要求されたら捨てる。キューには積まない。

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

/// 取得対象の論理リソース
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    FilesTree,
    Readme,
    NotebookServers,
    Branches,
    MergeRequests,
    ModifiedFiles,
    CiJobs,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestState {
    #[default]
    Idle,
    InFlight,
    Done,
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    states: HashMap<Resource, RequestState>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, resource: Resource) -> RequestState {
        self.states.get(&resource).copied().unwrap_or_default()
    }

    pub fn is_in_flight(&self, resource: Resource) -> bool {
        self.state(resource) == RequestState::InFlight
    }

    /// 取得中でなければInFlightにしてtrueを返す
    pub fn try_begin(&mut self, resource: Resource) -> bool {
        if self.is_in_flight(resource) {
            debug!("取得中のためスキップ: {:?}", resource);
            return false;
        }
        self.states.insert(resource, RequestState::InFlight);
        true
    }

    fn set(&mut self, resource: Resource, state: RequestState) {
        self.states.insert(resource, state);
    }
}

/// InFlightの間だけ生きるガード
///
/// `finish`せずに破棄されたら（エラー・キャンセル）Idleに戻す。
pub struct RequestGuard {
    tracker: Arc<Mutex<RequestTracker>>,
    resource: Resource,
    finished: bool,
}

impl RequestGuard {
    /// チェックと設定を1回のロックで行う
    pub fn begin(tracker: &Arc<Mutex<RequestTracker>>, resource: Resource) -> Option<Self> {
        if !tracker.lock().try_begin(resource) {
            return None;
        }
        Some(RequestGuard {
            tracker: Arc::clone(tracker),
            resource,
            finished: false,
        })
    }

    pub fn finish(mut self) {
        self.tracker.lock().set(self.resource, RequestState::Done);
        self.finished = true;
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.lock().set(self.resource, RequestState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<Mutex<RequestTracker>> {
        Arc::new(Mutex::new(RequestTracker::new()))
    }

    #[test]
    fn second_begin_is_rejected_while_in_flight() {
        let tracker = tracker();
        let guard = RequestGuard::begin(&tracker, Resource::Readme);
        assert!(guard.is_some());
        assert!(RequestGuard::begin(&tracker, Resource::Readme).is_none());

        // 別リソースは独立
        assert!(RequestGuard::begin(&tracker, Resource::Branches).is_some());
    }

    #[test]
    fn finish_marks_done_and_allows_refetch() {
        let tracker = tracker();
        RequestGuard::begin(&tracker, Resource::FilesTree)
            .unwrap()
            .finish();
        assert_eq!(tracker.lock().state(Resource::FilesTree), RequestState::Done);
        assert!(RequestGuard::begin(&tracker, Resource::FilesTree).is_some());
    }

    #[test]
    fn dropped_guard_returns_to_idle() {
        let tracker = tracker();
        {
            let _guard = RequestGuard::begin(&tracker, Resource::CiJobs).unwrap();
            assert!(tracker.lock().is_in_flight(Resource::CiJobs));
        }
        assert_eq!(tracker.lock().state(Resource::CiJobs), RequestState::Idle);
    }
}
