//! Live caches for the dashboard resources.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{EntityFetcher, LiveEntity};
use crate::api::models::{Budget, Script, ScriptMetrics, Task, User};
use crate::api::{ApiClient, ApiError};
use crate::bus::event_types::{EVENT_BUDGET_UPDATE, EVENT_SCRIPT_UPDATE, EVENT_TASK_UPDATE};
use crate::bus::EventSource;
use crate::realtime::Notifier;

/// Fetches one endpoint through the REST client and unwraps its `data`.
pub struct EndpointFetcher<T> {
    api: ApiClient,
    endpoint: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EndpointFetcher<T> {
    pub fn new(api: ApiClient, endpoint: impl Into<String>) -> Self {
        Self {
            api,
            endpoint: endpoint.into(),
            _marker: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> EntityFetcher<T> for EndpointFetcher<T> {
    async fn fetch(&self) -> Result<T, ApiError> {
        self.api.get_data(&self.endpoint).await
    }
}

/// Crew and VFX users only see their own assignments.
pub fn tasks_endpoint(user: &User) -> String {
    if user.role.sees_only_assigned_tasks() {
        format!("/tasks/assignee/{}", urlencoding::encode(&user.id))
    } else {
        "/tasks".to_string()
    }
}

pub fn tasks<S>(source: &S, api: &ApiClient, user: &User, notifier: Arc<dyn Notifier>) -> LiveEntity<Vec<Task>>
where
    S: EventSource + ?Sized,
{
    let fetcher = Arc::new(EndpointFetcher::<Vec<Task>>::new(api.clone(), tasks_endpoint(user)));
    LiveEntity::mount("tasks", EVENT_TASK_UPDATE, source, fetcher, notifier)
}

pub fn budget<S>(source: &S, api: &ApiClient, notifier: Arc<dyn Notifier>) -> LiveEntity<Budget>
where
    S: EventSource + ?Sized,
{
    let fetcher = Arc::new(EndpointFetcher::<Budget>::new(api.clone(), "/budget"));
    LiveEntity::mount("budget", EVENT_BUDGET_UPDATE, source, fetcher, notifier)
}

pub fn script<S>(source: &S, api: &ApiClient, notifier: Arc<dyn Notifier>) -> LiveEntity<Script>
where
    S: EventSource + ?Sized,
{
    let fetcher = Arc::new(EndpointFetcher::<Script>::new(api.clone(), "/script"));
    LiveEntity::mount("script", EVENT_SCRIPT_UPDATE, source, fetcher, notifier)
}

pub fn script_metrics<S>(source: &S, api: &ApiClient, notifier: Arc<dyn Notifier>) -> LiveEntity<ScriptMetrics>
where
    S: EventSource + ?Sized,
{
    let fetcher = Arc::new(EndpointFetcher::<ScriptMetrics>::new(api.clone(), "/script/metrics"));
    LiveEntity::mount("script metrics", EVENT_SCRIPT_UPDATE, source, fetcher, notifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use httpmock::Method::GET;
    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::api::models::Role;
    use crate::bus::EventDispatcher;
    use crate::testing::{test_user, RecordingNotifier};

    #[test]
    fn tasks_endpoint_depends_on_role() {
        assert_eq!(tasks_endpoint(&test_user("u9", Role::Crew)), "/tasks/assignee/u9");
        assert_eq!(tasks_endpoint(&test_user("u9", Role::Vfx)), "/tasks/assignee/u9");
        assert_eq!(tasks_endpoint(&test_user("u1", Role::Producer)), "/tasks");
        assert_eq!(tasks_endpoint(&test_user("u2", Role::Director)), "/tasks");
    }

    async fn wait_for_data<T: Clone + Send + Sync + 'static>(live: &LiveEntity<T>) -> T {
        let mut rx = live.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.loading))
            .await
            .expect("fetch should finish")
            .expect("snapshot sender alive")
            .clone();
        snapshot.data.expect("fetch should succeed")
    }

    #[tokio::test]
    async fn crew_tasks_refetch_on_task_update() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/tasks/assignee/u9");
            then.status(200).json_body(json!({
                "success": true,
                "data": [{ "id": "t1", "title": "Rig lights", "status": "todo", "assigneeId": "u9" }]
            }));
        });
        let api = ApiClient::new(&format!("{}/api", server.base_url()), Duration::from_secs(5)).unwrap();
        let dispatcher = EventDispatcher::new();

        let live = tasks(&dispatcher, &api, &test_user("u9", Role::Crew), RecordingNotifier::new());
        let first = wait_for_data(&live).await;
        assert_eq!(first[0].id, "t1");

        dispatcher.emit(EVENT_TASK_UPDATE, &json!({ "action": "deleted", "task_id": "t1" }));
        tokio::time::timeout(Duration::from_secs(5), async {
            while live.fetch_count() < 2 || live.snapshot().loading {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("refetch should finish");

        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn budget_fetch_failure_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/budget");
            then.status(500).json_body(json!({ "success": false, "message": "budget file missing" }));
        });
        let api = ApiClient::new(&format!("{}/api", server.base_url()), Duration::from_secs(5)).unwrap();
        let dispatcher = EventDispatcher::new();
        let notifier = RecordingNotifier::new();

        let live = budget(&dispatcher, &api, notifier.clone());
        let mut rx = live.watch();
        let snapshot = rx.wait_for(|s| !s.loading).await.unwrap().clone();

        assert_eq!(snapshot.error.as_deref(), Some("budget file missing"));
        assert_eq!(notifier.errors(), vec!["Failed to load budget".to_string()]);
    }
}
