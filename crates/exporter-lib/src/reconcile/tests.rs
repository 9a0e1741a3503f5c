//! Reconciliation tests against an in-memory directory

use super::*;
use crate::directory::async_trait;
use crate::error::DirectoryError;
use crate::models::HeartbeatObservation;
use crate::sink::ScrapeContext;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct FakeProject {
    desired: HashMap<String, Vec<String>>,
    actual: HashMap<String, Vec<String>>,
    fail_list: bool,
    fail_desired: HashSet<String>,
    fail_actual: HashSet<String>,
    crash_desired: HashSet<String>,
}

/// Directory serving canned data, shared by all regions
#[derive(Default)]
struct FakeDirectory {
    projects: HashMap<String, FakeProject>,
    call_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn not_found(what: &str) -> DirectoryError {
    DirectoryError::Api {
        status: 404,
        code: "NotExist".to_string(),
        message: what.to_string(),
    }
}

impl FakeDirectory {
    fn with_group(mut self, project: &str, group: &str, desired: &[&str], actual: &[&str]) -> Self {
        let entry = self.projects.entry(project.to_string()).or_default();
        entry
            .desired
            .insert(group.to_string(), desired.iter().map(|m| m.to_string()).collect());
        entry
            .actual
            .insert(group.to_string(), actual.iter().map(|m| m.to_string()).collect());
        self
    }

    fn failing_list(mut self, project: &str) -> Self {
        self.projects.entry(project.to_string()).or_default().fail_list = true;
        self
    }

    fn failing_desired(mut self, project: &str, group: &str) -> Self {
        self.projects
            .entry(project.to_string())
            .or_default()
            .fail_desired
            .insert(group.to_string());
        self
    }

    fn failing_actual(mut self, project: &str, group: &str) -> Self {
        self.projects
            .entry(project.to_string())
            .or_default()
            .fail_actual
            .insert(group.to_string());
        self
    }

    fn crashing_desired(mut self, project: &str, group: &str) -> Self {
        self.projects
            .entry(project.to_string())
            .or_default()
            .crash_desired
            .insert(group.to_string());
        self
    }

    async fn track_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn project(&self, project: &str) -> Result<&FakeProject, DirectoryError> {
        self.projects.get(project).ok_or_else(|| not_found(project))
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn list_machine_groups(&self, project: &str) -> Result<Vec<String>, DirectoryError> {
        let p = self.project(project)?;
        if p.fail_list {
            return Err(not_found(project));
        }
        let mut groups: Vec<String> = p.desired.keys().cloned().collect();
        groups.sort();
        Ok(groups)
    }

    async fn get_machine_group_membership(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.track_call().await;
        let p = self.project(project)?;
        if p.crash_desired.contains(group) {
            panic!("membership lookup crashed for {group}");
        }
        if p.fail_desired.contains(group) {
            return Err(not_found(group));
        }
        p.desired.get(group).cloned().ok_or_else(|| not_found(group))
    }

    async fn list_actual_machines(
        &self,
        project: &str,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        self.track_call().await;
        let p = self.project(project)?;
        if p.fail_actual.contains(group) {
            return Err(not_found(group));
        }
        p.actual.get(group).cloned().ok_or_else(|| not_found(group))
    }
}

/// Hands out one directory per region and records requested regions
struct FakeFactory {
    regions: HashMap<String, Arc<FakeDirectory>>,
    requested: Mutex<Vec<String>>,
}

impl FakeFactory {
    fn new() -> Self {
        Self {
            regions: HashMap::new(),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn region(mut self, region: &str, directory: FakeDirectory) -> Self {
        self.regions.insert(region.to_string(), Arc::new(directory));
        self
    }
}

impl DirectoryClientFactory for FakeFactory {
    fn client_for_region(&self, region: &str) -> Result<Arc<dyn DirectoryClient>, DirectoryError> {
        self.requested.lock().unwrap().push(region.to_string());
        match self.regions.get(region) {
            Some(directory) => Ok(Arc::clone(directory) as Arc<dyn DirectoryClient>),
            None => Err(DirectoryError::Endpoint {
                region: region.to_string(),
                reason: "unknown region".to_string(),
            }),
        }
    }
}

fn targets(entries: &[(&str, &[&str])]) -> TargetList {
    let map: BTreeMap<String, Vec<String>> = entries
        .iter()
        .map(|(region, projects)| {
            (
                region.to_string(),
                projects.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect();
    TargetList::new(map)
}

fn obs(
    machine: &str,
    region: &str,
    project: &str,
    group: &str,
    state: HeartbeatState,
) -> HeartbeatObservation {
    HeartbeatObservation {
        labels: HeartbeatLabels {
            machine: machine.to_string(),
            region: region.to_string(),
            project: project.to_string(),
            machine_group: group.to_string(),
        },
        state,
    }
}

async fn run_pass(
    factory: Arc<FakeFactory>,
    targets: &TargetList,
    max_concurrency: usize,
) -> (Vec<HeartbeatObservation>, PassSummary, ScrapeContext) {
    let ctx = ScrapeContext::new().unwrap();
    let reconciler = Reconciler::new(factory, max_concurrency, StructuredLogger::new("test"));
    let summary = reconciler.reconcile(targets, ctx.sink()).await;
    (ctx.sink().observations(), summary, ctx)
}

#[tokio::test]
async fn test_missing_machine_reported_down() {
    let factory = Arc::new(FakeFactory::new().region(
        "cn-hangzhou",
        FakeDirectory::default().with_group("proj", "web", &["10.0.0.1", "10.0.0.2"], &["10.0.0.1"]),
    ));
    let targets = targets(&[("cn-hangzhou", &["proj"])]);

    let (observations, summary, _ctx) = run_pass(factory, &targets, 4).await;

    assert_eq!(
        observations,
        vec![
            obs("10.0.0.1", "hangzhou", "proj", "web", HeartbeatState::Up),
            obs("10.0.0.2", "hangzhou", "proj", "web", HeartbeatState::Down),
        ]
    );
    assert_eq!(summary.groups_checked, 1);
    assert_eq!(summary.up, 1);
    assert_eq!(summary.down, 1);
    assert!(!summary.has_skips());
}

#[tokio::test]
async fn test_unexpected_machine_reported_up() {
    let factory = Arc::new(FakeFactory::new().region(
        "cn-hangzhou",
        FakeDirectory::default().with_group("proj", "web", &["10.0.0.1"], &["10.0.0.1", "10.0.0.9"]),
    ));
    let targets = targets(&[("cn-hangzhou", &["proj"])]);

    let (observations, summary, ctx) = run_pass(factory, &targets, 4).await;

    assert_eq!(
        observations,
        vec![
            obs("10.0.0.1", "hangzhou", "proj", "web", HeartbeatState::Up),
            obs("10.0.0.9", "hangzhou", "proj", "web", HeartbeatState::Up),
        ]
    );
    assert_eq!(summary.down, 0);
    assert_eq!(ctx.sink().skip_count(SkipReason::DesiredMembership), 0);
}

#[tokio::test]
async fn test_same_machine_up_and_down_in_different_groups() {
    let factory = Arc::new(
        FakeFactory::new().region(
            "cn-shanghai",
            FakeDirectory::default()
                .with_group("proj", "web", &["10.0.0.1"], &["10.0.0.1"])
                .with_group("proj", "batch", &["10.0.0.1"], &[]),
        ),
    );
    let targets = targets(&[("cn-shanghai", &["proj"])]);

    let (observations, _, _ctx) = run_pass(factory, &targets, 4).await;

    assert_eq!(
        observations,
        vec![
            obs("10.0.0.1", "shanghai", "proj", "batch", HeartbeatState::Down),
            obs("10.0.0.1", "shanghai", "proj", "web", HeartbeatState::Up),
        ]
    );
}

#[tokio::test]
async fn test_repeated_passes_are_identical() {
    let factory = Arc::new(
        FakeFactory::new().region(
            "cn-hangzhou",
            FakeDirectory::default()
                .with_group("a", "web", &["1", "2", "3"], &["1", "4"])
                .with_group("a", "db", &["5", "5"], &["5"]),
        ),
    );
    let targets = targets(&[("cn-hangzhou", &["a"])]);

    let (first, first_summary, _) = run_pass(Arc::clone(&factory), &targets, 2).await;
    let (second, second_summary, _) = run_pass(factory, &targets, 2).await;

    assert_eq!(first, second);
    assert_eq!(first_summary, second_summary);
    assert_eq!(first.len(), 5);
}

#[tokio::test]
async fn test_group_failure_is_isolated() {
    let factory = Arc::new(
        FakeFactory::new()
            .region(
                "cn-hangzhou",
                FakeDirectory::default()
                    .with_group("a", "web", &["1"], &["1"])
                    .with_group("a", "broken-desired", &["2"], &["2"])
                    .with_group("a", "broken-actual", &["3"], &["3"])
                    .failing_desired("a", "broken-desired")
                    .failing_actual("a", "broken-actual")
                    .with_group("b", "db", &["4"], &[])
                    .failing_list("c"),
            )
            .region(
                "cn-beijing",
                FakeDirectory::default().with_group("d", "api", &["5"], &["5"]),
            ),
    );
    let targets = targets(&[("cn-hangzhou", &["a", "b", "c"]), ("cn-beijing", &["d"])]);

    let (observations, summary, ctx) = run_pass(factory, &targets, 4).await;

    assert_eq!(
        observations,
        vec![
            obs("1", "hangzhou", "a", "web", HeartbeatState::Up),
            obs("4", "hangzhou", "b", "db", HeartbeatState::Down),
            obs("5", "beijing", "d", "api", HeartbeatState::Up),
        ]
    );
    assert_eq!(summary.groups_checked, 3);
    assert_eq!(summary.groups_skipped, 2);
    assert_eq!(summary.projects_skipped, 1);

    let sink = ctx.sink();
    assert_eq!(sink.skip_count(SkipReason::DesiredMembership), 1);
    assert_eq!(sink.skip_count(SkipReason::ActualMembership), 1);
    assert_eq!(sink.skip_count(SkipReason::ListMachineGroups), 1);
}

#[tokio::test]
async fn test_crashed_group_task_is_counted() {
    let factory = Arc::new(FakeFactory::new().region(
        "cn-hangzhou",
        FakeDirectory::default()
            .with_group("a", "web", &["1"], &["1"])
            .with_group("a", "crashing", &["2"], &["2"])
            .crashing_desired("a", "crashing"),
    ));
    let targets = targets(&[("cn-hangzhou", &["a"])]);

    let (observations, summary, ctx) = run_pass(factory, &targets, 2).await;

    assert_eq!(
        observations,
        vec![obs("1", "hangzhou", "a", "web", HeartbeatState::Up)]
    );
    assert_eq!(summary.groups_checked, 1);
    assert_eq!(summary.groups_skipped, 1);
    assert_eq!(ctx.sink().skip_count(SkipReason::Task), 1);

    let rendered = String::from_utf8(ctx.render().unwrap()).unwrap();
    assert!(rendered.contains(
        r#"sls_heartbeat_reconcile_skips_total{machine_group="crashing",project="a",reason="task",region_id="cn-hangzhou"} 1"#
    ));
}

#[tokio::test]
async fn test_malformed_region_is_skipped() {
    let factory = Arc::new(
        FakeFactory::new()
            .region("cn", FakeDirectory::default().with_group("a", "web", &["1"], &["1"]))
            .region(
                "cn-hangzhou-test",
                FakeDirectory::default().with_group("b", "web", &["2"], &["2"]),
            ),
    );
    let targets = targets(&[("cn", &["a", "x"]), ("cn-hangzhou-test", &["b"])]);

    let (observations, summary, ctx) = run_pass(Arc::clone(&factory), &targets, 4).await;

    assert_eq!(
        observations,
        vec![obs("2", "hangzhou", "b", "web", HeartbeatState::Up)]
    );
    assert_eq!(summary.targets_skipped, 2);
    assert_eq!(ctx.sink().skip_count(SkipReason::MalformedRegion), 2);
    // No client is built for a region that cannot be labelled
    assert_eq!(*factory.requested.lock().unwrap(), vec!["cn-hangzhou-test"]);
}

#[tokio::test]
async fn test_client_failure_skips_region() {
    let factory = Arc::new(FakeFactory::new().region(
        "cn-beijing",
        FakeDirectory::default().with_group("d", "api", &["5"], &[]),
    ));
    let targets = targets(&[("cn-unknown", &["a"]), ("cn-beijing", &["d"])]);

    let (observations, summary, ctx) = run_pass(factory, &targets, 4).await;

    assert_eq!(
        observations,
        vec![obs("5", "beijing", "d", "api", HeartbeatState::Down)]
    );
    assert_eq!(summary.targets_skipped, 1);
    assert_eq!(ctx.sink().skip_count(SkipReason::Client), 1);
}

#[tokio::test]
async fn test_client_built_once_per_region() {
    let factory = Arc::new(
        FakeFactory::new().region(
            "cn-hangzhou",
            FakeDirectory::default()
                .with_group("a", "web", &["1"], &["1"])
                .with_group("b", "web", &["2"], &["2"]),
        ),
    );
    let targets = targets(&[("cn-hangzhou", &["a", "b"])]);

    run_pass(Arc::clone(&factory), &targets, 4).await;

    assert_eq!(*factory.requested.lock().unwrap(), vec!["cn-hangzhou"]);
}

#[tokio::test]
async fn test_many_groups_concurrently() {
    let mut directory = FakeDirectory {
        call_delay: Some(Duration::from_millis(5)),
        ..Default::default()
    };
    for i in 0..60 {
        let group = format!("group-{i:02}");
        let up = format!("10.1.{i}.1");
        let down = format!("10.1.{i}.2");
        directory =
            directory.with_group("proj", &group, &[up.as_str(), down.as_str()], &[up.as_str()]);
    }
    let factory = Arc::new(FakeFactory::new().region("cn-hangzhou", directory));
    let targets = targets(&[("cn-hangzhou", &["proj"])]);

    let (observations, summary, _ctx) = run_pass(Arc::clone(&factory), &targets, 8).await;

    assert_eq!(summary.groups_checked, 60);
    assert_eq!(observations.len(), 120);
    for i in 0..60 {
        let group = format!("group-{i:02}");
        let up = format!("10.1.{i}.1");
        let down = format!("10.1.{i}.2");
        assert!(observations.contains(&obs(&up, "hangzhou", "proj", &group, HeartbeatState::Up)));
        assert!(observations.contains(&obs(&down, "hangzhou", "proj", &group, HeartbeatState::Down)));
    }
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let mut directory = FakeDirectory {
        call_delay: Some(Duration::from_millis(10)),
        ..Default::default()
    };
    for i in 0..20 {
        directory = directory.with_group("proj", &format!("g{i}"), &["a"], &["a"]);
    }
    let directory = Arc::new(directory);
    let factory = Arc::new(FakeFactory {
        regions: HashMap::from([("cn-hangzhou".to_string(), Arc::clone(&directory))]),
        requested: Mutex::new(Vec::new()),
    });
    let targets = targets(&[("cn-hangzhou", &["proj"])]);

    let (_, summary, _ctx) = run_pass(factory, &targets, 2).await;

    assert_eq!(summary.groups_checked, 20);
    // Two groups at a time, each issuing two calls at once
    let peak = directory.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak in-flight calls {peak} exceeded bound");
    assert!(peak >= 2);
}

#[tokio::test]
async fn test_empty_targets() {
    let factory = Arc::new(FakeFactory::new());
    let (observations, summary, ctx) = run_pass(factory, &TargetList::default(), 4).await;

    assert!(observations.is_empty());
    assert_eq!(summary, PassSummary::default());
    let body = String::from_utf8(ctx.render().unwrap()).unwrap();
    assert!(body.contains("sls_heartbeat_machine_groups_checked 0"));
}
