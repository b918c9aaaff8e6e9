use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::error::ErrorKind;
use lockstep_core::{
    Action, BumpKind, LockFile, Outcome, Project, RegistrySource, Step, ToolInvocation,
    ToolOutput,
};
use lockstep_lifecycle::LifecycleSettings;
use lockstep_runner::{CommitterIdentity, OperationRunner, VersionControl};
use semver::Version;
use sha2::{Digest, Sha256};

use super::*;

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("audit log must be UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Accepts everything except `ERROR` lines, like a disk that fills up right as a step fails.
struct ErrorRejectingSink(SharedBuffer);

impl Write for ErrorRejectingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if String::from_utf8_lossy(buf).contains(":ERROR:") {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        }
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

struct UnflushableSink;

impl Write for UnflushableSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
    }
}

#[derive(Debug, Clone)]
struct SimProject {
    name: String,
    version: Version,
    sources: BTreeMap<String, String>,
    direct: BTreeMap<String, (String, Version)>,
    locked: BTreeMap<String, Version>,
    has_lock: bool,
    built: Option<Version>,
}

/// In-memory stand-in for poetry plus a package index. Project state is mirrored to
/// `pyproject.toml`, `poetry.lock`, and `dist/` so the tree digest sees real changes.
#[derive(Debug, Default)]
struct World {
    invocations: Vec<(PathBuf, String)>,
    projects: BTreeMap<PathBuf, SimProject>,
    index: BTreeMap<String, BTreeMap<String, BTreeMap<Version, BTreeMap<String, Version>>>>,
    fail_on: Option<(String, String)>,
}

#[derive(Clone, Default)]
struct SimulatedPoetry {
    world: Rc<RefCell<World>>,
}

impl OperationRunner for SimulatedPoetry {
    fn run(&self, working_dir: &Path, invocation: &ToolInvocation) -> anyhow::Result<ToolOutput> {
        let command = invocation.command_text();
        let mut world = self.world.borrow_mut();
        world
            .invocations
            .push((working_dir.to_path_buf(), command.clone()));

        if let Some((project, failing)) = &world.fail_on {
            if working_dir.ends_with(project) && &command == failing {
                anyhow::bail!(
                    "external-tool-failed: '{command}' in {} terminated with exit code 1\nstdout:\n\nstderr:\nsimulated failure",
                    working_dir.display()
                );
            }
        }

        let World {
            projects, index, ..
        } = &mut *world;
        let args: Vec<&str> = invocation.arguments().iter().map(String::as_str).collect();

        if let ["new", path] = args.as_slice() {
            let root = PathBuf::from(*path);
            let name = root
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            let project = SimProject {
                name,
                version: Version::new(0, 1, 0),
                sources: BTreeMap::new(),
                direct: BTreeMap::new(),
                locked: BTreeMap::new(),
                has_lock: false,
                built: None,
            };
            fs::create_dir_all(&root)?;
            write_project_files(&root, &project)?;
            projects.insert(root, project);
            return Ok(ToolOutput {
                stdout: format!("Created package {path}\n"),
                stderr: String::new(),
            });
        }

        let Some(project) = projects.get_mut(working_dir) else {
            anyhow::bail!(
                "external-tool-failed: '{command}' ran outside a poetry project {}",
                working_dir.display()
            );
        };

        match args.as_slice() {
            ["source", "add", name, url] => {
                project.sources.insert(name.to_string(), url.to_string());
            }
            ["add", "--lock", "--source", source, dependency] => {
                let version = latest_published(index, project, source, dependency)?;
                project
                    .direct
                    .insert(dependency.to_string(), (source.to_string(), version));
                relock(index, project);
            }
            ["build", "--format", _format] => {
                project.built = Some(project.version.clone());
                let dist = working_dir.join("dist");
                fs::create_dir_all(&dist)?;
                fs::write(
                    dist.join(format!("{}-{}-py3-none-any.whl", project.name, project.version)),
                    "wheel",
                )?;
            }
            ["publish", "--repository", repository] => {
                if project.built.as_ref() != Some(&project.version) {
                    anyhow::bail!(
                        "external-tool-failed: no build of {} {} to publish",
                        project.name,
                        project.version
                    );
                }
                let versions = index
                    .entry(repository.to_string())
                    .or_default()
                    .entry(project.name.clone())
                    .or_default();
                if versions.contains_key(&project.version) {
                    anyhow::bail!(
                        "external-tool-failed: {} {} already exists on {repository}",
                        project.name,
                        project.version
                    );
                }
                versions.insert(project.version.clone(), project.locked.clone());
            }
            ["version", kind] => {
                let kind = match *kind {
                    "major" => BumpKind::Major,
                    "minor" => BumpKind::Minor,
                    "patch" => BumpKind::Patch,
                    other => anyhow::bail!("external-tool-failed: unsupported bump {other}"),
                };
                if let Some(next) = kind.apply(&project.version) {
                    project.version = next;
                }
            }
            ["lock"] => relock(index, project),
            ["update", "--lock", dependency] => {
                let Some((source, _)) = project.direct.get(*dependency).cloned() else {
                    anyhow::bail!(
                        "external-tool-failed: {dependency} is not a dependency of {}",
                        project.name
                    );
                };
                let version = latest_published(index, project, &source, dependency)?;
                project
                    .direct
                    .insert(dependency.to_string(), (source, version));
                relock(index, project);
            }
            ["update", "--lock"] => {
                let dependencies: Vec<(String, String)> = project
                    .direct
                    .iter()
                    .map(|(name, (source, _))| (name.clone(), source.clone()))
                    .collect();
                for (name, source) in dependencies {
                    let version = latest_published(index, project, &source, &name)?;
                    project.direct.insert(name, (source, version));
                }
                relock(index, project);
            }
            ["env", "remove", "--all"] => return Ok(ToolOutput::default()),
            _ => anyhow::bail!("external-tool-failed: unsupported command '{command}'"),
        }

        write_project_files(working_dir, project)?;
        Ok(ToolOutput::default())
    }
}

type SimIndex = BTreeMap<String, BTreeMap<String, BTreeMap<Version, BTreeMap<String, Version>>>>;

fn latest_published(
    index: &SimIndex,
    project: &SimProject,
    source: &str,
    dependency: &str,
) -> anyhow::Result<Version> {
    if !project.sources.contains_key(source) {
        anyhow::bail!("external-tool-failed: source {source} is not configured");
    }
    index
        .get(source)
        .and_then(|packages| packages.get(dependency))
        .and_then(|versions| versions.keys().next_back())
        .cloned()
        .ok_or_else(|| {
            anyhow::anyhow!(
                "external-tool-failed: could not find a matching version of package {dependency}"
            )
        })
}

fn relock(index: &SimIndex, project: &mut SimProject) {
    let mut locked = BTreeMap::new();
    for (name, (source, version)) in &project.direct {
        locked.insert(name.clone(), version.clone());
        if let Some(transitive) = index
            .get(source)
            .and_then(|packages| packages.get(name))
            .and_then(|versions| versions.get(version))
        {
            for (transitive_name, transitive_version) in transitive {
                locked.insert(transitive_name.clone(), transitive_version.clone());
            }
        }
    }
    project.locked = locked;
    project.has_lock = true;
}

fn write_project_files(root: &Path, project: &SimProject) -> anyhow::Result<()> {
    let mut manifest = format!(
        "[project]\nname = \"{}\"\nversion = \"{}\"\ndependencies = [{}]\n",
        project.name,
        project.version,
        project
            .direct
            .keys()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ")
    );
    for (name, url) in &project.sources {
        manifest.push_str(&format!(
            "\n[[tool.poetry.source]]\nname = \"{name}\"\nurl = \"{url}\"\n"
        ));
    }
    fs::write(root.join("pyproject.toml"), manifest)?;

    if project.has_lock {
        let mut lock = String::new();
        for (name, version) in &project.locked {
            lock.push_str(&format!(
                "[[package]]\nname = \"{name}\"\nversion = \"{version}\"\n\n"
            ));
        }
        lock.push_str("[metadata]\nlock-version = \"2.0\"\n");
        fs::write(root.join("poetry.lock"), lock)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Repo {
    committed: Option<String>,
    staged: Option<String>,
    head: Option<String>,
    identity: Option<CommitterIdentity>,
    messages: Vec<String>,
}

/// Version control by content digest: a tree is dirty when its digest differs from the last
/// commit, with `.gitignore` entries excluded.
#[derive(Clone, Default)]
struct DigestVcs {
    repos: Rc<RefCell<BTreeMap<PathBuf, Repo>>>,
}

impl DigestVcs {
    fn commit_messages(&self, repo_root: &Path) -> Vec<String> {
        self.repos
            .borrow()
            .get(repo_root)
            .map(|repo| repo.messages.clone())
            .unwrap_or_default()
    }
}

impl VersionControl for DigestVcs {
    fn init(&self, repo_root: &Path, _branch: &str) -> anyhow::Result<()> {
        let mut repos = self.repos.borrow_mut();
        if repos.contains_key(repo_root) {
            anyhow::bail!("external-tool-failed: repository already initialized");
        }
        repos.insert(repo_root.to_path_buf(), Repo::default());
        Ok(())
    }

    fn set_identity(&self, repo_root: &Path, identity: &CommitterIdentity) -> anyhow::Result<()> {
        let mut repos = self.repos.borrow_mut();
        let repo = repos
            .get_mut(repo_root)
            .ok_or_else(|| anyhow::anyhow!("external-tool-failed: not a repository"))?;
        repo.identity = Some(identity.clone());
        Ok(())
    }

    fn is_dirty(&self, repo_root: &Path) -> anyhow::Result<bool> {
        let digest = tree_digest(repo_root)?;
        let repos = self.repos.borrow();
        let repo = repos
            .get(repo_root)
            .ok_or_else(|| anyhow::anyhow!("external-tool-failed: not a repository"))?;
        Ok(repo.committed.as_deref() != Some(digest.as_str()))
    }

    fn stage_all(&self, repo_root: &Path) -> anyhow::Result<()> {
        let digest = tree_digest(repo_root)?;
        let mut repos = self.repos.borrow_mut();
        let repo = repos
            .get_mut(repo_root)
            .ok_or_else(|| anyhow::anyhow!("external-tool-failed: not a repository"))?;
        repo.staged = Some(digest);
        Ok(())
    }

    fn commit(&self, repo_root: &Path, message: &str) -> anyhow::Result<()> {
        let mut repos = self.repos.borrow_mut();
        let repo = repos
            .get_mut(repo_root)
            .ok_or_else(|| anyhow::anyhow!("external-tool-failed: not a repository"))?;
        if repo.identity.is_none() {
            anyhow::bail!("external-tool-failed: committer identity unknown");
        }
        let Some(staged) = repo.staged.clone() else {
            anyhow::bail!("external-tool-failed: nothing staged");
        };
        if repo.committed.as_ref() == Some(&staged) {
            anyhow::bail!("external-tool-failed: nothing to commit, working tree clean");
        }
        let mut hasher = Sha256::new();
        hasher.update(staged.as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(repo.messages.len().to_le_bytes());
        let id = hex::encode(hasher.finalize());
        repo.head = Some(id[..7].to_string());
        repo.committed = Some(staged);
        repo.messages.push(message.to_string());
        Ok(())
    }

    fn short_head_id(&self, repo_root: &Path) -> anyhow::Result<String> {
        self.repos
            .borrow()
            .get(repo_root)
            .and_then(|repo| repo.head.clone())
            .ok_or_else(|| anyhow::anyhow!("external-tool-failed: HEAD does not exist"))
    }
}

fn tree_digest(root: &Path) -> anyhow::Result<String> {
    let ignored: Vec<String> = fs::read_to_string(root.join(".gitignore"))
        .map(|content| content.lines().map(|line| line.trim().to_string()).collect())
        .unwrap_or_default();

    let mut files = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let relative = path.strip_prefix(root)?.to_string_lossy().replace('\\', "/");
            let top_level = relative.split('/').next().unwrap_or_default();
            if ignored.iter().any(|rule| rule == top_level) {
                continue;
            }
            if path.is_dir() {
                queue.push_back(path);
            } else {
                files.push((relative, path));
            }
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (relative, path) in files {
        hasher.update(relative.as_bytes());
        hasher.update([0]);
        hasher.update(Sha256::digest(fs::read(&path)?));
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

struct Harness {
    driver: ScenarioDriver,
    world: Rc<RefCell<World>>,
    vcs: DigestVcs,
    log: SharedBuffer,
    run_root: PathBuf,
}

impl Harness {
    fn new() -> Self {
        Self::with_audit_sink(false)
    }

    fn with_audit_sink(reject_error_lines: bool) -> Self {
        let run_root = test_root();
        fs::create_dir_all(&run_root).expect("must create run root");
        let poetry = SimulatedPoetry::default();
        let vcs = DigestVcs::default();
        let log = SharedBuffer::default();
        let audit = if reject_error_lines {
            AuditLog::to_writer(ErrorRejectingSink(log.clone()), "lockstep")
        } else {
            AuditLog::to_writer(log.clone(), "lockstep")
        };
        let recorder = ChangeRecorder::new(Box::new(poetry.clone()), Box::new(vcs.clone()), audit);
        let lifecycle = ProjectLifecycle::new(
            Box::new(Poetry::default()),
            recorder,
            LifecycleSettings {
                branch: "main".to_string(),
                identity: CommitterIdentity {
                    name: "Lockstep Tests".to_string(),
                    email: "lockstep-tests@example.com".to_string(),
                },
            },
        );
        Self {
            driver: ScenarioDriver::new(&run_root, lifecycle),
            world: poetry.world,
            vcs,
            log,
            run_root,
        }
    }

    fn run(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        self.driver.run(scenario, |_, _| {})
    }

    fn project_root(&self, name: &str) -> PathBuf {
        self.run_root.join(name)
    }

    fn records(&self) -> Vec<lockstep_core::OperationRecord> {
        self.driver.audit().records().to_vec()
    }

    fn invocations(&self) -> Vec<(PathBuf, String)> {
        self.world.borrow().invocations.clone()
    }

    fn position(&self, project: &str, command: &str) -> usize {
        let root = self.project_root(project);
        self.invocations()
            .iter()
            .position(|(cwd, text)| cwd == &root && text == command)
            .unwrap_or_else(|| panic!("{project} never ran {command}"))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.run_root);
    }
}

fn local_source() -> RegistrySource {
    RegistrySource::new("local", "http://localhost/").expect("valid source")
}

fn chain() -> Scenario {
    ScenarioTemplate::Chain
        .build(&local_source())
        .expect("chain template must build")
}

fn bootstrap_pair() -> Vec<Step> {
    let source = local_source();
    let add_source = Action::AddSource {
        name: source.name.clone(),
        url: source.url.clone(),
    };
    vec![
        Step::new("lorito", Action::Create),
        Step::new("lorito", add_source.clone()),
        Step::new("gatito", Action::Create),
        Step::new("gatito", add_source),
        Step::new("lorito", Action::build()),
        Step::new(
            "lorito",
            Action::Publish {
                repository: source.name.clone(),
            },
        ),
        Step::new(
            "gatito",
            Action::AddDependency {
                name: "lorito".to_string(),
                source: Some(source.name),
            },
        ),
    ]
}

fn scenario_of(steps: Vec<Step>) -> Scenario {
    Scenario {
        name: "custom".to_string(),
        description: None,
        steps,
    }
}

#[test]
fn chain_scenario_propagates_patch_bump_to_leaf_lock() {
    let mut harness = Harness::new();
    harness.run(&chain()).expect("chain scenario must succeed");

    let perrito_lock =
        LockFile::load(&harness.project_root("perrito")).expect("perrito must have a lock");
    assert_eq!(perrito_lock.pinned_version("lorito"), Some("0.1.1"));
    assert_eq!(perrito_lock.pinned_version("gatito"), Some("0.1.1"));

    let gatito_lock =
        LockFile::load(&harness.project_root("gatito")).expect("gatito must have a lock");
    assert_eq!(gatito_lock.pinned_version("lorito"), Some("0.1.1"));

    let lorito = Project::new(&harness.run_root, "lorito").expect("valid project");
    assert_eq!(lorito.manifest_version().expect("must read version"), "0.1.1");
}

#[test]
fn chain_update_all_template_propagates_through_blanket_update() {
    let mut harness = Harness::new();
    let scenario = ScenarioTemplate::ChainUpdateAll
        .build(&local_source())
        .expect("template must build");
    harness.run(&scenario).expect("scenario must succeed");

    let perrito_lock =
        LockFile::load(&harness.project_root("perrito")).expect("perrito must have a lock");
    assert_eq!(perrito_lock.pinned_version("lorito"), Some("0.1.1"));
    assert!(harness
        .invocations()
        .iter()
        .any(|(_, text)| text == "poetry update --lock"));
}

#[test]
fn every_recorded_action_leaves_exactly_one_record() {
    let mut harness = Harness::new();
    let scenario = chain();
    harness.run(&scenario).expect("chain scenario must succeed");

    let records = harness.records();
    assert_eq!(records.len(), scenario.recorded_step_count());

    let recorded_steps: Vec<&Step> = scenario
        .steps
        .iter()
        .filter(|step| step.action.is_recorded())
        .collect();
    for (record, step) in records.iter().zip(recorded_steps) {
        assert!(
            record.project.ends_with(&step.project),
            "{} recorded for step on {}",
            record.project,
            step.project
        );
    }

    let log = harness.log.contents();
    for record in &records {
        assert!(log.contains(&record.audit_line()));
    }
}

#[test]
fn committed_records_match_commits_in_each_project() {
    let mut harness = Harness::new();
    harness.run(&chain()).expect("chain scenario must succeed");

    let lorito_root = harness.project_root("lorito");
    let lorito_label = lorito_root.display().to_string();
    let committed: Vec<String> = harness
        .records()
        .into_iter()
        .filter(|record| record.project == lorito_label)
        .filter(|record| !record.outcome.is_unchanged())
        .map(|record| record.command)
        .collect();
    assert_eq!(harness.vcs.commit_messages(&lorito_root), committed);
}

#[test]
fn dependency_is_published_before_dependent_publish_is_attempted() {
    let mut harness = Harness::new();
    harness.run(&chain()).expect("chain scenario must succeed");

    let publish = "poetry publish --repository local";
    let lorito_publish = harness.position("lorito", publish);
    let gatito_add = harness.position("gatito", "poetry add --lock --source local lorito");
    let gatito_publish = harness.position("gatito", publish);
    assert!(lorito_publish < gatito_add);
    assert!(gatito_add < gatito_publish);

    let perrito_root = harness.project_root("perrito");
    assert!(!harness
        .invocations()
        .iter()
        .any(|(cwd, text)| cwd == &perrito_root && text.starts_with("poetry publish")));
}

#[test]
fn repeated_source_and_unchanged_update_are_recorded_as_no_change() {
    let mut harness = Harness::new();
    let mut scenario = chain();
    let source = local_source();
    scenario.steps.push(Step::new(
        "perrito",
        Action::AddSource {
            name: source.name.clone(),
            url: source.url.clone(),
        },
    ));
    scenario.steps.push(Step::new(
        "perrito",
        Action::UpdateDependency {
            name: "gatito".to_string(),
        },
    ));
    scenario.steps.push(Step::new("perrito", Action::RemoveEnvironment));

    harness.run(&scenario).expect("scenario must succeed");

    let perrito_root = harness.project_root("perrito");
    let records = harness.records();
    let tail = &records[records.len() - 3..];
    assert!(tail.iter().all(|record| record.outcome == Outcome::Unchanged));
    assert_eq!(
        harness.vcs.commit_messages(&perrito_root).last().map(String::as_str),
        Some("poetry update --lock gatito")
    );

    let log = harness.log.contents();
    assert!(log.contains(&format!(
        "{}, poetry source add local http://localhost/, N/A",
        perrito_root.display()
    )));
    assert!(log.contains(&format!(
        "{}, poetry update --lock gatito, N/A",
        perrito_root.display()
    )));
}

#[test]
fn failing_action_stops_the_scenario() {
    let mut harness = Harness::new();
    harness.world.borrow_mut().fail_on = Some((
        "gatito".to_string(),
        "poetry build --format wheel".to_string(),
    ));

    let err = harness
        .run(&chain())
        .expect_err("failing build must abort the scenario");
    let message = format!("{err:#}");
    assert!(message.contains("(gatito build) failed"));
    assert!(message.contains("external-tool-failed"));

    let invocations = harness.invocations();
    let (last_cwd, last_command) = invocations.last().expect("some command must have run");
    assert_eq!(last_cwd, &harness.project_root("gatito"));
    assert_eq!(last_command, "poetry build --format wheel");
    assert!(!invocations
        .iter()
        .any(|(_, text)| text.starts_with("poetry version")));

    assert!(harness
        .records()
        .iter()
        .all(|record| record.command != "poetry build --format wheel"
            || !record.project.ends_with("gatito")));
    let log = harness.log.contents();
    assert!(log.contains(":ERROR:"));
    assert!(log.contains("simulated failure"));
}

#[test]
fn step_failure_survives_an_unwritable_audit_log() {
    let mut harness = Harness::with_audit_sink(true);
    harness.world.borrow_mut().fail_on = Some((
        "gatito".to_string(),
        "poetry build --format wheel".to_string(),
    ));

    let err = harness
        .run(&chain())
        .expect_err("failing build must abort the scenario");
    let message = format!("{err:#}");
    assert!(message.contains("(gatito build) failed"));
    assert!(message.contains("external-tool-failed"));
    assert!(message.contains("simulated failure"));
    assert!(!message.contains("failed writing audit log"));
    assert!(!harness.log.contents().contains(":ERROR:"));
}

#[test]
fn closing_audit_after_failure_reports_flush_errors() {
    assert!(close_audit_after_failure(AuditLog::to_writer(
        SharedBuffer::default(),
        "lockstep"
    )));
    assert!(!close_audit_after_failure(AuditLog::to_writer(
        UnflushableSink,
        "lockstep"
    )));
}

#[test]
fn expectation_mismatch_fails_the_run() {
    let mut harness = Harness::new();
    let mut scenario = chain();
    scenario.steps.retain(|step| {
        !(step.project == "gatito"
            && step.action
                == Action::UpdateDependency {
                    name: "lorito".to_string(),
                })
    });

    let err = harness
        .run(&scenario)
        .expect_err("stale pin must fail the expectation");
    let message = format!("{err:#}");
    assert!(message.contains("(gatito expect-locked) failed"));
    assert!(message.contains("expectation-failed: gatito locks lorito==0.1.0 but 0.1.1 was expected"));
}

#[test]
fn successful_expectations_and_bumps_are_noted_in_audit_log() {
    let mut harness = Harness::new();
    harness.run(&chain()).expect("chain scenario must succeed");

    let log = harness.log.contents();
    assert!(log.contains(&format!(
        "{}, version 0.1.1",
        harness.project_root("lorito").display()
    )));
    assert!(log.contains(&format!(
        "{}, expect lorito==0.1.1, ok",
        harness.project_root("perrito").display()
    )));
    assert!(log.starts_with("lockstep:INFO:"));
}

#[test]
fn removed_lock_is_committed_under_the_next_recorded_action() {
    let mut harness = Harness::new();
    let mut steps = bootstrap_pair();
    steps.push(Step::new("gatito", Action::RemoveLock));
    steps.push(Step::new("gatito", Action::RemoveEnvironment));
    let scenario = scenario_of(steps);

    harness.run(&scenario).expect("scenario must succeed");

    let gatito_root = harness.project_root("gatito");
    assert!(!gatito_root.join("poetry.lock").exists());
    let records = harness.records();
    assert_eq!(records.len(), scenario.recorded_step_count());

    // `env remove` touches nothing, yet the lock deletion is committed in its name.
    let last = records.last().expect("records must exist");
    assert_eq!(last.command, "poetry env remove --all");
    assert!(last.outcome.commit_id().is_some());
    assert!(harness
        .log
        .contents()
        .contains(&format!("{}, removing poetry.lock", gatito_root.display())));
}

#[test]
fn remove_lock_without_lock_file_fails() {
    let mut harness = Harness::new();
    let steps = vec![
        Step::new("lorito", Action::Create),
        Step::new("lorito", Action::RemoveLock),
        Step::new("lorito", Action::RemoveEnvironment),
    ];

    let err = harness
        .run(&scenario_of(steps))
        .expect_err("missing lock must fail");
    assert!(format!("{err:#}").contains("filesystem-failed"));
    assert!(!harness
        .invocations()
        .iter()
        .any(|(_, text)| text == "poetry env remove --all"));
}

#[test]
fn invalid_scenario_runs_nothing() {
    let mut harness = Harness::new();
    let mut scenario = chain();
    scenario.steps.retain(|step| {
        !(step.project == "lorito" && matches!(step.action, Action::Publish { .. }))
    });

    let err = harness.run(&scenario).expect_err("scenario must be rejected");
    assert!(err.to_string().contains("scenario-invalid"));
    assert!(harness.invocations().is_empty());
    assert!(harness.records().is_empty());
}

#[test]
fn config_defaults_describe_local_index_and_poetry() {
    let config = HarnessConfig::default();
    assert_eq!(config.package_manager.program, "poetry");
    assert_eq!(config.vcs.branch, "main");
    assert_eq!(config.audit.logger, "lockstep");
    assert_eq!(
        config.registry_source().expect("default source is valid"),
        local_source()
    );
    assert!(!config.index.preflight);
}

#[test]
fn config_file_overrides_only_named_fields() {
    let config = HarnessConfig::from_toml_str(
        r#"
[package_manager]
program = "/opt/poetry/bin/poetry"

[index]
url = "http://127.0.0.1:8080/"
preflight = true
"#,
    )
    .expect("config must parse");
    assert_eq!(config.package_manager.program, "/opt/poetry/bin/poetry");
    assert_eq!(config.index.name, "local");
    assert_eq!(config.index.url, "http://127.0.0.1:8080/");
    assert!(config.index.preflight);
    assert_eq!(config.vcs, HarnessConfig::default().vcs);

    let settings = config.lifecycle_settings();
    assert_eq!(settings.identity.email, "lockstep@localhost");
}

#[test]
fn template_root_dependency_is_added_before_first_build() {
    let config = HarnessConfig::from_toml_str(
        r#"
[template]
root_dependency = { name = "requests" }
"#,
    )
    .expect("config must parse");
    let scenario = load_scenario(None, Some(TemplateArg::Chain), &config)
        .expect("template must build");
    scenario.validate().expect("template must validate");

    let add = scenario
        .steps
        .iter()
        .position(|step| {
            step.project == "lorito"
                && step.action
                    == Action::AddDependency {
                        name: "requests".to_string(),
                        source: None,
                    }
        })
        .expect("root dependency step must exist");
    let build = scenario
        .steps
        .iter()
        .position(|step| step.project == "lorito" && step.action == Action::build())
        .expect("lorito must be built");
    assert!(add < build);
    assert_eq!(HarnessConfig::default().template.root_dependency, None);
}

#[test]
fn config_rejects_unknown_keys() {
    let err = HarnessConfig::from_toml_str("[vcs]\nprogramme = \"git\"\n")
        .expect_err("unknown key must be rejected");
    assert!(err.to_string().contains("config-invalid"));
}

#[test]
fn config_load_reports_missing_file() {
    let path = test_root().join("missing.toml");
    let err = HarnessConfig::load(Some(path.as_path())).expect_err("missing file must fail");
    assert!(err.to_string().contains("config-invalid"));
    assert_eq!(
        HarnessConfig::load(None).expect("no file means defaults"),
        HarnessConfig::default()
    );
}

#[test]
fn run_overrides_replace_config_values() {
    let cli = Cli::try_parse_from([
        "lockstep",
        "run",
        "--poetry",
        "poetry-1.8",
        "--log-dir",
        "/var/log/lockstep",
        "--preflight",
    ])
    .expect("run args must parse");
    let Commands::Run(args) = cli.command else {
        panic!("expected run command");
    };

    let mut config = HarnessConfig::default();
    apply_overrides(&mut config, &args);
    assert_eq!(config.package_manager.program, "poetry-1.8");
    assert_eq!(config.audit.log_dir, PathBuf::from("/var/log/lockstep"));
    assert!(config.index.preflight);
}

#[test]
fn cli_parses_template_and_json_flags() {
    let cli = Cli::try_parse_from(["lockstep", "-v", "run", "--template", "chain-update-all", "--json"])
        .expect("run args must parse");
    assert_eq!(cli.verbose, 1);
    let Commands::Run(args) = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(args.template, Some(TemplateArg::ChainUpdateAll));
    assert!(args.json);
    assert!(args.scenario.is_none());
}

#[test]
fn cli_rejects_scenario_file_with_template() {
    let err = Cli::try_parse_from([
        "lockstep",
        "run",
        "--scenario",
        "diamond.toml",
        "--template",
        "chain",
    ])
    .expect_err("scenario and template conflict");
    assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn load_scenario_prefers_file_over_template() {
    let dir = test_root();
    fs::create_dir_all(&dir).expect("must create dir");
    let path = dir.join("pair.toml");
    fs::write(
        &path,
        scenario_of(bootstrap_pair())
            .to_toml_string()
            .expect("must serialize"),
    )
    .expect("must write scenario");

    let config = HarnessConfig::default();
    let loaded = load_scenario(Some(path.as_path()), None, &config).expect("must load file");
    assert_eq!(loaded.name, "custom");
    let templated = load_scenario(None, None, &config).expect("must build template");
    assert_eq!(templated.name, "chain");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_lines_render_plain_and_rich() {
    let record = lockstep_core::OperationRecord {
        project: "/tmp/run/lorito".to_string(),
        command: "poetry lock".to_string(),
        output: ToolOutput::default(),
        outcome: Outcome::Unchanged,
    };
    assert_eq!(
        render_record_line(OutputStyle::Plain, &record),
        "/tmp/run/lorito  poetry lock  N/A"
    );
    let rich = render_record_line(OutputStyle::Rich, &record);
    assert!(rich.contains("[NO-OP]"));
    assert!(rich.ends_with("/tmp/run/lorito  poetry lock  N/A"));
}

#[test]
fn json_output_carries_root_log_and_records() {
    let record = lockstep_core::OperationRecord {
        project: "/tmp/run/lorito".to_string(),
        command: "poetry build --format wheel".to_string(),
        output: ToolOutput::default(),
        outcome: Outcome::Committed("abc1234".to_string()),
    };
    let rendered = render_records_json(
        Path::new("/tmp/run"),
        Path::new("20261018093005.log"),
        &[record],
    )
    .expect("must render json");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("must be valid json");
    assert_eq!(value["root"], "/tmp/run");
    assert_eq!(value["log"], "20261018093005.log");
    assert_eq!(value["records"][0]["outcome"]["committed"], "abc1234");
    assert_eq!(value["records"][0]["command"], "poetry build --format wheel");
}

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "lockstep-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
