//! Local process scheduler - runs frame commands on this machine

use crate::core::{Container, Frame, FrameResult, Play};
use crate::scheduler::{Job, Resource, Scheduler, SchedulerError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct LocalRun {
    namespace: String,
    play: String,
    uid: String,
    frame_id: String,
    result: Option<FrameResult>,
}

impl LocalRun {
    fn belongs_to(&self, play: &Play) -> bool {
        self.play == play.name()
            && self.namespace == play.namespace()
            && self.uid == play.metadata.uid.to_string()
    }
}

/// Runs the first container's command of each frame as a child process
///
/// Launching does not wait for the process; its exit status is picked up by
/// [`Scheduler::concluded`] once the process has exited. Output goes to
/// `<work_dir>/<job name>.log`.
pub struct LocalScheduler {
    work_dir: PathBuf,
    runs: Arc<Mutex<HashMap<String, LocalRun>>>,
}

impl LocalScheduler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use a directory under the system temp dir
    pub fn with_default_dir() -> Self {
        Self::new(std::env::temp_dir().join("stagehand"))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn build_command(&self, play: &Play, container: &Container) -> Option<Command> {
        let mut argv = container.command.iter().chain(container.args.iter());
        let program = argv.next()?;

        let mut cmd = Command::new(program);
        cmd.args(argv);
        cmd.current_dir(
            container
                .working_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(|| self.work_dir.clone()),
        );

        // Config maps only exist on a cluster; the vars one can be resolved
        // from the play itself
        let vars_config_map = play.status.vars_config_map.as_deref();
        for source in &container.env_from {
            if Some(source.config_map_ref.as_str()) == vars_config_map {
                cmd.envs(play.spec.vars.bound_values());
            } else {
                debug!(
                    "Config map {} is not available to local processes",
                    source.config_map_ref
                );
            }
        }
        for env in &container.env {
            cmd.env(&env.name, &env.value);
        }
        Some(cmd)
    }

    async fn redirect_output(
        &self,
        command: &mut Command,
        job_name: &str,
    ) -> Result<(), SchedulerError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let log = tokio::fs::File::create(self.work_dir.join(format!("{}.log", job_name)))
            .await?
            .into_std()
            .await;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        Ok(())
    }

    async fn record(&self, job_name: &str, uid: &str, result: FrameResult) {
        record(&self.runs, job_name, uid, result).await;
    }
}

/// Store a result unless the run was replaced meanwhile
async fn record(
    runs: &Mutex<HashMap<String, LocalRun>>,
    job_name: &str,
    uid: &str,
    result: FrameResult,
) {
    if let Some(run) = runs.lock().await.get_mut(job_name) {
        if run.uid == uid {
            run.result = Some(result);
        }
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn run(&self, play: &Play, frame: &Frame) -> Result<(), SchedulerError> {
        let job = Job::for_frame(play, frame);
        let uid = play.metadata.uid.to_string();
        {
            let mut runs = self.runs.lock().await;
            if runs.get(&job.name).is_some_and(|run| run.belongs_to(play)) {
                debug!("Process for {} already launched", job.name);
                return Ok(());
            }
            // a run of an earlier play with the same name is replaced
            runs.insert(
                job.name.clone(),
                LocalRun {
                    namespace: play.namespace().to_string(),
                    play: play.name().to_string(),
                    uid: uid.clone(),
                    frame_id: frame.id.clone(),
                    result: None,
                },
            );
        }

        let command = job
            .action
            .containers
            .first()
            .and_then(|c| self.build_command(play, c));
        let Some(mut command) = command else {
            warn!("Frame {} has no command to run locally", frame.name);
            self.record(&job.name, &uid, FrameResult::Failed).await;
            return Ok(());
        };

        if let Err(e) = self.redirect_output(&mut command, &job.name).await {
            // forget the run so the next pass can launch it again
            self.runs.lock().await.remove(&job.name);
            return Err(e);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", job.name, e);
                self.record(&job.name, &uid, FrameResult::Failed).await;
                return Ok(());
            }
        };
        info!("Started {} (pid {:?})", job.name, child.id());

        let runs = self.runs.clone();
        let name = job.name;
        tokio::spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => FrameResult::Successful,
                Ok(status) => {
                    debug!("{} exited with {}", name, status);
                    FrameResult::Failed
                }
                Err(e) => {
                    warn!("Lost track of {}: {}", name, e);
                    FrameResult::Failed
                }
            };
            record(&runs, &name, &uid, result).await;
        });

        Ok(())
    }

    async fn provision(&self, play: &Play, resources: &[Resource]) -> Result<(), SchedulerError> {
        for resource in resources {
            debug!(
                "Skipping {} {} for {}: nothing to provision locally",
                resource.kind,
                resource.name,
                play.name()
            );
        }
        Ok(())
    }

    async fn deprovision(
        &self,
        _play: &Play,
        _resources: &[Resource],
    ) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn concluded(&self, play: &Play) -> Result<BTreeMap<String, FrameResult>, SchedulerError> {
        let runs = self.runs.lock().await;
        Ok(runs
            .values()
            .filter(|r| r.belongs_to(play))
            .filter_map(|r| r.result.map(|result| (r.frame_id.clone(), result)))
            .collect())
    }
}
