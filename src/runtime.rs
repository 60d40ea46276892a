//! Cooperative task runtime.
//!
//! [`Runtime`] owns the [`Scene`] and every in-flight task. Each call to
//! [`Runtime::tick`] hands every task a fresh [`FrameBudget`] and steps it
//! once; a task keeps all of its progress between ticks. Finished and failed
//! tasks move to a result table so callers can poll their stats afterwards.

use crate::budget::{FrameBudget, Step};
use crate::config::{FragmentParams, ShatterConfig, SiteMode};
use crate::error::ShatterError;
use crate::explosion::{ExplosionRequest, ExplosionStats, ExplosionTask};
use crate::fragmenter::{FragmentRequest, FragmentStats, FragmentTask};
use crate::physics::PhysicsWorld;
use crate::scene::{BodyId, Scene};
use bevy::log::{debug, error};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task #{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Running,
    Finished,
    Failed(ShatterError),
    /// Never issued, or forgotten.
    Unknown,
}

enum Job {
    Fragment(FragmentTask),
    Explode(ExplosionTask),
}

impl Job {
    fn step<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, budget: &FrameBudget) -> Result<Step, ShatterError> {
        match self {
            Job::Fragment(task) => task.step(scene, budget),
            Job::Explode(task) => task.step(scene, budget),
        }
    }

    fn report(&self) -> Report {
        match self {
            Job::Fragment(task) => Report::Fragment(task.stats().clone()),
            Job::Explode(task) => Report::Explosion(task.stats().clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Report {
    Fragment(FragmentStats),
    Explosion(ExplosionStats),
}

#[derive(Debug, Clone)]
struct Finished {
    report: Report,
    error: Option<ShatterError>,
}

pub struct Runtime<P> {
    scene: Scene<P>,
    config: ShatterConfig,
    jobs: BTreeMap<TaskId, Job>,
    finished: BTreeMap<TaskId, Finished>,
    next_task: u64,
}

impl<P: PhysicsWorld> Runtime<P> {
    pub fn new(physics: P, config: ShatterConfig) -> Self {
        Self::with_scene(Scene::new(physics), config)
    }

    pub fn with_scene(scene: Scene<P>, config: ShatterConfig) -> Self {
        Self {
            scene,
            config,
            jobs: BTreeMap::new(),
            finished: BTreeMap::new(),
            next_task: 0,
        }
    }

    pub fn scene(&self) -> &Scene<P> {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene<P> {
        &mut self.scene
    }

    pub fn config(&self) -> &ShatterConfig {
        &self.config
    }

    /// Replace the configuration. Tasks already running keep the copy they
    /// started with.
    pub fn set_config(&mut self, config: ShatterConfig) {
        self.config = config;
    }

    fn issue(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    /// Queue fragmentation of a source body.
    pub fn fragment(&mut self, body: BodyId, params: Option<FragmentParams>, site_mode: SiteMode) -> TaskId {
        self.fragment_request(FragmentRequest {
            body,
            params,
            site_mode,
        })
    }

    pub fn fragment_request(&mut self, request: FragmentRequest) -> TaskId {
        let id = self.issue();
        let task = FragmentTask::new(request, self.config.clone(), self.config.rng(id.0));
        debug!("Queued {} fragmenting {}", id, request.body);
        self.jobs.insert(id, Job::Fragment(task));
        id
    }

    /// Queue an explosion.
    pub fn explode(&mut self, request: ExplosionRequest) -> TaskId {
        let id = self.issue();
        let task = ExplosionTask::new(request, self.config.clone(), self.config.rng(id.0));
        debug!("Queued {} exploding at {:?}", id, request.center);
        self.jobs.insert(id, Job::Explode(task));
        id
    }

    /// Step every in-flight task once under its own budget. Returns the
    /// number of tasks that finished or failed during this tick.
    pub fn tick(&mut self) -> usize {
        let limit = self.config.budget();
        let mut settled = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            let budget = FrameBudget::start(limit);
            match job.step(&mut self.scene, &budget) {
                Ok(Step::Yield) => {}
                Ok(Step::Done) => settled.push((*id, None)),
                Err(e) => {
                    error!("{} failed: {}", id, e);
                    settled.push((*id, Some(e)));
                }
            }
        }
        let count = settled.len();
        for (id, error) in settled {
            if let Some(job) = self.jobs.remove(&id) {
                self.finished.insert(
                    id,
                    Finished {
                        report: job.report(),
                        error,
                    },
                );
            }
        }
        count
    }

    /// Tick until nothing is in flight or `max_ticks` ran out. Returns the
    /// number of ticks used.
    pub fn run_until_idle(&mut self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while !self.is_idle() && ticks < max_ticks {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    pub fn status(&self, id: TaskId) -> TaskStatus {
        if self.jobs.contains_key(&id) {
            return TaskStatus::Running;
        }
        match self.finished.get(&id) {
            Some(Finished { error: Some(e), .. }) => TaskStatus::Failed(e.clone()),
            Some(_) => TaskStatus::Finished,
            None => TaskStatus::Unknown,
        }
    }

    fn report(&self, id: TaskId) -> Option<Report> {
        self.jobs
            .get(&id)
            .map(Job::report)
            .or_else(|| self.finished.get(&id).map(|f| f.report.clone()))
    }

    pub fn fragment_stats(&self, id: TaskId) -> Option<FragmentStats> {
        match self.report(id)? {
            Report::Fragment(stats) => Some(stats),
            Report::Explosion(_) => None,
        }
    }

    pub fn explosion_stats(&self, id: TaskId) -> Option<ExplosionStats> {
        match self.report(id)? {
            Report::Explosion(stats) => Some(stats),
            Report::Fragment(_) => None,
        }
    }

    /// Drop the stored result of a settled task.
    pub fn forget(&mut self, id: TaskId) {
        self.finished.remove(&id);
    }
}
