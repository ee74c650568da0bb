use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use intent::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// Stack Identity & Lock
// ============================================================================

/// Identifies the state of one stack within a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackKey {
    pub project: String,
    pub stack: String,
}

impl StackKey {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
        }
    }
}

impl fmt::Display for StackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.stack)
    }
}

/// Exclusive hold on a stack's state; released on drop
pub struct StateLock {
    stack: StackKey,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StateLock {
    pub fn new(stack: StackKey, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stack,
            release: Some(Box::new(release)),
        }
    }

    pub fn stack(&self) -> &StackKey {
        &self.stack
    }
}

impl fmt::Debug for StateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLock").field("stack", &self.stack).finish()
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            log::debug!("Released state lock on {}", self.stack);
        }
    }
}

/// Persistence of applied resources, one record per resource
///
/// `save` and `remove` are called once per finished step, possibly from
/// several workers at once, so a crash mid-operation leaves state
/// consistent with what was actually done.
pub trait StateStore: Send + Sync {
    /// Recorded resources of a stack; empty when nothing was applied yet
    fn load(&self, stack: &StackKey) -> Result<Vec<Resource>>;

    /// Take the stack's exclusive lock, failing at once if it is held
    fn lock(&self, stack: &StackKey) -> Result<StateLock>;

    /// Insert or replace one resource record
    fn save(&self, stack: &StackKey, resource: &Resource) -> Result<()>;

    /// Drop one resource record; removing an absent record is not an error
    fn remove(&self, stack: &StackKey, id: &str) -> Result<()>;
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything recorded for one stack
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Bumped on every mutation
    pub serial: u64,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            serial: 0,
            resources: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl StateSnapshot {
    pub fn upsert(&mut self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
        self.touch();
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.resources.remove(id).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Records in ascending ID order
    pub fn to_resources(&self) -> Vec<Resource> {
        self.resources.values().cloned().collect()
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Thread-safe state store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshots: Mutex<HashMap<StackKey, StateSnapshot>>,
    locks: Arc<Mutex<HashSet<StackKey>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stack with already-applied resources
    pub fn with_resources(self, stack: &StackKey, resources: Vec<Resource>) -> Self {
        {
            let mut snapshots = lock_recover(&self.snapshots);
            let snapshot = snapshots.entry(stack.clone()).or_default();
            for resource in resources {
                snapshot.upsert(resource);
            }
        }
        self
    }

    /// Copy of a stack's current snapshot
    pub fn snapshot(&self, stack: &StackKey) -> Option<StateSnapshot> {
        lock_recover(&self.snapshots).get(stack).cloned()
    }

    pub fn is_locked(&self, stack: &StackKey) -> bool {
        lock_recover(&self.locks).contains(stack)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, stack: &StackKey) -> Result<Vec<Resource>> {
        Ok(lock_recover(&self.snapshots)
            .get(stack)
            .map(StateSnapshot::to_resources)
            .unwrap_or_default())
    }

    fn lock(&self, stack: &StackKey) -> Result<StateLock> {
        if !lock_recover(&self.locks).insert(stack.clone()) {
            bail!("state of {stack} is locked by another operation");
        }
        let locks = Arc::clone(&self.locks);
        let key = stack.clone();
        Ok(StateLock::new(stack.clone(), move || {
            lock_recover(&locks).remove(&key);
        }))
    }

    fn save(&self, stack: &StackKey, resource: &Resource) -> Result<()> {
        lock_recover(&self.snapshots)
            .entry(stack.clone())
            .or_default()
            .upsert(resource.clone());
        Ok(())
    }

    fn remove(&self, stack: &StackKey, id: &str) -> Result<()> {
        if let Some(snapshot) = lock_recover(&self.snapshots).get_mut(stack) {
            snapshot.remove(id);
        }
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

/// State store writing one JSON snapshot per stack
///
/// Layout: `<root>/<project>/<stack>/state.json`, with `state.lock` next to
/// it while an operation holds the stack.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    // Serialises read-modify-write cycles from concurrent workers
    write: Mutex<()>,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write: Mutex::new(()),
        }
    }

    fn stack_dir(&self, stack: &StackKey) -> PathBuf {
        self.root.join(&stack.project).join(&stack.stack)
    }

    /// Path of a stack's snapshot file
    pub fn state_file(&self, stack: &StackKey) -> PathBuf {
        self.stack_dir(stack).join("state.json")
    }

    fn lock_file(&self, stack: &StackKey) -> PathBuf {
        self.stack_dir(stack).join("state.lock")
    }

    /// Load a snapshot, or return an empty one if the file doesn't exist
    pub fn read_snapshot(&self, stack: &StackKey) -> Result<StateSnapshot> {
        let path = self.state_file(stack);
        if !path.exists() {
            log::debug!("No state file for {stack}, starting empty");
            return Ok(StateSnapshot::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let snapshot: StateSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        Ok(snapshot)
    }

    fn write_snapshot(&self, stack: &StackKey, snapshot: &StateSnapshot) -> Result<()> {
        let dir = self.stack_dir(stack);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let path = self.state_file(stack);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize state to JSON")?;
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;

        log::debug!("Saved state of {stack} (serial {})", snapshot.serial);
        Ok(())
    }

    fn update(&self, stack: &StackKey, change: impl FnOnce(&mut StateSnapshot)) -> Result<()> {
        let _guard = lock_recover(&self.write);
        let mut snapshot = self.read_snapshot(stack)?;
        change(&mut snapshot);
        self.write_snapshot(stack, &snapshot)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, stack: &StackKey) -> Result<Vec<Resource>> {
        Ok(self.read_snapshot(stack)?.to_resources())
    }

    fn lock(&self, stack: &StackKey) -> Result<StateLock> {
        let dir = self.stack_dir(stack);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let path = self.lock_file(stack);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("state of {stack} is locked ({})", path.display()))?;

        Ok(StateLock::new(stack.clone(), move || remove_lock_file(&path)))
    }

    fn save(&self, stack: &StackKey, resource: &Resource) -> Result<()> {
        self.update(stack, |snapshot| snapshot.upsert(resource.clone()))
    }

    fn remove(&self, stack: &StackKey, id: &str) -> Result<()> {
        self.update(stack, |snapshot| {
            snapshot.remove(id);
        })
    }
}

fn remove_lock_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Could not remove lock file {}: {e}", path.display());
    }
}
