//! In-crate fakes for engine tests

use anyhow::{Result, bail};
use intent::{Attributes, Resource, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::runtime::{ApplyRequest, Runtime};
use crate::state::{MemoryStateStore, StackKey, StateLock, StateStore};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A runtime call as the fake saw it
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Apply {
        id: String,
        dry_run: bool,
        attributes: Attributes,
        provider: Option<String>,
    },
    Read {
        id: String,
    },
    Delete {
        id: String,
    },
}

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Runtime that echoes planned attributes and fails on request
#[derive(Default)]
pub struct ScriptedRuntime {
    failures: HashMap<String, String>,
    outputs: HashMap<String, Attributes>,
    live: HashMap<String, Attributes>,
    delay: Duration,
    on_apply: Option<Hook>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct Flight<'a>(&'a AtomicUsize);

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for `id` fail with `message`
    pub fn fail(mut self, id: &str, message: &str) -> Self {
        self.failures.insert(id.to_string(), message.to_string());
        self
    }

    /// Add a computed attribute to what `apply` returns for `id`
    pub fn output(mut self, id: &str, key: &str, value: impl Into<Value>) -> Self {
        self.outputs
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    /// What `read` reports for `id`; unknown IDs read as gone
    pub fn live(mut self, id: &str, attributes: Attributes) -> Self {
        self.live.insert(id.to_string(), attributes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `hook` with the resource ID at the start of every apply
    pub fn on_apply(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_apply = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        locked(&self.calls).clone()
    }

    /// IDs of real (not dry-run) applies in call order
    pub fn applied(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Apply { id, dry_run: false, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Attributes the last apply of `id` was called with
    pub fn applied_attributes(&self, id: &str) -> Option<Attributes> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::Apply { id: called, attributes, .. } if called == id => Some(attributes),
            _ => None,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, call: Call) -> Flight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        locked(&self.calls).push(call);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Flight(&self.in_flight)
    }

    fn check(&self, id: &str) -> Result<()> {
        if let Some(message) = self.failures.get(id) {
            bail!("{message}");
        }
        Ok(())
    }
}

impl Runtime for ScriptedRuntime {
    fn apply(&self, request: &ApplyRequest<'_>) -> Result<Attributes> {
        let id = request.planned.id.as_str();
        let _flight = self.enter(Call::Apply {
            id: id.to_string(),
            dry_run: request.dry_run,
            attributes: request.planned.attributes.clone(),
            provider: request.provider.map(|p| p.source.clone()),
        });
        if let Some(hook) = &self.on_apply {
            hook(id);
        }
        self.check(id)?;

        let mut live = request.planned.attributes.clone();
        if let Some(extra) = self.outputs.get(id) {
            live.extend(extra.clone());
        }
        Ok(live)
    }

    fn read(&self, resource: &Resource, _provider: Option<&ProviderConfig>) -> Result<Option<Attributes>> {
        let _flight = self.enter(Call::Read {
            id: resource.id.clone(),
        });
        self.check(&resource.id)?;
        Ok(self.live.get(&resource.id).cloned())
    }

    fn delete(&self, resource: &Resource, _provider: Option<&ProviderConfig>) -> Result<()> {
        let _flight = self.enter(Call::Delete {
            id: resource.id.clone(),
        });
        self.check(&resource.id)
    }
}

/// Memory store whose `save` fails for chosen resources
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStateStore,
    pub failing_saves: HashSet<String>,
}

impl StateStore for FlakyStore {
    fn load(&self, stack: &StackKey) -> Result<Vec<Resource>> {
        self.inner.load(stack)
    }

    fn lock(&self, stack: &StackKey) -> Result<StateLock> {
        self.inner.lock(stack)
    }

    fn save(&self, stack: &StackKey, resource: &Resource) -> Result<()> {
        if self.failing_saves.contains(&resource.id) {
            bail!("disk full");
        }
        self.inner.save(stack, resource)
    }

    fn remove(&self, stack: &StackKey, id: &str) -> Result<()> {
        self.inner.remove(stack, id)
    }
}
