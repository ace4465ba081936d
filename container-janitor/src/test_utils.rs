//! An in-memory engine, for exercising the janitor without a Docker daemon.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::engine::{ContainerRef, EngineError, EngineGateway, Endpoint, RemoveOptions};
use crate::labels::LabelPredicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Connect,
    Ping,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle(u64);

#[derive(Default)]
struct State {
    // Ordered by id so discovery results are deterministic.
    containers: BTreeMap<String, HashMap<String, String>>,
    faults: HashMap<Fault, u32>,
    removal_failures: HashMap<String, EngineError>,
    panics: HashSet<Fault>,
    next_handle: u64,
    live_handles: Vec<u64>,
    connect_attempts: u32,
    released_handles: u32,
    list_calls: Vec<LabelPredicate>,
    remove_options: Vec<RemoveOptions>,
}

impl State {
    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<State>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("poisoned memory engine")
    }

    pub fn add_container(&self, id: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().containers.insert(id.to_owned(), labels);
    }

    /// Makes the next `times` calls of the given kind fail.
    pub fn inject(&self, fault: Fault, times: u32) {
        self.state().faults.insert(fault, times);
    }

    /// Makes every removal of `id` fail with `error`, leaving the container in place.
    pub fn fail_removal(&self, id: &str, error: EngineError) {
        self.state().removal_failures.insert(id.to_owned(), error);
    }

    /// Makes every call of the given kind panic.
    pub fn panic_on(&self, fault: Fault) {
        self.state().panics.insert(fault);
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    pub fn live_handles(&self) -> usize {
        self.state().live_handles.len()
    }

    pub fn released_handles(&self) -> u32 {
        self.state().released_handles
    }

    pub fn list_calls(&self) -> Vec<LabelPredicate> {
        self.state().list_calls.clone()
    }

    pub fn remove_calls(&self) -> usize {
        self.state().remove_options.len()
    }

    pub fn remove_options(&self) -> Vec<RemoveOptions> {
        self.state().remove_options.clone()
    }
}

#[async_trait]
impl EngineGateway for MemoryEngine {
    type Handle = MemoryHandle;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MemoryHandle, EngineError> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.panics.contains(&Fault::Connect) {
            drop(state);
            panic!("engine client blew up while connecting");
        }
        if state.take_fault(Fault::Connect) {
            return Err(EngineError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_owned(),
            });
        }

        state.next_handle += 1;
        let id = state.next_handle;
        state.live_handles.push(id);
        Ok(MemoryHandle(id))
    }

    async fn ping(&self, _handle: &MemoryHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.panics.contains(&Fault::Ping) {
            drop(state);
            panic!("engine client blew up while pinging");
        }
        if state.take_fault(Fault::Ping) {
            return Err(EngineError::Ping("engine is starting".to_owned()));
        }
        Ok(())
    }

    async fn list_containers(
        &self,
        _handle: &MemoryHandle,
        predicate: &LabelPredicate,
        _include_stopped: bool,
    ) -> Result<Vec<ContainerRef>, EngineError> {
        let mut state = self.state();
        state.list_calls.push(predicate.clone());
        if state.panics.contains(&Fault::List) {
            drop(state);
            panic!("engine client blew up while listing");
        }
        if state.take_fault(Fault::List) {
            return Err(EngineError::List("engine returned 500".to_owned()));
        }

        Ok(state
            .containers
            .iter()
            .filter(|(_, labels)| predicate.matches(labels))
            .map(|(id, _)| ContainerRef::new(id.clone()))
            .collect())
    }

    async fn remove_container(
        &self,
        _handle: &MemoryHandle,
        container: &ContainerRef,
        options: RemoveOptions,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        state.remove_options.push(options);
        if let Some(error) = state.removal_failures.get(container.id()) {
            return Err(error.clone());
        }

        match state.containers.remove(container.id()) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(container.to_string())),
        }
    }

    async fn release(&self, handle: MemoryHandle) {
        let mut state = self.state();
        state.live_handles.retain(|id| *id != handle.0);
        state.released_handles += 1;
    }
}
