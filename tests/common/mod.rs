//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use hcloud_reconcile::config::{ConfigParser, ResourceIntent, ResourceKind, ValidatedConfig};
use hcloud_reconcile::error::{ApiError, HcloudError, Result};
use hcloud_reconcile::hcloud::{CloudApi, Firewall, Network, RemoteObject, WireRule};

/// Which API call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Create,
    Read,
    Update,
    Delete,
}

/// In-memory stand-in for the Hetzner Cloud API.
///
/// Ids are shared across kinds, so reading an id with the wrong kind
/// returns the object as it is.
#[derive(Default)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
    on_create: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    objects: BTreeMap<u64, RemoteObject>,
    failures: VecDeque<(Call, Option<u16>)>,
    calls: Vec<Call>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `times` calls of `call` fail transiently with `status`.
    pub fn fail_next(&self, call: Call, times: usize, status: Option<u16>) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..times {
            inner.failures.push_back((call, status));
        }
    }

    /// Runs `hook` inside every create, before it returns.
    pub fn on_create(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_create.lock().unwrap() = Some(Box::new(hook));
    }

    /// Inserts an object as if it had been created out of band.
    pub fn seed(&self, intent: &ResourceIntent) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.objects.insert(id, to_remote(id, intent));
        id
    }

    /// Overwrites an object behind the engine's back.
    pub fn tamper(&self, id: u64, intent: &ResourceIntent) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(id, to_remote(id, intent));
    }

    pub fn object(&self, id: u64) -> Option<RemoteObject> {
        self.inner.lock().unwrap().objects.get(&id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().unwrap().objects.len()
    }

    pub fn calls(&self, call: Call) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    fn begin(&self, call: Call) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        if let Some(pos) = inner.failures.iter().position(|(c, _)| *c == call) {
            let (_, status) = inner.failures.remove(pos).unwrap();
            return Err(HcloudError::Api(ApiError::transient(status, "scripted failure")));
        }
        Ok(())
    }
}

fn not_found(kind: ResourceKind, id: u64) -> HcloudError {
    HcloudError::Api(ApiError::NotFound {
        kind: kind.to_string(),
        id,
    })
}

fn to_remote(id: u64, intent: &ResourceIntent) -> RemoteObject {
    match intent {
        ResourceIntent::Firewall(fw) => RemoteObject::Firewall(Firewall {
            id,
            name: fw.name.clone(),
            labels: fw.labels.clone(),
            rules: fw.rules.iter().map(WireRule::from).collect(),
            created: None,
        }),
        ResourceIntent::Network(net) => RemoteObject::Network(Network {
            id,
            name: net.name.clone(),
            labels: net.labels.clone(),
            ip_range: net.ip_range.to_string(),
            created: None,
        }),
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn create(&self, intent: &ResourceIntent) -> Result<RemoteObject> {
        self.begin(Call::Create)?;
        let object = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = inner.next_id;
            let object = to_remote(id, intent);
            inner.objects.insert(id, object.clone());
            object
        };
        if let Some(hook) = self.on_create.lock().unwrap().as_ref() {
            hook();
        }
        Ok(object)
    }

    async fn read(&self, kind: ResourceKind, id: u64) -> Result<RemoteObject> {
        self.begin(Call::Read)?;
        self.object(id).ok_or_else(|| not_found(kind, id))
    }

    async fn update(&self, id: u64, intent: &ResourceIntent) -> Result<RemoteObject> {
        self.begin(Call::Update)?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects.contains_key(&id) {
            return Err(not_found(intent.kind(), id));
        }
        let object = to_remote(id, intent);
        inner.objects.insert(id, object.clone());
        Ok(object)
    }

    async fn delete(&self, kind: ResourceKind, id: u64) -> Result<()> {
        self.begin(Call::Delete)?;
        self.inner
            .lock()
            .unwrap()
            .objects
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(kind, id))
    }
}

pub fn parse(yaml: &str) -> ValidatedConfig {
    ConfigParser::new().parse_document(yaml).unwrap()
}

/// The three-rule firewall used throughout the scenario tests.
///
/// Both tcp rules use `http_port`; the udp rule is fixed.
pub fn basic_firewall(http_port: u16) -> String {
    format!(
        r#"
settings:
  retry:
    max_attempts: 3
    base_delay_ms: 1
    max_delay_ms: 2
resources:
  - type: hcloud_firewall
    name: basic
    attributes:
      name: basic-firewall
      rules:
        - direction: in
          protocol: tcp
          port: "{http_port}"
          source_ips: ["0.0.0.0/0", "::/0"]
          description: allow http in
        - direction: out
          protocol: tcp
          port: "{http_port}"
          destination_ips: ["0.0.0.0/0", "::/0"]
          description: allow http out
        - direction: in
          protocol: udp
          port: any
          source_ips: ["0.0.0.0/0", "::/0"]
          description: allow udp in
"#
    )
}
