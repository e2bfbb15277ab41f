/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! In-memory collaborators, for tests and for the command line tool.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::{
    error::{Error, Result},
    ids::{CacheId, OrgId, RuleKey, RuleUid},
    image::Image,
    rule::AlertRule,
    store::{
        AlertInstance, AnnotationItem, AnnotationsRepository, DashboardService, ImageService,
        InstanceStore, RuleStore, Services,
    },
};

type InstanceKey = (OrgId, RuleUid, CacheId);

/// Rule and instance store. Writes and reads can be made to fail.
#[derive(Default)]
pub struct MemoryStore {
    rules: RwLock<BTreeMap<OrgId, BTreeMap<RuleUid, AlertRule>>>,
    instances: RwLock<BTreeMap<InstanceKey, AlertInstance>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

#[derive(Default)]
pub struct MemoryAnnotations {
    items: Mutex<Vec<AnnotationItem>>,
    fail: AtomicBool,
}

#[derive(Default)]
pub struct MemoryDashboards {
    dashboards: RwLock<BTreeMap<(OrgId, String), i64>>,
    latency: Option<Duration>,
}

/// Issues a fresh token for every capture without rendering anything.
#[derive(Default)]
pub struct StaticImageService {
    captures: AtomicUsize,
    fail: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.rules
            .write()
            .entry(rule.org_id)
            .or_default()
            .insert(rule.uid.clone(), rule);
    }

    pub fn add_instance(&self, instance: AlertInstance) {
        self.instances.write().insert(instance_key(&instance), instance);
    }

    pub fn instances(&self) -> Vec<AlertInstance> {
        self.instances.read().values().cloned().collect()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        match self.fail_reads.load(Ordering::SeqCst) {
            true => Err(Error::Storage("read failure injected".to_string())),
            false => Ok(()),
        }
    }

    fn check_write(&self) -> Result<()> {
        match self.fail_writes.load(Ordering::SeqCst) {
            true => Err(Error::Storage("write failure injected".to_string())),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_alert_rules(&self, org_id: OrgId) -> Result<Vec<AlertRule>> {
        self.check_read()?;
        Ok(self
            .rules
            .read()
            .get(&org_id)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn fetch_org_ids(&self) -> Result<Vec<OrgId>> {
        self.check_read()?;
        let orgs = self
            .instances
            .read()
            .keys()
            .map(|(org_id, _, _)| *org_id)
            .chain(self.rules.read().keys().copied())
            .collect::<BTreeSet<_>>();
        Ok(orgs.into_iter().collect())
    }

    async fn list_alert_instances(&self, org_id: OrgId) -> Result<Vec<AlertInstance>> {
        self.check_read()?;
        Ok(self
            .instances
            .read()
            .values()
            .filter(|instance| instance.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn save_alert_instance(&self, instance: AlertInstance) -> Result<()> {
        self.check_write()?;
        self.add_instance(instance);
        Ok(())
    }

    async fn delete_alert_instance(
        &self,
        org_id: OrgId,
        rule_uid: &RuleUid,
        labels_hash: &CacheId,
    ) -> Result<()> {
        self.check_write()?;
        self.instances
            .write()
            .remove(&(org_id, rule_uid.clone(), labels_hash.clone()));
        Ok(())
    }

    async fn delete_alert_instances_by_rule(&self, key: &RuleKey) -> Result<()> {
        self.check_write()?;
        self.instances
            .write()
            .retain(|(org_id, rule_uid, _), _| *org_id != key.org_id || *rule_uid != key.uid);
        Ok(())
    }
}

impl MemoryAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<AnnotationItem> {
        self.items.lock().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnnotationsRepository for MemoryAnnotations {
    async fn save(&self, item: AnnotationItem) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Annotation("failure injected".to_string()));
        }
        self.items.lock().push(item);
        Ok(())
    }
}

impl MemoryDashboards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups take this long.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn add<T: Into<String>>(&self, org_id: OrgId, uid: T, id: i64) {
        self.dashboards.write().insert((org_id, uid.into()), id);
    }
}

#[async_trait]
impl DashboardService for MemoryDashboards {
    async fn get_dashboard_id(&self, org_id: OrgId, uid: &str) -> Result<i64> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.dashboards
            .read()
            .get(&(org_id, uid.to_string()))
            .copied()
            .ok_or_else(|| Error::DashboardNotFound(uid.to_string()))
    }
}

impl StaticImageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images take this long to capture.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageService for StaticImageService {
    async fn new_image(&self, rule: &AlertRule) -> Result<Image> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Image(format!("failed to render {}", rule.key())));
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        let token = uuid::Uuid::new_v4().to_string();
        Ok(Image {
            path: Some(format!("/images/{token}.png")),
            token,
            url: None,
            created_at: Utc::now(),
        })
    }
}

impl Services {
    /// Services backed by a single memory store.
    pub fn memory(
        store: Arc<MemoryStore>,
        images: Arc<dyn ImageService>,
        annotations: Arc<MemoryAnnotations>,
        dashboards: Arc<MemoryDashboards>,
    ) -> Self {
        Self {
            rules: store.clone(),
            instances: store,
            images,
            annotations,
            dashboards,
        }
    }
}

fn instance_key(instance: &AlertInstance) -> InstanceKey {
    (
        instance.org_id,
        instance.rule_uid.clone(),
        instance.labels_hash.clone(),
    )
}
