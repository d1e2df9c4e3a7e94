//! Engine: descriptor registries and layered configuration resolution
//!
//! The engine owns the immutable Namespace and PackageType descriptors and
//! the stage constructor table, all registered at startup. Volumes hold a
//! shared reference to the engine and resolve configuration through it.
//!
//! Lookup order for `get` (first hit wins):
//! 1. namespace.packagetype_overrides[packagetype][key]
//! 2. namespace.config[key]
//! 3. packagetype.config[key]
//! 4. the global configuration's `globals` map

use crate::config::FeedConfig;
use crate::error::{IngestError, Result};
use crate::namespace::Namespace;
use crate::packagetype::PackageType;
use crate::premis::EventConfig;
use crate::stage::{Stage, StageCtor, StageInfo};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Registered stage constructor plus the metadata the engine needs without
/// instantiating it
#[derive(Debug)]
pub struct StageEntry {
    pub identifier: &'static str,
    pub description: &'static str,
    pub info: StageInfo,
    ctor: StageCtor,
}

/// Engine context: configuration, database pool, and descriptor registries
#[derive(Debug)]
pub struct Engine {
    config: FeedConfig,
    pool: SqlitePool,
    namespaces: BTreeMap<String, Namespace>,
    packagetypes: BTreeMap<String, PackageType>,
    stages: BTreeMap<String, StageEntry>,
}

impl Engine {
    /// Build an engine with the built-in descriptors registered.
    /// Package types are validated against the stage registry and the
    /// PREMIS catalog as they are registered; problems are startup errors.
    pub fn new(config: FeedConfig, pool: SqlitePool) -> Result<Self> {
        let mut engine = Self {
            config,
            pool,
            namespaces: BTreeMap::new(),
            packagetypes: BTreeMap::new(),
            stages: BTreeMap::new(),
        };

        for ctor in crate::stages::builtins() {
            engine.register_stage(ctor)?;
        }
        for ns in crate::namespace::builtins() {
            engine.register_namespace(ns)?;
        }
        for pt in crate::packagetype::builtins() {
            engine.register_packagetype(pt)?;
        }

        Ok(engine)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a stage constructor. Duplicate identifiers are fatal.
    pub fn register_stage(&mut self, ctor: StageCtor) -> Result<()> {
        let instance = ctor();
        let entry = StageEntry {
            identifier: instance.identifier(),
            description: instance.description(),
            info: instance.stage_info(),
            ctor,
        };
        if self.stages.insert(entry.identifier.to_string(), entry).is_some() {
            return Err(IngestError::config(format!(
                "duplicate Stage identifier '{}'",
                instance.identifier()
            )));
        }
        Ok(())
    }

    /// Register a namespace descriptor. Duplicate identifiers are fatal.
    pub fn register_namespace(&mut self, ns: Namespace) -> Result<()> {
        let id = ns.identifier.clone();
        if self.namespaces.insert(id.clone(), ns).is_some() {
            return Err(IngestError::config(format!(
                "duplicate Namespace identifier '{}'",
                id
            )));
        }
        Ok(())
    }

    /// Register and validate a package type descriptor
    pub fn register_packagetype(&mut self, pt: PackageType) -> Result<()> {
        pt.validate(
            &|stage_id| self.stages.contains_key(stage_id),
            &|code| self.config.premis.contains_key(code),
        )?;
        let id = pt.identifier.clone();
        if self.packagetypes.insert(id.clone(), pt).is_some() {
            return Err(IngestError::config(format!(
                "duplicate PackageType identifier '{}'",
                id
            )));
        }
        Ok(())
    }

    pub fn namespace(&self, identifier: &str) -> Result<&Namespace> {
        self.namespaces
            .get(identifier)
            .ok_or_else(|| IngestError::unknown_subclass("Namespace", identifier))
    }

    pub fn packagetype(&self, identifier: &str) -> Result<&PackageType> {
        self.packagetypes
            .get(identifier)
            .ok_or_else(|| IngestError::unknown_subclass("PackageType", identifier))
    }

    /// Instantiate a stage by identifier
    pub fn stage(&self, identifier: &str) -> Result<Box<dyn Stage>> {
        self.stages
            .get(identifier)
            .map(|entry| (entry.ctor)())
            .ok_or_else(|| IngestError::unknown_subclass("Stage", identifier))
    }

    /// Declared transitions for a stage, without instantiating it
    pub fn stage_info(&self, identifier: &str) -> Result<StageInfo> {
        self.stages
            .get(identifier)
            .map(|entry| entry.info)
            .ok_or_else(|| IngestError::unknown_subclass("Stage", identifier))
    }

    /// Registered namespaces in identifier order
    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Registered package types in identifier order
    pub fn packagetypes(&self) -> impl Iterator<Item = &PackageType> {
        self.packagetypes.values()
    }

    /// Registered stages in identifier order
    pub fn stage_entries(&self) -> impl Iterator<Item = &StageEntry> {
        self.stages.values()
    }

    /// Whether a status is terminal for the scheduler
    pub fn is_release_state(&self, status: &str) -> bool {
        self.config
            .daemon
            .release_states
            .iter()
            .any(|s| s == status)
    }

    /// Layered configuration lookup; see the module docs for the order
    pub fn get(&self, namespace: &str, pkg_type: &str, key: &str) -> Result<Value> {
        let ns = self.namespace(namespace)?;
        let pt = self.packagetype(pkg_type)?;

        if let Some(value) = ns
            .packagetype_overrides
            .get(pkg_type)
            .and_then(|layer| layer.get(key))
        {
            return Ok(value.clone());
        }
        if let Some(value) = ns.config.get(key) {
            return Ok(value.clone());
        }
        if let Some(value) = pt.config.get(key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.config.globals.get(key) {
            return Ok(value.clone());
        }

        Err(IngestError::missing_field(format!(
            "config key '{}' for {}/{}",
            key, namespace, pkg_type
        )))
    }

    /// Merged validator parameters for one validator, lowest to highest
    /// priority: package type, namespace, namespace-per-package-type.
    /// Higher layers override individual parameters without dropping
    /// sibling keys.
    pub fn get_validation_overrides(
        &self,
        namespace: &str,
        pkg_type: &str,
        validator: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let ns = self.namespace(namespace)?;
        let pt = self.packagetype(pkg_type)?;

        let mut merged = BTreeMap::new();
        for layer in [
            pt.validation.get(validator),
            ns.validation.get(validator),
            ns.packagetype_validation
                .get(pkg_type)
                .and_then(|by_validator| by_validator.get(validator)),
        ]
        .into_iter()
        .flatten()
        {
            for (param, value) in layer {
                merged.insert(param.clone(), value.clone());
            }
        }

        Ok(merged)
    }

    /// Event configuration for a code: global catalog overlaid by the
    /// package type's overrides, then the namespace's.
    pub fn event_configuration(
        &self,
        namespace: &str,
        pkg_type: &str,
        code: &str,
    ) -> Result<EventConfig> {
        let ns = self.namespace(namespace)?;
        let pt = self.packagetype(pkg_type)?;

        let merged = pt.get_event_configuration(code, &self.config.premis)?;
        Ok(match ns.premis_overrides.get(code) {
            Some(over) => merged.merged_with(over),
            None => merged,
        })
    }

    /// Ordered stage identifiers from a start status to a terminal state,
    /// following each stage's declared success state.
    pub fn stage_sequence(&self, pkg_type: &str, start_status: &str) -> Result<Vec<String>> {
        let pt = self.packagetype(pkg_type)?;
        let mut sequence = Vec::new();
        let mut visited = std::collections::BTreeSet::new();
        let mut status = start_status.to_string();

        while let Some(stage_id) = pt.stage_map.get(&status) {
            if !visited.insert(status.clone()) {
                return Err(IngestError::config(format!(
                    "stage map of {} cycles at status '{}'",
                    pkg_type, status
                )));
            }
            sequence.push(stage_id.clone());
            status = self.stage_info(stage_id)?.success_state.to_string();
        }

        Ok(sequence)
    }
}
