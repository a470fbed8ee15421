//! Volume Plugins
//!
//! Backends able to restore snapshots into volumes:
//! - hostPath: node-local directories
//! - glusterfs: GlusterFS snapshot clones
//! - openebs: OpenEBS clone volumes over iSCSI

pub mod glusterfs;
pub mod hostpath;
pub mod openebs;

pub use glusterfs::*;
pub use hostpath::*;
pub use openebs::*;

use crate::domain::ports::{volume_type, VolumePluginRef};
use crate::error::{Error, Result};
use crate::provisioner::PluginRegistry;
use std::sync::Arc;
use tracing::info;

/// Tags of every plugin this crate ships, in registration order
pub const BUILTIN_PLUGINS: [&str; 3] = [
    volume_type::GLUSTERFS,
    volume_type::HOST_PATH,
    volume_type::OPENEBS,
];

/// Factory for creating volume plugins
pub struct PluginFactory;

impl PluginFactory {
    /// Create a plugin by tag
    pub fn create(tag: &str, config: &PluginConfig) -> Result<VolumePluginRef> {
        match tag {
            volume_type::HOST_PATH => Ok(Arc::new(HostPathPlugin::new(config.hostpath.clone()))),
            volume_type::GLUSTERFS => Ok(Arc::new(GlusterPlugin::new(config.gluster.clone()))),
            volume_type::OPENEBS => Ok(Arc::new(OpenEbsPlugin::new(config.openebs.clone())?)),
            _ => Err(Error::Configuration(format!("unknown volume plugin {}", tag))),
        }
    }
}

/// Combined plugin configuration
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    pub hostpath: HostPathConfig,
    pub gluster: GlusterConfig,
    pub openebs: OpenEbsConfig,
}

/// Build the registry of all built-in plugins
pub fn build_registry(config: &PluginConfig) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    for tag in BUILTIN_PLUGINS {
        registry.register(tag, PluginFactory::create(tag, config)?)?;
        info!("Registered volume plugin: {}", tag);
    }
    Ok(registry)
}
