//! Helpers shared by every transport: controller-side naming, virtual pool
//! selection, tags, and size conversions. Also holds deletion of volumes by
//! name, used by the CLI.

use crate::client::ControllerClient;
use crate::domain::model::{TagChanges, Task};
use crate::domain::ports::{Protocol, VolumeRef, VolumeType};
use crate::driver::scaleio;
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::task::TaskWaiter;
use std::future::Future;
use tracing::{error, info};

/// Extra spec naming the controller virtual pool of a volume type
pub const VPOOL_EXTRA_SPEC: &str = "CoprHD:VPOOL";

/// Namespace of the tags the driver owns
pub const TAG_PREFIX: &str = "OpenStack:";

/// Longest name the controller accepts
pub const MAX_NAME_LEN: usize = 128;

const GIB: u64 = 1 << 30;

pub fn gib_to_bytes(size_gb: u64) -> u64 {
    size_gb.saturating_mul(GIB)
}

/// Parse a human size (`10G`, `512Mi`, `1Ti`, plain bytes) into bytes
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num_str, unit_str) = (&s[..num_end], s[num_end..].trim());

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => GIB,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        _ => return Err(Error::CapacityParse(format!("unknown unit: {}", unit_str))),
    };

    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::CapacityParse(format!("capacity out of range: {}", s)));
    }
    Ok(bytes as u64)
}

/// Whole gigabytes needed to hold `bytes`
pub fn bytes_to_gib_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

/// Controller name for a cloud resource: the display name when set, else
/// the name, shortened to what the transport's backend accepts.
pub fn resource_name(protocol: Protocol, id: &str, name: &str, display_name: Option<&str>) -> String {
    let base = display_name.filter(|d| !d.trim().is_empty()).unwrap_or(name);
    match protocol {
        Protocol::ScaleIo => scaleio::truncate_name(base, id),
        _ => base.chars().take(MAX_NAME_LEN).collect(),
    }
}

pub fn volume_name(protocol: Protocol, volume: &VolumeRef) -> String {
    resource_name(protocol, &volume.id, &volume.name, volume.display_name.as_deref())
}

/// Virtual pool name configured for a volume type
pub fn vpool_name(volume_type: Option<&VolumeType>) -> Result<String> {
    let volume_type =
        volume_type.ok_or_else(|| Error::InvalidInput("volume has no volume type".into()))?;
    Ok(volume_type
        .extra_specs
        .get(VPOOL_EXTRA_SPEC)
        .cloned()
        .unwrap_or_else(|| volume_type.name.clone()))
}

/// Tags describing the cloud-side volume
pub fn volume_tags(volume: &VolumeRef) -> Vec<String> {
    let mut tags = vec![
        format!("{}id:{}", TAG_PREFIX, volume.id),
        format!("{}name:{}", TAG_PREFIX, volume.name),
    ];
    if let Some(display_name) = volume.display_name.as_deref().filter(|d| !d.is_empty()) {
        tags.push(format!("{}display_name:{}", TAG_PREFIX, display_name));
    }
    if let Some(volume_type) = &volume.volume_type {
        tags.push(format!("{}volume_type:{}", TAG_PREFIX, volume_type.name));
    }
    for (key, value) in &volume.metadata {
        tags.push(format!("{}{}:{}", TAG_PREFIX, key, value));
    }
    tags
}

/// Replace every driver-owned tag with the current set
pub fn tag_changes(existing: &[String], volume: &VolumeRef) -> TagChanges {
    TagChanges {
        add: volume_tags(volume),
        remove: existing
            .iter()
            .filter(|t| t.starts_with(TAG_PREFIX))
            .cloned()
            .collect(),
    }
}

/// Deactivate volumes of a project by name; several names go out as one
/// bulk request. Waiting is only supported for a single volume.
pub async fn delete_volumes(
    client: &ControllerClient,
    resolver: &Resolver,
    waiter: &TaskWaiter,
    project_id: &str,
    names: &[String],
    sync: bool,
) -> Result<Vec<Task>> {
    if names.len() > 1 && sync {
        return Err(Error::InvalidInput(
            "synchronous deletion of several volumes is not supported".into(),
        ));
    }

    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(resolver.volume_id(project_id, name).await?);
    }

    let tasks = match ids.as_slice() {
        [] => return Ok(Vec::new()),
        [id] => client.volumes().deactivate(id).await?,
        _ => client.volumes().deactivate_bulk(&ids).await?,
    };
    info!("Deleting volumes {}", names.join(", "));

    if sync {
        waiter.wait_all_ready(&tasks).await
    } else {
        Ok(tasks)
    }
}

/// Run a facade operation, wrapping any failure with its context
pub async fn guarded<T, F>(operation: &str, resource: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    fut.await.map_err(|e| {
        error!("{} failed for {}: {}", operation, resource, e);
        Error::backend(operation, resource, e)
    })
}
