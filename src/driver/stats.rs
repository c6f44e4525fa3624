//! Capacity aggregation
//!
//! Sums the capacity of every (virtual pool, virtual array) pair used by
//! the project's volumes.

use crate::client::ControllerClient;
use crate::domain::model::{Volume, VpoolCapacity};
use crate::domain::ports::{Protocol, VolumeStats};
use crate::error::Result;
use futures::future::try_join_all;
use std::collections::BTreeSet;

/// Vendor reported in capacity stats
pub const VENDOR_NAME: &str = "CoprHD";

/// Aggregated capacity in gigabytes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapacityTotals {
    pub free_gb: f64,
    pub total_gb: f64,
    pub reserved_percentage: f64,
}

/// Distinct (vpool, varray) pairs of active volumes, in id order
pub fn vpool_varray_pairs(volumes: &[Volume]) -> BTreeSet<(String, String)> {
    volumes
        .iter()
        .filter(|v| !v.inactive)
        .filter_map(|v| match (&v.vpool, &v.varray) {
            (Some(vpool), Some(varray)) => Some((vpool.id.clone(), varray.id.clone())),
            _ => None,
        })
        .collect()
}

/// total = free + used; reserved = provisioned share of total
pub fn aggregate(capacities: &[VpoolCapacity]) -> CapacityTotals {
    let free: f64 = capacities.iter().map(|c| c.free_gb).sum();
    let used: f64 = capacities.iter().map(|c| c.used_gb).sum();
    let provisioned: f64 = capacities.iter().map(|c| c.provisioned_gb).sum();
    let total = free + used;
    CapacityTotals {
        free_gb: free,
        total_gb: total,
        reserved_percentage: if total > 0.0 {
            100.0 * provisioned / total
        } else {
            0.0
        },
    }
}

/// Fetch the capacity of every pair concurrently and sum it
pub async fn collect(client: &ControllerClient, volumes: &[Volume]) -> Result<CapacityTotals> {
    let pairs = vpool_varray_pairs(volumes);
    let capacities = try_join_all(
        pairs
            .iter()
            .map(|(vpool, varray)| async move { client.vpools().capacity(vpool, varray).await }),
    )
    .await?;
    Ok(aggregate(&capacities))
}

/// Merge totals over the fixed backend descriptor
pub fn volume_stats(backend_name: &str, protocol: Protocol, totals: CapacityTotals) -> VolumeStats {
    VolumeStats {
        volume_backend_name: backend_name.to_string(),
        vendor_name: VENDOR_NAME.to_string(),
        driver_version: crate::VERSION.to_string(),
        storage_protocol: protocol.storage_protocol().to_string(),
        free_capacity_gb: totals.free_gb,
        total_capacity_gb: totals.total_gb,
        reserved_percentage: totals.reserved_percentage,
        consistencygroup_support: true,
    }
}
