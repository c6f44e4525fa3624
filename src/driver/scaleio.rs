//! ScaleIO attachment data, naming and sizing

use crate::config::ScaleIoGatewayConfig;
use crate::domain::ports::{Connector, ScaleIoConnection};
use std::collections::BTreeMap;

/// Longest volume name ScaleIO accepts
pub const MAX_NAME_LEN: usize = 31;

/// ScaleIO allocates in 8 GB units
pub const SIZE_GRANULARITY_GB: u64 = 8;

/// Extra spec with the IOPS limit for the SDC mapping
pub const IOPS_LIMIT_SPEC: &str = "maxIOPS";

/// Extra spec with the bandwidth limit (KB/s) for the SDC mapping
pub const BANDWIDTH_LIMIT_SPEC: &str = "maxBWS";

/// Round up to the next multiple of 8 GB, never below 8
pub fn round_size_gb(size_gb: u64) -> u64 {
    size_gb
        .div_ceil(SIZE_GRANULARITY_GB)
        .max(1)
        .checked_mul(SIZE_GRANULARITY_GB)
        .unwrap_or(u64::MAX - u64::MAX % SIZE_GRANULARITY_GB)
}

/// Keep names within 31 characters: 25 of the name, a dash, 5 of the id
pub fn truncate_name(name: &str, id: &str) -> String {
    if name.chars().count() <= MAX_NAME_LEN {
        return name.to_string();
    }
    let prefix: String = name.chars().take(25).collect();
    let suffix: String = id.chars().take(5).collect();
    format!("{}-{}", prefix, suffix)
}

pub fn connection_info(
    volume_name: &str,
    connector: &Connector,
    gateway: &ScaleIoGatewayConfig,
    token: Option<String>,
    extra_specs: Option<&BTreeMap<String, String>>,
) -> ScaleIoConnection {
    let limit = |key: &str| {
        extra_specs
            .and_then(|specs| specs.get(key))
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    ScaleIoConnection {
        scaleIO_volname: volume_name.to_string(),
        hostIP: connector.ip.clone(),
        serverIP: gateway.host.clone(),
        serverPort: gateway.port,
        serverUsername: gateway.username.clone(),
        serverPassword: gateway.password.clone(),
        serverToken: token,
        iopsLimit: limit(IOPS_LIMIT_SPEC),
        bandwidthLimit: limit(BANDWIDTH_LIMIT_SPEC),
    }
}
