//! Fibre Channel attachment data
//!
//! Connector WWNs are registered upper case with a colon every two hex
//! digits; target WWNs are handed back bare and lower case.

use crate::domain::model::Itl;
use crate::domain::ports::{Connector, FcConnection, FcZoning};
use crate::error::{Error, Result};
use crate::export::InitiatorSpec;
use std::collections::BTreeMap;

/// `10000000c9a11111` -> `10:00:00:00:C9:A1:11:11`
pub fn format_wwn(wwn: &str) -> String {
    let hex: Vec<char> = wwn
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    hex.chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// `50:06:01:60:...:A8` -> `50060160...a8`
pub fn bare_wwn(wwn: &str) -> String {
    wwn.replace(':', "").to_lowercase()
}

/// One initiator per WWPN, paired with the WWNN at the same position
pub fn initiators(connector: &Connector) -> Result<Vec<InitiatorSpec>> {
    if connector.wwpns.is_empty() {
        return Err(Error::InvalidInput(format!(
            "connector of {} has no FC port WWNs",
            connector.host
        )));
    }
    Ok(connector
        .wwpns
        .iter()
        .enumerate()
        .map(|(i, wwpn)| InitiatorSpec {
            port: format_wwn(wwpn),
            node: connector.wwnns.get(i).map(|n| format_wwn(n)),
        })
        .collect())
}

/// Distinct target WWNs in server order
pub fn target_wwns(itls: &[Itl]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for itl in itls {
        let wwn = bare_wwn(&itl.target.port);
        if !targets.contains(&wwn) {
            targets.push(wwn);
        }
    }
    targets
}

/// Every connector WWPN maps to the full target list
pub fn initiator_target_map(connector: &Connector, targets: &[String]) -> BTreeMap<String, Vec<String>> {
    connector
        .wwpns
        .iter()
        .map(|wwpn| (wwpn.clone(), targets.to_vec()))
        .collect()
}

pub fn connection_info(itls: &[Itl], connector: &Connector, volume_id: &str) -> Result<FcConnection> {
    let first = itls
        .iter()
        .find(|itl| itl.hlu >= 0)
        .ok_or_else(|| Error::Internal(format!("no LUN assigned for volume {}", volume_id)))?;
    let targets = target_wwns(itls);
    Ok(FcConnection {
        target_discovered: false,
        target_lun: first.hlu,
        initiator_target_map: initiator_target_map(connector, &targets),
        target_wwn: targets,
        volume_id: volume_id.to_string(),
    })
}

/// Zoning data for the last volume leaving the host
pub fn zoning(itls: &[Itl], connector: &Connector) -> FcZoning {
    let targets = target_wwns(itls);
    FcZoning {
        initiator_target_map: initiator_target_map(connector, &targets),
        target_wwn: targets,
    }
}
