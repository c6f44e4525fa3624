//! iSCSI attachment data

use crate::domain::model::Itl;
use crate::domain::ports::{Connector, IscsiConnection};
use crate::error::{Error, Result};
use crate::export::InitiatorSpec;

/// Default iSCSI portal port
pub const DEFAULT_PORTAL_PORT: u16 = 3260;

/// The connector's IQN is the only initiator
pub fn initiators(connector: &Connector) -> Result<Vec<InitiatorSpec>> {
    let iqn = connector
        .initiator
        .as_deref()
        .filter(|i| !i.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("connector of {} has no iSCSI initiator", connector.host)))?;
    Ok(vec![InitiatorSpec::port(iqn)])
}

/// Target, portal and LUN from the first ITL with an assigned LUN
pub fn connection_info(itls: &[Itl], volume_id: &str) -> Result<IscsiConnection> {
    let itl = itls
        .iter()
        .find(|itl| itl.hlu >= 0)
        .ok_or_else(|| Error::Internal(format!("no LUN assigned for volume {}", volume_id)))?;
    let ip = itl.target.ip_address.as_deref().ok_or_else(|| {
        Error::Internal(format!("iSCSI target {} has no IP address", itl.target.port))
    })?;

    Ok(IscsiConnection {
        target_discovered: false,
        target_iqn: itl.target.port.clone(),
        target_portal: format!("{}:{}", ip, itl.target.tcp_port.unwrap_or(DEFAULT_PORTAL_PORT)),
        target_lun: itl.hlu,
        volume_id: volume_id.to_string(),
        auth_method: None,
        auth_username: None,
        auth_password: None,
    })
}
