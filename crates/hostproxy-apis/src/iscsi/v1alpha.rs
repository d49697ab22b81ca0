//! `iscsi` v1alpha1 and v1alpha2 wire schema.
//!
//! Both alphas carry portal ports as 16-bit integers. Requests are widened
//! structurally; `ListTargetPortals` narrows every port on the way out.

use super::*;
use hostproxy_core::adapter::narrow;
use hostproxy_core::ConversionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPortal {
    pub target_address: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListTargetPortalsResponse {
    pub target_portals: Vec<TargetPortal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectTargetRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
    #[serde(default)]
    pub is_multipath: bool,
    #[serde(default)]
    pub auth_type: AuthenticationType,
    #[serde(default)]
    pub chap_username: String,
    #[serde(default)]
    pub chap_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectTargetRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTargetDisksRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
}

fn encode_portals(
    response: super::ListTargetPortalsResponse,
) -> std::result::Result<ListTargetPortalsResponse, ConversionError> {
    let target_portals = response
        .target_portals
        .into_iter()
        .map(|portal| {
            Ok(TargetPortal {
                target_port: narrow("target_port", portal.target_port)?,
                target_address: portal.target_address,
            })
        })
        .collect::<std::result::Result<_, ConversionError>>()?;
    Ok(ListTargetPortalsResponse { target_portals })
}

pub(super) fn routes(adapter: VersionAdapter<dyn Iscsi>) -> Result<VersionAdapter<dyn Iscsi>> {
    let mutual_chap_since = Version::parse("v1alpha2")?;

    Ok(adapter
        .route(
            Operation::<AddTargetPortalRequest, super::AddTargetPortalRequest, _, _>::structural_request(
                "AddTargetPortal",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.add_target_portal(req, &v).await },
        )
        .route(
            Operation::<DiscoverTargetPortalRequest, super::DiscoverTargetPortalRequest, _, _>::structural_request(
                "DiscoverTargetPortal",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.discover_target_portal(req, &v).await },
        )
        .route(
            Operation::new("ListTargetPortals", Ok, encode_portals),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.list_target_portals(req, &v).await },
        )
        .route(
            Operation::<RemoveTargetPortalRequest, super::RemoveTargetPortalRequest, _, _>::structural_request(
                "RemoveTargetPortal",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.remove_target_portal(req, &v).await },
        )
        .route(
            Operation::<ConnectTargetRequest, super::ConnectTargetRequest, _, _>::structural_request(
                "ConnectTarget",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.connect_target(req, &v).await },
        )
        .route(
            Operation::<DisconnectTargetRequest, super::DisconnectTargetRequest, _, _>::structural_request(
                "DisconnectTarget",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.disconnect_target(req, &v).await },
        )
        .route(
            Operation::<GetTargetDisksRequest, super::GetTargetDisksRequest, _, _>::structural_request(
                "GetTargetDisks",
            ),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.get_target_disks(req, &v).await },
        )
        .route(
            Operation::passthrough("SetMutualChapSecret").since(mutual_chap_since),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.set_mutual_chap_secret(req, &v).await },
        ))
}
