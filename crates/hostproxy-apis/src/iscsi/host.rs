//! iSCSI operations driven through the host's iSCSI initiator cmdlets.

use super::*;
use crate::command::{parse_json_list, ps_bool, quote, CommandRunner};
use hostproxy_core::ProxyError;
use tracing::info;

const CHAP_USER_ENV: &str = "HOSTPROXY_ISCSI_CHAP_USER";
const CHAP_SECRET_ENV: &str = "HOSTPROXY_ISCSI_CHAP_SECRET";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortalRow {
    target_portal_address: String,
    target_portal_port_number: u32,
}

/// iSCSI implementation backed by a [`CommandRunner`].
#[derive(Clone)]
pub struct HostIscsi {
    runner: Arc<dyn CommandRunner>,
}

impl HostIscsi {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

fn portal_args(portal: &TargetPortal) -> Result<String> {
    if portal.target_address.trim().is_empty() {
        return Err(ProxyError::invalid_argument("target_address must not be empty"));
    }
    let port = if portal.target_port == 0 {
        DEFAULT_PORT
    } else {
        portal.target_port
    };
    Ok(format!(
        "-TargetPortalAddress {} -TargetPortalPortNumber {}",
        quote(&portal.target_address),
        port
    ))
}

fn require_iqn(iqn: &str) -> Result<()> {
    if iqn.trim().is_empty() {
        return Err(ProxyError::invalid_argument("iqn must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl Iscsi for HostIscsi {
    async fn add_target_portal(
        &self,
        request: AddTargetPortalRequest,
        _version: &Version,
    ) -> Result<AddTargetPortalResponse> {
        let script = format!(
            "New-IscsiTargetPortal {} | Out-Null",
            portal_args(&request.target_portal)?
        );
        self.runner.run(&script, &[]).await?;
        info!("Added target portal {}", request.target_portal.target_address);
        Ok(AddTargetPortalResponse {})
    }

    async fn discover_target_portal(
        &self,
        request: DiscoverTargetPortalRequest,
        _version: &Version,
    ) -> Result<DiscoverTargetPortalResponse> {
        let script = format!(
            "Get-IscsiTargetPortal {} | Get-IscsiTarget | Select-Object -ExpandProperty NodeAddress | ConvertTo-Json",
            portal_args(&request.target_portal)?
        );
        let iqns = parse_json_list("Get-IscsiTarget", &self.runner.run(&script, &[]).await?)?;
        Ok(DiscoverTargetPortalResponse { iqns })
    }

    async fn list_target_portals(
        &self,
        _request: ListTargetPortalsRequest,
        _version: &Version,
    ) -> Result<ListTargetPortalsResponse> {
        let script =
            "Get-IscsiTargetPortal | Select-Object TargetPortalAddress, TargetPortalPortNumber | ConvertTo-Json";
        let rows: Vec<PortalRow> =
            parse_json_list("Get-IscsiTargetPortal", &self.runner.run(script, &[]).await?)?;
        Ok(ListTargetPortalsResponse {
            target_portals: rows
                .into_iter()
                .map(|row| TargetPortal {
                    target_address: row.target_portal_address,
                    target_port: row.target_portal_port_number,
                })
                .collect(),
        })
    }

    async fn remove_target_portal(
        &self,
        request: RemoveTargetPortalRequest,
        _version: &Version,
    ) -> Result<RemoveTargetPortalResponse> {
        let script = format!(
            "Get-IscsiTargetPortal {} | Remove-IscsiTargetPortal -Confirm:$false",
            portal_args(&request.target_portal)?
        );
        self.runner.run(&script, &[]).await?;
        info!("Removed target portal {}", request.target_portal.target_address);
        Ok(RemoveTargetPortalResponse {})
    }

    async fn connect_target(
        &self,
        request: ConnectTargetRequest,
        _version: &Version,
    ) -> Result<ConnectTargetResponse> {
        require_iqn(&request.iqn)?;
        let mut script = format!(
            "Connect-IscsiTarget {} -NodeAddress {} -IsPersistent $true -IsMultipathEnabled {}",
            portal_args(&request.target_portal)?,
            quote(&request.iqn),
            ps_bool(request.is_multipath)
        );

        let chap = match request.auth_type {
            AuthenticationType::None => None,
            AuthenticationType::OneWayChap => Some("ONEWAYCHAP"),
            AuthenticationType::MutualChap => Some("MUTUALCHAP"),
        };
        let mut env = Vec::new();
        if let Some(kind) = chap {
            script.push_str(&format!(
                " -AuthenticationType {kind} -ChapUsername $Env:{CHAP_USER_ENV} -ChapSecret $Env:{CHAP_SECRET_ENV}"
            ));
            env.push((CHAP_USER_ENV, request.chap_username.as_str()));
            env.push((CHAP_SECRET_ENV, request.chap_secret.as_str()));
        }
        script.push_str(" | Out-Null");

        self.runner.run(&script, &env).await?;
        info!("Connected to {}", request.iqn);
        Ok(ConnectTargetResponse {})
    }

    async fn disconnect_target(
        &self,
        request: DisconnectTargetRequest,
        _version: &Version,
    ) -> Result<DisconnectTargetResponse> {
        require_iqn(&request.iqn)?;
        let script = format!(
            "Disconnect-IscsiTarget -NodeAddress {} -Confirm:$false",
            quote(&request.iqn)
        );
        self.runner.run(&script, &[]).await?;
        info!("Disconnected from {}", request.iqn);
        Ok(DisconnectTargetResponse {})
    }

    async fn get_target_disks(
        &self,
        request: GetTargetDisksRequest,
        _version: &Version,
    ) -> Result<GetTargetDisksResponse> {
        require_iqn(&request.iqn)?;
        let script = format!(
            "Get-IscsiTarget -NodeAddress {} | Get-IscsiSession | Get-Disk | Select-Object -ExpandProperty Number | ConvertTo-Json",
            quote(&request.iqn)
        );
        let numbers: Vec<u32> =
            parse_json_list("Get-IscsiSession", &self.runner.run(&script, &[]).await?)?;
        Ok(GetTargetDisksResponse {
            disk_ids: numbers.into_iter().map(|n| n.to_string()).collect(),
        })
    }

    async fn set_mutual_chap_secret(
        &self,
        request: SetMutualChapSecretRequest,
        _version: &Version,
    ) -> Result<SetMutualChapSecretResponse> {
        let script = format!("Set-IscsiChapSecret -ChapSecret $Env:{CHAP_SECRET_ENV}");
        self.runner
            .run(&script, &[(CHAP_SECRET_ENV, request.mutual_chap_secret.as_str())])
            .await?;
        info!("Updated mutual CHAP secret");
        Ok(SetMutualChapSecretResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;

    fn v1() -> Version {
        Version::parse("v1").unwrap()
    }

    fn portal() -> TargetPortal {
        TargetPortal {
            target_address: "10.0.0.5".into(),
            target_port: 0,
        }
    }

    #[tokio::test]
    async fn test_zero_port_uses_default() {
        let runner = Arc::new(ScriptedRunner::default());
        let iscsi = HostIscsi::new(runner.clone());
        iscsi
            .add_target_portal(AddTargetPortalRequest { target_portal: portal() }, &v1())
            .await
            .unwrap();
        assert!(runner.scripts()[0].contains("-TargetPortalPortNumber 3260"));
    }

    #[tokio::test]
    async fn test_list_portals_single_object() {
        let runner = Arc::new(ScriptedRunner::with_outputs([
            r#"{"TargetPortalAddress": "10.0.0.5", "TargetPortalPortNumber": 3260}"#,
        ]));
        let iscsi = HostIscsi::new(runner);
        let listed = iscsi
            .list_target_portals(ListTargetPortalsRequest {}, &v1())
            .await
            .unwrap();
        assert_eq!(
            listed.target_portals,
            vec![TargetPortal {
                target_address: "10.0.0.5".into(),
                target_port: 3260
            }]
        );
    }

    #[tokio::test]
    async fn test_chap_credentials_travel_in_environment() {
        let runner = Arc::new(ScriptedRunner::default());
        let iscsi = HostIscsi::new(runner.clone());
        iscsi
            .connect_target(
                ConnectTargetRequest {
                    target_portal: portal(),
                    iqn: "iqn.2020-01.example:disk".into(),
                    is_multipath: true,
                    auth_type: AuthenticationType::MutualChap,
                    chap_username: "initiator".into(),
                    chap_secret: "chapchapchap".into(),
                },
                &v1(),
            )
            .await
            .unwrap();

        let scripts = runner.scripts();
        assert!(scripts[0].contains("-AuthenticationType MUTUALCHAP"));
        assert!(scripts[0].contains("-IsMultipathEnabled $true"));
        assert!(!scripts[0].contains("chapchapchap"));

        let envs = runner.envs.lock().unwrap();
        assert!(envs[0].contains(&(CHAP_SECRET_ENV.to_string(), "chapchapchap".to_string())));
    }

    #[tokio::test]
    async fn test_target_disks_as_strings() {
        let runner = Arc::new(ScriptedRunner::with_outputs(["[2, 5]"]));
        let iscsi = HostIscsi::new(runner);
        let disks = iscsi
            .get_target_disks(
                GetTargetDisksRequest {
                    target_portal: portal(),
                    iqn: "iqn.2020-01.example:disk".into(),
                },
                &v1(),
            )
            .await
            .unwrap();
        assert_eq!(disks.disk_ids, ["2", "5"]);
    }

    #[tokio::test]
    async fn test_disconnect_requires_iqn() {
        let runner = Arc::new(ScriptedRunner::default());
        let iscsi = HostIscsi::new(runner.clone());
        let err = iscsi
            .disconnect_target(
                DisconnectTargetRequest {
                    target_portal: portal(),
                    iqn: " ".into(),
                },
                &v1(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidArgument { .. }));
        assert!(runner.scripts().is_empty());
    }
}
