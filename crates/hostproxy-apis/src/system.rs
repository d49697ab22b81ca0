//! System API group.
//!
//! Host identity and Windows service control. Served version: `v1alpha1`.

use crate::command::{parse_json, ps_bool, quote, CommandRunner};
use async_trait::async_trait;
use hostproxy_core::{
    EndpointDescriptor, Operation, ProxyError, Result, Version, VersionAdapter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const GROUP: &str = "system";

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1alpha1"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetBiosSerialNumberRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBiosSerialNumberResponse {
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetServiceRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetServiceResponse {
    pub display_name: String,
    /// `Automatic`, `Manual` or `Disabled`.
    pub start_type: String,
    /// `Running`, `Stopped`, `StartPending`, ...
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartServiceRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartServiceResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopServiceRequest {
    pub name: String,
    /// Also stop dependent services.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopServiceResponse {}

/// Version-agnostic system operations.
#[async_trait]
pub trait System: Send + Sync {
    async fn get_bios_serial_number(
        &self,
        request: GetBiosSerialNumberRequest,
        version: &Version,
    ) -> Result<GetBiosSerialNumberResponse>;

    async fn get_service(
        &self,
        request: GetServiceRequest,
        version: &Version,
    ) -> Result<GetServiceResponse>;

    async fn start_service(
        &self,
        request: StartServiceRequest,
        version: &Version,
    ) -> Result<StartServiceResponse>;

    async fn stop_service(
        &self,
        request: StopServiceRequest,
        version: &Version,
    ) -> Result<StopServiceResponse>;
}

/// One adapter per served version over `imp`.
pub fn adapters(imp: Arc<dyn System>) -> Result<Vec<VersionAdapter<dyn System>>> {
    let alpha = VersionAdapter::new(GROUP, Version::parse("v1alpha1")?, imp)
        .route(
            Operation::passthrough("GetBIOSSerialNumber"),
            |imp: Arc<dyn System>, req, v| async move { imp.get_bios_serial_number(req, &v).await },
        )
        .route(
            Operation::passthrough("GetService"),
            |imp: Arc<dyn System>, req, v| async move { imp.get_service(req, &v).await },
        )
        .route(
            Operation::passthrough("StartService"),
            |imp: Arc<dyn System>, req, v| async move { imp.start_service(req, &v).await },
        )
        .route(
            Operation::passthrough("StopService"),
            |imp: Arc<dyn System>, req, v| async move { imp.stop_service(req, &v).await },
        );
    Ok(vec![alpha])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn System>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRow {
    display_name: String,
    start_type: String,
    status: String,
}

/// System implementation backed by a [`CommandRunner`].
#[derive(Clone)]
pub struct HostSystem {
    runner: Arc<dyn CommandRunner>,
}

impl HostSystem {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ProxyError::invalid_argument("service name must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl System for HostSystem {
    async fn get_bios_serial_number(
        &self,
        _request: GetBiosSerialNumberRequest,
        _version: &Version,
    ) -> Result<GetBiosSerialNumberResponse> {
        let script = "(Get-CimInstance -ClassName Win32_BIOS).SerialNumber | ConvertTo-Json";
        let serial_number: Option<String> =
            parse_json("Get-CimInstance", &self.runner.run(script, &[]).await?)?;
        Ok(GetBiosSerialNumberResponse {
            serial_number: serial_number.unwrap_or_default(),
        })
    }

    async fn get_service(
        &self,
        request: GetServiceRequest,
        _version: &Version,
    ) -> Result<GetServiceResponse> {
        require_name(&request.name)?;
        let script = format!(
            "Get-Service -Name {} -ErrorAction SilentlyContinue | \
             Select-Object DisplayName, @{{n='StartType';e={{$_.StartType.ToString()}}}}, @{{n='Status';e={{$_.Status.ToString()}}}} | \
             ConvertTo-Json",
            quote(&request.name)
        );
        let output = self.runner.run(&script, &[]).await?;
        if output.trim().is_empty() {
            return Err(ProxyError::NotFound(format!("service {}", request.name)));
        }
        let row: ServiceRow = parse_json("Get-Service", &output)?;
        Ok(GetServiceResponse {
            display_name: row.display_name,
            start_type: row.start_type,
            status: row.status,
        })
    }

    async fn start_service(
        &self,
        request: StartServiceRequest,
        _version: &Version,
    ) -> Result<StartServiceResponse> {
        require_name(&request.name)?;
        let script = format!("Start-Service -Name {}", quote(&request.name));
        self.runner.run(&script, &[]).await?;
        info!("Started service {}", request.name);
        Ok(StartServiceResponse {})
    }

    async fn stop_service(
        &self,
        request: StopServiceRequest,
        _version: &Version,
    ) -> Result<StopServiceResponse> {
        require_name(&request.name)?;
        let script = format!(
            "Stop-Service -Name {} -Force:{}",
            quote(&request.name),
            ps_bool(request.force)
        );
        self.runner.run(&script, &[]).await?;
        info!("Stopped service {}", request.name);
        Ok(StopServiceResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_service_row() {
        let runner = Arc::new(ScriptedRunner::with_outputs([
            r#"{"DisplayName": "Windows Time", "StartType": "Manual", "Status": "Running"}"#,
        ]));
        let served = adapters(Arc::new(HostSystem::new(runner.clone()))).unwrap();

        let response = served[0]
            .call("GetService", json!({"name": "w32time"}))
            .await
            .unwrap();
        assert_eq!(
            response,
            json!({"display_name": "Windows Time", "start_type": "Manual", "status": "Running"})
        );
        assert!(runner.scripts()[0].starts_with("Get-Service -Name 'w32time'"));
    }

    #[tokio::test]
    async fn test_missing_service_is_not_found() {
        let runner = Arc::new(ScriptedRunner::with_outputs([""]));
        let system = HostSystem::new(runner);
        let err = system
            .get_service(
                GetServiceRequest { name: "nope".into() },
                &Version::parse("v1alpha1").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_service_force_flag() {
        let runner = Arc::new(ScriptedRunner::default());
        let served = adapters(Arc::new(HostSystem::new(runner.clone()))).unwrap();
        served[0]
            .call("StopService", json!({"name": "kubelet", "force": true}))
            .await
            .unwrap();
        served[0]
            .call("StopService", json!({"name": "kubelet"}))
            .await
            .unwrap();

        let scripts = runner.scripts();
        assert_eq!(scripts[0], "Stop-Service -Name 'kubelet' -Force:$true");
        assert_eq!(scripts[1], "Stop-Service -Name 'kubelet' -Force:$false");
    }

    #[tokio::test]
    async fn test_bios_serial_number() {
        let runner = Arc::new(ScriptedRunner::with_outputs([r#""VMware-42 1a""#, "null"]));
        let system = HostSystem::new(runner);
        let v = Version::parse("v1alpha1").unwrap();

        let found = system
            .get_bios_serial_number(GetBiosSerialNumberRequest {}, &v)
            .await
            .unwrap();
        assert_eq!(found.serial_number, "VMware-42 1a");

        let blank = system
            .get_bios_serial_number(GetBiosSerialNumberRequest {}, &v)
            .await
            .unwrap();
        assert_eq!(blank.serial_number, "");
    }
}
