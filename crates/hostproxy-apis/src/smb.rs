//! SMB API group.
//!
//! Host-wide SMB global mappings. Served versions: `v1beta2` (deprecated; no
//! local link path) and `v1`.

use crate::command::{quote, CommandRunner};
use async_trait::async_trait;
use hostproxy_core::{
    EndpointDescriptor, Operation, ProxyError, Result, Version, VersionAdapter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const GROUP: &str = "smb";

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1beta2", "v1"];

#[derive(Clone, Serialize, Deserialize)]
pub struct NewSmbGlobalMappingRequest {
    /// `\\server\share`.
    pub remote_path: String,
    /// Symlink to create pointing at the share; empty for none.
    #[serde(default)]
    pub local_path: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for NewSmbGlobalMappingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewSmbGlobalMappingRequest")
            .field("remote_path", &self.remote_path)
            .field("local_path", &self.local_path)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSmbGlobalMappingResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveSmbGlobalMappingRequest {
    pub remote_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveSmbGlobalMappingResponse {}

/// Version-agnostic SMB operations.
#[async_trait]
pub trait Smb: Send + Sync {
    async fn new_smb_global_mapping(
        &self,
        request: NewSmbGlobalMappingRequest,
        version: &Version,
    ) -> Result<NewSmbGlobalMappingResponse>;

    async fn remove_smb_global_mapping(
        &self,
        request: RemoveSmbGlobalMappingRequest,
        version: &Version,
    ) -> Result<RemoveSmbGlobalMappingResponse>;
}

/// `smb` v1beta2 wire schema.
pub mod v1beta2 {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    pub struct NewSmbGlobalMappingRequest {
        pub remote_path: String,
        pub username: String,
        pub password: String,
    }
}

/// One adapter per served version over `imp`, oldest first.
pub fn adapters(imp: Arc<dyn Smb>) -> Result<Vec<VersionAdapter<dyn Smb>>> {
    let beta = VersionAdapter::new(GROUP, Version::parse("v1beta2")?, imp.clone())
        .route(
            Operation::<v1beta2::NewSmbGlobalMappingRequest, NewSmbGlobalMappingRequest, _, _>::structural_request(
                "NewSmbGlobalMapping",
            ),
            |imp: Arc<dyn Smb>, req, v| async move { imp.new_smb_global_mapping(req, &v).await },
        )
        .route(
            Operation::passthrough("RemoveSmbGlobalMapping"),
            |imp: Arc<dyn Smb>, req, v| async move { imp.remove_smb_global_mapping(req, &v).await },
        );

    let stable = VersionAdapter::new(GROUP, Version::parse("v1")?, imp)
        .route(
            Operation::passthrough("NewSmbGlobalMapping"),
            |imp: Arc<dyn Smb>, req, v| async move { imp.new_smb_global_mapping(req, &v).await },
        )
        .route(
            Operation::passthrough("RemoveSmbGlobalMapping"),
            |imp: Arc<dyn Smb>, req, v| async move { imp.remove_smb_global_mapping(req, &v).await },
        );

    Ok(vec![beta, stable])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn Smb>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

/// SMB implementation backed by a [`CommandRunner`].
#[derive(Clone)]
pub struct HostSmb {
    runner: Arc<dyn CommandRunner>,
}

impl HostSmb {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Environment variables carrying credentials into the mapping script.
const USER_ENV: &str = "HOSTPROXY_SMB_USER";
const PASSWORD_ENV: &str = "HOSTPROXY_SMB_PASSWORD";

#[async_trait]
impl Smb for HostSmb {
    async fn new_smb_global_mapping(
        &self,
        request: NewSmbGlobalMappingRequest,
        _version: &Version,
    ) -> Result<NewSmbGlobalMappingResponse> {
        if request.remote_path.trim().is_empty() {
            return Err(ProxyError::invalid_argument("remote_path must not be empty"));
        }

        let mut script = format!(
            "$secret = ConvertTo-SecureString -String $Env:{PASSWORD_ENV} -AsPlainText -Force; \
             $credential = New-Object System.Management.Automation.PSCredential -ArgumentList $Env:{USER_ENV}, $secret; \
             New-SmbGlobalMapping -RemotePath {} -Credential $credential -RequirePrivacy $true | Out-Null",
            quote(&request.remote_path)
        );
        if !request.local_path.is_empty() {
            script.push_str(&format!(
                "; New-Item -ItemType SymbolicLink -Path {} -Target {} | Out-Null",
                quote(&request.local_path),
                quote(&request.remote_path)
            ));
        }

        self.runner
            .run(
                &script,
                &[
                    (USER_ENV, request.username.as_str()),
                    (PASSWORD_ENV, request.password.as_str()),
                ],
            )
            .await?;
        info!("Mapped SMB share {}", request.remote_path);
        Ok(NewSmbGlobalMappingResponse {})
    }

    async fn remove_smb_global_mapping(
        &self,
        request: RemoveSmbGlobalMappingRequest,
        _version: &Version,
    ) -> Result<RemoveSmbGlobalMappingResponse> {
        let script = format!(
            "Remove-SmbGlobalMapping -RemotePath {} -Force",
            quote(&request.remote_path)
        );
        self.runner.run(&script, &[]).await?;
        info!("Removed SMB mapping {}", request.remote_path);
        Ok(RemoveSmbGlobalMappingResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use serde_json::json;

    fn request(local_path: &str) -> NewSmbGlobalMappingRequest {
        NewSmbGlobalMappingRequest {
            remote_path: r"\\fileserver\share".into(),
            local_path: local_path.into(),
            username: "DOMAIN\\svc".into(),
            password: "hunter2".into(),
        }
    }

    #[tokio::test]
    async fn test_credentials_travel_in_environment() {
        let runner = Arc::new(ScriptedRunner::default());
        let smb = HostSmb::new(runner.clone());
        smb.new_smb_global_mapping(request(""), &Version::parse("v1").unwrap())
            .await
            .unwrap();

        let scripts = runner.scripts();
        let script = &scripts[0];
        assert!(!script.contains("hunter2"));
        assert!(!script.contains("SymbolicLink"));
        assert!(script.contains(r"-RemotePath '\\fileserver\share'"));

        let envs = runner.envs.lock().unwrap();
        assert!(envs[0].contains(&(PASSWORD_ENV.to_string(), "hunter2".to_string())));
    }

    #[tokio::test]
    async fn test_local_path_adds_link() {
        let runner = Arc::new(ScriptedRunner::default());
        let smb = HostSmb::new(runner.clone());
        smb.new_smb_global_mapping(request(r"C:\mnt\share"), &Version::parse("v1").unwrap())
            .await
            .unwrap();
        assert!(runner.scripts()[0].contains(r"-Path 'C:\mnt\share'"));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", request(""));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_v1beta2_mapping_has_no_local_path() {
        struct Capture(std::sync::Mutex<Option<NewSmbGlobalMappingRequest>>);

        #[async_trait]
        impl Smb for Capture {
            async fn new_smb_global_mapping(
                &self,
                request: NewSmbGlobalMappingRequest,
                _version: &Version,
            ) -> Result<NewSmbGlobalMappingResponse> {
                *self.0.lock().unwrap() = Some(request);
                Ok(NewSmbGlobalMappingResponse {})
            }

            async fn remove_smb_global_mapping(
                &self,
                _request: RemoveSmbGlobalMappingRequest,
                _version: &Version,
            ) -> Result<RemoveSmbGlobalMappingResponse> {
                Ok(RemoveSmbGlobalMappingResponse {})
            }
        }

        let capture = Arc::new(Capture(Default::default()));
        assert_eq!(endpoints(capture.clone()).unwrap().len(), 2);

        let served = adapters(capture.clone()).unwrap();
        assert_eq!(served[0].version().to_string(), "v1beta2");
        served[0]
            .call(
                "NewSmbGlobalMapping",
                json!({"remote_path": r"\\s\x", "username": "u", "password": "p"}),
            )
            .await
            .unwrap();

        let seen = capture.0.lock().unwrap().clone().unwrap();
        assert_eq!(seen.local_path, "");
        assert_eq!(seen.remote_path, r"\\s\x");
    }
}
