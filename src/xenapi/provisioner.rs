//! VM lifecycle: lookup, creation from a template, destruction.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::XenApiError;
use crate::model::PowerState;
use crate::reconciler::VmLifecycle;

use super::client::XenSession;
use super::types::VmRecord;

/// Creates, finds and destroys VMs.
#[derive(Debug)]
pub struct VmProvisioner<'a> {
    session: &'a XenSession,
}

impl<'a> VmProvisioner<'a> {
    /// Creates a provisioner on a session.
    #[must_use]
    pub const fn new(session: &'a XenSession) -> Self {
        Self { session }
    }

    /// Finds a non-template VM by exact name label.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn find_by_name_label(
        &self,
        name_label: &str,
    ) -> Result<Option<String>, XenApiError> {
        let refs: Vec<String> = self
            .session
            .call("VM.get_by_name_label", &[json!(name_label)])
            .await?;

        for vm_ref in refs {
            let is_template: bool = self
                .session
                .call("VM.get_is_a_template", &[json!(vm_ref)])
                .await?;
            if !is_template {
                return Ok(Some(vm_ref));
            }
        }
        Ok(None)
    }

    /// Resolves a VM UUID to its reference, or `None` if no such VM exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails for another reason.
    pub async fn find_by_uuid(&self, uuid: &str) -> Result<Option<String>, XenApiError> {
        match self.session.call("VM.get_by_uuid", &[json!(uuid)]).await {
            Ok(vm_ref) => Ok(Some(vm_ref)),
            Err(XenApiError::Api { code, .. })
                if code == "UUID_INVALID" || code == "HANDLE_INVALID" =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the UUID of a VM.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn uuid(&self, vm_ref: &str) -> Result<String, XenApiError> {
        self.session.call("VM.get_uuid", &[json!(vm_ref)]).await
    }

    /// Finds the first template whose name label contains `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no template matches.
    pub async fn find_template(&self, name: &str) -> Result<String, XenApiError> {
        let records: BTreeMap<String, VmRecord> =
            self.session.call("VM.get_all_records", &[]).await?;
        records
            .into_iter()
            .find(|(_, record)| record.is_a_template && record.name_label.contains(name))
            .map(|(vm_ref, _)| vm_ref)
            .ok_or_else(|| XenApiError::not_found("VM template", name))
    }

    /// Clones a template into a new halted VM and clears its template flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is missing or a call fails.
    pub async fn clone_from_template(
        &self,
        template_name: &str,
        name_label: &str,
    ) -> Result<String, XenApiError> {
        let template_ref = self.find_template(template_name).await?;
        debug!("Cloning template {template_ref} as {name_label}");

        let vm_ref: String = self
            .session
            .call("VM.clone", &[json!(template_ref), json!(name_label)])
            .await?;
        self.session
            .call_void("VM.set_is_a_template", &[json!(vm_ref), json!(false)])
            .await?;

        info!("Created VM {name_label} ({vm_ref}) from template {template_name}");
        Ok(vm_ref)
    }

    /// Destroys a VM together with its VIFs and VBDs.
    ///
    /// A VM that is not halted is hard-shut-down first. VDIs are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failing call.
    pub async fn destroy_vm(&self, vm_ref: &str) -> Result<(), XenApiError> {
        let record: VmRecord = self.session.call("VM.get_record", &[json!(vm_ref)]).await?;

        if record.power_state != PowerState::Halted {
            warn!("VM {} is {}, shutting down", record.name_label, record.power_state);
            self.session.call_void("VM.hard_shutdown", &[json!(vm_ref)]).await?;
        }

        for vif_ref in &record.vifs {
            self.session.call_void("VIF.destroy", &[json!(vif_ref)]).await?;
        }
        for vbd_ref in &record.vbds {
            self.session.call_void("VBD.destroy", &[json!(vbd_ref)]).await?;
        }
        self.session.call_void("VM.destroy", &[json!(vm_ref)]).await?;

        info!("Destroyed VM {} ({vm_ref})", record.name_label);
        Ok(())
    }
}

#[async_trait]
impl VmLifecycle for XenSession {
    async fn find_by_name_label(&self, name_label: &str) -> Result<Option<String>, XenApiError> {
        VmProvisioner::new(self).find_by_name_label(name_label).await
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<String>, XenApiError> {
        VmProvisioner::new(self).find_by_uuid(uuid).await
    }

    async fn vm_uuid(&self, vm_ref: &str) -> Result<String, XenApiError> {
        VmProvisioner::new(self).uuid(vm_ref).await
    }

    async fn clone_from_template(
        &self,
        template_name: &str,
        name_label: &str,
    ) -> Result<String, XenApiError> {
        VmProvisioner::new(self)
            .clone_from_template(template_name, name_label)
            .await
    }

    async fn destroy_vm(&self, vm_ref: &str) -> Result<(), XenApiError> {
        VmProvisioner::new(self).destroy_vm(vm_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xenapi::XenApiClient;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, rpc: &str, result: Value) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"method": rpc})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": result})))
            .mount(server)
            .await;
    }

    fn vm_record(name: &str, template: bool) -> Value {
        json!({
            "uuid": format!("{name}-uuid"),
            "name_label": name,
            "power_state": "Halted",
            "is_a_template": template,
            "VCPUs_at_startup": 1,
            "VCPUs_max": 1,
            "memory_static_min": 1,
            "memory_static_max": 1,
            "memory_dynamic_min": 1,
            "memory_dynamic_max": 1,
            "VBDs": ["OpaqueRef:vbd-0"],
            "VIFs": ["OpaqueRef:vif-0"]
        })
    }

    async fn session(server: &MockServer) -> XenSession {
        mount(server, "session.login_with_password", json!("OpaqueRef:s")).await;
        XenApiClient::new(&server.uri())
            .unwrap()
            .login("root", "pw")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_template_by_substring() {
        let server = MockServer::start().await;
        mount(
            &server,
            "VM.get_all_records",
            json!({
                "OpaqueRef:a": vm_record("web-1", false),
                "OpaqueRef:b": vm_record("Ubuntu Jammy Jellyfish 22.04", true),
            }),
        )
        .await;
        let session = session(&server).await;

        let provisioner = VmProvisioner::new(&session);
        assert_eq!(provisioner.find_template("Jammy").await.unwrap(), "OpaqueRef:b");
        assert!(matches!(
            provisioner.find_template("web-1").await,
            Err(XenApiError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_removes_children_then_vm() {
        let server = MockServer::start().await;
        mount(&server, "VM.get_record", vm_record("web-1", false)).await;
        for rpc in ["VIF.destroy", "VBD.destroy", "VM.destroy"] {
            Mock::given(method("POST"))
                .and(path("/jsonrpc"))
                .and(body_partial_json(json!({"method": rpc})))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": ""})))
                .expect(1)
                .mount(&server)
                .await;
        }
        let session = session(&server).await;

        VmProvisioner::new(&session).destroy_vm("OpaqueRef:a").await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unknown_uuid_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"method": "VM.get_by_uuid"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": 1, "message": "UUID_INVALID", "data": ["VM", "nope"]}
            })))
            .mount(&server)
            .await;
        let session = session(&server).await;

        assert_eq!(VmProvisioner::new(&session).find_by_uuid("nope").await.unwrap(), None);
    }
}
